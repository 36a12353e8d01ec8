//! Resources as the graph sees them: descriptions, not allocations.

use crate::backend::types::*;

/// Graph-assigned resource id. Passes declare accesses against these, the
/// executor maps them to physical handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceId(pub(crate) u32);

/// Virtual texture resource in the render graph.
///
/// Stores the size symbolically so the executor can re-resolve it against
/// the current swapchain dimensions after a resize without rebuilding the
/// graph.
#[derive(Debug, Clone)]
pub struct VirtualTexture {
    pub id: ResourceId,
    pub name: String,
    pub size: TextureSize,
    pub format: TextureFormat,
    pub usage: TextureUsage,
}

impl VirtualTexture {
    /// Physical descriptor with the symbolic size resolved.
    pub fn descriptor(&self, screen_width: u32, screen_height: u32) -> TextureDescriptor {
        let (width, height) = self.size.resolve(screen_width, screen_height);
        TextureDescriptor {
            label: Some(self.name.clone()),
            width,
            height,
            depth: 1,
            mip_levels: 1,
            format: self.format,
            usage: self.usage,
        }
    }
}

/// A resource the graph knows about. Textures carry a full description;
/// externals are just an id whose view somebody else provides.
#[derive(Debug, Clone)]
pub enum VirtualResource {
    Texture(VirtualTexture),
    External(ResourceId),
}

impl VirtualResource {
    pub fn id(&self) -> ResourceId {
        match self {
            VirtualResource::Texture(t) => t.id,
            VirtualResource::External(id) => *id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            VirtualResource::Texture(t) => &t.name,
            VirtualResource::External(_) => "external",
        }
    }
}

/// What a pass does with a resource it declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceUsage {
    /// Sampled as a shader input
    TextureRead,
    /// Written as a color render target
    RenderTarget,
    /// Depth attachment, test only (load without write)
    DepthStencilRead,
    /// Depth attachment with writes
    DepthStencilWrite,
}

/// One declared access: which resource, and how.
#[derive(Debug, Clone)]
pub struct ResourceAccess {
    pub resource: ResourceId,
    pub usage: ResourceUsage,
}

impl ResourceAccess {
    pub fn is_read(&self) -> bool {
        matches!(
            self.usage,
            ResourceUsage::TextureRead | ResourceUsage::DepthStencilRead
        )
    }

    pub fn is_write(&self) -> bool {
        matches!(
            self.usage,
            ResourceUsage::RenderTarget | ResourceUsage::DepthStencilWrite
        )
    }
}

/// Texture dimensions, kept symbolic so surface-relative targets survive
/// a resize without the graph being rebuilt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TextureSize {
    /// Fixed pixel dimensions. Shadow maps use this.
    Absolute { width: u32, height: u32 },
    /// Fraction of the surface size, 1.0 meaning the full surface.
    Relative { width_scale: f32, height_scale: f32 },
}

impl Default for TextureSize {
    fn default() -> Self {
        TextureSize::Relative {
            width_scale: 1.0,
            height_scale: 1.0,
        }
    }
}

impl TextureSize {
    pub fn resolve(&self, screen_width: u32, screen_height: u32) -> (u32, u32) {
        match self {
            TextureSize::Absolute { width, height } => (*width, *height),
            TextureSize::Relative {
                width_scale,
                height_scale,
            } => (
                (((screen_width as f32) * width_scale) as u32).max(1),
                (((screen_height as f32) * height_scale) as u32).max(1),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_size_tracks_screen() {
        let size = TextureSize::Relative {
            width_scale: 0.5,
            height_scale: 1.0,
        };
        assert_eq!(size.resolve(1920, 1080), (960, 1080));
        assert_eq!(size.resolve(1280, 720), (640, 720));
    }

    #[test]
    fn test_absolute_size_ignores_screen() {
        let size = TextureSize::Absolute {
            width: 4096,
            height: 4096,
        };
        assert_eq!(size.resolve(1920, 1080), (4096, 4096));
    }

    #[test]
    fn test_relative_size_never_collapses_to_zero() {
        let size = TextureSize::Relative {
            width_scale: 0.25,
            height_scale: 0.25,
        };
        assert_eq!(size.resolve(2, 2), (1, 1));
    }

    #[test]
    fn test_usage_read_write_classification() {
        let read = ResourceAccess {
            resource: ResourceId(0),
            usage: ResourceUsage::TextureRead,
        };
        let write = ResourceAccess {
            resource: ResourceId(0),
            usage: ResourceUsage::RenderTarget,
        };
        let depth_read = ResourceAccess {
            resource: ResourceId(0),
            usage: ResourceUsage::DepthStencilRead,
        };
        assert!(read.is_read() && !read.is_write());
        assert!(write.is_write() && !write.is_read());
        assert!(depth_read.is_read() && !depth_read.is_write());
    }

    #[test]
    fn test_virtual_texture_descriptor_resolves_size() {
        let tex = VirtualTexture {
            id: ResourceId(3),
            name: "gbuffer_normal".into(),
            size: TextureSize::default(),
            format: TextureFormat::Rg8Unorm,
            usage: TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
        };
        let desc = tex.descriptor(800, 600);
        assert_eq!((desc.width, desc.height), (800, 600));
        assert_eq!(desc.format, TextureFormat::Rg8Unorm);
        assert_eq!(desc.label.as_deref(), Some("gbuffer_normal"));
    }
}
