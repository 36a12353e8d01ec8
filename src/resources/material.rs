//! Blinn-Phong materials with the classic OBJ texture slots

use bytemuck::{Pod, Zeroable};
use glam::{UVec4, Vec3, Vec4};

use super::TextureData;

/// The semantic texture slots of a material, in bind order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureSlot {
    Ambient = 0,
    Diffuse = 1,
    Specular = 2,
    Normal = 3,
    Bump = 4,
    Dissolve = 5,
    Emissive = 6,
}

pub const TEXTURE_SLOT_COUNT: usize = 7;

impl TextureSlot {
    pub const ALL: [TextureSlot; TEXTURE_SLOT_COUNT] = [
        TextureSlot::Ambient,
        TextureSlot::Diffuse,
        TextureSlot::Specular,
        TextureSlot::Normal,
        TextureSlot::Bump,
        TextureSlot::Dissolve,
        TextureSlot::Emissive,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Material properties plus optional per-slot textures
#[derive(Debug, Clone)]
pub struct Material {
    pub name: String,
    pub ambient_color: Vec3,
    pub diffuse_color: Vec3,
    pub specular_color: Vec3,
    pub shininess: f32,
    pub dissolve: f32,
    textures: [Option<TextureData>; TEXTURE_SLOT_COUNT],
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            ambient_color: Vec3::ONE,
            diffuse_color: Vec3::ONE,
            specular_color: Vec3::ONE,
            shininess: 32.0,
            dissolve: 1.0,
            textures: Default::default(),
        }
    }
}

impl Material {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// A texture-less material rendered with a flat diffuse color.
    pub fn solid(name: &str, color: Vec3) -> Self {
        Self::new(name).with_diffuse_color(color)
    }

    pub fn with_ambient_color(mut self, color: Vec3) -> Self {
        self.ambient_color = color;
        self
    }

    pub fn with_diffuse_color(mut self, color: Vec3) -> Self {
        self.diffuse_color = color;
        self
    }

    pub fn with_specular_color(mut self, color: Vec3) -> Self {
        self.specular_color = color;
        self
    }

    pub fn with_shininess(mut self, shininess: f32) -> Self {
        self.shininess = shininess;
        self
    }

    pub fn with_texture(mut self, slot: TextureSlot, texture: TextureData) -> Self {
        self.textures[slot.index()] = Some(texture);
        self
    }

    pub fn set_texture(&mut self, slot: TextureSlot, texture: TextureData) {
        self.textures[slot.index()] = Some(texture);
    }

    pub fn texture(&self, slot: TextureSlot) -> Option<&TextureData> {
        self.textures[slot.index()].as_ref()
    }

    /// Bitmask with bit `slot` set for every slot that has a texture.
    pub fn texture_flags(&self) -> u32 {
        let mut flags = 0;
        for slot in TextureSlot::ALL {
            if self.textures[slot.index()].is_some() {
                flags |= 1 << slot.index();
            }
        }
        flags
    }

    /// Snapshot this material as the GPU-side block.
    pub fn uniform_data(&self) -> MaterialUniform {
        MaterialUniform {
            ambient_color: self.ambient_color.extend(1.0),
            diffuse_color: self.diffuse_color.extend(1.0),
            specular_color: self.specular_color.extend(1.0),
            params: Vec4::new(self.shininess, self.dissolve, 0.0, 0.0),
            flags: UVec4::new(self.texture_flags(), 0, 0, 0),
        }
    }
}

/// GPU-side material block. Field order matches the WGSL struct.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct MaterialUniform {
    pub ambient_color: Vec4,
    pub diffuse_color: Vec4,
    pub specular_color: Vec4,
    /// x = shininess exponent, y = dissolve factor, zw = padding
    pub params: Vec4,
    /// x = texture presence bitmask (bit = [`TextureSlot`] index)
    pub flags: UVec4,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_texture_flags_follow_slot_indices() {
        let material = Material::new("flagged")
            .with_texture(TextureSlot::Diffuse, TextureData::white())
            .with_texture(TextureSlot::Emissive, TextureData::black());

        let flags = material.texture_flags();
        assert_eq!(flags, (1 << 1) | (1 << 6));
        assert!(material.texture(TextureSlot::Diffuse).is_some());
        assert!(material.texture(TextureSlot::Ambient).is_none());
    }

    #[test]
    fn test_uniform_data_packs_colors_and_params() {
        let material = Material::solid("red", Vec3::X).with_shininess(64.0);
        let uniform = material.uniform_data();
        assert_eq!(uniform.diffuse_color, Vec4::new(1.0, 0.0, 0.0, 1.0));
        assert_eq!(uniform.params.x, 64.0);
        assert_eq!(uniform.flags.x, 0);
        assert_eq!(std::mem::size_of::<MaterialUniform>(), 80);
    }

    #[test]
    fn test_slot_order_matches_bindings() {
        // Bindings 2..=8 of the material bind group follow this order.
        let indices: Vec<usize> = TextureSlot::ALL.iter().map(|s| s.index()).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4, 5, 6]);
    }
}
