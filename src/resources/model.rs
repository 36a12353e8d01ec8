//! GPU-side models: uploaded meshes, per-object uniforms and material
//! bind groups consumed by the geometry and shadow passes.

use crate::backend::{
    BackendResult, BindGroupEntry, BindGroupHandle, BindGroupLayoutHandle, BufferDescriptor,
    BufferHandle, BufferUsage, GraphicsBackend, IndexFormat, SamplerHandle,
    TextureViewHandle,
};
use crate::scene::Transform;

use super::{GpuTexture, Material, Mesh, TextureData, TextureSlot};

/// Vertex and index buffers of an uploaded mesh.
pub struct GpuMesh {
    pub vertex_buffer: BufferHandle,
    pub index_buffer: BufferHandle,
    pub index_count: u32,
}

impl GpuMesh {
    pub fn create(backend: &mut dyn GraphicsBackend, mesh: &Mesh) -> BackendResult<Self> {
        let vertex_buffer = backend.create_buffer_init(
            &BufferDescriptor {
                label: Some(format!("{} vertices", mesh.name)),
                size: mesh.vertex_bytes().len() as u64,
                usage: BufferUsage::VERTEX | BufferUsage::COPY_DST,
                mapped_at_creation: false,
            },
            mesh.vertex_bytes(),
        )?;

        let index_buffer = backend.create_buffer_init(
            &BufferDescriptor {
                label: Some(format!("{} indices", mesh.name)),
                size: mesh.index_bytes().len() as u64,
                usage: BufferUsage::INDEX | BufferUsage::COPY_DST,
                mapped_at_creation: false,
            },
            mesh.index_bytes(),
        )?;

        Ok(Self {
            vertex_buffer,
            index_buffer,
            index_count: mesh.index_count() as u32,
        })
    }

    /// Bind the buffers and draw `instances` copies.
    pub fn draw_instanced(&self, backend: &mut dyn GraphicsBackend, instances: u32) {
        backend.set_vertex_buffer(0, self.vertex_buffer, 0);
        backend.set_index_buffer(self.index_buffer, 0, IndexFormat::Uint32);
        backend.draw_indexed(0..self.index_count, 0, 0..instances);
    }
}

/// The 1x1 fallback textures bound to material slots without a map.
pub struct MaterialDefaults {
    pub white: GpuTexture,
    pub flat_normal: GpuTexture,
    pub black: GpuTexture,
}

impl MaterialDefaults {
    pub fn create(backend: &mut dyn GraphicsBackend) -> BackendResult<Self> {
        Ok(Self {
            white: GpuTexture::create(backend, &TextureData::white())?,
            flat_normal: GpuTexture::create(backend, &TextureData::flat_normal())?,
            black: GpuTexture::create(backend, &TextureData::black())?,
        })
    }

    /// The view used when `slot` has no texture of its own.
    pub fn view_for(&self, slot: TextureSlot) -> TextureViewHandle {
        match slot {
            TextureSlot::Normal | TextureSlot::Bump => self.flat_normal.view,
            TextureSlot::Emissive => self.black.view,
            _ => self.white.view,
        }
    }
}

/// A scene object uploaded to the GPU.
///
/// Bind group index 1 carries the object uniform, index 2 the material.
/// Group 0 is reserved for the per-frame camera and is bound by the pass.
pub struct Model {
    pub mesh: GpuMesh,
    pub object_buffer: BufferHandle,
    pub material_buffer: BufferHandle,
    pub object_bind_group: BindGroupHandle,
    pub material_bind_group: BindGroupHandle,
    /// Keeps slot texture uploads alive for the lifetime of the model.
    textures: Vec<GpuTexture>,
}

impl Model {
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        backend: &mut dyn GraphicsBackend,
        mesh: &Mesh,
        material: &Material,
        transform: &Transform,
        object_layout: BindGroupLayoutHandle,
        material_layout: BindGroupLayoutHandle,
        sampler: SamplerHandle,
        defaults: &MaterialDefaults,
    ) -> BackendResult<Self> {
        let gpu_mesh = GpuMesh::create(backend, mesh)?;

        let object_uniform = transform.uniform_data();
        let object_buffer = backend.create_buffer_init(
            &BufferDescriptor {
                label: Some(format!("{} object", mesh.name)),
                size: std::mem::size_of_val(&object_uniform) as u64,
                usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
                mapped_at_creation: false,
            },
            bytemuck::bytes_of(&object_uniform),
        )?;

        let object_bind_group = backend.create_bind_group(
            object_layout,
            &[(
                0,
                BindGroupEntry::Buffer {
                    buffer: object_buffer,
                    offset: 0,
                    size: None,
                },
            )],
        )?;

        let material_uniform = material.uniform_data();
        let material_buffer = backend.create_buffer_init(
            &BufferDescriptor {
                label: Some(format!("{} material", material.name)),
                size: std::mem::size_of_val(&material_uniform) as u64,
                usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
                mapped_at_creation: false,
            },
            bytemuck::bytes_of(&material_uniform),
        )?;

        // Upload the slot textures; empty slots fall back to the defaults.
        let mut textures = Vec::new();
        let mut entries: Vec<(u32, BindGroupEntry)> = vec![
            (
                0,
                BindGroupEntry::Buffer {
                    buffer: material_buffer,
                    offset: 0,
                    size: None,
                },
            ),
            (1, BindGroupEntry::Sampler(sampler)),
        ];
        for slot in TextureSlot::ALL {
            let view = match material.texture(slot) {
                Some(data) => {
                    let texture = GpuTexture::create(backend, data)?;
                    let view = texture.view;
                    textures.push(texture);
                    view
                }
                None => defaults.view_for(slot),
            };
            entries.push((2 + slot.index() as u32, BindGroupEntry::Texture(view)));
        }

        let material_bind_group = backend.create_bind_group(material_layout, &entries)?;

        Ok(Self {
            mesh: gpu_mesh,
            object_buffer,
            material_buffer,
            object_bind_group,
            material_bind_group,
            textures,
        })
    }

    /// Release every GPU resource owned by the model.
    pub fn destroy(self, backend: &mut dyn GraphicsBackend) {
        backend.destroy_bind_group(self.object_bind_group);
        backend.destroy_bind_group(self.material_bind_group);
        backend.destroy_buffer(self.object_buffer);
        backend.destroy_buffer(self.material_buffer);
        backend.destroy_buffer(self.mesh.vertex_buffer);
        backend.destroy_buffer(self.mesh.index_buffer);
        for texture in self.textures {
            texture.destroy(backend);
        }
    }

    /// Upload the current transform into the object uniform.
    pub fn update_transform(&self, backend: &mut dyn GraphicsBackend, transform: &Transform) {
        let uniform = transform.uniform_data();
        backend.write_buffer(self.object_buffer, 0, bytemuck::bytes_of(&uniform));
    }

    /// Record the draw. Depth-only passes skip the material bind group;
    /// the object bind group is always required.
    pub fn draw(&self, backend: &mut dyn GraphicsBackend, depth_pass: bool) {
        backend.set_bind_group(1, self.object_bind_group);
        if !depth_pass {
            backend.set_bind_group(2, self.material_bind_group);
        }
        self.mesh.draw_instanced(backend, 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::test_backend::TestBackend;
    use crate::backend::{
        BindGroupLayoutEntry, BindingType, ColorAttachment, LoadOp, RenderPassDescriptor,
        SamplerDescriptor, ShaderStageFlags, StoreOp, TextureSampleType,
    };
    use glam::Vec3;

    fn material_layout(backend: &mut TestBackend) -> BindGroupLayoutHandle {
        let mut entries = vec![
            BindGroupLayoutEntry {
                binding: 0,
                visibility: ShaderStageFlags::FRAGMENT,
                ty: BindingType::UniformBuffer,
            },
            BindGroupLayoutEntry {
                binding: 1,
                visibility: ShaderStageFlags::FRAGMENT,
                ty: BindingType::Sampler { comparison: false },
            },
        ];
        for slot in TextureSlot::ALL {
            entries.push(BindGroupLayoutEntry {
                binding: 2 + slot.index() as u32,
                visibility: ShaderStageFlags::FRAGMENT,
                ty: BindingType::Texture {
                    sample_type: TextureSampleType::Float { filterable: true },
                },
            });
        }
        backend.create_bind_group_layout(&entries).unwrap()
    }

    fn build_model(backend: &mut TestBackend) -> Model {
        let object_layout = backend
            .create_bind_group_layout(&[BindGroupLayoutEntry {
                binding: 0,
                visibility: ShaderStageFlags::VERTEX,
                ty: BindingType::UniformBuffer,
            }])
            .unwrap();
        let material_layout = material_layout(backend);
        let sampler = backend.create_sampler(&SamplerDescriptor::default()).unwrap();
        let defaults = MaterialDefaults::create(backend).unwrap();

        let material = Material::solid("red", Vec3::X)
            .with_texture(TextureSlot::Diffuse, TextureData::checkerboard(16, 8, [255; 4], [0; 4]));
        Model::create(
            backend,
            &Mesh::cube(),
            &material,
            &Transform::default(),
            object_layout,
            material_layout,
            sampler,
            &defaults,
        )
        .unwrap()
    }

    fn record_draw(backend: &mut TestBackend, model: &Model, depth_pass: bool) {
        let frame = backend.begin_frame().unwrap();
        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("model test".to_string()),
            color_attachments: vec![ColorAttachment {
                view: frame.swapchain_view,
                resolve_target: None,
                load_op: LoadOp::Clear([0.0; 4]),
                store_op: StoreOp::Store,
            }],
            depth_stencil_attachment: None,
            timestamp_writes: None,
        });
        model.draw(backend, depth_pass);
        backend.end_render_pass();
        backend.end_frame().unwrap();
    }

    #[test]
    fn test_model_draw_binds_object_and_material() {
        let mut backend = TestBackend::new(64, 64);
        let model = build_model(&mut backend);

        record_draw(&mut backend, &model, false);

        let pass = backend.pass("model test").expect("recorded pass");
        assert_eq!(pass.draw_count(), 1);
        let groups = pass.bound_groups();
        assert!(groups.contains(&model.object_bind_group));
        assert!(groups.contains(&model.material_bind_group));
    }

    #[test]
    fn test_depth_pass_draw_skips_material() {
        let mut backend = TestBackend::new(64, 64);
        let model = build_model(&mut backend);

        record_draw(&mut backend, &model, true);

        let pass = backend.pass("model test").expect("recorded pass");
        assert_eq!(pass.draw_count(), 1);
        let groups = pass.bound_groups();
        assert!(groups.contains(&model.object_bind_group));
        assert!(!groups.contains(&model.material_bind_group));
    }

    #[test]
    fn test_material_bind_group_covers_all_slots() {
        let mut backend = TestBackend::new(64, 64);
        let model = build_model(&mut backend);

        let entries = &backend.bind_groups[&model.material_bind_group.0];
        // Constants + sampler + 7 texture slots.
        assert_eq!(entries.len(), 9);
        let bindings: Vec<u32> = entries.iter().map(|(binding, _)| *binding).collect();
        assert_eq!(bindings, vec![0, 1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_update_transform_rewrites_object_uniform() {
        let mut backend = TestBackend::new(64, 64);
        let model = build_model(&mut backend);

        let moved = Transform::from_position(Vec3::new(3.0, 0.0, 0.0));
        model.update_transform(&mut backend, &moved);

        let bytes = &backend.buffers[&model.object_buffer.0].data;
        let uniform: crate::backend::ObjectUniform = bytemuck::pod_read_unaligned(&bytes[..]);
        assert_eq!(uniform.model.w_axis.x, 3.0);
    }

    #[test]
    fn test_destroy_releases_every_owned_handle() {
        let mut backend = TestBackend::new(64, 64);
        let model = build_model(&mut backend);

        let object_buffer = model.object_buffer;
        let material_buffer = model.material_buffer;
        let vertex_buffer = model.mesh.vertex_buffer;
        let index_buffer = model.mesh.index_buffer;
        let object_group = model.object_bind_group;
        let material_group = model.material_bind_group;

        model.destroy(&mut backend);

        for buffer in [object_buffer, material_buffer, vertex_buffer, index_buffer] {
            assert!(backend.destroyed_buffers.contains(&buffer));
            assert!(!backend.buffers.contains_key(&buffer.0));
        }
        assert!(!backend.bind_groups.contains_key(&object_group.0));
        assert!(!backend.bind_groups.contains_key(&material_group.0));
        // The checkerboard diffuse upload goes with the model.
        assert_eq!(backend.destroyed_textures.len(), 1);
    }
}
