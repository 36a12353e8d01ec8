//! Point and directional lights and their uniform layouts.

use bytemuck::{Pod, Zeroable};
use glam::{UVec4, Vec3, Vec4};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Upper bound on point lights per scene, fixed by the uniform array size
/// in the light-volume and gizmo shaders.
pub const MAX_POINT_LIGHTS: usize = 64;

/// Point light with a bounding volume scale for the light-volume pass.
#[derive(Debug, Clone, Copy)]
pub struct PointLight {
    pub position: Vec3,
    pub color: Vec3,
    pub scale: Vec3,
}

impl Default for PointLight {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            color: Vec3::ONE,
            scale: Vec3::splat(32.0),
        }
    }
}

impl PointLight {
    pub fn new(position: Vec3, color: Vec3, scale: Vec3) -> Self {
        Self {
            position,
            color,
            scale,
        }
    }

    /// Extend each field to vec4 for the per-light uniform.
    pub fn uniform_data(&self) -> LightUniform {
        LightUniform {
            position: self.position.extend(1.0),
            color: self.color.extend(1.0),
            scale: self.scale.extend(1.0),
        }
    }
}

/// Directional light (like the sun). The light always aims at the world
/// origin; only its position is stored.
#[derive(Debug, Clone, Copy)]
pub struct DirectionalLight {
    pub position: Vec3,
}

impl Default for DirectionalLight {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 500.0, 10.0),
        }
    }
}

impl DirectionalLight {
    pub fn new(position: Vec3) -> Self {
        Self { position }
    }

    /// Direction of light travel, towards the origin.
    pub fn direction(&self) -> Vec3 {
        (-self.position).normalize()
    }
}

/// GPU-friendly light data structure (16-byte aligned triplet)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct LightUniform {
    /// xyz = position, w unused
    pub position: Vec4,
    /// xyz = color, w unused
    pub color: Vec4,
    /// xyz = light volume scale, w unused
    pub scale: Vec4,
}

/// Fixed-size light array as the shaders see it: an active count in `count.x`
/// followed by `MAX_POINT_LIGHTS` slots. Sized for a uniform buffer so the
/// same layout serves both the light-volume pass and the gizmo pass.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct LightsUniform {
    pub count: UVec4,
    pub lights: [LightUniform; MAX_POINT_LIGHTS],
}

impl LightsUniform {
    /// Pack a light slice, truncating anything past `MAX_POINT_LIGHTS`.
    pub fn from_lights(lights: &[PointLight]) -> Self {
        let mut data = Self::zeroed();
        let active = lights.len().min(MAX_POINT_LIGHTS);
        data.count.x = active as u32;
        for (slot, light) in data.lights.iter_mut().zip(lights.iter().take(active)) {
            *slot = light.uniform_data();
        }
        data
    }

    /// Pack the same lights as small gizmo markers: the volume scale is
    /// replaced by a fixed marker size so the spheres render hand-sized
    /// instead of room-sized.
    pub fn markers(lights: &[PointLight], marker_scale: f32) -> Self {
        let mut data = Self::from_lights(lights);
        for slot in &mut data.lights[..data.count.x as usize] {
            slot.scale = Vec3::splat(marker_scale).extend(1.0);
        }
        data
    }
}

/// Generate `count` point lights spread through a hall sized volume,
/// X in [-111, 139], Y in [-6, 23], Z in [-49, 54].
///
/// The sequence is fully determined by the seed: three position draws
/// followed by three color draws per light, one draw per channel.
pub fn generate_point_lights(count: u32, seed: u64) -> Vec<PointLight> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut lights = Vec::with_capacity(count as usize);

    for _ in 0..count {
        let position = Vec3::new(
            -111.0 + rng.gen::<f32>() * 250.0,
            -6.0 + rng.gen::<f32>() * 29.0,
            -49.0 + rng.gen::<f32>() * 103.0,
        );
        let color = Vec3::new(rng.gen::<f32>(), rng.gen::<f32>(), rng.gen::<f32>());
        lights.push(PointLight::new(position, color, Vec3::splat(32.0)));
    }

    lights
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_light_uniform_is_three_padded_vec4s() {
        assert_eq!(std::mem::size_of::<LightUniform>(), 48);
        let light = PointLight::new(Vec3::new(1.0, 2.0, 3.0), Vec3::X, Vec3::splat(32.0));
        let uniform = light.uniform_data();
        assert_eq!(uniform.position, Vec4::new(1.0, 2.0, 3.0, 1.0));
        assert_eq!(uniform.color, Vec4::new(1.0, 0.0, 0.0, 1.0));
        assert_eq!(uniform.scale, Vec4::new(32.0, 32.0, 32.0, 1.0));
    }

    #[test]
    fn test_lights_uniform_packs_count_and_truncates() {
        assert_eq!(std::mem::size_of::<LightsUniform>(), 16 + 64 * 48);

        let lights = generate_point_lights(32, 42);
        let uniform = LightsUniform::from_lights(&lights);
        assert_eq!(uniform.count.x, 32);
        assert_eq!(uniform.lights[0].position, lights[0].position.extend(1.0));
        assert_eq!(uniform.lights[31].color, lights[31].color.extend(1.0));
        // Unused slots stay zeroed.
        assert_eq!(uniform.lights[32].position, Vec4::ZERO);

        let too_many = generate_point_lights(80, 42);
        let truncated = LightsUniform::from_lights(&too_many);
        assert_eq!(truncated.count.x, MAX_POINT_LIGHTS as u32);
    }

    #[test]
    fn test_marker_uniform_overrides_scale_only() {
        let lights = generate_point_lights(4, 42);
        let markers = LightsUniform::markers(&lights, 2.0);
        assert_eq!(markers.count.x, 4);
        for (slot, light) in markers.lights[..4].iter().zip(&lights) {
            assert_eq!(slot.position, light.position.extend(1.0));
            assert_eq!(slot.color, light.color.extend(1.0));
            assert_eq!(slot.scale, Vec4::new(2.0, 2.0, 2.0, 1.0));
        }
    }

    #[test]
    fn test_generated_lights_stay_in_bounds() {
        let lights = generate_point_lights(32, 42);
        assert_eq!(lights.len(), 32);
        for light in &lights {
            assert!(light.position.x >= -111.0 && light.position.x <= 139.0);
            assert!(light.position.y >= -6.0 && light.position.y <= 23.0);
            assert!(light.position.z >= -49.0 && light.position.z <= 54.0);
            assert!(light.color.min_element() >= 0.0);
            assert!(light.color.max_element() <= 1.0);
            assert_eq!(light.scale, Vec3::splat(32.0));
        }
    }

    #[test]
    fn test_generation_is_deterministic_per_seed() {
        let a = generate_point_lights(32, 42);
        let b = generate_point_lights(32, 42);
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.position, y.position);
            assert_eq!(x.color, y.color);
        }

        let c = generate_point_lights(32, 43);
        assert!(a
            .iter()
            .zip(&c)
            .any(|(x, y)| x.position != y.position || x.color != y.color));
    }

    #[test]
    fn test_directional_light_aims_at_origin() {
        let light = DirectionalLight::default();
        assert_eq!(light.position, Vec3::new(0.0, 500.0, 10.0));
        let expected = (-Vec3::new(0.0, 500.0, 10.0)).normalize();
        assert!((light.direction() - expected).length() < 1e-6);
        assert!((light.direction().length() - 1.0).abs() < 1e-6);
    }
}
