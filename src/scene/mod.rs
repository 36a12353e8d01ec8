//! What gets rendered: objects, lights, and the camera.

mod camera;
mod camera_controller;
mod light;
mod shadow;
mod transform;

pub use camera::*;
pub use camera_controller::*;
pub use light::*;
pub use shadow::*;
pub use transform::*;

use glam::Vec3;

/// One drawable: a mesh, a material, and where it sits.
#[derive(Debug, Clone)]
pub struct SceneObject {
    pub mesh_id: usize,
    pub material_id: usize,
    pub transform: Transform,
    /// Yaw/pitch/roll angular velocity in radians per second.
    pub spin: Vec3,
}

impl SceneObject {
    pub fn new(mesh_id: usize, material_id: usize) -> Self {
        Self {
            mesh_id,
            material_id,
            transform: Transform::default(),
            spin: Vec3::ZERO,
        }
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_position(mut self, position: Vec3) -> Self {
        self.transform.position = position;
        self
    }

    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.transform.scale = scale;
        self
    }

    pub fn with_spin(mut self, spin: Vec3) -> Self {
        self.spin = spin;
        self
    }
}

/// Everything one frame draws, plus the camera it is seen through.
pub struct Scene {
    pub name: String,
    pub camera: Camera,
    pub objects: Vec<SceneObject>,
    pub point_lights: Vec<PointLight>,
    pub directional_light: DirectionalLight,
}

impl Scene {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            camera: Camera::default(),
            objects: Vec::new(),
            point_lights: Vec::new(),
            directional_light: DirectionalLight::default(),
        }
    }

    /// Append an object; the returned index stays valid for the scene's life.
    pub fn add_object(&mut self, object: SceneObject) -> usize {
        let id = self.objects.len();
        self.objects.push(object);
        id
    }

    /// Advance scene animation by `dt` seconds.
    pub fn update(&mut self, dt: f32) {
        for object in &mut self.objects {
            if object.spin != Vec3::ZERO {
                object.transform.rotate_euler(object.spin * dt);
            }
        }
    }
}

impl Default for Scene {
    fn default() -> Self {
        Self::new("scene")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_object_returns_sequential_ids() {
        let mut scene = Scene::new("test");
        assert_eq!(scene.add_object(SceneObject::new(0, 0)), 0);
        assert_eq!(scene.add_object(SceneObject::new(1, 0)), 1);
        assert_eq!(scene.objects.len(), 2);
    }

    #[test]
    fn test_update_spins_only_spinning_objects() {
        let mut scene = Scene::new("test");
        scene.add_object(SceneObject::new(0, 0));
        scene.add_object(SceneObject::new(0, 0).with_spin(Vec3::new(1.0, 0.0, 0.0)));

        scene.update(0.5);

        assert_eq!(scene.objects[0].transform.rotation, glam::Quat::IDENTITY);
        let spun = scene.objects[1].transform.rotation;
        assert_ne!(spun, glam::Quat::IDENTITY);
        assert!((spun.length() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_new_scene_has_sun_and_no_content() {
        let scene = Scene::new("empty");
        assert_eq!(scene.name, "empty");
        assert!(scene.objects.is_empty());
        assert!(scene.point_lights.is_empty());
        assert_eq!(scene.directional_light.position, Vec3::new(0.0, 500.0, 10.0));
    }
}
