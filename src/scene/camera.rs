//! Look-at camera and its projection.

use glam::{Mat4, Vec3, Vec4};

use crate::backend::CameraUniform;

/// Perspective for scene cameras, orthographic for directional light
/// cameras.
#[derive(Debug, Clone, Copy)]
pub enum Projection {
    Perspective {
        fov_y: f32,
        aspect: f32,
        near: f32,
        far: f32,
    },
    Orthographic {
        left: f32,
        right: f32,
        bottom: f32,
        top: f32,
        near: f32,
        far: f32,
    },
}

impl Default for Projection {
    fn default() -> Self {
        Self::perspective(45.0, 1.0, 3.0, 300.0)
    }
}

impl Projection {
    pub fn perspective(fov_y_degrees: f32, aspect: f32, near: f32, far: f32) -> Self {
        Projection::Perspective {
            fov_y: fov_y_degrees.to_radians(),
            aspect,
            near,
            far,
        }
    }

    pub fn matrix(&self) -> Mat4 {
        match *self {
            Projection::Perspective {
                fov_y,
                aspect,
                near,
                far,
            } => Mat4::perspective_rh(fov_y, aspect, near, far),
            Projection::Orthographic {
                left,
                right,
                bottom,
                top,
                near,
                far,
            } => Mat4::orthographic_rh(left, right, bottom, top, near, far),
        }
    }

    pub fn near(&self) -> f32 {
        match *self {
            Projection::Perspective { near, .. } | Projection::Orthographic { near, .. } => near,
        }
    }

    pub fn far(&self) -> f32 {
        match *self {
            Projection::Perspective { far, .. } | Projection::Orthographic { far, .. } => far,
        }
    }

    pub fn set_aspect(&mut self, aspect: f32) {
        if let Projection::Perspective { aspect: a, .. } = self {
            *a = aspect;
        }
    }
}

/// Position-and-target camera. Orientation falls out of the look-at; only
/// the controller works in yaw/pitch terms.
#[derive(Debug, Clone)]
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub projection: Projection,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            // Start just behind the origin looking down +Z.
            position: Vec3::new(0.0, 0.0, -6.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            projection: Projection::default(),
        }
    }
}

impl Camera {
    pub fn new(position: Vec3, target: Vec3) -> Self {
        Self {
            position,
            target,
            up: Vec3::Y,
            projection: Projection::default(),
        }
    }

    pub fn look_at(&mut self, target: Vec3) {
        self.target = target;
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    pub fn projection_matrix(&self) -> Mat4 {
        self.projection.matrix()
    }

    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    /// Unit vector from position toward target.
    pub fn forward(&self) -> Vec3 {
        (self.target - self.position).normalize()
    }

    /// Snapshot every matrix (and inverse) the shaders want this frame.
    pub fn uniform_data(&self) -> CameraUniform {
        let view = self.view_matrix();
        let proj = self.projection_matrix();

        CameraUniform {
            view,
            proj,
            view_proj: proj * view,
            inv_view: view.inverse(),
            inv_proj: proj.inverse(),
            position: self.position.extend(1.0),
            near_far: Vec4::new(self.projection.near(), self.projection.far(), 0.0, 0.0),
        }
    }

    /// Update the aspect ratio from the swapchain size. A zero width or
    /// height falls back to an aspect of 1.0 instead of producing NaNs.
    pub fn set_aspect(&mut self, width: u32, height: u32) {
        let aspect = if width == 0 || height == 0 {
            1.0
        } else {
            width as f32 / height as f32
        };
        self.projection.set_aspect(aspect);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aspect_of(camera: &Camera) -> f32 {
        match camera.projection {
            Projection::Perspective { aspect, .. } => aspect,
            Projection::Orthographic { .. } => panic!("perspective camera expected"),
        }
    }

    #[test]
    fn test_default_camera_starts_behind_origin() {
        let camera = Camera::default();
        assert_eq!(camera.position, Vec3::new(0.0, 0.0, -6.0));
        assert_eq!(camera.projection.near(), 3.0);
        assert_eq!(camera.projection.far(), 300.0);
        assert!((camera.forward() - Vec3::Z).length() < 1e-6);
    }

    #[test]
    fn test_set_aspect_from_surface_size() {
        let mut camera = Camera::default();
        camera.set_aspect(1920, 1080);
        assert!((aspect_of(&camera) - 1920.0 / 1080.0).abs() < 1e-6);
    }

    #[test]
    fn test_zero_surface_size_falls_back_to_square_aspect() {
        let mut camera = Camera::default();
        camera.set_aspect(1920, 1080);
        camera.set_aspect(0, 1080);
        assert_eq!(aspect_of(&camera), 1.0);
        camera.set_aspect(1280, 0);
        assert_eq!(aspect_of(&camera), 1.0);
    }

    #[test]
    fn test_uniform_data_inverses_match() {
        let camera = Camera::default();
        let uniform = camera.uniform_data();
        let id = uniform.view * uniform.inv_view;
        assert!((id.x_axis - Vec4::X).length() < 1e-4);
        assert!((id.y_axis - Vec4::Y).length() < 1e-4);
        assert_eq!(uniform.near_far.x, 3.0);
        assert_eq!(uniform.near_far.y, 300.0);
    }

    #[test]
    fn test_orthographic_projection_matrix() {
        let projection = Projection::Orthographic {
            left: -2.0,
            right: 2.0,
            bottom: -1.0,
            top: 1.0,
            near: 0.5,
            far: 10.0,
        };
        assert_eq!(
            projection.matrix(),
            Mat4::orthographic_rh(-2.0, 2.0, -1.0, 1.0, 0.5, 10.0)
        );
        assert_eq!(projection.near(), 0.5);
        assert_eq!(projection.far(), 10.0);
    }
}
