//! Model transform state

use glam::{EulerRot, Mat4, Quat, Vec3};

use crate::backend::ObjectUniform;

/// Position, orientation and scale of a scene object.
#[derive(Debug, Clone, Copy)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    pub fn from_position_scale(position: Vec3, scale: Vec3) -> Self {
        Self {
            position,
            scale,
            ..Default::default()
        }
    }

    /// Create transform from position, yaw/pitch/roll (radians), and scale.
    pub fn from_components(position: Vec3, yaw_pitch_roll: Vec3, scale: Vec3) -> Self {
        Self {
            position,
            rotation: euler_quat(yaw_pitch_roll),
            scale,
        }
    }

    /// Model matrix: scale, then rotate, then translate.
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }

    /// Inverse transpose of the model matrix. Normals go through this so
    /// non-uniform scale does not skew them.
    pub fn normal_matrix(&self) -> Mat4 {
        self.matrix().inverse().transpose()
    }

    /// Move by `offset` in world units.
    pub fn translate(&mut self, offset: Vec3) {
        self.position += offset;
    }

    /// Rotate by yaw/pitch/roll deltas (radians). The rotation quaternion is
    /// renormalized after the mutation.
    pub fn rotate_euler(&mut self, yaw_pitch_roll: Vec3) {
        self.rotation = (euler_quat(yaw_pitch_roll) * self.rotation).normalize();
    }

    /// Replace the orientation with one built from yaw/pitch/roll (radians).
    pub fn set_euler(&mut self, yaw_pitch_roll: Vec3) {
        self.rotation = euler_quat(yaw_pitch_roll).normalize();
    }

    /// Model and normal matrices packed for the per-object uniform.
    pub fn uniform_data(&self) -> ObjectUniform {
        let model = self.matrix();
        ObjectUniform {
            normal_matrix: model.inverse().transpose(),
            model,
        }
    }
}

/// Yaw around Y, then pitch around X, then roll around Z.
fn euler_quat(yaw_pitch_roll: Vec3) -> Quat {
    Quat::from_euler(
        EulerRot::YXZ,
        yaw_pitch_roll.x,
        yaw_pitch_roll.y,
        yaw_pitch_roll.z,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_transform_is_identity() {
        let transform = Transform::default();
        assert_eq!(transform.matrix(), Mat4::IDENTITY);
        assert_eq!(transform.uniform_data().normal_matrix, Mat4::IDENTITY);
    }

    #[test]
    fn test_matrix_applies_scale_then_rotation_then_translation() {
        let transform = Transform::from_position_scale(Vec3::new(1.0, 2.0, 3.0), Vec3::splat(2.0));
        let point = transform.matrix().transform_point3(Vec3::X);
        assert!((point - Vec3::new(3.0, 2.0, 3.0)).length() < 1e-6);
    }

    #[test]
    fn test_rotate_euler_keeps_rotation_normalized() {
        let mut transform = Transform::default();
        for _ in 0..1000 {
            transform.rotate_euler(Vec3::new(0.37, 0.11, 0.05));
        }
        assert!((transform.rotation.length() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_normal_matrix_of_nonuniform_scale() {
        let transform = Transform::from_position_scale(Vec3::ZERO, Vec3::new(2.0, 1.0, 1.0));
        let normal = transform
            .normal_matrix()
            .transform_vector3(Vec3::X)
            .normalize();
        assert!((normal - Vec3::X).length() < 1e-6);
        // A non-uniform scale must not simply reuse the model matrix.
        assert_ne!(transform.normal_matrix(), transform.matrix());
    }
}
