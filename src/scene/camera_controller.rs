//! Camera motion from player input.
//!
//! Window code translates OS events into a per-frame [`CameraInput`]
//! snapshot; controllers only ever see that snapshot, never event types.

use glam::{Vec2, Vec3};

use super::Camera;

/// Radians of yaw/pitch per unit of mouse travel.
const ROTATION_GAIN: f32 = 0.04;
/// World units per update at the 60 Hz reference rate.
const MOVEMENT_GAIN: f32 = 0.37;
/// Pitch stops just short of straight up or down so the look-at basis
/// stays well defined.
const PITCH_LIMIT: f32 = std::f32::consts::FRAC_PI_2 - 0.01;

/// One frame's worth of camera input.
#[derive(Debug, Clone, Default)]
pub struct CameraInput {
    /// Movement keys held this frame (WASD plus QE for vertical).
    pub forward: bool,
    pub backward: bool,
    pub left: bool,
    pub right: bool,
    pub up: bool,
    pub down: bool,

    /// Pixels of mouse travel since the last snapshot.
    pub mouse_delta: Vec2,

    /// True while the look button is held; mouse deltas are ignored
    /// otherwise.
    pub mouse_look_active: bool,
}

impl CameraInput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear the per-frame deltas once a controller has consumed them.
    pub fn reset_deltas(&mut self) {
        self.mouse_delta = Vec2::ZERO;
    }
}

/// Turns input snapshots into camera motion.
pub trait CameraController {
    /// Advance the camera by `dt` seconds of `input`.
    fn update(&mut self, camera: &mut Camera, input: &CameraInput, dt: f32);

    /// Put the controller and the camera back in the start pose.
    fn reset(&mut self, camera: &mut Camera);
}

/// Keyboard-and-mouse fly camera. WASD moves in the view plane, Q and E
/// move vertically, and the mouse steers while look is active.
pub struct FreeFlyController {
    /// Yaw in radians; 0 looks down +Z.
    pub yaw: f32,
    /// Pitch in radians, clamped short of vertical either way.
    pub pitch: f32,
    /// Camera position restored by reset
    pub start_position: Vec3,
}

impl Default for FreeFlyController {
    fn default() -> Self {
        Self {
            yaw: 0.0,
            pitch: 0.0,
            start_position: Vec3::new(0.0, 0.0, -6.0),
        }
    }
}

impl FreeFlyController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_start_position(mut self, position: Vec3) -> Self {
        self.start_position = position;
        self
    }

    fn forward_direction(&self) -> Vec3 {
        let (sin_yaw, cos_yaw) = self.yaw.sin_cos();
        let (sin_pitch, cos_pitch) = self.pitch.sin_cos();
        Vec3::new(sin_yaw * cos_pitch, sin_pitch, cos_yaw * cos_pitch).normalize()
    }

    /// Right vector on the XZ plane; already unit length.
    fn right_direction(&self) -> Vec3 {
        let (sin_yaw, cos_yaw) = self.yaw.sin_cos();
        Vec3::new(-cos_yaw, 0.0, sin_yaw)
    }
}

impl CameraController for FreeFlyController {
    fn update(&mut self, camera: &mut Camera, input: &CameraInput, dt: f32) {
        if input.mouse_look_active && input.mouse_delta != Vec2::ZERO {
            self.yaw -= input.mouse_delta.x * ROTATION_GAIN;
            self.pitch -= input.mouse_delta.y * ROTATION_GAIN;

            self.pitch = self.pitch.clamp(-PITCH_LIMIT, PITCH_LIMIT);
            // Wrap yaw into [-pi, pi].
            self.yaw = (self.yaw + std::f32::consts::PI).rem_euclid(std::f32::consts::TAU)
                - std::f32::consts::PI;
        }

        let forward = self.forward_direction();
        let right = self.right_direction();
        let axis = |positive: bool, negative: bool| (positive as i32 - negative as i32) as f32;

        let mut velocity = forward * axis(input.forward, input.backward)
            + right * axis(input.right, input.left)
            + Vec3::Y * axis(input.up, input.down);
        if velocity.length_squared() > 0.0 {
            velocity = velocity.normalize();
        }

        // The movement gain is tuned for one update per 60 Hz frame; scale
        // by dt so slower or faster frame rates cover the same distance.
        camera.position += velocity * MOVEMENT_GAIN * dt * 60.0;
        camera.target = camera.position + forward;
    }

    fn reset(&mut self, camera: &mut Camera) {
        self.yaw = 0.0;
        self.pitch = 0.0;
        camera.position = self.start_position;
        camera.target = camera.position + self.forward_direction();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn look_input(dx: f32, dy: f32) -> CameraInput {
        CameraInput {
            mouse_delta: Vec2::new(dx, dy),
            mouse_look_active: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_forward_key_moves_along_view_direction() {
        let mut camera = Camera::default();
        let mut controller = FreeFlyController::new();
        let input = CameraInput {
            forward: true,
            ..Default::default()
        };

        controller.update(&mut camera, &input, 1.0 / 60.0);

        // Yaw 0 looks down +Z; one 60 Hz update covers one movement gain.
        assert!((camera.position.z - (-6.0 + MOVEMENT_GAIN)).abs() < 1e-5);
        assert!(camera.position.x.abs() < 1e-6);
        assert!(camera.position.y.abs() < 1e-6);
    }

    #[test]
    fn test_movement_scales_with_dt() {
        let mut camera = Camera::default();
        let mut controller = FreeFlyController::new();
        let input = CameraInput {
            forward: true,
            ..Default::default()
        };

        controller.update(&mut camera, &input, 2.0 / 60.0);

        assert!((camera.position.z - (-6.0 + 2.0 * MOVEMENT_GAIN)).abs() < 1e-5);
    }

    #[test]
    fn test_diagonal_movement_is_normalized() {
        let mut camera = Camera::default();
        let mut controller = FreeFlyController::new();
        let input = CameraInput {
            forward: true,
            right: true,
            ..Default::default()
        };

        controller.update(&mut camera, &input, 1.0 / 60.0);

        let moved = camera.position - Vec3::new(0.0, 0.0, -6.0);
        assert!((moved.length() - MOVEMENT_GAIN).abs() < 1e-5);
    }

    #[test]
    fn test_mouse_look_requires_active_flag() {
        let mut camera = Camera::default();
        let mut controller = FreeFlyController::new();
        let mut input = look_input(10.0, 0.0);
        input.mouse_look_active = false;

        controller.update(&mut camera, &input, 1.0 / 60.0);

        assert_eq!(controller.yaw, 0.0);
    }

    #[test]
    fn test_pitch_clamped_below_vertical() {
        let mut camera = Camera::default();
        let mut controller = FreeFlyController::new();

        controller.update(&mut camera, &look_input(0.0, -1000.0), 1.0 / 60.0);
        assert!((controller.pitch - PITCH_LIMIT).abs() < 1e-6);

        controller.update(&mut camera, &look_input(0.0, 1000.0), 1.0 / 60.0);
        assert!((controller.pitch + PITCH_LIMIT).abs() < 1e-6);
    }

    #[test]
    fn test_yaw_wraps_into_pi_range() {
        let mut camera = Camera::default();
        let mut controller = FreeFlyController::new();
        controller.yaw = 3.0;

        controller.update(&mut camera, &look_input(-10.0, 0.0), 1.0 / 60.0);

        assert!(controller.yaw <= std::f32::consts::PI);
        assert!(controller.yaw >= -std::f32::consts::PI);
    }

    #[test]
    fn test_reset_restores_start_pose() {
        let mut camera = Camera::default();
        let mut controller = FreeFlyController::new();
        let input = CameraInput {
            forward: true,
            up: true,
            ..Default::default()
        };
        controller.update(&mut camera, &look_input(5.0, 3.0), 1.0 / 60.0);
        controller.update(&mut camera, &input, 1.0 / 60.0);

        controller.reset(&mut camera);

        assert_eq!(camera.position, Vec3::new(0.0, 0.0, -6.0));
        assert_eq!(controller.yaw, 0.0);
        assert_eq!(controller.pitch, 0.0);
        assert!((camera.forward() - Vec3::Z).length() < 1e-6);
    }
}
