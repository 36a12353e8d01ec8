//! Winit harness for the demo: window construction and translation of OS
//! input events into the per-frame [`CameraInput`] snapshot.

use std::sync::Arc;

use winit::dpi::PhysicalSize;
use winit::event::{ElementState, MouseButton, WindowEvent};
use winit::event_loop::EventLoop;
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{CursorGrabMode, Window as WinitWindow, WindowBuilder};

use crate::scene::CameraInput;

/// Window construction failure.
#[derive(Debug, thiserror::Error)]
#[error("window creation failed: {0}")]
pub struct WindowError(#[from] winit::error::OsError);

/// Wrapper owning the winit window and tracking its current size.
pub struct Window {
    window: Arc<WinitWindow>,
    width: u32,
    height: u32,
}

impl Window {
    pub fn new(
        event_loop: &EventLoop<()>,
        title: &str,
        width: u32,
        height: u32,
    ) -> Result<Self, WindowError> {
        let window = Arc::new(
            WindowBuilder::new()
                .with_title(title)
                .with_inner_size(PhysicalSize::new(width, height))
                .build(event_loop)?,
        );

        // The compositor may hand out a different size than requested.
        let size = window.inner_size();
        Ok(Self {
            window,
            width: size.width,
            height: size.height,
        })
    }

    pub fn winit(&self) -> &WinitWindow {
        &self.window
    }

    /// Shared handle for surface creation, which outlives this wrapper.
    pub fn share(&self) -> Arc<WinitWindow> {
        Arc::clone(&self.window)
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Record the size reported by a resize event.
    pub fn set_dimensions(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }
}

/// Accumulates window and device events into a [`CameraInput`] snapshot.
///
/// Mouse look follows the right button: while it is held the cursor is
/// grabbed and raw motion deltas accumulate until [`InputCollector::end_frame`]
/// clears them.
pub struct InputCollector {
    input: CameraInput,
    cursor_grabbed: bool,
}

impl InputCollector {
    pub fn new() -> Self {
        Self {
            input: CameraInput::new(),
            cursor_grabbed: false,
        }
    }

    pub fn input(&self) -> &CameraInput {
        &self.input
    }

    /// Update key and button state from a window event. Returns true when
    /// the event mapped to a camera control.
    pub fn on_window_event(&mut self, window: &WinitWindow, event: &WindowEvent) -> bool {
        match event {
            WindowEvent::KeyboardInput { event, .. } => {
                let pressed = event.state == ElementState::Pressed;
                if let PhysicalKey::Code(key) = event.physical_key {
                    self.apply_camera_key(key, pressed)
                } else {
                    false
                }
            }
            WindowEvent::MouseInput { state, button, .. } => {
                if *button != MouseButton::Right {
                    return false;
                }
                let pressed = *state == ElementState::Pressed;
                self.input.mouse_look_active = pressed;
                self.set_cursor_grab(window, pressed);
                true
            }
            WindowEvent::Focused(false) => {
                // Held keys must not stick across focus loss.
                self.input = CameraInput::new();
                self.set_cursor_grab(window, false);
                false
            }
            _ => false,
        }
    }

    /// Accumulate raw mouse motion while mouse look is held.
    pub fn on_mouse_motion(&mut self, delta: (f64, f64)) {
        if self.input.mouse_look_active {
            self.input.mouse_delta.x += delta.0 as f32;
            self.input.mouse_delta.y += delta.1 as f32;
        }
    }

    /// Clear per-frame deltas once a frame has consumed them.
    pub fn end_frame(&mut self) {
        self.input.reset_deltas();
    }

    fn apply_camera_key(&mut self, key: KeyCode, pressed: bool) -> bool {
        match key {
            KeyCode::KeyW => self.input.forward = pressed,
            KeyCode::KeyS => self.input.backward = pressed,
            KeyCode::KeyA => self.input.left = pressed,
            KeyCode::KeyD => self.input.right = pressed,
            KeyCode::KeyQ => self.input.down = pressed,
            KeyCode::KeyE => self.input.up = pressed,
            _ => return false,
        }
        true
    }

    fn set_cursor_grab(&mut self, window: &WinitWindow, grab: bool) {
        if grab == self.cursor_grabbed {
            return;
        }
        let mode = if grab {
            CursorGrabMode::Confined
        } else {
            CursorGrabMode::None
        };
        // Some platforms refuse confinement; mouse look still works off
        // raw deltas, so a refusal is not an error.
        if let Err(err) = window.set_cursor_grab(mode) {
            log::debug!("cursor grab unavailable: {err}");
        }
        window.set_cursor_visible(!grab);
        self.cursor_grabbed = grab;
    }
}

impl Default for InputCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_keys_toggle_movement_flags() {
        let mut collector = InputCollector::new();

        assert!(collector.apply_camera_key(KeyCode::KeyW, true));
        assert!(collector.apply_camera_key(KeyCode::KeyE, true));
        assert!(collector.input().forward);
        assert!(collector.input().up);

        assert!(collector.apply_camera_key(KeyCode::KeyW, false));
        assert!(!collector.input().forward);
        assert!(collector.input().up);
    }

    #[test]
    fn test_unmapped_key_is_reported_unhandled() {
        let mut collector = InputCollector::new();
        assert!(!collector.apply_camera_key(KeyCode::F5, true));
        assert!(!collector.apply_camera_key(KeyCode::Tab, false));
    }

    #[test]
    fn test_mouse_motion_only_accumulates_while_looking() {
        let mut collector = InputCollector::new();

        collector.on_mouse_motion((4.0, -2.0));
        assert_eq!(collector.input().mouse_delta.x, 0.0);
        assert_eq!(collector.input().mouse_delta.y, 0.0);

        collector.input.mouse_look_active = true;
        collector.on_mouse_motion((4.0, -2.0));
        collector.on_mouse_motion((1.0, 1.0));
        assert_eq!(collector.input().mouse_delta.x, 5.0);
        assert_eq!(collector.input().mouse_delta.y, -1.0);

        collector.end_frame();
        assert_eq!(collector.input().mouse_delta.x, 0.0);
        assert!(collector.input().mouse_look_active);
    }
}
