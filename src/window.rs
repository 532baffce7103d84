//! Window management using winit
//!
//! Translates window events into camera input and demo commands.

use crate::engine::{EngineError, EngineResult};
use crate::scene::CameraInput;
use crate::scenes::SceneKind;
use crate::EngineConfig;
use glam::Vec2;
use std::sync::Arc;
use winit::{
    dpi::PhysicalSize,
    event::{ElementState, MouseButton, MouseScrollDelta, WindowEvent},
    event_loop::EventLoopWindowTarget,
    keyboard::{KeyCode, PhysicalKey},
    window::{Window as WinitWindow, WindowBuilder},
};

/// Pixels of a touchpad scroll counted as one wheel line
const PIXELS_PER_LINE: f32 = 40.0;

/// Keyboard shortcut actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemoCommand {
    NextScene,
    PreviousScene,
    Select(SceneKind),
    TogglePause,
    ToggleOverlay,
    Quit,
}

/// Command bound to a freshly pressed key
pub fn command_for_key(key: KeyCode) -> Option<DemoCommand> {
    let command = match key {
        KeyCode::Space | KeyCode::ArrowRight => DemoCommand::NextScene,
        KeyCode::ArrowLeft => DemoCommand::PreviousScene,
        KeyCode::Digit1 => DemoCommand::Select(SceneKind::House),
        KeyCode::Digit2 => DemoCommand::Select(SceneKind::Ocean),
        KeyCode::Digit3 => DemoCommand::Select(SceneKind::Grass),
        KeyCode::Digit4 => DemoCommand::Select(SceneKind::Reflections),
        KeyCode::KeyP => DemoCommand::TogglePause,
        KeyCode::F1 => DemoCommand::ToggleOverlay,
        KeyCode::Escape => DemoCommand::Quit,
        _ => return None,
    };
    Some(command)
}

/// Camera input accumulated between frames
#[derive(Debug, Default)]
pub struct InputState {
    input: CameraInput,
    cursor: Option<Vec2>,
}

impl InputState {
    pub fn camera_input(&self) -> &CameraInput {
        &self.input
    }

    /// Forget per-frame deltas once the frame consumed them
    pub fn end_frame(&mut self) {
        self.input.reset_deltas();
    }

    /// Update a held movement key. Returns `false` for keys that do not move
    /// the camera.
    pub fn set_key(&mut self, key: KeyCode, pressed: bool) -> bool {
        let flag = match key {
            KeyCode::KeyW => &mut self.input.forward,
            KeyCode::KeyS => &mut self.input.backward,
            KeyCode::KeyA => &mut self.input.left,
            KeyCode::KeyD => &mut self.input.right,
            KeyCode::KeyE => &mut self.input.up,
            KeyCode::KeyQ => &mut self.input.down,
            KeyCode::ShiftLeft | KeyCode::ShiftRight => &mut self.input.sprint,
            _ => return false,
        };
        *flag = pressed;
        true
    }

    pub fn set_dragging(&mut self, dragging: bool) {
        self.input.dragging = dragging;
    }

    /// Cursor moves only rotate the camera while dragging
    pub fn cursor_moved(&mut self, position: Vec2) {
        if let Some(last) = self.cursor {
            if self.input.dragging {
                self.input.mouse_delta += position - last;
            }
        }
        self.cursor = Some(position);
    }

    pub fn scrolled(&mut self, lines: f32) {
        self.input.scroll_delta += lines;
    }
}

/// Wrapper around winit window with additional state
pub struct Window {
    window: Arc<WinitWindow>,
    width: u32,
    height: u32,
    resized: bool,
    input: InputState,
}

impl Window {
    pub fn new(target: &EventLoopWindowTarget<()>, config: &EngineConfig) -> EngineResult<Self> {
        let window = WindowBuilder::new()
            .with_title(&config.title)
            .with_inner_size(PhysicalSize::new(config.width, config.height))
            .build(target)
            .map_err(|err| EngineError::Window(err.to_string()))?;
        let size = window.inner_size();

        Ok(Self {
            window: Arc::new(window),
            width: size.width,
            height: size.height,
            resized: false,
            input: InputState::default(),
        })
    }

    pub fn window(&self) -> &WinitWindow {
        &self.window
    }

    /// Shared handle for backend initialization
    pub fn window_arc(&self) -> Arc<WinitWindow> {
        Arc::clone(&self.window)
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Whether the window was resized since the last call
    pub fn take_resized(&mut self) -> bool {
        std::mem::take(&mut self.resized)
    }

    pub fn input(&self) -> &InputState {
        &self.input
    }

    pub fn input_mut(&mut self) -> &mut InputState {
        &mut self.input
    }

    /// Update size and input from `event`, returning a command for
    /// shortcut keys and close requests.
    pub fn handle_event(&mut self, event: &WindowEvent) -> Option<DemoCommand> {
        match event {
            WindowEvent::Resized(size) => {
                self.width = size.width;
                self.height = size.height;
                self.resized = true;
            }
            WindowEvent::CloseRequested => return Some(DemoCommand::Quit),
            WindowEvent::KeyboardInput { event, .. } => {
                let PhysicalKey::Code(key) = event.physical_key else {
                    return None;
                };
                let pressed = event.state == ElementState::Pressed;
                if !self.input.set_key(key, pressed) && pressed && !event.repeat {
                    return command_for_key(key);
                }
            }
            WindowEvent::MouseInput {
                state,
                button: MouseButton::Left,
                ..
            } => self.input.set_dragging(*state == ElementState::Pressed),
            WindowEvent::CursorMoved { position, .. } => {
                self.input
                    .cursor_moved(Vec2::new(position.x as f32, position.y as f32));
            }
            WindowEvent::MouseWheel { delta, .. } => {
                let lines = match delta {
                    MouseScrollDelta::LineDelta(_, y) => *y,
                    MouseScrollDelta::PixelDelta(position) => position.y as f32 / PIXELS_PER_LINE,
                };
                self.input.scrolled(lines);
            }
            _ => {}
        }
        None
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(KeyCode::Space, DemoCommand::NextScene)]
    #[case(KeyCode::ArrowRight, DemoCommand::NextScene)]
    #[case(KeyCode::ArrowLeft, DemoCommand::PreviousScene)]
    #[case(KeyCode::Digit3, DemoCommand::Select(SceneKind::Grass))]
    #[case(KeyCode::KeyP, DemoCommand::TogglePause)]
    #[case(KeyCode::F1, DemoCommand::ToggleOverlay)]
    #[case(KeyCode::Escape, DemoCommand::Quit)]
    fn shortcut_keys(#[case] key: KeyCode, #[case] command: DemoCommand) {
        assert_eq!(command_for_key(key), Some(command));
    }

    #[test]
    fn digits_cover_every_scene() {
        let digits = [KeyCode::Digit1, KeyCode::Digit2, KeyCode::Digit3, KeyCode::Digit4];
        for (key, kind) in digits.into_iter().zip(SceneKind::ALL) {
            assert_eq!(command_for_key(key), Some(DemoCommand::Select(kind)));
        }
        assert_eq!(command_for_key(KeyCode::Digit5), None);
    }

    #[test]
    fn movement_keys_are_held_not_commands() {
        let mut input = InputState::default();
        assert!(input.set_key(KeyCode::KeyW, true));
        assert!(input.camera_input().forward);
        assert!(input.set_key(KeyCode::KeyW, false));
        assert!(!input.camera_input().forward);
        assert!(!input.set_key(KeyCode::Space, true));
    }

    #[test]
    fn drag_accumulates_mouse_delta() {
        let mut input = InputState::default();
        input.cursor_moved(Vec2::new(10.0, 10.0));
        input.cursor_moved(Vec2::new(20.0, 5.0));
        assert_eq!(input.camera_input().mouse_delta, Vec2::ZERO);

        input.set_dragging(true);
        input.cursor_moved(Vec2::new(25.0, 8.0));
        input.cursor_moved(Vec2::new(27.0, 10.0));
        input.scrolled(1.5);
        assert_eq!(input.camera_input().mouse_delta, Vec2::new(7.0, 5.0));
        assert_eq!(input.camera_input().scroll_delta, 1.5);

        input.end_frame();
        assert_eq!(input.camera_input().mouse_delta, Vec2::ZERO);
        assert_eq!(input.camera_input().scroll_delta, 0.0);
        assert!(input.camera_input().dragging);
    }
}
