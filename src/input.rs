use std::collections::HashSet;

use winit::event::{ElementState, WindowEvent};
use winit::keyboard::{KeyCode, PhysicalKey};

use crate::oit::RenderMode;

/// Tracks keyboard state across frames.
#[derive(Default)]
pub struct Input {
    keys_down: HashSet<KeyCode>,
    keys_pressed: HashSet<KeyCode>,
}

impl Input {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call at the end of each frame to reset per-frame state.
    pub fn begin_frame(&mut self) {
        self.keys_pressed.clear();
    }

    /// Process a window event and update input state.
    pub fn handle_event(&mut self, event: &WindowEvent) {
        if let WindowEvent::KeyboardInput { event, .. } = event {
            if let PhysicalKey::Code(key) = event.physical_key {
                match event.state {
                    ElementState::Pressed => self.press(key),
                    ElementState::Released => self.release(key),
                }
            }
        }
    }

    fn press(&mut self, key: KeyCode) {
        if !self.keys_down.contains(&key) {
            self.keys_pressed.insert(key);
        }
        self.keys_down.insert(key);
    }

    fn release(&mut self, key: KeyCode) {
        self.keys_down.remove(&key);
    }

    /// Returns true if the key was pressed this frame.
    pub fn key_pressed(&self, key: KeyCode) -> bool {
        self.keys_pressed.contains(&key)
    }

    /// Commands for the keys pressed this frame, in a stable order.
    pub fn commands(&self) -> Vec<Command> {
        BOUND_KEYS
            .into_iter()
            .filter(|&key| self.key_pressed(key))
            .filter_map(Command::for_key)
            .collect()
    }
}

/// What a key press asks the application to do.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Command {
    SelectMode(RenderMode),
    CycleMode,
    /// Change transparency by this amount.
    AdjustTransparency(f32),
    CycleBackground,
    Capture,
    Quit,
}

const BOUND_KEYS: [KeyCode; 9] = [
    KeyCode::Digit1,
    KeyCode::Digit2,
    KeyCode::Digit3,
    KeyCode::Tab,
    KeyCode::ArrowUp,
    KeyCode::ArrowDown,
    KeyCode::KeyB,
    KeyCode::F12,
    KeyCode::Escape,
];

/// Transparency step for `Up`/`Down`.
pub const TRANSPARENCY_STEP: f32 = 0.05;

impl Command {
    pub fn for_key(key: KeyCode) -> Option<Self> {
        Some(match key {
            KeyCode::Digit1 => Command::SelectMode(RenderMode::AlphaTesting),
            KeyCode::Digit2 => Command::SelectMode(RenderMode::AlphaBlending),
            KeyCode::Digit3 => Command::SelectMode(RenderMode::DepthPeeling),
            KeyCode::Tab => Command::CycleMode,
            KeyCode::ArrowUp => Command::AdjustTransparency(TRANSPARENCY_STEP),
            KeyCode::ArrowDown => Command::AdjustTransparency(-TRANSPARENCY_STEP),
            KeyCode::KeyB => Command::CycleBackground,
            KeyCode::F12 => Command::Capture,
            KeyCode::Escape => Command::Quit,
            _ => return None,
        })
    }
}
