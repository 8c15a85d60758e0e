use winit::event::ElementState;
use winit::keyboard::{Key, NamedKey};

use crate::uniforms::UniformValue;

/// Clamp bounds per movement axis, `(min, max)`.
pub const MOVEMENT_BOUNDS: [(f32, f32); 3] = [(-20.0, 20.0), (-3.0, 20.0), (-20.0, 20.0)];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MovementMode {
    /// Lateral and forward axes only; the third component stays zero.
    #[default]
    Planar,
    /// Adds the Q/E axis.
    Volumetric,
}

/// Keys the sandbox reacts to, independent of the physical layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Forward,
    Back,
    Left,
    Right,
    Down,
    Up,
    Export,
    Rebuild,
    Quit,
}

impl Control {
    fn index(self) -> Option<usize> {
        match self {
            Control::Forward => Some(0),
            Control::Back => Some(1),
            Control::Left => Some(2),
            Control::Right => Some(3),
            Control::Down => Some(4),
            Control::Up => Some(5),
            Control::Export | Control::Rebuild | Control::Quit => None,
        }
    }
}

/// One-shot requests raised by key releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputAction {
    Export,
    Rebuild,
    Quit,
}

pub fn control_for_key(key: &Key) -> Option<Control> {
    match key {
        Key::Named(NamedKey::ArrowUp) => Some(Control::Forward),
        Key::Named(NamedKey::ArrowDown) => Some(Control::Back),
        Key::Named(NamedKey::ArrowLeft) => Some(Control::Left),
        Key::Named(NamedKey::ArrowRight) => Some(Control::Right),
        Key::Named(NamedKey::Escape) => Some(Control::Quit),
        Key::Character(value) => match value.to_ascii_lowercase().as_str() {
            "w" => Some(Control::Forward),
            "s" => Some(Control::Back),
            "a" => Some(Control::Left),
            "d" => Some(Control::Right),
            "q" => Some(Control::Down),
            "e" => Some(Control::Up),
            "x" => Some(Control::Export),
            "r" => Some(Control::Rebuild),
            _ => None,
        },
        _ => None,
    }
}

/// Accumulated camera offset driven by held keys.
#[derive(Debug, Clone)]
pub struct MovementState {
    position: [f32; 3],
    held: [bool; 6],
    speed: f32,
    mode: MovementMode,
}

impl MovementState {
    pub fn new(speed: f32, mode: MovementMode) -> Self {
        Self {
            position: [0.0; 3],
            held: [false; 6],
            speed,
            mode,
        }
    }

    pub fn position(&self) -> [f32; 3] {
        self.position
    }

    /// Records a key transition. Movement keys only change the held set;
    /// export and rebuild fire on release, quit on press.
    pub fn handle(&mut self, control: Control, state: ElementState) -> Option<InputAction> {
        let pressed = state == ElementState::Pressed;
        if let Some(index) = control.index() {
            self.held[index] = pressed;
            return None;
        }
        match (control, pressed) {
            (Control::Export, false) => Some(InputAction::Export),
            (Control::Rebuild, false) => Some(InputAction::Rebuild),
            (Control::Quit, true) => Some(InputAction::Quit),
            _ => None,
        }
    }

    /// Advances one frame: each held direction moves by `speed`, then every
    /// axis is clamped to [`MOVEMENT_BOUNDS`].
    pub fn step(&mut self) {
        let axis = |positive: bool, negative: bool| match (positive, negative) {
            (true, false) => 1.0,
            (false, true) => -1.0,
            _ => 0.0,
        };
        let [forward, back, left, right, down, up] = self.held;
        self.position[0] += axis(right, left) * self.speed;
        self.position[1] += axis(forward, back) * self.speed;
        if self.mode == MovementMode::Volumetric {
            self.position[2] += axis(up, down) * self.speed;
        }
        self.clamp();
    }

    fn clamp(&mut self) {
        for (value, (min, max)) in self.position.iter_mut().zip(MOVEMENT_BOUNDS) {
            *value = value.clamp(min, max);
        }
    }

    pub fn as_uniform(&self) -> UniformValue {
        match self.mode {
            MovementMode::Planar => UniformValue::Vec2([self.position[0], self.position[1]]),
            MovementMode::Volumetric => UniformValue::Vec3(self.position),
        }
    }
}
