// panorama.rs — 视角参数与键盘映射

use std::f32::consts::{FRAC_PI_2, TAU};
use winit::event::VirtualKeyCode;

pub const ANGLE_STEP: f32 = 0.05;
pub const FOV_STEP: f32 = 1.0;
pub const MIN_FOV: f32 = 15.0;
pub const MAX_FOV: f32 = 90.0;
pub const DEFAULT_FOV: f32 = 45.0;

/// The only keys the viewer reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewKey {
    ArrowLeft,
    ArrowRight,
    ArrowUp,
    ArrowDown,
    Plus,
    Minus,
}

impl ViewKey {
    /// Arrow keys arrive as key codes.
    pub fn from_virtual_keycode(code: VirtualKeyCode) -> Option<Self> {
        match code {
            VirtualKeyCode::Left => Some(ViewKey::ArrowLeft),
            VirtualKeyCode::Right => Some(ViewKey::ArrowRight),
            VirtualKeyCode::Up => Some(ViewKey::ArrowUp),
            VirtualKeyCode::Down => Some(ViewKey::ArrowDown),
            _ => None,
        }
    }

    /// '+' and '-' arrive as characters so that both the main row and the numpad work.
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            '+' => Some(ViewKey::Plus),
            '-' => Some(ViewKey::Minus),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewState {
    /// 弧度，按 2π 取余（余数符号跟随被除数）
    pub horizontal_angle: f32,
    /// 弧度，[-π/2, π/2]
    pub vertical_angle: f32,
    /// 角度，[15, 90]
    pub field_of_view: f32,
}

impl Default for ViewState {
    fn default() -> Self {
        Self::new()
    }
}

impl ViewState {
    pub fn new() -> Self {
        Self {
            horizontal_angle: 0.0,
            vertical_angle: 0.0,
            field_of_view: DEFAULT_FOV,
        }
    }

    pub fn increase_horizontal_angle(&mut self, inc: f32) {
        self.horizontal_angle = (self.horizontal_angle + inc) % TAU;
    }

    pub fn increase_vertical_angle(&mut self, inc: f32) {
        self.vertical_angle = (self.vertical_angle + inc).clamp(-FRAC_PI_2, FRAC_PI_2);
    }

    pub fn increase_field_of_view(&mut self, inc: f32) {
        self.field_of_view = (self.field_of_view + inc).clamp(MIN_FOV, MAX_FOV);
    }

    pub fn apply(&mut self, key: ViewKey) {
        match key {
            ViewKey::ArrowLeft => self.increase_horizontal_angle(-ANGLE_STEP),
            ViewKey::ArrowRight => self.increase_horizontal_angle(ANGLE_STEP),
            ViewKey::ArrowUp => self.increase_vertical_angle(ANGLE_STEP),
            ViewKey::ArrowDown => self.increase_vertical_angle(-ANGLE_STEP),
            // '+' 放大 = 缩小视场角
            ViewKey::Plus => self.increase_field_of_view(-FOV_STEP),
            ViewKey::Minus => self.increase_field_of_view(FOV_STEP),
        }
    }
}
