// frame.rs — 逐帧命令录制：先生成 CommandList，再由 renderer 回放到 GPU

use crate::camera::{self, CameraUniform};
use crate::panorama::ViewState;
use std::ops::Range;

pub const CLEAR_COLOR: [f64; 4] = [0.0, 0.0, 0.0, 1.0];
pub const CLEAR_DEPTH: f32 = 1.0;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Clear { color: [f64; 4], depth: f32 },
    SetPipeline,
    SetVertexBuffer { vertex_count: u32 },
    SetCamera(CameraUniform),
    BindTexture { unit: u32 },
    /// Non-indexed triangle list.
    Draw { vertices: Range<u32> },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandList {
    commands: Vec<Command>,
}

impl CommandList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Command> {
        self.commands.iter()
    }

    pub fn camera(&self) -> Option<&CameraUniform> {
        self.commands.iter().find_map(|c| match c {
            Command::SetCamera(u) => Some(u),
            _ => None,
        })
    }

    pub fn clear_values(&self) -> Option<([f64; 4], f32)> {
        self.commands.iter().find_map(|c| match c {
            Command::Clear { color, depth } => Some((*color, *depth)),
            _ => None,
        })
    }

    pub fn draw_calls(&self) -> impl Iterator<Item = &Range<u32>> {
        self.commands.iter().filter_map(|c| match c {
            Command::Draw { vertices } => Some(vertices),
            _ => None,
        })
    }
}

impl<'a> IntoIterator for &'a CommandList {
    type Item = &'a Command;
    type IntoIter = std::slice::Iter<'a, Command>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Called once per animation frame. Must not block.
pub trait FrameTick {
    fn render_frame(&mut self, view: &ViewState) -> CommandList;
}

/// Draws the whole sphere mesh once per frame.
#[derive(Debug, Clone)]
pub struct SphereFrame {
    vertex_count: u32,
    aspect: f32,
}

impl SphereFrame {
    pub fn new(vertex_count: u32, width: u32, height: u32) -> Self {
        Self {
            vertex_count,
            aspect: camera::aspect_ratio(width, height),
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.aspect = camera::aspect_ratio(width, height);
    }
}

impl FrameTick for SphereFrame {
    fn render_frame(&mut self, view: &ViewState) -> CommandList {
        let mut list = CommandList::new();
        list.push(Command::Clear {
            color: CLEAR_COLOR,
            depth: CLEAR_DEPTH,
        });
        list.push(Command::SetVertexBuffer {
            vertex_count: self.vertex_count,
        });
        list.push(Command::SetPipeline);
        list.push(Command::SetCamera(camera::camera_uniform(view, self.aspect)));
        list.push(Command::BindTexture { unit: 0 });
        list.push(Command::Draw {
            vertices: 0..self.vertex_count,
        });
        list
    }
}
