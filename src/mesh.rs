// mesh.rs — 经纬网格球面，只存 (phi, theta)，笛卡尔坐标留给顶点着色器

use std::f32::consts::{FRAC_PI_2, PI, TAU};

pub const DEFAULT_GRID_RESOLUTION: u32 = 1000;

/// One mesh vertex: longitude `phi` in [0, 2π] and latitude `theta` in [-π/2, π/2].
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct AngleVertex {
    pub angles: [f32; 2],
}

impl AngleVertex {
    pub const LAYOUT: wgpu::VertexBufferLayout<'static> = wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<AngleVertex>() as wgpu::BufferAddress,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &[wgpu::VertexAttribute {
            format: wgpu::VertexFormat::Float32x2,
            offset: 0,
            shader_location: 0,
        }],
    };
}

#[derive(Debug, Clone)]
pub struct SphereMesh {
    pub resolution: u32,
    pub vertices: Vec<AngleVertex>,
}

impl SphereMesh {
    pub fn vertex_count(&self) -> u32 {
        self.vertices.len() as u32
    }
}

/// Longitude of grid column `p`.
pub fn phi(p: u32, n: u32) -> f32 {
    p as f32 / n as f32 * TAU
}

/// Latitude of grid row `t`.
pub fn theta(t: u32, n: u32) -> f32 {
    t as f32 / n as f32 * PI - FRAC_PI_2
}

/// Builds an `n`×`n` grid in angle space, two triangles per cell, no index buffer.
///
/// Each cell (i, j) emits (i,j) (i+1,j+1) (i+1,j) then (i,j) (i,j+1) (i+1,j+1),
/// so the vertex count is always `6 * n * n`.
pub fn build_sphere_mesh(n: u32) -> SphereMesh {
    let cells = n as usize * n as usize;
    let mut vertices = Vec::with_capacity(cells * 6);

    let point = |p: u32, t: u32| AngleVertex {
        angles: [phi(p, n), theta(t, n)],
    };

    for i in 0..n {
        for j in 0..n {
            vertices.extend_from_slice(&[
                point(i, j),
                point(i + 1, j + 1),
                point(i + 1, j),
                point(i, j),
                point(i, j + 1),
                point(i + 1, j + 1),
            ]);
        }
    }

    SphereMesh {
        resolution: n,
        vertices,
    }
}
