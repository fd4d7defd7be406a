// error.rs — 启动阶段的致命错误

use crate::shader::ShaderError;

#[derive(Debug, thiserror::Error)]
pub enum ViewerError {
    #[error(transparent)]
    Shader(#[from] ShaderError),

    #[error("failed to create window: {0}")]
    Window(#[from] winit::error::OsError),

    #[error("failed to create surface: {0}")]
    Surface(#[from] wgpu::CreateSurfaceError),

    #[error("no suitable GPU adapter found")]
    AdapterNotFound,

    #[error("failed to open GPU device: {0}")]
    Device(#[from] wgpu::RequestDeviceError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ViewerError {
    pub fn title(&self) -> &'static str {
        match self {
            ViewerError::Shader(_) => "Unable to initialize the shader program",
            ViewerError::Config(_) => "Invalid configuration",
            _ => "Unable to initialize the renderer",
        }
    }
}
