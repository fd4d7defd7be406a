// main.rs — 窗口、事件循环、键盘交互与状态栏

#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")] // 在 Release 模式下隐藏控制台窗口

mod camera;
mod config;
mod error;
mod frame;
mod mesh;
mod panorama;
mod renderer;
mod shader;
mod texture;

use config::ViewerConfig;
use error::ViewerError;
use frame::{FrameTick, SphereFrame};
use panorama::{ViewKey, ViewState};
use renderer::Renderer;
use texture::{FetchPoll, ImageFetch, ImageSource, TextureState};

use winit::{
    dpi::LogicalSize,
    event::*,
    event_loop::{ControlFlow, EventLoop},
    window::{Window, WindowBuilder},
};

// 字段顺序决定析构顺序：renderer（含 surface）必须先于 window 释放
struct App {
    renderer: Renderer,
    window: Window,
    view: ViewState,
    frame: SphereFrame,
    fetch: ImageFetch,
    status_bar: bool,
}

impl App {
    fn new(config: &ViewerConfig, event_loop: &EventLoop<()>) -> Result<Self, ViewerError> {
        let shaders = shader::compile(shader::VERTEX_SOURCE, shader::FRAGMENT_SOURCE)?;

        let window = WindowBuilder::new()
            .with_title("Panorama Viewer")
            .with_inner_size(LogicalSize::new(config.window_width, config.window_height))
            .build(event_loop)?;

        let mesh = mesh::build_sphere_mesh(config.grid_resolution);
        let vertex_count = mesh.vertex_count();
        let renderer = pollster::block_on(Renderer::new(&window, &shaders, mesh, config.vsync))?;

        let size = renderer.size;
        let source = ImageSource::parse(&config.image);
        log::info!("panorama source: {}", source);

        Ok(Self {
            frame: SphereFrame::new(vertex_count, size.width, size.height),
            fetch: ImageFetch::spawn(source, renderer.max_texture_dimension()),
            renderer,
            window,
            view: ViewState::new(),
            status_bar: config.status_bar,
        })
    }

    fn poll_texture(&mut self) {
        match self.fetch.poll() {
            FetchPoll::Ready(upload) => {
                self.renderer.load_panorama(&upload);
                if let TextureState::Loaded { width, height } = self.renderer.panorama_state() {
                    log::info!("panorama on GPU: {}x{}", width, height);
                }
            }
            FetchPoll::Failed => log::debug!("no panorama, placeholder stays"),
            FetchPoll::Pending | FetchPoll::Idle => {}
        }
    }

    /// Returns true when the event was a view key.
    fn handle_view_key(&mut self, event: &WindowEvent) -> bool {
        let key = match event {
            WindowEvent::KeyboardInput { input, .. } if input.state == ElementState::Pressed => {
                input.virtual_keycode.and_then(ViewKey::from_virtual_keycode)
            }
            WindowEvent::ReceivedCharacter(c) => ViewKey::from_char(*c),
            _ => None,
        };

        match key {
            Some(key) => {
                self.view.apply(key);
                true
            }
            None => false,
        }
    }

    fn resize(&mut self, size: winit::dpi::PhysicalSize<u32>) {
        self.renderer.resize(size);
        self.frame.resize(size.width, size.height);
    }

    fn redraw(&mut self, control_flow: &mut ControlFlow) {
        let commands = self.frame.render_frame(&self.view);

        let view = self.view;
        let loading = self.fetch.in_flight();
        let status_bar = self.status_bar;
        let result = self.renderer.execute(&commands, &self.window, |ctx| {
            if status_bar {
                draw_status_bar(ctx, &view, loading);
            }
        });

        let Err(e) = result else {
            return;
        };
        match surface_policy(&e) {
            SurfacePolicy::Reconfigure => {
                log::debug!("surface {:?}, reconfiguring", e);
                let size = self.renderer.size;
                self.resize(size);
            }
            SurfacePolicy::Skip => log::debug!("frame skipped: {:?}", e),
            SurfacePolicy::Exit => {
                log::error!("GPU out of memory, exiting");
                *control_flow = ControlFlow::Exit;
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SurfacePolicy {
    Reconfigure,
    Skip,
    Exit,
}

// Lost/Outdated 重新配置；Timeout（如窗口最小化时）每帧都可能出现，只跳过
fn surface_policy(err: &wgpu::SurfaceError) -> SurfacePolicy {
    match err {
        wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated => SurfacePolicy::Reconfigure,
        wgpu::SurfaceError::OutOfMemory => SurfacePolicy::Exit,
        wgpu::SurfaceError::Timeout => SurfacePolicy::Skip,
    }
}

fn draw_status_bar(ctx: &egui::Context, view: &ViewState, loading: bool) {
    egui::TopBottomPanel::bottom("status_bar").show(ctx, |ui| {
        ui.horizontal(|ui| {
            if loading {
                ui.label(egui::RichText::new("Loading panorama…").color(egui::Color32::YELLOW));
                ui.label("|");
            }

            ui.label(format!("FOV: {:.0}°", view.field_of_view));
            ui.label("|");
            ui.label(format!("H: {:.1}°", view.horizontal_angle.to_degrees()));
            ui.label("|");
            ui.label(format!("V: {:.1}°", view.vertical_angle.to_degrees()));
        });
    });
}

/// Blocking error dialog; rendering never starts after this.
fn report_fatal(err: &ViewerError) {
    log::error!("{}", err);
    let description = match err {
        ViewerError::Shader(e) => e.diagnostic().to_string(),
        other => other.to_string(),
    };
    let _ = rfd::MessageDialog::new()
        .set_level(rfd::MessageLevel::Error)
        .set_title(err.title())
        .set_description(description.as_str())
        .set_buttons(rfd::MessageButtons::Ok)
        .show();
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let event_loop = EventLoop::new();
    let mut app = match ViewerConfig::resolve().and_then(|config| App::new(&config, &event_loop)) {
        Ok(app) => app,
        Err(e) => {
            report_fatal(&e);
            std::process::exit(1);
        }
    };

    event_loop.run(move |event, _, control_flow| {
        *control_flow = ControlFlow::Poll;

        // 检查后台加载是否完成
        app.poll_texture();

        match event {
            Event::WindowEvent { event, .. } => {
                if app.handle_view_key(&event) {
                    return;
                }

                let response = app.renderer.egui_state.on_event(&app.renderer.egui_ctx, &event);
                if response.consumed {
                    return;
                }

                match event {
                    WindowEvent::CloseRequested => {
                        *control_flow = ControlFlow::Exit;
                    }
                    WindowEvent::Resized(new_size) => app.resize(new_size),
                    WindowEvent::ScaleFactorChanged { new_inner_size, .. } => {
                        app.resize(*new_inner_size)
                    }
                    _ => {}
                }
            }

            Event::RedrawRequested(_) => app.redraw(control_flow),

            Event::MainEventsCleared => {
                app.window.request_redraw();
            }

            _ => {}
        }
    });
}
