// renderer.rs — 核心渲染器：回放 CommandList，球面网格 + 状态栏

use crate::camera::CameraUniform;
use crate::error::ViewerError;
use crate::frame::{Command, CommandList};
use crate::mesh::{AngleVertex, SphereMesh};
use crate::shader::{LinkedShaders, ShaderProgram, DEPTH_FORMAT};
use crate::texture::{PanoramaTexture, TextureState, TextureUpload};
use wgpu::util::DeviceExt;
use winit::window::Window;

fn create_depth_view(device: &wgpu::Device, config: &wgpu::SurfaceConfiguration) -> wgpu::TextureView {
    let depth = device.create_texture(&wgpu::TextureDescriptor {
        size: wgpu::Extent3d {
            width: config.width,
            height: config.height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: DEPTH_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        label: Some("depth_texture"),
        view_formats: &[],
    });
    depth.create_view(&wgpu::TextureViewDescriptor::default())
}

fn create_bind_group(
    device: &wgpu::Device,
    program: &ShaderProgram,
    camera_buffer: &wgpu::Buffer,
    panorama: &PanoramaTexture,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        layout: &program.bind_group_layout,
        entries: &[
            wgpu::BindGroupEntry { binding: 0, resource: camera_buffer.as_entire_binding() },
            wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::TextureView(&panorama.view) },
            wgpu::BindGroupEntry { binding: 2, resource: wgpu::BindingResource::Sampler(&panorama.sampler) },
        ],
        label: Some("sphere_bind_group"),
    })
}

pub struct Renderer {
    surface: wgpu::Surface,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    pub size: winit::dpi::PhysicalSize<u32>,
    depth_view: wgpu::TextureView,

    program: ShaderProgram,
    vertex_buffer: wgpu::Buffer,
    camera_buffer: wgpu::Buffer,

    // 纹理资源
    panorama: PanoramaTexture,
    bind_group: wgpu::BindGroup,

    // UI
    pub egui_ctx: egui::Context,
    pub egui_state: egui_winit::State,
    egui_renderer: egui_wgpu::Renderer,
}

impl Renderer {
    /// The mesh is consumed: after upload the vertex buffer is its only owner.
    pub async fn new(
        window: &Window,
        shaders: &LinkedShaders,
        mesh: SphereMesh,
        vsync: bool,
    ) -> Result<Self, ViewerError> {
        let size = window.inner_size();
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        // SAFETY: main 持有窗口直到事件循环结束，surface 不会比窗口活得更久
        let surface = unsafe { instance.create_surface(window) }?;
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or(ViewerError::AdapterNotFound)?;

        let info = adapter.get_info();
        log::info!("GPU adapter: {} ({:?}, {:?})", info.name, info.device_type, info.backend);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    features: wgpu::Features::empty(),
                    limits: wgpu::Limits::default().using_resolution(adapter.limits()),
                    label: None,
                },
                None,
            )
            .await?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .unwrap_or(surface_caps.formats[0]);
        log::info!("surface format: {:?}", surface_format);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: if vsync {
                wgpu::PresentMode::Fifo
            } else {
                wgpu::PresentMode::AutoNoVsync
            },
            alpha_mode: surface_caps.alpha_modes[0],
            view_formats: vec![],
        };
        surface.configure(&device, &config);
        let depth_view = create_depth_view(&device, &config);

        // 着色器失败时直接返回，不创建任何绘制资源
        let program = ShaderProgram::new(&device, shaders, config.format).await?;

        log::info!(
            "sphere mesh: {}x{} cells, {} vertices",
            mesh.resolution,
            mesh.resolution,
            mesh.vertex_count()
        );
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Sphere Vertex Buffer"),
            contents: bytemuck::cast_slice(&mesh.vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        drop(mesh);

        let camera_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Camera Buffer"),
            size: std::mem::size_of::<CameraUniform>() as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let panorama = PanoramaTexture::placeholder(&device, &queue);
        let bind_group = create_bind_group(&device, &program, &camera_buffer, &panorama);

        // --- Egui Setup ---
        let egui_ctx = egui::Context::default();
        let mut egui_state = egui_winit::State::new(window);
        egui_state.set_pixels_per_point(window.scale_factor() as f32);
        let egui_renderer = egui_wgpu::Renderer::new(&device, config.format, None, 1);

        Ok(Self {
            surface, device, queue, config, size, depth_view,
            program, vertex_buffer, camera_buffer,
            panorama, bind_group,
            egui_ctx, egui_state, egui_renderer,
        })
    }

    pub fn resize(&mut self, new_size: winit::dpi::PhysicalSize<u32>) {
        if new_size.width > 0 && new_size.height > 0 {
            self.size = new_size;
            self.config.width = new_size.width;
            self.config.height = new_size.height;
            self.surface.configure(&self.device, &self.config);
            self.depth_view = create_depth_view(&self.device, &self.config);
        }
    }

    pub fn panorama_state(&self) -> TextureState {
        self.panorama.state
    }

    pub fn max_texture_dimension(&self) -> u32 {
        self.device.limits().max_texture_dimension_2d
    }

    /// Placeholder -> loaded. Only ever called once per run.
    pub fn load_panorama(&mut self, prepared: &TextureUpload) {
        self.panorama.replace(&self.device, &self.queue, prepared);
        self.bind_group = create_bind_group(&self.device, &self.program, &self.camera_buffer, &self.panorama);
    }

    /// Replays one recorded frame, then draws the status bar on top.
    pub fn execute(
        &mut self,
        commands: &CommandList,
        window: &Window,
        run_ui: impl FnOnce(&egui::Context),
    ) -> Result<(), wgpu::SurfaceError> {
        let output = self.surface.get_current_texture()?;
        let view = output.texture.create_view(&wgpu::TextureViewDescriptor::default());

        if let Some(camera) = commands.camera() {
            self.queue
                .write_buffer(&self.camera_buffer, 0, bytemuck::cast_slice(&[*camera]));
        }
        let (clear, depth) = commands
            .clear_values()
            .unwrap_or(([0.0, 0.0, 0.0, 1.0], 1.0));

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Render Encoder"),
        });

        // 1. Sphere
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Sphere Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: clear[0],
                            g: clear[1],
                            b: clear[2],
                            a: clear[3],
                        }),
                        store: true,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(depth),
                        store: true,
                    }),
                    stencil_ops: None,
                }),
            });

            for command in commands {
                match command {
                    Command::SetPipeline => render_pass.set_pipeline(&self.program.pipeline),
                    Command::SetVertexBuffer { vertex_count } => {
                        let bytes = *vertex_count as wgpu::BufferAddress
                            * std::mem::size_of::<AngleVertex>() as wgpu::BufferAddress;
                        render_pass.set_vertex_buffer(0, self.vertex_buffer.slice(..bytes))
                    }
                    Command::BindTexture { unit } => {
                        // 单一 bind group：uniform + 纹理单元 0
                        debug_assert_eq!(*unit, 0);
                        render_pass.set_bind_group(0, &self.bind_group, &[])
                    }
                    Command::Draw { vertices } => render_pass.draw(vertices.clone(), 0..1),
                    Command::Clear { .. } | Command::SetCamera(_) => {}
                }
            }
        }

        // 2. Status bar
        let raw_input = self.egui_state.take_egui_input(window);
        let full_output = self.egui_ctx.run(raw_input, run_ui);

        self.egui_state.handle_platform_output(window, &self.egui_ctx, full_output.platform_output);
        let clipped_primitives = self.egui_ctx.tessellate(full_output.shapes);

        let screen_descriptor = egui_wgpu::renderer::ScreenDescriptor {
            size_in_pixels: [self.config.width, self.config.height],
            pixels_per_point: window.scale_factor() as f32,
        };

        for (id, delta) in &full_output.textures_delta.set {
            self.egui_renderer.update_texture(&self.device, &self.queue, *id, delta);
        }

        self.egui_renderer.update_buffers(
            &self.device,
            &self.queue,
            &mut encoder,
            &clipped_primitives,
            &screen_descriptor,
        );

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Egui Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations { load: wgpu::LoadOp::Load, store: true },
                })],
                depth_stencil_attachment: None,
            });
            self.egui_renderer.render(&mut render_pass, &clipped_primitives, &screen_descriptor);
        }

        for id in &full_output.textures_delta.free {
            self.egui_renderer.free_texture(id);
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        output.present();

        Ok(())
    }
}
