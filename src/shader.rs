// shader.rs — 着色器编译、链接检查与渲染管线创建

use crate::mesh::AngleVertex;
use naga::{Binding, Handle, Module, ShaderStage as NagaStage, Type, TypeInner};
use std::fmt;

pub const VERTEX_SOURCE: &str = include_str!("shaders/sphere.vert.wgsl");
pub const FRAGMENT_SOURCE: &str = include_str!("shaders/sphere.frag.wgsl");

pub const VERTEX_ENTRY: &str = "vs_main";
pub const FRAGMENT_ENTRY: &str = "fs_main";

pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderStage::Vertex => f.write_str("vertex"),
            ShaderStage::Fragment => f.write_str("fragment"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ShaderError {
    #[error("an error occurred compiling the {stage} shader:\n{diagnostic}")]
    Compile {
        stage: ShaderStage,
        diagnostic: String,
    },

    #[error("unable to link the shader program:\n{diagnostic}")]
    Link { diagnostic: String },
}

impl ShaderError {
    /// Compiler or linker output, without the stage prefix.
    pub fn diagnostic(&self) -> &str {
        match self {
            ShaderError::Compile { diagnostic, .. } | ShaderError::Link { diagnostic } => diagnostic,
        }
    }
}

/// A vertex/fragment pair that compiled and whose interfaces agree.
#[derive(Debug)]
pub struct LinkedShaders {
    vertex_source: String,
    fragment_source: String,
}

impl LinkedShaders {
    pub fn vertex_source(&self) -> &str {
        &self.vertex_source
    }

    pub fn fragment_source(&self) -> &str {
        &self.fragment_source
    }
}

fn compile_stage(stage: ShaderStage, source: &str) -> Result<Module, ShaderError> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| ShaderError::Compile {
        stage,
        diagnostic: e.emit_to_string(source),
    })?;

    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::empty(),
    );
    validator
        .validate(&module)
        .map_err(|e| ShaderError::Compile {
            stage,
            diagnostic: error_chain(&e),
        })?;

    Ok(module)
}

/// Joins an error and its sources, skipping a source that only repeats its parent.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut last = err.to_string();
    let mut out = last.clone();
    let mut source = err.source();
    while let Some(e) = source {
        let text = e.to_string();
        if text != last {
            out.push_str("\n  caused by: ");
            out.push_str(&text);
        }
        last = text;
        source = e.source();
    }
    out
}

fn entry_point<'m>(
    module: &'m Module,
    name: &str,
    stage: NagaStage,
) -> Result<&'m naga::EntryPoint, ShaderError> {
    module
        .entry_points
        .iter()
        .find(|ep| ep.name == name && ep.stage == stage)
        .ok_or_else(|| ShaderError::Link {
            diagnostic: format!("missing {:?} entry point `{}`", stage, name),
        })
}

/// 收集 @location(n)；没有 binding 的结构体则展开其成员
fn collect_locations(module: &Module, ty: Handle<Type>, binding: Option<&Binding>, out: &mut Vec<u32>) {
    match binding {
        Some(Binding::Location { location, .. }) => out.push(*location),
        Some(Binding::BuiltIn(_)) => {}
        None => {
            if let TypeInner::Struct { ref members, .. } = module.types[ty].inner {
                for member in members {
                    if let Some(Binding::Location { location, .. }) = &member.binding {
                        out.push(*location);
                    }
                }
            }
        }
    }
}

/// Compiles both stages, then checks that they link: entry points exist and
/// every fragment input location is written by the vertex stage.
pub fn compile(vertex_source: &str, fragment_source: &str) -> Result<LinkedShaders, ShaderError> {
    let vertex = compile_stage(ShaderStage::Vertex, vertex_source)?;
    let fragment = compile_stage(ShaderStage::Fragment, fragment_source)?;

    let vs = entry_point(&vertex, VERTEX_ENTRY, NagaStage::Vertex)?;
    let fs = entry_point(&fragment, FRAGMENT_ENTRY, NagaStage::Fragment)?;

    let mut outputs = Vec::new();
    if let Some(result) = &vs.function.result {
        collect_locations(&vertex, result.ty, result.binding.as_ref(), &mut outputs);
    }

    let mut inputs = Vec::new();
    for arg in &fs.function.arguments {
        collect_locations(&fragment, arg.ty, arg.binding.as_ref(), &mut inputs);
    }

    let missing: Vec<String> = inputs
        .iter()
        .filter(|loc| !outputs.contains(loc))
        .map(|loc| format!("@location({})", loc))
        .collect();
    if !missing.is_empty() {
        return Err(ShaderError::Link {
            diagnostic: format!(
                "fragment input {} not written by `{}`",
                missing.join(", "),
                VERTEX_ENTRY
            ),
        });
    }

    Ok(LinkedShaders {
        vertex_source: vertex_source.to_owned(),
        fragment_source: fragment_source.to_owned(),
    })
}

/// The linked program on the GPU: pipeline plus the layout of its single bind group.
pub struct ShaderProgram {
    pub pipeline: wgpu::RenderPipeline,
    pub bind_group_layout: wgpu::BindGroupLayout,
}

impl ShaderProgram {
    pub async fn new(
        device: &wgpu::Device,
        linked: &LinkedShaders,
        color_format: wgpu::TextureFormat,
    ) -> Result<Self, ShaderError> {
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let vertex_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("sphere.vert"),
            source: wgpu::ShaderSource::Wgsl(linked.vertex_source().into()),
        });
        let fragment_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("sphere.frag"),
            source: wgpu::ShaderSource::Wgsl(linked.fragment_source().into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            entries: &[
                wgpu::BindGroupLayoutEntry { // projection + model_view
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry { // texture unit 0
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
            label: Some("sphere_bind_group_layout"),
        });

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Sphere Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Sphere Pipeline"),
            layout: Some(&layout),
            vertex: wgpu::VertexState {
                module: &vertex_module,
                entry_point: VERTEX_ENTRY,
                buffers: &[AngleVertex::LAYOUT],
            },
            fragment: Some(wgpu::FragmentState {
                module: &fragment_module,
                entry_point: FRAGMENT_ENTRY,
                targets: &[Some(wgpu::ColorTargetState {
                    format: color_format,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None, // 从球心向外看，两面都要画
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::LessEqual,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState {
                count: 1,
                mask: !0,
                alpha_to_coverage_enabled: false,
            },
            multiview: None,
        });

        if let Some(err) = device.pop_error_scope().await {
            return Err(ShaderError::Link {
                diagnostic: err.to_string(),
            });
        }

        Ok(Self {
            pipeline,
            bind_group_layout,
        })
    }
}
