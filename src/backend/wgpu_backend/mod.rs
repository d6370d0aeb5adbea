//! wgpu backend implementation
//!
//! wgpu has no vertex array objects, so a vertex array is stored as a pipeline
//! key (program plus buffer layout) together with the buffers and base offset
//! it binds. Pipelines are built lazily and shared between vertex arrays whose
//! layouts agree. Uniform slots use dynamic offsets so a single bind group per
//! (buffer, binding size) serves every range of the uniform arena.

use crate::backend::release::ReleaseQueue;
use crate::backend::traits::*;
use crate::backend::types::*;
use std::collections::HashMap;
use std::num::NonZeroU64;
use std::sync::Arc;
use wgpu::util::DeviceExt;

/// Buffered render pass command
#[derive(Clone)]
enum RenderCommand {
    SetProgram(ProgramHandle),
    SetVertexArray(VertexArrayHandle),
    BindUniform { slot: u32, buffer: BufferHandle, offset: u64, size: u64 },
    BindTexture { unit: u32, view: TextureViewHandle },
    SetViewport { x: f32, y: f32, width: f32, height: f32, min_depth: f32, max_depth: f32 },
    DrawIndexed { indices: std::ops::Range<u32>, base_vertex: i32, instances: std::ops::Range<u32> },
}

/// Command with every cached wgpu object it needs already created
enum ResolvedCommand {
    Geometry { pipeline: PipelineKey, vertex_array: u64 },
    Uniform { group: u32, bind_group: (u64, u64), offset: u32 },
    Texture { group: u32, view: u64 },
    SetViewport { x: f32, y: f32, width: f32, height: f32, min_depth: f32, max_depth: f32 },
    DrawIndexed { indices: std::ops::Range<u32>, base_vertex: i32, instances: std::ops::Range<u32> },
}

/// Pending render pass with buffered commands
struct PendingRenderPass {
    descriptor: RenderPassDescriptor,
    commands: Vec<RenderCommand>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PipelineKey {
    program: u64,
    stride: u64,
    /// (location, component count, offset relative to the vertex start)
    attributes: Vec<(u32, u32, u64)>,
}

struct WgpuProgram {
    shader: wgpu::ShaderModule,
    layout: wgpu::PipelineLayout,
    desc: ProgramDescriptor,
}

struct WgpuVertexArray {
    pipeline: PipelineKey,
    vertex_buffer: u64,
    index_buffer: u64,
    base_offset: u64,
    index_format: IndexFormat,
}

/// wgpu backend implementation
pub struct WgpuBackend {
    #[allow(dead_code)]
    instance: wgpu::Instance,
    surface: wgpu::Surface<'static>,
    #[allow(dead_code)]
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
    surface_config: wgpu::SurfaceConfiguration,
    current_texture: Option<wgpu::SurfaceTexture>,
    current_view_id: u64, // ID used to identify the swapchain view handle

    uniform_layout: wgpu::BindGroupLayout,
    texture_layout: wgpu::BindGroupLayout,
    default_sampler: wgpu::Sampler,

    // Resource storage
    buffers: HashMap<u64, wgpu::Buffer>,
    textures: HashMap<u64, wgpu::Texture>,
    texture_views: HashMap<u64, wgpu::TextureView>,
    programs: HashMap<u64, WgpuProgram>,
    vertex_arrays: HashMap<u64, WgpuVertexArray>,

    // Derived objects, keyed by what they were built from
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
    uniform_bind_groups: HashMap<(u64, u64), wgpu::BindGroup>,
    texture_bind_groups: HashMap<u64, wgpu::BindGroup>,

    next_id: u64,
    release_queue: ReleaseQueue,

    // Command encoding
    encoder: Option<wgpu::CommandEncoder>,

    // Pending pass - commands are buffered here and executed on end_render_pass
    pending_render_pass: Option<PendingRenderPass>,
}

impl WgpuBackend {
    fn convert_texture_format(format: TextureFormat) -> wgpu::TextureFormat {
        match format {
            TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
            TextureFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
            TextureFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
            TextureFormat::Bgra8UnormSrgb => wgpu::TextureFormat::Bgra8UnormSrgb,
            TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
            TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
        }
    }

    fn convert_texture_format_back(format: wgpu::TextureFormat) -> TextureFormat {
        match format {
            wgpu::TextureFormat::Rgba8Unorm => TextureFormat::Rgba8Unorm,
            wgpu::TextureFormat::Rgba8UnormSrgb => TextureFormat::Rgba8UnormSrgb,
            wgpu::TextureFormat::Bgra8Unorm => TextureFormat::Bgra8Unorm,
            wgpu::TextureFormat::Bgra8UnormSrgb => TextureFormat::Bgra8UnormSrgb,
            wgpu::TextureFormat::Rgba16Float => TextureFormat::Rgba16Float,
            wgpu::TextureFormat::Depth32Float => TextureFormat::Depth32Float,
            _ => TextureFormat::Rgba8Unorm,
        }
    }

    fn convert_buffer_usage(usage: BufferUsage) -> wgpu::BufferUsages {
        let mut result = wgpu::BufferUsages::empty();
        if usage.contains(BufferUsage::COPY_SRC) {
            result |= wgpu::BufferUsages::COPY_SRC;
        }
        if usage.contains(BufferUsage::COPY_DST) {
            result |= wgpu::BufferUsages::COPY_DST;
        }
        if usage.contains(BufferUsage::INDEX) {
            result |= wgpu::BufferUsages::INDEX;
        }
        if usage.contains(BufferUsage::VERTEX) {
            result |= wgpu::BufferUsages::VERTEX;
        }
        if usage.contains(BufferUsage::UNIFORM) {
            result |= wgpu::BufferUsages::UNIFORM;
        }
        result
    }

    fn convert_texture_usage(usage: TextureUsage) -> wgpu::TextureUsages {
        let mut result = wgpu::TextureUsages::empty();
        if usage.contains(TextureUsage::COPY_SRC) {
            result |= wgpu::TextureUsages::COPY_SRC;
        }
        if usage.contains(TextureUsage::COPY_DST) {
            result |= wgpu::TextureUsages::COPY_DST;
        }
        if usage.contains(TextureUsage::TEXTURE_BINDING) {
            result |= wgpu::TextureUsages::TEXTURE_BINDING;
        }
        if usage.contains(TextureUsage::RENDER_ATTACHMENT) {
            result |= wgpu::TextureUsages::RENDER_ATTACHMENT;
        }
        result
    }

    fn convert_vertex_format(component_count: u32) -> Option<wgpu::VertexFormat> {
        match component_count {
            1 => Some(wgpu::VertexFormat::Float32),
            2 => Some(wgpu::VertexFormat::Float32x2),
            3 => Some(wgpu::VertexFormat::Float32x3),
            4 => Some(wgpu::VertexFormat::Float32x4),
            _ => None,
        }
    }

    fn convert_compare_function(func: CompareFunction) -> wgpu::CompareFunction {
        match func {
            CompareFunction::Never => wgpu::CompareFunction::Never,
            CompareFunction::Less => wgpu::CompareFunction::Less,
            CompareFunction::Equal => wgpu::CompareFunction::Equal,
            CompareFunction::LessEqual => wgpu::CompareFunction::LessEqual,
            CompareFunction::Greater => wgpu::CompareFunction::Greater,
            CompareFunction::NotEqual => wgpu::CompareFunction::NotEqual,
            CompareFunction::GreaterEqual => wgpu::CompareFunction::GreaterEqual,
            CompareFunction::Always => wgpu::CompareFunction::Always,
        }
    }

    fn convert_blend_factor(factor: BlendFactor) -> wgpu::BlendFactor {
        match factor {
            BlendFactor::Zero => wgpu::BlendFactor::Zero,
            BlendFactor::One => wgpu::BlendFactor::One,
            BlendFactor::Src => wgpu::BlendFactor::Src,
            BlendFactor::OneMinusSrc => wgpu::BlendFactor::OneMinusSrc,
            BlendFactor::SrcAlpha => wgpu::BlendFactor::SrcAlpha,
            BlendFactor::OneMinusSrcAlpha => wgpu::BlendFactor::OneMinusSrcAlpha,
            BlendFactor::Dst => wgpu::BlendFactor::Dst,
            BlendFactor::OneMinusDst => wgpu::BlendFactor::OneMinusDst,
            BlendFactor::DstAlpha => wgpu::BlendFactor::DstAlpha,
            BlendFactor::OneMinusDstAlpha => wgpu::BlendFactor::OneMinusDstAlpha,
        }
    }

    fn convert_blend_operation(op: BlendOperation) -> wgpu::BlendOperation {
        match op {
            BlendOperation::Add => wgpu::BlendOperation::Add,
            BlendOperation::Subtract => wgpu::BlendOperation::Subtract,
            BlendOperation::ReverseSubtract => wgpu::BlendOperation::ReverseSubtract,
            BlendOperation::Min => wgpu::BlendOperation::Min,
            BlendOperation::Max => wgpu::BlendOperation::Max,
        }
    }

    fn convert_blend_component(component: BlendComponent) -> wgpu::BlendComponent {
        wgpu::BlendComponent {
            src_factor: Self::convert_blend_factor(component.src_factor),
            dst_factor: Self::convert_blend_factor(component.dst_factor),
            operation: Self::convert_blend_operation(component.operation),
        }
    }

    fn convert_load_op<V>(op: &LoadOp, clear: impl FnOnce(&[f32; 4]) -> V) -> wgpu::LoadOp<V> {
        match op {
            LoadOp::Clear(color) => wgpu::LoadOp::Clear(clear(color)),
            LoadOp::Load => wgpu::LoadOp::Load,
        }
    }

    fn convert_store_op(op: StoreOp) -> wgpu::StoreOp {
        match op {
            StoreOp::Store => wgpu::StoreOp::Store,
            StoreOp::Discard => wgpu::StoreOp::Discard,
        }
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn clamp_to_device(&self, width: u32, height: u32) -> (u32, u32) {
        // Clamp to device limits while maintaining aspect ratio
        let max_size = self.device.limits().max_texture_dimension_2d;
        if width > max_size || height > max_size {
            let scale = (max_size as f32 / width as f32).min(max_size as f32 / height as f32);
            let new_width = ((width as f32 * scale) as u32).max(1);
            let new_height = ((height as f32 * scale) as u32).max(1);
            (new_width, new_height)
        } else {
            (width.max(1), height.max(1))
        }
    }
}

impl WgpuBackend {
    /// Create the backend for a window, blocking on adapter and device requests
    pub fn new(window: Arc<winit::window::Window>, vsync: bool) -> BackendResult<Self> {
        pollster::block_on(Self::new_async(window, vsync))
    }

    pub async fn new_async(window: Arc<winit::window::Window>, vsync: bool) -> BackendResult<Self> {
        let (instance, surface, adapter, device, queue) = Self::init_native(window.clone()).await?;

        device.on_uncaptured_error(Box::new(|error: wgpu::Error| {
            log::error!("wgpu error: {}", error);
        }));

        let size = window.inner_size();
        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .or_else(|| surface_caps.formats.first().copied())
            .ok_or_else(|| {
                BackendError::SurfaceCreationFailed("Surface reports no formats".into())
            })?;

        let present_mode = if vsync {
            wgpu::PresentMode::AutoVsync
        } else {
            wgpu::PresentMode::AutoNoVsync
        };

        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Uniform Range Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Texture Unit Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let default_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Default Sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            address_mode_w: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let mut surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode,
            alpha_mode: surface_caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };

        let max_size = device.limits().max_texture_dimension_2d;
        if surface_config.width > max_size || surface_config.height > max_size {
            let scale = (max_size as f32 / surface_config.width as f32)
                .min(max_size as f32 / surface_config.height as f32);
            surface_config.width = ((surface_config.width as f32 * scale) as u32).max(1);
            surface_config.height = ((surface_config.height as f32 * scale) as u32).max(1);
        }

        surface.configure(&device, &surface_config);

        Ok(Self {
            instance,
            surface,
            adapter,
            device,
            queue,
            surface_config,
            current_texture: None,
            current_view_id: 0,
            uniform_layout,
            texture_layout,
            default_sampler,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            texture_views: HashMap::new(),
            programs: HashMap::new(),
            vertex_arrays: HashMap::new(),
            pipelines: HashMap::new(),
            uniform_bind_groups: HashMap::new(),
            texture_bind_groups: HashMap::new(),
            next_id: 1,
            release_queue: ReleaseQueue::new(),
            encoder: None,
            pending_render_pass: None,
        })
    }

    /// Native initialization
    async fn init_native(
        window: Arc<winit::window::Window>,
    ) -> BackendResult<(
        wgpu::Instance,
        wgpu::Surface<'static>,
        wgpu::Adapter,
        wgpu::Device,
        wgpu::Queue,
    )> {
        // On Windows, try Vulkan first to avoid D3D12 debug layer validation errors
        let backends = if std::env::var("WGPU_BACKEND").is_ok() {
            wgpu::Backends::all()
        } else {
            #[cfg(target_os = "windows")]
            {
                wgpu::Backends::VULKAN
            }
            #[cfg(not(target_os = "windows"))]
            {
                wgpu::Backends::all()
            }
        };

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });

        let surface = instance
            .create_surface(window.clone())
            .map_err(|e| BackendError::SurfaceCreationFailed(e.to_string()))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await;

        // If no adapter found with preferred backend, try with all backends
        let (instance, surface, adapter) = if adapter.is_none() && backends != wgpu::Backends::all() {
            log::warn!("Preferred backend not available, falling back to all backends");
            let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
                backends: wgpu::Backends::all(),
                ..Default::default()
            });
            let surface = instance
                .create_surface(window.clone())
                .map_err(|e| BackendError::SurfaceCreationFailed(e.to_string()))?;
            let adapter = instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::HighPerformance,
                    compatible_surface: Some(&surface),
                    force_fallback_adapter: false,
                })
                .await
                .ok_or_else(|| {
                    BackendError::InitializationFailed("No suitable adapter found".into())
                })?;
            (instance, surface, adapter)
        } else {
            let adapter = adapter.ok_or_else(|| {
                BackendError::InitializationFailed("No suitable adapter found".into())
            })?;
            (instance, surface, adapter)
        };

        let adapter_info = adapter.get_info();
        log::info!(
            "Selected GPU: {} ({:?} backend)",
            adapter_info.name,
            adapter_info.backend
        );

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Arena Renderer Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                },
                None,
            )
            .await
            .map_err(|e| BackendError::DeviceCreationFailed(e.to_string()))?;

        Ok((instance, surface, adapter, device, queue))
    }

    fn build_pipeline(&self, key: &PipelineKey) -> BackendResult<wgpu::RenderPipeline> {
        let program = self.programs.get(&key.program).ok_or_else(|| {
            BackendError::VertexArrayCreationFailed(format!("Program {} not found", key.program))
        })?;

        let attributes = key
            .attributes
            .iter()
            .map(|&(location, components, offset)| {
                let format = Self::convert_vertex_format(components).ok_or_else(|| {
                    BackendError::VertexArrayCreationFailed(format!(
                        "Unsupported component count {} at location {}",
                        components, location
                    ))
                })?;
                Ok(wgpu::VertexAttribute {
                    format,
                    offset,
                    shader_location: location,
                })
            })
            .collect::<BackendResult<Vec<_>>>()?;

        let vertex_buffers = [wgpu::VertexBufferLayout {
            array_stride: key.stride,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &attributes,
        }];

        let desc = &program.desc;
        let color_targets = [Some(wgpu::ColorTargetState {
            format: Self::convert_texture_format(desc.color_target.format),
            blend: desc.color_target.blend.map(|b| wgpu::BlendState {
                color: Self::convert_blend_component(b.color),
                alpha: Self::convert_blend_component(b.alpha),
            }),
            write_mask: wgpu::ColorWrites::ALL,
        })];

        let primitive = wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: match desc.cull_mode {
                CullMode::None => None,
                CullMode::Front => Some(wgpu::Face::Front),
                CullMode::Back => Some(wgpu::Face::Back),
            },
            ..Default::default()
        };

        let depth_stencil = desc.depth_stencil.as_ref().map(|ds| wgpu::DepthStencilState {
            format: Self::convert_texture_format(ds.format),
            depth_write_enabled: ds.depth_write_enabled,
            depth_compare: Self::convert_compare_function(ds.depth_compare),
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        });

        log::debug!(
            "Building pipeline for program {:?} (stride {}, {} attributes)",
            desc.label,
            key.stride,
            attributes.len()
        );

        Ok(self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: desc.label.as_deref(),
                layout: Some(&program.layout),
                vertex: wgpu::VertexState {
                    module: &program.shader,
                    entry_point: &desc.vertex_entry,
                    buffers: &vertex_buffers,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &program.shader,
                    entry_point: &desc.fragment_entry,
                    targets: &color_targets,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                primitive,
                depth_stencil,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
            }))
    }

    /// Create every pipeline and bind group the pass needs before it borrows them
    fn resolve_commands(&mut self, commands: &[RenderCommand]) -> Vec<ResolvedCommand> {
        let mut resolved = Vec::with_capacity(commands.len());
        let mut current_program: Option<u64> = None;

        for cmd in commands {
            match cmd {
                RenderCommand::SetProgram(handle) => {
                    current_program = Some(handle.0);
                }
                RenderCommand::SetVertexArray(handle) => {
                    let Some(vertex_array) = self.vertex_arrays.get(&handle.0) else {
                        log::warn!("Vertex array {:?} not found, skipping bind", handle);
                        continue;
                    };
                    if current_program != Some(vertex_array.pipeline.program) {
                        log::warn!(
                            "Vertex array {:?} was built for program {}, not the selected one",
                            handle,
                            vertex_array.pipeline.program
                        );
                    }
                    let key = vertex_array.pipeline.clone();
                    if !self.pipelines.contains_key(&key) {
                        match self.build_pipeline(&key) {
                            Ok(pipeline) => {
                                self.pipelines.insert(key.clone(), pipeline);
                            }
                            Err(e) => {
                                log::error!("Failed to build pipeline: {}", e);
                                continue;
                            }
                        }
                    }
                    resolved.push(ResolvedCommand::Geometry {
                        pipeline: key,
                        vertex_array: handle.0,
                    });
                }
                RenderCommand::BindUniform {
                    slot,
                    buffer,
                    offset,
                    size,
                } => {
                    let Some(buf) = self.buffers.get(&buffer.0) else {
                        log::warn!("Uniform buffer {:?} not found", buffer);
                        continue;
                    };
                    // The binding must cover the shader's declared block size
                    let min_size = current_program
                        .and_then(|p| self.programs.get(&p))
                        .and_then(|p| p.desc.uniform_blocks.get(*slot as usize))
                        .copied()
                        .unwrap_or(0);
                    let available = buf.size().saturating_sub(*offset);
                    let binding_size = (*size).max(min_size).min(available);
                    let Some(nonzero) = NonZeroU64::new(binding_size) else {
                        log::warn!("Empty uniform range at offset {}", offset);
                        continue;
                    };

                    let key = (buffer.0, binding_size);
                    let device = &self.device;
                    let layout = &self.uniform_layout;
                    self.uniform_bind_groups.entry(key).or_insert_with(|| {
                        device.create_bind_group(&wgpu::BindGroupDescriptor {
                            label: Some("Uniform Range"),
                            layout,
                            entries: &[wgpu::BindGroupEntry {
                                binding: 0,
                                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                                    buffer: buf,
                                    offset: 0,
                                    size: Some(nonzero),
                                }),
                            }],
                        })
                    });
                    resolved.push(ResolvedCommand::Uniform {
                        group: *slot,
                        bind_group: key,
                        offset: *offset as u32,
                    });
                }
                RenderCommand::BindTexture { unit, view } => {
                    let uniform_groups = current_program
                        .and_then(|p| self.programs.get(&p))
                        .map(|p| p.desc.uniform_blocks.len() as u32)
                        .unwrap_or(0);
                    let Some(texture_view) = self.texture_views.get(&view.0) else {
                        log::warn!("Texture view {:?} not found", view);
                        continue;
                    };
                    let device = &self.device;
                    let layout = &self.texture_layout;
                    let sampler = &self.default_sampler;
                    self.texture_bind_groups.entry(view.0).or_insert_with(|| {
                        device.create_bind_group(&wgpu::BindGroupDescriptor {
                            label: Some("Texture Unit"),
                            layout,
                            entries: &[
                                wgpu::BindGroupEntry {
                                    binding: 0,
                                    resource: wgpu::BindingResource::TextureView(texture_view),
                                },
                                wgpu::BindGroupEntry {
                                    binding: 1,
                                    resource: wgpu::BindingResource::Sampler(sampler),
                                },
                            ],
                        })
                    });
                    resolved.push(ResolvedCommand::Texture {
                        group: uniform_groups + unit,
                        view: view.0,
                    });
                }
                RenderCommand::SetViewport {
                    x,
                    y,
                    width,
                    height,
                    min_depth,
                    max_depth,
                } => resolved.push(ResolvedCommand::SetViewport {
                    x: *x,
                    y: *y,
                    width: *width,
                    height: *height,
                    min_depth: *min_depth,
                    max_depth: *max_depth,
                }),
                RenderCommand::DrawIndexed {
                    indices,
                    base_vertex,
                    instances,
                } => resolved.push(ResolvedCommand::DrawIndexed {
                    indices: indices.clone(),
                    base_vertex: *base_vertex,
                    instances: instances.clone(),
                }),
            }
        }

        resolved
    }

    fn record(&mut self, command: RenderCommand) {
        if let Some(ref mut pending) = self.pending_render_pass {
            pending.commands.push(command);
        } else {
            log::warn!("Render command issued outside a render pass");
        }
    }
}

impl GraphicsBackend for WgpuBackend {
    fn limits(&self) -> DeviceLimits {
        let limits = self.device.limits();
        DeviceLimits {
            max_uniform_block_size: limits.max_uniform_buffer_binding_size as u64,
            uniform_offset_alignment: limits.min_uniform_buffer_offset_alignment as u64,
            max_texture_dimension: limits.max_texture_dimension_2d,
        }
    }

    fn release_queue(&self) -> ReleaseQueue {
        self.release_queue.clone()
    }

    fn collect_garbage(&mut self) {
        let queue = self.release_queue.clone();
        queue.destroy_pending(self);
    }

    fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            let (clamped_width, clamped_height) = self.clamp_to_device(width, height);
            self.surface_config.width = clamped_width;
            self.surface_config.height = clamped_height;
            self.surface.configure(&self.device, &self.surface_config);
        }
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.surface_config.width, self.surface_config.height)
    }

    fn begin_frame(&mut self) -> BackendResult<FrameContext> {
        let output = self
            .surface
            .get_current_texture()
            .map_err(|e| match e {
                wgpu::SurfaceError::Lost => BackendError::SurfaceLost,
                wgpu::SurfaceError::OutOfMemory => BackendError::OutOfMemory,
                _ => BackendError::AcquireImageFailed(e.to_string()),
            })?;

        // The swapchain view gets a fresh id; the view itself is created when a pass uses it
        let view_id = self.next_id();
        self.current_view_id = view_id;

        let width = self.surface_config.width;
        let height = self.surface_config.height;

        self.current_texture = Some(output);
        self.encoder = Some(
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Frame Encoder"),
                }),
        );

        Ok(FrameContext {
            swapchain_view: TextureViewHandle(view_id),
            width,
            height,
        })
    }

    fn end_frame(&mut self) -> BackendResult<()> {
        // Submit any pending commands
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(std::iter::once(encoder.finish()));
        }

        // Present the swapchain
        if let Some(texture) = self.current_texture.take() {
            texture.present();
        }

        Ok(())
    }

    fn swapchain_format(&self) -> TextureFormat {
        Self::convert_texture_format_back(self.surface_config.format)
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        if desc.size == 0 {
            return Err(BackendError::BufferCreationFailed(format!(
                "{:?} has zero size",
                desc.label
            )));
        }
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: desc.label.as_deref(),
            size: desc.size,
            usage: Self::convert_buffer_usage(desc.usage),
            mapped_at_creation: false,
        });

        let id = self.next_id();
        self.buffers.insert(id, buffer);
        log::debug!("Created buffer {:?} ({} bytes)", desc.label, desc.size);

        Ok(BufferHandle(id))
    }

    fn create_buffer_init(
        &mut self,
        desc: &BufferDescriptor,
        data: &[u8],
    ) -> BackendResult<BufferHandle> {
        if data.is_empty() {
            return Err(BackendError::BufferCreationFailed(format!(
                "{:?} has no contents",
                desc.label
            )));
        }
        let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: desc.label.as_deref(),
            contents: data,
            usage: Self::convert_buffer_usage(desc.usage),
        });

        let id = self.next_id();
        self.buffers.insert(id, buffer);
        log::debug!("Created buffer {:?} ({} bytes)", desc.label, data.len());

        Ok(BufferHandle(id))
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        if let Some(buf) = self.buffers.get(&buffer.0) {
            self.queue.write_buffer(buf, offset, data);
        }
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        let max = self.device.limits().max_texture_dimension_2d;
        if desc.width == 0 || desc.height == 0 || desc.width > max || desc.height > max {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?}: {}x{} outside 1..={}",
                desc.label, desc.width, desc.height, max
            )));
        }

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: desc.label.as_deref(),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: Self::convert_texture_format(desc.format),
            usage: Self::convert_texture_usage(desc.usage),
            view_formats: &[],
        });

        let id = self.next_id();
        self.textures.insert(id, texture);
        log::debug!("Created texture {:?} ({}x{})", desc.label, desc.width, desc.height);

        Ok(TextureHandle(id))
    }

    fn create_texture_view(&mut self, texture: TextureHandle) -> BackendResult<TextureViewHandle> {
        let tex = self
            .textures
            .get(&texture.0)
            .ok_or_else(|| BackendError::TextureCreationFailed("Texture not found".into()))?;

        let view = tex.create_view(&wgpu::TextureViewDescriptor::default());

        let id = self.next_id();
        self.texture_views.insert(id, view);

        Ok(TextureViewHandle(id))
    }

    fn write_texture(&mut self, texture: TextureHandle, data: &[u8], width: u32, height: u32) {
        if let Some(tex) = self.textures.get(&texture.0) {
            self.queue.write_texture(
                wgpu::ImageCopyTexture {
                    texture: tex,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                data,
                wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(width * 4),
                    rows_per_image: Some(height),
                },
                wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
            );
        }
    }

    fn create_program(&mut self, desc: &ProgramDescriptor) -> BackendResult<ProgramHandle> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let shader = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: desc.label.as_deref(),
                source: wgpu::ShaderSource::Wgsl(desc.source.as_str().into()),
            });
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(BackendError::ProgramCreationFailed(error.to_string()));
        }

        let mut layouts: Vec<&wgpu::BindGroupLayout> = Vec::new();
        layouts.extend(std::iter::repeat(&self.uniform_layout).take(desc.uniform_blocks.len()));
        layouts.extend(std::iter::repeat(&self.texture_layout).take(desc.texture_units as usize));

        let layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: desc.label.as_deref(),
                bind_group_layouts: &layouts,
                push_constant_ranges: &[],
            });

        let id = self.next_id();
        self.programs.insert(
            id,
            WgpuProgram {
                shader,
                layout,
                desc: desc.clone(),
            },
        );
        log::debug!(
            "Created program {:?} ({} uniform slots, {} texture units)",
            desc.label,
            desc.uniform_blocks.len(),
            desc.texture_units
        );

        Ok(ProgramHandle(id))
    }

    fn create_vertex_array(
        &mut self,
        desc: &VertexArrayDescriptor,
    ) -> BackendResult<VertexArrayHandle> {
        if !self.programs.contains_key(&desc.program.0) {
            return Err(BackendError::VertexArrayCreationFailed(format!(
                "{:?}: program not found",
                desc.label
            )));
        }
        for buffer in [desc.vertex_buffer, desc.index_buffer] {
            if !self.buffers.contains_key(&buffer.0) {
                return Err(BackendError::VertexArrayCreationFailed(format!(
                    "{:?}: buffer {:?} not found",
                    desc.label, buffer
                )));
            }
        }

        let mut attributes = Vec::with_capacity(desc.attributes.len());
        for attr in &desc.attributes {
            let offset = attr.pointer.checked_sub(desc.base_offset).ok_or_else(|| {
                BackendError::VertexArrayCreationFailed(format!(
                    "{:?}: attribute {} points before the base offset",
                    desc.label, attr.index
                ))
            })?;
            if Self::convert_vertex_format(attr.component_count).is_none() {
                return Err(BackendError::VertexArrayCreationFailed(format!(
                    "{:?}: attribute {} has {} components",
                    desc.label, attr.index, attr.component_count
                )));
            }
            attributes.push((attr.index, attr.component_count, offset));
        }

        let id = self.next_id();
        self.vertex_arrays.insert(
            id,
            WgpuVertexArray {
                pipeline: PipelineKey {
                    program: desc.program.0,
                    stride: desc.stride,
                    attributes,
                },
                vertex_buffer: desc.vertex_buffer.0,
                index_buffer: desc.index_buffer.0,
                base_offset: desc.base_offset,
                index_format: desc.index_format,
            },
        );
        log::debug!("Created vertex array {:?}", desc.label);

        Ok(VertexArrayHandle(id))
    }

    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor) {
        // Store the descriptor for later execution
        self.pending_render_pass = Some(PendingRenderPass {
            descriptor: desc.clone(),
            commands: Vec::new(),
        });
    }

    fn end_render_pass(&mut self) {
        let Some(pending) = self.pending_render_pass.take() else {
            return;
        };

        let Some(mut encoder) = self.encoder.take() else {
            return;
        };

        let resolved = self.resolve_commands(&pending.commands);

        let swapchain_view: Option<wgpu::TextureView> = self.current_texture.as_ref().map(|tex| {
            tex.texture.create_view(&wgpu::TextureViewDescriptor::default())
        });
        let current_view_id = self.current_view_id;

        {
            let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = pending
                .descriptor
                .color_attachments
                .iter()
                .filter_map(|att| {
                    let view = if att.view.0 == current_view_id {
                        swapchain_view.as_ref()?
                    } else {
                        self.texture_views.get(&att.view.0)?
                    };
                    Some(Some(wgpu::RenderPassColorAttachment {
                        view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: Self::convert_load_op(&att.load_op, |c| wgpu::Color {
                                r: c[0] as f64,
                                g: c[1] as f64,
                                b: c[2] as f64,
                                a: c[3] as f64,
                            }),
                            store: Self::convert_store_op(att.store_op),
                        },
                    }))
                })
                .collect();

            let depth_attachment = pending
                .descriptor
                .depth_stencil_attachment
                .as_ref()
                .and_then(|att| {
                    let view = self.texture_views.get(&att.view.0)?;
                    Some(wgpu::RenderPassDepthStencilAttachment {
                        view,
                        depth_ops: Some(wgpu::Operations {
                            load: Self::convert_load_op(&att.depth_load_op, |_| {
                                att.depth_clear_value
                            }),
                            store: Self::convert_store_op(att.depth_store_op),
                        }),
                        stencil_ops: None,
                    })
                });

            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: pending.descriptor.label.as_deref(),
                color_attachments: &color_attachments,
                depth_stencil_attachment: depth_attachment,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            for cmd in &resolved {
                match cmd {
                    ResolvedCommand::Geometry {
                        pipeline,
                        vertex_array,
                    } => {
                        let (Some(pipeline), Some(vao)) = (
                            self.pipelines.get(pipeline),
                            self.vertex_arrays.get(vertex_array),
                        ) else {
                            continue;
                        };
                        let (Some(vertex_buffer), Some(index_buffer)) = (
                            self.buffers.get(&vao.vertex_buffer),
                            self.buffers.get(&vao.index_buffer),
                        ) else {
                            continue;
                        };
                        render_pass.set_pipeline(pipeline);
                        render_pass.set_vertex_buffer(0, vertex_buffer.slice(vao.base_offset..));
                        let format = match vao.index_format {
                            IndexFormat::Uint16 => wgpu::IndexFormat::Uint16,
                            IndexFormat::Uint32 => wgpu::IndexFormat::Uint32,
                        };
                        render_pass.set_index_buffer(index_buffer.slice(..), format);
                    }
                    ResolvedCommand::Uniform {
                        group,
                        bind_group,
                        offset,
                    } => {
                        if let Some(bg) = self.uniform_bind_groups.get(bind_group) {
                            render_pass.set_bind_group(*group, bg, &[*offset]);
                        }
                    }
                    ResolvedCommand::Texture { group, view } => {
                        if let Some(bg) = self.texture_bind_groups.get(view) {
                            render_pass.set_bind_group(*group, bg, &[]);
                        }
                    }
                    ResolvedCommand::SetViewport {
                        x,
                        y,
                        width,
                        height,
                        min_depth,
                        max_depth,
                    } => {
                        render_pass.set_viewport(*x, *y, *width, *height, *min_depth, *max_depth);
                    }
                    ResolvedCommand::DrawIndexed {
                        indices,
                        base_vertex,
                        instances,
                    } => {
                        render_pass.draw_indexed(indices.clone(), *base_vertex, instances.clone());
                    }
                }
            }
            // render_pass is dropped here, ending the pass
        }

        self.encoder = Some(encoder);
    }

    fn set_program(&mut self, program: ProgramHandle) {
        self.record(RenderCommand::SetProgram(program));
    }

    fn set_vertex_array(&mut self, vertex_array: VertexArrayHandle) {
        self.record(RenderCommand::SetVertexArray(vertex_array));
    }

    fn bind_uniform_range(&mut self, slot: u32, buffer: BufferHandle, offset: u64, size: u64) {
        self.record(RenderCommand::BindUniform {
            slot,
            buffer,
            offset,
            size,
        });
    }

    fn bind_texture(&mut self, unit: u32, view: TextureViewHandle) {
        self.record(RenderCommand::BindTexture { unit, view });
    }

    fn set_viewport(&mut self, x: f32, y: f32, width: f32, height: f32, min_depth: f32, max_depth: f32) {
        self.record(RenderCommand::SetViewport {
            x,
            y,
            width,
            height,
            min_depth,
            max_depth,
        });
    }

    fn draw_indexed(
        &mut self,
        indices: std::ops::Range<u32>,
        base_vertex: i32,
        instances: std::ops::Range<u32>,
    ) {
        self.record(RenderCommand::DrawIndexed {
            indices,
            base_vertex,
            instances,
        });
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer.0);
        self.uniform_bind_groups.retain(|(id, _), _| *id != buffer.0);
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(&texture.0);
    }

    fn destroy_texture_view(&mut self, view: TextureViewHandle) {
        self.texture_views.remove(&view.0);
        self.texture_bind_groups.remove(&view.0);
    }

    fn destroy_program(&mut self, program: ProgramHandle) {
        self.programs.remove(&program.0);
        self.pipelines.retain(|key, _| key.program != program.0);
    }

    fn destroy_vertex_array(&mut self, vertex_array: VertexArrayHandle) {
        self.vertex_arrays.remove(&vertex_array.0);
    }
}
