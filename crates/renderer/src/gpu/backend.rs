use std::borrow::Cow;
use std::mem::size_of;
use std::sync::Arc;

use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use wgpu::util::DeviceExt;

use super::{GpuBackend, GpuContext, StorageBindings};
use crate::compile::WrappedStage;
use crate::error::{FrameError, ResourceError};
use crate::pool::QuadMesh;
use crate::types::{DispatchGrid, Viewport};
use crate::uniforms::VolumeParams;

const CLEAR_COLOR: wgpu::Color = wgpu::Color::BLACK;
const QUAD_ATTRIBUTES: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![0 => Float32x2];

/// Bind group layouts shared by every program of one kind.
///
/// Group 0 holds the two storage volumes, group 1 the program's uniform block.
struct ProgramLayouts {
    storage: wgpu::BindGroupLayout,
    params: wgpu::BindGroupLayout,
    pipeline: wgpu::PipelineLayout,
}

impl ProgramLayouts {
    fn new(device: &wgpu::Device, label: &str, compute: bool) -> Self {
        let (storage_visibility, read_only, params_visibility) = if compute {
            (wgpu::ShaderStages::COMPUTE, false, wgpu::ShaderStages::COMPUTE)
        } else {
            (
                wgpu::ShaderStages::FRAGMENT,
                true,
                wgpu::ShaderStages::VERTEX_FRAGMENT,
            )
        };
        let storage_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: storage_visibility,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let storage = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(&format!("{label} storage layout")),
            entries: &[storage_entry(0), storage_entry(1)],
        });
        let params = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(&format!("{label} params layout")),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: params_visibility,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: wgpu::BufferSize::new(size_of::<VolumeParams>() as u64),
                },
                count: None,
            }],
        });
        let pipeline = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(&format!("{label} pipeline layout")),
            bind_group_layouts: &[&storage, &params],
            push_constant_ranges: &[],
        });

        Self {
            storage,
            params,
            pipeline,
        }
    }
}

enum ProgramPipeline {
    Compute(wgpu::ComputePipeline),
    Raster(wgpu::RenderPipeline),
}

pub struct WgpuProgram {
    pipeline: ProgramPipeline,
    uniform_buffer: wgpu::Buffer,
    params_group: wgpu::BindGroup,
    storage_group: wgpu::BindGroup,
}

pub struct WgpuGeometry {
    vertices: wgpu::Buffer,
    indices: wgpu::Buffer,
    index_count: u32,
}

pub struct WgpuFrame {
    surface_texture: wgpu::SurfaceTexture,
    view: wgpu::TextureView,
    encoder: wgpu::CommandEncoder,
    drawn: bool,
}

/// [`GpuBackend`] drawing into a window surface.
pub struct WgpuBackend {
    ctx: GpuContext,
    compute_layouts: ProgramLayouts,
    raster_layouts: ProgramLayouts,
}

impl WgpuBackend {
    pub fn new<T>(target: &T, viewport: Viewport) -> Result<Self>
    where
        T: HasDisplayHandle + HasWindowHandle,
    {
        let ctx = GpuContext::new(target, viewport)?;
        let compute_layouts = ProgramLayouts::new(&ctx.device, "compute", true);
        let raster_layouts = ProgramLayouts::new(&ctx.device, "raster", false);
        Ok(Self {
            ctx,
            compute_layouts,
            raster_layouts,
        })
    }

    /// Reconfigures the surface after `Lost`/`Outdated`.
    pub fn recover_surface(&mut self) {
        self.ctx.reconfigure();
    }

    fn create_module(&self, stage: &WrappedStage) -> wgpu::ShaderModule {
        self.ctx
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(stage.role.file_name()),
                source: wgpu::ShaderSource::Glsl {
                    shader: Cow::Borrowed(stage.source.as_str()),
                    stage: stage.stage,
                    defines: &[],
                },
            })
    }

    fn program_resources(
        &self,
        label: &str,
        layouts: &ProgramLayouts,
        bindings: &StorageBindings<Arc<wgpu::Buffer>>,
    ) -> (wgpu::Buffer, wgpu::BindGroup, wgpu::BindGroup) {
        let device = &self.ctx.device;
        let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{label} params")),
            contents: bytemuck::bytes_of(&VolumeParams::default()),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let params_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("{label} params group")),
            layout: &layouts.params,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });
        let storage_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("{label} storage group")),
            layout: &layouts.storage,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: bindings.noise.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: bindings.density.as_entire_binding(),
                },
            ],
        });
        (uniform_buffer, params_group, storage_group)
    }

    /// Runs `build` inside a validation error scope so shader and pipeline
    /// errors come back as text instead of reaching the uncaptured handler.
    fn scoped<R>(&self, build: impl FnOnce() -> R) -> Result<R, String> {
        self.ctx
            .device
            .push_error_scope(wgpu::ErrorFilter::Validation);
        let value = build();
        match pollster::block_on(self.ctx.device.pop_error_scope()) {
            Some(err) => Err(err.to_string()),
            None => Ok(value),
        }
    }

    fn clear_pass(frame: &mut WgpuFrame) {
        let _pass = frame
            .encoder
            .begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("clear pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &frame.view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(CLEAR_COLOR),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
    }
}

fn record_dispatch(
    encoder: &mut wgpu::CommandEncoder,
    program: &WgpuProgram,
    grid: DispatchGrid,
) {
    let ProgramPipeline::Compute(pipeline) = &program.pipeline else {
        tracing::warn!("ignoring dispatch of a raster program");
        return;
    };
    let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
        label: Some("volume compute pass"),
        timestamp_writes: None,
    });
    pass.set_pipeline(pipeline);
    pass.set_bind_group(0, &program.storage_group, &[]);
    pass.set_bind_group(1, &program.params_group, &[]);
    pass.dispatch_workgroups(grid.x, grid.y, grid.z);
}

impl GpuBackend for WgpuBackend {
    type Buffer = Arc<wgpu::Buffer>;
    type Geometry = WgpuGeometry;
    type Program = WgpuProgram;
    type Frame = WgpuFrame;

    fn create_storage_buffer(
        &mut self,
        label: &str,
        size: u64,
    ) -> Result<Self::Buffer, ResourceError> {
        let limits = self.ctx.device.limits();
        let max = u64::from(limits.max_storage_buffer_binding_size).min(limits.max_buffer_size);
        if size == 0 || size > max {
            return Err(ResourceError::Allocation {
                label: label.to_string(),
                size,
                reason: format!("size must be between 1 and {max} bytes on this device"),
            });
        }

        self.ctx
            .device
            .push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let buffer = self.ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        if let Some(err) = pollster::block_on(self.ctx.device.pop_error_scope()) {
            return Err(ResourceError::Allocation {
                label: label.to_string(),
                size,
                reason: err.to_string(),
            });
        }
        Ok(Arc::new(buffer))
    }

    fn create_geometry(&mut self, mesh: &QuadMesh) -> Self::Geometry {
        let device = &self.ctx.device;
        let vertices = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("quad vertices"),
            contents: bytemuck::cast_slice(&mesh.vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let indices = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("quad indices"),
            contents: bytemuck::cast_slice(&mesh.indices),
            usage: wgpu::BufferUsages::INDEX,
        });
        WgpuGeometry {
            vertices,
            indices,
            index_count: mesh.indices.len() as u32,
        }
    }

    fn create_compute_program(
        &mut self,
        stage: &WrappedStage,
        bindings: &StorageBindings<Self::Buffer>,
    ) -> Result<Self::Program, String> {
        let label = stage.role.file_name();
        let pipeline = self.scoped(|| {
            let module = self.create_module(stage);
            self.ctx
                .device
                .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(label),
                    layout: Some(&self.compute_layouts.pipeline),
                    module: &module,
                    entry_point: Some("main"),
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    cache: None,
                })
        })?;
        let (uniform_buffer, params_group, storage_group) =
            self.program_resources(label, &self.compute_layouts, bindings);
        Ok(WgpuProgram {
            pipeline: ProgramPipeline::Compute(pipeline),
            uniform_buffer,
            params_group,
            storage_group,
        })
    }

    fn create_raster_program(
        &mut self,
        vertex: &WrappedStage,
        fragment: &WrappedStage,
        bindings: &StorageBindings<Self::Buffer>,
    ) -> Result<Self::Program, String> {
        let pipeline = self.scoped(|| {
            let vertex_module = self.create_module(vertex);
            let fragment_module = self.create_module(fragment);
            self.ctx
                .device
                .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: Some("raster pipeline"),
                    layout: Some(&self.raster_layouts.pipeline),
                    vertex: wgpu::VertexState {
                        module: &vertex_module,
                        entry_point: Some("main"),
                        buffers: &[wgpu::VertexBufferLayout {
                            array_stride: size_of::<[f32; 2]>() as wgpu::BufferAddress,
                            step_mode: wgpu::VertexStepMode::Vertex,
                            attributes: &QUAD_ATTRIBUTES,
                        }],
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                    },
                    primitive: wgpu::PrimitiveState {
                        topology: wgpu::PrimitiveTopology::TriangleList,
                        strip_index_format: None,
                        front_face: wgpu::FrontFace::Ccw,
                        cull_mode: None,
                        polygon_mode: wgpu::PolygonMode::Fill,
                        unclipped_depth: false,
                        conservative: false,
                    },
                    depth_stencil: None,
                    multisample: wgpu::MultisampleState::default(),
                    fragment: Some(wgpu::FragmentState {
                        module: &fragment_module,
                        entry_point: Some("main"),
                        targets: &[Some(wgpu::ColorTargetState {
                            format: self.ctx.surface_format,
                            blend: None,
                            write_mask: wgpu::ColorWrites::ALL,
                        })],
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                    }),
                    multiview: None,
                    cache: None,
                })
        })?;
        let (uniform_buffer, params_group, storage_group) =
            self.program_resources("raster", &self.raster_layouts, bindings);
        Ok(WgpuProgram {
            pipeline: ProgramPipeline::Raster(pipeline),
            uniform_buffer,
            params_group,
            storage_group,
        })
    }

    fn write_uniforms(&mut self, program: &Self::Program, params: &VolumeParams) {
        self.ctx
            .queue
            .write_buffer(&program.uniform_buffer, 0, bytemuck::bytes_of(params));
    }

    fn dispatch_now(&mut self, program: &Self::Program, grid: DispatchGrid) {
        let mut encoder = self
            .ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("noise encoder"),
            });
        record_dispatch(&mut encoder, program, grid);
        self.ctx.queue.submit(std::iter::once(encoder.finish()));
    }

    fn begin_frame(&mut self) -> Result<Self::Frame, FrameError> {
        let surface_texture = self.ctx.surface.get_current_texture()?;
        let view = surface_texture
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let encoder = self
            .ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("frame encoder"),
            });
        Ok(WgpuFrame {
            surface_texture,
            view,
            encoder,
            drawn: false,
        })
    }

    fn encode_dispatch(
        &mut self,
        frame: &mut Self::Frame,
        program: &Self::Program,
        grid: DispatchGrid,
    ) {
        record_dispatch(&mut frame.encoder, program, grid);
    }

    fn encode_draw(
        &mut self,
        frame: &mut Self::Frame,
        program: &Self::Program,
        geometry: &Self::Geometry,
    ) {
        let ProgramPipeline::Raster(pipeline) = &program.pipeline else {
            tracing::warn!("ignoring draw of a compute program");
            return;
        };
        let mut pass = frame
            .encoder
            .begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("volume render pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &frame.view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(CLEAR_COLOR),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &program.storage_group, &[]);
        pass.set_bind_group(1, &program.params_group, &[]);
        pass.set_vertex_buffer(0, geometry.vertices.slice(..));
        pass.set_index_buffer(geometry.indices.slice(..), wgpu::IndexFormat::Uint32);
        pass.draw_indexed(0..geometry.index_count, 0, 0..1);
        drop(pass);
        frame.drawn = true;
    }

    fn present(&mut self, mut frame: Self::Frame) {
        if !frame.drawn {
            Self::clear_pass(&mut frame);
        }
        let WgpuFrame {
            surface_texture,
            encoder,
            ..
        } = frame;
        self.ctx.queue.submit(std::iter::once(encoder.finish()));
        surface_texture.present();
    }

    fn read_buffer(&mut self, buffer: &Self::Buffer, size: u64) -> Result<Vec<u8>, ResourceError> {
        let label = buffer_label(buffer);
        let readback_error = |reason: String| ResourceError::Readback {
            label: label.clone(),
            reason,
        };

        let staging = self.ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("volume readback"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("readback encoder"),
            });
        encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, size);
        self.ctx.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = crossbeam_channel::bounded(1);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.ctx
            .device
            .poll(wgpu::PollType::Wait)
            .map_err(|err| readback_error(err.to_string()))?;
        rx.recv()
            .map_err(|err| readback_error(err.to_string()))?
            .map_err(|err| readback_error(err.to_string()))?;

        let data = slice.get_mapped_range().to_vec();
        staging.unmap();
        Ok(data)
    }

    fn configure_viewport(&mut self, viewport: Viewport) {
        self.ctx.resize(viewport);
    }
}

fn buffer_label(buffer: &wgpu::Buffer) -> String {
    format!("storage buffer ({} bytes)", buffer.size())
}
