//! In-memory [`GpuBackend`] that records calls for assertions.

use std::collections::HashMap;

use super::{GpuBackend, StorageBindings};
use crate::compile::WrappedStage;
use crate::error::{FrameError, ResourceError};
use crate::pool::QuadMesh;
use crate::types::{DispatchGrid, StageRole, Viewport};
use crate::uniforms::VolumeParams;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct RecordedBuffer(pub u32);

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RecordedProgram {
    pub serial: u32,
    pub roles: Vec<StageRole>,
    pub bindings: (RecordedBuffer, RecordedBuffer),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    CreateBuffer { label: String, size: u64 },
    CreateGeometry,
    CreateProgram { serial: u32, roles: Vec<StageRole> },
    WriteUniforms { serial: u32, params: VolumeParams },
    DispatchNow { serial: u32, grid: DispatchGrid },
    BeginFrame,
    Dispatch { serial: u32, grid: DispatchGrid },
    Draw { serial: u32 },
    Present { drawn: bool },
    ReadBuffer { buffer: RecordedBuffer, size: u64 },
    ConfigureViewport(Viewport),
}

#[derive(Debug)]
pub(crate) struct RecordedFrame {
    drawn: bool,
}

#[derive(Debug, Default)]
pub(crate) struct RecordingBackend {
    pub calls: Vec<Call>,
    pub contents: HashMap<RecordedBuffer, Vec<u8>>,
    /// Program creation for this role fails with a backend error.
    pub fail_role: Option<StageRole>,
    /// Storage allocations larger than this fail.
    pub max_buffer_size: Option<u64>,
    /// The next `begin_frame` returns this surface error.
    pub next_frame_error: Option<wgpu::SurfaceError>,
    next_buffer: u32,
    next_program: u32,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take_calls(&mut self) -> Vec<Call> {
        std::mem::take(&mut self.calls)
    }

    fn check_role(&self, role: StageRole) -> Result<(), String> {
        if self.fail_role == Some(role) {
            Err(format!("injected backend failure for {role}"))
        } else {
            Ok(())
        }
    }

    fn program(
        &mut self,
        roles: Vec<StageRole>,
        bindings: &StorageBindings<RecordedBuffer>,
    ) -> RecordedProgram {
        self.next_program += 1;
        let serial = self.next_program;
        self.calls.push(Call::CreateProgram {
            serial,
            roles: roles.clone(),
        });
        RecordedProgram {
            serial,
            roles,
            bindings: (bindings.noise, bindings.density),
        }
    }
}

impl GpuBackend for RecordingBackend {
    type Buffer = RecordedBuffer;
    type Geometry = ();
    type Program = RecordedProgram;
    type Frame = RecordedFrame;

    fn create_storage_buffer(
        &mut self,
        label: &str,
        size: u64,
    ) -> Result<Self::Buffer, ResourceError> {
        if self.max_buffer_size.is_some_and(|max| size > max) {
            return Err(ResourceError::Allocation {
                label: label.to_string(),
                size,
                reason: "exceeds test limit".into(),
            });
        }
        self.next_buffer += 1;
        let buffer = RecordedBuffer(self.next_buffer);
        self.contents.insert(buffer, vec![0; size as usize]);
        self.calls.push(Call::CreateBuffer {
            label: label.to_string(),
            size,
        });
        Ok(buffer)
    }

    fn create_geometry(&mut self, _mesh: &QuadMesh) -> Self::Geometry {
        self.calls.push(Call::CreateGeometry);
    }

    fn create_compute_program(
        &mut self,
        stage: &WrappedStage,
        bindings: &StorageBindings<Self::Buffer>,
    ) -> Result<Self::Program, String> {
        self.check_role(stage.role)?;
        Ok(self.program(vec![stage.role], bindings))
    }

    fn create_raster_program(
        &mut self,
        vertex: &WrappedStage,
        fragment: &WrappedStage,
        bindings: &StorageBindings<Self::Buffer>,
    ) -> Result<Self::Program, String> {
        self.check_role(vertex.role)?;
        self.check_role(fragment.role)?;
        Ok(self.program(vec![vertex.role, fragment.role], bindings))
    }

    fn write_uniforms(&mut self, program: &Self::Program, params: &VolumeParams) {
        self.calls.push(Call::WriteUniforms {
            serial: program.serial,
            params: *params,
        });
    }

    fn dispatch_now(&mut self, program: &Self::Program, grid: DispatchGrid) {
        self.calls.push(Call::DispatchNow {
            serial: program.serial,
            grid,
        });
    }

    fn begin_frame(&mut self) -> Result<Self::Frame, FrameError> {
        if let Some(err) = self.next_frame_error.take() {
            return Err(FrameError::Surface(err));
        }
        self.calls.push(Call::BeginFrame);
        Ok(RecordedFrame { drawn: false })
    }

    fn encode_dispatch(
        &mut self,
        _frame: &mut Self::Frame,
        program: &Self::Program,
        grid: DispatchGrid,
    ) {
        self.calls.push(Call::Dispatch {
            serial: program.serial,
            grid,
        });
    }

    fn encode_draw(
        &mut self,
        frame: &mut Self::Frame,
        program: &Self::Program,
        _geometry: &Self::Geometry,
    ) {
        frame.drawn = true;
        self.calls.push(Call::Draw {
            serial: program.serial,
        });
    }

    fn present(&mut self, frame: Self::Frame) {
        self.calls.push(Call::Present { drawn: frame.drawn });
    }

    fn read_buffer(&mut self, buffer: &Self::Buffer, size: u64) -> Result<Vec<u8>, ResourceError> {
        self.calls.push(Call::ReadBuffer {
            buffer: *buffer,
            size,
        });
        let data = self
            .contents
            .get(buffer)
            .ok_or_else(|| ResourceError::Readback {
                label: format!("buffer {}", buffer.0),
                reason: "unknown buffer".into(),
            })?;
        Ok(data.iter().copied().take(size as usize).collect())
    }

    fn configure_viewport(&mut self, viewport: Viewport) {
        self.calls.push(Call::ConfigureViewport(viewport));
    }
}
