//! GPU access behind a narrow backend seam.
//!
//! - `context` owns wgpu instance/device/surface wiring and knows how to
//!   reconfigure the swapchain when the window resizes.
//! - `backend` implements [`GpuBackend`] on top of that context: storage
//!   buffers, compute and raster pipelines, per-program uniform buffers,
//!   frame encoding and buffer readback.
//! - `recording` is a test double that records every call in order so the
//!   orchestration logic can be exercised without an adapter.

mod backend;
mod context;
#[cfg(test)]
pub(crate) mod recording;

pub use backend::WgpuBackend;
pub(crate) use context::GpuContext;

use crate::compile::WrappedStage;
use crate::error::{FrameError, ResourceError};
use crate::pool::QuadMesh;
use crate::types::{DispatchGrid, Viewport};
use crate::uniforms::VolumeParams;

/// Buffers bound to the fixed storage slots of every program.
#[derive(Debug, Clone)]
pub struct StorageBindings<B> {
    /// Slot 0, single channel.
    pub noise: B,
    /// Slot 1, four channels.
    pub density: B,
}

/// Operations the pipeline builder and frame orchestrator need from a GPU.
///
/// Program creation reports failures as rendered diagnostic text; the caller
/// attributes them to the stage that produced them.
pub trait GpuBackend {
    type Buffer: Clone;
    type Geometry;
    type Program;
    type Frame;

    fn create_storage_buffer(&mut self, label: &str, size: u64)
        -> Result<Self::Buffer, ResourceError>;

    fn create_geometry(&mut self, mesh: &QuadMesh) -> Self::Geometry;

    fn create_compute_program(
        &mut self,
        stage: &WrappedStage,
        bindings: &StorageBindings<Self::Buffer>,
    ) -> Result<Self::Program, String>;

    fn create_raster_program(
        &mut self,
        vertex: &WrappedStage,
        fragment: &WrappedStage,
        bindings: &StorageBindings<Self::Buffer>,
    ) -> Result<Self::Program, String>;

    /// Uploads a program's uniform block.
    fn write_uniforms(&mut self, program: &Self::Program, params: &VolumeParams);

    /// Runs a compute program in its own submission, outside any frame.
    fn dispatch_now(&mut self, program: &Self::Program, grid: DispatchGrid);

    fn begin_frame(&mut self) -> Result<Self::Frame, FrameError>;

    fn encode_dispatch(
        &mut self,
        frame: &mut Self::Frame,
        program: &Self::Program,
        grid: DispatchGrid,
    );

    fn encode_draw(
        &mut self,
        frame: &mut Self::Frame,
        program: &Self::Program,
        geometry: &Self::Geometry,
    );

    /// Submits everything encoded into `frame` and presents it. A frame with
    /// no draw is presented cleared.
    fn present(&mut self, frame: Self::Frame);

    /// Copies `size` bytes of a storage buffer back to the host, blocking.
    fn read_buffer(&mut self, buffer: &Self::Buffer, size: u64) -> Result<Vec<u8>, ResourceError>;

    fn configure_viewport(&mut self, viewport: Viewport);
}
