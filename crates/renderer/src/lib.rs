//! Renderer crate for volsandbox, a live-reloading volume shader sandbox.
//!
//! The crate watches a directory of four GLSL shaders and keeps a window
//! rendering them while they are edited. The overall flow is:
//!
//! ```text
//!   notify watcher ──▶ RebuildSignal (single slot)
//!                              │
//!   winit event loop ──▶ FrameOrchestrator::frame()
//!                              │ rebuild check
//!                              ├─▶ PipelineBuilder ─▶ compile (wrap + naga) ─▶ GpuBackend
//!                              │ per frame
//!                              └─▶ UniformBroadcaster ─▶ compute dispatch ─▶ draw ─▶ present
//! ```
//!
//! [`GpuResourcePool`] owns the noise and density volumes, which survive every
//! rebuild. A rebuild produces a complete [`Pipeline`] snapshot or nothing;
//! a broken shader leaves the previous snapshot rendering. All GPU work goes
//! through the [`gpu::GpuBackend`] seam so the orchestration can be tested
//! without an adapter.

use std::path::Path;

use anyhow::Result;

pub mod compile;
pub mod error;
pub mod export;
pub mod gpu;
pub mod input;
pub mod orchestrator;
pub mod pipeline;
pub mod pool;
pub mod runtime;
pub mod source;
pub mod types;
pub mod uniforms;
pub mod watch;
mod window;

pub use compile::{PreparedStages, WrapOptions};
pub use error::{BuildError, ExportError, FrameError, ResourceError, StageFailure};
pub use export::VolumeExporter;
pub use input::MovementMode;
pub use orchestrator::{FrameOrchestrator, FrameState};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use pool::GpuResourcePool;
pub use source::ShaderSources;
pub use types::{SandboxSettings, StageRole, Viewport, VolumeDims};
pub use watch::{ChangeNotifier, RebuildSignal};

/// Opens the sandbox window and runs until it is closed.
pub fn run(settings: SandboxSettings) -> Result<()> {
    tracing::info!(
        shader_dir = %settings.shader_dir.display(),
        volume = %settings.volume,
        "starting sandbox"
    );
    window::run_window(settings)
}

/// Reads, wraps and validates the four role shaders without a GPU.
pub fn check_shaders(
    shader_dir: &Path,
    options: WrapOptions,
) -> Result<PreparedStages, BuildError> {
    compile::prepare_sources(&ShaderSources::new(shader_dir), options)
}
