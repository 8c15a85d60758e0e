//! The per-frame state machine.
//!
//! Every frame runs the same fixed sequence: rebuild check, time uniform,
//! movement uniform, uniform upload, compute dispatch, draw, present. The
//! volume compute and the draw share one submission so the draw always sees
//! this frame's density.

use std::path::PathBuf;
use std::time::Instant;

use chrono::Local;
use tracing::{debug, info, warn};
use winit::event::ElementState;

use crate::compile::WrapOptions;
use crate::error::{ExportError, FrameError, ResourceError};
use crate::export::VolumeExporter;
use crate::gpu::GpuBackend;
use crate::input::{Control, InputAction, MovementState};
use crate::pipeline::{Pipeline, PipelineBuilder};
use crate::pool::GpuResourcePool;
use crate::runtime::{BoxedTimeSource, FrameStats};
use crate::source::ShaderSources;
use crate::types::{SandboxSettings, Viewport, VolumeDims};
use crate::uniforms::{UniformName, UniformSet, UniformValue};
use crate::watch::{ChangeNotifier, RebuildSignal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    RebuildPending,
    Rendering,
    Terminated,
}

/// Result of one rebuild attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildOutcome {
    Replaced { generation: u64 },
    Kept,
}

pub struct FrameOrchestrator<G: GpuBackend> {
    backend: G,
    pool: GpuResourcePool<G>,
    builder: PipelineBuilder,
    pipeline: Option<Pipeline<G>>,
    signal: RebuildSignal,
    notifier: Option<ChangeNotifier>,
    movement: MovementState,
    time: BoxedTimeSource,
    export_root: PathBuf,
    state: FrameState,
    stats: FrameStats,
    rebuild_attempts: u64,
}

impl<G: GpuBackend> FrameOrchestrator<G> {
    /// Allocates the persistent resources and attempts the first build.
    ///
    /// Allocation failures are fatal. Broken shaders are not: the loop starts
    /// without a pipeline and presents cleared frames until an edit fixes them.
    pub fn new(
        mut backend: G,
        settings: &SandboxSettings,
        viewport: Viewport,
        signal: RebuildSignal,
        time: BoxedTimeSource,
    ) -> Result<Self, ResourceError> {
        let pool = GpuResourcePool::new(
            &mut backend,
            settings.volume,
            settings.local_group_size,
            viewport,
        )?;
        let builder = PipelineBuilder::new(
            ShaderSources::new(&settings.shader_dir),
            WrapOptions {
                local_group_size: settings.local_group_size,
            },
        );

        let mut orchestrator = Self {
            backend,
            pool,
            builder,
            pipeline: None,
            signal,
            notifier: None,
            movement: MovementState::new(settings.movement_speed, settings.movement_mode),
            time,
            export_root: settings.export_dir.clone(),
            state: FrameState::Idle,
            stats: FrameStats::default(),
            rebuild_attempts: 0,
        };
        orchestrator.rebuild();
        Ok(orchestrator)
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn signal(&self) -> &RebuildSignal {
        &self.signal
    }

    pub fn pipeline(&self) -> Option<&Pipeline<G>> {
        self.pipeline.as_ref()
    }

    pub fn pool(&self) -> &GpuResourcePool<G> {
        &self.pool
    }

    pub fn backend_mut(&mut self) -> &mut G {
        &mut self.backend
    }

    /// Number of rebuilds attempted, including the initial build.
    pub fn rebuild_attempts(&self) -> u64 {
        self.rebuild_attempts
    }

    /// Keeps the watcher alive for as long as the loop runs.
    pub fn attach_notifier(&mut self, notifier: ChangeNotifier) {
        self.notifier = Some(notifier);
    }

    /// Moves `Idle` to `RebuildPending` when a change has been signalled.
    pub fn poll_signal(&mut self) -> FrameState {
        let changed = self.signal.is_pending() || self.pool.is_invalidated();
        if self.state == FrameState::Idle && changed {
            self.state = FrameState::RebuildPending;
        }
        self.state
    }

    /// Runs one frame. Rebuild failures are logged and never returned.
    pub fn frame(&mut self) -> Result<(), FrameError> {
        if self.state == FrameState::Terminated {
            return Err(FrameError::Terminated);
        }

        let signalled = self.signal.take();
        let invalidated = self.pool.take_invalidation();
        if signalled || invalidated {
            self.state = FrameState::RebuildPending;
            self.rebuild();
        }
        self.state = FrameState::Rendering;

        let sample = self.time.sample();
        self.movement.step();
        if let Some(pipeline) = self.pipeline.as_mut() {
            let time = UniformValue::Float(sample.seconds);
            let time = UniformSet::new().with(UniformName::Time.as_str(), time);
            pipeline.broadcast(&time);
            let movement =
                UniformSet::new().with(UniformName::Movement.as_str(), self.movement.as_uniform());
            pipeline.broadcast(&movement);
            pipeline.flush_uniforms(&mut self.backend);
        }

        let mut frame = match self.backend.begin_frame() {
            Ok(frame) => frame,
            Err(err) => {
                self.state = FrameState::Idle;
                return Err(err);
            }
        };
        if let Some(pipeline) = self.pipeline.as_ref() {
            self.backend.encode_dispatch(
                &mut frame,
                pipeline.volume_program().handle(),
                pipeline.grid(),
            );
            self.backend.encode_draw(
                &mut frame,
                pipeline.raster_program().handle(),
                self.pool.geometry(),
            );
        }
        self.backend.present(frame);
        self.state = FrameState::Idle;

        if let Some(fps) = self.stats.record(Instant::now()) {
            debug!(
                frame = sample.frame_index,
                time = sample.seconds,
                "{fps:.1} fps"
            );
        }
        Ok(())
    }

    /// Attempts a rebuild now. On success the new pipeline replaces the old
    /// one and, if the noise shader or the volume changed, the noise compute
    /// runs once before the next frame.
    pub fn rebuild(&mut self) -> RebuildOutcome {
        self.rebuild_attempts += 1;
        let started = Instant::now();
        match self.builder.rebuild(&mut self.backend, &self.pool) {
            Ok(mut pipeline) => {
                pipeline.flush_uniforms(&mut self.backend);
                let noise_changed = self
                    .pipeline
                    .as_ref()
                    .map_or(true, |current| current.noise_digest() != pipeline.noise_digest());
                if noise_changed || self.pool.noise_stale() {
                    self.backend
                        .dispatch_now(pipeline.noise_program().handle(), pipeline.grid());
                    self.pool.mark_noise_fresh();
                    debug!(grid = ?pipeline.grid().as_tuple(), "recomputed noise volume");
                }

                let generation = pipeline.generation();
                info!(
                    generation,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "compiled pipeline"
                );
                self.pipeline = Some(pipeline);
                RebuildOutcome::Replaced { generation }
            }
            Err(err) => {
                match self.pipeline.as_ref() {
                    Some(current) => warn!(
                        generation = current.generation(),
                        "rebuild failed; keeping previous pipeline\n{err}"
                    ),
                    None => warn!("rebuild failed; no pipeline to render with\n{err}"),
                }
                RebuildOutcome::Kept
            }
        }
    }

    /// Routes a key transition. Movement keys update the held set; export
    /// and rebuild are handled here; quit is returned to the caller.
    pub fn handle_control(&mut self, control: Control, state: ElementState) -> Option<InputAction> {
        let action = self.movement.handle(control, state)?;
        match action {
            InputAction::Rebuild => {
                info!("rebuild requested from keyboard");
                self.signal.raise();
            }
            InputAction::Export => match self.export_volume() {
                Ok(paths) => {
                    if let Some(dir) = paths.first().and_then(|path| path.parent()) {
                        info!(dir = %dir.display(), "volume exported");
                    }
                }
                Err(err) => warn!("volume export failed: {err}"),
            },
            InputAction::Quit => {}
        }
        Some(action)
    }

    /// Reads the density volume back and writes it under a timestamped
    /// subdirectory of the export root. Blocks until the GPU is idle.
    ///
    /// Refused while no pipeline is bound to the pool's current buffers, for
    /// example after a resize whose rebuild failed.
    pub fn export_volume(&mut self) -> Result<Vec<PathBuf>, ExportError> {
        let bound = self.pool.binding_ids();
        if self.pipeline.as_ref().map(Pipeline::bindings) != Some(bound) {
            return Err(ExportError::NotRendered);
        }
        let density = self.pool.density();
        let bytes = self
            .backend
            .read_buffer(density.handle(), density.byte_size())?;
        let dir = VolumeExporter::timestamped_dir(&self.export_root, Local::now());
        VolumeExporter::export(&dir, &bytes, density.dims(), density.channels())
    }

    /// Reallocates the volumes; the next frame rebuilds against them.
    pub fn resize_volume(&mut self, dims: VolumeDims) -> Result<(), ResourceError> {
        self.pool.resize(&mut self.backend, dims)
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.pool.set_viewport(&mut self.backend, viewport);
    }

    /// Drops the pipeline and the watcher. Further frames are refused.
    pub fn terminate(&mut self) {
        if self.state == FrameState::Terminated {
            return;
        }
        self.pipeline = None;
        self.notifier = None;
        self.state = FrameState::Terminated;
        info!("frame loop terminated");
    }
}
