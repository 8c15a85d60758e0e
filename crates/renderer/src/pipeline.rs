//! Pipeline snapshots and the builder that produces them.
//!
//! A [`Pipeline`] is built all-or-nothing from the four role shaders. It owns
//! three programs (noise compute, volume compute, raster) in that fixed
//! registration order, plus a record of the buffer identities and dispatch
//! grid it was bound against. Programs are never recompiled in place; the
//! orchestrator swaps whole snapshots.

use std::fmt;
use std::time::Instant;

use tracing::debug;

use crate::compile::{self, PreparedStages, WrapOptions, WrappedStage};
use crate::error::{BuildError, StageFailure};
use crate::gpu::GpuBackend;
use crate::pool::{BufferId, GpuResourcePool};
use crate::source::ShaderSources;
use crate::types::{DispatchGrid, ProgramKind, StageRole};
use crate::uniforms::{UniformBlock, UniformBroadcaster, UniformSet};

/// Identity of a compiled program; never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(u64);

impl fmt::Display for ProgramId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "program#{}", self.0)
    }
}

pub struct Program<P> {
    id: ProgramId,
    kind: ProgramKind,
    uniforms: UniformBlock,
    handle: P,
}

impl<P> Program<P> {
    pub fn id(&self) -> ProgramId {
        self.id
    }

    pub fn kind(&self) -> ProgramKind {
        self.kind
    }

    pub fn uniforms(&self) -> &UniformBlock {
        &self.uniforms
    }

    pub fn handle(&self) -> &P {
        &self.handle
    }
}

pub struct Pipeline<G: GpuBackend> {
    generation: u64,
    noise: Program<G::Program>,
    volume: Program<G::Program>,
    raster: Program<G::Program>,
    bindings: [BufferId; 2],
    grid: DispatchGrid,
    noise_digest: u64,
}

impl<G: GpuBackend> Pipeline<G> {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn noise_program(&self) -> &Program<G::Program> {
        &self.noise
    }

    pub fn volume_program(&self) -> &Program<G::Program> {
        &self.volume
    }

    pub fn raster_program(&self) -> &Program<G::Program> {
        &self.raster
    }

    /// Program ids in registration order.
    pub fn program_ids(&self) -> [ProgramId; 3] {
        [self.noise.id, self.volume.id, self.raster.id]
    }

    /// Buffer ids bound to storage slots 0 and 1.
    pub fn bindings(&self) -> [BufferId; 2] {
        self.bindings
    }

    /// Grid the compute programs were bound with.
    pub fn grid(&self) -> DispatchGrid {
        self.grid
    }

    pub fn noise_digest(&self) -> u64 {
        self.noise_digest
    }

    pub fn broadcast(&mut self, uniforms: &UniformSet) -> usize {
        UniformBroadcaster::apply(
            [
                &mut self.noise.uniforms,
                &mut self.volume.uniforms,
                &mut self.raster.uniforms,
            ],
            uniforms,
        )
    }

    /// Uploads every dirty uniform block. Returns how many were written.
    pub fn flush_uniforms(&mut self, backend: &mut G) -> usize {
        let mut written = 0;
        for program in [&mut self.noise, &mut self.volume, &mut self.raster] {
            if program.uniforms.is_dirty() {
                backend.write_uniforms(&program.handle, program.uniforms.params());
                program.uniforms.mark_clean();
                written += 1;
            }
        }
        written
    }
}

/// Compiles the role shaders into a fresh [`Pipeline`].
pub struct PipelineBuilder {
    sources: ShaderSources,
    options: WrapOptions,
    next_program: u64,
    generation: u64,
}

impl PipelineBuilder {
    pub fn new(sources: ShaderSources, options: WrapOptions) -> Self {
        Self {
            sources,
            options,
            next_program: 0,
            generation: 0,
        }
    }

    pub fn sources(&self) -> &ShaderSources {
        &self.sources
    }

    /// Reads, wraps, validates and links every stage against the pool's
    /// current buffers.
    ///
    /// Every failing stage is reported together. On success the new programs
    /// already carry the base uniform set for the pool's viewport and volume.
    pub fn rebuild<G: GpuBackend>(
        &mut self,
        backend: &mut G,
        pool: &GpuResourcePool<G>,
    ) -> Result<Pipeline<G>, BuildError> {
        let started = Instant::now();
        let PreparedStages {
            noise_compute: noise_stage,
            volume_compute: volume_stage,
            vertex: vertex_stage,
            fragment: fragment_stage,
            noise_digest,
        } = compile::prepare_sources(&self.sources, self.options)?;

        let bindings = pool.storage_bindings();
        let mut failures = Vec::new();
        let noise = backend
            .create_compute_program(&noise_stage, &bindings)
            .map_err(|message| failures.push(StageFailure::new(StageRole::NoiseCompute, message)))
            .ok();
        let volume = backend
            .create_compute_program(&volume_stage, &bindings)
            .map_err(|message| {
                failures.push(StageFailure::new(StageRole::VolumeCompute, message))
            })
            .ok();
        let raster = backend
            .create_raster_program(&vertex_stage, &fragment_stage, &bindings)
            .map_err(|message| failures.push(StageFailure::new(StageRole::Fragment, message)))
            .ok();

        let (Some(noise), Some(volume), Some(raster)) = (noise, volume, raster) else {
            return Err(BuildError::Compile(failures));
        };

        let mut pipeline = Pipeline {
            generation: self.generation + 1,
            noise: self.program(ProgramKind::Compute, &noise_stage, noise),
            volume: self.program(ProgramKind::Compute, &volume_stage, volume),
            raster: self.raster_program(&vertex_stage, &fragment_stage, raster),
            bindings: pool.binding_ids(),
            grid: pool.grid(),
            noise_digest,
        };
        self.generation = pipeline.generation;

        let assigned = pipeline.broadcast(&UniformSet::base(pool.viewport(), pool.dims()));
        debug!(
            generation = pipeline.generation,
            assigned,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "assembled pipeline"
        );
        Ok(pipeline)
    }

    fn next_id(&mut self) -> ProgramId {
        self.next_program += 1;
        ProgramId(self.next_program)
    }

    fn program<P>(&mut self, kind: ProgramKind, stage: &WrappedStage, handle: P) -> Program<P> {
        Program {
            id: self.next_id(),
            kind,
            uniforms: UniformBlock::new(stage.declared.clone()),
            handle,
        }
    }

    fn raster_program<P>(
        &mut self,
        vertex: &WrappedStage,
        fragment: &WrappedStage,
        handle: P,
    ) -> Program<P> {
        let declared = vertex.declared.union(&fragment.declared).copied().collect();
        Program {
            id: self.next_id(),
            kind: ProgramKind::Raster,
            uniforms: UniformBlock::new(declared),
            handle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::tests::write_shaders;
    use crate::gpu::recording::RecordingBackend;
    use crate::types::{Viewport, VolumeDims};
    use crate::uniforms::{UniformName, UniformValue};
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        backend: RecordingBackend,
        pool: GpuResourcePool<RecordingBackend>,
        builder: PipelineBuilder,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        write_shaders(dir.path());
        let mut backend = RecordingBackend::new();
        let pool =
            GpuResourcePool::new(&mut backend, VolumeDims::cube(32), 4, Viewport::new(640, 480))
                .unwrap();
        let builder = PipelineBuilder::new(ShaderSources::new(dir.path()), WrapOptions::default());
        Fixture {
            _dir: dir,
            backend,
            pool,
            builder,
        }
    }

    #[test]
    fn rebuild_binds_pool_buffers_and_base_uniforms() {
        let mut fx = fixture();
        let pipeline = fx.builder.rebuild(&mut fx.backend, &fx.pool).unwrap();

        assert_eq!(pipeline.generation(), 1);
        assert_eq!(pipeline.bindings(), fx.pool.binding_ids());
        assert_eq!(pipeline.grid().as_tuple(), (8, 8, 8));
        assert_eq!(pipeline.raster_program().kind(), ProgramKind::Raster);

        let noise = pipeline.noise_program().uniforms();
        assert_eq!(noise.params().volume_size, [32, 32, 32]);
        assert!(noise.is_dirty());

        let raster = pipeline.raster_program().uniforms();
        assert_eq!((raster.params().width, raster.params().height), (640, 480));
        assert!(raster.declared().contains(&UniformName::Movement));
        assert!(!raster.declares("u_time"));
    }

    #[test]
    fn successive_rebuilds_keep_buffer_identities() {
        let mut fx = fixture();
        let first = fx.builder.rebuild(&mut fx.backend, &fx.pool).unwrap();
        let second = fx.builder.rebuild(&mut fx.backend, &fx.pool).unwrap();

        assert_eq!(first.bindings(), second.bindings());
        assert_eq!(second.generation(), 2);
        for (old, new) in first.program_ids().iter().zip(second.program_ids()) {
            assert_ne!(*old, new);
        }
        assert_eq!(first.noise_digest(), second.noise_digest());
    }

    #[test]
    fn every_broken_stage_is_reported() {
        let mut fx = fixture();
        let volume = fx.builder.sources().path(StageRole::VolumeCompute);
        std::fs::write(volume, "void main( {").unwrap();
        std::fs::remove_file(fx.builder.sources().path(StageRole::Vertex)).unwrap();

        let err = match fx.builder.rebuild(&mut fx.backend, &fx.pool) {
            Err(err) => err,
            Ok(_) => panic!("expected rebuild failure"),
        };
        assert_eq!(
            err.failed_roles(),
            vec![StageRole::VolumeCompute, StageRole::Vertex]
        );
    }

    #[test]
    fn backend_failures_abort_the_rebuild() {
        let mut fx = fixture();
        fx.backend.fail_role = Some(StageRole::NoiseCompute);

        let err = match fx.builder.rebuild(&mut fx.backend, &fx.pool) {
            Err(err) => err,
            Ok(_) => panic!("expected rebuild failure"),
        };
        assert_eq!(err.failed_roles(), vec![StageRole::NoiseCompute]);

        fx.backend.fail_role = None;
        let pipeline = fx.builder.rebuild(&mut fx.backend, &fx.pool).unwrap();
        assert_eq!(pipeline.generation(), 1);
    }

    #[test]
    fn flush_uploads_only_dirty_programs() {
        let mut fx = fixture();
        let mut pipeline = fx.builder.rebuild(&mut fx.backend, &fx.pool).unwrap();
        assert_eq!(pipeline.flush_uniforms(&mut fx.backend), 3);
        assert_eq!(pipeline.flush_uniforms(&mut fx.backend), 0);

        let time = UniformSet::new().with("u_time", UniformValue::Float(1.0));
        assert_eq!(pipeline.broadcast(&time), 1);
        assert_eq!(pipeline.flush_uniforms(&mut fx.backend), 1);
    }
}
