//! Persistent GPU resources that survive pipeline rebuilds.

use std::fmt;

use tracing::{debug, info};

use crate::error::ResourceError;
use crate::gpu::{GpuBackend, StorageBindings};
use crate::types::{DispatchGrid, Viewport, VolumeDims};

pub const NOISE_CHANNELS: u32 = 1;
pub const DENSITY_CHANNELS: u32 = 4;

/// Fullscreen quad drawn by the raster program.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuadMesh {
    pub vertices: [[f32; 2]; 4],
    pub indices: [u32; 6],
}

impl QuadMesh {
    pub const FULLSCREEN: QuadMesh = QuadMesh {
        vertices: [[-1.0, -1.0], [-1.0, 1.0], [1.0, -1.0], [1.0, 1.0]],
        indices: [0, 1, 2, 2, 1, 3],
    };
}

/// Identity of one storage allocation. A reallocation always yields a new id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(u64);

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buffer#{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct VolumeBuffer<B> {
    id: BufferId,
    handle: B,
    dims: VolumeDims,
    channels: u32,
}

impl<B> VolumeBuffer<B> {
    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn handle(&self) -> &B {
        &self.handle
    }

    pub fn dims(&self) -> VolumeDims {
        self.dims
    }

    pub fn channels(&self) -> u32 {
        self.channels
    }

    pub fn byte_size(&self) -> u64 {
        self.dims.byte_size(self.channels)
    }
}

/// Owns the quad geometry and both volume buffers.
///
/// Rebuilds borrow these resources; only [`GpuResourcePool::resize`] replaces
/// the buffers. Any change that affects what a pipeline was bound against
/// sets the invalidation flag, which the orchestrator turns into a rebuild.
pub struct GpuResourcePool<G: GpuBackend> {
    geometry: G::Geometry,
    noise: VolumeBuffer<G::Buffer>,
    density: VolumeBuffer<G::Buffer>,
    local_group_size: u32,
    grid: DispatchGrid,
    viewport: Viewport,
    next_id: u64,
    invalidated: bool,
    noise_stale: bool,
}

impl<G: GpuBackend> GpuResourcePool<G> {
    pub fn new(
        backend: &mut G,
        dims: VolumeDims,
        local_group_size: u32,
        viewport: Viewport,
    ) -> Result<Self, ResourceError> {
        let geometry = backend.create_geometry(&QuadMesh::FULLSCREEN);
        let mut next_id = 0;
        let (noise, density) = allocate_volumes(backend, dims, &mut next_id)?;
        let grid = DispatchGrid::for_volume(dims, local_group_size);
        info!(%dims, grid = ?grid.as_tuple(), "allocated volume buffers");

        Ok(Self {
            geometry,
            noise,
            density,
            local_group_size,
            grid,
            viewport,
            next_id,
            invalidated: false,
            noise_stale: true,
        })
    }

    pub fn geometry(&self) -> &G::Geometry {
        &self.geometry
    }

    pub fn density(&self) -> &VolumeBuffer<G::Buffer> {
        &self.density
    }

    pub fn dims(&self) -> VolumeDims {
        self.noise.dims
    }

    pub fn grid(&self) -> DispatchGrid {
        self.grid
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    /// Buffer ids in slot order: noise, density.
    pub fn binding_ids(&self) -> [BufferId; 2] {
        [self.noise.id, self.density.id]
    }

    pub fn storage_bindings(&self) -> StorageBindings<G::Buffer> {
        StorageBindings {
            noise: self.noise.handle.clone(),
            density: self.density.handle.clone(),
        }
    }

    /// Reallocates both volumes at `dims`. On failure the current buffers
    /// stay in place and nothing is invalidated.
    pub fn resize(&mut self, backend: &mut G, dims: VolumeDims) -> Result<(), ResourceError> {
        let mut next_id = self.next_id;
        let (noise, density) = allocate_volumes(backend, dims, &mut next_id)?;
        self.next_id = next_id;
        self.noise = noise;
        self.density = density;
        self.grid = DispatchGrid::for_volume(dims, self.local_group_size);
        self.noise_stale = true;
        self.invalidated = true;
        info!(%dims, grid = ?self.grid.as_tuple(), "resized volume buffers");
        Ok(())
    }

    /// Records a new framebuffer size. Empty sizes (minimised windows) and
    /// unchanged sizes are ignored.
    pub fn set_viewport(&mut self, backend: &mut G, viewport: Viewport) {
        if viewport.is_empty() || viewport == self.viewport {
            return;
        }
        backend.configure_viewport(viewport);
        self.viewport = viewport;
        self.invalidated = true;
        debug!(width = viewport.width, height = viewport.height, "viewport changed");
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidated
    }

    /// Clears and returns the invalidation flag.
    pub fn take_invalidation(&mut self) -> bool {
        std::mem::take(&mut self.invalidated)
    }

    pub fn noise_stale(&self) -> bool {
        self.noise_stale
    }

    pub fn mark_noise_fresh(&mut self) {
        self.noise_stale = false;
    }
}

fn allocate_volumes<G: GpuBackend>(
    backend: &mut G,
    dims: VolumeDims,
    next_id: &mut u64,
) -> Result<(VolumeBuffer<G::Buffer>, VolumeBuffer<G::Buffer>), ResourceError> {
    let mut allocate =
        |label: &str, channels: u32| -> Result<VolumeBuffer<G::Buffer>, ResourceError> {
            let handle = backend.create_storage_buffer(label, dims.byte_size(channels))?;
            *next_id += 1;
            Ok(VolumeBuffer {
                id: BufferId(*next_id),
                handle,
                dims,
                channels,
            })
        };
    let noise = allocate("noise volume", NOISE_CHANNELS)?;
    let density = allocate("density volume", DENSITY_CHANNELS)?;
    Ok((noise, density))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::recording::{Call, RecordingBackend};

    fn pool(backend: &mut RecordingBackend) -> GpuResourcePool<RecordingBackend> {
        GpuResourcePool::new(backend, VolumeDims::cube(32), 4, Viewport::new(512, 512)).unwrap()
    }

    #[test]
    fn allocates_both_volumes_with_channel_sizes() {
        let mut backend = RecordingBackend::new();
        let pool = pool(&mut backend);

        assert_eq!(
            backend.calls,
            vec![
                Call::CreateGeometry,
                Call::CreateBuffer {
                    label: "noise volume".into(),
                    size: 32 * 32 * 32 * 4,
                },
                Call::CreateBuffer {
                    label: "density volume".into(),
                    size: 32 * 32 * 32 * 16,
                },
            ]
        );
        assert_eq!(pool.grid().as_tuple(), (8, 8, 8));
        assert!(pool.noise_stale());
        assert!(!pool.is_invalidated());
    }

    #[test]
    fn resize_reallocates_with_new_identities() {
        let mut backend = RecordingBackend::new();
        let mut pool = pool(&mut backend);
        let before = pool.binding_ids();
        pool.mark_noise_fresh();

        pool.resize(&mut backend, VolumeDims::cube(64)).unwrap();

        let after = pool.binding_ids();
        assert_ne!(before[0], after[0]);
        assert_ne!(before[1], after[1]);
        assert_eq!(pool.grid().as_tuple(), (16, 16, 16));
        assert_eq!(pool.density().byte_size(), 64 * 64 * 64 * 16);
        assert!(pool.noise_stale());
        assert!(pool.take_invalidation());
        assert!(!pool.take_invalidation());
    }

    #[test]
    fn failed_resize_keeps_current_buffers() {
        let mut backend = RecordingBackend::new();
        let mut pool = pool(&mut backend);
        let before = pool.binding_ids();
        backend.max_buffer_size = Some(1024);

        assert!(pool.resize(&mut backend, VolumeDims::cube(64)).is_err());
        assert_eq!(pool.binding_ids(), before);
        assert_eq!(pool.dims(), VolumeDims::cube(32));
        assert!(!pool.is_invalidated());
    }

    #[test]
    fn viewport_change_invalidates_bindings() {
        let mut backend = RecordingBackend::new();
        let mut pool = pool(&mut backend);
        backend.take_calls();

        pool.set_viewport(&mut backend, Viewport::new(512, 512));
        pool.set_viewport(&mut backend, Viewport::new(0, 300));
        assert!(!pool.is_invalidated());

        pool.set_viewport(&mut backend, Viewport::new(800, 600));
        assert!(pool.is_invalidated());
        assert_eq!(
            backend.calls,
            vec![Call::ConfigureViewport(Viewport::new(800, 600))]
        );
    }
}
