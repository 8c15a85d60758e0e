use std::fmt;
use std::path::PathBuf;

use crate::input::MovementMode;

/// Workgroup edge length baked into the volume compute shaders.
pub const DEFAULT_LOCAL_GROUP_SIZE: u32 = 4;

/// Extent of the synthesized volume in voxels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VolumeDims {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl VolumeDims {
    pub fn new(width: u32, height: u32, depth: u32) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    pub fn cube(edge: u32) -> Self {
        Self::new(edge, edge, edge)
    }

    pub fn voxel_count(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height) * u64::from(self.depth)
    }

    /// Byte size of a buffer holding `channels` 32-bit floats per voxel.
    pub fn byte_size(&self, channels: u32) -> u64 {
        self.voxel_count() * u64::from(channels) * 4
    }

    pub fn as_ivec3(&self) -> [i32; 3] {
        [
            self.width.min(i32::MAX as u32) as i32,
            self.height.min(i32::MAX as u32) as i32,
            self.depth.min(i32::MAX as u32) as i32,
        ]
    }
}

impl From<[u32; 3]> for VolumeDims {
    fn from(value: [u32; 3]) -> Self {
        Self::new(value[0], value[1], value[2])
    }
}

impl fmt::Display for VolumeDims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.width, self.height, self.depth)
    }
}

/// Compute workgroup counts per axis for one volume dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DispatchGrid {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl DispatchGrid {
    /// Divides each axis by the local group size, rounding up so partial
    /// groups still cover the edge voxels.
    pub fn for_volume(dims: VolumeDims, local_group_size: u32) -> Self {
        let group = local_group_size.max(1);
        Self {
            x: dims.width.div_ceil(group),
            y: dims.height.div_ceil(group),
            z: dims.depth.div_ceil(group),
        }
    }

    pub fn as_tuple(&self) -> (u32, u32, u32) {
        (self.x, self.y, self.z)
    }
}

/// Framebuffer size the raster pass renders into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Source file roles; each maps to one fixed filename in the shader directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StageRole {
    /// Fills the single-channel noise volume (slot 0).
    NoiseCompute,
    /// Fills the four-channel density volume (slot 1) every frame.
    VolumeCompute,
    Vertex,
    Fragment,
}

impl StageRole {
    pub const ALL: [StageRole; 4] = [
        StageRole::NoiseCompute,
        StageRole::VolumeCompute,
        StageRole::Vertex,
        StageRole::Fragment,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            StageRole::NoiseCompute => "cs_noise.glsl",
            StageRole::VolumeCompute => "cs_volume.glsl",
            StageRole::Vertex => "vs.glsl",
            StageRole::Fragment => "fs.glsl",
        }
    }

    pub fn is_compute(self) -> bool {
        matches!(self, StageRole::NoiseCompute | StageRole::VolumeCompute)
    }
}

impl fmt::Display for StageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageRole::NoiseCompute => f.write_str("noise compute"),
            StageRole::VolumeCompute => f.write_str("volume compute"),
            StageRole::Vertex => f.write_str("vertex"),
            StageRole::Fragment => f.write_str("fragment"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgramKind {
    Compute,
    Raster,
}

/// Immutable configuration passed to the sandbox at start-up.
///
/// `SandboxSettings` mirrors the config file and CLI flags after merging.
#[derive(Debug, Clone)]
pub struct SandboxSettings {
    /// Directory holding the four role shaders; watched for changes.
    pub shader_dir: PathBuf,
    /// Initial window size in physical pixels.
    pub window_size: (u32, u32),
    pub window_title: String,
    /// Keep the window above others while editing.
    pub floating: bool,
    pub volume: VolumeDims,
    pub local_group_size: u32,
    /// Per-frame movement step applied while a direction key is held.
    pub movement_speed: f32,
    pub movement_mode: MovementMode,
    /// Root directory for volume slice exports.
    pub export_dir: PathBuf,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            shader_dir: PathBuf::from("gl"),
            window_size: (512, 512),
            window_title: "volsandbox".to_string(),
            floating: true,
            volume: VolumeDims::cube(32),
            local_group_size: DEFAULT_LOCAL_GROUP_SIZE,
            movement_speed: 0.05,
            movement_mode: MovementMode::Planar,
            export_dir: PathBuf::from("exports"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_grid_divides_cubic_volumes() {
        assert_eq!(
            DispatchGrid::for_volume(VolumeDims::cube(32), 4).as_tuple(),
            (8, 8, 8)
        );
        assert_eq!(
            DispatchGrid::for_volume(VolumeDims::cube(64), 4).as_tuple(),
            (16, 16, 16)
        );
    }

    #[test]
    fn dispatch_grid_handles_uneven_axes() {
        let grid = DispatchGrid::for_volume(VolumeDims::new(64, 32, 6), 4);
        assert_eq!(grid.as_tuple(), (16, 8, 2));
    }

    #[test]
    fn byte_size_counts_channels() {
        let dims = VolumeDims::cube(32);
        assert_eq!(dims.byte_size(1), 32 * 32 * 32 * 4);
        assert_eq!(dims.byte_size(4), 32 * 32 * 32 * 16);
    }
}
