use std::fmt;
use std::path::PathBuf;

use crate::types::StageRole;

/// One stage that failed to produce a program during a rebuild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFailure {
    pub role: StageRole,
    pub message: String,
}

impl StageFailure {
    pub fn new(role: StageRole, message: impl Into<String>) -> Self {
        Self {
            role,
            message: message.into(),
        }
    }
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.role, self.message.trim_end())
    }
}

/// Renders every failure on its own block so compiler output stays readable.
fn join_failures(failures: &[StageFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Reasons a rebuild did not replace the active pipeline.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("{} shader stage(s) failed to compile:\n{}", .0.len(), join_failures(.0))]
    Compile(Vec<StageFailure>),
    #[error("failed to read {role} shader at {path}: {source}")]
    Source {
        role: StageRole,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BuildError {
    /// Stages named by the failure, in role order.
    pub fn failed_roles(&self) -> Vec<StageRole> {
        match self {
            BuildError::Compile(failures) => failures.iter().map(|f| f.role).collect(),
            BuildError::Source { role, .. } => vec![*role],
        }
    }
}

/// GPU allocation failures. Fatal while starting up.
#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("failed to allocate {label} ({size} bytes): {reason}")]
    Allocation {
        label: String,
        size: u64,
        reason: String,
    },
    #[error("failed to read back {label}: {reason}")]
    Readback { label: String, reason: String },
}

/// Failures while writing volume slices to disk. Reported, never fatal.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("failed to prepare export directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode slice {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("volume data holds {actual} bytes but {dims} x {channels} channels needs {expected}")]
    SizeMismatch {
        dims: crate::types::VolumeDims,
        channels: u32,
        expected: u64,
        actual: u64,
    },
    #[error("channel count must be at least 1")]
    NoChannels,
    #[error("no pipeline has rendered into the current volume buffers")]
    NotRendered,
    #[error(transparent)]
    Resource(#[from] ResourceError),
}

/// Errors surfaced while acquiring or presenting a frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("surface error: {0}")]
    Surface(#[from] wgpu::SurfaceError),
    #[error("frame loop has terminated")]
    Terminated,
}
