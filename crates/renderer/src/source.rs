//! Reads the role shaders from the watched directory.
//!
//! Nothing is cached between rebuilds: every call goes back to disk so the
//! builder always sees what the editor last saved.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;

use crate::error::BuildError;
use crate::types::StageRole;

/// Digest of a shader text; the builder compares noise digests across rebuilds.
pub fn digest(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}

#[derive(Debug, Clone)]
pub struct ShaderSources {
    dir: PathBuf,
}

impl ShaderSources {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self, role: StageRole) -> PathBuf {
        self.dir.join(role.file_name())
    }

    pub fn read(&self, role: StageRole) -> Result<String, BuildError> {
        let path = self.path(role);
        std::fs::read_to_string(&path).map_err(|source| BuildError::Source {
            role,
            path,
            source,
        })
    }
}
