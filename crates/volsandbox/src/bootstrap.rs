use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use renderer::StageRole;
use tracing::{debug, info};

/// Starter shaders compiled into the binary, one per role.
const STARTER_SHADERS: [(StageRole, &str); 4] = [
    (
        StageRole::NoiseCompute,
        include_str!("../assets/gl/cs_noise.glsl"),
    ),
    (
        StageRole::VolumeCompute,
        include_str!("../assets/gl/cs_volume.glsl"),
    ),
    (StageRole::Vertex, include_str!("../assets/gl/vs.glsl")),
    (StageRole::Fragment, include_str!("../assets/gl/fs.glsl")),
];

#[derive(Debug, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub written: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
}

/// Writes the starter shaders into `dir`. Existing files are left alone.
pub fn install_starter_shaders(dir: &Path) -> Result<InstallReport> {
    ensure_directory(dir)?;

    let mut report = InstallReport::default();
    for (role, contents) in STARTER_SHADERS {
        let path = dir.join(role.file_name());
        if path.exists() {
            debug!(path = %path.display(), "keeping existing shader");
            report.skipped.push(path);
            continue;
        }
        fs::write(&path, contents)
            .with_context(|| format!("failed to write {role} shader to {}", path.display()))?;
        info!(path = %path.display(), "installed starter shader");
        report.written.push(path);
    }
    Ok(report)
}

fn ensure_directory(path: &Path) -> Result<()> {
    if path.exists() {
        if path.is_dir() {
            debug!(path = %path.display(), "reusing existing directory");
            Ok(())
        } else {
            bail!("filesystem entry at {} is not a directory", path.display());
        }
    } else {
        fs::create_dir_all(path).with_context(|| {
            format!("failed to create shader directory at {}", path.display())
        })?;
        info!(path = %path.display(), "created shader directory");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use renderer::WrapOptions;
    use tempfile::TempDir;

    #[test]
    fn installs_all_roles_then_skips_existing() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("gl");

        let first = install_starter_shaders(&dir).unwrap();
        assert_eq!(first.written.len(), 4);
        assert!(first.skipped.is_empty());

        fs::write(dir.join("fs.glsl"), "// mine").unwrap();
        let second = install_starter_shaders(&dir).unwrap();
        assert!(second.written.is_empty());
        assert_eq!(second.skipped.len(), 4);
        assert_eq!(fs::read_to_string(dir.join("fs.glsl")).unwrap(), "// mine");
    }

    #[test]
    fn starter_shaders_pass_the_cpu_check() {
        let root = TempDir::new().unwrap();
        install_starter_shaders(root.path()).unwrap();

        renderer::check_shaders(root.path(), WrapOptions::default()).unwrap();
    }

    #[test]
    fn refuses_to_install_over_a_file() {
        let root = TempDir::new().unwrap();
        let target = root.path().join("gl");
        fs::write(&target, "").unwrap();

        assert!(install_starter_shaders(&target).is_err());
    }
}
