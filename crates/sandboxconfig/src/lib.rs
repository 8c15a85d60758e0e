use std::path::{Path, PathBuf};

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

/// Axis length limit for the synthesized volume. 256³ × 4 channels × 4 bytes is
/// already a 256 MiB storage buffer, well past most adapters' binding limits.
pub const MAX_VOLUME_AXIS: u32 = 256;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementMode {
    /// Two-component movement (lateral, forward); the third component stays zero.
    #[default]
    Planar,
    /// Three-component movement adding a vertical axis.
    Volumetric,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SandboxConfig {
    pub version: u32,
    #[serde(default = "default_shader_dir")]
    pub shader_dir: PathBuf,
    #[serde(default)]
    pub window: WindowSection,
    #[serde(default)]
    pub volume: VolumeSection,
    #[serde(default)]
    pub movement: MovementSection,
    #[serde(default)]
    pub export: ExportSection,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WindowSection {
    #[serde(default = "default_window_extent")]
    pub width: u32,
    #[serde(default = "default_window_extent")]
    pub height: u32,
    #[serde(default = "default_title")]
    pub title: String,
    /// Keep the preview window above other windows while editing shaders.
    #[serde(default = "default_true")]
    pub floating: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VolumeSection {
    #[serde(
        default = "default_volume_size",
        deserialize_with = "deserialize_volume_size"
    )]
    pub size: [u32; 3],
    #[serde(default = "default_local_group_size")]
    pub local_group_size: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MovementSection {
    #[serde(default = "default_speed")]
    pub speed: f32,
    #[serde(default)]
    pub mode: MovementMode,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExportSection {
    #[serde(default = "default_export_dir")]
    pub directory: PathBuf,
}

fn default_shader_dir() -> PathBuf {
    PathBuf::from("gl")
}

fn default_window_extent() -> u32 {
    512
}

fn default_title() -> String {
    "volsandbox".to_string()
}

fn default_true() -> bool {
    true
}

fn default_volume_size() -> [u32; 3] {
    [32, 32, 32]
}

fn default_local_group_size() -> u32 {
    4
}

fn default_speed() -> f32 {
    0.05
}

fn default_export_dir() -> PathBuf {
    PathBuf::from("exports")
}

impl Default for WindowSection {
    fn default() -> Self {
        Self {
            width: default_window_extent(),
            height: default_window_extent(),
            title: default_title(),
            floating: true,
        }
    }
}

impl Default for VolumeSection {
    fn default() -> Self {
        Self {
            size: default_volume_size(),
            local_group_size: default_local_group_size(),
        }
    }
}

impl Default for MovementSection {
    fn default() -> Self {
        Self {
            speed: default_speed(),
            mode: MovementMode::default(),
        }
    }
}

impl Default for ExportSection {
    fn default() -> Self {
        Self {
            directory: default_export_dir(),
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            version: 1,
            shader_dir: default_shader_dir(),
            window: WindowSection::default(),
            volume: VolumeSection::default(),
            movement: MovementSection::default(),
            export: ExportSection::default(),
        }
    }
}

/// Accepts either a single edge length (cubic volume) or an explicit `[w, h, d]`.
fn deserialize_volume_size<'de, D>(deserializer: D) -> Result<[u32; 3], D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Helper {
        Cube(i64),
        Dims(Vec<i64>),
        Str(String),
    }

    match Helper::deserialize(deserializer)? {
        Helper::Cube(edge) => {
            let edge = u32::try_from(edge)
                .map_err(|_| de::Error::custom("volume size must be non-negative"))?;
            Ok([edge; 3])
        }
        Helper::Dims(dims) => {
            if dims.len() != 3 {
                return Err(de::Error::custom(format!(
                    "volume size must list exactly 3 dimensions, got {}",
                    dims.len()
                )));
            }
            let mut out = [0u32; 3];
            for (slot, value) in out.iter_mut().zip(dims) {
                *slot = u32::try_from(value)
                    .map_err(|_| de::Error::custom("volume dimensions must be non-negative"))?;
            }
            Ok(out)
        }
        Helper::Str(raw) => parse_volume_size(&raw).map_err(de::Error::custom),
    }
}

/// Parses `32`, `32x32x32`, or `64x32x16` into volume dimensions.
pub fn parse_volume_size(raw: &str) -> Result<[u32; 3], String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("volume size must not be empty".to_string());
    }
    let parts: Vec<&str> = trimmed.split(['x', 'X']).collect();
    let parse = |part: &str| {
        part.trim()
            .parse::<u32>()
            .map_err(|err| format!("invalid volume dimension '{part}': {err}"))
    };
    match parts.as_slice() {
        [edge] => Ok([parse(edge)?; 3]),
        [w, h, d] => Ok([parse(w)?, parse(h)?, parse(d)?]),
        _ => Err(format!(
            "invalid volume size '{trimmed}'; expected N or WxHxD"
        )),
    }
}

impl SandboxConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: SandboxConfig = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != 1 {
            return Err(ConfigError::Invalid(format!(
                "unsupported config version {}; expected 1",
                self.version
            )));
        }

        if self.window.width == 0 || self.window.height == 0 {
            return Err(ConfigError::Invalid(
                "window width and height must be greater than zero".into(),
            ));
        }

        let group = self.volume.local_group_size;
        if group == 0 {
            return Err(ConfigError::Invalid(
                "volume.local_group_size must be greater than zero".into(),
            ));
        }

        for (axis, extent) in ["width", "height", "depth"].iter().zip(self.volume.size) {
            if extent == 0 {
                return Err(ConfigError::Invalid(format!(
                    "volume {axis} must be greater than zero"
                )));
            }
            if extent > MAX_VOLUME_AXIS {
                return Err(ConfigError::Invalid(format!(
                    "volume {axis} {extent} exceeds the supported maximum of {MAX_VOLUME_AXIS}"
                )));
            }
            if extent % group != 0 {
                return Err(ConfigError::Invalid(format!(
                    "volume {axis} {extent} is not a multiple of local_group_size {group}"
                )));
            }
        }

        if !self.movement.speed.is_finite() || self.movement.speed < 0.0 {
            return Err(ConfigError::Invalid(
                "movement.speed must be a finite value >= 0".into(),
            ));
        }

        if self.shader_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("shader_dir may not be empty".into()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
version = 1
shader_dir = "shaders/live"

[window]
width = 800
height = 600
floating = false

[volume]
size = [64, 32, 16]
local_group_size = 4

[movement]
speed = 0.1
mode = "volumetric"

[export]
directory = "/tmp/slices"
"#;

    #[test]
    fn parses_sample_config() {
        let config = SandboxConfig::from_toml_str(SAMPLE).expect("parse config");
        assert_eq!(config.shader_dir, PathBuf::from("shaders/live"));
        assert_eq!(config.window.width, 800);
        assert!(!config.window.floating);
        assert_eq!(config.window.title, "volsandbox");
        assert_eq!(config.volume.size, [64, 32, 16]);
        assert_eq!(config.movement.mode, MovementMode::Volumetric);
        assert_eq!(config.export.directory, PathBuf::from("/tmp/slices"));
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = SandboxConfig::from_toml_str("version = 1").unwrap();
        assert_eq!(config.volume.size, [32, 32, 32]);
        assert_eq!(config.volume.local_group_size, 4);
        assert_eq!(config.shader_dir, PathBuf::from("gl"));
        assert_eq!(config.movement.mode, MovementMode::Planar);
    }

    #[test]
    fn accepts_cubic_and_string_sizes() {
        let cubic = SandboxConfig::from_toml_str("version = 1\n[volume]\nsize = 48\n").unwrap();
        assert_eq!(cubic.volume.size, [48, 48, 48]);

        let text =
            SandboxConfig::from_toml_str("version = 1\n[volume]\nsize = \"16x32x8\"\n").unwrap();
        assert_eq!(text.volume.size, [16, 32, 8]);
    }

    #[test]
    fn rejects_sizes_not_divisible_by_group() {
        let err = SandboxConfig::from_toml_str("version = 1\n[volume]\nsize = 30\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_unknown_version() {
        let err = SandboxConfig::from_toml_str("version = 2").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_wrong_dimension_count() {
        let err =
            SandboxConfig::from_toml_str("version = 1\n[volume]\nsize = [8, 8]\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn parse_volume_size_forms() {
        assert_eq!(parse_volume_size("32"), Ok([32, 32, 32]));
        assert_eq!(parse_volume_size("8x16X4"), Ok([8, 16, 4]));
        assert!(parse_volume_size("8x16").is_err());
        assert!(parse_volume_size("").is_err());
    }
}
