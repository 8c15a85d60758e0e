use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use renderer::{SandboxSettings, VolumeDims, WrapOptions};
use sandboxconfig::{MovementMode, SandboxConfig};
use tracing_subscriber::EnvFilter;

use crate::bootstrap::install_starter_shaders;
use crate::cli::{Cli, Command, DirArgs, RunArgs};
use crate::paths::AppPaths;

const DEFAULT_LOG_FILTER: &str = "warn,volsandbox=info,renderer=info,naga=error,wgpu=error,\
wgpu_core=error,wgpu_hal=error,winit=error";

pub fn run(cli: Cli) -> Result<()> {
    initialise_tracing();

    let paths = AppPaths::discover()?;
    let mut config = load_config(cli.run.config.as_deref(), &paths)?;
    apply_overrides(&mut config, &cli.run);
    config
        .validate()
        .context("invalid configuration after applying command-line overrides")?;

    match cli.command {
        Some(Command::Init(args)) => init(&shader_dir(&args, &config)),
        Some(Command::Check(args)) => check(&shader_dir(&args, &config), &config),
        None => {
            let settings = settings_from_config(&config);
            tracing::info!(
                shader_dir = %settings.shader_dir.display(),
                volume = %settings.volume,
                "bootstrapping volsandbox"
            );
            renderer::run(settings)
        }
    }
}

fn initialise_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// An explicit `--config` must exist; the default location is optional.
fn load_config(explicit: Option<&Path>, paths: &AppPaths) -> Result<SandboxConfig> {
    if let Some(path) = explicit {
        let config = SandboxConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?;
        tracing::debug!(path = %path.display(), "loaded configuration");
        return Ok(config);
    }

    let default = paths.config_file();
    if default.is_file() {
        let config = SandboxConfig::load(&default)
            .with_context(|| format!("failed to load config {}", default.display()))?;
        tracing::debug!(path = %default.display(), "loaded configuration");
        Ok(config)
    } else {
        tracing::debug!(path = %default.display(), "no configuration file; using defaults");
        Ok(SandboxConfig::default())
    }
}

fn apply_overrides(config: &mut SandboxConfig, args: &RunArgs) {
    if let Some(dir) = &args.shader_dir {
        config.shader_dir = dir.clone();
    }
    if let Some(size) = args.volume_size {
        config.volume.size = size;
    }
    if let Some((width, height)) = args.size {
        config.window.width = width;
        config.window.height = height;
    }
    if let Some(speed) = args.speed {
        config.movement.speed = speed;
    }
    if let Some(mode) = args.movement {
        config.movement.mode = mode;
    }
    if let Some(dir) = &args.export_dir {
        config.export.directory = dir.clone();
    }
}

fn settings_from_config(config: &SandboxConfig) -> SandboxSettings {
    let [width, height, depth] = config.volume.size;
    SandboxSettings {
        shader_dir: config.shader_dir.clone(),
        window_size: (config.window.width, config.window.height),
        window_title: config.window.title.clone(),
        floating: config.window.floating,
        volume: VolumeDims::new(width, height, depth),
        local_group_size: config.volume.local_group_size,
        movement_speed: config.movement.speed,
        movement_mode: match config.movement.mode {
            MovementMode::Planar => renderer::MovementMode::Planar,
            MovementMode::Volumetric => renderer::MovementMode::Volumetric,
        },
        export_dir: config.export.directory.clone(),
    }
}

fn shader_dir(args: &DirArgs, config: &SandboxConfig) -> PathBuf {
    args.dir.clone().unwrap_or_else(|| config.shader_dir.clone())
}

fn init(dir: &Path) -> Result<()> {
    let report = install_starter_shaders(dir)?;
    for path in &report.written {
        println!("wrote {}", path.display());
    }
    for path in &report.skipped {
        println!("kept {}", path.display());
    }
    Ok(())
}

fn check(dir: &Path, config: &SandboxConfig) -> Result<()> {
    let options = WrapOptions {
        local_group_size: config.volume.local_group_size,
    };
    match renderer::check_shaders(dir, options) {
        Ok(stages) => {
            for stage in [
                &stages.noise_compute,
                &stages.volume_compute,
                &stages.vertex,
                &stages.fragment,
            ] {
                let uniforms: Vec<&str> = stage.declared.iter().map(|name| name.as_str()).collect();
                println!("ok {} (uniforms: {})", stage.role, uniforms.join(", "));
            }
            Ok(())
        }
        Err(err) => {
            eprintln!("{err}");
            bail!("shader check failed for {}", dir.display())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_replace_file_values() {
        let mut config = SandboxConfig::default();
        let args = RunArgs {
            shader_dir: Some(PathBuf::from("shaders")),
            volume_size: Some([64, 64, 16]),
            size: Some((800, 600)),
            movement: Some(MovementMode::Volumetric),
            ..RunArgs::default()
        };

        apply_overrides(&mut config, &args);
        let settings = settings_from_config(&config);

        assert_eq!(settings.shader_dir, PathBuf::from("shaders"));
        assert_eq!(settings.volume, VolumeDims::new(64, 64, 16));
        assert_eq!(settings.window_size, (800, 600));
        assert_eq!(settings.movement_mode, renderer::MovementMode::Volumetric);
        assert_eq!(settings.movement_speed, 0.05);
    }

    #[test]
    fn overridden_volume_is_revalidated() {
        let mut config = SandboxConfig::default();
        let args = RunArgs {
            volume_size: Some([30, 30, 30]),
            ..RunArgs::default()
        };
        apply_overrides(&mut config, &args);
        assert!(config.validate().is_err());
    }
}
