use std::path::PathBuf;

use clap::{Parser, Subcommand};
use sandboxconfig::MovementMode;

#[derive(Parser, Debug)]
#[command(
    name = "volsandbox",
    author,
    version,
    about = "Live-reloading GPU volume shader sandbox",
    arg_required_else_help = false
)]
pub struct Cli {
    #[command(flatten)]
    pub run: RunArgs,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Parser, Debug, Default)]
pub struct RunArgs {
    /// Directory holding cs_noise.glsl, cs_volume.glsl, vs.glsl and fs.glsl.
    #[arg(long, value_name = "DIR", global = true)]
    pub shader_dir: Option<PathBuf>,

    /// Configuration file; defaults to `volsandbox.toml` in the config directory.
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Volume dimensions, either `N` for a cube or `WxHxD`.
    #[arg(long, value_name = "WxHxD", value_parser = parse_volume_arg)]
    pub volume_size: Option<[u32; 3]>,

    /// Initial window size (e.g. `512x512`).
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_surface_size)]
    pub size: Option<(u32, u32)>,

    /// Movement step applied per frame while a direction key is held.
    #[arg(long, value_name = "STEP")]
    pub speed: Option<f32>,

    /// Movement uniform shape: `planar` (vec2) or `volumetric` (vec3).
    #[arg(long, value_name = "MODE", value_parser = parse_movement)]
    pub movement: Option<MovementMode>,

    /// Root directory for volume slice exports.
    #[arg(long, value_name = "DIR")]
    pub export_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Write the bundled starter shaders into the shader directory.
    Init(DirArgs),
    /// Compile the shaders on the CPU and print diagnostics.
    Check(DirArgs),
}

#[derive(Parser, Debug, Default)]
pub struct DirArgs {
    /// Shader directory; falls back to `--shader-dir` or the configured one.
    #[arg(value_name = "DIR")]
    pub dir: Option<PathBuf>,
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn parse_volume_arg(value: &str) -> Result<[u32; 3], String> {
    let dims = sandboxconfig::parse_volume_size(value)?;
    if dims.contains(&0) {
        return Err("volume dimensions must be greater than zero".to_string());
    }
    Ok(dims)
}

pub fn parse_surface_size(value: &str) -> Result<(u32, u32), String> {
    let trimmed = value.trim();
    let (width, height) = trimmed
        .split_once(['x', 'X'])
        .ok_or_else(|| "expected WxH format, e.g. 512x512".to_string())?;

    let width: u32 = width
        .trim()
        .parse()
        .map_err(|_| "invalid width in size specification".to_string())?;
    let height: u32 = height
        .trim()
        .parse()
        .map_err(|_| "invalid height in size specification".to_string())?;

    if width == 0 || height == 0 {
        return Err("window dimensions must be greater than zero".to_string());
    }

    Ok((width, height))
}

pub fn parse_movement(value: &str) -> Result<MovementMode, String> {
    let normalized = value.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "planar" | "2d" | "vec2" => Ok(MovementMode::Planar),
        "volumetric" | "3d" | "vec3" => Ok(MovementMode::Volumetric),
        other => Err(format!(
            "unknown movement mode '{other}'; expected planar or volumetric"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn surface_size_parsing() {
        assert_eq!(parse_surface_size("640x480"), Ok((640, 480)));
        assert_eq!(parse_surface_size(" 512 X 256 "), Ok((512, 256)));
        assert!(parse_surface_size("640").is_err());
        assert!(parse_surface_size("0x480").is_err());
    }

    #[test]
    fn volume_argument_accepts_cube_shorthand() {
        assert_eq!(parse_volume_arg("64"), Ok([64, 64, 64]));
        assert_eq!(parse_volume_arg("64x32x16"), Ok([64, 32, 16]));
        assert!(parse_volume_arg("0x4x4").is_err());
    }

    #[test]
    fn run_flags_and_subcommands_parse() {
        let cli = Cli::try_parse_from([
            "volsandbox",
            "--volume-size",
            "16",
            "--movement",
            "volumetric",
            "--speed",
            "0.1",
        ])
        .unwrap();
        assert_eq!(cli.run.volume_size, Some([16, 16, 16]));
        assert_eq!(cli.run.movement, Some(MovementMode::Volumetric));
        assert!(cli.command.is_none());

        let cli = Cli::try_parse_from(["volsandbox", "check", "shaders"]).unwrap();
        match cli.command {
            Some(Command::Check(args)) => assert_eq!(args.dir, Some(PathBuf::from("shaders"))),
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
