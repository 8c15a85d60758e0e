use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

fn volsandbox(config_dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_volsandbox"))
        .env("VOLSANDBOX_CONFIG_DIR", config_dir)
        .env("RUST_LOG", "error")
        .args(args)
        .output()
        .expect("failed to run volsandbox")
}

#[test]
fn init_then_check_succeeds() {
    let root = TempDir::new().unwrap();
    let shader_dir = root.path().join("gl");
    let shader_arg = shader_dir.to_str().unwrap();

    let init = volsandbox(root.path(), &["init", shader_arg]);
    assert!(init.status.success(), "{}", String::from_utf8_lossy(&init.stderr));
    for name in ["cs_noise.glsl", "cs_volume.glsl", "vs.glsl", "fs.glsl"] {
        assert!(shader_dir.join(name).exists(), "missing {name}");
    }

    let check = volsandbox(root.path(), &["check", shader_arg]);
    assert!(check.status.success(), "{}", String::from_utf8_lossy(&check.stderr));
    let stdout = String::from_utf8_lossy(&check.stdout);
    assert_eq!(stdout.lines().filter(|line| line.starts_with("ok ")).count(), 4);
    assert!(stdout.contains("ok fragment"));
}

#[test]
fn init_keeps_edited_shaders() {
    let root = TempDir::new().unwrap();
    let shader_dir = root.path().join("gl");
    fs::create_dir_all(&shader_dir).unwrap();
    fs::write(shader_dir.join("vs.glsl"), "// edited").unwrap();

    let init = volsandbox(root.path(), &["--shader-dir", shader_dir.to_str().unwrap(), "init"]);

    assert!(init.status.success());
    assert_eq!(fs::read_to_string(shader_dir.join("vs.glsl")).unwrap(), "// edited");
    assert!(shader_dir.join("fs.glsl").exists());
}

#[test]
fn check_reports_broken_stage_and_fails() {
    let root = TempDir::new().unwrap();
    let shader_dir = root.path().join("gl");
    let shader_arg = shader_dir.to_str().unwrap();
    assert!(volsandbox(root.path(), &["init", shader_arg]).status.success());
    fs::write(shader_dir.join("fs.glsl"), "#version 450\nvoid main() { nope }\n").unwrap();

    let check = volsandbox(root.path(), &["check", shader_arg]);

    assert!(!check.status.success());
    let stderr = String::from_utf8_lossy(&check.stderr);
    assert!(stderr.contains("[fragment]"), "{stderr}");
}

#[test]
fn invalid_config_file_is_rejected() {
    let root = TempDir::new().unwrap();
    fs::write(
        root.path().join("volsandbox.toml"),
        "version = 1\n[volume]\nsize = [30, 30, 30]\n",
    )
    .unwrap();

    let check = volsandbox(root.path(), &["check"]);

    assert!(!check.status.success());
    let stderr = String::from_utf8_lossy(&check.stderr);
    assert!(stderr.contains("local_group_size"), "{stderr}");
}
