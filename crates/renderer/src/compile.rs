//! Shader wrapping and CPU-side validation.
//!
//! User shaders are plain GLSL 450 files. Before they reach the GPU we strip
//! their `#version` line and any loose `uniform <type> u_name;` declarations,
//! then prepend a prelude that declares the shared uniform block and the two
//! volume storage buffers. Each stripped uniform is re-exposed through a
//! `#define` that reads the block field and converts it to the type the shader
//! asked for, so `uniform vec2 u_movement;` keeps working against the `vec3`
//! field.

use std::collections::BTreeSet;
use std::fmt::Write as _;

use wgpu::naga;
use wgpu::naga::{ShaderStage, Span};

use crate::error::{BuildError, StageFailure};
use crate::source::{self, ShaderSources};
use crate::types::StageRole;
use crate::uniforms::{UniformName, PARAMS_BLOCK_GLSL, PARAMS_INSTANCE};

/// Options that shape every prelude.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WrapOptions {
    /// Exposed to compute shaders as `LOCAL_GROUP_SIZE`.
    pub local_group_size: u32,
}

impl Default for WrapOptions {
    fn default() -> Self {
        Self {
            local_group_size: crate::types::DEFAULT_LOCAL_GROUP_SIZE,
        }
    }
}

/// A stage ready for module creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedStage {
    pub role: StageRole,
    pub stage: ShaderStage,
    pub source: String,
    pub declared: BTreeSet<UniformName>,
    /// Byte offset in `source` where the user's text begins.
    body_offset: usize,
}

impl WrappedStage {
    /// The user's text as the compiler sees it. Stripped lines are blank, so
    /// line numbers match the file on disk.
    pub fn user_text(&self) -> &str {
        &self.source[self.body_offset..]
    }

    /// Moves a span from `source` into `user_text`. Spans inside the prelude
    /// become undefined.
    fn user_span(&self, span: Span) -> Span {
        match span.to_range() {
            Some(range) if range.start >= self.body_offset => {
                Span::from(range.start - self.body_offset..range.end - self.body_offset)
            }
            _ => Span::default(),
        }
    }
}

/// All four stages of one rebuild, validated.
#[derive(Debug, Clone)]
pub struct PreparedStages {
    pub noise_compute: WrappedStage,
    pub volume_compute: WrappedStage,
    pub vertex: WrappedStage,
    pub fragment: WrappedStage,
    /// Digest of the noise shader text; a change means the noise volume is stale.
    pub noise_digest: u64,
}

pub fn shader_stage(role: StageRole) -> ShaderStage {
    match role {
        StageRole::NoiseCompute | StageRole::VolumeCompute => ShaderStage::Compute,
        StageRole::Vertex => ShaderStage::Vertex,
        StageRole::Fragment => ShaderStage::Fragment,
    }
}

/// Reads, wraps and validates each role independently so one report names
/// every broken stage, including files that could not be read.
pub fn prepare_sources(
    sources: &ShaderSources,
    options: WrapOptions,
) -> Result<PreparedStages, BuildError> {
    let mut failures = Vec::new();
    let mut prepared: [Option<WrappedStage>; 4] = Default::default();
    let mut noise_digest = 0;

    for (slot, role) in prepared.iter_mut().zip(StageRole::ALL) {
        let text = match sources.read(role) {
            Ok(text) => text,
            Err(err) => {
                failures.push(StageFailure::new(role, err.to_string()));
                continue;
            }
        };
        if role == StageRole::NoiseCompute {
            noise_digest = source::digest(&text);
        }
        match prepare_stage(role, &text, options) {
            Ok(stage) => *slot = Some(stage),
            Err(failure) => failures.push(failure),
        }
    }

    match prepared {
        [Some(noise_compute), Some(volume_compute), Some(vertex), Some(fragment)]
            if failures.is_empty() =>
        {
            Ok(PreparedStages {
                noise_compute,
                volume_compute,
                vertex,
                fragment,
                noise_digest,
            })
        }
        _ => Err(BuildError::Compile(failures)),
    }
}

/// Wraps one stage and runs it through naga's GLSL front-end and validator.
pub fn prepare_stage(
    role: StageRole,
    text: &str,
    options: WrapOptions,
) -> Result<WrappedStage, StageFailure> {
    let wrapped =
        wrap_stage(role, text, options).map_err(|message| StageFailure { role, message })?;
    validate(&wrapped).map_err(|message| StageFailure { role, message })?;
    Ok(wrapped)
}

/// Produces a self-contained GLSL stage from user code.
///
/// Stripped lines are replaced with blanks so the text after the prelude stays
/// line-aligned with the file; [`validate`] reports against that text.
pub fn wrap_stage(
    role: StageRole,
    text: &str,
    options: WrapOptions,
) -> Result<WrappedStage, String> {
    let mut body = String::with_capacity(text.len());
    let mut declared: Vec<(UniformName, String)> = Vec::new();
    let mut skipped_version = false;

    for (index, line) in text.lines().enumerate() {
        let trimmed = line.trim_start();
        if !skipped_version && trimmed.starts_with("#version") {
            skipped_version = true;
            body.push('\n');
            continue;
        }
        if let Some(loose) = parse_loose_uniform(trimmed) {
            for (ty, name) in loose {
                let Some(known) = UniformName::from_name(&name) else {
                    return Err(format!(
                        "line {}: uniform `{name}` is not provided by the sandbox (available: {})",
                        index + 1,
                        available_names()
                    ));
                };
                if declared.iter().all(|(existing, _)| *existing != known) {
                    declared.push((known, ty));
                }
            }
            body.push('\n');
            continue;
        }
        body.push_str(line);
        body.push('\n');
    }

    let mut source = String::with_capacity(body.len() + 1024);
    source.push_str("#version 450\n");
    source.push_str(PARAMS_BLOCK_GLSL);
    source.push_str(storage_prelude(role));
    if role.is_compute() {
        let _ = writeln!(source, "#define LOCAL_GROUP_SIZE {}", options.local_group_size);
    }
    for (name, ty) in &declared {
        let field = format!("{PARAMS_INSTANCE}.{}", name.block_field());
        if ty == name.glsl_type() {
            let _ = writeln!(source, "#define {name} {field}");
        } else {
            let _ = writeln!(source, "#define {name} {ty}({field})");
        }
    }
    source.push_str("#line 1\n");
    let body_offset = source.len();
    source.push_str(&body);

    Ok(WrappedStage {
        role,
        stage: shader_stage(role),
        source,
        declared: declared.into_iter().map(|(name, _)| name).collect(),
        body_offset,
    })
}

fn storage_prelude(role: StageRole) -> &'static str {
    match role {
        StageRole::NoiseCompute | StageRole::VolumeCompute => {
            r"layout(std430, set = 0, binding = 0) buffer NoiseVolume { float noise[]; };
layout(std430, set = 0, binding = 1) buffer DensityVolume { float density[]; };
"
        }
        StageRole::Fragment => {
            r"layout(std430, set = 0, binding = 0) readonly buffer NoiseVolume { float noise[]; };
layout(std430, set = 0, binding = 1) readonly buffer DensityVolume { float density[]; };
"
        }
        StageRole::Vertex => "",
    }
}

fn available_names() -> String {
    UniformName::ALL
        .iter()
        .map(|name| name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Recognises `uniform <type> <name>[, <name>...];` with optional precision
/// qualifiers. Blocks, samplers with layouts, and anything else fall through.
fn parse_loose_uniform(trimmed: &str) -> Option<Vec<(String, String)>> {
    let rest = trimmed.strip_prefix("uniform")?;
    if !rest.starts_with(char::is_whitespace) || rest.contains('{') {
        return None;
    }
    let statement = rest.split("//").next()?.trim();
    let statement = statement.strip_suffix(';')?.trim();

    let mut tokens = statement.splitn(2, char::is_whitespace);
    let mut ty = tokens.next()?.trim();
    let mut names = tokens.next()?.trim();
    while matches!(ty, "lowp" | "mediump" | "highp") {
        let mut split = names.splitn(2, char::is_whitespace);
        ty = split.next()?.trim();
        names = split.next()?.trim();
    }

    let parsed: Vec<(String, String)> = names
        .split(',')
        .map(|name| (ty.to_string(), name.trim().to_string()))
        .filter(|(_, name)| !name.is_empty())
        .collect();
    if parsed.is_empty() {
        None
    } else {
        Some(parsed)
    }
}

/// Parses and validates the wrapped text, returning naga's rendered
/// diagnostics with locations in the user's file.
pub fn validate(wrapped: &WrappedStage) -> Result<(), String> {
    let mut frontend = naga::front::glsl::Frontend::default();
    let options = naga::front::glsl::Options::from(wrapped.stage);
    let module = frontend.parse(&options, &wrapped.source).map_err(|mut errors| {
        for error in &mut errors.errors {
            error.meta = wrapped.user_span(error.meta);
        }
        errors.emit_to_string(wrapped.user_text())
    })?;

    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|error| {
        let spans: Vec<(Span, String)> = error
            .spans()
            .map(|(span, label)| (wrapped.user_span(*span), label.clone()))
            .collect();
        let relocated = spans
            .into_iter()
            .fold(naga::WithSpan::new(error.into_inner()), |error, (span, label)| {
                error.with_span(span, label)
            });
        relocated.emit_to_string_with_path(wrapped.user_text(), "glsl")
    })?;
    Ok(())
}
