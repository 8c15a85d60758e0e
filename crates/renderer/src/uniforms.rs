use std::collections::BTreeSet;
use std::fmt;

use bytemuck::{Pod, Zeroable};

use crate::types::{Viewport, VolumeDims};

/// Uniform names shared with shader authors. Shaders may declare any subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum UniformName {
    Width,
    Height,
    Time,
    VolumeSize,
    Movement,
}

impl UniformName {
    pub const ALL: [UniformName; 5] = [
        UniformName::Width,
        UniformName::Height,
        UniformName::Time,
        UniformName::VolumeSize,
        UniformName::Movement,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            UniformName::Width => "u_width",
            UniformName::Height => "u_height",
            UniformName::Time => "u_time",
            UniformName::VolumeSize => "u_volume_size",
            UniformName::Movement => "u_movement",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|candidate| candidate.as_str() == name)
    }

    /// GLSL type of the field backing this name inside the uniform block.
    pub(crate) fn glsl_type(self) -> &'static str {
        match self {
            UniformName::Width | UniformName::Height => "int",
            UniformName::Time => "float",
            UniformName::VolumeSize => "ivec3",
            UniformName::Movement => "vec3",
        }
    }

    /// Field name inside the uniform block; must match [`PARAMS_BLOCK_GLSL`].
    pub(crate) fn block_field(self) -> &'static str {
        match self {
            UniformName::Width => "_u_width",
            UniformName::Height => "_u_height",
            UniformName::Time => "_u_time",
            UniformName::VolumeSize => "_u_volume_size",
            UniformName::Movement => "_u_movement",
        }
    }
}

impl fmt::Display for UniformName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// GLSL declaration of the per-program uniform block.
///
/// The layout must match [`VolumeParams`]: `_u_time` packs into the fourth
/// float after the `ivec3`, and `_u_width` into the fourth slot after
/// `_u_movement`.
pub(crate) const PARAMS_BLOCK_GLSL: &str = r"layout(std140, set = 1, binding = 0) uniform VolumeParams {
    ivec3 _u_volume_size;
    float _u_time;
    vec3 _u_movement;
    int _u_width;
    int _u_height;
} volsandbox_params;
";

/// Instance name of the uniform block used by the generated `#define`s.
pub(crate) const PARAMS_INSTANCE: &str = "volsandbox_params";

#[repr(C, align(16))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VolumeParams {
    pub volume_size: [i32; 3],
    pub time: f32,
    pub movement: [f32; 3],
    pub width: i32,
    pub height: i32,
    pub _padding: [i32; 3],
}

unsafe impl Zeroable for VolumeParams {}
unsafe impl Pod for VolumeParams {}

impl Default for VolumeParams {
    fn default() -> Self {
        Self::zeroed()
    }
}

/// A host-side value destined for one uniform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Int(i32),
    Float(f32),
    IVec3([i32; 3]),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
}

impl UniformValue {
    fn as_int(&self) -> i32 {
        match *self {
            UniformValue::Int(v) => v,
            UniformValue::Float(v) => v.round() as i32,
            UniformValue::IVec3(v) => v[0],
            UniformValue::Vec2(v) => v[0].round() as i32,
            UniformValue::Vec3(v) => v[0].round() as i32,
        }
    }

    fn as_float(&self) -> f32 {
        match *self {
            UniformValue::Int(v) => v as f32,
            UniformValue::Float(v) => v,
            UniformValue::IVec3(v) => v[0] as f32,
            UniformValue::Vec2(v) => v[0],
            UniformValue::Vec3(v) => v[0],
        }
    }

    fn as_ivec3(&self) -> [i32; 3] {
        match *self {
            UniformValue::Int(v) => [v; 3],
            UniformValue::Float(v) => [v.round() as i32; 3],
            UniformValue::IVec3(v) => v,
            UniformValue::Vec2(v) => [v[0].round() as i32, v[1].round() as i32, 0],
            UniformValue::Vec3(v) => v.map(|c| c.round() as i32),
        }
    }

    fn as_vec3(&self) -> [f32; 3] {
        match *self {
            UniformValue::Int(v) => [v as f32; 3],
            UniformValue::Float(v) => [v; 3],
            UniformValue::IVec3(v) => v.map(|c| c as f32),
            UniformValue::Vec2(v) => [v[0], v[1], 0.0],
            UniformValue::Vec3(v) => v,
        }
    }
}

/// Named values for one broadcast. Insertion order is preserved and a repeated
/// name replaces the earlier value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UniformSet {
    entries: Vec<(String, UniformValue)>,
}

impl UniformSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: UniformValue) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: UniformValue) {
        let name = name.into();
        if let Some(slot) = self.entries.iter_mut().find(|(existing, _)| *existing == name) {
            slot.1 = value;
        } else {
            self.entries.push((name, value));
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &UniformValue)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Values every freshly built program receives: viewport and volume size.
    pub fn base(viewport: Viewport, dims: VolumeDims) -> Self {
        Self::new()
            .with(
                UniformName::Width.as_str(),
                UniformValue::Int(viewport.width.min(i32::MAX as u32) as i32),
            )
            .with(
                UniformName::Height.as_str(),
                UniformValue::Int(viewport.height.min(i32::MAX as u32) as i32),
            )
            .with(
                UniformName::VolumeSize.as_str(),
                UniformValue::IVec3(dims.as_ivec3()),
            )
    }
}

/// CPU mirror of one program's uniform block plus the names it declared.
#[derive(Debug, Clone, PartialEq)]
pub struct UniformBlock {
    declared: BTreeSet<UniformName>,
    params: VolumeParams,
    dirty: bool,
}

impl UniformBlock {
    pub fn new(declared: BTreeSet<UniformName>) -> Self {
        Self {
            declared,
            params: VolumeParams::default(),
            dirty: true,
        }
    }

    pub fn declared(&self) -> &BTreeSet<UniformName> {
        &self.declared
    }

    pub fn declares(&self, name: &str) -> bool {
        UniformName::from_name(name).is_some_and(|name| self.declared.contains(&name))
    }

    pub fn params(&self) -> &VolumeParams {
        &self.params
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Assigns `value` if the program declares `name`. Returns whether the
    /// name was declared; the block only turns dirty when a value changes.
    pub fn set(&mut self, name: &str, value: &UniformValue) -> bool {
        let Some(name) = UniformName::from_name(name) else {
            return false;
        };
        if !self.declared.contains(&name) {
            return false;
        }

        let before = self.params;
        match name {
            UniformName::Width => self.params.width = value.as_int(),
            UniformName::Height => self.params.height = value.as_int(),
            UniformName::Time => self.params.time = value.as_float(),
            UniformName::VolumeSize => self.params.volume_size = value.as_ivec3(),
            UniformName::Movement => self.params.movement = value.as_vec3(),
        }
        if self.params != before {
            self.dirty = true;
        }
        true
    }
}

/// Best-effort fan-out of named values across every live program.
pub struct UniformBroadcaster;

impl UniformBroadcaster {
    /// Applies `uniforms` to each block in the order given. Names a program
    /// does not declare are skipped without error. Returns the number of
    /// assignments made.
    pub fn apply<'a, I>(programs: I, uniforms: &UniformSet) -> usize
    where
        I: IntoIterator<Item = &'a mut UniformBlock>,
    {
        let mut assigned = 0;
        for block in programs {
            for (name, value) in uniforms.iter() {
                if block.set(name, value) {
                    assigned += 1;
                }
            }
        }
        assigned
    }
}
