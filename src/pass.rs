//! A single pass of an effect: source, declared inputs/outputs, compile
//! state and execution.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::backend::{
    ChannelBinding, DrawCall, FilterMode, GraphicsBackend, ProgramId, ShaderUniforms, TextureId,
    TextureKind, Viewport, WrapMode,
};
use crate::compiler::{ChannelType, CompileFailure, CompileRequest, CompiledShader, ErrorLine};
use crate::pool::{ResourcePool, SlotRef};

pub const MAX_CHANNELS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PassType {
    Common,
    Buffer,
    Cubemap,
    Image,
    Sound,
}

impl PassType {
    pub const ALL: [PassType; 5] = [
        PassType::Common,
        PassType::Buffer,
        PassType::Cubemap,
        PassType::Image,
        PassType::Sound,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PassType::Common => "common",
            PassType::Buffer => "buffer",
            PassType::Cubemap => "cubemap",
            PassType::Image => "image",
            PassType::Sound => "sound",
        }
    }

    /// Only buffer and cubemap passes write into the resource pool.
    pub fn can_declare_outputs(self) -> bool {
        matches!(self, PassType::Buffer | PassType::Cubemap)
    }

    pub fn template_source(self) -> &'static str {
        match self {
            PassType::Common => "vec4 someFunction(vec4 a, float b)\n{\n    return a + b;\n}\n",
            PassType::Buffer => {
                "void mainImage(out vec4 fragColor, in vec2 fragCoord)\n{\n    fragColor = vec4(0.0, 0.0, 1.0, 1.0);\n}\n"
            }
            PassType::Cubemap => {
                "void mainCubemap(out vec4 fragColor, in vec2 fragCoord, in vec3 rayOri, in vec3 rayDir)\n{\n    vec3 col = 0.5 + 0.5 * rayDir;\n    fragColor = vec4(col, 1.0);\n}\n"
            }
            PassType::Image => {
                "void mainImage(out vec4 fragColor, in vec2 fragCoord)\n{\n    vec2 uv = fragCoord / iResolution.xy;\n    vec3 col = 0.5 + 0.5 * cos(iTime + uv.xyx + vec3(0.0, 2.0, 4.0));\n    fragColor = vec4(col, 1.0);\n}\n"
            }
            PassType::Sound => {
                "vec2 mainSound(int samp, float time)\n{\n    return vec2(sin(6.2831 * 440.0 * time) * exp(-3.0 * time));\n}\n"
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    Texture,
    Volume,
    Cubemap,
    Buffer,
    Keyboard,
    Mic,
    Webcam,
    Video,
    Music,
    #[serde(rename = "musicstream")]
    MusicStream,
}

impl InputKind {
    pub fn channel_type(self) -> ChannelType {
        match self {
            InputKind::Cubemap => ChannelType::Cube,
            InputKind::Volume => ChannelType::D3,
            _ => ChannelType::D2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TexelPrecision {
    #[default]
    Byte,
    Float,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sampler {
    #[serde(default)]
    pub filter: FilterMode,
    #[serde(default)]
    pub wrap: WrapMode,
    #[serde(default = "default_vflip", with = "bool_text")]
    pub vflip: bool,
    #[serde(default, with = "bool_text")]
    pub srgb: bool,
    #[serde(default)]
    pub internal: TexelPrecision,
}

fn default_vflip() -> bool {
    true
}

impl Default for Sampler {
    fn default() -> Self {
        Self {
            filter: FilterMode::Mipmap,
            wrap: WrapMode::Repeat,
            vflip: true,
            srgb: false,
            internal: TexelPrecision::Byte,
        }
    }
}

/// Documents store sampler booleans as `"true"`/`"false"` strings; accept
/// real booleans too.
mod bool_text {
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(value: &bool, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(if *value { "true" } else { "false" })
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Bool(bool),
            Text(String),
        }
        match Raw::deserialize(d)? {
            Raw::Bool(b) => Ok(b),
            Raw::Text(t) => match t.trim() {
                "true" => Ok(true),
                "false" => Ok(false),
                other => Err(de::Error::custom(format!("expected \"true\" or \"false\", got {other:?}"))),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    /// A buffer or cubemap slot of the resource pool.
    Slot(SlotRef),
    /// Anything provided from outside the pipeline, addressed by asset id.
    Asset(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassInput {
    pub kind: InputKind,
    pub source: InputSource,
    pub filepath: String,
    pub sampler: Sampler,
}

impl PassInput {
    pub fn slot(&self) -> Option<SlotRef> {
        match self.source {
            InputSource::Slot(slot) => Some(slot),
            InputSource::Asset(_) => None,
        }
    }

    pub fn wants_mipmaps(&self) -> bool {
        self.sampler.filter == FilterMode::Mipmap
    }
}

/// Identity of a pass that survives renumbering; used to route compile
/// completions back to the right pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PassKey(pub u64);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileStatus {
    pub error: bool,
    pub log: String,
    pub lines: Vec<ErrorLine>,
}

/// A texture supplied by the host for device and asset inputs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExternalTexture {
    pub texture: TextureId,
    pub kind: TextureKind,
    pub resolution: [f32; 3],
    pub time: f32,
}

/// Host-side resolver for inputs the pipeline does not own (textures, video,
/// webcam, microphone and music spectra).
pub trait ExternalTextures {
    fn resolve(&self, pass: usize, channel: usize, input: &PassInput) -> Option<ExternalTexture>;
}

/// Everything a pass needs from the pipeline to execute once.
pub struct FrameContext<'a> {
    pub pass_index: usize,
    pub uniforms: ShaderUniforms,
    pub keyboard: ExternalTexture,
    pub external: Option<&'a dyn ExternalTextures>,
}

#[derive(Debug)]
pub struct Pass {
    key: PassKey,
    pass_type: PassType,
    name: String,
    description: String,
    source: String,
    inputs: [Option<PassInput>; MAX_CHANNELS],
    outputs: [Option<SlotRef>; MAX_CHANNELS],
    program: Option<ProgramId>,
    status: CompileStatus,
    dirty: bool,
    compile_sequence: u64,
}

impl Pass {
    pub fn new(key: PassKey, pass_type: PassType, name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            key,
            pass_type,
            name: name.into(),
            description: String::new(),
            source: source.into(),
            inputs: Default::default(),
            outputs: Default::default(),
            program: None,
            status: CompileStatus::default(),
            dirty: true,
            compile_sequence: 0,
        }
    }

    pub fn key(&self) -> PassKey {
        self.key
    }

    pub fn pass_type(&self) -> PassType {
        self.pass_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn set_source(&mut self, source: impl Into<String>) {
        self.source = source.into();
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn inputs(&self) -> &[Option<PassInput>; MAX_CHANNELS] {
        &self.inputs
    }

    pub fn input(&self, channel: usize) -> Option<&PassInput> {
        self.inputs.get(channel).and_then(Option::as_ref)
    }

    /// Changing a channel's kind changes the generated declarations, so the
    /// pass needs a recompile when the channel type differs.
    pub fn set_input(&mut self, channel: usize, input: Option<PassInput>) -> bool {
        let Some(slot) = self.inputs.get_mut(channel) else {
            return false;
        };
        let before = slot.as_ref().map(|i| i.kind.channel_type()).unwrap_or_default();
        let after = input.as_ref().map(|i| i.kind.channel_type()).unwrap_or_default();
        *slot = input;
        if before != after {
            self.dirty = true;
        }
        true
    }

    pub fn outputs(&self) -> &[Option<SlotRef>; MAX_CHANNELS] {
        &self.outputs
    }

    /// The slot this pass renders into, if any.
    pub fn output_slot(&self) -> Option<SlotRef> {
        self.outputs.iter().flatten().next().copied()
    }

    pub fn set_output(&mut self, channel: usize, output: Option<SlotRef>) -> bool {
        if output.is_some() && !self.pass_type.can_declare_outputs() {
            return false;
        }
        match self.outputs.get_mut(channel) {
            Some(slot) => {
                *slot = output;
                true
            }
            None => false,
        }
    }

    pub fn program(&self) -> Option<ProgramId> {
        self.program
    }

    /// The program to draw with; a pass whose last compile failed keeps its
    /// previous program but does not run it.
    pub fn runnable_program(&self) -> Option<ProgramId> {
        if self.status.error { None } else { self.program }
    }

    pub fn compile_status(&self) -> &CompileStatus {
        &self.status
    }

    pub fn compile_error(&self) -> bool {
        self.status.error
    }

    pub fn compile_error_text(&self) -> &str {
        &self.status.log
    }

    pub fn error_lines(&self) -> &[ErrorLine] {
        &self.status.lines
    }

    /// Build a compile request and tag it with a fresh sequence number.
    pub(crate) fn compile_request(&mut self, common_sources: &[String], prevent_cache: bool) -> (u64, CompileRequest) {
        self.compile_sequence += 1;
        self.dirty = false;
        let channels = std::array::from_fn(|i| {
            self.inputs[i]
                .as_ref()
                .map(|input| input.kind.channel_type())
                .unwrap_or_default()
        });
        let request = CompileRequest {
            pass_type: self.pass_type,
            common_sources: common_sources.to_vec(),
            source: self.source.clone(),
            channels,
            prevent_cache,
        };
        (self.compile_sequence, request)
    }

    /// Store a compile result. Returns `None` when the result belongs to an
    /// older request than the latest one issued and was discarded, otherwise
    /// whether the pass now holds a runnable program.
    pub(crate) fn apply_compile_result<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        sequence: u64,
        result: Result<CompiledShader, CompileFailure>,
    ) -> Option<bool> {
        if sequence != self.compile_sequence {
            debug!(
                pass = %self.name,
                sequence,
                latest = self.compile_sequence,
                "[compile] discarding stale completion"
            );
            return None;
        }
        match result {
            Ok(shader) => match backend.create_program(&shader) {
                Ok(program) => {
                    if let Some(old) = self.program.replace(program) {
                        backend.destroy_program(old);
                    }
                    self.status = CompileStatus::default();
                }
                Err(e) => {
                    self.status = CompileStatus {
                        error: true,
                        log: format!("ERROR: 0:0:{e:#}"),
                        lines: vec![ErrorLine {
                            line: None,
                            message: format!("{e:#}"),
                        }],
                    };
                }
            },
            Err(failure) => {
                self.status = CompileStatus {
                    error: true,
                    lines: failure.error_lines(),
                    log: failure.log,
                };
            }
        }
        Some(!self.status.error)
    }

    /// Common code has nothing to compile on its own; it only feeds the other
    /// passes.
    pub(crate) fn mark_common_compiled(&mut self) {
        self.compile_sequence += 1;
        self.dirty = false;
        self.status = CompileStatus::default();
    }

    pub(crate) fn release_program<B: GraphicsBackend>(&mut self, backend: &mut B) {
        if let Some(program) = self.program.take() {
            backend.destroy_program(program);
        }
    }

    /// Resolve all declared inputs to channel bindings. Pool slots bind their
    /// currently readable side and pick up the channel's filter/wrap.
    pub(crate) fn bind_channels<B: GraphicsBackend>(
        &self,
        backend: &mut B,
        pool: &mut ResourcePool,
        ctx: &FrameContext<'_>,
    ) -> ([Option<ChannelBinding>; MAX_CHANNELS], ShaderUniforms) {
        let mut uniforms = ctx.uniforms;
        let mut channels: [Option<ChannelBinding>; MAX_CHANNELS] = [None; MAX_CHANNELS];

        for (i, input) in self.inputs.iter().enumerate() {
            let Some(input) = input else {
                continue;
            };
            let resolved = match (&input.source, input.kind) {
                (InputSource::Slot(slot), _) => {
                    pool.apply_sampler(backend, *slot, input.sampler.filter, input.sampler.wrap);
                    pool.slot(*slot).and_then(|s| {
                        let side = s.readable()?;
                        let [w, h] = s.resolution();
                        Some(ExternalTexture {
                            texture: side.texture,
                            kind: slot.texture_kind(),
                            resolution: [w as f32, h as f32, 1.0],
                            time: 0.0,
                        })
                    })
                }
                (InputSource::Asset(_), InputKind::Keyboard) => Some(ctx.keyboard),
                (InputSource::Asset(_), _) => ctx
                    .external
                    .and_then(|ext| ext.resolve(ctx.pass_index, i, input)),
            };
            let Some(tex) = resolved else {
                continue;
            };
            uniforms.channel_resolution[i] = [tex.resolution[0], tex.resolution[1], tex.resolution[2], 0.0];
            uniforms.channel_time[i] = tex.time;
            channels[i] = Some(ChannelBinding {
                texture: tex.texture,
                kind: tex.kind,
                filter: input.sampler.filter,
                wrap: input.sampler.wrap,
                vflip: input.sampler.vflip,
            });
        }
        (channels, uniforms)
    }

    /// Render this pass into its output slot (buffer or cubemap) and flip the
    /// slot. Returns whether anything was drawn.
    pub fn execute<B: GraphicsBackend>(
        &self,
        backend: &mut B,
        pool: &mut ResourcePool,
        ctx: &FrameContext<'_>,
    ) -> anyhow::Result<bool> {
        let Some(program) = self.runnable_program() else {
            return Ok(false);
        };
        let Some(slot) = self.output_slot() else {
            return Ok(false);
        };
        let (target, [w, h]) = match pool.slot(slot) {
            Some(s) => match s.writable() {
                Some(side) => (side.target, s.resolution()),
                None => {
                    warn!(pass = %self.name, ?slot, "[frame] output slot is not allocated");
                    return Ok(false);
                }
            },
            None => return Ok(false),
        };

        let (channels, mut uniforms) = self.bind_channels(backend, pool, ctx);
        uniforms.resolution = [w as f32, h as f32, 1.0, 0.0];

        for face in slot.faces() {
            uniforms.face = face.map(i32::from).unwrap_or(0);
            backend.draw(&DrawCall {
                program,
                target,
                face,
                viewport: Viewport::full(w, h),
                uniforms,
                channels,
            })?;
        }
        pool.flip(slot);
        Ok(true)
    }

    /// Render the image pass into the presentation surface.
    pub fn execute_to_surface<B: GraphicsBackend>(
        &self,
        backend: &mut B,
        pool: &mut ResourcePool,
        ctx: &FrameContext<'_>,
    ) -> anyhow::Result<bool> {
        let Some(program) = self.runnable_program() else {
            return Ok(false);
        };
        let (channels, uniforms) = self.bind_channels(backend, pool, ctx);
        let viewport = Viewport::full(uniforms.resolution[0] as u32, uniforms.resolution[1] as u32);
        let target = backend.surface_target();
        backend.draw(&DrawCall {
            program,
            target,
            face: None,
            viewport,
            uniforms,
            channels,
        })?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer_pass() -> Pass {
        Pass::new(PassKey(1), PassType::Buffer, "Buffer A", PassType::Buffer.template_source())
    }

    #[test]
    fn only_buffer_and_cubemap_passes_take_outputs() {
        let mut image = Pass::new(PassKey(0), PassType::Image, "Image", "");
        assert!(!image.set_output(0, Some(SlotRef::Buffer(0))));
        assert!(image.output_slot().is_none());

        let mut buffer = buffer_pass();
        assert!(buffer.set_output(0, Some(SlotRef::Buffer(2))));
        assert_eq!(buffer.output_slot(), Some(SlotRef::Buffer(2)));
        assert!(!buffer.set_output(4, Some(SlotRef::Buffer(2))));
    }

    #[test]
    fn changing_channel_type_marks_dirty() {
        let mut pass = buffer_pass();
        let _ = pass.compile_request(&[], false);
        assert!(!pass.is_dirty());

        let input = PassInput {
            kind: InputKind::Buffer,
            source: InputSource::Slot(SlotRef::Buffer(0)),
            filepath: String::new(),
            sampler: Sampler::default(),
        };
        pass.set_input(0, Some(input.clone()));
        assert!(!pass.is_dirty(), "buffer input keeps the 2D declaration");

        pass.set_input(
            0,
            Some(PassInput {
                kind: InputKind::Cubemap,
                source: InputSource::Slot(SlotRef::Cubemap(0)),
                ..input
            }),
        );
        assert!(pass.is_dirty());
    }

    #[test]
    fn sampler_booleans_accept_strings_and_bools() {
        let from_text: Sampler =
            serde_json::from_str(r#"{"filter":"linear","wrap":"clamp","vflip":"false","srgb":"true","internal":"byte"}"#)
                .unwrap();
        assert!(!from_text.vflip);
        assert!(from_text.srgb);

        let from_bool: Sampler = serde_json::from_str(r#"{"filter":"nearest","vflip":true}"#).unwrap();
        assert!(from_bool.vflip);
        assert_eq!(from_bool.wrap, WrapMode::Repeat);

        let json = serde_json::to_value(from_text).unwrap();
        assert_eq!(json["vflip"], "false");
    }
}
