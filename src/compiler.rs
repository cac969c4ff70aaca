//! Shader compiler contract, source composition and error-log parsing.

pub mod naga_glsl;
pub mod orchestrator;

use std::fmt::Write as _;

use crate::pass::PassType;
use crate::sound::SOUND_TEXTURE_SIZE;

/// How a channel is declared in the composed source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChannelType {
    #[default]
    D2,
    D3,
    Cube,
}

impl ChannelType {
    fn glsl_types(self) -> (&'static str, &'static str) {
        match self {
            ChannelType::D2 => ("texture2D", "sampler2D"),
            ChannelType::D3 => ("texture3D", "sampler3D"),
            ChannelType::Cube => ("textureCube", "samplerCube"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileRequest {
    pub pass_type: PassType,
    pub common_sources: Vec<String>,
    pub source: String,
    pub channels: [ChannelType; 4],
    pub prevent_cache: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedSource {
    pub text: String,
    /// Lines preceding the first line of the pass source.
    pub user_line_offset: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledShader {
    pub glsl: String,
    pub wgsl: Option<String>,
    pub user_line_offset: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{log}")]
pub struct CompileFailure {
    /// Newline separated entries of the form `ERROR: 0:<line>:<message>`.
    pub log: String,
    pub user_line_offset: u32,
}

impl CompileFailure {
    pub fn error_lines(&self) -> Vec<ErrorLine> {
        parse_error_log(&self.log, self.user_line_offset)
    }
}

/// Request/response compiler. Implementations must be callable from several
/// threads at once; the orchestrator issues one call per pass.
pub trait ShaderCompiler: Send + Sync {
    fn compile(&self, request: &CompileRequest) -> Result<CompiledShader, CompileFailure>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorLine {
    /// 1-based line in the pass source, `None` when the error points at
    /// generated code or common code.
    pub line: Option<u32>,
    pub message: String,
}

/// Parse a colon-delimited compiler log (`prefix:prefix:line:message`).
pub fn parse_error_log(log: &str, user_line_offset: u32) -> Vec<ErrorLine> {
    let mut out = Vec::new();
    for raw in log.lines() {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        let parts: Vec<&str> = raw.split(':').collect();
        let absolute = parts.get(2).and_then(|p| p.trim().parse::<u32>().ok());
        match absolute {
            Some(abs) if parts.len() >= 4 => {
                let line = abs.checked_sub(user_line_offset).filter(|l| *l >= 1);
                out.push(ErrorLine {
                    line,
                    message: parts[3..].join(":").trim().to_string(),
                });
            }
            _ => out.push(ErrorLine {
                line: None,
                message: raw.to_string(),
            }),
        }
    }
    out
}

const UNIFORM_BLOCK: &str = "\
layout(set = 0, binding = 0) uniform ShaderUniforms {
    vec4 _resolution;
    vec4 iMouse;
    vec4 iDate;
    vec4 iChannelResolution[4];
    vec4 iChannelTime;
    float iTime;
    float iTimeDelta;
    float iFrameRate;
    int iFrame;
    float iSampleRate;
    int _face;
    float _blockOffset;
    float _pad;
};
#define iResolution _resolution.xyz
";

/// Build the full source handed to the compiler for one pass.
///
/// Layout: version line, uniform block, channel declarations, fragment
/// output, common sources, pass source, entry wrapper.
pub fn compose_source(request: &CompileRequest) -> ComposedSource {
    let mut text = String::from("#version 450\n");
    text.push_str(UNIFORM_BLOCK);

    for (i, channel) in request.channels.iter().enumerate() {
        let (texture_ty, sampler_ty) = channel.glsl_types();
        let tex_binding = i * 2;
        let smp_binding = i * 2 + 1;
        let _ = writeln!(
            text,
            "layout(set = 1, binding = {tex_binding}) uniform {texture_ty} _iChannel{i}_tex;"
        );
        let _ = writeln!(
            text,
            "layout(set = 1, binding = {smp_binding}) uniform sampler _iChannel{i}_smp;"
        );
        let _ = writeln!(
            text,
            "#define iChannel{i} {sampler_ty}(_iChannel{i}_tex, _iChannel{i}_smp)"
        );
    }
    text.push_str("layout(location = 0) out vec4 _fragColor;\n");

    for common in &request.common_sources {
        text.push_str(common);
        if !common.ends_with('\n') {
            text.push('\n');
        }
    }

    let user_line_offset = text.matches('\n').count() as u32;
    text.push_str(&request.source);
    if !request.source.ends_with('\n') {
        text.push('\n');
    }
    text.push_str(&entry_wrapper(request.pass_type));

    ComposedSource {
        text,
        user_line_offset,
    }
}

fn entry_wrapper(pass_type: PassType) -> String {
    match pass_type {
        PassType::Image | PassType::Buffer | PassType::Common => "\
void main() {
    vec4 color = vec4(0.0, 0.0, 0.0, 1.0);
    mainImage(color, gl_FragCoord.xy);
    _fragColor = color;
}
"
        .to_string(),
        PassType::Cubemap => "\
void main() {
    vec2 p = gl_FragCoord.xy / iResolution.xy * 2.0 - 1.0;
    vec3 dir = vec3(1.0, -p.y, -p.x);
    if (_face == 1) { dir = vec3(-1.0, -p.y, p.x); }
    if (_face == 2) { dir = vec3(p.x, 1.0, p.y); }
    if (_face == 3) { dir = vec3(p.x, -1.0, -p.y); }
    if (_face == 4) { dir = vec3(p.x, -p.y, 1.0); }
    if (_face == 5) { dir = vec3(-p.x, -p.y, -1.0); }
    vec4 color = vec4(0.0);
    mainCubemap(color, gl_FragCoord.xy, vec3(0.0), normalize(dir));
    _fragColor = color;
}
"
        .to_string(),
        PassType::Sound => format!(
            "\
void main() {{
    float index = floor(gl_FragCoord.x) + floor(gl_FragCoord.y) * {size}.0;
    int samp = int(_blockOffset * iSampleRate + index);
    float t = _blockOffset + index / iSampleRate;
    vec2 y = clamp(mainSound(samp, t), -1.0, 1.0);
    vec2 v = floor((0.5 + 0.5 * y) * 65535.0);
    vec2 lo = mod(v, 256.0) / 255.0;
    vec2 hi = floor(v / 256.0) / 255.0;
    _fragColor = vec4(lo.x, hi.x, lo.y, hi.y);
}}
",
            size = SOUND_TEXTURE_SIZE
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(source: &str) -> CompileRequest {
        CompileRequest {
            pass_type: PassType::Image,
            common_sources: vec!["float shared() { return 1.0; }".to_string()],
            source: source.to_string(),
            channels: [ChannelType::D2, ChannelType::Cube, ChannelType::D2, ChannelType::D3],
            prevent_cache: false,
        }
    }

    #[test]
    fn composed_source_places_pass_source_after_offset() {
        let composed = compose_source(&request("// first\n// second"));
        let lines: Vec<&str> = composed.text.lines().collect();
        assert_eq!(lines[composed.user_line_offset as usize], "// first");
        assert_eq!(lines[composed.user_line_offset as usize + 1], "// second");
        assert!(composed.text.contains("float shared()"));
        assert!(composed.text.contains("uniform textureCube _iChannel1_tex"));
        assert!(composed.text.contains("uniform texture3D _iChannel3_tex"));
    }

    #[test]
    fn error_log_lines_are_rebased_to_pass_source() {
        let lines = parse_error_log("ERROR: 0:42: 'foo' : undeclared identifier\n", 40);
        assert_eq!(
            lines,
            vec![ErrorLine {
                line: Some(2),
                message: "'foo' : undeclared identifier".to_string(),
            }]
        );
    }

    #[test]
    fn error_log_lines_in_generated_code_have_no_line() {
        let lines = parse_error_log("ERROR: 0:3:bad header\nsomething unstructured", 40);
        assert_eq!(lines[0].line, None);
        assert_eq!(lines[0].message, "bad header");
        assert_eq!(lines[1].line, None);
        assert_eq!(lines[1].message, "something unstructured");
    }
}
