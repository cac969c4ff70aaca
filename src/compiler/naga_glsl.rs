//! GLSL validation and WGSL translation using the naga library.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

use tracing::debug;

use super::{CompileFailure, CompileRequest, CompiledShader, ComposedSource, ShaderCompiler, compose_source};

/// Compiles pass sources through naga's GLSL frontend, validates the module
/// and writes WGSL. Results are cached by composed-source hash; requests with
/// `prevent_cache` always recompile and refresh the cache entry.
#[derive(Debug, Default)]
pub struct NagaGlslCompiler {
    cache: Mutex<HashMap<u64, Result<CompiledShader, CompileFailure>>>,
}

impl NagaGlslCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }
}

impl ShaderCompiler for NagaGlslCompiler {
    fn compile(&self, request: &CompileRequest) -> Result<CompiledShader, CompileFailure> {
        let composed = compose_source(request);
        let key = source_hash(&composed.text);

        if !request.prevent_cache {
            let hit = self.cache.lock().ok().and_then(|c| c.get(&key).cloned());
            if let Some(hit) = hit {
                debug!(pass_type = request.pass_type.as_str(), "[compile] cache hit");
                return hit;
            }
        }

        let result = translate(&composed);
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(key, result.clone());
        }
        result
    }
}

fn source_hash(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}

fn translate(composed: &ComposedSource) -> Result<CompiledShader, CompileFailure> {
    let failure = |log: String| CompileFailure {
        log,
        user_line_offset: composed.user_line_offset,
    };

    let mut frontend = naga::front::glsl::Frontend::default();
    let options = naga::front::glsl::Options {
        stage: naga::ShaderStage::Fragment,
        defines: Default::default(),
    };
    let module = frontend
        .parse(&options, &composed.text)
        .map_err(|e| failure(format_parse_errors(&composed.text, &e)))?;

    let info = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|e| {
        let line = e
            .location(&composed.text)
            .map(|loc| loc.line_number)
            .unwrap_or(0);
        failure(format!("ERROR: 0:{line}:{}", flatten(&e.as_inner().to_string())))
    })?;

    let wgsl = naga::back::wgsl::write_string(
        &module,
        &info,
        naga::back::wgsl::WriterFlags::EXPLICIT_TYPES,
    )
    .map_err(|e| failure(format!("ERROR: 0:0:WGSL writer failed: {e:?}")))?;

    Ok(CompiledShader {
        glsl: composed.text.clone(),
        wgsl: Some(wgsl),
        user_line_offset: composed.user_line_offset,
    })
}

/// One `ERROR: 0:<line>:<message>` entry per frontend error.
fn format_parse_errors(source: &str, error: &naga::front::glsl::ParseError) -> String {
    let mut out = String::new();
    for e in &error.errors {
        let loc = e.meta.location(source);
        out.push_str(&format!(
            "ERROR: 0:{}:{}\n",
            loc.line_number,
            flatten(&e.kind.to_string())
        ));
    }
    if out.is_empty() {
        out.push_str("ERROR: 0:0:unknown GLSL parse failure\n");
    }
    out
}

fn flatten(message: &str) -> String {
    message.replace('\n', " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ChannelType;
    use crate::pass::PassType;

    fn image_request(source: &str) -> CompileRequest {
        CompileRequest {
            pass_type: PassType::Image,
            common_sources: Vec::new(),
            source: source.to_string(),
            channels: [ChannelType::D2; 4],
            prevent_cache: false,
        }
    }

    #[test]
    fn test_valid_image_pass() {
        let source = "\
void mainImage(out vec4 fragColor, in vec2 fragCoord) {
    vec2 uv = fragCoord / iResolution.xy;
    fragColor = vec4(uv, 0.5 + 0.5 * sin(iTime), 1.0);
}
";
        let compiled = NagaGlslCompiler::new().compile(&image_request(source));
        assert!(compiled.is_ok(), "{compiled:?}");
        assert!(compiled.unwrap().wgsl.is_some());
    }

    #[test]
    fn test_undeclared_identifier_reports_pass_line() {
        let source = "\
void mainImage(out vec4 fragColor, in vec2 fragCoord) {
    fragColor = vec4(undeclaredThing);
}
";
        let err = NagaGlslCompiler::new()
            .compile(&image_request(source))
            .unwrap_err();
        let lines = err.error_lines();
        assert!(!lines.is_empty());
        assert_eq!(lines[0].line, Some(2), "{lines:?}");
    }

    #[test]
    fn test_cache_is_bypassed_when_prevented() {
        let compiler = NagaGlslCompiler::new();
        let source = "void mainImage(out vec4 c, in vec2 p) { c = vec4(1.0); }\n";
        let _ = compiler.compile(&image_request(source));
        assert_eq!(compiler.cached_entries(), 1);

        let mut again = image_request(source);
        again.prevent_cache = true;
        let _ = compiler.compile(&again);
        assert_eq!(compiler.cached_entries(), 1);
    }
}
