#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{Result, bail};
use effect_forge::backend::headless::{BackendCommand, HeadlessBackend};
use effect_forge::backend::{
    DrawCall, FilterMode, GraphicsBackend, ProgramId, RenderTargetId, TextureDesc, TextureId, Viewport, WrapMode,
};
use effect_forge::compiler::{CompileFailure, CompileRequest, CompiledShader, ShaderCompiler, compose_source};
use effect_forge::config::EngineConfig;
use effect_forge::document::EffectDocument;
use effect_forge::pipeline::Pipeline;

/// Source containing this marker fails to compile, reporting the marker's line.
pub const FAIL: &str = "FAIL_COMPILE";
/// Source containing this marker takes a while to compile.
pub const SLOW: &str = "SLOW_COMPILE";

/// Compiler double that accepts everything except sources carrying [`FAIL`].
#[derive(Default)]
pub struct ScriptedCompiler {
    calls: AtomicUsize,
}

impl ScriptedCompiler {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ShaderCompiler for ScriptedCompiler {
    fn compile(&self, request: &CompileRequest) -> Result<CompiledShader, CompileFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if request.source.contains(SLOW) {
            thread::sleep(Duration::from_millis(100));
        }
        let composed = compose_source(request);
        if let Some(index) = request.source.lines().position(|l| l.contains(FAIL)) {
            let absolute = composed.user_line_offset + index as u32 + 1;
            return Err(CompileFailure {
                log: format!("ERROR: 0:{absolute}:'{FAIL}' : undeclared identifier\n"),
                user_line_offset: composed.user_line_offset,
            });
        }
        Ok(CompiledShader {
            glsl: composed.text,
            wgsl: None,
            user_line_offset: composed.user_line_offset,
        })
    }
}

pub fn small_config() -> EngineConfig {
    EngineConfig {
        initial_resolution: [8, 4],
        cubemap_resolution: 4,
        ..EngineConfig::default()
    }
}

pub fn pipeline_with(config: EngineConfig) -> (Pipeline<HeadlessBackend>, Arc<ScriptedCompiler>) {
    let compiler = Arc::new(ScriptedCompiler::default());
    let pipeline = Pipeline::new(HeadlessBackend::new(), compiler.clone(), config).expect("create pipeline");
    (pipeline, compiler)
}

pub fn pipeline() -> (Pipeline<HeadlessBackend>, Arc<ScriptedCompiler>) {
    pipeline_with(small_config())
}

pub fn doc(json: &str) -> EffectDocument {
    EffectDocument::from_json_str(json).expect("parse test document")
}

/// Buffer A feeding back into itself, read by the image pass.
pub const FEEDBACK_DOC: &str = r#"{
    "ver": "0.1",
    "renderpass": [
        { "type": "buffer", "name": "Buffer A",
          "code": "void mainImage(out vec4 c, in vec2 p) { c = texelFetch(iChannel0, ivec2(p), 0) + 1.0; }",
          "inputs": [ { "channel": 0, "type": "buffer", "id": "4dXGR8",
                        "sampler": { "filter": "nearest", "wrap": "clamp", "vflip": "true" } } ],
          "outputs": [ { "channel": 0, "id": "4dXGR8" } ] },
        { "type": "image", "name": "Image",
          "code": "void mainImage(out vec4 c, in vec2 p) { c = texture(iChannel0, p / iResolution.xy); }",
          "inputs": [ { "channel": 0, "type": "buffer", "id": "4dXGR8",
                        "sampler": { "filter": "nearest", "wrap": "clamp", "vflip": "true" } } ],
          "outputs": [] }
    ]
}"#;

/// Load and synchronously compile a document.
pub fn loaded(json: &str) -> (Pipeline<HeadlessBackend>, Arc<ScriptedCompiler>) {
    let (mut pipeline, compiler) = pipeline();
    pipeline.load(&doc(json)).expect("load document");
    pipeline.compile_all(false, |_| {});
    pipeline.wait_for_compiles();
    (pipeline, compiler)
}

/// `(target texture, channel textures, frame)` of every shader draw, in order.
pub fn draws(commands: &[BackendCommand]) -> Vec<(TextureId, [Option<TextureId>; 4], i32)> {
    commands
        .iter()
        .filter_map(|c| match c {
            BackendCommand::Draw {
                texture,
                channels,
                frame,
                ..
            } => Some((*texture, *channels, *frame)),
            _ => None,
        })
        .collect()
}

/// Headless backend that can be told to fail individual operations.
#[derive(Default)]
pub struct FaultyBackend {
    pub inner: HeadlessBackend,
    pub fail_programs: bool,
    pub fail_mipmaps: bool,
}

impl GraphicsBackend for FaultyBackend {
    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureId> {
        self.inner.create_texture(desc)
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        self.inner.destroy_texture(texture)
    }

    fn set_sampler(&mut self, texture: TextureId, filter: FilterMode, wrap: WrapMode) {
        self.inner.set_sampler(texture, filter, wrap)
    }

    fn upload_texture(&mut self, texture: TextureId, bytes: &[u8]) -> Result<()> {
        self.inner.upload_texture(texture, bytes)
    }

    fn create_render_target(&mut self, texture: TextureId) -> Result<RenderTargetId> {
        self.inner.create_render_target(texture)
    }

    fn destroy_render_target(&mut self, target: RenderTargetId) {
        self.inner.destroy_render_target(target)
    }

    fn surface_target(&self) -> RenderTargetId {
        self.inner.surface_target()
    }

    fn resize_surface(&mut self, width: u32, height: u32) -> Result<()> {
        self.inner.resize_surface(width, height)
    }

    fn create_program(&mut self, shader: &CompiledShader) -> Result<ProgramId> {
        if self.fail_programs {
            bail!("program link failed");
        }
        self.inner.create_program(shader)
    }

    fn create_copy_program(&mut self) -> Result<ProgramId> {
        self.inner.create_copy_program()
    }

    fn destroy_program(&mut self, program: ProgramId) {
        self.inner.destroy_program(program)
    }

    fn clear(&mut self, target: RenderTargetId, face: Option<u8>, color: [f32; 4]) -> Result<()> {
        self.inner.clear(target, face, color)
    }

    fn draw(&mut self, call: &DrawCall) -> Result<()> {
        self.inner.draw(call)
    }

    fn generate_mipmaps(&mut self, texture: TextureId) -> Result<()> {
        if self.fail_mipmaps {
            bail!("mipmap generation unsupported");
        }
        self.inner.generate_mipmaps(texture)
    }

    fn read_pixels(&mut self, target: RenderTargetId, face: Option<u8>, rect: Viewport) -> Result<Vec<[f32; 4]>> {
        self.inner.read_pixels(target, face, rect)
    }
}

/// Load and compile `json` on a [`FaultyBackend`].
pub fn faulty_loaded(backend: FaultyBackend, json: &str) -> Pipeline<FaultyBackend> {
    let mut pipeline =
        Pipeline::new(backend, Arc::new(ScriptedCompiler::default()), small_config()).expect("create pipeline");
    pipeline.load(&doc(json)).expect("load document");
    pipeline.compile_all(false, |_| {});
    pipeline.wait_for_compiles();
    pipeline
}
