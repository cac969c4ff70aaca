//! Graphics backend contract consumed by the pipeline.
//!
//! The engine never talks to a graphics API directly. Everything it needs
//! (textures, render targets, programs, full-screen draws, mipmaps and pixel
//! read-back) goes through [`GraphicsBackend`]. [`headless::HeadlessBackend`]
//! is a CPU reference implementation used by the CLI and the tests.

pub mod headless;

use anyhow::Result;
use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use crate::compiler::CompiledShader;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RenderTargetId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureKind {
    D2,
    D3,
    Cube,
}

impl TextureKind {
    pub fn face_count(self) -> usize {
        match self {
            TextureKind::Cube => 6,
            TextureKind::D2 | TextureKind::D3 => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    R8,
    Rgba8,
    Rgba16F,
    Rgba32F,
}

/// Sampling filter. `Mipmap` means trilinear sampling and requires the
/// sampled texture to carry an up-to-date mip chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    Nearest,
    Linear,
    #[default]
    Mipmap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WrapMode {
    Clamp,
    #[default]
    Repeat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDesc {
    pub kind: TextureKind,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub filter: FilterMode,
    pub wrap: WrapMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Viewport {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }
}

/// Per-draw uniform block. Layout mirrors the `ShaderUniforms` block emitted by
/// [`crate::compiler::compose_source`].
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct ShaderUniforms {
    pub resolution: [f32; 4],
    pub mouse: [f32; 4],
    pub date: [f32; 4],
    pub channel_resolution: [[f32; 4]; 4],
    pub channel_time: [f32; 4],
    pub time: f32,
    pub time_delta: f32,
    pub frame_rate: f32,
    pub frame: i32,
    pub sample_rate: f32,
    pub face: i32,
    pub block_offset: f32,
    pub _pad: f32,
}

/// A texture bound to one of the four input channels of a draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelBinding {
    pub texture: TextureId,
    pub kind: TextureKind,
    pub filter: FilterMode,
    pub wrap: WrapMode,
    pub vflip: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DrawCall {
    pub program: ProgramId,
    pub target: RenderTargetId,
    /// Cube face being rendered, `None` for 2D targets.
    pub face: Option<u8>,
    pub viewport: Viewport,
    pub uniforms: ShaderUniforms,
    pub channels: [Option<ChannelBinding>; 4],
}

pub trait GraphicsBackend {
    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureId>;
    fn destroy_texture(&mut self, texture: TextureId);
    fn set_sampler(&mut self, texture: TextureId, filter: FilterMode, wrap: WrapMode);
    /// Replace the full contents of a texture with tightly packed texel bytes.
    fn upload_texture(&mut self, texture: TextureId, bytes: &[u8]) -> Result<()>;

    fn create_render_target(&mut self, texture: TextureId) -> Result<RenderTargetId>;
    fn destroy_render_target(&mut self, target: RenderTargetId);

    /// The presentation surface the image pass draws into.
    fn surface_target(&self) -> RenderTargetId;
    fn resize_surface(&mut self, width: u32, height: u32) -> Result<()>;

    fn create_program(&mut self, shader: &CompiledShader) -> Result<ProgramId>;
    /// Full-screen copy program sampling channel 0 with nearest filtering.
    fn create_copy_program(&mut self) -> Result<ProgramId>;
    fn destroy_program(&mut self, program: ProgramId);

    /// Clear a render target. `face: None` clears every face of a cube target.
    fn clear(&mut self, target: RenderTargetId, face: Option<u8>, color: [f32; 4]) -> Result<()>;
    fn draw(&mut self, call: &DrawCall) -> Result<()>;
    fn generate_mipmaps(&mut self, texture: TextureId) -> Result<()>;
    fn read_pixels(
        &mut self,
        target: RenderTargetId,
        face: Option<u8>,
        rect: Viewport,
    ) -> Result<Vec<[f32; 4]>>;
}
