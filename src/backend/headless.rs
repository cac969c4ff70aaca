//! CPU reference backend.
//!
//! Stores texels in memory, executes clears, copy-program blits and uploads
//! exactly, and records every command so callers can inspect what the
//! pipeline asked for. Shader programs are not interpreted: a non-copy draw
//! fills its viewport with `(frame + 1, time, face, 1)`, which is enough to
//! observe scheduling and feedback behaviour.

use std::collections::HashMap;

use anyhow::{Result, anyhow, bail};

use super::{
    DrawCall, FilterMode, GraphicsBackend, ProgramId, RenderTargetId, TextureDesc, TextureFormat,
    TextureId, TextureKind, Viewport, WrapMode,
};
use crate::compiler::CompiledShader;

const SURFACE_TEXTURE: TextureId = TextureId(0);
const SURFACE_TARGET: RenderTargetId = RenderTargetId(0);

#[derive(Debug, Clone, PartialEq)]
pub enum BackendCommand {
    CreateTexture {
        texture: TextureId,
        kind: TextureKind,
        width: u32,
        height: u32,
    },
    DestroyTexture(TextureId),
    Upload(TextureId),
    Clear {
        texture: TextureId,
        face: Option<u8>,
        color: [f32; 4],
    },
    Draw {
        program: ProgramId,
        texture: TextureId,
        face: Option<u8>,
        channels: [Option<TextureId>; 4],
        frame: i32,
    },
    Copy {
        from: TextureId,
        to: TextureId,
        face: Option<u8>,
        width: u32,
        height: u32,
    },
    GenerateMipmaps(TextureId),
}

#[derive(Debug, Clone)]
struct TexelStore {
    desc: TextureDesc,
    faces: Vec<Vec<[f32; 4]>>,
}

impl TexelStore {
    fn new(desc: TextureDesc) -> Self {
        let len = (desc.width as usize) * (desc.height as usize);
        Self {
            desc,
            faces: vec![vec![[0.0; 4]; len]; desc.kind.face_count()],
        }
    }

    fn index(&self, x: u32, y: u32) -> Option<usize> {
        if x >= self.desc.width || y >= self.desc.height {
            return None;
        }
        Some((y as usize) * (self.desc.width as usize) + x as usize)
    }

    fn face_indices(&self, face: Option<u8>) -> Vec<usize> {
        match face {
            Some(f) => vec![f as usize],
            None => (0..self.faces.len()).collect(),
        }
    }

    fn fill(&mut self, face: Option<u8>, rect: Viewport, color: [f32; 4]) {
        for f in self.face_indices(face) {
            for y in rect.y..rect.y.saturating_add(rect.height) {
                for x in rect.x..rect.x.saturating_add(rect.width) {
                    if let Some(i) = self.index(x, y) {
                        if let Some(texels) = self.faces.get_mut(f) {
                            texels[i] = color;
                        }
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
enum HeadlessProgram {
    Copy,
    Shader {
        #[allow(dead_code)]
        glsl_len: usize,
    },
}

#[derive(Debug)]
pub struct HeadlessBackend {
    next_id: u32,
    textures: HashMap<TextureId, TexelStore>,
    targets: HashMap<RenderTargetId, TextureId>,
    programs: HashMap<ProgramId, HeadlessProgram>,
    commands: Vec<BackendCommand>,
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessBackend {
    pub fn new() -> Self {
        let mut textures = HashMap::new();
        textures.insert(
            SURFACE_TEXTURE,
            TexelStore::new(TextureDesc {
                kind: TextureKind::D2,
                width: 1,
                height: 1,
                format: TextureFormat::Rgba8,
                filter: FilterMode::Nearest,
                wrap: WrapMode::Clamp,
            }),
        );
        let mut targets = HashMap::new();
        targets.insert(SURFACE_TARGET, SURFACE_TEXTURE);
        Self {
            next_id: 1,
            textures,
            targets,
            programs: HashMap::new(),
            commands: Vec::new(),
        }
    }

    fn alloc_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn commands(&self) -> &[BackendCommand] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<BackendCommand> {
        std::mem::take(&mut self.commands)
    }

    /// Number of live textures, excluding the presentation surface.
    pub fn live_textures(&self) -> usize {
        self.textures.len() - 1
    }

    pub fn live_programs(&self) -> usize {
        self.programs.len()
    }

    pub fn texture_desc(&self, texture: TextureId) -> Option<TextureDesc> {
        self.textures.get(&texture).map(|t| t.desc)
    }

    pub fn texture_of(&self, target: RenderTargetId) -> Option<TextureId> {
        self.targets.get(&target).copied()
    }

    pub fn surface_texture(&self) -> TextureId {
        SURFACE_TEXTURE
    }

    pub fn pixel(&self, texture: TextureId, face: usize, x: u32, y: u32) -> Option<[f32; 4]> {
        let store = self.textures.get(&texture)?;
        let i = store.index(x, y)?;
        store.faces.get(face).map(|texels| texels[i])
    }

    /// Overwrite texels directly, bypassing the command log. Rows are
    /// `width` texels long, starting at the origin.
    pub fn write_pixels(&mut self, texture: TextureId, face: usize, texels: &[[f32; 4]]) -> Result<()> {
        let store = self
            .textures
            .get_mut(&texture)
            .ok_or_else(|| anyhow!("unknown texture {texture:?}"))?;
        let dst = store
            .faces
            .get_mut(face)
            .ok_or_else(|| anyhow!("texture {texture:?} has no face {face}"))?;
        if texels.len() > dst.len() {
            bail!(
                "write of {} texels exceeds texture {texture:?} size {}",
                texels.len(),
                dst.len()
            );
        }
        dst[..texels.len()].copy_from_slice(texels);
        Ok(())
    }

    fn store_for_target(&mut self, target: RenderTargetId) -> Result<(TextureId, &mut TexelStore)> {
        let texture = *self
            .targets
            .get(&target)
            .ok_or_else(|| anyhow!("unknown render target {target:?}"))?;
        let store = self
            .textures
            .get_mut(&texture)
            .ok_or_else(|| anyhow!("render target {target:?} points at a destroyed texture"))?;
        Ok((texture, store))
    }

    fn copy_texels(&mut self, from: TextureId, to: TextureId, face: Option<u8>, rect: Viewport) -> Result<()> {
        let src = self
            .textures
            .get(&from)
            .cloned()
            .ok_or_else(|| anyhow!("copy source {from:?} does not exist"))?;
        let dst = self
            .textures
            .get_mut(&to)
            .ok_or_else(|| anyhow!("copy destination {to:?} does not exist"))?;
        for f in dst.face_indices(face) {
            let Some(src_face) = src.faces.get(f) else {
                continue;
            };
            for y in rect.y..rect.y.saturating_add(rect.height) {
                for x in rect.x..rect.x.saturating_add(rect.width) {
                    let (Some(si), Some(di)) = (src.index(x, y), dst.index(x, y)) else {
                        continue;
                    };
                    dst.faces[f][di] = src_face[si];
                }
            }
        }
        Ok(())
    }
}

impl GraphicsBackend for HeadlessBackend {
    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureId> {
        if desc.width == 0 || desc.height == 0 {
            bail!("cannot create a {}x{} texture", desc.width, desc.height);
        }
        let texture = TextureId(self.alloc_id());
        self.textures.insert(texture, TexelStore::new(*desc));
        self.commands.push(BackendCommand::CreateTexture {
            texture,
            kind: desc.kind,
            width: desc.width,
            height: desc.height,
        });
        Ok(texture)
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        if texture == SURFACE_TEXTURE {
            return;
        }
        if self.textures.remove(&texture).is_some() {
            self.commands.push(BackendCommand::DestroyTexture(texture));
        }
    }

    fn set_sampler(&mut self, texture: TextureId, filter: FilterMode, wrap: WrapMode) {
        if let Some(store) = self.textures.get_mut(&texture) {
            store.desc.filter = filter;
            store.desc.wrap = wrap;
        }
    }

    fn upload_texture(&mut self, texture: TextureId, bytes: &[u8]) -> Result<()> {
        let store = self
            .textures
            .get_mut(&texture)
            .ok_or_else(|| anyhow!("upload to unknown texture {texture:?}"))?;
        let channels = match store.desc.format {
            TextureFormat::R8 => 1,
            _ => 4,
        };
        let expected = store.faces[0].len() * channels;
        if bytes.len() != expected {
            bail!(
                "upload of {} bytes does not match texture {texture:?} ({expected} bytes)",
                bytes.len()
            );
        }
        for (texel, chunk) in store.faces[0].iter_mut().zip(bytes.chunks(channels)) {
            let mut rgba = [0.0, 0.0, 0.0, 1.0];
            for (dst, b) in rgba.iter_mut().zip(chunk) {
                *dst = *b as f32 / 255.0;
            }
            *texel = rgba;
        }
        self.commands.push(BackendCommand::Upload(texture));
        Ok(())
    }

    fn create_render_target(&mut self, texture: TextureId) -> Result<RenderTargetId> {
        if !self.textures.contains_key(&texture) {
            bail!("render target over unknown texture {texture:?}");
        }
        let target = RenderTargetId(self.alloc_id());
        self.targets.insert(target, texture);
        Ok(target)
    }

    fn destroy_render_target(&mut self, target: RenderTargetId) {
        if target != SURFACE_TARGET {
            self.targets.remove(&target);
        }
    }

    fn surface_target(&self) -> RenderTargetId {
        SURFACE_TARGET
    }

    fn resize_surface(&mut self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            bail!("cannot resize surface to {width}x{height}");
        }
        let desc = TextureDesc {
            width,
            height,
            ..self.textures[&SURFACE_TEXTURE].desc
        };
        self.textures.insert(SURFACE_TEXTURE, TexelStore::new(desc));
        Ok(())
    }

    fn create_program(&mut self, shader: &CompiledShader) -> Result<ProgramId> {
        let program = ProgramId(self.alloc_id());
        self.programs.insert(
            program,
            HeadlessProgram::Shader {
                glsl_len: shader.glsl.len(),
            },
        );
        Ok(program)
    }

    fn create_copy_program(&mut self) -> Result<ProgramId> {
        let program = ProgramId(self.alloc_id());
        self.programs.insert(program, HeadlessProgram::Copy);
        Ok(program)
    }

    fn destroy_program(&mut self, program: ProgramId) {
        self.programs.remove(&program);
    }

    fn clear(&mut self, target: RenderTargetId, face: Option<u8>, color: [f32; 4]) -> Result<()> {
        let (texture, store) = self.store_for_target(target)?;
        let rect = Viewport::full(store.desc.width, store.desc.height);
        store.fill(face, rect, color);
        self.commands.push(BackendCommand::Clear {
            texture,
            face,
            color,
        });
        Ok(())
    }

    fn draw(&mut self, call: &DrawCall) -> Result<()> {
        let program = self
            .programs
            .get(&call.program)
            .cloned()
            .ok_or_else(|| anyhow!("draw with unknown program {:?}", call.program))?;
        let texture = *self
            .targets
            .get(&call.target)
            .ok_or_else(|| anyhow!("draw into unknown render target {:?}", call.target))?;

        match program {
            HeadlessProgram::Copy => {
                let from = call.channels[0]
                    .map(|c| c.texture)
                    .ok_or_else(|| anyhow!("copy program needs channel 0"))?;
                self.copy_texels(from, texture, call.face, call.viewport)?;
                self.commands.push(BackendCommand::Copy {
                    from,
                    to: texture,
                    face: call.face,
                    width: call.viewport.width,
                    height: call.viewport.height,
                });
            }
            HeadlessProgram::Shader { .. } => {
                let color = [
                    call.uniforms.frame as f32 + 1.0,
                    call.uniforms.time,
                    call.face.map(f32::from).unwrap_or(0.0),
                    1.0,
                ];
                let (_, store) = self.store_for_target(call.target)?;
                store.fill(call.face, call.viewport, color);
                self.commands.push(BackendCommand::Draw {
                    program: call.program,
                    texture,
                    face: call.face,
                    channels: call.channels.map(|c| c.map(|c| c.texture)),
                    frame: call.uniforms.frame,
                });
            }
        }
        Ok(())
    }

    fn generate_mipmaps(&mut self, texture: TextureId) -> Result<()> {
        if !self.textures.contains_key(&texture) {
            bail!("mipmaps requested for unknown texture {texture:?}");
        }
        self.commands.push(BackendCommand::GenerateMipmaps(texture));
        Ok(())
    }

    fn read_pixels(
        &mut self,
        target: RenderTargetId,
        face: Option<u8>,
        rect: Viewport,
    ) -> Result<Vec<[f32; 4]>> {
        let (_, store) = self.store_for_target(target)?;
        let f = face.map(usize::from).unwrap_or(0);
        let texels = store
            .faces
            .get(f)
            .ok_or_else(|| anyhow!("read from missing face {f}"))?;
        let mut out = Vec::with_capacity((rect.width as usize) * (rect.height as usize));
        for y in rect.y..rect.y.saturating_add(rect.height) {
            for x in rect.x..rect.x.saturating_add(rect.width) {
                let i = store
                    .index(x, y)
                    .ok_or_else(|| anyhow!("read at ({x}, {y}) is outside the target"))?;
                out.push(texels[i]);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(width: u32, height: u32) -> TextureDesc {
        TextureDesc {
            kind: TextureKind::D2,
            width,
            height,
            format: TextureFormat::Rgba32F,
            filter: FilterMode::Nearest,
            wrap: WrapMode::Clamp,
        }
    }

    #[test]
    fn copy_program_copies_only_the_viewport() {
        let mut backend = HeadlessBackend::new();
        let src = backend.create_texture(&desc(2, 2)).unwrap();
        let dst = backend.create_texture(&desc(2, 2)).unwrap();
        let dst_rt = backend.create_render_target(dst).unwrap();
        backend
            .write_pixels(src, 0, &[[1.0; 4], [2.0; 4], [3.0; 4], [4.0; 4]])
            .unwrap();
        let copy = backend.create_copy_program().unwrap();

        backend
            .draw(&DrawCall {
                program: copy,
                target: dst_rt,
                face: None,
                viewport: Viewport::full(1, 2),
                uniforms: Default::default(),
                channels: [
                    Some(crate::backend::ChannelBinding {
                        texture: src,
                        kind: TextureKind::D2,
                        filter: FilterMode::Nearest,
                        wrap: WrapMode::Clamp,
                        vflip: false,
                    }),
                    None,
                    None,
                    None,
                ],
            })
            .unwrap();

        assert_eq!(backend.pixel(dst, 0, 0, 0), Some([1.0; 4]));
        assert_eq!(backend.pixel(dst, 0, 1, 0), Some([0.0; 4]));
        assert_eq!(backend.pixel(dst, 0, 0, 1), Some([3.0; 4]));
    }

    #[test]
    fn r8_upload_expands_to_red_channel() {
        let mut backend = HeadlessBackend::new();
        let tex = backend
            .create_texture(&TextureDesc {
                format: TextureFormat::R8,
                ..desc(2, 1)
            })
            .unwrap();
        backend.upload_texture(tex, &[255, 0]).unwrap();
        assert_eq!(backend.pixel(tex, 0, 0, 0), Some([1.0, 0.0, 0.0, 1.0]));
        assert!(backend.upload_texture(tex, &[1, 2, 3]).is_err());
    }

    #[test]
    fn zero_sized_textures_are_rejected() {
        let mut backend = HeadlessBackend::new();
        assert!(backend.create_texture(&desc(0, 4)).is_err());
    }
}
