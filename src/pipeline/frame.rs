use anyhow::Result;
use tracing::{trace, warn};

use super::Pipeline;
use crate::backend::{GraphicsBackend, ShaderUniforms, TextureKind};
use crate::keyboard::{KEYBOARD_HEIGHT, KEYBOARD_WIDTH};
use crate::pass::{ExternalTexture, ExternalTextures, FrameContext, PassType};
use crate::pool::SlotRef;

/// Host-provided values for one frame.
#[derive(Default, Clone, Copy)]
pub struct FrameInputs<'a> {
    pub time: f32,
    pub time_delta: f32,
    pub frame_rate: f32,
    /// Pixel coordinates: current xy, click xy (negated while released).
    pub mouse: [f32; 4],
    /// Year, month (0-based), day, seconds since midnight.
    pub date: [f32; 4],
    pub external: Option<&'a dyn ExternalTextures>,
}

impl<B: GraphicsBackend> Pipeline<B> {
    fn base_uniforms(&self, inputs: &FrameInputs<'_>) -> ShaderUniforms {
        let [w, h] = self.resolution;
        ShaderUniforms {
            resolution: [w as f32, h as f32, 1.0, 0.0],
            mouse: inputs.mouse,
            date: inputs.date,
            time: inputs.time,
            time_delta: inputs.time_delta,
            frame_rate: inputs.frame_rate,
            frame: self.frame_counter as i32,
            sample_rate: self.sound.sample_rate() as f32,
            ..Default::default()
        }
    }

    fn keyboard_input(&self) -> ExternalTexture {
        ExternalTexture {
            texture: self.keyboard_texture,
            kind: TextureKind::D2,
            resolution: [KEYBOARD_WIDTH as f32, KEYBOARD_HEIGHT as f32, 1.0],
            time: 0.0,
        }
    }

    /// Whether any pass samples `slot` with mipmap filtering.
    fn slot_needs_mipmaps(&self, slot: SlotRef) -> bool {
        self.passes.iter().any(|p| {
            p.inputs()
                .iter()
                .flatten()
                .any(|input| input.slot() == Some(slot) && input.wants_mipmaps())
        })
    }

    /// Render one frame: sound, then buffers and the cubemap in pass order,
    /// then the image pass into the surface. The frame counter advances even
    /// when a pass fails; the first failure is returned.
    pub fn paint_frame(&mut self, inputs: &FrameInputs<'_>) -> Result<()> {
        let result = self.render_passes(inputs);
        self.keyboard.clear_edges();
        self.frame_counter += 1;
        result
    }

    fn render_passes(&mut self, inputs: &FrameInputs<'_>) -> Result<()> {
        if self.frame_counter == 0 {
            self.pool.clear_all(&mut self.backend)?;
        }
        if let Some(texels) = self.keyboard.take_dirty() {
            self.backend.upload_texture(self.keyboard_texture, texels)?;
        }

        let base = self.base_uniforms(inputs);
        let keyboard = self.keyboard_input();
        let mut first_error = None;

        for index in self.indices_of(PassType::Sound) {
            let Some(program) = self.passes[index].runnable_program() else {
                continue;
            };
            if self.audio_sink.is_none() || self.sound.is_finished() {
                continue;
            }
            let ctx = FrameContext {
                pass_index: index,
                uniforms: base,
                keyboard,
                external: inputs.external,
            };
            let (channels, uniforms) = self.passes[index].bind_channels(&mut self.backend, &mut self.pool, &ctx);
            let Some(sink) = self.audio_sink.as_deref_mut() else {
                continue;
            };
            if let Err(e) = self
                .sound
                .render_next_block(&mut self.backend, program, uniforms, channels, sink)
            {
                warn!(pass = index, "[frame] sound pass failed: {e:#}");
                first_error.get_or_insert(e);
            }
        }

        for pass_type in [PassType::Buffer, PassType::Cubemap] {
            for index in self.indices_of(pass_type) {
                let mipmaps = self.passes[index]
                    .output_slot()
                    .filter(|slot| self.slot_needs_mipmaps(*slot));
                let ctx = FrameContext {
                    pass_index: index,
                    uniforms: base,
                    keyboard,
                    external: inputs.external,
                };
                match self.passes[index].execute(&mut self.backend, &mut self.pool, &ctx) {
                    Ok(true) => {
                        if let Some(texture) = mipmaps.and_then(|slot| self.pool.readable(slot)).map(|s| s.texture) {
                            if let Err(e) = self.backend.generate_mipmaps(texture) {
                                warn!(pass = index, "[frame] mipmap generation failed: {e:#}");
                                first_error.get_or_insert(e);
                            }
                        }
                    }
                    Ok(false) => trace!(pass = index, "[frame] pass skipped"),
                    Err(e) => {
                        warn!(pass = index, "[frame] pass failed: {e:#}");
                        first_error.get_or_insert(e);
                    }
                }
            }
        }

        for index in self.indices_of(PassType::Image) {
            let ctx = FrameContext {
                pass_index: index,
                uniforms: base,
                keyboard,
                external: inputs.external,
            };
            if let Err(e) = self.passes[index].execute_to_surface(&mut self.backend, &mut self.pool, &ctx) {
                warn!(pass = index, "[frame] image pass failed: {e:#}");
                first_error.get_or_insert(e);
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    fn indices_of(&self, pass_type: PassType) -> Vec<usize> {
        self.passes
            .iter()
            .enumerate()
            .filter(|(_, p)| p.pass_type() == pass_type)
            .map(|(i, _)| i)
            .collect()
    }
}
