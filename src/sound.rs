//! Sound pass output path.
//!
//! A sound pass renders blocks of `SOUND_TEXTURE_SIZE²` stereo samples into a
//! dedicated RGBA8 target. Each texel packs one sample as two 16-bit values
//! (`r + 256·g` left, `b + 256·a` right). Blocks are read back, decoded and
//! handed to an [`AudioSink`].

use anyhow::Result;
use tracing::{debug, info};

use crate::backend::{
    ChannelBinding, DrawCall, FilterMode, GraphicsBackend, ProgramId, ShaderUniforms, TextureDesc, TextureFormat,
    TextureKind, Viewport, WrapMode,
};
use crate::config::SoundConfig;
use crate::pool::PhysicalTarget;

pub const SOUND_TEXTURE_SIZE: u32 = 512;
pub const SAMPLES_PER_BLOCK: u32 = SOUND_TEXTURE_SIZE * SOUND_TEXTURE_SIZE;

pub trait AudioSink {
    fn push_block(&mut self, sample_rate: u32, samples: &[[f32; 2]]);
}

/// Decode one 16-bit channel stored as two normalized bytes.
pub fn decode_sample(lo: f32, hi: f32) -> f32 {
    let to_byte = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round();
    let packed = to_byte(lo) + 256.0 * to_byte(hi);
    packed / 65535.0 * 2.0 - 1.0
}

#[derive(Debug)]
pub struct SoundRenderer {
    target: Option<PhysicalTarget>,
    sample_rate: u32,
    total_blocks: u32,
    blocks_rendered: u32,
}

impl SoundRenderer {
    pub fn new(config: &SoundConfig) -> Self {
        let total_samples = u64::from(config.sample_rate) * u64::from(config.play_time_secs);
        let total_blocks = total_samples.div_ceil(u64::from(SAMPLES_PER_BLOCK)) as u32;
        Self {
            target: None,
            sample_rate: config.sample_rate,
            total_blocks,
            blocks_rendered: 0,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn blocks_rendered(&self) -> u32 {
        self.blocks_rendered
    }

    pub fn is_finished(&self) -> bool {
        self.blocks_rendered >= self.total_blocks
    }

    /// Start producing samples from time zero again.
    pub fn rewind(&mut self) {
        self.blocks_rendered = 0;
    }

    fn ensure_target<B: GraphicsBackend>(&mut self, backend: &mut B) -> Result<PhysicalTarget> {
        if let Some(target) = self.target {
            return Ok(target);
        }
        let texture = backend.create_texture(&TextureDesc {
            kind: TextureKind::D2,
            width: SOUND_TEXTURE_SIZE,
            height: SOUND_TEXTURE_SIZE,
            format: TextureFormat::Rgba8,
            filter: FilterMode::Nearest,
            wrap: WrapMode::Clamp,
        })?;
        let target = PhysicalTarget {
            texture,
            target: backend.create_render_target(texture)?,
        };
        self.target = Some(target);
        Ok(target)
    }

    /// Render and deliver the next block. Returns `false` once the play time
    /// is exhausted.
    pub fn render_next_block<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        program: ProgramId,
        base_uniforms: ShaderUniforms,
        channels: [Option<ChannelBinding>; 4],
        sink: &mut dyn AudioSink,
    ) -> Result<bool> {
        if self.is_finished() {
            return Ok(false);
        }
        let target = self.ensure_target(backend)?;
        let block_offset =
            (self.blocks_rendered as f64 * SAMPLES_PER_BLOCK as f64 / self.sample_rate as f64) as f32;
        let uniforms = ShaderUniforms {
            resolution: [SOUND_TEXTURE_SIZE as f32, SOUND_TEXTURE_SIZE as f32, 1.0, 0.0],
            sample_rate: self.sample_rate as f32,
            block_offset,
            ..base_uniforms
        };
        let viewport = Viewport::full(SOUND_TEXTURE_SIZE, SOUND_TEXTURE_SIZE);
        backend.draw(&DrawCall {
            program,
            target: target.target,
            face: None,
            viewport,
            uniforms,
            channels,
        })?;

        let texels = backend.read_pixels(target.target, None, viewport)?;
        let samples: Vec<[f32; 2]> = texels
            .iter()
            .map(|t| [decode_sample(t[0], t[1]), decode_sample(t[2], t[3])])
            .collect();
        sink.push_block(self.sample_rate, &samples);

        self.blocks_rendered += 1;
        debug!(block = self.blocks_rendered, block_offset, "[sound] rendered block");
        if self.is_finished() {
            info!(blocks = self.total_blocks, "[sound] play time exhausted");
        }
        Ok(true)
    }

    pub fn release<B: GraphicsBackend>(&mut self, backend: &mut B) {
        if let Some(target) = self.target.take() {
            backend.destroy_render_target(target.target);
            backend.destroy_texture(target.texture);
        }
        self.blocks_rendered = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_covers_full_range() {
        assert_eq!(decode_sample(0.0, 0.0), -1.0);
        assert_eq!(decode_sample(1.0, 1.0), 1.0);
        let mid = decode_sample(255.0 / 255.0, 127.0 / 255.0);
        assert!(mid.abs() < 1e-4, "{mid}");
    }

    #[test]
    fn block_count_follows_play_time() {
        let renderer = SoundRenderer::new(&SoundConfig {
            sample_rate: 44100,
            play_time_secs: 180,
        });
        // 7_938_000 samples / 262_144 per block
        assert_eq!(renderer.total_blocks, 31);
        assert!(!renderer.is_finished());
    }
}
