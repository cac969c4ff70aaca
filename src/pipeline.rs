//! The effect pipeline: owns the passes, the resource pool and the compile
//! orchestrator, and drives loading, compiling, resizing and painting.

mod codec;
mod compile;
mod flags;
mod frame;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::asset_id::slot_display_name;
use crate::backend::{FilterMode, GraphicsBackend, TextureDesc, TextureFormat, TextureId, TextureKind, WrapMode};
use crate::compiler::ShaderCompiler;
use crate::compiler::orchestrator::CompileOrchestrator;
use crate::config::EngineConfig;
use crate::document::EffectInfo;
use crate::error::PassError;
use crate::keyboard::{KEYBOARD_HEIGHT, KEYBOARD_WIDTH, KeyboardState};
use crate::pass::{MAX_CHANNELS, Pass, PassInput, PassKey, PassType};
use crate::pool::{MAX_BUFFERS, ResourcePool, SlotRef};
use crate::sound::{AudioSink, SoundRenderer};

pub use flags::{StructureViolation, max_passes_of};
pub use frame::FrameInputs;

/// Common, image, sound, cubemap and every buffer.
pub const MAX_PASSES: usize = MAX_BUFFERS + 4;

pub struct Pipeline<B: GraphicsBackend> {
    backend: B,
    config: EngineConfig,
    passes: Vec<Pass>,
    pool: ResourcePool,
    orchestrator: CompileOrchestrator,
    keyboard: KeyboardState,
    keyboard_texture: TextureId,
    sound: SoundRenderer,
    audio_sink: Option<Box<dyn AudioSink>>,
    info: Option<EffectInfo>,
    resolution: [u32; 2],
    frame_counter: u64,
    compilation_elapsed: Duration,
    next_key: u64,
}

impl<B: GraphicsBackend> Pipeline<B> {
    pub fn new(mut backend: B, compiler: Arc<dyn ShaderCompiler>, config: EngineConfig) -> Result<Self> {
        let copy_program = backend
            .create_copy_program()
            .context("failed to create the copy program")?;
        let keyboard_texture = backend
            .create_texture(&TextureDesc {
                kind: TextureKind::D2,
                width: KEYBOARD_WIDTH,
                height: KEYBOARD_HEIGHT,
                format: TextureFormat::R8,
                filter: FilterMode::Nearest,
                wrap: WrapMode::Clamp,
            })
            .context("failed to create the keyboard texture")?;
        let [width, height] = config.initial_resolution;
        backend.resize_surface(width, height)?;

        Ok(Self {
            backend,
            sound: SoundRenderer::new(&config.sound),
            config,
            passes: Vec::new(),
            pool: ResourcePool::new(copy_program),
            orchestrator: CompileOrchestrator::new(compiler),
            keyboard: KeyboardState::new(),
            keyboard_texture,
            audio_sink: None,
            info: None,
            resolution: [width, height],
            frame_counter: 0,
            compilation_elapsed: Duration::ZERO,
            next_key: 0,
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn passes(&self) -> &[Pass] {
        &self.passes
    }

    pub fn pass(&self, id: usize) -> Option<&Pass> {
        self.passes.get(id)
    }

    pub fn pass_index(&self, key: PassKey) -> Option<usize> {
        self.passes.iter().position(|p| p.key() == key)
    }

    pub fn pool(&self) -> &ResourcePool {
        &self.pool
    }

    pub fn info(&self) -> Option<&EffectInfo> {
        self.info.as_ref()
    }

    pub fn set_info(&mut self, info: Option<EffectInfo>) {
        self.info = info;
    }

    pub fn resolution(&self) -> [u32; 2] {
        self.resolution
    }

    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    /// Wall-clock duration of the last finished compile batch.
    pub fn compilation_elapsed(&self) -> Duration {
        self.compilation_elapsed
    }

    pub fn keyboard(&self) -> &KeyboardState {
        &self.keyboard
    }

    pub fn sound(&self) -> &SoundRenderer {
        &self.sound
    }

    pub fn key_down(&mut self, code: u8) {
        self.keyboard.key_down(code);
    }

    pub fn key_up(&mut self, code: u8) {
        self.keyboard.key_up(code);
    }

    pub fn set_audio_sink(&mut self, sink: Option<Box<dyn AudioSink>>) {
        self.audio_sink = sink;
    }

    fn allocate_key(&mut self) -> PassKey {
        let key = PassKey(self.next_key);
        self.next_key += 1;
        key
    }

    fn pass_mut(&mut self, id: usize) -> Result<&mut Pass, PassError> {
        self.passes.get_mut(id).ok_or(PassError::NoSuchPass(id))
    }

    /// Rewrite a pass's source. Editing common code invalidates every other
    /// pass since it is prepended to all of them.
    pub fn set_pass_source(&mut self, id: usize, source: impl Into<String>) -> Result<(), PassError> {
        let pass = self.pass_mut(id)?;
        pass.set_source(source);
        if pass.pass_type() == PassType::Common {
            self.mark_non_common_dirty();
        }
        Ok(())
    }

    pub fn set_pass_name(&mut self, id: usize, name: impl Into<String>) -> Result<(), PassError> {
        self.pass_mut(id)?.set_name(name);
        Ok(())
    }

    pub fn set_pass_input(&mut self, id: usize, channel: usize, input: Option<PassInput>) -> Result<(), PassError> {
        if channel >= MAX_CHANNELS {
            return Err(PassError::NoSuchChannel(channel));
        }
        self.pass_mut(id)?.set_input(channel, input);
        Ok(())
    }

    fn mark_non_common_dirty(&mut self) {
        for pass in &mut self.passes {
            if pass.pass_type() != PassType::Common {
                pass.mark_dirty();
            }
        }
    }

    fn slot_has_writer(&self, slot: SlotRef) -> bool {
        self.passes.iter().any(|p| p.output_slot() == Some(slot))
    }

    /// Append a pass with the template source for its type, compile it on the
    /// calling thread and return its id. Buffer passes take the first buffer
    /// slot nobody writes to.
    pub fn add_pass(&mut self, pass_type: PassType, name: &str) -> Result<usize, PassError> {
        if self.passes.len() >= MAX_PASSES {
            return Err(PassError::TooManyPasses { max: MAX_PASSES });
        }
        let output = match pass_type {
            PassType::Buffer => {
                let free = (0..MAX_BUFFERS)
                    .map(SlotRef::Buffer)
                    .find(|s| !self.slot_has_writer(*s))
                    .ok_or(PassError::NoFreeBufferSlot)?;
                let [w, h] = self.resolution;
                self.pool.allocate_or_resize(&mut self.backend, free, w, h)?;
                Some(free)
            }
            PassType::Cubemap => {
                let slot = SlotRef::Cubemap(0);
                if self.slot_has_writer(slot) {
                    return Err(PassError::CubemapSlotInUse);
                }
                let size = self.config.cubemap_resolution;
                self.pool.allocate_or_resize(&mut self.backend, slot, size, size)?;
                Some(slot)
            }
            _ => None,
        };

        let name = if name.is_empty() {
            default_pass_name(pass_type, output)
        } else {
            name.to_string()
        };
        let key = self.allocate_key();
        let mut pass = Pass::new(key, pass_type, name, pass_type.template_source());
        pass.set_output(0, output);
        self.passes.push(pass);
        let id = self.passes.len() - 1;

        if pass_type == PassType::Common {
            self.mark_non_common_dirty();
        }
        self.compile_pass_now(id)?;
        info!(id, pass_type = pass_type.as_str(), "[edit] added pass");
        Ok(id)
    }

    /// Remove a pass; later passes shift down by one. When no remaining pass
    /// writes to the removed pass's output slot, the slot is released.
    pub fn kill_pass(&mut self, id: usize) -> Result<(), PassError> {
        if id >= self.passes.len() {
            return Err(PassError::NoSuchPass(id));
        }
        let mut pass = self.passes.remove(id);
        pass.release_program(&mut self.backend);

        if let Some(slot) = pass.output_slot() {
            if !self.slot_has_writer(slot) {
                self.pool.release(&mut self.backend, slot);
            }
        }
        match pass.pass_type() {
            PassType::Sound => self.sound.release(&mut self.backend),
            PassType::Common => self.mark_non_common_dirty(),
            _ => {}
        }
        info!(id, pass_type = pass.pass_type().as_str(), "[edit] removed pass");
        Ok(())
    }

    /// Resize the presentation surface and every allocated buffer slot.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            debug!(width, height, "[resize] ignoring empty size");
            return Ok(());
        }
        if [width, height] == self.resolution {
            return Ok(());
        }
        self.backend.resize_surface(width, height)?;
        self.pool.resize_buffers(&mut self.backend, width, height)?;
        self.resolution = [width, height];
        info!(width, height, "[resize] resized");
        Ok(())
    }

    /// Resize the cubemap slot, if allocated.
    pub fn resize_cubemap(&mut self, size: u32) -> Result<()> {
        let slot = SlotRef::Cubemap(0);
        if self.pool.slot(slot).is_some_and(|s| s.is_allocated()) {
            self.pool.allocate_or_resize(&mut self.backend, slot, size, size)?;
        }
        Ok(())
    }

    /// Start over from frame zero: buffers are cleared on the next paint and
    /// sound restarts.
    pub fn restart(&mut self) {
        self.frame_counter = 0;
        self.sound.rewind();
        self.keyboard.reset();
    }

    /// Release every GPU resource and hand the backend back.
    pub fn destroy(mut self) -> B {
        self.teardown();
        self.backend.destroy_texture(self.keyboard_texture);
        self.backend.destroy_program(self.pool.copy_program());
        self.backend
    }

    fn teardown(&mut self) {
        for pass in &mut self.passes {
            pass.release_program(&mut self.backend);
        }
        self.passes.clear();
        self.pool.release_all(&mut self.backend);
        self.sound.release(&mut self.backend);
        self.keyboard.reset();
        self.frame_counter = 0;
    }
}

pub(crate) fn default_pass_name(pass_type: PassType, output: Option<SlotRef>) -> String {
    match (pass_type, output) {
        (PassType::Buffer | PassType::Cubemap, Some(slot)) => slot_display_name(slot),
        (PassType::Common, _) => "Common".to_string(),
        (PassType::Image, _) => "Image".to_string(),
        (PassType::Sound, _) => "Sound".to_string(),
        (PassType::Buffer, None) => "Buffer".to_string(),
        (PassType::Cubemap, None) => "Cubemap".to_string(),
    }
}
