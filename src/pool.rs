//! Double-buffered render targets for general-purpose buffers and the
//! cubemap buffer.
//!
//! Each slot owns two physical texture/render-target pairs. `last_written`
//! names the side holding the most recent completed frame; the other side is
//! the write target of the next pass that outputs to the slot. Reading "your
//! own buffer" therefore always sees the previous frame.

use anyhow::Result;
use tracing::{debug, info};

use crate::backend::{
    ChannelBinding, DrawCall, FilterMode, GraphicsBackend, ProgramId, RenderTargetId,
    ShaderUniforms, TextureDesc, TextureFormat, TextureId, TextureKind, Viewport, WrapMode,
};

pub const MAX_BUFFERS: usize = 4;
pub const MAX_CUBEMAP_BUFFERS: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SlotRef {
    Buffer(usize),
    Cubemap(usize),
}

impl SlotRef {
    pub fn texture_kind(self) -> TextureKind {
        match self {
            SlotRef::Buffer(_) => TextureKind::D2,
            SlotRef::Cubemap(_) => TextureKind::Cube,
        }
    }

    pub(crate) fn faces(self) -> Vec<Option<u8>> {
        match self {
            SlotRef::Buffer(_) => vec![None],
            SlotRef::Cubemap(_) => (0..6).map(Some).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhysicalTarget {
    pub texture: TextureId,
    pub target: RenderTargetId,
}

#[derive(Debug, Clone)]
pub struct BufferSlot {
    sides: Option<[PhysicalTarget; 2]>,
    resolution: [u32; 2],
    last_written: usize,
    filter: FilterMode,
    wrap: WrapMode,
}

impl Default for BufferSlot {
    fn default() -> Self {
        Self {
            sides: None,
            resolution: [0, 0],
            last_written: 0,
            filter: FilterMode::Nearest,
            wrap: WrapMode::Clamp,
        }
    }
}

impl BufferSlot {
    pub fn is_allocated(&self) -> bool {
        self.sides.is_some()
    }

    pub fn resolution(&self) -> [u32; 2] {
        self.resolution
    }

    pub fn last_written(&self) -> usize {
        self.last_written
    }

    pub fn sides(&self) -> Option<[PhysicalTarget; 2]> {
        self.sides
    }

    pub fn sampler(&self) -> (FilterMode, WrapMode) {
        (self.filter, self.wrap)
    }

    /// The side holding the most recent completed frame.
    pub fn readable(&self) -> Option<PhysicalTarget> {
        self.sides.map(|s| s[self.last_written])
    }

    /// The side the next pass writing to this slot renders into.
    pub fn writable(&self) -> Option<PhysicalTarget> {
        self.sides.map(|s| s[1 - self.last_written])
    }
}

#[derive(Debug)]
pub struct ResourcePool {
    buffers: [BufferSlot; MAX_BUFFERS],
    cubemaps: [BufferSlot; MAX_CUBEMAP_BUFFERS],
    copy_program: ProgramId,
    format: TextureFormat,
}

impl ResourcePool {
    /// `copy_program` is the pipeline-wide full-screen copy used for resize
    /// blits.
    pub fn new(copy_program: ProgramId) -> Self {
        Self {
            buffers: Default::default(),
            cubemaps: Default::default(),
            copy_program,
            format: TextureFormat::Rgba32F,
        }
    }

    pub fn copy_program(&self) -> ProgramId {
        self.copy_program
    }

    pub fn slot(&self, slot: SlotRef) -> Option<&BufferSlot> {
        match slot {
            SlotRef::Buffer(i) => self.buffers.get(i),
            SlotRef::Cubemap(i) => self.cubemaps.get(i),
        }
    }

    fn slot_mut(&mut self, slot: SlotRef) -> Option<&mut BufferSlot> {
        match slot {
            SlotRef::Buffer(i) => self.buffers.get_mut(i),
            SlotRef::Cubemap(i) => self.cubemaps.get_mut(i),
        }
    }

    pub fn readable(&self, slot: SlotRef) -> Option<PhysicalTarget> {
        self.slot(slot).and_then(BufferSlot::readable)
    }

    pub fn writable(&self, slot: SlotRef) -> Option<PhysicalTarget> {
        self.slot(slot).and_then(BufferSlot::writable)
    }

    pub fn allocated_slots(&self) -> Vec<SlotRef> {
        let buffers = (0..MAX_BUFFERS).map(SlotRef::Buffer);
        let cubemaps = (0..MAX_CUBEMAP_BUFFERS).map(SlotRef::Cubemap);
        buffers
            .chain(cubemaps)
            .filter(|s| self.slot(*s).is_some_and(BufferSlot::is_allocated))
            .collect()
    }

    /// First general-purpose slot with no textures.
    pub fn free_buffer_slot(&self) -> Option<usize> {
        self.buffers.iter().position(|b| !b.is_allocated())
    }

    /// Mark the slot's write side as the most recent frame.
    pub fn flip(&mut self, slot: SlotRef) {
        if let Some(s) = self.slot_mut(slot) {
            if s.is_allocated() {
                s.last_written = 1 - s.last_written;
            }
        }
    }

    /// Apply a channel's filter/wrap to both sides of a slot. The setting is
    /// remembered so resized textures inherit it.
    pub fn apply_sampler<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        slot: SlotRef,
        filter: FilterMode,
        wrap: WrapMode,
    ) {
        let Some(s) = self.slot_mut(slot) else {
            return;
        };
        if s.filter == filter && s.wrap == wrap {
            return;
        }
        s.filter = filter;
        s.wrap = wrap;
        if let Some(sides) = s.sides {
            for side in sides {
                backend.set_sampler(side.texture, filter, wrap);
            }
        }
    }

    /// Create the slot's targets, or resize them keeping the overlapping
    /// top-left region of both sides. Same size is a no-op.
    pub fn allocate_or_resize<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        slot: SlotRef,
        width: u32,
        height: u32,
    ) -> Result<()> {
        if width == 0 || height == 0 {
            debug!(?slot, width, height, "[pool] ignoring empty size");
            return Ok(());
        }
        let format = self.format;
        let copy_program = self.copy_program;
        let Some(s) = self.slot_mut(slot) else {
            anyhow::bail!("no such slot {slot:?}");
        };
        if s.is_allocated() && s.resolution == [width, height] {
            return Ok(());
        }

        let desc = TextureDesc {
            kind: slot.texture_kind(),
            width,
            height,
            format,
            filter: s.filter,
            wrap: s.wrap,
        };
        let fresh = [
            create_physical(backend, &desc)?,
            create_physical(backend, &desc)?,
        ];

        match s.sides.take() {
            None => {
                for side in fresh {
                    backend.clear(side.target, None, [0.0; 4])?;
                }
                info!(?slot, width, height, "[pool] allocated slot");
            }
            Some(old) => {
                let [old_w, old_h] = s.resolution;
                let region = Viewport::full(old_w.min(width), old_h.min(height));
                // Newest content lands on side 0, which becomes readable.
                let ordered = [old[s.last_written], old[1 - s.last_written]];
                for (from, to) in ordered.iter().zip(fresh.iter()) {
                    backend.clear(to.target, None, [0.0; 4])?;
                    for face in slot.faces() {
                        blit(backend, copy_program, from.texture, slot.texture_kind(), to.target, face, region, [width, height])?;
                    }
                }
                for side in old {
                    destroy_physical(backend, side);
                }
                info!(?slot, from = ?[old_w, old_h], to = ?[width, height], "[pool] resized slot");
            }
        }

        s.sides = Some(fresh);
        s.resolution = [width, height];
        s.last_written = 0;
        Ok(())
    }

    pub fn release<B: GraphicsBackend>(&mut self, backend: &mut B, slot: SlotRef) {
        let Some(s) = self.slot_mut(slot) else {
            return;
        };
        if let Some(sides) = s.sides.take() {
            for side in sides {
                destroy_physical(backend, side);
            }
            debug!(?slot, "[pool] released slot");
        }
        *s = BufferSlot::default();
    }

    pub fn release_all<B: GraphicsBackend>(&mut self, backend: &mut B) {
        for slot in self.allocated_slots() {
            self.release(backend, slot);
        }
    }

    /// Resize every allocated general-purpose slot. Unallocated slots and the
    /// cubemap slot are left alone.
    pub fn resize_buffers<B: GraphicsBackend>(&mut self, backend: &mut B, width: u32, height: u32) -> Result<()> {
        for i in 0..MAX_BUFFERS {
            if self.buffers[i].is_allocated() {
                self.allocate_or_resize(backend, SlotRef::Buffer(i), width, height)?;
            }
        }
        Ok(())
    }

    /// Clear both sides of every allocated slot to zero and build their mip
    /// chains.
    pub fn clear_all<B: GraphicsBackend>(&mut self, backend: &mut B) -> Result<()> {
        for slot in self.allocated_slots() {
            let Some(sides) = self.slot(slot).and_then(BufferSlot::sides) else {
                continue;
            };
            for side in sides {
                backend.clear(side.target, None, [0.0; 4])?;
                backend.generate_mipmaps(side.texture)?;
            }
        }
        Ok(())
    }
}

fn create_physical<B: GraphicsBackend>(backend: &mut B, desc: &TextureDesc) -> Result<PhysicalTarget> {
    let texture = backend.create_texture(desc)?;
    let target = match backend.create_render_target(texture) {
        Ok(t) => t,
        Err(e) => {
            backend.destroy_texture(texture);
            return Err(e);
        }
    };
    Ok(PhysicalTarget { texture, target })
}

fn destroy_physical<B: GraphicsBackend>(backend: &mut B, side: PhysicalTarget) {
    backend.destroy_render_target(side.target);
    backend.destroy_texture(side.texture);
}

#[allow(clippy::too_many_arguments)]
fn blit<B: GraphicsBackend>(
    backend: &mut B,
    copy_program: ProgramId,
    from: TextureId,
    kind: TextureKind,
    to: RenderTargetId,
    face: Option<u8>,
    region: Viewport,
    target_size: [u32; 2],
) -> Result<()> {
    let uniforms = ShaderUniforms {
        resolution: [target_size[0] as f32, target_size[1] as f32, 1.0, 0.0],
        face: face.map(i32::from).unwrap_or(0),
        ..Default::default()
    };
    backend.draw(&DrawCall {
        program: copy_program,
        target: to,
        face,
        viewport: region,
        uniforms,
        channels: [
            Some(ChannelBinding {
                texture: from,
                kind,
                filter: FilterMode::Nearest,
                wrap: WrapMode::Clamp,
                vflip: false,
            }),
            None,
            None,
            None,
        ],
    })
}
