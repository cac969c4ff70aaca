//! Translation between [`EffectDocument`] and live passes.

use anyhow::Result;
use tracing::{debug, info};

use super::{MAX_PASSES, Pipeline, default_pass_name};
use crate::asset_id::{asset_id_for_slot, buffer_slot_from_asset_id, cubemap_slot_from_asset_id};
use crate::backend::GraphicsBackend;
use crate::document::{EffectDocument, InputDoc, OutputDoc, RenderPassDoc, SCHEMA_VERSION};
use crate::error::LoadError;
use crate::pass::{InputKind, InputSource, MAX_CHANNELS, Pass, PassInput, PassKey, PassType};
use crate::pool::SlotRef;

impl<B: GraphicsBackend> Pipeline<B> {
    /// Replace the current effect with `doc`. The document is validated in
    /// full before anything is torn down, so a rejected document leaves the
    /// pipeline as it was. Passes are left uncompiled.
    pub fn load(&mut self, doc: &EffectDocument) -> Result<(), LoadError> {
        if doc.ver != SCHEMA_VERSION {
            return Err(LoadError::SchemaVersionMismatch {
                found: doc.ver.clone(),
                expected: SCHEMA_VERSION,
            });
        }
        let count = doc.renderpass.len();
        if count == 0 || count > MAX_PASSES {
            return Err(LoadError::PassCountOutOfRange { count, max: MAX_PASSES });
        }

        let mut passes = Vec::with_capacity(count);
        for (index, rp) in doc.renderpass.iter().enumerate() {
            if rp.pass_type == PassType::Sound && !self.config.sound_enabled {
                debug!(index, "[load] sound disabled, skipping sound pass");
                continue;
            }
            let key = self.allocate_key();
            passes.push(pass_from_doc(index, rp, key)?);
        }

        self.teardown();
        self.passes = passes;
        self.info = doc.info.clone();
        self.allocate_outputs().map_err(LoadError::Resources)?;
        info!(
            passes = self.passes.len(),
            name = self.info.as_ref().map(|i| i.name.as_str()).unwrap_or(""),
            "[load] effect loaded"
        );
        Ok(())
    }

    fn allocate_outputs(&mut self) -> Result<()> {
        let [w, h] = self.resolution;
        let cube = self.config.cubemap_resolution;
        let slots: Vec<SlotRef> = self.passes.iter().filter_map(Pass::output_slot).collect();
        for slot in slots {
            let (sw, sh) = match slot {
                SlotRef::Buffer(_) => (w, h),
                SlotRef::Cubemap(_) => (cube, cube),
            };
            self.pool.allocate_or_resize(&mut self.backend, slot, sw, sh)?;
        }
        Ok(())
    }

    /// Serialize the live passes. Capability flags are recomputed.
    pub fn save(&self) -> EffectDocument {
        EffectDocument {
            ver: SCHEMA_VERSION.to_string(),
            info: self.info.clone(),
            renderpass: self.passes.iter().map(pass_to_doc).collect(),
            flags: Some(self.compute_flags()),
        }
    }
}

fn pass_from_doc(index: usize, rp: &RenderPassDoc, key: PassKey) -> Result<Pass, LoadError> {
    let mut pass = Pass::new(key, rp.pass_type, rp.name.clone(), rp.code.clone());
    pass.set_description(rp.description.clone());

    for input in &rp.inputs {
        let channel = checked_channel(index, input.channel)?;
        let source = match input.kind {
            InputKind::Buffer => match buffer_slot_from_asset_id(&input.id) {
                Some(slot) => InputSource::Slot(SlotRef::Buffer(slot)),
                None => {
                    return Err(LoadError::UnknownAssetId {
                        pass: index,
                        what: "buffer",
                        id: input.id.clone(),
                    });
                }
            },
            // Cubemap inputs are either the cubemap buffer or a static asset.
            InputKind::Cubemap => match cubemap_slot_from_asset_id(&input.id) {
                Some(slot) => InputSource::Slot(SlotRef::Cubemap(slot)),
                None => InputSource::Asset(input.id.clone()),
            },
            _ => InputSource::Asset(input.id.clone()),
        };
        pass.set_input(
            channel,
            Some(PassInput {
                kind: input.kind,
                source,
                filepath: input.filepath.clone(),
                sampler: input.sampler,
            }),
        );
    }

    for output in &rp.outputs {
        let channel = checked_channel(index, output.channel)?;
        let slot = match rp.pass_type {
            PassType::Buffer => buffer_slot_from_asset_id(&output.id).map(SlotRef::Buffer),
            PassType::Cubemap => cubemap_slot_from_asset_id(&output.id).map(SlotRef::Cubemap),
            other => {
                debug!(index, pass_type = other.as_str(), "[load] ignoring output of a pass that cannot write");
                continue;
            }
        };
        let Some(slot) = slot else {
            return Err(LoadError::UnknownAssetId {
                pass: index,
                what: "output",
                id: output.id.clone(),
            });
        };
        pass.set_output(channel, Some(slot));
    }

    if pass.name().is_empty() {
        let name = default_pass_name(rp.pass_type, pass.output_slot());
        pass.set_name(name);
    }
    Ok(pass)
}

fn checked_channel(pass: usize, channel: u8) -> Result<usize, LoadError> {
    let c = usize::from(channel);
    if c >= MAX_CHANNELS {
        return Err(LoadError::ChannelOutOfRange { pass, channel });
    }
    Ok(c)
}

fn pass_to_doc(pass: &Pass) -> RenderPassDoc {
    let inputs = pass
        .inputs()
        .iter()
        .enumerate()
        .filter_map(|(channel, input)| {
            let input = input.as_ref()?;
            let id = match &input.source {
                InputSource::Slot(slot) => asset_id_for_slot(*slot)?.to_string(),
                InputSource::Asset(id) => id.clone(),
            };
            Some(InputDoc {
                channel: channel as u8,
                kind: input.kind,
                id,
                filepath: input.filepath.clone(),
                sampler: input.sampler,
            })
        })
        .collect();
    let outputs = pass
        .outputs()
        .iter()
        .enumerate()
        .filter_map(|(channel, slot)| {
            Some(OutputDoc {
                channel: channel as u8,
                id: asset_id_for_slot((*slot)?)?.to_string(),
            })
        })
        .collect();

    RenderPassDoc {
        pass_type: pass.pass_type(),
        code: pass.source().to_string(),
        name: pass.name().to_string(),
        description: pass.description().to_string(),
        inputs,
        outputs,
    }
}
