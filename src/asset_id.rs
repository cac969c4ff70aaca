//! Asset ids used by documents to reference pool slots.
//!
//! The mapping is fixed: documents written by older versions of the engine
//! must keep resolving to the same slots.

use crate::pool::{MAX_BUFFERS, MAX_CUBEMAP_BUFFERS, SlotRef};

const BUFFER_ASSET_IDS: [&str; MAX_BUFFERS] = ["4dXGR8", "XsXGR8", "4sXGR8", "XdfGR8"];
const CUBEMAP_ASSET_IDS: [&str; MAX_CUBEMAP_BUFFERS] = ["4dX3Rr"];

pub const KEYBOARD_ASSET_ID: &str = "4dXGRr";

pub fn buffer_slot_from_asset_id(id: &str) -> Option<usize> {
    BUFFER_ASSET_IDS.iter().position(|a| *a == id)
}

pub fn cubemap_slot_from_asset_id(id: &str) -> Option<usize> {
    CUBEMAP_ASSET_IDS.iter().position(|a| *a == id)
}

pub fn slot_from_asset_id(id: &str) -> Option<SlotRef> {
    buffer_slot_from_asset_id(id)
        .map(SlotRef::Buffer)
        .or_else(|| cubemap_slot_from_asset_id(id).map(SlotRef::Cubemap))
}

pub fn asset_id_for_slot(slot: SlotRef) -> Option<&'static str> {
    match slot {
        SlotRef::Buffer(i) => BUFFER_ASSET_IDS.get(i).copied(),
        SlotRef::Cubemap(i) => CUBEMAP_ASSET_IDS.get(i).copied(),
    }
}

/// Display name of a pass writing into `slot` ("Buffer A", "Cube A").
pub fn slot_display_name(slot: SlotRef) -> String {
    match slot {
        SlotRef::Buffer(i) => format!("Buffer {}", (b'A' + i as u8) as char),
        SlotRef::Cubemap(i) => format!("Cube {}", (b'A' + i as u8) as char),
    }
}
