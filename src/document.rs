//! Persisted effect document.
//!
//! ```json
//! { "ver": "0.1",
//!   "info": { ... },
//!   "renderpass": [ { "type": "image", "code": "...", "name": "Image",
//!                     "inputs": [ { "channel": 0, "type": "buffer", "id": "4dXGR8",
//!                                   "filepath": "...", "sampler": { ... } } ],
//!                     "outputs": [] } ],
//!   "flags": { ... } }
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};

use crate::pass::{InputKind, PassType, Sampler};

pub const SCHEMA_VERSION: &str = "0.1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectDocument {
    pub ver: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<EffectInfo>,
    #[serde(default)]
    pub renderpass: Vec<RenderPassDoc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flags: Option<EffectFlags>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectInfo {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub name: String,
    pub username: String,
    pub description: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderPassDoc {
    #[serde(rename = "type")]
    pub pass_type: PassType,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub inputs: Vec<InputDoc>,
    #[serde(default)]
    pub outputs: Vec<OutputDoc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputDoc {
    pub channel: u8,
    #[serde(rename = "type")]
    pub kind: InputKind,
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub filepath: String,
    #[serde(default)]
    pub sampler: Sampler,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputDoc {
    pub channel: u8,
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
}

/// Capability flags derived from the passes. Recomputed on every save.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EffectFlags {
    pub uses_vr: bool,
    pub uses_webcam: bool,
    pub uses_keyboard: bool,
    pub uses_mic: bool,
    pub uses_music_stream: bool,
    pub has_sound_output: bool,
    pub is_multipass: bool,
}

/// Older documents carry numeric ids.
fn string_or_number<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(i64),
    }
    Ok(match Raw::deserialize(d)? {
        Raw::Text(s) => s,
        Raw::Number(n) => n.to_string(),
    })
}

impl EffectDocument {
    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("failed to parse effect document json")
    }

    pub fn to_json_string_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialize effect document")
    }
}

pub fn load_document_from_path(path: impl AsRef<Path>) -> Result<EffectDocument> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read effect document at {}", path.display()))?;
    EffectDocument::from_json_str(&text).with_context(|| format!("in {}", path.display()))
}

pub fn save_document_to_path(doc: &EffectDocument, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let text = doc.to_json_string_pretty()?;
    std::fs::write(path, text)
        .with_context(|| format!("failed to write effect document to {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_document() {
        let doc = EffectDocument::from_json_str(
            r#"{"ver":"0.1","renderpass":[{"type":"image","code":"void mainImage(out vec4 c, in vec2 p){}"}]}"#,
        )
        .unwrap();
        assert_eq!(doc.renderpass.len(), 1);
        assert_eq!(doc.renderpass[0].pass_type, PassType::Image);
        assert!(doc.renderpass[0].inputs.is_empty());
        assert!(doc.info.is_none());
    }

    #[test]
    fn numeric_ids_become_strings() {
        let doc = EffectDocument::from_json_str(
            r#"{"ver":"0.1","info":{"id":42},"renderpass":[{"type":"buffer","code":"",
                "inputs":[{"channel":0,"type":"texture","id":17,"filepath":"/a.png"}],
                "outputs":[{"channel":0,"id":"4dXGR8"}]}]}"#,
        )
        .unwrap();
        assert_eq!(doc.info.unwrap().id, "42");
        assert_eq!(doc.renderpass[0].inputs[0].id, "17");
        assert_eq!(doc.renderpass[0].inputs[0].sampler, Sampler::default());
    }

    #[test]
    fn flags_serialize_camel_case() {
        let flags = EffectFlags {
            uses_music_stream: true,
            ..Default::default()
        };
        let json = serde_json::to_value(flags).unwrap();
        assert_eq!(json["usesMusicStream"], true);
        assert_eq!(json["isMultipass"], false);
    }

    #[test]
    fn unknown_pass_type_is_rejected() {
        let err = EffectDocument::from_json_str(r#"{"ver":"0.1","renderpass":[{"type":"compute","code":""}]}"#);
        assert!(err.is_err());
    }
}
