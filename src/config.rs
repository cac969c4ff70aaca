//! Engine configuration.
//!
//! Every field has a default, so a config file only needs the values it
//! overrides.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoundConfig {
    pub sample_rate: u32,
    /// Seconds of audio a sound pass produces before it stops.
    pub play_time_secs: u32,
}

impl Default for SoundConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            play_time_secs: 180,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub initial_resolution: [u32; 2],
    pub cubemap_resolution: u32,
    /// False in muted and thumbnail contexts: sound passes are dropped at load.
    pub sound_enabled: bool,
    pub prevent_cache: bool,
    pub sound: SoundConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_resolution: [800, 450],
            cubemap_resolution: 1024,
            sound_enabled: true,
            prevent_cache: false,
            sound: SoundConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Settings for rendering previews: small, silent.
    pub fn thumbnail() -> Self {
        Self {
            initial_resolution: [256, 144],
            sound_enabled: false,
            ..Self::default()
        }
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config at {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("failed to parse engine config {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"sound_enabled": false, "sound": {"sample_rate": 48000}}"#).unwrap();
        assert!(!config.sound_enabled);
        assert_eq!(config.sound.sample_rate, 48000);
        assert_eq!(config.sound.play_time_secs, 180);
        assert_eq!(config.cubemap_resolution, 1024);
    }

    #[test]
    fn thumbnail_is_muted() {
        assert!(!EngineConfig::thumbnail().sound_enabled);
    }
}
