//! Theme and effect presets
//!
//! A preset names an effect chain (topology) plus optional per-node
//! parameter sets. Selecting a theme rebuilds the chain; applying parameters
//! leaves the topology alone. The selected theme is persisted by an external
//! collaborator as an opaque key through [`PresetStore`].

use crate::graph::{EffectNode, NodeParams};
use crate::nodes::{EqualizerNode, GainStage, ReverbNode};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Theme key used when nothing is persisted
pub const DEFAULT_THEME: &str = "flat";

/// Buildable description of one effect node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EffectSpec {
    Gain { gain: f32 },
    Equalizer { gains: Vec<f32> },
    Reverb { mix: f32, decay: f32 },
}

impl EffectSpec {
    /// Fresh, uninitialized node for this spec
    pub fn build(&self) -> Box<dyn EffectNode> {
        match self {
            EffectSpec::Gain { gain } => Box::new(GainStage::new("gain", *gain)),
            EffectSpec::Equalizer { gains } => Box::new(EqualizerNode::with_gains(gains)),
            EffectSpec::Reverb { mix, decay } => Box::new(ReverbNode::new(*mix, *decay)),
        }
    }
}

/// Named effect chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectPreset {
    pub key: String,
    pub label: String,
    #[serde(default)]
    pub chain: Vec<EffectSpec>,
    /// Parameter sets applied after the chain is built, in chain order
    #[serde(default)]
    pub params: Vec<NodeParams>,
}

/// Lookup table of presets
#[derive(Debug, Clone)]
pub struct PresetCatalog {
    presets: Vec<EffectPreset>,
}

impl PresetCatalog {
    pub fn new(presets: Vec<EffectPreset>) -> Self {
        Self { presets }
    }

    /// Built-in themes
    pub fn builtin() -> Self {
        Self::new(vec![
            EffectPreset {
                key: DEFAULT_THEME.to_string(),
                label: "Flat".to_string(),
                chain: Vec::new(),
                params: Vec::new(),
            },
            EffectPreset {
                key: "warm".to_string(),
                label: "Warm".to_string(),
                chain: vec![EffectSpec::Equalizer {
                    gains: vec![4.0, 2.0, 0.0, -1.0, -2.0],
                }],
                params: Vec::new(),
            },
            EffectPreset {
                key: "clarity".to_string(),
                label: "Clarity".to_string(),
                chain: vec![
                    EffectSpec::Equalizer {
                        gains: vec![-1.0, 0.0, 1.0, 3.0, 4.0],
                    },
                    EffectSpec::Gain { gain: 0.9 },
                ],
                params: Vec::new(),
            },
            EffectPreset {
                key: "hall".to_string(),
                label: "Concert Hall".to_string(),
                chain: vec![
                    EffectSpec::Equalizer {
                        gains: vec![2.0, 1.0, 0.0, 1.0, 2.0],
                    },
                    EffectSpec::Reverb {
                        mix: 0.35,
                        decay: 2.8,
                    },
                ],
                params: Vec::new(),
            },
        ])
    }

    /// Built-ins plus `extra`; an extra preset replaces a built-in with its key
    pub fn with_overrides(extra: Vec<EffectPreset>) -> Self {
        let mut catalog = Self::builtin();
        for preset in extra {
            match catalog.presets.iter_mut().find(|p| p.key == preset.key) {
                Some(existing) => *existing = preset,
                None => catalog.presets.push(preset),
            }
        }
        catalog
    }

    pub fn get(&self, key: &str) -> Option<&EffectPreset> {
        self.presets.iter().find(|p| p.key == key)
    }

    pub fn keys(&self) -> Vec<&str> {
        self.presets.iter().map(|p| p.key.as_str()).collect()
    }
}

impl Default for PresetCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Persistence of the selected theme key
pub trait PresetStore: Send + Sync {
    fn load_theme(&self) -> Option<String>;
    fn save_theme(&self, key: &str);
}

/// Store that keeps the key in memory
#[derive(Debug, Default)]
pub struct MemoryPresetStore {
    key: Mutex<Option<String>>,
}

impl MemoryPresetStore {
    pub fn with_theme(key: &str) -> Self {
        Self {
            key: Mutex::new(Some(key.to_string())),
        }
    }
}

impl PresetStore for MemoryPresetStore {
    fn load_theme(&self) -> Option<String> {
        self.key.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn save_theme(&self, key: &str) {
        *self.key.lock().unwrap_or_else(|p| p.into_inner()) = Some(key.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog() {
        let catalog = PresetCatalog::builtin();
        assert!(catalog.get(DEFAULT_THEME).unwrap().chain.is_empty());
        assert_eq!(catalog.keys(), vec!["flat", "warm", "clarity", "hall"]);
        assert!(catalog.get("missing").is_none());
    }

    #[test]
    fn test_overrides_replace_and_extend() {
        let catalog = PresetCatalog::with_overrides(vec![
            EffectPreset {
                key: "warm".to_string(),
                label: "Warmer".to_string(),
                chain: vec![EffectSpec::Gain { gain: 0.5 }],
                params: Vec::new(),
            },
            EffectPreset {
                key: "radio".to_string(),
                label: "Radio".to_string(),
                chain: Vec::new(),
                params: Vec::new(),
            },
        ]);
        assert_eq!(catalog.get("warm").unwrap().label, "Warmer");
        assert!(catalog.get("radio").is_some());
        assert_eq!(catalog.keys().len(), 5);
    }

    #[test]
    fn test_spec_builds_matching_node() {
        let reverb = EffectSpec::Reverb { mix: 0.3, decay: 2.0 }.build();
        assert_eq!(reverb.name(), "reverb");
        assert!(reverb.is_heavy());
        assert!(!EffectSpec::Equalizer { gains: vec![] }.build().is_heavy());
    }

    #[test]
    fn test_spec_serde_tag() {
        let spec: EffectSpec = serde_json::from_str(r#"{"kind":"gain","gain":0.7}"#).unwrap();
        assert_eq!(spec, EffectSpec::Gain { gain: 0.7 });
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryPresetStore::default();
        assert_eq!(store.load_theme(), None);
        store.save_theme("hall");
        assert_eq!(store.load_theme().as_deref(), Some("hall"));
    }
}
