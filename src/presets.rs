use crate::state::{EqState, StateMap};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// =============================================================================
// FACTORY PRESETS
// =============================================================================

pub const FLAT_PRESET: &str = "Flat";

/// One factory preset. `values` uses the same flat keys as saved state; anything
/// not listed stays at its factory default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PresetValues {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub values: StateMap,
}

impl PresetValues {
    pub fn state(&self) -> EqState {
        EqState::from_map(&self.values)
    }
}

#[derive(Debug)]
pub struct PresetBank {
    presets: HashMap<String, PresetValues>,
}

impl PresetBank {
    /// Load presets from baked-in JSON. This is fallible but non-fatal.
    /// Returns a bank holding only "Flat" if parsing fails.
    pub fn new() -> Self {
        Self::from_json(include_str!("../presets.json"))
    }

    pub fn from_json(json: &str) -> Self {
        match serde_json::from_str::<HashMap<String, PresetValues>>(json) {
            Ok(presets) => Self { presets },
            Err(e) => {
                log::warn!("failed to parse presets: {}", e);
                Self::default()
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&PresetValues> {
        self.presets.get(name)
    }

    /// Sorted preset names.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.presets.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }
}

impl Default for PresetBank {
    fn default() -> Self {
        let mut presets = HashMap::new();
        presets.insert(
            FLAT_PRESET.to_string(),
            PresetValues {
                description: "Factory settings".to_string(),
                values: StateMap::new(),
            },
        );
        Self { presets }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::band::FilterType;
    use crate::params::ParamId;

    #[test]
    fn test_factory_presets_parse() {
        let bank = PresetBank::new();
        assert!(bank.len() > 1);
        assert!(bank.get(FLAT_PRESET).is_some());
        for name in bank.names() {
            let preset = bank.get(name).unwrap();
            for key in preset.values.keys() {
                assert!(ParamId::from_key(key).is_some(), "{}: unknown key {}", name, key);
            }
        }
    }

    #[test]
    fn test_flat_is_factory_state() {
        let bank = PresetBank::new();
        assert_eq!(bank.get(FLAT_PRESET).unwrap().state(), EqState::default());
    }

    #[test]
    fn test_preset_overrides_only_listed_keys() {
        let bank = PresetBank::new();
        let state = bank.get("Telephone").unwrap().state();
        assert_eq!(state.bands[0].filter_type, FilterType::HighPass);
        assert_eq!(state.bands[0].frequency, 300.0);
        assert_eq!(state.bands[5].frequency, 3400.0);
        assert!(!state.bands[1].active);
        assert!(state.bands[2].active);
        assert!((state.output_gain - 1.2).abs() < 1e-6);
    }

    #[test]
    fn test_malformed_json_falls_back_to_flat() {
        let bank = PresetBank::from_json("{ broken");
        assert_eq!(bank.names(), vec![FLAT_PRESET]);
    }
}
