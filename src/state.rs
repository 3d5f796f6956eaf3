//! Persisted engine state.
//!
//! State is a flat JSON object: one numeric entry per band field keyed
//! `"<band-id>-<field>"`, plus `"output"`. The filter type is stored as its
//! ordinal and the active flag as 0/1. Derived curves are never stored.
//!
//! Loading never fails. Malformed input resets everything to factory defaults,
//! missing or unusable entries fall back to that band's default, unknown keys are
//! ignored, and out-of-range values are clamped like live edits.

use crate::dsp::band::{BandSettings, FilterType, DEFAULT_BANDS};
use crate::params::{
    clamp_frequency, clamp_gain, clamp_output_gain, clamp_quality, BandField, ParamId, NUM_BANDS,
    OUTPUT_GAIN_DEFAULT,
};
use anyhow::{anyhow, Context};
use log::warn;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Flat key/value view of the state, as stored and as used by presets.
pub type StateMap = BTreeMap<String, f64>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EqState {
    pub bands: [BandSettings; NUM_BANDS],
    pub output_gain: f32,
}

impl Default for EqState {
    fn default() -> Self {
        Self {
            bands: std::array::from_fn(|i| DEFAULT_BANDS[i].settings()),
            output_gain: OUTPUT_GAIN_DEFAULT,
        }
    }
}

impl EqState {
    pub fn value(&self, id: ParamId) -> f64 {
        match id {
            ParamId::Output => self.output_gain as f64,
            ParamId::Band { index, field } => {
                let band = &self.bands[index];
                match field {
                    BandField::Type => band.filter_type.ordinal() as f64,
                    BandField::Frequency => band.frequency as f64,
                    BandField::Quality => band.quality as f64,
                    BandField::Gain => band.gain as f64,
                    BandField::Active => {
                        if band.active {
                            1.0
                        } else {
                            0.0
                        }
                    }
                }
            }
        }
    }

    pub fn to_map(&self) -> StateMap {
        ParamId::all().map(|id| (id.key(), self.value(id))).collect()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match serde_json::to_vec(&self.to_map()) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("failed to serialise EQ state: {}", e);
                Vec::new()
            }
        }
    }

    /// Build a state from a flat map. Every entry is decoded independently.
    pub fn from_map(map: &StateMap) -> Self {
        let mut state = Self::default();
        for id in ParamId::all() {
            let key = id.key();
            if let Some(&raw) = map.get(&key) {
                state.set_value(id, raw, &key);
            }
        }
        for key in map.keys() {
            if ParamId::from_key(key).is_none() {
                log::debug!("ignoring unknown state key '{}'", key);
            }
        }
        state
    }

    /// Decode serialised state, degrading to defaults instead of failing.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        match parse(bytes) {
            Ok(map) => Self::from_map(&map),
            Err(e) => {
                warn!("discarding malformed EQ state: {:#}", e);
                Self::default()
            }
        }
    }

    fn set_value(&mut self, id: ParamId, raw: f64, key: &str) {
        if !raw.is_finite() {
            warn!("state value for '{}' is not finite; using default", key);
            return;
        }
        match id {
            ParamId::Output => self.output_gain = clamp_output_gain(raw as f32),
            ParamId::Band { index, field } => {
                let band = &mut self.bands[index];
                match field {
                    BandField::Type => band.filter_type = decode_type(raw),
                    BandField::Frequency => band.frequency = clamp_frequency(raw as f32),
                    BandField::Quality => band.quality = clamp_quality(raw as f32),
                    BandField::Gain => band.gain = clamp_gain(raw as f32),
                    BandField::Active => band.active = raw >= 0.5,
                }
            }
        }
    }
}

/// Nearest ordinal, clamped into the table.
fn decode_type(raw: f64) -> FilterType {
    let last = (FilterType::ALL.len() - 1) as f64;
    FilterType::ALL[raw.round().clamp(0.0, last) as usize]
}

/// Parse a flat JSON object. Entries that are not numbers are dropped with a warning.
pub(crate) fn parse(bytes: &[u8]) -> anyhow::Result<StateMap> {
    let value: Value = serde_json::from_slice(bytes).context("state is not valid JSON")?;
    let object: Map<String, Value> = match value {
        Value::Object(object) => object,
        other => return Err(anyhow!("expected a JSON object, found {}", kind(&other))),
    };

    let mut map = StateMap::new();
    for (key, value) in object {
        match value.as_f64() {
            Some(v) => {
                map.insert(key, v);
            }
            None => warn!("state key '{}' is not numeric; using default", key),
        }
    }
    Ok(map)
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{FREQUENCY_MAX, GAIN_MIN, OUTPUT_GAIN_MAX};

    fn edited() -> EqState {
        let mut state = EqState::default();
        state.bands[0].filter_type = FilterType::HighPass1st;
        state.bands[2].frequency = 731.123_4;
        state.bands[2].quality = 3.3;
        state.bands[3].gain = 0.316_227_8;
        state.bands[5].active = false;
        state.output_gain = 0.77;
        state
    }

    #[test]
    fn test_round_trip_is_exact() {
        let state = edited();
        assert_eq!(EqState::from_bytes(&state.to_bytes()), state);
    }

    #[test]
    fn test_keys_are_flat() {
        let map = EqState::default().to_map();
        assert_eq!(map.len(), 1 + NUM_BANDS * 5);
        assert_eq!(map["output"], 1.0);
        assert_eq!(map["lowest-type"], FilterType::HighPass.ordinal() as f64);
        assert_eq!(map["high-mids-frequency"], 1000.0);
        assert_eq!(map["highest-active"], 1.0);
    }

    #[test]
    fn test_malformed_json_gives_defaults() {
        assert_eq!(EqState::from_bytes(b"{ not json"), EqState::default());
        assert_eq!(EqState::from_bytes(b"[1, 2, 3]"), EqState::default());
        assert_eq!(EqState::from_bytes(b""), EqState::default());
    }

    #[test]
    fn test_partial_state_keeps_band_defaults() {
        let state = EqState::from_bytes(br#"{"low-gain": 2.0, "mystery": 5, "high-q": "wide"}"#);
        assert_eq!(state.bands[1].gain, 2.0);
        assert_eq!(state.bands[1].frequency, 250.0);
        assert_eq!(state.bands[4], DEFAULT_BANDS[4].settings());
        assert_eq!(state.output_gain, 1.0);
    }

    #[test]
    fn test_out_of_range_values_clamp() {
        let state = EqState::from_bytes(
            br#"{"output": 9.0, "low-frequency": 1e9, "low-gain": 0.0, "low-type": 42, "low-active": 0}"#,
        );
        assert_eq!(state.output_gain, OUTPUT_GAIN_MAX);
        assert_eq!(state.bands[1].frequency, FREQUENCY_MAX);
        assert_eq!(state.bands[1].gain, GAIN_MIN);
        assert_eq!(state.bands[1].filter_type, FilterType::LowPass);
        assert!(!state.bands[1].active);
    }

    #[test]
    fn test_type_ordinals_round_and_clamp() {
        assert_eq!(decode_type(-3.0), FilterType::NoFilter);
        assert_eq!(decode_type(0.4), FilterType::NoFilter);
        assert_eq!(decode_type(7.6), FilterType::Peak);
        assert_eq!(decode_type(11.0), FilterType::LowPass);
    }

    #[test]
    fn test_non_finite_values_use_default() {
        let mut map = StateMap::new();
        map.insert("low-mids-frequency".into(), f64::NAN);
        map.insert("output".into(), f64::INFINITY);
        let state = EqState::from_map(&map);
        assert_eq!(state.bands[2].frequency, 500.0);
        assert_eq!(state.output_gain, 1.0);
    }

    #[test]
    fn test_parse_reports_shape_errors() {
        let err = parse(b"\"hello\"").unwrap_err();
        assert!(format!("{:#}", err).contains("a string"));
        assert!(parse(b"{}").unwrap().is_empty());
    }
}
