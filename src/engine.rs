//! Control-side equaliser engine.
//!
//! `EqEngine` owns the band parameters, their magnitude curves and the composite
//! response. Every edit recomputes the affected band's coefficients, commits them
//! to the shared chain state and rebuilds the composite before listeners are told.
//! The audio thread runs a [`FilterChain`] created from the same engine and only
//! ever sees committed snapshots.

use crate::dsp::band::{Band, BandSettings, BandView, FilterType, DEFAULT_BANDS};
use crate::dsp::biquad::BiquadCoefficients;
use crate::dsp::chain::{ChainShared, FilterChain, ProcessSpec};
use crate::dsp::response::{AnalysisGrid, ListenerId, ResponseAggregator};
use crate::params::{clamp_output_gain, BandChange, ParamChange, NUM_BANDS, OUTPUT_GAIN_DEFAULT};
use crate::presets::PresetBank;
use crate::state::EqState;
use log::{debug, warn};
use std::sync::Arc;

pub struct EqEngine {
    bands: [Band; NUM_BANDS],
    grid: AnalysisGrid,
    response: ResponseAggregator,
    solo: Option<usize>,
    output_gain: f32,
    sample_rate: f64,
    chain: Arc<ChainShared>,
}

impl Default for EqEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl EqEngine {
    /// Engine with factory bands and the default analysis grid.
    pub fn new() -> Self {
        Self::with_grid(AnalysisGrid::default())
    }

    pub fn with_grid(grid: AnalysisGrid) -> Self {
        let points = grid.len();
        let mut engine = Self {
            bands: std::array::from_fn(|i| Band::from_defaults(&DEFAULT_BANDS[i], points)),
            grid,
            response: ResponseAggregator::new(points),
            solo: None,
            output_gain: OUTPUT_GAIN_DEFAULT,
            sample_rate: 0.0,
            chain: Arc::new(ChainShared::new()),
        };
        engine.commit_bypass();
        engine.chain.commit_output_gain(engine.output_gain);
        engine.recompute();
        engine
    }

    /// A new audio-side chain reading this engine's committed state.
    pub fn filter_chain(&self) -> FilterChain {
        FilterChain::new(self.chain.clone())
    }

    pub fn shared_chain(&self) -> Arc<ChainShared> {
        self.chain.clone()
    }

    /// Adopt a new sample rate and recompute every band. Not realtime safe.
    pub fn prepare(&mut self, spec: &ProcessSpec) {
        if !(spec.sample_rate > 0.0) || !spec.sample_rate.is_finite() {
            warn!("ignoring invalid sample rate {}", spec.sample_rate);
            return;
        }
        self.sample_rate = spec.sample_rate;
        for index in 0..NUM_BANDS {
            self.design_band(index);
        }
        self.commit_bypass();
        self.chain.commit_output_gain(self.output_gain);
        self.recompute();
        debug!(
            "engine prepared: {} Hz, {} channels, block {}",
            spec.sample_rate, spec.num_channels, spec.max_block_size
        );
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    // -------------------------------------------------------------------------
    // Parameter edits
    // -------------------------------------------------------------------------

    pub fn set_band_type(&mut self, index: usize, filter_type: FilterType) {
        self.edit_band(index, |band| band.set_type(filter_type));
    }

    pub fn set_band_frequency(&mut self, index: usize, frequency: f32) {
        self.edit_band(index, |band| band.set_frequency(frequency));
    }

    pub fn set_band_quality(&mut self, index: usize, quality: f32) {
        self.edit_band(index, |band| band.set_quality(quality));
    }

    pub fn set_band_gain(&mut self, index: usize, gain: f32) {
        self.edit_band(index, |band| band.set_gain(gain));
    }

    pub fn set_band_active(&mut self, index: usize, active: bool) {
        self.edit_band(index, |band| band.set_active(active));
    }

    /// Replace all of a band's settings with one recompute.
    pub fn set_band(&mut self, index: usize, settings: BandSettings) {
        self.edit_band(index, |band| band.apply(&settings));
    }

    /// Linear output gain, clamped to [0, 2]. Non-finite values are ignored.
    pub fn set_output_gain(&mut self, gain: f32) {
        if !gain.is_finite() {
            return;
        }
        self.output_gain = clamp_output_gain(gain);
        self.chain.commit_output_gain(self.output_gain);
        self.recompute();
    }

    /// Exclusive solo. An out-of-range index clears the solo.
    pub fn set_solo(&mut self, solo: Option<usize>) {
        self.solo = solo.filter(|&index| index < NUM_BANDS);
        self.commit_bypass();
        self.recompute();
    }

    pub fn apply(&mut self, change: ParamChange) {
        match change {
            ParamChange::Band { index, change } => match change {
                BandChange::Type(t) => self.set_band_type(index, t),
                BandChange::Frequency(v) => self.set_band_frequency(index, v),
                BandChange::Quality(v) => self.set_band_quality(index, v),
                BandChange::Gain(v) => self.set_band_gain(index, v),
                BandChange::Active(v) => self.set_band_active(index, v),
            },
            ParamChange::Settings { index, settings } => self.set_band(index, settings),
            ParamChange::OutputGain(gain) => self.set_output_gain(gain),
            ParamChange::Solo(solo) => self.set_solo(solo),
        }
    }

    /// Recompute band `index` from its current parameters, commit it and refresh
    /// the composite.
    pub fn update_band(&mut self, index: usize) {
        if index >= NUM_BANDS {
            return;
        }
        self.design_band(index);
        self.commit_bypass();
        self.recompute();
    }

    fn edit_band(&mut self, index: usize, edit: impl FnOnce(&mut Band)) {
        match self.bands.get_mut(index) {
            Some(band) => edit(band),
            None => {
                warn!("band index {} out of range", index);
                return;
            }
        }
        self.update_band(index);
    }

    // Without a sample rate the previous coefficients and curve stay in place.
    fn design_band(&mut self, index: usize) {
        let band = &mut self.bands[index];
        let Some(coefficients) = BiquadCoefficients::design(
            band.filter_type(),
            band.frequency(),
            band.quality(),
            band.gain(),
            self.sample_rate,
        ) else {
            return;
        };
        coefficients.magnitudes_into(self.grid.frequencies(), self.sample_rate, band.magnitudes_mut());
        self.chain.commit_stage(index, coefficients);
    }

    fn bypass_map(&self) -> [bool; NUM_BANDS] {
        std::array::from_fn(|i| match self.solo {
            Some(soloed) => i != soloed,
            None => !self.bands[i].is_active(),
        })
    }

    fn commit_bypass(&self) {
        self.chain.commit_bypass(self.bypass_map());
    }

    fn recompute(&mut self) {
        self.response
            .recompute(&self.bands, self.solo, self.output_gain as f64);
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn num_bands(&self) -> usize {
        NUM_BANDS
    }

    pub fn band(&self, index: usize) -> Option<BandView> {
        self.bands
            .get(index)
            .map(|band| band.view(index, self.solo == Some(index)))
    }

    pub fn band_magnitudes(&self, index: usize) -> Option<&[f64]> {
        self.bands.get(index).map(Band::magnitudes)
    }

    pub fn composite_magnitudes(&self) -> &[f64] {
        self.response.composite()
    }

    pub fn output_gain(&self) -> f32 {
        self.output_gain
    }

    pub fn solo(&self) -> Option<usize> {
        self.solo
    }

    pub fn grid(&self) -> &AnalysisGrid {
        &self.grid
    }

    /// Whether stage `index` currently runs in the audio path.
    pub fn is_stage_bypassed(&self, index: usize) -> bool {
        self.bypass_map().get(index).copied().unwrap_or(true)
    }

    // -------------------------------------------------------------------------
    // Notifications
    // -------------------------------------------------------------------------

    /// Call `listener` with the composite curve after every change.
    pub fn subscribe(&mut self, listener: impl FnMut(&[f64]) + Send + 'static) -> ListenerId {
        self.response.listeners_mut().subscribe(listener)
    }

    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        self.response.listeners_mut().unsubscribe(id)
    }

    // -------------------------------------------------------------------------
    // Persistence
    // -------------------------------------------------------------------------

    pub fn state(&self) -> EqState {
        EqState {
            bands: std::array::from_fn(|i| self.bands[i].settings()),
            output_gain: self.output_gain,
        }
    }

    /// Apply a complete state with a single recompute. Solo is left untouched.
    pub fn apply_state(&mut self, state: &EqState) {
        for (band, settings) in self.bands.iter_mut().zip(state.bands.iter()) {
            band.apply(settings);
        }
        if state.output_gain.is_finite() {
            self.output_gain = clamp_output_gain(state.output_gain);
        }
        for index in 0..NUM_BANDS {
            self.design_band(index);
        }
        self.commit_bypass();
        self.chain.commit_output_gain(self.output_gain);
        self.recompute();
    }

    pub fn save_state(&self) -> Vec<u8> {
        self.state().to_bytes()
    }

    /// Restore saved state. Never fails; see [`EqState::from_bytes`].
    pub fn load_state(&mut self, bytes: &[u8]) {
        let state = EqState::from_bytes(bytes);
        self.apply_state(&state);
    }

    /// Returns false when `name` is not in the bank.
    pub fn apply_preset(&mut self, bank: &PresetBank, name: &str) -> bool {
        match bank.get(name) {
            Some(preset) => {
                self.apply_state(&preset.state());
                true
            }
            None => {
                warn!("unknown preset '{}'", name);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    const SPEC: ProcessSpec = ProcessSpec {
        sample_rate: 48000.0,
        max_block_size: 256,
        num_channels: 2,
    };

    fn prepared() -> EqEngine {
        let mut engine = EqEngine::new();
        engine.prepare(&SPEC);
        engine
    }

    #[test]
    fn test_unprepared_engine_is_flat() {
        let engine = EqEngine::new();
        assert_eq!(engine.num_bands(), 6);
        assert!(engine.composite_magnitudes().iter().all(|&m| m == 1.0));
        assert_eq!(engine.band(2).unwrap().name, "Low Mids");
        assert!(engine.band(6).is_none());
    }

    #[test]
    fn test_prepare_commits_every_stage() {
        let engine = prepared();
        let snapshot = engine.shared_chain().snapshot();
        let expected = BiquadCoefficients::design(FilterType::HighPass, 20.0, 0.707, 1.0, 48000.0).unwrap();
        assert_eq!(snapshot.stages[0].coefficients, expected);
        assert!(snapshot.stages.iter().all(|s| !s.bypassed));
    }

    #[test]
    fn test_new_sample_rate_redesigns_bands() {
        let mut engine = prepared();
        assert_eq!(engine.sample_rate(), 48000.0);
        let before = engine.shared_chain().snapshot().stages[0].coefficients;
        let top = engine.grid().nearest_index(20000.0);
        let lowpass_before = engine.band_magnitudes(5).unwrap()[top];

        engine.prepare(&ProcessSpec {
            sample_rate: 96000.0,
            ..SPEC
        });
        assert_eq!(engine.sample_rate(), 96000.0);
        let after = engine.shared_chain().snapshot().stages[0].coefficients;
        assert_ne!(before, after);
        assert_eq!(
            after,
            BiquadCoefficients::design(FilterType::HighPass, 20.0, 0.707, 1.0, 96000.0).unwrap()
        );
        let lowpass_after = engine.band_magnitudes(5).unwrap()[top];
        assert!(
            (lowpass_after - lowpass_before).abs() > 1e-3,
            "{} vs {}",
            lowpass_before,
            lowpass_after
        );

        // An invalid rate keeps the previous design.
        engine.prepare(&ProcessSpec {
            sample_rate: 0.0,
            ..SPEC
        });
        assert_eq!(engine.sample_rate(), 96000.0);
        assert_eq!(engine.shared_chain().snapshot().stages[0].coefficients, after);
    }

    #[test]
    fn test_setter_updates_curve_and_chain() {
        let mut engine = prepared();
        engine.set_band_gain(3, 4.0);
        let idx = engine.grid().nearest_index(1000.0);
        let mag = engine.band_magnitudes(3).unwrap()[idx];
        assert!(mag > 3.0, "peak magnitude {}", mag);
        let committed = engine.shared_chain().snapshot().stages[3].coefficients;
        assert!((committed.magnitude_at(1000.0, 48000.0) - 4.0).abs() < 1e-3);
    }

    #[test]
    fn test_solo_drives_bypass_map() {
        let mut engine = prepared();
        engine.set_band_active(2, false);
        assert!(engine.is_stage_bypassed(2));

        engine.set_solo(Some(2));
        let snapshot = engine.shared_chain().snapshot();
        for (i, stage) in snapshot.stages.iter().enumerate() {
            assert_eq!(stage.bypassed, i != 2);
        }
        assert!(engine.band(2).unwrap().soloed);

        engine.set_solo(Some(17));
        assert_eq!(engine.solo(), None);
        assert!(engine.is_stage_bypassed(2));
        assert!(!engine.is_stage_bypassed(0));
    }

    #[test]
    fn test_out_of_range_band_is_ignored() {
        let mut engine = prepared();
        let before = engine.composite_magnitudes().to_vec();
        engine.set_band_gain(9, 4.0);
        engine.apply(ParamChange::Band {
            index: 6,
            change: BandChange::Active(false),
        });
        assert_eq!(engine.composite_magnitudes(), &before[..]);
    }

    #[test]
    fn test_apply_dispatches_changes() {
        let mut engine = prepared();
        engine.apply(ParamChange::Band {
            index: 1,
            change: BandChange::Type(FilterType::Notch),
        });
        engine.apply(ParamChange::OutputGain(0.5));
        engine.apply(ParamChange::Solo(Some(4)));
        assert_eq!(engine.band(1).unwrap().filter_type, FilterType::Notch);
        assert_eq!(engine.output_gain(), 0.5);
        assert_eq!(engine.solo(), Some(4));
    }

    #[test]
    fn test_listeners_see_updated_composite() {
        let mut engine = prepared();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let id = engine.subscribe(move |curve| *s.lock().unwrap() = curve.to_vec());

        for i in 0..NUM_BANDS {
            engine.set_band_active(i, false);
        }
        engine.set_output_gain(0.25);
        {
            let curve = seen.lock().unwrap();
            assert_eq!(curve.len(), engine.grid().len());
            assert!(curve.iter().all(|&m| (m - 0.25).abs() < 1e-12));
        }

        assert!(engine.unsubscribe(id));
        engine.set_output_gain(0.5);
        assert!(seen.lock().unwrap().iter().all(|&m| (m - 0.25).abs() < 1e-12));
    }

    #[test]
    fn test_state_round_trip() {
        let mut engine = prepared();
        engine.set_band_frequency(2, 812.5);
        engine.set_band_type(5, FilterType::LowPass1st);
        engine.set_output_gain(1.3);
        let bytes = engine.save_state();

        let mut restored = prepared();
        restored.load_state(&bytes);
        assert_eq!(restored.state(), engine.state());
        assert_eq!(restored.composite_magnitudes(), engine.composite_magnitudes());
    }

    #[test]
    fn test_unknown_preset_is_rejected() {
        let mut engine = prepared();
        let bank = PresetBank::new();
        assert!(!engine.apply_preset(&bank, "Does Not Exist"));
        assert!(engine.apply_preset(&bank, "Mud Cut"));
        assert_eq!(engine.band(2).unwrap().frequency, 300.0);
    }
}
