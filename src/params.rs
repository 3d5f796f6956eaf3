//! Parameter table.
//!
//! Every engine parameter is addressed by a [`ParamId`] (band index x field, or the
//! global output gain). Host automation goes through [`EqParams`], whose callbacks
//! only flag which parameters moved; the values are applied later on the control
//! thread as [`ParamChange`]s.

use crate::dsp::band::{BandDefaults, BandSettings, FilterType, DEFAULT_BANDS};
use nih_plug::prelude::*;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

pub const NUM_BANDS: usize = 6;

pub const FREQUENCY_MIN: f32 = 20.0;
pub const FREQUENCY_MAX: f32 = 20000.0;
pub const QUALITY_MIN: f32 = 0.1;
pub const QUALITY_MAX: f32 = 10.0;
// Values shown at the middle of the frequency and quality knobs.
const FREQUENCY_CENTRE: f32 = 1000.0;
const QUALITY_CENTRE: f32 = 1.0;
/// +24 dB as a linear factor.
pub const GAIN_MAX: f32 = 15.848_932;
/// -24 dB as a linear factor.
pub const GAIN_MIN: f32 = 1.0 / GAIN_MAX;
pub const OUTPUT_GAIN_MIN: f32 = 0.0;
pub const OUTPUT_GAIN_MAX: f32 = 2.0;
pub const OUTPUT_GAIN_DEFAULT: f32 = 1.0;

/// Key of the output gain in persisted state.
pub const OUTPUT_KEY: &str = "output";

// Dirty-mask layout: one bit per band, then output. Solo is not a host parameter.
pub const OUTPUT_DIRTY_BIT: u32 = 1 << NUM_BANDS;
pub const ALL_DIRTY: u32 = (1 << (NUM_BANDS + 1)) - 1;

pub fn clamp_frequency(hz: f32) -> f32 {
    hz.clamp(FREQUENCY_MIN, FREQUENCY_MAX)
}

pub fn clamp_quality(q: f32) -> f32 {
    q.clamp(QUALITY_MIN, QUALITY_MAX)
}

pub fn clamp_gain(gain: f32) -> f32 {
    gain.clamp(GAIN_MIN, GAIN_MAX)
}

pub fn clamp_output_gain(gain: f32) -> f32 {
    gain.clamp(OUTPUT_GAIN_MIN, OUTPUT_GAIN_MAX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BandField {
    Type,
    Frequency,
    Quality,
    Gain,
    Active,
}

impl BandField {
    pub const ALL: [BandField; 5] = [
        BandField::Type,
        BandField::Frequency,
        BandField::Quality,
        BandField::Gain,
        BandField::Active,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            BandField::Type => "type",
            BandField::Frequency => "frequency",
            BandField::Quality => "quality",
            BandField::Gain => "gain",
            BandField::Active => "active",
        }
    }
}

/// Address of one engine parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamId {
    Output,
    Band { index: usize, field: BandField },
}

impl ParamId {
    /// Every parameter: output first, then each band's fields in order.
    pub fn all() -> impl Iterator<Item = ParamId> {
        std::iter::once(ParamId::Output).chain((0..NUM_BANDS).flat_map(|index| {
            BandField::ALL
                .iter()
                .map(move |&field| ParamId::Band { index, field })
        }))
    }

    /// Flat key used in saved state and presets, e.g. `low-mids-frequency`.
    pub fn key(&self) -> String {
        match self {
            ParamId::Output => OUTPUT_KEY.to_string(),
            ParamId::Band { index, field } => {
                format!("{}-{}", DEFAULT_BANDS[*index].id, field.key())
            }
        }
    }

    /// Table lookup, no string parsing.
    pub fn from_key(key: &str) -> Option<ParamId> {
        Self::all().find(|id| id.key() == key)
    }
}

/// A single band field change.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BandChange {
    Type(FilterType),
    Frequency(f32),
    Quality(f32),
    Gain(f32),
    Active(bool),
}

/// Tagged parameter edit dispatched by [`crate::engine::EqEngine::apply`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamChange {
    Band { index: usize, change: BandChange },
    Settings { index: usize, settings: BandSettings },
    OutputGain(f32),
    Solo(Option<usize>),
}

// Helper to format linear gain as dB for the DAW display
fn format_gain_db(v: f32) -> String {
    if v <= 0.0 {
        "-inf dB".to_string()
    } else {
        format!("{:.1} dB", util::gain_to_db(v))
    }
}

fn parse_gain_db(text: &str) -> Option<f32> {
    let trimmed = text.trim().trim_end_matches("dB").trim();
    trimmed.parse::<f32>().ok().map(util::db_to_gain)
}

/// Skew factor that puts `centre` at the middle of the knob travel.
fn centred_skew(min: f32, max: f32, centre: f32) -> f32 {
    0.5f32.ln() / ((centre - min) / (max - min)).ln()
}

fn mark_dirty(dirty: &Arc<AtomicU32>, bits: u32) -> impl Fn() + Send + Sync {
    let dirty = dirty.clone();
    move || {
        dirty.fetch_or(bits, Ordering::Release);
    }
}

// -----------------------------------------------------------------------------
// HOST PARAMETERS
// -----------------------------------------------------------------------------
#[derive(Params)]
pub struct BandParams {
    #[id = "type"]
    pub filter_type: EnumParam<FilterType>,

    #[id = "freq"]
    pub frequency: FloatParam,

    #[id = "q"]
    pub quality: FloatParam,

    #[id = "gain"]
    pub gain: FloatParam,

    #[id = "active"]
    pub active: BoolParam,
}

impl BandParams {
    fn new(index: usize, defaults: &BandDefaults, dirty: &Arc<AtomicU32>) -> Self {
        let bit = 1u32 << index;

        let on_type = mark_dirty(dirty, bit);
        let on_freq = mark_dirty(dirty, bit);
        let on_q = mark_dirty(dirty, bit);
        let on_gain = mark_dirty(dirty, bit);
        let on_active = mark_dirty(dirty, bit);

        Self {
            filter_type: EnumParam::new("Filter Type", defaults.filter_type)
                .with_callback(Arc::new(move |_| on_type())),

            frequency: FloatParam::new(
                "Frequency",
                defaults.frequency,
                FloatRange::Skewed {
                    min: FREQUENCY_MIN,
                    max: FREQUENCY_MAX,
                    factor: centred_skew(FREQUENCY_MIN, FREQUENCY_MAX, FREQUENCY_CENTRE),
                },
            )
            .with_value_to_string(formatters::v2s_f32_hz_then_khz(2))
            .with_string_to_value(formatters::s2v_f32_hz_then_khz())
            .with_callback(Arc::new(move |_| on_freq())),

            quality: FloatParam::new(
                "Quality",
                defaults.quality,
                FloatRange::Skewed {
                    min: QUALITY_MIN,
                    max: QUALITY_MAX,
                    factor: centred_skew(QUALITY_MIN, QUALITY_MAX, QUALITY_CENTRE),
                },
            )
            .with_value_to_string(formatters::v2s_f32_rounded(2))
            .with_callback(Arc::new(move |_| on_q())),

            gain: FloatParam::new(
                "Gain",
                defaults.gain,
                FloatRange::Skewed {
                    min: GAIN_MIN,
                    max: GAIN_MAX,
                    factor: FloatRange::gain_skew_factor(-24.0, 24.0),
                },
            )
            .with_value_to_string(Arc::new(format_gain_db))
            .with_string_to_value(Arc::new(parse_gain_db))
            .with_callback(Arc::new(move |_| on_gain())),

            active: BoolParam::new("Active", defaults.active)
                .with_callback(Arc::new(move |_| on_active())),
        }
    }

    pub fn settings(&self) -> BandSettings {
        BandSettings {
            filter_type: self.filter_type.value(),
            frequency: self.frequency.value(),
            quality: self.quality.value(),
            gain: self.gain.value(),
            active: self.active.value(),
        }
    }
}

#[derive(Params)]
pub struct EqParams {
    #[nested(array, group = "Band")]
    pub bands: [BandParams; NUM_BANDS],

    #[id = "output"]
    pub output: FloatParam,

    #[id = "bypass"]
    pub bypass: BoolParam,
}

impl EqParams {
    /// Parameters with factory defaults. Every edit sets its bit in `dirty`.
    pub fn new(dirty: Arc<AtomicU32>) -> Self {
        let on_output = mark_dirty(&dirty, OUTPUT_DIRTY_BIT);

        Self {
            bands: std::array::from_fn(|i| BandParams::new(i, &DEFAULT_BANDS[i], &dirty)),

            output: FloatParam::new(
                "Output",
                OUTPUT_GAIN_DEFAULT,
                FloatRange::Linear {
                    min: OUTPUT_GAIN_MIN,
                    max: OUTPUT_GAIN_MAX,
                },
            )
            .with_step_size(0.01)
            .with_value_to_string(Arc::new(format_gain_db))
            .with_string_to_value(Arc::new(parse_gain_db))
            .with_callback(Arc::new(move |_| on_output())),

            bypass: BoolParam::new("Bypass", false).make_bypass(),
        }
    }

    /// Changes describing every parameter flagged in `mask`.
    pub fn changes(&self, mask: u32) -> Vec<ParamChange> {
        let mut changes = Vec::new();
        for (index, band) in self.bands.iter().enumerate() {
            if mask & (1 << index) != 0 {
                changes.push(ParamChange::Settings {
                    index,
                    settings: band.settings(),
                });
            }
        }
        if mask & OUTPUT_DIRTY_BIT != 0 {
            changes.push(ParamChange::OutputGain(self.output.value()));
        }
        changes
    }
}
