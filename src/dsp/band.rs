//! Equaliser band state.
//!
//! A band owns its user-facing parameters and the magnitude curve derived from
//! them. Setters only store (clamped) values; the engine is responsible for
//! recomputing coefficients and committing them to the filter chain afterwards.

use crate::params::{clamp_frequency, clamp_gain, clamp_quality, NUM_BANDS};
use nih_plug::prelude::Enum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Enum)]
#[repr(usize)]
pub enum FilterType {
    #[name = "No Filter"]
    NoFilter,
    #[name = "High Pass"]
    HighPass,
    #[name = "1st High Pass"]
    HighPass1st,
    #[name = "Low Shelf"]
    LowShelf,
    #[name = "Band Pass"]
    BandPass,
    #[name = "All Pass"]
    AllPass,
    #[name = "1st All Pass"]
    AllPass1st,
    #[name = "Notch"]
    Notch,
    #[name = "Peak"]
    Peak,
    #[name = "High Shelf"]
    HighShelf,
    #[name = "1st Low Pass"]
    LowPass1st,
    #[name = "Low Pass"]
    LowPass,
}

impl FilterType {
    /// Every type, ordered by its persisted ordinal.
    pub const ALL: [FilterType; 12] = [
        FilterType::NoFilter,
        FilterType::HighPass,
        FilterType::HighPass1st,
        FilterType::LowShelf,
        FilterType::BandPass,
        FilterType::AllPass,
        FilterType::AllPass1st,
        FilterType::Notch,
        FilterType::Peak,
        FilterType::HighShelf,
        FilterType::LowPass1st,
        FilterType::LowPass,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            FilterType::NoFilter => "No Filter",
            FilterType::HighPass => "High Pass",
            FilterType::HighPass1st => "1st High Pass",
            FilterType::LowShelf => "Low Shelf",
            FilterType::BandPass => "Band Pass",
            FilterType::AllPass => "All Pass",
            FilterType::AllPass1st => "1st All Pass",
            FilterType::Notch => "Notch",
            FilterType::Peak => "Peak",
            FilterType::HighShelf => "High Shelf",
            FilterType::LowPass1st => "1st Low Pass",
            FilterType::LowPass => "Low Pass",
        }
    }

    pub fn ordinal(&self) -> usize {
        *self as usize
    }

    /// Whether the quality control changes this type's response.
    pub fn uses_quality(&self) -> bool {
        !matches!(
            self,
            FilterType::NoFilter
                | FilterType::HighPass1st
                | FilterType::AllPass1st
                | FilterType::LowPass1st
        )
    }

    /// Whether the gain control changes this type's response.
    pub fn uses_gain(&self) -> bool {
        matches!(
            self,
            FilterType::LowShelf | FilterType::Peak | FilterType::HighShelf
        )
    }
}

/// Factory settings for one band.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandDefaults {
    pub id: &'static str,
    pub name: &'static str,
    pub filter_type: FilterType,
    pub frequency: f32,
    pub quality: f32,
    pub gain: f32,
    pub active: bool,
}

pub const DEFAULT_BANDS: [BandDefaults; NUM_BANDS] = [
    BandDefaults {
        id: "lowest",
        name: "Lowest",
        filter_type: FilterType::HighPass,
        frequency: 20.0,
        quality: 0.707,
        gain: 1.0,
        active: true,
    },
    BandDefaults {
        id: "low",
        name: "Low",
        filter_type: FilterType::LowShelf,
        frequency: 250.0,
        quality: 0.707,
        gain: 1.0,
        active: true,
    },
    BandDefaults {
        id: "low-mids",
        name: "Low Mids",
        filter_type: FilterType::Peak,
        frequency: 500.0,
        quality: 0.707,
        gain: 1.0,
        active: true,
    },
    BandDefaults {
        id: "high-mids",
        name: "High Mids",
        filter_type: FilterType::Peak,
        frequency: 1000.0,
        quality: 0.707,
        gain: 1.0,
        active: true,
    },
    BandDefaults {
        id: "high",
        name: "High",
        filter_type: FilterType::HighShelf,
        frequency: 5000.0,
        quality: 0.707,
        gain: 1.0,
        active: true,
    },
    BandDefaults {
        id: "highest",
        name: "Highest",
        filter_type: FilterType::LowPass,
        frequency: 12000.0,
        quality: 0.707,
        gain: 1.0,
        active: true,
    },
];

/// The user-editable part of a band, applied as one unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandSettings {
    pub filter_type: FilterType,
    pub frequency: f32,
    pub quality: f32,
    pub gain: f32,
    pub active: bool,
}

impl BandDefaults {
    pub fn settings(&self) -> BandSettings {
        BandSettings {
            filter_type: self.filter_type,
            frequency: self.frequency,
            quality: self.quality,
            gain: self.gain,
            active: self.active,
        }
    }
}

/// One parametric EQ stage.
#[derive(Debug, Clone)]
pub struct Band {
    name: &'static str,
    filter_type: FilterType,
    frequency: f32,
    quality: f32,
    gain: f32,
    active: bool,
    magnitudes: Vec<f64>,
}

impl Band {
    /// Band with factory settings and a flat (unity) magnitude curve of `points` entries.
    pub fn from_defaults(defaults: &BandDefaults, points: usize) -> Self {
        Self {
            name: defaults.name,
            filter_type: defaults.filter_type,
            frequency: clamp_frequency(defaults.frequency),
            quality: clamp_quality(defaults.quality),
            gain: clamp_gain(defaults.gain),
            active: defaults.active,
            magnitudes: vec![1.0; points],
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn filter_type(&self) -> FilterType {
        self.filter_type
    }

    pub fn frequency(&self) -> f32 {
        self.frequency
    }

    pub fn quality(&self) -> f32 {
        self.quality
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn magnitudes(&self) -> &[f64] {
        &self.magnitudes
    }

    pub(crate) fn magnitudes_mut(&mut self) -> &mut [f64] {
        &mut self.magnitudes
    }

    pub fn set_type(&mut self, filter_type: FilterType) {
        self.filter_type = filter_type;
    }

    // Non-finite values leave the stored value untouched.

    pub fn set_frequency(&mut self, frequency: f32) {
        if frequency.is_finite() {
            self.frequency = clamp_frequency(frequency);
        }
    }

    pub fn set_quality(&mut self, quality: f32) {
        if quality.is_finite() {
            self.quality = clamp_quality(quality);
        }
    }

    pub fn set_gain(&mut self, gain: f32) {
        if gain.is_finite() {
            self.gain = clamp_gain(gain);
        }
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub fn settings(&self) -> BandSettings {
        BandSettings {
            filter_type: self.filter_type,
            frequency: self.frequency,
            quality: self.quality,
            gain: self.gain,
            active: self.active,
        }
    }

    pub fn apply(&mut self, settings: &BandSettings) {
        self.set_type(settings.filter_type);
        self.set_frequency(settings.frequency);
        self.set_quality(settings.quality);
        self.set_gain(settings.gain);
        self.set_active(settings.active);
    }

    pub fn view(&self, index: usize, soloed: bool) -> BandView {
        BandView {
            index,
            name: self.name,
            filter_type: self.filter_type,
            frequency: self.frequency,
            quality: self.quality,
            gain: self.gain,
            active: self.active,
            soloed,
        }
    }
}

/// Read-only snapshot of a band handed out to collaborators.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandView {
    pub index: usize,
    pub name: &'static str,
    pub filter_type: FilterType,
    pub frequency: f32,
    pub quality: f32,
    pub gain: f32,
    pub active: bool,
    pub soloed: bool,
}
