//! Lock-free level meters shared between the audio thread and collaborators.
//!
//! Peaks are stored as `f32` bits in atomics. The audio thread writes once per
//! block; readers poll whenever they like.

use std::sync::atomic::{AtomicU32, Ordering};

pub const METER_CHANNELS: usize = 2;

#[derive(Default)]
pub struct Meters {
    input_peak: [AtomicU32; METER_CHANNELS],
    output_peak: [AtomicU32; METER_CHANNELS],
}

#[inline]
fn store(cell: &AtomicU32, val: f32) {
    cell.store(val.to_bits(), Ordering::Relaxed);
}

#[inline]
fn load(cell: &AtomicU32) -> f32 {
    f32::from_bits(cell.load(Ordering::Relaxed))
}

/// Absolute peak of a block.
#[inline]
pub fn block_peak(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()))
}

impl Meters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_input_peak(&self, channel: usize, val: f32) {
        if let Some(cell) = self.input_peak.get(channel) {
            store(cell, val);
        }
    }

    pub fn set_output_peak(&self, channel: usize, val: f32) {
        if let Some(cell) = self.output_peak.get(channel) {
            store(cell, val);
        }
    }

    pub fn input_peak(&self, channel: usize) -> f32 {
        self.input_peak.get(channel).map(load).unwrap_or(0.0)
    }

    pub fn output_peak(&self, channel: usize) -> f32 {
        self.output_peak.get(channel).map(load).unwrap_or(0.0)
    }

    /// Record the input peaks of a planar block (extra channels are ignored).
    pub fn record_input(&self, channels: &[&mut [f32]]) {
        for (ch, samples) in channels.iter().enumerate().take(METER_CHANNELS) {
            self.set_input_peak(ch, block_peak(samples));
        }
    }

    pub fn record_output(&self, channels: &[&mut [f32]]) {
        for (ch, samples) in channels.iter().enumerate().take(METER_CHANNELS) {
            self.set_output_peak(ch, block_peak(samples));
        }
    }

    pub fn reset(&self) {
        for ch in 0..METER_CHANNELS {
            self.set_input_peak(ch, 0.0);
            self.set_output_peak(ch, 0.0);
        }
    }
}
