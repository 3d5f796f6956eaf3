//! Composite response aggregation.
//!
//! Combines the per-band magnitude curves into the single curve shown to the
//! user and tells registered listeners when it changes. Everything here runs on
//! the control thread; the audio thread never touches these arrays.

use crate::dsp::band::Band;
use log::warn;
use std::panic::{catch_unwind, AssertUnwindSafe};

pub const GRID_POINTS: usize = 300;
pub const GRID_START_HZ: f64 = 20.0;
pub const GRID_POINTS_PER_OCTAVE: f64 = 30.0;

/// Log-spaced analysis frequencies, shared read-only by all bands.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisGrid {
    frequencies: Vec<f64>,
}

impl Default for AnalysisGrid {
    fn default() -> Self {
        Self::new(GRID_POINTS, GRID_START_HZ, GRID_POINTS_PER_OCTAVE)
    }
}

impl AnalysisGrid {
    /// `points` frequencies starting at `start_hz`, `per_octave` points per octave.
    pub fn new(points: usize, start_hz: f64, per_octave: f64) -> Self {
        let frequencies = (0..points)
            .map(|i| start_hz * 2f64.powf(i as f64 / per_octave))
            .collect();
        Self { frequencies }
    }

    pub fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    pub fn len(&self) -> usize {
        self.frequencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frequencies.is_empty()
    }

    /// Index of the grid point closest to `freq` on a log scale.
    pub fn nearest_index(&self, freq: f64) -> usize {
        if self.frequencies.is_empty() || !(freq > 0.0) {
            return 0;
        }
        let target = freq.ln();
        self.frequencies
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                (a.ln() - target)
                    .abs()
                    .total_cmp(&(b.ln() - target).abs())
            })
            .map(|(i, _)| i)
            .unwrap_or(0)
    }
}

/// Handle returned by [`ChangeListeners::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Box<dyn FnMut(&[f64]) + Send>;

/// Typed "composite response changed" callback registry.
#[derive(Default)]
pub struct ChangeListeners {
    next_id: u64,
    listeners: Vec<(ListenerId, Listener)>,
}

impl ChangeListeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, listener: impl FnMut(&[f64]) + Send + 'static) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(existing, _)| *existing != id);
        self.listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Call every listener. A panicking listener does not stop the others.
    pub fn notify(&mut self, composite: &[f64]) {
        for (id, listener) in self.listeners.iter_mut() {
            if catch_unwind(AssertUnwindSafe(|| listener(composite))).is_err() {
                warn!("response listener {:?} panicked; continuing", id);
            }
        }
    }
}

/// Owns the composite curve and its listeners.
pub struct ResponseAggregator {
    composite: Vec<f64>,
    listeners: ChangeListeners,
}

impl ResponseAggregator {
    pub fn new(points: usize) -> Self {
        Self {
            composite: vec![1.0; points],
            listeners: ChangeListeners::new(),
        }
    }

    pub fn composite(&self) -> &[f64] {
        &self.composite
    }

    pub fn listeners_mut(&mut self) -> &mut ChangeListeners {
        &mut self.listeners
    }

    /// Rebuild the composite curve, then notify listeners.
    ///
    /// With a solo, only the soloed band contributes. Otherwise every active band
    /// does; with none active the curve is flat at `output_gain`.
    pub fn recompute(&mut self, bands: &[Band], solo: Option<usize>, output_gain: f64) {
        self.composite.fill(output_gain);

        match solo.and_then(|index| bands.get(index)) {
            Some(band) => multiply_into(&mut self.composite, band.magnitudes()),
            None => {
                for band in bands.iter().filter(|b| b.is_active()) {
                    multiply_into(&mut self.composite, band.magnitudes());
                }
            }
        }

        self.listeners.notify(&self.composite);
    }
}

#[inline]
fn multiply_into(dst: &mut [f64], src: &[f64]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d *= s;
    }
}
