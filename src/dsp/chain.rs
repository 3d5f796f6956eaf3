//! Filter chain: the band stages plus the trailing output gain.
//!
//! The chain is split in two halves:
//! - [`ChainShared`] holds the committed coefficients. The control thread designs
//!   coefficients off to the side and only locks to copy them in.
//! - [`FilterChain`] is owned by the audio thread. It keeps the delay lines and a
//!   private copy of the last snapshot it saw, refreshed with `try_lock` only when
//!   the generation counter moved. The audio thread never waits on the lock.
//!
//! # Lifecycle
//! `Uninitialized -> Prepared -> Processing`. `prepare` returns to `Prepared` from
//! any state. `process` before `prepare` leaves the buffer unchanged.

use crate::dsp::biquad::{Biquad, BiquadCoefficients};
use crate::eq_log;
use crate::params::{NUM_BANDS, OUTPUT_GAIN_DEFAULT};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, TryLockError};

/// Host processing configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessSpec {
    pub sample_rate: f64,
    pub max_block_size: usize,
    pub num_channels: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageSlot {
    pub coefficients: BiquadCoefficients,
    pub bypassed: bool,
}

impl Default for StageSlot {
    fn default() -> Self {
        Self {
            coefficients: BiquadCoefficients::IDENTITY,
            bypassed: false,
        }
    }
}

/// Everything the audio thread needs for one block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChainSnapshot {
    pub stages: [StageSlot; NUM_BANDS],
    pub output_gain: f32,
}

impl Default for ChainSnapshot {
    fn default() -> Self {
        Self {
            stages: [StageSlot::default(); NUM_BANDS],
            output_gain: OUTPUT_GAIN_DEFAULT,
        }
    }
}

/// Committed chain state shared between the control and audio threads.
#[derive(Debug, Default)]
pub struct ChainShared {
    snapshot: Mutex<ChainSnapshot>,
    generation: AtomicU64,
}

impl ChainShared {
    pub fn new() -> Self {
        Self::default()
    }

    // The generation is bumped while the lock is held so a reader that copies
    // under the lock always pairs the snapshot with its own generation.
    fn edit(&self, f: impl FnOnce(&mut ChainSnapshot)) {
        let mut guard = self.snapshot.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard);
        self.generation.fetch_add(1, Ordering::Release);
    }

    pub fn commit_stage(&self, index: usize, coefficients: BiquadCoefficients) {
        if index >= NUM_BANDS {
            return;
        }
        self.edit(|snap| snap.stages[index].coefficients = coefficients);
    }

    pub fn commit_bypass(&self, bypassed: [bool; NUM_BANDS]) {
        self.edit(|snap| {
            for (stage, &b) in snap.stages.iter_mut().zip(bypassed.iter()) {
                stage.bypassed = b;
            }
        });
    }

    pub fn commit_output_gain(&self, gain: f32) {
        self.edit(|snap| snap.output_gain = gain);
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Blocking read for non-realtime callers.
    pub fn snapshot(&self) -> ChainSnapshot {
        self.read().0
    }

    fn read(&self) -> (ChainSnapshot, u64) {
        let guard = self.snapshot.lock().unwrap_or_else(PoisonError::into_inner);
        (*guard, self.generation.load(Ordering::Acquire))
    }

    /// Non-blocking read: `None` when a writer currently holds the lock.
    pub fn try_snapshot(&self) -> Option<(ChainSnapshot, u64)> {
        let guard = match self.snapshot.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return None,
        };
        let generation = self.generation.load(Ordering::Acquire);
        Some((*guard, generation))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainLifecycle {
    Uninitialized,
    Prepared,
    Processing,
}

/// Audio-thread half of the chain.
pub struct FilterChain {
    shared: Arc<ChainShared>,
    current: ChainSnapshot,
    seen_generation: u64,
    // One row of stages per channel.
    filters: Vec<[Biquad; NUM_BANDS]>,
    applied_gain: f32,
    lifecycle: ChainLifecycle,
    bypassed: bool,
    needs_reset: bool,
}

impl FilterChain {
    pub fn new(shared: Arc<ChainShared>) -> Self {
        Self {
            shared,
            current: ChainSnapshot::default(),
            seen_generation: u64::MAX,
            filters: Vec::new(),
            applied_gain: OUTPUT_GAIN_DEFAULT,
            lifecycle: ChainLifecycle::Uninitialized,
            bypassed: false,
            needs_reset: true,
        }
    }

    pub fn lifecycle(&self) -> ChainLifecycle {
        self.lifecycle
    }

    pub fn num_channels(&self) -> usize {
        self.filters.len()
    }

    /// The snapshot the audio thread is currently running.
    pub fn current(&self) -> &ChainSnapshot {
        &self.current
    }

    /// Allocate silent delay lines for `spec.num_channels` and pick up the
    /// committed coefficients. Not realtime safe.
    pub fn prepare(&mut self, spec: &ProcessSpec) {
        self.filters = vec![[Biquad::new(); NUM_BANDS]; spec.num_channels];
        let (snapshot, generation) = self.shared.read();
        self.current = snapshot;
        self.seen_generation = generation;
        self.load_coefficients();
        self.applied_gain = self.current.output_gain;
        self.needs_reset = true;
        self.lifecycle = ChainLifecycle::Prepared;
    }

    /// Clear every delay line.
    pub fn reset(&mut self) {
        for row in self.filters.iter_mut() {
            for stage in row.iter_mut() {
                stage.reset();
            }
        }
    }

    /// Host-level bypass. Leaving bypass resets the delay lines once, on the next block.
    pub fn set_bypassed(&mut self, bypassed: bool) {
        if bypassed {
            self.needs_reset = true;
        }
        self.bypassed = bypassed;
    }

    pub fn is_bypassed(&self) -> bool {
        self.bypassed
    }

    fn load_coefficients(&mut self) {
        for row in self.filters.iter_mut() {
            for (stage, slot) in row.iter_mut().zip(self.current.stages.iter()) {
                stage.set_coefficients(&slot.coefficients);
            }
        }
    }

    fn refresh(&mut self) {
        if self.shared.generation() == self.seen_generation {
            return;
        }
        // Contended: keep running the previous snapshot, retry next block.
        if let Some((snapshot, generation)) = self.shared.try_snapshot() {
            self.current = snapshot;
            self.seen_generation = generation;
            self.load_coefficients();
            eq_log!("[chain] picked up generation {}", generation);
        }
    }

    /// Returns false when processing should not touch the buffer.
    fn begin_block(&mut self) -> bool {
        if self.lifecycle == ChainLifecycle::Uninitialized || self.bypassed {
            return false;
        }
        self.refresh();
        if self.needs_reset {
            self.reset();
            self.needs_reset = false;
            eq_log!("[chain] delay lines cleared before processing");
        }
        self.lifecycle = ChainLifecycle::Processing;
        true
    }

    /// Process planar channels in place.
    pub fn process(&mut self, channels: &mut [&mut [f32]]) {
        if !self.begin_block() {
            return;
        }

        let frames = channels.iter().map(|c| c.len()).min().unwrap_or(0);
        let start_gain = self.applied_gain;
        let end_gain = self.current.output_gain;

        // Ragged buffers: only the frames every channel has are processed.
        for (channel, row) in channels.iter_mut().zip(self.filters.iter_mut()) {
            let channel = &mut channel[..frames];
            for (stage, slot) in row.iter_mut().zip(self.current.stages.iter()) {
                if !slot.bypassed {
                    stage.process_block(channel);
                }
            }
            apply_gain_ramp(channel, start_gain, end_gain);
        }

        self.applied_gain = end_gain;
    }

    /// Process interleaved frames in place.
    pub fn process_interleaved(&mut self, data: &mut [f32], num_channels: usize) {
        if num_channels == 0 || !self.begin_block() {
            return;
        }

        let frames = data.len() / num_channels;
        let active_channels = num_channels.min(self.filters.len());
        let start_gain = self.applied_gain;
        let end_gain = self.current.output_gain;
        let step = ramp_step(start_gain, end_gain, frames);

        for frame in 0..frames {
            let gain = start_gain + step * frame as f32;
            let base = frame * num_channels;
            for ch in 0..active_channels {
                let mut sample = data[base + ch];
                for (stage, slot) in self.filters[ch].iter_mut().zip(self.current.stages.iter()) {
                    if !slot.bypassed {
                        sample = stage.process(sample);
                    }
                }
                data[base + ch] = sample * gain;
            }
        }

        self.applied_gain = end_gain;
    }
}

#[inline]
fn ramp_step(start: f32, end: f32, frames: usize) -> f32 {
    if frames == 0 || start == end {
        0.0
    } else {
        (end - start) / frames as f32
    }
}

#[inline]
fn apply_gain_ramp(samples: &mut [f32], start: f32, end: f32) {
    if start == end {
        if end != 1.0 {
            for s in samples.iter_mut() {
                *s *= end;
            }
        }
        return;
    }
    let step = ramp_step(start, end, samples.len());
    for (i, s) in samples.iter_mut().enumerate() {
        *s *= start + step * i as f32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::band::FilterType;
    const SPEC: ProcessSpec = ProcessSpec {
        sample_rate: 48000.0,
        max_block_size: 64,
        num_channels: 2,
    };

    fn prepared() -> (Arc<ChainShared>, FilterChain) {
        let shared = Arc::new(ChainShared::new());
        let mut chain = FilterChain::new(shared.clone());
        chain.prepare(&SPEC);
        (shared, chain)
    }

    #[test]
    fn test_unprepared_chain_leaves_buffer_unchanged() {
        let shared = Arc::new(ChainShared::new());
        shared.commit_output_gain(0.0);
        let mut chain = FilterChain::new(shared);

        let mut left = vec![0.25f32; 16];
        let mut right = vec![-0.5f32; 16];
        chain.process(&mut [&mut left[..], &mut right[..]]);
        assert!(left.iter().all(|&s| s == 0.25));
        assert!(right.iter().all(|&s| s == -0.5));

        let mut inter = vec![0.1f32; 8];
        chain.process_interleaved(&mut inter, 2);
        assert!(inter.iter().all(|&s| s == 0.1));
        assert_eq!(chain.lifecycle(), ChainLifecycle::Uninitialized);
    }

    #[test]
    fn test_identity_chain_passes_audio() {
        let (_shared, mut chain) = prepared();
        assert_eq!(chain.lifecycle(), ChainLifecycle::Prepared);
        assert_eq!(chain.num_channels(), SPEC.num_channels);
        let mut left: Vec<f32> = (0..32).map(|i| (i as f32 * 0.1).sin()).collect();
        let expected = left.clone();
        chain.process(&mut [&mut left[..]]);
        for (a, b) in left.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
        assert_eq!(chain.lifecycle(), ChainLifecycle::Processing);
    }

    #[test]
    fn test_commits_reach_audio_thread() {
        let (shared, mut chain) = prepared();
        let c = BiquadCoefficients::design(FilterType::Peak, 1000.0, 1.0, 4.0, 48000.0).unwrap();
        shared.commit_stage(2, c);
        shared.commit_output_gain(0.5);

        let mut buf = vec![0.0f32; 4];
        chain.process(&mut [&mut buf[..]]);
        assert_eq!(chain.current().stages[2].coefficients, c);
        assert_eq!(chain.current().output_gain, 0.5);
    }

    #[test]
    fn test_bypassed_stage_is_skipped() {
        let (shared, mut chain) = prepared();
        let c = BiquadCoefficients::design(FilterType::Notch, 1000.0, 1.0, 1.0, 48000.0).unwrap();
        shared.commit_stage(0, c);
        let mut bypass = [false; NUM_BANDS];
        bypass[0] = true;
        shared.commit_bypass(bypass);

        // A notch at 1 kHz would smear the impulse; bypassed it must come out clean.
        let mut buf = vec![1.0f32, 0.0, 0.0, 0.0];
        chain.process(&mut [&mut buf[..]]);
        assert!((buf[0] - 1.0).abs() < 1e-6);
        assert!(buf[1..].iter().all(|s| s.abs() < 1e-12));
    }

    #[test]
    fn test_output_gain_ramps_then_holds() {
        let (shared, mut chain) = prepared();
        shared.commit_output_gain(0.0);

        let mut buf = vec![1.0f32; 4];
        chain.process(&mut [&mut buf[..]]);
        assert!((buf[0] - 1.0).abs() < 1e-6);
        assert!(buf[3] < buf[0]);

        let mut buf = vec![1.0f32; 4];
        chain.process(&mut [&mut buf[..]]);
        assert!(buf.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_leaving_bypass_clears_state() {
        let (shared, mut chain) = prepared();
        let c = BiquadCoefficients::design(FilterType::LowPass, 200.0, 0.707, 1.0, 48000.0).unwrap();
        shared.commit_stage(0, c);

        let mut buf = vec![1.0f32; 64];
        chain.process(&mut [&mut buf[..]]);

        chain.set_bypassed(true);
        assert!(chain.is_bypassed());
        let mut untouched = vec![0.3f32; 8];
        chain.process(&mut [&mut untouched[..]]);
        assert!(untouched.iter().all(|&s| s == 0.3));

        chain.set_bypassed(false);
        assert!(!chain.is_bypassed());
        let mut silence = vec![0.0f32; 8];
        chain.process(&mut [&mut silence[..]]);
        assert!(silence.iter().all(|&s| s.abs() < 1e-12));
    }

    #[test]
    fn test_extra_channels_pass_through() {
        let shared = Arc::new(ChainShared::new());
        let mut chain = FilterChain::new(shared.clone());
        chain.prepare(&ProcessSpec {
            num_channels: 1,
            ..SPEC
        });
        shared.commit_output_gain(0.0);
        let mut a = vec![1.0f32; 4];
        let mut b = vec![1.0f32; 4];
        chain.process(&mut [&mut a[..], &mut b[..]]);
        chain.process(&mut [&mut a[..], &mut b[..]]);
        assert!(a.iter().all(|&s| s == 0.0));
        assert!(b.iter().all(|&s| s == 1.0));
    }

    #[test]
    fn test_ragged_channels_stop_at_shortest() {
        let (shared, mut chain) = prepared();
        let c = BiquadCoefficients::design(FilterType::LowPass, 500.0, 0.707, 1.0, 48000.0).unwrap();
        shared.commit_stage(5, c);
        shared.commit_output_gain(0.5);

        let mut short = vec![1.0f32; 8];
        let mut long = vec![1.0f32; 16];
        chain.process(&mut [&mut short[..], &mut long[..]]);
        assert_eq!(short[..], long[..8]);
        assert!(long[..8].iter().all(|&s| s != 1.0));
        assert!(long[8..].iter().all(|&s| s == 1.0));
    }

    #[test]
    fn test_interleaved_matches_planar() {
        let (shared, mut planar) = prepared();
        let mut inter = FilterChain::new(shared.clone());
        inter.prepare(&SPEC);
        let c = BiquadCoefficients::design(FilterType::HighShelf, 3000.0, 0.707, 2.0, 48000.0).unwrap();
        shared.commit_stage(4, c);

        let left: Vec<f32> = (0..32).map(|i| ((i * 7) % 5) as f32 * 0.1).collect();
        let right: Vec<f32> = (0..32).map(|i| ((i * 3) % 4) as f32 * -0.1).collect();
        let mut l = left.clone();
        let mut r = right.clone();
        planar.process(&mut [&mut l[..], &mut r[..]]);

        let mut data: Vec<f32> = left.iter().zip(&right).flat_map(|(a, b)| [*a, *b]).collect();
        inter.process_interleaved(&mut data, 2);

        for i in 0..32 {
            assert!((data[2 * i] - l[i]).abs() < 1e-6);
            assert!((data[2 * i + 1] - r[i]).abs() < 1e-6);
        }
    }
}
