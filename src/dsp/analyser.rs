//! Spectrum Analyser
//!
//! Feeds time-domain audio from the audio thread to a worker thread that turns it
//! into an averaged magnitude spectrum for visualisation.
//!
//! # Design Notes
//! - The audio thread only pushes into a `ringbuf` producer; when the ring is full
//!   samples are dropped, it never blocks or allocates
//! - The worker runs a 4096-point FFT with a Hann window and averages the last
//!   five frames
//! - Readers poll [`SpectrumView::check_for_new_data`] and sample the result by
//!   frequency; drawing is left to the caller
//! - Audio is only pushed while at least one [`SpectrumView`] is alive

use ringbuf::{Consumer, Producer, RingBuffer};
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::f32::consts::PI;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub const FFT_SIZE: usize = 4096;
pub const NUM_BINS: usize = FFT_SIZE / 2 + 1;
pub const AVERAGE_FRAMES: usize = 5;
pub const MIN_DB: f32 = -80.0;
const RING_CAPACITY: usize = FFT_SIZE * 4;
const PUSH_CHUNK: usize = 256;
const IDLE_WAIT: Duration = Duration::from_millis(5);

struct SpectrumShared {
    averaged: Mutex<Vec<f32>>,
    new_data: AtomicBool,
    running: AtomicBool,
    sample_rate: AtomicU32,
    viewers: AtomicUsize,
}

/// Read-only handle to the latest averaged spectrum. The analyser is fed while any
/// view (or clone of one) is held.
pub struct SpectrumView {
    shared: Arc<SpectrumShared>,
}

impl SpectrumView {
    fn attach(shared: &Arc<SpectrumShared>) -> Self {
        shared.viewers.fetch_add(1, Ordering::AcqRel);
        Self {
            shared: shared.clone(),
        }
    }

    /// True once per published frame.
    pub fn check_for_new_data(&self) -> bool {
        self.shared.new_data.swap(false, Ordering::AcqRel)
    }

    pub fn sample_rate(&self) -> f32 {
        f32::from_bits(self.shared.sample_rate.load(Ordering::Relaxed))
    }

    /// Averaged level at `freq` Hz in dB, floored at [`MIN_DB`].
    pub fn level_at(&self, freq: f32) -> f32 {
        let sr = self.sample_rate();
        if !(sr > 0.0) {
            return MIN_DB;
        }
        let bin = ((freq / sr) * FFT_SIZE as f32).round().clamp(0.0, (NUM_BINS - 1) as f32) as usize;
        let averaged = self
            .shared
            .averaged
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        gain_to_db(averaged[bin])
    }

    /// `count` log-spaced `(frequency, dB)` points from `min_freq` to Nyquist.
    pub fn plot_points(&self, min_freq: f32, count: usize) -> Vec<(f32, f32)> {
        let nyquist = self.sample_rate() * 0.5;
        if count == 0 || !(nyquist > min_freq) || !(min_freq > 0.0) {
            return Vec::new();
        }
        let ratio = nyquist / min_freq;
        (0..count)
            .map(|i| {
                let t = if count > 1 {
                    i as f32 / (count - 1) as f32
                } else {
                    0.0
                };
                let freq = min_freq * ratio.powf(t);
                (freq, self.level_at(freq))
            })
            .collect()
    }
}

impl Clone for SpectrumView {
    fn clone(&self) -> Self {
        Self::attach(&self.shared)
    }
}

impl Drop for SpectrumView {
    fn drop(&mut self) {
        self.shared.viewers.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Audio-side producer plus the worker that owns the FFT.
pub struct Analyser {
    producer: Option<Producer<f32>>,
    shared: Arc<SpectrumShared>,
    worker: Option<JoinHandle<()>>,
}

impl Default for Analyser {
    fn default() -> Self {
        Self::new()
    }
}

impl Analyser {
    pub fn new() -> Self {
        Self {
            producer: None,
            shared: Arc::new(SpectrumShared {
                averaged: Mutex::new(vec![0.0; NUM_BINS]),
                new_data: AtomicBool::new(false),
                running: AtomicBool::new(false),
                sample_rate: AtomicU32::new(0),
                viewers: AtomicUsize::new(0),
            }),
            worker: None,
        }
    }

    /// Attach a reader. Not realtime safe.
    pub fn view(&self) -> SpectrumView {
        SpectrumView::attach(&self.shared)
    }

    pub fn has_viewers(&self) -> bool {
        self.shared.viewers.load(Ordering::Acquire) > 0
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// (Re)start the worker for `sample_rate`. Not realtime safe.
    pub fn setup(&mut self, sample_rate: f32) {
        self.stop();

        let shared = self.shared.clone();
        shared.sample_rate.store(sample_rate.to_bits(), Ordering::Relaxed);
        shared
            .averaged
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .fill(0.0);
        shared.new_data.store(false, Ordering::Relaxed);
        shared.running.store(true, Ordering::Release);

        let (producer, consumer) = RingBuffer::<f32>::new(RING_CAPACITY).split();
        self.producer = Some(producer);

        let spawned = thread::Builder::new()
            .name("eq-analyser".into())
            .spawn(move || SpectrumWorker::new(consumer, shared).run());
        match spawned {
            Ok(handle) => self.worker = Some(handle),
            Err(e) => {
                log::warn!("failed to start analyser thread: {}", e);
                self.producer = None;
                self.shared.running.store(false, Ordering::Release);
            }
        }
    }

    /// Stop and join the worker.
    pub fn stop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
        self.producer = None;
    }

    /// Push one planar block (mixed down to mono). Realtime safe. Skipped while
    /// no view is attached.
    pub fn push_block<S: AsRef<[f32]>>(&mut self, channels: &[S]) {
        if !self.has_viewers() {
            return;
        }
        let Some(producer) = self.producer.as_mut() else {
            return;
        };
        if channels.is_empty() {
            return;
        }
        let frames = channels.iter().map(|c| c.as_ref().len()).min().unwrap_or(0);
        let scale = 1.0 / channels.len() as f32;
        let mut chunk = [0.0f32; PUSH_CHUNK];

        let mut start = 0;
        while start < frames {
            let n = (frames - start).min(PUSH_CHUNK);
            for (i, slot) in chunk[..n].iter_mut().enumerate() {
                *slot = channels
                    .iter()
                    .map(|c| c.as_ref()[start + i])
                    .sum::<f32>()
                    * scale;
            }
            if producer.push_slice(&chunk[..n]) < n {
                // Ring full: the worker is behind, drop the rest of this block.
                return;
            }
            start += n;
        }
    }

    pub fn check_for_new_data(&self) -> bool {
        self.shared.new_data.swap(false, Ordering::AcqRel)
    }
}

impl Drop for Analyser {
    fn drop(&mut self) {
        self.stop();
    }
}

struct SpectrumWorker {
    consumer: Consumer<f32>,
    shared: Arc<SpectrumShared>,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    window_gain: f32,
    frame: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    history: Vec<Vec<f32>>,
    history_pos: usize,
    frames_seen: usize,
}

impl SpectrumWorker {
    fn new(consumer: Consumer<f32>, shared: Arc<SpectrumShared>) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(FFT_SIZE);
        let scratch = vec![Complex::default(); fft.get_inplace_scratch_len()];

        let window = make_hann_window(FFT_SIZE);
        // Amplitude-correct scaling: a full-scale sine reads 0 dB.
        let window_gain = 2.0 / window.iter().sum::<f32>();

        Self {
            consumer,
            shared,
            fft,
            window,
            window_gain,
            frame: vec![0.0; FFT_SIZE],
            spectrum: vec![Complex::default(); FFT_SIZE],
            scratch,
            history: vec![vec![0.0; NUM_BINS]; AVERAGE_FRAMES],
            history_pos: 0,
            frames_seen: 0,
        }
    }

    fn run(mut self) {
        while self.shared.running.load(Ordering::Acquire) {
            if self.consumer.len() < FFT_SIZE {
                thread::sleep(IDLE_WAIT);
                continue;
            }
            self.consumer.pop_slice(&mut self.frame);
            self.analyse_frame();
        }
    }

    fn analyse_frame(&mut self) {
        for ((dst, &x), &w) in self
            .spectrum
            .iter_mut()
            .zip(self.frame.iter())
            .zip(self.window.iter())
        {
            *dst = Complex::new(x * w, 0.0);
        }
        self.fft
            .process_with_scratch(&mut self.spectrum, &mut self.scratch);

        let row = &mut self.history[self.history_pos];
        for (mag, bin) in row.iter_mut().zip(self.spectrum.iter()) {
            *mag = bin.norm() * self.window_gain;
        }
        self.history_pos = (self.history_pos + 1) % AVERAGE_FRAMES;
        self.frames_seen = (self.frames_seen + 1).min(AVERAGE_FRAMES);

        let scale = 1.0 / self.frames_seen as f32;
        {
            let mut averaged = self
                .shared
                .averaged
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            averaged.fill(0.0);
            for row in self.history.iter() {
                for (avg, &mag) in averaged.iter_mut().zip(row.iter()) {
                    *avg += mag * scale;
                }
            }
        }
        self.shared.new_data.store(true, Ordering::Release);
    }
}

pub fn make_hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f32 / size as f32).cos())
        .collect()
}

#[inline]
fn gain_to_db(gain: f32) -> f32 {
    if gain > 0.0 {
        (20.0 * gain.log10()).max(MIN_DB)
    } else {
        MIN_DB
    }
}
