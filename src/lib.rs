mod debug;
pub mod dsp;
pub mod engine;
pub mod meters;
pub mod params;
pub mod presets;
pub mod state;

pub use dsp::{Analyser, FilterChain, FilterType, ProcessSpec, SpectrumView};
pub use engine::EqEngine;
pub use meters::Meters;
pub use params::{EqParams, ParamChange, ParamId};
pub use presets::PresetBank;
pub use state::EqState;

use crate::params::ALL_DIRTY;
use nih_plug::prelude::*;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

const DEFAULT_SAMPLE_RATE: f32 = 44100.0;

/// Work handed from the audio thread to the host's background executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EqTask {
    /// Apply the parameters flagged in the dirty mask to the engine.
    ApplyChanges(u32),
}

pub struct ParametricEqPlugin {
    params: Arc<EqParams>,
    dirty: Arc<AtomicU32>,

    // Control side; only touched from initialize and the background executor.
    engine: Arc<Mutex<EqEngine>>,
    // Audio side.
    chain: FilterChain,

    meters: Arc<Meters>,
    input_analyser: Analyser,
    output_analyser: Analyser,
    sample_rate: f32,
}

impl Default for ParametricEqPlugin {
    fn default() -> Self {
        let dirty = Arc::new(AtomicU32::new(ALL_DIRTY));
        let engine = EqEngine::new();
        let chain = engine.filter_chain();

        Self {
            params: Arc::new(EqParams::new(dirty.clone())),
            dirty,
            engine: Arc::new(Mutex::new(engine)),
            chain,
            meters: Arc::new(Meters::new()),
            input_analyser: Analyser::new(),
            output_analyser: Analyser::new(),
            sample_rate: DEFAULT_SAMPLE_RATE,
        }
    }
}

/// Pull the flagged parameter values and apply them to the engine.
fn apply_changes(engine: &Mutex<EqEngine>, params: &EqParams, mask: u32) {
    let changes = params.changes(mask);
    if changes.is_empty() {
        return;
    }
    let mut engine = engine.lock().unwrap_or_else(PoisonError::into_inner);
    for change in changes {
        engine.apply(change);
    }
}

impl ParametricEqPlugin {
    /// Control-side handle. Solo is set here; it is not a host parameter.
    pub fn engine(&self) -> Arc<Mutex<EqEngine>> {
        self.engine.clone()
    }

    pub fn meters(&self) -> Arc<Meters> {
        self.meters.clone()
    }

    /// The analysers only run while a returned view is held.
    pub fn input_spectrum(&self) -> SpectrumView {
        self.input_analyser.view()
    }

    pub fn output_spectrum(&self) -> SpectrumView {
        self.output_analyser.view()
    }

    fn process_internal(
        &mut self,
        buffer: &mut Buffer,
        context: &mut impl ProcessContext<Self>,
    ) -> ProcessStatus {
        let mask = self.dirty.swap(0, Ordering::AcqRel);
        if mask != 0 {
            crate::eq_log!("[plugin] forwarding dirty mask {:#x}", mask);
            context.execute_background(EqTask::ApplyChanges(mask));
        }

        self.chain.set_bypassed(self.params.bypass.value());

        let channels = buffer.as_slice();
        self.meters.record_input(channels);
        self.input_analyser.push_block(&*channels);

        self.chain.process(channels);

        self.meters.record_output(channels);
        self.output_analyser.push_block(&*channels);

        ProcessStatus::Normal
    }
}

impl Plugin for ParametricEqPlugin {
    const NAME: &'static str = "Parametric EQ";
    const VENDOR: &'static str = "Open Audio";
    const URL: &'static str = "";
    const EMAIL: &'static str = "";
    const VERSION: &'static str = env!("CARGO_PKG_VERSION");

    const AUDIO_IO_LAYOUTS: &'static [AudioIOLayout] = &[
        AudioIOLayout {
            main_input_channels: NonZeroU32::new(2),
            main_output_channels: NonZeroU32::new(2),
            ..AudioIOLayout::const_default()
        },
        AudioIOLayout {
            main_input_channels: NonZeroU32::new(1),
            main_output_channels: NonZeroU32::new(1),
            ..AudioIOLayout::const_default()
        },
    ];

    const MIDI_INPUT: MidiConfig = MidiConfig::None;
    const SAMPLE_ACCURATE_AUTOMATION: bool = false;

    type SysExMessage = ();
    type BackgroundTask = EqTask;

    fn params(&self) -> Arc<dyn Params> {
        self.params.clone()
    }

    fn initialize(
        &mut self,
        audio_io_layout: &AudioIOLayout,
        buffer_config: &BufferConfig,
        _context: &mut impl InitContext<Self>,
    ) -> bool {
        #[cfg(feature = "debug")]
        crate::debug::logger::init_logger();

        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.sample_rate = buffer_config.sample_rate;
            let spec = ProcessSpec {
                sample_rate: buffer_config.sample_rate as f64,
                max_block_size: buffer_config.max_buffer_size as usize,
                num_channels: audio_io_layout
                    .main_output_channels
                    .map(NonZeroU32::get)
                    .unwrap_or(2) as usize,
            };

            // Host state may have been restored since the last run; take everything.
            self.dirty.store(0, Ordering::Release);
            {
                let mut engine = self.engine.lock().unwrap_or_else(PoisonError::into_inner);
                for change in self.params.changes(ALL_DIRTY) {
                    engine.apply(change);
                }
                engine.prepare(&spec);
            }
            self.chain.prepare(&spec);

            self.input_analyser.setup(self.sample_rate);
            self.output_analyser.setup(self.sample_rate);
            self.meters.reset();

            #[cfg(feature = "debug")]
            crate::debug::logger::drain_to_file();

            true
        }))
        .unwrap_or(false)
    }

    fn task_executor(&mut self) -> TaskExecutor<Self> {
        let engine = self.engine.clone();
        let params = self.params.clone();
        Box::new(move |task| match task {
            EqTask::ApplyChanges(mask) => {
                apply_changes(&engine, &params, mask);
                debug::flush();
            }
        })
    }

    fn process(
        &mut self,
        buffer: &mut Buffer,
        _aux: &mut AuxiliaryBuffers,
        context: &mut impl ProcessContext<Self>,
    ) -> ProcessStatus {
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.process_internal(buffer, context)
        }))
        .unwrap_or(ProcessStatus::Normal)
    }

    fn reset(&mut self) {
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.chain.reset();
            self.meters.reset();
        }))
        .unwrap_or(());
    }

    fn deactivate(&mut self) {
        self.input_analyser.stop();
        self.output_analyser.stop();
    }
}

impl ClapPlugin for ParametricEqPlugin {
    const CLAP_ID: &'static str = "com.openaudio.parametric-eq";
    const CLAP_DESCRIPTION: Option<&'static str> = Some("Six band parametric equaliser");
    const CLAP_MANUAL_URL: Option<&'static str> = None;
    const CLAP_SUPPORT_URL: Option<&'static str> = None;
    const CLAP_FEATURES: &'static [ClapFeature] = &[
        ClapFeature::AudioEffect,
        ClapFeature::Equalizer,
        ClapFeature::Stereo,
        ClapFeature::Mono,
    ];
}

impl Vst3Plugin for ParametricEqPlugin {
    const VST3_CLASS_ID: [u8; 16] = *b"OpenAudioParaEQ1";
    const VST3_SUBCATEGORIES: &'static [Vst3SubCategory] =
        &[Vst3SubCategory::Fx, Vst3SubCategory::Eq];
}

nih_export_clap!(ParametricEqPlugin);
nih_export_vst3!(ParametricEqPlugin);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::band::FilterType;

    #[test]
    fn test_dirty_params_reach_engine() {
        let dirty = Arc::new(AtomicU32::new(0));
        let params = EqParams::new(dirty.clone());
        let engine = Mutex::new(EqEngine::new());

        // Factory params and factory engine agree, so applying everything is a no-op.
        apply_changes(&engine, &params, ALL_DIRTY);
        let engine = engine.into_inner().unwrap();
        assert_eq!(engine.state(), EqState::default());
        assert_eq!(engine.band(0).unwrap().filter_type, FilterType::HighPass);
        assert_eq!(engine.solo(), None);
    }

    #[test]
    fn test_restored_host_state_does_not_solo() {
        let plugin = ParametricEqPlugin::default();
        assert!(!plugin
            .params
            .param_map()
            .iter()
            .any(|(id, _, _)| id.contains("solo")));
        apply_changes(&plugin.engine, &plugin.params, ALL_DIRTY);
        assert_eq!(plugin.engine().lock().unwrap().solo(), None);
    }

    #[test]
    fn test_host_changes_leave_solo_alone() {
        let plugin = ParametricEqPlugin::default();
        plugin.engine().lock().unwrap().set_solo(Some(2));
        apply_changes(&plugin.engine, &plugin.params, ALL_DIRTY);
        let engine = plugin.engine();
        let engine = engine.lock().unwrap();
        assert_eq!(engine.solo(), Some(2));
        assert!(engine.is_stage_bypassed(0));
        assert!(!engine.is_stage_bypassed(2));
    }

    #[test]
    fn test_spectrum_views_attach_analysers() {
        let plugin = ParametricEqPlugin::default();
        assert!(!plugin.input_analyser.has_viewers());
        let view = plugin.output_spectrum();
        assert!(plugin.output_analyser.has_viewers());
        assert!(!plugin.input_analyser.has_viewers());
        drop(view);
        assert!(!plugin.output_analyser.has_viewers());
    }

    #[test]
    fn test_empty_mask_leaves_engine_alone() {
        let params = EqParams::new(Arc::new(AtomicU32::new(0)));
        let engine = Mutex::new(EqEngine::new());
        engine.lock().unwrap().set_output_gain(0.5);
        apply_changes(&engine, &params, 0);
        assert_eq!(engine.lock().unwrap().output_gain(), 0.5);
    }
}
