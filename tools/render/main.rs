//! Offline renderer: runs a WAV file through the equaliser with a factory preset.
//!
//! Usage: `eq_render <input.wav> <output.wav> [preset]`
//!        `eq_render --list-presets`

use anyhow::{bail, Context, Result};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use parametric_eq::dsp::ProcessSpec;
use parametric_eq::presets::FLAT_PRESET;
use parametric_eq::{EqEngine, PresetBank};
use std::path::PathBuf;

const BLOCK_SIZE: usize = 512;
const REPORT_FREQUENCIES: [f64; 8] = [30.0, 100.0, 250.0, 500.0, 1000.0, 3000.0, 8000.0, 16000.0];

fn read_interleaved(path: &PathBuf) -> Result<(WavSpec, Vec<f32>)> {
    let reader =
        WavReader::open(path).with_context(|| format!("failed to open input WAV '{}'", path.display()))?;
    let spec = reader.spec();
    let samples = match spec.sample_format {
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<Vec<_>, _>>()?,
        SampleFormat::Int => {
            let scale = 1.0 / (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<Result<Vec<_>, _>>()?
        }
    };
    Ok((spec, samples))
}

fn main() -> Result<()> {
    let bank = PresetBank::new();
    let mut args = std::env::args().skip(1);

    let first = args.next();
    if first.as_deref() == Some("--list-presets") {
        for name in bank.names() {
            let description = bank.get(name).map(|p| p.description.as_str()).unwrap_or("");
            println!("{:<16} {}", name, description);
        }
        return Ok(());
    }

    let (Some(input), Some(output)) = (first.map(PathBuf::from), args.next().map(PathBuf::from)) else {
        bail!("usage: eq_render <input.wav> <output.wav> [preset]");
    };
    let preset = args.next().unwrap_or_else(|| FLAT_PRESET.to_string());

    let (in_spec, mut samples) = read_interleaved(&input)?;
    let channels = in_spec.channels as usize;
    if channels == 0 {
        bail!("input has no channels");
    }

    let spec = ProcessSpec {
        sample_rate: in_spec.sample_rate as f64,
        max_block_size: BLOCK_SIZE,
        num_channels: channels,
    };
    let mut engine = EqEngine::new();
    engine.prepare(&spec);
    if !engine.apply_preset(&bank, &preset) {
        bail!("unknown preset '{}' (try --list-presets)", preset);
    }

    let mut chain = engine.filter_chain();
    chain.prepare(&spec);
    for block in samples.chunks_mut(BLOCK_SIZE * channels) {
        chain.process_interleaved(block, channels);
    }

    let out_spec = WavSpec {
        channels: in_spec.channels,
        sample_rate: in_spec.sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::create(&output, out_spec)
        .with_context(|| format!("failed to create output WAV '{}'", output.display()))?;
    for &s in &samples {
        writer.write_sample(s)?;
    }
    writer.finalize()?;

    println!("Rendered '{}' -> '{}' with preset '{}'", input.display(), output.display(), preset);
    println!("  frames processed : {}", samples.len() / channels);
    println!("  composite response:");
    let grid = engine.grid();
    for freq in REPORT_FREQUENCIES {
        let mag = engine.composite_magnitudes()[grid.nearest_index(freq)];
        let db = if mag > 0.0 { 20.0 * mag.log10() } else { f64::NEG_INFINITY };
        println!("    {:>7.0} Hz : {:+6.2} dB", freq, db);
    }
    Ok(())
}
