//! WAV file reading and writing for the CLI.

use std::path::Path;

use anyhow::{Context, Result};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

/// Read a WAV file as mono `f32` samples, mixing down multi-channel
/// files by averaging. Returns the samples and the sample rate.
pub fn read_mono<P: AsRef<Path>>(path: P) -> Result<(Vec<f32>, u32)> {
    let path = path.as_ref();
    let mut reader = WavReader::open(path)
        .with_context(|| format!("could not open input audio file '{}'", path.display()))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .context("read error")?,
        SampleFormat::Int => {
            // Samples are sign-extended to i32 regardless of bit depth.
            let full_scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / full_scale))
                .collect::<Result<_, _>>()
                .context("read error")?
        }
    };

    let frames = interleaved.len() / channels;
    let mut mono = Vec::with_capacity(frames);
    for frame in interleaved.chunks_exact(channels) {
        mono.push(frame.iter().sum::<f32>() / channels as f32);
    }
    Ok((mono, spec.sample_rate))
}

/// Write mono `f32` samples as a 32-bit float WAV file.
pub fn write_mono<P: AsRef<Path>>(path: P, samples: &[f32], sample_rate: u32) -> Result<()> {
    let path = path.as_ref();
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::create(path, spec)
        .with_context(|| format!("could not create output audio file '{}'", path.display()))?;
    for &s in samples {
        writer.write_sample(s)?;
    }
    writer.finalize().context("finalizing WAV file")?;
    Ok(())
}
