//! CLI subcommands.

pub mod analyze;
pub mod filter;

use anyhow::{Context, Result};
use espectro_core::{Analyzer, Parameters};

/// Build an analyzer for the given band density and minimum frequency in
/// Hz at the file's sample rate.
pub fn build_analyzer(
    bands_per_octave: u32,
    min_freq_hz: f64,
    sample_rate: u32,
) -> Result<Analyzer> {
    let ff_min = min_freq_hz / f64::from(sample_rate);
    let params = Parameters::new(bands_per_octave, ff_min);
    Analyzer::new(&params).with_context(|| {
        format!(
            "building a {bands_per_octave}-band-per-octave filter bank down to {min_freq_hz} Hz \
             at {sample_rate} Hz"
        )
    })
}
