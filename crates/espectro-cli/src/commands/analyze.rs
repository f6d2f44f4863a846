//! Analyze an audio file and print per-band magnitudes.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use espectro_core::{get_band_coef_bounds, process_pair, read, Coefs};
use tracing::info;

use crate::wav;

#[derive(Args)]
pub struct AnalyzeArgs {
    /// Input WAV file
    pub input: PathBuf,

    /// Bands per octave
    #[arg(long, default_value_t = 12)]
    pub bands_per_octave: u32,

    /// Lowest analyzed frequency in Hz
    #[arg(long, default_value_t = 20.0)]
    pub min_freq: f64,
}

/// RMS magnitude per band, in band number order (DC last).
pub fn band_rms(
    analyzer: &espectro_core::Analyzer,
    samples: &[f32],
) -> Vec<f64> {
    let mut coefs = Coefs::new(analyzer);
    analyzer.analyze(samples, 0, samples.len() as i64, &mut coefs);

    // Extract magnitudes into a parallel real-valued coefficient set,
    // then reduce each band.
    let mut mags: Coefs<f32> = Coefs::new(analyzer);
    process_pair(
        &mut coefs,
        &mut mags,
        i32::MIN,
        i32::MAX,
        i64::MIN,
        i64::MAX,
        |_band, _t, c, m| *m = c.norm(),
    );

    (0..analyzer.bands_end())
        .map(|gbno| {
            let (ci0, ci1) = get_band_coef_bounds(&mags, gbno);
            let n = (ci1 - ci0) as usize;
            if n == 0 {
                return 0.0;
            }
            let mut buf = vec![0.0f32; n];
            read(&mags, gbno, ci0, ci1, &mut buf);
            (buf.iter().map(|&m| f64::from(m) * f64::from(m)).sum::<f64>() / n as f64).sqrt()
        })
        .collect()
}

pub fn run(args: AnalyzeArgs) -> Result<()> {
    let (samples, sample_rate) = wav::read_mono(&args.input)?;
    info!(frames = samples.len(), sample_rate, "read input");

    let analyzer = super::build_analyzer(args.bands_per_octave, args.min_freq, sample_rate)?;
    let rms = band_rms(&analyzer, &samples);

    println!("{:>6} {:>12} {:>10}", "band", "freq (Hz)", "rms (dB)");
    let mut peak_band = 0usize;
    for (band, &value) in rms.iter().enumerate() {
        let f_hz = analyzer.band_ff(band as i32) * f64::from(sample_rate);
        let db = 20.0 * value.max(1e-10).log10();
        let label = if band as i32 == analyzer.band_lowpass() {
            "DC".to_string()
        } else {
            format!("{f_hz:.1}")
        };
        println!("{band:>6} {label:>12} {db:>10.1}");
        if value > rms[peak_band] {
            peak_band = band;
        }
    }
    let peak_hz = analyzer.band_ff(peak_band as i32) * f64::from(sample_rate);
    println!("peak band: {peak_band} ({peak_hz:.1} Hz)");
    Ok(())
}
