//! Espectro Core - Constant-Q spectrum analysis and resynthesis
//!
//! This crate analyzes a real-valued signal into a multirate,
//! multi-octave set of complex band-limited coefficients (a constant-Q
//! spectrogram) and can resynthesize audio from those coefficients with
//! near-perfect reconstruction.
//!
//! The filter bank is built from frequency-domain Gaussian windows with
//! logarithmically spaced center frequencies, processed octave by octave:
//! each octave handles its own bands at its own sample rate, then hands a
//! half-rate lowpassed signal to the next octave down. Coefficients are
//! stored sparsely by time slice, so arbitrarily long or streaming
//! signals fit in memory proportional to the analyzed span (see
//! [`forget_before`] for bounding it).
//!
//! - [`Parameters`] - transform configuration (bands per octave,
//!   frequency range, overlap, error budget, phase convention)
//! - [`Analyzer`] - filter-bank construction, [`Analyzer::analyze`] and
//!   [`Analyzer::synthesize`]
//! - [`Coefs`] - the sparse coefficient set, with bulk row access
//!   ([`read`], [`write`], [`add`]), point access ([`read1t`],
//!   [`write1t`]), iteration ([`process`], [`fill`], [`process_pair`]),
//!   and trimming ([`forget_before`])
//! - [`gaussian`] - the window math underneath the filter design
//! - [`range_vec`] - the growable array behind the sparse storage
//!
//! All frequencies are *fractional frequencies*: fractions of the sample
//! rate, with Nyquist at 0.5. Times are signed sample counts; analysis
//! may start at negative times.
//!
//! # Example
//!
//! ```rust
//! use espectro_core::{Analyzer, Coefs, Parameters};
//!
//! // 12 bands per octave down to 0.005 of the sample rate
//! // (e.g. 240 Hz at 48 kHz).
//! let params = Parameters::new(12, 0.005);
//! let analyzer = Analyzer::new(&params).expect("valid parameters");
//!
//! let signal: Vec<f32> = (0..4000)
//!     .map(|i| (std::f64::consts::TAU * 0.05 * i as f64).sin() as f32)
//!     .collect();
//!
//! let mut coefs = Coefs::new(&analyzer);
//! analyzer.analyze(&signal, 0, signal.len() as i64, &mut coefs);
//!
//! let mut out = vec![0.0f32; signal.len()];
//! analyzer.synthesize(&coefs, 0, signal.len() as i64, &mut out);
//! ```

pub mod analyzer;
pub mod coefs;
pub mod error;
pub mod fft;
pub mod gaussian;
pub mod params;
pub mod range_vec;

mod plan;

/// An integer identifying an audio sample.
pub type SampleIndex = i64;

/// An integer identifying a coefficient sample of some band.
pub type CoefIndex = i64;

/// An integer identifying a coefficient slice.
pub type SliceIndex = i64;

// Re-export main types
pub use analyzer::Analyzer;
pub use coefs::{
    add, bno_merge, bno_split, fill, forget_before, get_band_coef_bounds, get_coef_bounds,
    process, process_pair, read, read1t, write, write1t, CoefValue, Coefs, CoefsMeta,
};
pub use error::BuildError;
pub use params::{BandwidthFormula, Parameters, PhaseConvention};
pub use range_vec::RangeVec;

/// Complex coefficient type used by the transform.
pub type Coef = rustfft::num_complex::Complex<f32>;
