//! Error types for analyzer construction.

use thiserror::Error;

/// Errors reported by [`Analyzer::new`](crate::Analyzer::new).
///
/// All of these are configuration-time failures; the analysis and
/// synthesis paths themselves have no recoverable errors (contract
/// violations there are panics).
#[derive(Debug, Error)]
pub enum BuildError {
    /// The minimum fractional frequency is at or above the Nyquist
    /// frequency.
    #[error("minimum fractional frequency {0} must be below Nyquist (0.5)")]
    MinFreqAboveNyquist(f64),

    /// The minimum fractional frequency is zero, negative, or not finite.
    #[error("minimum fractional frequency {0} must be positive and finite")]
    MinFreqNotPositive(f64),

    /// The reference frequency is zero, negative, or not finite.
    #[error("reference fractional frequency {0} must be positive and finite")]
    RefFreqNotPositive(f64),

    /// Zero bands per octave.
    #[error("bands_per_octave must be at least 1")]
    ZeroBandsPerOctave,

    /// The window overlap is outside its valid domain.
    #[error("overlap {0} must be positive and finite")]
    InvalidOverlap(f64),

    /// The error budget is outside its valid domain.
    #[error("max_error {0} must be in (0, 1)")]
    InvalidMaxError(f64),

    /// The coefficient scale is zero or not finite.
    #[error("coef_scale {0} must be nonzero and finite")]
    InvalidCoefScale(f64),

    /// The band windows are so wide that the top band's support reaches
    /// past the Nyquist frequency, leaving no transition band for the
    /// downsampling filter.
    #[error(
        "band windows too wide: the top band's support ({support}) reaches past Nyquist; \
         reduce overlap or increase bands_per_octave"
    )]
    WindowsTooWide {
        /// One-sided support of the top band's window, as a fractional
        /// frequency.
        support: f64,
    },

    /// Filter-bank sizing failed to converge: even at the largest
    /// permitted FFT size, the edge padding required by the filter
    /// support would consume half the transform.
    #[error(
        "filter bank sizing did not converge within an FFT size of {max_fftsize} \
         (contradictory error budget and band layout)"
    )]
    SizingDiverged {
        /// The largest FFT size tried before giving up.
        max_fftsize: usize,
    },
}
