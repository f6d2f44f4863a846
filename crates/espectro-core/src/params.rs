//! Transform configuration.

use crate::error::BuildError;

/// Phase convention for the stored coefficients.
///
/// With [`Absolute`](PhaseConvention::Absolute), the phase of a
/// coefficient at time `tc` is relative to `exp(i τ f t)` anchored at
/// `t = 0`, so a steady sinusoid produces coefficients whose phase
/// rotates with time. With [`Relative`](PhaseConvention::Relative), the
/// phase is relative to `exp(i τ f (t - tc))`: each coefficient carries
/// only local phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseConvention {
    /// Phase measured against a global `t = 0` reference.
    Absolute,
    /// Phase measured against the coefficient's own sample time.
    Relative,
}

/// Which formula maps `overlap` to the Gaussian standard deviation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandwidthFormula {
    /// `sd = overlap * (band_spacing - 1)`. The historical default.
    V1,
    /// `sd = overlap * ln(2) / bands_per_octave`. Decouples the bandwidth
    /// from the curvature of `exp2` at high bands-per-octave.
    V2,
}

/// A set of spectrum analysis parameters.
///
/// All frequencies are *fractional frequencies*: fractions of the sample
/// rate, so the Nyquist frequency is 0.5. Construct with
/// [`Parameters::new`] and adjust the public fields before handing the
/// value to [`Analyzer::new`](crate::Analyzer::new); the analyzer
/// validates on construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameters {
    /// Number of bandpass bands per octave.
    pub bands_per_octave: u32,
    /// Lower frequency limit; bands are added until the lowest bandpass
    /// band is at or below this frequency. Must be below 0.5.
    pub ff_min: f64,
    /// Tuning reference: band center frequencies are chosen so that some
    /// band falls exactly on `ff_ref` (or an octave multiple of it).
    pub ff_ref: f64,
    /// How much adjacent bands overlap; larger values mean wider windows.
    pub overlap: f64,
    /// Error budget: an upper bound on the reconstruction error introduced
    /// by truncating filter supports, as a fraction of the signal.
    pub max_error: f64,
    /// Phase convention for stored coefficients.
    pub phase: PhaseConvention,
    /// Bandwidth formula selection.
    pub bandwidth: BandwidthFormula,
    /// Scale factor applied to coefficients during analysis and removed
    /// during synthesis.
    pub coef_scale: f64,
    /// Whether resynthesis is needed. When false, the dual windows and
    /// the synthesis plan are not built, saving time and memory.
    pub synthesis: bool,
}

impl Parameters {
    /// Create a parameter set with the given band density and frequency
    /// range, and defaults for everything else: `ff_ref = 1.0`,
    /// `overlap = 0.7`, `max_error = 1e-5`, absolute phase, bandwidth
    /// formula V1, unit coefficient scale, synthesis enabled.
    pub fn new(bands_per_octave: u32, ff_min: f64) -> Self {
        Self {
            bands_per_octave,
            ff_min,
            ff_ref: 1.0,
            overlap: 0.7,
            max_error: 1e-5,
            phase: PhaseConvention::Absolute,
            bandwidth: BandwidthFormula::V1,
            coef_scale: 1.0,
            synthesis: true,
        }
    }

    /// The log2 frequency step from one bandpass band to the next.
    pub fn band_spacing_log2(&self) -> f64 {
        1.0 / f64::from(self.bands_per_octave)
    }

    /// The frequency ratio between adjacent bandpass bands.
    pub fn band_spacing(&self) -> f64 {
        self.band_spacing_log2().exp2()
    }

    /// The standard deviation of the frequency-domain Gaussian in units
    /// of the band center frequency.
    pub fn sd(&self) -> f64 {
        self.overlap
            * match self.bandwidth {
                BandwidthFormula::V1 => self.band_spacing() - 1.0,
                BandwidthFormula::V2 => {
                    std::f64::consts::LN_2 / f64::from(self.bands_per_octave)
                }
            }
    }

    /// The Q factor: center frequency divided by the half-power bandwidth.
    ///
    /// With `norm_gaussian(sd, hbw) = 1 / sqrt(2)` defining the half-power
    /// point, `hbw = sqrt(ln 2) * sd`, and the full bandwidth spans both
    /// sides.
    pub fn q(&self) -> f64 {
        1.0 / (2.0 * std::f64::consts::LN_2.sqrt() * self.sd())
    }

    pub(crate) fn validate(&self) -> Result<(), BuildError> {
        if self.bands_per_octave == 0 {
            return Err(BuildError::ZeroBandsPerOctave);
        }
        if !(self.ff_min > 0.0) || !self.ff_min.is_finite() {
            return Err(BuildError::MinFreqNotPositive(self.ff_min));
        }
        if self.ff_min >= 0.5 {
            return Err(BuildError::MinFreqAboveNyquist(self.ff_min));
        }
        if !(self.ff_ref > 0.0) || !self.ff_ref.is_finite() {
            return Err(BuildError::RefFreqNotPositive(self.ff_ref));
        }
        if !(self.overlap > 0.0) || !self.overlap.is_finite() {
            return Err(BuildError::InvalidOverlap(self.overlap));
        }
        if !(self.max_error > 0.0 && self.max_error < 1.0) {
            return Err(BuildError::InvalidMaxError(self.max_error));
        }
        if self.coef_scale == 0.0 || !self.coef_scale.is_finite() {
            return Err(BuildError::InvalidCoefScale(self.coef_scale));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let p = Parameters::new(12, 0.001);
        assert_eq!(p.bands_per_octave, 12);
        assert_eq!(p.ff_ref, 1.0);
        assert_eq!(p.phase, PhaseConvention::Absolute);
        assert!(p.synthesis);
        assert!(p.validate().is_ok());
    }

    #[test]
    fn spacing_and_sd() {
        let p = Parameters::new(12, 0.001);
        assert!((p.band_spacing() - 2f64.powf(1.0 / 12.0)).abs() < 1e-15);
        // V1: 0.7 * (2^(1/12) - 1)
        let expected = 0.7 * (2f64.powf(1.0 / 12.0) - 1.0);
        assert!((p.sd() - expected).abs() < 1e-15);
    }

    #[test]
    fn q_increases_with_band_density() {
        let sparse = Parameters::new(6, 0.001);
        let dense = Parameters::new(48, 0.001);
        assert!(dense.q() > sparse.q());
    }

    #[test]
    fn v2_formula_differs() {
        let mut p = Parameters::new(12, 0.001);
        let v1 = p.sd();
        p.bandwidth = BandwidthFormula::V2;
        let v2 = p.sd();
        assert!((v2 - 0.7 * std::f64::consts::LN_2 / 12.0).abs() < 1e-15);
        assert!(v1 != v2);
    }

    #[test]
    fn rejects_bad_configurations() {
        assert!(Parameters::new(12, 0.5).validate().is_err());
        assert!(Parameters::new(12, 0.7).validate().is_err());
        assert!(Parameters::new(12, 0.0).validate().is_err());
        assert!(Parameters::new(12, -0.1).validate().is_err());
        assert!(Parameters::new(0, 0.001).validate().is_err());

        let mut p = Parameters::new(12, 0.001);
        p.max_error = 0.0;
        assert!(p.validate().is_err());
        p.max_error = 1.5;
        assert!(p.validate().is_err());

        let mut p = Parameters::new(12, 0.001);
        p.overlap = -1.0;
        assert!(p.validate().is_err());

        let mut p = Parameters::new(12, 0.001);
        p.coef_scale = 0.0;
        assert!(p.validate().is_err());
    }
}
