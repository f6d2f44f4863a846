//! Filter-bank design: bands, zones, and plans.
//!
//! A *plan* holds everything needed to process one octave's worth of
//! signal at one FFT size: the per-band frequency-domain kernels (grouped
//! into *zones* of bands sharing a short-FFT size), the downsampling
//! lowpass used to descend to the next octave, the fat/filet split of the
//! slice buffer, and the layout metadata for the coefficients the plan
//! produces. Plans are built once at analyzer construction and immutable
//! afterwards.

use std::f64::consts::TAU;
use std::sync::Arc;

use rustfft::num_complex::Complex;

use crate::coefs::{BandCoefsMeta, CoefsMeta, OctCoefsMeta, ZoneCoefsMeta};
use crate::error::BuildError;
use crate::fft::{FftPool, SizedFft};
use crate::gaussian::{gaussian_support, gaussian_support_inv, norm_gaussian, sd_f2t};
use crate::params::{Parameters, PhaseConvention};

/// A linear transform `a x + b`, used to map between log-frequencies and
/// bandpass band numbers.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LinearTransform {
    a: f64,
    b: f64,
}

impl LinearTransform {
    fn new(a: f64, b: f64) -> Self {
        Self { a, b }
    }

    pub(crate) fn apply(self, x: f64) -> f64 {
        self.a * x + self.b
    }

    fn inverse(self) -> Self {
        Self::new(1.0 / self.a, -self.b / self.a)
    }
}

/// Construct a frequency-domain lowpass filter whose response is the
/// convolution of a rectangle and a Gaussian. The cutoff frequency is
/// `ff_cutoff` (a fractional frequency of the buffer's sample rate) and
/// the standard deviation of the Gaussian is `ff_sd`. The filter covers
/// the full frequency range with negative frequencies at the end, the
/// usual convention for FFT spectra.
///
/// When `center` is true, the response is symmetric around the center of
/// the buffer instead (used for the downsampling filter, which puts its
/// passband in the middle).
pub(crate) fn gaussian_windowed_lowpass(ff_cutoff: f64, ff_sd: f64, buf: &mut [f64], center: bool) {
    let len = buf.len();
    let inv_len = 1.0 / len as f64;
    for (i, v) in buf.iter_mut().enumerate() {
        let this_ff = if center {
            // Symmetric around the center
            (i as f64 - len as f64 * 0.5).abs() * inv_len
        } else {
            // Symmetric around zero
            (if i > len / 2 { len - i } else { i }) as f64 * inv_len
        };
        let x = this_ff - ff_cutoff;
        *v = crate::gaussian::gaussian_edge(ff_sd, -x);
    }
}

/// Swap the halves of an even-length buffer, moving the zero-frequency
/// element to the center (or back).
pub(crate) fn fftshift<T>(buf: &mut [T]) {
    let len = buf.len();
    debug_assert!(len % 2 == 0);
    let (a, b) = buf.split_at_mut(len / 2);
    a.swap_with_slice(b);
}

// ---------------------------------------------------------------------------
// Design: analyzer-level derived constants
// ---------------------------------------------------------------------------

/// Constants derived from [`Parameters`] that are shared by every plan:
/// band numbering, tuning, downsampling filter shape, and worst-case
/// filter supports.
#[derive(Debug)]
pub(crate) struct Design {
    pub params: Parameters,
    pub band_spacing_log2: f64,
    /// Tuning adjustment as a log2 fractional frequency, in
    /// `[0, band_spacing_log2)`. Band centers are raised by this amount
    /// relative to the untuned grid where a band would fall exactly on
    /// the sampling frequency.
    pub tuning_log2ff: f64,
    /// log2 frequency of the fs/8 band, the lowest band of each octave
    /// except possibly the bottom one.
    pub band0_log2ff: f64,
    pub n_bandpass_bands_total: usize,
    pub n_bands_total: usize,
    /// log2 frequency of the highest-frequency band.
    pub top_band_log2ff: f64,
    /// Band number of the reference frequency.
    pub ffref_gbno: i32,
    pub n_octaves: usize,
    log2ff_bandpass_band: LinearTransform,
    bandpass_band_log2ff: LinearTransform,
    /// Downsampling lowpass -6 dB transition frequency.
    pub ds_ff: f64,
    /// Downsampling lowpass standard deviation.
    pub ds_ff_sd: f64,
    /// Downsampling lowpass time-domain support, each side.
    pub ds_time_support: f64,
    /// Worst-case time support of any bandpass analysis filter, in octave
    /// subsamples; determined by the band near fs/8.
    pub band0_time_analysis_support: f64,
    pub band0_time_synthesis_support: f64,
}

impl Design {
    pub(crate) fn new(params: &Parameters) -> Result<Self, BuildError> {
        params.validate()?;
        let params = params.clone();

        let band_spacing_log2 = params.band_spacing_log2();
        let tuning_log2ff = params.ff_ref.log2().rem_euclid(band_spacing_log2);

        // The fs/8 band; -3 is log2(1/8).
        let band0_log2ff = -3.0 + tuning_log2ff;

        // Number of bands so that the lowest bandpass band has a
        // frequency <= ff_min. end_log2ff is the log2 frequency of the
        // band after the last, just past fs/2.
        let end_log2ff = tuning_log2ff - 1.0;
        let n_bandpass_bands_total =
            ((end_log2ff - params.ff_min.log2()) / band_spacing_log2).ceil() as usize;
        let n_bands_total = n_bandpass_bands_total + 1;

        let top_band_log2ff = end_log2ff - band_spacing_log2;
        let ffref_gbno =
            ((top_band_log2ff - params.ff_ref.log2()) / band_spacing_log2).round() as i32;

        // gbno = a log2(ff) + b
        let a = -f64::from(params.bands_per_octave);
        let b = -a * tuning_log2ff + a - 1.0;
        let log2ff_bandpass_band = LinearTransform::new(a, b);
        let bandpass_band_log2ff = log2ff_bandpass_band.inverse();

        // The top octave is twice the size, and the DC band is folded
        // into the bottom octave even if that makes it larger than the
        // others.
        let mut n_octaves =
            n_bandpass_bands_total.div_ceil(params.bands_per_octave as usize);
        if n_octaves > 1 {
            n_octaves -= 1;
        }

        // Downsampling filter: in terms of the post-downsampling sample
        // rate, the transition band starts at the top edge of the highest
        // band (worst case center fs/4 plus its support) and ranges to
        // fs/2, with the cutoff in the middle.
        let sd = params.sd();
        let f0 = 0.25 + gaussian_support(sd * 0.25, params.max_error);
        let f1 = 0.5;
        if f0 >= f1 {
            return Err(BuildError::WindowsTooWide { support: f0 - 0.25 });
        }
        let ds_ff = (f0 + f1) * 0.5;
        let ds_ff_sd = gaussian_support_inv((f1 - f0) * 0.5, params.max_error);
        let ds_time_support = gaussian_support(sd_f2t(ds_ff_sd), params.max_error);

        let band0_ff = band0_log2ff.exp2();
        let band0_time_sd = 1.0 / (TAU * sd * band0_ff);
        let band0_time_analysis_support = gaussian_support(band0_time_sd, params.max_error);
        let multiplier = if params.synthesis {
            1.8 / params.overlap
        } else {
            1.0
        };
        let band0_time_synthesis_support = band0_time_analysis_support * multiplier;

        Ok(Self {
            params,
            band_spacing_log2,
            tuning_log2ff,
            band0_log2ff,
            n_bandpass_bands_total,
            n_bands_total,
            top_band_log2ff,
            ffref_gbno,
            n_octaves,
            log2ff_bandpass_band,
            bandpass_band_log2ff,
            ds_ff,
            ds_ff_sd,
            ds_time_support,
            band0_time_analysis_support,
            band0_time_synthesis_support,
        })
    }

    /// Frequency-domain standard deviation of the window for a band
    /// centered at fractional frequency `ff`.
    pub(crate) fn ff_sd(&self, ff: f64) -> f64 {
        self.params.sd() * ff
    }

    /// Time-domain standard deviation (in samples) of the window for a
    /// band centered at fractional frequency `ff`.
    pub(crate) fn time_sd(&self, ff: f64) -> f64 {
        1.0 / (TAU * self.ff_sd(ff))
    }

    /// Fractional frequency of relative band number `rbno` within an
    /// octave (relative to that octave's sample rate).
    pub(crate) fn rbno_ff(&self, rbno: f64) -> f64 {
        (self.band0_log2ff + rbno * self.band_spacing_log2).exp2()
    }

    /// Center frequency of bandpass band `gbno`, extrapolating freely for
    /// out-of-range arguments.
    pub(crate) fn bandpass_band_ff(&self, gbno: f64) -> f64 {
        self.bandpass_band_log2ff.apply(gbno).exp2()
    }

    /// Inverse of [`bandpass_band_ff`](Self::bandpass_band_ff).
    pub(crate) fn ff_bandpass_band(&self, ff: f64) -> f64 {
        self.log2ff_bandpass_band.apply(ff.log2())
    }

    /// Time support of the analysis filter of bandpass band `gbno`.
    pub(crate) fn analysis_support_at(&self, gbno: f64) -> f64 {
        gaussian_support(self.time_sd(self.bandpass_band_ff(gbno)), self.params.max_error)
    }

    /// How much wider the synthesis filters are than the analysis
    /// filters in the time domain. Empirical formula.
    pub(crate) fn synthesis_support_multiplier(&self) -> f64 {
        if self.params.synthesis {
            1.8 / self.params.overlap
        } else {
            1.0
        }
    }
}

// ---------------------------------------------------------------------------
// Bands and zones
// ---------------------------------------------------------------------------

/// Frequency band parameters, shared between octaves and between all
/// coefficient slices of the band.
#[derive(Debug)]
pub(crate) struct BandParams {
    /// True iff this is the DC (lowpass) band.
    pub dc: bool,
    /// Size of the short FFT spanning the band.
    pub sftsize: usize,
    pub sftsize_log2: u32,
    /// Signal samples per coefficient sample (within the band's octave).
    pub step_log2: u32,
    pub sft: SizedFft,
    /// Frequency-domain window kernel, indexed by short-FFT bin.
    pub kernel: Vec<f32>,
    /// Synthesis dual of `kernel`; empty unless synthesis is enabled.
    pub dual_kernel: Vec<f32>,
    /// Complex exponential compensating for the fractional part of the
    /// center frequency, with the time-domain ifftshift baked in.
    pub shift_kernel: Vec<Complex<f32>>,
    /// Conjugate of `shift_kernel` with the ifftshift undone; empty
    /// unless synthesis is enabled.
    pub shift_kernel_conj: Vec<Complex<f32>>,
    /// Big-FFT bin number of the left edge of the window.
    pub fq_offset: i64,
    /// Center (bandpass) or cutoff (lowpass) frequency as a fractional
    /// frequency.
    pub ff: f64,
    /// Center frequency in units of big-FFT bins.
    pub center: f64,
    /// `center` rounded to the nearest integer bin.
    pub icenter: i64,
    /// Standard deviation of the frequency-domain Gaussian.
    pub ffsd: f64,
    /// Filter support in the time domain, in octave subsamples, each side.
    pub time_support: u32,
}

/// A group of bands within one octave sharing one short-FFT size budget.
/// Octaves with identical band structure share one zone.
#[derive(Debug)]
pub(crate) struct Zone {
    /// Bands by increasing frequency; the DC band is index 0 when
    /// present.
    pub bands: Vec<Arc<BandParams>>,
    /// Largest coefficient time step (log2) of any band in the zone.
    pub max_step_log2: u32,
}

/// Downsampling filter parameters. Similar in shape to a band, but
/// lowpass and applied to the full spectrum.
#[derive(Debug)]
pub(crate) struct DownsamplingParams {
    pub sftsize: usize,
    /// Frequency-domain lowpass kernel, prescaled by 1/fftsize.
    pub kernel: Vec<f32>,
    /// Upsampling kernel (synthesis only), prescaled by 1/sftsize.
    pub dual_kernel: Vec<f32>,
    pub sft: SizedFft,
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// Complete filter bank for one FFT size and one role (analysis or
/// synthesis).
#[derive(Debug)]
pub(crate) struct Plan {
    pub synthesis: bool,
    pub fftsize: usize,
    pub fftsize_log2: u32,
    /// Zero-padded/overlap margin at each end of a slice buffer.
    pub fat_size: usize,
    /// Usable (alias-free) portion of a slice buffer.
    pub filet_size: usize,
    pub max_step_log2: u32,
    /// Width of the widest filter in the time domain, in octave
    /// subsamples.
    pub oct_support: usize,
    pub inv_fftsize: f64,
    /// Size of the largest short FFT of any band.
    pub sftsize_max: usize,
    pub zones: Vec<Arc<Zone>>,
    /// Zone index per octave.
    pub octave_zone_index: Vec<usize>,
    pub dsparams: DownsamplingParams,
    pub fft: SizedFft,
    /// Layout of the coefficients this plan produces.
    pub cmeta: Arc<CoefsMeta>,
}

impl Plan {
    /// Build a plan. Returns `None` if the required fat padding would
    /// consume half the FFT or more, in which case the caller should
    /// retry with a doubled `fftsize`.
    pub(crate) fn build(
        design: &Design,
        pool: &mut FftPool,
        synthesis: bool,
        fftsize: usize,
        support: usize,
    ) -> Option<Plan> {
        let mut b = PlanBuilder {
            design,
            pool,
            synthesis,
            fftsize,
            fftsize_log2: fftsize.trailing_zeros(),
            inv_fftsize: 1.0 / fftsize as f64,
            sftsize_max: 0,
            max_step_log2: 0,
        };

        // Walk the octaves from high to low frequencies, creating new
        // zones where the band structure differs: the double-width top
        // octave, the repeating interior octave, and the one or two
        // octaves near DC whose neighborhoods differ.
        let bpo = i64::from(design.params.bands_per_octave);
        let mut zones: Vec<Arc<Zone>> = Vec::new();
        let mut octave_zone_index: Vec<usize> = Vec::new();
        let mut tbno: i64 = 0;
        let mut base: i64 = 0;
        loop {
            let max_bands_this_octave = if zones.is_empty() { bpo * 2 } else { bpo };
            base += max_bands_this_octave;
            let bands_remaining = design.n_bandpass_bands_total as i64 - tbno;
            let bands_this_octave = max_bands_this_octave.min(bands_remaining);
            let bands_below = bands_remaining - bands_this_octave;
            let dc_zone = bands_below == 0;
            let dc_adjacent_zone = bands_below < bpo;
            if zones.len() < 2 || dc_zone || dc_adjacent_zone {
                let z = b.make_zone(
                    base - (tbno + bands_this_octave),
                    base - tbno,
                    dc_zone,
                    bands_below,
                );
                zones.push(Arc::new(z));
            }
            octave_zone_index.push(zones.len() - 1);
            tbno += bands_this_octave;
            if dc_zone {
                break;
            }
        }
        debug_assert_eq!(octave_zone_index.len(), design.n_octaves);

        // Downsampling parameters. Downsampling is always by a factor of
        // two; dsparams.sftsize is the FFT used to return to the time
        // domain after discarding the top half of the spectrum.
        let ds_sftsize = fftsize >> 1;
        let mut ds_win = vec![0.0f64; ds_sftsize];
        // The convolution of a rectangle and a Gaussian; a piecewise
        // function of two half-Gaussians joined by a flat segment is not
        // quite smooth enough. The passband sits in the middle.
        gaussian_windowed_lowpass(design.ds_ff, design.ds_ff_sd, &mut ds_win, true);
        let ds_dual_kernel: Vec<f32> = if synthesis {
            // The upsampling filter is the same shape, rescaled for the
            // smaller inverse transform.
            ds_win.iter().map(|&v| (v / ds_sftsize as f64) as f32).collect()
        } else {
            Vec::new()
        };
        let ds_kernel: Vec<f32> = ds_win.iter().map(|&v| (v * b.inv_fftsize) as f32).collect();
        let dsparams = DownsamplingParams {
            sftsize: ds_sftsize,
            kernel: ds_kernel,
            dual_kernel: ds_dual_kernel,
            sft: b.pool.get(ds_sftsize),
        };

        // It may be possible to reduce the fat below fftsize/4 for
        // analysis, but it must stay aligned with the coefficients.
        let fat_size = if synthesis {
            fftsize >> 2
        } else {
            let align = 1usize << b.max_step_log2;
            let fat = (support + align - 1) & !(align - 1);
            // There must be room for signal in each half of the FFT; it
            // can't be all fat.
            if fat >= fftsize >> 1 {
                return None;
            }
            fat
        };
        let filet_size = fftsize - 2 * fat_size;

        // Coefficient layout metadata.
        let zones_meta: Vec<ZoneCoefsMeta> = zones
            .iter()
            .map(|z| {
                ZoneCoefsMeta::new(
                    z.bands
                        .iter()
                        .map(|bp| BandCoefsMeta {
                            slice_len: bp.sftsize >> 1,
                            slice_len_log2: bp.sftsize_log2 - 1,
                            step_log2: bp.step_log2,
                            band_offset: 0,
                        })
                        .collect(),
                )
            })
            .collect();
        let mut oct_meta = Vec::with_capacity(octave_zone_index.len());
        let mut bands_above = 0;
        for &zi in &octave_zone_index {
            oct_meta.push(OctCoefsMeta {
                zone: zi,
                n_bands_above: bands_above,
            });
            bands_above += zones_meta[zi].bands.len();
        }
        let cmeta = Arc::new(CoefsMeta {
            n_octaves: design.n_octaves,
            n_bands_total: design.n_bands_total,
            bands_per_octave: design.params.bands_per_octave as usize,
            slice_len: fftsize >> 1,
            zones: zones_meta,
            octaves: oct_meta,
        });

        let fft = b.pool.get(fftsize);
        Some(Plan {
            synthesis,
            fftsize,
            fftsize_log2: b.fftsize_log2,
            fat_size,
            filet_size,
            max_step_log2: b.max_step_log2,
            oct_support: support,
            inv_fftsize: b.inv_fftsize,
            sftsize_max: b.sftsize_max,
            zones,
            octave_zone_index,
            dsparams,
            fft,
            cmeta,
        })
    }

    pub(crate) fn zone_for_octave(&self, oct: usize) -> &Zone {
        &self.zones[self.octave_zone_index[oct]]
    }

    /// Index of the first slice affected by a sample at `t0`, given a
    /// filter support in octave subsamples. The outermost near-zero part
    /// of the rounded-up FFT is excluded from the reckoning.
    pub(crate) fn affected_slice_b(&self, t0: i64, support: usize) -> i64 {
        let n = self.fftsize as i64;
        (t0 - n + (n / 4 - support as i64)).div_euclid(n / 2) + 1
    }

    /// Index of the first slice not affected by a sample at `t1 - 1`.
    pub(crate) fn affected_slice_e(&self, t1: i64, support: usize) -> i64 {
        let n = self.fftsize as i64;
        (t1 - 1 - (n / 4 - support as i64)).div_euclid(n / 2) + 1
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

struct PlanBuilder<'a> {
    design: &'a Design,
    pool: &'a mut FftPool,
    synthesis: bool,
    fftsize: usize,
    fftsize_log2: u32,
    inv_fftsize: f64,
    sftsize_max: usize,
    max_step_log2: u32,
}

impl PlanBuilder<'_> {
    /// Create one zone: its real bands covering relative band numbers
    /// `bb..be`, plus temporary mock bands mimicking the response of the
    /// neighboring octaves so that the energy normalization of the duals
    /// accounts for spectral leakage across zone boundaries. The mock
    /// bands are discarded once the duals are computed.
    fn make_zone(&mut self, bb: i64, be: i64, dc_zone: bool, bands_below: i64) -> Zone {
        let bpo = i64::from(self.design.params.bands_per_octave);
        let mut bands: Vec<BandParams> = Vec::new();
        let mut mock_bands: Vec<BandParams> = Vec::new();

        if dc_zone {
            // This zone goes all the way to DC.
            bands.push(self.make_band(bb as f64 - 1.0, true));
        } else {
            // There are other zones below; mock them for the dual
            // computation.
            let n_mock_bands = bands_below.min(6);
            mock_bands.push(self.make_band((bb - 1 - n_mock_bands) as f64, true));
            for i in (bb - n_mock_bands..bb).rev() {
                mock_bands.push(self.make_band(i as f64, false));
            }
        }

        // The actual bandpass bands of this zone.
        for i in bb..be {
            bands.push(self.make_band(i as f64, false));
        }

        // Mock bands standing in for the zones above, if any.
        for i in be..bpo * 2 {
            mock_bands.push(self.make_band(i as f64, false));
        }

        let max_step_log2 = bands.iter().map(|bp| bp.step_log2).max().unwrap_or(0);
        self.max_step_log2 = self.max_step_log2.max(max_step_log2);

        // Complex exponentials for non-integer center frequency
        // adjustment and the phase convention.
        let absolute = self.design.params.phase == PhaseConvention::Absolute;
        for bp in &mut bands {
            let sftsize = bp.sftsize;
            let center = if absolute { bp.center } else { 0.0 };
            bp.shift_kernel = (0..sftsize)
                .map(|i| {
                    let arg = TAU * (i as f64 / sftsize as f64) * -(center - bp.icenter as f64);
                    let mut t = Complex::new(arg.cos() as f32, arg.sin() as f32);
                    // Bake the time-domain ifftshift of the spectrum
                    // slice into the kernel by flipping alternate signs.
                    if i & 1 == 1 {
                        t = -t;
                    }
                    t
                })
                .collect();
        }

        if self.synthesis {
            // Accumulate total window power across real and mock bands,
            // then derive each band's dual as kernel / power.
            let mask = self.fftsize as i64 - 1;
            let mut power = vec![0.0f64; self.fftsize];
            for bp in bands.iter().chain(mock_bands.iter()) {
                for i in 0..bp.sftsize {
                    let ii = ((bp.fq_offset + i as i64) & mask) as usize;
                    let y = f64::from(bp.kernel[i]);
                    let p = y * y;
                    power[ii] += p;
                    if !bp.dc {
                        // Mirror image at the negative frequencies.
                        let ni = (self.fftsize - ii) & mask as usize;
                        power[ni] += p;
                    }
                }
            }
            for bp in &mut bands {
                bp.dual_kernel = (0..bp.sftsize)
                    .map(|i| {
                        let ii = ((bp.fq_offset + i as i64) & mask) as usize;
                        let y = f64::from(bp.kernel[i]);
                        if y == 0.0 { 0.0 } else { (y / power[ii]) as f32 }
                    })
                    .collect();
                bp.shift_kernel_conj = bp
                    .shift_kernel
                    .iter()
                    .enumerate()
                    .map(|(i, &t)| {
                        // Undo the ifftshift sign flip, then conjugate.
                        let t = if i & 1 == 1 { -t } else { t };
                        t.conj()
                    })
                    .collect();
            }
        }

        // The mock bands have served their purpose.
        drop(mock_bands);

        Zone {
            bands: bands.into_iter().map(Arc::new).collect(),
            max_step_log2,
        }
    }

    /// Calculate band parameters for a single band.
    ///
    /// `rbno` is a relative band number within the octave: 0 for the fs/8
    /// band, increasing with frequency. When `dc` is true this is the DC
    /// band and `rbno` indicates the cutoff; it is one less than the
    /// `rbno` of the lowest bandpass band.
    fn make_band(&mut self, rbno: f64, dc: bool) -> BandParams {
        let params = &self.design.params;
        let rbno = if dc {
            // Raise the actual DC cutoff by an empirically chosen
            // fraction of a band to reduce power fluctuations.
            rbno + 0.8750526596806952
        } else {
            rbno
        };

        // Center frequency (bandpass) or cutoff frequency (lowpass).
        let ff = self.design.rbno_ff(rbno);
        let ffsd = self.design.ff_sd(ff);
        // One-sided support at half the error budget; the other half is
        // spent on the time-domain truncation.
        let ff_support = gaussian_support(ffsd, params.max_error * 0.5);
        // The DC lowpass adds a flat passband of width ff.
        let dc_support = if dc { ff } else { 0.0 };
        let fq_2support = ((ff_support + dc_support) * 2.0 * self.fftsize as f64).ceil() as usize;
        let orig_sftsize = fq_2support.max(1).next_power_of_two();

        // With very few bands per octave, the taper of the lowpass band
        // can extend past Nyquist, making the natural short-FFT size
        // exceed the plan FFT size. Sampling the lowpass band faster
        // than the signal itself makes no sense, so clamp the size and
        // alias the kernel into it instead.
        let sftsize = if orig_sftsize > self.fftsize {
            assert!(dc, "bandpass band support exceeds the plan FFT size");
            self.fftsize
        } else {
            orig_sftsize
        };
        let sftsize_log2 = sftsize.trailing_zeros();
        let step_log2 = self.fftsize_log2 - sftsize_log2;
        self.sftsize_max = self.sftsize_max.max(sftsize);
        let sft = self.pool.get(sftsize);

        let center = if dc { 0.0 } else { ff * self.fftsize as f64 };
        let icenter = center.round() as i64;
        let fq_offset = icenter - (sftsize as i64 >> 1);

        let mut kernel = vec![0.0f32; sftsize];
        if dc {
            // The cutoff is a fraction of the plan FFT size, but the
            // filter is designed over orig_sftsize bins, so rescale the
            // frequencies accordingly, then fold with aliasing into the
            // possibly smaller kernel.
            let scale = self.fftsize as f64 / orig_sftsize as f64;
            let mut win = vec![0.0f64; orig_sftsize];
            gaussian_windowed_lowpass(ff * scale, ffsd * scale, &mut win, false);
            for (i, &w) in win.iter().enumerate() {
                kernel[i & (sftsize - 1)] += w as f32;
            }
            fftshift(&mut kernel);
        } else {
            for (i, k) in kernel.iter_mut().enumerate() {
                // Big-FFT bin number; bins below DC get no weight.
                let ii = fq_offset + i as i64;
                if ii >= 0 {
                    let this_ff = ii as f64 * self.inv_fftsize;
                    *k = norm_gaussian(ffsd, this_ff - ff) as f32;
                }
            }
        }

        let time_sd = sd_f2t(ffsd);
        let time_support = gaussian_support(time_sd, params.max_error).ceil() as u32;

        BandParams {
            dc,
            sftsize,
            sftsize_log2,
            step_log2,
            sft,
            kernel,
            dual_kernel: Vec::new(),
            shift_kernel: Vec::new(),
            shift_kernel_conj: Vec::new(),
            fq_offset,
            ff,
            center,
            icenter,
            ffsd,
            time_support,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn design_12() -> Design {
        Design::new(&Parameters::new(12, 0.001)).unwrap()
    }

    #[test]
    fn design_counts() {
        let d = design_12();
        // With ff_ref = 1.0 the tuning offset is zero, end_log2ff = -1,
        // and log2(0.001) = -9.9658: ceil(8.9658 * 12) = 108.
        assert_eq!(d.n_bandpass_bands_total, 108);
        assert_eq!(d.n_bands_total, 109);
        // ceil(108 / 12) = 9 octaves, minus one for the double top octave.
        assert_eq!(d.n_octaves, 8);
        assert!((d.tuning_log2ff).abs() < 1e-12);
        // The highest band sits one spacing below fs/2.
        assert!((d.top_band_log2ff - d.bandpass_band_ff(0.0).log2()).abs() < 1e-12);
        assert_eq!(d.ffref_gbno, d.ff_bandpass_band(1.0).round() as i32);
    }

    #[test]
    fn band_number_frequency_transforms_are_inverse() {
        let d = design_12();
        for gbno in [0.0, 1.0, 17.5, 107.0] {
            let ff = d.bandpass_band_ff(gbno);
            let back = d.ff_bandpass_band(ff);
            assert!((back - gbno).abs() < 1e-9, "gbno {gbno} -> {back}");
        }
        // Band frequencies decrease with increasing band number.
        assert!(d.bandpass_band_ff(0.0) > d.bandpass_band_ff(1.0));
        // The top band sits just below fs/2.
        let top = d.bandpass_band_ff(0.0);
        assert!(top < 0.5 && top > 0.4, "top band at {top}");
    }

    #[test]
    fn ds_filter_has_sane_transition_band() {
        let d = design_12();
        assert!(d.ds_ff > 0.25 && d.ds_ff < 0.5);
        assert!(d.ds_ff_sd > 0.0);
        assert!(d.ds_time_support > 0.0);
    }

    #[test]
    fn too_wide_windows_are_rejected() {
        // One band per octave with the default overlap makes the windows
        // wider than the downsampling transition band can accommodate.
        let err = Design::new(&Parameters::new(1, 0.001)).unwrap_err();
        assert!(matches!(err, BuildError::WindowsTooWide { .. }));
    }

    #[test]
    fn plan_structure() {
        let d = design_12();
        let mut pool = FftPool::new();
        let support = d
            .band0_time_analysis_support
            .ceil()
            .max(d.ds_time_support * 2.0) as usize;
        let size = (support * 2).next_power_of_two();
        let plan = Plan::build(&d, &mut pool, false, size, support).expect("plan fits");

        assert_eq!(plan.octave_zone_index.len(), 8);
        // Top octave gets its own zone, interior octaves share zone 1,
        // and the bottom octave (which divides evenly here) gets the DC
        // zone.
        assert_eq!(plan.octave_zone_index[0], 0);
        assert_eq!(plan.octave_zone_index[1], 1);
        assert_eq!(plan.octave_zone_index[6], 1);
        assert_eq!(*plan.octave_zone_index.last().unwrap(), plan.zones.len() - 1);

        // Zone band counts: 24 in the double top octave, 12 interior,
        // 12 + DC at the bottom; 109 bands in total across octaves.
        assert_eq!(plan.zones[0].bands.len(), 24);
        assert_eq!(plan.zones[1].bands.len(), 12);
        assert_eq!(plan.zones.last().unwrap().bands.len(), 13);
        let total: usize = plan
            .octave_zone_index
            .iter()
            .map(|&zi| plan.zones[zi].bands.len())
            .sum();
        assert_eq!(total, 109);

        // DC band is band 0 of the bottom zone.
        assert!(plan.zones.last().unwrap().bands[0].dc);
        assert!(!plan.zones[0].bands[0].dc);

        // fat/filet bookkeeping.
        assert!(!plan.synthesis);
        assert_eq!(plan.filet_size + 2 * plan.fat_size, plan.fftsize);
        assert!(plan.fat_size < plan.fftsize / 2);
        assert_eq!(plan.fat_size & ((1 << plan.max_step_log2) - 1), 0);

        // Downsampling filter spans half the FFT.
        assert_eq!(plan.dsparams.sftsize, plan.fftsize / 2);

        // Metadata mirrors the band structure.
        assert_eq!(plan.cmeta.n_bands_total, 109);
        assert_eq!(plan.cmeta.slice_len, plan.fftsize / 2);
        for (z, zm) in plan.zones.iter().zip(plan.cmeta.zones.iter()) {
            for (bp, bm) in z.bands.iter().zip(zm.bands.iter()) {
                assert_eq!(bm.slice_len, bp.sftsize / 2);
                assert_eq!(bm.step_log2, plan.fftsize_log2 - bp.sftsize_log2);
            }
        }
    }

    #[test]
    fn bandpass_kernels_peak_at_center() {
        let d = design_12();
        let mut pool = FftPool::new();
        let support = d
            .band0_time_analysis_support
            .ceil()
            .max(d.ds_time_support * 2.0) as usize;
        let size = (support * 2).next_power_of_two();
        let plan = Plan::build(&d, &mut pool, false, size, support).expect("plan fits");

        for z in &plan.zones {
            for bp in &z.bands {
                if bp.dc {
                    continue;
                }
                let (imax, &vmax) = bp
                    .kernel
                    .iter()
                    .enumerate()
                    .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap())
                    .unwrap();
                // Peak value close to 1 at a bin close to the center.
                assert!(bp.ffsd > 0.0);
                assert!(vmax > 0.9, "kernel peak {vmax} for band at ff={}", bp.ff);
                let peak_bin = bp.fq_offset + imax as i64;
                assert!(
                    (peak_bin - bp.icenter).abs() <= 1,
                    "peak bin {peak_bin} vs center {}",
                    bp.icenter
                );
            }
        }
    }

    #[test]
    fn synthesis_plan_has_duals() {
        let d = design_12();
        let mut pool = FftPool::new();
        let support = d
            .band0_time_synthesis_support
            .ceil()
            .max(d.ds_time_support * 2.0) as usize;
        let size = (support * 2).next_power_of_two() * 2;
        let plan = Plan::build(&d, &mut pool, true, size, support).expect("plan fits");
        assert!(plan.synthesis);
        assert_eq!(plan.fat_size, plan.fftsize / 4);
        for z in &plan.zones {
            for bp in &z.bands {
                assert_eq!(bp.dual_kernel.len(), bp.sftsize);
                assert_eq!(bp.shift_kernel_conj.len(), bp.sftsize);
                // Near the band center, power is dominated by this band
                // and its overlap partners, so kernel * dual stays within
                // (0, 1].
                let mid = bp.sftsize / 2;
                let prod = bp.kernel[mid] * bp.dual_kernel[mid];
                assert!(prod > 0.0 && prod <= 1.0 + 1e-6, "prod = {prod}");
            }
        }
        assert!(!plan.dsparams.dual_kernel.is_empty());
    }

    #[test]
    fn plan_reports_fat_overflow() {
        let d = design_12();
        let mut pool = FftPool::new();
        let support = d
            .band0_time_analysis_support
            .ceil()
            .max(d.ds_time_support * 2.0) as usize;
        // An FFT this small cannot hold two fats of the needed support.
        let too_small = (support.next_power_of_two()).max(2);
        assert!(Plan::build(&d, &mut pool, false, too_small, support).is_none());
    }
}
