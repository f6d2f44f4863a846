//! The top-level analyzer: plan construction and the recursive multirate
//! analysis/synthesis pipeline.
//!
//! Analysis walks the octaves from the top down. At each octave the
//! signal is cut into FFT-sized slices whose usable "filet" excludes the
//! zero-padded "fat" margins; each slice is transformed once, every
//! band's kernel is applied to the spectrum and inverse-transformed at
//! the band's own (smaller) FFT size, and the lower half of the spectrum
//! is simultaneously lowpass-filtered and inverse-transformed to produce
//! the half-rate signal for the next octave. Synthesis mirrors the same
//! recursion: deeper octaves are reconstructed first, upsampled
//! spectrally, and summed with the current octave's dual-windowed band
//! contributions before one inverse FFT per slice produces audio.

use std::f64::consts::TAU;
use std::sync::Arc;

use rustfft::num_complex::Complex;

use crate::coefs::{self, Coefs, CoefsMeta};
use crate::error::BuildError;
use crate::fft::FftPool;
use crate::params::{Parameters, PhaseConvention};
use crate::plan::{Design, Plan};
use crate::SampleIndex;

type C32 = Complex<f32>;

/// Hard ceiling on the FFT size tried during plan construction. A
/// configuration that cannot fit its padding below this size is
/// contradictory, and surfaces as [`BuildError::SizingDiverged`].
const MAX_FFTSIZE: usize = 1 << 26;

/// Constant-Q spectrum analyzer and resynthesizer.
///
/// Building an analyzer designs the complete filter bank (a one-time
/// cost); afterwards the analyzer is immutable and can be shared freely
/// between threads. Each [`analyze`](Self::analyze) or
/// [`synthesize`](Self::synthesize) call allocates its own scratch
/// buffers, so concurrent calls on one analyzer are independent as long
/// as they use different coefficient sets.
pub struct Analyzer {
    design: Design,
    anl_plans: Vec<Arc<Plan>>,
    syn_plans: Vec<Arc<Plan>>,
    fftsize_max: usize,
    sftsize_max: usize,
    cmeta_any: Arc<CoefsMeta>,
}

impl Analyzer {
    /// Design the filter bank for `params`.
    ///
    /// Builds the two analysis plans (the smallest power-of-two FFT size
    /// that fits the filter supports, and its double for longer spans)
    /// and, if synthesis is enabled, one synthesis plan with wider
    /// supports.
    pub fn new(params: &Parameters) -> Result<Self, BuildError> {
        let design = Design::new(params)?;
        let mut pool = FftPool::new();

        let max_support = design
            .band0_time_analysis_support
            .ceil()
            .max(design.ds_time_support * 2.0) as usize;
        let mut size = (max_support * 2).next_power_of_two();
        let mut anl_plans = Vec::new();
        loop {
            if size > MAX_FFTSIZE {
                return Err(BuildError::SizingDiverged { max_fftsize: MAX_FFTSIZE });
            }
            if let Some(p) = Plan::build(&design, &mut pool, false, size, max_support) {
                tracing::debug!(fftsize = size, "analysis plan built");
                anl_plans.push(Arc::new(p));
                break;
            }
            tracing::debug!(fftsize = size, "fat padding does not fit, doubling FFT size");
            size *= 2;
        }
        // A second, larger plan for long spans; the retry loop above
        // already proved this size fits.
        size *= 2;
        let p = Plan::build(&design, &mut pool, false, size, max_support)
            .ok_or(BuildError::SizingDiverged { max_fftsize: size })?;
        tracing::debug!(fftsize = size, "analysis plan built");
        anl_plans.push(Arc::new(p));

        let mut syn_plans = Vec::new();
        if design.params.synthesis {
            let max_support = design
                .band0_time_synthesis_support
                .ceil()
                .max(design.ds_time_support * 2.0) as usize;
            // Room for at least the two fats plus as much filet again.
            let size = (max_support * 2).next_power_of_two() * 2;
            if size > MAX_FFTSIZE {
                return Err(BuildError::SizingDiverged { max_fftsize: MAX_FFTSIZE });
            }
            let p = Plan::build(&design, &mut pool, true, size, max_support)
                .ok_or(BuildError::SizingDiverged { max_fftsize: size })?;
            tracing::debug!(fftsize = size, "synthesis plan built");
            syn_plans.push(Arc::new(p));
        }

        let mut fftsize_max = 0;
        let mut sftsize_max = 0;
        for p in anl_plans.iter().chain(syn_plans.iter()) {
            fftsize_max = fftsize_max.max(p.fftsize);
            sftsize_max = sftsize_max.max(p.sftsize_max);
        }
        let cmeta_any = Arc::clone(&anl_plans[0].cmeta);
        tracing::debug!(
            n_octaves = design.n_octaves,
            n_bands = design.n_bands_total,
            fftsize_max,
            "analyzer constructed"
        );
        Ok(Self {
            design,
            anl_plans,
            syn_plans,
            fftsize_max,
            sftsize_max,
            cmeta_any,
        })
    }

    /// The parameters this analyzer was built with.
    pub fn params(&self) -> &Parameters {
        &self.design.params
    }

    /// Coefficient layout for new coefficient sets: that of the largest
    /// analysis plan.
    pub(crate) fn coefs_meta(&self) -> Arc<CoefsMeta> {
        Arc::clone(&self.anl_plans[self.anl_plans.len() - 1].cmeta)
    }

    // -- band queries -------------------------------------------------------

    /// First valid band number.
    pub fn bands_begin(&self) -> i32 {
        0
    }

    /// One past the last valid band number (the DC band).
    pub fn bands_end(&self) -> i32 {
        self.design.n_bands_total as i32
    }

    /// First bandpass band number.
    pub fn bandpass_bands_begin(&self) -> i32 {
        0
    }

    /// One past the last bandpass band number.
    pub fn bandpass_bands_end(&self) -> i32 {
        self.design.n_bands_total as i32 - 1
    }

    /// The band number of the DC (lowpass) band.
    pub fn band_lowpass(&self) -> i32 {
        self.design.n_bands_total as i32 - 1
    }

    /// The band number closest to the reference frequency.
    pub fn band_ref(&self) -> i32 {
        self.design.ffref_gbno
    }

    /// Number of octaves in the filter bank.
    pub fn n_octaves(&self) -> usize {
        self.design.n_octaves
    }

    /// Center frequency of band `gbno` as a fractional frequency; zero
    /// for the DC band. `gbno` must be a valid band number.
    pub fn band_ff(&self, gbno: i32) -> f64 {
        if gbno == self.band_lowpass() {
            return 0.0;
        }
        self.design.bandpass_band_ff(f64::from(gbno))
    }

    /// Center frequency of bandpass band `gbno`, which need not be a
    /// valid band number; out-of-range arguments extrapolate along the
    /// logarithmic band spacing.
    pub fn bandpass_band_ff(&self, gbno: f64) -> f64 {
        self.design.bandpass_band_ff(gbno)
    }

    /// The (fractional) bandpass band number corresponding to fractional
    /// frequency `ff`. Inverse of [`bandpass_band_ff`](Self::bandpass_band_ff).
    pub fn ff_bandpass_band(&self, ff: f64) -> f64 {
        self.design.ff_bandpass_band(ff)
    }

    /// The Q factor of the bandpass filters.
    pub fn q(&self) -> f64 {
        self.design.params.q()
    }

    /// Split a global band number into `(octave, band-within-octave)`.
    pub fn bno_split(&self, gbno: i32, dc: bool) -> Option<(usize, usize)> {
        coefs::bno_split(&self.cmeta_any, gbno, dc)
    }

    /// Merge `(octave, band-within-octave)` into a global band number.
    pub fn bno_merge(&self, oct: usize, obno: usize) -> i32 {
        coefs::bno_merge(&self.cmeta_any, oct, obno)
    }

    /// log2 of the time step (downsampling factor) of band `gbno`.
    pub fn band_step_log2(&self, gbno: i32) -> u32 {
        coefs::band_step_log2(&self.cmeta_any, gbno)
    }

    /// log2 of the largest time step of any band.
    pub fn band_scale_exp_max(&self) -> u32 {
        self.band_step_log2(self.bandpass_bands_end() - 1)
    }

    // -- support queries ----------------------------------------------------

    /// Worst-case time support of the analysis filters: the largest
    /// distance in time between a signal sample and a coefficient
    /// affected by it, in samples.
    pub fn analysis_support(&self) -> f64 {
        self.analysis_support_at(f64::from(self.bands_end() - 2))
    }

    /// Time support of the analysis filter of bandpass band `gbno`.
    pub fn analysis_support_at(&self, gbno: f64) -> f64 {
        self.design.analysis_support_at(gbno)
    }

    /// Worst-case time support of the synthesis filters, in samples.
    pub fn synthesis_support(&self) -> f64 {
        self.analysis_support() * self.design.synthesis_support_multiplier()
    }

    /// Time support of the synthesis filter of bandpass band `gbno`.
    pub fn synthesis_support_at(&self, gbno: f64) -> f64 {
        self.analysis_support_at(gbno) * self.design.synthesis_support_multiplier()
    }

    // -- coefficient sample time helpers ------------------------------------

    /// The sample time of the band `gbno` coefficient closest to time `t`.
    pub fn nearest_coef_sample(&self, gbno: i32, t: f64) -> SampleIndex {
        let shift = self.band_step_log2(gbno);
        let step = (1i64 << shift) as f64;
        ((t / step).round() as i64) << shift
    }

    /// The highest coefficient sample time of band `gbno` that is less
    /// than or equal to `t`.
    pub fn floor_coef_sample(&self, gbno: i32, t: f64) -> SampleIndex {
        let shift = self.band_step_log2(gbno);
        let step = (1i64 << shift) as f64;
        ((t / step).floor() as i64) << shift
    }

    /// The lowest coefficient sample time of band `gbno` that is greater
    /// than or equal to `t`.
    pub fn ceil_coef_sample(&self, gbno: i32, t: f64) -> SampleIndex {
        let shift = self.band_step_log2(gbno);
        let step = (1i64 << shift) as f64;
        ((t / step).ceil() as i64) << shift
    }

    // -- analysis -----------------------------------------------------------

    /// Analyze the signal samples covering times `t0..t1`, *adding* the
    /// resulting coefficients into `coefs`.
    ///
    /// `signal[k]` is the sample at time `t0 + k`. Results of analyzing
    /// adjacent spans accumulate to the same coefficients as analyzing
    /// their union in one call (within the error budget), so a long or
    /// streaming signal can be fed in pieces.
    ///
    /// # Panics
    /// Panics if `signal.len() != t1 - t0` or if `coefs` was built for a
    /// different filter-bank shape.
    pub fn analyze(
        &self,
        signal: &[f32],
        t0: SampleIndex,
        t1: SampleIndex,
        coefs: &mut Coefs<C32>,
    ) {
        assert!(t1 >= t0, "invalid time range {t0}..{t1}");
        assert_eq!(signal.len() as i64, t1 - t0, "signal length must match time range");
        self.check_shape(coefs.meta());
        if t0 == t1 {
            return;
        }
        let mut bufs = Buffers::new(self.fftsize_max, self.sftsize_max);
        self.analyze_sliced(&mut bufs, 0, signal, t0, t1, coefs);
    }

    /// Reconstruct audio for times `t0..t1` from `coefs` into `out`.
    ///
    /// # Panics
    /// Panics if the analyzer was built without synthesis, if
    /// `out.len() != t1 - t0`, or if `coefs` has the wrong shape.
    pub fn synthesize(
        &self,
        coefs: &Coefs<C32>,
        t0: SampleIndex,
        t1: SampleIndex,
        out: &mut [f32],
    ) {
        assert!(
            self.design.params.synthesis,
            "analyzer was built without synthesis support"
        );
        assert!(t1 >= t0, "invalid time range {t0}..{t1}");
        assert_eq!(out.len() as i64, t1 - t0, "output length must match time range");
        self.check_shape(coefs.meta());
        if t0 == t1 {
            return;
        }
        let mut bufs = Buffers::new(self.fftsize_max, self.sftsize_max);
        self.synthesize_sliced(&mut bufs, 0, coefs, t0, t1, out);
    }

    fn check_shape(&self, meta: &CoefsMeta) {
        assert!(
            meta.n_octaves == self.design.n_octaves
                && meta.n_bands_total == self.design.n_bands_total,
            "coefficient set does not match this analyzer's filter bank"
        );
    }

    /// Pick the smallest plan whose filet fits the span, or the largest
    /// plan otherwise.
    fn choose_plan(plans: &[Arc<Plan>], size: i64) -> &Plan {
        let mut i = 0;
        while i < plans.len() - 1 && (plans[i].filet_size as i64) < size {
            i += 1;
        }
        &plans[i]
    }

    /// Analyze a signal segment at octave `oct`, recursing into deeper
    /// octaves with the downsampled signal. `signal[k]` is the sample at
    /// octave-local time `t0 + k`; coefficients are added to `msc`.
    fn analyze_sliced(
        &self,
        bufs: &mut Buffers,
        oct: usize,
        signal: &[f32],
        t0: i64,
        t1: i64,
        msc: &mut Coefs<C32>,
    ) {
        let plan = Self::choose_plan(&self.anl_plans, t1 - t0);
        let z = plan.zone_for_octave(oct);

        // The FFTs need not align to full filet-size slices here, but
        // they must align to coefficient samples so that no sub-sample
        // time shifts are needed: specifically, to the largest
        // coefficient time step of the octave. slice_t0 is the sample
        // time of the first sample of the filet, not of the FFT buffer.
        let mut slice_t0 = t0 & !((1i64 << z.max_step_log2) - 1);

        let fat = plan.fat_size as i64;
        let filet = plan.filet_size as i64;
        let fftsize = plan.fftsize;

        // The downsampled buffer covers one half-size filet per slice
        // plus the fat at each end, and is accumulated into, so its size
        // depends on the span and must be allocated per call.
        let n_slices = ((t1 - slice_t0) + (filet - 1)) / filet;
        let dstotlen = ((n_slices * filet) + 2 * fat) >> 1;
        let tmp = slice_t0 - fat;
        debug_assert!(tmp & 1 == 0);
        let dst0 = tmp >> 1;
        let dst1 = dst0 + dstotlen;

        // Only part of the downsampled buffer holds nonzero data; trim
        // the recursion bounds so zeros are not analyzed.
        let ds_support = self.design.ds_time_support as i64;
        let dst0a = dst0.max((t0 >> 1) - ds_support);
        let dst1a = dst1.min((t1 >> 1) + 1 + ds_support);

        let mut downsampled = vec![0.0f32; dstotlen as usize];

        let Buffers {
            slice,
            spectrum,
            sdata,
            band,
            coefbuf,
            ddata,
            ..
        } = bufs;
        let slice = &mut slice[..fftsize];
        let spectrum = &mut spectrum[..fftsize];
        // The fat stays zero throughout; clear it once.
        slice[..fat as usize].fill(0.0);
        slice[fftsize - fat as usize..].fill(0.0);

        let absolute = self.design.params.phase == PhaseConvention::Absolute;
        let scale_factor = (self.design.params.coef_scale * plan.inv_fftsize) as f32;

        for slice_i in 0..n_slices {
            if slice_t0 >= t1 {
                break;
            }
            let slice_t1 = (slice_t0 + filet).min(t1);

            // Copy into the filet, zero-padding where the signal does
            // not reach.
            copy_overlapping_zerofill(
                &mut slice[fat as usize..(fat + filet) as usize],
                signal,
                t0 - slice_t0,
                t1 - slice_t0,
            );

            for (i, s) in slice.iter().enumerate() {
                spectrum[i] = C32::new(*s, 0.0);
            }
            plan.fft.forward(spectrum);

            for (obno, bp) in z.bands.iter().enumerate() {
                let sft = bp.sftsize;
                let sd = &mut sdata[..sft];

                // Multiply a slice of the spectrum by the band's window.
                // The DC band always wraps around into the negative
                // frequencies, and a very wide band might; checking in
                // the inner loop would be wasteful, so the rare wrapping
                // cases take a separate slow path.
                let start = bp.fq_offset;
                if start >= 0 && start + sft as i64 <= (fftsize as i64) >> 1 {
                    let base = start as usize;
                    for i in 0..sft {
                        sd[i] = spectrum[base + i] * bp.kernel[i];
                    }
                } else {
                    for i in 0..sft {
                        sd[i] =
                            real_spectrum_coef(spectrum, start + i as i64, fftsize) * bp.kernel[i];
                    }
                }

                // The band center sits at the middle of the spectrum
                // slice but represents f=0 for the small inverse FFT, so
                // an ifftshift would be needed here; it is baked into
                // the shift kernel instead (alternating signs), making
                // it free.
                let bd = &mut band[..sft];
                bd.copy_from_slice(sd);
                bp.sft.inverse(bd);

                // Fractional center frequency adjustment, phase
                // correction, and amplitude scaling. Phase must be
                // computed in double precision.
                let ff = bp.center * plan.inv_fftsize;
                let arg = if absolute {
                    -TAU * (slice_t0 - fat) as f64 * ff
                } else {
                    0.0
                };
                let pts = C32::new(arg.cos() as f32, arg.sin() as f32) * scale_factor;
                let cb = &mut coefbuf[..sft];
                for i in 0..sft {
                    cb[i] = bd[i] * bp.shift_kernel[i] * pts;
                }

                let shift = bp.step_log2;
                debug_assert!((slice_t0 - fat) & ((1i64 << shift) - 1) == 0);
                let ii = (slice_t0 - fat) >> shift;

                // Only the part of the buffer corresponding to the
                // interval t0..t1 plus the band's true time support holds
                // substantially nonzero data; don't add the zeros.
                let ii0 = ii.max((t0 - i64::from(bp.time_support)) >> shift);
                let ii1 = (ii + sft as i64)
                    .min(((t1 + i64::from(bp.time_support)) >> shift) + 1);
                if ii0 < ii1 {
                    let gbno = coefs::bno_merge(msc.meta(), oct, obno);
                    coefs::add(
                        msc,
                        gbno,
                        ii0,
                        ii1,
                        &cb[(ii0 - ii) as usize..(ii1 - ii) as usize],
                    );
                }
            }

            // Downsample: extract both positive and negative low
            // frequencies, apply the lowpass, and return to the time
            // domain at half the rate.
            if oct + 1 < self.design.n_octaves {
                let ds = &plan.dsparams;
                let half = ds.sftsize >> 1;
                let sd = &mut sdata[..ds.sftsize];
                for i in 0..half {
                    sd[i] = spectrum[i] * ds.kernel[half + i];
                }
                for i in 0..half {
                    sd[half + i] = spectrum[fftsize - half + i] * ds.kernel[i];
                }
                let dd = &mut ddata[..ds.sftsize];
                dd.copy_from_slice(sd);
                ds.sft.inverse(dd);
                let dst = slice_i as usize * (filet as usize >> 1);
                for (i, d) in dd.iter().enumerate() {
                    downsampled[dst + i] += d.re;
                }
            }

            slice_t0 = slice_t1;
        }

        if oct + 1 < self.design.n_octaves {
            let lo = (dst0a - dst0) as usize;
            let hi = (dst1a - dst0) as usize;
            self.analyze_sliced(bufs, oct + 1, &downsampled[lo..hi], dst0a, dst1a, msc);
        }
    }

    /// Resynthesize octave `oct` and below for octave-local times
    /// `t0..t1` into `out`.
    fn synthesize_sliced(
        &self,
        bufs: &mut Buffers,
        oct: usize,
        msc: &Coefs<C32>,
        t0: i64,
        t1: i64,
        out: &mut [f32],
    ) {
        let plan = Self::choose_plan(&self.syn_plans, t1 - t0);
        let si0 = plan.affected_slice_b(t0, plan.oct_support);
        let si1 = plan.affected_slice_e(t1, plan.oct_support);
        let fat = plan.fat_size as i64;
        let filet = plan.filet_size as i64;

        // The reconstructed half-rate signal from the deeper octaves,
        // covering the entire time interval spanned by the slices.
        let sub_len = (((si1 - si0) * filet + 2 * fat) / 2) as usize;
        let mut sub_signal = vec![0.0f32; sub_len];
        if oct + 1 < self.design.n_octaves {
            let sub_t0 = si0 * (filet / 2);
            let sub_t1 = sub_t0 + sub_len as i64;
            self.synthesize_sliced(bufs, oct + 1, msc, sub_t0, sub_t1, &mut sub_signal);
        }

        let ds_sftsize = plan.dsparams.sftsize;
        let mut downsampled = vec![0.0f32; ds_sftsize];

        for si in si0..si1 {
            let slice_t0 = si * filet;

            if oct + 1 < self.design.n_octaves {
                let bi = (si - si0) as usize * (ds_sftsize >> 1);
                downsampled.copy_from_slice(&sub_signal[bi..bi + ds_sftsize]);
            }

            self.synthesize_one_slice(bufs, oct, plan, msc, &downsampled, slice_t0);

            // Copy the non-overlapping filet portion into the output.
            let b = (slice_t0 + fat).max(t0);
            let e = (slice_t0 + plan.fftsize as i64 - fat).min(t1);
            for i in b..e {
                out[(i - t0) as usize] = bufs.signal_slice[(i - slice_t0) as usize];
            }
        }
    }

    /// Reconstruct one slice of octave `oct` starting at octave-local
    /// time `t0`, leaving the result in `bufs.signal_slice`.
    fn synthesize_one_slice(
        &self,
        bufs: &mut Buffers,
        oct: usize,
        plan: &Plan,
        msc: &Coefs<C32>,
        downsampled: &[f32],
        t0: i64,
    ) {
        let Buffers {
            spectrum: signal,
            sdata,
            coefbuf,
            signal_slice,
            ..
        } = bufs;
        let fftsize = plan.fftsize;
        let mask = fftsize as i64 - 1;
        let signal = &mut signal[..fftsize];
        signal.fill(C32::default());

        let z = plan.zone_for_octave(oct);
        let absolute = self.design.params.phase == PhaseConvention::Absolute;

        for (obno, bp) in z.bands.iter().enumerate() {
            let sft = bp.sftsize;
            let ii = t0 >> bp.step_log2;
            let cb = &mut coefbuf[..sft];
            let gbno = coefs::bno_merge(msc.meta(), oct, obno);
            coefs::read(msc, gbno, ii, ii + sft as i64, cb);

            // Undo the phase correction and fractional-frequency shift,
            // and remove the coefficient scale; phase in double
            // precision.
            let scale_factor = (1.0 / (self.design.params.coef_scale * sft as f64)) as f32;
            let ff = bp.center * plan.inv_fftsize;
            let arg = if absolute { TAU * t0 as f64 * ff } else { 0.0 };
            let pts = C32::new(arg.cos() as f32, arg.sin() as f32) * scale_factor;
            let sd = &mut sdata[..sft];
            for i in 0..sft {
                sd[i] = cb[i] * bp.shift_kernel_conj[i] * pts;
            }

            bp.sft.forward(sd);

            // Multiply by the dual window and scatter into the big
            // spectrum, mirroring into the negative frequencies for the
            // conjugate symmetry of a real signal. The input index is
            // ifftshifted because f=0 sits in the middle of the window.
            for i in 0..sft {
                let iii = ((bp.fq_offset + i as i64) & mask) as usize;
                let v = sd[i ^ (sft >> 1)] * bp.dual_kernel[i];
                signal[iii] += v;
                if !bp.dc {
                    signal[(fftsize - iii) & (fftsize - 1)] += v.conj();
                }
            }
        }

        if oct + 1 < self.design.n_octaves {
            // Upsample the reconstruction from the deeper octaves: back
            // to the frequency domain, apply the (fftshifted) upsampling
            // filter, and add into the lower part of the big spectrum.
            // Leaving the middle untouched zero-pads the spectrum; the
            // Nyquist bin is split between the two halves, though there
            // is next to no energy there thanks to the windowing.
            let ds = &plan.dsparams;
            debug_assert_eq!(ds.sftsize, fftsize / 2);
            let sd = &mut sdata[..ds.sftsize];
            for (i, d) in downsampled.iter().enumerate() {
                sd[i] = C32::new(*d, 0.0);
            }
            ds.sft.forward(sd);
            for i in 0..ds.sftsize {
                sd[i] *= ds.dual_kernel[i ^ (ds.sftsize >> 1)];
            }
            let half = ds.sftsize >> 1;
            for i in 0..half {
                signal[i] += sd[i];
            }
            let nyquist = sd[half] * 0.5;
            signal[half] += nyquist;
            signal[half + fftsize / 2] += nyquist;
            for i in half + 1..ds.sftsize {
                signal[i + fftsize / 2] += sd[i];
            }
        }

        plan.fft.inverse(signal);
        for (i, s) in signal.iter().enumerate() {
            signal_slice[i] = s.re;
        }
    }
}

impl std::fmt::Debug for Analyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Analyzer")
            .field("params", &self.design.params)
            .field("n_octaves", &self.design.n_octaves)
            .field("n_bands_total", &self.design.n_bands_total)
            .field("fftsize_max", &self.fftsize_max)
            .finish_non_exhaustive()
    }
}

/// Per-call scratch buffers, allocated once per top-level analyze or
/// synthesize call and sized from the largest plan FFT and band FFT
/// sizes to minimize allocation count.
struct Buffers {
    slice: Vec<f32>,
    spectrum: Vec<C32>,
    sdata: Vec<C32>,
    band: Vec<C32>,
    coefbuf: Vec<C32>,
    ddata: Vec<C32>,
    signal_slice: Vec<f32>,
}

impl Buffers {
    fn new(fftsize_max: usize, sftsize_max: usize) -> Self {
        Self {
            slice: vec![0.0; fftsize_max],
            spectrum: vec![C32::default(); fftsize_max],
            // The downsampling transform spans half the plan FFT, which
            // can exceed the largest band FFT, so size these generously.
            sdata: vec![C32::default(); fftsize_max],
            band: vec![C32::default(); sftsize_max],
            coefbuf: vec![C32::default(); sftsize_max],
            ddata: vec![C32::default(); fftsize_max],
            signal_slice: vec![0.0; fftsize_max],
        }
    }
}

/// Fill `dst` with data from `src` where available, and zeros elsewhere.
/// `src` covers `dst` indices `i0` (inclusive) to `i1` (exclusive), which
/// may lie partly or wholly outside `dst`.
fn copy_overlapping_zerofill(dst: &mut [f32], src: &[f32], i0: i64, i1: i64) {
    debug_assert_eq!(src.len() as i64, i1 - i0);
    let dstlen = dst.len() as i64;
    let overlap_begin = i0.max(0);
    let overlap_end = i1.min(dstlen);
    if overlap_end <= overlap_begin {
        dst.fill(0.0);
        return;
    }
    dst[..overlap_begin as usize].fill(0.0);
    dst[overlap_begin as usize..overlap_end as usize]
        .copy_from_slice(&src[(overlap_begin - i0) as usize..(overlap_end - i0) as usize]);
    dst[overlap_end as usize..].fill(0.0);
}

/// Given the FFT spectrum of a real sequence, return the coefficient for
/// an arbitrary frequency index, which may correspond to a negative
/// frequency or an alias outside `0..fftsize`, using the conjugate
/// symmetry of real spectra. fs/2 is considered nonnegative.
fn real_spectrum_coef(spectrum: &[C32], i: i64, fftsize: usize) -> C32 {
    let mut i = (i & (fftsize as i64 - 1)) as usize;
    let neg_fq = i > (fftsize >> 1);
    if neg_fq {
        i = fftsize - i;
    }
    let c = spectrum[i];
    if neg_fq { c.conj() } else { c }
}
