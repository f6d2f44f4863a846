//! Sparse, time-indexed coefficient storage.
//!
//! Coefficients are addressed by a *global band number* and a
//! *coefficient sample index*. Storage is organized the other way around:
//! per octave, per time slice, one flat buffer holding a fixed-length run
//! of samples for every band of that octave. Slices are created lazily on
//! first write and live in a [`RangeVec`] keyed by slice index, so memory
//! is proportional to the analyzed time span, not to absolute time.
//!
//! The coefficient value type is generic over [`CoefValue`]; the transform
//! itself uses `Complex<f32>`, while derived products (magnitudes, cluster
//! ids) can use `f32` or integers through the same storage and iteration
//! machinery.

use std::ops::AddAssign;
use std::sync::Arc;

use crate::analyzer::Analyzer;
use crate::range_vec::RangeVec;
use crate::{CoefIndex, SampleIndex, SliceIndex};

/// Minimal numeric bound for a stored coefficient value.
pub trait CoefValue: Copy + Default + AddAssign {}

impl<T: Copy + Default + AddAssign> CoefValue for T {}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/// Per-band coefficient layout, shared between octaves.
#[derive(Debug, Clone)]
pub struct BandCoefsMeta {
    /// Number of coefficient samples per slice.
    pub slice_len: usize,
    /// log2 of `slice_len`.
    pub slice_len_log2: u32,
    /// log2 of the downsampling factor of this band's coefficients
    /// relative to the signal samples. The value applies as such in the
    /// top octave; in other octaves, the octave number is added.
    pub step_log2: u32,
    /// Offset of this band's run within the slice data array.
    pub band_offset: usize,
}

/// Per-zone coefficient layout: describes the data array of one
/// [`OctCoefs`] slice, shared by every slice using that zone.
#[derive(Debug, Clone)]
pub struct ZoneCoefsMeta {
    /// Band layouts by increasing frequency; DC band first if present.
    pub bands: Vec<BandCoefsMeta>,
    /// Total slice data array length, in elements.
    pub total_size: usize,
}

impl ZoneCoefsMeta {
    /// Pack band layouts into a contiguous data array.
    pub fn new(mut bands: Vec<BandCoefsMeta>) -> Self {
        let mut offset = 0;
        for b in &mut bands {
            b.band_offset = offset;
            offset += b.slice_len;
        }
        Self {
            bands,
            total_size: offset,
        }
    }
}

/// Per-octave coefficient metadata.
#[derive(Debug, Clone)]
pub struct OctCoefsMeta {
    /// Index of this octave's zone layout in [`CoefsMeta::zones`].
    pub zone: usize,
    /// Total number of bands in higher octaves.
    pub n_bands_above: usize,
}

/// Coefficient metadata for a full multirate coefficient set.
///
/// Built with its plan at analyzer construction and shared read-only (via
/// [`Arc`]) by every [`Coefs`] instance using that plan.
#[derive(Debug)]
pub struct CoefsMeta {
    /// Number of octaves.
    pub n_octaves: usize,
    /// Total number of bands, including the DC band.
    pub n_bands_total: usize,
    /// Bandpass bands per octave.
    pub bands_per_octave: usize,
    /// Octave subsamples per slice.
    pub slice_len: usize,
    /// Zone layouts; octaves refer to these by index.
    pub zones: Vec<ZoneCoefsMeta>,
    /// Per-octave metadata.
    pub octaves: Vec<OctCoefsMeta>,
}

impl CoefsMeta {
    /// The zone layout used by octave `oct`.
    pub fn octave_zone(&self, oct: usize) -> &ZoneCoefsMeta {
        &self.zones[self.octaves[oct].zone]
    }
}

/// Split a global band number into an `(octave, band-within-octave)`
/// pair, or `None` if `gbno` is not a valid band. Global band numbers
/// start at 0 for the band at or close to fs/2 and increase towards lower
/// frequencies, with the DC band last; the DC band is only considered
/// valid when `dc` is true.
pub fn bno_split(meta: &CoefsMeta, gbno: i32, dc: bool) -> Option<(usize, usize)> {
    let n_bands_total = meta.n_bands_total as i32;
    if gbno < 0 {
        // Above the top octave
        None
    } else if gbno >= n_bands_total - 1 {
        if gbno == n_bands_total - 1 && dc {
            Some((meta.n_octaves - 1, 0))
        } else {
            None
        }
    } else {
        // Within the bandpass region. Octave 0 is twice the width of the
        // others, so octave 1 folds into it and later octave numbers
        // shift down by one.
        let bpo = meta.bands_per_octave as i32;
        let mut oct = gbno / bpo;
        let mut obno_from_top = gbno % bpo;
        if oct < 2 {
            if oct == 1 {
                obno_from_top += bpo;
                oct -= 1;
            }
        } else {
            oct -= 1;
        }
        let oct = oct as usize;
        // obno_from_top counts down in frequency, obno counts up.
        let n_bands = meta.octave_zone(oct).bands.len();
        Some((oct, n_bands - 1 - obno_from_top as usize))
    }
}

/// The inverse of [`bno_split`]. The arguments must denote a valid band.
pub fn bno_merge(meta: &CoefsMeta, oct: usize, obno: usize) -> i32 {
    let n_bands = meta.octave_zone(oct).bands.len();
    assert!(obno < n_bands, "band {obno} out of range for octave {oct}");
    let bno_from_end = n_bands - 1 - obno;
    (bno_from_end + meta.octaves[oct].n_bands_above) as i32
}

fn split_checked(meta: &CoefsMeta, gbno: i32) -> (usize, usize) {
    bno_split(meta, gbno, true)
        .unwrap_or_else(|| panic!("invalid global band number {gbno}"))
}

/// The coefficient index of the first coefficient of slice 0. For
/// historical reasons the origin is offset by half a slice, corresponding
/// to the analysis fat.
fn coef_offset(len: usize) -> i64 {
    (len >> 1) as i64
}

/// log2 of the downsampling factor of band `obno` in octave `oct`.
pub(crate) fn band_scale_exp(zmeta: &ZoneCoefsMeta, oct: usize, obno: usize) -> u32 {
    zmeta.bands[obno].step_log2 + oct as u32
}

/// The coefficient index of the first coefficient of slice `sli` of band
/// `obno`.
pub(crate) fn coef_time(zmeta: &ZoneCoefsMeta, sli: SliceIndex, obno: usize) -> CoefIndex {
    let len = zmeta.bands[obno].slice_len;
    coef_offset(len) + sli * len as i64
}

/// The sample time of coefficient `i` in slice `sli` of band `obno` in
/// octave `oct`.
pub(crate) fn sample_time(
    zmeta: &ZoneCoefsMeta,
    sli: SliceIndex,
    i: i64,
    oct: usize,
    obno: usize,
) -> SampleIndex {
    let ci = coef_time(zmeta, sli, obno) + i;
    ci << band_scale_exp(zmeta, oct, obno)
}

/// log2 of the time step (downsampling factor) of band `gbno`.
pub fn band_step_log2(meta: &CoefsMeta, gbno: i32) -> u32 {
    let (oct, obno) = split_checked(meta, gbno);
    band_scale_exp(meta.octave_zone(oct), oct, obno)
}

/// Convert a signal time `t` into a coefficient sample index for band
/// `gbno`. `t` must coincide with a coefficient sample time.
pub fn t2i_exact(meta: &CoefsMeta, gbno: i32, t: SampleIndex) -> CoefIndex {
    let shift = band_step_log2(meta, gbno);
    let mask = (1i64 << shift) - 1;
    assert!(
        t & mask == 0,
        "sample time {t} is not a coefficient sample time of band {gbno}"
    );
    t >> shift
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// Coefficients of a single octave for a single time slice: one
/// contiguous buffer holding every band's run, addressed through the
/// zone metadata.
#[derive(Debug)]
pub(crate) struct OctCoefs<C> {
    data: Vec<C>,
}

impl<C: CoefValue> OctCoefs<C> {
    fn new(zmeta: &ZoneCoefsMeta) -> Self {
        Self {
            data: vec![C::default(); zmeta.total_size],
        }
    }

    pub(crate) fn band(&self, zmeta: &ZoneCoefsMeta, obno: usize) -> &[C] {
        let b = &zmeta.bands[obno];
        &self.data[b.band_offset..b.band_offset + b.slice_len]
    }

    pub(crate) fn band_mut(&mut self, zmeta: &ZoneCoefsMeta, obno: usize) -> &mut [C] {
        let b = &zmeta.bands[obno];
        &mut self.data[b.band_offset..b.band_offset + b.slice_len]
    }

    fn estimate_memory_usage(&self) -> usize {
        self.data.len() * size_of::<C>() + size_of::<Self>()
    }
}

/// All time slices for one octave: a sparse array of lazily created
/// [`OctCoefs`] keyed by slice index.
#[derive(Debug)]
pub(crate) struct SlicedCoefs<C> {
    pub(crate) slices: RangeVec<Option<Box<OctCoefs<C>>>>,
}

impl<C: CoefValue> SlicedCoefs<C> {
    fn new() -> Self {
        Self {
            slices: RangeVec::new(),
        }
    }

    /// An existing slice, or `None`. This hides the distinction between
    /// the two kinds of nonexistence: indices outside the range of the
    /// container, and missing slices within the range.
    pub(crate) fn get(&self, sli: SliceIndex) -> Option<&OctCoefs<C>> {
        self.slices.get(sli).and_then(|s| s.as_deref())
    }

    pub(crate) fn get_mut(&mut self, sli: SliceIndex) -> Option<&mut OctCoefs<C>> {
        self.slices.get_mut(sli).and_then(|s| s.as_deref_mut())
    }

    /// An existing slice, or a freshly created zero-filled one.
    pub(crate) fn get_or_create(
        &mut self,
        sli: SliceIndex,
        zmeta: &ZoneCoefsMeta,
    ) -> &mut OctCoefs<C> {
        self.slices
            .get_or_create(sli)
            .get_or_insert_with(|| Box::new(OctCoefs::new(zmeta)))
    }

    fn clear(&mut self) {
        self.slices.clear();
    }

    fn estimate_memory_usage(&self) -> usize {
        let mut total = 0;
        for sli in self.slices.begin_index()..self.slices.end_index() {
            if let Some(c) = self.get(sli) {
                total += c.estimate_memory_usage();
            }
        }
        total
    }
}

/// A full multirate coefficient set: one [`SlicedCoefs`] per octave plus
/// shared metadata.
///
/// Created per analysis session, mutated by
/// [`Analyzer::analyze`](crate::Analyzer::analyze), read by
/// [`Analyzer::synthesize`](crate::Analyzer::synthesize) and the row and
/// iteration functions in this module.
#[derive(Debug)]
pub struct Coefs<C: CoefValue> {
    pub(crate) meta: Arc<CoefsMeta>,
    pub(crate) octaves: Vec<SlicedCoefs<C>>,
}

impl<C: CoefValue> Coefs<C> {
    /// Create an empty coefficient set shaped for `analyzer`.
    pub fn new(analyzer: &Analyzer) -> Self {
        let meta = analyzer.coefs_meta();
        let octaves = (0..meta.n_octaves).map(|_| SlicedCoefs::new()).collect();
        Self { meta, octaves }
    }

    /// The shared layout metadata.
    pub fn meta(&self) -> &CoefsMeta {
        &self.meta
    }

    /// Drop all stored coefficients, keeping the shape.
    pub fn clear(&mut self) {
        for oct in &mut self.octaves {
            oct.clear();
        }
    }

    /// Approximate heap memory held by the stored slices, in bytes.
    pub fn estimate_memory_usage(&self) -> usize {
        self.octaves.iter().map(SlicedCoefs::estimate_memory_usage).sum()
    }

    /// Number of stored (allocated) slices in octave `oct`.
    pub fn slice_count(&self, oct: usize) -> usize {
        let sc = &self.octaves[oct];
        (sc.slices.begin_index()..sc.slices.end_index())
            .filter(|&sli| sc.get(sli).is_some())
            .count()
    }
}

// ---------------------------------------------------------------------------
// Row access
// ---------------------------------------------------------------------------

/// Iterate over the slices of a band with slice length `2^sh` covering
/// coefficient indices `i0..i1`, calling `f(sli, bvi, len)` for each full
/// or partial slice: `sli` is the slice index, `bvi` the first position
/// within the slice, `len` the run length. Handles `i0 >= i1` gracefully
/// (no calls).
fn foreach_slice(sh: u32, i0: CoefIndex, i1: CoefIndex, mut f: impl FnMut(SliceIndex, usize, usize)) {
    let bsize = 1i64 << sh;
    // Adjust for the coefficient origin being offset by half a slice.
    let fatsize = bsize >> 1;
    let i0 = i0 - fatsize;
    let i1 = i1 - fatsize;
    let mut i = i0;
    while i < i1 {
        let sli = i >> sh;
        let bvi = (i & (bsize - 1)) as usize;
        let len = ((bsize as usize) - bvi).min((i1 - i) as usize);
        f(sli, bvi, len);
        i += len as i64;
    }
}

/// Read coefficients `i0..i1` of band `gbno` into `buf`. Indices may be
/// negative or extend outside the stored data; missing coefficients read
/// as zero.
///
/// # Panics
/// Panics if `gbno` is not a valid band number or if
/// `buf.len() != i1 - i0`.
pub fn read<C: CoefValue>(msc: &Coefs<C>, gbno: i32, i0: CoefIndex, i1: CoefIndex, buf: &mut [C]) {
    let (oct, obno) = split_checked(&msc.meta, gbno);
    assert_eq!(buf.len() as i64, i1 - i0, "buffer length must match index range");
    let zmeta = msc.meta.octave_zone(oct);
    let sc = &msc.octaves[oct];
    let sh = zmeta.bands[obno].slice_len_log2;
    let mut out = 0usize;
    foreach_slice(sh, i0, i1, |sli, bvi, len| {
        if let Some(c) = sc.get(sli) {
            buf[out..out + len].copy_from_slice(&c.band(zmeta, obno)[bvi..bvi + len]);
        } else {
            buf[out..out + len].fill(C::default());
        }
        out += len;
    });
}

/// Store coefficients `i0..i1` of band `gbno` from `buf`, creating slices
/// as needed.
///
/// # Panics
/// As [`read`].
pub fn write<C: CoefValue>(
    msc: &mut Coefs<C>,
    gbno: i32,
    i0: CoefIndex,
    i1: CoefIndex,
    buf: &[C],
) {
    let (oct, obno) = split_checked(&msc.meta, gbno);
    assert_eq!(buf.len() as i64, i1 - i0, "buffer length must match index range");
    let meta = Arc::clone(&msc.meta);
    let zmeta = meta.octave_zone(oct);
    let sc = &mut msc.octaves[oct];
    let sh = zmeta.bands[obno].slice_len_log2;
    let mut inp = 0usize;
    foreach_slice(sh, i0, i1, |sli, bvi, len| {
        let c = sc.get_or_create(sli, zmeta);
        c.band_mut(zmeta, obno)[bvi..bvi + len].copy_from_slice(&buf[inp..inp + len]);
        inp += len;
    });
}

/// Add coefficients `i0..i1` of band `gbno` from `buf` into the stored
/// values, creating slices as needed.
///
/// # Panics
/// As [`read`].
pub fn add<C: CoefValue>(msc: &mut Coefs<C>, gbno: i32, i0: CoefIndex, i1: CoefIndex, buf: &[C]) {
    let (oct, obno) = split_checked(&msc.meta, gbno);
    assert_eq!(buf.len() as i64, i1 - i0, "buffer length must match index range");
    let meta = Arc::clone(&msc.meta);
    let zmeta = meta.octave_zone(oct);
    let sc = &mut msc.octaves[oct];
    let sh = zmeta.bands[obno].slice_len_log2;
    let mut inp = 0usize;
    foreach_slice(sh, i0, i1, |sli, bvi, len| {
        let c = sc.get_or_create(sli, zmeta);
        let band = c.band_mut(zmeta, obno);
        for j in 0..len {
            band[bvi + j] += buf[inp + j];
        }
        inp += len;
    });
}

/// Read the single coefficient of band `gbno` at signal time `t`, which
/// must coincide with a coefficient sample time of that band.
pub fn read1t<C: CoefValue>(msc: &Coefs<C>, gbno: i32, t: SampleIndex) -> C {
    let i = t2i_exact(&msc.meta, gbno, t);
    let mut c = [C::default()];
    read(msc, gbno, i, i + 1, &mut c);
    c[0]
}

/// Write the single coefficient of band `gbno` at signal time `t`, which
/// must coincide with a coefficient sample time of that band.
pub fn write1t<C: CoefValue>(msc: &mut Coefs<C>, gbno: i32, t: SampleIndex, c: C) {
    let i = t2i_exact(&msc.meta, gbno, t);
    write(msc, gbno, i, i + 1, &[c]);
}

/// The bounds of the range of existing coefficients for band `gbno`, in
/// coefficient samples. Returns `(0, 0)` when nothing is stored.
pub fn get_band_coef_bounds<C: CoefValue>(msc: &Coefs<C>, gbno: i32) -> (CoefIndex, CoefIndex) {
    let (oct, obno) = split_checked(&msc.meta, gbno);
    band_coef_bounds_at(msc, oct, obno)
}

fn band_coef_bounds_at<C: CoefValue>(
    msc: &Coefs<C>,
    oct: usize,
    obno: usize,
) -> (CoefIndex, CoefIndex) {
    let sc = &msc.octaves[oct];
    if sc.slices.is_empty() {
        return (0, 0);
    }
    let zmeta = msc.meta.octave_zone(oct);
    (
        coef_time(zmeta, sc.slices.begin_index(), obno),
        coef_time(zmeta, sc.slices.end_index(), obno),
    )
}

/// The bounds of the range of existing coefficients across all bands, in
/// signal samples. Returns `(0, 0)` when nothing is stored.
pub fn get_coef_bounds<C: CoefValue>(msc: &Coefs<C>) -> (SampleIndex, SampleIndex) {
    // The greatest coefficient range typically occurs in the lowest
    // bandpass band, but not always, so check them all.
    let mut min_si0 = i64::MAX;
    let mut max_si1 = i64::MIN;
    for gbno in 0..msc.meta.n_bands_total as i32 {
        let (oct, obno) = split_checked(&msc.meta, gbno);
        let (ci0, ci1) = band_coef_bounds_at(msc, oct, obno);
        if ci0 >= ci1 {
            continue;
        }
        let exp = band_scale_exp(msc.meta.octave_zone(oct), oct, obno);
        min_si0 = min_si0.min(ci0 << exp);
        max_si1 = max_si1.max(((ci1 - 1) << exp) + 1);
    }
    if min_si0 > max_si1 {
        return (0, 0);
    }
    (min_si0, max_si1)
}

// ---------------------------------------------------------------------------
// Iteration
// ---------------------------------------------------------------------------

fn band_index_range(meta: &CoefsMeta, b0: i32, b1: i32) -> std::ops::Range<i32> {
    b0.max(0)..b1.min(meta.n_bands_total as i32)
}

fn band_coef_range(
    zmeta: &ZoneCoefsMeta,
    oct: usize,
    obno: usize,
    st0: SampleIndex,
    st1: SampleIndex,
) -> (CoefIndex, CoefIndex, u32, i64) {
    let exp = band_scale_exp(zmeta, oct, obno);
    let time_step = 1i64 << exp;
    // Round the start up and the end down to coefficient sample times.
    // st0 + time_step - 1 cannot overflow: time_step - 1 >= 0 and st0 is
    // at worst i64::MIN.
    let ci0 = (st0 + (time_step - 1)) >> exp;
    let ci1 = ((st1 - 1) >> exp) + 1;
    (ci0, ci1, exp, time_step)
}

/// Apply `f(gbno, sample_time, &mut coef)` to every *existing*
/// coefficient of `msc` within the band range `b0..b1` and the sample
/// time range `st0..st1`. Pass `i32::MIN`/`i32::MAX` and
/// `i64::MIN`/`i64::MAX` to leave a range open.
pub fn process<C: CoefValue>(
    msc: &mut Coefs<C>,
    b0: i32,
    b1: i32,
    st0: SampleIndex,
    st1: SampleIndex,
    mut f: impl FnMut(i32, SampleIndex, &mut C),
) {
    let meta = Arc::clone(&msc.meta);
    for gbno in band_index_range(&meta, b0, b1) {
        let (oct, obno) = split_checked(&meta, gbno);
        let zmeta = meta.octave_zone(oct);
        let (mut ci0, mut ci1, exp, time_step) = band_coef_range(zmeta, oct, obno, st0, st1);
        // Restrict to the existing coefficient index range.
        let (cib0, cib1) = band_coef_bounds_at(msc, oct, obno);
        ci0 = ci0.max(cib0);
        ci1 = ci1.min(cib1);
        let sh = zmeta.bands[obno].slice_len_log2;
        let sc = &mut msc.octaves[oct];
        let mut st = ci0 << exp;
        foreach_slice(sh, ci0, ci1, |sli, bvi, len| {
            if let Some(c) = sc.get_mut(sli) {
                let band = c.band_mut(zmeta, obno);
                let mut t = st;
                for v in &mut band[bvi..bvi + len] {
                    f(gbno, t, v);
                    t += time_step;
                }
            }
            st += len as i64 * time_step;
        });
    }
}

/// Like [`process`], but slices missing within the requested range are
/// created (zero-filled) before `f` is applied, so `f` sees every
/// coefficient in the range.
///
/// # Panics
/// Panics if the sample time range is unbounded, since that would create
/// storage without limit.
pub fn fill<C: CoefValue>(
    msc: &mut Coefs<C>,
    b0: i32,
    b1: i32,
    st0: SampleIndex,
    st1: SampleIndex,
    mut f: impl FnMut(i32, SampleIndex, &mut C),
) {
    assert!(
        st0 > i64::MIN && st1 < i64::MAX,
        "fill requires a bounded sample time range"
    );
    let meta = Arc::clone(&msc.meta);
    for gbno in band_index_range(&meta, b0, b1) {
        let (oct, obno) = split_checked(&meta, gbno);
        let zmeta = meta.octave_zone(oct);
        let (ci0, ci1, exp, time_step) = band_coef_range(zmeta, oct, obno, st0, st1);
        let sh = zmeta.bands[obno].slice_len_log2;
        let sc = &mut msc.octaves[oct];
        let mut st = ci0 << exp;
        foreach_slice(sh, ci0, ci1, |sli, bvi, len| {
            let c = sc.get_or_create(sli, zmeta);
            let band = c.band_mut(zmeta, obno);
            let mut t = st;
            for v in &mut band[bvi..bvi + len] {
                f(gbno, t, v);
                t += time_step;
            }
            st += len as i64 * time_step;
        });
    }
}

/// Iterate two coefficient sets in parallel, applying
/// `f(gbno, sample_time, &mut a, &mut b)`. The first set drives the
/// iteration: only its existing coefficients are visited and none are
/// created in it, while missing slices in the second set are created on
/// demand. Used for cross-set transforms such as magnitude extraction
/// into a `Coefs<f32>`.
///
/// # Panics
/// Panics if the two sets have different shapes.
pub fn process_pair<C0: CoefValue, C1: CoefValue>(
    coefs0: &mut Coefs<C0>,
    coefs1: &mut Coefs<C1>,
    b0: i32,
    b1: i32,
    st0: SampleIndex,
    st1: SampleIndex,
    mut f: impl FnMut(i32, SampleIndex, &mut C0, &mut C1),
) {
    let meta = Arc::clone(&coefs0.meta);
    assert!(
        meta.n_octaves == coefs1.meta.n_octaves
            && meta.n_bands_total == coefs1.meta.n_bands_total
            && meta.slice_len == coefs1.meta.slice_len,
        "coefficient sets have different shapes"
    );
    for gbno in band_index_range(&meta, b0, b1) {
        let (oct, obno) = split_checked(&meta, gbno);
        let zmeta = meta.octave_zone(oct);
        let (mut ci0, mut ci1, exp, time_step) = band_coef_range(zmeta, oct, obno, st0, st1);
        let (cib0, cib1) = band_coef_bounds_at(coefs0, oct, obno);
        ci0 = ci0.max(cib0);
        ci1 = ci1.min(cib1);
        let sh = zmeta.bands[obno].slice_len_log2;
        let mut st = ci0 << exp;
        foreach_slice(sh, ci0, ci1, |sli, bvi, len| {
            if let Some(c0) = coefs0.octaves[oct].get_mut(sli) {
                let c1 = coefs1.octaves[oct].get_or_create(sli, zmeta);
                let band0 = c0.band_mut(zmeta, obno);
                let band1 = c1.band_mut(zmeta, obno);
                let mut t = st;
                for j in 0..len {
                    f(gbno, t, &mut band0[bvi + j], &mut band1[bvi + j]);
                    t += time_step;
                }
            }
            st += len as i64 * time_step;
        });
    }
}

// ---------------------------------------------------------------------------
// Trimming
// ---------------------------------------------------------------------------

/// Forget all coefficients before sample time `limit`, bounding memory
/// use for streaming operation.
///
/// Whole slices strictly before the limit are dropped. When `clean_cut`
/// is true, the below-limit prefix of the partially retained boundary
/// slice is zeroed as well, so that every coefficient with sample time
/// `< limit` subsequently reads as zero.
pub fn forget_before<C: CoefValue>(msc: &mut Coefs<C>, limit: SampleIndex, clean_cut: bool) {
    let meta = Arc::clone(&msc.meta);
    tracing::trace!(limit, clean_cut, "trimming coefficients");
    for oct in 0..meta.n_octaves {
        let zmeta = meta.octave_zone(oct);
        // Convert the limit from samples to slices, rounding down. All
        // bands in an octave cover the same time range, so band 0 (which
        // always exists) serves for the conversion.
        let obno = 0;
        let ci = limit >> band_scale_exp(zmeta, oct, obno);
        let slice_len = zmeta.bands[obno].slice_len;
        let slice_len_log2 = zmeta.bands[obno].slice_len_log2;
        let fat = (slice_len >> 1) as i64;
        let sli = (ci - fat) >> slice_len_log2;
        let sc = &mut msc.octaves[oct];
        sc.slices.erase_before(sli);
        if clean_cut {
            let Some(c) = sc.get_mut(sli) else { continue };
            for obno in 0..zmeta.bands.len() {
                let time_step = 1i64 << band_scale_exp(zmeta, oct, obno);
                let mut st = sample_time(zmeta, sli, 0, oct, obno);
                for v in c.band_mut(zmeta, obno) {
                    if st >= limit {
                        break;
                    }
                    *v = C::default();
                    st += time_step;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Hand-built metadata: 4 bands per octave, 3 octaves.
    /// Octave 0 is double width (8 bands), octave 1 has 4, octave 2 has
    /// 4 bandpass bands plus the DC band. All bands share step_log2 = 2
    /// and slice_len = 8 for simplicity.
    fn test_meta() -> Arc<CoefsMeta> {
        let band = BandCoefsMeta {
            slice_len: 8,
            slice_len_log2: 3,
            step_log2: 2,
            band_offset: 0,
        };
        let zone = |n: usize| ZoneCoefsMeta::new(vec![band.clone(); n]);
        let zones = vec![zone(8), zone(4), zone(5)];
        let octaves = vec![
            OctCoefsMeta { zone: 0, n_bands_above: 0 },
            OctCoefsMeta { zone: 1, n_bands_above: 8 },
            OctCoefsMeta { zone: 2, n_bands_above: 12 },
        ];
        Arc::new(CoefsMeta {
            n_octaves: 3,
            n_bands_total: 17,
            bands_per_octave: 4,
            slice_len: 32,
            zones,
            octaves,
        })
    }

    fn test_coefs() -> Coefs<f32> {
        let meta = test_meta();
        let octaves = (0..meta.n_octaves).map(|_| SlicedCoefs::new()).collect();
        Coefs { meta, octaves }
    }

    #[test]
    fn zone_meta_packs_offsets() {
        let meta = test_meta();
        let z = &meta.zones[0];
        assert_eq!(z.total_size, 64);
        for (i, b) in z.bands.iter().enumerate() {
            assert_eq!(b.band_offset, i * 8);
        }
    }

    #[test]
    fn bno_split_merge_round_trip() {
        let meta = test_meta();
        for gbno in 0..17 {
            let (oct, obno) = bno_split(&meta, gbno, true).expect("valid band");
            assert_eq!(bno_merge(&meta, oct, obno), gbno, "gbno {gbno}");
        }
        // Band 0 is the highest-frequency band of octave 0.
        assert_eq!(bno_split(&meta, 0, true), Some((0, 7)));
        // Bands 0..8 are octave 0 (double width).
        assert_eq!(bno_split(&meta, 7, true), Some((0, 0)));
        assert_eq!(bno_split(&meta, 8, true), Some((1, 3)));
        // DC band is the last index, band 0 of the last octave.
        assert_eq!(bno_split(&meta, 16, true), Some((2, 0)));
        assert_eq!(bno_split(&meta, 16, false), None);
        assert_eq!(bno_split(&meta, -1, true), None);
        assert_eq!(bno_split(&meta, 17, true), None);
    }

    #[test]
    fn foreach_slice_chunks() {
        // sh = 3: slice length 8, origin offset 4.
        let mut calls = Vec::new();
        foreach_slice(3, 0, 20, |sli, bvi, len| calls.push((sli, bvi, len)));
        assert_eq!(calls, vec![(-1, 4, 4), (0, 0, 8), (1, 0, 4)]);
        // Empty and inverted ranges produce no calls.
        calls.clear();
        foreach_slice(3, 5, 5, |sli, bvi, len| calls.push((sli, bvi, len)));
        foreach_slice(3, 7, 3, |sli, bvi, len| calls.push((sli, bvi, len)));
        assert!(calls.is_empty());
    }

    #[test]
    fn read_missing_is_zero() {
        let msc = test_coefs();
        let mut buf = [1.0f32; 12];
        read(&msc, 0, -6, 6, &mut buf);
        assert!(buf.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn write_read_round_trip_across_slices() {
        let mut msc = test_coefs();
        let vals: Vec<f32> = (0..20).map(|i| i as f32 + 1.0).collect();
        // Range straddles three storage slices of band 5.
        write(&mut msc, 5, -3, 17, &vals);
        let mut back = [0.0f32; 20];
        read(&msc, 5, -3, 17, &mut back);
        assert_eq!(&back[..], &vals[..]);
        // Other bands are untouched.
        let mut other = [0.0f32; 20];
        read(&msc, 4, -3, 17, &mut other);
        assert!(other.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn add_accumulates() {
        let mut msc = test_coefs();
        add(&mut msc, 2, 0, 4, &[1.0, 2.0, 3.0, 4.0]);
        add(&mut msc, 2, 2, 6, &[10.0, 10.0, 10.0, 10.0]);
        let mut back = [0.0f32; 6];
        read(&msc, 2, 0, 6, &mut back);
        assert_eq!(back, [1.0, 2.0, 13.0, 14.0, 10.0, 10.0]);
    }

    #[test]
    fn point_access() {
        let mut msc = test_coefs();
        // Band 3 lives in octave 0, step_log2 2: times are multiples of 4.
        assert_eq!(band_step_log2(&msc.meta, 3), 2);
        write1t(&mut msc, 3, 8, 7.5);
        assert_eq!(read1t(&msc, 3, 8), 7.5);
        assert_eq!(read1t(&msc, 3, 12), 0.0);
        // Octave 1 bands step by 8.
        assert_eq!(band_step_log2(&msc.meta, 9), 3);
    }

    #[test]
    #[should_panic(expected = "not a coefficient sample time")]
    fn misaligned_point_access_panics() {
        let msc = test_coefs();
        let _ = read1t(&msc, 3, 5);
    }

    #[test]
    #[should_panic(expected = "invalid global band number")]
    fn invalid_band_panics() {
        let msc = test_coefs();
        let mut buf = [0.0f32; 1];
        read(&msc, 99, 0, 1, &mut buf);
    }

    #[test]
    fn process_visits_only_existing() {
        let mut msc = test_coefs();
        write(&mut msc, 0, 0, 8, &[1.0; 8]);
        let mut visited = Vec::new();
        process(&mut msc, i32::MIN, i32::MAX, i64::MIN, i64::MAX, |gbno, t, v| {
            if *v != 0.0 {
                visited.push((gbno, t));
            }
        });
        assert_eq!(visited.len(), 8);
        assert!(visited.iter().all(|&(g, _)| g == 0));
        // Sample times step by 4 (step_log2 2, octave 0).
        assert_eq!(visited[1].1 - visited[0].1, 4);
    }

    #[test]
    fn fill_creates_in_range() {
        let mut msc = test_coefs();
        fill(&mut msc, 2, 3, 0, 64, |_, _, v| *v = 1.0);
        let mut buf = [0.0f32; 16];
        read(&msc, 2, 0, 16, &mut buf);
        assert!(buf.iter().all(|&x| x == 1.0));
    }

    #[test]
    fn process_pair_extracts_into_second_set() {
        let mut a = test_coefs();
        let meta = test_meta();
        let mut b: Coefs<f32> = Coefs {
            meta: Arc::clone(&a.meta),
            octaves: (0..meta.n_octaves).map(|_| SlicedCoefs::new()).collect(),
        };
        write(&mut a, 10, 0, 8, &[-2.0; 8]);
        process_pair(&mut a, &mut b, i32::MIN, i32::MAX, i64::MIN, i64::MAX, |_, _, x, y| {
            *y = x.abs();
        });
        let mut buf = [0.0f32; 8];
        read(&b, 10, 0, 8, &mut buf);
        assert_eq!(buf, [2.0; 8]);
    }

    #[test]
    fn forget_before_trims_and_cuts() {
        let mut msc = test_coefs();
        // Band 0 (octave 0): coefficient times are multiples of 4.
        let vals: Vec<f32> = (0..32).map(|i| i as f32 + 1.0).collect();
        write(&mut msc, 0, 0, 32, &vals);
        let before = msc.estimate_memory_usage();
        assert!(before > 0);

        // Trim before sample time 64 (coefficient index 16) with a clean
        // cut: everything before must read zero, everything after must be
        // intact.
        forget_before(&mut msc, 64, true);
        let mut back = [0.0f32; 32];
        read(&msc, 0, 0, 32, &mut back);
        for (i, &v) in back.iter().enumerate() {
            let t = (i as i64) << 2;
            if t < 64 {
                assert_eq!(v, 0.0, "coefficient at t={t} should be forgotten");
            } else {
                assert_eq!(v, vals[i], "coefficient at t={t} should survive");
            }
        }
        assert!(msc.estimate_memory_usage() < before);
    }

    #[test]
    fn coef_bounds() {
        let mut msc = test_coefs();
        assert_eq!(get_band_coef_bounds(&msc, 0), (0, 0));
        assert_eq!(get_coef_bounds(&msc), (0, 0));
        write(&mut msc, 0, 10, 11, &[1.0]);
        let (ci0, ci1) = get_band_coef_bounds(&msc, 0);
        assert!(ci0 <= 10 && ci1 > 10);
        let (si0, si1) = get_coef_bounds(&msc);
        assert!(si0 <= 40 && si1 > 40);
    }
}
