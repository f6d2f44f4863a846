//! Property-based tests for the constant-Q engine.
//!
//! Checks band-numbering invariants across random valid parameter draws,
//! additivity of analysis over random split points, and the sparse
//! container against a model, using proptest for randomized input
//! generation.

use std::collections::HashMap;
use std::sync::OnceLock;

use proptest::prelude::*;

use espectro_core::{
    get_band_coef_bounds, read, Analyzer, Coef, Coefs, Parameters, RangeVec,
};

fn noise(len: usize, mut state: u32) -> Vec<f32> {
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state as i32 as f32) / (i32::MAX as f32)
        })
        .collect()
}

/// Shared analyzer for the per-case-expensive properties.
fn small_analyzer() -> &'static Analyzer {
    static ANL: OnceLock<Analyzer> = OnceLock::new();
    ANL.get_or_init(|| Analyzer::new(&Parameters::new(6, 0.05)).expect("valid parameters"))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    /// For any valid parameter draw, band center frequencies strictly
    /// decrease with increasing global band number, band numbering
    /// round-trips through split/merge, and time steps get coarser
    /// (never finer) towards lower frequencies.
    #[test]
    fn band_invariants(
        bands_per_octave in 6u32..=48,
        ff_min in 1e-3f64..0.2,
        overlap in 0.5f64..1.0,
    ) {
        let mut params = Parameters::new(bands_per_octave, ff_min);
        params.overlap = overlap;
        let anl = Analyzer::new(&params).expect("valid parameters");

        // The lowest bandpass band reaches ff_min.
        let lowest = anl.band_ff(anl.bandpass_bands_end() - 1);
        prop_assert!(lowest <= ff_min * params.band_spacing());

        for gbno in 0..anl.bandpass_bands_end() - 1 {
            prop_assert!(
                anl.band_ff(gbno) > anl.band_ff(gbno + 1),
                "band_ff not strictly decreasing at gbno {}",
                gbno
            );
            prop_assert!(
                anl.band_step_log2(gbno) <= anl.band_step_log2(gbno + 1),
                "time step got finer at gbno {}",
                gbno
            );
        }
        for gbno in 0..anl.bands_end() {
            let (oct, obno) = anl.bno_split(gbno, true).expect("valid band");
            prop_assert_eq!(anl.bno_merge(oct, obno), gbno);
        }
        // Bands just outside the valid range are rejected.
        prop_assert!(anl.bno_split(-1, true).is_none());
        prop_assert!(anl.bno_split(anl.bands_end(), true).is_none());
        prop_assert!(anl.bno_split(anl.band_lowpass(), false).is_none());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    /// Analyzing [0, split) then [split, len) accumulates the same
    /// coefficients as analyzing [0, len) in one call, within the error
    /// budget, for any split point.
    #[test]
    fn analysis_is_additive_at_any_split(
        split in 500i64..3500,
        seed in 1u32..u32::MAX,
    ) {
        let anl = small_analyzer();
        let len = 4000usize;
        let signal = noise(len, seed);

        let mut whole = Coefs::new(anl);
        anl.analyze(&signal, 0, len as i64, &mut whole);

        let mut parts = Coefs::new(anl);
        anl.analyze(&signal[..split as usize], 0, split, &mut parts);
        anl.analyze(&signal[split as usize..], split, len as i64, &mut parts);

        for gbno in (0..anl.bands_end()).step_by(3) {
            let (ci0, ci1) = get_band_coef_bounds(&whole, gbno);
            let n = (ci1 - ci0) as usize;
            let mut a = vec![Coef::default(); n];
            let mut b = vec![Coef::default(); n];
            read(&whole, gbno, ci0, ci1, &mut a);
            read(&parts, gbno, ci0, ci1, &mut b);
            let num: f64 = a.iter().zip(b.iter())
                .map(|(x, y)| f64::from((x - y).norm_sqr()))
                .sum();
            let den: f64 = a.iter().map(|x| f64::from(x.norm_sqr())).sum();
            if den > 0.0 {
                let rel = (num / den).sqrt();
                prop_assert!(rel < 1e-3, "band {}: split mismatch {}", gbno, rel);
            }
        }
    }

    /// Reading ranges entirely outside the analyzed span returns zeros.
    #[test]
    fn reads_outside_coverage_are_zero(
        start in 4_000_000i64..5_000_000,
        n in 1usize..256,
    ) {
        let anl = small_analyzer();
        let signal = noise(2000, 42);
        let mut coefs = Coefs::new(anl);
        anl.analyze(&signal, 0, 2000, &mut coefs);

        for gbno in [0, 5, anl.band_lowpass()] {
            let mut buf = vec![Coef::new(1.0, 1.0); n];
            read(&coefs, gbno, start, start + n as i64, &mut buf);
            prop_assert!(buf.iter().all(|c| *c == Coef::default()));
            // And symmetrically far before the span.
            let mut buf = vec![Coef::new(1.0, 1.0); n];
            read(&coefs, gbno, -start - n as i64, -start, &mut buf);
            prop_assert!(buf.iter().all(|c| *c == Coef::default()));
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// RangeVec behaves like a map over a contiguous index range under
    /// arbitrary insert sequences.
    #[test]
    fn range_vec_matches_model(
        indices in prop::collection::vec(-100i64..100, 1..40),
    ) {
        let mut rv: RangeVec<u64> = RangeVec::new();
        let mut model: HashMap<i64, u64> = HashMap::new();
        for (k, &i) in indices.iter().enumerate() {
            *rv.get_or_create(i) = k as u64 + 1;
            model.insert(i, k as u64 + 1);
        }
        let lo = *indices.iter().min().unwrap();
        let hi = *indices.iter().max().unwrap();
        prop_assert_eq!(rv.begin_index(), lo);
        prop_assert_eq!(rv.end_index(), hi + 1);
        for i in lo..=hi {
            let expect = model.get(&i).copied().unwrap_or(0);
            prop_assert_eq!(*rv.get_existing(i), expect, "index {}", i);
        }
        prop_assert!(rv.get(lo - 1).is_none());
        prop_assert!(rv.get(hi + 1).is_none());
    }

    /// erase_before never exposes stale values: erased indices read as
    /// default, surviving ones keep their values.
    #[test]
    fn range_vec_erase_is_clean(
        n in 2i64..60,
        cut in 0i64..60,
    ) {
        let cut = cut.min(n);
        let mut rv: RangeVec<u64> = RangeVec::new();
        for i in 0..n {
            *rv.get_or_create(i) = (i + 1) as u64;
        }
        rv.erase_before(cut);
        prop_assert_eq!(rv.begin_index(), cut);
        for i in cut..n {
            prop_assert_eq!(*rv.get_existing(i), (i + 1) as u64);
        }
        prop_assert!(rv.get(cut - 1).is_none());
        // Reuse the freed slots by growing forward.
        for i in n..n + cut {
            *rv.get_or_create(i) = (i + 1) as u64;
        }
        for i in cut..n + cut {
            prop_assert_eq!(*rv.get_existing(i), (i + 1) as u64);
        }
    }
}
