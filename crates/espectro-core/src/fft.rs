//! Size-keyed cache of FFT execution plans.
//!
//! Planning a transform with `rustfft` is much more expensive than running
//! one, and the filter bank needs the same handful of power-of-two sizes
//! over and over (one per zone, plus the full slice size and the half-size
//! downsampling transform). [`FftPool`] hands out a shared
//! forward/inverse plan pair per size, so every band and zone that shares
//! a size shares the plan objects.
//!
//! The pool is owned by the analyzer and only used during construction;
//! afterwards the plans live on as immutable [`Arc`] handles inside the
//! bands and plans, so there is no hidden global state and no
//! post-construction locking.
//!
//! Both directions are *unnormalized*, matching the convention used
//! throughout the engine: all 1/N factors are baked into the filter
//! kernels and per-slice scale factors instead.

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::collections::HashMap;
use std::sync::Arc;

/// A forward/inverse FFT plan pair for one power-of-two size.
#[derive(Clone)]
pub struct SizedFft {
    size: usize,
    fwd: Arc<dyn Fft<f32>>,
    inv: Arc<dyn Fft<f32>>,
}

impl SizedFft {
    /// Transform size in complex samples.
    pub fn size(&self) -> usize {
        self.size
    }

    /// In-place forward transform. Unnormalized.
    pub fn forward(&self, buf: &mut [Complex<f32>]) {
        debug_assert_eq!(buf.len(), self.size);
        self.fwd.process(buf);
    }

    /// In-place inverse transform. Unnormalized (no 1/N factor).
    pub fn inverse(&self, buf: &mut [Complex<f32>]) {
        debug_assert_eq!(buf.len(), self.size);
        self.inv.process(buf);
    }
}

impl std::fmt::Debug for SizedFft {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SizedFft").field("size", &self.size).finish()
    }
}

/// Cache mapping transform size to a shared [`SizedFft`].
pub struct FftPool {
    planner: FftPlanner<f32>,
    cache: HashMap<usize, SizedFft>,
}

impl FftPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self {
            planner: FftPlanner::new(),
            cache: HashMap::new(),
        }
    }

    /// Get the plan pair for `size`, creating it on first use.
    ///
    /// # Panics
    /// Panics if `size` is not a power of two.
    pub fn get(&mut self, size: usize) -> SizedFft {
        assert!(size.is_power_of_two(), "FFT size {size} is not a power of two");
        let planner = &mut self.planner;
        self.cache
            .entry(size)
            .or_insert_with(|| SizedFft {
                size,
                fwd: planner.plan_fft_forward(size),
                inv: planner.plan_fft_inverse(size),
            })
            .clone()
    }
}

impl Default for FftPool {
    fn default() -> Self {
        Self::new()
    }
}
