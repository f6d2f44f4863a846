//! Gaussian window math for filter design.
//!
//! The analysis filters are Gaussian-shaped in the frequency domain, so
//! everything in filter-bank construction reduces to a handful of scalar
//! questions about Gaussians: how wide is the window at a given standard
//! deviation, how far out must it be truncated before the tail exceeds an
//! error budget, and how does a time-domain width map to a frequency-domain
//! width. All functions here are pure `f64` and run only at construction
//! time.

use std::f64::consts::{PI, SQRT_2};

/// Rough approximation of the inverse complementary error function.
///
/// Good for arguments in the range 1e-8 to 1, to within a few percent,
/// which is all the accuracy the support calculations need.
pub fn erfc_inv(x: f64) -> f64 {
    (-x.ln()).sqrt() - 0.3
}

/// Gaussian with peak value 1 at `x = 0`.
pub fn norm_gaussian(sd: f64, x: f64) -> f64 {
    (-(x * x) / (2.0 * sd * sd)).exp()
}

/// Gaussian with unit integral.
pub fn gaussian(sd: f64, x: f64) -> f64 {
    let a = 1.0 / (sd * (2.0 * PI).sqrt());
    a * norm_gaussian(sd, x)
}

/// The convolution of a Heaviside step with a Gaussian of standard
/// deviation `sd`: a smooth transition from 0 to 1 with the half-way
/// point at `x = 0`.
pub fn gaussian_edge(sd: f64, x: f64) -> f64 {
    let erf_arg = x / (sd * SQRT_2);
    if erf_arg < -7.0 {
        return 0.0; // error < 5e-23
    }
    if erf_arg > 7.0 {
        return 1.0; // error < 5e-23
    }
    (libm::erf(erf_arg) + 1.0) * 0.5
}

/// Translate the time-domain standard deviation of a Gaussian (in samples)
/// into the corresponding frequency-domain standard deviation (as a
/// fractional frequency).
pub fn sd_t2f(st_sd: f64) -> f64 {
    1.0 / (2.0 * PI * st_sd)
}

/// The inverse of [`sd_t2f`]. The mapping is its own inverse.
pub fn sd_f2t(ff_sd: f64) -> f64 {
    sd_t2f(ff_sd)
}

/// Given a Gaussian with standard deviation `sd` and an error budget
/// `max_error`, return the one-sided support needed to keep the area of
/// the truncated tail within `max_error` of the exact value.
pub fn gaussian_support(sd: f64, max_error: f64) -> f64 {
    sd * SQRT_2 * erfc_inv(max_error)
}

/// The inverse of [`gaussian_support`]: given a support and an error
/// budget, return the standard deviation.
pub fn gaussian_support_inv(support: f64, max_error: f64) -> f64 {
    support / (SQRT_2 * erfc_inv(max_error))
}
