//! Floating-point element types accepted by the kernels.
//!
//! Only `f32` and `f64` implement [`KernelFloat`]; the trait is sealed so the
//! dispatch table stays total over the precisions it knows about.

use std::fmt::{Debug, Display};
use std::ops::{Add, Div, Mul, Neg, Sub};

use super::ulp::{ulp_distance, ulp_distance_f64};

mod sealed {
    pub trait Sealed {}
    impl Sealed for f32 {}
    impl Sealed for f64 {}
}

/// Scalar element type of the RBF kernels.
pub trait KernelFloat:
    sealed::Sealed
    + Copy
    + Send
    + Sync
    + PartialOrd
    + Debug
    + Display
    + Default
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
    + 'static
{
    const ZERO: Self;
    const ONE: Self;
    const NEG_TWO: Self;
    /// Lanes in one AVX2 register.
    const AVX2_LANES: usize;
    /// Lanes in one AVX-512 register.
    const AVX512_LANES: usize;
    /// Lanes in one NEON register.
    const NEON_LANES: usize;

    fn exp(self) -> Self;

    fn from_f64(v: f64) -> Self;

    fn to_f64(self) -> f64;

    fn is_finite(self) -> bool;

    /// Smallest exponent argument whose `exp` is still a normal number.
    ///
    /// `ln(MIN_POSITIVE)` stepped toward zero until its `exp` is normal:
    /// about -87.34 for `f32`, -708.40 for `f64`.
    fn default_exp_threshold() -> Self;

    /// ULP distance widened to `u64`. `u64::MAX` for NaN or sign mismatch.
    fn ulps_between(self, other: Self) -> u64;
}

impl KernelFloat for f32 {
    const ZERO: Self = 0.0;
    const ONE: Self = 1.0;
    const NEG_TWO: Self = -2.0;
    const AVX2_LANES: usize = 8;
    const AVX512_LANES: usize = 16;
    const NEON_LANES: usize = 4;

    #[inline]
    fn exp(self) -> Self {
        f32::exp(self)
    }

    #[inline]
    fn from_f64(v: f64) -> Self {
        v as f32
    }

    #[inline]
    fn to_f64(self) -> f64 {
        f64::from(self)
    }

    #[inline]
    fn is_finite(self) -> bool {
        f32::is_finite(self)
    }

    fn default_exp_threshold() -> Self {
        let mut t = f32::MIN_POSITIVE.ln();
        // ln rounds to nearest; for f32 that lands one ULP past the normal range
        while t.exp() < f32::MIN_POSITIVE {
            t = f32::from_bits(t.to_bits() - 1);
        }
        t
    }

    fn ulps_between(self, other: Self) -> u64 {
        match ulp_distance(self, other) {
            u32::MAX => u64::MAX,
            d => u64::from(d),
        }
    }
}

impl KernelFloat for f64 {
    const ZERO: Self = 0.0;
    const ONE: Self = 1.0;
    const NEG_TWO: Self = -2.0;
    const AVX2_LANES: usize = 4;
    const AVX512_LANES: usize = 8;
    const NEON_LANES: usize = 2;

    #[inline]
    fn exp(self) -> Self {
        f64::exp(self)
    }

    #[inline]
    fn from_f64(v: f64) -> Self {
        v
    }

    #[inline]
    fn to_f64(self) -> f64 {
        self
    }

    #[inline]
    fn is_finite(self) -> bool {
        f64::is_finite(self)
    }

    fn default_exp_threshold() -> Self {
        let mut t = f64::MIN_POSITIVE.ln();
        // ln rounds to nearest; for f32 that lands one ULP past the normal range
        while t.exp() < f64::MIN_POSITIVE {
            t = f64::from_bits(t.to_bits() - 1);
        }
        t
    }

    fn ulps_between(self, other: Self) -> u64 {
        ulp_distance_f64(self, other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_threshold_f32_is_representable() {
        let t = f32::default_exp_threshold();
        assert!((t - (-87.336_54)).abs() < 1e-3, "threshold = {t}");
        let e = t.exp();
        assert!(e >= f32::MIN_POSITIVE && e.is_normal(), "exp(threshold) = {e:e}");
    }

    #[test]
    fn default_threshold_f32_is_tight() {
        let t = f32::default_exp_threshold();
        assert!(t < 0.0);
        // rounded ln(MIN_POSITIVE) is one step further out and underflows
        assert!(f32::MIN_POSITIVE.ln() <= t);
        let below = f32::from_bits(t.to_bits() + 1);
        assert!(!below.exp().is_normal(), "exp({below}) = {:e}", below.exp());
    }

    #[test]
    fn default_threshold_f64_is_representable() {
        let t = f64::default_exp_threshold();
        assert!((t - (-708.396_418_532_264)).abs() < 1e-9, "threshold = {t}");
        let e = t.exp();
        assert!(e >= f64::MIN_POSITIVE && e.is_normal(), "exp(threshold) = {e:e}");
    }

    #[test]
    fn lane_counts_match_register_widths() {
        assert_eq!(f32::AVX2_LANES * 4, 32);
        assert_eq!(f64::AVX2_LANES * 8, 32);
        assert_eq!(f32::AVX512_LANES * 4, 64);
        assert_eq!(f64::AVX512_LANES * 8, 64);
        assert_eq!(f32::NEON_LANES * 4, 16);
        assert_eq!(f64::NEON_LANES * 8, 16);
    }

    #[test]
    fn ulps_between_widens_sentinel() {
        assert_eq!(1.0_f32.ulps_between(f32::NAN), u64::MAX);
        assert_eq!(1.0_f64.ulps_between(1.0), 0);
        let next = f64::from_bits(1.0_f64.to_bits() + 3);
        assert_eq!(1.0_f64.ulps_between(next), 3);
    }
}
