//! Units-in-the-last-place comparison of kernel outputs.
//!
//! Conformance between the scalar transform and a SIMD variant is judged
//! elementwise against [`MAX_VARIANT_ULP`].

use super::float::KernelFloat;

/// Largest ULP distance accepted between the scalar transform and any
/// SIMD variant, elementwise on the kernel output.
pub const MAX_VARIANT_ULP: u64 = 1;

macro_rules! ulp_distance_impl {
    ($(#[$doc:meta])* $name:ident, $f:ty, $signed:ty, $out:ty) => {
        $(#[$doc])*
        #[must_use]
        pub fn $name(a: $f, b: $f) -> $out {
            if a.is_nan() || b.is_nan() {
                return <$out>::MAX;
            }
            // also covers +0 / -0
            if a == b {
                return 0;
            }
            let (ia, ib) = (a.to_bits() as $signed, b.to_bits() as $signed);
            if ia.is_negative() != ib.is_negative() {
                return <$out>::MAX;
            }
            ia.abs_diff(ib)
        }
    };
}

ulp_distance_impl!(
    /// Representable `f32` values between `a` and `b`.
    ///
    /// `u32::MAX` when either side is NaN or the signs differ (zeros excepted).
    ulp_distance, f32, i32, u32
);

ulp_distance_impl!(
    /// `f64` form of [`ulp_distance`]; the sentinel is `u64::MAX`.
    ulp_distance_f64, f64, i64, u64
);

/// Assert that two kernel outputs agree within `max_ulp`.
///
/// # Panics
///
/// Panics if the slices have different lengths or any element pair is
/// further apart than `max_ulp`.
pub fn assert_ulp_eq<T: KernelFloat>(got: &[T], want: &[T], max_ulp: u64) {
    assert_eq!(
        got.len(),
        want.len(),
        "slice length mismatch: {} vs {}",
        got.len(),
        want.len()
    );
    if let Some((i, dist)) = got
        .iter()
        .zip(want.iter())
        .map(|(&g, &w)| g.ulps_between(w))
        .enumerate()
        .find(|&(_, d)| d > max_ulp)
    {
        panic!(
            "ULP violation at index {i}: got {} want {} (distance {dist}, max {max_ulp})",
            got[i], want[i]
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn next_up(v: f64, steps: u64) -> f64 {
        f64::from_bits(v.to_bits() + steps)
    }

    #[test]
    fn equal_values_and_signed_zeros() {
        assert_eq!(ulp_distance(0.5, 0.5), 0);
        assert_eq!(ulp_distance(-0.0, 0.0), 0);
        assert_eq!(ulp_distance_f64(0.0, -0.0), 0);
        assert_eq!(ulp_distance_f64(f64::MIN_POSITIVE, f64::MIN_POSITIVE), 0);
    }

    #[test]
    fn neighbours_are_one_apart() {
        let e = (-1.0_f32).exp();
        assert_eq!(ulp_distance(e, f32::from_bits(e.to_bits() - 1)), 1);
        assert_eq!(ulp_distance_f64(1.0, next_up(1.0, 1)), 1);
    }

    #[test]
    fn distance_is_symmetric() {
        let a = 0.125_f64;
        let b = next_up(a, 42);
        assert_eq!(ulp_distance_f64(a, b), 42);
        assert_eq!(ulp_distance_f64(b, a), 42);
    }

    #[test]
    fn nan_and_sign_mismatch_saturate() {
        assert_eq!(ulp_distance(f32::NAN, 0.0), u32::MAX);
        assert_eq!(ulp_distance(2.0, -2.0), u32::MAX);
        assert_eq!(ulp_distance_f64(f64::NAN, f64::NAN), u64::MAX);
        assert_eq!(ulp_distance_f64(-1e-300, 1e-300), u64::MAX);
    }

    #[test]
    fn assert_ulp_eq_accepts_bound() {
        let want = [(-3.0_f64).exp(), 1.0, f64::MIN_POSITIVE];
        let mut got = want;
        got[0] = next_up(got[0], MAX_VARIANT_ULP);
        assert_ulp_eq(&got, &want, MAX_VARIANT_ULP);
    }

    #[test]
    #[should_panic(expected = "ULP violation at index 1")]
    fn assert_ulp_eq_reports_index() {
        assert_ulp_eq(&[1.0_f32, 0.5], &[1.0, 0.25], MAX_VARIANT_ULP);
    }

    #[test]
    #[should_panic(expected = "slice length mismatch")]
    fn assert_ulp_eq_rejects_lengths() {
        assert_ulp_eq::<f64>(&[], &[1.0], 0);
    }

    #[test]
    fn assert_ulp_eq_widens_f32_distance() {
        let want = [2.0_f32, 4.0];
        let got = [f32::from_bits(2.0_f32.to_bits() + 3), 4.0];
        assert_ulp_eq(&got, &want, 3);
    }
}
