//! RBF post-product transform.
//!
//! Turns one row of an inner-product block into RBF kernel values:
//!
//! ```text
//! arg_i = max(((m_i * -2) + sqr_a2i + sqr_a1[i]) * coeff, exp_threshold)
//! out_i = exp(arg_i)
//! ```
//!
//! `m` is overwritten with the clamped arguments. Every variant keeps this
//! exact operation order and shares the same exponential, so variants agree
//! with the scalar reference bit for bit. The fused `fma(m, -2, sqr_a2i)` is
//! allowed because `m * -2` is exact.
//!
//! Loop phases of the SIMD variants: 3x unrolled body, single-register loop,
//! then a masked (x86) or scalar (NEON) tail. On x86, rows of at least
//! [`STREAM_MIN_LEN`](super::stream::STREAM_MIN_LEN) elements write `out` with
//! [`super::stream::stream_exp`]; `m` still ends up holding the arguments.

#[cfg(target_arch = "aarch64")]
use std::arch::aarch64::*;
#[cfg(target_arch = "x86_64")]
use std::arch::x86_64::*;

use super::float::KernelFloat;
use super::ops::vexp;
#[cfg(target_arch = "x86_64")]
use super::stream::{
    AVX_STREAM_ALIGN, STREAM_MIN_LEN, stream_copy_avx_f32, stream_copy_avx_f64, stream_exp,
};
#[cfg(all(target_arch = "x86_64", feature = "avx512"))]
use super::stream::{AVX512_STREAM_ALIGN, stream_copy_avx512_f32, stream_copy_avx512_f64};

/// Kernel coefficient and overflow threshold, fixed for one computation.
///
/// `coeff` carries the sign: the transform multiplies by it as given.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RbfParams<T> {
    pub coeff: T,
    pub exp_threshold: T,
}

impl<T: KernelFloat> RbfParams<T> {
    pub fn new(coeff: T, exp_threshold: T) -> Self {
        Self {
            coeff,
            exp_threshold,
        }
    }

    /// `K(x, y) = exp(-||x - y||^2 / (2 sigma^2))`.
    pub fn from_sigma(sigma: T) -> Self {
        Self::new(
            T::from_f64(-0.5) / (sigma * sigma),
            T::default_exp_threshold(),
        )
    }

    /// `K(x, y) = exp(-gamma ||x - y||^2)`.
    pub fn from_gamma(gamma: T) -> Self {
        Self::new(-gamma, T::default_exp_threshold())
    }

    #[must_use]
    pub fn with_exp_threshold(self, exp_threshold: T) -> Self {
        Self {
            exp_threshold,
            ..self
        }
    }

    /// `gamma` of the equivalent `exp(-gamma ||x - y||^2)` form.
    pub fn gamma(&self) -> T {
        -self.coeff
    }
}

#[inline]
fn check_lengths(n: usize, sqr_a1: usize, out: usize) {
    assert_eq!(
        sqr_a1, n,
        "sqr_a1 length mismatch: expected {n} got {sqr_a1}"
    );
    assert_eq!(out, n, "output length mismatch: expected {n} got {out}");
}

/// Clamped exponent argument for one element.
#[inline]
pub(crate) fn rbf_arg<T: KernelFloat>(m: T, sqr_a1i: T, sqr_a2i: T, params: RbfParams<T>) -> T {
    let rbf = (m * T::NEG_TWO + sqr_a2i + sqr_a1i) * params.coeff;
    if rbf > params.exp_threshold {
        rbf
    } else {
        params.exp_threshold
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Scalar implementation
// ────────────────────────────────────────────────────────────────────────────

/// Portable reference transform.
///
/// # Panics
///
/// Panics if `sqr_a1` or `out` differ in length from `mkl_buff`.
pub fn rbf_post_gemm_scalar<T: KernelFloat>(
    mkl_buff: &mut [T],
    sqr_a1: &[T],
    sqr_a2i: T,
    params: RbfParams<T>,
    out: &mut [T],
) {
    check_lengths(mkl_buff.len(), sqr_a1.len(), out.len());

    for (m, &s1) in mkl_buff.iter_mut().zip(sqr_a1.iter()) {
        *m = rbf_arg(*m, s1, sqr_a2i, params);
    }
    vexp(mkl_buff, out);
}

// ────────────────────────────────────────────────────────────────────────────
// AVX2 implementation
// ────────────────────────────────────────────────────────────────────────────

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2,fma")]
#[inline]
unsafe fn args_avx2_f32(m: __m256, s1: __m256, a2: __m256, coeff: __m256, thr: __m256) -> __m256 {
    let t = _mm256_add_ps(_mm256_fmadd_ps(m, _mm256_set1_ps(-2.0), a2), s1);
    _mm256_max_ps(_mm256_mul_ps(t, coeff), thr)
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2,fma")]
#[inline]
unsafe fn args_avx2_f64(m: __m256d, s1: __m256d, a2: __m256d, coeff: __m256d, thr: __m256d) -> __m256d {
    let t = _mm256_add_pd(_mm256_fmadd_pd(m, _mm256_set1_pd(-2.0), a2), s1);
    _mm256_max_pd(_mm256_mul_pd(t, coeff), thr)
}

/// AVX2 + FMA transform, 8 lanes.
///
/// Tail of fewer than 8 elements goes through `_mm256_maskload_ps` /
/// `_mm256_maskstore_ps`, so no lane past `n` is touched.
///
/// # Safety
///
/// Requires AVX2 and FMA. Caller must verify with `is_x86_feature_detected!`.
///
/// # Panics
///
/// Panics if `sqr_a1` or `out` differ in length from `mkl_buff`.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2,fma")]
pub unsafe fn rbf_post_gemm_avx2_f32(
    mkl_buff: &mut [f32],
    sqr_a1: &[f32],
    sqr_a2i: f32,
    params: RbfParams<f32>,
    out: &mut [f32],
) {
    const W: usize = 8;
    let n = mkl_buff.len();
    check_lengths(n, sqr_a1.len(), out.len());

    let m_ptr = mkl_buff.as_mut_ptr();
    let s_ptr = sqr_a1.as_ptr();
    let a2 = _mm256_set1_ps(sqr_a2i);
    let coeff = _mm256_set1_ps(params.coeff);
    let thr = _mm256_set1_ps(params.exp_threshold);

    // SAFETY: every full load/store is bounded by i + k*W <= n; the tail uses
    // masked accesses that never touch lanes at or past n.
    unsafe {
        let mut i = 0;
        while i + 3 * W <= n {
            let r0 = args_avx2_f32(_mm256_loadu_ps(m_ptr.add(i)), _mm256_loadu_ps(s_ptr.add(i)), a2, coeff, thr);
            let r1 = args_avx2_f32(_mm256_loadu_ps(m_ptr.add(i + W)), _mm256_loadu_ps(s_ptr.add(i + W)), a2, coeff, thr);
            let r2 = args_avx2_f32(
                _mm256_loadu_ps(m_ptr.add(i + 2 * W)),
                _mm256_loadu_ps(s_ptr.add(i + 2 * W)),
                a2,
                coeff,
                thr,
            );
            _mm256_storeu_ps(m_ptr.add(i), r0);
            _mm256_storeu_ps(m_ptr.add(i + W), r1);
            _mm256_storeu_ps(m_ptr.add(i + 2 * W), r2);
            i += 3 * W;
        }
        while i + W <= n {
            let r = args_avx2_f32(_mm256_loadu_ps(m_ptr.add(i)), _mm256_loadu_ps(s_ptr.add(i)), a2, coeff, thr);
            _mm256_storeu_ps(m_ptr.add(i), r);
            i += W;
        }
        let rem = n - i;
        if rem > 0 {
            let mask = _mm256_cmpgt_epi32(
                _mm256_set1_epi32(rem as i32),
                _mm256_setr_epi32(0, 1, 2, 3, 4, 5, 6, 7),
            );
            let m = _mm256_maskload_ps(m_ptr.add(i), mask);
            let s = _mm256_maskload_ps(s_ptr.add(i), mask);
            _mm256_maskstore_ps(m_ptr.add(i), mask, args_avx2_f32(m, s, a2, coeff, thr));
        }

        if n >= STREAM_MIN_LEN {
            stream_exp(mkl_buff, out, AVX_STREAM_ALIGN, stream_copy_avx_f32);
        } else {
            vexp(mkl_buff, out);
        }
    }
}

/// AVX2 + FMA transform, 4 lanes. See [`rbf_post_gemm_avx2_f32`].
///
/// # Safety
///
/// Requires AVX2 and FMA. Caller must verify with `is_x86_feature_detected!`.
///
/// # Panics
///
/// Panics if `sqr_a1` or `out` differ in length from `mkl_buff`.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2,fma")]
pub unsafe fn rbf_post_gemm_avx2_f64(
    mkl_buff: &mut [f64],
    sqr_a1: &[f64],
    sqr_a2i: f64,
    params: RbfParams<f64>,
    out: &mut [f64],
) {
    const W: usize = 4;
    let n = mkl_buff.len();
    check_lengths(n, sqr_a1.len(), out.len());

    let m_ptr = mkl_buff.as_mut_ptr();
    let s_ptr = sqr_a1.as_ptr();
    let a2 = _mm256_set1_pd(sqr_a2i);
    let coeff = _mm256_set1_pd(params.coeff);
    let thr = _mm256_set1_pd(params.exp_threshold);

    // SAFETY: see rbf_post_gemm_avx2_f32.
    unsafe {
        let mut i = 0;
        while i + 3 * W <= n {
            let r0 = args_avx2_f64(_mm256_loadu_pd(m_ptr.add(i)), _mm256_loadu_pd(s_ptr.add(i)), a2, coeff, thr);
            let r1 = args_avx2_f64(_mm256_loadu_pd(m_ptr.add(i + W)), _mm256_loadu_pd(s_ptr.add(i + W)), a2, coeff, thr);
            let r2 = args_avx2_f64(
                _mm256_loadu_pd(m_ptr.add(i + 2 * W)),
                _mm256_loadu_pd(s_ptr.add(i + 2 * W)),
                a2,
                coeff,
                thr,
            );
            _mm256_storeu_pd(m_ptr.add(i), r0);
            _mm256_storeu_pd(m_ptr.add(i + W), r1);
            _mm256_storeu_pd(m_ptr.add(i + 2 * W), r2);
            i += 3 * W;
        }
        while i + W <= n {
            let r = args_avx2_f64(_mm256_loadu_pd(m_ptr.add(i)), _mm256_loadu_pd(s_ptr.add(i)), a2, coeff, thr);
            _mm256_storeu_pd(m_ptr.add(i), r);
            i += W;
        }
        let rem = n - i;
        if rem > 0 {
            let mask = _mm256_cmpgt_epi64(
                _mm256_set1_epi64x(rem as i64),
                _mm256_setr_epi64x(0, 1, 2, 3),
            );
            let m = _mm256_maskload_pd(m_ptr.add(i), mask);
            let s = _mm256_maskload_pd(s_ptr.add(i), mask);
            _mm256_maskstore_pd(m_ptr.add(i), mask, args_avx2_f64(m, s, a2, coeff, thr));
        }

        if n >= STREAM_MIN_LEN {
            stream_exp(mkl_buff, out, AVX_STREAM_ALIGN, stream_copy_avx_f64);
        } else {
            vexp(mkl_buff, out);
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// AVX-512 implementation
// ────────────────────────────────────────────────────────────────────────────

#[cfg(all(target_arch = "x86_64", feature = "avx512"))]
#[target_feature(enable = "avx512f")]
#[inline]
unsafe fn args_avx512_f32(m: __m512, s1: __m512, a2: __m512, coeff: __m512, thr: __m512) -> __m512 {
    let t = _mm512_add_ps(_mm512_fmadd_ps(m, _mm512_set1_ps(-2.0), a2), s1);
    _mm512_max_ps(_mm512_mul_ps(t, coeff), thr)
}

#[cfg(all(target_arch = "x86_64", feature = "avx512"))]
#[target_feature(enable = "avx512f")]
#[inline]
unsafe fn args_avx512_f64(m: __m512d, s1: __m512d, a2: __m512d, coeff: __m512d, thr: __m512d) -> __m512d {
    let t = _mm512_add_pd(_mm512_fmadd_pd(m, _mm512_set1_pd(-2.0), a2), s1);
    _mm512_max_pd(_mm512_mul_pd(t, coeff), thr)
}

/// AVX-512F transform, 16 lanes, `__mmask16` tail.
///
/// # Safety
///
/// Requires AVX-512F. Caller must verify with `is_x86_feature_detected!`.
///
/// # Panics
///
/// Panics if `sqr_a1` or `out` differ in length from `mkl_buff`.
#[cfg(all(target_arch = "x86_64", feature = "avx512"))]
#[target_feature(enable = "avx512f")]
pub unsafe fn rbf_post_gemm_avx512_f32(
    mkl_buff: &mut [f32],
    sqr_a1: &[f32],
    sqr_a2i: f32,
    params: RbfParams<f32>,
    out: &mut [f32],
) {
    const W: usize = 16;
    let n = mkl_buff.len();
    check_lengths(n, sqr_a1.len(), out.len());

    let m_ptr = mkl_buff.as_mut_ptr();
    let s_ptr = sqr_a1.as_ptr();
    let a2 = _mm512_set1_ps(sqr_a2i);
    let coeff = _mm512_set1_ps(params.coeff);
    let thr = _mm512_set1_ps(params.exp_threshold);

    // SAFETY: full accesses are bounded by i + k*W <= n; the tail mask only
    // enables the rem < W lanes that are in bounds.
    unsafe {
        let mut i = 0;
        while i + 3 * W <= n {
            let r0 = args_avx512_f32(_mm512_loadu_ps(m_ptr.add(i)), _mm512_loadu_ps(s_ptr.add(i)), a2, coeff, thr);
            let r1 = args_avx512_f32(_mm512_loadu_ps(m_ptr.add(i + W)), _mm512_loadu_ps(s_ptr.add(i + W)), a2, coeff, thr);
            let r2 = args_avx512_f32(
                _mm512_loadu_ps(m_ptr.add(i + 2 * W)),
                _mm512_loadu_ps(s_ptr.add(i + 2 * W)),
                a2,
                coeff,
                thr,
            );
            _mm512_storeu_ps(m_ptr.add(i), r0);
            _mm512_storeu_ps(m_ptr.add(i + W), r1);
            _mm512_storeu_ps(m_ptr.add(i + 2 * W), r2);
            i += 3 * W;
        }
        while i + W <= n {
            let r = args_avx512_f32(_mm512_loadu_ps(m_ptr.add(i)), _mm512_loadu_ps(s_ptr.add(i)), a2, coeff, thr);
            _mm512_storeu_ps(m_ptr.add(i), r);
            i += W;
        }
        let rem = n - i;
        if rem > 0 {
            let k: __mmask16 = ((1u32 << rem) - 1) as __mmask16;
            let m = _mm512_maskz_loadu_ps(k, m_ptr.add(i));
            let s = _mm512_maskz_loadu_ps(k, s_ptr.add(i));
            _mm512_mask_storeu_ps(m_ptr.add(i), k, args_avx512_f32(m, s, a2, coeff, thr));
        }

        if n >= STREAM_MIN_LEN {
            stream_exp(mkl_buff, out, AVX512_STREAM_ALIGN, stream_copy_avx512_f32);
        } else {
            vexp(mkl_buff, out);
        }
    }
}

/// AVX-512F transform, 8 lanes, `__mmask8` tail.
///
/// # Safety
///
/// Requires AVX-512F. Caller must verify with `is_x86_feature_detected!`.
///
/// # Panics
///
/// Panics if `sqr_a1` or `out` differ in length from `mkl_buff`.
#[cfg(all(target_arch = "x86_64", feature = "avx512"))]
#[target_feature(enable = "avx512f")]
pub unsafe fn rbf_post_gemm_avx512_f64(
    mkl_buff: &mut [f64],
    sqr_a1: &[f64],
    sqr_a2i: f64,
    params: RbfParams<f64>,
    out: &mut [f64],
) {
    const W: usize = 8;
    let n = mkl_buff.len();
    check_lengths(n, sqr_a1.len(), out.len());

    let m_ptr = mkl_buff.as_mut_ptr();
    let s_ptr = sqr_a1.as_ptr();
    let a2 = _mm512_set1_pd(sqr_a2i);
    let coeff = _mm512_set1_pd(params.coeff);
    let thr = _mm512_set1_pd(params.exp_threshold);

    // SAFETY: see rbf_post_gemm_avx512_f32.
    unsafe {
        let mut i = 0;
        while i + 3 * W <= n {
            let r0 = args_avx512_f64(_mm512_loadu_pd(m_ptr.add(i)), _mm512_loadu_pd(s_ptr.add(i)), a2, coeff, thr);
            let r1 = args_avx512_f64(_mm512_loadu_pd(m_ptr.add(i + W)), _mm512_loadu_pd(s_ptr.add(i + W)), a2, coeff, thr);
            let r2 = args_avx512_f64(
                _mm512_loadu_pd(m_ptr.add(i + 2 * W)),
                _mm512_loadu_pd(s_ptr.add(i + 2 * W)),
                a2,
                coeff,
                thr,
            );
            _mm512_storeu_pd(m_ptr.add(i), r0);
            _mm512_storeu_pd(m_ptr.add(i + W), r1);
            _mm512_storeu_pd(m_ptr.add(i + 2 * W), r2);
            i += 3 * W;
        }
        while i + W <= n {
            let r = args_avx512_f64(_mm512_loadu_pd(m_ptr.add(i)), _mm512_loadu_pd(s_ptr.add(i)), a2, coeff, thr);
            _mm512_storeu_pd(m_ptr.add(i), r);
            i += W;
        }
        let rem = n - i;
        if rem > 0 {
            let k: __mmask8 = ((1u32 << rem) - 1) as __mmask8;
            let m = _mm512_maskz_loadu_pd(k, m_ptr.add(i));
            let s = _mm512_maskz_loadu_pd(k, s_ptr.add(i));
            _mm512_mask_storeu_pd(m_ptr.add(i), k, args_avx512_f64(m, s, a2, coeff, thr));
        }

        if n >= STREAM_MIN_LEN {
            stream_exp(mkl_buff, out, AVX512_STREAM_ALIGN, stream_copy_avx512_f64);
        } else {
            vexp(mkl_buff, out);
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// NEON implementation
// ────────────────────────────────────────────────────────────────────────────

#[cfg(target_arch = "aarch64")]
#[target_feature(enable = "neon")]
#[inline]
unsafe fn args_neon_f32(
    m: float32x4_t,
    s1: float32x4_t,
    a2: float32x4_t,
    coeff: float32x4_t,
    thr: float32x4_t,
) -> float32x4_t {
    let t = vaddq_f32(vfmaq_f32(a2, m, vdupq_n_f32(-2.0)), s1);
    let r = vmulq_f32(t, coeff);
    vbslq_f32(vcgtq_f32(r, thr), r, thr)
}

#[cfg(target_arch = "aarch64")]
#[target_feature(enable = "neon")]
#[inline]
unsafe fn args_neon_f64(
    m: float64x2_t,
    s1: float64x2_t,
    a2: float64x2_t,
    coeff: float64x2_t,
    thr: float64x2_t,
) -> float64x2_t {
    let t = vaddq_f64(vfmaq_f64(a2, m, vdupq_n_f64(-2.0)), s1);
    let r = vmulq_f64(t, coeff);
    vbslq_f64(vcgtq_f64(r, thr), r, thr)
}

/// NEON transform, 4 lanes, scalar tail.
///
/// # Safety
///
/// Requires NEON (always present on aarch64 targets).
///
/// # Panics
///
/// Panics if `sqr_a1` or `out` differ in length from `mkl_buff`.
#[cfg(target_arch = "aarch64")]
#[target_feature(enable = "neon")]
pub unsafe fn rbf_post_gemm_neon_f32(
    mkl_buff: &mut [f32],
    sqr_a1: &[f32],
    sqr_a2i: f32,
    params: RbfParams<f32>,
    out: &mut [f32],
) {
    const W: usize = 4;
    let n = mkl_buff.len();
    check_lengths(n, sqr_a1.len(), out.len());

    let m_ptr = mkl_buff.as_mut_ptr();
    let s_ptr = sqr_a1.as_ptr();
    let a2 = vdupq_n_f32(sqr_a2i);
    let coeff = vdupq_n_f32(params.coeff);
    let thr = vdupq_n_f32(params.exp_threshold);

    let mut i = 0;
    // SAFETY: every access is bounded by i + k*W <= n.
    unsafe {
        while i + 3 * W <= n {
            let r0 = args_neon_f32(vld1q_f32(m_ptr.add(i)), vld1q_f32(s_ptr.add(i)), a2, coeff, thr);
            let r1 = args_neon_f32(vld1q_f32(m_ptr.add(i + W)), vld1q_f32(s_ptr.add(i + W)), a2, coeff, thr);
            let r2 = args_neon_f32(vld1q_f32(m_ptr.add(i + 2 * W)), vld1q_f32(s_ptr.add(i + 2 * W)), a2, coeff, thr);
            vst1q_f32(m_ptr.add(i), r0);
            vst1q_f32(m_ptr.add(i + W), r1);
            vst1q_f32(m_ptr.add(i + 2 * W), r2);
            i += 3 * W;
        }
        while i + W <= n {
            let r = args_neon_f32(vld1q_f32(m_ptr.add(i)), vld1q_f32(s_ptr.add(i)), a2, coeff, thr);
            vst1q_f32(m_ptr.add(i), r);
            i += W;
        }
    }
    for j in i..n {
        mkl_buff[j] = rbf_arg(mkl_buff[j], sqr_a1[j], sqr_a2i, params);
    }

    vexp(mkl_buff, out);
}

/// NEON transform, 2 lanes, scalar tail.
///
/// # Safety
///
/// Requires NEON (always present on aarch64 targets).
///
/// # Panics
///
/// Panics if `sqr_a1` or `out` differ in length from `mkl_buff`.
#[cfg(target_arch = "aarch64")]
#[target_feature(enable = "neon")]
pub unsafe fn rbf_post_gemm_neon_f64(
    mkl_buff: &mut [f64],
    sqr_a1: &[f64],
    sqr_a2i: f64,
    params: RbfParams<f64>,
    out: &mut [f64],
) {
    const W: usize = 2;
    let n = mkl_buff.len();
    check_lengths(n, sqr_a1.len(), out.len());

    let m_ptr = mkl_buff.as_mut_ptr();
    let s_ptr = sqr_a1.as_ptr();
    let a2 = vdupq_n_f64(sqr_a2i);
    let coeff = vdupq_n_f64(params.coeff);
    let thr = vdupq_n_f64(params.exp_threshold);

    let mut i = 0;
    // SAFETY: every access is bounded by i + k*W <= n.
    unsafe {
        while i + 3 * W <= n {
            let r0 = args_neon_f64(vld1q_f64(m_ptr.add(i)), vld1q_f64(s_ptr.add(i)), a2, coeff, thr);
            let r1 = args_neon_f64(vld1q_f64(m_ptr.add(i + W)), vld1q_f64(s_ptr.add(i + W)), a2, coeff, thr);
            let r2 = args_neon_f64(vld1q_f64(m_ptr.add(i + 2 * W)), vld1q_f64(s_ptr.add(i + 2 * W)), a2, coeff, thr);
            vst1q_f64(m_ptr.add(i), r0);
            vst1q_f64(m_ptr.add(i + W), r1);
            vst1q_f64(m_ptr.add(i + 2 * W), r2);
            i += 3 * W;
        }
        while i + W <= n {
            let r = args_neon_f64(vld1q_f64(m_ptr.add(i)), vld1q_f64(s_ptr.add(i)), a2, coeff, thr);
            vst1q_f64(m_ptr.add(i), r);
            i += W;
        }
    }
    for j in i..n {
        mkl_buff[j] = rbf_arg(mkl_buff[j], sqr_a1[j], sqr_a2i, params);
    }

    vexp(mkl_buff, out);
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
