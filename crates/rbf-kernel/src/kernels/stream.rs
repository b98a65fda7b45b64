//! Cache-bypassing copy of a finished kernel row into its destination.
//!
//! Non-temporal stores need an aligned destination, so every copy runs in
//! three phases:
//!
//! 1. `lead`: ordinary stores until `dst` reaches the register alignment
//! 2. `bulk`: aligned streaming stores of whole registers, then `sfence`
//! 3. `tail`: ordinary stores for what is left
//!
//! The copied values are bit-identical to the source; only the cache
//! behaviour of the writes differs.
//!
//! [`stream_exp`] feeds a copy with `exp(args)` staged on the stack, so the
//! argument row is never overwritten.

#[cfg(target_arch = "x86_64")]
use std::arch::x86_64::*;

use super::float::KernelFloat;
use super::ops::vexp;

/// Rows shorter than this are written with ordinary stores.
pub const STREAM_MIN_LEN: usize = 512;

/// Byte alignment required by 256-bit streaming stores.
pub const AVX_STREAM_ALIGN: usize = 32;

/// Byte alignment required by 512-bit streaming stores.
pub const AVX512_STREAM_ALIGN: usize = 64;

/// Elements exponentiated per staging chunk. A whole number of 64-byte
/// lines for both precisions, so chunks after the lead stay aligned.
pub const STAGE_LEN: usize = 256;

/// Number of leading elements to store normally before `dst` is aligned to
/// `align` bytes, capped at `n`.
#[must_use]
pub fn leading_unaligned<T>(dst: *const T, align: usize, n: usize) -> usize {
    // align_offset may answer usize::MAX when alignment is unreachable;
    // the cap then routes everything through the ordinary-store phases.
    dst.align_offset(align).min(n)
}

// ────────────────────────────────────────────────────────────────────────────
// AVX (256-bit)
// ────────────────────────────────────────────────────────────────────────────

/// Copy `src` into `dst` using `_mm256_stream_ps` for the aligned bulk.
///
/// # Safety
/// Requires AVX support on the running CPU.
///
/// # Panics
/// Panics if `src` and `dst` have different lengths.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx")]
pub unsafe fn stream_copy_avx_f32(src: &[f32], dst: &mut [f32]) {
    assert_eq!(src.len(), dst.len(), "stream src/dst length mismatch");
    const W: usize = 8;
    let n = src.len();

    // Phase 1: lead
    let lead = leading_unaligned(dst.as_ptr(), AVX_STREAM_ALIGN, n);
    dst[..lead].copy_from_slice(&src[..lead]);

    // Phase 2: bulk
    let mut i = lead;
    // SAFETY: i + W <= n bounds every access; dst + i is 32-byte aligned.
    unsafe {
        while i + W <= n {
            let v = _mm256_loadu_ps(src.as_ptr().add(i));
            _mm256_stream_ps(dst.as_mut_ptr().add(i), v);
            i += W;
        }
        _mm_sfence();
    }

    // Phase 3: tail
    dst[i..].copy_from_slice(&src[i..]);
}

/// f64 counterpart of [`stream_copy_avx_f32`].
///
/// # Safety
/// Requires AVX support on the running CPU.
///
/// # Panics
/// Panics if `src` and `dst` have different lengths.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx")]
pub unsafe fn stream_copy_avx_f64(src: &[f64], dst: &mut [f64]) {
    assert_eq!(src.len(), dst.len(), "stream src/dst length mismatch");
    const W: usize = 4;
    let n = src.len();

    let lead = leading_unaligned(dst.as_ptr(), AVX_STREAM_ALIGN, n);
    dst[..lead].copy_from_slice(&src[..lead]);

    let mut i = lead;
    // SAFETY: i + W <= n bounds every access; dst + i is 32-byte aligned.
    unsafe {
        while i + W <= n {
            let v = _mm256_loadu_pd(src.as_ptr().add(i));
            _mm256_stream_pd(dst.as_mut_ptr().add(i), v);
            i += W;
        }
        _mm_sfence();
    }

    dst[i..].copy_from_slice(&src[i..]);
}

// ────────────────────────────────────────────────────────────────────────────
// AVX-512
// ────────────────────────────────────────────────────────────────────────────

/// Copy `src` into `dst` using `_mm512_stream_ps` for the aligned bulk.
///
/// # Safety
/// Requires AVX-512F support on the running CPU.
///
/// # Panics
/// Panics if `src` and `dst` have different lengths.
#[cfg(all(target_arch = "x86_64", feature = "avx512"))]
#[target_feature(enable = "avx512f")]
pub unsafe fn stream_copy_avx512_f32(src: &[f32], dst: &mut [f32]) {
    assert_eq!(src.len(), dst.len(), "stream src/dst length mismatch");
    const W: usize = 16;
    let n = src.len();

    let lead = leading_unaligned(dst.as_ptr(), AVX512_STREAM_ALIGN, n);
    dst[..lead].copy_from_slice(&src[..lead]);

    let mut i = lead;
    // SAFETY: i + W <= n bounds every access; dst + i is 64-byte aligned.
    unsafe {
        while i + W <= n {
            let v = _mm512_loadu_ps(src.as_ptr().add(i));
            _mm512_stream_ps(dst.as_mut_ptr().add(i), v);
            i += W;
        }
        _mm_sfence();
    }

    dst[i..].copy_from_slice(&src[i..]);
}

/// f64 counterpart of [`stream_copy_avx512_f32`].
///
/// # Safety
/// Requires AVX-512F support on the running CPU.
///
/// # Panics
/// Panics if `src` and `dst` have different lengths.
#[cfg(all(target_arch = "x86_64", feature = "avx512"))]
#[target_feature(enable = "avx512f")]
pub unsafe fn stream_copy_avx512_f64(src: &[f64], dst: &mut [f64]) {
    assert_eq!(src.len(), dst.len(), "stream src/dst length mismatch");
    const W: usize = 8;
    let n = src.len();

    let lead = leading_unaligned(dst.as_ptr(), AVX512_STREAM_ALIGN, n);
    dst[..lead].copy_from_slice(&src[..lead]);

    let mut i = lead;
    // SAFETY: i + W <= n bounds every access; dst + i is 64-byte aligned.
    unsafe {
        while i + W <= n {
            let v = _mm512_loadu_pd(src.as_ptr().add(i));
            _mm512_stream_pd(dst.as_mut_ptr().add(i), v);
            i += W;
        }
        _mm_sfence();
    }

    dst[i..].copy_from_slice(&src[i..]);
}

// ────────────────────────────────────────────────────────────────────────────
// Staged exponentiation
// ────────────────────────────────────────────────────────────────────────────

/// Write `exp(args)` into `dst` through `copy`, leaving `args` untouched.
///
/// Elements before `dst` reaches `align` bytes are exponentiated in place
/// in `dst`. The rest go through a [`STAGE_LEN`] stack buffer, one `copy`
/// per chunk.
///
/// # Safety
/// `copy` must be callable on the running CPU.
///
/// # Panics
/// Panics if `args` and `dst` have different lengths.
pub unsafe fn stream_exp<T: KernelFloat>(
    args: &[T],
    dst: &mut [T],
    align: usize,
    copy: unsafe fn(&[T], &mut [T]),
) {
    assert_eq!(args.len(), dst.len(), "stream src/dst length mismatch");
    let lead = leading_unaligned(dst.as_ptr(), align, dst.len());
    let (head_args, body_args) = args.split_at(lead);
    let (head, body) = dst.split_at_mut(lead);
    vexp(head_args, head);

    let mut stage = [T::ZERO; STAGE_LEN];
    for (a, d) in body_args.chunks(STAGE_LEN).zip(body.chunks_mut(STAGE_LEN)) {
        let staged = &mut stage[..a.len()];
        vexp(a, staged);
        // SAFETY: caller guarantees `copy` runs on this CPU; lengths match.
        unsafe { copy(staged, d) };
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leading_unaligned_counts_elements() {
        let buf = vec![0.0f32; 64];
        let base = buf.as_ptr();
        let lead = leading_unaligned(base, 32, 64);
        assert!(lead < 8);
        // SAFETY: lead < 64 stays inside buf.
        let aligned = unsafe { base.add(lead) };
        assert_eq!(aligned as usize % 32, 0);
    }

    #[test]
    fn leading_unaligned_is_capped_by_len() {
        let buf = vec![0.0f64; 16];
        let p = buf[1..].as_ptr();
        assert!(leading_unaligned(p, 64, 2) <= 2);
        assert_eq!(leading_unaligned(p, 64, 0), 0);
    }

    #[cfg(target_arch = "x86_64")]
    fn sources_f32(n: usize) -> Vec<f32> {
        (0..n).map(|i| (i as f32 * 0.37).sin()).collect()
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn test_stream_copy_avx_all_offsets() {
        if !is_x86_feature_detected!("avx") {
            return;
        }
        for n in [0usize, 1, 7, 8, 9, 31, 100, 777] {
            let src = sources_f32(n);
            for offset in 0..8 {
                let mut backing = vec![f32::NAN; n + offset];
                let dst = &mut backing[offset..];
                unsafe { stream_copy_avx_f32(&src, dst) };
                assert_eq!(dst, &src[..], "n={n} offset={offset}");
            }
        }
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn test_stream_copy_avx_f64_all_offsets() {
        if !is_x86_feature_detected!("avx") {
            return;
        }
        for n in [0usize, 3, 4, 5, 65, 513] {
            let src: Vec<f64> = (0..n).map(|i| i as f64 - 0.5).collect();
            for offset in 0..4 {
                let mut backing = vec![f64::NAN; n + offset];
                let dst = &mut backing[offset..];
                unsafe { stream_copy_avx_f64(&src, dst) };
                assert_eq!(dst, &src[..], "n={n} offset={offset}");
            }
        }
    }

    #[cfg(all(target_arch = "x86_64", feature = "avx512"))]
    #[test]
    fn test_stream_copy_avx512_all_offsets() {
        if !is_x86_feature_detected!("avx512f") {
            return;
        }
        for n in [0usize, 15, 16, 17, 600] {
            let src = sources_f32(n);
            for offset in 0..16 {
                let mut backing = vec![f32::NAN; n + offset];
                let dst = &mut backing[offset..];
                unsafe { stream_copy_avx512_f32(&src, dst) };
                assert_eq!(dst, &src[..], "n={n} offset={offset}");
            }
        }
        let src: Vec<f64> = (0..130).map(|i| i as f64 * 1.5).collect();
        for offset in 0..8 {
            let mut backing = vec![0.0f64; 130 + offset];
            unsafe { stream_copy_avx512_f64(&src, &mut backing[offset..]) };
            assert_eq!(&backing[offset..], &src[..]);
        }
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn test_stream_exp_keeps_args() {
        if !is_x86_feature_detected!("avx") {
            return;
        }
        for n in [0usize, 5, STAGE_LEN - 1, STAGE_LEN, STAGE_LEN + 1, 3 * STAGE_LEN + 9] {
            let args: Vec<f32> = (0..n).map(|i| -(i as f32) * 0.01).collect();
            let mut want = vec![0.0f32; n];
            vexp(&args, &mut want);
            for offset in 0..8 {
                let before = args.clone();
                let mut backing = vec![f32::NAN; n + offset];
                let dst = &mut backing[offset..];
                unsafe { stream_exp(&args, dst, AVX_STREAM_ALIGN, stream_copy_avx_f32) };
                assert_eq!(args, before);
                assert_eq!(dst, &want[..], "n={n} offset={offset}");
            }
        }
    }

    #[test]
    fn test_stream_exp_with_plain_copy() {
        unsafe fn plain(src: &[f64], dst: &mut [f64]) {
            dst.copy_from_slice(src);
        }
        let args: Vec<f64> = (0..600_i32).map(|i| f64::from(i) * -0.5).collect();
        let mut out = vec![0.0f64; 600];
        unsafe { stream_exp(&args, &mut out, AVX512_STREAM_ALIGN, plain) };
        for (o, a) in out.iter().zip(&args) {
            assert_eq!(*o, a.exp());
        }
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    #[should_panic(expected = "stream src/dst length mismatch")]
    fn test_stream_copy_length_mismatch() {
        if !is_x86_feature_detected!("avx") {
            panic!("stream src/dst length mismatch");
        }
        let mut dst = [0.0f32; 3];
        unsafe { stream_copy_avx_f32(&[1.0, 2.0], &mut dst) };
    }
}
