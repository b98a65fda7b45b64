//! Shared kernel primitives: dot product, squared row norms, inner-product
//! block and the elementwise exponential.
//!
//! These are the collaborators of the post-product transform. The transform
//! only assumes their output layout, so any BLAS-backed replacement with the
//! same layout can be swapped in.

use super::float::KernelFloat;

/// Dot product of two slices.
#[inline]
pub fn dot<T: KernelFloat>(a: &[T], b: &[T]) -> T {
    debug_assert_eq!(a.len(), b.len());
    let mut sum = T::ZERO;
    for i in 0..a.len() {
        sum = sum + a[i] * b[i];
    }
    sum
}

/// Squared Euclidean norm of every row: `out[i] = ||data[i*dim..(i+1)*dim]||^2`.
///
/// # Panics
/// Panics if `data.len() != rows * dim` or `out.len() != rows`.
pub fn row_sq_norms<T: KernelFloat>(data: &[T], rows: usize, dim: usize, out: &mut [T]) {
    assert_eq!(data.len(), rows * dim, "data dimension mismatch: expected {} got {}", rows * dim, data.len());
    assert_eq!(out.len(), rows, "norm buffer mismatch: expected {} got {}", rows, out.len());
    for (i, o) in out.iter_mut().enumerate() {
        let row = &data[i * dim..(i + 1) * dim];
        *o = dot(row, row);
    }
}

/// Inner-product block `out = A * B^T` (row-major).
///
/// A is `rows_a x dim`, B is `rows_b x dim`, `out[i * rows_b + j] = a_i . b_j`.
/// Row `i` of `out` therefore lines up with the squared norms of B's rows.
///
/// # Panics
/// Panics if any slice length disagrees with the given shape.
pub fn gemm_abt<T: KernelFloat>(
    a: &[T],
    rows_a: usize,
    b: &[T],
    rows_b: usize,
    dim: usize,
    out: &mut [T],
) {
    assert_eq!(a.len(), rows_a * dim, "A dimension mismatch: expected {} got {}", rows_a * dim, a.len());
    assert_eq!(b.len(), rows_b * dim, "B dimension mismatch: expected {} got {}", rows_b * dim, b.len());
    assert_eq!(out.len(), rows_a * rows_b, "C dimension mismatch: expected {} got {}", rows_a * rows_b, out.len());
    for i in 0..rows_a {
        let a_row = &a[i * dim..(i + 1) * dim];
        for j in 0..rows_b {
            out[i * rows_b + j] = dot(a_row, &b[j * dim..(j + 1) * dim]);
        }
    }
}

/// Elementwise exponential: `dst[i] = exp(src[i])`.
///
/// # Panics
/// Panics if `src` and `dst` have different lengths.
pub fn vexp<T: KernelFloat>(src: &[T], dst: &mut [T]) {
    assert_eq!(src.len(), dst.len(), "exp src/dst length mismatch");
    for (d, &s) in dst.iter_mut().zip(src.iter()) {
        *d = s.exp();
    }
}
