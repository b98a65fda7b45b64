//! Blocked RBF kernel-matrix computation.
//!
//! Rows of both operands are split into blocks of at most `block_size` rows.
//! Every block pair gets its own [`ScratchBuffer`]: the inner-product block
//! and both norm vectors are computed into it, then the post-product
//! transform runs once per row of the `x` block and writes straight into the
//! output row. With the `parallel` feature, output row blocks are handed to
//! rayon workers; scratch memory is never shared between them.

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::config::{DEFAULT_BLOCK_SIZE, KernelConfig};
use crate::error::KernelError;
use crate::kernels::dispatch::{PostGemmKernel, RbfDispatch, SimdLevel};
use crate::kernels::ops::{gemm_abt, row_sq_norms};
use crate::kernels::rbf::RbfParams;
use crate::kernels::scratch::ScratchBuffer;

/// Borrowed dense row-major matrix.
#[derive(Debug, Clone, Copy)]
pub struct RowMatrix<'a, T> {
    data: &'a [T],
    rows: usize,
    cols: usize,
}

impl<'a, T> RowMatrix<'a, T> {
    /// # Errors
    ///
    /// [`KernelError::DimensionMismatch`] if `data.len() != rows * cols`.
    pub fn new(data: &'a [T], rows: usize, cols: usize) -> Result<Self, KernelError> {
        let expected = rows.checked_mul(cols).ok_or(KernelError::DimensionMismatch {
            what: "row data",
            expected: usize::MAX,
            got: data.len(),
        })?;
        if data.len() != expected {
            return Err(KernelError::DimensionMismatch {
                what: "row data",
                expected,
                got: data.len(),
            });
        }
        Ok(Self { data, rows, cols })
    }

    /// A single row.
    pub fn from_row(row: &'a [T]) -> Self {
        Self {
            data: row,
            rows: 1,
            cols: row.len(),
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn data(&self) -> &'a [T] {
        self.data
    }

    pub fn row(&self, i: usize) -> &'a [T] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    /// Contiguous rows `start..start + count`.
    fn block(&self, start: usize, count: usize) -> &'a [T] {
        &self.data[start * self.cols..(start + count) * self.cols]
    }
}

/// RBF kernel evaluator: parameters, blocking and the resolved transform.
#[derive(Debug, Clone, Copy)]
pub struct RbfKernel<T: RbfDispatch> {
    params: RbfParams<T>,
    block_size: usize,
    kernel: PostGemmKernel<T>,
    parallel: bool,
}

impl<T: RbfDispatch> RbfKernel<T> {
    pub fn new(params: RbfParams<T>) -> Self {
        Self {
            params,
            block_size: DEFAULT_BLOCK_SIZE,
            kernel: PostGemmKernel::detect(),
            parallel: true,
        }
    }

    /// Rows per block. Zero is treated as one.
    #[must_use]
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size.max(1);
        self
    }

    #[must_use]
    pub fn with_kernel(mut self, kernel: PostGemmKernel<T>) -> Self {
        self.kernel = kernel;
        self
    }

    /// Process row blocks on the rayon pool. Without the `parallel` feature
    /// this flag has no effect.
    #[must_use]
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// # Errors
    ///
    /// [`KernelError::Config`] if the configuration does not validate.
    pub fn from_config(config: &KernelConfig) -> Result<Self, KernelError> {
        let params = config.rbf_params::<T>()?;
        Ok(Self::new(params)
            .with_block_size(config.block_size)
            .with_kernel(PostGemmKernel::for_backend(config.backend))
            .with_parallel(config.parallel))
    }

    pub fn params(&self) -> RbfParams<T> {
        self.params
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn level(&self) -> SimdLevel {
        self.kernel.level()
    }

    pub fn is_parallel(&self) -> bool {
        self.parallel
    }

    /// `K(x, y)` for one pair of vectors.
    ///
    /// # Errors
    ///
    /// [`KernelError::DimensionMismatch`] if `x` and `y` differ in length.
    pub fn vector_vector(&self, x: &[T], y: &[T]) -> Result<T, KernelError> {
        let mut out = [T::ZERO];
        self.matrix_matrix_into(&RowMatrix::from_row(x), &RowMatrix::from_row(y), &mut out)?;
        Ok(out[0])
    }

    /// `K(x_i, y)` for every row of `x`.
    ///
    /// # Errors
    ///
    /// [`KernelError::DimensionMismatch`] if `y.len() != x.cols()`,
    /// [`KernelError::Allocation`] if scratch memory is unavailable.
    pub fn matrix_vector(&self, x: &RowMatrix<'_, T>, y: &[T]) -> Result<Vec<T>, KernelError> {
        let mut out = zeroed(x.rows())?;
        self.matrix_vector_into(x, y, &mut out)?;
        Ok(out)
    }

    /// [`Self::matrix_vector`] into a caller-provided slice of length `x.rows()`.
    ///
    /// # Errors
    ///
    /// As [`Self::matrix_vector`], plus a mismatch on `out.len()`.
    pub fn matrix_vector_into(
        &self,
        x: &RowMatrix<'_, T>,
        y: &[T],
        out: &mut [T],
    ) -> Result<(), KernelError> {
        self.matrix_matrix_into(x, &RowMatrix::from_row(y), out)
    }

    /// Full `x.rows() x y.rows()` matrix, row-major: `K[i][j] = K(x_i, y_j)`.
    ///
    /// # Errors
    ///
    /// [`KernelError::DimensionMismatch`] if the operands differ in columns,
    /// [`KernelError::Allocation`] if output or scratch memory is unavailable.
    pub fn matrix_matrix(
        &self,
        x: &RowMatrix<'_, T>,
        y: &RowMatrix<'_, T>,
    ) -> Result<Vec<T>, KernelError> {
        let mut out = zeroed(output_len(x.rows(), y.rows())?)?;
        self.matrix_matrix_into(x, y, &mut out)?;
        Ok(out)
    }

    /// [`Self::matrix_matrix`] into a caller-provided slice.
    ///
    /// # Errors
    ///
    /// As [`Self::matrix_matrix`], plus a mismatch on `out.len()`.
    pub fn matrix_matrix_into(
        &self,
        x: &RowMatrix<'_, T>,
        y: &RowMatrix<'_, T>,
        out: &mut [T],
    ) -> Result<(), KernelError> {
        if x.cols() != y.cols() {
            return Err(KernelError::DimensionMismatch {
                what: "operand columns",
                expected: x.cols(),
                got: y.cols(),
            });
        }
        check_output(out, x.rows(), y.rows())?;
        self.compute(x, y, false, out)
    }

    /// `K(x_i, x_j)` for all row pairs of `x`. Diagonal block pairs share a
    /// single norm vector.
    ///
    /// # Errors
    ///
    /// [`KernelError::Allocation`] if output or scratch memory is unavailable.
    pub fn self_kernel(&self, x: &RowMatrix<'_, T>) -> Result<Vec<T>, KernelError> {
        let mut out = zeroed(output_len(x.rows(), x.rows())?)?;
        self.self_kernel_into(x, &mut out)?;
        Ok(out)
    }

    /// [`Self::self_kernel`] into a caller-provided slice.
    ///
    /// # Errors
    ///
    /// As [`Self::self_kernel`], plus a mismatch on `out.len()`.
    pub fn self_kernel_into(&self, x: &RowMatrix<'_, T>, out: &mut [T]) -> Result<(), KernelError> {
        check_output(out, x.rows(), x.rows())?;
        self.compute(x, x, true, out)
    }

    fn compute(
        &self,
        x: &RowMatrix<'_, T>,
        y: &RowMatrix<'_, T>,
        same: bool,
        out: &mut [T],
    ) -> Result<(), KernelError> {
        let (nx, ny) = (x.rows(), y.rows());
        if nx == 0 || ny == 0 {
            return Ok(());
        }

        let rows_per_block = self.block_size.min(nx);
        tracing::debug!(
            rows_x = nx,
            rows_y = ny,
            dim = x.cols(),
            block_size = self.block_size,
            gamma = self.params.gamma().to_f64(),
            row_blocks = nx.div_ceil(rows_per_block),
            backend = self.kernel.level().name(),
            self_kernel = same,
            "computing RBF kernel matrix"
        );

        let run = |(bi, rows): (usize, &mut [T])| self.row_block(x, y, same, bi * rows_per_block, rows);

        #[cfg(feature = "parallel")]
        if self.parallel {
            return out
                .par_chunks_mut(rows_per_block * ny)
                .enumerate()
                .try_for_each(run);
        }

        out.chunks_mut(rows_per_block * ny).enumerate().try_for_each(run)
    }

    /// All block pairs of one output row block.
    fn row_block(
        &self,
        x: &RowMatrix<'_, T>,
        y: &RowMatrix<'_, T>,
        same: bool,
        x_start: usize,
        out_rows: &mut [T],
    ) -> Result<(), KernelError> {
        let (ny, dim) = (y.rows(), x.cols());
        let bx = out_rows.len() / ny;
        let x_block = x.block(x_start, bx);

        let mut y_start = 0;
        while y_start < ny {
            let by = self.block_size.min(ny - y_start);
            let y_block = y.block(y_start, by);
            let diagonal = same && x_start == y_start;
            tracing::trace!(x_start, y_start, bx, by, diagonal, "block pair");

            let mut scratch = ScratchBuffer::new(bx.max(by), diagonal)?;
            {
                let (a1, a2) = scratch.norms_mut();
                row_sq_norms(y_block, by, dim, &mut a1[..by]);
                if let Some(a2) = a2 {
                    row_sq_norms(x_block, bx, dim, &mut a2[..bx]);
                }
            }

            let views = scratch.views();
            let inner = &mut views.inner_product[..bx * by];
            gemm_abt(x_block, bx, y_block, by, dim, inner);

            for r in 0..bx {
                let dst = r * ny + y_start;
                self.kernel.compute_block(
                    &mut inner[r * by..(r + 1) * by],
                    &views.sqr_a1[..by],
                    views.sqr_a2[r],
                    self.params,
                    &mut out_rows[dst..dst + by],
                );
            }

            y_start += by;
        }
        Ok(())
    }
}

fn output_len(rows_x: usize, rows_y: usize) -> Result<usize, KernelError> {
    rows_x
        .checked_mul(rows_y)
        .ok_or(KernelError::SizeOverflow {
            block_size: rows_x.max(rows_y),
        })
}

fn check_output<T>(out: &[T], rows_x: usize, rows_y: usize) -> Result<(), KernelError> {
    let expected = output_len(rows_x, rows_y)?;
    if out.len() != expected {
        return Err(KernelError::DimensionMismatch {
            what: "kernel output",
            expected,
            got: out.len(),
        });
    }
    Ok(())
}

fn zeroed<T: RbfDispatch>(len: usize) -> Result<Vec<T>, KernelError> {
    let mut v = Vec::new();
    v.try_reserve_exact(len)
        .map_err(|_| KernelError::Allocation { elements: len })?;
    v.resize(len, T::ZERO);
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::dispatch::available_levels;
    use crate::kernels::ulp::{MAX_VARIANT_ULP, assert_ulp_eq};
    use proptest::prelude::*;

    fn data(rows: usize, cols: usize, seed: u64) -> Vec<f64> {
        (0..rows * cols)
            .map(|i| {
                let v = (i as u64).wrapping_mul(2_654_435_761).wrapping_add(seed) % 1000;
                v as f64 / 250.0 - 2.0
            })
            .collect()
    }

    fn naive(x: &[f64], y: &[f64], gamma: f64) -> f64 {
        let d2: f64 = x.iter().zip(y).map(|(a, b)| (a - b) * (a - b)).sum();
        (-gamma * d2).exp()
    }

    #[test]
    fn test_row_matrix_checks_shape() {
        let d = [1.0f32; 6];
        assert!(RowMatrix::new(&d, 2, 3).is_ok());
        let err = RowMatrix::new(&d, 4, 2).unwrap_err();
        assert!(matches!(
            err,
            KernelError::DimensionMismatch { expected: 8, got: 6, .. }
        ));
        assert!(RowMatrix::new(&d, usize::MAX, 2).is_err());
        let m = RowMatrix::new(&d, 3, 2).unwrap();
        assert_eq!(m.row(1), &[1.0, 1.0]);
    }

    #[test]
    fn test_vector_vector_matches_closed_form() {
        let k = RbfKernel::new(RbfParams::from_gamma(0.5f64));
        let v = k.vector_vector(&[1.0, 2.0], &[2.0, 0.0]).unwrap();
        assert!((v - (-2.5f64).exp()).abs() < 1e-15);
        assert_eq!(k.vector_vector(&[3.0, -1.0], &[3.0, -1.0]).unwrap(), 1.0);
    }

    #[test]
    fn test_vector_vector_length_mismatch() {
        let k = RbfKernel::new(RbfParams::from_gamma(1.0f32));
        let err = k.vector_vector(&[1.0, 2.0], &[1.0]).unwrap_err();
        assert!(matches!(err, KernelError::DimensionMismatch { what: "operand columns", .. }));
    }

    #[test]
    fn test_matrix_matrix_against_naive() {
        let (nx, ny, dim) = (13, 9, 5);
        let xd = data(nx, dim, 1);
        let yd = data(ny, dim, 7);
        let x = RowMatrix::new(&xd, nx, dim).unwrap();
        let y = RowMatrix::new(&yd, ny, dim).unwrap();
        let k = RbfKernel::new(RbfParams::from_gamma(0.3)).with_block_size(4);
        let km = k.matrix_matrix(&x, &y).unwrap();
        assert_eq!(km.len(), nx * ny);
        for i in 0..nx {
            for j in 0..ny {
                let want = naive(x.row(i), y.row(j), 0.3);
                assert!((km[i * ny + j] - want).abs() < 1e-12, "K[{i}][{j}]");
            }
        }
    }

    #[test]
    fn test_matrix_vector_is_column() {
        let xd = data(10, 3, 3);
        let x = RowMatrix::new(&xd, 10, 3).unwrap();
        let y = [0.5, -0.25, 1.0];
        let k = RbfKernel::new(RbfParams::from_sigma(1.5)).with_block_size(3);
        let col = k.matrix_vector(&x, &y).unwrap();
        let full = k.matrix_matrix(&x, &RowMatrix::from_row(&y)).unwrap();
        assert_eq!(col, full);
    }

    #[test]
    fn test_self_kernel_matches_matrix_matrix() {
        let xd = data(23, 4, 11);
        let x = RowMatrix::new(&xd, 23, 4).unwrap();
        for bs in [1, 5, 8, 23, 512] {
            let k = RbfKernel::new(RbfParams::from_sigma(0.8)).with_block_size(bs);
            let sk = k.self_kernel(&x).unwrap();
            assert_eq!(sk, k.matrix_matrix(&x, &x).unwrap(), "block_size={bs}");
            for i in 0..23 {
                assert_eq!(sk[i * 23 + i], 1.0);
                for j in 0..23 {
                    assert!((sk[i * 23 + j] - sk[j * 23 + i]).abs() < 1e-14);
                }
            }
        }
    }

    #[test]
    fn test_block_size_does_not_change_values() {
        let xd = data(17, 6, 5);
        let yd = data(31, 6, 9);
        let x = RowMatrix::new(&xd, 17, 6).unwrap();
        let y = RowMatrix::new(&yd, 31, 6).unwrap();
        let base = RbfKernel::new(RbfParams::from_gamma(0.2))
            .with_block_size(512)
            .matrix_matrix(&x, &y)
            .unwrap();
        for bs in [0, 1, 2, 7, 16, 30] {
            let k = RbfKernel::new(RbfParams::from_gamma(0.2)).with_block_size(bs);
            assert_eq!(k.matrix_matrix(&x, &y).unwrap(), base, "block_size={bs}");
        }
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let xd = data(40, 3, 2);
        let x = RowMatrix::new(&xd, 40, 3).unwrap();
        let k = RbfKernel::new(RbfParams::from_gamma(1.0)).with_block_size(6);
        let par = k.with_parallel(true).self_kernel(&x).unwrap();
        let seq = k.with_parallel(false).self_kernel(&x).unwrap();
        assert_eq!(par, seq);
    }

    #[test]
    fn test_every_level_matches_scalar() {
        let xd = data(21, 7, 4);
        let yd = data(600, 7, 8);
        let x = RowMatrix::new(&xd, 21, 7).unwrap();
        let y = RowMatrix::new(&yd, 600, 7).unwrap();
        let p = RbfParams::from_sigma(1.1);
        let want = RbfKernel::new(p)
            .with_kernel(PostGemmKernel::scalar())
            .with_block_size(600)
            .matrix_matrix(&x, &y)
            .unwrap();
        for level in available_levels() {
            let k = RbfKernel::new(p)
                .with_kernel(PostGemmKernel::for_level(level).unwrap())
                .with_block_size(600);
            assert_ulp_eq(&k.matrix_matrix(&x, &y).unwrap(), &want, MAX_VARIANT_ULP);
        }
    }

    #[test]
    fn test_empty_inputs() {
        let k = RbfKernel::new(RbfParams::from_gamma(1.0f64));
        let empty = RowMatrix::<f64>::new(&[], 0, 3).unwrap();
        let xd = [1.0, 2.0, 3.0];
        let one = RowMatrix::new(&xd, 1, 3).unwrap();
        assert!(k.matrix_matrix(&empty, &one).unwrap().is_empty());
        assert!(k.matrix_matrix(&one, &empty).unwrap().is_empty());
        assert!(k.self_kernel(&empty).unwrap().is_empty());
    }

    #[test]
    fn test_into_rejects_bad_output() {
        let xd = data(3, 2, 0);
        let x = RowMatrix::new(&xd, 3, 2).unwrap();
        let k = RbfKernel::new(RbfParams::from_gamma(1.0));
        let mut out = vec![0.0; 8];
        let err = k.self_kernel_into(&x, &mut out).unwrap_err();
        assert!(matches!(
            err,
            KernelError::DimensionMismatch { what: "kernel output", expected: 9, got: 8 }
        ));
    }

    #[test]
    fn test_from_config() {
        let cfg = crate::config::parse_config_str(
            "kernel: {gamma: 0.5, exp_threshold: -20}\nblock_size: 3\nbackend: scalar\nparallel: false\n",
        )
        .unwrap();
        let k = RbfKernel::<f64>::from_config(&cfg).unwrap();
        assert_eq!(k.block_size(), 3);
        assert_eq!(k.level(), SimdLevel::Scalar);
        assert!(!k.is_parallel());
        assert_eq!(k.params(), RbfParams::new(-0.5, -20.0));

        // far apart: argument -50 is clamped to -20
        let v = k.vector_vector(&[0.0], &[10.0]).unwrap();
        assert_eq!(v, (-20.0f64).exp());
    }

    #[test]
    fn test_from_config_rejects_invalid() {
        let cfg = crate::config::parse_config_str("kernel: {sigma: -1.0}\n").unwrap();
        assert!(matches!(
            RbfKernel::<f32>::from_config(&cfg),
            Err(KernelError::Config(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_kernel_in_unit_interval(
            nx in 1usize..12,
            ny in 1usize..12,
            dim in 0usize..5,
            bs in 1usize..6,
            gamma in 0.01f64..2.0,
        ) {
            let xd = data(nx, dim, 13);
            let yd = data(ny, dim, 29);
            let x = RowMatrix::new(&xd, nx, dim).unwrap();
            let y = RowMatrix::new(&yd, ny, dim).unwrap();
            let k = RbfKernel::new(RbfParams::from_gamma(gamma)).with_block_size(bs);
            let km = k.matrix_matrix(&x, &y).unwrap();
            for (idx, &v) in km.iter().enumerate() {
                let want = naive(x.row(idx / ny), y.row(idx % ny), gamma);
                prop_assert!(v > 0.0 && v <= 1.0 + 1e-12, "K = {}", v);
                prop_assert!((v - want).abs() < 1e-10, "K = {} want {}", v, want);
            }
        }
    }
}
