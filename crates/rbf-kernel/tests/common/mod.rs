//! Shared helpers for the falsification tests.
#![allow(dead_code)]

use rbf_kernel::kernels::dispatch::{PostGemmKernel, available_levels};

/// Asserts every element in a slice is finite (not NaN or infinite).
pub fn assert_all_finite(slice: &[f64]) {
    for (i, &val) in slice.iter().enumerate() {
        assert!(val.is_finite(), "Element [{i}] is not finite: {val}");
    }
}

/// Squared L2 distance between two vectors.
pub fn sq_distance(a: &[f64], b: &[f64]) -> f64 {
    assert_eq!(a.len(), b.len());
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Deterministic row-major matrix with entries in [-2, 2).
pub fn pseudo_random_rows(rows: usize, cols: usize, seed: u64) -> Vec<f64> {
    (0..rows * cols)
        .map(|i| {
            let v = (i as u64 + seed).wrapping_mul(6_364_136_223_846_793_005) >> 40;
            (v % 4096) as f64 / 1024.0 - 2.0
        })
        .collect()
}

/// `f32` copy of [`pseudo_random_rows`].
pub fn pseudo_random_rows_f32(rows: usize, cols: usize, seed: u64) -> Vec<f32> {
    pseudo_random_rows(rows, cols, seed)
        .into_iter()
        .map(|v| v as f32)
        .collect()
}

/// Every transform that can run on this machine, scalar first.
pub fn all_kernels_f32() -> Vec<PostGemmKernel<f32>> {
    available_levels()
        .into_iter()
        .filter_map(|l| PostGemmKernel::for_level(l).ok())
        .collect()
}

/// Every transform that can run on this machine, scalar first.
pub fn all_kernels_f64() -> Vec<PostGemmKernel<f64>> {
    available_levels()
        .into_iter()
        .filter_map(|l| PostGemmKernel::for_level(l).ok())
        .collect()
}
