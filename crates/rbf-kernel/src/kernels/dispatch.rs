//! Runtime selection of the post-product transform.
//!
//! The CPU is probed once per process. Each `(precision, SimdLevel)` pair maps
//! to exactly one function pointer, resolved before the hot loop; nothing is
//! re-dispatched per element or per row.

use std::sync::OnceLock;

use crate::error::KernelError;

use super::Backend;
use super::float::KernelFloat;
#[cfg(target_arch = "aarch64")]
use super::rbf::{rbf_post_gemm_neon_f32, rbf_post_gemm_neon_f64};
use super::rbf::{RbfParams, rbf_post_gemm_scalar};
#[cfg(target_arch = "x86_64")]
use super::rbf::{rbf_post_gemm_avx2_f32, rbf_post_gemm_avx2_f64};
#[cfg(all(target_arch = "x86_64", feature = "avx512"))]
use super::rbf::{rbf_post_gemm_avx512_f32, rbf_post_gemm_avx512_f64};

/// Instruction-set tier a transform variant is compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SimdLevel {
    Scalar,
    Neon,
    Avx2,
    Avx512,
}

impl SimdLevel {
    pub const ALL: [SimdLevel; 4] = [
        SimdLevel::Scalar,
        SimdLevel::Neon,
        SimdLevel::Avx2,
        SimdLevel::Avx512,
    ];

    /// Whether this level is compiled in and supported by the running CPU.
    pub fn is_available(self) -> bool {
        match self {
            SimdLevel::Scalar => true,
            SimdLevel::Neon => cfg!(target_arch = "aarch64"),
            SimdLevel::Avx2 => {
                #[cfg(target_arch = "x86_64")]
                {
                    is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma")
                }
                #[cfg(not(target_arch = "x86_64"))]
                {
                    false
                }
            }
            SimdLevel::Avx512 => {
                #[cfg(all(target_arch = "x86_64", feature = "avx512"))]
                {
                    is_x86_feature_detected!("avx512f")
                }
                #[cfg(not(all(target_arch = "x86_64", feature = "avx512")))]
                {
                    false
                }
            }
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SimdLevel::Scalar => "Scalar",
            SimdLevel::Neon => "NEON (128-bit)",
            SimdLevel::Avx2 => "AVX2+FMA (256-bit)",
            SimdLevel::Avx512 => "AVX-512F (512-bit)",
        }
    }
}

impl std::fmt::Display for SimdLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Best level for this process. Probed once.
pub fn simd_level() -> SimdLevel {
    static LEVEL: OnceLock<SimdLevel> = OnceLock::new();
    *LEVEL.get_or_init(|| {
        let level = [SimdLevel::Avx512, SimdLevel::Avx2, SimdLevel::Neon]
            .into_iter()
            .find(|l| l.is_available())
            .unwrap_or(SimdLevel::Scalar);
        tracing::info!(level = level.name(), "RBF post-product transform dispatch resolved");
        level
    })
}

/// Every level that can run here, lowest first.
pub fn available_levels() -> Vec<SimdLevel> {
    SimdLevel::ALL
        .into_iter()
        .filter(|l| l.is_available())
        .collect()
}

/// Safe signature shared by every resolved transform.
pub type PostGemmFn<T> = fn(&mut [T], &[T], T, RbfParams<T>, &mut [T]);

macro_rules! checked_variant {
    ($name:ident, $variant:ident, $t:ty) => {
        fn $name(mkl_buff: &mut [$t], sqr_a1: &[$t], sqr_a2i: $t, params: RbfParams<$t>, out: &mut [$t]) {
            // SAFETY: only handed out by `post_gemm_fn` after `is_available`
            // confirmed the CPU features this variant is compiled for.
            unsafe { $variant(mkl_buff, sqr_a1, sqr_a2i, params, out) }
        }
    };
}

#[cfg(target_arch = "x86_64")]
checked_variant!(avx2_f32, rbf_post_gemm_avx2_f32, f32);
#[cfg(target_arch = "x86_64")]
checked_variant!(avx2_f64, rbf_post_gemm_avx2_f64, f64);
#[cfg(all(target_arch = "x86_64", feature = "avx512"))]
checked_variant!(avx512_f32, rbf_post_gemm_avx512_f32, f32);
#[cfg(all(target_arch = "x86_64", feature = "avx512"))]
checked_variant!(avx512_f64, rbf_post_gemm_avx512_f64, f64);
#[cfg(target_arch = "aarch64")]
checked_variant!(neon_f32, rbf_post_gemm_neon_f32, f32);
#[cfg(target_arch = "aarch64")]
checked_variant!(neon_f64, rbf_post_gemm_neon_f64, f64);

/// Precision-specific lookup of the transform for a level.
pub trait RbfDispatch: KernelFloat {
    /// `None` when the level is not compiled in or the CPU lacks it.
    fn post_gemm_fn(level: SimdLevel) -> Option<PostGemmFn<Self>>;
}

impl RbfDispatch for f32 {
    fn post_gemm_fn(level: SimdLevel) -> Option<PostGemmFn<Self>> {
        if !level.is_available() {
            return None;
        }
        match level {
            SimdLevel::Scalar => Some(rbf_post_gemm_scalar::<f32> as PostGemmFn<f32>),
            #[cfg(target_arch = "x86_64")]
            SimdLevel::Avx2 => Some(avx2_f32 as PostGemmFn<f32>),
            #[cfg(all(target_arch = "x86_64", feature = "avx512"))]
            SimdLevel::Avx512 => Some(avx512_f32 as PostGemmFn<f32>),
            #[cfg(target_arch = "aarch64")]
            SimdLevel::Neon => Some(neon_f32 as PostGemmFn<f32>),
            _ => None,
        }
    }
}

impl RbfDispatch for f64 {
    fn post_gemm_fn(level: SimdLevel) -> Option<PostGemmFn<Self>> {
        if !level.is_available() {
            return None;
        }
        match level {
            SimdLevel::Scalar => Some(rbf_post_gemm_scalar::<f64> as PostGemmFn<f64>),
            #[cfg(target_arch = "x86_64")]
            SimdLevel::Avx2 => Some(avx2_f64 as PostGemmFn<f64>),
            #[cfg(all(target_arch = "x86_64", feature = "avx512"))]
            SimdLevel::Avx512 => Some(avx512_f64 as PostGemmFn<f64>),
            #[cfg(target_arch = "aarch64")]
            SimdLevel::Neon => Some(neon_f64 as PostGemmFn<f64>),
            _ => None,
        }
    }
}

/// A post-product transform resolved for one precision and level.
#[derive(Debug, Clone, Copy)]
pub struct PostGemmKernel<T: RbfDispatch> {
    level: SimdLevel,
    func: PostGemmFn<T>,
}

impl<T: RbfDispatch> PostGemmKernel<T> {
    /// Best transform for the running CPU.
    pub fn detect() -> Self {
        Self::for_level(simd_level()).unwrap_or_else(|_| Self::scalar())
    }

    pub fn scalar() -> Self {
        Self {
            level: SimdLevel::Scalar,
            func: rbf_post_gemm_scalar::<T>,
        }
    }

    /// # Errors
    ///
    /// [`KernelError::BackendUnavailable`] if `level` cannot run here.
    pub fn for_level(level: SimdLevel) -> Result<Self, KernelError> {
        T::post_gemm_fn(level)
            .map(|func| Self { level, func })
            .ok_or(KernelError::BackendUnavailable(level))
    }

    /// Resolve a configured backend, falling back to [`Self::detect`] when
    /// the requested level is unavailable.
    pub fn for_backend(backend: Backend) -> Self {
        let Some(level) = backend.level() else {
            return Self::detect();
        };
        match Self::for_level(level) {
            Ok(kernel) => kernel,
            Err(_) => {
                let fallback = Self::detect();
                tracing::warn!(
                    requested = level.name(),
                    fallback = fallback.level.name(),
                    "requested SIMD backend is unavailable, falling back"
                );
                fallback
            }
        }
    }

    pub fn level(&self) -> SimdLevel {
        self.level
    }

    /// Run the transform on one row: `mkl_buff` becomes the clamped
    /// arguments, `out` the kernel values.
    ///
    /// # Panics
    ///
    /// Panics if `sqr_a1` or `out` differ in length from `mkl_buff`.
    #[inline]
    pub fn compute_block(
        &self,
        mkl_buff: &mut [T],
        sqr_a1: &[T],
        sqr_a2i: T,
        params: RbfParams<T>,
        out: &mut [T],
    ) {
        (self.func)(mkl_buff, sqr_a1, sqr_a2i, params, out);
    }
}

impl<T: RbfDispatch> Default for PostGemmKernel<T> {
    fn default() -> Self {
        Self::detect()
    }
}
