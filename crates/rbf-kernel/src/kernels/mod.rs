//! Kernel implementations: scalar reference and CPU-specialized variants.
//!
//! The post-product transform in [`rbf`] provides:
//! - `fn rbf_post_gemm_scalar(...)` - Pure Rust scalar reference (ground truth)
//! - `unsafe fn rbf_post_gemm_{avx2,avx512,neon}_{f32,f64}(...)` - SIMD variants
//!
//! [`dispatch`] picks one of them per precision at runtime.

// Kernel code naturally uses single-character math variable names (m, n, k, etc.)
// and unsafe intrinsics inside unsafe fns.
#![allow(
    clippy::many_single_char_names,
    clippy::similar_names,
    clippy::too_many_arguments,
    clippy::too_many_lines,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::explicit_iter_loop,
    clippy::needless_range_loop,
    clippy::float_cmp,
    clippy::wildcard_imports,
    clippy::doc_markdown,
    unsafe_op_in_unsafe_fn
)]

pub mod float;
pub mod ulp;
pub mod ops;
pub mod scratch;

pub mod rbf;
pub mod stream;
pub mod dispatch;

use serde::{Deserialize, Serialize};

use dispatch::SimdLevel;

/// Backend selector for kernel dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Best level detected on the running CPU.
    #[default]
    Auto,
    /// Pure Rust scalar reference implementation.
    Scalar,
    /// aarch64 NEON implementation.
    Neon,
    /// x86-64 AVX2 + FMA implementation.
    Avx2,
    /// x86-64 AVX-512F implementation.
    Avx512,
}

impl Backend {
    /// Fixed level this backend asks for; `None` for [`Backend::Auto`].
    pub fn level(self) -> Option<SimdLevel> {
        match self {
            Backend::Auto => None,
            Backend::Scalar => Some(SimdLevel::Scalar),
            Backend::Neon => Some(SimdLevel::Neon),
            Backend::Avx2 => Some(SimdLevel::Avx2),
            Backend::Avx512 => Some(SimdLevel::Avx512),
        }
    }
}

impl From<SimdLevel> for Backend {
    fn from(level: SimdLevel) -> Self {
        match level {
            SimdLevel::Scalar => Backend::Scalar,
            SimdLevel::Neon => Backend::Neon,
            SimdLevel::Avx2 => Backend::Avx2,
            SimdLevel::Avx512 => Backend::Avx512,
        }
    }
}
