//! # rbf-kernel
//!
//! Blocked RBF kernel matrices, `K(x, y) = exp(-gamma ||x - y||^2)`.
//!
//! The kernel is assembled from an inner-product block and precomputed
//! squared row norms, then passed through the post-product transform:
//! rebuild `||x - y||^2`, scale by the coefficient, clamp to an overflow-safe
//! floor, exponentiate. The transform has a scalar reference and AVX2,
//! AVX-512 and NEON variants selected once at runtime.
//!
//! ## Modules
//!
//! - [`kernels`] - Scratch buffers, the post-product transform and its SIMD dispatch
//! - [`matrix`] - Blocked vector/matrix kernel computations
//! - [`config`] - Parse and validate YAML kernel configuration
//! - [`error`] - Error and validation types
//!
//! ```
//! use rbf_kernel::{RbfKernel, RbfParams, RowMatrix};
//!
//! let data = [0.0_f64, 0.0, 1.0, 0.0, 0.0, 2.0];
//! let x = RowMatrix::new(&data, 3, 2).unwrap();
//! let k = RbfKernel::new(RbfParams::from_gamma(0.5)).self_kernel(&x).unwrap();
//! assert_eq!(k[0], 1.0);
//! assert!((k[1] - (-0.5_f64).exp()).abs() < 1e-15);
//! ```

pub mod config;
pub mod error;
pub mod kernels;
pub mod matrix;

pub use config::{KernelConfig, parse_config, parse_config_str, validate_config};
pub use error::KernelError;
pub use kernels::Backend;
pub use kernels::dispatch::{PostGemmKernel, SimdLevel, simd_level};
pub use kernels::rbf::RbfParams;
pub use kernels::scratch::ScratchBuffer;
pub use matrix::{RbfKernel, RowMatrix};
