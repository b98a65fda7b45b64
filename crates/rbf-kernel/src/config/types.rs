use serde::{Deserialize, Serialize};

use crate::error::{KernelError, Severity};
use crate::kernels::Backend;
use crate::kernels::float::KernelFloat;
use crate::kernels::rbf::RbfParams;

use super::validator::validate_config;

/// Rows per block when the document does not say.
pub const DEFAULT_BLOCK_SIZE: usize = 512;

/// Root of a kernel configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelConfig {
    pub kernel: KernelParams,
    #[serde(default = "default_block_size")]
    pub block_size: usize,
    #[serde(default)]
    pub backend: Backend,
    #[serde(default = "default_parallel")]
    pub parallel: bool,
}

/// Kernel width, given either as `sigma` or as `gamma`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KernelParams {
    #[serde(default)]
    pub sigma: Option<f64>,
    #[serde(default)]
    pub gamma: Option<f64>,
    /// Floor of the exponent argument. Defaults to `default_exp_threshold()` of
    /// the precision the kernel runs in.
    #[serde(default)]
    pub exp_threshold: Option<f64>,
}

fn default_block_size() -> usize {
    DEFAULT_BLOCK_SIZE
}

fn default_parallel() -> bool {
    true
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            kernel: KernelParams {
                sigma: Some(1.0),
                ..KernelParams::default()
            },
            block_size: DEFAULT_BLOCK_SIZE,
            backend: Backend::Auto,
            parallel: true,
        }
    }
}

impl KernelConfig {
    /// Build transform parameters in precision `T`.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::Config`] listing every error-severity
    /// violation reported by [`validate_config`].
    pub fn rbf_params<T: KernelFloat>(&self) -> Result<RbfParams<T>, KernelError> {
        let errors: Vec<String> = validate_config(self)
            .into_iter()
            .filter(|v| v.severity == Severity::Error)
            .map(|v| v.to_string())
            .collect();
        if !errors.is_empty() {
            return Err(KernelError::Config(errors.join("; ")));
        }

        let params = match (self.kernel.sigma, self.kernel.gamma) {
            (Some(sigma), None) => RbfParams::from_sigma(T::from_f64(sigma)),
            (None, Some(gamma)) => RbfParams::from_gamma(T::from_f64(gamma)),
            _ => {
                return Err(KernelError::Config(
                    "exactly one of kernel.sigma and kernel.gamma must be set".to_string(),
                ));
            }
        };

        let Some(threshold) = self.kernel.exp_threshold else {
            return Ok(params);
        };
        let threshold = T::from_f64(threshold);
        if threshold < T::default_exp_threshold() {
            tracing::warn!(
                exp_threshold = threshold.to_f64(),
                floor = T::default_exp_threshold().to_f64(),
                "exp_threshold lies below the normal range of the kernel precision"
            );
        }
        Ok(params.with_exp_threshold(threshold))
    }
}
