use crate::config::types::KernelConfig;
use crate::error::{Severity, Violation};
use crate::kernels::float::KernelFloat;

/// Block sizes above this allocate `block_size^2` scratch elements per
/// worker and are reported as a warning.
const LARGE_BLOCK_SIZE: usize = 8192;

/// Validate a parsed configuration.
///
/// Returns a list of violations. If any violation has
/// [`Severity::Error`], the configuration cannot build a kernel.
pub fn validate_config(config: &KernelConfig) -> Vec<Violation> {
    let mut violations = Vec::new();

    validate_width(config, &mut violations);
    validate_threshold(config, &mut violations);
    validate_block_size(config, &mut violations);

    violations
}

fn positive_finite(v: f64) -> bool {
    v.is_finite() && v > 0.0
}

fn validate_width(config: &KernelConfig, violations: &mut Vec<Violation>) {
    let k = &config.kernel;
    if k.sigma.is_some() == k.gamma.is_some() {
        violations.push(Violation {
            severity: Severity::Error,
            rule: "CFG-001".to_string(),
            message: "exactly one of kernel.sigma and kernel.gamma must be set".to_string(),
            location: Some("kernel".to_string()),
        });
    }

    if let Some(sigma) = k.sigma
        && !positive_finite(sigma)
    {
        violations.push(Violation {
            severity: Severity::Error,
            rule: "CFG-002".to_string(),
            message: format!("kernel.sigma must be positive and finite, got {sigma}"),
            location: Some("kernel.sigma".to_string()),
        });
    }

    if let Some(gamma) = k.gamma
        && !positive_finite(gamma)
    {
        violations.push(Violation {
            severity: Severity::Error,
            rule: "CFG-003".to_string(),
            message: format!("kernel.gamma must be positive and finite, got {gamma}"),
            location: Some("kernel.gamma".to_string()),
        });
    }
}

fn validate_threshold(config: &KernelConfig, violations: &mut Vec<Violation>) {
    let Some(t) = config.kernel.exp_threshold else {
        return;
    };
    if !t.is_finite() || t > 0.0 {
        violations.push(Violation {
            severity: Severity::Error,
            rule: "CFG-005".to_string(),
            message: format!(
                "kernel.exp_threshold must be finite and <= 0, got {t}"
            ),
            location: Some("kernel.exp_threshold".to_string()),
        });
    } else if t < f64::default_exp_threshold() {
        violations.push(Violation {
            severity: Severity::Warning,
            rule: "CFG-007".to_string(),
            message: format!(
                "kernel.exp_threshold {t} is below the f64 normal range floor; \
                 kernel values may underflow to zero"
            ),
            location: Some("kernel.exp_threshold".to_string()),
        });
    }
}

fn validate_block_size(config: &KernelConfig, violations: &mut Vec<Violation>) {
    if config.block_size == 0 {
        violations.push(Violation {
            severity: Severity::Error,
            rule: "CFG-004".to_string(),
            message: "block_size must be at least 1".to_string(),
            location: Some("block_size".to_string()),
        });
    } else if config.block_size > LARGE_BLOCK_SIZE {
        violations.push(Violation {
            severity: Severity::Warning,
            rule: "CFG-006".to_string(),
            message: format!(
                "block_size {} needs {} scratch elements per block",
                config.block_size,
                config.block_size.saturating_mul(config.block_size)
            ),
            location: Some("block_size".to_string()),
        });
    }
}
