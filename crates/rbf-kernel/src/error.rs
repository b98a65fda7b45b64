use thiserror::Error;

use crate::kernels::dispatch::SimdLevel;

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("Failed to read kernel config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid kernel config: {0}")]
    Config(String),

    #[error("Scratch allocation of {elements} elements failed")]
    Allocation { elements: usize },

    #[error("Scratch size for block size {block_size} overflows usize")]
    SizeOverflow { block_size: usize },

    #[error("Dimension mismatch for {what}: expected {expected}, got {got}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("SIMD backend {0:?} is not available on this CPU")]
    BackendUnavailable(SimdLevel),
}

#[derive(Debug, Clone)]
pub struct Violation {
    pub severity: Severity,
    pub rule: String,
    pub message: String,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.severity {
            Severity::Error => "ERROR",
            Severity::Warning => "WARN",
            Severity::Info => "INFO",
        };
        write!(f, "[{prefix}] {}: {}", self.rule, self.message)
    }
}
