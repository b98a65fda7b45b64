use std::path::Path;

use crate::config::types::KernelConfig;
use crate::error::KernelError;

/// Parse a YAML kernel configuration file into a [`KernelConfig`].
///
/// Only the document structure is checked here; run
/// [`crate::config::validate_config`] for semantic rules.
///
/// # Errors
///
/// Returns [`KernelError::Io`] if the file cannot be read,
/// or [`KernelError::Yaml`] if the YAML is malformed.
pub fn parse_config(path: &Path) -> Result<KernelConfig, KernelError> {
    let content = std::fs::read_to_string(path)?;
    parse_config_str(&content)
}

/// Parse a YAML kernel configuration from a string.
pub fn parse_config_str(yaml: &str) -> Result<KernelConfig, KernelError> {
    let config: KernelConfig = serde_yaml::from_str(yaml)?;
    Ok(config)
}
