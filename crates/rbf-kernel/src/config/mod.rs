//! YAML configuration of an RBF kernel computation.
//!
//! ```yaml
//! kernel:
//!   sigma: 1.0
//!   exp_threshold: -80.0
//! block_size: 512
//! backend: auto
//! parallel: true
//! ```

mod parser;
mod types;
mod validator;

pub use parser::{parse_config, parse_config_str};
pub use types::*;
pub use validator::validate_config;
