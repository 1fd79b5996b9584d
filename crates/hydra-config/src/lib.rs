//! # Hydra Configuration
//!
//! YAML configuration loading for the gateway:
//! - `${VAR}` / `${VAR:-default}` environment expansion
//! - Startup validation (fatal on error, per the error taxonomy)

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod loader;
pub mod validator;

pub use loader::{load_from_file, load_from_str};
pub use validator::validate_config;

use hydra_core::{GatewayConfig, Result};
use std::path::Path;

/// Load and validate a configuration file. This is what the binary calls.
pub fn load<P: AsRef<Path>>(path: P) -> Result<GatewayConfig> {
    let config = load_from_file(path)?;
    validate_config(&config)?;
    Ok(config)
}
