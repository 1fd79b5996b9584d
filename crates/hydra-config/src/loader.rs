//! Configuration loading

use hydra_core::{Error, GatewayConfig, Result};
use regex::Regex;
use std::env;
use std::fs;
use std::path::Path;

/// Load configuration from a YAML file.
pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<GatewayConfig> {
    let path = path.as_ref();

    let content = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;

    load_from_str(&content)
}

/// Load configuration from a YAML string.
pub fn load_from_str(content: &str) -> Result<GatewayConfig> {
    let expanded = expand_env_vars(content)?;

    serde_yaml::from_str(&expanded).map_err(|e| Error::Config(format!("failed to parse YAML: {e}")))
}

/// Expand environment variables in the raw configuration text.
/// Supports `${VAR}` and `${VAR:-default}`.
fn expand_env_vars(content: &str) -> Result<String> {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(:-([^}]*))?\}")
        .map_err(|e| Error::Config(format!("invalid expansion regex: {e}")))?;

    let mut result = String::with_capacity(content.len());
    let mut last_match = 0;

    for cap in re.captures_iter(content) {
        let full_match = cap.get(0).expect("capture 0 always present");
        let var_name = cap.get(1).expect("variable name group").as_str();
        let default_value = cap.get(3).map(|m| m.as_str());

        let value = match env::var(var_name) {
            Ok(val) => val,
            Err(_) => match default_value {
                Some(default) => default.to_string(),
                None => {
                    return Err(Error::Config(format!(
                        "environment variable '{var_name}' not set and no default provided"
                    )));
                }
            },
        };

        result.push_str(&content[last_match..full_match.start()]);
        result.push_str(&value);
        last_match = full_match.end();
    }

    result.push_str(&content[last_match..]);

    Ok(result)
}
