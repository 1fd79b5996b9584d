//! Configuration validation

use hydra_core::{Error, GatewayConfig, Result};
use std::collections::HashSet;
use url::Url;

/// Validate a loaded configuration. Errors here are fatal at startup.
pub fn validate_config(config: &GatewayConfig) -> Result<()> {
    validate_proxy(config)?;
    validate_targets(config)?;
    validate_health_checks(config)?;
    validate_exceptions(config)?;

    Ok(())
}

fn validate_proxy(config: &GatewayConfig) -> Result<()> {
    config
        .proxy
        .port
        .parse::<u16>()
        .map_err(|_| Error::Config(format!("proxy.port '{}' is not a port", config.proxy.port)))?;

    if config.proxy.upstream_timeout.is_zero() {
        return Err(Error::Config("proxy.upstreamTimeout must be > 0".into()));
    }

    Ok(())
}

fn validate_targets(config: &GatewayConfig) -> Result<()> {
    if config.targets.is_empty() {
        return Err(Error::Config("at least one target is required".into()));
    }

    let mut seen = HashSet::new();
    for target in &config.targets {
        if target.name.is_empty() {
            return Err(Error::Config("target name cannot be empty".into()));
        }

        if !seen.insert(target.name.as_str()) {
            return Err(Error::Config(format!(
                "duplicate target name '{}'",
                target.name
            )));
        }

        let http_url = Url::parse(&target.connection.http.url).map_err(|e| {
            Error::Config(format!("target '{}' has an invalid URL: {e}", target.name))
        })?;
        match http_url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(Error::Config(format!(
                    "target '{}' URL scheme must be http(s), got '{other}'",
                    target.name
                )));
            }
        }

        if let Some(ws) = &target.connection.ws {
            let ws_url = Url::parse(&ws.url).map_err(|e| {
                Error::Config(format!(
                    "target '{}' has an invalid WS URL: {e}",
                    target.name
                ))
            })?;
            match ws_url.scheme() {
                "ws" | "wss" | "http" | "https" => {}
                other => {
                    return Err(Error::Config(format!(
                        "target '{}' WS URL scheme '{other}' is not supported",
                        target.name
                    )));
                }
            }
        }
    }

    Ok(())
}

fn validate_health_checks(config: &GatewayConfig) -> Result<()> {
    let hc = &config.health_checks;

    if hc.interval.is_zero() {
        return Err(Error::Config("healthChecks.interval must be > 0".into()));
    }
    if hc.timeout.is_zero() {
        return Err(Error::Config("healthChecks.timeout must be > 0".into()));
    }
    if hc.failure_threshold == 0 {
        return Err(Error::Config(
            "healthChecks.failureThreshold must be > 0".into(),
        ));
    }
    if hc.success_threshold == 0 {
        return Err(Error::Config(
            "healthChecks.successThreshold must be > 0".into(),
        ));
    }

    if hc.timeout > hc.interval {
        tracing::warn!(
            timeout = ?hc.timeout,
            interval = ?hc.interval,
            "probe timeout exceeds probe interval"
        );
    }

    Ok(())
}

fn validate_exceptions(config: &GatewayConfig) -> Result<()> {
    for exception in &config.exceptions {
        if exception.pattern.is_empty() {
            return Err(Error::Config("exceptions[].match cannot be empty".into()));
        }
    }

    Ok(())
}
