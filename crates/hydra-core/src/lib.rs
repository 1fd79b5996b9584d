//! # Hydra Core
//!
//! Shared configuration types and error handling for the hydra RPC gateway.
//!
//! Everything in here is passive data: the crates that do the actual work
//! (`hydra-health`, `hydra-proxy`, `hydra-runtime`) consume these types but
//! never extend them.

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod config;
pub mod error;

pub use config::{
    AdminConfig, Exception, GatewayConfig, HealthCheckConfig, HttpConnection, MetricsConfig,
    ServerConfig, TargetConfig, TargetConnection, WsConnection,
};
pub use error::{Error, Result};
