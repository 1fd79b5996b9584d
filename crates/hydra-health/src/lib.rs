//! # Hydra Health
//!
//! Per-provider health probing and the selection logic the failover proxy
//! relies on:
//! - One probe task per provider, issuing chain-appropriate JSON-RPC checks
//! - Threshold hysteresis between healthy and unhealthy
//! - One-shot manual taints, cleared by the next successful probe
//! - Randomized modular-walk selection over eligible providers

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod manager;
pub mod probe;

pub use manager::HealthManager;
pub use probe::{ChainProbe, EthereumProbe, Probe, ProbeObservation, SolanaProbe};
