//! # Hydra Proxy
//!
//! The failover reverse proxy: forwards every inbound request to one healthy
//! upstream provider, classifies the response, and retries elsewhere on
//! failure while keeping the request body replayable across attempts.
//!
//! The proxy is method-agnostic and byte-forwarding: it never interprets the
//! JSON-RPC payload beyond scanning response bodies for configured exception
//! substrings.

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod classify;
pub mod failover;
pub mod rewrite;
pub mod target;
mod ws;

pub use classify::classify_status;
pub use failover::FailoverProxy;
pub use rewrite::ReplayableBody;
pub use target::HttpTarget;
