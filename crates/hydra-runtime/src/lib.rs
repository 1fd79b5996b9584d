//! # Hydra Runtime
//!
//! Binds the failover proxy to its listeners and owns the process lifecycle:
//! startup wiring (config → metrics → health manager → proxy), the accept
//! loops, and graceful shutdown (close listeners, then stop the health
//! manager).

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod gateway;
pub mod shutdown;
mod timeout;

pub use gateway::Gateway;
pub use shutdown::{ShutdownSignal, SignalHandler};
