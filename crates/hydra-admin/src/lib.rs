//! # Hydra Admin
//!
//! The administration listener: lists providers with their live state,
//! toggles them in and out of rotation, and issues the bearer-token payloads
//! operators sign to authenticate.
//!
//! Authentication is Ethereum-native: a token is a base64url JSON payload
//! plus a secp256k1 personal-message signature over it, and the guard checks
//! that the recovered signer address is on the configured allowlist.

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod auth;
pub mod server;

pub use auth::{issue_token_payload, verify_bearer, TokenPayload};
pub use server::AdminServer;
