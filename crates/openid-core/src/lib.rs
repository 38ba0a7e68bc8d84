//! Framework-agnostic domain types for persisting OpenID relying-party state.
//!
//! Holds the identity record handed to callers after a successful
//! authentication, plus the association and nonce records that storage
//! backends persist.

pub mod models;

pub use models::*;
