//! Integration ports for the OpenID store.
//!
//! Implement these traits in your own crate to plug in custom persistence
//! without forking.

pub mod storage;

pub use storage::*;
