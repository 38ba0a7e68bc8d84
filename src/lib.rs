//! Library exports.
//!
//! The store itself lives in the extracted crates under `crates/`; this crate
//! re-exports them under one roof and assembles the maintenance runner used by
//! the `openid-store` binary.

pub mod config;
pub mod maintenance;
pub mod models;
pub mod storage;
pub mod telemetry;

pub use maintenance::run;
