//! SQLx storage adapter for the OpenID store.
//!
//! SQLite databases bootstrap their own schema on `init()`; Postgres expects
//! the migrations under `migrations/sql` to have been applied.

mod store;

pub use store::SqlxStore;
