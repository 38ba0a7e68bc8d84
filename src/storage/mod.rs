pub use openid_storage_factory::{
    create_store, create_store_with, DynStore, Metrics, ObservedStore, OpenIdStore, StoreOptions,
};

pub use openid_storage_factory::sqlx;

#[cfg(feature = "mongo")]
pub use openid_storage_factory::mongo;
