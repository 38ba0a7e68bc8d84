pub use openid_core::*;
