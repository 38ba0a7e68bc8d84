pub mod association;
pub mod clock;
pub mod error;
pub mod identity;
pub mod nonce;

pub use association::*;
pub use clock::*;
pub use error::*;
pub use identity::*;
pub use nonce::*;
