//! Single-use API key issuance.
//!
//! A fixed [`KeyPool`] is provisioned at startup; [`KeyIssuer`] hands each
//! caller identity at most one key from it. Keys are keyed only by value:
//! nothing binds a key to the identity that received it.

pub mod issuer;
pub mod pool;
pub mod types;

pub use issuer::KeyIssuer;
pub use pool::KeyPool;
pub use types::{Credential, IssuanceRecord, PoolStats};
