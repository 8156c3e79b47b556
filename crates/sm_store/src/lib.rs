//! sm_store — credential storage for the Secrets Manager client.
//!
//! The client core only requires a get/set/delete contract over opaque
//! string and byte values (`KeyValueStorage`); anything that satisfies it
//! can hold configuration. Two reference backends ship here:
//! - `InMemoryStorage` — ephemeral, for tests and short-lived processes
//! - `FileStorage`     — a JSON file with owner-only permissions
//!
//! Richer backends (environment, OS keyring, KMS-wrapped files) plug in
//! from outside by implementing the same trait.

pub mod error;
pub mod keys;
pub mod storage;

pub use error::StoreError;
pub use keys::ConfigKey;
pub use storage::{FileStorage, InMemoryStorage, KeyValueStorage};
