//! sm_client — Zero-knowledge Secrets Manager client.
//!
//! Ties the crypto, protocol, and storage layers together: binds a client
//! from a one-time token, runs the authenticated encrypted query loop with
//! server-driven rekey/throttle retries, decodes the key hierarchy, and
//! exposes the secrets API (fetch, notation, update, file download).
//!
//! # Modules
//! - `transport` — HTTP seam, transmission keys, request signing
//! - `cache`     — disaster-recovery replay file
//! - `client`    — binding, retry loop, and the `SecretsManager` API
//! - `error`     — client and server error taxonomy

pub mod cache;
pub mod client;
pub mod error;
pub mod transport;

pub use cache::DisasterRecoveryCache;
pub use client::{ClientOptions, SecretsManager, CLIENT_VERSION};
pub use error::{Error, ServerError};
pub use transport::{PublicKeySet, ReqwestTransport, RetryPolicy, Transport};

// Re-export the entity model callers interact with.
pub use sm_proto::{RecordField, SecretFile, SecretFolder, SecretRecord};
pub use sm_store::{ConfigKey, FileStorage, InMemoryStorage, KeyValueStorage};
