//! sm_crypto — Secrets Manager client cryptographic primitives
//!
//! # Design principles
//! - NO custom crypto; all primitives come from audited Rust crates.
//! - Zeroize secret material on drop where the type owns it.
//! - Record and file key paths are AEAD-only; the unauthenticated legacy
//!   mode lives in `legacy` and is reachable only from folder decoding.
//!
//! # Module layout
//! - `aead`   — AES-256-GCM encrypt/decrypt + key (un)wrapping helpers
//! - `ecies`  — per-request ephemeral P-256 key exchange (ECIES-style)
//! - `sign`   — ECDSA P-256 request signatures + HMAC-SHA512 fallback
//! - `legacy` — AES-256-CBC compatibility mode for nested folder material
//! - `totp`   — RFC 6238 time-based one-time-password engine
//! - `error`  — unified error type

pub mod aead;
pub mod ecies;
pub mod error;
pub mod legacy;
pub mod sign;
pub mod totp;

pub use error::CryptoError;
