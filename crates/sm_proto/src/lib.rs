//! sm_proto — Wire types, entity decryption, and notation for the
//! Secrets Manager client.
//!
//! All on-wire types are serialised to JSON and decrypted bodies are JSON;
//! the entity model produced by the codec is immutable after decode and
//! rebuilt on every fetch.
//!
//! # Modules
//! - `api`      — request/response DTOs as they appear on the wire
//! - `record`   — decrypted entity model (records, folders, files, fields)
//! - `codec`    — key-hierarchy codec: wrapped keys → decrypted entities
//! - `notation` — `scheme://record/selector` query parser and evaluator

pub mod api;
pub mod codec;
pub mod notation;
pub mod record;

pub use codec::{decode_response, CodecError, DecodedSecrets};
pub use notation::{FieldKind, NotationError, NotationQuery, ValueIndex};
pub use record::{RecordField, SecretFile, SecretFolder, SecretRecord};
