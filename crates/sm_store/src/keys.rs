//! Configuration keys consumed by the client core.
//!
//! The wire names are part of the storage contract — external tooling
//! reads and writes the same JSON keys — so they must not drift.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    /// Fully resolved service URL (diagnostic; `Hostname` is authoritative).
    Url,
    /// Derived client identifier (base64 HMAC of the one-time token).
    ClientId,
    /// One-time binding secret; deleted after the application key is
    /// recovered.
    ClientKey,
    Hostname,
    ServerPublicKeyId,
    /// Client's ECDSA private key, base64 PKCS#8 DER.
    PrivateKey,
    /// Application key, base64; present once binding has completed.
    AppKey,
    AppOwnerPublicKey,
    AppUid,
}

impl ConfigKey {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Url => "url",
            Self::ClientId => "clientId",
            Self::ClientKey => "clientKey",
            Self::Hostname => "hostname",
            Self::ServerPublicKeyId => "serverPublicKeyId",
            Self::PrivateKey => "privateKey",
            Self::AppKey => "appKey",
            Self::AppOwnerPublicKey => "appOwnerPublicKey",
            Self::AppUid => "appUid",
        }
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
