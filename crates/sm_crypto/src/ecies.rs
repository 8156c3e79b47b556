//! Per-request ephemeral key exchange (ECIES-style, NIST P-256).
//!
//! The transmission key for one request/response cycle is encrypted to the
//! server's static public key:
//!
//!   1. Generate an ephemeral P-256 keypair.
//!   2. ECDH against the server point; the symmetric key is SHA-256 of the
//!      shared-secret x-coordinate.
//!   3. AES-256-GCM encrypt the payload under that symmetric key.
//!
//! Wire format:
//!   [ ephemeral public key, uncompressed SEC1 (65 bytes) | nonce | ct+tag ]
//!
//! `decrypt_with_private_key` is the mirror operation; the production client
//! never holds the server scalar, but protocol tests do.

use p256::{
    ecdh,
    elliptic_curve::sec1::ToEncodedPoint,
    PublicKey, SecretKey,
};
use sha2::{Digest, Sha256};

use crate::{aead, error::CryptoError};

/// Uncompressed SEC1 point length for P-256.
pub const PUBLIC_KEY_LEN: usize = 65;

/// Generate a P-256 keypair; returns (secret, uncompressed public point).
pub fn generate_keypair() -> (SecretKey, Vec<u8>) {
    let secret = SecretKey::random(&mut rand::rngs::OsRng);
    let public = secret.public_key().to_encoded_point(false).as_bytes().to_vec();
    (secret, public)
}

fn shared_symmetric_key(secret: &SecretKey, peer: &PublicKey) -> [u8; 32] {
    let shared = ecdh::diffie_hellman(secret.to_nonzero_scalar(), peer.as_affine());
    let digest = Sha256::digest(shared.raw_secret_bytes());
    digest.into()
}

/// Encrypt `plaintext` to a peer's uncompressed SEC1 public key.
pub fn encrypt_with_public_key(peer_sec1: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let peer = PublicKey::from_sec1_bytes(peer_sec1)
        .map_err(|_| CryptoError::InvalidKey("invalid P-256 public key".into()))?;

    let ephemeral = SecretKey::random(&mut rand::rngs::OsRng);
    let ephemeral_pub = ephemeral.public_key().to_encoded_point(false);

    let sym = shared_symmetric_key(&ephemeral, &peer);
    let ciphertext = aead::encrypt(&sym, plaintext, b"")?;

    let mut out = Vec::with_capacity(PUBLIC_KEY_LEN + ciphertext.len());
    out.extend_from_slice(ephemeral_pub.as_bytes());
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt ECIES wire bytes with the receiving scalar.
pub fn decrypt_with_private_key(secret: &SecretKey, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() <= PUBLIC_KEY_LEN {
        return Err(CryptoError::InvalidKey("ECIES input too short".into()));
    }
    let (point, ciphertext) = data.split_at(PUBLIC_KEY_LEN);
    let ephemeral_pub = PublicKey::from_sec1_bytes(point)
        .map_err(|_| CryptoError::InvalidKey("invalid ephemeral public key".into()))?;

    let sym = shared_symmetric_key(secret, &ephemeral_pub);
    let plaintext = aead::decrypt(&sym, ciphertext, b"")?;
    Ok(plaintext.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ecies_roundtrip() {
        let (server_secret, server_pub) = generate_keypair();
        assert_eq!(server_pub.len(), PUBLIC_KEY_LEN);

        let key = aead::generate_transmission_key_bytes();
        let wire = encrypt_with_public_key(&server_pub, &key).unwrap();
        let recovered = decrypt_with_private_key(&server_secret, &wire).unwrap();
        assert_eq!(recovered, key);
    }

    #[test]
    fn each_encryption_uses_fresh_ephemeral() {
        let (_, server_pub) = generate_keypair();
        let a = encrypt_with_public_key(&server_pub, b"x").unwrap();
        let b = encrypt_with_public_key(&server_pub, b"x").unwrap();
        assert_ne!(a[..PUBLIC_KEY_LEN], b[..PUBLIC_KEY_LEN]);
    }

    #[test]
    fn rejects_truncated_input() {
        let (server_secret, _) = generate_keypair();
        assert!(decrypt_with_private_key(&server_secret, &[4u8; 20]).is_err());
    }

    #[test]
    fn rejects_wrong_recipient() {
        let (_, server_pub) = generate_keypair();
        let (other_secret, _) = generate_keypair();
        let wire = encrypt_with_public_key(&server_pub, b"payload").unwrap();
        assert!(decrypt_with_private_key(&other_secret, &wire).is_err());
    }
}
