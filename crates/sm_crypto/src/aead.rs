//! Authenticated Encryption with Associated Data
//!
//! Uses AES-256-GCM (96-bit nonce, 128-bit tag).
//! Key size: 32 bytes.  Nonce: 12 bytes (random).  Tag: 16 bytes.
//!
//! Ciphertext wire format:
//!   [ nonce (12 bytes) | ciphertext + tag ]

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng as AeadOsRng, Payload},
    Aes256Gcm, Nonce,
};
use zeroize::Zeroizing;

use crate::error::CryptoError;

pub const NONCE_LEN: usize = 12;
pub const KEY_LEN: usize = 32;

/// Fill a fixed-size array from the OS RNG.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    use rand::RngCore;
    let mut out = [0u8; N];
    rand::rngs::OsRng.fill_bytes(&mut out);
    out
}

/// Fresh 32-byte symmetric key for one request/response cycle.
pub fn generate_transmission_key_bytes() -> [u8; 32] {
    random_bytes()
}

/// Encrypt `plaintext` with a 32-byte key, prepending a random 12-byte nonce.
/// `aad` — additional associated data (authenticated but not encrypted).
pub fn encrypt(key: &[u8; 32], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::AeadEncrypt)?;

    let nonce = Aes256Gcm::generate_nonce(&mut AeadOsRng);

    let ciphertext = cipher
        .encrypt(&nonce, Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::AeadEncrypt)?;

    // Prepend nonce
    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt wire-format bytes (nonce || ciphertext+tag).
pub fn decrypt(key: &[u8; 32], data: &[u8], aad: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if data.len() < NONCE_LEN {
        return Err(CryptoError::AeadDecrypt);
    }
    let (nonce_bytes, ct) = data.split_at(NONCE_LEN);
    let nonce = Nonce::from_slice(nonce_bytes);

    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::AeadDecrypt)?;

    let plaintext = cipher
        .decrypt(nonce, Payload { msg: ct, aad })
        .map_err(|_| CryptoError::AeadDecrypt)?;

    Ok(Zeroizing::new(plaintext))
}

/// Encrypt a 32-byte key under another 32-byte wrapping key (key transport).
/// Empty AAD — the wire format carries none.
pub fn wrap_key(wrapping_key: &[u8; 32], key_to_wrap: &[u8; 32]) -> Result<Vec<u8>, CryptoError> {
    encrypt(wrapping_key, key_to_wrap, b"")
}

/// Decrypt a wrapped key; the plaintext must be exactly 32 bytes.
pub fn unwrap_key(wrapping_key: &[u8; 32], wrapped: &[u8]) -> Result<[u8; 32], CryptoError> {
    let plaintext = decrypt(wrapping_key, wrapped, b"")?;
    if plaintext.len() != KEY_LEN {
        return Err(CryptoError::InvalidKey("Unwrapped key wrong length".into()));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&plaintext);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let key = random_bytes::<32>();
        let msg = b"record data json";
        let ct = encrypt(&key, msg, b"").unwrap();
        assert_ne!(&ct[NONCE_LEN..], msg.as_slice());
        let pt = decrypt(&key, &ct, b"").unwrap();
        assert_eq!(&*pt, msg);
    }

    #[test]
    fn wrong_key_is_rejected() {
        let key = random_bytes::<32>();
        let other = random_bytes::<32>();
        let ct = encrypt(&key, b"secret", b"").unwrap();
        assert!(matches!(decrypt(&other, &ct, b""), Err(CryptoError::AeadDecrypt)));
    }

    #[test]
    fn tampered_ciphertext_is_rejected() {
        let key = random_bytes::<32>();
        let mut ct = encrypt(&key, b"secret", b"").unwrap();
        let last = ct.len() - 1;
        ct[last] ^= 0x01;
        assert!(decrypt(&key, &ct, b"").is_err());
    }

    #[test]
    fn truncated_input_is_rejected() {
        let key = random_bytes::<32>();
        assert!(decrypt(&key, &[0u8; 4], b"").is_err());
    }

    #[test]
    fn key_wrap_roundtrip() {
        let kek = random_bytes::<32>();
        let inner = random_bytes::<32>();
        let wrapped = wrap_key(&kek, &inner).unwrap();
        assert_eq!(unwrap_key(&kek, &wrapped).unwrap(), inner);
    }

    #[test]
    fn unwrap_rejects_non_key_plaintext() {
        let kek = random_bytes::<32>();
        let wrapped = encrypt(&kek, b"too short", b"").unwrap();
        assert!(matches!(
            unwrap_key(&kek, &wrapped),
            Err(CryptoError::InvalidKey(_))
        ));
    }
}
