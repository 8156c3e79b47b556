//! Legacy AES-256-CBC compatibility mode.
//!
//! Nested folder keys and folder display names arrive in an unauthenticated
//! block mode: a random leading IV block, PKCS#7 padding, no tag. This module
//! exists ONLY for those folder paths — record and file material must go
//! through `aead`. Callers outside folder decoding have no business here.
//!
//! Wire format:
//!   [ iv (16 bytes) | CBC ciphertext, PKCS#7-padded ]

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use zeroize::Zeroizing;

use crate::{aead::random_bytes, error::CryptoError};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const BLOCK_LEN: usize = 16;

/// CBC-encrypt with a fresh random IV prepended.
pub fn encrypt_cbc(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let iv = random_bytes::<BLOCK_LEN>();
    let enc = Aes256CbcEnc::new_from_slices(key, &iv)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    let ciphertext = enc.encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut out = Vec::with_capacity(BLOCK_LEN + ciphertext.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt wire-format bytes (iv || ciphertext). No integrity check.
pub fn decrypt_cbc(key: &[u8; 32], data: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if data.len() < 2 * BLOCK_LEN || data.len() % BLOCK_LEN != 0 {
        return Err(CryptoError::LegacyDecrypt(format!(
            "ciphertext length {} is not a padded block sequence",
            data.len()
        )));
    }
    let (iv, ciphertext) = data.split_at(BLOCK_LEN);
    let dec = Aes256CbcDec::new_from_slices(key, iv)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    let plaintext = dec
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CryptoError::LegacyDecrypt("bad PKCS#7 padding".into()))?;
    Ok(Zeroizing::new(plaintext))
}

/// Decrypt a CBC-wrapped 32-byte folder key.
pub fn unwrap_key_cbc(wrapping_key: &[u8; 32], wrapped: &[u8]) -> Result<[u8; 32], CryptoError> {
    let plaintext = decrypt_cbc(wrapping_key, wrapped)?;
    if plaintext.len() != 32 {
        return Err(CryptoError::InvalidKey("Unwrapped folder key wrong length".into()));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&plaintext);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cbc_roundtrip() {
        let key = random_bytes::<32>();
        let msg = b"{\"name\":\"Engineering\"}";
        let ct = encrypt_cbc(&key, msg).unwrap();
        assert_eq!(ct.len() % BLOCK_LEN, 0);
        assert_eq!(&*decrypt_cbc(&key, &ct).unwrap(), msg);
    }

    #[test]
    fn cbc_key_wrap_roundtrip() {
        let kek = random_bytes::<32>();
        let inner = random_bytes::<32>();
        let wrapped = encrypt_cbc(&kek, &inner).unwrap();
        // 32-byte key pads to three blocks including the IV
        assert_eq!(wrapped.len(), 64);
        assert_eq!(unwrap_key_cbc(&kek, &wrapped).unwrap(), inner);
    }

    #[test]
    fn rejects_partial_blocks() {
        let key = random_bytes::<32>();
        assert!(decrypt_cbc(&key, &[0u8; 31]).is_err());
    }
}
