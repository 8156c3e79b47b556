//! Request authentication.
//!
//! Post-binding, every call is signed with the client's ECDSA P-256 key
//! (SHA-256 digest, DER-encoded signature). Pre-binding — before the client
//! holds a private key — requests fall back to HMAC-SHA512 keyed by the
//! one-time binding secret.
//!
//! Private keys travel through the credential store as base64 PKCS#8 DER.

use hmac::{Hmac, Mac};
use p256::ecdsa::{
    signature::{Signer, Verifier},
    Signature, SigningKey, VerifyingKey,
};
use p256::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use sha2::Sha512;

use crate::error::CryptoError;

type HmacSha512 = Hmac<Sha512>;

/// Generate a fresh P-256 signing key.
pub fn generate_signing_key() -> SigningKey {
    SigningKey::random(&mut rand::rngs::OsRng)
}

/// Export a signing key as PKCS#8 DER.
pub fn signing_key_to_der(key: &SigningKey) -> Result<Vec<u8>, CryptoError> {
    let doc = key
        .to_pkcs8_der()
        .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
    Ok(doc.as_bytes().to_vec())
}

/// Import a signing key from PKCS#8 DER.
pub fn signing_key_from_der(der: &[u8]) -> Result<SigningKey, CryptoError> {
    SigningKey::from_pkcs8_der(der).map_err(|e| CryptoError::InvalidKey(e.to_string()))
}

/// Uncompressed SEC1 public point of a signing key.
pub fn verifying_key_bytes(key: &SigningKey) -> Vec<u8> {
    use p256::elliptic_curve::sec1::ToEncodedPoint;
    key.verifying_key().to_encoded_point(false).as_bytes().to_vec()
}

/// ECDSA-P256-SHA256 signature, DER-encoded.
pub fn sign_der(key: &SigningKey, message: &[u8]) -> Vec<u8> {
    let signature: Signature = key.sign(message);
    signature.to_der().as_bytes().to_vec()
}

/// Verify a DER signature against an uncompressed SEC1 public point.
pub fn verify_der(public_sec1: &[u8], message: &[u8], der: &[u8]) -> Result<(), CryptoError> {
    let vk = VerifyingKey::from_sec1_bytes(public_sec1)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    let sig = Signature::from_der(der).map_err(|_| CryptoError::SignatureVerification)?;
    vk.verify(message, &sig)
        .map_err(|_| CryptoError::SignatureVerification)
}

/// HMAC-SHA512 — client-identifier derivation and the pre-binding
/// signature fallback.
pub fn hmac_sha512(key: &[u8], message: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut mac = HmacSha512::new_from_slice(key)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_roundtrip() {
        let key = generate_signing_key();
        let public = verifying_key_bytes(&key);
        let msg = b"encrypted_key || ciphertext";
        let sig = sign_der(&key, msg);
        verify_der(&public, msg, &sig).unwrap();
    }

    #[test]
    fn verify_rejects_other_message() {
        let key = generate_signing_key();
        let public = verifying_key_bytes(&key);
        let sig = sign_der(&key, b"original");
        assert!(matches!(
            verify_der(&public, b"tampered", &sig),
            Err(CryptoError::SignatureVerification)
        ));
    }

    #[test]
    fn der_import_export_roundtrip() {
        let key = generate_signing_key();
        let der = signing_key_to_der(&key).unwrap();
        let restored = signing_key_from_der(&der).unwrap();
        let sig = sign_der(&restored, b"msg");
        verify_der(&verifying_key_bytes(&key), b"msg", &sig).unwrap();
    }

    #[test]
    fn hmac_sha512_known_vector() {
        // RFC 4231 test case 2: key "Jefe", data "what do ya want for nothing?"
        let mac = hmac_sha512(b"Jefe", b"what do ya want for nothing?").unwrap();
        assert_eq!(
            hex::encode(&mac),
            "164b7a7bfcf819e2e395fbe73b56e0a387bd64222e831fd610270cd7ea250554\
             9758bf75c05a994a6d034f65f8f0e6fdcaeab1a34d4a6b4b636e070a38bce737"
        );
    }
}
