//! Secure transport: one authenticated, end-to-end-encrypted call.
//!
//! Per logical call the client generates a fresh 32-byte transmission key,
//! encrypts it to the server's static public key (ECIES over P-256),
//! AEAD-encrypts the JSON payload under the transmission key, and signs
//! `encrypted_key || ciphertext`. The HTTP exchange itself sits behind the
//! `Transport` trait so protocol logic stays testable without a network.
//!
//! Server-driven retry signals (`key` rotation, `throttled`) are handled
//! by the caller's retry loop in `client`; this module only builds and
//! decodes single exchanges.

use std::collections::HashMap;
use std::time::Duration;

use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine,
};
use zeroize::ZeroizeOnDrop;

use sm_crypto::{aead, ecies, sign};
use sm_store::{ConfigKey, KeyValueStorage};

use crate::error::Error;

pub const DEFAULT_KEY_ID: &str = "10";

/// Published service public keys, by key id. Regional endpoints alias a
/// shared set; deployments against a private service provision their own
/// via `PublicKeySet::custom`.
const BUILTIN_PUBLIC_KEYS: &[(&str, &str)] = &[
    ("1", "BK9w6TZFxE6nFNbMfIpULCup2a8xc6w2tUTABjxny7yFmxW0dAEojwC6j6zb5nTlmb1dAx8nwo3qF7RPYGmloRMQ"),
    ("2", "BKnhy0obglZJK-igwthNLdknoSXRrGB-mvFRzyb_L-DKKefWjYdFD2888qN1ROczz4n3keYSfKz9Koj90Z6w_tQQ"),
    ("3", "BAsPQdCpLIGXdWNLdAwx-3J5lNqUtKbaOMV56hUj8VzxE2USLHuHHuKDeno0ymJt-acxWV1xPlBfNUShhRTR77QQ"),
    ("4", "BNYIh_Sv03nRZUUJveE8d2mxKLIDXv654UbshaItHrCJhd6cT7pdZ_XwbdyxAOCWMkBb9AZ4t1XRCsM8-wkEBRgQ"),
    ("5", "BA6uNfeYSvqagwu4TOY6wFK4JyU5C200vJna0lH4PJ-SzGVXej8l9dElyQ58_ljfPs5Rq6zVVXpdDe8A7Y3WRhkQ"),
    ("6", "BMjTIlXfohI8TDymsHxo0DqYysCy7yZGJ80WhgOBR4QUd6LBDA6-_318a-jCGW96zxXKMm8clDTKpE8w75KG-FQQ"),
    ("7", "BK9w6TZFxE6nFNbMfIpULCup2a8xc6w2tUTABjxny7yFmxW0dAEojwC6j6zb5nTlmb1dAx8nwo3qF7RPYGmloRMQ"),
    ("8", "BKnhy0obglZJK-igwthNLdknoSXRrGB-mvFRzyb_L-DKKefWjYdFD2888qN1ROczz4n3keYSfKz9Koj90Z6w_tQQ"),
    ("9", "BAsPQdCpLIGXdWNLdAwx-3J5lNqUtKbaOMV56hUj8VzxE2USLHuHHuKDeno0ymJt-acxWV1xPlBfNUShhRTR77QQ"),
    ("10", "BNYIh_Sv03nRZUUJveE8d2mxKLIDXv654UbshaItHrCJhd6cT7pdZ_XwbdyxAOCWMkBb9AZ4t1XRCsM8-wkEBRgQ"),
    ("11", "BA6uNfeYSvqagwu4TOY6wFK4JyU5C200vJna0lH4PJ-SzGVXej8l9dElyQ58_ljfPs5Rq6zVVXpdDe8A7Y3WRhkQ"),
    ("12", "BMjTIlXfohI8TDymsHxo0DqYysCy7yZGJ80WhgOBR4QUd6LBDA6-_318a-jCGW96zxXKMm8clDTKpE8w75KG-FQQ"),
    ("13", "BK9w6TZFxE6nFNbMfIpULCup2a8xc6w2tUTABjxny7yFmxW0dAEojwC6j6zb5nTlmb1dAx8nwo3qF7RPYGmloRMQ"),
    ("14", "BKnhy0obglZJK-igwthNLdknoSXRrGB-mvFRzyb_L-DKKefWjYdFD2888qN1ROczz4n3keYSfKz9Koj90Z6w_tQQ"),
    ("15", "BAsPQdCpLIGXdWNLdAwx-3J5lNqUtKbaOMV56hUj8VzxE2USLHuHHuKDeno0ymJt-acxWV1xPlBfNUShhRTR77QQ"),
    ("16", "BNYIh_Sv03nRZUUJveE8d2mxKLIDXv654UbshaItHrCJhd6cT7pdZ_XwbdyxAOCWMkBb9AZ4t1XRCsM8-wkEBRgQ"),
    ("17", "BA6uNfeYSvqagwu4TOY6wFK4JyU5C200vJna0lH4PJ-SzGVXej8l9dElyQ58_ljfPs5Rq6zVVXpdDe8A7Y3WRhkQ"),
];

/// Server public keys the transport may encrypt transmission keys to.
#[derive(Debug, Clone)]
pub struct PublicKeySet {
    keys: HashMap<String, String>,
}

impl PublicKeySet {
    /// The published service key set.
    pub fn builtin() -> Self {
        Self {
            keys: BUILTIN_PUBLIC_KEYS
                .iter()
                .map(|(id, key)| (id.to_string(), key.to_string()))
                .collect(),
        }
    }

    /// A provisioned key set: id → uncompressed SEC1 point.
    pub fn custom(keys: HashMap<String, Vec<u8>>) -> Self {
        Self {
            keys: keys
                .into_iter()
                .map(|(id, bytes)| (id, URL_SAFE_NO_PAD.encode(bytes)))
                .collect(),
        }
    }

    pub fn lookup(&self, key_id: &str) -> Option<Vec<u8>> {
        let encoded = self.keys.get(key_id)?;
        URL_SAFE_NO_PAD.decode(encoded.trim_end_matches('=')).ok()
    }
}

impl Default for PublicKeySet {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Bounded retry policy for server-driven rekey/throttle signals.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub deadline: Duration,
    /// Throttle delay when the server does not suggest one.
    pub default_throttle_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            deadline: Duration::from_secs(60),
            default_throttle_delay: Duration::from_secs(10),
        }
    }
}

/// Per-request ephemeral key material. Lives for one request/response
/// cycle; the raw key is zeroized on drop.
#[derive(ZeroizeOnDrop)]
pub struct TransmissionKey {
    #[zeroize(skip)]
    pub public_key_id: String,
    pub key: [u8; 32],
    #[zeroize(skip)]
    pub encrypted_key: Vec<u8>,
}

/// Generate a fresh transmission key encrypted to the identified server key.
pub fn generate_transmission_key(
    key_id: &str,
    keys: &PublicKeySet,
) -> Result<TransmissionKey, Error> {
    let server_public = keys.lookup(key_id).ok_or_else(|| {
        Error::Configuration(format!("unknown server public key id '{key_id}'"))
    })?;
    let key = aead::generate_transmission_key_bytes();
    let encrypted_key = ecies::encrypt_with_public_key(&server_public, &key)?;
    Ok(TransmissionKey {
        public_key_id: key_id.to_string(),
        key,
        encrypted_key,
    })
}

/// Sign `encrypted_key || ciphertext`. ECDSA with the stored private key;
/// HMAC keyed by the binding secret before a private key exists.
pub fn sign_request(
    storage: &dyn KeyValueStorage,
    encrypted_key: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, Error> {
    let mut message = Vec::with_capacity(encrypted_key.len() + ciphertext.len());
    message.extend_from_slice(encrypted_key);
    message.extend_from_slice(ciphertext);

    if let Some(der) = storage.get_bytes(ConfigKey::PrivateKey)? {
        let key = sign::signing_key_from_der(&der)?;
        return Ok(sign::sign_der(&key, &message));
    }
    if let Some(client_key) = storage.get(ConfigKey::ClientKey)? {
        let secret = URL_SAFE_NO_PAD.decode(client_key.trim_end_matches('='))?;
        return Ok(sign::hmac_sha512(&secret, &message)?);
    }
    Err(Error::Configuration(
        "no private key and no binding secret to sign with".into(),
    ))
}

/// Identifying headers for one exchange.
#[derive(Debug, Clone)]
pub struct RequestHeaders {
    pub public_key_id: String,
    /// Base64 of the asymmetrically-encrypted transmission key.
    pub transmission_key: String,
    /// `Signature <base64 signature>`.
    pub authorization: String,
}

impl RequestHeaders {
    pub fn build(transmission_key: &TransmissionKey, signature: &[u8]) -> Self {
        Self {
            public_key_id: transmission_key.public_key_id.clone(),
            transmission_key: STANDARD.encode(&transmission_key.encrypted_key),
            authorization: format!("Signature {}", STANDARD.encode(signature)),
        }
    }
}

/// Raw HTTP result of one exchange.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The blocking HTTP seam. Implementations must not retry on their own;
/// the retry protocol lives above this trait.
pub trait Transport: Send {
    fn post(&self, url: &str, headers: &RequestHeaders, body: &[u8]) -> Result<HttpResponse, Error>;

    /// Plain GET, used for file downloads (already end-to-end encrypted).
    fn get(&self, url: &str) -> Result<HttpResponse, Error>;
}

/// Production transport: blocking reqwest with rustls.
pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, Error> {
        let client = reqwest::blocking::Client::builder()
            .use_rustls_tls()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::network(e.to_string()))?;
        Ok(Self { client })
    }
}

impl Transport for ReqwestTransport {
    fn post(&self, url: &str, headers: &RequestHeaders, body: &[u8]) -> Result<HttpResponse, Error> {
        let response = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .header("PublicKeyId", &headers.public_key_id)
            .header("TransmissionKey", &headers.transmission_key)
            .header(reqwest::header::AUTHORIZATION, &headers.authorization)
            .body(body.to_vec())
            .send()
            .map_err(|e| Error::network(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .map_err(|e| Error::network(e.to_string()))?
            .to_vec();
        Ok(HttpResponse { status, body })
    }

    fn get(&self, url: &str) -> Result<HttpResponse, Error> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| Error::network(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .map_err(|e| Error::network(e.to_string()))?
            .to_vec();
        Ok(HttpResponse { status, body })
    }
}
