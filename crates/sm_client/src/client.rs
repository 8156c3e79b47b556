//! High-level client: binding, the retry-aware query loop, and the
//! secrets API.
//!
//! One `SecretsManager` owns a credential store, a transport, and an
//! optional disaster-recovery cache. Every call builds a fresh
//! transmission key; the server may answer with a `key` rotation or a
//! `throttled` signal, both of which are retried within a bounded policy
//! rather than surfaced to the caller.

use std::thread;
use std::time::{Duration, Instant};

use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine,
};
use serde_json::Value;
use tracing::{debug, warn};

use sm_crypto::{aead, sign};
use sm_proto::api::{GetPayload, SecretsResponse, ServerErrorBody, UpdatePayload};
use sm_proto::{decode_response, notation, DecodedSecrets, NotationError, SecretFile, SecretFolder, SecretRecord};
use sm_store::{ConfigKey, KeyValueStorage};

use crate::cache::DisasterRecoveryCache;
use crate::error::{Error, ServerError};
use crate::transport::{
    generate_transmission_key, sign_request, PublicKeySet, ReqwestTransport, RequestHeaders,
    RetryPolicy, Transport, DEFAULT_KEY_ID,
};

pub const CLIENT_VERSION: &str = "mr0.1.0";

const API_BASE_PATH: &str = "api/rest/sm/v1";
const CLIENT_ID_HMAC_MESSAGE: &[u8] = b"KEEPER_SECRETS_MANAGER_CLIENT_ID";

/// Region prefixes accepted in one-time tokens, mapped to service hosts.
const REGION_HOSTS: &[(&str, &str)] = &[
    ("US", "keepersecurity.com"),
    ("EU", "keepersecurity.eu"),
    ("AU", "keepersecurity.com.au"),
    ("GOV", "govcloud.keepersecurity.us"),
    ("JP", "keepersecurity.jp"),
    ("CA", "keepersecurity.ca"),
];

/// Resolve a token's region prefix to a host. A prefix containing a dot is
/// taken as a literal hostname; a bare token defaults to the US region.
fn region_host(prefix: Option<&str>) -> Result<String, Error> {
    let Some(prefix) = prefix else {
        return Ok(REGION_HOSTS[0].1.to_string());
    };
    if prefix.contains('.') {
        return Ok(prefix.to_string());
    }
    REGION_HOSTS
        .iter()
        .find(|(region, _)| region.eq_ignore_ascii_case(prefix))
        .map(|(_, host)| host.to_string())
        .ok_or_else(|| Error::Configuration(format!("unknown region prefix '{prefix}'")))
}

/// Split a one-time token into `(host, binding secret)`.
fn parse_token(token: &str) -> Result<(String, String), Error> {
    let token = token.trim();
    if token.is_empty() {
        return Err(Error::Configuration("empty one-time token".into()));
    }
    match token.split_once(':') {
        Some((prefix, secret)) if !secret.is_empty() => {
            Ok((region_host(Some(prefix))?, secret.to_string()))
        }
        Some(_) => Err(Error::Configuration("one-time token has no secret part".into())),
        None => Ok((region_host(None)?, token.to_string())),
    }
}

/// Derive the stable client identifier from the one-time binding secret.
fn derive_client_id(client_key_b64: &str) -> Result<String, Error> {
    let secret = URL_SAFE_NO_PAD.decode(client_key_b64.trim_end_matches('='))?;
    let mac = sign::hmac_sha512(&secret, CLIENT_ID_HMAC_MESSAGE)?;
    Ok(STANDARD.encode(mac))
}

// ── Options ──────────────────────────────────────────────────────────────────

/// Construction parameters for `SecretsManager`.
pub struct ClientOptions {
    storage: Box<dyn KeyValueStorage>,
    token: Option<String>,
    hostname: Option<String>,
    transport: Option<Box<dyn Transport>>,
    retry: RetryPolicy,
    cache: Option<DisasterRecoveryCache>,
    public_keys: PublicKeySet,
}

impl ClientOptions {
    pub fn new(storage: impl KeyValueStorage + 'static) -> Self {
        Self {
            storage: Box::new(storage),
            token: None,
            hostname: None,
            transport: None,
            retry: RetryPolicy::default(),
            cache: None,
            public_keys: PublicKeySet::builtin(),
        }
    }

    /// One-time binding token (`US:...`). Consumed on first connect.
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Overrides the host the token's region prefix would select.
    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Box::new(transport));
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Enable the disaster-recovery cache at the platform default path.
    pub fn with_cache(self) -> Self {
        let path = DisasterRecoveryCache::default_path();
        self.cache_at(path)
    }

    pub fn cache_at(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.cache = Some(DisasterRecoveryCache::new(path));
        self
    }

    pub fn public_keys(mut self, keys: PublicKeySet) -> Self {
        self.public_keys = keys;
        self
    }
}

// ── Client ───────────────────────────────────────────────────────────────────

/// Zero-knowledge secrets client over a credential store and a transport.
pub struct SecretsManager {
    storage: Box<dyn KeyValueStorage>,
    transport: Box<dyn Transport>,
    retry: RetryPolicy,
    cache: Option<DisasterRecoveryCache>,
    public_keys: PublicKeySet,
}

enum ExchangeOutcome {
    /// Decrypted response body.
    Done(Vec<u8>),
    /// Server asked for a different public key id; already persisted.
    Rekeyed,
    /// Server asked the client to back off.
    Throttled(Option<u64>),
}

impl SecretsManager {
    pub fn new(options: ClientOptions) -> Result<Self, Error> {
        let ClientOptions {
            mut storage,
            token,
            hostname,
            transport,
            retry,
            cache,
            public_keys,
        } = options;

        if let Some(token) = token {
            bind_token(storage.as_mut(), &token, hostname.as_deref())?;
        } else if let Some(hostname) = hostname {
            storage.set(ConfigKey::Hostname, hostname)?;
        }

        if storage.get(ConfigKey::ClientId)?.is_none() {
            return Err(Error::Configuration(
                "storage holds no client identity and no token was provided".into(),
            ));
        }

        let transport = match transport {
            Some(t) => t,
            None => Box::new(ReqwestTransport::new()?),
        };

        Ok(Self { storage, transport, retry, cache, public_keys })
    }

    // ── Secrets API ──────────────────────────────────────────────────────

    /// Fetch and decrypt all secrets, or only the requested record UIDs.
    pub fn get_secrets(&mut self, uids: &[&str]) -> Result<Vec<SecretRecord>, Error> {
        let requested = if uids.is_empty() {
            None
        } else {
            Some(uids.iter().map(|u| u.to_string()).collect())
        };
        Ok(self.fetch(requested)?.records)
    }

    /// Fetch everything and keep the records whose title matches exactly.
    pub fn get_secrets_by_title(&mut self, title: &str) -> Result<Vec<SecretRecord>, Error> {
        let decoded = self.fetch(None)?;
        Ok(decoded
            .records
            .into_iter()
            .filter(|r| r.title == title)
            .collect())
    }

    /// Fetch everything, folders included.
    pub fn get_folders(&mut self) -> Result<Vec<SecretFolder>, Error> {
        Ok(self.fetch(None)?.folders)
    }

    /// Evaluate a notation query (`keeper://record/field/password`) against
    /// a fresh fetch.
    pub fn get_notation(&mut self, query: &str) -> Result<Value, Error> {
        let decoded = self.fetch(None)?;
        match notation::resolve(query, &decoded.records) {
            Ok(value) => Ok(value),
            // Both selection failures surface as record-not-found; an
            // ambiguous title is not a resolvable selector either.
            Err(
                NotationError::RecordNotFound(selector)
                | NotationError::AmbiguousTitle(selector),
            ) => Err(Error::RecordNotFound(selector)),
            Err(err) => Err(err.into()),
        }
    }

    /// Re-encrypt the record's data under its record key and post the
    /// update at the record's revision.
    pub fn update_secret(&mut self, record: &SecretRecord) -> Result<(), Error> {
        let data = record.data_json()?;
        let ciphertext = aead::encrypt(&record.record_key, &data, b"")?;
        let payload = UpdatePayload {
            client_version: CLIENT_VERSION.to_string(),
            client_id: self.client_id()?,
            record_uid: record.uid.clone(),
            data: URL_SAFE_NO_PAD.encode(&ciphertext),
            revision: record.revision,
        };
        let body = serde_json::to_vec(&payload)?;
        self.post_query("update_secret", &body, false)?;
        Ok(())
    }

    /// Download and decrypt one attached file.
    pub fn download_file(&mut self, file: &SecretFile) -> Result<Vec<u8>, Error> {
        let response = self.transport.get(&file.url)?;
        if !response.is_success() {
            return Err(Error::Network {
                message: format!("file download failed for '{}'", file.uid),
                status: Some(response.status),
                body: Some(response.body),
            });
        }
        let plaintext = aead::decrypt(&file.file_key, &response.body, b"")?;
        Ok(plaintext.to_vec())
    }

    // ── Fetch and decode ─────────────────────────────────────────────────

    fn fetch(&mut self, requested_records: Option<Vec<String>>) -> Result<DecodedSecrets, Error> {
        // During binding the server has not pinned our public key yet, so
        // send it along with the first fetch.
        let public_key = if self.storage.get(ConfigKey::AppKey)?.is_none() {
            let der = self.storage.get_bytes(ConfigKey::PrivateKey)?.ok_or_else(|| {
                Error::Configuration("no private key in storage".into())
            })?;
            let key = sign::signing_key_from_der(&der)?;
            Some(URL_SAFE_NO_PAD.encode(sign::verifying_key_bytes(&key)))
        } else {
            None
        };

        let payload = GetPayload {
            client_version: CLIENT_VERSION.to_string(),
            client_id: self.client_id()?,
            public_key,
            requested_records,
        };
        let body = serde_json::to_vec(&payload)?;

        let plaintext = self.post_query("get_secret", &body, true)?;
        let response: SecretsResponse = serde_json::from_slice(&plaintext)?;

        let app_key = self.resolve_app_key(&response)?;
        if let Some(owner_key) = &response.app_owner_public_key {
            self.storage.set(ConfigKey::AppOwnerPublicKey, owner_key.clone())?;
        }

        Ok(decode_response(&app_key, &response))
    }

    /// Application key: from storage once bound, otherwise recovered from
    /// the response by unwrapping `encryptedAppKey` with the one-time
    /// binding secret, which is then destroyed.
    fn resolve_app_key(&mut self, response: &SecretsResponse) -> Result<[u8; 32], Error> {
        if let Some(bytes) = self.storage.get_bytes(ConfigKey::AppKey)? {
            return bytes
                .try_into()
                .map_err(|_| Error::Configuration("stored application key is not 32 bytes".into()));
        }

        let encrypted = response.encrypted_app_key.as_deref().ok_or_else(|| {
            Error::Configuration(
                "client is not bound and the response carries no application key".into(),
            )
        })?;
        let client_key = self.storage.get(ConfigKey::ClientKey)?.ok_or_else(|| {
            Error::Configuration("no binding secret available to recover the application key".into())
        })?;
        let secret: [u8; 32] = URL_SAFE_NO_PAD
            .decode(client_key.trim_end_matches('='))?
            .try_into()
            .map_err(|_| Error::Configuration("binding secret is not 32 bytes".into()))?;

        let wrapped = URL_SAFE_NO_PAD.decode(encrypted.trim_end_matches('='))?;
        let app_key = aead::unwrap_key(&secret, &wrapped)?;

        self.storage.set_bytes(ConfigKey::AppKey, &app_key)?;
        self.storage.delete(ConfigKey::ClientKey)?;
        debug!("binding complete, application key persisted");
        Ok(app_key)
    }

    // ── Query loop ───────────────────────────────────────────────────────

    /// Encrypt, sign, and post one payload, retrying on server-driven
    /// rekey and throttle signals within the bounded policy.
    fn post_query(
        &mut self,
        endpoint: &str,
        payload: &[u8],
        cacheable: bool,
    ) -> Result<Vec<u8>, Error> {
        let started = Instant::now();
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.exchange(endpoint, payload, cacheable)? {
                ExchangeOutcome::Done(plaintext) => return Ok(plaintext),
                ExchangeOutcome::Rekeyed => {
                    debug!(endpoint, attempts, "server rotated its public key, retrying");
                }
                ExchangeOutcome::Throttled(retry_after) => {
                    let delay = retry_after
                        .map(Duration::from_secs)
                        .unwrap_or(self.retry.default_throttle_delay);
                    let remaining = self.retry.deadline.saturating_sub(started.elapsed());
                    warn!(endpoint, delay_secs = delay.as_secs(), "throttled by server");
                    thread::sleep(delay.min(remaining));
                }
            }
            if attempts >= self.retry.max_attempts || started.elapsed() >= self.retry.deadline {
                return Err(Error::RetriesExhausted { attempts });
            }
        }
    }

    /// One full request/response cycle. Ok(Rekeyed/Throttled) means the
    /// caller should retry; Err is final.
    fn exchange(
        &mut self,
        endpoint: &str,
        payload: &[u8],
        cacheable: bool,
    ) -> Result<ExchangeOutcome, Error> {
        let key_id = self
            .storage
            .get(ConfigKey::ServerPublicKeyId)?
            .unwrap_or_else(|| DEFAULT_KEY_ID.to_string());
        let tk = generate_transmission_key(&key_id, &self.public_keys)?;

        let ciphertext = aead::encrypt(&tk.key, payload, b"")?;
        let signature = sign_request(self.storage.as_ref(), &tk.encrypted_key, &ciphertext)?;
        let headers = RequestHeaders::build(&tk, &signature);

        let host = self
            .storage
            .get(ConfigKey::Hostname)?
            .ok_or_else(|| Error::Configuration("no hostname in storage".into()))?;
        let url = format!("https://{host}/{API_BASE_PATH}/{endpoint}");

        let response = match self.transport.post(&url, &headers, &ciphertext) {
            Ok(response) => response,
            Err(network_err) => {
                // Network-level failure: replay the last good response if
                // the cache holds one.
                if cacheable {
                    if let Some((cached_key, cached_body)) =
                        self.cache.as_ref().and_then(DisasterRecoveryCache::load)
                    {
                        warn!(endpoint, "network failure, replaying recovery cache");
                        let plaintext = aead::decrypt(&cached_key, &cached_body, b"")?;
                        return Ok(ExchangeOutcome::Done(plaintext.to_vec()));
                    }
                }
                return Err(network_err);
            }
        };

        if response.is_success() {
            if cacheable {
                if let Some(cache) = &self.cache {
                    cache.save(&tk.key, &response.body);
                }
            }
            let plaintext = aead::decrypt(&tk.key, &response.body, b"")?;
            return Ok(ExchangeOutcome::Done(plaintext.to_vec()));
        }

        // Error bodies arrive as plaintext JSON.
        let body: ServerErrorBody = serde_json::from_slice(&response.body).map_err(|_| {
            Error::Network {
                message: format!("HTTP {} with unparseable error body", response.status),
                status: Some(response.status),
                body: Some(response.body.clone()),
            }
        })?;
        match body.code() {
            "key" => {
                let new_key_id = body.key_id.clone().ok_or_else(|| {
                    Error::Network {
                        message: "key rotation signal without a key id".into(),
                        status: Some(response.status),
                        body: Some(response.body.clone()),
                    }
                })?;
                self.storage.set(ConfigKey::ServerPublicKeyId, new_key_id)?;
                Ok(ExchangeOutcome::Rekeyed)
            }
            "throttled" => Ok(ExchangeOutcome::Throttled(body.retry_after)),
            _ => Err(ServerError::from_body(&body).into()),
        }
    }

    fn client_id(&self) -> Result<String, Error> {
        self.storage
            .get(ConfigKey::ClientId)?
            .ok_or_else(|| Error::Configuration("no client id in storage".into()))
    }

    /// Read-only view of the credential store, mainly for diagnostics.
    pub fn storage(&self) -> &dyn KeyValueStorage {
        self.storage.as_ref()
    }
}

/// Initialise storage from a one-time token: hostname, derived client id,
/// binding secret, and a fresh signing key.
fn bind_token(
    storage: &mut dyn KeyValueStorage,
    token: &str,
    hostname_override: Option<&str>,
) -> Result<(), Error> {
    let (host, client_key) = parse_token(token)?;
    let host = hostname_override.map(str::to_string).unwrap_or(host);

    let client_id = derive_client_id(&client_key)?;
    if let Some(existing) = storage.get(ConfigKey::ClientId)? {
        if existing == client_id {
            // Same token re-supplied; storage already carries this identity.
            return Ok(());
        }
        return Err(Error::Configuration(
            "storage is already bound to a different client identity".into(),
        ));
    }

    storage.set(ConfigKey::Hostname, host.clone())?;
    storage.set(ConfigKey::Url, format!("https://{host}/{API_BASE_PATH}"))?;
    storage.set(ConfigKey::ClientId, client_id)?;
    storage.set(ConfigKey::ClientKey, client_key)?;

    if storage.get(ConfigKey::PrivateKey)?.is_none() {
        let key = sign::generate_signing_key();
        storage.set_bytes(ConfigKey::PrivateKey, &sign::signing_key_to_der(&key)?)?;
    }
    debug!(host = %host, "bound client identity from one-time token");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_region_prefixes_resolve() {
        assert_eq!(parse_token("US:abc").unwrap().0, "keepersecurity.com");
        assert_eq!(parse_token("eu:abc").unwrap().0, "keepersecurity.eu");
        assert_eq!(parse_token("GOV:abc").unwrap().0, "govcloud.keepersecurity.us");
        // A dotted prefix is a literal host.
        assert_eq!(parse_token("vault.example.com:abc").unwrap().0, "vault.example.com");
        // A bare token defaults to US.
        let (host, secret) = parse_token("abc123").unwrap();
        assert_eq!(host, "keepersecurity.com");
        assert_eq!(secret, "abc123");
    }

    #[test]
    fn bad_tokens_are_rejected() {
        assert!(matches!(parse_token(""), Err(Error::Configuration(_))));
        assert!(matches!(parse_token("XX:abc"), Err(Error::Configuration(_))));
        assert!(matches!(parse_token("US:"), Err(Error::Configuration(_))));
    }

    #[test]
    fn client_id_is_hmac_of_the_binding_secret() {
        let secret = [5u8; 32];
        let encoded = URL_SAFE_NO_PAD.encode(secret);
        let id = derive_client_id(&encoded).unwrap();
        let expected =
            STANDARD.encode(sign::hmac_sha512(&secret, CLIENT_ID_HMAC_MESSAGE).unwrap());
        assert_eq!(id, expected);
        // Padded input derives the same identity.
        let padded = format!("{encoded}=");
        assert_eq!(derive_client_id(&padded).unwrap(), expected);
    }

    #[test]
    fn binding_populates_storage_once() {
        let mut storage = sm_store::InMemoryStorage::new();
        let token = format!("EU:{}", URL_SAFE_NO_PAD.encode([9u8; 32]));

        bind_token(&mut storage, &token, None).unwrap();
        assert_eq!(
            storage.get(ConfigKey::Hostname).unwrap().as_deref(),
            Some("keepersecurity.eu")
        );
        assert!(storage.get(ConfigKey::ClientId).unwrap().is_some());
        assert!(storage.get(ConfigKey::ClientKey).unwrap().is_some());
        let first_key = storage.get(ConfigKey::PrivateKey).unwrap().unwrap();

        // Re-binding with the same token keeps the generated key.
        bind_token(&mut storage, &token, None).unwrap();
        assert_eq!(storage.get(ConfigKey::PrivateKey).unwrap().unwrap(), first_key);

        // A different token cannot take over this storage.
        let other = format!("EU:{}", URL_SAFE_NO_PAD.encode([8u8; 32]));
        assert!(matches!(
            bind_token(&mut storage, &other, None),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn hostname_override_beats_the_region() {
        let mut storage = sm_store::InMemoryStorage::new();
        let token = format!("US:{}", URL_SAFE_NO_PAD.encode([1u8; 32]));
        bind_token(&mut storage, &token, Some("dev.vault.internal")).unwrap();
        assert_eq!(
            storage.get(ConfigKey::Hostname).unwrap().as_deref(),
            Some("dev.vault.internal")
        );
    }
}
