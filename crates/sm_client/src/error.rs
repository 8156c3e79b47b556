use thiserror::Error;

use sm_proto::api::ServerErrorBody;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Network error: {message}")]
    Network {
        message: String,
        status: Option<u16>,
        /// Raw response body, when one was received.
        body: Option<Vec<u8>>,
    },

    #[error("Retries exhausted after {attempts} attempt(s)")]
    RetriesExhausted { attempts: u32 },

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] sm_crypto::CryptoError),

    #[error("Decode error: {0}")]
    Codec(#[from] sm_proto::CodecError),

    #[error("Notation error: {0}")]
    Notation(#[from] sm_proto::NotationError),

    #[error("Storage error: {0}")]
    Store(#[from] sm_store::StoreError),

    #[error("Record not found: {0}")]
    RecordNotFound(String),

    #[error("Response body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),
}

impl Error {
    pub(crate) fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into(), status: None, body: None }
    }
}

/// Typed mapping of server result codes. Unknown codes fall through to
/// `Other`, carrying the raw code for diagnostics.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("server rejected the client version")]
    InvalidClientVersion,

    #[error("invalid or expired token")]
    InvalidToken,

    #[error("bad request")]
    BadRequest,

    #[error("record uid not found")]
    RecordUidNotFound,

    #[error("folder uid not found")]
    FolderUidNotFound,

    #[error("access violation")]
    AccessViolation,

    #[error("throttled by server (retry after {retry_after:?} seconds)")]
    Throttled { retry_after: Option<u64> },

    #[error("server error '{code}'")]
    Other {
        code: String,
        message: Option<String>,
    },
}

impl ServerError {
    pub fn from_body(body: &ServerErrorBody) -> Self {
        match body.code() {
            "invalid_client_version" => Self::InvalidClientVersion,
            "invalid_token" | "url_expired" => Self::InvalidToken,
            "bad_request" => Self::BadRequest,
            "record_uid_not_found" => Self::RecordUidNotFound,
            "folder_uid_not_found" => Self::FolderUidNotFound,
            "access_denied" | "access_violation" => Self::AccessViolation,
            "throttled" => Self::Throttled { retry_after: body.retry_after },
            code => Self::Other {
                code: code.to_string(),
                message: body.message.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(json: &str) -> ServerErrorBody {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn known_codes_map_to_variants() {
        assert!(matches!(
            ServerError::from_body(&body(r#"{"result_code":"access_denied"}"#)),
            ServerError::AccessViolation
        ));
        assert!(matches!(
            ServerError::from_body(&body(r#"{"error":"throttled","retry_after":7}"#)),
            ServerError::Throttled { retry_after: Some(7) }
        ));
    }

    #[test]
    fn unknown_codes_keep_the_raw_code() {
        match ServerError::from_body(&body(r#"{"result_code":"mystery","message":"m"}"#)) {
            ServerError::Other { code, message } => {
                assert_eq!(code, "mystery");
                assert_eq!(message.as_deref(), Some("m"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
