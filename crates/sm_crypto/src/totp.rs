//! RFC 6238 time-based one-time passwords.
//!
//! Parses `otpauth://totp/...` URLs (base32 secret, SHA1/SHA256/SHA512,
//! 6 or 8 digits, arbitrary period) and computes codes via HOTP dynamic
//! truncation. Used by the notation resolver's `totp` selector.

use data_encoding::BASE32_NOPAD;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Sha256, Sha512};
use url::Url;

/// Hash algorithm for the HOTP inner MAC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TotpAlgorithm {
    Sha1,
    Sha256,
    Sha512,
}

/// Parsed `otpauth://` parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TotpParams {
    secret: Vec<u8>,
    pub algorithm: TotpAlgorithm,
    pub digits: u32,
    pub period: u64,
}

/// Resulting TOTP code and metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TotpCode {
    pub code: String,
    pub period: u64,
    /// Seconds until the code rolls over.
    pub remaining: u64,
}

/// Errors returned while parsing or generating a TOTP value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TotpError {
    #[error("not a valid otpauth:// URL")]
    InvalidUrl,
    #[error("otpauth URL has no secret parameter")]
    MissingSecret,
    #[error("secret is not valid base32")]
    InvalidSecret,
    #[error("unsupported algorithm '{0}'")]
    UnsupportedAlgorithm(String),
    #[error("digits must be 6 or 8")]
    UnsupportedDigits,
    #[error("period must be greater than zero")]
    InvalidPeriod,
}

impl TotpParams {
    /// Parse an `otpauth://totp/...` URL.
    pub fn parse(otpauth_url: &str) -> Result<Self, TotpError> {
        let url = Url::parse(otpauth_url).map_err(|_| TotpError::InvalidUrl)?;
        if url.scheme() != "otpauth" {
            return Err(TotpError::InvalidUrl);
        }

        let mut secret = None;
        let mut algorithm = TotpAlgorithm::Sha1;
        let mut digits = 6u32;
        let mut period = 30u64;

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "secret" => secret = Some(decode_base32(&value)?),
                "algorithm" => {
                    algorithm = match value.to_ascii_uppercase().as_str() {
                        "SHA1" => TotpAlgorithm::Sha1,
                        "SHA256" => TotpAlgorithm::Sha256,
                        "SHA512" => TotpAlgorithm::Sha512,
                        other => return Err(TotpError::UnsupportedAlgorithm(other.into())),
                    }
                }
                "digits" => {
                    digits = value.parse().map_err(|_| TotpError::UnsupportedDigits)?;
                    if digits != 6 && digits != 8 {
                        return Err(TotpError::UnsupportedDigits);
                    }
                }
                "period" => {
                    period = value.parse().map_err(|_| TotpError::InvalidPeriod)?;
                    if period == 0 {
                        return Err(TotpError::InvalidPeriod);
                    }
                }
                _ => {}
            }
        }

        let secret = secret.ok_or(TotpError::MissingSecret)?;
        if secret.is_empty() {
            return Err(TotpError::InvalidSecret);
        }
        Ok(Self { secret, algorithm, digits, period })
    }

    /// Compute the code for the period containing `unix_time`.
    pub fn generate(&self, unix_time: u64) -> TotpCode {
        let counter = unix_time / self.period;
        let value = self.hotp(counter);
        TotpCode {
            code: format!("{:0width$}", value, width = self.digits as usize),
            period: self.period,
            remaining: self.period - (unix_time % self.period),
        }
    }

    /// Check `code` against a symmetric window of `±window` periods
    /// around `unix_time`; first match wins.
    pub fn validate(&self, code: &str, unix_time: u64, window: u32) -> bool {
        let span = i64::from(window);
        for offset in -span..=span {
            let t = unix_time as i64 + offset * self.period as i64;
            if t < 0 {
                continue;
            }
            if self.generate(t as u64).code == code {
                return true;
            }
        }
        false
    }

    fn hotp(&self, counter: u64) -> u32 {
        let msg = counter.to_be_bytes();
        // HMAC accepts any key length; new_from_slice cannot fail here.
        let digest: Vec<u8> = match self.algorithm {
            TotpAlgorithm::Sha1 => {
                let mut mac = Hmac::<Sha1>::new_from_slice(&self.secret)
                    .expect("HMAC accepts any key length");
                mac.update(&msg);
                mac.finalize().into_bytes().to_vec()
            }
            TotpAlgorithm::Sha256 => {
                let mut mac = Hmac::<Sha256>::new_from_slice(&self.secret)
                    .expect("HMAC accepts any key length");
                mac.update(&msg);
                mac.finalize().into_bytes().to_vec()
            }
            TotpAlgorithm::Sha512 => {
                let mut mac = Hmac::<Sha512>::new_from_slice(&self.secret)
                    .expect("HMAC accepts any key length");
                mac.update(&msg);
                mac.finalize().into_bytes().to_vec()
            }
        };

        // Dynamic truncation (RFC 4226 §5.3): low nibble of the last byte
        // selects a 4-byte window; the top bit of that window is cleared.
        let offset = (digest[digest.len() - 1] & 0x0f) as usize;
        let binary = u32::from_be_bytes([
            digest[offset] & 0x7f,
            digest[offset + 1],
            digest[offset + 2],
            digest[offset + 3],
        ]);
        binary % 10u32.pow(self.digits)
    }
}

fn decode_base32(secret: &str) -> Result<Vec<u8>, TotpError> {
    let normalized: String = secret
        .chars()
        .filter(|ch| !ch.is_ascii_whitespace() && *ch != '=')
        .map(|ch| ch.to_ascii_uppercase())
        .collect();
    BASE32_NOPAD
        .decode(normalized.as_bytes())
        .map_err(|_| TotpError::InvalidSecret)
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 6238 Appendix B seeds, base32-encoded.
    const SEED_SHA1: &str = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ";
    const SEED_SHA256: &str = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQGEZA";
    const SEED_SHA512: &str = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQGEZD\
                              GNBVGY3TQOJQGEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQGEZDGNA";

    fn url(seed: &str, algorithm: &str) -> String {
        format!("otpauth://totp/Example:alice?secret={seed}&algorithm={algorithm}&digits=8&period=30")
    }

    #[test]
    fn rfc6238_vectors() {
        let cases = [
            (url(SEED_SHA1, "SHA1"), 59u64, "94287082"),
            (url(SEED_SHA256, "SHA256"), 59, "46119246"),
            (url(SEED_SHA512, "SHA512"), 59, "90693936"),
            (url(SEED_SHA1, "SHA1"), 1111111109, "07081804"),
            (url(SEED_SHA256, "SHA256"), 1111111109, "68084774"),
            (url(SEED_SHA512, "SHA512"), 1111111109, "25091201"),
            (url(SEED_SHA1, "SHA1"), 20000000000, "65353130"),
        ];
        for (u, t, expected) in cases {
            let params = TotpParams::parse(&u).unwrap();
            assert_eq!(params.generate(t).code, expected, "t={t}");
        }
    }

    #[test]
    fn defaults_applied() {
        let params =
            TotpParams::parse(&format!("otpauth://totp/x?secret={SEED_SHA1}")).unwrap();
        assert_eq!(params.algorithm, TotpAlgorithm::Sha1);
        assert_eq!(params.digits, 6);
        assert_eq!(params.period, 30);
    }

    #[test]
    fn generation_is_deterministic_and_rolls_over() {
        let params = TotpParams::parse(&url(SEED_SHA1, "SHA1")).unwrap();
        assert_eq!(params.generate(59).code, params.generate(59).code);
        assert_ne!(params.generate(59).code, params.generate(59 + 30).code);
        assert_eq!(params.generate(59).remaining, 1);
    }

    #[test]
    fn validation_window() {
        let params = TotpParams::parse(&url(SEED_SHA1, "SHA1")).unwrap();
        let earlier = params.generate(1111111109 - 30).code;
        assert!(params.validate(&earlier, 1111111109, 1));
        assert!(!params.validate(&earlier, 1111111109, 0));
    }

    #[test]
    fn parse_errors() {
        assert_eq!(TotpParams::parse("https://x?secret=AAAA"), Err(TotpError::InvalidUrl));
        assert_eq!(TotpParams::parse("otpauth://totp/x"), Err(TotpError::MissingSecret));
        assert_eq!(
            TotpParams::parse("otpauth://totp/x?secret=!!"),
            Err(TotpError::InvalidSecret)
        );
        assert_eq!(
            TotpParams::parse(&format!("otpauth://totp/x?secret={SEED_SHA1}&digits=7")),
            Err(TotpError::UnsupportedDigits)
        );
        assert_eq!(
            TotpParams::parse(&format!("otpauth://totp/x?secret={SEED_SHA1}&period=0")),
            Err(TotpError::InvalidPeriod)
        );
    }
}
