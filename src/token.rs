//! Short-lived access tokens gating the watch relay.
//!
//! A token is the base64 form of `"{identifier}-{issued_at_ms}"`. It carries
//! no signature and no server-side state; validity is purely a TTL check
//! against the embedded timestamp.

use base64::{
    Engine as _,
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig, general_purpose::STANDARD},
};
use chrono::Utc;
use thiserror::Error;

const SEPARATOR: char = '-';

const LENIENT_CONFIG: GeneralPurposeConfig =
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent);
const LENIENT_STANDARD: GeneralPurpose = GeneralPurpose::new(&alphabet::STANDARD, LENIENT_CONFIG);
const LENIENT_URL_SAFE: GeneralPurpose = GeneralPurpose::new(&alphabet::URL_SAFE, LENIENT_CONFIG);

/// Decodes base64 text the way browsers and Node tend to produce it: padding
/// is optional and both the standard and URL-safe alphabets are accepted.
pub fn decode_lenient(input: &str) -> Result<Vec<u8>, base64::DecodeError> {
    LENIENT_STANDARD
        .decode(input)
        .or_else(|_| LENIENT_URL_SAFE.decode(input))
}

/// Source of "now" in epoch milliseconds.
pub trait Clock: Send + Sync + 'static {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token is not valid base64")]
    Encoding,
    #[error("token payload is not UTF-8")]
    Utf8,
    #[error("token payload has no separator")]
    MissingSeparator,
    #[error("token identifier is empty")]
    EmptyIdentifier,
    #[error("token timestamp {0:?} is not numeric")]
    Timestamp(String),
    #[error("token expired {age_ms} ms after issue")]
    Expired { age_ms: i64 },
}

impl TokenError {
    pub fn is_expired(&self) -> bool {
        matches!(self, TokenError::Expired { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub identifier: String,
    pub issued_at_ms: i64,
}

impl AccessToken {
    pub fn new(identifier: impl Into<String>, issued_at_ms: i64) -> Self {
        Self {
            identifier: identifier.into(),
            issued_at_ms,
        }
    }

    pub fn encode(&self) -> String {
        STANDARD.encode(format!(
            "{}{}{}",
            self.identifier, SEPARATOR, self.issued_at_ms
        ))
    }

    /// Parses a token without looking at its age. Spaces are read back as `+`,
    /// since an unescaped `+` in a query string arrives as a space.
    pub fn decode(token: &str) -> Result<Self, TokenError> {
        let normalized = token.trim().replace(' ', "+");
        let raw = decode_lenient(&normalized).map_err(|_| TokenError::Encoding)?;
        let text = String::from_utf8(raw).map_err(|_| TokenError::Utf8)?;
        let (identifier, issued_at) = text
            .split_once(SEPARATOR)
            .ok_or(TokenError::MissingSeparator)?;
        if identifier.is_empty() {
            return Err(TokenError::EmptyIdentifier);
        }
        let issued_at_ms = issued_at
            .parse::<i64>()
            .map_err(|_| TokenError::Timestamp(issued_at.to_string()))?;
        Ok(Self::new(identifier, issued_at_ms))
    }

    /// Accepts the token while `now - issued_at <= ttl`.
    pub fn check_fresh(&self, now_ms: i64, ttl_ms: i64) -> Result<(), TokenError> {
        let age_ms = now_ms.saturating_sub(self.issued_at_ms);
        if age_ms > ttl_ms {
            return Err(TokenError::Expired { age_ms });
        }
        Ok(())
    }

    pub fn validate(token: &str, now_ms: i64, ttl_ms: i64) -> Result<Self, TokenError> {
        let parsed = Self::decode(token)?;
        parsed.check_fresh(now_ms, ttl_ms)?;
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_TOKEN_TTL_MS;

    const NOW: i64 = 1_760_000_000_000;

    #[test]
    fn fresh_token_is_accepted() {
        let token = AccessToken::new("tt0111161", NOW).encode();
        let parsed = AccessToken::validate(&token, NOW, DEFAULT_TOKEN_TTL_MS).unwrap();
        assert_eq!(parsed.identifier, "tt0111161");
        assert_eq!(parsed.issued_at_ms, NOW);
    }

    #[test]
    fn ttl_boundary_is_inclusive() {
        let token = AccessToken::new("tt1", NOW).encode();
        let ttl = DEFAULT_TOKEN_TTL_MS;
        assert!(AccessToken::validate(&token, NOW + ttl, ttl).is_ok());
        let err = AccessToken::validate(&token, NOW + ttl + 1, ttl).unwrap_err();
        assert!(err.is_expired());
    }

    #[test]
    fn non_numeric_timestamp_is_invalid_not_expired() {
        let token = STANDARD.encode("tt1-yesterday");
        let err = AccessToken::validate(&token, NOW, DEFAULT_TOKEN_TTL_MS).unwrap_err();
        assert_eq!(err, TokenError::Timestamp("yesterday".into()));
        assert!(!err.is_expired());
    }

    #[test]
    fn splits_on_first_separator() {
        let token = STANDARD.encode("tt1-123-456");
        let err = AccessToken::decode(&token).unwrap_err();
        assert_eq!(err, TokenError::Timestamp("123-456".into()));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(AccessToken::decode("%%%"), Err(TokenError::Encoding));
        assert_eq!(
            AccessToken::decode(&STANDARD.encode("no separator")),
            Err(TokenError::MissingSeparator)
        );
        assert_eq!(
            AccessToken::decode(&STANDARD.encode("-123")),
            Err(TokenError::EmptyIdentifier)
        );
        assert_eq!(
            AccessToken::decode(&STANDARD.encode([0xff, 0xfe, b'-', b'1'])),
            Err(TokenError::Utf8)
        );
    }

    #[test]
    fn accepts_unpadded_and_url_safe() {
        let padded = AccessToken::new("tt12", NOW).encode();
        let unpadded = padded.trim_end_matches('=');
        assert_eq!(AccessToken::decode(unpadded).unwrap().identifier, "tt12");

        let url_safe = padded.replace('+', "-").replace('/', "_");
        assert_eq!(AccessToken::decode(&url_safe).unwrap().issued_at_ms, NOW);
    }

    #[test]
    fn spaces_read_back_as_plus() {
        // "tt>>>-1" encodes with a '+' in it.
        let token = AccessToken::new("tt>>>", 1).encode();
        assert!(token.contains('+'));
        let mangled = token.replace('+', " ");
        assert_eq!(AccessToken::decode(&mangled).unwrap().identifier, "tt>>>");
    }
}
