//! Signed token issuance and verification (JWT, HS256).
//!
//! Tokens are minted with a single signing secret and verified against an
//! ordered list of secrets, so the signing secret can be rotated while tokens
//! minted under the previous one are still live. Only `HS256` is accepted;
//! any other `alg` in the header is rejected before the signature is checked.

use std::collections::HashSet;
use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use crate::uuid::random_id;

type HmacSha256 = Hmac<sha2::Sha256>;

const SUPPORTED_ALGORITHM: &str = "HS256";

/// Token codec errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("token signature is invalid")]
    InvalidSignature,

    #[error("token has expired")]
    Expired,

    #[error("token is malformed: {0}")]
    Malformed(String),

    #[error("unsupported token algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("token signing is misconfigured: {0}")]
    Misconfigured(String),
}

/// Registered claims wrapped around a set of custom claims.
///
/// The custom claims are flattened into the JWT payload so the wire format is a
/// single flat JSON object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims<C> {
    #[serde(flatten)]
    pub custom: C,
    /// Unique token id (random UUID).
    pub jti: String,
    /// Issued at (unix timestamp).
    pub iat: i64,
    /// Expiry (unix timestamp).
    pub exp: i64,
    /// Audience: the origins the token may be presented from.
    #[serde(default)]
    pub aud: Vec<String>,
}

/// A freshly minted token.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub jti: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// HMAC-SHA256 token codec.
#[derive(Clone)]
pub struct TokenCodec {
    /// Signing secret first, then previous secrets still accepted for verification.
    secrets: Vec<Vec<u8>>,
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("secrets", &self.secrets.len())
            .finish()
    }
}

impl TokenCodec {
    /// Build a codec that signs with `signing_secret` and additionally accepts
    /// tokens signed with any of `verification_secrets`.
    pub fn new(signing_secret: &str, verification_secrets: &[String]) -> Result<Self, TokenError> {
        if signing_secret.trim().is_empty() {
            return Err(TokenError::Misconfigured(
                "signing secret must not be empty".into(),
            ));
        }

        let mut secrets = vec![signing_secret.as_bytes().to_vec()];
        secrets.extend(
            verification_secrets
                .iter()
                .map(|s| s.trim())
                .filter(|s| !s.is_empty() && *s != signing_secret)
                .map(|s| s.as_bytes().to_vec()),
        );

        Ok(Self { secrets })
    }

    /// Mint a token valid for `ttl` from now.
    pub fn issue<C: Serialize>(
        &self,
        custom: C,
        audience: Vec<String>,
        ttl: Duration,
    ) -> Result<IssuedToken, TokenError> {
        self.issue_at(custom, audience, ttl, Utc::now())
    }

    /// Mint a token as if the current time were `now`.
    pub fn issue_at<C: Serialize>(
        &self,
        custom: C,
        audience: Vec<String>,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, TokenError> {
        let expires_at = now + ttl;
        let claims = Claims {
            custom,
            jti: random_id(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            aud: audience,
        };

        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(&self.secrets[0]),
        )
        .map_err(|e| TokenError::Misconfigured(format!("jwt encode: {e}")))?;

        Ok(IssuedToken {
            token,
            jti: claims.jti,
            issued_at: now,
            expires_at,
        })
    }

    /// Verify a token against the current time.
    pub fn verify<C: DeserializeOwned>(&self, token: &str) -> Result<Claims<C>, TokenError> {
        self.verify_at(token, Utc::now())
    }

    /// Verify a token as if the current time were `now`.
    ///
    /// Checks, in order: shape, header algorithm, signature against every
    /// accepted secret, claims structure, then the `[iat, exp)` window.
    pub fn verify_at<C: DeserializeOwned>(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Claims<C>, TokenError> {
        let mut segments = token.split('.');
        let (Some(header), Some(payload), Some(signature), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(TokenError::Malformed("expected three segments".into()));
        };

        if let Some(alg) = header_algorithm(header)
            && alg != SUPPORTED_ALGORITHM
        {
            return Err(TokenError::UnsupportedAlgorithm(alg));
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| TokenError::InvalidSignature)?;
        let signing_input = &token[..header.len() + 1 + payload.len()];

        let secret = self
            .secrets
            .iter()
            .find(|secret| signature_matches(secret, signing_input, &signature))
            .ok_or(TokenError::InvalidSignature)?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.leeway = 0;
        validation.required_spec_claims = HashSet::from(["exp".to_string()]);

        let claims = decode::<Claims<C>>(token, &DecodingKey::from_secret(secret), &validation)
            .map_err(map_decode_error)?
            .claims;

        let now = now.timestamp();
        if now >= claims.exp {
            return Err(TokenError::Expired);
        }
        if claims.iat > now {
            return Err(TokenError::Malformed("token issued in the future".into()));
        }

        Ok(claims)
    }
}

/// Returns true when `value` has the three-segment shape of a JWT.
///
/// Gram API keys never contain dots, so this is enough to tell a chat-session
/// token apart from an API key presented in the same header.
pub fn looks_like_jwt(value: &str) -> bool {
    let mut parts = value.split('.');
    matches!(
        (parts.next(), parts.next(), parts.next(), parts.next()),
        (Some(h), Some(p), Some(_), None) if !h.is_empty() && !p.is_empty()
    )
}

/// Generate a random 64-character alphanumeric secret.
pub fn generate_secret() -> String {
    rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect()
}

/// Extract `alg` from the encoded header, if the header decodes at all.
///
/// An undecodable header yields `None` and is left to the signature check.
fn header_algorithm(encoded: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(encoded).ok()?;
    let header: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    Some(
        header
            .get("alg")
            .and_then(|v| v.as_str())
            .unwrap_or("none")
            .to_string(),
    )
}

fn signature_matches(secret: &[u8], signing_input: &str, signature: &[u8]) -> bool {
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(signing_input.as_bytes());
    mac.verify_slice(signature).is_ok()
}

fn map_decode_error(e: jsonwebtoken::errors::Error) -> TokenError {
    match e.kind() {
        ErrorKind::InvalidSignature => TokenError::InvalidSignature,
        ErrorKind::ExpiredSignature => TokenError::Expired,
        _ => TokenError::Malformed(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    struct TestClaims {
        org_id: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        user_identifier: Option<String>,
    }

    fn codec() -> TokenCodec {
        TokenCodec::new("test-signing-secret", &[]).unwrap()
    }

    fn claims() -> TestClaims {
        TestClaims {
            org_id: "org-1".into(),
            user_identifier: Some("user-42".into()),
        }
    }

    #[test]
    fn empty_signing_secret_is_rejected() {
        assert!(matches!(
            TokenCodec::new("  ", &[]),
            Err(TokenError::Misconfigured(_))
        ));
    }

    #[test]
    fn issue_then_verify_returns_custom_claims() {
        let codec = codec();
        let issued = codec
            .issue(claims(), vec!["https://app.example".into()], Duration::hours(1))
            .unwrap();

        let verified: Claims<TestClaims> = codec.verify(&issued.token).unwrap();
        assert_eq!(verified.custom, claims());
        assert_eq!(verified.jti, issued.jti);
        assert_eq!(verified.aud, vec!["https://app.example".to_string()]);
        assert_eq!(verified.exp - verified.iat, 3600);
    }

    #[test]
    fn every_token_gets_a_distinct_jti() {
        let codec = codec();
        let a = codec.issue(claims(), vec![], Duration::minutes(5)).unwrap();
        let b = codec.issue(claims(), vec![], Duration::minutes(5)).unwrap();
        assert_ne!(a.jti, b.jti);
        assert!(Uuid::parse_str(&a.jti).is_ok());
    }

    #[test]
    fn token_is_valid_inside_window_and_expired_after() {
        let codec = codec();
        let issued_at = Utc::now() - Duration::hours(2);
        let issued = codec
            .issue_at(claims(), vec![], Duration::seconds(600), issued_at)
            .unwrap();

        let inside = issued_at + Duration::seconds(599);
        assert!(codec.verify_at::<TestClaims>(&issued.token, inside).is_ok());

        let at_expiry = issued_at + Duration::seconds(600);
        assert_eq!(
            codec.verify_at::<TestClaims>(&issued.token, at_expiry),
            Err(TokenError::Expired)
        );
        assert_eq!(
            codec.verify::<TestClaims>(&issued.token),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn token_from_the_future_is_rejected() {
        let codec = codec();
        let later = Utc::now() + Duration::hours(1);
        let issued = codec
            .issue_at(claims(), vec![], Duration::hours(2), later)
            .unwrap();
        assert!(matches!(
            codec.verify::<TestClaims>(&issued.token),
            Err(TokenError::Malformed(_))
        ));
    }

    #[test]
    fn tampered_payload_fails_signature_check() {
        let codec = codec();
        let issued = codec.issue(claims(), vec![], Duration::hours(1)).unwrap();

        let mut bytes = issued.token.into_bytes();
        let first_dot = bytes.iter().position(|b| *b == b'.').unwrap();
        let target = first_dot + 5;
        bytes[target] = if bytes[target] == b'A' { b'B' } else { b'A' };
        let tampered = String::from_utf8(bytes).unwrap();

        assert_eq!(
            codec.verify::<TestClaims>(&tampered),
            Err(TokenError::InvalidSignature)
        );
    }

    #[test]
    fn tampered_signature_fails_signature_check() {
        let codec = codec();
        let issued = codec.issue(claims(), vec![], Duration::hours(1)).unwrap();

        let last_dot = issued.token.rfind('.').unwrap();
        let mut bytes = issued.token.into_bytes();
        let target = last_dot + 3;
        bytes[target] = if bytes[target] == b'x' { b'y' } else { b'x' };
        let tampered = String::from_utf8(bytes).unwrap();

        assert_eq!(
            codec.verify::<TestClaims>(&tampered),
            Err(TokenError::InvalidSignature)
        );
    }

    #[test]
    fn alg_none_is_rejected() {
        let codec = codec();
        let issued = codec.issue(claims(), vec![], Duration::hours(1)).unwrap();
        let payload = issued.token.split('.').nth(1).unwrap();
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
        let forged = format!("{header}.{payload}.");

        assert_eq!(
            codec.verify::<TestClaims>(&forged),
            Err(TokenError::UnsupportedAlgorithm("none".into()))
        );
    }

    #[test]
    fn other_hmac_algorithms_are_rejected() {
        let codec = codec();
        let now = Utc::now();
        let claims = Claims {
            custom: claims(),
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::hours(1)).timestamp(),
            aud: vec![],
        };
        let token = encode(
            &Header::new(Algorithm::HS512),
            &claims,
            &EncodingKey::from_secret(b"test-signing-secret"),
        )
        .unwrap();

        assert_eq!(
            codec.verify::<TestClaims>(&token),
            Err(TokenError::UnsupportedAlgorithm("HS512".into()))
        );
    }

    #[test]
    fn decoder_algorithm_errors_do_not_name_the_accepted_algorithm() {
        let err = map_decode_error(ErrorKind::InvalidAlgorithm.into());
        let TokenError::Malformed(detail) = err else {
            panic!("expected Malformed, got {err:?}");
        };
        assert!(!detail.contains(SUPPORTED_ALGORITHM), "{detail}");
        assert_eq!(
            map_decode_error(ErrorKind::ExpiredSignature.into()),
            TokenError::Expired
        );
    }

    #[test]
    fn wrong_secret_fails_signature_check() {
        let issued = codec().issue(claims(), vec![], Duration::hours(1)).unwrap();
        let other = TokenCodec::new("another-secret", &[]).unwrap();
        assert_eq!(
            other.verify::<TestClaims>(&issued.token),
            Err(TokenError::InvalidSignature)
        );
    }

    #[test]
    fn rotated_secret_still_verifies_old_tokens() {
        let old = TokenCodec::new("old-secret", &[]).unwrap();
        let issued = old.issue(claims(), vec![], Duration::hours(1)).unwrap();

        let rotated = TokenCodec::new("new-secret", &["old-secret".to_string()]).unwrap();
        assert!(rotated.verify::<TestClaims>(&issued.token).is_ok());

        let fresh = rotated.issue(claims(), vec![], Duration::hours(1)).unwrap();
        assert_eq!(
            old.verify::<TestClaims>(&fresh.token),
            Err(TokenError::InvalidSignature)
        );
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(
            codec().verify::<TestClaims>("not-a-token"),
            Err(TokenError::Malformed(_))
        ));
        assert!(matches!(
            codec().verify::<TestClaims>("a.b.c.d"),
            Err(TokenError::Malformed(_))
        ));
    }

    #[test]
    fn jwt_shape_detection() {
        let issued = codec().issue(claims(), vec![], Duration::hours(1)).unwrap();
        assert!(looks_like_jwt(&issued.token));
        assert!(!looks_like_jwt("gram_live_0123456789abcdef"));
        assert!(!looks_like_jwt(""));
        assert!(!looks_like_jwt("a.b"));
    }

    #[test]
    fn generated_secret_is_64_chars() {
        let secret = generate_secret();
        assert_eq!(secret.len(), 64);
        assert!(secret.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
