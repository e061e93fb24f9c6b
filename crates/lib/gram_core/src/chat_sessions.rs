//! Chat-session tokens for browser-embedded clients.
//!
//! A chat-session token is a short-lived signed token bound to the origins it
//! may be presented from (its audience). Revocation is recorded in the cache
//! under `chat_session_revoked:{jti}` for [`REVOCATION_TTL`], which outlives
//! any token because issuance caps the lifetime at the same duration.
//!
//! Cache failures while checking revocation fail the validation: a cache
//! outage must never let a revoked token through.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::auth::jwt::{Claims, IssuedToken, TokenCodec, TokenError};
use crate::auth::{ApiKeyScope, AuthContext};
use crate::cache::{CacheBackend, CacheError, Cacheable, TypedCache};

/// How long a revocation record lives.
pub const REVOCATION_TTL: StdDuration = StdDuration::from_secs(24 * 60 * 60);

/// Longest lifetime a token may be issued with, in seconds.
pub const MAX_TOKEN_TTL_SECONDS: i64 = REVOCATION_TTL.as_secs() as i64;

/// Chat-session errors.
#[derive(Debug, Error)]
pub enum ChatSessionError {
    #[error("invalid chat session token: {0}")]
    Token(#[from] TokenError),

    #[error("chat session token has been revoked")]
    Revoked,

    #[error("chat session state unavailable: {0}")]
    Unavailable(#[source] CacheError),

    #[error("invalid token lifetime: {0}s")]
    InvalidTtl(i64),
}

/// Custom claims carried by a chat-session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSessionClaims {
    pub org_id: String,
    pub project_id: String,
    pub organization_slug: String,
    pub project_slug: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_identifier: Option<String>,
    /// Key that minted the token, when it was minted with an API key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_id: Option<String>,
}

/// Revocation marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevokedToken {
    pub jti: String,
    pub revoked_at: DateTime<Utc>,
}

impl Cacheable for RevokedToken {
    const NAMESPACE: &'static str = "chat_session_revoked";

    fn cache_id(&self) -> String {
        self.jti.clone()
    }

    fn ttl(&self) -> StdDuration {
        REVOCATION_TTL
    }
}

/// Issues, validates and revokes chat-session tokens.
#[derive(Clone)]
pub struct ChatSessionManager {
    codec: TokenCodec,
    revoked: TypedCache<RevokedToken>,
}

impl ChatSessionManager {
    pub fn new(codec: TokenCodec, cache: Arc<dyn CacheBackend>) -> Self {
        Self {
            codec,
            revoked: TypedCache::new(cache),
        }
    }

    /// Mint a token for `claims`, valid from `embed_origin` for `ttl_seconds`.
    pub fn generate_token(
        &self,
        claims: ChatSessionClaims,
        embed_origin: &str,
        ttl_seconds: i64,
    ) -> Result<IssuedToken, ChatSessionError> {
        if ttl_seconds <= 0 || ttl_seconds > MAX_TOKEN_TTL_SECONDS {
            return Err(ChatSessionError::InvalidTtl(ttl_seconds));
        }

        let issued = self.codec.issue(
            claims,
            vec![embed_origin.to_string()],
            Duration::seconds(ttl_seconds),
        )?;
        debug!(jti = %issued.jti, ttl_seconds, "chat session token issued");
        Ok(issued)
    }

    /// Verify a token and check it has not been revoked.
    pub async fn validate_token(
        &self,
        token: &str,
    ) -> Result<Claims<ChatSessionClaims>, ChatSessionError> {
        self.validate_token_at(token, Utc::now()).await
    }

    /// [`validate_token`](Self::validate_token) as if the current time were `now`.
    pub async fn validate_token_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Claims<ChatSessionClaims>, ChatSessionError> {
        let claims = self.codec.verify_at::<ChatSessionClaims>(token, now)?;
        if self.is_revoked(&claims.jti).await? {
            return Err(ChatSessionError::Revoked);
        }
        Ok(claims)
    }

    /// Verify a token's signature and lifetime, ignoring revocation.
    pub fn decode_token(&self, token: &str) -> Result<Claims<ChatSessionClaims>, ChatSessionError> {
        Ok(self.codec.verify::<ChatSessionClaims>(token)?)
    }

    /// Whether `jti` has a live revocation record.
    pub async fn is_revoked(&self, jti: &str) -> Result<bool, ChatSessionError> {
        let record = self
            .revoked
            .get(jti)
            .await
            .map_err(ChatSessionError::Unavailable)?;
        Ok(record.is_some())
    }

    /// Revoke a token by id. Revoking twice only refreshes the record's TTL.
    pub async fn revoke_token(&self, jti: &str) -> Result<(), ChatSessionError> {
        self.revoked
            .store(&RevokedToken {
                jti: jti.to_string(),
                revoked_at: Utc::now(),
            })
            .await
            .map_err(ChatSessionError::Unavailable)?;
        info!(jti, "chat session token revoked");
        Ok(())
    }

    /// Validate a token and project it into an [`AuthContext`].
    ///
    /// The context never carries a session id: a chat-session token must not
    /// be mistaken for a dashboard session.
    pub async fn authorize(&self, token: &str) -> Result<AuthContext, ChatSessionError> {
        let claims = self.validate_token(token).await?;
        Ok(context_from_claims(claims))
    }
}

/// Project verified claims into an [`AuthContext`].
pub fn context_from_claims(claims: Claims<ChatSessionClaims>) -> AuthContext {
    let custom = claims.custom;
    AuthContext {
        active_organization_id: custom.org_id,
        project_id: Some(custom.project_id),
        organization_slug: custom.organization_slug,
        project_slug: Some(custom.project_slug),
        user_id: String::new(),
        external_user_id: custom.user_identifier.unwrap_or_default(),
        email: None,
        account_type: String::new(),
        api_key_scopes: vec![ApiKeyScope::Chat.as_str().to_string()],
        session_id: None,
        api_key_id: custom.api_key_id,
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::cache::MemoryCache;

    fn claims() -> ChatSessionClaims {
        ChatSessionClaims {
            org_id: "org-1".into(),
            project_id: "proj-1".into(),
            organization_slug: "acme".into(),
            project_slug: "default".into(),
            user_identifier: Some("visitor-7".into()),
            api_key_id: None,
        }
    }

    fn manager() -> ChatSessionManager {
        let codec = TokenCodec::new("chat-secret", &[]).unwrap();
        ChatSessionManager::new(codec, Arc::new(MemoryCache::new()))
    }

    /// Backend whose every call fails.
    struct BrokenCache;

    #[async_trait]
    impl CacheBackend for BrokenCache {
        async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
            Err(CacheError::Backend("connection refused".into()))
        }

        async fn set(&self, _key: &str, _value: String, _ttl: StdDuration) -> Result<(), CacheError> {
            Err(CacheError::Backend("connection refused".into()))
        }

        async fn delete(&self, _key: &str) -> Result<(), CacheError> {
            Err(CacheError::Backend("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn generated_token_validates_with_origin_in_audience() {
        let manager = manager();
        let issued = manager
            .generate_token(claims(), "https://app.example", 3600)
            .unwrap();

        let verified = manager.validate_token(&issued.token).await.unwrap();
        assert_eq!(verified.custom, claims());
        assert_eq!(verified.aud, vec!["https://app.example".to_string()]);
        assert_eq!(verified.jti, issued.jti);
    }

    #[test]
    fn non_positive_and_oversized_ttls_are_rejected() {
        let manager = manager();
        for ttl in [0, -5, MAX_TOKEN_TTL_SECONDS + 1] {
            assert!(matches!(
                manager.generate_token(claims(), "https://app.example", ttl),
                Err(ChatSessionError::InvalidTtl(t)) if t == ttl
            ));
        }
    }

    #[tokio::test]
    async fn revoked_token_stays_revoked_until_it_expires() {
        let manager = manager();
        let issued = manager
            .generate_token(claims(), "https://app.example", 3600)
            .unwrap();

        manager.revoke_token(&issued.jti).await.unwrap();

        assert!(matches!(
            manager.validate_token(&issued.token).await,
            Err(ChatSessionError::Revoked)
        ));
        let near_expiry = issued.expires_at - Duration::seconds(1);
        assert!(matches!(
            manager.validate_token_at(&issued.token, near_expiry).await,
            Err(ChatSessionError::Revoked)
        ));
    }

    #[tokio::test]
    async fn revoking_twice_is_idempotent() {
        let manager = manager();
        let issued = manager
            .generate_token(claims(), "https://app.example", 60)
            .unwrap();

        manager.revoke_token(&issued.jti).await.unwrap();
        manager.revoke_token(&issued.jti).await.unwrap();
        assert!(manager.is_revoked(&issued.jti).await.unwrap());
        assert!(matches!(
            manager.validate_token(&issued.token).await,
            Err(ChatSessionError::Revoked)
        ));
    }

    #[tokio::test]
    async fn revocation_only_affects_its_own_token() {
        let manager = manager();
        let revoked = manager
            .generate_token(claims(), "https://app.example", 60)
            .unwrap();
        let live = manager
            .generate_token(claims(), "https://app.example", 60)
            .unwrap();

        manager.revoke_token(&revoked.jti).await.unwrap();
        assert!(manager.validate_token(&live.token).await.is_ok());
    }

    #[tokio::test]
    async fn cache_failure_fails_closed() {
        let codec = TokenCodec::new("chat-secret", &[]).unwrap();
        let manager = ChatSessionManager::new(codec, Arc::new(BrokenCache));
        let issued = manager
            .generate_token(claims(), "https://app.example", 60)
            .unwrap();

        assert!(matches!(
            manager.validate_token(&issued.token).await,
            Err(ChatSessionError::Unavailable(_))
        ));
        assert!(matches!(
            manager.revoke_token(&issued.jti).await,
            Err(ChatSessionError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn authorize_never_sets_a_session_id() {
        let manager = manager();
        let issued = manager
            .generate_token(
                ChatSessionClaims {
                    api_key_id: Some("key-1".into()),
                    ..claims()
                },
                "https://app.example",
                60,
            )
            .unwrap();

        let ctx = manager.authorize(&issued.token).await.unwrap();
        assert_eq!(ctx.session_id, None);
        assert!(!ctx.is_dashboard());
        assert_eq!(ctx.api_key_id.as_deref(), Some("key-1"));
        assert_eq!(ctx.project_id.as_deref(), Some("proj-1"));
        assert_eq!(ctx.external_user_id, "visitor-7");
        assert!(ctx.has_scope(ApiKeyScope::Chat));
    }

    #[tokio::test]
    async fn tampered_token_is_rejected_before_cache_lookup() {
        let codec = TokenCodec::new("chat-secret", &[]).unwrap();
        let manager = ChatSessionManager::new(codec, Arc::new(BrokenCache));
        assert!(matches!(
            manager.validate_token("a.b.c").await,
            Err(ChatSessionError::Token(_))
        ));
    }
}
