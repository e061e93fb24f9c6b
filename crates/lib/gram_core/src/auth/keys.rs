//! API keys.
//!
//! Keys look like `gram_live_<64 hex chars>`. Only the SHA-256 digest is
//! stored; the plaintext is shown to the caller once at creation.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use super::{AuthContext, AuthError};
use crate::models::auth::ApiKey;
use crate::store::{ApiKeyStore, IdentityStore};
use crate::uuid::uuidv7;

const KEY_PREFIX: &str = "gram_";
const RANDOM_HEX_LEN: usize = 64;
const DISPLAY_CHARS: usize = 5;

/// What a key is allowed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeyScope {
    /// Call MCP servers.
    Consumer,
    /// Manage deployments and toolsets.
    Producer,
    /// Mint chat-session tokens.
    Chat,
}

impl ApiKeyScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiKeyScope::Consumer => "consumer",
            ApiKeyScope::Producer => "producer",
            ApiKeyScope::Chat => "chat",
        }
    }
}

impl fmt::Display for ApiKeyScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApiKeyScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "consumer" => Ok(ApiKeyScope::Consumer),
            "producer" => Ok(ApiKeyScope::Producer),
            "chat" => Ok(ApiKeyScope::Chat),
            other => Err(format!("unknown api key scope: {other}")),
        }
    }
}

/// Environment marker embedded in the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEnvironment {
    Local,
    Test,
    Live,
}

impl KeyEnvironment {
    fn label(&self) -> &'static str {
        match self {
            KeyEnvironment::Local => "local",
            KeyEnvironment::Test => "test",
            KeyEnvironment::Live => "live",
        }
    }

    /// Full key prefix, e.g. `gram_live_`.
    pub fn prefix(&self) -> String {
        format!("{KEY_PREFIX}{}_", self.label())
    }
}

/// A newly generated key.
#[derive(Debug, Clone)]
pub struct GeneratedKey {
    /// Plaintext; never stored.
    pub token: String,
    pub key_prefix: String,
    pub key_hash: String,
}

/// Generate a fresh key for `env`.
pub fn generate_key(env: KeyEnvironment) -> GeneratedKey {
    let bytes: [u8; RANDOM_HEX_LEN / 2] = rand::random();
    let random: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    let prefix = env.prefix();

    GeneratedKey {
        token: format!("{prefix}{random}"),
        key_prefix: format!("{prefix}{}", &random[..DISPLAY_CHARS]),
        key_hash: hash_key(&format!("{prefix}{random}")),
    }
}

/// SHA-256 hash a key for storage and lookup.
pub fn hash_key(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Check the shape of a presented key without touching storage.
pub fn parse_key(token: &str) -> Option<KeyEnvironment> {
    let rest = token.strip_prefix(KEY_PREFIX)?;
    let (label, random) = rest.split_once('_')?;
    let env = match label {
        "local" => KeyEnvironment::Local,
        "test" => KeyEnvironment::Test,
        "live" => KeyEnvironment::Live,
        _ => return None,
    };
    let well_formed = random.len() == RANDOM_HEX_LEN
        && random
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
    well_formed.then_some(env)
}

/// Input for creating a key.
#[derive(Debug, Clone)]
pub struct NewApiKey {
    pub organization_id: String,
    pub project_id: Option<String>,
    pub created_by_user_id: String,
    pub name: String,
    pub scopes: Vec<ApiKeyScope>,
}

/// Creates and authorizes API keys.
#[derive(Clone)]
pub struct ApiKeyManager {
    keys: Arc<dyn ApiKeyStore>,
    identities: Arc<dyn IdentityStore>,
    env: KeyEnvironment,
}

impl ApiKeyManager {
    pub fn new(
        keys: Arc<dyn ApiKeyStore>,
        identities: Arc<dyn IdentityStore>,
        env: KeyEnvironment,
    ) -> Self {
        Self {
            keys,
            identities,
            env,
        }
    }

    /// Create a key and return its plaintext alongside the stored record.
    ///
    /// A key with no scopes gets `consumer`.
    pub async fn create(&self, new: NewApiKey) -> Result<(String, ApiKey), AuthError> {
        let generated = generate_key(self.env);
        let mut scopes: Vec<String> = new.scopes.iter().map(|s| s.as_str().to_string()).collect();
        if scopes.is_empty() {
            scopes.push(ApiKeyScope::Consumer.as_str().to_string());
        }

        let record = ApiKey {
            id: uuidv7().to_string(),
            organization_id: new.organization_id,
            project_id: new.project_id,
            created_by_user_id: new.created_by_user_id,
            name: new.name,
            key_prefix: generated.key_prefix,
            key_hash: generated.key_hash,
            scopes,
            created_at: Utc::now(),
            deleted_at: None,
        };
        self.keys.create_api_key(record.clone()).await?;
        Ok((generated.token, record))
    }

    /// Authenticate a presented key, requiring `scope` when given.
    pub async fn authorize(
        &self,
        token: &str,
        scope: Option<ApiKeyScope>,
    ) -> Result<AuthContext, AuthError> {
        if parse_key(token).is_none() {
            return Err(AuthError::InvalidApiKey);
        }

        let key = self
            .keys
            .api_key_by_hash(&hash_key(token))
            .await?
            .ok_or(AuthError::InvalidApiKey)?;

        if let Some(scope) = scope
            && !key.scopes.iter().any(|s| s == scope.as_str())
        {
            return Err(AuthError::MissingScope(scope));
        }

        let organization = self
            .identities
            .organization_by_id(&key.organization_id)
            .await?
            .ok_or(AuthError::InvalidApiKey)?;

        debug!(api_key.prefix = %key.key_prefix, "api key authorized");

        Ok(AuthContext {
            active_organization_id: organization.id,
            project_id: key.project_id,
            organization_slug: organization.slug,
            project_slug: None,
            user_id: key.created_by_user_id,
            external_user_id: String::new(),
            email: None,
            account_type: organization.account_type,
            api_key_scopes: key.scopes,
            session_id: None,
            api_key_id: Some(key.id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::auth::{CachedUserInfo, OrganizationEntry};
    use crate::store::MemoryStore;

    async fn manager() -> ApiKeyManager {
        let store = Arc::new(MemoryStore::new());
        store
            .upsert_user(&CachedUserInfo {
                user_id: "u1".into(),
                email: "u1@example.com".into(),
                admin: false,
                organizations: vec![OrganizationEntry {
                    id: "o1".into(),
                    name: "Org".into(),
                    slug: "org".into(),
                    account_type: "pro".into(),
                }],
            })
            .await
            .unwrap();
        ApiKeyManager::new(store.clone(), store, KeyEnvironment::Test)
    }

    fn new_key(scopes: Vec<ApiKeyScope>) -> NewApiKey {
        NewApiKey {
            organization_id: "o1".into(),
            project_id: None,
            created_by_user_id: "u1".into(),
            name: "ci".into(),
            scopes,
        }
    }

    #[test]
    fn generated_key_shape() {
        let key = generate_key(KeyEnvironment::Live);
        assert!(key.token.starts_with("gram_live_"));
        assert_eq!(key.token.len(), "gram_live_".len() + 64);
        assert_eq!(key.key_prefix.len(), "gram_live_".len() + 5);
        assert!(key.token.starts_with(&key.key_prefix));
        assert_eq!(key.key_hash, hash_key(&key.token));
        assert_eq!(parse_key(&key.token), Some(KeyEnvironment::Live));
    }

    #[test]
    fn parse_rejects_malformed_keys() {
        assert_eq!(parse_key("gram_prod_abc"), None);
        assert_eq!(parse_key("gram_live_XYZ"), None);
        assert_eq!(parse_key(&format!("gram_live_{}", "g".repeat(64))), None);
        assert_eq!(parse_key("a.b.c"), None);
    }

    #[test]
    fn hash_is_hex_sha256() {
        assert_eq!(
            hash_key("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn created_key_authorizes_with_default_scope() {
        let manager = manager().await;
        let (token, record) = manager.create(new_key(vec![])).await.unwrap();
        assert_eq!(record.scopes, vec!["consumer".to_string()]);

        let ctx = manager
            .authorize(&token, Some(ApiKeyScope::Consumer))
            .await
            .unwrap();
        assert_eq!(ctx.active_organization_id, "o1");
        assert_eq!(ctx.organization_slug, "org");
        assert_eq!(ctx.api_key_id, Some(record.id));
        assert_eq!(ctx.session_id, None);
    }

    #[tokio::test]
    async fn missing_scope_is_reported() {
        let manager = manager().await;
        let (token, _) = manager.create(new_key(vec![ApiKeyScope::Consumer])).await.unwrap();
        assert!(matches!(
            manager.authorize(&token, Some(ApiKeyScope::Chat)).await,
            Err(AuthError::MissingScope(ApiKeyScope::Chat))
        ));
    }

    #[tokio::test]
    async fn unknown_key_is_invalid() {
        let manager = manager().await;
        let stranger = generate_key(KeyEnvironment::Test);
        assert!(matches!(
            manager.authorize(&stranger.token, None).await,
            Err(AuthError::InvalidApiKey)
        ));
    }
}
