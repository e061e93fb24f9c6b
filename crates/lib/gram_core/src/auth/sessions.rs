//! Dashboard sessions.
//!
//! Sessions live only in the cache. User profiles are read cache-first and
//! filled from the identity store on a miss, then kept for
//! [`USER_INFO_TTL`].

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::{AuthContext, AuthError};
use crate::cache::{CacheBackend, Cacheable, TypedCache};
use crate::models::auth::{CachedUserInfo, OrganizationEntry, Session};
use crate::store::IdentityStore;
use crate::uuid::random_id;

/// Session lifetime.
pub const SESSION_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// How long a user profile is served from the cache before re-reading it.
pub const USER_INFO_TTL: Duration = Duration::from_secs(15 * 60);

impl Cacheable for Session {
    const NAMESPACE: &'static str = "session";

    fn cache_id(&self) -> String {
        self.session_id.clone()
    }

    fn ttl(&self) -> Duration {
        SESSION_TTL
    }
}

impl Cacheable for CachedUserInfo {
    const NAMESPACE: &'static str = "user_info";

    fn cache_id(&self) -> String {
        self.user_id.clone()
    }

    fn ttl(&self) -> Duration {
        USER_INFO_TTL
    }
}

/// Looks up sessions and the users behind them.
#[derive(Clone)]
pub struct SessionManager {
    sessions: TypedCache<Session>,
    user_info: TypedCache<CachedUserInfo>,
    identities: Arc<dyn IdentityStore>,
}

impl SessionManager {
    pub fn new(cache: Arc<dyn CacheBackend>, identities: Arc<dyn IdentityStore>) -> Self {
        Self {
            sessions: TypedCache::new(Arc::clone(&cache)),
            user_info: TypedCache::new(cache),
            identities,
        }
    }

    /// Start a session for `user_id` acting in `organization_id`.
    pub async fn create_session(
        &self,
        user_id: &str,
        organization_id: &str,
    ) -> Result<Session, AuthError> {
        let session = Session {
            session_id: random_id(),
            user_id: user_id.to_string(),
            active_organization_id: organization_id.to_string(),
        };
        self.sessions.store(&session).await?;
        Ok(session)
    }

    pub async fn session(&self, session_id: &str) -> Result<Option<Session>, AuthError> {
        Ok(self.sessions.get(session_id).await?)
    }

    pub async fn revoke_session(&self, session_id: &str) -> Result<(), AuthError> {
        Ok(self.sessions.delete(session_id).await?)
    }

    /// Profile for `user_id`, cache first, identity store on a miss.
    pub async fn user_info(&self, user_id: &str) -> Result<Option<CachedUserInfo>, AuthError> {
        if let Some(info) = self.user_info.get(user_id).await? {
            return Ok(Some(info));
        }

        let Some(info) = self.identities.user_info(user_id).await? else {
            return Ok(None);
        };

        if let Err(e) = self.user_info.store(&info).await {
            warn!(user.id = user_id, error = %e, "failed to cache user info");
        }
        debug!(user.id = user_id, "user info loaded from store");
        Ok(Some(info))
    }

    /// Drop the cached profile so the next read goes to the store.
    pub async fn invalidate_user_info(&self, user_id: &str) -> Result<(), AuthError> {
        Ok(self.user_info.delete(user_id).await?)
    }

    /// Resolve a session id into an [`AuthContext`].
    ///
    /// `admin_override` names an organization slug to act as. It only takes
    /// effect for admins and is ignored for everyone else.
    pub async fn authorize(
        &self,
        session_id: &str,
        admin_override: Option<&str>,
    ) -> Result<AuthContext, AuthError> {
        let session = self
            .session(session_id)
            .await?
            .ok_or(AuthError::InvalidSession)?;
        let info = self
            .user_info(&session.user_id)
            .await?
            .ok_or(AuthError::InvalidSession)?;

        let organization = match admin_override.filter(|slug| !slug.is_empty()) {
            Some(slug) if info.admin => {
                debug!(user.id = %info.user_id, org.slug = slug, "admin override applied");
                self.identities
                    .organization_by_slug(slug)
                    .await?
                    .ok_or(AuthError::OrganizationForbidden)?
            }
            _ => active_organization(&info, &session.active_organization_id)?,
        };

        Ok(AuthContext {
            active_organization_id: organization.id,
            project_id: None,
            organization_slug: organization.slug,
            project_slug: None,
            user_id: info.user_id,
            external_user_id: String::new(),
            email: Some(info.email),
            account_type: organization.account_type,
            api_key_scopes: Vec::new(),
            session_id: Some(session.session_id),
            api_key_id: None,
        })
    }
}

fn active_organization(
    info: &CachedUserInfo,
    organization_id: &str,
) -> Result<OrganizationEntry, AuthError> {
    info.organizations
        .iter()
        .find(|org| org.id == organization_id)
        .cloned()
        .ok_or(AuthError::OrganizationForbidden)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::store::MemoryStore;

    fn org(id: &str, slug: &str) -> OrganizationEntry {
        OrganizationEntry {
            id: id.into(),
            name: slug.to_uppercase(),
            slug: slug.into(),
            account_type: "enterprise".into(),
        }
    }

    async fn setup(admin: bool) -> (SessionManager, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        store
            .upsert_user(&CachedUserInfo {
                user_id: "u1".into(),
                email: "u1@example.com".into(),
                admin,
                organizations: vec![org("o1", "acme")],
            })
            .await
            .unwrap();
        store
            .upsert_user(&CachedUserInfo {
                user_id: "u2".into(),
                email: "u2@example.com".into(),
                admin: false,
                organizations: vec![org("o2", "globex")],
            })
            .await
            .unwrap();

        let manager = SessionManager::new(Arc::new(MemoryCache::new()), store.clone());
        (manager, store)
    }

    #[tokio::test]
    async fn session_resolves_to_dashboard_context() {
        let (manager, _) = setup(false).await;
        let session = manager.create_session("u1", "o1").await.unwrap();

        let ctx = manager.authorize(&session.session_id, None).await.unwrap();
        assert_eq!(ctx.session_id.as_deref(), Some(session.session_id.as_str()));
        assert_eq!(ctx.active_organization_id, "o1");
        assert_eq!(ctx.organization_slug, "acme");
        assert_eq!(ctx.email.as_deref(), Some("u1@example.com"));
        assert!(ctx.is_dashboard());
    }

    #[tokio::test]
    async fn unknown_session_is_invalid() {
        let (manager, _) = setup(false).await;
        assert!(matches!(
            manager.authorize("nope", None).await,
            Err(AuthError::InvalidSession)
        ));
    }

    #[tokio::test]
    async fn revoked_session_is_invalid() {
        let (manager, _) = setup(false).await;
        let session = manager.create_session("u1", "o1").await.unwrap();
        manager.revoke_session(&session.session_id).await.unwrap();
        assert!(matches!(
            manager.authorize(&session.session_id, None).await,
            Err(AuthError::InvalidSession)
        ));
    }

    #[tokio::test]
    async fn session_for_foreign_organization_is_forbidden() {
        let (manager, _) = setup(false).await;
        let session = manager.create_session("u1", "o2").await.unwrap();
        assert!(matches!(
            manager.authorize(&session.session_id, None).await,
            Err(AuthError::OrganizationForbidden)
        ));
    }

    #[tokio::test]
    async fn admin_override_switches_organization() {
        let (manager, _) = setup(true).await;
        let session = manager.create_session("u1", "o1").await.unwrap();
        let ctx = manager
            .authorize(&session.session_id, Some("globex"))
            .await
            .unwrap();
        assert_eq!(ctx.active_organization_id, "o2");
        assert_eq!(ctx.organization_slug, "globex");
    }

    #[tokio::test]
    async fn admin_override_is_ignored_for_non_admins() {
        let (manager, _) = setup(false).await;
        let session = manager.create_session("u1", "o1").await.unwrap();
        let ctx = manager
            .authorize(&session.session_id, Some("globex"))
            .await
            .unwrap();
        assert_eq!(ctx.active_organization_id, "o1");
    }

    #[tokio::test]
    async fn user_info_is_served_from_cache_until_invalidated() {
        let (manager, store) = setup(false).await;
        let first = manager.user_info("u1").await.unwrap().unwrap();

        store
            .upsert_user(&CachedUserInfo {
                email: "changed@example.com".into(),
                ..first.clone()
            })
            .await
            .unwrap();

        let cached = manager.user_info("u1").await.unwrap().unwrap();
        assert_eq!(cached.email, "u1@example.com");

        manager.invalidate_user_info("u1").await.unwrap();
        let fresh = manager.user_info("u1").await.unwrap().unwrap();
        assert_eq!(fresh.email, "changed@example.com");
    }
}
