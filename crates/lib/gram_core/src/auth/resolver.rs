//! Credential resolution for endpoints.
//!
//! The resolver takes whatever credentials a request carried plus the
//! endpoint's [`AuthPolicy`] and produces at most one [`AuthContext`]. The
//! first presented credential of an accepted kind decides the outcome: if it
//! is invalid the request fails, there is no fallback to a later kind.

use std::sync::Arc;

use tracing::debug;

use super::keys::ApiKeyManager;
use super::sessions::SessionManager;
use super::{AuthContext, AuthError, AuthPolicy, Credential, Credentials};
use crate::chat_sessions::ChatSessionManager;
use crate::store::ProjectStore;

/// Resolves request credentials into an [`AuthContext`].
#[derive(Clone)]
pub struct AuthResolver {
    sessions: SessionManager,
    api_keys: ApiKeyManager,
    chat_sessions: ChatSessionManager,
    projects: Arc<dyn ProjectStore>,
}

impl AuthResolver {
    pub fn new(
        sessions: SessionManager,
        api_keys: ApiKeyManager,
        chat_sessions: ChatSessionManager,
        projects: Arc<dyn ProjectStore>,
    ) -> Self {
        Self {
            sessions,
            api_keys,
            chat_sessions,
            projects,
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn api_keys(&self) -> &ApiKeyManager {
        &self.api_keys
    }

    pub fn chat_sessions(&self) -> &ChatSessionManager {
        &self.chat_sessions
    }

    /// Resolve `credentials` under `policy`.
    ///
    /// Returns `Ok(None)` only for optional policies when no accepted
    /// credential was presented.
    pub async fn resolve(
        &self,
        credentials: &Credentials,
        policy: &AuthPolicy,
    ) -> Result<Option<AuthContext>, AuthError> {
        let Some(credential) = policy.select(credentials) else {
            if policy.is_optional() {
                return Ok(None);
            }
            return Err(AuthError::MissingCredentials);
        };

        let scheme = credential.scheme();
        let mut ctx = match credential {
            Credential::Session(id) => {
                self.sessions
                    .authorize(&id, credentials.admin_override.as_deref())
                    .await?
            }
            Credential::ApiKey(key) => {
                self.api_keys
                    .authorize(&key, policy.api_key_scope())
                    .await?
            }
            Credential::ChatSession(token) => self.chat_sessions.authorize(&token).await?,
        };

        self.select_project(&mut ctx, credentials.project_slug.as_deref())
            .await?;
        if let Some(pinned) = credentials.domain_project_id.as_deref() {
            self.pin_project(&mut ctx, pinned).await?;
        }
        if policy.project_required() && ctx.project_id.is_none() {
            return Err(AuthError::ProjectRequired);
        }

        debug!(
            auth.scheme = ?scheme,
            org.id = %ctx.active_organization_id,
            project.id = ctx.project_id.as_deref().unwrap_or(""),
            "request authenticated"
        );
        Ok(Some(ctx))
    }

    /// Narrow the context to the selected project.
    ///
    /// The slug is looked up inside the caller's organization. A principal
    /// already bound to a project (project-scoped key, chat-session token) may
    /// only select that same project.
    async fn select_project(
        &self,
        ctx: &mut AuthContext,
        slug: Option<&str>,
    ) -> Result<(), AuthError> {
        match slug.filter(|s| !s.is_empty()) {
            Some(slug) => {
                let project = self
                    .projects
                    .project_by_slug(&ctx.active_organization_id, slug)
                    .await?
                    .ok_or_else(|| AuthError::ProjectForbidden(slug.to_string()))?;

                if let Some(bound) = &ctx.project_id
                    && *bound != project.id
                {
                    return Err(AuthError::ProjectForbidden(slug.to_string()));
                }

                ctx.project_id = Some(project.id);
                ctx.project_slug = Some(project.slug);
            }
            None => {
                if let Some(id) = ctx.project_id.clone()
                    && ctx.project_slug.is_none()
                {
                    let project = self
                        .projects
                        .project_by_id(&id)
                        .await?
                        .ok_or(AuthError::ProjectForbidden(id))?;
                    ctx.project_slug = Some(project.slug);
                }
            }
        }
        Ok(())
    }

    /// Hold the context to the project a custom domain serves.
    ///
    /// A context already narrowed to another project is refused. An unbound
    /// one is narrowed to the domain's project if it belongs to the same
    /// organization.
    async fn pin_project(&self, ctx: &mut AuthContext, pinned: &str) -> Result<(), AuthError> {
        if let Some(bound) = &ctx.project_id {
            if bound != pinned {
                debug!(
                    project.id = %bound,
                    domain.project.id = %pinned,
                    "credential is bound to another project than the custom domain"
                );
                let label = ctx.project_slug.clone().unwrap_or_else(|| bound.clone());
                return Err(AuthError::ProjectForbidden(label));
            }
            return Ok(());
        }

        let project = self
            .projects
            .project_by_id(pinned)
            .await?
            .filter(|p| p.organization_id == ctx.active_organization_id)
            .ok_or_else(|| AuthError::ProjectForbidden(pinned.to_string()))?;
        ctx.project_id = Some(project.id);
        ctx.project_slug = Some(project.slug);
        Ok(())
    }
}
