//! Authentication and authorization.
//!
//! Credentials arrive in several shapes (dashboard session, API key,
//! chat-session token). Each is checked by its own manager and projected into
//! the same [`AuthContext`], which is what handlers consume. The
//! [`resolver::AuthResolver`] picks the credential to use for an endpoint
//! according to its [`AuthPolicy`].

pub mod jwt;
pub mod keys;
pub mod local;
pub mod resolver;
pub mod sessions;

use serde::Serialize;
use thiserror::Error;

use crate::cache::CacheError;
use crate::chat_sessions::ChatSessionError;
use crate::store::StoreError;

pub use keys::ApiKeyScope;

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no accepted credential was presented")]
    MissingCredentials,

    #[error("session is invalid or has expired")]
    InvalidSession,

    #[error("api key is invalid")]
    InvalidApiKey,

    #[error(transparent)]
    ChatSession(#[from] ChatSessionError),

    #[error("api key lacks the required scope: {0}")]
    MissingScope(ApiKeyScope),

    #[error("a project must be selected")]
    ProjectRequired,

    #[error("project is not accessible: {0}")]
    ProjectForbidden(String),

    #[error("organization is not accessible")]
    OrganizationForbidden,

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
}

/// The authenticated principal for one request.
///
/// `session_id` is set only for dashboard sessions. API-key and chat-session
/// requests leave it unset, so `session_id.is_some()` is the test for
/// "dashboard-authenticated".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthContext {
    pub active_organization_id: String,
    pub project_id: Option<String>,
    pub organization_slug: String,
    pub project_slug: Option<String>,
    pub user_id: String,
    pub external_user_id: String,
    pub email: Option<String>,
    pub account_type: String,
    pub api_key_scopes: Vec<String>,
    pub session_id: Option<String>,
    pub api_key_id: Option<String>,
}

impl AuthContext {
    /// True when the caller authenticated with a dashboard session.
    pub fn is_dashboard(&self) -> bool {
        self.session_id.is_some()
    }

    pub fn has_scope(&self, scope: ApiKeyScope) -> bool {
        self.api_key_scopes.iter().any(|s| s == scope.as_str())
    }
}

/// Credential kinds, in resolution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Session,
    ApiKey,
    ChatSession,
}

impl Scheme {
    pub const ALL: [Scheme; 3] = [Scheme::Session, Scheme::ApiKey, Scheme::ChatSession];
}

/// A single credential taken from a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    Session(String),
    ApiKey(String),
    ChatSession(String),
}

impl Credential {
    pub fn scheme(&self) -> Scheme {
        match self {
            Credential::Session(_) => Scheme::Session,
            Credential::ApiKey(_) => Scheme::ApiKey,
            Credential::ChatSession(_) => Scheme::ChatSession,
        }
    }
}

/// Everything auth-related a request carried, before any of it is checked.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub session: Option<String>,
    pub api_key: Option<String>,
    pub chat_session: Option<String>,
    /// Tenancy selector, from the `Gram-Project` header or a path parameter.
    pub project_slug: Option<String>,
    /// Organization slug an admin asked to act as.
    pub admin_override: Option<String>,
    /// Project the request's custom domain is bound to.
    pub domain_project_id: Option<String>,
}

impl Credentials {
    /// The credential presented for `scheme`, if any.
    pub fn get(&self, scheme: Scheme) -> Option<Credential> {
        let value = match scheme {
            Scheme::Session => self.session.as_ref(),
            Scheme::ApiKey => self.api_key.as_ref(),
            Scheme::ChatSession => self.chat_session.as_ref(),
        }?;
        if value.is_empty() {
            return None;
        }
        Some(match scheme {
            Scheme::Session => Credential::Session(value.clone()),
            Scheme::ApiKey => Credential::ApiKey(value.clone()),
            Scheme::ChatSession => Credential::ChatSession(value.clone()),
        })
    }
}

/// What an endpoint accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthPolicy {
    accepts: Vec<Scheme>,
    api_key_scope: Option<ApiKeyScope>,
    require_project: bool,
    optional: bool,
}

impl AuthPolicy {
    /// A policy accepting nothing yet; add schemes with [`AuthPolicy::accept`].
    pub fn new() -> Self {
        Self {
            accepts: Vec::new(),
            api_key_scope: None,
            require_project: false,
            optional: false,
        }
    }

    /// Dashboard session plus a selected project.
    pub fn session_project() -> Self {
        Self::new().accept(Scheme::Session).require_project()
    }

    pub fn accept(mut self, scheme: Scheme) -> Self {
        if !self.accepts.contains(&scheme) {
            self.accepts.push(scheme);
        }
        self
    }

    /// Accept API keys carrying `scope`.
    pub fn api_key(self, scope: ApiKeyScope) -> Self {
        let mut policy = self.accept(Scheme::ApiKey);
        policy.api_key_scope = Some(scope);
        policy
    }

    pub fn require_project(mut self) -> Self {
        self.require_project = true;
        self
    }

    /// Let requests without any accepted credential through unauthenticated.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn accepts(&self, scheme: Scheme) -> bool {
        self.accepts.contains(&scheme)
    }

    pub fn api_key_scope(&self) -> Option<ApiKeyScope> {
        self.api_key_scope
    }

    pub fn project_required(&self) -> bool {
        self.require_project
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    /// The first presented credential of an accepted kind, in resolution order.
    pub fn select(&self, credentials: &Credentials) -> Option<Credential> {
        Scheme::ALL
            .into_iter()
            .filter(|scheme| self.accepts(*scheme))
            .find_map(|scheme| credentials.get(scheme))
    }
}

impl Default for AuthPolicy {
    fn default() -> Self {
        Self::new()
    }
}
