//! Persistence collaborators consumed by admission and authorization.
//!
//! Each concern is a small async trait so the HTTP layer can run over
//! PostgreSQL in deployed environments and over [`MemoryStore`] in local
//! development and tests.

pub mod memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::auth::{ApiKey, CachedUserInfo, OrganizationEntry, Project};
use crate::models::domains::{CustomDomain, NewCustomDomain};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

/// Custom domain bindings.
#[async_trait]
pub trait DomainStore: Send + Sync {
    /// Look up a live (not deleted) binding by host name.
    async fn domain_by_name(&self, domain: &str) -> Result<Option<CustomDomain>, StoreError>;

    /// The live binding owned by an organization, if any.
    async fn domain_for_organization(
        &self,
        organization_id: &str,
    ) -> Result<Option<CustomDomain>, StoreError>;

    /// Register a new, unverified binding. Fails with [`StoreError::Conflict`]
    /// when the organization already has one or the name is taken.
    async fn create_domain(&self, new: NewCustomDomain) -> Result<CustomDomain, StoreError>;

    /// Soft-delete the organization's binding. Returns whether one existed.
    async fn delete_domain(&self, organization_id: &str) -> Result<bool, StoreError>;
}

/// API key records.
#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    /// Look up a live key by the SHA-256 digest of its plaintext.
    async fn api_key_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>, StoreError>;

    async fn create_api_key(&self, key: ApiKey) -> Result<(), StoreError>;
}

/// Projects.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn project_by_slug(
        &self,
        organization_id: &str,
        slug: &str,
    ) -> Result<Option<Project>, StoreError>;

    async fn project_by_id(&self, id: &str) -> Result<Option<Project>, StoreError>;

    /// Insert or update a project keyed by id.
    async fn upsert_project(&self, project: Project) -> Result<(), StoreError>;
}

/// Users, organizations and memberships.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Profile and memberships of a user.
    async fn user_info(&self, user_id: &str) -> Result<Option<CachedUserInfo>, StoreError>;

    async fn organization_by_id(&self, id: &str) -> Result<Option<OrganizationEntry>, StoreError>;

    async fn organization_by_slug(
        &self,
        slug: &str,
    ) -> Result<Option<OrganizationEntry>, StoreError>;

    /// Insert or update the user, every listed organization and the memberships.
    async fn upsert_user(&self, info: &CachedUserInfo) -> Result<(), StoreError>;
}

/// The set of stores the server runs over.
#[derive(Clone)]
pub struct Stores {
    pub domains: Arc<dyn DomainStore>,
    pub api_keys: Arc<dyn ApiKeyStore>,
    pub projects: Arc<dyn ProjectStore>,
    pub identities: Arc<dyn IdentityStore>,
}

impl Stores {
    /// Every store backed by one shared [`MemoryStore`].
    pub fn memory() -> (Self, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (Self::from_shared(Arc::clone(&store)), store)
    }

    /// Every store backed by PostgreSQL.
    pub fn postgres(pool: sqlx::PgPool) -> Self {
        Self::from_shared(Arc::new(PgStore::new(pool)))
    }

    fn from_shared<S>(store: Arc<S>) -> Self
    where
        S: DomainStore + ApiKeyStore + ProjectStore + IdentityStore + 'static,
    {
        Self {
            domains: store.clone(),
            api_keys: store.clone(),
            projects: store.clone(),
            identities: store,
        }
    }
}
