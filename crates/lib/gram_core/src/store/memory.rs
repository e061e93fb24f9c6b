//! In-memory store for local development and tests.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use super::{ApiKeyStore, DomainStore, IdentityStore, ProjectStore, StoreError};
use crate::models::auth::{ApiKey, CachedUserInfo, OrganizationEntry, Project};
use crate::models::domains::{CustomDomain, NewCustomDomain};
use crate::uuid::uuidv7;

/// Implements every store trait over concurrent maps.
#[derive(Debug, Default)]
pub struct MemoryStore {
    domains: DashMap<String, CustomDomain>,
    api_keys: DashMap<String, ApiKey>,
    projects: DashMap<String, Project>,
    organizations: DashMap<String, OrganizationEntry>,
    users: DashMap<String, CachedUserInfo>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a binding as-is, including its verification state.
    pub fn insert_domain(&self, domain: CustomDomain) {
        self.domains.insert(domain.id.clone(), domain);
    }
}

#[async_trait]
impl DomainStore for MemoryStore {
    async fn domain_by_name(&self, domain: &str) -> Result<Option<CustomDomain>, StoreError> {
        Ok(self
            .domains
            .iter()
            .find(|d| d.domain == domain)
            .map(|d| d.clone()))
    }

    async fn domain_for_organization(
        &self,
        organization_id: &str,
    ) -> Result<Option<CustomDomain>, StoreError> {
        Ok(self
            .domains
            .iter()
            .find(|d| d.organization_id == organization_id)
            .map(|d| d.clone()))
    }

    async fn create_domain(&self, new: NewCustomDomain) -> Result<CustomDomain, StoreError> {
        let taken = self
            .domains
            .iter()
            .any(|d| d.domain == new.domain || d.organization_id == new.organization_id);
        if taken {
            return Err(StoreError::Conflict(format!(
                "domain {} is already registered",
                new.domain
            )));
        }

        let now = Utc::now();
        let domain = CustomDomain {
            id: uuidv7().to_string(),
            organization_id: new.organization_id,
            project_id: new.project_id,
            domain: new.domain,
            verified: false,
            activated: false,
            created_at: now,
            updated_at: now,
        };
        self.domains.insert(domain.id.clone(), domain.clone());
        Ok(domain)
    }

    async fn delete_domain(&self, organization_id: &str) -> Result<bool, StoreError> {
        let before = self.domains.len();
        self.domains
            .retain(|_, d| d.organization_id != organization_id);
        Ok(self.domains.len() < before)
    }
}

#[async_trait]
impl ApiKeyStore for MemoryStore {
    async fn api_key_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>, StoreError> {
        Ok(self
            .api_keys
            .get(key_hash)
            .filter(|k| k.deleted_at.is_none())
            .map(|k| k.clone()))
    }

    async fn create_api_key(&self, key: ApiKey) -> Result<(), StoreError> {
        if self.api_keys.contains_key(&key.key_hash) {
            return Err(StoreError::Conflict("api key already exists".into()));
        }
        self.api_keys.insert(key.key_hash.clone(), key);
        Ok(())
    }
}

#[async_trait]
impl ProjectStore for MemoryStore {
    async fn project_by_slug(
        &self,
        organization_id: &str,
        slug: &str,
    ) -> Result<Option<Project>, StoreError> {
        Ok(self
            .projects
            .iter()
            .find(|p| p.organization_id == organization_id && p.slug == slug)
            .map(|p| p.clone()))
    }

    async fn project_by_id(&self, id: &str) -> Result<Option<Project>, StoreError> {
        Ok(self.projects.get(id).map(|p| p.clone()))
    }

    async fn upsert_project(&self, project: Project) -> Result<(), StoreError> {
        self.projects.insert(project.id.clone(), project);
        Ok(())
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn user_info(&self, user_id: &str) -> Result<Option<CachedUserInfo>, StoreError> {
        Ok(self.users.get(user_id).map(|u| u.clone()))
    }

    async fn organization_by_id(&self, id: &str) -> Result<Option<OrganizationEntry>, StoreError> {
        Ok(self.organizations.get(id).map(|o| o.clone()))
    }

    async fn organization_by_slug(
        &self,
        slug: &str,
    ) -> Result<Option<OrganizationEntry>, StoreError> {
        Ok(self
            .organizations
            .iter()
            .find(|o| o.slug == slug)
            .map(|o| o.clone()))
    }

    async fn upsert_user(&self, info: &CachedUserInfo) -> Result<(), StoreError> {
        for org in &info.organizations {
            self.organizations.insert(org.id.clone(), org.clone());
        }
        self.users.insert(info.user_id.clone(), info.clone());
        Ok(())
    }
}
