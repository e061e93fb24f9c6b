//! PostgreSQL store.
//!
//! Ids are stored as `UUID` for projects, keys and domains and as `TEXT` for
//! organizations and users (those ids come from the identity provider).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use super::{ApiKeyStore, DomainStore, IdentityStore, ProjectStore, StoreError};
use crate::models::auth::{ACCOUNT_TYPES, ApiKey, CachedUserInfo, OrganizationEntry, Project};
use crate::models::domains::{CustomDomain, NewCustomDomain};
use crate::uuid::uuidv7;

type DomainRow = (
    String,
    String,
    String,
    String,
    bool,
    bool,
    DateTime<Utc>,
    DateTime<Utc>,
);

type ApiKeyRow = (
    String,
    String,
    Option<String>,
    String,
    String,
    String,
    String,
    Vec<String>,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
);

const DOMAIN_COLUMNS: &str = "id::text, organization_id, project_id::text, domain, \
                              verified, activated, created_at, updated_at";

/// Implements every store trait over a PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool against `database_url`.
    pub async fn connect(database_url: &str) -> Result<PgPool, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(pool)
    }

    /// Run the embedded migrations in `gram_core/migrations/`.
    pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(pool).await?;
        info!("database migrations applied");
        Ok(())
    }
}

fn domain_from_row(row: DomainRow) -> CustomDomain {
    let (id, organization_id, project_id, domain, verified, activated, created_at, updated_at) =
        row;
    CustomDomain {
        id,
        organization_id,
        project_id,
        domain,
        verified,
        activated,
        created_at,
        updated_at,
    }
}

fn api_key_from_row(row: ApiKeyRow) -> ApiKey {
    let (
        id,
        organization_id,
        project_id,
        created_by_user_id,
        name,
        key_prefix,
        key_hash,
        scopes,
        created_at,
        deleted_at,
    ) = row;
    ApiKey {
        id,
        organization_id,
        project_id,
        created_by_user_id,
        name,
        key_prefix,
        key_hash,
        scopes,
        created_at,
        deleted_at,
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl DomainStore for PgStore {
    async fn domain_by_name(&self, domain: &str) -> Result<Option<CustomDomain>, StoreError> {
        let row = sqlx::query_as::<_, DomainRow>(&format!(
            "SELECT {DOMAIN_COLUMNS} FROM custom_domains \
             WHERE domain = $1 AND deleted_at IS NULL"
        ))
        .bind(domain)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(domain_from_row))
    }

    async fn domain_for_organization(
        &self,
        organization_id: &str,
    ) -> Result<Option<CustomDomain>, StoreError> {
        let row = sqlx::query_as::<_, DomainRow>(&format!(
            "SELECT {DOMAIN_COLUMNS} FROM custom_domains \
             WHERE organization_id = $1 AND deleted_at IS NULL"
        ))
        .bind(organization_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(domain_from_row))
    }

    async fn create_domain(&self, new: NewCustomDomain) -> Result<CustomDomain, StoreError> {
        let row = sqlx::query_as::<_, DomainRow>(&format!(
            "INSERT INTO custom_domains (id, organization_id, project_id, domain) \
             VALUES ($1, $2, $3::uuid, $4) \
             RETURNING {DOMAIN_COLUMNS}"
        ))
        .bind(uuidv7())
        .bind(&new.organization_id)
        .bind(&new.project_id)
        .bind(&new.domain)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Conflict(format!("domain {} is already registered", new.domain))
            } else {
                StoreError::Db(e)
            }
        })?;
        Ok(domain_from_row(row))
    }

    async fn delete_domain(&self, organization_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE custom_domains SET deleted_at = now(), updated_at = now() \
             WHERE organization_id = $1 AND deleted_at IS NULL",
        )
        .bind(organization_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl ApiKeyStore for PgStore {
    async fn api_key_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>, StoreError> {
        let row = sqlx::query_as::<_, ApiKeyRow>(
            "SELECT id::text, organization_id, project_id::text, created_by_user_id, name, \
                    key_prefix, key_hash, scopes, created_at, deleted_at \
             FROM api_keys WHERE key_hash = $1 AND deleted_at IS NULL",
        )
        .bind(key_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(api_key_from_row))
    }

    async fn create_api_key(&self, key: ApiKey) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO api_keys \
             (id, organization_id, project_id, created_by_user_id, name, key_prefix, key_hash, scopes, created_at) \
             VALUES ($1::uuid, $2, $3::uuid, $4, $5, $6, $7, $8, $9)",
        )
        .bind(&key.id)
        .bind(&key.organization_id)
        .bind(&key.project_id)
        .bind(&key.created_by_user_id)
        .bind(&key.name)
        .bind(&key.key_prefix)
        .bind(&key.key_hash)
        .bind(&key.scopes)
        .bind(key.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Conflict("api key already exists".into())
            } else {
                StoreError::Db(e)
            }
        })?;
        Ok(())
    }
}

#[async_trait]
impl ProjectStore for PgStore {
    async fn project_by_slug(
        &self,
        organization_id: &str,
        slug: &str,
    ) -> Result<Option<Project>, StoreError> {
        let row = sqlx::query_as::<_, (String, String, String, String)>(
            "SELECT id::text, organization_id, slug, name FROM projects \
             WHERE organization_id = $1 AND slug = $2",
        )
        .bind(organization_id)
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id, organization_id, slug, name)| Project {
            id,
            organization_id,
            slug,
            name,
        }))
    }

    async fn project_by_id(&self, id: &str) -> Result<Option<Project>, StoreError> {
        let row = sqlx::query_as::<_, (String, String, String, String)>(
            "SELECT id::text, organization_id, slug, name FROM projects WHERE id::text = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id, organization_id, slug, name)| Project {
            id,
            organization_id,
            slug,
            name,
        }))
    }

    async fn upsert_project(&self, project: Project) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO projects (id, organization_id, slug, name) \
             VALUES ($1::uuid, $2, $3, $4) \
             ON CONFLICT (id) DO UPDATE SET slug = EXCLUDED.slug, name = EXCLUDED.name",
        )
        .bind(&project.id)
        .bind(&project.organization_id)
        .bind(&project.slug)
        .bind(&project.name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl IdentityStore for PgStore {
    async fn user_info(&self, user_id: &str) -> Result<Option<CachedUserInfo>, StoreError> {
        let Some((email, admin)) = sqlx::query_as::<_, (String, bool)>(
            "SELECT email, admin FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let organizations = sqlx::query_as::<_, (String, String, String, String)>(
            "SELECT o.id, o.name, o.slug, o.account_type \
             FROM organizations o \
             JOIN organization_users ou ON ou.organization_id = o.id \
             WHERE ou.user_id = $1 \
             ORDER BY ou.created_at",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|(id, name, slug, account_type)| OrganizationEntry {
            id,
            name,
            slug,
            account_type,
        })
        .collect();

        Ok(Some(CachedUserInfo {
            user_id: user_id.to_string(),
            email,
            admin,
            organizations,
        }))
    }

    async fn organization_by_id(&self, id: &str) -> Result<Option<OrganizationEntry>, StoreError> {
        let row = sqlx::query_as::<_, (String, String, String, String)>(
            "SELECT id, name, slug, account_type FROM organizations WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id, name, slug, account_type)| OrganizationEntry {
            id,
            name,
            slug,
            account_type,
        }))
    }

    async fn organization_by_slug(
        &self,
        slug: &str,
    ) -> Result<Option<OrganizationEntry>, StoreError> {
        let row = sqlx::query_as::<_, (String, String, String, String)>(
            "SELECT id, name, slug, account_type FROM organizations WHERE slug = $1",
        )
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id, name, slug, account_type)| OrganizationEntry {
            id,
            name,
            slug,
            account_type,
        }))
    }

    async fn upsert_user(&self, info: &CachedUserInfo) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO users (id, email, admin) VALUES ($1, $2, $3) \
             ON CONFLICT (id) DO UPDATE SET email = EXCLUDED.email, admin = EXCLUDED.admin, \
             updated_at = now()",
        )
        .bind(&info.user_id)
        .bind(&info.email)
        .bind(info.admin)
        .execute(&mut *tx)
        .await?;

        for org in &info.organizations {
            let account_type = if ACCOUNT_TYPES.contains(&org.account_type.as_str()) {
                org.account_type.as_str()
            } else {
                "free"
            };

            sqlx::query(
                "INSERT INTO organizations (id, name, slug, account_type) VALUES ($1, $2, $3, $4) \
                 ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, slug = EXCLUDED.slug, \
                 account_type = EXCLUDED.account_type, updated_at = now()",
            )
            .bind(&org.id)
            .bind(&org.name)
            .bind(&org.slug)
            .bind(account_type)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "INSERT INTO organization_users (organization_id, user_id) VALUES ($1, $2) \
                 ON CONFLICT DO NOTHING",
            )
            .bind(&org.id)
            .bind(&info.user_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}
