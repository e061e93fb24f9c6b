//! Local development identities.
//!
//! In the `local` environment there is no identity provider. A JSON file maps
//! user ids to a profile and their organizations; it seeds the identity and
//! project stores and a default session so the dashboard endpoints can be
//! exercised straight away.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use super::AuthError;
use super::sessions::SessionManager;
use crate::models::auth::{ACCOUNT_TYPES, CachedUserInfo, OrganizationEntry, Project, Session};
use crate::store::{IdentityStore, ProjectStore, StoreError};
use crate::uuid::uuidv7;

const DEFAULT_LOCAL_ENV: &str = r#"
{
  "1245": {
    "user_email": "user@example.com",
    "admin": false,
    "organizations": [
      {
        "organization_id": "550e8400-e29b-41d4-a716-446655440000",
        "organization_name": "Organization 123",
        "organization_slug": "organization-123",
        "account_type": "enterprise",
        "projects": [{ "slug": "default", "name": "Default" }]
      },
      {
        "organization_id": "e0395991-d5c5-4c2f-8c3b-4eae305524ed",
        "organization_name": "Organization 456",
        "organization_slug": "organization-456",
        "account_type": "enterprise"
      }
    ]
  }
}
"#;

/// Local identity file errors.
#[derive(Debug, Error)]
pub enum LocalEnvError {
    #[error("failed to read local env file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse local env file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("local env file lists no users with an organization")]
    Empty,

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocalUser {
    pub user_email: String,
    #[serde(default)]
    pub admin: bool,
    pub organizations: Vec<LocalOrganization>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocalOrganization {
    pub organization_id: String,
    pub organization_name: String,
    pub organization_slug: String,
    #[serde(default)]
    pub account_type: String,
    #[serde(default)]
    pub projects: Vec<LocalProject>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocalProject {
    pub slug: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Parsed identity file, keyed by user id.
pub type LocalEnv = BTreeMap<String, LocalUser>;

/// Read the identity file at `path`, falling back to the built-in one when no
/// path is given or the file cannot be opened.
pub fn load_local_env(path: Option<&Path>) -> Result<LocalEnv, LocalEnvError> {
    let raw = match path {
        Some(path) => match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to open local env file, using built-in identities");
                DEFAULT_LOCAL_ENV.to_string()
            }
        },
        None => DEFAULT_LOCAL_ENV.to_string(),
    };
    Ok(serde_json::from_str(&raw)?)
}

/// What seeding produced.
#[derive(Debug, Clone)]
pub struct LocalSeed {
    pub session: Session,
    pub projects: Vec<Project>,
}

/// Write every user, organization and project from `env` into the stores and
/// open a session for the first user in their first organization.
pub async fn seed_local_env(
    env: &LocalEnv,
    identities: &Arc<dyn IdentityStore>,
    projects: &Arc<dyn ProjectStore>,
    sessions: &SessionManager,
) -> Result<LocalSeed, LocalEnvError> {
    let mut seeded_projects = Vec::new();
    let mut default_session = None;

    for (user_id, user) in env {
        let info = CachedUserInfo {
            user_id: user_id.clone(),
            email: user.user_email.clone(),
            admin: user.admin,
            organizations: user.organizations.iter().map(organization_entry).collect(),
        };
        identities.upsert_user(&info).await?;
        sessions.invalidate_user_info(user_id).await?;

        for org in &user.organizations {
            for project in &org.projects {
                seeded_projects.push(ensure_project(projects, org, project).await?);
            }
        }

        if default_session.is_none()
            && let Some(first) = user.organizations.first()
        {
            default_session = Some(
                sessions
                    .create_session(user_id, &first.organization_id)
                    .await?,
            );
        }
    }

    let session = default_session.ok_or(LocalEnvError::Empty)?;
    info!(
        session.id = %session.session_id,
        user.id = %session.user_id,
        "local development session ready"
    );

    Ok(LocalSeed {
        session,
        projects: seeded_projects,
    })
}

fn organization_entry(org: &LocalOrganization) -> OrganizationEntry {
    let account_type = if ACCOUNT_TYPES.contains(&org.account_type.as_str()) {
        org.account_type.clone()
    } else {
        "free".to_string()
    };
    OrganizationEntry {
        id: org.organization_id.clone(),
        name: org.organization_name.clone(),
        slug: org.organization_slug.clone(),
        account_type,
    }
}

async fn ensure_project(
    projects: &Arc<dyn ProjectStore>,
    org: &LocalOrganization,
    project: &LocalProject,
) -> Result<Project, StoreError> {
    if let Some(existing) = projects
        .project_by_slug(&org.organization_id, &project.slug)
        .await?
    {
        return Ok(existing);
    }

    let created = Project {
        id: uuidv7().to_string(),
        organization_id: org.organization_id.clone(),
        slug: project.slug.clone(),
        name: project.name.clone().unwrap_or_else(|| project.slug.clone()),
    };
    projects.upsert_project(created.clone()).await?;
    Ok(created)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::cache::MemoryCache;
    use crate::store::Stores;

    #[test]
    fn built_in_env_parses() {
        let env = load_local_env(None).unwrap();
        let user = env.get("1245").unwrap();
        assert_eq!(user.organizations.len(), 2);
        assert_eq!(user.organizations[0].projects[0].slug, "default");
    }

    #[test]
    fn unreadable_path_falls_back_to_built_in() {
        let env = load_local_env(Some(Path::new("/definitely/not/here.json"))).unwrap();
        assert!(env.contains_key("1245"));
    }

    #[test]
    fn file_contents_are_used() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"u9": {{"user_email": "nine@example.com", "admin": true, "organizations": [
                {{"organization_id": "o9", "organization_name": "Nine", "organization_slug": "nine", "account_type": "platinum"}}
            ]}}}}"#
        )
        .unwrap();

        let env = load_local_env(Some(file.path())).unwrap();
        let user = env.get("u9").unwrap();
        assert!(user.admin);
        assert_eq!(organization_entry(&user.organizations[0]).account_type, "free");
    }

    #[test]
    fn invalid_json_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ nope").unwrap();
        assert!(matches!(
            load_local_env(Some(file.path())),
            Err(LocalEnvError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn seeding_creates_a_usable_session() {
        let (stores, _) = Stores::memory();
        let sessions = SessionManager::new(Arc::new(MemoryCache::new()), stores.identities.clone());
        let env = load_local_env(None).unwrap();

        let seed = seed_local_env(&env, &stores.identities, &stores.projects, &sessions)
            .await
            .unwrap();
        assert_eq!(seed.projects.len(), 1);

        let ctx = sessions
            .authorize(&seed.session.session_id, None)
            .await
            .unwrap();
        assert_eq!(ctx.organization_slug, "organization-123");

        let again = seed_local_env(&env, &stores.identities, &stores.projects, &sessions)
            .await
            .unwrap();
        assert_eq!(again.projects[0].id, seed.projects[0].id);
    }
}
