//! Identity and credential models.
//!
//! These are internal domain models, distinct from the request/response
//! bodies the HTTP layer serializes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Account tiers an organization may be on.
pub const ACCOUNT_TYPES: [&str; 3] = ["free", "pro", "enterprise"];

/// A dashboard session, kept in the cache under `session:{session_id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub user_id: String,
    pub active_organization_id: String,
}

/// An organization as seen from a user's membership list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationEntry {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub account_type: String,
}

/// User profile and memberships, kept in the cache under `user_info:{user_id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedUserInfo {
    pub user_id: String,
    pub email: String,
    pub admin: bool,
    pub organizations: Vec<OrganizationEntry>,
}

/// A project inside an organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub organization_id: String,
    pub slug: String,
    pub name: String,
}

/// API key record. Only the SHA-256 digest of the key is ever stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: String,
    pub organization_id: String,
    /// When set, the key is only valid for this project.
    pub project_id: Option<String>,
    pub created_by_user_id: String,
    pub name: String,
    /// Display prefix, e.g. `gram_live_a1b2c`.
    pub key_prefix: String,
    pub key_hash: String,
    pub scopes: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}
