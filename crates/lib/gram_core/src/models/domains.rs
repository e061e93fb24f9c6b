//! Custom domain models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A tenant-owned host name that routes to the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomDomain {
    pub id: String,
    pub organization_id: String,
    pub project_id: String,
    pub domain: String,
    pub verified: bool,
    pub activated: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CustomDomain {
    /// A domain admits traffic only once it is both verified and activated.
    pub fn is_admissible(&self) -> bool {
        self.verified && self.activated
    }
}

/// Input for registering a domain.
#[derive(Debug, Clone)]
pub struct NewCustomDomain {
    pub organization_id: String,
    pub project_id: String,
    pub domain: String,
}

/// Normalize and validate a host name for registration.
///
/// Accepts lower-case DNS names with at least two labels; each label is
/// 1-63 characters of `[a-z0-9-]` and does not start or end with `-`.
pub fn normalize_domain(raw: &str) -> Result<String, String> {
    let domain = raw.trim().trim_end_matches('.').to_ascii_lowercase();

    if domain.is_empty() {
        return Err("domain must not be empty".into());
    }
    if domain.len() > 253 {
        return Err("domain is too long".into());
    }

    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 {
        return Err("domain must have at least two labels".into());
    }

    for label in &labels {
        if label.is_empty() || label.len() > 63 {
            return Err(format!("invalid label length in {domain}"));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(format!("label may not start or end with '-' in {domain}"));
        }
        if !label
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(format!("invalid character in {domain}"));
        }
    }

    Ok(domain)
}
