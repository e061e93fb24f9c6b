//! # gram_core
//!
//! Core domain logic for Gram: signed chat-session tokens, the typed cache
//! they are revoked through, dashboard sessions, API keys and the resolver
//! that turns any of those credentials into an [`auth::AuthContext`].
//!
//! Nothing in this crate knows about HTTP.

pub mod auth;
pub mod cache;
pub mod chat_sessions;
pub mod models;
pub mod store;
pub mod uuid;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_not_empty() {
        assert!(!version().is_empty());
    }
}
