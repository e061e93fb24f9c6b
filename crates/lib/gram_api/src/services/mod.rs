//! Request-independent helpers used by handlers and middleware.

pub mod cookies;
pub mod mcp;
