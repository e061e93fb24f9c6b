//! Request handlers.

pub mod chat_sessions;
pub mod domains;
pub mod health;
pub mod mcp;
