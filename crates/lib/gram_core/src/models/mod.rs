//! Domain models shared by the stores, caches and the HTTP layer.

pub mod auth;
pub mod domains;
