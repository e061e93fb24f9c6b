//! Session and admin-override extraction.
//!
//! Both only read headers and cookies. Nothing is verified here; the auth
//! middleware decides what the values are worth.

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;

use crate::context::{AdminOverride, SessionToken};
use crate::services::cookies;

/// Axum middleware: attach the presented session id, if any.
pub async fn extract_session(mut request: Request, next: Next) -> Response {
    if let Some(token) = cookies::session_token(request.headers()) {
        request.extensions_mut().insert(SessionToken(token));
    }
    next.run(request).await
}

/// Axum middleware: attach the requested admin override, if any.
pub async fn extract_admin_override(mut request: Request, next: Next) -> Response {
    if let Some(slug) = cookies::admin_override(request.headers()) {
        request.extensions_mut().insert(AdminOverride(slug));
    }
    next.run(request).await
}
