//! Authentication middleware.
//!
//! Gathers every credential the request carried, resolves it under the
//! endpoint's policy and injects the resulting [`AuthContext`] into request
//! extensions. Optional endpoints may run without one. On a custom domain the
//! context is held to the project the domain serves.
//!
//! [`AuthContext`]: gram_core::auth::AuthContext

use std::sync::Arc;

use axum::extract::{FromRequestParts, RawPathParams, Request, State};
use axum::middleware::Next;
use axum::response::Response;

use super::endpoint::EndpointAuth;
use crate::AppState;
use crate::context::{AdminOverride, CustomDomainContext, SessionToken};
use crate::error::ApiError;
use crate::services::cookies;

/// Axum middleware: resolve credentials into an `AuthContext`.
pub async fn authenticate(
    State((state, auth)): State<(AppState, Arc<EndpointAuth>)>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let (mut parts, body) = request.into_parts();

    let mut credentials = cookies::credentials(
        &parts.headers,
        parts.extensions.get::<SessionToken>(),
        parts.extensions.get::<AdminOverride>(),
    );

    if let Some(param) = auth.project_param
        && let Ok(params) = RawPathParams::from_request_parts(&mut parts, &()).await
        && let Some((_, slug)) = params.iter().find(|(name, _)| *name == param)
    {
        credentials.project_slug = Some(slug.to_string());
    }

    credentials.domain_project_id = parts
        .extensions
        .get::<CustomDomainContext>()
        .map(|domain| domain.project_id.clone());

    let ctx = state.auth.resolve(&credentials, &auth.policy).await?;

    let mut request = Request::from_parts(parts, body);
    if let Some(ctx) = ctx {
        request.extensions_mut().insert(ctx);
    }
    Ok(next.run(request).await)
}
