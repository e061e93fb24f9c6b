//! CORS negotiation, including chat-session origin binding.
//!
//! One middleware with two modes. Preflight requests are answered here with
//! `204` and the requested origin echoed, before any credential is looked at,
//! because the audience needed to decide the origin is only on the real
//! request. On real requests that carry a chat-session token the token is
//! validated and the `Origin` must be in its audience; other requests follow
//! the default policy.

use axum::extract::{Request, State};
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_EXPOSE_HEADERS, ACCESS_CONTROL_MAX_AGE, ORIGIN,
    VARY,
};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::debug;
use url::Url;

use super::endpoint::log_report;
use crate::AppState;
use crate::config::ApiConfig;
use crate::error::{ApiError, ErrorReport};
use crate::services::cookies::chat_session_token;

/// Methods allowed cross-origin.
pub const ALLOWED_METHODS: &str = "GET, POST, PUT, PATCH, DELETE, OPTIONS";

/// Request headers allowed cross-origin.
pub const ALLOWED_HEADERS: &str = "Authorization, Content-Type, Gram-Session, Gram-Project, \
     Gram-Token, idempotency-key, Gram-Chat-Session, Gram-Admin-Override, MCP-Environment, \
     Mcp-Session-Id, traceparent";

/// Response headers exposed cross-origin.
pub const EXPOSED_HEADERS: &str = "Content-Type, Gram-Session, Gram-Project, Gram-Token, \
     idempotency-key, Mcp-Session-Id, traceparent";

const PREFLIGHT_MAX_AGE: &str = "600";

fn request_origin(headers: &HeaderMap) -> Option<String> {
    headers
        .get(ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|o| !o.is_empty() && *o != "null")
        .map(str::to_string)
}

/// Origin allowed by the default policy: any `localhost` origin in local
/// development, plus the configured allowlist everywhere.
pub fn default_policy_allows(config: &ApiConfig, origin: &str) -> bool {
    if config.cors_allowed_origins.iter().any(|o| o == origin) {
        return true;
    }
    if !config.environment.is_local() {
        return false;
    }
    Url::parse(origin)
        .ok()
        .and_then(|u| u.host_str().map(|h| h == "localhost" || h == "127.0.0.1"))
        .unwrap_or(false)
}

fn set_cors_headers(headers: &mut HeaderMap, origin: &str) {
    let Ok(origin) = HeaderValue::from_str(origin) else {
        return;
    };
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    headers.insert(
        ACCESS_CONTROL_ALLOW_CREDENTIALS,
        HeaderValue::from_static("true"),
    );
    headers.insert(
        ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static(EXPOSED_HEADERS),
    );
    headers.append(VARY, HeaderValue::from_static("Origin"));
}

fn preflight(origin: Option<&str>) -> Response {
    let mut response = StatusCode::NO_CONTENT.into_response();
    let headers = response.headers_mut();
    if let Some(origin) = origin {
        set_cors_headers(headers, origin);
    }
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOWED_METHODS),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOWED_HEADERS),
    );
    headers.insert(
        ACCESS_CONTROL_MAX_AGE,
        HeaderValue::from_static(PREFLIGHT_MAX_AGE),
    );
    response
}

/// Axum middleware: CORS and chat-session origin binding.
///
/// Errors raised here are logged here; no endpoint middleware wraps this layer.
pub async fn cors(State(state): State<AppState>, request: Request, next: Next) -> Response {
    match negotiate(&state, request, next).await {
        Ok(response) => response,
        Err(e) => {
            let response = e.into_response();
            if let Some(report) = response.extensions().get::<ErrorReport>() {
                log_report(report);
            }
            response
        }
    }
}

async fn negotiate(state: &AppState, request: Request, next: Next) -> Result<Response, ApiError> {
    let origin = request_origin(request.headers());

    if request.method() == Method::OPTIONS {
        return Ok(preflight(origin.as_deref()));
    }

    if let Some(token) = chat_session_token(request.headers()) {
        let claims = state
            .auth
            .chat_sessions()
            .validate_token(&token)
            .await
            .map_err(ApiError::from)?;

        let Some(origin) = origin.filter(|o| claims.aud.iter().any(|aud| aud == o)) else {
            debug!(jti = %claims.jti, "request origin is not in chat session audience");
            return Err(ApiError::forbidden("origin is not allowed for this chat session"));
        };

        let mut response = next.run(request).await;
        set_cors_headers(response.headers_mut(), &origin);
        return Ok(response);
    }

    let allowed = origin.filter(|o| default_policy_allows(&state.config, o));
    let mut response = next.run(request).await;
    if let Some(origin) = allowed {
        set_cors_headers(response.headers_mut(), &origin);
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;

    fn config(env: Environment) -> ApiConfig {
        ApiConfig::new(env, Url::parse("https://app.getgram.ai").unwrap())
    }

    #[test]
    fn local_allows_any_localhost_port() {
        let local = config(Environment::Local);
        assert!(default_policy_allows(&local, "http://localhost:5173"));
        assert!(default_policy_allows(&local, "http://127.0.0.1:3000"));
        assert!(!default_policy_allows(&local, "https://evil.example"));
    }

    #[test]
    fn prod_uses_allowlist_only() {
        let prod = config(Environment::Prod);
        assert!(default_policy_allows(&prod, "https://app.getgram.ai"));
        assert!(!default_policy_allows(&prod, "http://localhost:5173"));
    }

    #[test]
    fn preflight_echoes_origin() {
        let response = preflight(Some("https://anything"));
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(
            response.headers()[ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://anything"
        );
        assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
        assert!(
            response.headers()[ACCESS_CONTROL_ALLOW_HEADERS]
                .to_str()
                .unwrap()
                .contains("Gram-Project")
        );
    }
}
