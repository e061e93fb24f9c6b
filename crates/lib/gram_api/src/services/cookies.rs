//! Request header and cookie names, and credential extraction from them.

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum_extra::extract::cookie::CookieJar;
use gram_core::auth::Credentials;
use gram_core::auth::jwt::looks_like_jwt;

use crate::context::{AdminOverride, SessionToken};

/// Session id header, mirroring the session cookie.
pub const SESSION_HEADER: &str = "gram-session";
/// Session id cookie.
pub const SESSION_COOKIE: &str = "gram_session";
/// Project slug selector.
pub const PROJECT_HEADER: &str = "gram-project";
/// API key header.
pub const API_KEY_HEADER: &str = "gram-token";
/// Chat-session token header.
pub const CHAT_SESSION_HEADER: &str = "gram-chat-session";
/// Admin impersonation header.
pub const ADMIN_OVERRIDE_HEADER: &str = "gram-admin-override";
/// Admin impersonation cookie.
pub const ADMIN_OVERRIDE_COOKIE: &str = "gram_admin_override";
/// JSON-encoded MCP environment variables.
pub const MCP_ENVIRONMENT_HEADER: &str = "mcp-environment";
/// MCP transport session id.
pub const MCP_SESSION_HEADER: &str = "mcp-session-id";
/// Idempotency key for mutating RPCs.
pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";
/// W3C trace context.
pub const TRACEPARENT_HEADER: &str = "traceparent";

/// Headers whose values are never logged.
pub const REDACTED_HEADERS: [&str; 8] = [
    "authorization",
    "cookie",
    "set-cookie",
    SESSION_HEADER,
    API_KEY_HEADER,
    CHAT_SESSION_HEADER,
    ADMIN_OVERRIDE_HEADER,
    MCP_ENVIRONMENT_HEADER,
];

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Value of a header, falling back to a cookie.
fn header_or_cookie(headers: &HeaderMap, header: &str, cookie: &str) -> Option<String> {
    if let Some(value) = header_str(headers, header) {
        return Some(value.to_string());
    }
    CookieJar::from_headers(headers)
        .get(cookie)
        .map(|c| c.value().trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn session_token(headers: &HeaderMap) -> Option<String> {
    header_or_cookie(headers, SESSION_HEADER, SESSION_COOKIE)
}

pub fn admin_override(headers: &HeaderMap) -> Option<String> {
    header_or_cookie(headers, ADMIN_OVERRIDE_HEADER, ADMIN_OVERRIDE_COOKIE)
}

/// `Authorization` value with an optional `Bearer ` prefix removed.
pub fn bearer(headers: &HeaderMap) -> Option<&str> {
    let value = header_str(headers, AUTHORIZATION.as_str())?;
    let token = match value.split_once(' ') {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest.trim(),
        _ => value,
    };
    (!token.is_empty()).then_some(token)
}

/// Chat-session token from its own header, or a JWT-shaped bearer.
pub fn chat_session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = header_str(headers, CHAT_SESSION_HEADER) {
        return Some(token.to_string());
    }
    bearer(headers)
        .filter(|t| looks_like_jwt(t))
        .map(str::to_string)
}

/// API key from `Gram-Token`, or a bearer that is not JWT-shaped.
pub fn api_key(headers: &HeaderMap) -> Option<String> {
    if let Some(key) = header_str(headers, API_KEY_HEADER) {
        return Some(key.to_string());
    }
    bearer(headers)
        .filter(|t| !looks_like_jwt(t))
        .map(str::to_string)
}

pub fn project_slug(headers: &HeaderMap) -> Option<String> {
    header_str(headers, PROJECT_HEADER).map(str::to_string)
}

/// Gather every credential a request carried.
///
/// The session id and admin override come from the values the global
/// middleware already extracted.
pub fn credentials(
    headers: &HeaderMap,
    session: Option<&SessionToken>,
    admin: Option<&AdminOverride>,
) -> Credentials {
    Credentials {
        session: session.map(|s| s.0.clone()),
        api_key: api_key(headers),
        chat_session: chat_session_token(headers),
        project_slug: project_slug(headers),
        admin_override: admin.map(|a| a.0.clone()),
        domain_project_id: None,
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn session_prefers_header_over_cookie() {
        let map = headers(&[
            ("gram-session", "from-header"),
            ("cookie", "gram_session=from-cookie"),
        ]);
        assert_eq!(session_token(&map).as_deref(), Some("from-header"));

        let map = headers(&[("cookie", "other=1; gram_session=from-cookie")]);
        assert_eq!(session_token(&map).as_deref(), Some("from-cookie"));
    }

    #[test]
    fn admin_override_from_cookie() {
        let map = headers(&[("cookie", "gram_admin_override=acme")]);
        assert_eq!(admin_override(&map).as_deref(), Some("acme"));
    }

    #[test]
    fn bearer_distinguishes_keys_from_tokens() {
        let map = headers(&[("authorization", "Bearer aaa.bbb.ccc")]);
        assert_eq!(chat_session_token(&map).as_deref(), Some("aaa.bbb.ccc"));
        assert_eq!(api_key(&map), None);

        let map = headers(&[("authorization", "bearer gram_live_abc")]);
        assert_eq!(api_key(&map).as_deref(), Some("gram_live_abc"));
        assert_eq!(chat_session_token(&map), None);

        let map = headers(&[("authorization", "aaa.bbb.ccc")]);
        assert_eq!(chat_session_token(&map).as_deref(), Some("aaa.bbb.ccc"));
    }

    #[test]
    fn dedicated_headers_win() {
        let map = headers(&[
            ("gram-token", "gram_test_key"),
            ("gram-chat-session", "x.y.z"),
            ("authorization", "Bearer other"),
            ("gram-project", "default"),
        ]);
        let creds = credentials(&map, None, Some(&AdminOverride("acme".into())));
        assert_eq!(creds.api_key.as_deref(), Some("gram_test_key"));
        assert_eq!(creds.chat_session.as_deref(), Some("x.y.z"));
        assert_eq!(creds.project_slug.as_deref(), Some("default"));
        assert_eq!(creds.admin_override.as_deref(), Some("acme"));
        assert_eq!(creds.session, None);
    }
}
