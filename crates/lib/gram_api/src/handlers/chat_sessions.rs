//! Chat-session token handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::{Extension, Json};
use gram_core::auth::AuthContext;
use gram_core::chat_sessions::ChatSessionClaims;
use serde::{Deserialize, Serialize};
use url::Url;

use super::domains::project_id;
use crate::AppState;
use crate::error::{ApiError, ApiResult};
use crate::extract::ApiJson;

/// Lifetime of a token when the caller does not ask for one, in seconds.
pub const DEFAULT_EXPIRES_AFTER: i64 = 3600;

#[derive(Debug, Deserialize)]
pub struct CreateChatSessionRequest {
    pub embed_origin: String,
    #[serde(default)]
    pub user_identifier: Option<String>,
    #[serde(default)]
    pub expires_after: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ChatSessionResponse {
    pub client_token: String,
    pub jti: String,
    pub embed_origin: String,
    pub expires_after: i64,
    pub status: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct RevokeChatSessionRequest {
    #[serde(default)]
    pub jti: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
}

/// Serialize `raw` as a web origin (`scheme://host[:port]`).
fn embed_origin(raw: &str) -> ApiResult<String> {
    let url = Url::parse(raw.trim())
        .map_err(|_| ApiError::bad_request("embed_origin must be an absolute URL"))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(ApiError::bad_request(
            "embed_origin must be an http or https origin",
        ));
    }
    Ok(url.origin().ascii_serialization())
}

/// `POST /rpc/chatSessions.create`: mint a token for an embedding page.
pub async fn create_chat_session(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    ApiJson(body): ApiJson<CreateChatSessionRequest>,
) -> ApiResult<Json<ChatSessionResponse>> {
    let project_id = project_id(&ctx)?.to_string();
    let origin = embed_origin(&body.embed_origin)?;
    let expires_after = body.expires_after.unwrap_or(DEFAULT_EXPIRES_AFTER);

    let claims = ChatSessionClaims {
        org_id: ctx.active_organization_id.clone(),
        project_id,
        organization_slug: ctx.organization_slug.clone(),
        project_slug: ctx.project_slug.clone().unwrap_or_default(),
        user_identifier: body.user_identifier.filter(|u| !u.is_empty()),
        api_key_id: ctx.api_key_id.clone(),
    };

    let issued = state
        .auth
        .chat_sessions()
        .generate_token(claims, &origin, expires_after)?;

    Ok(Json(ChatSessionResponse {
        client_token: issued.token,
        jti: issued.jti,
        embed_origin: origin,
        expires_after,
        status: "active",
    }))
}

/// `POST /rpc/chatSessions.revoke`: revoke by token id or by token.
///
/// Exactly one of `jti` and `token` must be sent.
pub async fn revoke_chat_session(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    ApiJson(body): ApiJson<RevokeChatSessionRequest>,
) -> ApiResult<StatusCode> {
    let chat_sessions = state.auth.chat_sessions();

    let jti = match (body.jti, body.token) {
        (Some(_), Some(_)) => {
            return Err(ApiError::bad_request("send either jti or token, not both"));
        }
        (None, Some(token)) => {
            let claims = chat_sessions.decode_token(&token)?;
            if claims.custom.project_id != project_id(&ctx)? {
                return Err(ApiError::forbidden(
                    "token belongs to a different project",
                ));
            }
            claims.jti
        }
        (Some(jti), None) if !jti.trim().is_empty() => jti.trim().to_string(),
        _ => return Err(ApiError::bad_request("one of jti or token is required")),
    };

    chat_sessions.revoke_token(&jti).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embed_origin_is_normalized() {
        assert_eq!(
            embed_origin("https://App.Example/").unwrap(),
            "https://app.example"
        );
        assert_eq!(
            embed_origin("http://localhost:5173/chat?x=1").unwrap(),
            "http://localhost:5173"
        );
    }

    #[test]
    fn embed_origin_rejects_non_web_urls() {
        assert!(embed_origin("app.example").is_err());
        assert!(embed_origin("file:///etc/passwd").is_err());
        assert!(embed_origin("ftp://app.example").is_err());
    }
}
