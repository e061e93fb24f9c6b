//! MCP endpoint handlers.

use axum::Extension;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use gram_core::auth::AuthContext;
use gram_core::uuid::random_id;

use crate::AppState;
use crate::context::CustomDomainContext;
use crate::error::{ApiError, ApiResult};
use crate::services::cookies::MCP_SESSION_HEADER;
use crate::services::mcp::{McpRequest, McpTarget, environment};

/// `POST /mcp/{slug}`
///
/// On a custom domain the slug is looked up within the domain's project.
pub async fn serve_public(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    auth: Option<Extension<AuthContext>>,
    custom_domain: Option<Extension<CustomDomainContext>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let request = Forward {
        target: McpTarget::Slug(slug),
        auth: auth.map(|Extension(ctx)| ctx),
        custom_domain: custom_domain.map(|Extension(domain)| domain),
    };
    forward(&state, request, &headers, body).await
}

/// `POST /mcp/{project}/{toolset}/{environment}`
pub async fn serve_toolset(
    State(state): State<AppState>,
    Path((project, toolset, environment)): Path<(String, String, String)>,
    Extension(ctx): Extension<AuthContext>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let request = Forward {
        target: McpTarget::Toolset {
            project,
            toolset,
            environment,
        },
        auth: Some(ctx),
        custom_domain: None,
    };
    forward(&state, request, &headers, body).await
}

struct Forward {
    target: McpTarget,
    auth: Option<AuthContext>,
    custom_domain: Option<CustomDomainContext>,
}

async fn forward(
    state: &AppState,
    request: Forward,
    headers: &HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let env = environment(headers)?;

    let session = match headers.get(MCP_SESSION_HEADER) {
        Some(value) => value.clone(),
        None => HeaderValue::from_str(&random_id())
            .map_err(|e| ApiError::unexpected("failed to mint mcp session id").with_cause(e))?,
    };

    let reply = state
        .mcp
        .serve(McpRequest {
            target: request.target,
            auth: request.auth,
            custom_domain: request.custom_domain,
            session_id: session.to_str().unwrap_or_default().to_string(),
            env,
            body,
        })
        .await?;

    let mut response = (reply.status, reply.body).into_response();
    let content_type = headers
        .get(CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("application/json"));
    response.headers_mut().insert(CONTENT_TYPE, content_type);
    response.headers_mut().insert(MCP_SESSION_HEADER, session);
    Ok(response)
}
