//! Custom domain request handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::{Extension, Json};
use gram_core::auth::AuthContext;
use gram_core::models::domains::{CustomDomain, NewCustomDomain, normalize_domain};
use serde::Deserialize;
use tracing::info;

use crate::AppState;
use crate::error::{ApiError, ApiResult};
use crate::extract::ApiJson;

#[derive(Debug, Deserialize)]
pub struct RegisterDomainRequest {
    pub domain: String,
}

/// Project the caller is acting in.
pub(crate) fn project_id(ctx: &AuthContext) -> ApiResult<&str> {
    ctx.project_id
        .as_deref()
        .ok_or_else(|| ApiError::unauthorized("a project must be selected"))
}

/// `GET /rpc/domain.get`: the organization's custom domain.
pub async fn get_domain(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> ApiResult<Json<CustomDomain>> {
    let domain = state
        .stores
        .domains
        .domain_for_organization(&ctx.active_organization_id)
        .await?
        .ok_or_else(|| ApiError::not_found("no custom domain is registered"))?;
    Ok(Json(domain))
}

/// `POST /rpc/domain.register`: bind a host name to the current project.
///
/// The binding starts unverified and inactive; it admits no traffic until
/// both flags are set out of band.
pub async fn register_domain(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    ApiJson(body): ApiJson<RegisterDomainRequest>,
) -> ApiResult<Json<CustomDomain>> {
    let project_id = project_id(&ctx)?;
    let domain = normalize_domain(&body.domain).map_err(ApiError::bad_request)?;
    if state.config.is_platform_host(&domain) {
        return Err(ApiError::bad_request(format!(
            "{domain} is reserved by the platform"
        )));
    }

    let created = state
        .stores
        .domains
        .create_domain(NewCustomDomain {
            organization_id: ctx.active_organization_id.clone(),
            project_id: project_id.to_string(),
            domain,
        })
        .await?;

    info!(
        gram.org.id = %created.organization_id,
        gram.domain = %created.domain,
        "custom domain registered"
    );
    Ok(Json(created))
}

/// `DELETE /rpc/domain.delete`
pub async fn delete_domain(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> ApiResult<StatusCode> {
    if state
        .stores
        .domains
        .delete_domain(&ctx.active_organization_id)
        .await?
    {
        info!(gram.org.id = %ctx.active_organization_id, "custom domain deleted");
    }
    Ok(StatusCode::NO_CONTENT)
}
