//! Custom domain admission.
//!
//! Runs first on every request. Outside local development the request host
//! must be a platform host, the server URL's host, or a custom domain that is
//! both verified and activated. Admitted custom-domain requests carry a
//! [`CustomDomainContext`].

use axum::extract::{Request, State};
use axum::http::header::HOST;
use axum::middleware::Next;
use axum::response::Response;
use tracing::{error, warn};

use crate::AppState;
use crate::context::CustomDomainContext;
use crate::error::ApiError;

/// Host the request was sent to, lower-cased and without port.
pub fn request_host(request: &Request) -> String {
    let raw = request
        .headers()
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| request.uri().authority().map(|a| a.as_str()))
        .unwrap_or_default();
    normalize_host(raw)
}

fn normalize_host(raw: &str) -> String {
    let raw = raw.trim();
    let host = if let Some(rest) = raw.strip_prefix('[') {
        // IPv6 literal, keep the brackets off and drop any port.
        rest.split(']').next().unwrap_or_default()
    } else {
        raw.rsplit_once(':').map_or(raw, |(host, _port)| host)
    };
    host.trim_end_matches('.').to_ascii_lowercase()
}

/// Axum middleware: admit or reject the request based on its host.
pub async fn admit_domain(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if state.config.environment.is_local() {
        return Ok(next.run(request).await);
    }

    let host = request_host(&request);
    if host.is_empty() {
        return Err(ApiError::bad_request("request host is not set"));
    }

    if state.config.is_platform_host(&host) {
        return Ok(next.run(request).await);
    }

    let domain = match state.stores.domains.domain_by_name(&host).await {
        Ok(domain) => domain,
        Err(e) => {
            error!(http.host = %host, error = %e, "domain check failed");
            return Err(ApiError::unexpected("domain check failed")
                .with_code("domain_check_failed")
                .with_cause(e)
                .expose_message());
        }
    };

    match domain {
        Some(domain) if domain.is_admissible() => {
            request.extensions_mut().insert(CustomDomainContext {
                domain_id: domain.id,
                organization_id: domain.organization_id,
                project_id: domain.project_id,
                domain: domain.domain,
            });
            Ok(next.run(request).await)
        }
        Some(_) => {
            warn!(http.host = %host, "custom domain is not verified and activated");
            Err(ApiError::forbidden("custom domain is not active"))
        }
        None => {
            warn!(http.host = %host, "unknown host");
            Err(ApiError::forbidden("unknown host"))
        }
    }
}
