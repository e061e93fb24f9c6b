//! Per-endpoint middleware.
//!
//! Each route is wrapped, outermost first, in: an endpoint span, error
//! reporting, panic recovery and (when the endpoint requires it)
//! authentication. Keeping these innermost makes spans and error reports line
//! up one-to-one with logical operations.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::{Next, from_fn, from_fn_with_state};
use axum::response::Response;
use axum::routing::MethodRouter;
use gram_core::auth::AuthPolicy;
use tower_http::catch_panic::CatchPanicLayer;
use tracing::{Instrument, debug, error, info_span, warn};

use crate::AppState;
use crate::context::TraceContext;
use crate::error::{ErrorKind, ErrorReport, panic_response};

/// Authentication requirements of an endpoint.
#[derive(Debug, Clone)]
pub struct EndpointAuth {
    pub policy: AuthPolicy,
    /// Path parameter holding the project slug, for routes that carry it.
    pub project_param: Option<&'static str>,
}

/// A named endpoint and its auth requirements.
#[derive(Debug, Clone)]
pub struct Endpoint {
    name: &'static str,
    auth: Option<EndpointAuth>,
}

impl Endpoint {
    /// Endpoint reachable without credentials.
    pub fn public(name: &'static str) -> Self {
        Self { name, auth: None }
    }

    pub fn authenticated(name: &'static str, policy: AuthPolicy) -> Self {
        Self {
            name,
            auth: Some(EndpointAuth {
                policy,
                project_param: None,
            }),
        }
    }

    /// Take the project slug from path parameter `param`.
    pub fn project_from_path(mut self, param: &'static str) -> Self {
        if let Some(auth) = self.auth.as_mut() {
            auth.project_param = Some(param);
        }
        self
    }

    /// Wrap `route` in this endpoint's middleware.
    pub fn wrap(self, state: &AppState, route: MethodRouter<AppState>) -> MethodRouter<AppState> {
        let route = match self.auth {
            Some(auth) => route.layer(from_fn_with_state(
                (state.clone(), Arc::new(auth)),
                super::auth::authenticate,
            )),
            None => route,
        };

        route
            .layer(CatchPanicLayer::custom(panic_response))
            .layer(from_fn(report_errors))
            .layer(from_fn_with_state(self.name, trace_endpoint))
    }
}

/// Axum middleware: run the endpoint inside its own span.
pub async fn trace_endpoint(
    State(name): State<&'static str>,
    request: Request,
    next: Next,
) -> Response {
    let trace = request
        .extensions()
        .get::<TraceContext>()
        .map(TraceContext::child)
        .unwrap_or_else(TraceContext::new_root);

    let span = info_span!(
        "endpoint",
        gram.endpoint = name,
        span.id = %trace.span_id_hex(),
    );
    next.run(request).instrument(span).await
}

/// Axum middleware: log the error behind any error response.
///
/// Unexpected errors and panics are logged with their cause under the error
/// id that was sent to the client. Errors the client caused are only logged
/// at debug level.
pub async fn report_errors(request: Request, next: Next) -> Response {
    let response = next.run(request).await;

    if let Some(report) = response.extensions().get::<ErrorReport>() {
        log_report(report);
    }
    response
}

/// Log an error report at the level its kind calls for.
pub(crate) fn log_report(report: &ErrorReport) {
    let cause = report.cause.as_deref().unwrap_or("");
    if report.panic {
        error!(
            gram.error.id = %report.id,
            error.message = %report.message,
            "panic recovered in http handler"
        );
        return;
    }

    match report.kind {
        ErrorKind::Unexpected => error!(
            gram.error.id = %report.id,
            gram.error.name = report.code,
            error.message = %report.message,
            error.cause = cause,
            "unexpected error"
        ),
        ErrorKind::Unavailable => warn!(
            gram.error.id = %report.id,
            gram.error.name = report.code,
            error.message = %report.message,
            error.cause = cause,
            "dependency unavailable"
        ),
        _ => debug!(
            gram.error.id = %report.id,
            gram.error.name = report.code,
            error.message = %report.message,
            "request failed"
        ),
    }
}
