//! Request logging and trace context.
//!
//! Every request runs inside an `http.request` span carrying `trace.id` and
//! `span.id` (plus `dd.trace_id` / `dd.span_id` when Datadog field names are
//! enabled), so any record emitted while handling it is correlated without
//! call sites doing anything. The trace context is adopted from an incoming
//! `traceparent` header when valid and echoed back on the response.

use std::collections::BTreeMap;
use std::time::Instant;

use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use tracing::{Instrument, field, info, info_span};

use crate::AppState;
use crate::context::TraceContext;
use crate::services::cookies::{REDACTED_HEADERS, TRACEPARENT_HEADER};

const REDACTED: &str = "[redacted]";

/// Header map rendered for logs, with credential-bearing values hidden.
pub fn loggable_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for (name, value) in headers {
        let name = name.as_str();
        let rendered = if REDACTED_HEADERS.contains(&name) {
            REDACTED.to_string()
        } else {
            String::from_utf8_lossy(value.as_bytes()).into_owned()
        };
        out.entry(name.to_string())
            .and_modify(|existing: &mut String| {
                existing.push_str(", ");
                existing.push_str(&rendered);
            })
            .or_insert(rendered);
    }
    out
}

/// Axum middleware: trace context, request span and start/finish records.
pub async fn log_requests(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let trace = request
        .headers()
        .get(TRACEPARENT_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(TraceContext::from_traceparent)
        .unwrap_or_else(TraceContext::new_root);
    request.extensions_mut().insert(trace);

    let span = info_span!(
        "http.request",
        http.method = %request.method(),
        http.path = %request.uri().path(),
        trace.id = %trace.trace_id_hex(),
        span.id = %trace.span_id_hex(),
        dd.trace_id = field::Empty,
        dd.span_id = field::Empty,
    );
    if state.config.datadog_log_fields {
        span.record("dd.trace_id", trace.dd_trace_id().as_str());
        span.record("dd.span_id", trace.dd_span_id().as_str());
    }

    async move {
        let started = Instant::now();
        info!(
            http.url = %request.uri(),
            http.headers = ?loggable_headers(request.headers()),
            "http request started"
        );

        let mut response = next.run(request).await;

        if let Ok(value) = HeaderValue::from_str(&trace.to_traceparent()) {
            response.headers_mut().insert(TRACEPARENT_HEADER, value);
        }

        info!(
            http.status = response.status().as_u16(),
            http.duration_ms = started.elapsed().as_secs_f64() * 1000.0,
            http.response_headers = ?loggable_headers(response.headers()),
            "http request completed"
        );
        response
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_are_redacted() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer secret"));
        headers.insert("gram-session", HeaderValue::from_static("sess"));
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        headers.append("accept", HeaderValue::from_static("text/html"));
        headers.append("accept", HeaderValue::from_static("application/json"));

        let rendered = loggable_headers(&headers);
        assert_eq!(rendered["authorization"], REDACTED);
        assert_eq!(rendered["gram-session"], REDACTED);
        assert_eq!(rendered["content-type"], "application/json");
        assert_eq!(rendered["accept"], "text/html, application/json");
    }
}
