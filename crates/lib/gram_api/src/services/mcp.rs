//! MCP gateway.
//!
//! Handlers hand a decoded [`McpRequest`] to an [`McpGateway`]. The built-in
//! [`JsonRpcGateway`] speaks enough JSON-RPC to satisfy MCP clients probing
//! the endpoint (`initialize`, `ping`, `tools/list`) and answers anything else
//! with `method not found`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode};
use gram_core::auth::AuthContext;
use serde_json::{Value, json};

use crate::context::CustomDomainContext;
use crate::error::{ApiError, ApiResult};
use crate::services::cookies::{MCP_ENVIRONMENT_HEADER, MCP_SESSION_HEADER};

/// MCP protocol revision reported by `initialize`.
pub const PROTOCOL_VERSION: &str = "2025-03-26";

const PARSE_ERROR: i64 = -32700;
const INVALID_REQUEST: i64 = -32600;
const METHOD_NOT_FOUND: i64 = -32601;

/// Which MCP server a request addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum McpTarget {
    /// Public server by slug.
    Slug(String),
    /// Toolset within a project and environment.
    Toolset {
        project: String,
        toolset: String,
        environment: String,
    },
}

impl McpTarget {
    pub fn name(&self) -> String {
        match self {
            McpTarget::Slug(slug) => slug.clone(),
            McpTarget::Toolset {
                project, toolset, ..
            } => format!("{project}/{toolset}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct McpRequest {
    pub target: McpTarget,
    pub auth: Option<AuthContext>,
    /// Set when the request arrived on a tenant's custom domain.
    pub custom_domain: Option<CustomDomainContext>,
    pub session_id: String,
    /// Variables for tool invocation, from `MCP-Environment` and `mcp-*` headers.
    pub env: BTreeMap<String, String>,
    pub body: Bytes,
}

#[derive(Debug, Clone)]
pub struct McpResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

impl McpResponse {
    fn json(value: &Value) -> ApiResult<Self> {
        let body = serde_json::to_vec(value)
            .map_err(|e| ApiError::unexpected("failed to encode mcp response").with_cause(e))?;
        Ok(Self {
            status: StatusCode::OK,
            body: Bytes::from(body),
        })
    }

    /// Acknowledgement for a message that expects no reply.
    fn accepted() -> Self {
        Self {
            status: StatusCode::ACCEPTED,
            body: Bytes::new(),
        }
    }
}

/// Executes MCP messages.
#[async_trait]
pub trait McpGateway: Send + Sync {
    async fn serve(&self, request: McpRequest) -> ApiResult<McpResponse>;
}

/// Minimal JSON-RPC responder.
#[derive(Debug, Clone, Default)]
pub struct JsonRpcGateway;

#[async_trait]
impl McpGateway for JsonRpcGateway {
    async fn serve(&self, request: McpRequest) -> ApiResult<McpResponse> {
        let message: Value = match serde_json::from_slice(&request.body) {
            Ok(message) => message,
            Err(_) => return McpResponse::json(&rpc_error(Value::Null, PARSE_ERROR, "parse error")),
        };

        match message {
            Value::Array(batch) => {
                let replies: Vec<Value> = batch
                    .iter()
                    .filter_map(|m| reply(&request.target, m))
                    .collect();
                if replies.is_empty() {
                    Ok(McpResponse::accepted())
                } else {
                    McpResponse::json(&Value::Array(replies))
                }
            }
            single => match reply(&request.target, &single) {
                Some(reply) => McpResponse::json(&reply),
                None => Ok(McpResponse::accepted()),
            },
        }
    }
}

/// Reply to one message; `None` for notifications.
fn reply(target: &McpTarget, message: &Value) -> Option<Value> {
    let Some(object) = message.as_object() else {
        return Some(rpc_error(Value::Null, INVALID_REQUEST, "invalid request"));
    };
    let id = object.get("id").cloned()?;
    let Some(method) = object.get("method").and_then(Value::as_str) else {
        return Some(rpc_error(id, INVALID_REQUEST, "invalid request"));
    };

    let reply = match method {
        "initialize" => rpc_result(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": { "listChanged": false } },
                "serverInfo": { "name": target.name(), "version": gram_core::version() },
            }),
        ),
        "ping" => rpc_result(id, json!({})),
        "tools/list" => rpc_result(id, json!({ "tools": [] })),
        other => rpc_error(id, METHOD_NOT_FOUND, &format!("method not found: {other}")),
    };
    Some(reply)
}

fn rpc_result(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn rpc_error(id: Value, code: i64, message: &str) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "error": { "code": code, "message": message } })
}

/// Collect tool environment variables from request headers.
///
/// Every `mcp-*` header except the session id contributes a variable named
/// after the rest of the header name with `-` turned into `_`. The JSON object
/// in `MCP-Environment` is applied last and wins on conflicts.
pub fn environment(headers: &HeaderMap) -> ApiResult<BTreeMap<String, String>> {
    let mut env = BTreeMap::new();

    for (name, value) in headers {
        let name = name.as_str();
        if name == MCP_SESSION_HEADER || name == MCP_ENVIRONMENT_HEADER {
            continue;
        }
        if let Some(key) = name.strip_prefix("mcp-")
            && let Ok(value) = value.to_str()
        {
            env.insert(key.replace('-', "_"), value.to_string());
        }
    }

    if let Some(raw) = headers.get(MCP_ENVIRONMENT_HEADER) {
        let parsed: BTreeMap<String, String> = raw
            .to_str()
            .ok()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .ok_or_else(|| {
                ApiError::bad_request("MCP-Environment must be a JSON object of strings")
            })?;
        env.extend(parsed);
    }

    Ok(env)
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn request(body: &str) -> McpRequest {
        McpRequest {
            target: McpTarget::Slug("acme".into()),
            auth: None,
            custom_domain: None,
            session_id: "s1".into(),
            env: BTreeMap::new(),
            body: Bytes::from(body.to_string()),
        }
    }

    async fn serve(body: &str) -> McpResponse {
        JsonRpcGateway.serve(request(body)).await.unwrap()
    }

    fn parse(response: &McpResponse) -> Value {
        serde_json::from_slice(&response.body).unwrap()
    }

    #[tokio::test]
    async fn initialize_reports_server_info() {
        let response = serve(r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#).await;
        assert_eq!(response.status, StatusCode::OK);
        let body = parse(&response);
        assert_eq!(body["id"], 1);
        assert_eq!(body["result"]["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(body["result"]["serverInfo"]["name"], "acme");
    }

    #[tokio::test]
    async fn notifications_are_accepted_without_body() {
        let response = serve(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#).await;
        assert_eq!(response.status, StatusCode::ACCEPTED);
        assert!(response.body.is_empty());
    }

    #[tokio::test]
    async fn unknown_method_and_bad_json_are_rpc_errors() {
        let body = parse(&serve(r#"{"jsonrpc":"2.0","id":"x","method":"tools/call"}"#).await);
        assert_eq!(body["error"]["code"], METHOD_NOT_FOUND);
        assert_eq!(body["id"], "x");

        let body = parse(&serve("{not json").await);
        assert_eq!(body["error"]["code"], PARSE_ERROR);
    }

    #[tokio::test]
    async fn batches_reply_per_request() {
        let body = parse(
            &serve(
                r#"[{"jsonrpc":"2.0","id":1,"method":"ping"},
                    {"jsonrpc":"2.0","method":"notifications/cancelled"},
                    {"jsonrpc":"2.0","id":2,"method":"tools/list"}]"#,
            )
            .await,
        );
        let replies = body.as_array().unwrap();
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[1]["result"]["tools"], json!([]));
    }

    #[test]
    fn environment_merges_headers_and_json() {
        let mut headers = HeaderMap::new();
        headers.insert("mcp-api-key", HeaderValue::from_static("from-header"));
        headers.insert("mcp-region", HeaderValue::from_static("eu"));
        headers.insert("mcp-session-id", HeaderValue::from_static("ignored"));
        headers.insert(
            "mcp-environment",
            HeaderValue::from_static(r#"{"api_key":"from-json"}"#),
        );

        let env = environment(&headers).unwrap();
        assert_eq!(env.get("api_key").map(String::as_str), Some("from-json"));
        assert_eq!(env.get("region").map(String::as_str), Some("eu"));
        assert!(!env.contains_key("session_id"));
        assert!(!env.contains_key("environment"));
    }

    #[test]
    fn invalid_environment_json_is_bad_request() {
        let mut headers = HeaderMap::new();
        headers.insert("mcp-environment", HeaderValue::from_static("[1,2]"));
        let err = environment(&headers).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::BadRequest);
    }
}
