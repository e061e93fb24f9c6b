//! Error taxonomy and its HTTP rendering.
//!
//! Handlers and middleware return [`ApiError`]. Rendering produces a JSON body
//! with only the user-safe message and attaches an [`ErrorReport`] to the
//! response extensions; the endpoint middleware reads the report to log the
//! cause. Causes never reach the response body.

use std::any::Any;
use std::error::Error as StdError;
use std::fmt;

use axum::Json;
use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use gram_core::auth::AuthError;
use gram_core::cache::CacheError;
use gram_core::chat_sessions::ChatSessionError;
use gram_core::store::StoreError;
use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use serde::Serialize;
use thiserror::Error;

/// Body message for [`ErrorKind::Unexpected`] errors.
pub const GENERIC_MESSAGE: &str = "an unexpected error occurred";

/// Convenience alias for handler return types.
pub type ApiResult<T> = Result<T, ApiError>;

type Cause = Box<dyn StdError + Send + Sync + 'static>;

/// Error kinds and their HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    Unavailable,
    Unexpected,
}

impl ErrorKind {
    pub fn status(&self) -> StatusCode {
        match self {
            ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Unexpected => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Default machine code.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::Unexpected => "unexpected",
        }
    }

    fn temporary(&self) -> bool {
        matches!(self, ErrorKind::Unavailable)
    }

    fn fault(&self) -> bool {
        matches!(self, ErrorKind::Unavailable | ErrorKind::Unexpected)
    }
}

/// An error on its way to becoming an HTTP response.
#[derive(Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    kind: ErrorKind,
    code: &'static str,
    message: String,
    #[source]
    cause: Option<Cause>,
    expose: bool,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: kind.code(),
            message: message.into(),
            cause: None,
            expose: kind != ErrorKind::Unexpected,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, message)
    }

    /// Internal failure. `message` is logged, not shown.
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unexpected, message)
    }

    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = code;
        self
    }

    pub fn with_cause(mut self, cause: impl StdError + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Show the message in the body even for [`ErrorKind::Unexpected`].
    pub fn expose_message(mut self) -> Self {
        self.expose = true;
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Debug for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiError")
            .field("kind", &self.kind)
            .field("code", &self.code)
            .field("message", &self.message)
            .field("cause", &self.cause.as_ref().map(|c| c.to_string()))
            .finish()
    }
}

/// JSON error body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub name: &'static str,
    pub id: String,
    pub message: String,
    pub temporary: bool,
    pub timeout: bool,
    pub fault: bool,
}

/// What an error response was rendered from, for logging further out.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub code: &'static str,
    pub id: String,
    pub message: String,
    pub cause: Option<String>,
    pub panic: bool,
}

fn error_id() -> String {
    rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let id = error_id();
        let message = if self.expose {
            self.message.clone()
        } else {
            GENERIC_MESSAGE.to_string()
        };

        let body = ErrorBody {
            name: self.code,
            id: id.clone(),
            message,
            temporary: self.kind.temporary(),
            timeout: false,
            fault: self.kind.fault(),
        };

        let mut response = (self.kind.status(), Json(body)).into_response();
        response.extensions_mut().insert(ErrorReport {
            kind: self.kind,
            code: self.code,
            id,
            message: self.message,
            cause: self.cause.map(|c| c.to_string()),
            panic: false,
        });
        response
    }
}

/// Response for a panic caught inside an endpoint.
///
/// The connection is closed afterwards since the handler's state is unknown.
pub fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response<Body> {
    let detail = if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic payload".to_string()
    };

    let mut response = ApiError::unexpected(format!("panic: {detail}")).into_response();
    response
        .headers_mut()
        .insert(header::CONNECTION, HeaderValue::from_static("close"));
    if let Some(report) = response.extensions_mut().get_mut::<ErrorReport>() {
        report.panic = true;
    }
    response
}

// ---------------------------------------------------------------------------
// Conversions from core errors
// ---------------------------------------------------------------------------

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::MissingCredentials => ApiError::unauthorized("no valid credentials presented"),
            AuthError::InvalidSession => ApiError::unauthorized("session is invalid or has expired"),
            AuthError::InvalidApiKey => ApiError::unauthorized("api key is invalid"),
            AuthError::ProjectRequired => ApiError::unauthorized("a project must be selected"),
            AuthError::ChatSession(e) => ApiError::from(e),
            AuthError::MissingScope(scope) => {
                ApiError::forbidden(format!("api key lacks the {scope} scope"))
            }
            AuthError::ProjectForbidden(slug) => {
                ApiError::forbidden(format!("project {slug} is not accessible"))
            }
            AuthError::OrganizationForbidden => {
                ApiError::forbidden("organization is not accessible")
            }
            AuthError::Store(e) => ApiError::from(e),
            AuthError::Cache(e) => ApiError::from(e),
        }
    }
}

impl From<ChatSessionError> for ApiError {
    fn from(e: ChatSessionError) -> Self {
        match e {
            ChatSessionError::Unavailable(cause) => {
                ApiError::unavailable("chat session state is unavailable").with_cause(cause)
            }
            ChatSessionError::InvalidTtl(ttl) => {
                ApiError::bad_request(format!("invalid expiry: {ttl} seconds"))
            }
            ChatSessionError::Revoked => ApiError::unauthorized("chat session token has been revoked"),
            ChatSessionError::Token(cause) => {
                ApiError::unauthorized("invalid chat session token").with_cause(cause)
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let message = match &rejection {
            JsonRejection::MissingJsonContentType(_) => "request body must be application/json",
            JsonRejection::JsonSyntaxError(_) => "request body is not valid JSON",
            JsonRejection::JsonDataError(_) => "request body is missing fields or has invalid values",
            _ => "request body could not be read",
        };
        ApiError::bad_request(message)
            .with_code("invalid_body")
            .with_cause(rejection)
    }
}

impl From<CacheError> for ApiError {
    fn from(e: CacheError) -> Self {
        ApiError::unavailable("cache is unavailable").with_cause(e)
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(message) => ApiError::conflict(message),
            StoreError::Db(cause) => ApiError::unexpected("database error").with_cause(cause),
        }
    }
}

#[cfg(test)]
mod tests {
    use gram_core::auth::ApiKeyScope;

    use super::*;

    #[test]
    fn kinds_map_to_statuses() {
        let cases = [
            (ErrorKind::BadRequest, 400),
            (ErrorKind::Unauthorized, 401),
            (ErrorKind::Forbidden, 403),
            (ErrorKind::NotFound, 404),
            (ErrorKind::Conflict, 409),
            (ErrorKind::Unavailable, 503),
            (ErrorKind::Unexpected, 500),
        ];
        for (kind, status) in cases {
            assert_eq!(kind.status().as_u16(), status, "{kind:?}");
        }
    }

    #[test]
    fn unexpected_hides_message_and_keeps_report() {
        let response = ApiError::unexpected("db exploded")
            .with_cause(std::io::Error::other("disk full"))
            .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let report = response.extensions().get::<ErrorReport>().unwrap();
        assert_eq!(report.kind, ErrorKind::Unexpected);
        assert_eq!(report.message, "db exploded");
        assert_eq!(report.cause.as_deref(), Some("disk full"));
        assert_eq!(report.id.len(), 8);
    }

    #[test]
    fn auth_errors_map_to_taxonomy() {
        assert_eq!(
            ApiError::from(AuthError::MissingCredentials).kind(),
            ErrorKind::Unauthorized
        );
        assert_eq!(
            ApiError::from(AuthError::MissingScope(ApiKeyScope::Chat)).kind(),
            ErrorKind::Forbidden
        );
        assert_eq!(
            ApiError::from(AuthError::ChatSession(ChatSessionError::Revoked)).kind(),
            ErrorKind::Unauthorized
        );
        assert_eq!(
            ApiError::from(ChatSessionError::Unavailable(CacheError::Backend("down".into()))).kind(),
            ErrorKind::Unavailable
        );
        assert_eq!(
            ApiError::from(StoreError::Conflict("taken".into())).kind(),
            ErrorKind::Conflict
        );
    }

    #[test]
    fn panic_response_closes_connection() {
        let response = panic_response(Box::new("boom"));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers()[header::CONNECTION], "close");
        let report = response.extensions().get::<ErrorReport>().unwrap();
        assert!(report.panic);
        assert_eq!(report.message, "panic: boom");
    }
}
