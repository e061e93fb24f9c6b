//! Request extractors whose rejections render as [`ApiError`].

use axum::extract::FromRequest;

use crate::error::ApiError;

/// JSON request body. A body that is missing, unparsable or of the wrong
/// shape is a `bad_request` in the usual error format.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);
