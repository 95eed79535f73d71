//! API response types.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// Success envelope, serialized as `{"data": ...}`.
///
/// Failures never use this type; they are rendered by `AppError`.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    /// Response payload.
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    /// Create a success response.
    #[must_use]
    pub const fn ok(data: T) -> Self {
        Self { data }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

/// Acknowledgement for mutations with nothing else to report.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Ack {
    /// Always `true`.
    pub ok: bool,
}

impl Ack {
    /// Successful acknowledgement.
    #[must_use]
    pub const fn new() -> Self {
        Self { ok: true }
    }
}

impl Default for Ack {
    fn default() -> Self {
        Self::new()
    }
}
