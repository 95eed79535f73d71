//! One-time code endpoints.
//!
//! Codes are scoped to the authenticated caller. There is no mail or SMS
//! channel, so `issue` hands the code back directly.

use axum::{Json, Router, extract::State, routing::post};
use mediashelf_common::AppResult;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{extractors::AuthUser, middleware::AppState, response::ApiResponse};

/// Issued code response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueResponse {
    pub code: String,
    /// Seconds until the code expires
    pub expires_in: u64,
}

async fn issue(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
) -> ApiResponse<IssueResponse> {
    let issued = state.otp_store.issue(&user.id).await;
    tracing::debug!(user_id = %user.id, "Issued one-time code");

    ApiResponse::ok(IssueResponse {
        code: issued.code,
        expires_in: issued.expires_in.as_secs(),
    })
}

/// Verify request.
#[derive(Debug, Deserialize, Validate)]
pub struct VerifyRequest {
    #[validate(length(min = 1, max = 32))]
    pub code: String,
}

/// Verify response.
#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub valid: bool,
}

async fn verify(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<VerifyRequest>,
) -> AppResult<ApiResponse<VerifyResponse>> {
    req.validate()?;
    let valid = state.otp_store.verify(&user.id, req.code.trim()).await;
    Ok(ApiResponse::ok(VerifyResponse { valid }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/issue", post(issue))
        .route("/verify", post(verify))
}
