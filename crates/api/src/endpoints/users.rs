//! Users endpoints.

use axum::{Json, Router, extract::State, routing::post};
use mediashelf_common::AppResult;
use mediashelf_core::{UserProfile, UserSummary};
use serde::Deserialize;
use validator::Validate;

use crate::{extractors::AuthUser, middleware::AppState, response::ApiResponse};

/// Get current user.
async fn me(AuthUser(user): AuthUser) -> ApiResponse<UserSummary> {
    ApiResponse::ok(UserSummary::from(&user))
}

/// Show user request.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ShowUserRequest {
    #[validate(length(min = 1, max = 64))]
    pub user_id: String,
}

/// Show a user's profile with the caller's relationship to them.
async fn show(
    AuthUser(viewer): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<ShowUserRequest>,
) -> AppResult<ApiResponse<UserProfile>> {
    req.validate()?;
    let profile = state.user_service.show(&viewer.id, &req.user_id).await?;
    Ok(ApiResponse::ok(profile))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/me", post(me))
        .route("/show", post(show))
}
