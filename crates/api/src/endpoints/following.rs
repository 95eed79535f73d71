//! Following endpoints.

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::post,
};
use mediashelf_common::AppResult;
use mediashelf_core::{FollowDecision, FollowListEntry};
use mediashelf_db::entities::follow_relationship::{self, FollowStatus};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{
    extractors::AuthUser,
    middleware::AppState,
    response::{Ack, ApiResponse},
};

/// Request naming the other user of a relationship.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UserIdRequest {
    #[validate(length(min = 1, max = 64))]
    pub user_id: String,
}

/// Relationship response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipResponse {
    pub id: String,
    pub follower_id: String,
    pub followee_id: String,
    pub status: FollowStatus,
    pub created_at: String,
    pub updated_at: String,
}

impl From<follow_relationship::Model> for RelationshipResponse {
    fn from(r: follow_relationship::Model) -> Self {
        Self {
            id: r.id,
            follower_id: r.follower_id,
            followee_id: r.followee_id,
            status: r.status,
            created_at: r.created_at.to_rfc3339(),
            updated_at: r.updated_at.to_rfc3339(),
        }
    }
}

/// Issue a follow request.
async fn create(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<UserIdRequest>,
) -> AppResult<ApiResponse<RelationshipResponse>> {
    req.validate()?;

    let relationship = state
        .follow_service
        .request_follow(&user.id, &req.user_id)
        .await?;

    Ok(ApiResponse::ok(relationship.into()))
}

/// Decision on a follow request.
#[derive(Debug, Deserialize)]
pub struct RespondRequest {
    pub decision: String,
}

/// Accept or reject the pending request from `user_id`.
async fn respond(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(follower_id): Path<String>,
    Json(req): Json<RespondRequest>,
) -> AppResult<ApiResponse<RelationshipResponse>> {
    let decision: FollowDecision = req.decision.parse()?;

    let relationship = state
        .follow_service
        .respond(&user.id, &follower_id, decision)
        .await?;

    Ok(ApiResponse::ok(relationship.into()))
}

/// Unfollow a user or cancel a pending request to them.
async fn delete(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<UserIdRequest>,
) -> AppResult<ApiResponse<Ack>> {
    req.validate()?;
    state.follow_service.unfollow(&user.id, &req.user_id).await?;
    Ok(ApiResponse::ok(Ack::new()))
}

/// Remove a follower, or drop their pending request.
async fn remove_follower(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<UserIdRequest>,
) -> AppResult<ApiResponse<Ack>> {
    req.validate()?;
    state
        .follow_service
        .remove_follower(&user.id, &req.user_id)
        .await?;
    Ok(ApiResponse::ok(Ack::new()))
}

/// Pagination for the caller's own pending requests.
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PendingListRequest {
    #[serde(default = "default_limit")]
    #[validate(range(min = 1, max = 100))]
    pub limit: u64,
    pub until_id: Option<String>,
}

/// List follow requests awaiting the caller's decision.
async fn list_requests(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<PendingListRequest>,
) -> AppResult<ApiResponse<Vec<FollowListEntry>>> {
    req.validate()?;

    let requests = state
        .follow_service
        .pending_requests(&user.id, req.limit, req.until_id.as_deref())
        .await?;

    Ok(ApiResponse::ok(requests))
}

/// List followers/following request.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ListRequest {
    #[validate(length(min = 1, max = 64))]
    pub user_id: String,
    #[serde(default = "default_limit")]
    #[validate(range(min = 1, max = 100))]
    pub limit: u64,
    pub until_id: Option<String>,
}

const fn default_limit() -> u64 {
    10
}

/// List a user's followers.
async fn followers(
    AuthUser(_user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<ListRequest>,
) -> AppResult<ApiResponse<Vec<FollowListEntry>>> {
    req.validate()?;

    let followers = state
        .follow_service
        .followers(&req.user_id, req.limit, req.until_id.as_deref())
        .await?;

    Ok(ApiResponse::ok(followers))
}

/// List the users a user follows.
async fn following(
    AuthUser(_user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<ListRequest>,
) -> AppResult<ApiResponse<Vec<FollowListEntry>>> {
    req.validate()?;

    let following = state
        .follow_service
        .following(&req.user_id, req.limit, req.until_id.as_deref())
        .await?;

    Ok(ApiResponse::ok(following))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/create", post(create))
        .route("/delete", post(delete))
        .route("/requests/list", post(list_requests))
        .route("/requests/{user_id}/respond", post(respond))
        .route("/followers/remove", post(remove_follower))
        .route("/followers", post(followers))
        .route("/following", post(following))
}
