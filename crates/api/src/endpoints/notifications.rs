//! Notifications endpoints.

use axum::{Json, Router, body::Bytes, extract::State, routing::post};
use mediashelf_common::{AppError, AppResult};
use mediashelf_core::NotificationList;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    extractors::AuthUser,
    middleware::AppState,
    response::{Ack, ApiResponse},
};

/// List notifications request.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListNotificationsRequest {
    /// Only unread notifications
    #[serde(default)]
    pub unread_only: bool,
}

impl ListNotificationsRequest {
    /// Parse the request body. An empty body lists everything.
    fn from_body(body: &[u8]) -> AppResult<Self> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(body).map_err(|e| AppError::BadRequest(e.to_string()))
    }
}

/// List the caller's notifications, newest first.
async fn list(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    body: Bytes,
) -> AppResult<ApiResponse<NotificationList>> {
    let req = ListNotificationsRequest::from_body(&body)?;
    let notifications = state
        .notification_service
        .list_for_user(&user.id, req.unread_only)
        .await?;

    Ok(ApiResponse::ok(notifications))
}

/// Number of notifications changed by a bulk update.
#[derive(Debug, Serialize)]
pub struct UpdatedResponse {
    /// Rows changed; ids that were missing or foreign are not counted.
    pub updated: u64,
}

/// Pull `notificationIds` out of a loosely typed body.
///
/// Anything but an array of strings is rejected, so a malformed body never
/// reaches the store.
fn notification_ids(body: &Value) -> AppResult<Vec<String>> {
    let ids = body
        .get("notificationIds")
        .and_then(Value::as_array)
        .ok_or_else(|| AppError::BadRequest("notificationIds must be an array".to_string()))?;

    ids.iter()
        .map(|id| {
            id.as_str().map(str::to_string).ok_or_else(|| {
                AppError::BadRequest("notificationIds must contain strings".to_string())
            })
        })
        .collect()
}

/// Mark specific notifications as read.
async fn mark_as_read(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> AppResult<ApiResponse<UpdatedResponse>> {
    let ids = notification_ids(&body)?;

    let updated = state
        .notification_service
        .mark_read(&user.id, &ids)
        .await?;

    Ok(ApiResponse::ok(UpdatedResponse { updated }))
}

/// Mark all notifications as read.
async fn mark_all_as_read(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
) -> AppResult<ApiResponse<UpdatedResponse>> {
    let updated = state.notification_service.mark_all_read(&user.id).await?;
    Ok(ApiResponse::ok(UpdatedResponse { updated }))
}

/// Unread count response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCountResponse {
    pub unread_count: u64,
}

/// Count unread notifications.
async fn unread_count(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
) -> AppResult<ApiResponse<UnreadCountResponse>> {
    let unread_count = state.notification_service.unread_count(&user.id).await?;
    Ok(ApiResponse::ok(UnreadCountResponse { unread_count }))
}

/// Delete notification request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteNotificationRequest {
    pub notification_id: Option<String>,
}

/// Delete a notification. Unknown or foreign ids are ignored.
async fn delete(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<DeleteNotificationRequest>,
) -> AppResult<ApiResponse<Ack>> {
    let notification_id = req
        .notification_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::BadRequest("notificationId is required".to_string()))?;

    state
        .notification_service
        .delete(&user.id, &notification_id)
        .await?;

    Ok(ApiResponse::ok(Ack::new()))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(list))
        .route("/mark-as-read", post(mark_as_read))
        .route("/mark-all-as-read", post(mark_all_as_read))
        .route("/unread-count", post(unread_count))
        .route("/delete", post(delete))
}
