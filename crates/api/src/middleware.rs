//! API middleware.

#![allow(missing_docs)]

use std::sync::Arc;

use axum::{body::Body, extract::State, http::Request, middleware::Next, response::Response};
use mediashelf_common::config::DeliveryConfig;
use mediashelf_core::{
    FollowService, NotificationService, OtpStore, SignalQueueService, UserService,
};
use tokio::sync::watch;

/// Application state.
#[derive(Clone)]
pub struct AppState {
    pub user_service: UserService,
    pub follow_service: FollowService,
    pub notification_service: NotificationService,
    pub signal_queue: SignalQueueService,
    pub otp_store: Arc<OtpStore>,
    pub delivery: DeliveryConfig,
    /// Flips to `true` when the server starts shutting down; open
    /// notification streams end when it does.
    pub shutdown: watch::Receiver<bool>,
}

/// Authentication middleware.
///
/// Resolves `Authorization: Bearer <token>` to a user and stores it in the
/// request extensions for [`crate::extractors::AuthUser`]. Unknown tokens
/// are left unresolved; routes that need a user reject on their own.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    if let Some(auth_header) = req.headers().get("Authorization")
        && let Ok(auth_str) = auth_header.to_str()
        && let Some(token) = auth_str.strip_prefix("Bearer ")
    {
        match state.user_service.authenticate_by_token(token.trim()).await {
            Ok(user) => {
                req.extensions_mut().insert(user);
            }
            Err(e) if e.is_server_error() => {
                tracing::warn!(error = %e, "Token lookup failed");
            }
            Err(_) => {}
        }
    }

    next.run(req).await
}
