//! API endpoints.

mod following;
mod notifications;
mod otp;
mod users;

use axum::Router;

use crate::middleware::AppState;
use crate::stream;

/// Create the API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .nest("/following", following::router())
        .nest("/users", users::router())
        .nest("/notifications", notifications::router())
        .nest("/auth/otp", otp::router())
        .nest("/streaming", stream::router())
}
