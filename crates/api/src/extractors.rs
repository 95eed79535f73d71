//! Request extractors.

use axum::{extract::FromRequestParts, http::request::Parts};
use mediashelf_common::AppError;
use mediashelf_db::entities::user;

/// Authenticated user extractor.
///
/// Requests without a user resolved by the auth middleware are rejected
/// with `401` before the handler runs.
#[derive(Debug, Clone)]
pub struct AuthUser(pub user::Model);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<user::Model>()
            .cloned()
            .map(AuthUser)
            .ok_or(AppError::Unauthorized)
    }
}
