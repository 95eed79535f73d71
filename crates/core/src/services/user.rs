//! User service.

use crate::services::following::RelationshipState;
use mediashelf_common::{AppError, AppResult};
use mediashelf_db::{
    entities::user,
    repositories::{FollowRelationshipRepository, UserRepository},
};
use serde::Serialize;

/// Public profile fields of a user, as attached to notifications and lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: String,
    pub username: String,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
    pub is_private: bool,
}

impl From<&user::Model> for UserSummary {
    fn from(user: &user::Model) -> Self {
        Self {
            id: user.id.clone(),
            username: user.username.clone(),
            name: user.name.clone(),
            avatar_url: user.avatar_url.clone(),
            is_private: user.is_private,
        }
    }
}

/// A user profile as seen by another user.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(flatten)]
    pub user: UserSummary,
    /// Absent when viewing one's own profile.
    pub relationship: Option<RelationshipState>,
}

/// User service for business logic.
#[derive(Clone)]
pub struct UserService {
    user_repo: UserRepository,
    follow_repo: FollowRelationshipRepository,
}

impl UserService {
    /// Create a new user service.
    #[must_use]
    pub const fn new(user_repo: UserRepository, follow_repo: FollowRelationshipRepository) -> Self {
        Self {
            user_repo,
            follow_repo,
        }
    }

    /// Resolve a bearer token to its user.
    pub async fn authenticate_by_token(&self, token: &str) -> AppResult<user::Model> {
        if token.is_empty() {
            return Err(AppError::Unauthorized);
        }

        self.user_repo
            .find_by_token(token)
            .await?
            .ok_or(AppError::Unauthorized)
    }

    /// Get a user's public profile together with the viewer's relationship to them.
    pub async fn show(&self, viewer_id: &str, user_id: &str) -> AppResult<UserProfile> {
        let user = self.user_repo.get_by_id(user_id).await?;

        let relationship = if viewer_id == user_id {
            None
        } else {
            let following = self.follow_repo.find_by_pair(viewer_id, user_id).await?;
            let followed_by = self.follow_repo.find_by_pair(user_id, viewer_id).await?;
            Some(RelationshipState {
                following: following.map(|r| r.status),
                followed_by: followed_by.map(|r| r.status),
            })
        };

        Ok(UserProfile {
            user: UserSummary::from(&user),
            relationship,
        })
    }
}
