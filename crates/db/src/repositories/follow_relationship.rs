//! Follow relationship repository.
//!
//! Compound mutations (relationship change plus companion notification
//! changes) run in a single transaction so that a `follow_request`
//! notification never outlives the pending relationship it points at.

use std::sync::Arc;

use crate::entities::{
    FollowRelationship, Notification,
    follow_relationship::{self, FollowStatus},
    notification::{self, NotificationType},
};
use chrono::Utc;
use mediashelf_common::{AppError, AppResult};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, DbErr, EntityTrait,
    ModelTrait, QueryFilter, QueryOrder, QuerySelect, Set, SqlErr, TransactionTrait,
};

/// Outcome of deciding a pending follow request.
#[derive(Debug, Clone)]
pub struct RequestResolution {
    /// The relationship after the status change.
    pub relationship: follow_relationship::Model,
    /// IDs of the `follow_request` notifications removed with the decision.
    pub removed_notification_ids: Vec<String>,
}

/// Outcome of deleting a follow relationship.
#[derive(Debug, Clone)]
pub struct RelationshipRemoval {
    /// The relationship as it was before deletion.
    pub relationship: follow_relationship::Model,
    /// Notifications that referenced the relationship and were removed.
    pub removed_notifications: Vec<notification::Model>,
}

/// Follow relationship repository for database operations.
#[derive(Clone)]
pub struct FollowRelationshipRepository {
    db: Arc<DatabaseConnection>,
}

fn map_db_err(e: DbErr) -> AppError {
    if let Some(SqlErr::UniqueConstraintViolation(_)) = e.sql_err() {
        return AppError::Conflict("Already requested or following".to_string());
    }
    AppError::Database(e.to_string())
}

impl FollowRelationshipRepository {
    /// Create a new follow relationship repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    async fn begin(&self) -> AppResult<DatabaseTransaction> {
        self.db
            .begin()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Find relationships by IDs.
    pub async fn find_by_ids(&self, ids: &[String]) -> AppResult<Vec<follow_relationship::Model>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        FollowRelationship::find()
            .filter(follow_relationship::Column::Id.is_in(ids.to_vec()))
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Find the relationship from `follower_id` to `followee_id`, in any status.
    pub async fn find_by_pair(
        &self,
        follower_id: &str,
        followee_id: &str,
    ) -> AppResult<Option<follow_relationship::Model>> {
        FollowRelationship::find()
            .filter(follow_relationship::Column::FollowerId.eq(follower_id))
            .filter(follow_relationship::Column::FolloweeId.eq(followee_id))
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Insert a pending relationship together with the `follow_request`
    /// notification for its followee.
    ///
    /// A concurrent insert for the same pair surfaces as
    /// [`AppError::Conflict`] through the unique index.
    pub async fn create_with_notification(
        &self,
        relationship: follow_relationship::ActiveModel,
        notification: notification::ActiveModel,
    ) -> AppResult<(follow_relationship::Model, notification::Model)> {
        let txn = self.begin().await?;

        let relationship = relationship.insert(&txn).await.map_err(map_db_err)?;
        let notification = notification.insert(&txn).await.map_err(map_db_err)?;

        txn.commit()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok((relationship, notification))
    }

    /// Move the pending relationship `follower_id -> followee_id` to `status`,
    /// removing its `follow_request` notifications in the same transaction.
    ///
    /// `follower_notification`, when given, is inserted in the same transaction
    /// with its relationship reference pointed at the resolved relationship.
    ///
    /// Returns `None` when no pending relationship exists for the pair.
    pub async fn resolve_pending(
        &self,
        follower_id: &str,
        followee_id: &str,
        status: FollowStatus,
        follower_notification: Option<notification::ActiveModel>,
    ) -> AppResult<Option<RequestResolution>> {
        if !FollowStatus::Pending.can_transition_to(status) {
            return Err(AppError::BadRequest(format!(
                "Cannot move a follow request to {}",
                status.as_str()
            )));
        }

        let txn = self.begin().await?;

        let Some(pending) = FollowRelationship::find()
            .filter(follow_relationship::Column::FollowerId.eq(follower_id))
            .filter(follow_relationship::Column::FolloweeId.eq(followee_id))
            .filter(follow_relationship::Column::Status.eq(FollowStatus::Pending))
            .lock_exclusive()
            .one(&txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
        else {
            return Ok(None);
        };

        let request_notifications = Notification::find()
            .filter(notification::Column::FollowRelationshipId.eq(pending.id.as_str()))
            .filter(notification::Column::NotificationType.eq(NotificationType::FollowRequest))
            .all(&txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let mut active: follow_relationship::ActiveModel = pending.into();
        active.status = Set(status);
        active.updated_at = Set(Utc::now().into());
        let relationship = active
            .update(&txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let removed_notification_ids: Vec<String> =
            request_notifications.iter().map(|n| n.id.clone()).collect();

        if !removed_notification_ids.is_empty() {
            Notification::delete_many()
                .filter(notification::Column::Id.is_in(removed_notification_ids.clone()))
                .exec(&txn)
                .await
                .map_err(|e| AppError::Database(e.to_string()))?;
        }

        if let Some(mut model) = follower_notification {
            model.follow_relationship_id = Set(Some(relationship.id.clone()));
            model
                .insert(&txn)
                .await
                .map_err(|e| AppError::Database(e.to_string()))?;
        }

        txn.commit()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(Some(RequestResolution {
            relationship,
            removed_notification_ids,
        }))
    }

    /// Delete the relationship `follower_id -> followee_id` in whatever status
    /// it is, together with every notification that references it.
    ///
    /// Returns `None` when there was nothing to delete.
    pub async fn delete_with_notifications(
        &self,
        follower_id: &str,
        followee_id: &str,
    ) -> AppResult<Option<RelationshipRemoval>> {
        let txn = self.begin().await?;

        let Some(relationship) = FollowRelationship::find()
            .filter(follow_relationship::Column::FollowerId.eq(follower_id))
            .filter(follow_relationship::Column::FolloweeId.eq(followee_id))
            .lock_exclusive()
            .one(&txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
        else {
            return Ok(None);
        };

        let removed_notifications = Notification::find()
            .filter(notification::Column::FollowRelationshipId.eq(relationship.id.as_str()))
            .all(&txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        if !removed_notifications.is_empty() {
            Notification::delete_many()
                .filter(notification::Column::FollowRelationshipId.eq(relationship.id.as_str()))
                .exec(&txn)
                .await
                .map_err(|e| AppError::Database(e.to_string()))?;
        }

        relationship
            .clone()
            .delete(&txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        txn.commit()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(Some(RelationshipRemoval {
            relationship,
            removed_notifications,
        }))
    }

    /// Get accepted followers of a user (paginated).
    pub async fn find_followers(
        &self,
        user_id: &str,
        limit: u64,
        until_id: Option<&str>,
    ) -> AppResult<Vec<follow_relationship::Model>> {
        let mut query = FollowRelationship::find()
            .filter(follow_relationship::Column::FolloweeId.eq(user_id))
            .filter(follow_relationship::Column::Status.eq(FollowStatus::Accepted))
            .order_by_desc(follow_relationship::Column::Id);

        if let Some(id) = until_id {
            query = query.filter(follow_relationship::Column::Id.lt(id));
        }

        query
            .limit(limit)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Get users that a user follows with an accepted relationship (paginated).
    pub async fn find_following(
        &self,
        user_id: &str,
        limit: u64,
        until_id: Option<&str>,
    ) -> AppResult<Vec<follow_relationship::Model>> {
        let mut query = FollowRelationship::find()
            .filter(follow_relationship::Column::FollowerId.eq(user_id))
            .filter(follow_relationship::Column::Status.eq(FollowStatus::Accepted))
            .order_by_desc(follow_relationship::Column::Id);

        if let Some(id) = until_id {
            query = query.filter(follow_relationship::Column::Id.lt(id));
        }

        query
            .limit(limit)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Get pending requests targeting a user (paginated).
    pub async fn find_pending_received(
        &self,
        user_id: &str,
        limit: u64,
        until_id: Option<&str>,
    ) -> AppResult<Vec<follow_relationship::Model>> {
        let mut query = FollowRelationship::find()
            .filter(follow_relationship::Column::FolloweeId.eq(user_id))
            .filter(follow_relationship::Column::Status.eq(FollowStatus::Pending))
            .order_by_desc(follow_relationship::Column::Id);

        if let Some(id) = until_id {
            query = query.filter(follow_relationship::Column::Id.lt(id));
        }

        query
            .limit(limit)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }
}
