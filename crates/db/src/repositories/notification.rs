//! Notification repository.

use std::sync::Arc;

use crate::entities::{Notification, notification};
use mediashelf_common::{AppError, AppResult};
use sea_orm::{
    ColumnTrait, DatabaseConnection, DeleteResult, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, UpdateResult,
};

/// Notification repository for database operations.
#[derive(Clone)]
pub struct NotificationRepository {
    db: Arc<DatabaseConnection>,
}

impl NotificationRepository {
    /// Create a new notification repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find a notification by ID, only if it belongs to `user_id`.
    pub async fn find_for_user(
        &self,
        id: &str,
        user_id: &str,
    ) -> AppResult<Option<notification::Model>> {
        Notification::find()
            .filter(notification::Column::Id.eq(id))
            .filter(notification::Column::NotifieeId.eq(user_id))
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Get every notification of a user, newest first.
    pub async fn find_by_user(
        &self,
        user_id: &str,
        unread_only: bool,
    ) -> AppResult<Vec<notification::Model>> {
        let mut query = Notification::find()
            .filter(notification::Column::NotifieeId.eq(user_id))
            .order_by_desc(notification::Column::CreatedAt)
            .order_by_desc(notification::Column::Id);

        if unread_only {
            query = query.filter(notification::Column::IsRead.eq(false));
        }

        query
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Mark the given notifications of a user as read.
    ///
    /// IDs that do not exist or belong to someone else are ignored.
    pub async fn mark_as_read(&self, user_id: &str, ids: &[String]) -> AppResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let result: UpdateResult = Notification::update_many()
            .filter(notification::Column::NotifieeId.eq(user_id))
            .filter(notification::Column::Id.is_in(ids.to_vec()))
            .col_expr(notification::Column::IsRead, true.into())
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected)
    }

    /// Mark all notifications as read for a user.
    pub async fn mark_all_as_read(&self, user_id: &str) -> AppResult<u64> {
        let result: UpdateResult = Notification::update_many()
            .filter(notification::Column::NotifieeId.eq(user_id))
            .filter(notification::Column::IsRead.eq(false))
            .col_expr(notification::Column::IsRead, true.into())
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected)
    }

    /// Count unread notifications for a user.
    pub async fn count_unread(&self, user_id: &str) -> AppResult<u64> {
        Notification::find()
            .filter(notification::Column::NotifieeId.eq(user_id))
            .filter(notification::Column::IsRead.eq(false))
            .count(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Delete a notification owned by `user_id`. Returns whether a row was removed.
    pub async fn delete_for_user(&self, id: &str, user_id: &str) -> AppResult<bool> {
        let result: DeleteResult = Notification::delete_many()
            .filter(notification::Column::Id.eq(id))
            .filter(notification::Column::NotifieeId.eq(user_id))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected > 0)
    }
}
