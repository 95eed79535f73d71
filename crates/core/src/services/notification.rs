//! Notification service.

use crate::services::signal::{DeliverySignal, SignalQueueService, push_best_effort};
use crate::services::user::UserSummary;
use mediashelf_common::AppResult;
use mediashelf_db::{
    entities::{
        follow_relationship::FollowStatus,
        notification::{self, NotificationType},
    },
    repositories::{FollowRelationshipRepository, NotificationRepository, UserRepository},
};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// A notification joined with its actor and, for follow requests, the
/// current status of the referenced relationship.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationView {
    pub id: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub is_read: bool,
    /// RFC 3339 creation time.
    pub created_at: String,
    pub notifier_id: String,
    /// Profile of the notifier; `None` if the account is gone.
    pub notifier: Option<UserSummary>,
    pub follow_relationship_id: Option<String>,
    /// Current status of the referenced request. Only set on `follow_request`
    /// notifications whose relationship still exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub follow_status: Option<FollowStatus>,
}

/// A recipient's notifications plus their overall unread count.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationList {
    pub notifications: Vec<NotificationView>,
    /// Unread notifications regardless of any filter applied to the list.
    pub unread_count: u64,
}

/// Notification service for business logic.
#[derive(Clone)]
pub struct NotificationService {
    notification_repo: NotificationRepository,
    user_repo: UserRepository,
    follow_repo: FollowRelationshipRepository,
    signal_queue: Option<SignalQueueService>,
}

impl NotificationService {
    /// Create a new notification service.
    #[must_use]
    pub const fn new(
        notification_repo: NotificationRepository,
        user_repo: UserRepository,
        follow_repo: FollowRelationshipRepository,
    ) -> Self {
        Self {
            notification_repo,
            user_repo,
            follow_repo,
            signal_queue: None,
        }
    }

    /// Set the delivery signal queue.
    pub fn set_signal_queue(&mut self, signal_queue: SignalQueueService) {
        self.signal_queue = Some(signal_queue);
    }

    /// List a user's notifications, newest first.
    pub async fn list_for_user(
        &self,
        user_id: &str,
        unread_only: bool,
    ) -> AppResult<NotificationList> {
        let notifications = self
            .notification_repo
            .find_by_user(user_id, unread_only)
            .await?;
        let notifications = self.enrich(notifications).await?;
        let unread_count = self.notification_repo.count_unread(user_id).await?;

        Ok(NotificationList {
            notifications,
            unread_count,
        })
    }

    /// Fetch one notification in list shape, if it exists and belongs to `user_id`.
    pub async fn find_for_delivery(
        &self,
        user_id: &str,
        notification_id: &str,
    ) -> AppResult<Option<NotificationView>> {
        let Some(notification) = self
            .notification_repo
            .find_for_user(notification_id, user_id)
            .await?
        else {
            return Ok(None);
        };

        Ok(self.enrich(vec![notification]).await?.into_iter().next())
    }

    /// Count unread notifications.
    pub async fn unread_count(&self, user_id: &str) -> AppResult<u64> {
        self.notification_repo.count_unread(user_id).await
    }

    /// Mark the given notifications read. Foreign or unknown IDs are skipped.
    pub async fn mark_read(&self, user_id: &str, notification_ids: &[String]) -> AppResult<u64> {
        if notification_ids.is_empty() {
            return Ok(0);
        }

        let updated = self
            .notification_repo
            .mark_as_read(user_id, notification_ids)
            .await?;

        tracing::debug!(user_id = %user_id, updated, "Marked notifications as read");

        push_best_effort(
            self.signal_queue.as_ref(),
            user_id,
            DeliverySignal::changed(None),
        )
        .await;

        Ok(updated)
    }

    /// Mark every unread notification read.
    pub async fn mark_all_read(&self, user_id: &str) -> AppResult<u64> {
        let updated = self.notification_repo.mark_all_as_read(user_id).await?;

        if updated > 0 {
            push_best_effort(
                self.signal_queue.as_ref(),
                user_id,
                DeliverySignal::changed(None),
            )
            .await;
        }

        Ok(updated)
    }

    /// Delete a notification. Deleting a missing or foreign notification is a no-op.
    pub async fn delete(&self, user_id: &str, notification_id: &str) -> AppResult<()> {
        let removed = self
            .notification_repo
            .delete_for_user(notification_id, user_id)
            .await?;

        if removed {
            push_best_effort(
                self.signal_queue.as_ref(),
                user_id,
                DeliverySignal::changed(Some(notification_id.to_string())),
            )
            .await;
        }

        Ok(())
    }

    async fn enrich(
        &self,
        notifications: Vec<notification::Model>,
    ) -> AppResult<Vec<NotificationView>> {
        let notifier_ids: Vec<String> = notifications
            .iter()
            .map(|n| n.notifier_id.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        let relationship_ids: Vec<String> = notifications
            .iter()
            .filter(|n| n.notification_type == NotificationType::FollowRequest)
            .filter_map(|n| n.follow_relationship_id.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        let notifiers: HashMap<String, UserSummary> = self
            .user_repo
            .find_by_ids(&notifier_ids)
            .await?
            .iter()
            .map(|u| (u.id.clone(), UserSummary::from(u)))
            .collect();

        let statuses: HashMap<String, FollowStatus> = self
            .follow_repo
            .find_by_ids(&relationship_ids)
            .await?
            .into_iter()
            .map(|r| (r.id, r.status))
            .collect();

        Ok(notifications
            .into_iter()
            .map(|n| {
                let follow_status = match n.notification_type {
                    NotificationType::FollowRequest => n
                        .follow_relationship_id
                        .as_ref()
                        .and_then(|id| statuses.get(id).copied()),
                    NotificationType::FollowAccepted => None,
                };

                NotificationView {
                    notifier: notifiers.get(&n.notifier_id).cloned(),
                    id: n.id,
                    notification_type: n.notification_type,
                    is_read: n.is_read,
                    created_at: n.created_at.to_rfc3339(),
                    notifier_id: n.notifier_id,
                    follow_relationship_id: n.follow_relationship_id,
                    follow_status,
                }
            })
            .collect())
    }
}
