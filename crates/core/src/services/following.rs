//! Following service.
//!
//! Drives the follow relationship state machine:
//!
//! ```text
//! NONE -> PENDING -> ACCEPTED | REJECTED
//!           any status -> NONE (unfollow, cancel, remove follower)
//! ```
//!
//! Store mutations are transactional in the repository. Delivery signals are
//! pushed after commit and are best-effort.

use crate::services::signal::{DeliverySignal, SignalQueueService, push_best_effort};
use crate::services::user::UserSummary;
use chrono::Utc;
use mediashelf_common::{AppError, AppResult, IdGenerator};
use mediashelf_db::{
    entities::{
        follow_relationship::{self, FollowStatus},
        notification::{self, NotificationType},
    },
    repositories::{FollowRelationshipRepository, RelationshipRemoval, UserRepository},
};
use sea_orm::Set;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;

/// Maximum page size for relationship lists.
pub const MAX_LIST_LIMIT: u64 = 100;

/// The followee's answer to a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowDecision {
    /// Approve the request; the follower is notified.
    Accept,
    /// Decline the request silently.
    Reject,
}

impl FollowDecision {
    /// Status the relationship moves to.
    #[must_use]
    pub const fn status(self) -> FollowStatus {
        match self {
            Self::Accept => FollowStatus::Accepted,
            Self::Reject => FollowStatus::Rejected,
        }
    }
}

impl FromStr for FollowDecision {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accept" => Ok(Self::Accept),
            "reject" => Ok(Self::Reject),
            other => Err(AppError::BadRequest(format!(
                "Invalid decision '{other}', expected 'accept' or 'reject'"
            ))),
        }
    }
}

/// Relationship between a viewer and another user, in both directions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipState {
    /// Status of `viewer -> target`, if any.
    pub following: Option<FollowStatus>,
    /// Status of `target -> viewer`, if any.
    pub followed_by: Option<FollowStatus>,
}

/// A relationship together with the user on the other side of it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowListEntry {
    /// Relationship ID, usable as a pagination cursor.
    pub id: String,
    pub status: FollowStatus,
    /// RFC 3339 creation time of the relationship.
    pub created_at: String,
    /// The counterpart; `None` if their account no longer exists.
    pub user: Option<UserSummary>,
}

/// Following service for business logic.
#[derive(Clone)]
pub struct FollowService {
    follow_repo: FollowRelationshipRepository,
    user_repo: UserRepository,
    signal_queue: Option<SignalQueueService>,
    id_gen: IdGenerator,
}

impl FollowService {
    /// Create a new following service.
    #[must_use]
    pub const fn new(follow_repo: FollowRelationshipRepository, user_repo: UserRepository) -> Self {
        Self {
            follow_repo,
            user_repo,
            signal_queue: None,
            id_gen: IdGenerator::new(),
        }
    }

    /// Set the delivery signal queue.
    pub fn set_signal_queue(&mut self, signal_queue: SignalQueueService) {
        self.signal_queue = Some(signal_queue);
    }

    fn new_notification(
        &self,
        notifiee_id: &str,
        notifier_id: &str,
        notification_type: NotificationType,
        follow_relationship_id: Option<String>,
    ) -> notification::ActiveModel {
        notification::ActiveModel {
            id: Set(self.id_gen.generate()),
            notifiee_id: Set(notifiee_id.to_string()),
            notifier_id: Set(notifier_id.to_string()),
            notification_type: Set(notification_type),
            follow_relationship_id: Set(follow_relationship_id),
            is_read: Set(false),
            created_at: Set(Utc::now().into()),
        }
    }

    /// Issue a follow request from `follower_id` to `followee_id`.
    ///
    /// The relationship always starts out pending and the followee gets a
    /// `follow_request` notification.
    pub async fn request_follow(
        &self,
        follower_id: &str,
        followee_id: &str,
    ) -> AppResult<follow_relationship::Model> {
        if follower_id == followee_id {
            return Err(AppError::BadRequest("Cannot follow yourself".to_string()));
        }

        if self.user_repo.find_by_id(followee_id).await?.is_none() {
            return Err(AppError::BadRequest(format!(
                "Unknown target user: {followee_id}"
            )));
        }

        if self
            .follow_repo
            .find_by_pair(follower_id, followee_id)
            .await?
            .is_some()
        {
            return Err(AppError::Conflict(
                "Already requested or following".to_string(),
            ));
        }

        let relationship_id = self.id_gen.generate();
        let now = Utc::now();
        let relationship = follow_relationship::ActiveModel {
            id: Set(relationship_id.clone()),
            follower_id: Set(follower_id.to_string()),
            followee_id: Set(followee_id.to_string()),
            status: Set(FollowStatus::Pending),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };
        let request = self.new_notification(
            followee_id,
            follower_id,
            NotificationType::FollowRequest,
            Some(relationship_id),
        );

        let (relationship, request) = self
            .follow_repo
            .create_with_notification(relationship, request)
            .await?;

        tracing::info!(
            follower_id = %follower_id,
            followee_id = %followee_id,
            relationship_id = %relationship.id,
            "Follow requested"
        );

        push_best_effort(
            self.signal_queue.as_ref(),
            followee_id,
            DeliverySignal::created(request.id),
        )
        .await;

        Ok(relationship)
    }

    /// Decide the pending request `follower_id -> followee_id` as the followee.
    ///
    /// The follower is signalled with the id of the removed request
    /// notification so their open views can drop it.
    pub async fn respond(
        &self,
        followee_id: &str,
        follower_id: &str,
        decision: FollowDecision,
    ) -> AppResult<follow_relationship::Model> {
        let accepted_notification = match decision {
            FollowDecision::Accept => Some(self.new_notification(
                follower_id,
                followee_id,
                NotificationType::FollowAccepted,
                None,
            )),
            FollowDecision::Reject => None,
        };

        let resolution = self
            .follow_repo
            .resolve_pending(
                follower_id,
                followee_id,
                decision.status(),
                accepted_notification,
            )
            .await?
            .ok_or_else(|| AppError::NotFound("Follow request not found".to_string()))?;

        tracing::info!(
            follower_id = %follower_id,
            followee_id = %followee_id,
            status = resolution.relationship.status.as_str(),
            "Follow request resolved"
        );

        push_best_effort(
            self.signal_queue.as_ref(),
            follower_id,
            DeliverySignal::changed(resolution.removed_notification_ids.into_iter().next()),
        )
        .await;

        Ok(resolution.relationship)
    }

    /// Withdraw `initiator_id`'s own relationship to `other_id` (unfollow or
    /// cancel a pending request). Idempotent.
    pub async fn unfollow(&self, initiator_id: &str, other_id: &str) -> AppResult<()> {
        let removal = self
            .follow_repo
            .delete_with_notifications(initiator_id, other_id)
            .await?;

        if let Some(removal) = removal {
            tracing::info!(
                follower_id = %initiator_id,
                followee_id = %other_id,
                "Follow relationship removed"
            );
            self.signal_removed(removal).await;
        }

        Ok(())
    }

    /// Remove `other_id` from `initiator_id`'s followers, whatever the status
    /// of their relationship. Idempotent.
    pub async fn remove_follower(&self, initiator_id: &str, other_id: &str) -> AppResult<()> {
        let removal = self
            .follow_repo
            .delete_with_notifications(other_id, initiator_id)
            .await?;

        if let Some(removal) = removal {
            tracing::info!(
                follower_id = %other_id,
                followee_id = %initiator_id,
                "Follower removed"
            );
            self.signal_removed(removal).await;
        }

        Ok(())
    }

    /// Tell every user whose inbox lost a notification which one it was.
    async fn signal_removed(&self, removal: RelationshipRemoval) {
        let mut latest_by_recipient: HashMap<String, String> = HashMap::new();
        for notification in removal.removed_notifications {
            latest_by_recipient.insert(notification.notifiee_id, notification.id);
        }

        for (recipient_id, notification_id) in latest_by_recipient {
            push_best_effort(
                self.signal_queue.as_ref(),
                &recipient_id,
                DeliverySignal::changed(Some(notification_id)),
            )
            .await;
        }
    }

    /// Accepted followers of a user, newest first.
    pub async fn followers(
        &self,
        user_id: &str,
        limit: u64,
        until_id: Option<&str>,
    ) -> AppResult<Vec<FollowListEntry>> {
        let relationships = self
            .follow_repo
            .find_followers(user_id, limit.clamp(1, MAX_LIST_LIMIT), until_id)
            .await?;
        self.with_counterparts(relationships, |r| r.follower_id.clone())
            .await
    }

    /// Users a user follows with an accepted relationship, newest first.
    pub async fn following(
        &self,
        user_id: &str,
        limit: u64,
        until_id: Option<&str>,
    ) -> AppResult<Vec<FollowListEntry>> {
        let relationships = self
            .follow_repo
            .find_following(user_id, limit.clamp(1, MAX_LIST_LIMIT), until_id)
            .await?;
        self.with_counterparts(relationships, |r| r.followee_id.clone())
            .await
    }

    /// Pending requests awaiting the user's decision, newest first.
    pub async fn pending_requests(
        &self,
        user_id: &str,
        limit: u64,
        until_id: Option<&str>,
    ) -> AppResult<Vec<FollowListEntry>> {
        let relationships = self
            .follow_repo
            .find_pending_received(user_id, limit.clamp(1, MAX_LIST_LIMIT), until_id)
            .await?;
        self.with_counterparts(relationships, |r| r.follower_id.clone())
            .await
    }

    async fn with_counterparts<F>(
        &self,
        relationships: Vec<follow_relationship::Model>,
        counterpart: F,
    ) -> AppResult<Vec<FollowListEntry>>
    where
        F: Fn(&follow_relationship::Model) -> String,
    {
        let ids: Vec<String> = relationships
            .iter()
            .map(&counterpart)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        let users: HashMap<String, UserSummary> = self
            .user_repo
            .find_by_ids(&ids)
            .await?
            .iter()
            .map(|u| (u.id.clone(), UserSummary::from(u)))
            .collect();

        Ok(relationships
            .into_iter()
            .map(|r| FollowListEntry {
                user: users.get(&counterpart(&r)).cloned(),
                id: r.id,
                status: r.status,
                created_at: r.created_at.to_rfc3339(),
            })
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::services::signal::{MemorySignalQueue, SignalAction, SignalQueue};
    use mediashelf_db::entities::user;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};
    use std::sync::Arc;
    use std::time::Duration;

    fn create_test_user(id: &str) -> user::Model {
        user::Model {
            id: id.to_string(),
            username: id.to_string(),
            username_lower: id.to_string(),
            name: None,
            avatar_url: None,
            is_private: false,
            token: None,
            created_at: Utc::now().into(),
            updated_at: None,
        }
    }

    fn create_test_relationship(
        id: &str,
        follower_id: &str,
        followee_id: &str,
        status: FollowStatus,
    ) -> follow_relationship::Model {
        follow_relationship::Model {
            id: id.to_string(),
            follower_id: follower_id.to_string(),
            followee_id: followee_id.to_string(),
            status,
            created_at: Utc::now().into(),
            updated_at: Utc::now().into(),
        }
    }

    fn create_test_notification(
        id: &str,
        notifiee_id: &str,
        notifier_id: &str,
        notification_type: NotificationType,
    ) -> notification::Model {
        notification::Model {
            id: id.to_string(),
            notifiee_id: notifiee_id.to_string(),
            notifier_id: notifier_id.to_string(),
            notification_type,
            follow_relationship_id: Some("r1".to_string()),
            is_read: false,
            created_at: Utc::now().into(),
        }
    }

    fn exec(rows_affected: u64) -> MockExecResult {
        MockExecResult {
            last_insert_id: 0,
            rows_affected,
        }
    }

    fn service(db: MockDatabase) -> (FollowService, Arc<MemorySignalQueue>) {
        let db = Arc::new(db.into_connection());
        let queue = Arc::new(MemorySignalQueue::new(Duration::from_secs(60)));
        let mut service = FollowService::new(
            FollowRelationshipRepository::new(Arc::clone(&db)),
            UserRepository::new(db),
        );
        service.set_signal_queue(queue.clone());
        (service, queue)
    }

    #[tokio::test]
    async fn test_cannot_follow_self() {
        let (service, _) = service(MockDatabase::new(DatabaseBackend::Postgres));

        let result = service.request_follow("alice", "alice").await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_request_unknown_target() {
        let (service, _) = service(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([Vec::<user::Model>::new()]),
        );

        let result = service.request_follow("alice", "ghost").await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_request_existing_relationship_conflicts() {
        let (service, queue) = service(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[create_test_user("bob")]])
                .append_query_results([[create_test_relationship(
                    "r1",
                    "alice",
                    "bob",
                    FollowStatus::Rejected,
                )]]),
        );

        let result = service.request_follow("alice", "bob").await;
        assert!(matches!(result, Err(AppError::Conflict(_))));
        assert!(queue.peek_latest("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_request_follow_signals_followee() {
        let (service, queue) = service(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[create_test_user("bob")]])
                .append_query_results([Vec::<follow_relationship::Model>::new()])
                .append_query_results([[create_test_relationship(
                    "r1",
                    "alice",
                    "bob",
                    FollowStatus::Pending,
                )]])
                .append_query_results([[create_test_notification(
                    "n1",
                    "bob",
                    "alice",
                    NotificationType::FollowRequest,
                )]]),
        );

        let relationship = service.request_follow("alice", "bob").await.unwrap();
        assert_eq!(relationship.status, FollowStatus::Pending);

        let signal = queue.peek_latest("bob").await.unwrap().unwrap();
        assert_eq!(signal.action, SignalAction::New);
        assert_eq!(signal.notification_id.as_deref(), Some("n1"));
        assert!(queue.peek_latest("alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_accept_signals_follower_with_removed_request() {
        let (service, queue) = service(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[create_test_relationship(
                    "r1",
                    "alice",
                    "bob",
                    FollowStatus::Pending,
                )]])
                .append_query_results([[create_test_notification(
                    "n1",
                    "bob",
                    "alice",
                    NotificationType::FollowRequest,
                )]])
                .append_query_results([[create_test_relationship(
                    "r1",
                    "alice",
                    "bob",
                    FollowStatus::Accepted,
                )]])
                .append_exec_results([exec(1)])
                .append_query_results([[create_test_notification(
                    "n2",
                    "alice",
                    "bob",
                    NotificationType::FollowAccepted,
                )]]),
        );

        let relationship = service
            .respond("bob", "alice", FollowDecision::Accept)
            .await
            .unwrap();
        assert_eq!(relationship.status, FollowStatus::Accepted);

        let signal = queue.peek_latest("alice").await.unwrap().unwrap();
        assert_eq!(signal.action, SignalAction::Update);
        assert_eq!(signal.notification_id.as_deref(), Some("n1"));
        assert!(queue.peek_latest("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reject_without_pending_is_not_found() {
        let (service, queue) = service(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([Vec::<follow_relationship::Model>::new()]),
        );

        let result = service.respond("bob", "alice", FollowDecision::Reject).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
        assert!(queue.peek_latest("alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unfollow_missing_is_noop() {
        let (service, queue) = service(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([Vec::<follow_relationship::Model>::new()]),
        );

        service.unfollow("alice", "bob").await.unwrap();
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_cancel_request_signals_followee() {
        let (service, queue) = service(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[create_test_relationship(
                    "r1",
                    "alice",
                    "bob",
                    FollowStatus::Pending,
                )]])
                .append_query_results([[create_test_notification(
                    "n1",
                    "bob",
                    "alice",
                    NotificationType::FollowRequest,
                )]])
                .append_exec_results([exec(1), exec(1)]),
        );

        service.unfollow("alice", "bob").await.unwrap();

        let signal = queue.peek_latest("bob").await.unwrap().unwrap();
        assert_eq!(signal.action, SignalAction::Update);
        assert_eq!(signal.notification_id.as_deref(), Some("n1"));
    }

    #[tokio::test]
    async fn test_remove_follower_deletes_reverse_edge() {
        let (service, queue) = service(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[create_test_relationship(
                    "r1",
                    "alice",
                    "bob",
                    FollowStatus::Accepted,
                )]])
                .append_query_results([[create_test_notification(
                    "n2",
                    "alice",
                    "bob",
                    NotificationType::FollowAccepted,
                )]])
                .append_exec_results([exec(1), exec(1)]),
        );

        service.remove_follower("bob", "alice").await.unwrap();

        let signal = queue.peek_latest("alice").await.unwrap().unwrap();
        assert_eq!(signal.notification_id.as_deref(), Some("n2"));
    }

    #[tokio::test]
    async fn test_followers_attach_users() {
        let (service, _) = service(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[create_test_relationship(
                    "r1",
                    "alice",
                    "bob",
                    FollowStatus::Accepted,
                )]])
                .append_query_results([[create_test_user("alice")]]),
        );

        let followers = service.followers("bob", 500, None).await.unwrap();
        assert_eq!(followers.len(), 1);
        assert_eq!(followers[0].user.as_ref().unwrap().id, "alice");
    }

    #[test]
    fn test_decision_parsing() {
        assert_eq!(
            "accept".parse::<FollowDecision>().unwrap(),
            FollowDecision::Accept
        );
        assert_eq!(
            "reject".parse::<FollowDecision>().unwrap().status(),
            FollowStatus::Rejected
        );
        assert!(matches!(
            "maybe".parse::<FollowDecision>(),
            Err(AppError::BadRequest(_))
        ));
    }
}
