//! Notification delivery stream (Server-Sent Events).
//!
//! Each connection polls the caller's delivery signal slot on a fixed
//! interval, starting immediately, and turns new signals into events:
//!
//! - signal naming a notification that still exists: `new` with the full notification
//! - signal naming a notification that is gone: `deleted` with its id
//! - signal without a notification, or a failed fetch: `update`, so the
//!   client refetches its list
//!
//! A signal is cleared only once the stream is polled again after yielding
//! its event, which means the transport accepted it. The clear is skipped
//! when a newer signal replaced the delivered one in the meantime. A
//! connection that closes first leaves the signal for the next connection
//! or for expiry.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    Router,
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
};
use chrono::Utc;
use futures::stream::{self, Stream};
use mediashelf_core::{DeliverySignal, NotificationService, NotificationView, SignalQueueService};
use serde_json::{Value, json};
use tokio::sync::watch;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::{extractors::AuthUser, middleware::AppState};

/// Lower bound for the poll interval.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// An event sent to a connected client.
#[derive(Debug, Clone)]
pub enum DeliveryEvent {
    /// First event of every connection.
    Connected { timestamp: i64 },
    /// A notification was created.
    New(Box<NotificationView>),
    /// A notification the client may be showing no longer exists.
    Deleted { notification_id: String },
    /// Something changed; refetch.
    Update { timestamp: i64 },
}

impl DeliveryEvent {
    /// SSE event name and JSON payload.
    #[must_use]
    pub fn payload(&self) -> (&'static str, Value) {
        match self {
            Self::Connected { timestamp } => ("connected", json!({ "timestamp": timestamp })),
            Self::New(notification) => (
                "notification",
                json!({ "action": "new", "notification": notification }),
            ),
            Self::Deleted { notification_id } => (
                "notification",
                json!({ "action": "deleted", "notificationId": notification_id }),
            ),
            Self::Update { timestamp } => (
                "notification",
                json!({ "action": "update", "timestamp": timestamp }),
            ),
        }
    }

    fn into_sse(self) -> Event {
        let (name, data) = self.payload();
        Event::default()
            .event(name)
            .json_data(&data)
            .unwrap_or_else(|_| Event::default().event(name).data("{}"))
    }
}

/// Per-connection signal consumer.
pub struct NotificationPoller {
    user_id: String,
    queue: SignalQueueService,
    notifications: NotificationService,
    last_delivered: Option<DeliverySignal>,
}

impl NotificationPoller {
    /// Create a poller for `user_id`.
    #[must_use]
    pub const fn new(
        user_id: String,
        queue: SignalQueueService,
        notifications: NotificationService,
    ) -> Self {
        Self {
            user_id,
            queue,
            notifications,
            last_delivered: None,
        }
    }

    /// Run one poll tick. Returns the event to emit, if any.
    pub async fn tick(&mut self) -> Option<DeliveryEvent> {
        let signal = match self.queue.peek_latest(&self.user_id).await {
            Ok(Some(signal)) => signal,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, user_id = %self.user_id, "Failed to read delivery signal");
                return None;
            }
        };

        if self.last_delivered.as_ref() == Some(&signal) {
            return None;
        }

        let event = match signal.notification_id.clone() {
            Some(notification_id) => match self
                .notifications
                .find_for_delivery(&self.user_id, &notification_id)
                .await
            {
                Ok(Some(notification)) => DeliveryEvent::New(Box::new(notification)),
                Ok(None) => DeliveryEvent::Deleted { notification_id },
                Err(e) => {
                    warn!(
                        error = %e,
                        user_id = %self.user_id,
                        notification_id = %notification_id,
                        "Failed to fetch signalled notification"
                    );
                    DeliveryEvent::Update {
                        timestamp: signal.timestamp,
                    }
                }
            },
            None => DeliveryEvent::Update {
                timestamp: signal.timestamp,
            },
        };

        self.last_delivered = Some(signal);
        Some(event)
    }

    /// Clear the signal whose event was just delivered, unless a newer one
    /// has replaced it.
    pub async fn acknowledge(&self) {
        let Some(signal) = &self.last_delivered else {
            return;
        };

        match self.queue.clear_if_latest(&self.user_id, signal).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(user_id = %self.user_id, "Delivery signal replaced before acknowledgement");
            }
            Err(e) => {
                warn!(error = %e, user_id = %self.user_id, "Failed to clear delivery signal");
            }
        }
    }
}

/// Logs when a connection's poll loop is dropped.
struct ConnectionGuard {
    user_id: String,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        info!(user_id = %self.user_id, "Notification stream closed");
    }
}

struct PollState {
    poller: NotificationPoller,
    ticker: Interval,
    shutdown: watch::Receiver<bool>,
    unacknowledged: bool,
    _guard: ConnectionGuard,
}

/// Poll loop as a stream of events. Ends when `shutdown` turns true or its
/// sender goes away; dropping the stream stops the timer.
pub fn delivery_stream(
    poller: NotificationPoller,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
) -> impl Stream<Item = DeliveryEvent> {
    let mut ticker = tokio::time::interval(interval.max(MIN_POLL_INTERVAL));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let state = PollState {
        _guard: ConnectionGuard {
            user_id: poller.user_id.clone(),
        },
        poller,
        ticker,
        shutdown,
        unacknowledged: false,
    };

    stream::unfold(state, |mut state| async move {
        if state.unacknowledged {
            state.poller.acknowledge().await;
            state.unacknowledged = false;
        }

        loop {
            if *state.shutdown.borrow() {
                return None;
            }

            tokio::select! {
                _ = state.ticker.tick() => {
                    if let Some(event) = state.poller.tick().await {
                        debug!(user_id = %state.poller.user_id, "Delivering notification event");
                        state.unacknowledged = true;
                        return Some((event, state));
                    }
                }
                changed = state.shutdown.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
            }
        }
    })
}

/// Open the caller's notification stream.
async fn notification_stream(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!(user_id = %user.id, "Notification stream opened");

    let poller = NotificationPoller::new(
        user.id,
        state.signal_queue.clone(),
        state.notification_service.clone(),
    );

    let connected = stream::once(async {
        Ok(DeliveryEvent::Connected {
            timestamp: Utc::now().timestamp_millis(),
        }
        .into_sse())
    });

    let events = delivery_stream(
        poller,
        state.delivery.poll_interval(),
        state.shutdown.clone(),
    )
    .map(|event| Ok(event.into_sse()));

    Sse::new(connected.chain(events)).keep_alive(
        KeepAlive::new()
            .interval(state.delivery.keep_alive())
            .text("ping"),
    )
}

/// Streaming routes.
pub fn router() -> Router<AppState> {
    Router::new().route("/notifications", get(notification_stream))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use mediashelf_core::{MemorySignalQueue, SignalQueue};
    use mediashelf_db::{
        entities::{
            notification::{self, NotificationType},
            user,
        },
        repositories::{FollowRelationshipRepository, NotificationRepository, UserRepository},
    };
    use sea_orm::{DatabaseBackend, MockDatabase};
    use std::sync::Arc;

    fn notification_service(db: MockDatabase) -> NotificationService {
        let db = Arc::new(db.into_connection());
        NotificationService::new(
            NotificationRepository::new(Arc::clone(&db)),
            UserRepository::new(Arc::clone(&db)),
            FollowRelationshipRepository::new(db),
        )
    }

    fn accepted_notification(id: &str) -> notification::Model {
        notification::Model {
            id: id.to_string(),
            notifiee_id: "carol".to_string(),
            notifier_id: "dave".to_string(),
            notification_type: NotificationType::FollowAccepted,
            follow_relationship_id: Some("r1".to_string()),
            is_read: false,
            created_at: Utc::now().into(),
        }
    }

    fn dave() -> user::Model {
        user::Model {
            id: "dave".to_string(),
            username: "dave".to_string(),
            username_lower: "dave".to_string(),
            name: None,
            avatar_url: None,
            is_private: false,
            token: None,
            created_at: Utc::now().into(),
            updated_at: None,
        }
    }

    fn poller(db: MockDatabase) -> (NotificationPoller, Arc<MemorySignalQueue>) {
        let queue = Arc::new(MemorySignalQueue::new(Duration::from_secs(60)));
        let poller =
            NotificationPoller::new("carol".to_string(), queue.clone(), notification_service(db));
        (poller, queue)
    }

    fn signal(timestamp: i64, notification_id: Option<&str>) -> DeliverySignal {
        let mut signal = DeliverySignal::changed(notification_id.map(str::to_string));
        signal.timestamp = timestamp;
        signal
    }

    #[tokio::test]
    async fn test_tick_without_signal_is_quiet() {
        let (mut poller, _) = poller(MockDatabase::new(DatabaseBackend::Postgres));
        assert!(poller.tick().await.is_none());
    }

    #[tokio::test]
    async fn test_tick_emits_new_for_existing_notification() {
        let (mut poller, queue) = poller(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([[accepted_notification("n1")]])
                .append_query_results([[dave()]]),
        );
        queue
            .push("carol", &DeliverySignal::created("n1"))
            .await
            .unwrap();

        let event = poller.tick().await.unwrap();
        let (name, payload) = event.payload();

        assert_eq!(name, "notification");
        assert_eq!(payload["action"], "new");
        assert_eq!(payload["notification"]["id"], "n1");
        assert_eq!(payload["notification"]["notifier"]["username"], "dave");
    }

    #[tokio::test]
    async fn test_tick_emits_deleted_when_notification_is_gone() {
        let (mut poller, queue) = poller(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([Vec::<notification::Model>::new()]),
        );
        queue.push("carol", &signal(10, Some("n1"))).await.unwrap();

        let (_, payload) = poller.tick().await.unwrap().payload();

        assert_eq!(payload["action"], "deleted");
        assert_eq!(payload["notificationId"], "n1");
    }

    #[tokio::test]
    async fn test_tick_emits_update_for_generic_signal() {
        let (mut poller, queue) = poller(MockDatabase::new(DatabaseBackend::Postgres));
        queue.push("carol", &signal(10, None)).await.unwrap();

        let (_, payload) = poller.tick().await.unwrap().payload();

        assert_eq!(payload["action"], "update");
        assert_eq!(payload["timestamp"], 10);
    }

    #[tokio::test]
    async fn test_fetch_failure_downgrades_to_update() {
        // No query results queued, so the lookup fails.
        let (mut poller, queue) = poller(MockDatabase::new(DatabaseBackend::Postgres));
        queue.push("carol", &signal(11, Some("n1"))).await.unwrap();

        let (_, payload) = poller.tick().await.unwrap().payload();

        assert_eq!(payload["action"], "update");
        assert_eq!(payload["timestamp"], 11);
    }

    #[tokio::test]
    async fn test_same_signal_is_not_delivered_twice() {
        let (mut poller, queue) = poller(MockDatabase::new(DatabaseBackend::Postgres));
        queue.push("carol", &signal(12, None)).await.unwrap();

        assert!(poller.tick().await.is_some());
        assert!(poller.tick().await.is_none());

        queue.push("carol", &signal(13, None)).await.unwrap();
        assert!(poller.tick().await.is_some());
    }

    #[tokio::test]
    async fn test_acknowledge_clears_signal() {
        let (mut poller, queue) = poller(MockDatabase::new(DatabaseBackend::Postgres));
        queue.push("carol", &signal(14, None)).await.unwrap();

        poller.tick().await.unwrap();
        poller.acknowledge().await;

        assert!(queue.peek_latest("carol").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stream_clears_after_next_poll() {
        let (poller, queue) = poller(MockDatabase::new(DatabaseBackend::Postgres));
        queue.push("carol", &signal(15, None)).await.unwrap();

        let (_tx, rx) = watch::channel(false);
        let mut events = Box::pin(delivery_stream(poller, Duration::from_millis(100), rx));

        let first = events.next().await.unwrap();
        assert!(matches!(first, DeliveryEvent::Update { timestamp: 15 }));
        assert!(queue.peek_latest("carol").await.unwrap().is_some());

        // Polling again acknowledges the first event before waiting for the next tick.
        let second = tokio::time::timeout(Duration::from_millis(300), events.next()).await;
        assert!(second.is_err());
        assert!(queue.peek_latest("carol").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_acknowledge_keeps_newer_signal() {
        let (mut poller, queue) = poller(MockDatabase::new(DatabaseBackend::Postgres));
        queue.push("carol", &signal(100, None)).await.unwrap();
        assert!(poller.tick().await.is_some());

        // A new change lands between delivery and acknowledgement.
        queue.push("carol", &signal(200, None)).await.unwrap();
        poller.acknowledge().await;

        assert_eq!(
            queue.peek_latest("carol").await.unwrap(),
            Some(signal(200, None))
        );
        let event = poller.tick().await.unwrap();
        assert!(matches!(event, DeliveryEvent::Update { timestamp: 200 }));
    }

    #[tokio::test]
    async fn test_acknowledge_without_delivery_is_noop() {
        let (poller, queue) = poller(MockDatabase::new(DatabaseBackend::Postgres));
        queue.push("carol", &signal(16, None)).await.unwrap();

        poller.acknowledge().await;

        assert!(queue.peek_latest("carol").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_acknowledged_signal_not_seen_by_second_connection() {
        let queue = Arc::new(MemorySignalQueue::new(Duration::from_secs(60)));
        let mut first = NotificationPoller::new(
            "carol".to_string(),
            queue.clone(),
            notification_service(MockDatabase::new(DatabaseBackend::Postgres)),
        );
        let mut second = NotificationPoller::new(
            "carol".to_string(),
            queue.clone(),
            notification_service(MockDatabase::new(DatabaseBackend::Postgres)),
        );
        queue.push("carol", &signal(17, None)).await.unwrap();

        assert!(first.tick().await.is_some());
        first.acknowledge().await;

        assert!(second.tick().await.is_none());
    }

    #[tokio::test]
    async fn test_stream_ends_on_shutdown() {
        let (poller, _) = poller(MockDatabase::new(DatabaseBackend::Postgres));
        let (tx, rx) = watch::channel(false);
        let mut events = Box::pin(delivery_stream(poller, Duration::from_millis(100), rx));

        tx.send(true).unwrap();

        let next = tokio::time::timeout(Duration::from_secs(1), events.next())
            .await
            .unwrap();
        assert!(next.is_none());
    }

    #[test]
    fn test_connected_payload() {
        let (name, payload) = DeliveryEvent::Connected { timestamp: 5 }.payload();
        assert_eq!(name, "connected");
        assert_eq!(payload, json!({ "timestamp": 5 }));
    }
}
