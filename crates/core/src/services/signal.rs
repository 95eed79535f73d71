//! Delivery signal queue.
//!
//! A per-recipient slot holding the latest "your notifications changed"
//! hint. Producers are the follow and notification services; the consumer
//! is the notification stream endpoint. The queue is disposable: losing a
//! signal only costs a real-time update, never data.

use async_trait::async_trait;
use chrono::Utc;
use mediashelf_common::{AppResult, config::MAX_TTL};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// What the producer knew when it pushed the signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalAction {
    /// A notification was created.
    New,
    /// The notification set changed in some other way (read, deleted, resolved).
    Update,
}

/// A wake-up hint for one recipient's stream connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliverySignal {
    /// Milliseconds since the Unix epoch at push time.
    pub timestamp: i64,
    /// The affected notification, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_id: Option<String>,
    /// Whether the signal announces a new notification or another change.
    pub action: SignalAction,
}

impl DeliverySignal {
    /// Signal for a freshly created notification.
    #[must_use]
    pub fn created(notification_id: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now().timestamp_millis(),
            notification_id: Some(notification_id.into()),
            action: SignalAction::New,
        }
    }

    /// Signal for any other change, optionally naming the notification.
    #[must_use]
    pub fn changed(notification_id: Option<String>) -> Self {
        Self {
            timestamp: Utc::now().timestamp_millis(),
            notification_id,
            action: SignalAction::Update,
        }
    }
}

/// Storage for the latest outstanding signal of each recipient.
///
/// Implementations must make every push refresh the recipient's expiry so
/// that abandoned slots eventually disappear.
#[async_trait]
pub trait SignalQueue: Send + Sync {
    /// Store `signal` as the latest for `recipient_id`, replacing any previous one.
    async fn push(&self, recipient_id: &str, signal: &DeliverySignal) -> AppResult<()>;

    /// Latest signal that has not been cleared or expired.
    async fn peek_latest(&self, recipient_id: &str) -> AppResult<Option<DeliverySignal>>;

    /// Drop the recipient's signal, but only while it is still `signal`.
    ///
    /// A newer signal pushed since `signal` was read stays in place. The
    /// comparison and the delete must be atomic. Returns whether the slot
    /// was cleared.
    async fn clear_if_latest(
        &self,
        recipient_id: &str,
        signal: &DeliverySignal,
    ) -> AppResult<bool>;
}

/// Type alias for a shared signal queue.
pub type SignalQueueService = Arc<dyn SignalQueue>;

/// Push a signal, logging instead of failing. Delivery is best-effort and
/// must never fail the mutation that triggered it.
pub async fn push_best_effort(
    queue: Option<&SignalQueueService>,
    recipient_id: &str,
    signal: DeliverySignal,
) {
    let Some(queue) = queue else {
        return;
    };

    if let Err(e) = queue.push(recipient_id, &signal).await {
        tracing::warn!(
            error = %e,
            recipient_id = %recipient_id,
            "Failed to push delivery signal"
        );
    }
}

/// In-process signal queue for single-instance deployments.
pub struct MemorySignalQueue {
    ttl: Duration,
    slots: RwLock<HashMap<String, (DeliverySignal, Instant)>>,
}

impl MemorySignalQueue {
    /// Create a queue whose entries expire `ttl` after their last push.
    /// The lifetime is capped at [`MAX_TTL`].
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl: ttl.min(MAX_TTL),
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Number of recipients with a live signal.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.slots
            .read()
            .await
            .values()
            .filter(|(_, expires_at)| *expires_at > now)
            .count()
    }

    /// Whether no recipient has a live signal.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl SignalQueue for MemorySignalQueue {
    async fn push(&self, recipient_id: &str, signal: &DeliverySignal) -> AppResult<()> {
        let expires_at = Instant::now() + self.ttl;
        let mut slots = self.slots.write().await;
        slots.retain(|_, (_, at)| *at > Instant::now());
        slots.insert(recipient_id.to_string(), (signal.clone(), expires_at));
        Ok(())
    }

    async fn peek_latest(&self, recipient_id: &str) -> AppResult<Option<DeliverySignal>> {
        let slots = self.slots.read().await;
        Ok(slots
            .get(recipient_id)
            .filter(|(_, expires_at)| *expires_at > Instant::now())
            .map(|(signal, _)| signal.clone()))
    }

    async fn clear_if_latest(
        &self,
        recipient_id: &str,
        signal: &DeliverySignal,
    ) -> AppResult<bool> {
        let mut slots = self.slots.write().await;
        match slots.get(recipient_id) {
            Some((stored, _)) if stored == signal => {
                slots.remove(recipient_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
