//! Delivery signal queue on Redis.
//!
//! Each recipient owns one key, `{prefix}:notify:{recipient_id}`, holding the
//! JSON of their latest signal. Every push rewrites the key with a fresh
//! expiry so abandoned slots disappear on their own. Clearing compares the
//! stored JSON in a Lua script, so a push racing a clear is never lost.

use async_trait::async_trait;
use fred::clients::Client;
use fred::error::Error as RedisError;
use fred::interfaces::{ClientLike, KeysInterface, LuaInterface};
use fred::types::Expiration;
use fred::types::config::Config as RedisConfig;
use mediashelf_common::{AppError, AppResult, config::MAX_TTL};
use mediashelf_core::{DeliverySignal, SignalQueue};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Deletes `KEYS[1]` only while it still holds `ARGV[1]`.
const CLEAR_IF_LATEST_SCRIPT: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
";

/// Connect a fred client to `redis_url`.
pub async fn connect(redis_url: &str) -> Result<Client, RedisError> {
    let config = RedisConfig::from_url(redis_url)?;
    let client = Client::new(config, None, None, None);
    client.init().await?;

    info!("Connected to Redis");

    Ok(client)
}

/// Signal queue shared across server instances through Redis.
#[derive(Clone)]
pub struct RedisSignalQueue {
    redis: Arc<Client>,
    prefix: String,
    ttl_secs: i64,
}

impl RedisSignalQueue {
    /// Create a queue whose keys live under `prefix` and expire `ttl` after the last push.
    #[must_use]
    pub fn new(redis: Arc<Client>, prefix: impl Into<String>, ttl: Duration) -> Self {
        Self {
            redis,
            prefix: prefix.into(),
            ttl_secs: i64::try_from(ttl.min(MAX_TTL).as_secs().max(1)).unwrap_or(i64::MAX),
        }
    }

    /// Redis key of a recipient's slot.
    #[must_use]
    pub fn key(&self, recipient_id: &str) -> String {
        format!("{}:notify:{recipient_id}", self.prefix)
    }
}

#[async_trait]
impl SignalQueue for RedisSignalQueue {
    async fn push(&self, recipient_id: &str, signal: &DeliverySignal) -> AppResult<()> {
        let payload =
            serde_json::to_string(signal).map_err(|e| AppError::Internal(e.to_string()))?;

        self.redis
            .set::<(), _, _>(
                self.key(recipient_id),
                payload,
                Some(Expiration::EX(self.ttl_secs)),
                None,
                false,
            )
            .await
            .map_err(|e| AppError::Redis(e.to_string()))?;

        debug!(recipient_id = %recipient_id, "Pushed delivery signal");
        Ok(())
    }

    async fn peek_latest(&self, recipient_id: &str) -> AppResult<Option<DeliverySignal>> {
        let raw: Option<String> = self
            .redis
            .get(self.key(recipient_id))
            .await
            .map_err(|e| AppError::Redis(e.to_string()))?;

        raw.map(|json| {
            serde_json::from_str(&json).map_err(|e| AppError::Internal(e.to_string()))
        })
        .transpose()
    }

    async fn clear_if_latest(
        &self,
        recipient_id: &str,
        signal: &DeliverySignal,
    ) -> AppResult<bool> {
        let payload =
            serde_json::to_string(signal).map_err(|e| AppError::Internal(e.to_string()))?;

        let removed: i64 = self
            .redis
            .eval(
                CLEAR_IF_LATEST_SCRIPT,
                vec![self.key(recipient_id)],
                vec![payload],
            )
            .await
            .map_err(|e| AppError::Redis(e.to_string()))?;

        Ok(removed > 0)
    }
}
