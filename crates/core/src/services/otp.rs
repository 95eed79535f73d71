//! Short-lived one-time codes.
//!
//! Codes live in process memory, so a multi-instance deployment needs a
//! shared store behind the same interface.

use mediashelf_common::config::{MAX_TTL, OtpConfig};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

struct OtpEntry {
    code: String,
    expires_at: Instant,
}

/// A freshly issued code.
#[derive(Debug, Clone)]
pub struct IssuedCode {
    pub code: String,
    pub expires_in: Duration,
}

/// In-memory one-time code store keyed by subject.
pub struct OtpStore {
    ttl: Duration,
    code_length: usize,
    entries: RwLock<HashMap<String, OtpEntry>>,
}

impl OtpStore {
    /// Create a store from configuration.
    #[must_use]
    pub fn new(config: &OtpConfig) -> Self {
        Self::with_ttl(config.ttl(), config.code_length)
    }

    /// Create a store with an explicit code lifetime, capped at [`MAX_TTL`].
    #[must_use]
    pub fn with_ttl(ttl: Duration, code_length: usize) -> Self {
        Self {
            ttl: ttl.min(MAX_TTL),
            code_length: code_length.max(1),
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn generate_code(&self) -> String {
        let mut rng = rand::thread_rng();
        (0..self.code_length)
            .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
            .collect()
    }

    /// Issue a code for `subject`, replacing any outstanding one.
    pub async fn issue(&self, subject: &str) -> IssuedCode {
        let code = self.generate_code();
        let entry = OtpEntry {
            code: code.clone(),
            expires_at: Instant::now() + self.ttl,
        };
        self.entries.write().await.insert(subject.to_string(), entry);

        IssuedCode {
            code,
            expires_in: self.ttl,
        }
    }

    /// Check `code` for `subject`. A matching, unexpired code is consumed.
    pub async fn verify(&self, subject: &str, code: &str) -> bool {
        let mut entries = self.entries.write().await;

        let Some(entry) = entries.get(subject) else {
            return false;
        };

        if entry.expires_at <= Instant::now() {
            entries.remove(subject);
            return false;
        }

        if entry.code != code {
            return false;
        }

        entries.remove(subject);
        true
    }

    /// Drop every expired code. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    /// Run [`Self::purge_expired`] every `interval` until `shutdown` flips to true.
    pub fn spawn_cleanup(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let purged = self.purge_expired().await;
                        if purged > 0 {
                            tracing::debug!(purged, "Purged expired one-time codes");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::info!("One-time code cleanup stopped");
        })
    }
}
