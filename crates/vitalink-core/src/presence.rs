//! Presence tracking across all connections.
//!
//! Every inbound frame refreshes the sender's last-seen time; a background
//! sweep evicts identities that stayed silent past the timeout. This is the
//! one piece of state written by many tasks concurrently (every reader task
//! plus the sweeper), hence the concurrent map. Policy is last-writer-wins
//! per identity: only the latest timestamp matters.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::identity::IdentityId;

/// Presence configuration errors.
#[derive(Debug, Error)]
pub enum PresenceConfigError {
    /// The sweep would lag the timeout, leaving stale "online" readings.
    #[error("sweep interval must be strictly shorter than the presence timeout")]
    SweepNotShorter,
}

/// Presence timing configuration.
#[derive(Debug, Clone, Copy)]
pub struct PresenceConfig {
    /// Silence longer than this marks an identity offline.
    pub timeout: Duration,
    /// How often the sweep evicts stale records.
    pub sweep_interval: Duration,
}

impl PresenceConfig {
    /// Create a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns an error unless `sweep_interval < timeout`.
    pub fn new(timeout: Duration, sweep_interval: Duration) -> Result<Self, PresenceConfigError> {
        if sweep_interval >= timeout {
            return Err(PresenceConfigError::SweepNotShorter);
        }
        Ok(Self {
            timeout,
            sweep_interval,
        })
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(10),
        }
    }
}

/// Tracks which identities are reachable.
///
/// Absence of a record is equivalent to "offline".
pub struct PresenceTracker {
    last_seen: DashMap<IdentityId, Instant>,
    config: PresenceConfig,
}

impl PresenceTracker {
    /// Create a tracker.
    #[must_use]
    pub fn new(config: PresenceConfig) -> Self {
        Self {
            last_seen: DashMap::new(),
            config,
        }
    }

    /// Refresh an identity's last-seen time. O(1) upsert.
    pub fn touch(&self, identity: impl Into<IdentityId>) {
        self.last_seen.insert(identity.into(), Instant::now());
    }

    /// Whether the identity was seen within the timeout window.
    #[must_use]
    pub fn is_online(&self, identity: &str) -> bool {
        self.last_seen
            .get(identity)
            .is_some_and(|seen| seen.elapsed() <= self.config.timeout)
    }

    /// Snapshot of currently-online identities.
    #[must_use]
    pub fn list_online(&self) -> Vec<IdentityId> {
        self.last_seen
            .iter()
            .filter(|entry| entry.value().elapsed() <= self.config.timeout)
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Explicit eviction on clean disconnect.
    pub fn remove(&self, identity: &str) {
        if self.last_seen.remove(identity).is_some() {
            debug!(identity = %identity, "Presence record removed");
        }
    }

    /// Number of tracked records, fresh or stale.
    #[must_use]
    pub fn len(&self) -> usize {
        self.last_seen.len()
    }

    /// Whether no records are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }

    /// Evict all records older than the timeout.
    ///
    /// Returns the identities that transitioned to offline.
    pub fn sweep(&self) -> Vec<IdentityId> {
        let stale: Vec<IdentityId> = self
            .last_seen
            .iter()
            .filter(|entry| entry.value().elapsed() > self.config.timeout)
            .map(|entry| entry.key().clone())
            .collect();

        for identity in &stale {
            self.last_seen.remove(identity);
            info!(identity = %identity, "Presence timed out, now offline");
        }

        stale
    }

    /// Spawn the background sweep task.
    #[must_use]
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tracker.config.sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let evicted = tracker.sweep();
                if !evicted.is_empty() {
                    debug!(count = evicted.len(), "Presence sweep evicted stale records");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(timeout_ms: u64, sweep_ms: u64) -> PresenceConfig {
        PresenceConfig::new(
            Duration::from_millis(timeout_ms),
            Duration::from_millis(sweep_ms),
        )
        .unwrap()
    }

    #[test]
    fn test_config_rejects_slow_sweep() {
        assert!(PresenceConfig::new(Duration::from_secs(10), Duration::from_secs(10)).is_err());
        assert!(PresenceConfig::new(Duration::from_secs(10), Duration::from_secs(3)).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_and_timeout() {
        let tracker = PresenceTracker::new(config(100, 30));

        assert!(!tracker.is_online("d1"));
        tracker.touch("d1");
        assert!(tracker.is_online("d1"));

        // Stale records report offline even before the sweep runs.
        tokio::time::advance(Duration::from_millis(150)).await;
        assert!(!tracker.is_online("d1"));
        assert_eq!(tracker.len(), 1);

        let evicted = tracker.sweep();
        assert_eq!(evicted, vec!["d1".to_string()]);
        assert!(tracker.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_writer_wins() {
        let tracker = PresenceTracker::new(config(100, 30));

        tracker.touch("p1");
        tokio::time::advance(Duration::from_millis(80)).await;
        tracker.touch("p1");
        tokio::time::advance(Duration::from_millis(80)).await;

        // The refresh 80ms ago keeps the identity online.
        assert!(tracker.is_online("p1"));
        assert!(tracker.sweep().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_online_snapshot() {
        let tracker = PresenceTracker::new(config(100, 30));

        tracker.touch("d1");
        tokio::time::advance(Duration::from_millis(150)).await;
        tracker.touch("p1");

        let online = tracker.list_online();
        assert_eq!(online, vec!["p1".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_on_clean_disconnect() {
        let tracker = PresenceTracker::new(config(100, 30));

        tracker.touch("d1");
        tracker.remove("d1");
        assert!(!tracker.is_online("d1"));
        assert!(tracker.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_sweeper_evicts() {
        let tracker = Arc::new(PresenceTracker::new(config(100, 30)));
        let sweeper = tracker.spawn_sweeper();

        tracker.touch("d1");
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(tracker.is_empty());
        sweeper.abort();
    }
}
