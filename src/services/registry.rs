//! src/services/registry.rs
//!
//! Registry of minted presigned URLs. Acts as an allow-list: a URL that was
//! never registered is treated exactly like one that has expired.

use crate::services::signer::now_epoch_secs;
use dashmap::DashMap;
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Default period between background sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
pub struct PresignedUrlRegistry {
    active: DashMap<String, u64>,
}

impl PresignedUrlRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the expiry for `url`.
    pub fn register(&self, url: impl Into<String>, expires: u64) {
        self.active.insert(url.into(), expires);
    }

    pub fn is_expired(&self, url: &str) -> bool {
        self.is_expired_at(url, now_epoch_secs())
    }

    /// True when `url` is unknown or its expiry is before `now`.
    pub fn is_expired_at(&self, url: &str, now: u64) -> bool {
        match self.active.get(url) {
            Some(expires) => now > *expires,
            None => true,
        }
    }

    /// Revoke a single URL. Removing an unknown URL is a no-op.
    pub fn remove(&self, url: &str) -> bool {
        self.active.remove(url).is_some()
    }

    pub fn sweep(&self) -> usize {
        self.sweep_at(now_epoch_secs())
    }

    /// Drop every entry whose expiry is strictly before `now`.
    ///
    /// Works from a snapshot of candidate keys and removes each one only if
    /// it still carries the expiry seen in the snapshot, so an entry
    /// re-registered in the meantime keeps its newer expiry.
    pub fn sweep_at(&self, now: u64) -> usize {
        let stale: Vec<(String, u64)> = self
            .active
            .iter()
            .filter(|entry| *entry.value() < now)
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();

        stale
            .into_iter()
            .filter(|(url, seen)| {
                self.active
                    .remove_if(url, |_, expires| *expires == *seen)
                    .is_some()
            })
            .count()
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Start the periodic sweep on the current tokio runtime.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> SweeperHandle {
        let registry = Arc::clone(self);
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            info!(period_secs = period.as_secs(), "presigned url sweeper started");
            let mut interval = tokio::time::interval(period);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        let removed = registry.sweep();
                        debug!(removed, remaining = registry.len(), "swept expired presigned urls");
                    }
                }
            }
            info!("presigned url sweeper stopped");
        });

        SweeperHandle { cancel, task }
    }
}

/// Owns the background sweep task; stop it with [`SweeperHandle::shutdown`].
pub struct SweeperHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(err) = self.task.await {
            tracing::warn!("presigned url sweeper exited abnormally: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_url_counts_as_expired() {
        let registry = PresignedUrlRegistry::new();
        assert!(registry.is_expired_at("/bucket/b1/f.txt?expires=9999999999&signature=aa", 0));
    }

    #[test]
    fn expiry_is_inclusive_of_the_deadline_second() {
        let registry = PresignedUrlRegistry::new();
        registry.register("u", 100);
        assert!(!registry.is_expired_at("u", 99));
        assert!(!registry.is_expired_at("u", 100));
        assert!(registry.is_expired_at("u", 101));
    }

    #[test]
    fn register_overwrites_expiry() {
        let registry = PresignedUrlRegistry::new();
        registry.register("u", 100);
        registry.register("u", 500);
        assert_eq!(registry.len(), 1);
        assert!(!registry.is_expired_at("u", 300));
    }

    #[test]
    fn sweep_before_expiry_keeps_entry() {
        let registry = PresignedUrlRegistry::new();
        registry.register("u", 100);
        assert_eq!(registry.sweep_at(50), 0);
        assert!(!registry.is_expired_at("u", 50));
    }

    #[test]
    fn sweep_removes_only_strictly_past_entries() {
        let registry = PresignedUrlRegistry::new();
        registry.register("old", 10);
        registry.register("edge", 20);
        registry.register("fresh", 30);
        assert_eq!(registry.sweep_at(20), 1);
        assert_eq!(registry.len(), 2);
        assert!(registry.is_expired_at("old", 0));
        assert!(!registry.is_expired_at("edge", 20));
    }

    #[test]
    fn swept_and_expired_deny_alike() {
        let swept = PresignedUrlRegistry::new();
        let kept = PresignedUrlRegistry::new();
        swept.register("u", 10);
        kept.register("u", 10);
        swept.sweep_at(11);
        assert_eq!(swept.is_expired_at("u", 11), kept.is_expired_at("u", 11));
    }

    #[test]
    fn remove_is_idempotent() {
        let registry = PresignedUrlRegistry::new();
        registry.register("u", 100);
        assert!(registry.remove("u"));
        assert!(!registry.remove("u"));
        assert!(registry.is_expired_at("u", 0));
    }

    #[test]
    fn concurrent_register_and_sweep() {
        let registry = Arc::new(PresignedUrlRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for i in 0..500 {
                        registry.register(format!("live-{t}-{i}"), 1_000);
                        registry.register(format!("dead-{t}-{i}"), 1);
                        registry.sweep_at(500);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        registry.sweep_at(500);
        assert_eq!(registry.len(), 8 * 500);
        assert!(!registry.is_expired_at("live-3-42", 500));
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_runs_periodically_and_stops() {
        let registry = Arc::new(PresignedUrlRegistry::new());
        registry.register("expired", 1);
        registry.register("live", u64::MAX);

        let handle = registry.spawn_sweeper(Duration::from_secs(60));
        tokio::time::sleep(Duration::from_secs(61)).await;
        tokio::task::yield_now().await;

        assert_eq!(registry.len(), 1);
        assert!(!registry.is_expired("live"));
        handle.shutdown().await;
    }
}
