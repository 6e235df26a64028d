//! Registry of cancelled request ids.
//!
//! Fed by the control-topic listener and consulted by the queue worker before
//! each job. Entries expire so the registry stays bounded; expired entries are
//! swept lazily whenever a new id is added.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

/// How long a cancellation stays effective.
pub const CANCEL_TTL: Duration = Duration::from_secs(15 * 60);

/// Monotonic time source, swappable in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Clone)]
pub struct CancelRegistry {
    entries: Arc<RwLock<HashMap<u64, Instant>>>,
    clock: Arc<dyn Clock>,
}

impl Default for CancelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            clock,
        }
    }

    /// Mark `id` cancelled for `ttl`. Re-adding an id refreshes its expiry.
    pub async fn add(&self, id: u64, ttl: Duration) {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        entries.retain(|_, expires| *expires > now);
        entries.insert(id, now + ttl);
    }

    /// Whether `id` has an unexpired cancellation.
    pub async fn exists(&self, id: u64) -> bool {
        let now = self.clock.now();
        self.entries
            .read()
            .await
            .get(&id)
            .is_some_and(|expires| *expires > now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct ManualClock {
        now: Mutex<Instant>,
    }

    impl ManualClock {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                now: Mutex::new(Instant::now()),
            })
        }

        fn advance(&self, by: Duration) {
            *self.now.lock().unwrap() += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            *self.now.lock().unwrap()
        }
    }

    #[tokio::test]
    async fn unknown_id_is_not_cancelled() {
        let registry = CancelRegistry::new();
        assert!(!registry.exists(7).await);
        assert!(registry.entries.read().await.is_empty());
    }

    #[tokio::test]
    async fn cancellation_expires_after_ttl() {
        let clock = ManualClock::new();
        let registry = CancelRegistry::with_clock(clock.clone());

        registry.add(42, CANCEL_TTL).await;
        clock.advance(Duration::from_secs(14 * 60 + 59));
        assert!(registry.exists(42).await);

        clock.advance(Duration::from_secs(2));
        assert!(!registry.exists(42).await);
    }

    #[tokio::test]
    async fn re_adding_refreshes_expiry() {
        let clock = ManualClock::new();
        let registry = CancelRegistry::with_clock(clock.clone());

        registry.add(1, Duration::from_secs(10)).await;
        clock.advance(Duration::from_secs(8));
        registry.add(1, Duration::from_secs(10)).await;
        clock.advance(Duration::from_secs(8));
        assert!(registry.exists(1).await);
    }

    #[tokio::test]
    async fn add_sweeps_expired_entries() {
        let clock = ManualClock::new();
        let registry = CancelRegistry::with_clock(clock.clone());

        registry.add(1, Duration::from_secs(5)).await;
        registry.add(2, Duration::from_secs(5)).await;
        assert_eq!(registry.entries.read().await.len(), 2);

        clock.advance(Duration::from_secs(6));
        registry.add(3, Duration::from_secs(5)).await;
        assert_eq!(registry.entries.read().await.len(), 1);
        assert!(registry.exists(3).await);
    }

    #[tokio::test]
    async fn concurrent_adds_are_all_visible() {
        let registry = CancelRegistry::new();
        let mut handles = Vec::new();
        for id in 0..32u64 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry.add(id, CANCEL_TTL).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        for id in 0..32u64 {
            assert!(registry.exists(id).await);
        }
    }
}
