use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::session_store::{Error, SessionStore};

// Expired entries are swept once every SWEEP_INTERVAL operations.
const SWEEP_INTERVAL: usize = 1000;
const MAX_ENTRIES: usize = 100_000;

#[derive(Debug)]
pub struct Backend {
    entries: RwLock<HashMap<String, (String, Instant)>>,
    operations: AtomicUsize,
    capacity: usize,
}

impl Default for Backend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend {
    pub fn new() -> Self {
        Self::with_capacity(MAX_ENTRIES)
    }

    /// A store holding at most `capacity` entries. When full, expired entries
    /// go first, then the entry closest to expiry.
    pub fn with_capacity(capacity: usize) -> Self {
        info!("Using in-memory session store (capacity: {capacity})");
        Backend {
            entries: RwLock::new(HashMap::new()),
            operations: AtomicUsize::new(0),
            capacity: capacity.max(1),
        }
    }

    async fn sweep_if_due(&self) {
        let count = self.operations.fetch_add(1, Ordering::Relaxed);
        if count.is_multiple_of(SWEEP_INTERVAL) {
            let now = Instant::now();
            self.entries
                .write()
                .await
                .retain(|_, &mut (_, expiry)| expiry > now);
        }
    }
}

#[async_trait]
impl SessionStore for Backend {
    async fn store_value(&self, key: &str, value: &str, expires_in: u64) -> Result<(), Error> {
        self.sweep_if_due().await;

        let now = Instant::now();
        let expiry = now + Duration::from_secs(expires_in);
        let mut entries = self.entries.write().await;

        if !entries.contains_key(key) && entries.len() >= self.capacity {
            entries.retain(|_, &mut (_, expiry)| expiry > now);
            if entries.len() >= self.capacity {
                let soonest = entries
                    .iter()
                    .min_by_key(|(_, (_, expiry))| *expiry)
                    .map(|(key, _)| key.clone());
                if let Some(soonest) = soonest {
                    debug!("Session store full, evicting {soonest}");
                    entries.remove(&soonest);
                }
            }
        }

        entries.insert(key.to_string(), (value.to_string(), expiry));
        Ok(())
    }

    async fn retrieve_value(&self, key: &str) -> Result<Option<String>, Error> {
        self.sweep_if_due().await;

        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|(_, expiry)| *expiry > Instant::now())
            .map(|(value, _)| value.clone()))
    }

    async fn take_value(&self, key: &str) -> Result<Option<String>, Error> {
        self.sweep_if_due().await;

        let mut entries = self.entries.write().await;
        Ok(entries
            .remove(key)
            .filter(|(_, expiry)| *expiry > Instant::now())
            .map(|(value, _)| value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_and_retrieve() {
        let sessions = Backend::new();

        sessions.store_value("key", "value", 1).await.unwrap();
        assert_eq!(
            sessions.retrieve_value("key").await,
            Ok(Some("value".to_string()))
        );

        tokio::time::sleep(Duration::from_millis(1050)).await;
        assert_eq!(sessions.retrieve_value("key").await, Ok(None));
    }

    #[tokio::test]
    async fn test_take_removes_value() {
        let sessions = Backend::new();

        sessions.store_value("state", "correlation", 60).await.unwrap();
        assert_eq!(
            sessions.take_value("state").await,
            Ok(Some("correlation".to_string()))
        );
        assert_eq!(sessions.take_value("state").await, Ok(None));
        assert_eq!(sessions.retrieve_value("state").await, Ok(None));
    }

    #[tokio::test]
    async fn test_take_ignores_expired_value() {
        let sessions = Backend::new();

        sessions.store_value("state", "correlation", 0).await.unwrap();
        assert_eq!(sessions.take_value("state").await, Ok(None));
    }

    #[tokio::test]
    async fn test_remove_value() {
        let sessions = Backend::new();

        sessions.store_value("session", "principal", 60).await.unwrap();
        sessions.remove_value("session").await.unwrap();
        assert_eq!(sessions.retrieve_value("session").await, Ok(None));
    }

    #[tokio::test]
    async fn test_sweep_keeps_live_entries() {
        let sessions = Backend::new();

        for i in 0..500 {
            sessions
                .store_value(&format!("short_{i}"), "value", 1)
                .await
                .unwrap();
        }
        sessions.store_value("long", "value", 100).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1100)).await;

        for i in 0..SWEEP_INTERVAL {
            let _ = sessions.retrieve_value(&format!("missing_{i}")).await;
        }

        assert_eq!(
            sessions.retrieve_value("long").await,
            Ok(Some("value".to_string()))
        );
        assert!(sessions.entries.read().await.len() < 500);
    }

    #[tokio::test]
    async fn test_capacity_bounds_entries() {
        let sessions = Backend::with_capacity(3);

        sessions.store_value("expired", "value", 0).await.unwrap();
        sessions.store_value("soon", "value", 30).await.unwrap();
        sessions.store_value("late", "value", 300).await.unwrap();

        // The expired entry makes room first.
        sessions.store_value("a", "value", 300).await.unwrap();
        assert_eq!(sessions.entries.read().await.len(), 3);
        assert_eq!(
            sessions.retrieve_value("soon").await,
            Ok(Some("value".to_string()))
        );

        // Then the one closest to expiry.
        sessions.store_value("b", "value", 300).await.unwrap();
        assert_eq!(sessions.entries.read().await.len(), 3);
        assert_eq!(sessions.retrieve_value("soon").await, Ok(None));
        for key in ["late", "a", "b"] {
            assert!(sessions.retrieve_value(key).await.unwrap().is_some());
        }

        // Overwriting an existing key evicts nothing.
        sessions.store_value("a", "other", 300).await.unwrap();
        assert!(sessions.retrieve_value("late").await.unwrap().is_some());
    }
}
