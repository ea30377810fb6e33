//! In-Memory Persistence Adapter
//!
//! `PersistenceBackend` kept entirely in memory. Used for tests, the replay
//! tool and as the reference for real backends.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::cache::CacheKey;
use crate::domain::ports::{EntryRecord, PersistenceBackend, PersistenceStats};
use crate::error::{Error, Result};

/// In-memory persistence backend.
/// Uses DashMap for lock-free concurrent access.
#[derive(Debug, Default)]
pub struct InMemoryPersistence {
    records: DashMap<CacheKey, EntryRecord>,
    total_bytes: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
    /// Number of upcoming operations that should fail
    fail_next: AtomicU64,
    /// Artificial per-operation latency
    latency: Option<Duration>,
}

impl InMemoryPersistence {
    /// Create a new in-memory backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every operation by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make the next `n` store/remove operations fail
    pub fn fail_next(&self, n: u64) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Stored record for `key`
    pub fn get(&self, key: &CacheKey) -> Option<EntryRecord> {
        self.records.get(key).map(|r| r.value().clone())
    }

    /// Seed a record directly, bypassing the store
    pub fn insert(&self, record: EntryRecord) {
        let size = record.size_bytes();
        if let Some(old) = self.records.insert(record.key.clone(), record) {
            self.total_bytes
                .fetch_sub(old.size_bytes(), Ordering::Relaxed);
        }
        self.total_bytes.fetch_add(size, Ordering::Relaxed);
    }

    async fn simulate(&self, op: &str, key: &CacheKey) -> Result<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let should_fail = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(Error::Persistence(format!(
                "injected {} failure for {}",
                op, key
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl PersistenceBackend for InMemoryPersistence {
    async fn store(&self, record: EntryRecord) -> Result<()> {
        self.simulate("store", &record.key).await?;
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.insert(record);
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> Result<bool> {
        self.simulate("remove", key).await?;
        self.deletes.fetch_add(1, Ordering::Relaxed);

        if let Some((_, old)) = self.records.remove(key) {
            self.total_bytes
                .fetch_sub(old.size_bytes(), Ordering::Relaxed);
            return Ok(true);
        }
        Ok(false)
    }

    async fn load_all(&self) -> Result<Vec<EntryRecord>> {
        Ok(self.records.iter().map(|r| r.value().clone()).collect())
    }

    fn stats(&self) -> PersistenceStats {
        PersistenceStats {
            record_count: self.records.len() as u64,
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{ByteStream, CacheEntry, IdentityToken};
    use assert_matches::assert_matches;

    fn record(uri: &str, body: &'static str) -> EntryRecord {
        let entry = CacheEntry::new(
            CacheKey::new(uri),
            IdentityToken::from_u64(1),
            ByteStream::sealed("text/plain", body),
            None,
        );
        EntryRecord::from_entry(&entry).unwrap()
    }

    #[tokio::test]
    async fn test_store_and_remove() {
        let backend = InMemoryPersistence::new();

        backend.store(record("http://x/a", "1234")).await.unwrap();
        backend.store(record("http://x/b", "12")).await.unwrap();

        let stats = backend.stats();
        assert_eq!(stats.record_count, 2);
        assert_eq!(stats.total_bytes, 6);
        assert_eq!(stats.writes, 2);

        assert!(backend.remove(&CacheKey::new("http://x/a")).await.unwrap());
        assert!(!backend.remove(&CacheKey::new("http://x/a")).await.unwrap());
        assert_eq!(backend.stats().total_bytes, 2);
    }

    #[tokio::test]
    async fn test_overwrite_adjusts_size() {
        let backend = InMemoryPersistence::new();
        backend.store(record("http://x/a", "1234")).await.unwrap();
        backend.store(record("http://x/a", "1")).await.unwrap();

        let stats = backend.stats();
        assert_eq!(stats.record_count, 1);
        assert_eq!(stats.total_bytes, 1);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let backend = InMemoryPersistence::new();
        backend.fail_next(2);

        assert_matches!(
            backend.store(record("http://x/a", "1")).await,
            Err(Error::Persistence(_))
        );
        assert_matches!(
            backend.remove(&CacheKey::new("http://x/a")).await,
            Err(Error::Persistence(_))
        );
        backend.store(record("http://x/a", "1")).await.unwrap();
        assert_eq!(backend.load_all().await.unwrap().len(), 1);
    }
}
