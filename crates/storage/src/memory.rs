//! In-memory storage backend implementation.
//!
//! This module provides [`MemoryBackend`], an in-memory implementation of
//! [`StorageBackend`] for single-node deployments, development and tests.
//!
//! # Features
//!
//! - **Thread-safe**: Uses [`parking_lot::RwLock`] for concurrent access
//! - **Ordered storage**: Keys live in a [`BTreeMap`], so scans are naturally keyset-paginated
//! - **TTL support**: A background task evicts entries written with a TTL
//! - **Atomic conditional writes**: `compare_and_set` and `compare_and_delete` run under the write
//!   lock, so at most one concurrent caller wins
//!
//! # Example
//!
//! ```
//! use ticketry_storage::{MemoryBackend, StorageBackend};
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = MemoryBackend::new();
//!
//!     backend.set(b"TGT-1".to_vec(), b"session".to_vec()).await.unwrap();
//!     assert!(backend.delete(b"TGT-1").await.unwrap());
//!     assert!(!backend.delete(b"TGT-1").await.unwrap());
//! }
//! ```
//!
//! # Limitations
//!
//! - Data is not persisted; all data is lost when the process exits
//! - No replication or distributed features
//! - TTL cleanup runs every second, so eviction is not precise (reads still hide expired entries)

use std::{
    collections::BTreeMap,
    ops::Bound,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tokio::{select, sync::watch, time::sleep};

use crate::{
    backend::StorageBackend,
    error::StorageResult,
    size_limits::SizeLimits,
    types::{BackendCapabilities, KeyValue, ScanPage},
};

/// How often the background task sweeps expired entries.
const TTL_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Holds the shutdown signal sender. When dropped, the watch channel
/// closes and the cleanup task exits.
struct ShutdownGuard {
    shutdown_tx: watch::Sender<()>,
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        // Best-effort signal; the receiver may already be gone.
        let _ = self.shutdown_tx.send(());
    }
}

/// A stored value plus its optional eviction deadline.
#[derive(Debug, Clone)]
struct Entry {
    value: Bytes,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Vec<u8>, ttl: Option<Duration>) -> Self {
        Self { value: Bytes::from(value), expires_at: ttl.map(|ttl| Instant::now() + ttl) }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|deadline| deadline > now)
    }
}

/// In-memory storage backend using [`BTreeMap`].
///
/// # Cloning
///
/// `MemoryBackend` is cheaply cloneable via [`Arc`]. All clones share the
/// same underlying data store.
///
/// # Shutdown
///
/// The background TTL cleanup task stops automatically when all clones of
/// the `MemoryBackend` are dropped (via the internal `ShutdownGuard`).
/// You can also call [`shutdown`](Self::shutdown) to stop the task explicitly.
#[derive(Clone)]
pub struct MemoryBackend {
    data: Arc<RwLock<BTreeMap<Vec<u8>, Entry>>>,
    limits: SizeLimits,
    capabilities: BackendCapabilities,
    shutdown_guard: Arc<ShutdownGuard>,
}

impl MemoryBackend {
    /// Creates a new in-memory backend with default [`SizeLimits`].
    ///
    /// This also spawns a background task that periodically evicts entries
    /// written with a TTL, so it must be called within a Tokio runtime.
    pub fn new() -> Self {
        Self::with_limits(SizeLimits::default())
    }

    /// Creates a new in-memory backend enforcing the given size limits.
    pub fn with_limits(limits: SizeLimits) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let backend = Self {
            data: Arc::new(RwLock::new(BTreeMap::new())),
            limits,
            capabilities: BackendCapabilities { atomic_conditional_writes: true, native_ttl: true },
            shutdown_guard: Arc::new(ShutdownGuard { shutdown_tx }),
        };

        let backend_clone = backend.clone();
        tokio::spawn(async move {
            backend_clone.cleanup_expired_keys(shutdown_rx).await;
        });

        backend
    }

    /// Overrides the capabilities this backend reports.
    ///
    /// The memory backend is always atomic internally; this lets tests drive
    /// the registry through its degraded-consistency code paths.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: BackendCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Background task evicting entries whose TTL has elapsed.
    async fn cleanup_expired_keys(&self, mut shutdown_rx: watch::Receiver<()>) {
        loop {
            select! {
                _ = sleep(TTL_SWEEP_INTERVAL) => {}
                _ = shutdown_rx.changed() => {
                    return;
                }
            }

            let now = Instant::now();
            let expired: Vec<Vec<u8>> = {
                let data = self.data.read();
                data.iter()
                    .filter(|(_, entry)| !entry.is_live(now))
                    .map(|(key, _)| key.clone())
                    .collect()
            };

            if expired.is_empty() {
                continue;
            }

            let mut data = self.data.write();
            for key in expired {
                // Re-check under the write lock: the key may have been rewritten.
                if data.get(&key).is_some_and(|entry| !entry.is_live(now)) {
                    data.remove(&key);
                }
            }
        }
    }

    /// Explicitly signals the background TTL cleanup task to stop.
    ///
    /// Optional; the task also stops when all clones are dropped.
    pub fn shutdown(&self) {
        let _ = self.shutdown_guard.shutdown_tx.send(());
    }

    /// Number of physically stored entries, including expired ones not yet
    /// swept.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns `true` if no entries are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    fn live_value(entry: Option<&Entry>, now: Instant) -> Option<&Bytes> {
        entry.filter(|entry| entry.is_live(now)).map(|entry| &entry.value)
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    #[tracing::instrument(skip_all, fields(key_len = key.len()))]
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        let data = self.data.read();
        Ok(Self::live_value(data.get(key), Instant::now()).cloned())
    }

    #[tracing::instrument(skip_all, fields(key_len = key.len(), value_len = value.len()))]
    async fn set(&self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()> {
        self.limits.check_entry(&key, &value)?;
        self.data.write().insert(key, Entry::new(value, None));
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(key_len = key.len(), ttl_ms = ttl.as_millis() as u64))]
    async fn set_with_ttl(&self, key: Vec<u8>, value: Vec<u8>, ttl: Duration) -> StorageResult<()> {
        self.limits.check_entry(&key, &value)?;
        self.data.write().insert(key, Entry::new(value, Some(ttl)));
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(key_len = key.len(), insert = expected.is_none()))]
    async fn compare_and_set(
        &self,
        key: &[u8],
        expected: Option<&[u8]>,
        new_value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> StorageResult<()> {
        self.limits.check_entry(key, &new_value)?;

        let mut data = self.data.write();
        let current = Self::live_value(data.get(key), Instant::now());

        let matches = match (expected, current) {
            (None, None) => true,
            (Some(exp), Some(cur)) => exp == &cur[..],
            _ => false,
        };

        if !matches {
            return Err(crate::StorageError::Conflict);
        }

        data.insert(key.to_vec(), Entry::new(new_value, ttl));
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(key_len = key.len()))]
    async fn compare_and_delete(&self, key: &[u8], expected: &[u8]) -> StorageResult<bool> {
        self.limits.check_key(key)?;

        let mut data = self.data.write();
        let matches = Self::live_value(data.get(key), Instant::now())
            .is_some_and(|current| current[..] == *expected);

        if matches {
            data.remove(key);
        }
        Ok(matches)
    }

    #[tracing::instrument(skip_all, fields(key_len = key.len()))]
    async fn delete(&self, key: &[u8]) -> StorageResult<bool> {
        let removed = self.data.write().remove(key);
        Ok(removed.is_some_and(|entry| entry.is_live(Instant::now())))
    }

    #[tracing::instrument(skip_all, fields(limit = limit))]
    async fn scan(&self, after: Option<&[u8]>, limit: usize) -> StorageResult<ScanPage> {
        if limit == 0 {
            return Ok(ScanPage { entries: Vec::new(), next: after.map(Bytes::copy_from_slice) });
        }

        let start = match after {
            Some(cursor) => Bound::Excluded(cursor),
            None => Bound::Unbounded,
        };

        let now = Instant::now();
        let data = self.data.read();
        let mut range = data.range::<[u8], _>((start, Bound::Unbounded));

        let mut entries = Vec::with_capacity(limit.min(data.len()));
        let mut last_key: Option<&[u8]> = None;
        for (key, entry) in range.by_ref() {
            last_key = Some(key.as_slice());
            if entry.is_live(now) {
                entries.push(KeyValue::new(Bytes::copy_from_slice(key), entry.value.clone()));
                if entries.len() == limit {
                    break;
                }
            }
        }

        // Only hand out a cursor if something may follow it.
        let next = match last_key {
            Some(key) if range.next().is_some() => Some(Bytes::copy_from_slice(key)),
            _ => None,
        };

        Ok(ScanPage { entries, next })
    }

    fn capabilities(&self) -> BackendCapabilities {
        self.capabilities
    }
}
