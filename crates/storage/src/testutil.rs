//! Helpers for testing storage adapters and the code built on them.
//!
//! Feature gated behind `testutil`:
//!
//! ```toml
//! [dev-dependencies]
//! ticketry-storage = { workspace = true, features = ["testutil"] }
//! ```

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;

use crate::{
    StorageBackend,
    error::{StorageError, StorageResult},
    memory::MemoryBackend,
    types::{BackendCapabilities, KeyValue, ScanPage},
};

/// A ticket-shaped key, `"{prefix}-{idx:06}"`.
///
/// Zero padding keeps byte order equal to numeric order within a prefix.
#[must_use]
pub fn ticket_key(prefix: &str, idx: usize) -> Vec<u8> {
    format!("{prefix}-{idx:06}").into_bytes()
}

/// A [`MemoryBackend`] holding `count` keys under `prefix`, each storing its
/// own key as the value.
///
/// # Panics
///
/// Panics if a write fails.
pub async fn seeded_backend(prefix: &str, count: usize) -> MemoryBackend {
    let backend = MemoryBackend::new();
    for i in 0..count {
        let key = ticket_key(prefix, i);
        backend.set(key.clone(), key).await.expect("seeding write failed");
    }
    backend
}

/// A [`MemoryBackend`] that reports no atomic conditional writes.
///
/// The map is still atomic underneath; the flag only steers callers onto
/// their degraded-consistency paths.
#[must_use]
pub fn non_atomic_backend() -> MemoryBackend {
    MemoryBackend::new().with_capabilities(BackendCapabilities {
        atomic_conditional_writes: false,
        native_ttl: false,
    })
}

/// Follows scan cursors with pages of `page_size` until the keyspace is
/// exhausted and returns every entry seen.
///
/// # Errors
///
/// Propagates the first scan error.
pub async fn drain<B: StorageBackend + ?Sized>(
    backend: &B,
    page_size: usize,
) -> StorageResult<Vec<KeyValue>> {
    let mut entries = Vec::new();
    let mut cursor: Option<Bytes> = None;
    loop {
        let page = backend.scan(cursor.as_deref(), page_size).await?;
        assert!(page.entries.len() <= page_size, "page exceeded its limit");
        entries.extend(page.entries);
        match page.next {
            Some(next) => cursor = Some(next),
            None => return Ok(entries),
        }
    }
}

/// A backend whose conditional writes really are non-atomic.
///
/// `compare_and_set` and `compare_and_delete` read the current value, pause
/// for [`SPLIT_PAUSE`](Self::SPLIT_PAUSE), then write unconditionally, so
/// concurrent callers interleave the way they would against a store without
/// conditional primitives. Capabilities report no atomic conditional writes.
#[derive(Clone, Default)]
pub struct SplitCasBackend {
    inner: MemoryBackend,
}

impl SplitCasBackend {
    /// Gap between the check and the write.
    pub const SPLIT_PAUSE: Duration = Duration::from_millis(1);

    /// Wraps `inner`; clones of `inner` observe every write.
    #[must_use]
    pub fn new(inner: MemoryBackend) -> Self {
        Self { inner }
    }

    async fn current_matches(&self, key: &[u8], expected: Option<&[u8]>) -> StorageResult<bool> {
        let current = self.inner.get(key).await?;
        tokio::time::sleep(Self::SPLIT_PAUSE).await;
        Ok(current.as_deref() == expected)
    }
}

#[async_trait]
impl StorageBackend for SplitCasBackend {
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()> {
        self.inner.set(key, value).await
    }

    async fn set_with_ttl(&self, key: Vec<u8>, value: Vec<u8>, ttl: Duration) -> StorageResult<()> {
        self.inner.set_with_ttl(key, value, ttl).await
    }

    async fn compare_and_set(
        &self,
        key: &[u8],
        expected: Option<&[u8]>,
        new_value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> StorageResult<()> {
        if !self.current_matches(key, expected).await? {
            return Err(StorageError::conflict());
        }
        match ttl {
            Some(ttl) => self.inner.set_with_ttl(key.to_vec(), new_value, ttl).await,
            None => self.inner.set(key.to_vec(), new_value).await,
        }
    }

    async fn compare_and_delete(&self, key: &[u8], expected: &[u8]) -> StorageResult<bool> {
        if !self.current_matches(key, Some(expected)).await? {
            return Ok(false);
        }
        self.inner.delete(key).await
    }

    async fn delete(&self, key: &[u8]) -> StorageResult<bool> {
        self.inner.delete(key).await
    }

    async fn scan(&self, after: Option<&[u8]>, limit: usize) -> StorageResult<ScanPage> {
        self.inner.scan(after, limit).await
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities { atomic_conditional_writes: false, native_ttl: false }
    }
}

/// A [`MemoryBackend`] wrapper that fails reads or deletes on demand.
///
/// Failures are [`StorageError::Connection`]. Every `get` is counted,
/// failed or not, so tests can assert that callers did not retry.
#[derive(Clone)]
pub struct FailingBackend {
    inner: MemoryBackend,
    fail_gets: Arc<AtomicBool>,
    fail_deletes: Arc<AtomicBool>,
    gets: Arc<AtomicUsize>,
}

impl FailingBackend {
    /// Wraps `inner` with every operation passing through.
    #[must_use]
    pub fn new(inner: MemoryBackend) -> Self {
        Self {
            inner,
            fail_gets: Arc::new(AtomicBool::new(false)),
            fail_deletes: Arc::new(AtomicBool::new(false)),
            gets: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Makes every subsequent `get` fail (or succeed again).
    pub fn fail_gets(&self, fail: bool) {
        self.fail_gets.store(fail, Ordering::SeqCst);
    }

    /// Makes every subsequent `delete` and `compare_and_delete` fail (or
    /// succeed again).
    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Number of `get` calls seen so far.
    #[must_use]
    pub fn get_calls(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    fn injected(op: &str) -> StorageError {
        StorageError::connection(format!("injected {op} failure"))
    }
}

#[async_trait]
impl StorageBackend for FailingBackend {
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if self.fail_gets.load(Ordering::SeqCst) {
            return Err(Self::injected("get"));
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()> {
        self.inner.set(key, value).await
    }

    async fn set_with_ttl(&self, key: Vec<u8>, value: Vec<u8>, ttl: Duration) -> StorageResult<()> {
        self.inner.set_with_ttl(key, value, ttl).await
    }

    async fn compare_and_set(
        &self,
        key: &[u8],
        expected: Option<&[u8]>,
        new_value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> StorageResult<()> {
        self.inner.compare_and_set(key, expected, new_value, ttl).await
    }

    async fn compare_and_delete(&self, key: &[u8], expected: &[u8]) -> StorageResult<bool> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(Self::injected("compare_and_delete"));
        }
        self.inner.compare_and_delete(key, expected).await
    }

    async fn delete(&self, key: &[u8]) -> StorageResult<bool> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(Self::injected("delete"));
        }
        self.inner.delete(key).await
    }

    async fn scan(&self, after: Option<&[u8]>, limit: usize) -> StorageResult<ScanPage> {
        self.inner.scan(after, limit).await
    }

    fn capabilities(&self) -> BackendCapabilities {
        self.inner.capabilities()
    }
}

/// Assert that a [`StorageResult`](crate::StorageResult) is a
/// [`StorageError::Conflict`](crate::StorageError::Conflict).
#[macro_export]
macro_rules! assert_conflict {
    ($result:expr) => {
        match $result {
            Err($crate::error::StorageError::Conflict) => {},
            other => panic!("expected StorageError::Conflict, got: {other:?}"),
        }
    };
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn ticket_keys_sort_numerically() {
        assert_eq!(ticket_key("ST", 42), b"ST-000042");
        assert!(ticket_key("ST", 9) < ticket_key("ST", 10));
        assert!(ticket_key("PT", 999) < ticket_key("ST", 0));
    }

    #[tokio::test]
    async fn drain_walks_every_page() {
        let backend = seeded_backend("TGT", 11).await;
        let entries = drain(&backend, 3).await.unwrap();
        assert_eq!(entries.len(), 11);
        assert!(entries.iter().all(|kv| kv.key == kv.value));
        assert_eq!(entries[10].key.as_ref(), ticket_key("TGT", 10));
    }

    #[tokio::test]
    async fn non_atomic_flag_is_reported() {
        assert!(!non_atomic_backend().capabilities().atomic_conditional_writes);
    }

    #[tokio::test]
    async fn conflict_macro_matches_failed_insert() {
        let backend = MemoryBackend::new();
        backend.compare_and_set(b"ST-1", None, b"a".to_vec(), None).await.unwrap();
        assert_conflict!(backend.compare_and_set(b"ST-1", None, b"b".to_vec(), None).await);
        assert!(matches!(StorageError::conflict(), StorageError::Conflict));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn split_cas_lets_racing_writers_both_succeed() {
        let backend = SplitCasBackend::default();
        backend.set(b"TGT-1".to_vec(), b"v0".to_vec()).await.unwrap();

        let (a, b) = tokio::join!(
            backend.compare_and_set(b"TGT-1", Some(b"v0"), b"a".to_vec(), None),
            backend.compare_and_set(b"TGT-1", Some(b"v0"), b"b".to_vec(), None),
        );
        assert!(a.is_ok() && b.is_ok(), "both checks pass before either write");
        assert!(!backend.capabilities().atomic_conditional_writes);
    }

    #[tokio::test]
    async fn failing_backend_counts_and_fails_on_demand() {
        let inner = MemoryBackend::new();
        let backend = FailingBackend::new(inner.clone());
        backend.set(b"ST-1".to_vec(), b"v".to_vec()).await.unwrap();

        backend.fail_gets(true);
        assert!(matches!(backend.get(b"ST-1").await, Err(StorageError::Connection { .. })));
        backend.fail_gets(false);
        assert!(backend.get(b"ST-1").await.unwrap().is_some());
        assert_eq!(backend.get_calls(), 2);

        backend.fail_deletes(true);
        assert!(backend.delete(b"ST-1").await.is_err());
        assert!(backend.compare_and_delete(b"ST-1", b"v").await.is_err());
        assert_eq!(inner.len(), 1);
    }
}
