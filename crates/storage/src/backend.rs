//! Storage backend trait definition.
//!
//! This module defines the [`StorageBackend`] trait, the contract every ticket
//! storage adapter implements. The registry never talks to a database,
//! document store or distributed cache directly; it talks to this trait.
//!
//! # Design Philosophy
//!
//! - **Keys and values are bytes**: serialization and encryption happen above this layer, so an
//!   adapter never sees a ticket in plaintext unless the deployment chooses no cipher
//! - **Async by default**: adapters may block on network I/O
//! - **Conditional writes**: `compare_and_set` and `compare_and_delete` are the only primitives the
//!   registry relies on for correctness under concurrency
//! - **Paginated scans**: enumeration is keyset-paginated and restartable
//!
//! # Implementing a Backend
//!
//! 1. Implement the [`StorageBackend`] trait
//! 2. Report honest [`BackendCapabilities`]
//! 3. Map backend-specific errors to [`StorageError`]
//! 4. Run the [`conformance`](crate::conformance) suite against it
//!
//! See [`MemoryBackend`](crate::MemoryBackend) for a reference implementation.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::{
    error::StorageResult,
    types::{BackendCapabilities, ScanPage},
};

/// Abstract storage backend for ticket persistence.
///
/// Backends are expected to be thread-safe (`Send + Sync`) and support
/// concurrent operations. Consistency beyond what
/// [`capabilities`](StorageBackend::capabilities) advertises must not be
/// assumed by callers.
///
/// # Key Operations
///
/// | Method | Description |
/// |--------|-------------|
/// | [`get`](StorageBackend::get) | Retrieve a single value by key |
/// | [`set`](StorageBackend::set) | Store a key-value pair |
/// | [`set_with_ttl`](StorageBackend::set_with_ttl) | Store with an eviction hint |
/// | [`compare_and_set`](StorageBackend::compare_and_set) | Atomic compare-and-swap |
/// | [`compare_and_delete`](StorageBackend::compare_and_delete) | Atomic compare-and-remove |
/// | [`delete`](StorageBackend::delete) | Remove a key |
/// | [`scan`](StorageBackend::scan) | Enumerate entries page by page |
///
/// # Example
///
/// ```
/// use bytes::Bytes;
/// use ticketry_storage::{MemoryBackend, StorageBackend};
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let backend = MemoryBackend::new();
///
/// backend.set(b"ST-1".to_vec(), b"payload".to_vec()).await.unwrap();
/// let value = backend.get(b"ST-1").await.unwrap();
/// assert_eq!(value, Some(Bytes::from("payload")));
///
/// assert!(backend.compare_and_delete(b"ST-1", b"payload").await.unwrap());
/// assert!(!backend.compare_and_delete(b"ST-1", b"payload").await.unwrap());
/// # });
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Retrieves a value by key.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(bytes))` if the key exists
    /// - `Ok(None)` if the key doesn't exist (or its TTL elapsed)
    /// - `Err(...)` on storage errors
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>>;

    /// Stores a key-value pair, overwriting any existing value and clearing
    /// any TTL previously attached to the key.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn set(&self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()>;

    /// Stores a key-value pair that the backend may evict after `ttl`.
    ///
    /// The TTL is an eviction hint, not a validity rule: the registry still
    /// evaluates expiration policies on every read. Backends without native
    /// expiry may keep the entry longer.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn set_with_ttl(&self, key: Vec<u8>, value: Vec<u8>, ttl: Duration) -> StorageResult<()>;

    /// Atomically sets a key's value if it matches the expected current value.
    ///
    /// # Semantics
    ///
    /// - **`expected: None`**: insert-if-absent. Succeeds only when the key does not exist (or has
    ///   expired).
    /// - **`expected: Some(value)`**: update-if-unchanged. Succeeds only when the current value is
    ///   a byte-for-byte match of `value`.
    ///
    /// When `ttl` is `Some`, the new value carries that eviction hint;
    /// otherwise any existing TTL on the key is cleared.
    ///
    /// # Errors
    ///
    /// - [`StorageError::Conflict`](crate::StorageError::Conflict) when the precondition fails.
    /// - [`StorageError::SizeLimitExceeded`](crate::StorageError::SizeLimitExceeded) when the key
    ///   or value is too large.
    #[must_use = "compare-and-set may fail with a conflict and errors must be handled"]
    async fn compare_and_set(
        &self,
        key: &[u8],
        expected: Option<&[u8]>,
        new_value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> StorageResult<()>;

    /// Atomically removes a key if its current value is a byte-for-byte match
    /// of `expected`.
    ///
    /// Returns `Ok(true)` if this call removed the entry, `Ok(false)` if the
    /// key was absent or held different bytes. Of several concurrent callers
    /// passing the same `expected` bytes, at most one observes `true` on a
    /// backend whose capabilities report atomic conditional writes.
    #[must_use = "the result tells whether this caller won the removal"]
    async fn compare_and_delete(&self, key: &[u8], expected: &[u8]) -> StorageResult<bool>;

    /// Deletes a key.
    ///
    /// Returns `Ok(true)` if an entry was removed and `Ok(false)` if the key
    /// did not exist. Deleting a missing key is never an error.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn delete(&self, key: &[u8]) -> StorageResult<bool>;

    /// Returns up to `limit` entries whose keys sort strictly after `after`
    /// (or from the beginning when `after` is `None`), in ascending key order.
    ///
    /// The returned [`ScanPage::next`] cursor resumes the scan. Entries that
    /// are added or removed while a scan is in progress may or may not be
    /// observed.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn scan(&self, after: Option<&[u8]>, limit: usize) -> StorageResult<ScanPage>;

    /// Consistency features of this backend.
    ///
    /// The default claims atomic conditional writes and no native TTL.
    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities::default()
    }
}
