//! Common types used across storage operations.

use bytes::Bytes;

/// Key-value pair returned from scans.
///
/// # Examples
///
/// ```
/// use bytes::Bytes;
/// use ticketry_storage::KeyValue;
///
/// let kv = KeyValue::new(Bytes::from("TGT-abc"), Bytes::from("{}"));
/// assert_eq!(kv.key, Bytes::from("TGT-abc"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    /// The key identifying this entry.
    pub key: Bytes,

    /// The value stored at this key.
    pub value: Bytes,
}

impl KeyValue {
    /// Creates a new key-value pair.
    pub fn new(key: Bytes, value: Bytes) -> Self {
        Self { key, value }
    }
}

/// One page of a keyset-paginated scan.
///
/// Pass [`next`](Self::next) back as the `after` cursor of the following
/// [`scan`](crate::StorageBackend::scan) call. A `None` cursor means the scan
/// reached the end of the keyspace when this page was produced.
///
/// Scans are not snapshots: entries written or removed between pages may or
/// may not appear.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    /// Entries in ascending key order.
    pub entries: Vec<KeyValue>,

    /// Cursor for the next page, if more entries may follow.
    pub next: Option<Bytes>,
}

impl ScanPage {
    /// Returns `true` if this is the final page.
    #[must_use]
    pub fn is_last(&self) -> bool {
        self.next.is_none()
    }
}

/// Consistency features a backend advertises to the registry.
///
/// The registry adapts its concurrency discipline to these flags rather than
/// assuming every adapter is linearizable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendCapabilities {
    /// `compare_and_delete` and `compare_and_set` are atomic with respect to
    /// every other writer of the same key, across all processes sharing the
    /// backend.
    ///
    /// When `false`, the registry serializes consumption of each ticket id
    /// behind an in-process lock; at-most-once consumption then only holds
    /// for callers sharing one registry instance.
    pub atomic_conditional_writes: bool,

    /// The backend evicts keys written with
    /// [`set_with_ttl`](crate::StorageBackend::set_with_ttl) on its own.
    pub native_ttl: bool,
}

impl Default for BackendCapabilities {
    fn default() -> Self {
        Self { atomic_conditional_writes: true, native_ttl: false }
    }
}
