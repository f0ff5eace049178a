//! Conformance test suite for [`StorageBackend`] implementations.
//!
//! Every ticket storage adapter (in-memory, relational, document, cache
//! backed) must satisfy the same byte-level contract for the registry's
//! guarantees to hold. Each function below checks one clause of that
//! contract against a fresh backend.
//!
//! # Usage
//!
//! Enable the `testutil` feature and call each conformance function with
//! a fresh backend instance:
//!
//! ```no_run
//! use ticketry_storage::{MemoryBackend, conformance};
//!
//! #[tokio::test]
//! async fn crud_get_returns_none_for_missing_key() {
//!     conformance::crud_get_returns_none_for_missing_key(&MemoryBackend::new()).await;
//! }
//! ```
//!
//! # Test Categories
//!
//! | Category | Contract aspect |
//! |----------|-----------------|
//! | CRUD | Basic get/set/delete semantics |
//! | Conditional | `compare_and_set` / `compare_and_delete` preconditions |
//! | Scan | Pagination completeness and ordering |
//! | TTL | Expired entries behave as absent |
//! | Concurrent | Single winner under contention |

use std::{sync::Arc, time::Duration};

use bytes::Bytes;

use crate::{backend::StorageBackend, error::StorageError, testutil::drain};

/// Number of tasks racing in the concurrency checks.
const CONTENDERS: usize = 16;

// ============================================================================
// CRUD
// ============================================================================

/// `get` on a nonexistent key returns `Ok(None)`.
pub async fn crud_get_returns_none_for_missing_key<B: StorageBackend>(backend: &B) {
    let result = backend.get(b"nonexistent").await;
    assert!(result.is_ok(), "get should not error on missing key: {result:?}");
    assert_eq!(result.expect("checked above"), None, "missing key should return None");
}

/// `set` then `get` round-trips the value.
pub async fn crud_set_then_get_returns_value<B: StorageBackend>(backend: &B) {
    backend.set(b"k1".to_vec(), b"v1".to_vec()).await.expect("set should succeed");
    let val = backend.get(b"k1").await.expect("get should succeed");
    assert_eq!(val, Some(Bytes::from("v1")));
}

/// `set` on an existing key overwrites the value.
pub async fn crud_set_overwrites_existing<B: StorageBackend>(backend: &B) {
    backend.set(b"k1".to_vec(), b"original".to_vec()).await.expect("set");
    backend.set(b"k1".to_vec(), b"updated".to_vec()).await.expect("overwrite");
    let val = backend.get(b"k1").await.expect("get");
    assert_eq!(val, Some(Bytes::from("updated")));
}

/// `delete` reports whether something was removed and never errors on a
/// missing key.
pub async fn crud_delete_reports_presence<B: StorageBackend>(backend: &B) {
    backend.set(b"k2".to_vec(), b"val".to_vec()).await.expect("set");
    assert!(backend.delete(b"k2").await.expect("first delete"), "first delete removes the key");
    assert!(!backend.delete(b"k2").await.expect("second delete"), "second delete is a no-op");
    assert_eq!(backend.get(b"k2").await.expect("get after delete"), None);
}

/// Keys are byte-level distinct: `"key"` and `"key\x00"` are different.
pub async fn crud_keys_are_byte_distinct<B: StorageBackend>(backend: &B) {
    backend.set(b"key".to_vec(), b"a".to_vec()).await.expect("set key");
    backend.set(b"key\x00".to_vec(), b"b".to_vec()).await.expect("set key+null");
    assert_eq!(backend.get(b"key").await.expect("get key"), Some(Bytes::from("a")));
    assert_eq!(backend.get(b"key\x00").await.expect("get key+null"), Some(Bytes::from("b")));
}

/// An empty value is stored and returned as empty, not as absent.
pub async fn crud_empty_value_roundtrip<B: StorageBackend>(backend: &B) {
    backend.set(b"empty".to_vec(), Vec::new()).await.expect("set empty value");
    assert_eq!(backend.get(b"empty").await.expect("get"), Some(Bytes::new()));
}

// ============================================================================
// Conditional writes
// ============================================================================

/// `compare_and_set(expected = None)` inserts only when the key is absent.
pub async fn cas_insert_if_absent<B: StorageBackend>(backend: &B) {
    backend.compare_and_set(b"c", None, b"first".to_vec(), None).await.expect("insert");
    let second = backend.compare_and_set(b"c", None, b"second".to_vec(), None).await;
    assert!(matches!(second, Err(StorageError::Conflict)), "got {second:?}");
    assert_eq!(backend.get(b"c").await.expect("get"), Some(Bytes::from("first")));
}

/// `compare_and_set(expected = Some)` updates only when bytes match.
pub async fn cas_update_if_unchanged<B: StorageBackend>(backend: &B) {
    backend.set(b"c".to_vec(), b"v1".to_vec()).await.expect("seed");
    backend.compare_and_set(b"c", Some(b"v1"), b"v2".to_vec(), None).await.expect("update");
    let stale = backend.compare_and_set(b"c", Some(b"v1"), b"v3".to_vec(), None).await;
    assert!(matches!(stale, Err(StorageError::Conflict)), "got {stale:?}");
    assert_eq!(backend.get(b"c").await.expect("get"), Some(Bytes::from("v2")));
}

/// `compare_and_delete` removes only an exactly matching value.
pub async fn cad_removes_only_matching_value<B: StorageBackend>(backend: &B) {
    backend.set(b"d".to_vec(), b"v1".to_vec()).await.expect("seed");
    assert!(!backend.compare_and_delete(b"d", b"other").await.expect("mismatch"));
    assert_eq!(backend.get(b"d").await.expect("get"), Some(Bytes::from("v1")));
    assert!(backend.compare_and_delete(b"d", b"v1").await.expect("match"));
    assert_eq!(backend.get(b"d").await.expect("get"), None);
}

/// `compare_and_delete` on a missing key reports `false`, not an error.
pub async fn cad_missing_key_returns_false<B: StorageBackend>(backend: &B) {
    assert!(!backend.compare_and_delete(b"ghost", b"v").await.expect("cad"));
}

// ============================================================================
// Scan
// ============================================================================

/// Walking every page visits each stored key exactly once.
pub async fn scan_pages_cover_every_key_once<B: StorageBackend>(backend: &B) {
    for i in 0..25 {
        backend.set(format!("s:{i:03}").into_bytes(), b"v".to_vec()).await.expect("set");
    }

    let seen: Vec<Bytes> = drain(backend, 7)
        .await
        .expect("scan")
        .into_iter()
        .map(|kv| kv.key)
        .collect();

    assert_eq!(seen.len(), 25);
    let mut deduped = seen.clone();
    deduped.dedup();
    assert_eq!(deduped.len(), 25, "scan returned duplicates");
}

/// Scan results are in ascending key order.
pub async fn scan_results_are_ordered<B: StorageBackend>(backend: &B) {
    for key in [b"r:c", b"r:a", b"r:b"] {
        backend.set(key.to_vec(), b"v".to_vec()).await.expect("set");
    }
    let page = backend.scan(None, 10).await.expect("scan");
    let keys: Vec<&[u8]> = page.entries.iter().map(|kv| kv.key.as_ref()).collect();
    assert_eq!(keys, vec![b"r:a".as_slice(), b"r:b", b"r:c"], "scan results must be sorted");
}

/// Scanning an empty backend yields one empty, final page.
pub async fn scan_empty_backend<B: StorageBackend>(backend: &B) {
    let page = backend.scan(None, 10).await.expect("scan");
    assert!(page.entries.is_empty());
    assert!(page.is_last());
}

// ============================================================================
// TTL
// ============================================================================

/// An entry written with a zero TTL is absent on the next read.
pub async fn ttl_zero_is_immediately_absent<B: StorageBackend>(backend: &B) {
    backend.set_with_ttl(b"t".to_vec(), b"v".to_vec(), Duration::ZERO).await.expect("set_with_ttl");
    assert_eq!(backend.get(b"t").await.expect("get"), None);
}

/// A conditional write with a TTL attaches that TTL to the new value.
pub async fn ttl_cas_carries_new_ttl<B: StorageBackend>(backend: &B) {
    backend.set(b"t".to_vec(), b"v1".to_vec()).await.expect("seed");
    backend
        .compare_and_set(b"t", Some(b"v1"), b"v2".to_vec(), Some(Duration::ZERO))
        .await
        .expect("cas");
    assert_eq!(backend.get(b"t").await.expect("get"), None, "new value should carry a zero TTL");
}

// ============================================================================
// Concurrency
// ============================================================================

/// Many callers racing `compare_and_delete` on one value: exactly one wins.
pub async fn concurrent_cad_single_winner<B: StorageBackend + 'static>(backend: Arc<B>) {
    backend.set(b"race".to_vec(), b"ticket".to_vec()).await.expect("seed");

    let mut handles = Vec::with_capacity(CONTENDERS);
    for _ in 0..CONTENDERS {
        let backend = Arc::clone(&backend);
        handles.push(tokio::spawn(
            async move { backend.compare_and_delete(b"race", b"ticket").await },
        ));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.expect("task should not panic").expect("cad should not error") {
            winners += 1;
        }
    }
    assert_eq!(winners, 1, "exactly one compare_and_delete should win");
}

/// Many callers racing `compare_and_set` from the same snapshot: exactly one wins.
pub async fn concurrent_cas_single_winner<B: StorageBackend + 'static>(backend: Arc<B>) {
    backend.set(b"race".to_vec(), b"v0".to_vec()).await.expect("seed");

    let mut handles = Vec::with_capacity(CONTENDERS);
    for task in 0..CONTENDERS {
        let backend = Arc::clone(&backend);
        handles.push(tokio::spawn(async move {
            backend
                .compare_and_set(b"race", Some(b"v0"), format!("task{task}").into_bytes(), None)
                .await
        }));
    }

    let mut winners = 0;
    for handle in handles {
        match handle.await.expect("task should not panic") {
            Ok(()) => winners += 1,
            Err(StorageError::Conflict) => {},
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(winners, 1, "exactly one compare_and_set should win");
}
