//! Registries with payload encryption enabled.

#![allow(clippy::expect_used, clippy::panic)]

mod common;

use std::sync::Arc;

use common::{auth, harness_with};
use ticketry_registry::{
    CipherKey, CryptoConfig, HmacCtrCipherExecutor, MockClock, RegistryConfig, RegistryError,
    TicketKind, TicketRegistry,
};
use ticketry_storage::{MemoryBackend, StorageBackend};

fn sealed_config(key: CipherKey) -> RegistryConfig {
    RegistryConfig::builder()
        .crypto(CryptoConfig::builder().enabled(true).key(key).build())
        .build()
        .expect("config")
}

#[tokio::test]
async fn backend_never_sees_ids_or_payloads() {
    let h = harness_with(MemoryBackend::new(), sealed_config(CipherKey::generate()));
    let tgt =
        h.registry.issue_ticket_granting_ticket(auth("alice@example.org")).await.expect("tgt");
    let st = h
        .registry
        .grant_service_ticket(tgt.id(), "https://secret.example.org", true)
        .await
        .expect("st");

    let page = h.backend.scan(None, 100).await.expect("scan");
    assert_eq!(page.entries.len(), 2);
    for entry in &page.entries {
        for needle in [tgt.id().as_str(), st.id().as_str(), "alice@example.org", "secret"] {
            let needle = needle.as_bytes();
            assert!(!entry.key.windows(needle.len()).any(|w| w == needle));
            assert!(!entry.value.windows(needle.len()).any(|w| w == needle));
        }
    }

    let validated = h.registry.use_ticket(st.id(), Some(TicketKind::Service)).await.expect("use");
    assert_eq!(validated.service(), Some("https://secret.example.org"));
}

#[tokio::test]
async fn enumeration_and_queries_decrypt() {
    let h = harness_with(MemoryBackend::new(), sealed_config(CipherKey::generate()));
    h.registry.issue_ticket_granting_ticket(auth("alice")).await.expect("tgt");
    h.registry.issue_ticket_granting_ticket(auth("alice")).await.expect("tgt");

    assert_eq!(h.registry.count_sessions_for("alice").await.expect("count"), 2);
}

/// A registry with the wrong key reports corrupt records, never a missing
/// ticket.
#[tokio::test]
async fn wrong_key_is_a_serialization_error() {
    let backend = MemoryBackend::new();
    let writer = harness_with(backend.clone(), sealed_config(CipherKey::generate()));
    let tgt = writer.registry.issue_ticket_granting_ticket(auth("alice")).await.expect("tgt");

    // Storage keys are plain digests, so the record is still found.
    let other = HmacCtrCipherExecutor::new(&CipherKey::generate()).expect("cipher");
    let reader = TicketRegistry::builder()
        .backend(Arc::new(backend))
        .cipher(Arc::new(other))
        .clock(Arc::new(MockClock::default()))
        .build()
        .expect("registry");

    let err = reader.get_ticket(tgt.id(), None).await.expect_err("cannot decrypt");
    assert!(matches!(err, RegistryError::TicketSerialization { .. }), "got {err:?}");
}

#[tokio::test]
async fn key_from_config_round_trips() {
    let key = CipherKey::generate();
    let encoded = key.to_base64url();
    let json = format!(r#"{{ "crypto": {{ "enabled": true, "key": "{}" }} }}"#, *encoded);
    let config: RegistryConfig = serde_json::from_str(&json).expect("config");

    let backend = MemoryBackend::new();
    let first = harness_with(backend.clone(), config.clone());
    let tgt = first.registry.issue_ticket_granting_ticket(auth("alice")).await.expect("tgt");

    let second = harness_with(backend, sealed_config(key));
    let read = second.registry.get_ticket(tgt.id(), None).await.expect("same key decrypts");
    assert_eq!(read.principal(), Some("alice"));
}
