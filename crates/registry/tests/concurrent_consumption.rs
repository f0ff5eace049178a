//! Concurrency tests: consumption races and contended writes to one ticket.
//!
//! Every test runs on a multi-threaded runtime so racing tasks genuinely
//! interleave their storage calls.

#![allow(clippy::expect_used, clippy::panic)]

mod common;

use std::{sync::Arc, time::Duration};

use common::{Harness, auth, harness, harness_with, split_cas_harness};
use ticketry_registry::{
    ExpirationPolicy, RegistryConfig, RegistryError, TicketKind, TicketPayload, TicketRegistry,
};
use ticketry_storage::{MemoryBackend, testutil::non_atomic_backend};
use tokio::task::JoinSet;

/// Number of tasks racing for each ticket.
const CONCURRENCY: usize = 16;

/// Number of service tickets raced over per test.
const ROUNDS: usize = 20;

async fn race_for(registry: &Arc<TicketRegistry>, id: &ticketry_registry::TicketId) -> usize {
    let mut set = JoinSet::new();
    for _ in 0..CONCURRENCY {
        let registry = Arc::clone(registry);
        let id = id.clone();
        set.spawn(async move { registry.use_ticket(&id, Some(TicketKind::Service)).await });
    }

    let mut winners = 0;
    while let Some(joined) = set.join_next().await {
        match joined.expect("task should not panic") {
            Ok(_) => winners += 1,
            Err(RegistryError::TicketNotFound { .. }) => {},
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    winners
}

async fn exactly_one_winner(h: Harness) {
    let tgt = h.registry.issue_ticket_granting_ticket(auth("alice")).await.expect("issue");

    for round in 0..ROUNDS {
        let st = h
            .registry
            .grant_service_ticket(tgt.id(), format!("https://app/{round}"), false)
            .await
            .expect("grant");
        assert_eq!(race_for(&h.registry, st.id()).await, 1, "round {round}");
    }

    let snapshot = h.registry.metrics().snapshot();
    assert_eq!(snapshot.tickets_consumed, ROUNDS as u64);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_validations_have_one_winner() {
    exactly_one_winner(harness()).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_validations_have_one_winner_on_non_atomic_backend() {
    exactly_one_winner(harness_with(non_atomic_backend(), RegistryConfig::default())).await;
}

async fn touches_are_all_recorded(h: Harness) {
    let tgt = h.registry.issue_ticket_granting_ticket(auth("alice")).await.expect("issue");

    let mut set = JoinSet::new();
    for _ in 0..CONCURRENCY {
        let registry = Arc::clone(&h.registry);
        let id = tgt.id().clone();
        set.spawn(async move { registry.use_ticket(&id, None).await });
    }
    while let Some(joined) = set.join_next().await {
        joined.expect("task should not panic").expect("touch should succeed");
    }

    let stored = h.registry.get_ticket(tgt.id(), None).await.expect("get");
    assert_eq!(stored.count_of_uses(), CONCURRENCY as u32);
}

/// Concurrent touches of one session are all recorded.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_touches_are_not_lost() {
    let config = RegistryConfig::builder().touch_retry_limit(1_000).build().expect("config");
    touches_are_all_recorded(harness_with(MemoryBackend::new(), config)).await;
}

/// Touches stay exact when the backend's compare-and-set is not atomic.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_touches_are_not_lost_on_split_cas_backend() {
    touches_are_all_recorded(split_cas_harness(RegistryConfig::default())).await;
}

/// A multi-use ticket admits exactly its quota of uses under contention.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn multi_use_quota_holds_under_contention() {
    const MAX_USES: u32 = 3;

    let config = RegistryConfig::builder().touch_retry_limit(1_000).build().expect("config");
    let h = harness_with(MemoryBackend::new(), config);
    let tgt = h.registry.issue_ticket_granting_ticket(auth("alice")).await.expect("issue");
    let st = h
        .registry
        .factory()
        .create(
            TicketPayload::service("https://app", false),
            Some(&tgt),
            Some(ExpirationPolicy::multi_use(MAX_USES, Duration::from_secs(60))),
        )
        .expect("create");
    h.registry.add_ticket(&st).await.expect("add");

    assert_eq!(race_for(&h.registry, st.id()).await, MAX_USES as usize);
}

async fn grants_are_all_cascaded(h: Harness) {
    let tgt = h.registry.issue_ticket_granting_ticket(auth("alice")).await.expect("issue");

    let mut set = JoinSet::new();
    for i in 0..CONCURRENCY {
        let registry = Arc::clone(&h.registry);
        let id = tgt.id().clone();
        set.spawn(async move {
            registry.grant_service_ticket(&id, format!("https://app/{i}"), false).await
        });
    }
    while let Some(joined) = set.join_next().await {
        joined.expect("task should not panic").expect("grant should succeed");
    }

    let stored = h.registry.get_ticket(tgt.id(), None).await.expect("get");
    assert_eq!(stored.descendant_ids().count(), CONCURRENCY);
    assert_eq!(stored.count_of_uses(), CONCURRENCY as u32);

    let removed = h.registry.delete_ticket(tgt.id()).await.expect("delete");
    assert_eq!(removed, CONCURRENCY + 1);
    assert!(h.backend.is_empty());
}

/// Service tickets granted concurrently from one session are all linked, so
/// logging out removes every one of them.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_grants_are_all_cascaded() {
    let config = RegistryConfig::builder().touch_retry_limit(1_000).build().expect("config");
    grants_are_all_cascaded(harness_with(MemoryBackend::new(), config)).await;
}

/// Descendant links survive racing grants when the backend checks and
/// writes in separate steps.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_grants_are_all_cascaded_on_split_cas_backend() {
    grants_are_all_cascaded(split_cas_harness(RegistryConfig::default())).await;
}

/// An update racing grants keeps every link the grants add.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn updates_keep_links_added_concurrently_on_split_cas_backend() {
    let h = split_cas_harness(RegistryConfig::default());
    let tgt = h.registry.issue_ticket_granting_ticket(auth("alice")).await.expect("issue");

    let mut set = JoinSet::new();
    for i in 0..CONCURRENCY {
        let registry = Arc::clone(&h.registry);
        let tgt = tgt.clone();
        set.spawn(async move {
            if i % 2 == 0 {
                registry.update_ticket(&tgt).await
            } else {
                registry
                    .grant_service_ticket(tgt.id(), format!("https://app/{i}"), false)
                    .await
                    .map(drop)
            }
        });
    }
    while let Some(joined) = set.join_next().await {
        joined.expect("task should not panic").expect("update or grant should succeed");
    }

    let stored = h.registry.get_ticket(tgt.id(), None).await.expect("get");
    assert_eq!(stored.descendant_ids().count(), CONCURRENCY / 2);
    assert_eq!(h.registry.delete_ticket(tgt.id()).await.expect("delete"), CONCURRENCY / 2 + 1);
    assert!(h.backend.is_empty());
}
