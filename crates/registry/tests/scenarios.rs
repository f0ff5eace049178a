//! End-to-end ticket lifecycle scenarios.

#![allow(clippy::expect_used, clippy::panic)]

mod common;

use std::time::Duration;

use common::{auth, harness};
use ticketry_registry::{Clock, ExpirationPolicy, RegistryError, TicketKind, TicketPayload};

fn assert_not_found<T: std::fmt::Debug>(result: Result<T, RegistryError>) {
    match result {
        Err(RegistryError::TicketNotFound { .. }) => {},
        other => panic!("expected TicketNotFound, got: {other:?}"),
    }
}

/// Session with a 2h idle timeout: a read after 1h keeps it alive and
/// slides the window; 3 more hours of silence kill it.
#[tokio::test]
async fn tgt_idle_timeout_slides_on_use() {
    let h = harness();
    let tgt = h.registry.issue_ticket_granting_ticket(auth("alice")).await.expect("issue");

    h.clock.advance(Duration::from_secs(3600));
    let touched = h.registry.use_ticket(tgt.id(), Some(TicketKind::TicketGranting)).await;
    let touched = touched.expect("valid after 1h");
    assert_eq!(touched.last_time_used(), h.clock.now());
    assert_eq!(touched.count_of_uses(), 1);

    h.clock.advance(Duration::from_secs(3600 + 1800));
    assert!(h.registry.get_ticket(tgt.id(), None).await.is_ok(), "1.5h since last use");

    h.clock.advance(Duration::from_secs(3 * 3600));
    assert_not_found(h.registry.get_ticket(tgt.id(), None).await);
}

/// Deleting a session makes every service ticket minted from it invalid.
#[tokio::test]
async fn deleting_tgt_invalidates_service_tickets() {
    let h = harness();
    let tgt = h.registry.issue_ticket_granting_ticket(auth("alice")).await.expect("issue");
    let st1 = h.registry.grant_service_ticket(tgt.id(), "https://a", true).await.expect("st1");
    let st2 = h.registry.grant_service_ticket(tgt.id(), "https://b", false).await.expect("st2");

    assert_eq!(h.registry.delete_ticket(tgt.id()).await.expect("delete"), 3);
    assert_not_found(h.registry.use_ticket(st1.id(), Some(TicketKind::Service)).await);
    assert_not_found(h.registry.get_ticket(st2.id(), None).await);
    assert_eq!(h.registry.delete_ticket(tgt.id()).await.expect("second delete"), 0);
}

/// Two sequential validations of one service ticket: one success, then
/// not found, and not found again.
#[tokio::test]
async fn service_ticket_validates_once() {
    let h = harness();
    let tgt = h.registry.issue_ticket_granting_ticket(auth("alice")).await.expect("issue");
    let st = h.registry.grant_service_ticket(tgt.id(), "https://app", false).await.expect("st");

    let validated = h.registry.use_ticket(st.id(), Some(TicketKind::Service)).await;
    assert_eq!(validated.expect("first validation").service(), Some("https://app"));
    assert_not_found(h.registry.use_ticket(st.id(), Some(TicketKind::Service)).await);
    assert_not_found(h.registry.use_ticket(st.id(), Some(TicketKind::Service)).await);
}

/// Hard timeout boundary: valid at exactly creation + ttl, gone just after.
#[tokio::test]
async fn hard_timeout_boundary_is_strict() {
    let h = harness();
    let tgt = h.registry.issue_ticket_granting_ticket(auth("alice")).await.expect("issue");
    let tst = h
        .registry
        .factory()
        .create(
            TicketPayload::transient(Some("https://app".into()), Default::default()),
            Some(&tgt),
            Some(ExpirationPolicy::hard_timeout(Duration::from_secs(60))),
        )
        .expect("create");
    h.registry.add_ticket(&tst).await.expect("add");

    h.clock.advance(Duration::from_secs(60));
    assert!(h.registry.get_ticket(tst.id(), None).await.is_ok());

    h.clock.advance(Duration::from_millis(1));
    assert_not_found(h.registry.get_ticket(tst.id(), None).await);
}

/// A proxy chain dies with its session even when the proxy ticket itself
/// would still be valid.
#[tokio::test]
async fn proxy_chain_expires_with_session() {
    let h = harness();
    let tgt = h.registry.issue_ticket_granting_ticket(auth("alice")).await.expect("issue");
    let st = h.registry.grant_service_ticket(tgt.id(), "https://proxy", false).await.expect("st");
    let st = h.registry.use_ticket(st.id(), Some(TicketKind::Service)).await.expect("validate");
    let pgt = h.registry.grant_proxy_granting_ticket(&st, "https://proxy/cb").await.expect("pgt");
    assert_eq!(pgt.kind(), TicketKind::ProxyGranting);
    assert_eq!(pgt.principal(), Some("alice"));

    let pt = h.registry.grant_proxy_ticket(pgt.id(), "https://backend").await.expect("pt");
    assert!(h.registry.get_ticket(pt.id(), Some(TicketKind::Proxy)).await.is_ok());

    h.registry.delete_ticket(tgt.id()).await.expect("logout");
    assert_not_found(h.registry.get_ticket(pgt.id(), None).await);
    assert_not_found(h.registry.get_ticket(pt.id(), None).await);
}

/// Granting from an expired session is refused rather than reported as
/// a missing ticket.
#[tokio::test]
async fn granting_from_expired_session_is_invalid_creation() {
    let h = harness();
    let tgt = h.registry.issue_ticket_granting_ticket(auth("alice")).await.expect("issue");
    h.clock.advance(Duration::from_secs(9 * 3600));

    let err = h
        .registry
        .grant_service_ticket(tgt.id(), "https://app", false)
        .await
        .expect_err("session has expired");
    assert!(matches!(err, RegistryError::InvalidTicketCreation { .. }), "got {err:?}");
}

/// Principal queries see only live sessions.
#[tokio::test]
async fn principal_queries_track_sessions() {
    let h = harness();
    let first = h.registry.issue_ticket_granting_ticket(auth("alice")).await.expect("issue");
    h.clock.advance(Duration::from_secs(3600));
    h.registry.issue_ticket_granting_ticket(auth("alice")).await.expect("issue");
    h.registry.issue_ticket_granting_ticket(auth("bob")).await.expect("issue");

    assert_eq!(h.registry.count_sessions_for("alice").await.expect("count"), 2);

    h.clock.advance(Duration::from_secs(3600 + 1));
    let sessions = h.registry.sessions_for_principal("alice").await.expect("query");
    assert_eq!(sessions.len(), 1);
    assert_ne!(sessions[0].id(), first.id());
    assert_eq!(h.registry.session_count().await.expect("count"), 2);
}
