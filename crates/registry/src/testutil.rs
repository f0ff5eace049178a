//! Shared test utilities for registry testing.
//!
//! Builds registries over a [`MemoryBackend`] driven by a [`MockClock`], so
//! expiration can be tested by advancing time instead of sleeping. Feature
//! gated behind `testutil`.
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use std::time::Duration;
//! use ticketry_registry::testutil::{authentication, test_registry};
//!
//! # async fn example() {
//! let t = test_registry();
//! let tgt = t.registry.issue_ticket_granting_ticket(authentication("alice")).await.unwrap();
//! t.clock.advance(Duration::from_secs(3 * 3600));
//! ticketry_registry::assert_not_found!(t.registry.get_ticket(tgt.id(), None).await);
//! # }
//! ```

use std::sync::Arc;

use ticketry_storage::MemoryBackend;

use crate::{
    cipher::CipherKey,
    clock::MockClock,
    config::{CryptoConfig, RegistryConfig},
    registry::TicketRegistry,
    ticket::Authentication,
};

/// A registry together with the handles tests need to drive it.
#[derive(Clone)]
pub struct TestRegistry {
    /// The registry under test.
    pub registry: Arc<TicketRegistry>,
    /// Shared with the registry; advance it to age tickets.
    pub clock: MockClock,
    /// The backing store, for inspecting raw records.
    pub backend: MemoryBackend,
}

/// A registry with default configuration over a fresh [`MemoryBackend`].
///
/// # Panics
///
/// Must be called within a Tokio runtime context.
#[must_use]
pub fn test_registry() -> TestRegistry {
    test_registry_with(MemoryBackend::new(), RegistryConfig::default())
}

/// A registry over `backend` with `config`.
///
/// # Panics
///
/// Panics if `config` is invalid.
#[must_use]
pub fn test_registry_with(backend: MemoryBackend, config: RegistryConfig) -> TestRegistry {
    let clock = MockClock::default();
    let registry = TicketRegistry::builder()
        .backend(Arc::new(backend.clone()))
        .config(config)
        .clock(Arc::new(clock.clone()))
        .build()
        .expect("test registry configuration must be valid");
    TestRegistry { registry: Arc::new(registry), clock, backend }
}

/// A registry that seals payloads and digests ids with a fresh random key.
///
/// # Panics
///
/// Must be called within a Tokio runtime context.
#[must_use]
pub fn encrypted_test_registry() -> TestRegistry {
    let config = RegistryConfig::builder()
        .crypto(CryptoConfig::builder().enabled(true).key(CipherKey::generate()).build())
        .build()
        .expect("generated key is long enough");
    test_registry_with(MemoryBackend::new(), config)
}

/// An authentication for `principal`, authenticated now.
#[must_use]
pub fn authentication(principal: &str) -> Authentication {
    Authentication::builder().principal(principal).build()
}

/// Assert that a registry result is [`RegistryError::TicketNotFound`].
///
/// [`RegistryError::TicketNotFound`]: crate::RegistryError::TicketNotFound
#[macro_export]
macro_rules! assert_not_found {
    ($result:expr) => {
        match $result {
            Err($crate::RegistryError::TicketNotFound { .. }) => {},
            other => panic!("expected TicketNotFound, got: {other:?}"),
        }
    };
    ($result:expr, $msg:expr) => {
        match $result {
            Err($crate::RegistryError::TicketNotFound { .. }) => {},
            other => panic!("{}: expected TicketNotFound, got: {other:?}", $msg),
        }
    };
}

/// Assert that a registry result is [`RegistryError::InvalidTicketCreation`].
///
/// [`RegistryError::InvalidTicketCreation`]: crate::RegistryError::InvalidTicketCreation
#[macro_export]
macro_rules! assert_invalid_creation {
    ($result:expr) => {
        match $result {
            Err($crate::RegistryError::InvalidTicketCreation { .. }) => {},
            other => panic!("expected InvalidTicketCreation, got: {other:?}"),
        }
    };
}

/// Assert that a registry result is `Ok` and return the value.
#[macro_export]
macro_rules! assert_registry_ok {
    ($result:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("expected Ok, got RegistryError: {e:?}"),
        }
    };
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use ticketry_storage::StorageBackend;

    use super::*;

    #[tokio::test]
    async fn clock_is_shared_with_registry() {
        let t = test_registry();
        let tgt = assert_registry_ok!(
            t.registry.issue_ticket_granting_ticket(authentication("alice")).await
        );
        t.clock.advance(Duration::from_secs(3 * 3600));
        assert_not_found!(t.registry.get_ticket(tgt.id(), None).await);
    }

    #[tokio::test]
    async fn encrypted_registry_hides_ids_from_backend() {
        let t = encrypted_test_registry();
        let tgt = t.registry.issue_ticket_granting_ticket(authentication("alice")).await.unwrap();

        let page = t.backend.scan(None, 10).await.unwrap();
        assert_eq!(page.entries.len(), 1);
        let id = tgt.id().as_str().as_bytes();
        assert!(!page.entries[0].key.windows(id.len()).any(|w| w == id));
        assert!(t.registry.get_ticket(tgt.id(), None).await.is_ok());
    }

    #[tokio::test]
    async fn granting_from_unknown_ticket_is_invalid_creation() {
        let t = test_registry();
        let missing = crate::TicketId::new("TGT-missing");
        let result = t.registry.grant_service_ticket(&missing, "https://app", false).await;
        assert_invalid_creation!(result);
    }
}
