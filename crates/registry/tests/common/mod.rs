//! Shared setup for registry integration tests.

#![allow(dead_code, clippy::expect_used)]

use std::sync::Arc;

use ticketry_registry::{Authentication, MockClock, RegistryConfig, TicketRegistry};
use ticketry_storage::{MemoryBackend, StorageBackend, testutil::SplitCasBackend};

pub struct Harness {
    pub registry: Arc<TicketRegistry>,
    pub clock: MockClock,
    pub backend: MemoryBackend,
}

pub fn harness() -> Harness {
    harness_with(MemoryBackend::new(), RegistryConfig::default())
}

pub fn harness_with(backend: MemoryBackend, config: RegistryConfig) -> Harness {
    harness_over(Arc::new(backend.clone()), backend, config)
}

/// A registry whose conditional writes check and write in separate steps.
/// `backend` is the map underneath.
pub fn split_cas_harness(config: RegistryConfig) -> Harness {
    let backend = MemoryBackend::new();
    harness_over(Arc::new(SplitCasBackend::new(backend.clone())), backend, config)
}

fn harness_over(
    store: Arc<dyn StorageBackend>,
    backend: MemoryBackend,
    config: RegistryConfig,
) -> Harness {
    let clock = MockClock::default();
    let registry = TicketRegistry::builder()
        .backend(store)
        .config(config)
        .clock(Arc::new(clock.clone()))
        .build()
        .expect("registry should build");
    Harness { registry: Arc::new(registry), clock, backend }
}

pub fn auth(principal: &str) -> Authentication {
    Authentication::builder().principal(principal).build()
}
