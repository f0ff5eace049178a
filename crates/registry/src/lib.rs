//! SSO ticket registry.
//!
//! Issues, validates, consumes and expires the tickets behind a single
//! sign-on service: ticket-granting tickets (sessions), service tickets,
//! proxy granting and proxy tickets, and transient session tickets. Tickets
//! live in any [`ticketry_storage::StorageBackend`]; the registry layers
//! serialization, optional encryption, expiration policies, parent/child
//! chaining and single-use consumption on top.
//!
//! # Architecture
//!
//! ```text
//! issue_* / grant_*          use_ticket / get_ticket        TicketRegistryCleaner
//!        │                          │                                │
//!        ▼                          ▼                                ▼
//! ┌──────────────┐   ┌──────────────────────────────────────────────────────┐
//! │TicketFactory │──▶│                    TicketRegistry                    │
//! │ ids, policy, │   │ chained expiration · CAS touch · CAD consumption ·   │
//! │ parentage    │   │ cascade delete · paginated enumeration               │
//! └──────────────┘   ├──────────────────────────────────────────────────────┤
//!                    │ codec: JSON ⇄ CipherExecutor, id digesting           │
//!                    ├──────────────────────────────────────────────────────┤
//!                    │ StorageBackend (ticketry-storage)                    │
//!                    └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use ticketry_registry::{Authentication, TicketKind, TicketRegistry};
//! use ticketry_storage::MemoryBackend;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = TicketRegistry::builder().backend(Arc::new(MemoryBackend::new())).build()?;
//!
//!     let auth = Authentication::builder().principal("alice").build();
//!     let tgt = registry.issue_ticket_granting_ticket(auth).await?;
//!     let st = registry.grant_service_ticket(tgt.id(), "https://app.example.org", true).await?;
//!
//!     let validated = registry.use_ticket(st.id(), Some(TicketKind::Service)).await?;
//!     assert_eq!(validated.service(), Some("https://app.example.org"));
//!     assert!(registry.use_ticket(st.id(), None).await.is_err());
//!
//!     assert_eq!(registry.delete_ticket(tgt.id()).await?, 1);
//!     Ok(())
//! }
//! ```
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module (mock-clock registries and assertion
//!   macros) and the storage crate's test helpers.
//! - **`failpoints`**: Activates the `fail` crate's fail points. The cascade in
//!   [`TicketRegistry::delete_ticket`] evaluates [`CASCADE_FAIL_POINT`] before each descendant.

#![deny(unsafe_code)]

pub mod cipher;
pub mod cleaner;
pub mod clock;
mod codec;
pub mod config;
pub mod error;
pub mod expiration;
pub mod factory;
pub mod id_generator;
mod locks;
pub mod metrics;
pub mod registry;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used, clippy::panic)]
pub mod testutil;
pub mod ticket;

pub use cipher::{
    CipherError, CipherExecutor, CipherKey, HmacCtrCipherExecutor, MIN_KEY_BYTES,
    NoOpCipherExecutor,
};
pub use cleaner::{CleanerReport, TicketRegistryCleaner};
pub use clock::{Clock, MockClock, SystemClock};
pub use config::{
    CleanerConfig, CryptoConfig, GrantingPolicyConfig, IdGeneratorConfig, RegistryConfig,
    TicketsConfig, TransientPolicyConfig, UsePolicyConfig,
};
pub use error::{RegistryError, Result};
pub use expiration::{ExpirationPolicy, UsageState};
pub use factory::TicketFactory;
pub use id_generator::{RandomIdGenerator, TicketIdGenerator};
pub use metrics::{RegistryMetrics, RegistryMetricsSnapshot};
pub use registry::{CASCADE_FAIL_POINT, TicketRegistry};
pub use ticket::{Authentication, RedactedId, Ticket, TicketId, TicketKind, TicketPayload};
