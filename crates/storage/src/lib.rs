//! Storage adapter abstraction for the ticket registry.
//!
//! This crate provides the [`StorageBackend`] trait that every ticket storage
//! adapter implements, plus [`MemoryBackend`], the in-process reference
//! implementation. The registry layers serialization, encryption and
//! expiration semantics on top; adapters only ever see opaque bytes.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Ticket Registry                         │
//! │   (factory, expiration policies, cascade, consumption)      │
//! ├─────────────────────────────────────────────────────────────┤
//! │                   Cipher + Codec                            │
//! │       (JSON serialization, sealing, key digesting)          │
//! ├─────────────────────────────────────────────────────────────┤
//! │                   ticketry-storage                          │
//! │                 StorageBackend trait                        │
//! │ (get, set, set_with_ttl, compare_and_set, compare_and_delete│
//! │                   delete, scan)                             │
//! ├──────────────┬──────────────────────────────────────────────┤
//! │ MemoryBackend│  relational / document / cache adapters      │
//! │ (single node)│          (deployment supplied)               │
//! └──────────────┴──────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use ticketry_storage::{MemoryBackend, StorageBackend};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = MemoryBackend::new();
//!
//!     // Insert only if nobody else holds the key.
//!     backend.compare_and_set(b"ST-1", None, b"ticket".to_vec(), None).await?;
//!
//!     // Consume it: exactly one caller can win this.
//!     assert!(backend.compare_and_delete(b"ST-1", b"ticket").await?);
//!     assert_eq!(backend.get(b"ST-1").await?, None);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Implementing a Backend
//!
//! 1. Implement the [`StorageBackend`] trait
//! 2. Report honest [`BackendCapabilities`]
//! 3. Map backend-specific errors to [`StorageError`]
//! 4. Run the `conformance` suite (behind the `testutil` feature) against it
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `conformance` suite and the `testutil` module with shared test
//!   helpers (key generators, seeded and fault-injecting backends, assertion macros). Enable
//!   this in `[dev-dependencies]` for integration tests.

#![deny(unsafe_code)]

pub mod backend;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used, clippy::panic)]
pub mod conformance;
pub mod error;
pub mod memory;
pub mod size_limits;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;
pub mod types;

pub use backend::StorageBackend;
pub use error::{BoxError, ConfigError, StorageError, StorageResult};
pub use memory::MemoryBackend;
pub use size_limits::{
    DEFAULT_MAX_KEY_SIZE, DEFAULT_MAX_VALUE_SIZE, MIN_KEY_SIZE, MIN_VALUE_SIZE, SizeLimits,
};
pub use types::{BackendCapabilities, KeyValue, ScanPage};
