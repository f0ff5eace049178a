//! Registry error types.
//!
//! At the protocol layer every failure collapses into either "ticket not
//! found" or "service unavailable". The finer variants here exist for
//! diagnostics and for callers that need to tell a bad request from an
//! outage.

use std::sync::Arc;

use thiserror::Error;
use ticketry_storage::{BoxError, ConfigError, StorageError};

use crate::ticket::{TicketId, TicketKind};

/// Result type alias for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Errors returned by the ticket registry.
///
/// # Non-exhaustive
///
/// New variants may be added in future minor releases. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RegistryError {
    /// The ticket could not be created: its parent is gone or expired, or
    /// the parent's kind cannot grant the requested kind.
    #[error("Invalid ticket creation: {reason}")]
    InvalidTicketCreation {
        /// Why creation was refused.
        reason: String,
    },

    /// A ticket with the same id already exists.
    #[error("Duplicate ticket: {}", .id.redacted())]
    DuplicateTicket {
        /// The colliding id.
        id: TicketId,
    },

    /// The stored ticket is not of the kind the caller asked for.
    #[error("Ticket type mismatch: expected {expected}, found {actual}")]
    TicketTypeMismatch {
        /// Kind the caller expected.
        expected: TicketKind,
        /// Kind actually stored under the id.
        actual: TicketKind,
    },

    /// A stored record could not be decrypted or decoded, or a ticket could
    /// not be encoded.
    #[error("Ticket serialization error: {message}")]
    TicketSerialization {
        /// Description of the failure.
        message: String,
        /// The underlying codec or cipher error.
        #[source]
        source: Option<BoxError>,
    },

    /// No live ticket exists under the id. Absent and expired tickets are
    /// reported identically.
    #[error("Ticket not found: {}", .id.redacted())]
    TicketNotFound {
        /// The requested id.
        id: TicketId,
    },

    /// The storage backend failed. The registry never retries these itself.
    #[error("Ticket registry unavailable: {0}")]
    RegistryUnavailable(
        /// The underlying storage error.
        #[source]
        StorageError,
    ),

    /// Invalid registry configuration.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl RegistryError {
    /// Creates a new `InvalidTicketCreation` error.
    #[must_use]
    pub fn invalid_creation(reason: impl Into<String>) -> Self {
        Self::InvalidTicketCreation { reason: reason.into() }
    }

    /// Creates a new `DuplicateTicket` error.
    #[must_use]
    pub fn duplicate(id: &TicketId) -> Self {
        Self::DuplicateTicket { id: id.clone() }
    }

    /// Creates a new `TicketTypeMismatch` error.
    #[must_use]
    pub fn type_mismatch(expected: TicketKind, actual: TicketKind) -> Self {
        Self::TicketTypeMismatch { expected, actual }
    }

    /// Creates a new `TicketSerialization` error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::TicketSerialization { message: message.into(), source: None }
    }

    /// Creates a new `TicketSerialization` error with a message and source error.
    #[must_use]
    pub fn serialization_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::TicketSerialization { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `TicketNotFound` error.
    #[must_use]
    pub fn not_found(id: &TicketId) -> Self {
        Self::TicketNotFound { id: id.clone() }
    }

    /// Creates a new `RegistryUnavailable` error.
    #[must_use]
    pub fn unavailable(source: StorageError) -> Self {
        Self::RegistryUnavailable(source)
    }

    /// Returns `true` if this is a `TicketNotFound` error.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::TicketNotFound { .. })
    }

    /// Returns `true` if this error reflects a storage outage rather than a
    /// problem with the request.
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::RegistryUnavailable(_))
    }
}

impl From<StorageError> for RegistryError {
    fn from(err: StorageError) -> Self {
        Self::RegistryUnavailable(err)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn not_found_message_redacts_the_id() {
        let id = TicketId::new("ST-AbCdEfGhIjKlMnOpQrStUv");
        let err = RegistryError::not_found(&id);
        let message = err.to_string();
        assert!(message.starts_with("Ticket not found: ST-AbCd"), "got: {message}");
        assert!(!message.contains("MnOpQrStUv"), "full id leaked: {message}");
        assert!(err.is_not_found());
    }

    #[test]
    fn type_mismatch_names_both_kinds() {
        let err = RegistryError::type_mismatch(TicketKind::Service, TicketKind::TicketGranting);
        assert_eq!(
            err.to_string(),
            "Ticket type mismatch: expected ServiceTicket, found TicketGrantingTicket"
        );
    }

    #[test]
    fn storage_errors_become_unavailable_with_source() {
        let err: RegistryError = StorageError::timeout().into();
        assert!(err.is_unavailable());
        assert_eq!(err.source().expect("source").to_string(), "Operation timeout");
    }

    #[test]
    fn nested_source_chain_is_preserved() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let err: RegistryError = StorageError::connection_with_source("cache node lost", io).into();

        let level_1 = err.source().expect("level 1 source");
        assert_eq!(level_1.to_string(), "Connection error: cache node lost");
        let level_2 = level_1.source().expect("level 2 source");
        assert_eq!(level_2.to_string(), "reset by peer");
    }

    #[test]
    fn config_errors_convert() {
        let err: RegistryError = ConfigError::below_minimum("random_bytes", 16, 4).into();
        assert!(matches!(err, RegistryError::Config(_)));
    }
}
