//! Ticket id generation.
//!
//! Ids have the shape `<prefix>-<random>[-<node>]`, where the random segment
//! is base64url (no padding) over bytes drawn from the OS CSPRNG. There is no
//! collision lookahead: with at least 128 random bits a collision is not a
//! practical concern, and the registry's insert-if-absent write reports one
//! as `DuplicateTicket` anyway.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{RngCore, rngs::OsRng};
use ticketry_storage::ConfigError;

use crate::ticket::{TicketId, TicketKind};

/// Minimum random bytes per id (128 bits).
pub const MIN_RANDOM_BYTES: usize = 16;

/// Default random bytes per id.
pub const DEFAULT_RANDOM_BYTES: usize = 32;

/// Source of fresh ticket ids.
pub trait TicketIdGenerator: Send + Sync {
    /// Returns a new, unpredictable id for a ticket of `kind`.
    fn generate(&self, kind: TicketKind) -> TicketId;
}

/// CSPRNG-backed id generator.
///
/// # Example
///
/// ```
/// use ticketry_registry::{RandomIdGenerator, TicketIdGenerator, TicketKind};
///
/// let generator = RandomIdGenerator::builder().node_suffix("node1").build().unwrap();
/// let id = generator.generate(TicketKind::Service);
/// assert!(id.as_str().starts_with("ST-"));
/// assert!(id.as_str().ends_with("-node1"));
/// ```
#[derive(Debug, Clone)]
pub struct RandomIdGenerator {
    random_bytes: usize,
    node_suffix: Option<String>,
}

#[bon::bon]
impl RandomIdGenerator {
    /// Creates a generator.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::BelowMinimum`] if `random_bytes` is under
    /// [`MIN_RANDOM_BYTES`], or [`ConfigError::Invalid`] if the node suffix is
    /// empty or contains characters outside `[A-Za-z0-9._]`.
    #[builder]
    pub fn new(
        #[builder(default = DEFAULT_RANDOM_BYTES)] random_bytes: usize,
        #[builder(into)] node_suffix: Option<String>,
    ) -> Result<Self, ConfigError> {
        if random_bytes < MIN_RANDOM_BYTES {
            return Err(ConfigError::below_minimum("random_bytes", MIN_RANDOM_BYTES, random_bytes));
        }
        if let Some(suffix) = &node_suffix {
            validate_node_suffix(suffix)?;
        }
        Ok(Self { random_bytes, node_suffix })
    }

    /// Random bytes drawn per id.
    #[must_use]
    pub fn random_bytes(&self) -> usize {
        self.random_bytes
    }
}

impl Default for RandomIdGenerator {
    fn default() -> Self {
        Self { random_bytes: DEFAULT_RANDOM_BYTES, node_suffix: None }
    }
}

impl TicketIdGenerator for RandomIdGenerator {
    fn generate(&self, kind: TicketKind) -> TicketId {
        let mut bytes = vec![0u8; self.random_bytes];
        OsRng.fill_bytes(&mut bytes);
        let random = URL_SAFE_NO_PAD.encode(&bytes);

        match &self.node_suffix {
            Some(node) => TicketId::new(format!("{}-{random}-{node}", kind.prefix())),
            None => TicketId::new(format!("{}-{random}", kind.prefix())),
        }
    }
}

pub(crate) fn validate_node_suffix(suffix: &str) -> Result<(), ConfigError> {
    if suffix.is_empty() {
        return Err(ConfigError::invalid("node_suffix", "must not be empty"));
    }
    if !suffix.chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_') {
        return Err(ConfigError::invalid("node_suffix", "only [A-Za-z0-9._] are allowed"));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::collections::HashSet;

    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(TicketKind::TicketGranting, "TGT-")]
    #[case(TicketKind::Service, "ST-")]
    #[case(TicketKind::ProxyGranting, "PGT-")]
    #[case(TicketKind::Proxy, "PT-")]
    #[case(TicketKind::TransientSession, "TST-")]
    fn ids_carry_kind_prefix(#[case] kind: TicketKind, #[case] prefix: &str) {
        let id = RandomIdGenerator::default().generate(kind);
        assert!(id.as_str().starts_with(prefix), "{id}");
        assert_eq!(id.kind_hint(), Some(kind));
    }

    #[test]
    fn random_segment_has_configured_entropy() {
        let generator = RandomIdGenerator::builder().random_bytes(16).build().unwrap();
        let id = generator.generate(TicketKind::Service);
        let random = id.as_str().strip_prefix("ST-").unwrap();
        assert_eq!(URL_SAFE_NO_PAD.decode(random).unwrap().len(), 16);
    }

    #[test]
    fn default_uses_32_bytes() {
        let id = RandomIdGenerator::default().generate(TicketKind::TicketGranting);
        let random = id.as_str().strip_prefix("TGT-").unwrap();
        assert_eq!(URL_SAFE_NO_PAD.decode(random).unwrap().len(), DEFAULT_RANDOM_BYTES);
    }

    #[test]
    fn node_suffix_is_appended() {
        let generator = RandomIdGenerator::builder().node_suffix("cas-a.1").build();
        assert!(generator.is_err(), "hyphen is reserved as the segment separator");

        let generator = RandomIdGenerator::builder().node_suffix("cas_a.1").build().unwrap();
        assert!(generator.generate(TicketKind::Proxy).as_str().ends_with("-cas_a.1"));
    }

    #[test]
    fn too_little_entropy_is_rejected() {
        let err = RandomIdGenerator::builder().random_bytes(8).build().unwrap_err();
        assert_eq!(
            err,
            ConfigError::BelowMinimum {
                field: "random_bytes",
                min: "16".into(),
                value: "8".into()
            }
        );
    }

    #[test]
    fn ids_do_not_repeat() {
        let generator = RandomIdGenerator::default();
        let ids: HashSet<_> =
            (0..10_000).map(|_| generator.generate(TicketKind::Service)).collect();
        assert_eq!(ids.len(), 10_000);
    }
}
