//! Ticket construction.

use std::sync::Arc;

use crate::{
    clock::Clock,
    config::TicketsConfig,
    error::{RegistryError, Result},
    expiration::ExpirationPolicy,
    id_generator::TicketIdGenerator,
    ticket::{Ticket, TicketPayload},
};

/// Builds new tickets: assigns an id, stamps creation metadata and attaches
/// an expiration policy.
///
/// The factory only validates the parent it is handed. Whether that parent
/// is still stored, and whether its own ancestors are alive, is checked by
/// the registry when the ticket is added.
#[derive(Clone)]
pub struct TicketFactory {
    id_generator: Arc<dyn TicketIdGenerator>,
    policies: TicketsConfig,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for TicketFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TicketFactory")
            .field("policies", &self.policies)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl TicketFactory {
    /// Creates a factory issuing ids from `id_generator` with the per-kind
    /// default `policies`.
    #[must_use]
    pub fn new(
        id_generator: Arc<dyn TicketIdGenerator>,
        policies: TicketsConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { id_generator, policies, clock }
    }

    /// Creates a ticket carrying `payload`.
    ///
    /// `policy_override` replaces the configured default policy for the
    /// payload's kind. The new ticket has `count_of_uses == 0`,
    /// `last_time_used == creation_time` and no descendants.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidTicketCreation`] when:
    /// - a ticket-granting ticket is given a parent,
    /// - a service, proxy granting or proxy ticket is given none,
    /// - the parent's kind cannot grant the payload's kind,
    /// - the parent is expired now.
    pub fn create(
        &self,
        payload: TicketPayload,
        parent: Option<&Ticket>,
        policy_override: Option<ExpirationPolicy>,
    ) -> Result<Ticket> {
        let kind = payload.kind();
        let now = self.clock.now();

        let parent_id = match parent {
            Some(parent) => {
                if !parent.kind().can_grant(kind) {
                    return Err(RegistryError::invalid_creation(format!(
                        "a {} cannot grant a {kind}",
                        parent.kind()
                    )));
                }
                if parent.is_expired(now) {
                    return Err(RegistryError::invalid_creation("parent ticket has expired"));
                }
                Some(parent.id().clone())
            },
            None if kind.requires_parent() => {
                return Err(RegistryError::invalid_creation(format!("a {kind} requires a parent")));
            },
            None => None,
        };

        let policy = policy_override.unwrap_or_else(|| self.policies.policy_for(kind));
        let mut ticket =
            Ticket::new(self.id_generator.generate(kind), payload, policy, parent_id, now);
        ticket.clear_descendants();
        Ok(ticket)
    }

    /// Default policies per kind.
    #[must_use]
    pub fn policies(&self) -> &TicketsConfig {
        &self.policies
    }
}
