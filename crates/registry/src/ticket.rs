//! Ticket data model.
//!
//! Every ticket shares one metadata record (id, timestamps, use count,
//! expiration policy, parent link) and carries a kind-specific
//! [`TicketPayload`]. The set of kinds is closed: serialization and
//! expiration dispatch are exhaustive matches, not trait objects.
//!
//! Parent/child links are ids resolved through storage, never in-memory
//! references. Granting tickets record the ids of the tickets minted from
//! them in `descendant_ids`, which cascade deletion walks.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::expiration::{ExpirationPolicy, UsageState};

/// Number of random-segment characters kept when an id is redacted.
const REDACTED_VISIBLE_CHARS: usize = 4;

/// Globally unique ticket identifier, e.g. `ST-3q2f…`.
///
/// `Display` renders the full id, since callers hand it to clients.
/// `Debug` and [`redacted`](Self::redacted) keep only the type prefix and a
/// few characters so that logs never carry a usable credential.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketId(String);

impl TicketId {
    /// Wraps an id received from a client. No format validation is done;
    /// unknown ids simply resolve to not-found.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The kind implied by the id's prefix, if it carries a known one.
    #[must_use]
    pub fn kind_hint(&self) -> Option<TicketKind> {
        let (prefix, _) = self.0.split_once('-')?;
        TicketKind::from_prefix(prefix)
    }

    /// A log-safe rendering of the id.
    #[must_use]
    pub fn redacted(&self) -> RedactedId<'_> {
        RedactedId(&self.0)
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TicketId({})", self.redacted())
    }
}

impl From<&str> for TicketId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Display adapter returned by [`TicketId::redacted`].
#[derive(Clone, Copy)]
pub struct RedactedId<'a>(&'a str);

impl fmt::Display for RedactedId<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.split_once('-') {
            Some((prefix, rest)) => {
                let visible: String = rest.chars().take(REDACTED_VISIBLE_CHARS).collect();
                write!(f, "{prefix}-{visible}…")
            },
            None => {
                let visible: String = self.0.chars().take(REDACTED_VISIBLE_CHARS).collect();
                write!(f, "{visible}…")
            },
        }
    }
}

/// The closed set of ticket kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketKind {
    /// Root ticket representing an established SSO session.
    TicketGranting,
    /// Single-use grant for one service.
    Service,
    /// Granting ticket handed to a proxying service.
    ProxyGranting,
    /// Single-use grant obtained by a proxy.
    Proxy,
    /// Short-lived ticket carrying flow state, with or without a parent.
    TransientSession,
}

impl TicketKind {
    /// Every kind, in prefix order.
    pub const ALL: [TicketKind; 5] = [
        TicketKind::TicketGranting,
        TicketKind::Service,
        TicketKind::ProxyGranting,
        TicketKind::Proxy,
        TicketKind::TransientSession,
    ];

    /// The id prefix for this kind.
    #[must_use]
    pub fn prefix(self) -> &'static str {
        match self {
            Self::TicketGranting => "TGT",
            Self::Service => "ST",
            Self::ProxyGranting => "PGT",
            Self::Proxy => "PT",
            Self::TransientSession => "TST",
        }
    }

    /// Parses an id prefix back into a kind.
    #[must_use]
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.prefix() == prefix)
    }

    /// Whether a ticket of this kind must be minted from a parent.
    #[must_use]
    pub fn requires_parent(self) -> bool {
        matches!(self, Self::Service | Self::ProxyGranting | Self::Proxy)
    }

    /// Whether a ticket of this kind may be the parent of a `child` ticket.
    #[must_use]
    pub fn can_grant(self, child: TicketKind) -> bool {
        match child {
            Self::TicketGranting => false,
            Self::Service | Self::ProxyGranting => {
                matches!(self, Self::TicketGranting | Self::ProxyGranting)
            },
            Self::Proxy => self == Self::ProxyGranting,
            Self::TransientSession => self == Self::TicketGranting,
        }
    }

    /// Whether a ticket of this kind satisfies a read that expects
    /// `expected`.
    ///
    /// A proxy ticket is a service ticket and a proxy granting ticket is a
    /// ticket-granting ticket; the reverse does not hold.
    #[must_use]
    pub fn is_assignable_to(self, expected: TicketKind) -> bool {
        self == expected
            || matches!(
                (self, expected),
                (Self::Proxy, Self::Service) | (Self::ProxyGranting, Self::TicketGranting)
            )
    }
}

impl fmt::Display for TicketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::TicketGranting => "TicketGrantingTicket",
            Self::Service => "ServiceTicket",
            Self::ProxyGranting => "ProxyGrantingTicket",
            Self::Proxy => "ProxyTicket",
            Self::TransientSession => "TransientSessionTicket",
        })
    }
}

/// An authenticated identity attached to granting tickets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
#[serde(deny_unknown_fields)]
pub struct Authentication {
    /// Principal identifier, as resolved by the authentication layer.
    #[builder(into)]
    pub principal: String,

    /// Released principal attributes.
    #[builder(default)]
    #[serde(default)]
    pub attributes: BTreeMap<String, Vec<String>>,

    /// When the principal authenticated.
    #[builder(default = Utc::now())]
    pub authenticated_at: DateTime<Utc>,
}

/// Kind-specific ticket contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TicketPayload {
    /// An SSO session.
    TicketGranting {
        /// Who the session belongs to.
        authentication: Authentication,
        /// Tickets minted from this one.
        #[serde(default)]
        descendant_ids: BTreeSet<TicketId>,
    },
    /// A grant for one service.
    Service {
        /// The service the ticket may be validated by.
        service: String,
        /// Whether the grant came straight from a fresh login.
        #[serde(default)]
        from_new_login: bool,
    },
    /// A granting ticket held by a proxying service.
    ProxyGranting {
        /// Identity inherited from the granting session.
        authentication: Authentication,
        /// The proxy callback the ticket was issued to.
        proxied_by: String,
        /// Tickets minted from this one.
        #[serde(default)]
        descendant_ids: BTreeSet<TicketId>,
    },
    /// A grant obtained by a proxy for a target service.
    Proxy {
        /// The target service.
        service: String,
    },
    /// Short-lived flow state.
    TransientSession {
        /// Service the flow relates to, if any.
        #[serde(default)]
        service: Option<String>,
        /// Free-form properties.
        #[serde(default)]
        properties: BTreeMap<String, serde_json::Value>,
    },
}

impl TicketPayload {
    /// Payload for a new SSO session.
    #[must_use]
    pub fn ticket_granting(authentication: Authentication) -> Self {
        Self::TicketGranting { authentication, descendant_ids: BTreeSet::new() }
    }

    /// Payload for a service grant.
    pub fn service(service: impl Into<String>, from_new_login: bool) -> Self {
        Self::Service { service: service.into(), from_new_login }
    }

    /// Payload for a proxy granting ticket.
    pub fn proxy_granting(authentication: Authentication, proxied_by: impl Into<String>) -> Self {
        Self::ProxyGranting {
            authentication,
            proxied_by: proxied_by.into(),
            descendant_ids: BTreeSet::new(),
        }
    }

    /// Payload for a proxy grant.
    pub fn proxy(service: impl Into<String>) -> Self {
        Self::Proxy { service: service.into() }
    }

    /// Payload for a transient session ticket.
    #[must_use]
    pub fn transient(
        service: Option<String>,
        properties: BTreeMap<String, serde_json::Value>,
    ) -> Self {
        Self::TransientSession { service, properties }
    }

    /// The kind this payload belongs to.
    #[must_use]
    pub fn kind(&self) -> TicketKind {
        match self {
            Self::TicketGranting { .. } => TicketKind::TicketGranting,
            Self::Service { .. } => TicketKind::Service,
            Self::ProxyGranting { .. } => TicketKind::ProxyGranting,
            Self::Proxy { .. } => TicketKind::Proxy,
            Self::TransientSession { .. } => TicketKind::TransientSession,
        }
    }

    fn descendants_mut(&mut self) -> Option<&mut BTreeSet<TicketId>> {
        match self {
            Self::TicketGranting { descendant_ids, .. }
            | Self::ProxyGranting { descendant_ids, .. } => Some(descendant_ids),
            _ => None,
        }
    }
}

/// A stored ticket: shared metadata plus a kind-specific payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Ticket {
    id: TicketId,
    creation_time: DateTime<Utc>,
    last_time_used: DateTime<Utc>,
    #[serde(default)]
    previous_time_used: Option<DateTime<Utc>>,
    #[serde(default)]
    count_of_uses: u32,
    expiration_policy: ExpirationPolicy,
    #[serde(default)]
    parent_id: Option<TicketId>,
    payload: TicketPayload,
}

impl Ticket {
    pub(crate) fn new(
        id: TicketId,
        payload: TicketPayload,
        expiration_policy: ExpirationPolicy,
        parent_id: Option<TicketId>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            creation_time: now,
            last_time_used: now,
            previous_time_used: None,
            count_of_uses: 0,
            expiration_policy,
            parent_id,
            payload,
        }
    }

    /// The ticket's id.
    #[must_use]
    pub fn id(&self) -> &TicketId {
        &self.id
    }

    /// The ticket's kind.
    #[must_use]
    pub fn kind(&self) -> TicketKind {
        self.payload.kind()
    }

    /// Id of the ticket this one was minted from.
    #[must_use]
    pub fn parent_id(&self) -> Option<&TicketId> {
        self.parent_id.as_ref()
    }

    /// `true` for tickets without a parent.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    #[must_use]
    pub fn creation_time(&self) -> DateTime<Utc> {
        self.creation_time
    }

    #[must_use]
    pub fn last_time_used(&self) -> DateTime<Utc> {
        self.last_time_used
    }

    #[must_use]
    pub fn previous_time_used(&self) -> Option<DateTime<Utc>> {
        self.previous_time_used
    }

    #[must_use]
    pub fn count_of_uses(&self) -> u32 {
        self.count_of_uses
    }

    #[must_use]
    pub fn expiration_policy(&self) -> &ExpirationPolicy {
        &self.expiration_policy
    }

    /// The usage counters the expiration policy is evaluated against.
    #[must_use]
    pub fn usage(&self) -> UsageState {
        UsageState {
            creation_time: self.creation_time,
            last_time_used: self.last_time_used,
            previous_time_used: self.previous_time_used,
            count_of_uses: self.count_of_uses,
        }
    }

    /// Whether the ticket's own policy considers it expired at `now`.
    ///
    /// This does not look at ancestors; the registry does that.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration_policy.is_expired(&self.usage(), now)
    }

    #[must_use]
    pub fn payload(&self) -> &TicketPayload {
        &self.payload
    }

    /// The authenticated identity, for granting tickets.
    #[must_use]
    pub fn authentication(&self) -> Option<&Authentication> {
        match &self.payload {
            TicketPayload::TicketGranting { authentication, .. }
            | TicketPayload::ProxyGranting { authentication, .. } => Some(authentication),
            _ => None,
        }
    }

    /// Mutable access to the identity, for use with
    /// [`update_ticket`](crate::TicketRegistry::update_ticket).
    pub fn authentication_mut(&mut self) -> Option<&mut Authentication> {
        match &mut self.payload {
            TicketPayload::TicketGranting { authentication, .. }
            | TicketPayload::ProxyGranting { authentication, .. } => Some(authentication),
            _ => None,
        }
    }

    /// The principal id, for granting tickets.
    #[must_use]
    pub fn principal(&self) -> Option<&str> {
        self.authentication().map(|auth| auth.principal.as_str())
    }

    /// The target service, for service, proxy and transient tickets.
    #[must_use]
    pub fn service(&self) -> Option<&str> {
        match &self.payload {
            TicketPayload::Service { service, .. } | TicketPayload::Proxy { service } => {
                Some(service)
            },
            TicketPayload::TransientSession { service, .. } => service.as_deref(),
            _ => None,
        }
    }

    /// Mutable access to transient ticket properties.
    pub fn properties_mut(&mut self) -> Option<&mut BTreeMap<String, serde_json::Value>> {
        match &mut self.payload {
            TicketPayload::TransientSession { properties, .. } => Some(properties),
            _ => None,
        }
    }

    /// Ids of the tickets minted from this one. Empty for non-granting kinds.
    pub fn descendant_ids(&self) -> impl Iterator<Item = &TicketId> {
        let ids = match &self.payload {
            TicketPayload::TicketGranting { descendant_ids, .. }
            | TicketPayload::ProxyGranting { descendant_ids, .. } => Some(descendant_ids),
            _ => None,
        };
        ids.into_iter().flatten()
    }

    /// Records one use at `now`.
    pub(crate) fn record_use(&mut self, now: DateTime<Utc>) {
        self.previous_time_used = Some(self.last_time_used);
        self.last_time_used = now;
        self.count_of_uses = self.count_of_uses.saturating_add(1);
    }

    /// Links a child. Returns `false` if it was already linked or this kind
    /// keeps no descendant list.
    pub(crate) fn add_descendant(&mut self, child: &TicketId) -> bool {
        self.payload.descendants_mut().is_some_and(|ids| ids.insert(child.clone()))
    }

    /// Unlinks a child. Returns `false` if it was not linked.
    pub(crate) fn remove_descendant(&mut self, child: &TicketId) -> bool {
        self.payload.descendants_mut().is_some_and(|ids| ids.remove(child))
    }

    /// Copies every descendant link of `other` into this ticket.
    pub(crate) fn merge_descendants(&mut self, other: &Ticket) {
        let links: Vec<TicketId> = other.descendant_ids().cloned().collect();
        if let Some(ids) = self.payload.descendants_mut() {
            ids.extend(links);
        }
    }

    pub(crate) fn clear_descendants(&mut self) {
        if let Some(ids) = self.payload.descendants_mut() {
            ids.clear();
        }
    }
}
