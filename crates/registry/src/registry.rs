//! The ticket registry.
//!
//! [`TicketRegistry`] stores tickets in a [`StorageBackend`] and enforces
//! their lifecycle:
//!
//! - **Chained expiration**: a ticket is live only while its own policy and
//!   every ancestor's policy say so. Expired tickets found on read are
//!   deleted and reported as [`RegistryError::TicketNotFound`].
//! - **Peek vs touch**: [`get_ticket`](TicketRegistry::get_ticket) never
//!   mutates; [`use_ticket`](TicketRegistry::use_ticket) records a use and
//!   commits it with a single compare-and-set, or consumes the ticket with a
//!   single compare-and-delete when its use quota runs out.
//! - **Cascades**: granting tickets keep the ids of the tickets minted from
//!   them, and [`delete_ticket`](TicketRegistry::delete_ticket) follows those
//!   links.
//!
//! No ticket state is cached between calls. Storage failures are returned
//! as [`RegistryError::RegistryUnavailable`] and never retried here; only
//! compare-and-set conflicts are retried, up to `touch_retry_limit` times.

use std::{collections::HashSet, pin::pin, sync::Arc, time::Duration};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt, TryStreamExt, stream};
use ticketry_storage::{ConfigError, StorageBackend, StorageError};
use tokio::sync::MutexGuard;
use tracing::{debug, instrument, warn};

use crate::{
    cipher::{CipherExecutor, HmacCtrCipherExecutor, NoOpCipherExecutor},
    clock::{Clock, SystemClock},
    codec::TicketCodec,
    config::RegistryConfig,
    error::{RegistryError, Result},
    factory::TicketFactory,
    id_generator::{RandomIdGenerator, TicketIdGenerator},
    locks::KeyLocks,
    metrics::RegistryMetrics,
    ticket::{Authentication, Ticket, TicketId, TicketKind, TicketPayload},
};

/// Fail point hit before each descendant removal in a cascade.
pub const CASCADE_FAIL_POINT: &str = "registry-cascade-delete";

/// A decoded ticket with the exact bytes and key it was read from.
struct Stored {
    ticket: Ticket,
    raw: Bytes,
    key: Vec<u8>,
}

/// Outcome of checking a stored ticket's own and inherited expiration.
enum Liveness {
    Live(Stored),
    Expired,
}

enum ScanState {
    Start,
    After(Bytes),
    Done,
}

/// One stored record seen by a scan.
pub(crate) enum ScannedRecord {
    Ticket(Ticket),
    /// A record that failed to decrypt or deserialize.
    Undecodable {
        key: Bytes,
        error: RegistryError,
    },
}

type RecordPage = stream::Iter<std::vec::IntoIter<Result<ScannedRecord>>>;

/// Central ticket store.
///
/// Construct with [`TicketRegistry::builder`]; share as `Arc<TicketRegistry>`.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use ticketry_registry::{Authentication, TicketKind, TicketRegistry};
/// use ticketry_storage::MemoryBackend;
///
/// # async fn example() -> ticketry_registry::Result<()> {
/// let registry = TicketRegistry::builder().backend(Arc::new(MemoryBackend::new())).build()?;
///
/// let tgt = registry
///     .issue_ticket_granting_ticket(Authentication::builder().principal("alice").build())
///     .await?;
/// let st = registry.grant_service_ticket(tgt.id(), "https://app.example.org", true).await?;
///
/// // Validation consumes the single-use service ticket.
/// registry.use_ticket(st.id(), Some(TicketKind::Service)).await?;
/// assert!(registry.use_ticket(st.id(), Some(TicketKind::Service)).await.is_err());
/// # Ok(())
/// # }
/// ```
pub struct TicketRegistry {
    backend: Arc<dyn StorageBackend>,
    codec: TicketCodec,
    factory: TicketFactory,
    clock: Arc<dyn Clock>,
    locks: Option<KeyLocks>,
    metrics: RegistryMetrics,
    config: RegistryConfig,
}

impl std::fmt::Debug for TicketRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TicketRegistry")
            .field("codec", &self.codec)
            .field("serialized_touches", &self.locks.is_some())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[bon::bon]
impl TicketRegistry {
    /// Creates a registry over `backend`.
    ///
    /// Unset collaborators default from `config`: the cipher is built from
    /// `crypto` (or is a no-op when disabled), the id generator from
    /// `id_generator`, and the clock is the system clock.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Config`] if the configuration is invalid or
    /// the configured key cannot initialize the cipher.
    #[builder]
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        #[builder(default)] config: RegistryConfig,
        cipher: Option<Arc<dyn CipherExecutor>>,
        clock: Option<Arc<dyn Clock>>,
        id_generator: Option<Arc<dyn TicketIdGenerator>>,
    ) -> Result<Self> {
        config.validate()?;

        let cipher = match cipher {
            Some(cipher) => cipher,
            None => cipher_from_config(&config)?,
        };
        let clock: Arc<dyn Clock> = clock.unwrap_or_else(|| Arc::new(SystemClock));
        let id_generator: Arc<dyn TicketIdGenerator> = match id_generator {
            Some(generator) => generator,
            None => Arc::new(
                RandomIdGenerator::builder()
                    .random_bytes(config.id_generator().random_bytes)
                    .maybe_node_suffix(config.id_generator().node_suffix.clone())
                    .build()?,
            ),
        };

        let locks = (!backend.capabilities().atomic_conditional_writes).then(KeyLocks::new);
        if locks.is_some() {
            warn!("backend lacks atomic conditional writes; serializing touches in-process");
        }

        Ok(Self {
            backend,
            codec: TicketCodec::new(cipher),
            factory: TicketFactory::new(id_generator, config.tickets().clone(), Arc::clone(&clock)),
            clock,
            locks,
            metrics: RegistryMetrics::new(),
            config,
        })
    }
}

fn cipher_from_config(config: &RegistryConfig) -> Result<Arc<dyn CipherExecutor>> {
    if !config.crypto().enabled {
        return Ok(Arc::new(NoOpCipherExecutor));
    }
    let key = config
        .crypto()
        .key
        .as_ref()
        .ok_or_else(|| ConfigError::invalid("crypto.key", "required when crypto is enabled"))?;
    let cipher = HmacCtrCipherExecutor::new(key)
        .map_err(|e| ConfigError::invalid("crypto.key", e.to_string()))?;
    Ok(Arc::new(cipher))
}

fn is_conflict(err: &StorageError) -> bool {
    matches!(err, StorageError::Conflict)
}

fn retries_exhausted() -> RegistryError {
    RegistryError::unavailable(StorageError::conflict())
}

fn cascade_fail_point() -> Result<()> {
    fail::fail_point!(CASCADE_FAIL_POINT, |_| {
        Err(RegistryError::unavailable(StorageError::internal("injected cascade failure")))
    });
    Ok(())
}

impl TicketRegistry {
    // ── Core operations ────────────────────────────────────────────────

    /// Stores a new ticket.
    ///
    /// The write is insert-if-absent. When the ticket has a parent, its id is
    /// added to the parent's descendant list; if the parent is gone or
    /// expired by then, the ticket is removed again.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::DuplicateTicket`] if the id is already stored.
    /// - [`RegistryError::InvalidTicketCreation`] if the parent vanished or
    ///   expired.
    /// - [`RegistryError::RegistryUnavailable`] on storage failure.
    #[instrument(skip_all, fields(ticket_id = %ticket.id().redacted(), kind = %ticket.kind()))]
    pub async fn add_ticket(&self, ticket: &Ticket) -> Result<()> {
        let key = self.codec.storage_key(ticket.id());
        let record = self.codec.encode(ticket)?;
        let ttl = self.storage_ttl(ticket);

        match self.backend.compare_and_set(&key, None, record, ttl).await {
            Ok(()) => {},
            Err(StorageError::Conflict) => return Err(RegistryError::duplicate(ticket.id())),
            Err(e) => return Err(e.into()),
        }

        if let Some(parent_id) = ticket.parent_id()
            && let Err(err) = self.link_descendant(parent_id, ticket.id()).await
        {
            if let Err(cleanup) = self.backend.delete(&key).await {
                warn!(error = %cleanup, "failed to remove ticket after parent link failed");
            }
            return Err(err);
        }

        self.metrics.record_added();
        debug!("ticket added");
        Ok(())
    }

    /// Reads a live ticket without recording a use.
    ///
    /// An expired ticket (by its own policy or any ancestor's) is deleted,
    /// cascading to its descendants, and reported as not found.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::TicketNotFound`] if absent or expired.
    /// - [`RegistryError::TicketTypeMismatch`] if `expected_kind` differs.
    /// - [`RegistryError::TicketSerialization`] if the record is corrupt.
    /// - [`RegistryError::RegistryUnavailable`] on storage failure.
    #[instrument(skip_all, fields(ticket_id = %id.redacted()))]
    pub async fn get_ticket(
        &self,
        id: &TicketId,
        expected_kind: Option<TicketKind>,
    ) -> Result<Ticket> {
        match self.check_live(id, expected_kind).await? {
            Liveness::Live(stored) => {
                self.metrics.record_read();
                Ok(stored.ticket)
            },
            Liveness::Expired => Err(self.expire(id).await),
        }
    }

    /// Reads a live ticket and records one use.
    ///
    /// The use is committed with a compare-and-set against the bytes that
    /// were read, so concurrent touches never lose an update. When the use
    /// exhausts the ticket's quota, the record is removed with a
    /// compare-and-delete instead and the consumed ticket is returned; of
    /// several concurrent consumers exactly one succeeds and the others see
    /// [`RegistryError::TicketNotFound`].
    ///
    /// # Errors
    ///
    /// As [`get_ticket`](Self::get_ticket). Contention that outlasts
    /// `touch_retry_limit` attempts is reported as
    /// [`RegistryError::RegistryUnavailable`].
    #[instrument(skip_all, fields(ticket_id = %id.redacted()))]
    pub async fn use_ticket(
        &self,
        id: &TicketId,
        expected_kind: Option<TicketKind>,
    ) -> Result<Ticket> {
        let guard = self.lock_key(&self.codec.storage_key(id)).await;

        for _ in 0..self.config.touch_retry_limit() {
            let Stored { mut ticket, raw, key } = match self.check_live(id, expected_kind).await? {
                Liveness::Live(stored) => stored,
                Liveness::Expired => {
                    drop(guard);
                    return Err(self.expire(id).await);
                },
            };
            self.metrics.record_read();
            ticket.record_use(self.clock.now());

            if ticket.expiration_policy().is_exhausted(&ticket.usage()) {
                if !self.backend.compare_and_delete(&key, &raw).await? {
                    self.metrics.record_race_lost();
                    debug!("lost consumption race");
                    continue;
                }
                self.metrics.record_consumed();
                debug!(uses = ticket.count_of_uses(), "ticket consumed");
                drop(guard);
                self.after_consumption(&ticket).await;
                return Ok(ticket);
            }

            let record = self.codec.encode(&ticket)?;
            let ttl = self.storage_ttl(&ticket);
            match self.backend.compare_and_set(&key, Some(&raw), record, ttl).await {
                Ok(()) => return Ok(ticket),
                Err(e) if is_conflict(&e) => {
                    debug!("touch conflicted, retrying");
                },
                Err(e) => return Err(e.into()),
            }
        }

        warn!(attempts = self.config.touch_retry_limit(), "giving up on contended ticket");
        Err(retries_exhausted())
    }

    /// Deletes a ticket and, transitively, every ticket minted from it.
    ///
    /// The ticket itself is removed first, so an interrupted cascade leaves
    /// only descendants whose chain is already dead; the cleaner removes
    /// those later. Returns the number of records removed; an absent id
    /// yields `Ok(0)`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::RegistryUnavailable`] on storage failure.
    #[instrument(skip_all, fields(ticket_id = %id.redacted()))]
    pub async fn delete_ticket(&self, id: &TicketId) -> Result<usize> {
        let Some(raw) = self.take_record(&self.codec.storage_key(id)).await? else {
            return Ok(0);
        };
        let root = self.decode_lenient(&raw);

        let mut removed = 1;
        let mut visited = HashSet::from([id.clone()]);
        let mut pending: Vec<TicketId> =
            root.iter().flat_map(|t| t.descendant_ids().cloned()).collect();

        while let Some(child) = pending.pop() {
            if !visited.insert(child.clone()) {
                continue;
            }
            cascade_fail_point()?;

            let Some(raw) = self.take_record(&self.codec.storage_key(&child)).await? else {
                continue;
            };
            removed += 1;
            if let Some(ticket) = self.decode_lenient(&raw) {
                pending.extend(ticket.descendant_ids().cloned());
            }
        }

        if let Some(parent_id) = root.as_ref().and_then(Ticket::parent_id)
            && let Err(err) = self.unlink_descendant(parent_id, id).await
        {
            warn!(error = %err, "failed to unlink deleted ticket from its parent");
        }

        self.metrics.record_cascade(removed);
        debug!(removed, "ticket deleted");
        Ok(removed)
    }

    /// Lazily enumerates every stored ticket, expired ones included.
    ///
    /// Pages of `scan_page_size` records are fetched as the stream is
    /// polled. Records written or removed during the scan may or may not be
    /// seen; records that fail to decode are logged and skipped. A storage
    /// failure ends the stream with an error.
    pub fn get_tickets(&self) -> impl Stream<Item = Result<Ticket>> + Send + '_ {
        self.scan_tickets(self.config.scan_page_size())
    }

    pub(crate) fn scan_tickets(
        &self,
        page_size: usize,
    ) -> impl Stream<Item = Result<Ticket>> + Send + '_ {
        self.scan_records(page_size).try_filter_map(|record| {
            futures::future::ready(Ok(match record {
                ScannedRecord::Ticket(ticket) => Some(ticket),
                ScannedRecord::Undecodable { error, .. } => {
                    warn!(error = %error, "skipping undecodable ticket record");
                    None
                },
            }))
        })
    }

    /// Every stored record, undecodable ones included.
    pub(crate) fn scan_records(
        &self,
        page_size: usize,
    ) -> impl Stream<Item = Result<ScannedRecord>> + Send + '_ {
        stream::try_unfold(ScanState::Start, move |state| self.next_page(state, page_size))
            .try_flatten()
    }

    async fn next_page(
        &self,
        state: ScanState,
        page_size: usize,
    ) -> Result<Option<(RecordPage, ScanState)>> {
        let after = match state {
            ScanState::Done => return Ok(None),
            ScanState::Start => None,
            ScanState::After(cursor) => Some(cursor),
        };

        let page = self.backend.scan(after.as_deref(), page_size).await?;
        let next = match page.next {
            Some(cursor) => ScanState::After(cursor),
            None => ScanState::Done,
        };
        let records: Vec<Result<ScannedRecord>> = page
            .entries
            .into_iter()
            .map(|entry| match self.codec.decode(&entry.value) {
                Ok(ticket) => Ok(ScannedRecord::Ticket(ticket)),
                Err(error) => Ok(ScannedRecord::Undecodable { key: entry.key, error }),
            })
            .collect();
        Ok(Some((stream::iter(records), next)))
    }

    /// Overwrites an existing ticket.
    ///
    /// Descendant links already stored are kept, so links added
    /// concurrently by [`add_ticket`](Self::add_ticket) are not lost.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::TicketNotFound`] if no record exists.
    /// - [`RegistryError::RegistryUnavailable`] on storage failure or
    ///   persistent contention.
    #[instrument(skip_all, fields(ticket_id = %ticket.id().redacted()))]
    pub async fn update_ticket(&self, ticket: &Ticket) -> Result<()> {
        let _guard = self.lock_key(&self.codec.storage_key(ticket.id())).await;
        for _ in 0..self.config.touch_retry_limit() {
            let Some(current) = self.load(ticket.id()).await? else {
                return Err(RegistryError::not_found(ticket.id()));
            };

            let mut next = ticket.clone();
            next.merge_descendants(&current.ticket);
            let record = self.codec.encode(&next)?;
            let ttl = self.storage_ttl(&next);

            match self.backend.compare_and_set(&current.key, Some(&current.raw), record, ttl).await
            {
                Ok(()) => {
                    debug!("ticket updated");
                    return Ok(());
                },
                Err(e) if is_conflict(&e) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(retries_exhausted())
    }

    // ── Issuance ───────────────────────────────────────────────────────

    /// Starts a new SSO session.
    ///
    /// # Errors
    ///
    /// See [`add_ticket`](Self::add_ticket).
    pub async fn issue_ticket_granting_ticket(
        &self,
        authentication: Authentication,
    ) -> Result<Ticket> {
        let ticket =
            self.factory.create(TicketPayload::ticket_granting(authentication), None, None)?;
        self.add_ticket(&ticket).await?;
        Ok(ticket)
    }

    /// Grants a service ticket from a ticket-granting or proxy granting
    /// ticket. The granting ticket is touched.
    ///
    /// # Errors
    ///
    /// [`RegistryError::InvalidTicketCreation`] if the granting ticket is
    /// missing, expired or of a kind that cannot grant service tickets.
    pub async fn grant_service_ticket(
        &self,
        granting_id: &TicketId,
        service: impl Into<String>,
        from_new_login: bool,
    ) -> Result<Ticket> {
        let parent = self.touch_parent(granting_id).await?;
        let ticket = self.factory.create(
            TicketPayload::service(service, from_new_login),
            Some(&parent),
            None,
        )?;
        self.add_ticket(&ticket).await?;
        Ok(ticket)
    }

    /// Grants a proxy granting ticket to `proxied_by` after `service_ticket`
    /// was validated.
    ///
    /// The new ticket hangs off the service ticket's own granting ticket and
    /// carries that ticket's authentication.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::TicketTypeMismatch`] if `service_ticket` is neither
    ///   a service nor a proxy ticket.
    /// - [`RegistryError::InvalidTicketCreation`] if its granting ticket is
    ///   missing or expired.
    pub async fn grant_proxy_granting_ticket(
        &self,
        service_ticket: &Ticket,
        proxied_by: impl Into<String>,
    ) -> Result<Ticket> {
        if !service_ticket.kind().is_assignable_to(TicketKind::Service) {
            return Err(RegistryError::type_mismatch(TicketKind::Service, service_ticket.kind()));
        }
        let granting_id = service_ticket.parent_id().ok_or_else(|| {
            RegistryError::invalid_creation("service ticket has no granting ticket")
        })?;
        let parent = self.touch_parent(granting_id).await?;
        let authentication = parent.authentication().cloned().ok_or_else(|| {
            RegistryError::invalid_creation("granting ticket carries no authentication")
        })?;

        let ticket = self.factory.create(
            TicketPayload::proxy_granting(authentication, proxied_by),
            Some(&parent),
            None,
        )?;
        self.add_ticket(&ticket).await?;
        Ok(ticket)
    }

    /// Grants a proxy ticket from a proxy granting ticket.
    ///
    /// # Errors
    ///
    /// [`RegistryError::InvalidTicketCreation`] if the proxy granting ticket
    /// is missing, expired or of the wrong kind.
    pub async fn grant_proxy_ticket(
        &self,
        proxy_granting_id: &TicketId,
        service: impl Into<String>,
    ) -> Result<Ticket> {
        let parent = self.touch_parent(proxy_granting_id).await?;
        let ticket = self.factory.create(TicketPayload::proxy(service), Some(&parent), None)?;
        self.add_ticket(&ticket).await?;
        Ok(ticket)
    }

    /// Issues a transient session ticket, optionally tied to a session.
    ///
    /// # Errors
    ///
    /// [`RegistryError::InvalidTicketCreation`] if `parent_id` names a
    /// missing, expired or non-session ticket.
    pub async fn issue_transient_ticket(
        &self,
        service: Option<String>,
        properties: std::collections::BTreeMap<String, serde_json::Value>,
        parent_id: Option<&TicketId>,
    ) -> Result<Ticket> {
        let parent = match parent_id {
            Some(id) => Some(self.touch_parent(id).await?),
            None => None,
        };
        let ticket = self.factory.create(
            TicketPayload::transient(service, properties),
            parent.as_ref(),
            None,
        )?;
        self.add_ticket(&ticket).await?;
        Ok(ticket)
    }

    // ── Queries ────────────────────────────────────────────────────────

    /// Live sessions (ticket-granting tickets) of `principal`.
    ///
    /// Scans the whole registry. Only each ticket's own policy is checked.
    ///
    /// # Errors
    ///
    /// [`RegistryError::RegistryUnavailable`] on storage failure.
    pub async fn sessions_for_principal(&self, principal: &str) -> Result<Vec<Ticket>> {
        let now = self.clock.now();
        self.get_tickets()
            .try_filter(|t| {
                let keep = t.kind() == TicketKind::TicketGranting
                    && t.principal() == Some(principal)
                    && !t.is_expired(now);
                futures::future::ready(keep)
            })
            .try_collect()
            .await
    }

    /// Number of live sessions of `principal`.
    ///
    /// # Errors
    ///
    /// [`RegistryError::RegistryUnavailable`] on storage failure.
    pub async fn count_sessions_for(&self, principal: &str) -> Result<usize> {
        self.count_live(|t| {
            t.kind() == TicketKind::TicketGranting && t.principal() == Some(principal)
        })
        .await
    }

    /// Number of live ticket-granting tickets.
    ///
    /// # Errors
    ///
    /// [`RegistryError::RegistryUnavailable`] on storage failure.
    pub async fn session_count(&self) -> Result<usize> {
        self.count_live(|t| t.kind() == TicketKind::TicketGranting).await
    }

    /// Number of live service tickets.
    ///
    /// # Errors
    ///
    /// [`RegistryError::RegistryUnavailable`] on storage failure.
    pub async fn service_ticket_count(&self) -> Result<usize> {
        self.count_live(|t| t.kind() == TicketKind::Service).await
    }

    /// Removes every stored record, decodable or not. Returns the count.
    ///
    /// # Errors
    ///
    /// [`RegistryError::RegistryUnavailable`] on storage failure.
    #[instrument(skip_all)]
    pub async fn delete_all(&self) -> Result<usize> {
        let mut removed = 0;
        let mut after: Option<Bytes> = None;
        loop {
            let page = self.backend.scan(after.as_deref(), self.config.scan_page_size()).await?;
            for entry in &page.entries {
                if self.backend.delete(&entry.key).await? {
                    removed += 1;
                }
            }
            match page.next {
                Some(cursor) => after = Some(cursor),
                None => break,
            }
        }
        debug!(removed, "registry cleared");
        Ok(removed)
    }

    // ── Accessors ──────────────────────────────────────────────────────

    /// Operation counters.
    #[must_use]
    pub fn metrics(&self) -> &RegistryMetrics {
        &self.metrics
    }

    /// The clock expiration is evaluated against.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// The factory used by the issuance helpers, for callers that build
    /// tickets themselves and store them with [`add_ticket`](Self::add_ticket).
    #[must_use]
    pub fn factory(&self) -> &TicketFactory {
        &self.factory
    }

    /// The validated configuration this registry was built with.
    #[must_use]
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    // ── Internals ──────────────────────────────────────────────────────

    async fn load(&self, id: &TicketId) -> Result<Option<Stored>> {
        let key = self.codec.storage_key(id);
        let Some(raw) = self.backend.get(&key).await? else {
            return Ok(None);
        };
        let ticket = self.codec.decode(&raw)?;
        if ticket.id() != id {
            return Err(RegistryError::serialization("stored ticket id does not match its key"));
        }
        Ok(Some(Stored { ticket, raw, key }))
    }

    fn decode_lenient(&self, raw: &[u8]) -> Option<Ticket> {
        match self.codec.decode(raw) {
            Ok(ticket) => Some(ticket),
            Err(err) => {
                warn!(error = %err, "skipping undecodable ticket record");
                None
            },
        }
    }

    fn storage_ttl(&self, ticket: &Ticket) -> Option<Duration> {
        ticket.expiration_policy().storage_ttl(&ticket.usage(), self.clock.now())
    }

    /// Loads a ticket and checks its kind and chained expiration.
    async fn check_live(&self, id: &TicketId, expected: Option<TicketKind>) -> Result<Liveness> {
        let Some(stored) = self.load(id).await? else {
            return Err(RegistryError::not_found(id));
        };
        if let Some(expected) = expected
            && !stored.ticket.kind().is_assignable_to(expected)
        {
            return Err(RegistryError::type_mismatch(expected, stored.ticket.kind()));
        }

        let now = self.clock.now();
        if !stored.ticket.is_expired(now) && self.ancestors_alive(&stored.ticket, now).await? {
            Ok(Liveness::Live(stored))
        } else {
            Ok(Liveness::Expired)
        }
    }

    /// Removes an expired ticket, best effort, and returns the error the
    /// reader sees. Must not be called with a key lock held.
    async fn expire(&self, id: &TicketId) -> RegistryError {
        self.metrics.record_expired_on_read();
        debug!(ticket_id = %id.redacted(), "ticket expired, removing");
        if let Err(err) = self.delete_ticket(id).await {
            warn!(ticket_id = %id.redacted(), error = %err, "failed to remove expired ticket");
        }
        RegistryError::not_found(id)
    }

    /// Serializes read-modify-write cycles on `key` when the backend cannot.
    ///
    /// At most one key lock is held at a time on any path, so stripes
    /// shared by unrelated keys cannot deadlock.
    async fn lock_key(&self, key: &[u8]) -> Option<MutexGuard<'_, ()>> {
        match &self.locks {
            Some(locks) => Some(locks.lock(key).await),
            None => None,
        }
    }

    /// Removes a raw record by storage key. Returns whether it was there.
    pub(crate) async fn purge_record(&self, key: &[u8]) -> Result<bool> {
        Ok(self.take_record(key).await?.is_some())
    }

    /// Reads and removes one record under its key lock. Returns the removed
    /// bytes, or `None` if nothing was there to remove.
    async fn take_record(&self, key: &[u8]) -> Result<Option<Bytes>> {
        let _guard = self.lock_key(key).await;
        let Some(raw) = self.backend.get(key).await? else {
            return Ok(None);
        };
        Ok(self.backend.delete(key).await?.then_some(raw))
    }

    /// Whether every ancestor of `ticket` exists and is unexpired at `now`.
    ///
    /// Chains deeper than `max_chain_depth` count as dead.
    pub(crate) async fn ancestors_alive(
        &self,
        ticket: &Ticket,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut next = ticket.parent_id().cloned();
        let mut depth = 0;
        while let Some(parent_id) = next {
            if depth >= self.config.max_chain_depth() {
                warn!(ticket_id = %ticket.id().redacted(), depth, "ticket chain too deep");
                return Ok(false);
            }
            depth += 1;

            let Some(parent) = self.load(&parent_id).await? else {
                return Ok(false);
            };
            if parent.ticket.is_expired(now) {
                return Ok(false);
            }
            next = parent.ticket.parent_id().cloned();
        }
        Ok(true)
    }

    async fn touch_parent(&self, id: &TicketId) -> Result<Ticket> {
        self.use_ticket(id, None).await.map_err(|err| {
            if err.is_not_found() {
                RegistryError::invalid_creation("granting ticket does not exist or has expired")
            } else {
                err
            }
        })
    }

    async fn after_consumption(&self, ticket: &Ticket) {
        for child in ticket.descendant_ids() {
            if let Err(err) = self.delete_ticket(child).await {
                warn!(error = %err, "failed to remove descendant of consumed ticket");
            }
        }
        if let Some(parent_id) = ticket.parent_id()
            && let Err(err) = self.unlink_descendant(parent_id, ticket.id()).await
        {
            warn!(error = %err, "failed to unlink consumed ticket from its parent");
        }
    }

    async fn link_descendant(&self, parent_id: &TicketId, child_id: &TicketId) -> Result<()> {
        let _guard = self.lock_key(&self.codec.storage_key(parent_id)).await;
        for _ in 0..self.config.touch_retry_limit() {
            let Some(Stored { mut ticket, raw, key }) = self.load(parent_id).await? else {
                return Err(RegistryError::invalid_creation("parent ticket no longer exists"));
            };
            if ticket.is_expired(self.clock.now()) {
                return Err(RegistryError::invalid_creation("parent ticket has expired"));
            }
            if !ticket.add_descendant(child_id) {
                return Ok(());
            }

            let record = self.codec.encode(&ticket)?;
            let ttl = self.storage_ttl(&ticket);
            match self.backend.compare_and_set(&key, Some(&raw), record, ttl).await {
                Ok(()) => return Ok(()),
                Err(e) if is_conflict(&e) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(retries_exhausted())
    }

    async fn unlink_descendant(&self, parent_id: &TicketId, child_id: &TicketId) -> Result<()> {
        let _guard = self.lock_key(&self.codec.storage_key(parent_id)).await;
        for _ in 0..self.config.touch_retry_limit() {
            let Some(Stored { mut ticket, raw, key }) = self.load(parent_id).await? else {
                return Ok(());
            };
            if !ticket.remove_descendant(child_id) {
                return Ok(());
            }

            let record = self.codec.encode(&ticket)?;
            let ttl = self.storage_ttl(&ticket);
            match self.backend.compare_and_set(&key, Some(&raw), record, ttl).await {
                Ok(()) => return Ok(()),
                Err(e) if is_conflict(&e) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(retries_exhausted())
    }

    async fn count_live(&self, predicate: impl Fn(&Ticket) -> bool) -> Result<usize> {
        let now = self.clock.now();
        let mut tickets = pin!(self.get_tickets());
        let mut count = 0;
        while let Some(ticket) = tickets.next().await {
            let ticket = ticket?;
            if predicate(&ticket) && !ticket.is_expired(now) {
                count += 1;
            }
        }
        Ok(count)
    }
}
