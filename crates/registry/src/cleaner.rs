//! Background removal of expired tickets.
//!
//! [`TicketRegistryCleaner`] periodically scans the registry and deletes:
//!
//! - expired root tickets, cascading to everything minted from them;
//! - expired child tickets;
//! - orphans, children whose parent chain is gone or expired. These are
//!   what an interrupted cascade leaves behind;
//! - records that cannot be decoded, only when `purge_undecodable` is set.
//!   Otherwise they are reported as failures on every run.
//!
//! A failure on one ticket is logged and counted, and the run continues.
//! Live tickets are never removed.

use std::{pin::pin, sync::Arc};

use chrono::{DateTime, Utc};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::{
    config::CleanerConfig,
    error::{RegistryError, Result},
    registry::{ScannedRecord, TicketRegistry},
    ticket::Ticket,
};

/// Outcome of one cleaner pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanerReport {
    /// Tickets examined.
    pub scanned: usize,
    /// Expired root tickets deleted.
    pub expired_roots: usize,
    /// Expired child tickets deleted.
    pub expired_children: usize,
    /// Children deleted because their chain was dead.
    pub orphans: usize,
    /// Records that could not be decrypted or deserialized.
    pub undecodable: usize,
    /// Records removed in total, cascades included.
    pub tickets_removed: usize,
    /// Tickets that could not be examined or deleted.
    pub failures: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Live,
    ExpiredRoot,
    ExpiredChild,
    Orphan,
}

/// Periodic cleaner for a [`TicketRegistry`].
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use ticketry_registry::{CleanerConfig, TicketRegistry, TicketRegistryCleaner};
///
/// # async fn example(registry: Arc<TicketRegistry>) {
/// let cleaner = TicketRegistryCleaner::new(registry, CleanerConfig::default()).start();
/// // ...
/// cleaner.shutdown().await;
/// # }
/// ```
#[derive(Debug)]
pub struct TicketRegistryCleaner {
    registry: Arc<TicketRegistry>,
    config: CleanerConfig,
    cancel_token: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TicketRegistryCleaner {
    /// Creates a stopped cleaner.
    #[must_use]
    pub fn new(registry: Arc<TicketRegistry>, config: CleanerConfig) -> Arc<Self> {
        Arc::new(Self {
            registry,
            config,
            cancel_token: CancellationToken::new(),
            handle: Mutex::new(None),
        })
    }

    /// Creates a stopped cleaner using the registry's `cleaner` settings.
    #[must_use]
    pub fn for_registry(registry: Arc<TicketRegistry>) -> Arc<Self> {
        let config = *registry.config().cleaner();
        Self::new(registry, config)
    }

    /// Spawns the background task.
    ///
    /// The first pass runs after `start_delay`, then every `interval`. Does
    /// nothing when the cleaner is disabled or already started.
    ///
    /// # Panics
    ///
    /// Must be called within a Tokio runtime context.
    #[must_use]
    pub fn start(self: Arc<Self>) -> Arc<Self> {
        if !self.config.enabled {
            info!("ticket registry cleaner disabled");
            return self;
        }

        let mut handle = self.handle.lock();
        if handle.is_some() {
            drop(handle);
            return self;
        }

        let cleaner = Arc::clone(&self);
        let token = self.cancel_token.clone();
        let start_delay = self.config.start_delay;
        let interval = self.config.interval;

        *handle = Some(tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(start_delay) => {},
            }

            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        info!("ticket registry cleaner shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        cleaner.run_once().await;
                    }
                }
            }
        }));
        drop(handle);
        self
    }

    /// Stops the background task and waits for an in-flight pass to end.
    pub async fn shutdown(&self) {
        self.cancel_token.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle
            && let Err(err) = handle.await
        {
            warn!(error = %err, "ticket registry cleaner task panicked");
        }
    }

    /// Token cancelled by [`shutdown`](Self::shutdown).
    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }

    /// Runs a single pass.
    #[instrument(skip_all)]
    pub async fn run_once(&self) -> CleanerReport {
        let mut report = CleanerReport::default();
        let now = self.registry.clock().now();
        let mut records = pin!(self.registry.scan_records(self.config.page_size));

        while let Some(item) = records.next().await {
            let ticket = match item {
                Ok(ScannedRecord::Ticket(ticket)) => ticket,
                Ok(ScannedRecord::Undecodable { key, error }) => {
                    report.scanned += 1;
                    report.undecodable += 1;
                    self.handle_undecodable(&key, &error, &mut report).await;
                    continue;
                },
                Err(err) => {
                    warn!(error = %err, "ticket scan failed, ending pass early");
                    report.failures += 1;
                    break;
                },
            };
            report.scanned += 1;

            let verdict = match self.verdict(&ticket, now).await {
                Ok(verdict) => verdict,
                Err(err) => {
                    warn!(
                        ticket_id = %ticket.id().redacted(),
                        error = %err,
                        "failed to check ticket"
                    );
                    report.failures += 1;
                    continue;
                },
            };
            if verdict == Verdict::Live {
                continue;
            }

            match self.registry.delete_ticket(ticket.id()).await {
                Ok(0) => {
                    debug!(ticket_id = %ticket.id().redacted(), "ticket already removed");
                },
                Ok(removed) => {
                    report.tickets_removed += removed;
                    match verdict {
                        Verdict::ExpiredRoot => report.expired_roots += 1,
                        Verdict::ExpiredChild => report.expired_children += 1,
                        Verdict::Orphan => report.orphans += 1,
                        Verdict::Live => {},
                    }
                },
                Err(err) => {
                    warn!(
                        ticket_id = %ticket.id().redacted(),
                        error = %err,
                        "failed to delete ticket"
                    );
                    report.failures += 1;
                },
            }
        }

        self.registry.metrics().record_cleaner_run(report.failures);
        info!(
            scanned = report.scanned,
            expired_roots = report.expired_roots,
            expired_children = report.expired_children,
            orphans = report.orphans,
            undecodable = report.undecodable,
            removed = report.tickets_removed,
            failures = report.failures,
            "ticket registry cleaner pass complete"
        );
        report
    }

    async fn handle_undecodable(
        &self,
        key: &[u8],
        error: &RegistryError,
        report: &mut CleanerReport,
    ) {
        if !self.config.purge_undecodable {
            warn!(error = %error, "undecodable ticket record kept");
            report.failures += 1;
            return;
        }
        match self.registry.purge_record(key).await {
            Ok(true) => {
                warn!(error = %error, "purged undecodable ticket record");
                report.tickets_removed += 1;
            },
            Ok(false) => debug!("undecodable record already removed"),
            Err(err) => {
                warn!(error = %err, "failed to purge undecodable ticket record");
                report.failures += 1;
            },
        }
    }

    async fn verdict(&self, ticket: &Ticket, now: DateTime<Utc>) -> Result<Verdict> {
        let expired = ticket.is_expired(now);
        if ticket.is_root() {
            return Ok(if expired { Verdict::ExpiredRoot } else { Verdict::Live });
        }
        if expired {
            return Ok(Verdict::ExpiredChild);
        }
        if self.registry.ancestors_alive(ticket, now).await? {
            Ok(Verdict::Live)
        } else {
            Ok(Verdict::Orphan)
        }
    }
}
