//! Expiration policies.
//!
//! A policy is a pure function of a ticket's [`UsageState`] and the current
//! time. Policies compose: the standard session policy is
//! `AnyOf[HardTimeout, Idle]`, the standard service ticket policy is
//! `UseQuota { max_uses: 1, inner: HardTimeout }`.
//!
//! All time comparisons are strict: a ticket with a ten second hard timeout
//! is still valid exactly ten seconds after creation and expired one
//! instant later.
//!
//! | Policy | Expired when |
//! |--------|--------------|
//! | `NeverExpires` | never |
//! | `AlwaysExpires` | always |
//! | `HardTimeout` | `now - creation_time > time_to_live` |
//! | `Idle` | `now - last_time_used > time_to_kill` |
//! | `UseQuota` | `count_of_uses >= max_uses` or inner expired |
//! | `Throttled` | inner expired, or used and last use under `time_in_between_uses` ago |
//! | `AnyOf` | any child expired (never, if empty) |
//! | `AllOf` | every child expired (never, if empty) |

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::to_delta;

/// Extra lifetime added to storage eviction hints so a backend never evicts
/// a ticket at the exact instant it is still valid.
const STORAGE_TTL_GRACE: Duration = Duration::from_secs(1);

/// The counters an expiration policy is evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageState {
    /// When the ticket was created.
    pub creation_time: DateTime<Utc>,
    /// When the ticket was last used; equals `creation_time` before any use.
    pub last_time_used: DateTime<Utc>,
    /// The use before the last one, if any.
    pub previous_time_used: Option<DateTime<Utc>>,
    /// How many times the ticket has been used.
    pub count_of_uses: u32,
}

impl UsageState {
    /// State of a freshly created, never used ticket.
    #[must_use]
    pub fn fresh(creation_time: DateTime<Utc>) -> Self {
        Self {
            creation_time,
            last_time_used: creation_time,
            previous_time_used: None,
            count_of_uses: 0,
        }
    }
}

/// A composable ticket expiration rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExpirationPolicy {
    /// Never expires. Administrative tickets and tests.
    NeverExpires,

    /// Always expired. Tests.
    AlwaysExpires,

    /// Absolute lifetime from creation.
    HardTimeout {
        /// Maximum lifetime.
        #[serde(with = "humantime_serde")]
        time_to_live: Duration,
    },

    /// Sliding lifetime from the last use.
    Idle {
        /// Maximum idle time.
        #[serde(with = "humantime_serde")]
        time_to_kill: Duration,
    },

    /// Expires once used `max_uses` times, or when `inner` expires.
    UseQuota {
        /// Allowed number of uses.
        max_uses: u32,
        /// Time-based policy applied alongside the quota.
        inner: Box<ExpirationPolicy>,
    },

    /// Rejects uses that follow the previous one too closely.
    Throttled {
        /// Minimum spacing between uses.
        #[serde(with = "humantime_serde")]
        time_in_between_uses: Duration,
        /// Policy applied alongside the throttle.
        inner: Box<ExpirationPolicy>,
    },

    /// Expired when any child policy is expired.
    AnyOf {
        /// Child policies.
        policies: Vec<ExpirationPolicy>,
    },

    /// Expired when every child policy is expired.
    AllOf {
        /// Child policies.
        policies: Vec<ExpirationPolicy>,
    },
}

impl ExpirationPolicy {
    /// Absolute timeout.
    #[must_use]
    pub fn hard_timeout(time_to_live: Duration) -> Self {
        Self::HardTimeout { time_to_live }
    }

    /// Sliding timeout.
    #[must_use]
    pub fn idle(time_to_kill: Duration) -> Self {
        Self::Idle { time_to_kill }
    }

    /// The standard session policy: expires after `max_time_to_live` or
    /// after `time_to_kill` without use, whichever comes first.
    #[must_use]
    pub fn ticket_granting(max_time_to_live: Duration, time_to_kill: Duration) -> Self {
        Self::AnyOf {
            policies: vec![Self::hard_timeout(max_time_to_live), Self::idle(time_to_kill)],
        }
    }

    /// Usable once, within `time_to_live`.
    #[must_use]
    pub fn single_use(time_to_live: Duration) -> Self {
        Self::multi_use(1, time_to_live)
    }

    /// Usable `max_uses` times, within `time_to_live`.
    #[must_use]
    pub fn multi_use(max_uses: u32, time_to_live: Duration) -> Self {
        Self::UseQuota { max_uses, inner: Box::new(Self::hard_timeout(time_to_live)) }
    }

    /// Usable repeatedly within `time_to_live`, at most once every
    /// `time_in_between_uses`.
    #[must_use]
    pub fn throttled(time_in_between_uses: Duration, time_to_live: Duration) -> Self {
        Self::Throttled {
            time_in_between_uses,
            inner: Box::new(Self::hard_timeout(time_to_live)),
        }
    }

    /// Whether a ticket in `usage` state is expired at `now`.
    #[must_use]
    pub fn is_expired(&self, usage: &UsageState, now: DateTime<Utc>) -> bool {
        match self {
            Self::NeverExpires => false,
            Self::AlwaysExpires => true,
            Self::HardTimeout { time_to_live } => {
                elapsed_exceeds(usage.creation_time, now, *time_to_live)
            },
            Self::Idle { time_to_kill } => {
                elapsed_exceeds(usage.last_time_used, now, *time_to_kill)
            },
            Self::UseQuota { max_uses, inner } => {
                usage.count_of_uses >= *max_uses || inner.is_expired(usage, now)
            },
            Self::Throttled { time_in_between_uses, inner } => {
                if inner.is_expired(usage, now) {
                    return true;
                }
                usage.count_of_uses > 0
                    && now.signed_duration_since(usage.last_time_used)
                        < to_delta(*time_in_between_uses)
            },
            Self::AnyOf { policies } => policies.iter().any(|p| p.is_expired(usage, now)),
            Self::AllOf { policies } => {
                !policies.is_empty() && policies.iter().all(|p| p.is_expired(usage, now))
            },
        }
    }

    /// Whether the use quota alone has run out.
    ///
    /// The registry checks this right after recording a use: an exhausted
    /// ticket is consumed (deleted) instead of being written back. Time-based
    /// parts of the policy are ignored.
    #[must_use]
    pub fn is_exhausted(&self, usage: &UsageState) -> bool {
        match self {
            Self::UseQuota { max_uses, inner } => {
                usage.count_of_uses >= *max_uses || inner.is_exhausted(usage)
            },
            Self::Throttled { inner, .. } => inner.is_exhausted(usage),
            Self::AnyOf { policies } => policies.iter().any(|p| p.is_exhausted(usage)),
            Self::AllOf { policies } => {
                !policies.is_empty() && policies.iter().all(|p| p.is_exhausted(usage))
            },
            Self::NeverExpires
            | Self::AlwaysExpires
            | Self::HardTimeout { .. }
            | Self::Idle { .. } => false,
        }
    }

    /// Longest time, measured from `now`, that a ticket in `usage` state
    /// could remain valid without being written again.
    ///
    /// Passed to backends as an eviction hint. `None` means unbounded.
    #[must_use]
    pub fn storage_ttl(&self, usage: &UsageState, now: DateTime<Utc>) -> Option<Duration> {
        self.remaining(usage, now).map(|left| left.saturating_add(STORAGE_TTL_GRACE))
    }

    fn remaining(&self, usage: &UsageState, now: DateTime<Utc>) -> Option<Duration> {
        match self {
            Self::NeverExpires => None,
            Self::AlwaysExpires => Some(Duration::ZERO),
            Self::HardTimeout { time_to_live } => {
                Some(remaining_after(usage.creation_time, now, *time_to_live))
            },
            Self::Idle { time_to_kill } => {
                Some(remaining_after(usage.last_time_used, now, *time_to_kill))
            },
            Self::UseQuota { inner, .. } | Self::Throttled { inner, .. } => {
                inner.remaining(usage, now)
            },
            Self::AnyOf { policies } => {
                policies.iter().filter_map(|p| p.remaining(usage, now)).min()
            },
            Self::AllOf { policies } => {
                if policies.is_empty() {
                    return None;
                }
                policies.iter().map(|p| p.remaining(usage, now)).try_fold(
                    Duration::ZERO,
                    |longest, left| left.map(|left| longest.max(left)),
                )
            },
        }
    }
}

fn elapsed_exceeds(since: DateTime<Utc>, now: DateTime<Utc>, limit: Duration) -> bool {
    now.signed_duration_since(since) > to_delta(limit)
}

fn remaining_after(since: DateTime<Utc>, now: DateTime<Utc>, limit: Duration) -> Duration {
    let elapsed = now.signed_duration_since(since).to_std().unwrap_or(Duration::ZERO);
    limit.saturating_sub(elapsed)
}
