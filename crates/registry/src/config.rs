//! Registry configuration.
//!
//! [`RegistryConfig`] is deserializable from any serde format the host
//! application loads its settings from; durations use humantime notation
//! (`"8h"`, `"10s"`). Unknown keys are rejected so typos surface at startup.
//! Loading the file is the host's job.
//!
//! # Example
//!
//! ```
//! use ticketry_registry::RegistryConfig;
//!
//! let config: RegistryConfig = serde_json::from_str(r#"{
//!     "tickets": {
//!         "ticket_granting": { "max_time_to_live": "12h", "time_to_kill": "30m" }
//!     },
//!     "cleaner": { "interval": "2m" }
//! }"#).unwrap();
//! config.validate().unwrap();
//! ```
//!
//! # Defaults
//!
//! | Setting | Default |
//! |---------|---------|
//! | `id_generator.random_bytes` | 32 |
//! | `tickets.ticket_granting` | 8h hard, 2h idle |
//! | `tickets.service` | 10s, 1 use |
//! | `tickets.proxy_granting` | inherits `ticket_granting` |
//! | `tickets.proxy` | 10s, 1 use |
//! | `tickets.transient` | 60s |
//! | `cleaner` | enabled, 10s start delay, 60s interval, pages of 500, undecodable records kept |
//! | `crypto` | disabled |
//! | `max_chain_depth` | 16 |
//! | `touch_retry_limit` | 8 |
//! | `scan_page_size` | 500 |

use std::time::Duration;

use serde::{Deserialize, Serialize};
use ticketry_storage::ConfigError;

use crate::{
    cipher::CipherKey,
    expiration::ExpirationPolicy,
    id_generator::{DEFAULT_RANDOM_BYTES, MIN_RANDOM_BYTES, validate_node_suffix},
    ticket::TicketKind,
};

/// Default depth limit when walking parent chains.
pub const DEFAULT_MAX_CHAIN_DEPTH: usize = 16;

/// Default number of compare-and-set attempts for one touch.
pub const DEFAULT_TOUCH_RETRY_LIMIT: usize = 8;

/// Default number of records fetched per storage scan page.
pub const DEFAULT_SCAN_PAGE_SIZE: usize = 500;

fn default_random_bytes() -> usize {
    DEFAULT_RANDOM_BYTES
}

fn default_max_chain_depth() -> usize {
    DEFAULT_MAX_CHAIN_DEPTH
}

fn default_touch_retry_limit() -> usize {
    DEFAULT_TOUCH_RETRY_LIMIT
}

fn default_scan_page_size() -> usize {
    DEFAULT_SCAN_PAGE_SIZE
}

fn default_true() -> bool {
    true
}

/// Id generator settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
#[serde(deny_unknown_fields)]
pub struct IdGeneratorConfig {
    /// Random bytes per id (at least 16).
    #[serde(default = "default_random_bytes")]
    #[builder(default = default_random_bytes())]
    pub random_bytes: usize,

    /// Optional node identifier appended to every id.
    #[serde(default)]
    #[builder(into)]
    pub node_suffix: Option<String>,
}

impl Default for IdGeneratorConfig {
    fn default() -> Self {
        Self { random_bytes: default_random_bytes(), node_suffix: None }
    }
}

/// Session-style policy: absolute and idle bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
#[serde(deny_unknown_fields)]
pub struct GrantingPolicyConfig {
    /// Absolute lifetime.
    #[serde(with = "humantime_serde", default = "default_tgt_max_time_to_live")]
    #[builder(default = default_tgt_max_time_to_live())]
    pub max_time_to_live: Duration,

    /// Idle lifetime.
    #[serde(with = "humantime_serde", default = "default_tgt_time_to_kill")]
    #[builder(default = default_tgt_time_to_kill())]
    pub time_to_kill: Duration,
}

fn default_tgt_max_time_to_live() -> Duration {
    Duration::from_secs(8 * 3600)
}

fn default_tgt_time_to_kill() -> Duration {
    Duration::from_secs(2 * 3600)
}

impl GrantingPolicyConfig {
    /// The expiration policy these settings describe.
    #[must_use]
    pub fn policy(&self) -> ExpirationPolicy {
        ExpirationPolicy::ticket_granting(self.max_time_to_live, self.time_to_kill)
    }

    fn validate(&self, field: &'static str) -> Result<(), ConfigError> {
        require_nonzero(field, self.max_time_to_live)?;
        require_nonzero(field, self.time_to_kill)
    }
}

impl Default for GrantingPolicyConfig {
    fn default() -> Self {
        Self {
            max_time_to_live: default_tgt_max_time_to_live(),
            time_to_kill: default_tgt_time_to_kill(),
        }
    }
}

/// Limited-use policy: lifetime and use quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
#[serde(deny_unknown_fields)]
pub struct UsePolicyConfig {
    /// Absolute lifetime.
    #[serde(with = "humantime_serde", default = "default_use_time_to_live")]
    #[builder(default = default_use_time_to_live())]
    pub time_to_live: Duration,

    /// Allowed uses before the ticket is consumed.
    #[serde(default = "default_max_uses")]
    #[builder(default = default_max_uses())]
    pub max_uses: u32,
}

fn default_use_time_to_live() -> Duration {
    Duration::from_secs(10)
}

fn default_max_uses() -> u32 {
    1
}

impl UsePolicyConfig {
    /// The expiration policy these settings describe.
    #[must_use]
    pub fn policy(&self) -> ExpirationPolicy {
        ExpirationPolicy::multi_use(self.max_uses, self.time_to_live)
    }

    fn validate(&self, field: &'static str) -> Result<(), ConfigError> {
        require_nonzero(field, self.time_to_live)?;
        if self.max_uses == 0 {
            return Err(ConfigError::below_minimum(field, "1 use", 0));
        }
        Ok(())
    }
}

impl Default for UsePolicyConfig {
    fn default() -> Self {
        Self { time_to_live: default_use_time_to_live(), max_uses: default_max_uses() }
    }
}

/// Transient ticket policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
#[serde(deny_unknown_fields)]
pub struct TransientPolicyConfig {
    /// Absolute lifetime.
    #[serde(with = "humantime_serde", default = "default_transient_time_to_live")]
    #[builder(default = default_transient_time_to_live())]
    pub time_to_live: Duration,
}

fn default_transient_time_to_live() -> Duration {
    Duration::from_secs(60)
}

impl Default for TransientPolicyConfig {
    fn default() -> Self {
        Self { time_to_live: default_transient_time_to_live() }
    }
}

/// Default expiration policy per ticket kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
#[serde(deny_unknown_fields)]
pub struct TicketsConfig {
    /// Ticket-granting tickets.
    #[serde(default)]
    #[builder(default)]
    pub ticket_granting: GrantingPolicyConfig,

    /// Service tickets.
    #[serde(default)]
    #[builder(default)]
    pub service: UsePolicyConfig,

    /// Proxy granting tickets. `None` inherits `ticket_granting`.
    #[serde(default)]
    pub proxy_granting: Option<GrantingPolicyConfig>,

    /// Proxy tickets.
    #[serde(default)]
    #[builder(default)]
    pub proxy: UsePolicyConfig,

    /// Transient session tickets.
    #[serde(default)]
    #[builder(default)]
    pub transient: TransientPolicyConfig,
}

impl TicketsConfig {
    /// The default policy for tickets of `kind`.
    #[must_use]
    pub fn policy_for(&self, kind: TicketKind) -> ExpirationPolicy {
        match kind {
            TicketKind::TicketGranting => self.ticket_granting.policy(),
            TicketKind::Service => self.service.policy(),
            TicketKind::ProxyGranting => {
                self.proxy_granting.unwrap_or(self.ticket_granting).policy()
            },
            TicketKind::Proxy => self.proxy.policy(),
            TicketKind::TransientSession => {
                ExpirationPolicy::hard_timeout(self.transient.time_to_live)
            },
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.ticket_granting.validate("tickets.ticket_granting")?;
        self.service.validate("tickets.service")?;
        if let Some(pgt) = &self.proxy_granting {
            pgt.validate("tickets.proxy_granting")?;
        }
        self.proxy.validate("tickets.proxy")?;
        require_nonzero("tickets.transient", self.transient.time_to_live)
    }
}

/// Background cleaner settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
#[serde(deny_unknown_fields)]
pub struct CleanerConfig {
    /// Whether the cleaner runs at all.
    #[serde(default = "default_true")]
    #[builder(default = true)]
    pub enabled: bool,

    /// Delay before the first run.
    #[serde(with = "humantime_serde", default = "default_start_delay")]
    #[builder(default = default_start_delay())]
    pub start_delay: Duration,

    /// Time between runs.
    #[serde(with = "humantime_serde", default = "default_interval")]
    #[builder(default = default_interval())]
    pub interval: Duration,

    /// Records fetched per scan page.
    #[serde(default = "default_scan_page_size")]
    #[builder(default = default_scan_page_size())]
    pub page_size: usize,

    /// Delete records that cannot be decoded. Off by default: during a key
    /// rotation, nodes still on the old key cannot read new records either.
    #[serde(default)]
    #[builder(default)]
    pub purge_undecodable: bool,
}

fn default_start_delay() -> Duration {
    Duration::from_secs(10)
}

fn default_interval() -> Duration {
    Duration::from_secs(60)
}

impl CleanerConfig {
    /// Validates the cleaner settings on their own.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::BelowMinimum`] for a zero interval or page size.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_nonzero("cleaner.interval", self.interval)?;
        if self.page_size == 0 {
            return Err(ConfigError::below_minimum("cleaner.page_size", 1, 0));
        }
        Ok(())
    }
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            start_delay: default_start_delay(),
            interval: default_interval(),
            page_size: default_scan_page_size(),
            purge_undecodable: false,
        }
    }
}

/// Payload encryption settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, bon::Builder)]
#[serde(deny_unknown_fields)]
pub struct CryptoConfig {
    /// Encrypt payloads and digest storage keys.
    #[serde(default)]
    #[builder(default)]
    pub enabled: bool,

    /// Master key, base64url encoded. Required when enabled.
    #[serde(default)]
    pub key: Option<CipherKey>,
}

/// Top-level registry configuration.
///
/// Construct with [`RegistryConfig::builder`] (validated on build) or
/// deserialize and call [`validate`](Self::validate).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistryConfig {
    #[serde(default)]
    pub(crate) id_generator: IdGeneratorConfig,

    #[serde(default)]
    pub(crate) tickets: TicketsConfig,

    #[serde(default)]
    pub(crate) cleaner: CleanerConfig,

    #[serde(default)]
    pub(crate) crypto: CryptoConfig,

    #[serde(default = "default_max_chain_depth")]
    pub(crate) max_chain_depth: usize,

    #[serde(default = "default_touch_retry_limit")]
    pub(crate) touch_retry_limit: usize,

    #[serde(default = "default_scan_page_size")]
    pub(crate) scan_page_size: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            id_generator: IdGeneratorConfig::default(),
            tickets: TicketsConfig::default(),
            cleaner: CleanerConfig::default(),
            crypto: CryptoConfig::default(),
            max_chain_depth: DEFAULT_MAX_CHAIN_DEPTH,
            touch_retry_limit: DEFAULT_TOUCH_RETRY_LIMIT,
            scan_page_size: DEFAULT_SCAN_PAGE_SIZE,
        }
    }
}

#[bon::bon]
impl RegistryConfig {
    /// Creates a validated configuration. Every section defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if any setting is out of range; see
    /// [`validate`](Self::validate).
    #[builder]
    pub fn new(
        #[builder(default)] id_generator: IdGeneratorConfig,
        #[builder(default)] tickets: TicketsConfig,
        #[builder(default)] cleaner: CleanerConfig,
        #[builder(default)] crypto: CryptoConfig,
        #[builder(default = DEFAULT_MAX_CHAIN_DEPTH)] max_chain_depth: usize,
        #[builder(default = DEFAULT_TOUCH_RETRY_LIMIT)] touch_retry_limit: usize,
        #[builder(default = DEFAULT_SCAN_PAGE_SIZE)] scan_page_size: usize,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            id_generator,
            tickets,
            cleaner,
            crypto,
            max_chain_depth,
            touch_retry_limit,
            scan_page_size,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks every setting.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::BelowMinimum`] for too few random bytes, zero
    ///   durations or limits, and short keys.
    /// - [`ConfigError::Invalid`] for a malformed node suffix, or crypto
    ///   enabled without a key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id_generator.random_bytes < MIN_RANDOM_BYTES {
            return Err(ConfigError::below_minimum(
                "id_generator.random_bytes",
                MIN_RANDOM_BYTES,
                self.id_generator.random_bytes,
            ));
        }
        if let Some(suffix) = &self.id_generator.node_suffix {
            validate_node_suffix(suffix)?;
        }
        self.tickets.validate()?;
        self.cleaner.validate()?;
        if self.crypto.enabled && self.crypto.key.is_none() {
            return Err(ConfigError::invalid("crypto.key", "required when crypto is enabled"));
        }
        for (field, value) in [
            ("max_chain_depth", self.max_chain_depth),
            ("touch_retry_limit", self.touch_retry_limit),
            ("scan_page_size", self.scan_page_size),
        ] {
            if value == 0 {
                return Err(ConfigError::below_minimum(field, 1, 0));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn id_generator(&self) -> &IdGeneratorConfig {
        &self.id_generator
    }

    #[must_use]
    pub fn tickets(&self) -> &TicketsConfig {
        &self.tickets
    }

    #[must_use]
    pub fn cleaner(&self) -> &CleanerConfig {
        &self.cleaner
    }

    #[must_use]
    pub fn crypto(&self) -> &CryptoConfig {
        &self.crypto
    }

    /// Maximum ancestors inspected when checking chained expiration. Deeper
    /// chains are treated as expired.
    #[must_use]
    pub fn max_chain_depth(&self) -> usize {
        self.max_chain_depth
    }

    /// Compare-and-set attempts before a contended touch gives up.
    #[must_use]
    pub fn touch_retry_limit(&self) -> usize {
        self.touch_retry_limit
    }

    #[must_use]
    pub fn scan_page_size(&self) -> usize {
        self.scan_page_size
    }
}

fn require_nonzero(field: &'static str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::below_minimum(field, "1ns", "0s"));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = RegistryConfig::builder().build().unwrap();
        assert_eq!(config.id_generator().random_bytes, 32);
        assert_eq!(
            config.tickets().policy_for(TicketKind::TicketGranting),
            ExpirationPolicy::ticket_granting(
                Duration::from_secs(8 * 3600),
                Duration::from_secs(2 * 3600)
            )
        );
        assert_eq!(
            config.tickets().policy_for(TicketKind::Service),
            ExpirationPolicy::single_use(Duration::from_secs(10))
        );
        assert_eq!(
            config.tickets().policy_for(TicketKind::TransientSession),
            ExpirationPolicy::hard_timeout(Duration::from_secs(60))
        );
        assert_eq!(config.cleaner().interval, Duration::from_secs(60));
        assert_eq!(config.cleaner().start_delay, Duration::from_secs(10));
        assert_eq!(config.max_chain_depth(), 16);
        assert_eq!(config.touch_retry_limit(), 8);
        assert_eq!(config.scan_page_size(), 500);
        assert!(!config.crypto().enabled);
    }

    #[test]
    fn proxy_granting_inherits_session_policy() {
        let tickets = TicketsConfig::builder()
            .ticket_granting(
                GrantingPolicyConfig::builder().time_to_kill(Duration::from_secs(600)).build(),
            )
            .build();
        assert_eq!(
            tickets.policy_for(TicketKind::ProxyGranting),
            tickets.policy_for(TicketKind::TicketGranting)
        );
    }

    #[test]
    fn deserializes_humantime_and_partial_sections() {
        let config: RegistryConfig = serde_json::from_str(
            r#"{
                "tickets": {
                    "service": { "time_to_live": "30s", "max_uses": 2 },
                    "proxy_granting": { "max_time_to_live": "1h", "time_to_kill": "10m" }
                },
                "cleaner": { "enabled": false, "interval": "5m" },
                "touch_retry_limit": 3
            }"#,
        )
        .unwrap();
        config.validate().unwrap();

        assert_eq!(
            config.tickets().policy_for(TicketKind::Service),
            ExpirationPolicy::multi_use(2, Duration::from_secs(30))
        );
        assert_eq!(
            config.tickets().policy_for(TicketKind::ProxyGranting),
            ExpirationPolicy::ticket_granting(Duration::from_secs(3600), Duration::from_secs(600))
        );
        assert!(!config.cleaner().enabled);
        assert_eq!(config.cleaner().interval, Duration::from_secs(300));
        assert_eq!(config.cleaner().page_size, DEFAULT_SCAN_PAGE_SIZE);
        assert_eq!(config.touch_retry_limit(), 3);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let json = r#"{ "cleaner": { "intervall": "5m" } }"#;
        let result = serde_json::from_str::<RegistryConfig>(json);
        assert!(result.is_err());
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let err = RegistryConfig::builder()
            .id_generator(IdGeneratorConfig::builder().random_bytes(8).build())
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::BelowMinimum { field: "id_generator.random_bytes", .. }
        ));

        let err = RegistryConfig::builder().touch_retry_limit(0).build().unwrap_err();
        assert!(matches!(err, ConfigError::BelowMinimum { field: "touch_retry_limit", .. }));

        let err = RegistryConfig::builder()
            .cleaner(CleanerConfig::builder().interval(Duration::ZERO).build())
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::BelowMinimum { field: "cleaner.interval", .. }));

        let err = RegistryConfig::builder()
            .tickets(
                TicketsConfig::builder()
                    .service(UsePolicyConfig::builder().max_uses(0).build())
                    .build(),
            )
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::BelowMinimum { field: "tickets.service", .. }));
    }

    #[test]
    fn crypto_requires_a_key() {
        let err = RegistryConfig::builder()
            .crypto(CryptoConfig::builder().enabled(true).build())
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "crypto.key", .. }));

        let config = RegistryConfig::builder()
            .crypto(CryptoConfig::builder().enabled(true).key(CipherKey::generate()).build())
            .build();
        assert!(config.is_ok());
    }

    #[test]
    fn crypto_key_deserializes_from_base64url() {
        let key = CipherKey::generate();
        let encoded = key.to_base64url();
        let json = format!(r#"{{ "crypto": {{ "enabled": true, "key": "{}" }} }}"#, *encoded);
        let config: RegistryConfig = serde_json::from_str(&json).unwrap();
        config.validate().unwrap();

        let short = r#"{ "crypto": { "enabled": true, "key": "AAAA" } }"#;
        assert!(serde_json::from_str::<RegistryConfig>(short).is_err());
    }
}
