//! Record size bounds enforced by backends on every write.
//!
//! Ticket ids are short and ticket records rarely exceed a few kilobytes;
//! anything much larger is a runaway attribute payload. A backend holds a
//! [`SizeLimits`] and calls [`check_entry`](SizeLimits::check_entry) or
//! [`check_key`](SizeLimits::check_key) before touching its store.
//!
//! | Limit | Default | Floor |
//! |-------|---------|-------|
//! | key   | 256 B   | 64 B  |
//! | value | 256 KiB | 1 KiB |
//!
//! The floors guarantee every id the registry generates, plaintext or
//! digested, fits in a key, and that a minimal ticket fits in a value.

use crate::{ConfigError, StorageError};

/// Default maximum key size in bytes.
pub const DEFAULT_MAX_KEY_SIZE: usize = 256;

/// Default maximum value size in bytes.
pub const DEFAULT_MAX_VALUE_SIZE: usize = 256 * 1024;

/// Smallest accepted key limit.
pub const MIN_KEY_SIZE: usize = 64;

/// Smallest accepted value limit.
pub const MIN_VALUE_SIZE: usize = 1024;

/// Upper bounds on key and value length.
///
/// ```
/// use ticketry_storage::SizeLimits;
///
/// let limits = SizeLimits::new(128, 64 * 1024).unwrap();
/// assert!(limits.check_entry(b"ST-1", b"{}").is_ok());
/// assert!(limits.check_key(&[b'x'; 129]).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeLimits {
    max_key_size: usize,
    max_value_size: usize,
}

impl SizeLimits {
    /// Creates limits, rejecting bounds below [`MIN_KEY_SIZE`] and
    /// [`MIN_VALUE_SIZE`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::BelowMinimum`] naming the offending limit.
    pub fn new(max_key_size: usize, max_value_size: usize) -> Result<Self, ConfigError> {
        if max_key_size < MIN_KEY_SIZE {
            return Err(ConfigError::below_minimum("max_key_size", MIN_KEY_SIZE, max_key_size));
        }
        if max_value_size < MIN_VALUE_SIZE {
            return Err(ConfigError::below_minimum(
                "max_value_size",
                MIN_VALUE_SIZE,
                max_value_size,
            ));
        }
        Ok(Self { max_key_size, max_value_size })
    }

    #[must_use]
    pub fn max_key_size(&self) -> usize {
        self.max_key_size
    }

    #[must_use]
    pub fn max_value_size(&self) -> usize {
        self.max_value_size
    }

    /// Checks a key on paths that carry no value (`delete`,
    /// `compare_and_delete`).
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::SizeLimitExceeded`] with kind `"key"`.
    pub fn check_key(&self, key: &[u8]) -> Result<(), StorageError> {
        if key.len() > self.max_key_size {
            return Err(StorageError::size_limit_exceeded("key", key.len(), self.max_key_size));
        }
        Ok(())
    }

    /// Checks a key and the value about to be written under it.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::SizeLimitExceeded`] with kind `"key"` or
    /// `"value"`. The key is checked first.
    pub fn check_entry(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        self.check_key(key)?;
        if value.len() > self.max_value_size {
            return Err(StorageError::size_limit_exceeded(
                "value",
                value.len(),
                self.max_value_size,
            ));
        }
        Ok(())
    }
}

impl Default for SizeLimits {
    fn default() -> Self {
        Self { max_key_size: DEFAULT_MAX_KEY_SIZE, max_value_size: DEFAULT_MAX_VALUE_SIZE }
    }
}
