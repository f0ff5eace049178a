//! Ticket payload ciphers.
//!
//! The registry hands every serialized ticket to a [`CipherExecutor`] before
//! it reaches storage, and every stored record back through it after a read.
//! Two executors ship with the crate:
//!
//! - [`NoOpCipherExecutor`]: pass-through, for deployments whose storage is
//!   already trusted.
//! - [`HmacCtrCipherExecutor`]: encrypt-then-MAC built from HMAC-SHA256 alone.
//!   The keystream is HMAC-SHA256 in counter mode over a random 128-bit
//!   nonce; the tag is HMAC-SHA256 over version, nonce and ciphertext, with
//!   independent subkeys derived from one master key.
//!
//! Deployments needing a different primitive implement [`CipherExecutor`].
//!
//! # Sealed record layout
//!
//! ```text
//! ┌─────────┬──────────────┬────────────────┬──────────────┐
//! │ version │ nonce (16 B) │ ciphertext     │ tag (32 B)   │
//! │ 0x01    │              │ len(plaintext) │ HMAC-SHA256  │
//! └─────────┴──────────────┴────────────────┴──────────────┘
//! ```

use std::fmt;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use rand::{RngCore, rngs::OsRng};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::Sha256;
use thiserror::Error;
use ticketry_storage::{ConfigError, DEFAULT_MAX_VALUE_SIZE};
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

/// Minimum master key length in bytes.
pub const MIN_KEY_BYTES: usize = 32;

const VERSION: u8 = 1;
const NONCE_LEN: usize = 16;
const TAG_LEN: usize = 32;
const BLOCK_LEN: usize = 32;

/// Bytes a sealed record adds on top of its plaintext.
pub const SEAL_OVERHEAD: usize = 1 + NONCE_LEN + TAG_LEN;

/// Opaque cipher failure. Deliberately carries no key or payload material.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("cipher operation failed: {reason}")]
pub struct CipherError {
    reason: &'static str,
}

impl CipherError {
    fn new(reason: &'static str) -> Self {
        Self { reason }
    }
}

/// Encrypts ticket payloads on their way to storage and decrypts them on the
/// way back.
pub trait CipherExecutor: Send + Sync + fmt::Debug {
    /// Seals `plaintext`.
    ///
    /// # Errors
    ///
    /// Fails if the payload exceeds [`max_payload_size`](Self::max_payload_size).
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError>;

    /// Opens a record produced by [`encrypt`](Self::encrypt).
    ///
    /// # Errors
    ///
    /// Fails on truncated, tampered or foreign-key records.
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError>;

    /// Largest plaintext this executor accepts.
    fn max_payload_size(&self) -> usize;

    /// Whether this executor actually transforms data. When it does, the
    /// registry also digests ticket ids before using them as storage keys.
    fn is_enabled(&self) -> bool {
        true
    }
}

/// Pass-through executor.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpCipherExecutor;

impl CipherExecutor for NoOpCipherExecutor {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        if plaintext.len() > self.max_payload_size() {
            return Err(CipherError::new("payload exceeds the maximum size"));
        }
        Ok(plaintext.to_vec())
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
        Ok(ciphertext.to_vec())
    }

    fn max_payload_size(&self) -> usize {
        DEFAULT_MAX_VALUE_SIZE
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

/// Master key for [`HmacCtrCipherExecutor`]. Zeroized on drop.
///
/// Serialized as base64url without padding.
#[derive(Clone)]
pub struct CipherKey(Zeroizing<Vec<u8>>);

impl CipherKey {
    /// Wraps raw key bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::BelowMinimum`] for keys shorter than
    /// [`MIN_KEY_BYTES`].
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, ConfigError> {
        let bytes = Zeroizing::new(bytes);
        if bytes.len() < MIN_KEY_BYTES {
            return Err(ConfigError::below_minimum("crypto.key bytes", MIN_KEY_BYTES, bytes.len()));
        }
        Ok(Self(bytes))
    }

    /// Decodes a base64url (no padding) key.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for malformed input and
    /// [`ConfigError::BelowMinimum`] for short keys.
    pub fn from_base64url(encoded: &str) -> Result<Self, ConfigError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded.trim())
            .map_err(|_| ConfigError::invalid("crypto.key", "not valid base64url"))?;
        Self::from_bytes(bytes)
    }

    /// A fresh random key of [`MIN_KEY_BYTES`].
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = Zeroizing::new(vec![0u8; MIN_KEY_BYTES]);
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Encodes the key as base64url.
    #[must_use]
    pub fn to_base64url(&self) -> Zeroizing<String> {
        Zeroizing::new(URL_SAFE_NO_PAD.encode(self.0.as_slice()))
    }

    fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for CipherKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CipherKey(<redacted>)")
    }
}

impl Serialize for CipherKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64url())
    }
}

impl<'de> Deserialize<'de> for CipherKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = Zeroizing::new(String::deserialize(deserializer)?);
        Self::from_base64url(&encoded).map_err(serde::de::Error::custom)
    }
}

/// Encrypt-then-MAC executor built on HMAC-SHA256.
pub struct HmacCtrCipherExecutor {
    enc_key: Zeroizing<Vec<u8>>,
    mac_key: Zeroizing<Vec<u8>>,
    max_payload_size: usize,
}

impl HmacCtrCipherExecutor {
    /// Derives the encryption and authentication subkeys from `key`.
    ///
    /// The default payload limit keeps sealed records within the storage
    /// crate's default value size.
    ///
    /// # Errors
    ///
    /// Fails only if the HMAC implementation rejects the key.
    pub fn new(key: &CipherKey) -> Result<Self, CipherError> {
        Ok(Self {
            enc_key: derive_subkey(key.as_bytes(), b"ticketry/cipher/enc")?,
            mac_key: derive_subkey(key.as_bytes(), b"ticketry/cipher/mac")?,
            max_payload_size: DEFAULT_MAX_VALUE_SIZE - SEAL_OVERHEAD,
        })
    }

    /// Overrides the largest accepted plaintext.
    #[must_use]
    pub fn with_max_payload_size(mut self, max_payload_size: usize) -> Self {
        self.max_payload_size = max_payload_size;
        self
    }

    fn apply_keystream(&self, nonce: &[u8], data: &mut [u8]) -> Result<(), CipherError> {
        for (counter, chunk) in data.chunks_mut(BLOCK_LEN).enumerate() {
            let mut mac = keyed(&self.enc_key)?;
            mac.update(nonce);
            mac.update(&(counter as u64).to_be_bytes());
            let block = mac.finalize().into_bytes();
            for (byte, key) in chunk.iter_mut().zip(block.iter()) {
                *byte ^= key;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for HmacCtrCipherExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HmacCtrCipherExecutor")
            .field("max_payload_size", &self.max_payload_size)
            .finish_non_exhaustive()
    }
}

impl CipherExecutor for HmacCtrCipherExecutor {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        if plaintext.len() > self.max_payload_size {
            return Err(CipherError::new("payload exceeds the maximum size"));
        }

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let mut sealed = Vec::with_capacity(plaintext.len() + SEAL_OVERHEAD);
        sealed.push(VERSION);
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(plaintext);
        self.apply_keystream(&nonce, &mut sealed[1 + NONCE_LEN..])?;

        let mut mac = keyed(&self.mac_key)?;
        mac.update(&sealed);
        sealed.extend_from_slice(&mac.finalize().into_bytes());
        Ok(sealed)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
        if ciphertext.len() < SEAL_OVERHEAD {
            return Err(CipherError::new("record is truncated"));
        }
        if ciphertext[0] != VERSION {
            return Err(CipherError::new("unknown record version"));
        }

        let (body, tag) = ciphertext.split_at(ciphertext.len() - TAG_LEN);
        let mut mac = keyed(&self.mac_key)?;
        mac.update(body);
        mac.verify_slice(tag).map_err(|_| CipherError::new("authentication failed"))?;

        let (header, encrypted) = body.split_at(1 + NONCE_LEN);
        let mut plaintext = encrypted.to_vec();
        self.apply_keystream(&header[1..], &mut plaintext)?;
        Ok(plaintext)
    }

    fn max_payload_size(&self) -> usize {
        self.max_payload_size
    }
}

fn keyed(key: &[u8]) -> Result<HmacSha256, CipherError> {
    <HmacSha256 as Mac>::new_from_slice(key).map_err(|_| CipherError::new("invalid key length"))
}

fn derive_subkey(master: &[u8], label: &[u8]) -> Result<Zeroizing<Vec<u8>>, CipherError> {
    let mut mac = keyed(master)?;
    mac.update(label);
    Ok(Zeroizing::new(mac.finalize().into_bytes().to_vec()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn executor() -> HmacCtrCipherExecutor {
        HmacCtrCipherExecutor::new(&CipherKey::generate()).unwrap()
    }

    #[test]
    fn round_trip_empty_payload() {
        let cipher = executor();
        let sealed = cipher.encrypt(b"").unwrap();
        assert_eq!(sealed.len(), SEAL_OVERHEAD);
        assert_eq!(cipher.decrypt(&sealed).unwrap(), b"");
    }

    #[test]
    fn round_trip_maximum_payload() {
        let cipher = executor();
        let payload = vec![0x5A; cipher.max_payload_size()];
        let sealed = cipher.encrypt(&payload).unwrap();
        assert_eq!(sealed.len(), DEFAULT_MAX_VALUE_SIZE, "sealed record fits the storage limit");
        assert_eq!(cipher.decrypt(&sealed).unwrap(), payload);
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let cipher = executor().with_max_payload_size(8);
        assert!(cipher.encrypt(&[0; 9]).is_err());
        assert!(cipher.encrypt(&[0; 8]).is_ok());
    }

    #[test]
    fn ciphertext_hides_plaintext_and_varies() {
        let cipher = executor();
        let plaintext = b"{\"principal\":\"casuser\"}";
        let a = cipher.encrypt(plaintext).unwrap();
        let b = cipher.encrypt(plaintext).unwrap();
        assert_ne!(a, b, "fresh nonce per record");
        assert!(!a.windows(7).any(|w| w == b"casuser"));
    }

    #[test]
    fn tampering_is_detected() {
        let cipher = executor();
        let mut sealed = cipher.encrypt(b"service ticket").unwrap();
        sealed[1 + NONCE_LEN] ^= 0x01;
        assert_eq!(cipher.decrypt(&sealed).unwrap_err(), CipherError::new("authentication failed"));
    }

    #[test]
    fn foreign_key_is_rejected() {
        let sealed = executor().encrypt(b"payload").unwrap();
        assert!(executor().decrypt(&sealed).is_err());
    }

    #[test]
    fn truncated_and_unversioned_records_are_rejected() {
        let cipher = executor();
        assert!(cipher.decrypt(&[VERSION; 10]).is_err());

        let mut sealed = cipher.encrypt(b"x").unwrap();
        sealed[0] = 0x7F;
        assert_eq!(
            cipher.decrypt(&sealed).unwrap_err(),
            CipherError::new("unknown record version")
        );
    }

    #[test]
    fn key_length_is_enforced() {
        assert!(CipherKey::from_bytes(vec![0; 31]).is_err());
        assert!(CipherKey::from_bytes(vec![0; 32]).is_ok());
        assert!(CipherKey::from_base64url("not base64!").is_err());
    }

    #[test]
    fn key_serde_and_debug() {
        let key = CipherKey::generate();
        let json = serde_json::to_string(&key).unwrap();
        let back: CipherKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back.as_bytes(), key.as_bytes());
        assert_eq!(format!("{key:?}"), "CipherKey(<redacted>)");
    }

    #[test]
    fn noop_passes_through() {
        let cipher = NoOpCipherExecutor;
        assert!(!cipher.is_enabled());
        assert_eq!(cipher.decrypt(&cipher.encrypt(b"abc").unwrap()).unwrap(), b"abc");
    }

    mod proptests {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            #[test]
            fn decrypt_inverts_encrypt(payload in proptest::collection::vec(any::<u8>(), 0..4096)) {
                let cipher = executor();
                let sealed = cipher.encrypt(&payload).unwrap();
                prop_assert_eq!(cipher.decrypt(&sealed).unwrap(), payload);
            }
        }
    }
}
