//! Ticket ⇄ storage record conversion.
//!
//! Tickets are serialized as JSON, then passed through the configured
//! [`CipherExecutor`]. When the cipher is enabled, storage keys are the
//! base64url SHA-256 digest of the ticket id, so neither ids nor payloads
//! reach the backend in plaintext.

use std::sync::Arc;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};

use crate::{
    cipher::CipherExecutor,
    error::{RegistryError, Result},
    ticket::{Ticket, TicketId},
};

#[derive(Debug, Clone)]
pub(crate) struct TicketCodec {
    cipher: Arc<dyn CipherExecutor>,
}

impl TicketCodec {
    pub(crate) fn new(cipher: Arc<dyn CipherExecutor>) -> Self {
        Self { cipher }
    }

    pub(crate) fn storage_key(&self, id: &TicketId) -> Vec<u8> {
        if self.cipher.is_enabled() {
            let digest = Sha256::digest(id.as_str().as_bytes());
            URL_SAFE_NO_PAD.encode(digest).into_bytes()
        } else {
            id.as_str().as_bytes().to_vec()
        }
    }

    pub(crate) fn encode(&self, ticket: &Ticket) -> Result<Vec<u8>> {
        let json = serde_json::to_vec(ticket).map_err(|e| {
            RegistryError::serialization_with_source("failed to serialize ticket", e)
        })?;
        self.cipher
            .encrypt(&json)
            .map_err(|e| RegistryError::serialization_with_source("failed to encrypt ticket", e))
    }

    pub(crate) fn decode(&self, record: &[u8]) -> Result<Ticket> {
        let json = self
            .cipher
            .decrypt(record)
            .map_err(|e| RegistryError::serialization_with_source("failed to decrypt ticket", e))?;
        serde_json::from_slice(&json).map_err(|e| {
            RegistryError::serialization_with_source("failed to deserialize ticket", e)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;

    use super::*;
    use crate::{
        cipher::{CipherKey, HmacCtrCipherExecutor, NoOpCipherExecutor},
        expiration::ExpirationPolicy,
        ticket::TicketPayload,
    };

    fn service_ticket() -> Ticket {
        Ticket::new(
            TicketId::new("ST-codec-test"),
            TicketPayload::service("https://app.example.org", false),
            ExpirationPolicy::single_use(Duration::from_secs(10)),
            Some(TicketId::new("TGT-parent")),
            Utc::now(),
        )
    }

    fn sealed_codec() -> TicketCodec {
        let cipher = HmacCtrCipherExecutor::new(&CipherKey::generate()).unwrap();
        TicketCodec::new(Arc::new(cipher))
    }

    #[test]
    fn plain_codec_uses_raw_ids_and_json() {
        let codec = TicketCodec::new(Arc::new(NoOpCipherExecutor));
        let ticket = service_ticket();

        assert_eq!(codec.storage_key(ticket.id()), b"ST-codec-test");
        let record = codec.encode(&ticket).unwrap();
        assert!(serde_json::from_slice::<serde_json::Value>(&record).is_ok());
        assert_eq!(codec.decode(&record).unwrap(), ticket);
    }

    #[test]
    fn sealed_codec_digests_ids_and_hides_payload() {
        let codec = sealed_codec();
        let ticket = service_ticket();

        let key = codec.storage_key(ticket.id());
        assert_eq!(key.len(), 43, "base64url of a 32-byte digest");
        assert!(!key.windows(4).any(|w| w == b"ST-c"));
        assert_eq!(key, codec.storage_key(ticket.id()), "digest is deterministic");

        let record = codec.encode(&ticket).unwrap();
        assert!(!record.windows(11).any(|w| w == b"example.org"));
        assert_eq!(codec.decode(&record).unwrap(), ticket);
    }

    #[test]
    fn decryption_failure_is_a_serialization_error() {
        let record = sealed_codec().encode(&service_ticket()).unwrap();
        let err = sealed_codec().decode(&record).unwrap_err();
        assert!(matches!(err, RegistryError::TicketSerialization { .. }), "got {err:?}");
    }

    #[test]
    fn corrupt_json_is_a_serialization_error() {
        let codec = TicketCodec::new(Arc::new(NoOpCipherExecutor));
        let err = codec.decode(b"{not json").unwrap_err();
        assert!(matches!(err, RegistryError::TicketSerialization { .. }));
    }
}
