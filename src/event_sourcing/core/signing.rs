use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;

use super::event::{serialize_event, EventEnvelope};

// ============================================================================
// Event Signing
// ============================================================================
//
// Every appended envelope is signed with HMAC-SHA256 over its identity,
// payload and audit metadata. Readers holding the same key can detect any
// modification of the stored log.
//
// ============================================================================

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct EventSigner {
    key: Vec<u8>,
}

impl std::fmt::Debug for EventSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSigner").field("key", &"[REDACTED]").finish()
    }
}

impl EventSigner {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self { key: key.into() }
    }

    /// Build a signer from a hex encoded key
    pub fn from_hex(key: &str) -> Result<Self, hex::FromHexError> {
        Ok(Self::new(hex::decode(key)?))
    }

    fn mac_for<E: Serialize>(&self, envelope: &EventEnvelope<E>) -> anyhow::Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| anyhow::anyhow!("invalid signing key: {}", e))?;

        let payload = serialize_event(&envelope.event_data)?;
        // millisecond precision, the resolution a CQL timestamp keeps
        let timestamp = envelope.timestamp.timestamp_millis().to_string();
        let sequence = envelope.sequence_number.to_string();
        let fields: [&[u8]; 8] = [
            envelope.event_id.as_bytes(),
            envelope.aggregate_id.as_bytes(),
            sequence.as_bytes(),
            envelope.event_type.as_bytes(),
            payload.as_bytes(),
            envelope.actor.as_deref().unwrap_or_default().as_bytes(),
            envelope.tenant.as_deref().unwrap_or_default().as_bytes(),
            timestamp.as_bytes(),
        ];

        for field in fields {
            // length prefix keeps field boundaries unambiguous
            mac.update(&(field.len() as u64).to_be_bytes());
            mac.update(field);
        }

        Ok(mac)
    }

    /// Compute and attach the signature
    pub fn sign<E: Serialize>(&self, envelope: &mut EventEnvelope<E>) -> anyhow::Result<()> {
        let mac = self.mac_for(envelope)?;
        envelope.signature = Some(hex::encode(mac.finalize().into_bytes()));
        Ok(())
    }

    /// Check the attached signature, `false` when missing or not matching
    pub fn verify<E: Serialize>(&self, envelope: &EventEnvelope<E>) -> anyhow::Result<bool> {
        let Some(signature) = envelope.signature.as_deref() else {
            return Ok(false);
        };
        let Ok(expected) = hex::decode(signature) else {
            return Ok(false);
        };

        let mac = self.mac_for(envelope)?;
        Ok(mac.verify_slice(&expected).is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn envelope() -> EventEnvelope<serde_json::Value> {
        EventEnvelope::new(
            Uuid::new_v4(),
            1,
            "BallotCreated".to_string(),
            serde_json::json!({"type": "BallotCreated", "data": {"ballot_number": 1}}),
            Uuid::new_v4(),
        )
        .with_actor("operator-1")
    }

    #[test]
    fn test_signed_envelope_verifies() {
        let signer = EventSigner::new(b"secret".to_vec());
        let mut env = envelope();
        signer.sign(&mut env).unwrap();

        assert!(env.signature.is_some());
        assert!(signer.verify(&env).unwrap());
    }

    #[test]
    fn test_tampered_payload_fails_verification() {
        let signer = EventSigner::new(b"secret".to_vec());
        let mut env = envelope();
        signer.sign(&mut env).unwrap();

        env.event_data = serde_json::json!({"type": "BallotCreated", "data": {"ballot_number": 2}});
        assert!(!signer.verify(&env).unwrap());
    }

    #[test]
    fn test_tampered_actor_fails_verification() {
        let signer = EventSigner::new(b"secret".to_vec());
        let mut env = envelope();
        signer.sign(&mut env).unwrap();

        env.actor = Some("someone-else".to_string());
        assert!(!signer.verify(&env).unwrap());
    }

    #[test]
    fn test_signature_survives_millisecond_storage() {
        let signer = EventSigner::new(b"secret".to_vec());
        let mut env = envelope();
        env.timestamp = chrono::DateTime::from_timestamp(1_700_000_000, 123_456_789).unwrap();
        signer.sign(&mut env).unwrap();

        // what a timestamp column hands back
        env.timestamp = chrono::DateTime::from_timestamp_millis(env.timestamp.timestamp_millis()).unwrap();
        assert!(signer.verify(&env).unwrap());

        env.timestamp += chrono::TimeDelta::milliseconds(1);
        assert!(!signer.verify(&env).unwrap());
    }

    #[test]
    fn test_unsigned_envelope_does_not_verify() {
        let signer = EventSigner::new(b"secret".to_vec());
        assert!(!signer.verify(&envelope()).unwrap());
    }

    #[test]
    fn test_other_key_does_not_verify() {
        let mut env = envelope();
        EventSigner::new(b"secret".to_vec()).sign(&mut env).unwrap();

        let other = EventSigner::from_hex("00ff").unwrap();
        assert!(!other.verify(&env).unwrap());
    }
}
