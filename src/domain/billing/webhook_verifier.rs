//! Gateway webhook signature verification.
//!
//! HMAC-SHA256 over `"{timestamp}.{raw body}"`, compared in constant time.
//! The signed timestamp must fall inside the configured tolerance so a
//! captured request cannot be replayed later.

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::domain::foundation::Timestamp;

use super::errors::ReconciliationError;
use super::gateway_event::GatewayEvent;

/// Default maximum age of a signed request.
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

/// Allowed clock skew for timestamps from the future.
pub const MAX_CLOCK_SKEW_SECS: i64 = 60;

/// Reasons a request failed verification. None of these reach persistence.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("missing signature header")]
    MissingHeader,

    #[error("malformed signature header: {0}")]
    MalformedHeader(&'static str),

    #[error("signature mismatch")]
    Mismatch,

    #[error("signed timestamp too old")]
    Expired,

    #[error("signed timestamp in the future")]
    FromFuture,

    #[error("signing key rejected")]
    InvalidKey,
}

/// Parsed `t=<unix>,v1=<hex>[,v1=<hex>...]` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    pub timestamp: i64,
    /// Every v1 signature present; the gateway sends several during secret rotation.
    pub v1_signatures: Vec<Vec<u8>>,
}

impl SignatureHeader {
    pub fn parse(header: &str) -> Result<Self, SignatureError> {
        let mut timestamp = None;
        let mut v1_signatures = Vec::new();

        for part in header.split(',') {
            let (key, value) = part
                .trim()
                .split_once('=')
                .ok_or(SignatureError::MalformedHeader("expected key=value pairs"))?;
            match key {
                "t" => {
                    timestamp = Some(
                        value
                            .parse()
                            .map_err(|_| SignatureError::MalformedHeader("invalid timestamp"))?,
                    );
                }
                "v1" => {
                    v1_signatures.push(
                        hex::decode(value)
                            .map_err(|_| SignatureError::MalformedHeader("invalid v1 hex"))?,
                    );
                }
                // v0 and future schemes are ignored
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or(SignatureError::MalformedHeader("missing timestamp"))?;
        if v1_signatures.is_empty() {
            return Err(SignatureError::MalformedHeader("missing v1 signature"));
        }
        Ok(Self {
            timestamp,
            v1_signatures,
        })
    }
}

/// Verifies inbound webhook requests against the shared secret.
///
/// Constructed once at startup from configuration and shared immutably.
pub struct WebhookVerifier {
    secret: SecretString,
    tolerance_secs: i64,
}

impl WebhookVerifier {
    pub fn new(secret: SecretString, tolerance_secs: i64) -> Self {
        Self {
            secret,
            tolerance_secs,
        }
    }

    /// Verifies the raw body against the signature header and parses the event.
    ///
    /// Signature problems yield `InvalidSignature`; a correctly signed body
    /// that is not a gateway event yields `MalformedEvent`.
    pub fn verify(
        &self,
        payload: &[u8],
        signature_header: Option<&str>,
        now: Timestamp,
    ) -> Result<GatewayEvent, ReconciliationError> {
        let header = SignatureHeader::parse(signature_header.ok_or(SignatureError::MissingHeader)?)?;
        self.check_timestamp(header.timestamp, now)?;

        let expected = self.compute(header.timestamp, payload)?;
        let matched = header
            .v1_signatures
            .iter()
            .any(|candidate| constant_time_eq(&expected, candidate));
        if !matched {
            return Err(SignatureError::Mismatch.into());
        }

        serde_json::from_slice(payload)
            .map_err(|e| ReconciliationError::MalformedEvent(format!("event body: {}", e)))
    }

    /// Produces a header for `payload`, as the gateway would.
    ///
    /// Used by fixtures and local tooling that replay captured events.
    pub fn sign(&self, payload: &[u8], timestamp: i64) -> Result<String, SignatureError> {
        let signature = self.compute(timestamp, payload)?;
        Ok(format!("t={},v1={}", timestamp, hex::encode(signature)))
    }

    fn check_timestamp(&self, timestamp: i64, now: Timestamp) -> Result<(), SignatureError> {
        // `t=` is unauthenticated; extreme values must not overflow.
        let age = now.as_unix_secs().saturating_sub(timestamp);
        if age > self.tolerance_secs {
            return Err(SignatureError::Expired);
        }
        if age < -MAX_CLOCK_SKEW_SECS {
            return Err(SignatureError::FromFuture);
        }
        Ok(())
    }

    fn compute(&self, timestamp: i64, payload: &[u8]) -> Result<Vec<u8>, SignatureError> {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.secret.expose_secret().as_bytes())
            .map_err(|_| SignatureError::InvalidKey)?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("secret", &"[REDACTED]")
            .field("tolerance_secs", &self.tolerance_secs)
            .finish()
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret_12345";

    fn verifier() -> WebhookVerifier {
        WebhookVerifier::new(SecretString::new(SECRET.to_string()), DEFAULT_TOLERANCE_SECS)
    }

    fn body() -> Vec<u8> {
        serde_json::json!({
            "id": "evt_1",
            "type": "checkout.session.completed",
            "created": 1_705_276_800,
            "data": { "object": { "id": "cs_1" } },
            "livemode": false
        })
        .to_string()
        .into_bytes()
    }

    // ══════════════════════════════════════════════════════════════
    // Header parsing
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn parses_header_with_multiple_v1_signatures() {
        let header = SignatureHeader::parse(&format!(
            "t=1234567890,v1={},v1={},v0={}",
            "a".repeat(64),
            "b".repeat(64),
            "c".repeat(64)
        ))
        .unwrap();
        assert_eq!(header.timestamp, 1234567890);
        assert_eq!(header.v1_signatures.len(), 2);
    }

    #[test]
    fn header_without_timestamp_is_malformed() {
        assert!(matches!(
            SignatureHeader::parse(&format!("v1={}", "a".repeat(64))),
            Err(SignatureError::MalformedHeader(_))
        ));
    }

    #[test]
    fn header_with_bad_hex_is_malformed() {
        assert!(matches!(
            SignatureHeader::parse("t=1,v1=zz"),
            Err(SignatureError::MalformedHeader(_))
        ));
    }

    // ══════════════════════════════════════════════════════════════
    // Verification
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn valid_signature_yields_event() {
        let now = Timestamp::now();
        let header = verifier().sign(&body(), now.as_unix_secs()).unwrap();

        let event = verifier().verify(&body(), Some(&header), now).unwrap();
        assert_eq!(event.id, "evt_1");
    }

    #[test]
    fn tampered_body_is_rejected() {
        let now = Timestamp::now();
        let header = verifier().sign(&body(), now.as_unix_secs()).unwrap();
        let mut tampered = body();
        tampered.push(b' ');

        let err = verifier().verify(&tampered, Some(&header), now).unwrap_err();
        assert!(matches!(
            err,
            ReconciliationError::InvalidSignature(SignatureError::Mismatch)
        ));
    }

    #[test]
    fn other_secret_is_rejected() {
        let now = Timestamp::now();
        let other = WebhookVerifier::new(SecretString::new("whsec_other".into()), 300);
        let header = other.sign(&body(), now.as_unix_secs()).unwrap();

        assert!(verifier().verify(&body(), Some(&header), now).is_err());
    }

    #[test]
    fn missing_header_is_rejected() {
        assert!(matches!(
            verifier().verify(&body(), None, Timestamp::now()),
            Err(ReconciliationError::InvalidSignature(SignatureError::MissingHeader))
        ));
    }

    #[test]
    fn stale_signature_is_rejected() {
        let now = Timestamp::now();
        let header = verifier()
            .sign(&body(), now.as_unix_secs() - DEFAULT_TOLERANCE_SECS - 1)
            .unwrap();
        assert!(matches!(
            verifier().verify(&body(), Some(&header), now),
            Err(ReconciliationError::InvalidSignature(SignatureError::Expired))
        ));
    }

    #[test]
    fn future_signature_beyond_skew_is_rejected() {
        let now = Timestamp::now();
        let header = verifier()
            .sign(&body(), now.as_unix_secs() + MAX_CLOCK_SKEW_SECS + 5)
            .unwrap();
        assert!(matches!(
            verifier().verify(&body(), Some(&header), now),
            Err(ReconciliationError::InvalidSignature(SignatureError::FromFuture))
        ));
    }

    #[test]
    fn extreme_timestamps_are_rejected_without_overflow() {
        let now = Timestamp::now();
        let signature = "a".repeat(64);

        let oldest = format!("t={},v1={}", i64::MIN, signature);
        assert!(matches!(
            verifier().verify(b"{}", Some(&oldest), now),
            Err(ReconciliationError::InvalidSignature(SignatureError::Expired))
        ));

        let newest = format!("t={},v1={}", i64::MAX, signature);
        assert!(matches!(
            verifier().verify(b"{}", Some(&newest), now),
            Err(ReconciliationError::InvalidSignature(SignatureError::FromFuture))
        ));
    }

    #[test]
    fn signed_garbage_is_malformed_not_unauthorized() {
        let now = Timestamp::now();
        let header = verifier().sign(b"not json", now.as_unix_secs()).unwrap();
        assert!(matches!(
            verifier().verify(b"not json", Some(&header), now),
            Err(ReconciliationError::MalformedEvent(_))
        ));
    }

    #[test]
    fn debug_output_redacts_secret() {
        let rendered = format!("{:?}", verifier());
        assert!(!rendered.contains(SECRET));
    }
}
