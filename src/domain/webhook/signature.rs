//! Webhook signature verification.
//!
//! The provider signs `"{t}.{raw body}"` with HMAC-SHA256 keyed by the
//! endpoint secret and sends `t=<unix>,v1=<hex>[,v0=<hex>]`. Verification
//! runs before anything else touches the payload.

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::provider_event::ProviderEvent;
use crate::domain::billing::BillingError;

/// Maximum age of a signed delivery.
const MAX_EVENT_AGE_SECS: i64 = 300;

/// Tolerated clock skew for deliveries stamped in the future.
const MAX_CLOCK_SKEW_SECS: i64 = 60;

/// Parsed signature header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    pub timestamp: i64,
    /// All `v1` signatures; the provider sends several while rolling secrets.
    pub v1_signatures: Vec<Vec<u8>>,
}

impl SignatureHeader {
    pub fn parse(header: &str) -> Result<Self, BillingError> {
        let mut timestamp: Option<i64> = None;
        let mut v1_signatures = Vec::new();

        for part in header.split(',') {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| invalid("malformed signature header"))?;

            match key.trim() {
                "t" => {
                    timestamp = Some(
                        value
                            .trim()
                            .parse()
                            .map_err(|_| invalid("invalid signature timestamp"))?,
                    );
                }
                "v1" => {
                    let bytes = hex_decode(value.trim())
                        .ok_or_else(|| invalid("signature is not valid hex"))?;
                    v1_signatures.push(bytes);
                }
                // v0 and unknown schemes are ignored
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or_else(|| invalid("missing signature timestamp"))?;
        if v1_signatures.is_empty() {
            return Err(invalid("missing v1 signature"));
        }

        Ok(Self {
            timestamp,
            v1_signatures,
        })
    }
}

/// Verifies signed webhook deliveries and parses the envelope.
pub struct WebhookVerifier {
    secret: SecretString,
    require_livemode: bool,
}

impl WebhookVerifier {
    pub fn new(secret: SecretString) -> Self {
        Self {
            secret,
            require_livemode: false,
        }
    }

    /// Rejects test-mode events.
    pub fn require_livemode(mut self, required: bool) -> Self {
        self.require_livemode = required;
        self
    }

    /// Verifies against the current wall clock.
    pub fn verify(
        &self,
        payload: &[u8],
        signature_header: Option<&str>,
    ) -> Result<ProviderEvent, BillingError> {
        self.verify_at(payload, signature_header, chrono::Utc::now().timestamp())
    }

    /// Verifies the signature as of `now` (unix seconds) and parses the event.
    ///
    /// # Errors
    ///
    /// - `MissingSignature` if no header was sent
    /// - `InvalidSignature` for a bad header, digest mismatch, stale or
    ///   future timestamp, or a test-mode event when live mode is required
    /// - `MalformedEvent` if the verified body is not an event envelope
    pub fn verify_at(
        &self,
        payload: &[u8],
        signature_header: Option<&str>,
        now: i64,
    ) -> Result<ProviderEvent, BillingError> {
        let header = match signature_header.map(str::trim) {
            Some(h) if !h.is_empty() => SignatureHeader::parse(h)?,
            _ => return Err(BillingError::MissingSignature),
        };

        let age = now - header.timestamp;
        if age > MAX_EVENT_AGE_SECS {
            return Err(invalid("signature timestamp too old"));
        }
        if age < -MAX_CLOCK_SKEW_SECS {
            return Err(invalid("signature timestamp in the future"));
        }

        let expected = self.compute_signature(header.timestamp, payload)?;
        let matched = header
            .v1_signatures
            .iter()
            .any(|candidate| constant_time_eq(&expected, candidate));
        if !matched {
            return Err(invalid("signature mismatch"));
        }

        let event: ProviderEvent = serde_json::from_slice(payload)
            .map_err(|e| BillingError::MalformedEvent(format!("event envelope: {}", e)))?;

        if self.require_livemode && !event.livemode {
            return Err(invalid("test-mode event rejected"));
        }

        Ok(event)
    }

    fn compute_signature(&self, timestamp: i64, payload: &[u8]) -> Result<Vec<u8>, BillingError> {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.secret.expose_secret().as_bytes())
            .map_err(|_| invalid("unusable webhook secret"))?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

/// Builds a valid signature header for `payload`. Used by local tooling and
/// tests to produce deliveries the verifier accepts.
pub fn sign_payload(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    let digest = match Hmac::<Sha256>::new_from_slice(secret.as_bytes()) {
        Ok(mut mac) => {
            mac.update(timestamp.to_string().as_bytes());
            mac.update(b".");
            mac.update(payload);
            mac.finalize().into_bytes().to_vec()
        }
        Err(_) => Vec::new(),
    };
    format!("t={},v1={}", timestamp, hex_encode(&digest))
}

fn invalid(reason: &str) -> BillingError {
    BillingError::InvalidSignature(reason.to_string())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}

fn hex_decode(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| hex.get(i..i + 2).and_then(|pair| u8::from_str_radix(pair, 16).ok()))
        .collect()
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
