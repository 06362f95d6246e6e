use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::BillingError;

type HmacSha256 = Hmac<Sha256>;

/// Default maximum age of a signed delivery
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

/// Verifies `Stripe-Signature` headers of the form `t=<unix>,v1=<hex>[,v1=<hex>...]`
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: String,
    tolerance_secs: i64,
}

impl WebhookVerifier {
    pub fn new(secret: String, tolerance_secs: i64) -> Self {
        Self {
            secret,
            tolerance_secs,
        }
    }

    pub fn verify(&self, payload: &[u8], header: Option<&str>) -> Result<(), BillingError> {
        self.verify_at(payload, header, chrono::Utc::now().timestamp())
    }

    /// Verify against an explicit clock
    pub fn verify_at(
        &self,
        payload: &[u8],
        header: Option<&str>,
        now: i64,
    ) -> Result<(), BillingError> {
        if self.secret.is_empty() {
            tracing::error!("Webhook secret is not configured, rejecting delivery");
            return Err(invalid("webhook secret not configured"));
        }

        let header = header.ok_or_else(|| invalid("missing signature header"))?;
        let (timestamp, signatures) = parse_header(header)?;

        if now.abs_diff(timestamp) > self.tolerance_secs.unsigned_abs() {
            tracing::warn!(
                "Webhook timestamp outside tolerance: timestamp={}, now={}",
                timestamp,
                now
            );
            return Err(invalid("timestamp outside tolerance"));
        }

        let expected = compute_signature(&self.secret, timestamp, payload)?;
        let matched = signatures
            .iter()
            .any(|candidate| bool::from(candidate.as_slice().ct_eq(expected.as_slice())));
        if !matched {
            tracing::warn!("Webhook signature mismatch");
            return Err(invalid("signature mismatch"));
        }

        Ok(())
    }
}

fn invalid(reason: &str) -> BillingError {
    BillingError::WebhookSignatureInvalid(reason.to_string())
}

fn parse_header(header: &str) -> Result<(i64, Vec<Vec<u8>>), BillingError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = value.parse::<i64>().ok(),
            // Undecodable entries are skipped like unknown schemes
            "v1" => {
                if let Ok(bytes) = hex::decode(value) {
                    signatures.push(bytes);
                }
            }
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| invalid("missing timestamp"))?;
    if signatures.is_empty() {
        return Err(invalid("missing v1 signature"));
    }
    Ok((timestamp, signatures))
}

fn compute_signature(secret: &str, timestamp: i64, payload: &[u8]) -> Result<Vec<u8>, BillingError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| invalid("invalid webhook secret"))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Build a signature header for `payload`, as the provider would send it
pub fn sign_payload(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    let signature = compute_signature(secret, timestamp, payload)
        .map(hex::encode)
        .unwrap_or_default();
    format!("t={},v1={}", timestamp, signature)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";
    const NOW: i64 = 1_700_000_000;

    fn verifier() -> WebhookVerifier {
        WebhookVerifier::new(SECRET.to_string(), DEFAULT_TOLERANCE_SECS)
    }

    #[test]
    fn test_valid_signature_passes() {
        let payload = br#"{"id":"evt_1"}"#;
        let header = sign_payload(SECRET, NOW, payload);
        assert!(verifier().verify_at(payload, Some(&header), NOW + 10).is_ok());
    }

    #[test]
    fn test_any_matching_v1_passes() {
        let payload = br#"{"id":"evt_1"}"#;
        let good = sign_payload(SECRET, NOW, payload);
        let good_sig = good.split_once("v1=").unwrap().1;
        let header = format!("t={},v1={},v1={}", NOW, "00".repeat(32), good_sig);
        assert!(verifier().verify_at(payload, Some(&header), NOW).is_ok());
    }

    #[test]
    fn test_tampered_payload_fails() {
        let header = sign_payload(SECRET, NOW, br#"{"id":"evt_1"}"#);
        let err = verifier()
            .verify_at(br#"{"id":"evt_2"}"#, Some(&header), NOW)
            .unwrap_err();
        assert!(matches!(err, BillingError::WebhookSignatureInvalid(_)));
    }

    #[test]
    fn test_wrong_secret_fails() {
        let payload = b"{}";
        let header = sign_payload("whsec_other", NOW, payload);
        assert!(verifier().verify_at(payload, Some(&header), NOW).is_err());
    }

    #[test]
    fn test_stale_timestamp_fails() {
        let payload = b"{}";
        let header = sign_payload(SECRET, NOW, payload);
        assert!(verifier()
            .verify_at(payload, Some(&header), NOW + DEFAULT_TOLERANCE_SECS + 1)
            .is_err());
        assert!(verifier()
            .verify_at(payload, Some(&header), NOW + DEFAULT_TOLERANCE_SECS)
            .is_ok());
    }

    #[test]
    fn test_extreme_timestamps_are_outside_tolerance() {
        let v = verifier();
        let oldest = format!("t={},v1=00", i64::MIN);
        let newest = format!("t={},v1=00", i64::MAX);
        assert!(matches!(
            v.verify_at(b"{}", Some(&oldest), NOW),
            Err(BillingError::WebhookSignatureInvalid(_))
        ));
        assert!(v.verify_at(b"{}", Some(&newest), -NOW).is_err());
    }

    #[test]
    fn test_missing_or_malformed_header_fails() {
        let v = verifier();
        assert!(v.verify_at(b"{}", None, NOW).is_err());
        assert!(v.verify_at(b"{}", Some("garbage"), NOW).is_err());
        assert!(v.verify_at(b"{}", Some("t=abc,v1=00"), NOW).is_err());
        assert!(v.verify_at(b"{}", Some(&format!("t={}", NOW)), NOW).is_err());
        assert!(v.verify_at(b"{}", Some(&format!("t={},v1=zz", NOW)), NOW).is_err());
    }

    #[test]
    fn test_unconfigured_secret_rejects_everything() {
        let v = WebhookVerifier::new(String::new(), DEFAULT_TOLERANCE_SECS);
        let header = sign_payload("", NOW, b"{}");
        assert!(v.verify_at(b"{}", Some(&header), NOW).is_err());
    }
}
