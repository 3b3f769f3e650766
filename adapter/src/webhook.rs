//! Payments provider webhook deliveries.
//!
//! Every delivery carries a signature header of the form
//! `t=<unix seconds>,v1=<hex hmac>[,v1=...]`. The HMAC-SHA256 is computed
//! with the shared webhook secret over `"<t>.<raw body>"`. A delivery is
//! accepted if any `v1` entry matches and `t` is within
//! [`SIGNATURE_TOLERANCE_SECS`] of the current time.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use primitives::{billing::WebhookKind, Money, PaymentIntentStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use thiserror::Error;

use crate::Error;

type HmacSha256 = Hmac<Sha256>;

/// Name of the header that carries the signature.
pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

/// Maximum age (and clock skew) of an accepted signature: 5 minutes.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Missing timestamp in signature header")]
    MissingTimestamp,
    #[error("No v1 signature in signature header")]
    MissingSignature,
    #[error("Signature timestamp is outside of the tolerance")]
    TimestampOutOfTolerance,
    #[error("No signature matches the payload")]
    Mismatch,
}

/// The envelope of every provider event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEnvelope {
    /// The external event id, used to deduplicate deliveries.
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub created: Option<i64>,
    pub data: WebhookData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookData {
    pub object: Value,
}

impl WebhookEnvelope {
    /// `None` for event types the ledger does not react to.
    pub fn kind(&self) -> Option<WebhookKind> {
        self.event_type.parse().ok()
    }

    pub fn payment_intent(&self) -> Result<PaymentIntentObject, Error> {
        serde_json::from_value(self.data.object.clone()).map_err(Error::webhook)
    }

    pub fn invoice(&self) -> Result<InvoiceObject, Error> {
        serde_json::from_value(self.data.object.clone()).map_err(Error::webhook)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PaymentIntentObject {
    pub id: String,
    #[serde(default)]
    pub status: Option<PaymentIntentStatus>,
    #[serde(default)]
    pub latest_charge: Option<String>,
    #[serde(default)]
    pub last_payment_error: Option<PaymentError>,
}

impl PaymentIntentObject {
    /// The reason recorded on a failed transaction.
    pub fn failure_reason(&self) -> String {
        self.last_payment_error
            .as_ref()
            .and_then(|error| error.message.clone().or_else(|| error.code.clone()))
            .unwrap_or_else(|| "Payment failed".to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PaymentError {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InvoiceObject {
    pub id: String,
    pub customer: String,
    /// In the minor unit of `currency`.
    pub amount_paid: i64,
    pub currency: String,
    #[serde(default)]
    pub number: Option<String>,
}

impl InvoiceObject {
    pub fn amount(&self) -> Money {
        Money::new(self.amount_paid, 2)
    }
}

/// Computes the `v1` signature of `payload` signed at `timestamp`.
pub fn sign(payload: &[u8], secret: &str, timestamp: i64) -> Result<String, Error> {
    let mac = signed_mac(payload, secret, timestamp)?;

    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Builds the full signature header for `payload`, as the provider would.
pub fn signature_header(payload: &[u8], secret: &str, at: DateTime<Utc>) -> Result<String, Error> {
    let timestamp = at.timestamp();

    Ok(format!("t={},v1={}", timestamp, sign(payload, secret, timestamp)?))
}

pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    now: DateTime<Utc>,
) -> Result<(), Error> {
    let mut timestamp = None;
    let mut signatures = vec![];

    for (key, value) in header.split(',').filter_map(|part| part.trim().split_once('=')) {
        match key {
            "t" => timestamp = value.parse::<i64>().ok(),
            "v1" => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| Error::webhook(SignatureError::MissingTimestamp))?;
    if signatures.is_empty() {
        return Err(Error::webhook(SignatureError::MissingSignature));
    }

    let age = now.timestamp() - timestamp;
    if age.abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(Error::webhook(SignatureError::TimestampOutOfTolerance));
    }

    let matches = signatures.into_iter().any(|signature| {
        match (hex::decode(signature), signed_mac(payload, secret, timestamp)) {
            (Ok(expected), Ok(mac)) => mac.verify_slice(&expected).is_ok(),
            _ => false,
        }
    });

    if matches {
        Ok(())
    } else {
        Err(Error::webhook(SignatureError::Mismatch))
    }
}

/// Verifies the signature and parses the envelope of a delivery.
pub fn construct_event(
    payload: &[u8],
    header: &str,
    secret: &str,
    now: DateTime<Utc>,
) -> Result<WebhookEnvelope, Error> {
    verify_signature(payload, header, secret, now)?;

    serde_json::from_slice(payload).map_err(Error::webhook)
}

fn signed_mac(payload: &[u8], secret: &str, timestamp: i64) -> Result<HmacSha256, Error> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(Error::webhook)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);

    Ok(mac)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::Kind;
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const SECRET: &str = "whsec_test";

    fn payload() -> Vec<u8> {
        serde_json::to_vec(&json!({
            "id": "evt_1",
            "type": "payment_intent.payment_failed",
            "data": {
                "object": {
                    "id": "pi_1",
                    "status": "requires_payment_method",
                    "last_payment_error": { "code": "card_declined", "message": "Your card was declined." }
                }
            }
        }))
        .expect("Should serialize")
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn accepts_a_valid_signature() {
        let payload = payload();
        let header = signature_header(&payload, SECRET, now()).expect("Should sign");

        let event = construct_event(&payload, &header, SECRET, now() + Duration::seconds(299))
            .expect("Should accept the delivery");

        assert_eq!("evt_1", event.id);
        assert_eq!(Some(WebhookKind::PaymentIntentFailed), event.kind());

        let intent = event.payment_intent().expect("Should parse the payment intent");
        assert_eq!("pi_1", intent.id);
        assert_eq!(
            Some(PaymentIntentStatus::RequiresPaymentMethod),
            intent.status
        );
        assert_eq!("Your card was declined.", intent.failure_reason());
    }

    #[test]
    fn any_v1_entry_may_match() {
        let payload = payload();
        let timestamp = now().timestamp();
        let valid = sign(&payload, SECRET, timestamp).expect("Should sign");
        let header = format!("t={},v1={},v1={}", timestamp, "00".repeat(32), valid);

        assert!(verify_signature(&payload, &header, SECRET, now()).is_ok());
    }

    #[test]
    fn rejects_tampered_and_stale_deliveries() {
        let payload = payload();
        let header = signature_header(&payload, SECRET, now()).expect("Should sign");

        let wrong_secret = verify_signature(&payload, &header, "whsec_other", now())
            .expect_err("Should reject another secret");
        assert_eq!(Kind::Webhook, wrong_secret.kind());

        let mut tampered = payload.clone();
        tampered.push(b' ');
        assert!(verify_signature(&tampered, &header, SECRET, now()).is_err());

        let stale = verify_signature(&payload, &header, SECRET, now() + Duration::seconds(301))
            .expect_err("Should reject a stale signature");
        assert!(stale.to_string().contains("tolerance"));

        assert!(verify_signature(&payload, "v1=abcd", SECRET, now()).is_err());
        assert!(verify_signature(&payload, "t=1", SECRET, now()).is_err());
    }

    #[test]
    fn invoice_amount_is_in_minor_units() {
        let envelope: WebhookEnvelope = serde_json::from_value(json!({
            "id": "evt_2",
            "type": "invoice.payment_succeeded",
            "data": {
                "object": { "id": "in_1", "customer": "cus_1", "amount_paid": 12345, "currency": "usd" }
            }
        }))
        .expect("Should deserialize");

        let invoice = envelope.invoice().expect("Should parse the invoice");
        assert_eq!(Money::new(12345, 2), invoice.amount());
        assert_eq!(Some(WebhookKind::InvoicePaymentSucceeded), envelope.kind());
    }

    #[test]
    fn unknown_event_types_have_no_kind() {
        let envelope: WebhookEnvelope = serde_json::from_value(json!({
            "id": "evt_3",
            "type": "customer.created",
            "data": { "object": {} }
        }))
        .expect("Should deserialize");

        assert_eq!(None, envelope.kind());
    }
}
