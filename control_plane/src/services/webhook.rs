//! Deliveries of the payments provider.
//!
//! Every event is stored by its external id before it is applied, so a
//! redelivery of a processed or ignored event is acknowledged without side
//! effects. Failed events keep their error and are applied again when the
//! provider redelivers them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use slog::{error, info};

use adapter::{
    webhook::{construct_event, WebhookEnvelope},
    PaymentsGateway,
};
use primitives::billing::{WebhookKind, WebhookOutcome};

use crate::{error::Error, services::ledger::Ledger, Application};

/// Acknowledgement returned to the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookReceipt {
    pub received: bool,
    /// `processed`, `ignored` or `duplicate`
    pub status: String,
}

impl WebhookReceipt {
    fn duplicate() -> Self {
        Self {
            received: true,
            status: "duplicate".into(),
        }
    }
}

/// Verifies the signature header against the webhook secret. Unsigned
/// deliveries are only accepted outside production when no secret is set.
fn verify<G: PaymentsGateway>(
    app: &Application<G>,
    payload: &[u8],
    signature: Option<&str>,
    now: DateTime<Utc>,
) -> Result<WebhookEnvelope, Error> {
    let secret = &app.config.payments_webhook_secret;

    if secret.is_empty() {
        if app.config.env.is_production() {
            return Err(Error::Internal("Webhook secret is not configured".into()));
        }

        return serde_json::from_slice(payload)
            .map_err(|err| Error::InvalidInput(format!("Invalid webhook payload: {err}")));
    }

    let signature =
        signature.ok_or_else(|| Error::InvalidInput("Missing webhook signature".into()))?;

    construct_event(payload, signature, secret, now)
        .map_err(|err| Error::InvalidInput(format!("Invalid webhook: {err}")))
}

async fn apply<G: PaymentsGateway>(
    ledger: &Ledger<G>,
    envelope: &WebhookEnvelope,
    now: DateTime<Utc>,
) -> Result<WebhookOutcome, Error> {
    match envelope.kind() {
        Some(WebhookKind::PaymentIntentSucceeded) => {
            let intent = envelope.payment_intent()?;
            ledger
                .settle_payment_intent(&intent.id, intent.latest_charge, now)
                .await
        }
        Some(WebhookKind::PaymentIntentFailed) => {
            let intent = envelope.payment_intent()?;
            ledger
                .fail_payment_intent(&intent.id, intent.failure_reason(), now)
                .await
        }
        Some(WebhookKind::InvoicePaymentSucceeded) => {
            ledger.record_invoice_payment(&envelope.invoice()?, now).await
        }
        None => Ok(WebhookOutcome::Ignored),
    }
}

/// Handles one delivery of `POST /public/webhooks/payments`.
///
/// A failed application is stored and returned as an internal error so that
/// the provider delivers the event again.
pub async fn handle<G: PaymentsGateway>(
    app: &Application<G>,
    payload: &[u8],
    signature: Option<&str>,
    now: DateTime<Utc>,
) -> Result<WebhookReceipt, Error> {
    let envelope = verify(app, payload, signature, now)?;
    let body: Value = serde_json::from_slice(payload)
        .map_err(|err| Error::InvalidInput(format!("Invalid webhook payload: {err}")))?;

    let mut event = match app.store.webhook_event(&envelope.id).await? {
        Some(event) if !event.needs_processing() => return Ok(WebhookReceipt::duplicate()),
        Some(event) => event,
        None => match app
            .store
            .insert_webhook_event(&envelope.id, &envelope.event_type, body, now)
            .await
        {
            Ok(event) => event,
            Err(Error::Conflict(_)) => return Ok(WebhookReceipt::duplicate()),
            Err(err) => return Err(err),
        },
    };

    let outcome = apply(&app.ledger, &envelope, now)
        .await
        .unwrap_or_else(|err| WebhookOutcome::Failed(err.to_string()));
    event.record_outcome(&outcome, now);
    app.store.save_webhook_event(&event).await?;

    match outcome {
        WebhookOutcome::Failed(message) => {
            error!(&app.logger, "Webhook event failed"; "event" => &envelope.id, "type" => &envelope.event_type, "retry_count" => event.retry_count, "error" => &message);

            Err(Error::Internal(message))
        }
        _ => {
            info!(&app.logger, "Webhook event handled"; "event" => &envelope.id, "type" => &envelope.event_type, "status" => %event.status);

            Ok(WebhookReceipt {
                received: true,
                status: event.status.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use adapter::webhook::signature_header;
    use primitives::{
        api::Pagination,
        billing::{AddPaymentMethod, Recharge},
        test_util::{dummy_organization, DUMMY_CREATED_AT},
        Money, OrganizationId, OrganizationKind, PaymentIntentStatus, TransactionStatus,
        WebhookEventStatus,
    };

    use crate::{
        store::{LedgerStore, TransactionFilter},
        test_util::{setup_dummy_app, ApplicationGuard, DUMMY_WEBHOOK_SECRET},
    };

    use super::*;

    const ORGANIZATION: OrganizationId = OrganizationId(5);

    fn event(id: &str, event_type: &str, object: Value) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "id": id,
            "type": event_type,
            "created": DUMMY_CREATED_AT.timestamp(),
            "data": { "object": object },
        }))
        .expect("Should serialize")
    }

    fn signed(payload: &[u8]) -> String {
        signature_header(payload, DUMMY_WEBHOOK_SECRET, *DUMMY_CREATED_AT).expect("Should sign")
    }

    /// A pending 20.00 recharge of organization 5, returning its payment
    /// intent.
    async fn pending_recharge(app: &ApplicationGuard) -> String {
        let now = *DUMMY_CREATED_AT;
        app.store
            .insert_organization(dummy_organization(ORGANIZATION, OrganizationKind::Advertiser))
            .expect("Should insert");
        app.ledger
            .add_payment_method(
                ORGANIZATION,
                AddPaymentMethod {
                    payment_method_id: "pm_card_visa".into(),
                    set_as_default: true,
                    nickname: None,
                },
                now,
            )
            .await
            .expect("Should add");
        app.gateway
            .set_intent_status("cus_dummy_5", PaymentIntentStatus::Processing);

        app.ledger
            .recharge(
                ORGANIZATION,
                Recharge {
                    amount: Money::from_str("20").expect("Valid amount"),
                    payment_method_id: None,
                    currency: None,
                    description: None,
                },
                now,
            )
            .await
            .expect("Should recharge")
            .payment_intent_ref
            .expect("Should have an intent")
    }

    #[tokio::test]
    async fn redelivered_events_are_applied_once() {
        let app = setup_dummy_app().await;
        let now = *DUMMY_CREATED_AT;
        let intent = pending_recharge(&app).await;

        let payload = event(
            "evt_1",
            "payment_intent.succeeded",
            json!({ "id": intent, "status": "succeeded", "latest_charge": "ch_1" }),
        );

        let first = handle(&app.app, &payload, Some(&signed(&payload)), now)
            .await
            .expect("Should handle");
        assert_eq!("processed", first.status);

        let transactions = app
            .ledger
            .transactions(ORGANIZATION, &TransactionFilter::default(), Pagination::default())
            .await
            .expect("Should list");
        assert_eq!(TransactionStatus::Completed, transactions[0].status);
        let balance_after = transactions[0].balance_after;
        assert_eq!(Money::from_str("20").expect("Valid amount"), balance_after);

        let second = handle(&app.app, &payload, Some(&signed(&payload)), now)
            .await
            .expect("Should handle");
        assert_eq!(WebhookReceipt::duplicate(), second);

        let stored = app
            .store
            .webhook_event("evt_1")
            .await
            .expect("Should load")
            .expect("Should exist");
        assert_eq!(WebhookEventStatus::Processed, stored.status);
        assert_eq!(Some(ORGANIZATION), stored.organization_id);

        let account = app.ledger.account(ORGANIZATION, now).await.expect("Should load");
        assert_eq!(balance_after, account.balance);
    }

    #[tokio::test]
    async fn failed_payments_leave_the_balance_alone() {
        let app = setup_dummy_app().await;
        let now = *DUMMY_CREATED_AT;
        let intent = pending_recharge(&app).await;

        let payload = event(
            "evt_2",
            "payment_intent.payment_failed",
            json!({
                "id": intent,
                "status": "requires_payment_method",
                "last_payment_error": { "code": "card_declined", "message": "Your card was declined." },
            }),
        );
        handle(&app.app, &payload, Some(&signed(&payload)), now)
            .await
            .expect("Should handle");

        let failed = app
            .store
            .transaction_by_payment_intent(&intent)
            .await
            .expect("Should load")
            .expect("Should exist");
        assert_eq!(TransactionStatus::Failed, failed.status);
        assert_eq!(
            Some("Your card was declined."),
            failed.metadata["failure_reason"].as_str()
        );
        let account = app.ledger.account(ORGANIZATION, now).await.expect("Should load");
        assert_eq!(Money::ZERO, account.balance);
    }

    #[tokio::test]
    async fn unknown_intents_are_kept_for_redelivery() {
        let app = setup_dummy_app().await;
        let now = *DUMMY_CREATED_AT;

        let payload = event(
            "evt_3",
            "payment_intent.succeeded",
            json!({ "id": "pi_unknown", "status": "succeeded" }),
        );
        for attempt in 1..=2 {
            let error = handle(&app.app, &payload, Some(&signed(&payload)), now)
                .await
                .expect_err("Should fail");
            assert_eq!("internal", error.kind());

            let stored = app
                .store
                .webhook_event("evt_3")
                .await
                .expect("Should load")
                .expect("Should exist");
            assert_eq!(WebhookEventStatus::Failed, stored.status);
            assert_eq!(attempt, stored.retry_count);
        }
    }

    #[tokio::test]
    async fn signatures_are_required_and_other_types_ignored() {
        let app = setup_dummy_app().await;
        let now = *DUMMY_CREATED_AT;

        let payload = event("evt_4", "customer.created", json!({ "id": "cus_1" }));

        let missing = handle(&app.app, &payload, None, now)
            .await
            .expect_err("Should need a signature");
        assert_eq!(
            Error::InvalidInput("Missing webhook signature".into()),
            missing
        );

        let forged = signature_header(&payload, "whsec_other", now).expect("Should sign");
        let error = handle(&app.app, &payload, Some(&forged), now)
            .await
            .expect_err("Should refuse the signature");
        assert_eq!("invalid_input", error.kind());
        assert!(app
            .store
            .webhook_event("evt_4")
            .await
            .expect("Should load")
            .is_none());

        let ignored = handle(&app.app, &payload, Some(&signed(&payload)), now)
            .await
            .expect("Should handle");
        assert_eq!("ignored", ignored.status);
    }
}
