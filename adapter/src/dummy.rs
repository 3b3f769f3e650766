//! The [`Dummy`] implementation of the [`PaymentsGateway`].
//!
//! Keeps customers, payment methods and payment intents in memory.
//! Payment intents succeed unless another outcome was set for the customer
//! with [`Dummy::set_intent_status`].
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use async_trait::async_trait;
use dashmap::DashMap;
use primitives::{Money, Organization, PaymentIntentStatus};
use serde_json::json;

use crate::{
    client::{AttachedPaymentMethod, Customer, NewPaymentIntent, PaymentIntent},
    Error, PaymentsGateway,
};

#[doc(inline)]
pub use self::outcome::Outcomes;

/// Dummy gateway intended for testing and for running without a provider.
#[derive(Debug, Clone, Default)]
pub struct Dummy {
    customers: Arc<DashMap<String, Customer>>,
    /// payment method => customer it is attached to
    attachments: Arc<DashMap<String, String>>,
    intents: Arc<DashMap<String, PaymentIntent>>,
    outcomes: Outcomes,
    sequence: Arc<AtomicU64>,
}

impl Dummy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the status that every payment intent created for `customer`
    /// will be returned with.
    ///
    /// If the status is set to [`None`], it removes the mocked outcome.
    ///
    /// # Panics
    ///
    /// When [`None`] is passed but there was no mocked outcome.
    pub fn set_intent_status<S: Into<Option<PaymentIntentStatus>>>(&self, customer: &str, status: S) {
        match status.into() {
            Some(status) => {
                self.outcomes.0.insert(customer.to_string(), status);
            }
            None => {
                self.outcomes.0.remove(customer).unwrap_or_else(|| {
                    panic!("Couldn't remove an outcome which doesn't exist for {customer:?}")
                });
            }
        }
    }

    pub fn payment_intent(&self, id: &str) -> Option<PaymentIntent> {
        self.intents.get(id).map(|intent| intent.value().clone())
    }

    /// The customer the payment method is attached to, if any.
    pub fn attached_to(&self, payment_method: &str) -> Option<String> {
        self.attachments
            .get(payment_method)
            .map(|customer| customer.value().clone())
    }

    fn next_id(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[async_trait]
impl PaymentsGateway for Dummy {
    async fn create_customer(
        &self,
        organization: &Organization,
        email: Option<&str>,
    ) -> Result<Customer, Error> {
        let id = format!("cus_dummy_{}", organization.id);

        let customer = self
            .customers
            .entry(id.clone())
            .or_insert_with(|| Customer {
                id,
                email: email.map(ToString::to_string),
            })
            .value()
            .clone();

        Ok(customer)
    }

    /// Tokens are expected in the `pm_card_<brand>` form. Tokens that
    /// contain `declined` are refused like an unusable card would be.
    async fn attach_payment_method(
        &self,
        token: &str,
        customer: &str,
    ) -> Result<AttachedPaymentMethod, Error> {
        if !token.starts_with("pm_") || token.contains("declined") {
            return Err(Error::invalid_request(format!(
                "Payment method {token} cannot be attached"
            )));
        }

        if !self.customers.contains_key(customer) {
            return Err(Error::not_found(format!("No such customer: {customer}")));
        }

        let brand = token
            .strip_prefix("pm_card_")
            .filter(|brand| !brand.is_empty())
            .unwrap_or("visa");

        let method = AttachedPaymentMethod {
            id: token.to_string(),
            kind: "card".to_string(),
            card_brand: Some(brand.to_string()),
            card_last4: Some("4242".to_string()),
            card_exp_month: Some(12),
            card_exp_year: Some(2030),
            details: json!({ "customer": customer, "livemode": false }),
        };

        self.attachments
            .insert(method.id.clone(), customer.to_string());

        Ok(method)
    }

    async fn detach_payment_method(&self, payment_method: &str) -> Result<(), Error> {
        self.attachments
            .remove(payment_method)
            .map(|_| ())
            .ok_or_else(|| Error::not_found(format!("No such payment method: {payment_method}")))
    }

    async fn create_payment_intent(
        &self,
        intent: NewPaymentIntent<'_>,
    ) -> Result<PaymentIntent, Error> {
        if intent.amount <= Money::ZERO {
            return Err(Error::invalid_request("Amount must be positive"));
        }

        if !self.customers.contains_key(intent.customer) {
            return Err(Error::not_found(format!(
                "No such customer: {}",
                intent.customer
            )));
        }

        if let Some(payment_method) = intent.payment_method {
            if self.attached_to(payment_method).as_deref() != Some(intent.customer) {
                return Err(Error::invalid_request(format!(
                    "Payment method {payment_method} is not attached to {}",
                    intent.customer
                )));
            }
        }

        let sequence = self.next_id();
        let status = self
            .outcomes
            .0
            .get(intent.customer)
            .map(|status| *status.value())
            .unwrap_or(PaymentIntentStatus::Succeeded);

        let payment_intent = PaymentIntent {
            id: format!("pi_dummy_{sequence}"),
            amount: intent.amount,
            currency: intent.currency.to_ascii_lowercase(),
            status,
            latest_charge: (status == PaymentIntentStatus::Succeeded)
                .then(|| format!("ch_dummy_{sequence}")),
        };

        self.intents
            .insert(payment_intent.id.clone(), payment_intent.clone());

        Ok(payment_intent)
    }
}

mod outcome {
    use dashmap::DashMap;
    use primitives::PaymentIntentStatus;
    use std::sync::Arc;

    /// Mocked payment intent statuses, per customer reference.
    #[derive(Debug, Clone, Default)]
    pub struct Outcomes(pub Arc<DashMap<String, PaymentIntentStatus>>);
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use primitives::{test_util::dummy_organization, OrganizationId, OrganizationKind};

    use super::*;
    use crate::error::Kind;

    fn intent<'a>(customer: &'a str, payment_method: Option<&'a str>) -> NewPaymentIntent<'a> {
        NewPaymentIntent {
            amount: Money::new(100, 0),
            currency: "USD",
            customer,
            payment_method,
            description: None,
        }
    }

    #[tokio::test]
    async fn test_payment_intent_calls() {
        let dummy = Dummy::new();
        let organization = dummy_organization(OrganizationId(7), OrganizationKind::Advertiser);

        let customer = dummy
            .create_customer(&organization, Some("billing@dummy.test"))
            .await
            .expect("Should create customer");
        assert_eq!("cus_dummy_7", customer.id);

        // creating it again returns the same customer
        let again = dummy
            .create_customer(&organization, None)
            .await
            .expect("Should return the customer");
        assert_eq!(customer, again);

        // unknown customers are an error
        {
            let result = dummy.create_payment_intent(intent("cus_unknown", None)).await;
            assert_eq!(Kind::NotFound, result.expect_err("Should fail").kind());
        }

        let method = dummy
            .attach_payment_method("pm_card_mastercard", &customer.id)
            .await
            .expect("Should attach");
        assert_eq!(Some("mastercard".to_string()), method.card_brand);
        assert_eq!(Some(customer.id.clone()), dummy.attached_to(&method.id));

        let succeeded = dummy
            .create_payment_intent(intent(&customer.id, Some(&method.id)))
            .await
            .expect("Should create payment intent");
        assert_eq!(PaymentIntentStatus::Succeeded, succeeded.status);
        assert!(succeeded.latest_charge.is_some());
        assert_eq!(Some(succeeded.clone()), dummy.payment_intent(&succeeded.id));

        dummy.set_intent_status(&customer.id, PaymentIntentStatus::Processing);
        let processing = dummy
            .create_payment_intent(intent(&customer.id, None))
            .await
            .expect("Should create payment intent");
        assert_eq!(PaymentIntentStatus::Processing, processing.status);
        assert_eq!(None, processing.latest_charge);
        assert_ne!(succeeded.id, processing.id);

        dummy.set_intent_status(&customer.id, None);
        dummy
            .detach_payment_method(&method.id)
            .await
            .expect("Should detach");

        let detached = dummy
            .create_payment_intent(intent(&customer.id, Some(&method.id)))
            .await
            .expect_err("Detached methods cannot be charged");
        assert_eq!(Kind::InvalidRequest, detached.kind());
    }

    #[tokio::test]
    async fn declined_tokens_cannot_be_attached() {
        let dummy = Dummy::new();
        let organization = dummy_organization(OrganizationId(8), OrganizationKind::Advertiser);
        let customer = dummy
            .create_customer(&organization, None)
            .await
            .expect("Should create customer");

        let result = dummy
            .attach_payment_method("pm_card_declined", &customer.id)
            .await;
        assert_eq!(Kind::InvalidRequest, result.expect_err("Should refuse").kind());

        let result = dummy.attach_payment_method("tok_visa", &customer.id).await;
        assert!(result.is_err());
    }

    #[test]
    #[should_panic]
    fn test_removing_a_non_mocked_outcome_should_panic() {
        Dummy::new().set_intent_status("cus_dummy_1", None);
    }
}
