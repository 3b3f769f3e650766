use async_trait::async_trait;
use primitives::{Money, Organization, PaymentIntentStatus};
use serde::{Deserialize, Serialize};

use crate::Error;

/// The customer reference at the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub email: Option<String>,
}

/// A payment method once it is attached to a [`Customer`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachedPaymentMethod {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub card_brand: Option<String>,
    pub card_last4: Option<String>,
    pub card_exp_month: Option<i32>,
    pub card_exp_year: Option<i32>,
    /// Opaque provider details, kept for reference.
    pub details: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPaymentIntent<'a> {
    pub amount: Money,
    pub currency: &'a str,
    pub customer: &'a str,
    pub payment_method: Option<&'a str>,
    pub description: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub amount: Money,
    pub currency: String,
    pub status: PaymentIntentStatus,
    pub latest_charge: Option<String>,
}

/// The primitives the ledger needs from a payments provider.
#[async_trait]
pub trait PaymentsGateway: Send + Sync + 'static {
    async fn create_customer(
        &self,
        organization: &Organization,
        email: Option<&str>,
    ) -> Result<Customer, Error>;

    /// Attaches the payment method created client-side with `token`.
    async fn attach_payment_method(
        &self,
        token: &str,
        customer: &str,
    ) -> Result<AttachedPaymentMethod, Error>;

    async fn detach_payment_method(&self, payment_method: &str) -> Result<(), Error>;

    /// Creates and confirms a payment intent. The returned status is the
    /// one the provider reports synchronously; later changes arrive through
    /// webhooks.
    async fn create_payment_intent(
        &self,
        intent: NewPaymentIntent<'_>,
    ) -> Result<PaymentIntent, Error>;
}
