use adapter::{
    dummy::Dummy, AttachedPaymentMethod, Customer, Error, Kind, NewPaymentIntent, PaymentIntent,
    PaymentsGateway,
};
use async_trait::async_trait;

use primitives::{
    test_util::dummy_organization, Money, Organization, OrganizationId, OrganizationKind,
    PaymentIntentStatus, TransactionStatus,
};

/// A provider that is down.
#[derive(Debug, Clone)]
pub struct Unavailable;

#[async_trait]
impl PaymentsGateway for Unavailable {
    async fn create_customer(
        &self,
        _organization: &Organization,
        _email: Option<&str>,
    ) -> Result<Customer, Error> {
        Err(Error::gateway("connection refused"))
    }

    async fn attach_payment_method(
        &self,
        _token: &str,
        _customer: &str,
    ) -> Result<AttachedPaymentMethod, Error> {
        Err(Error::gateway("connection refused"))
    }

    async fn detach_payment_method(&self, _payment_method: &str) -> Result<(), Error> {
        Err(Error::gateway("connection refused"))
    }

    async fn create_payment_intent(
        &self,
        _intent: NewPaymentIntent<'_>,
    ) -> Result<PaymentIntent, Error> {
        Err(Error::gateway("connection refused"))
    }
}

async fn charge<G: PaymentsGateway>(gateway: &G, amount: Money) -> Result<TransactionStatus, Error> {
    let organization = dummy_organization(OrganizationId(1), OrganizationKind::Advertiser);
    let customer = gateway.create_customer(&organization, None).await?;

    let intent = gateway
        .create_payment_intent(NewPaymentIntent {
            amount,
            currency: "USD",
            customer: &customer.id,
            payment_method: None,
            description: Some("Account recharge"),
        })
        .await?;

    Ok(intent.status.into())
}

#[tokio::test]
async fn gateways_are_interchangeable() {
    let completed = charge(&Dummy::new(), Money::new(50, 0))
        .await
        .expect("Should charge with the dummy gateway");
    assert_eq!(TransactionStatus::Completed, completed);

    let dummy = Dummy::new();
    dummy.set_intent_status("cus_dummy_1", PaymentIntentStatus::RequiresAction);
    let pending = charge(&dummy, Money::new(50, 0))
        .await
        .expect("Should charge with the dummy gateway");
    assert_eq!(TransactionStatus::Pending, pending);

    let error = charge(&Unavailable, Money::new(50, 0))
        .await
        .expect_err("Should fail with an unavailable provider");
    assert_eq!(Kind::Gateway, error.kind());
    assert_eq!("Gateway: connection refused", error.to_string());
}
