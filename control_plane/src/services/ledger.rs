//! The billing ledger.
//!
//! Every balance movement is a [`Transaction`] recorded through
//! [`LedgerStore::record_transaction`](crate::store::LedgerStore::record_transaction)
//! or settled through
//! [`LedgerStore::settle_transaction`](crate::store::LedgerStore::settle_transaction),
//! both of which hold the account lock, so a completed transaction always
//! satisfies `balance_after = balance_before + amount` and the latest one
//! matches the account balance.
//!
//! Recharges create a payment intent at the [`PaymentsGateway`]. The balance
//! only moves once the provider reports success, either synchronously or
//! through the `payment_intent.succeeded` webhook.

use std::{future::Future, sync::Arc, time::Duration};

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use slog::{error, info, warn, Logger};

use adapter::{webhook::InvoiceObject, NewPaymentIntent, PaymentsGateway};
use primitives::{
    api::{Pagination, MAX_LIMIT},
    billing::{
        monthly_spend, AddPaymentMethod, NewPaymentMethod, NewTransaction, Recharge,
        SetCreditLimit, UpdateBillingConfig, WebhookOutcome,
    },
    money::normalize_currency,
    BillingAccount, BillingAccountId, Money, OrganizationId, PaymentMethod, PaymentMethodId,
    Transaction, TransactionKind, TransactionStatus,
};

use crate::{cipher::Cipher, error::Error, store::Store, store::TransactionFilter};

/// Transactions shown on the dashboard.
const RECENT_TRANSACTIONS: u64 = 10;

/// `GET /billing/dashboard`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingDashboard {
    pub account: BillingAccount,
    pub payment_methods: Vec<PaymentMethod>,
    pub recent_transactions: Vec<Transaction>,
    /// Spend of the current calendar month.
    pub monthly_spend: Money,
}

pub struct Ledger<G: PaymentsGateway> {
    store: Arc<dyn Store>,
    gateway: Arc<G>,
    cipher: Option<Cipher>,
    logger: Logger,
    gateway_timeout: Duration,
}

impl<G: PaymentsGateway> Clone for Ledger<G> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            gateway: self.gateway.clone(),
            cipher: self.cipher.clone(),
            logger: self.logger.clone(),
            gateway_timeout: self.gateway_timeout,
        }
    }
}

fn gateway_timed_out() -> Error {
    Error::Upstream("Payments gateway timed out".into())
}

fn is_auto_recharge(transaction: &Transaction) -> bool {
    transaction
        .metadata
        .get("auto_recharge")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

impl<G: PaymentsGateway> Ledger<G> {
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<G>,
        cipher: Option<Cipher>,
        logger: Logger,
        gateway_timeout: Duration,
    ) -> Self {
        Self {
            store,
            gateway,
            cipher,
            logger,
            gateway_timeout,
        }
    }

    /// Runs a gateway call under the gateway deadline.
    async fn call<T>(
        &self,
        call: impl Future<Output = Result<T, adapter::Error>>,
    ) -> Result<T, Error> {
        match tokio::time::timeout(self.gateway_timeout, call).await {
            Ok(result) => Ok(result?),
            Err(_elapsed) => Err(gateway_timed_out()),
        }
    }

    /// The account of the organization, created with its payments customer
    /// on first use.
    pub async fn account(
        &self,
        organization: OrganizationId,
        now: DateTime<Utc>,
    ) -> Result<BillingAccount, Error> {
        if let Some(account) = self.store.billing_account(organization).await? {
            return Ok(account);
        }

        let org = self
            .store
            .organization(organization)
            .await?
            .ok_or_else(|| Error::not_found("Organization"))?;
        let customer = self.call(self.gateway.create_customer(&org, None)).await?;

        let account = self
            .store
            .create_billing_account(BillingAccount::new(
                BillingAccountId(0),
                organization,
                Some(customer.id),
                customer.email,
                now,
            ))
            .await?;
        info!(&self.logger, "Created billing account"; "organization" => %organization, "billing_account" => %account.id);

        Ok(account)
    }

    pub async fn dashboard(
        &self,
        organization: OrganizationId,
        now: DateTime<Utc>,
    ) -> Result<BillingDashboard, Error> {
        let account = self.account(organization, now).await?;
        let payment_methods = self.store.payment_methods(organization).await?;
        let recent_transactions = self
            .store
            .transactions(
                organization,
                &TransactionFilter::default(),
                Pagination {
                    page: Some(1),
                    limit: Some(RECENT_TRANSACTIONS),
                },
            )
            .await?;

        // newest first, so paging stops at the first one before this month
        let completed = TransactionFilter {
            kind: None,
            status: Some(TransactionStatus::Completed),
        };
        let mut this_month = vec![];
        let mut page = 1;
        loop {
            let batch = self
                .store
                .transactions(
                    organization,
                    &completed,
                    Pagination {
                        page: Some(page),
                        limit: Some(MAX_LIMIT),
                    },
                )
                .await?;
            let exhausted = (batch.len() as u64) < MAX_LIMIT;
            let reached_older = batch.last().map_or(true, |tx| {
                (tx.processed_at.year(), tx.processed_at.month()) < (now.year(), now.month())
            });
            this_month.extend(batch);

            if exhausted || reached_older {
                break;
            }
            page += 1;
        }

        Ok(BillingDashboard {
            account,
            payment_methods,
            recent_transactions,
            monthly_spend: monthly_spend(&this_month, now),
        })
    }

    pub async fn update_config(
        &self,
        organization: OrganizationId,
        update: UpdateBillingConfig,
        now: DateTime<Utc>,
    ) -> Result<BillingAccount, Error> {
        self.account(organization, now).await?;

        self.store
            .update_billing_account(
                organization,
                Box::new(move |account| Ok(update.apply(account, now)?)),
            )
            .await
    }

    /// Only reachable by admins, tenants cannot grant themselves credit.
    pub async fn set_credit_limit(
        &self,
        organization: OrganizationId,
        body: SetCreditLimit,
        now: DateTime<Utc>,
    ) -> Result<BillingAccount, Error> {
        self.account(organization, now).await?;

        self.store
            .update_billing_account(
                organization,
                Box::new(move |account| Ok(body.apply(account, now)?)),
            )
            .await
    }

    pub async fn payment_methods(
        &self,
        organization: OrganizationId,
    ) -> Result<Vec<PaymentMethod>, Error> {
        self.store.payment_methods(organization).await
    }

    async fn owned_method(
        &self,
        organization: OrganizationId,
        id: PaymentMethodId,
    ) -> Result<PaymentMethod, Error> {
        self.store
            .payment_method(id)
            .await?
            .filter(|method| method.organization_id == organization && method.is_active)
            .ok_or_else(|| Error::not_found("Payment method"))
    }

    /// Attaches the client-side created payment method to the customer of
    /// the account. The first method becomes the default.
    pub async fn add_payment_method(
        &self,
        organization: OrganizationId,
        body: AddPaymentMethod,
        now: DateTime<Utc>,
    ) -> Result<PaymentMethod, Error> {
        let account = self.account(organization, now).await?;
        let customer = account.customer_ref.as_deref().ok_or_else(|| {
            Error::PreconditionFailed("Billing account has no payments customer".into())
        })?;

        let attached = self
            .call(
                self.gateway
                    .attach_payment_method(&body.payment_method_id, customer),
            )
            .await?;

        let details = serde_json::to_string(&attached.details)
            .map_err(|error| Error::Internal(format!("Payment method details: {error}")))?;
        let provider_details = match &self.cipher {
            Some(cipher) => cipher.encrypt(&details)?,
            None => details,
        };

        self.store
            .add_payment_method(
                organization,
                NewPaymentMethod {
                    provider_ref: attached.id,
                    kind: attached.kind,
                    card_brand: attached.card_brand,
                    card_last4: attached.card_last4,
                    card_exp_month: attached.card_exp_month,
                    card_exp_year: attached.card_exp_year,
                    nickname: body.nickname,
                    is_default: body.set_as_default || account.default_payment_method_id.is_none(),
                    provider_details: Some(provider_details),
                },
                now,
            )
            .await
    }

    /// Detaches the method at the provider and deactivates it. A method the
    /// provider no longer knows is still deactivated.
    pub async fn remove_payment_method(
        &self,
        organization: OrganizationId,
        id: PaymentMethodId,
        now: DateTime<Utc>,
    ) -> Result<PaymentMethod, Error> {
        let method = self.owned_method(organization, id).await?;

        match tokio::time::timeout(
            self.gateway_timeout,
            self.gateway.detach_payment_method(&method.provider_ref),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(error)) if error.kind() == adapter::Kind::NotFound => {
                warn!(&self.logger, "Payment method was already detached"; "payment_method" => %id, "error" => %error);
            }
            Ok(Err(error)) => return Err(error.into()),
            Err(_elapsed) => return Err(gateway_timed_out()),
        }

        self.store.remove_payment_method(id, now).await
    }

    pub async fn set_default_payment_method(
        &self,
        organization: OrganizationId,
        id: PaymentMethodId,
        now: DateTime<Utc>,
    ) -> Result<PaymentMethod, Error> {
        self.owned_method(organization, id).await?;

        self.store.set_default_payment_method(id, now).await
    }

    /// Charges the explicit payment method, or the default one of the
    /// account.
    pub async fn recharge(
        &self,
        organization: OrganizationId,
        body: Recharge,
        now: DateTime<Utc>,
    ) -> Result<Transaction, Error> {
        if body.amount <= Money::ZERO {
            return Err(Error::InvalidInput("Recharge amount must be positive".into()));
        }

        let account = self.account(organization, now).await?;
        if let Some(currency) = &body.currency {
            let currency = normalize_currency(currency);
            if currency != account.currency {
                return Err(Error::InvalidInput(format!(
                    "Currency {currency} does not match the account currency {}",
                    account.currency
                )));
            }
        }

        let method = match (body.payment_method_id, account.default_payment_method_id) {
            (Some(id), _) | (None, Some(id)) => self.owned_method(organization, id).await?,
            (None, None) => {
                return Err(Error::PreconditionFailed(
                    "No payment method available".into(),
                ))
            }
        };

        self.charge(&account, &method, body.amount, body.description, false, now)
            .await
    }

    async fn charge(
        &self,
        account: &BillingAccount,
        method: &PaymentMethod,
        amount: Money,
        description: Option<String>,
        auto: bool,
        now: DateTime<Utc>,
    ) -> Result<Transaction, Error> {
        let customer = account.customer_ref.as_deref().ok_or_else(|| {
            Error::PreconditionFailed("Billing account has no payments customer".into())
        })?;
        let description = description.unwrap_or_else(|| {
            if auto {
                "Automatic recharge".to_string()
            } else {
                "Account recharge".to_string()
            }
        });

        let intent = self
            .call(self.gateway.create_payment_intent(NewPaymentIntent {
                amount,
                currency: &account.currency,
                customer,
                payment_method: Some(&method.provider_ref),
                description: Some(&description),
            }))
            .await?;

        let mut new = NewTransaction::new(
            TransactionKind::Recharge,
            amount,
            TransactionStatus::from(intent.status),
        )
        .with_description(description);
        new.payment_intent_ref = Some(intent.id.clone());
        new.metadata = json!({
            "auto_recharge": auto,
            "payment_method_id": method.id,
            "charge": intent.latest_charge,
        });

        let (_, transaction) = self
            .store
            .record_transaction(account.organization_id, Box::new(move |_| Ok(new)), now)
            .await?;
        info!(&self.logger, "Recharge recorded"; "organization" => %account.organization_id, "payment_intent" => &intent.id, "status" => %transaction.status);

        Ok(transaction)
    }

    /// Debits `amount` from the account.
    ///
    /// A prepaid account may not go below its credit limit. A successful
    /// debit may start an automatic recharge; its failure never fails the
    /// debit.
    pub async fn debit(
        &self,
        organization: OrganizationId,
        amount: Money,
        description: &str,
        reference: Option<(&str, String)>,
        now: DateTime<Utc>,
    ) -> Result<Transaction, Error> {
        let description = description.to_string();
        let (account, transaction) = self
            .store
            .record_transaction(
                organization,
                Box::new(move |account| {
                    if !account.is_active() {
                        return Err(Error::PreconditionFailed(
                            "Billing account is not active".into(),
                        ));
                    }
                    account.check_debit(amount)?;

                    let new = NewTransaction::new(
                        TransactionKind::Debit,
                        -amount,
                        TransactionStatus::Completed,
                    )
                    .with_description(description);

                    Ok(match reference {
                        Some((reference_type, reference_id)) => {
                            new.with_reference(reference_type, reference_id)
                        }
                        None => new,
                    })
                }),
                now,
            )
            .await?;

        if account.auto_recharge_due().is_some() {
            self.auto_recharge(organization, now).await;
        }

        Ok(transaction)
    }

    /// Claims the in-flight flag under the account lock and charges the
    /// default payment method. The flag is released unless the charge is
    /// left pending, in which case its settlement releases it.
    async fn auto_recharge(&self, organization: OrganizationId, now: DateTime<Utc>) {
        let claimed = self
            .store
            .update_billing_account(
                organization,
                Box::new(move |account| {
                    if account.auto_recharge_due().is_none() {
                        return Err(Error::Conflict("Automatic recharge is not due".into()));
                    }
                    account.auto_recharge_in_flight = true;
                    Ok(())
                }),
            )
            .await;

        let account = match claimed {
            Ok(account) => account,
            Err(Error::Conflict(_)) => return,
            Err(err) => {
                error!(&self.logger, "Automatic recharge could not start"; "organization" => %organization, "error" => ?err);
                return;
            }
        };

        let result = match account.default_payment_method_id {
            Some(id) => match self.owned_method(organization, id).await {
                Ok(method) => {
                    self.charge(
                        &account,
                        &method,
                        account.auto_recharge.amount,
                        None,
                        true,
                        now,
                    )
                    .await
                }
                Err(err) => Err(err),
            },
            None => Err(Error::PreconditionFailed(
                "No default payment method for the automatic recharge".into(),
            )),
        };

        let settled = match &result {
            Ok(transaction) => transaction.status != TransactionStatus::Pending,
            Err(err) => {
                error!(&self.logger, "Automatic recharge failed"; "organization" => %organization, "error" => ?err);
                true
            }
        };

        if settled {
            self.release_auto_recharge(organization).await;
        }
    }

    async fn release_auto_recharge(&self, organization: OrganizationId) {
        let released = self
            .store
            .update_billing_account(
                organization,
                Box::new(|account| {
                    account.auto_recharge_in_flight = false;
                    Ok(())
                }),
            )
            .await;

        if let Err(err) = released {
            error!(&self.logger, "Automatic recharge flag could not be released"; "organization" => %organization, "error" => ?err);
        }
    }

    /// A completed credit of `amount`.
    pub async fn credit(
        &self,
        organization: OrganizationId,
        amount: Money,
        description: &str,
        now: DateTime<Utc>,
    ) -> Result<Transaction, Error> {
        if amount <= Money::ZERO {
            return Err(Error::InvalidInput("Credit amount must be positive".into()));
        }

        let new = NewTransaction::new(TransactionKind::Credit, amount, TransactionStatus::Completed)
            .with_description(description);
        let (_, transaction) = self
            .store
            .record_transaction(organization, Box::new(move |_| Ok(new)), now)
            .await?;

        Ok(transaction)
    }

    pub async fn transactions(
        &self,
        organization: OrganizationId,
        filter: &TransactionFilter,
        pagination: Pagination,
    ) -> Result<Vec<Transaction>, Error> {
        self.store
            .transactions(organization, filter, pagination)
            .await
    }

    /// `payment_intent.succeeded`: completes the pending recharge and moves
    /// the balance. Already settled transactions are left alone.
    pub async fn settle_payment_intent(
        &self,
        payment_intent: &str,
        charge: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<WebhookOutcome, Error> {
        let transaction = match self.store.transaction_by_payment_intent(payment_intent).await? {
            Some(transaction) => transaction,
            None => {
                return Ok(WebhookOutcome::Failed(format!(
                    "No transaction for payment intent {payment_intent}"
                )))
            }
        };

        let auto = is_auto_recharge(&transaction);
        let (_, settled) = self
            .store
            .settle_transaction(
                transaction.id,
                Box::new(move |transaction, account| {
                    if transaction.status != TransactionStatus::Pending {
                        return Ok(());
                    }
                    transaction.settle(account, charge, now)?;
                    if auto {
                        account.auto_recharge_in_flight = false;
                    }
                    Ok(())
                }),
            )
            .await?;

        Ok(WebhookOutcome::Applied {
            organization_id: Some(settled.organization_id),
            transaction_id: Some(settled.id),
        })
    }

    /// `payment_intent.payment_failed`: marks the pending recharge failed.
    pub async fn fail_payment_intent(
        &self,
        payment_intent: &str,
        reason: String,
        now: DateTime<Utc>,
    ) -> Result<WebhookOutcome, Error> {
        let transaction = match self.store.transaction_by_payment_intent(payment_intent).await? {
            Some(transaction) => transaction,
            None => {
                return Ok(WebhookOutcome::Failed(format!(
                    "No transaction for payment intent {payment_intent}"
                )))
            }
        };

        let auto = is_auto_recharge(&transaction);
        let (_, failed) = self
            .store
            .settle_transaction(
                transaction.id,
                Box::new(move |transaction, account| {
                    if transaction.status != TransactionStatus::Pending {
                        return Ok(());
                    }
                    transaction.fail(Some(reason), now)?;
                    if auto {
                        account.auto_recharge_in_flight = false;
                    }
                    Ok(())
                }),
            )
            .await?;

        Ok(WebhookOutcome::Applied {
            organization_id: Some(failed.organization_id),
            transaction_id: Some(failed.id),
        })
    }

    /// `invoice.payment_succeeded`: records a completed invoice payment on
    /// the account of the invoiced customer, once per invoice.
    pub async fn record_invoice_payment(
        &self,
        invoice: &InvoiceObject,
        now: DateTime<Utc>,
    ) -> Result<WebhookOutcome, Error> {
        if let Some(existing) = self.store.transaction_by_invoice(&invoice.id).await? {
            return Ok(WebhookOutcome::Applied {
                organization_id: Some(existing.organization_id),
                transaction_id: Some(existing.id),
            });
        }

        let account = self
            .store
            .billing_accounts()
            .await?
            .into_iter()
            .find(|account| account.customer_ref.as_deref() == Some(invoice.customer.as_str()));
        let account = match account {
            Some(account) => account,
            None => {
                return Ok(WebhookOutcome::Failed(format!(
                    "No billing account for customer {}",
                    invoice.customer
                )))
            }
        };

        let currency = normalize_currency(&invoice.currency);
        if currency != account.currency {
            return Ok(WebhookOutcome::Failed(format!(
                "Invoice currency {currency} does not match the account currency {}",
                account.currency
            )));
        }

        let mut new = NewTransaction::new(
            TransactionKind::InvoicePayment,
            invoice.amount(),
            TransactionStatus::Completed,
        )
        .with_description(format!(
            "Invoice {}",
            invoice.number.as_deref().unwrap_or(&invoice.id)
        ));
        new.invoice_ref = Some(invoice.id.clone());

        let (_, transaction) = self
            .store
            .record_transaction(account.organization_id, Box::new(move |_| Ok(new)), now)
            .await?;

        Ok(WebhookOutcome::Applied {
            organization_id: Some(transaction.organization_id),
            transaction_id: Some(transaction.id),
        })
    }
}
