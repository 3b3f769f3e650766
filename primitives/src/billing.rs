//! Billing accounts, the transaction ledger, payment methods and payment
//! provider webhook events.
//!
//! The balance of a [`BillingAccount`] only moves through
//! [`BillingAccount::post`], which returns the `(balance_before,
//! balance_after)` pair stamped onto the completed [`Transaction`]. This
//! keeps `balance_after = balance_before + amount` true by construction.

use chrono::{DateTime, Datelike, Utc};
use parse_display::{Display, FromStr};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{
    money::{self, Money, DEFAULT_CURRENCY},
    BillingAccountId, OrganizationId, PaymentMethodId, TransactionId, WebhookEventId,
};

/// Earliest and latest allowed invoice day, so that every month has it.
pub const INVOICE_DAYS: std::ops::RangeInclusive<i32> = 1..=28;

pub const DEFAULT_PAYMENT_TERMS_DAYS: i32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, FromStr)]
#[serde(rename_all = "snake_case")]
#[display(style = "snake_case")]
pub enum BillingMode {
    Prepaid,
    Postpaid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, FromStr)]
#[serde(rename_all = "snake_case")]
#[display(style = "snake_case")]
pub enum AccountStatus {
    Active,
    Suspended,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoRecharge {
    pub enabled: bool,
    pub threshold: Money,
    pub amount: Money,
}

impl Default for AutoRecharge {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: Money::ZERO,
            amount: Money::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingAccount {
    #[serde(rename = "billing_account_id")]
    pub id: BillingAccountId,
    pub organization_id: OrganizationId,
    #[serde(rename = "billing_mode")]
    pub mode: BillingMode,
    pub currency: String,
    pub balance: Money,
    pub credit_limit: Money,
    pub auto_recharge: AutoRecharge,
    /// Set while an automatic recharge is waiting for the provider.
    pub auto_recharge_in_flight: bool,
    pub invoice_day_of_month: i32,
    pub payment_terms_days: i32,
    pub status: AccountStatus,
    /// The customer reference at the payments provider.
    #[serde(default)]
    pub customer_ref: Option<String>,
    #[serde(default)]
    pub default_payment_method_id: Option<PaymentMethodId>,
    #[serde(default)]
    pub billing_email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DebitError {
    #[error("Debit amount must be positive")]
    NonPositiveAmount,
    #[error("Insufficient funds: balance {balance}, credit limit {credit_limit}, required {required}")]
    InsufficientFunds {
        balance: Money,
        credit_limit: Money,
        required: Money,
    },
}

impl BillingAccount {
    /// A prepaid USD account with zero balance, no credit and auto-recharge
    /// disabled.
    pub fn new(
        id: BillingAccountId,
        organization_id: OrganizationId,
        customer_ref: Option<String>,
        billing_email: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            organization_id,
            mode: BillingMode::Prepaid,
            currency: DEFAULT_CURRENCY.to_owned(),
            balance: Money::ZERO,
            credit_limit: Money::ZERO,
            auto_recharge: AutoRecharge::default(),
            auto_recharge_in_flight: false,
            invoice_day_of_month: *INVOICE_DAYS.start(),
            payment_terms_days: DEFAULT_PAYMENT_TERMS_DAYS,
            status: AccountStatus::Active,
            customer_ref,
            default_payment_method_id: None,
            billing_email,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }

    /// Checks that `amount` may be debited. A prepaid account may not go
    /// below `-credit_limit`; a postpaid account accrues without bound.
    pub fn check_debit(&self, amount: Money) -> Result<(), DebitError> {
        if amount <= Money::ZERO {
            return Err(DebitError::NonPositiveAmount);
        }

        if self.mode == BillingMode::Prepaid && self.balance - amount < -self.credit_limit {
            return Err(DebitError::InsufficientFunds {
                balance: self.balance,
                credit_limit: self.credit_limit,
                required: amount,
            });
        }

        Ok(())
    }

    /// Moves the balance by the signed `amount` and returns
    /// `(balance_before, balance_after)`.
    pub fn post(&mut self, amount: Money, now: DateTime<Utc>) -> (Money, Money) {
        let before = self.balance;
        let after = money::round(before + amount);

        self.balance = after;
        self.updated_at = now;

        (before, after)
    }

    /// The amount of the automatic recharge a debit should trigger, if any.
    ///
    /// Nothing is returned while another automatic recharge is in flight.
    pub fn auto_recharge_due(&self) -> Option<Money> {
        let auto_recharge = &self.auto_recharge;

        let due = auto_recharge.enabled
            && !self.auto_recharge_in_flight
            && auto_recharge.amount > Money::ZERO
            && self.balance < auto_recharge.threshold;

        due.then_some(auto_recharge.amount)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, FromStr)]
#[serde(rename_all = "snake_case")]
#[display(style = "snake_case")]
pub enum TransactionKind {
    Recharge,
    Debit,
    Credit,
    Refund,
    Chargeback,
    InvoicePayment,
    UsageCharge,
    AffiliatePayout,
    PlatformFee,
    Adjustment,
    Transfer,
}

impl TransactionKind {
    /// Kinds counted as spend on the dashboard.
    pub fn is_spend(&self) -> bool {
        matches!(
            self,
            TransactionKind::Debit | TransactionKind::UsageCharge | TransactionKind::PlatformFee
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, FromStr)]
#[serde(rename_all = "snake_case")]
#[display(style = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
    Refunded,
}

/// Status of a payment intent as reported by the payments provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, FromStr)]
#[serde(rename_all = "snake_case")]
#[display(style = "snake_case")]
pub enum PaymentIntentStatus {
    Succeeded,
    Processing,
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresAction,
    RequiresCapture,
    Canceled,
    Failed,
}

impl From<PaymentIntentStatus> for TransactionStatus {
    fn from(status: PaymentIntentStatus) -> Self {
        match status {
            PaymentIntentStatus::Succeeded => TransactionStatus::Completed,
            PaymentIntentStatus::Processing
            | PaymentIntentStatus::RequiresPaymentMethod
            | PaymentIntentStatus::RequiresConfirmation
            | PaymentIntentStatus::RequiresAction
            | PaymentIntentStatus::RequiresCapture => TransactionStatus::Pending,
            PaymentIntentStatus::Canceled => TransactionStatus::Cancelled,
            PaymentIntentStatus::Failed => TransactionStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(rename = "transaction_id")]
    pub id: TransactionId,
    pub organization_id: OrganizationId,
    pub billing_account_id: BillingAccountId,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    /// Signed; debits are negative.
    pub amount: Money,
    pub currency: String,
    pub balance_before: Money,
    pub balance_after: Money,
    #[serde(default)]
    pub reference_type: Option<String>,
    #[serde(default)]
    pub reference_id: Option<String>,
    #[serde(default)]
    pub payment_intent_ref: Option<String>,
    #[serde(default)]
    pub invoice_ref: Option<String>,
    #[serde(default)]
    pub charge_ref: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub status: TransactionStatus,
    pub processed_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// `balance_after = balance_before + amount`.
    pub fn is_balanced(&self) -> bool {
        self.balance_after == self.balance_before + self.amount
    }
}

/// A ledger entry before it is given an id and its balances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub kind: TransactionKind,
    pub amount: Money,
    pub status: TransactionStatus,
    pub reference_type: Option<String>,
    pub reference_id: Option<String>,
    pub payment_intent_ref: Option<String>,
    pub invoice_ref: Option<String>,
    pub description: Option<String>,
    pub metadata: Value,
}

impl NewTransaction {
    pub fn new(kind: TransactionKind, amount: Money, status: TransactionStatus) -> Self {
        Self {
            kind,
            amount,
            status,
            reference_type: None,
            reference_id: None,
            payment_intent_ref: None,
            invoice_ref: None,
            description: None,
            metadata: Value::Object(Default::default()),
        }
    }

    pub fn with_reference(mut self, reference_type: &str, reference_id: impl ToString) -> Self {
        self.reference_type = Some(reference_type.to_owned());
        self.reference_id = Some(reference_id.to_string());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Stamps the entry onto `account`. Completed entries move the balance,
    /// any other status records the balance the entry would produce.
    pub fn into_transaction(
        self,
        id: TransactionId,
        account: &mut BillingAccount,
        now: DateTime<Utc>,
    ) -> Transaction {
        let (balance_before, balance_after) = if self.status == TransactionStatus::Completed {
            account.post(self.amount, now)
        } else {
            (account.balance, money::round(account.balance + self.amount))
        };

        Transaction {
            id,
            organization_id: account.organization_id,
            billing_account_id: account.id,
            kind: self.kind,
            amount: money::round(self.amount),
            currency: account.currency.clone(),
            balance_before,
            balance_after,
            reference_type: self.reference_type,
            reference_id: self.reference_id,
            payment_intent_ref: self.payment_intent_ref,
            invoice_ref: self.invoice_ref,
            charge_ref: None,
            description: self.description,
            status: self.status,
            processed_at: now,
            metadata: self.metadata,
            created_at: now,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SettlementError {
    #[error("Transaction {0} is already {1}")]
    AlreadySettled(TransactionId, TransactionStatus),
}

impl Transaction {
    /// Completes a pending entry against the current balance of `account`.
    pub fn settle(
        &mut self,
        account: &mut BillingAccount,
        charge_ref: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), SettlementError> {
        if self.status != TransactionStatus::Pending {
            return Err(SettlementError::AlreadySettled(self.id, self.status));
        }

        let (before, after) = account.post(self.amount, now);
        self.balance_before = before;
        self.balance_after = after;
        self.status = TransactionStatus::Completed;
        self.processed_at = now;
        if charge_ref.is_some() {
            self.charge_ref = charge_ref;
        }

        Ok(())
    }

    /// Marks a pending entry as failed; the balance is untouched.
    pub fn fail(&mut self, reason: Option<String>, now: DateTime<Utc>) -> Result<(), SettlementError> {
        if self.status != TransactionStatus::Pending {
            return Err(SettlementError::AlreadySettled(self.id, self.status));
        }

        self.status = TransactionStatus::Failed;
        self.processed_at = now;
        if let (Some(reason), Value::Object(metadata)) = (reason, &mut self.metadata) {
            metadata.insert("failure_reason".into(), Value::String(reason));
        }

        Ok(())
    }
}

/// Sum of the spend of the completed transactions processed in the
/// calendar month of `month`, as a positive amount.
pub fn monthly_spend(transactions: &[Transaction], month: DateTime<Utc>) -> Money {
    transactions
        .iter()
        .filter(|tx| {
            tx.status == TransactionStatus::Completed
                && tx.kind.is_spend()
                && tx.processed_at.year() == month.year()
                && tx.processed_at.month() == month.month()
        })
        .map(|tx| tx.amount.abs())
        .sum()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMethod {
    #[serde(rename = "payment_method_id")]
    pub id: PaymentMethodId,
    pub organization_id: OrganizationId,
    pub billing_account_id: BillingAccountId,
    /// The payment method reference at the payments provider.
    pub provider_ref: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub card_brand: Option<String>,
    #[serde(default)]
    pub card_last4: Option<String>,
    #[serde(default)]
    pub card_exp_month: Option<i32>,
    #[serde(default)]
    pub card_exp_year: Option<i32>,
    #[serde(default)]
    pub nickname: Option<String>,
    pub is_default: bool,
    pub is_active: bool,
    /// Provider details, encrypted when a cipher is configured.
    #[serde(skip)]
    pub provider_details: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A payment method attached at the provider, before it is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPaymentMethod {
    pub provider_ref: String,
    pub kind: String,
    pub card_brand: Option<String>,
    pub card_last4: Option<String>,
    pub card_exp_month: Option<i32>,
    pub card_exp_year: Option<i32>,
    pub nickname: Option<String>,
    pub is_default: bool,
    pub provider_details: Option<String>,
}

impl NewPaymentMethod {
    pub fn into_payment_method(
        self,
        id: PaymentMethodId,
        account: &BillingAccount,
        now: DateTime<Utc>,
    ) -> PaymentMethod {
        PaymentMethod {
            id,
            organization_id: account.organization_id,
            billing_account_id: account.id,
            provider_ref: self.provider_ref,
            kind: self.kind,
            card_brand: self.card_brand,
            card_last4: self.card_last4,
            card_exp_month: self.card_exp_month,
            card_exp_year: self.card_exp_year,
            nickname: self.nickname,
            is_default: self.is_default,
            is_active: true,
            provider_details: self.provider_details,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Body of `POST /billing/payment-methods`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddPaymentMethod {
    /// Token of the payment method created client-side at the provider.
    pub payment_method_id: String,
    #[serde(default)]
    pub set_as_default: bool,
    #[serde(default)]
    pub nickname: Option<String>,
}

/// Body of `POST /billing/recharge`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recharge {
    pub amount: Money,
    #[serde(default)]
    pub payment_method_id: Option<PaymentMethodId>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invoice day of month must be between 1 and 28")]
    InvoiceDay,
    #[error("Payment terms cannot be negative")]
    PaymentTerms,
    #[error("Auto-recharge amounts cannot be negative")]
    AutoRecharge,
    #[error("Credit limit cannot be negative")]
    CreditLimit,
    #[error("A prepaid balance of {balance} is below the credit limit of {credit_limit}")]
    BelowCreditLimit { balance: Money, credit_limit: Money },
}

impl BillingAccount {
    /// A prepaid account may never sit below `-credit_limit`.
    fn check_credit_limit(&self, mode: BillingMode, credit_limit: Money) -> Result<(), ConfigError> {
        if mode == BillingMode::Prepaid && self.balance < -credit_limit {
            return Err(ConfigError::BelowCreditLimit {
                balance: self.balance,
                credit_limit,
            });
        }

        Ok(())
    }
}

/// Body of `PUT /billing/config`.
///
/// The credit limit is not part of it, see [`SetCreditLimit`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateBillingConfig {
    #[serde(default)]
    pub billing_mode: Option<BillingMode>,
    #[serde(default)]
    pub auto_recharge_enabled: Option<bool>,
    #[serde(default)]
    pub auto_recharge_threshold: Option<Money>,
    #[serde(default)]
    pub auto_recharge_amount: Option<Money>,
    #[serde(default)]
    pub billing_email: Option<String>,
    #[serde(default)]
    pub invoice_day_of_month: Option<i32>,
    #[serde(default)]
    pub payment_terms_days: Option<i32>,
}

impl UpdateBillingConfig {
    pub fn apply(self, account: &mut BillingAccount, now: DateTime<Utc>) -> Result<(), ConfigError> {
        if matches!(self.invoice_day_of_month, Some(day) if !INVOICE_DAYS.contains(&day)) {
            return Err(ConfigError::InvoiceDay);
        }
        if matches!(self.payment_terms_days, Some(days) if days < 0) {
            return Err(ConfigError::PaymentTerms);
        }
        if [self.auto_recharge_threshold, self.auto_recharge_amount]
            .iter()
            .flatten()
            .any(|amount| *amount < Money::ZERO)
        {
            return Err(ConfigError::AutoRecharge);
        }
        if let Some(mode) = self.billing_mode {
            account.check_credit_limit(mode, account.credit_limit)?;
            account.mode = mode;
        }
        if let Some(enabled) = self.auto_recharge_enabled {
            account.auto_recharge.enabled = enabled;
        }
        if let Some(threshold) = self.auto_recharge_threshold {
            account.auto_recharge.threshold = threshold;
        }
        if let Some(amount) = self.auto_recharge_amount {
            account.auto_recharge.amount = amount;
        }
        if let Some(email) = self.billing_email {
            account.billing_email = Some(email);
        }
        if let Some(day) = self.invoice_day_of_month {
            account.invoice_day_of_month = day;
        }
        if let Some(days) = self.payment_terms_days {
            account.payment_terms_days = days;
        }
        account.updated_at = now;

        Ok(())
    }
}

/// Body of the admin-only `PUT /billing/credit-limit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetCreditLimit {
    pub credit_limit: Money,
}

impl SetCreditLimit {
    pub fn apply(self, account: &mut BillingAccount, now: DateTime<Utc>) -> Result<(), ConfigError> {
        if self.credit_limit < Money::ZERO {
            return Err(ConfigError::CreditLimit);
        }
        account.check_credit_limit(account.mode, self.credit_limit)?;

        account.credit_limit = money::round(self.credit_limit);
        account.updated_at = now;

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, FromStr)]
#[serde(rename_all = "snake_case")]
#[display(style = "snake_case")]
pub enum WebhookEventStatus {
    Pending,
    Processed,
    Failed,
    Ignored,
}

/// A payments provider event, stored once per external event id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookEvent {
    #[serde(rename = "webhook_event_id")]
    pub id: WebhookEventId,
    pub external_event_id: String,
    pub event_type: String,
    pub status: WebhookEventStatus,
    pub payload: Value,
    #[serde(default)]
    pub organization_id: Option<OrganizationId>,
    #[serde(default)]
    pub transaction_id: Option<TransactionId>,
    #[serde(default)]
    pub error_message: Option<String>,
    pub retry_count: i32,
    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl WebhookEvent {
    /// Whether a delivery of this event should be applied. Processed and
    /// ignored events are never applied again; failed ones are retried.
    pub fn needs_processing(&self) -> bool {
        matches!(
            self.status,
            WebhookEventStatus::Pending | WebhookEventStatus::Failed
        )
    }

    pub fn record_outcome(&mut self, outcome: &WebhookOutcome, now: DateTime<Utc>) {
        match outcome {
            WebhookOutcome::Applied {
                organization_id,
                transaction_id,
            } => {
                self.status = WebhookEventStatus::Processed;
                self.organization_id = *organization_id;
                self.transaction_id = *transaction_id;
                self.error_message = None;
            }
            WebhookOutcome::Ignored => self.status = WebhookEventStatus::Ignored,
            WebhookOutcome::Failed(message) => {
                self.retry_count += 1;
                self.status = WebhookEventStatus::Failed;
                self.error_message = Some(message.clone());
            }
        }
        self.processed_at = Some(now);
    }
}

/// What applying a webhook event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Applied {
        organization_id: Option<OrganizationId>,
        transaction_id: Option<TransactionId>,
    },
    Ignored,
    Failed(String),
}

/// The provider event types the ledger reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, FromStr)]
pub enum WebhookKind {
    #[display("payment_intent.succeeded")]
    PaymentIntentSucceeded,
    #[display("payment_intent.payment_failed")]
    PaymentIntentFailed,
    #[display("invoice.payment_succeeded")]
    InvoicePaymentSucceeded,
}

#[cfg(feature = "postgres")]
mod postgres {
    use tokio_postgres::Row;

    use super::{
        AccountStatus, AutoRecharge, BillingAccount, BillingMode, PaymentIntentStatus,
        PaymentMethod, Transaction, TransactionKind, TransactionStatus, WebhookEvent,
        WebhookEventStatus,
    };
    use crate::util::postgres::impl_text_sql;

    impl_text_sql!(
        BillingMode,
        AccountStatus,
        TransactionKind,
        TransactionStatus,
        PaymentIntentStatus,
        WebhookEventStatus,
    );

    impl From<&Row> for BillingAccount {
        fn from(row: &Row) -> Self {
            Self {
                id: row.get("billing_account_id"),
                organization_id: row.get("organization_id"),
                mode: row.get("billing_mode"),
                currency: row.get("currency"),
                balance: row.get("balance"),
                credit_limit: row.get("credit_limit"),
                auto_recharge: AutoRecharge {
                    enabled: row.get("auto_recharge_enabled"),
                    threshold: row.get("auto_recharge_threshold"),
                    amount: row.get("auto_recharge_amount"),
                },
                auto_recharge_in_flight: row.get("auto_recharge_in_flight"),
                invoice_day_of_month: row.get("invoice_day_of_month"),
                payment_terms_days: row.get("payment_terms_days"),
                status: row.get("status"),
                customer_ref: row.get("customer_ref"),
                default_payment_method_id: row.get("default_payment_method_id"),
                billing_email: row.get("billing_email"),
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
            }
        }
    }

    impl From<&Row> for Transaction {
        fn from(row: &Row) -> Self {
            Self {
                id: row.get("transaction_id"),
                organization_id: row.get("organization_id"),
                billing_account_id: row.get("billing_account_id"),
                kind: row.get("type"),
                amount: row.get("amount"),
                currency: row.get("currency"),
                balance_before: row.get("balance_before"),
                balance_after: row.get("balance_after"),
                reference_type: row.get("reference_type"),
                reference_id: row.get("reference_id"),
                payment_intent_ref: row.get("payment_intent_ref"),
                invoice_ref: row.get("invoice_ref"),
                charge_ref: row.get("charge_ref"),
                description: row.get("description"),
                status: row.get("status"),
                processed_at: row.get("processed_at"),
                metadata: row.get("metadata"),
                created_at: row.get("created_at"),
            }
        }
    }

    impl From<&Row> for PaymentMethod {
        fn from(row: &Row) -> Self {
            Self {
                id: row.get("payment_method_id"),
                organization_id: row.get("organization_id"),
                billing_account_id: row.get("billing_account_id"),
                provider_ref: row.get("provider_ref"),
                kind: row.get("type"),
                card_brand: row.get("card_brand"),
                card_last4: row.get("card_last4"),
                card_exp_month: row.get("card_exp_month"),
                card_exp_year: row.get("card_exp_year"),
                nickname: row.get("nickname"),
                is_default: row.get("is_default"),
                is_active: row.get("is_active"),
                provider_details: row.get("provider_details"),
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
            }
        }
    }

    impl From<&Row> for WebhookEvent {
        fn from(row: &Row) -> Self {
            Self {
                id: row.get("webhook_event_id"),
                external_event_id: row.get("external_event_id"),
                event_type: row.get("event_type"),
                status: row.get("status"),
                payload: row.get("payload"),
                organization_id: row.get("organization_id"),
                transaction_id: row.get("transaction_id"),
                error_message: row.get("error_message"),
                retry_count: row.get("retry_count"),
                processed_at: row.get("processed_at"),
                created_at: row.get("created_at"),
            }
        }
    }
}

#[cfg(test)]
mod test {
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::test_util::dummy_billing_account;

    fn amount(value: &str) -> Money {
        value.parse().expect("valid decimal")
    }

    #[test]
    fn new_accounts_use_the_defaults() {
        let account = dummy_billing_account(OrganizationId(5));

        assert_eq!(BillingMode::Prepaid, account.mode);
        assert_eq!("USD", account.currency);
        assert_eq!(Money::ZERO, account.balance);
        assert_eq!(1, account.invoice_day_of_month);
        assert_eq!(30, account.payment_terms_days);
        assert!(!account.auto_recharge.enabled);
    }

    #[test]
    fn prepaid_debit_respects_the_credit_limit() {
        let mut account = dummy_billing_account(OrganizationId(5));
        account.balance = amount("10.00");

        assert_eq!(
            Err(DebitError::InsufficientFunds {
                balance: amount("10.00"),
                credit_limit: Money::ZERO,
                required: amount("15.00"),
            }),
            account.check_debit(amount("15.00"))
        );
        assert_eq!(Ok(()), account.check_debit(amount("10.00")));

        account.credit_limit = amount("5");
        assert_eq!(Ok(()), account.check_debit(amount("15.00")));
        assert!(account.check_debit(amount("15.01")).is_err());
    }

    #[test]
    fn postpaid_debit_accrues() {
        let mut account = dummy_billing_account(OrganizationId(5));
        account.mode = BillingMode::Postpaid;

        assert_eq!(Ok(()), account.check_debit(amount("1000000")));
        assert_eq!(Err(DebitError::NonPositiveAmount), account.check_debit(Money::ZERO));
    }

    #[test]
    fn completed_entries_keep_the_ledger_balanced() {
        let now = Utc::now();
        let mut account = dummy_billing_account(OrganizationId(5));
        account.balance = amount("10");

        let recharge = NewTransaction::new(
            TransactionKind::Recharge,
            amount("20.00"),
            TransactionStatus::Completed,
        )
        .into_transaction(TransactionId(1), &mut account, now);
        let debit = NewTransaction::new(
            TransactionKind::Debit,
            -amount("15.00"),
            TransactionStatus::Completed,
        )
        .into_transaction(TransactionId(2), &mut account, now);

        assert!(recharge.is_balanced());
        assert!(debit.is_balanced());
        assert_eq!(amount("30"), recharge.balance_after);
        assert_eq!(amount("15"), debit.balance_after);
        assert_eq!(debit.balance_after, account.balance);
    }

    #[test]
    fn pending_entries_leave_the_balance_alone_until_settled() {
        let now = Utc::now();
        let mut account = dummy_billing_account(OrganizationId(5));

        let mut pending = NewTransaction::new(
            TransactionKind::Recharge,
            amount("20"),
            TransactionStatus::Pending,
        )
        .into_transaction(TransactionId(1), &mut account, now);
        assert_eq!(Money::ZERO, account.balance);

        // another entry settles in between
        account.post(amount("5"), now);

        pending
            .settle(&mut account, Some("ch_1".into()), now)
            .expect("Should settle");
        assert_eq!(amount("5"), pending.balance_before);
        assert_eq!(amount("25"), pending.balance_after);
        assert_eq!(amount("25"), account.balance);
        assert!(pending.is_balanced());

        assert_eq!(
            Err(SettlementError::AlreadySettled(
                TransactionId(1),
                TransactionStatus::Completed
            )),
            pending.settle(&mut account, None, now)
        );
        assert_eq!(amount("25"), account.balance);
    }

    #[test]
    fn auto_recharge_is_suppressed_while_in_flight() {
        let mut account = dummy_billing_account(OrganizationId(5));
        account.auto_recharge = AutoRecharge {
            enabled: true,
            threshold: amount("10"),
            amount: amount("50"),
        };
        account.balance = amount("9.99");

        assert_eq!(Some(amount("50")), account.auto_recharge_due());

        account.auto_recharge_in_flight = true;
        assert_eq!(None, account.auto_recharge_due());

        account.auto_recharge_in_flight = false;
        account.balance = amount("10");
        assert_eq!(None, account.auto_recharge_due());
    }

    #[test]
    fn intent_status_mapping() {
        assert_eq!(
            TransactionStatus::Completed,
            PaymentIntentStatus::Succeeded.into()
        );
        assert_eq!(
            TransactionStatus::Pending,
            PaymentIntentStatus::RequiresAction.into()
        );
        assert_eq!(
            TransactionStatus::Cancelled,
            PaymentIntentStatus::Canceled.into()
        );
        assert_eq!(TransactionStatus::Failed, PaymentIntentStatus::Failed.into());
    }

    #[test]
    fn config_update_is_validated_before_it_is_applied() {
        let now = Utc::now();
        let mut account = dummy_billing_account(OrganizationId(5));
        let before = account.clone();

        let update = UpdateBillingConfig {
            billing_mode: Some(BillingMode::Postpaid),
            invoice_day_of_month: Some(31),
            ..Default::default()
        };
        assert_eq!(Err(ConfigError::InvoiceDay), update.apply(&mut account, now));
        assert_eq!(before, account);

        let update = UpdateBillingConfig {
            billing_mode: Some(BillingMode::Postpaid),
            invoice_day_of_month: Some(28),
            ..Default::default()
        };
        update.apply(&mut account, now).expect("Should apply");
        assert_eq!(BillingMode::Postpaid, account.mode);
        assert_eq!(28, account.invoice_day_of_month);
    }

    #[test]
    fn config_update_cannot_leave_a_prepaid_balance_below_the_credit_limit() {
        let now = Utc::now();
        let mut account = dummy_billing_account(OrganizationId(5));
        account.mode = BillingMode::Postpaid;
        account.balance = amount("-100");
        let before = account.clone();

        let to_prepaid = UpdateBillingConfig {
            billing_mode: Some(BillingMode::Prepaid),
            ..Default::default()
        };
        assert_eq!(
            Err(ConfigError::BelowCreditLimit {
                balance: amount("-100"),
                credit_limit: Money::ZERO,
            }),
            to_prepaid.clone().apply(&mut account, now)
        );
        assert_eq!(before, account);

        account.credit_limit = amount("100");
        to_prepaid.apply(&mut account, now).expect("Should apply");
        assert_eq!(BillingMode::Prepaid, account.mode);
        assert!(account.balance >= -account.credit_limit);
    }

    #[test]
    fn credit_limit_cannot_drop_below_the_debt() {
        let now = Utc::now();
        let mut account = dummy_billing_account(OrganizationId(5));
        account.balance = amount("-5");
        account.credit_limit = amount("10");

        assert_eq!(
            Err(ConfigError::BelowCreditLimit {
                balance: amount("-5"),
                credit_limit: Money::ZERO,
            }),
            SetCreditLimit {
                credit_limit: Money::ZERO
            }
            .apply(&mut account, now)
        );
        assert_eq!(amount("10"), account.credit_limit);
        assert_eq!(
            Err(ConfigError::CreditLimit),
            SetCreditLimit {
                credit_limit: amount("-1")
            }
            .apply(&mut account, now)
        );

        SetCreditLimit {
            credit_limit: amount("5"),
        }
        .apply(&mut account, now)
        .expect("Should lower down to the debt");
        assert_eq!(amount("5"), account.credit_limit);
    }

    #[test]
    fn the_tenant_config_body_ignores_a_credit_limit() {
        let now = Utc::now();
        let mut account = dummy_billing_account(OrganizationId(5));

        let update: UpdateBillingConfig =
            serde_json::from_value(serde_json::json!({ "credit_limit": "1000000" }))
                .expect("Should deserialize");
        update.apply(&mut account, now).expect("Should apply");

        assert_eq!(Money::ZERO, account.credit_limit);
        assert!(account.check_debit(amount("500000")).is_err());
    }

    #[test]
    fn monthly_spend_counts_completed_spend_of_the_month() {
        let mut account = dummy_billing_account(OrganizationId(5));
        let january = Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap();

        let debit = NewTransaction::new(
            TransactionKind::Debit,
            -amount("15"),
            TransactionStatus::Completed,
        )
        .into_transaction(TransactionId(1), &mut account, january);
        let recharge = NewTransaction::new(
            TransactionKind::Recharge,
            amount("20"),
            TransactionStatus::Completed,
        )
        .into_transaction(TransactionId(2), &mut account, january);
        let february_debit = NewTransaction::new(
            TransactionKind::Debit,
            -amount("3"),
            TransactionStatus::Completed,
        )
        .into_transaction(TransactionId(3), &mut account, january + Duration::days(31));

        assert_eq!(
            amount("15"),
            monthly_spend(&[debit, recharge, february_debit], january)
        );
    }

    #[test]
    fn failed_webhooks_are_retried_and_counted() {
        let now = Utc::now();
        let mut event = WebhookEvent {
            id: WebhookEventId(1),
            external_event_id: "evt_1".into(),
            event_type: WebhookKind::PaymentIntentSucceeded.to_string(),
            status: WebhookEventStatus::Pending,
            payload: Value::Null,
            organization_id: None,
            transaction_id: None,
            error_message: None,
            retry_count: 0,
            processed_at: None,
            created_at: now,
        };
        assert!(event.needs_processing());

        event.record_outcome(&WebhookOutcome::Failed("boom".into()), now);
        assert_eq!(1, event.retry_count);
        assert_eq!(Some("boom".to_string()), event.error_message);
        assert!(event.needs_processing());

        event.record_outcome(&WebhookOutcome::Failed("boom".into()), now);
        assert_eq!(2, event.retry_count);

        event.record_outcome(
            &WebhookOutcome::Applied {
                organization_id: Some(OrganizationId(5)),
                transaction_id: Some(TransactionId(1)),
            },
            now,
        );
        assert_eq!(WebhookEventStatus::Processed, event.status);
        assert!(!event.needs_processing());
    }

    #[test]
    fn webhook_kinds_parse_from_provider_names() {
        assert_eq!(
            Some(WebhookKind::PaymentIntentSucceeded),
            "payment_intent.succeeded".parse().ok()
        );
        assert!("customer.subscription.created".parse::<WebhookKind>().is_err());
    }
}
