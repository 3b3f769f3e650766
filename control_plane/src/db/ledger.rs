//! Billing accounts, the transaction ledger, payment methods and the
//! provider webhook events.

use chrono::{DateTime, Utc};
use primitives::{
    BillingAccount, OrganizationId, PaymentMethod, PaymentMethodId, Transaction, TransactionId,
    WebhookEvent, WebhookEventStatus,
};
use serde_json::Value;

use super::{lock_clause, GenericClient, PoolError};
use crate::store::TransactionFilter;

static BILLING_ACCOUNT_COLUMNS: &str = "billing_account_id, organization_id, billing_mode, currency, balance, credit_limit, auto_recharge_enabled, auto_recharge_threshold, auto_recharge_amount, auto_recharge_in_flight, invoice_day_of_month, payment_terms_days, status, customer_ref, default_payment_method_id, billing_email, created_at, updated_at";

static TRANSACTION_COLUMNS: &str = "transaction_id, organization_id, billing_account_id, type, amount, currency, balance_before, balance_after, reference_type, reference_id, payment_intent_ref, invoice_ref, charge_ref, description, status, processed_at, metadata, created_at";

static PAYMENT_METHOD_COLUMNS: &str = "payment_method_id, organization_id, billing_account_id, provider_ref, type, card_brand, card_last4, card_exp_month, card_exp_year, nickname, is_default, is_active, provider_details, created_at, updated_at";

static WEBHOOK_EVENT_COLUMNS: &str = "webhook_event_id, external_event_id, event_type, status, payload, organization_id, transaction_id, error_message, retry_count, processed_at, created_at";

/// ```text
/// SELECT ... FROM billing_accounts WHERE organization_id = $1 [FOR UPDATE]
/// ```
pub async fn fetch_billing_account(
    client: &impl GenericClient,
    organization: OrganizationId,
    for_update: bool,
) -> Result<Option<BillingAccount>, PoolError> {
    let statement = client
        .prepare_cached(&format!(
            "SELECT {BILLING_ACCOUNT_COLUMNS} FROM billing_accounts WHERE organization_id = $1{}",
            lock_clause(for_update)
        ))
        .await?;

    let row = client.query_opt(&statement, &[&organization]).await?;

    Ok(row.as_ref().map(BillingAccount::from))
}

pub async fn list_billing_accounts(
    client: &impl GenericClient,
) -> Result<Vec<BillingAccount>, PoolError> {
    let statement = client
        .prepare_cached(&format!(
            "SELECT {BILLING_ACCOUNT_COLUMNS} FROM billing_accounts ORDER BY billing_account_id"
        ))
        .await?;

    let rows = client.query(&statement, &[]).await?;

    Ok(rows.iter().map(BillingAccount::from).collect())
}

/// Inserts the account unless the organization already has one, in which
/// case the existing account is returned.
pub async fn insert_billing_account(
    client: &impl GenericClient,
    account: &BillingAccount,
) -> Result<BillingAccount, PoolError> {
    let statement = client
        .prepare_cached(&format!(
            "INSERT INTO billing_accounts (organization_id, billing_mode, currency, balance, credit_limit, auto_recharge_enabled, auto_recharge_threshold, auto_recharge_amount, auto_recharge_in_flight, invoice_day_of_month, payment_terms_days, status, customer_ref, default_payment_method_id, billing_email, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17) ON CONFLICT (organization_id) DO NOTHING RETURNING {BILLING_ACCOUNT_COLUMNS}"
        ))
        .await?;

    let row = client
        .query_opt(
            &statement,
            &[
                &account.organization_id,
                &account.mode,
                &account.currency,
                &account.balance,
                &account.credit_limit,
                &account.auto_recharge.enabled,
                &account.auto_recharge.threshold,
                &account.auto_recharge.amount,
                &account.auto_recharge_in_flight,
                &account.invoice_day_of_month,
                &account.payment_terms_days,
                &account.status,
                &account.customer_ref,
                &account.default_payment_method_id,
                &account.billing_email,
                &account.created_at,
                &account.updated_at,
            ],
        )
        .await?;

    match row {
        Some(row) => Ok(BillingAccount::from(&row)),
        None => {
            let existing = fetch_billing_account(client, account.organization_id, false).await?;
            // the account that won the race cannot be gone, the organization
            // would have to be deleted in between
            Ok(existing.unwrap_or_else(|| account.clone()))
        }
    }
}

pub async fn update_billing_account(
    client: &impl GenericClient,
    account: &BillingAccount,
) -> Result<(), PoolError> {
    let statement = client
        .prepare_cached(
            "UPDATE billing_accounts SET billing_mode = $2, currency = $3, balance = $4, credit_limit = $5, auto_recharge_enabled = $6, auto_recharge_threshold = $7, auto_recharge_amount = $8, auto_recharge_in_flight = $9, invoice_day_of_month = $10, payment_terms_days = $11, status = $12, customer_ref = $13, default_payment_method_id = $14, billing_email = $15, updated_at = $16 WHERE organization_id = $1",
        )
        .await?;

    client
        .execute(
            &statement,
            &[
                &account.organization_id,
                &account.mode,
                &account.currency,
                &account.balance,
                &account.credit_limit,
                &account.auto_recharge.enabled,
                &account.auto_recharge.threshold,
                &account.auto_recharge.amount,
                &account.auto_recharge_in_flight,
                &account.invoice_day_of_month,
                &account.payment_terms_days,
                &account.status,
                &account.customer_ref,
                &account.default_payment_method_id,
                &account.billing_email,
                &account.updated_at,
            ],
        )
        .await?;

    Ok(())
}

/// Inserts the entry built by the domain, ignoring its id.
pub async fn insert_transaction(
    client: &impl GenericClient,
    transaction: &Transaction,
) -> Result<Transaction, PoolError> {
    let statement = client
        .prepare_cached(&format!(
            "INSERT INTO transactions (organization_id, billing_account_id, type, amount, currency, balance_before, balance_after, reference_type, reference_id, payment_intent_ref, invoice_ref, charge_ref, description, status, processed_at, metadata, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17) RETURNING {TRANSACTION_COLUMNS}"
        ))
        .await?;

    let row = client
        .query_one(
            &statement,
            &[
                &transaction.organization_id,
                &transaction.billing_account_id,
                &transaction.kind,
                &transaction.amount,
                &transaction.currency,
                &transaction.balance_before,
                &transaction.balance_after,
                &transaction.reference_type,
                &transaction.reference_id,
                &transaction.payment_intent_ref,
                &transaction.invoice_ref,
                &transaction.charge_ref,
                &transaction.description,
                &transaction.status,
                &transaction.processed_at,
                &transaction.metadata,
                &transaction.created_at,
            ],
        )
        .await?;

    Ok(Transaction::from(&row))
}

pub async fn fetch_transaction(
    client: &impl GenericClient,
    id: TransactionId,
    for_update: bool,
) -> Result<Option<Transaction>, PoolError> {
    let statement = client
        .prepare_cached(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE transaction_id = $1{}",
            lock_clause(for_update)
        ))
        .await?;

    let row = client.query_opt(&statement, &[&id]).await?;

    Ok(row.as_ref().map(Transaction::from))
}

/// The first transaction whose `column` equals `value`.
///
/// `column` is one of the fixed reference columns, never user input.
async fn fetch_transaction_by(
    client: &impl GenericClient,
    column: &'static str,
    value: &str,
) -> Result<Option<Transaction>, PoolError> {
    let statement = client
        .prepare_cached(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE {column} = $1 ORDER BY transaction_id LIMIT 1"
        ))
        .await?;

    let row = client.query_opt(&statement, &[&value]).await?;

    Ok(row.as_ref().map(Transaction::from))
}

pub async fn fetch_transaction_by_payment_intent(
    client: &impl GenericClient,
    payment_intent: &str,
) -> Result<Option<Transaction>, PoolError> {
    fetch_transaction_by(client, "payment_intent_ref", payment_intent).await
}

pub async fn fetch_transaction_by_invoice(
    client: &impl GenericClient,
    invoice: &str,
) -> Result<Option<Transaction>, PoolError> {
    fetch_transaction_by(client, "invoice_ref", invoice).await
}

pub async fn fetch_transaction_by_reference(
    client: &impl GenericClient,
    reference_type: &str,
    reference_id: &str,
) -> Result<Option<Transaction>, PoolError> {
    let statement = client
        .prepare_cached(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE reference_type = $1 AND reference_id = $2 ORDER BY transaction_id LIMIT 1"
        ))
        .await?;

    let row = client
        .query_opt(&statement, &[&reference_type, &reference_id])
        .await?;

    Ok(row.as_ref().map(Transaction::from))
}

/// Newest first.
pub async fn list_transactions(
    client: &impl GenericClient,
    organization: OrganizationId,
    filter: &TransactionFilter,
    limit: i64,
    offset: i64,
) -> Result<Vec<Transaction>, PoolError> {
    let statement = client
        .prepare_cached(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE organization_id = $1 AND ($2::TEXT IS NULL OR type = $2) AND ($3::TEXT IS NULL OR status = $3) ORDER BY processed_at DESC, transaction_id DESC LIMIT $4 OFFSET $5"
        ))
        .await?;

    let rows = client
        .query(
            &statement,
            &[&organization, &filter.kind, &filter.status, &limit, &offset],
        )
        .await?;

    Ok(rows.iter().map(Transaction::from).collect())
}

pub async fn update_transaction(
    client: &impl GenericClient,
    transaction: &Transaction,
) -> Result<(), PoolError> {
    let statement = client
        .prepare_cached(
            "UPDATE transactions SET balance_before = $2, balance_after = $3, charge_ref = $4, status = $5, processed_at = $6, metadata = $7 WHERE transaction_id = $1",
        )
        .await?;

    client
        .execute(
            &statement,
            &[
                &transaction.id,
                &transaction.balance_before,
                &transaction.balance_after,
                &transaction.charge_ref,
                &transaction.status,
                &transaction.processed_at,
                &transaction.metadata,
            ],
        )
        .await?;

    Ok(())
}

pub async fn insert_payment_method(
    client: &impl GenericClient,
    method: &PaymentMethod,
) -> Result<PaymentMethod, PoolError> {
    let statement = client
        .prepare_cached(&format!(
            "INSERT INTO payment_methods (organization_id, billing_account_id, provider_ref, type, card_brand, card_last4, card_exp_month, card_exp_year, nickname, is_default, is_active, provider_details, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) RETURNING {PAYMENT_METHOD_COLUMNS}"
        ))
        .await?;

    let row = client
        .query_one(
            &statement,
            &[
                &method.organization_id,
                &method.billing_account_id,
                &method.provider_ref,
                &method.kind,
                &method.card_brand,
                &method.card_last4,
                &method.card_exp_month,
                &method.card_exp_year,
                &method.nickname,
                &method.is_default,
                &method.is_active,
                &method.provider_details,
                &method.created_at,
                &method.updated_at,
            ],
        )
        .await?;

    Ok(PaymentMethod::from(&row))
}

pub async fn fetch_payment_method(
    client: &impl GenericClient,
    id: PaymentMethodId,
    for_update: bool,
) -> Result<Option<PaymentMethod>, PoolError> {
    let statement = client
        .prepare_cached(&format!(
            "SELECT {PAYMENT_METHOD_COLUMNS} FROM payment_methods WHERE payment_method_id = $1{}",
            lock_clause(for_update)
        ))
        .await?;

    let row = client.query_opt(&statement, &[&id]).await?;

    Ok(row.as_ref().map(PaymentMethod::from))
}

/// Active methods only.
pub async fn list_payment_methods(
    client: &impl GenericClient,
    organization: OrganizationId,
) -> Result<Vec<PaymentMethod>, PoolError> {
    let statement = client
        .prepare_cached(&format!(
            "SELECT {PAYMENT_METHOD_COLUMNS} FROM payment_methods WHERE organization_id = $1 AND is_active ORDER BY payment_method_id"
        ))
        .await?;

    let rows = client.query(&statement, &[&organization]).await?;

    Ok(rows.iter().map(PaymentMethod::from).collect())
}

pub async fn update_payment_method(
    client: &impl GenericClient,
    method: &PaymentMethod,
) -> Result<(), PoolError> {
    let statement = client
        .prepare_cached(
            "UPDATE payment_methods SET nickname = $2, is_default = $3, is_active = $4, updated_at = $5 WHERE payment_method_id = $1",
        )
        .await?;

    client
        .execute(
            &statement,
            &[
                &method.id,
                &method.nickname,
                &method.is_default,
                &method.is_active,
                &method.updated_at,
            ],
        )
        .await?;

    Ok(())
}

/// Makes `id` the only default method of `organization` and points the
/// billing account to it.
pub async fn set_default_payment_method(
    client: &impl GenericClient,
    organization: OrganizationId,
    id: PaymentMethodId,
    now: DateTime<Utc>,
) -> Result<(), PoolError> {
    let clear = client
        .prepare_cached(
            "UPDATE payment_methods SET is_default = (payment_method_id = $2), updated_at = $3 WHERE organization_id = $1 AND is_default <> (payment_method_id = $2)",
        )
        .await?;
    client.execute(&clear, &[&organization, &id, &now]).await?;

    let account = client
        .prepare_cached(
            "UPDATE billing_accounts SET default_payment_method_id = $2, updated_at = $3 WHERE organization_id = $1",
        )
        .await?;
    client
        .execute(&account, &[&organization, &Some(id), &now])
        .await?;

    Ok(())
}

pub async fn fetch_webhook_event(
    client: &impl GenericClient,
    external_id: &str,
) -> Result<Option<WebhookEvent>, PoolError> {
    let statement = client
        .prepare_cached(&format!(
            "SELECT {WEBHOOK_EVENT_COLUMNS} FROM webhook_events WHERE external_event_id = $1"
        ))
        .await?;

    let row = client.query_opt(&statement, &[&external_id]).await?;

    Ok(row.as_ref().map(WebhookEvent::from))
}

/// Returns `None` when the external event id is already stored.
pub async fn insert_webhook_event(
    client: &impl GenericClient,
    external_id: &str,
    event_type: &str,
    payload: &Value,
    now: DateTime<Utc>,
) -> Result<Option<WebhookEvent>, PoolError> {
    let statement = client
        .prepare_cached(&format!(
            "INSERT INTO webhook_events (external_event_id, event_type, status, payload, retry_count, created_at) VALUES ($1, $2, $3, $4, 0, $5) ON CONFLICT (external_event_id) DO NOTHING RETURNING {WEBHOOK_EVENT_COLUMNS}"
        ))
        .await?;

    let row = client
        .query_opt(
            &statement,
            &[
                &external_id,
                &event_type,
                &WebhookEventStatus::Pending,
                payload,
                &now,
            ],
        )
        .await?;

    Ok(row.as_ref().map(WebhookEvent::from))
}

pub async fn update_webhook_event(
    client: &impl GenericClient,
    event: &WebhookEvent,
) -> Result<(), PoolError> {
    let statement = client
        .prepare_cached(
            "UPDATE webhook_events SET status = $2, organization_id = $3, transaction_id = $4, error_message = $5, retry_count = $6, processed_at = $7 WHERE external_event_id = $1",
        )
        .await?;

    client
        .execute(
            &statement,
            &[
                &event.external_event_id,
                &event.status,
                &event.organization_id,
                &event.transaction_id,
                &event.error_message,
                &event.retry_count,
                &event.processed_at,
            ],
        )
        .await?;

    Ok(())
}
