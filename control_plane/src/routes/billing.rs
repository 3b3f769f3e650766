//! `/billing` routes.
//!
//! Every route acts on the caller's organization unless an
//! `?organization_id=` is given, which admins and delegated agencies use
//! to reach the account of another organization.

use std::sync::Arc;

use axum::{
    extract::{Path, Query},
    http::StatusCode,
    Extension, Json,
};
use chrono::Utc;
use serde::Deserialize;

use adapter::PaymentsGateway;
use primitives::{
    api::Pagination,
    billing::{AddPaymentMethod, Recharge, SetCreditLimit, UpdateBillingConfig},
    usage::{RunUsage, UsageRunReport},
    BillingAccount, OrganizationId, PaymentMethod, PaymentMethodId, Permission, Transaction,
    UsageRecord, UsageRecordId,
};

use crate::{
    error::Error,
    response::ResponseError,
    services::{authz, ledger::BillingDashboard},
    store::TransactionFilter,
    Actor, Application,
};

/// `?organization_id=`
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct OrganizationQuery {
    #[serde(default)]
    pub organization_id: Option<OrganizationId>,
}

/// The organization the request acts on, once the actor is allowed to.
async fn billing_organization<G: PaymentsGateway>(
    app: &Application<G>,
    actor: &Actor,
    query: OrganizationQuery,
    permission: Permission,
) -> Result<OrganizationId, Error> {
    let organization = match query.organization_id {
        Some(organization) => organization,
        None => actor.organization()?,
    };

    authz::authorize(
        app.store.as_ref(),
        actor,
        organization,
        Some(permission),
        Utc::now(),
    )
    .await?;

    Ok(organization)
}

pub async fn dashboard<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
    Query(query): Query<OrganizationQuery>,
) -> Result<Json<BillingDashboard>, ResponseError> {
    let organization = billing_organization(&app, &actor, query, Permission::BillingView).await?;

    Ok(Json(app.ledger.dashboard(organization, Utc::now()).await?))
}

pub async fn update_config<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
    Query(query): Query<OrganizationQuery>,
    Json(update): Json<UpdateBillingConfig>,
) -> Result<Json<BillingAccount>, ResponseError> {
    let organization =
        billing_organization(&app, &actor, query, Permission::BillingManage).await?;

    let account = app
        .ledger
        .update_config(organization, update, Utc::now())
        .await?;

    Ok(Json(account))
}

/// `PUT /billing/credit-limit?organization_id=`, admins only.
pub async fn set_credit_limit<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
    Query(query): Query<OrganizationQuery>,
    Json(body): Json<SetCreditLimit>,
) -> Result<Json<BillingAccount>, ResponseError> {
    let organization =
        billing_organization(&app, &actor, query, Permission::BillingManage).await?;

    let account = app
        .ledger
        .set_credit_limit(organization, body, Utc::now())
        .await?;

    Ok(Json(account))
}

pub async fn payment_methods<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
    Query(query): Query<OrganizationQuery>,
) -> Result<Json<Vec<PaymentMethod>>, ResponseError> {
    let organization = billing_organization(&app, &actor, query, Permission::BillingView).await?;

    Ok(Json(app.ledger.payment_methods(organization).await?))
}

pub async fn add_payment_method<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
    Query(query): Query<OrganizationQuery>,
    Json(body): Json<AddPaymentMethod>,
) -> Result<(StatusCode, Json<PaymentMethod>), ResponseError> {
    let organization =
        billing_organization(&app, &actor, query, Permission::BillingManage).await?;

    let method = app
        .ledger
        .add_payment_method(organization, body, Utc::now())
        .await?;

    Ok((StatusCode::CREATED, Json(method)))
}

pub async fn remove_payment_method<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<PaymentMethodId>,
    Query(query): Query<OrganizationQuery>,
) -> Result<StatusCode, ResponseError> {
    let organization =
        billing_organization(&app, &actor, query, Permission::BillingManage).await?;

    app.ledger
        .remove_payment_method(organization, id, Utc::now())
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn set_default_payment_method<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<PaymentMethodId>,
    Query(query): Query<OrganizationQuery>,
) -> Result<Json<PaymentMethod>, ResponseError> {
    let organization =
        billing_organization(&app, &actor, query, Permission::BillingManage).await?;

    let method = app
        .ledger
        .set_default_payment_method(organization, id, Utc::now())
        .await?;

    Ok(Json(method))
}

/// `POST /billing/recharge`
///
/// Responds with the recharge transaction, `pending` until the provider
/// confirms the payment unless the charge succeeded right away.
pub async fn recharge<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
    Query(query): Query<OrganizationQuery>,
    Json(body): Json<Recharge>,
) -> Result<Json<Transaction>, ResponseError> {
    let organization =
        billing_organization(&app, &actor, query, Permission::BillingManage).await?;

    Ok(Json(app.ledger.recharge(organization, body, Utc::now()).await?))
}

/// `GET /billing/transactions?type=&status=&page=&limit=`, newest first.
pub async fn transactions<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
    Query(query): Query<OrganizationQuery>,
    Query(filter): Query<TransactionFilter>,
    Query(pagination): Query<Pagination>,
) -> Result<Json<Vec<Transaction>>, ResponseError> {
    let organization = billing_organization(&app, &actor, query, Permission::BillingView).await?;

    let transactions = app
        .ledger
        .transactions(organization, &filter, pagination)
        .await?;

    Ok(Json(transactions))
}

pub async fn usage_records<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
    Query(query): Query<OrganizationQuery>,
    Query(pagination): Query<Pagination>,
) -> Result<Json<Vec<UsageRecord>>, ResponseError> {
    let organization = billing_organization(&app, &actor, query, Permission::BillingView).await?;

    Ok(Json(app.usage.records(organization, pagination).await?))
}

/// `POST /billing/usage/run`, rolls up `date` outside the daily schedule.
pub async fn run_usage<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Json(body): Json<RunUsage>,
) -> Result<Json<UsageRunReport>, ResponseError> {
    let report = app
        .usage
        .run(body.date, body.organization_id, Utc::now())
        .await?;

    Ok(Json(report))
}

/// `POST /billing/usage/:id/payout?organization_id=`
pub async fn process_affiliate_payout<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<UsageRecordId>,
    Query(query): Query<OrganizationQuery>,
) -> Result<Json<UsageRecord>, ResponseError> {
    let organization =
        billing_organization(&app, &actor, query, Permission::BillingManage).await?;

    let record = app
        .usage
        .process_affiliate_payout(organization, id, Utc::now())
        .await?;

    Ok(Json(record))
}
