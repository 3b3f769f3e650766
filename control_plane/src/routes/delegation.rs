//! `/agency-delegations` routes.

use std::sync::Arc;

use axum::{
    extract::{Path, Query},
    http::StatusCode,
    Extension, Json,
};
use chrono::Utc;

use adapter::PaymentsGateway;
use primitives::{
    delegation::{
        CheckPermissions, DelegationAction, NewDelegation, PermissionCheck, UpdateExpiration,
        UpdatePermissions,
    },
    Delegation, DelegationId, OrganizationId, Permission,
};

use crate::{
    response::ResponseError,
    services::delegation::{self, DelegationQuery},
    Actor, Application,
};

pub async fn create<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
    Json(new): Json<NewDelegation>,
) -> Result<(StatusCode, Json<Delegation>), ResponseError> {
    let delegation = delegation::create(app.store.as_ref(), &actor, new, Utc::now()).await?;

    Ok((StatusCode::CREATED, Json(delegation)))
}

pub async fn list<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
    Query(query): Query<DelegationQuery>,
) -> Result<Json<Vec<Delegation>>, ResponseError> {
    Ok(Json(
        delegation::list(app.store.as_ref(), &actor, query).await?,
    ))
}

pub async fn get<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<DelegationId>,
) -> Result<Json<Delegation>, ResponseError> {
    Ok(Json(delegation::get(app.store.as_ref(), &actor, id).await?))
}

async fn transition<G: PaymentsGateway>(
    app: &Application<G>,
    actor: &Actor,
    id: DelegationId,
    action: DelegationAction,
) -> Result<Json<Delegation>, ResponseError> {
    let delegation =
        delegation::transition(app.store.as_ref(), actor, id, action, Utc::now()).await?;

    Ok(Json(delegation))
}

pub async fn accept<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<DelegationId>,
) -> Result<Json<Delegation>, ResponseError> {
    transition(&app, &actor, id, DelegationAction::Accept).await
}

pub async fn reject<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<DelegationId>,
) -> Result<Json<Delegation>, ResponseError> {
    transition(&app, &actor, id, DelegationAction::Reject).await
}

pub async fn suspend<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<DelegationId>,
) -> Result<Json<Delegation>, ResponseError> {
    transition(&app, &actor, id, DelegationAction::Suspend).await
}

pub async fn reactivate<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<DelegationId>,
) -> Result<Json<Delegation>, ResponseError> {
    transition(&app, &actor, id, DelegationAction::Reactivate).await
}

pub async fn revoke<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<DelegationId>,
) -> Result<Json<Delegation>, ResponseError> {
    transition(&app, &actor, id, DelegationAction::Revoke).await
}

pub async fn update_permissions<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<DelegationId>,
    Json(update): Json<UpdatePermissions>,
) -> Result<Json<Delegation>, ResponseError> {
    let delegation =
        delegation::update_permissions(app.store.as_ref(), &actor, id, update, Utc::now())
            .await?;

    Ok(Json(delegation))
}

pub async fn update_expiration<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<DelegationId>,
    Json(update): Json<UpdateExpiration>,
) -> Result<Json<Delegation>, ResponseError> {
    let delegation =
        delegation::update_expiration(app.store.as_ref(), &actor, id, update, Utc::now())
            .await?;

    Ok(Json(delegation))
}

/// `POST /agency-delegations/check-permissions`
pub async fn check_permissions<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
    Json(check): Json<CheckPermissions>,
) -> Result<Json<PermissionCheck>, ResponseError> {
    let result = delegation::check_permissions(
        app.store.as_ref(),
        &actor,
        check.agency_org_id,
        check.advertiser_org_id,
        &check.permissions,
        Utc::now(),
    )
    .await?;

    Ok(Json(result))
}

/// The permission vocabulary.
pub async fn permissions() -> Json<Vec<Permission>> {
    Json(delegation::permissions())
}

pub async fn active_for_agency<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
    Path(agency): Path<OrganizationId>,
) -> Result<Json<Vec<Delegation>>, ResponseError> {
    let delegations =
        delegation::active_for_agency(app.store.as_ref(), &actor, agency, Utc::now()).await?;

    Ok(Json(delegations))
}

pub async fn active_for_advertiser<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
    Path(advertiser): Path<OrganizationId>,
) -> Result<Json<Vec<Delegation>>, ResponseError> {
    let delegations =
        delegation::active_for_advertiser(app.store.as_ref(), &actor, advertiser, Utc::now())
            .await?;

    Ok(Json(delegations))
}
