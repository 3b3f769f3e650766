//! `/organization-associations` routes.

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
    association::{AssociationAction, NewAssociation, UpdateVisibility},
    Association, AssociationId, CreationPath, OrganizationId,
};

use crate::{
    response::ResponseError,
    services::association::{self, AssociationQuery},
    Actor, Application,
};

async fn create<G: PaymentsGateway>(
    app: &Application<G>,
    actor: &Actor,
    new: NewAssociation,
    path: CreationPath,
) -> Result<(StatusCode, Json<Association>), ResponseError> {
    let association =
        association::create(app.store.as_ref(), actor, new, path, Utc::now()).await?;

    Ok((StatusCode::CREATED, Json(association)))
}

/// `POST /organization-associations/invitations`, the advertiser invites an
/// affiliate organization.
pub async fn invite<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
    Json(new): Json<NewAssociation>,
) -> Result<(StatusCode, Json<Association>), ResponseError> {
    create(&app, &actor, new, CreationPath::Invitation).await
}

/// `POST /organization-associations/requests`, the affiliate asks an
/// advertiser.
pub async fn request<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
    Json(new): Json<NewAssociation>,
) -> Result<(StatusCode, Json<Association>), ResponseError> {
    create(&app, &actor, new, CreationPath::Request).await
}

pub async fn list<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
    Query(query): Query<AssociationQuery>,
) -> Result<Json<Vec<Association>>, ResponseError> {
    Ok(Json(
        association::list(app.store.as_ref(), &actor, query).await?,
    ))
}

pub async fn get<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<AssociationId>,
) -> Result<Json<Association>, ResponseError> {
    let association = association::get(app.store.as_ref(), &actor, id, Utc::now()).await?;

    Ok(Json(association))
}

/// `?advertiser_org_id=&affiliate_org_id=`
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PairQuery {
    pub advertiser_org_id: OrganizationId,
    pub affiliate_org_id: OrganizationId,
}

pub async fn by_pair<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
    Query(pair): Query<PairQuery>,
) -> Result<Json<Association>, ResponseError> {
    let association = association::by_pair(
        app.store.as_ref(),
        &actor,
        pair.advertiser_org_id,
        pair.affiliate_org_id,
        Utc::now(),
    )
    .await?;

    Ok(Json(association))
}

async fn transition<G: PaymentsGateway>(
    app: &Application<G>,
    actor: &Actor,
    id: AssociationId,
    action: AssociationAction,
) -> Result<Json<Association>, ResponseError> {
    let association =
        association::transition(app.store.as_ref(), actor, id, action, Utc::now()).await?;

    Ok(Json(association))
}

pub async fn approve<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<AssociationId>,
) -> Result<Json<Association>, ResponseError> {
    transition(&app, &actor, id, AssociationAction::Approve).await
}

pub async fn reject<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<AssociationId>,
) -> Result<Json<Association>, ResponseError> {
    transition(&app, &actor, id, AssociationAction::Reject).await
}

pub async fn suspend<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<AssociationId>,
) -> Result<Json<Association>, ResponseError> {
    transition(&app, &actor, id, AssociationAction::Suspend).await
}

pub async fn reactivate<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<AssociationId>,
) -> Result<Json<Association>, ResponseError> {
    transition(&app, &actor, id, AssociationAction::Reactivate).await
}

/// `PUT /organization-associations/:id/visibility`
pub async fn update_visibility<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<AssociationId>,
    Json(update): Json<UpdateVisibility>,
) -> Result<Json<Association>, ResponseError> {
    let association =
        association::update_visibility(app.store.as_ref(), &actor, id, update, Utc::now())
            .await?;

    Ok(Json(association))
}
