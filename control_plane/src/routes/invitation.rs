//! `/advertiser-association-invitations` routes.

use std::sync::Arc;

use axum::{
    extract::{Path, Query},
    http::StatusCode,
    Extension, Json,
};
use chrono::Utc;

use adapter::PaymentsGateway;
use primitives::{
    api::LinkResponse,
    invitation::{NewInvitation, UpdateInvitation, UsageLogEntry, UseInvitation, UseInvitationResponse},
    Invitation, InvitationId,
};

use crate::{
    response::ResponseError,
    services::invitation::{self, InvitationQuery},
    Actor, Application, RequestOrigin,
};

pub async fn create<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
    Json(new): Json<NewInvitation>,
) -> Result<(StatusCode, Json<Invitation>), ResponseError> {
    let invitation = invitation::create(app.store.as_ref(), &actor, new, Utc::now()).await?;

    Ok((StatusCode::CREATED, Json(invitation)))
}

pub async fn list<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
    Query(query): Query<InvitationQuery>,
) -> Result<Json<Vec<Invitation>>, ResponseError> {
    let invitations = invitation::list(app.store.as_ref(), &actor, query, Utc::now()).await?;

    Ok(Json(invitations))
}

pub async fn get<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<InvitationId>,
) -> Result<Json<Invitation>, ResponseError> {
    let invitation = invitation::get(app.store.as_ref(), &actor, id, Utc::now()).await?;

    Ok(Json(invitation))
}

pub async fn update<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<InvitationId>,
    Json(update): Json<UpdateInvitation>,
) -> Result<Json<Invitation>, ResponseError> {
    let invitation =
        invitation::update(app.store.as_ref(), &actor, id, update, Utc::now()).await?;

    Ok(Json(invitation))
}

pub async fn delete<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<InvitationId>,
) -> Result<StatusCode, ResponseError> {
    invitation::delete(app.store.as_ref(), &actor, id, Utc::now()).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// `POST /advertiser-association-invitations/use`
///
/// The origin of the request is recorded in the usage log with the attempt.
pub async fn use_invitation<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
    Extension(origin): Extension<RequestOrigin>,
    Json(body): Json<UseInvitation>,
) -> Result<Json<UseInvitationResponse>, ResponseError> {
    let response =
        invitation::use_invitation(app.store.as_ref(), &actor, &origin, body, Utc::now()).await?;

    Ok(Json(response))
}

pub async fn usage_history<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<InvitationId>,
) -> Result<Json<Vec<UsageLogEntry>>, ResponseError> {
    let history = invitation::usage_history(app.store.as_ref(), &actor, id, Utc::now()).await?;

    Ok(Json(history))
}

/// `GET /advertiser-association-invitations/:id/link`
pub async fn link<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<InvitationId>,
) -> Result<Json<LinkResponse>, ResponseError> {
    let link = invitation::link(
        app.store.as_ref(),
        &actor,
        id,
        &app.config.public_base_url,
        Utc::now(),
    )
    .await?;

    Ok(Json(LinkResponse {
        link: link.to_string(),
    }))
}
