//! `/users`, `/profiles` and `/organizations` routes.

use std::sync::Arc;

use axum::{
    extract::{Path, Query},
    http::StatusCode,
    Extension, Json,
};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use adapter::PaymentsGateway;
use primitives::{
    api::Pagination,
    organization::{NewOrganization, UpdateOrganization},
    profile::{RoleInfo, UpdateProfile, UpsertProfile},
    Affiliate, Association, AssociationStatus, Campaign, Organization, OrganizationId, Profile,
};

use crate::{
    response::ResponseError,
    services::{association, catalog, identity, visibility},
    Actor, Application,
};

/// `GET /users/me`
pub async fn me<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
) -> Result<Json<Profile>, ResponseError> {
    Ok(Json(identity::me(app.store.as_ref(), &actor).await?))
}

/// `GET /users/me/role`
pub async fn my_role(Extension(actor): Extension<Actor>) -> Json<RoleInfo> {
    Json(identity::role(&actor))
}

pub async fn create_profile<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
    Json(new): Json<UpsertProfile>,
) -> Result<(StatusCode, Json<Profile>), ResponseError> {
    let profile = identity::create_profile(app.store.as_ref(), &actor, new, Utc::now()).await?;

    Ok((StatusCode::CREATED, Json(profile)))
}

pub async fn upsert_profile<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
    Json(upsert): Json<UpsertProfile>,
) -> Result<Json<Profile>, ResponseError> {
    let profile = identity::upsert_profile(app.store.as_ref(), &actor, upsert, Utc::now()).await?;

    Ok(Json(profile))
}

pub async fn update_profile<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
    Json(update): Json<UpdateProfile>,
) -> Result<Json<Profile>, ResponseError> {
    let profile =
        identity::update_profile(app.store.as_ref(), &actor, id, update, Utc::now()).await?;

    Ok(Json(profile))
}

pub async fn delete_profile<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ResponseError> {
    identity::delete_profile(app.store.as_ref(), &actor, id).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// `POST /organizations`
///
/// A caller without an organization is attached to the new one.
pub async fn create_organization<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
    Json(new): Json<NewOrganization>,
) -> Result<(StatusCode, Json<Organization>), ResponseError> {
    let organization =
        identity::create_organization(app.store.as_ref(), &actor, new, Utc::now()).await?;

    Ok((StatusCode::CREATED, Json(organization)))
}

pub async fn organizations<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
    Query(pagination): Query<Pagination>,
) -> Result<Json<Vec<Organization>>, ResponseError> {
    let organizations = identity::organizations(app.store.as_ref(), &actor, pagination).await?;

    Ok(Json(organizations))
}

pub async fn organization<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<OrganizationId>,
) -> Result<Json<Organization>, ResponseError> {
    let organization = identity::organization(app.store.as_ref(), &actor, id, Utc::now()).await?;

    Ok(Json(organization))
}

pub async fn update_organization<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<OrganizationId>,
    Json(update): Json<UpdateOrganization>,
) -> Result<Json<Organization>, ResponseError> {
    let organization =
        identity::update_organization(app.store.as_ref(), &actor, id, update, Utc::now()).await?;

    Ok(Json(organization))
}

pub async fn delete_organization<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<OrganizationId>,
) -> Result<StatusCode, ResponseError> {
    identity::delete_organization(app.store.as_ref(), &actor, id).await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn organization_affiliates<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<OrganizationId>,
) -> Result<Json<Vec<Affiliate>>, ResponseError> {
    let affiliates =
        catalog::organization_affiliates(app.store.as_ref(), &actor, id, Utc::now()).await?;

    Ok(Json(affiliates))
}

pub async fn organization_campaigns<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<OrganizationId>,
) -> Result<Json<Vec<Campaign>>, ResponseError> {
    let campaigns =
        catalog::organization_campaigns(app.store.as_ref(), &actor, id, Utc::now()).await?;

    Ok(Json(campaigns))
}

/// `?status=`
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct StatusQuery {
    #[serde(default)]
    pub status: Option<AssociationStatus>,
}

pub async fn organization_associations<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<OrganizationId>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<Vec<Association>>, ResponseError> {
    let associations = association::list_for_organization(
        app.store.as_ref(),
        &actor,
        id,
        query.status,
        Utc::now(),
    )
    .await?;

    Ok(Json(associations))
}

/// `?affiliate_org_id=` narrows the advertiser's view to one association.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct VisibleAffiliatesQuery {
    #[serde(default)]
    pub affiliate_org_id: Option<OrganizationId>,
}

pub async fn visible_affiliates<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<OrganizationId>,
    Query(query): Query<VisibleAffiliatesQuery>,
) -> Result<Json<Vec<Affiliate>>, ResponseError> {
    let affiliates = visibility::visible_affiliates(
        app.store.as_ref(),
        &actor,
        id,
        query.affiliate_org_id,
        Utc::now(),
    )
    .await?;

    Ok(Json(affiliates))
}

/// `?advertiser_org_id=` narrows the affiliate's view to one association.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct VisibleCampaignsQuery {
    #[serde(default)]
    pub advertiser_org_id: Option<OrganizationId>,
}

pub async fn visible_campaigns<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<OrganizationId>,
    Query(query): Query<VisibleCampaignsQuery>,
) -> Result<Json<Vec<Campaign>>, ResponseError> {
    let campaigns = visibility::visible_campaigns(
        app.store.as_ref(),
        &actor,
        id,
        query.advertiser_org_id,
        Utc::now(),
    )
    .await?;

    Ok(Json(campaigns))
}
