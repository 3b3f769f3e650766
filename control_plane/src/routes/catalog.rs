//! `/campaigns` and `/affiliates` routes.

use std::sync::Arc;

use axum::{extract::Path, http::StatusCode, Extension, Json};
use chrono::Utc;

use adapter::PaymentsGateway;
use primitives::{
    affiliate::{NewAffiliate, UpdateAffiliate},
    campaign::{NewCampaign, UpdateCampaign},
    Affiliate, AffiliateId, Campaign, CampaignId,
};

use crate::{response::ResponseError, services::catalog, Actor, Application};

pub async fn create_campaign<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
    Json(new): Json<NewCampaign>,
) -> Result<(StatusCode, Json<Campaign>), ResponseError> {
    let campaign = catalog::create_campaign(app.store.as_ref(), &actor, new, Utc::now()).await?;

    Ok((StatusCode::CREATED, Json(campaign)))
}

/// Every campaign for admins, the campaigns of the caller's organization
/// otherwise.
pub async fn campaigns<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
) -> Result<Json<Vec<Campaign>>, ResponseError> {
    Ok(Json(catalog::campaigns(app.store.as_ref(), &actor).await?))
}

pub async fn campaign<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<CampaignId>,
) -> Result<Json<Campaign>, ResponseError> {
    let campaign = catalog::campaign(app.store.as_ref(), &actor, id, Utc::now()).await?;

    Ok(Json(campaign))
}

pub async fn update_campaign<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<CampaignId>,
    Json(update): Json<UpdateCampaign>,
) -> Result<Json<Campaign>, ResponseError> {
    let campaign =
        catalog::update_campaign(app.store.as_ref(), &actor, id, update, Utc::now()).await?;

    Ok(Json(campaign))
}

pub async fn delete_campaign<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<CampaignId>,
) -> Result<StatusCode, ResponseError> {
    catalog::delete_campaign(app.store.as_ref(), &actor, id, Utc::now()).await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn create_affiliate<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
    Json(new): Json<NewAffiliate>,
) -> Result<(StatusCode, Json<Affiliate>), ResponseError> {
    let affiliate = catalog::create_affiliate(app.store.as_ref(), &actor, new, Utc::now()).await?;

    Ok((StatusCode::CREATED, Json(affiliate)))
}

pub async fn affiliates<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
) -> Result<Json<Vec<Affiliate>>, ResponseError> {
    Ok(Json(catalog::affiliates(app.store.as_ref(), &actor).await?))
}

pub async fn affiliate<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<AffiliateId>,
) -> Result<Json<Affiliate>, ResponseError> {
    let affiliate = catalog::affiliate(app.store.as_ref(), &actor, id, Utc::now()).await?;

    Ok(Json(affiliate))
}

pub async fn update_affiliate<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<AffiliateId>,
    Json(update): Json<UpdateAffiliate>,
) -> Result<Json<Affiliate>, ResponseError> {
    let affiliate =
        catalog::update_affiliate(app.store.as_ref(), &actor, id, update, Utc::now()).await?;

    Ok(Json(affiliate))
}

pub async fn delete_affiliate<G: PaymentsGateway>(
    Extension(app): Extension<Arc<Application<G>>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<AffiliateId>,
) -> Result<StatusCode, ResponseError> {
    catalog::delete_affiliate(app.store.as_ref(), &actor, id, Utc::now()).await?;

    Ok(StatusCode::NO_CONTENT)
}
