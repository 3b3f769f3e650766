//! What one side of the association graph may see of the other.
//!
//! Only active associations contribute; the union is taken over all of the
//! viewer's associations, or over the one with `counterparty` when given.

use chrono::{DateTime, Utc};

use primitives::{
    association::{resolve_visible_affiliates, resolve_visible_campaigns},
    Affiliate, AssociationStatus, Campaign, OrganizationId, Permission,
};

use crate::{
    error::Error,
    services::authz,
    store::{AssociationFilter, Store},
    Actor,
};

/// Affiliates the advertiser organization may see.
pub async fn affiliates_visible_to(
    store: &dyn Store,
    advertiser: OrganizationId,
    counterparty: Option<OrganizationId>,
) -> Result<Vec<Affiliate>, Error> {
    let associations = store
        .associations(AssociationFilter {
            advertiser_org_id: Some(advertiser),
            affiliate_org_id: counterparty,
            status: Some(AssociationStatus::Active),
            ..AssociationFilter::default()
        })
        .await?;

    let mut affiliates = vec![];
    for association in &associations {
        affiliates.extend(store.affiliates(Some(association.affiliate_org_id)).await?);
    }

    Ok(resolve_visible_affiliates(&associations, &affiliates)
        .into_iter()
        .cloned()
        .collect())
}

/// Campaigns the affiliate organization may see.
pub async fn campaigns_visible_to(
    store: &dyn Store,
    affiliate: OrganizationId,
    counterparty: Option<OrganizationId>,
) -> Result<Vec<Campaign>, Error> {
    let associations = store
        .associations(AssociationFilter {
            advertiser_org_id: counterparty,
            affiliate_org_id: Some(affiliate),
            status: Some(AssociationStatus::Active),
            ..AssociationFilter::default()
        })
        .await?;

    let mut campaigns = vec![];
    for association in &associations {
        campaigns.extend(store.campaigns(Some(association.advertiser_org_id)).await?);
    }

    Ok(resolve_visible_campaigns(&associations, &campaigns)
        .into_iter()
        .cloned()
        .collect())
}

/// `GET /organizations/:id/visible-affiliates`
pub async fn visible_affiliates(
    store: &dyn Store,
    actor: &Actor,
    advertiser: OrganizationId,
    counterparty: Option<OrganizationId>,
    now: DateTime<Utc>,
) -> Result<Vec<Affiliate>, Error> {
    authz::authorize_read(
        store,
        actor,
        advertiser,
        Some(Permission::AssociationView),
        "Organization",
        now,
    )
    .await?;

    affiliates_visible_to(store, advertiser, counterparty).await
}

/// `GET /organizations/:id/visible-campaigns`
pub async fn visible_campaigns(
    store: &dyn Store,
    actor: &Actor,
    affiliate: OrganizationId,
    counterparty: Option<OrganizationId>,
    now: DateTime<Utc>,
) -> Result<Vec<Campaign>, Error> {
    authz::authorize_read(store, actor, affiliate, None, "Organization", now).await?;

    campaigns_visible_to(store, affiliate, counterparty).await
}
