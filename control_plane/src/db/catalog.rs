use chrono::{DateTime, Utc};
use primitives::{
    affiliate::NewAffiliate, campaign::NewCampaign, Affiliate, AffiliateId, Campaign, CampaignId,
    OrganizationId,
};

use super::{lock_clause, GenericClient, PoolError};

static CAMPAIGN_COLUMNS: &str = "campaign_id, organization_id, name, description, status, fixed_revenue, fixed_click_amount, fixed_conversion_amount, percentage_conversion_amount, created_at, updated_at";

static AFFILIATE_COLUMNS: &str =
    "affiliate_id, organization_id, name, contact_email, status, created_at, updated_at";

pub async fn insert_campaign(
    client: &impl GenericClient,
    new: NewCampaign,
    now: DateTime<Utc>,
) -> Result<Campaign, PoolError> {
    // the id is assigned by the sequence, the rest by the domain
    let campaign = new.into_campaign(CampaignId(0), now);

    let statement = client
        .prepare_cached(&format!(
            "INSERT INTO campaigns (organization_id, name, description, status, fixed_revenue, fixed_click_amount, fixed_conversion_amount, percentage_conversion_amount, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9) RETURNING {CAMPAIGN_COLUMNS}"
        ))
        .await?;

    let pricing = &campaign.pricing;
    let row = client
        .query_one(
            &statement,
            &[
                &campaign.organization_id,
                &campaign.name,
                &campaign.description,
                &campaign.status,
                &pricing.fixed_revenue,
                &pricing.fixed_click_amount,
                &pricing.fixed_conversion_amount,
                &pricing.percentage_conversion_amount,
                &campaign.created_at,
            ],
        )
        .await?;

    Ok(Campaign::from(&row))
}

/// ```text
/// SELECT campaign_id, organization_id, name, description, status, fixed_revenue, fixed_click_amount,
/// fixed_conversion_amount, percentage_conversion_amount, created_at, updated_at FROM campaigns
/// WHERE campaign_id = $1
/// ```
pub async fn fetch_campaign(
    client: &impl GenericClient,
    id: CampaignId,
    for_update: bool,
) -> Result<Option<Campaign>, PoolError> {
    let statement = client
        .prepare_cached(&format!(
            "SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE campaign_id = $1{}",
            lock_clause(for_update)
        ))
        .await?;

    let row = client.query_opt(&statement, &[&id]).await?;

    Ok(row.as_ref().map(Campaign::from))
}

/// Every campaign of `organization`, or every campaign when it is `None`.
pub async fn list_campaigns(
    client: &impl GenericClient,
    organization: Option<OrganizationId>,
) -> Result<Vec<Campaign>, PoolError> {
    let statement = client
        .prepare_cached(&format!(
            "SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE ($1::BIGINT IS NULL OR organization_id = $1) ORDER BY campaign_id"
        ))
        .await?;

    let rows = client.query(&statement, &[&organization]).await?;

    Ok(rows.iter().map(Campaign::from).collect())
}

pub async fn update_campaign(client: &impl GenericClient, campaign: &Campaign) -> Result<(), PoolError> {
    let statement = client
        .prepare_cached(
            "UPDATE campaigns SET name = $2, description = $3, status = $4, fixed_revenue = $5, fixed_click_amount = $6, fixed_conversion_amount = $7, percentage_conversion_amount = $8, updated_at = $9 WHERE campaign_id = $1",
        )
        .await?;

    let pricing = &campaign.pricing;
    client
        .execute(
            &statement,
            &[
                &campaign.id,
                &campaign.name,
                &campaign.description,
                &campaign.status,
                &pricing.fixed_revenue,
                &pricing.fixed_click_amount,
                &pricing.fixed_conversion_amount,
                &pricing.percentage_conversion_amount,
                &campaign.updated_at,
            ],
        )
        .await?;

    Ok(())
}

pub async fn delete_campaign(client: &impl GenericClient, id: CampaignId) -> Result<bool, PoolError> {
    let statement = client
        .prepare_cached("DELETE FROM campaigns WHERE campaign_id = $1")
        .await?;

    Ok(client.execute(&statement, &[&id]).await? == 1)
}

pub async fn insert_affiliate(
    client: &impl GenericClient,
    new: NewAffiliate,
    now: DateTime<Utc>,
) -> Result<Affiliate, PoolError> {
    let affiliate = new.into_affiliate(AffiliateId(0), now);

    let statement = client
        .prepare_cached(&format!(
            "INSERT INTO affiliates (organization_id, name, contact_email, status, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $5) RETURNING {AFFILIATE_COLUMNS}"
        ))
        .await?;

    let row = client
        .query_one(
            &statement,
            &[
                &affiliate.organization_id,
                &affiliate.name,
                &affiliate.contact_email,
                &affiliate.status,
                &affiliate.created_at,
            ],
        )
        .await?;

    Ok(Affiliate::from(&row))
}

pub async fn fetch_affiliate(
    client: &impl GenericClient,
    id: AffiliateId,
    for_update: bool,
) -> Result<Option<Affiliate>, PoolError> {
    let statement = client
        .prepare_cached(&format!(
            "SELECT {AFFILIATE_COLUMNS} FROM affiliates WHERE affiliate_id = $1{}",
            lock_clause(for_update)
        ))
        .await?;

    let row = client.query_opt(&statement, &[&id]).await?;

    Ok(row.as_ref().map(Affiliate::from))
}

pub async fn list_affiliates(
    client: &impl GenericClient,
    organization: Option<OrganizationId>,
) -> Result<Vec<Affiliate>, PoolError> {
    let statement = client
        .prepare_cached(&format!(
            "SELECT {AFFILIATE_COLUMNS} FROM affiliates WHERE ($1::BIGINT IS NULL OR organization_id = $1) ORDER BY affiliate_id"
        ))
        .await?;

    let rows = client.query(&statement, &[&organization]).await?;

    Ok(rows.iter().map(Affiliate::from).collect())
}

pub async fn update_affiliate(
    client: &impl GenericClient,
    affiliate: &Affiliate,
) -> Result<(), PoolError> {
    let statement = client
        .prepare_cached(
            "UPDATE affiliates SET name = $2, contact_email = $3, status = $4, updated_at = $5 WHERE affiliate_id = $1",
        )
        .await?;

    client
        .execute(
            &statement,
            &[
                &affiliate.id,
                &affiliate.name,
                &affiliate.contact_email,
                &affiliate.status,
                &affiliate.updated_at,
            ],
        )
        .await?;

    Ok(())
}

pub async fn delete_affiliate(
    client: &impl GenericClient,
    id: AffiliateId,
) -> Result<bool, PoolError> {
    let statement = client
        .prepare_cached("DELETE FROM affiliates WHERE affiliate_id = $1")
        .await?;

    Ok(client.execute(&statement, &[&id]).await? == 1)
}
