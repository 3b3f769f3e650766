use primitives::{Association, AssociationId, OrganizationId};

use super::{lock_clause, GenericClient, PoolError};
use crate::store::AssociationFilter;

static ASSOCIATION_COLUMNS: &str = "association_id, advertiser_org_id, affiliate_org_id, status, association_type, visible_affiliate_ids, visible_campaign_ids, all_affiliates_visible, all_campaigns_visible, requested_by, approved_by, approved_at, message, created_at, updated_at";

/// Inserts the association built by the domain, ignoring its id.
///
/// Returns `None` when the pair already has an association.
pub async fn insert_association(
    client: &impl GenericClient,
    association: &Association,
) -> Result<Option<Association>, PoolError> {
    let statement = client
        .prepare_cached(&format!(
            "INSERT INTO associations (advertiser_org_id, affiliate_org_id, status, association_type, visible_affiliate_ids, visible_campaign_ids, all_affiliates_visible, all_campaigns_visible, requested_by, approved_by, approved_at, message, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) ON CONFLICT (advertiser_org_id, affiliate_org_id) DO NOTHING RETURNING {ASSOCIATION_COLUMNS}"
        ))
        .await?;

    let row = client
        .query_opt(
            &statement,
            &[
                &association.advertiser_org_id,
                &association.affiliate_org_id,
                &association.status,
                &association.creation_path,
                &association.visible_affiliate_ids,
                &association.visible_campaign_ids,
                &association.all_affiliates_visible,
                &association.all_campaigns_visible,
                &association.requested_by,
                &association.approved_by,
                &association.approved_at,
                &association.message,
                &association.created_at,
                &association.updated_at,
            ],
        )
        .await?;

    Ok(row.as_ref().map(Association::from))
}

pub async fn fetch_association(
    client: &impl GenericClient,
    id: AssociationId,
    for_update: bool,
) -> Result<Option<Association>, PoolError> {
    let statement = client
        .prepare_cached(&format!(
            "SELECT {ASSOCIATION_COLUMNS} FROM associations WHERE association_id = $1{}",
            lock_clause(for_update)
        ))
        .await?;

    let row = client.query_opt(&statement, &[&id]).await?;

    Ok(row.as_ref().map(Association::from))
}

/// ```text
/// SELECT ... FROM associations WHERE advertiser_org_id = $1 AND affiliate_org_id = $2
/// ```
pub async fn fetch_association_by_pair(
    client: &impl GenericClient,
    advertiser: OrganizationId,
    affiliate: OrganizationId,
) -> Result<Option<Association>, PoolError> {
    let statement = client
        .prepare_cached(&format!(
            "SELECT {ASSOCIATION_COLUMNS} FROM associations WHERE advertiser_org_id = $1 AND affiliate_org_id = $2"
        ))
        .await?;

    let row = client.query_opt(&statement, &[&advertiser, &affiliate]).await?;

    Ok(row.as_ref().map(Association::from))
}

pub async fn list_associations(
    client: &impl GenericClient,
    filter: &AssociationFilter,
) -> Result<Vec<Association>, PoolError> {
    let statement = client
        .prepare_cached(&format!(
            "SELECT {ASSOCIATION_COLUMNS} FROM associations WHERE ($1::BIGINT IS NULL OR advertiser_org_id = $1) AND ($2::BIGINT IS NULL OR affiliate_org_id = $2) AND ($3::BIGINT IS NULL OR advertiser_org_id = $3 OR affiliate_org_id = $3) AND ($4::TEXT IS NULL OR status = $4) ORDER BY association_id"
        ))
        .await?;

    let rows = client
        .query(
            &statement,
            &[
                &filter.advertiser_org_id,
                &filter.affiliate_org_id,
                &filter.organization_id,
                &filter.status,
            ],
        )
        .await?;

    Ok(rows.iter().map(Association::from).collect())
}

pub async fn update_association(
    client: &impl GenericClient,
    association: &Association,
) -> Result<(), PoolError> {
    let statement = client
        .prepare_cached(
            "UPDATE associations SET status = $2, visible_affiliate_ids = $3, visible_campaign_ids = $4, all_affiliates_visible = $5, all_campaigns_visible = $6, approved_by = $7, approved_at = $8, message = $9, updated_at = $10 WHERE association_id = $1",
        )
        .await?;

    client
        .execute(
            &statement,
            &[
                &association.id,
                &association.status,
                &association.visible_affiliate_ids,
                &association.visible_campaign_ids,
                &association.all_affiliates_visible,
                &association.all_campaigns_visible,
                &association.approved_by,
                &association.approved_at,
                &association.message,
                &association.updated_at,
            ],
        )
        .await?;

    Ok(())
}
