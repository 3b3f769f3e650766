use chrono::NaiveDate;
use postgres_types::Json;
use primitives::{OrganizationId, UsageRecord, UsageRecordId};

use super::{lock_clause, GenericClient, PoolError};

static USAGE_RECORD_COLUMNS: &str = "usage_record_id, organization_id, billing_account_id, usage_date, clicks, conversions, impressions, advertiser_spend, affiliate_payout, platform_revenue, currency, status, allocated_at, billed_at, error_message, campaign_breakdown, affiliate_breakdown, created_at, updated_at";

/// ```text
/// SELECT ... FROM usage_records WHERE organization_id = $1 AND usage_date = $2 [FOR UPDATE]
/// ```
pub async fn fetch_usage_record(
    client: &impl GenericClient,
    organization: OrganizationId,
    date: NaiveDate,
    for_update: bool,
) -> Result<Option<UsageRecord>, PoolError> {
    let statement = client
        .prepare_cached(&format!(
            "SELECT {USAGE_RECORD_COLUMNS} FROM usage_records WHERE organization_id = $1 AND usage_date = $2{}",
            lock_clause(for_update)
        ))
        .await?;

    let row = client.query_opt(&statement, &[&organization, &date]).await?;

    Ok(row.as_ref().map(UsageRecord::from))
}

pub async fn fetch_usage_record_by_id(
    client: &impl GenericClient,
    id: UsageRecordId,
    for_update: bool,
) -> Result<Option<UsageRecord>, PoolError> {
    let statement = client
        .prepare_cached(&format!(
            "SELECT {USAGE_RECORD_COLUMNS} FROM usage_records WHERE usage_record_id = $1{}",
            lock_clause(for_update)
        ))
        .await?;

    let row = client.query_opt(&statement, &[&id]).await?;

    Ok(row.as_ref().map(UsageRecord::from))
}

/// Newest day first.
pub async fn list_usage_records(
    client: &impl GenericClient,
    organization: OrganizationId,
    limit: i64,
    offset: i64,
) -> Result<Vec<UsageRecord>, PoolError> {
    let statement = client
        .prepare_cached(&format!(
            "SELECT {USAGE_RECORD_COLUMNS} FROM usage_records WHERE organization_id = $1 ORDER BY usage_date DESC LIMIT $2 OFFSET $3"
        ))
        .await?;

    let rows = client
        .query(&statement, &[&organization, &limit, &offset])
        .await?;

    Ok(rows.iter().map(UsageRecord::from).collect())
}

pub async fn insert_usage_record(
    client: &impl GenericClient,
    record: &UsageRecord,
) -> Result<UsageRecord, PoolError> {
    let statement = client
        .prepare_cached(&format!(
            "INSERT INTO usage_records (organization_id, billing_account_id, usage_date, clicks, conversions, impressions, advertiser_spend, affiliate_payout, platform_revenue, currency, status, allocated_at, billed_at, error_message, campaign_breakdown, affiliate_breakdown, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18) RETURNING {USAGE_RECORD_COLUMNS}"
        ))
        .await?;

    let row = client
        .query_one(
            &statement,
            &[
                &record.organization_id,
                &record.billing_account_id,
                &record.usage_date,
                &record.clicks,
                &record.conversions,
                &record.impressions,
                &record.advertiser_spend,
                &record.affiliate_payout,
                &record.platform_revenue,
                &record.currency,
                &record.status,
                &record.allocated_at,
                &record.billed_at,
                &record.error_message,
                &Json(&record.campaign_breakdown),
                &Json(&record.affiliate_breakdown),
                &record.created_at,
                &record.updated_at,
            ],
        )
        .await?;

    Ok(UsageRecord::from(&row))
}

pub async fn update_usage_record(
    client: &impl GenericClient,
    record: &UsageRecord,
) -> Result<(), PoolError> {
    let statement = client
        .prepare_cached(
            "UPDATE usage_records SET clicks = $2, conversions = $3, impressions = $4, advertiser_spend = $5, affiliate_payout = $6, platform_revenue = $7, currency = $8, status = $9, allocated_at = $10, billed_at = $11, error_message = $12, campaign_breakdown = $13, affiliate_breakdown = $14, updated_at = $15 WHERE usage_record_id = $1",
        )
        .await?;

    client
        .execute(
            &statement,
            &[
                &record.id,
                &record.clicks,
                &record.conversions,
                &record.impressions,
                &record.advertiser_spend,
                &record.affiliate_payout,
                &record.platform_revenue,
                &record.currency,
                &record.status,
                &record.allocated_at,
                &record.billed_at,
                &record.error_message,
                &Json(&record.campaign_breakdown),
                &Json(&record.affiliate_breakdown),
                &record.updated_at,
            ],
        )
        .await?;

    Ok(())
}
