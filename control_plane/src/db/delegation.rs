use chrono::{DateTime, Utc};
use postgres_types::Json;
use primitives::{Delegation, DelegationId, DelegationStatus, OrganizationId};

use super::{lock_clause, GenericClient, PoolError};
use crate::store::DelegationFilter;

static DELEGATION_COLUMNS: &str = "delegation_id, agency_org_id, advertiser_org_id, status, permissions, delegated_by_user_id, accepted_by_user_id, accepted_at, message, expires_at, created_at, updated_at";

/// Returns `None` when the pair already has a delegation.
pub async fn insert_delegation(
    client: &impl GenericClient,
    delegation: &Delegation,
) -> Result<Option<Delegation>, PoolError> {
    let statement = client
        .prepare_cached(&format!(
            "INSERT INTO delegations (agency_org_id, advertiser_org_id, status, permissions, delegated_by_user_id, accepted_by_user_id, accepted_at, message, expires_at, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) ON CONFLICT (agency_org_id, advertiser_org_id) DO NOTHING RETURNING {DELEGATION_COLUMNS}"
        ))
        .await?;

    let row = client
        .query_opt(
            &statement,
            &[
                &delegation.agency_org_id,
                &delegation.advertiser_org_id,
                &delegation.status,
                &Json(&delegation.permissions),
                &delegation.delegated_by,
                &delegation.accepted_by,
                &delegation.accepted_at,
                &delegation.message,
                &delegation.expires_at,
                &delegation.created_at,
                &delegation.updated_at,
            ],
        )
        .await?;

    Ok(row.as_ref().map(Delegation::from))
}

pub async fn fetch_delegation(
    client: &impl GenericClient,
    id: DelegationId,
    for_update: bool,
) -> Result<Option<Delegation>, PoolError> {
    let statement = client
        .prepare_cached(&format!(
            "SELECT {DELEGATION_COLUMNS} FROM delegations WHERE delegation_id = $1{}",
            lock_clause(for_update)
        ))
        .await?;

    let row = client.query_opt(&statement, &[&id]).await?;

    Ok(row.as_ref().map(Delegation::from))
}

pub async fn fetch_delegation_by_pair(
    client: &impl GenericClient,
    agency: OrganizationId,
    advertiser: OrganizationId,
) -> Result<Option<Delegation>, PoolError> {
    let statement = client
        .prepare_cached(&format!(
            "SELECT {DELEGATION_COLUMNS} FROM delegations WHERE agency_org_id = $1 AND advertiser_org_id = $2"
        ))
        .await?;

    let row = client.query_opt(&statement, &[&agency, &advertiser]).await?;

    Ok(row.as_ref().map(Delegation::from))
}

pub async fn list_delegations(
    client: &impl GenericClient,
    filter: &DelegationFilter,
) -> Result<Vec<Delegation>, PoolError> {
    let statement = client
        .prepare_cached(&format!(
            "SELECT {DELEGATION_COLUMNS} FROM delegations WHERE ($1::BIGINT IS NULL OR agency_org_id = $1) AND ($2::BIGINT IS NULL OR advertiser_org_id = $2) AND ($3::BIGINT IS NULL OR agency_org_id = $3 OR advertiser_org_id = $3) AND ($4::TEXT IS NULL OR status = $4) ORDER BY delegation_id"
        ))
        .await?;

    let rows = client
        .query(
            &statement,
            &[
                &filter.agency_org_id,
                &filter.advertiser_org_id,
                &filter.organization_id,
                &filter.status,
            ],
        )
        .await?;

    Ok(rows.iter().map(Delegation::from).collect())
}

pub async fn update_delegation(
    client: &impl GenericClient,
    delegation: &Delegation,
) -> Result<(), PoolError> {
    let statement = client
        .prepare_cached(
            "UPDATE delegations SET status = $2, permissions = $3, accepted_by_user_id = $4, accepted_at = $5, message = $6, expires_at = $7, updated_at = $8 WHERE delegation_id = $1",
        )
        .await?;

    client
        .execute(
            &statement,
            &[
                &delegation.id,
                &delegation.status,
                &Json(&delegation.permissions),
                &delegation.accepted_by,
                &delegation.accepted_at,
                &delegation.message,
                &delegation.expires_at,
                &delegation.updated_at,
            ],
        )
        .await?;

    Ok(())
}

/// ```text
/// UPDATE delegations SET status = 'revoked', updated_at = $1
/// WHERE status IN ('active', 'suspended') AND expires_at < $1
/// ```
pub async fn expire_delegations(
    client: &impl GenericClient,
    now: DateTime<Utc>,
) -> Result<u64, PoolError> {
    let statement = client
        .prepare_cached(
            "UPDATE delegations SET status = $2, updated_at = $1 WHERE status IN ($3, $4) AND expires_at < $1",
        )
        .await?;

    let expired = client
        .execute(
            &statement,
            &[
                &now,
                &DelegationStatus::Revoked,
                &DelegationStatus::Active,
                &DelegationStatus::Suspended,
            ],
        )
        .await?;

    Ok(expired)
}
