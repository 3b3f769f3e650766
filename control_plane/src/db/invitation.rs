use chrono::{DateTime, Utc};
use primitives::{
    invitation::{NewUsageLogEntry, UsageLogEntry},
    Invitation, InvitationId, InvitationStatus, InvitationToken, OrganizationId,
};

use super::{lock_clause, GenericClient, PoolError};

static INVITATION_COLUMNS: &str = "invitation_id, advertiser_org_id, invitation_token, name, description, allowed_affiliate_org_ids, max_uses, current_uses, expires_at, status, default_all_affiliates_visible, default_all_campaigns_visible, default_visible_affiliate_ids, default_visible_campaign_ids, message, created_by, created_at, updated_at";

static USAGE_LOG_COLUMNS: &str = "usage_id, invitation_id, affiliate_org_id, used_by, association_id, ip_address, user_agent, success, error_message, used_at";

/// Returns `None` on a token collision.
pub async fn insert_invitation(
    client: &impl GenericClient,
    invitation: &Invitation,
) -> Result<Option<Invitation>, PoolError> {
    let statement = client
        .prepare_cached(&format!(
            "INSERT INTO invitations (advertiser_org_id, invitation_token, name, description, allowed_affiliate_org_ids, max_uses, current_uses, expires_at, status, default_all_affiliates_visible, default_all_campaigns_visible, default_visible_affiliate_ids, default_visible_campaign_ids, message, created_by, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17) ON CONFLICT (invitation_token) DO NOTHING RETURNING {INVITATION_COLUMNS}"
        ))
        .await?;

    let row = client
        .query_opt(
            &statement,
            &[
                &invitation.advertiser_org_id,
                &invitation.token.as_str(),
                &invitation.name,
                &invitation.description,
                &invitation.allowed_affiliate_org_ids,
                &invitation.max_uses,
                &invitation.current_uses,
                &invitation.expires_at,
                &invitation.status,
                &invitation.default_all_affiliates_visible,
                &invitation.default_all_campaigns_visible,
                &invitation.default_visible_affiliate_ids,
                &invitation.default_visible_campaign_ids,
                &invitation.message,
                &invitation.created_by,
                &invitation.created_at,
                &invitation.updated_at,
            ],
        )
        .await?;

    Ok(row.as_ref().map(Invitation::from))
}

pub async fn fetch_invitation(
    client: &impl GenericClient,
    id: InvitationId,
    for_update: bool,
) -> Result<Option<Invitation>, PoolError> {
    let statement = client
        .prepare_cached(&format!(
            "SELECT {INVITATION_COLUMNS} FROM invitations WHERE invitation_id = $1{}",
            lock_clause(for_update)
        ))
        .await?;

    let row = client.query_opt(&statement, &[&id]).await?;

    Ok(row.as_ref().map(Invitation::from))
}

/// ```text
/// SELECT ... FROM invitations WHERE invitation_token = $1 [FOR UPDATE]
/// ```
///
/// Locking the row serializes concurrent uses of the same invitation.
pub async fn fetch_invitation_by_token(
    client: &impl GenericClient,
    token: &InvitationToken,
    for_update: bool,
) -> Result<Option<Invitation>, PoolError> {
    let statement = client
        .prepare_cached(&format!(
            "SELECT {INVITATION_COLUMNS} FROM invitations WHERE invitation_token = $1{}",
            lock_clause(for_update)
        ))
        .await?;

    let row = client.query_opt(&statement, &[&token.as_str()]).await?;

    Ok(row.as_ref().map(Invitation::from))
}

pub async fn list_invitations(
    client: &impl GenericClient,
    advertiser: Option<OrganizationId>,
) -> Result<Vec<Invitation>, PoolError> {
    let statement = client
        .prepare_cached(&format!(
            "SELECT {INVITATION_COLUMNS} FROM invitations WHERE ($1::BIGINT IS NULL OR advertiser_org_id = $1) ORDER BY invitation_id"
        ))
        .await?;

    let rows = client.query(&statement, &[&advertiser]).await?;

    Ok(rows.iter().map(Invitation::from).collect())
}

pub async fn update_invitation(
    client: &impl GenericClient,
    invitation: &Invitation,
) -> Result<(), PoolError> {
    let statement = client
        .prepare_cached(
            "UPDATE invitations SET name = $2, description = $3, allowed_affiliate_org_ids = $4, max_uses = $5, current_uses = $6, expires_at = $7, status = $8, default_all_affiliates_visible = $9, default_all_campaigns_visible = $10, default_visible_affiliate_ids = $11, default_visible_campaign_ids = $12, message = $13, updated_at = $14 WHERE invitation_id = $1",
        )
        .await?;

    client
        .execute(
            &statement,
            &[
                &invitation.id,
                &invitation.name,
                &invitation.description,
                &invitation.allowed_affiliate_org_ids,
                &invitation.max_uses,
                &invitation.current_uses,
                &invitation.expires_at,
                &invitation.status,
                &invitation.default_all_affiliates_visible,
                &invitation.default_all_campaigns_visible,
                &invitation.default_visible_affiliate_ids,
                &invitation.default_visible_campaign_ids,
                &invitation.message,
                &invitation.updated_at,
            ],
        )
        .await?;

    Ok(())
}

pub async fn delete_invitation(
    client: &impl GenericClient,
    id: InvitationId,
) -> Result<bool, PoolError> {
    let statement = client
        .prepare_cached("DELETE FROM invitations WHERE invitation_id = $1")
        .await?;

    Ok(client.execute(&statement, &[&id]).await? == 1)
}

pub async fn insert_usage_log(
    client: &impl GenericClient,
    entry: &NewUsageLogEntry,
) -> Result<UsageLogEntry, PoolError> {
    let statement = client
        .prepare_cached(&format!(
            "INSERT INTO invitation_usage_log (invitation_id, affiliate_org_id, used_by, association_id, ip_address, user_agent, success, error_message, used_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING {USAGE_LOG_COLUMNS}"
        ))
        .await?;

    let row = client
        .query_one(
            &statement,
            &[
                &entry.invitation_id,
                &entry.affiliate_org_id,
                &entry.used_by,
                &entry.association_id,
                &entry.ip_address,
                &entry.user_agent,
                &entry.success,
                &entry.error_message,
                &entry.used_at,
            ],
        )
        .await?;

    Ok(UsageLogEntry::from(&row))
}

/// Newest attempt first.
pub async fn list_usage_log(
    client: &impl GenericClient,
    invitation: InvitationId,
) -> Result<Vec<UsageLogEntry>, PoolError> {
    let statement = client
        .prepare_cached(&format!(
            "SELECT {USAGE_LOG_COLUMNS} FROM invitation_usage_log WHERE invitation_id = $1 ORDER BY used_at DESC, usage_id DESC"
        ))
        .await?;

    let rows = client.query(&statement, &[&invitation]).await?;

    Ok(rows.iter().map(UsageLogEntry::from).collect())
}

/// ```text
/// UPDATE invitations SET status = 'expired', updated_at = $1
/// WHERE status = 'active' AND expires_at < $1
/// ```
pub async fn expire_invitations(
    client: &impl GenericClient,
    now: DateTime<Utc>,
) -> Result<u64, PoolError> {
    let statement = client
        .prepare_cached(
            "UPDATE invitations SET status = $2, updated_at = $1 WHERE status = $3 AND expires_at < $1",
        )
        .await?;

    let expired = client
        .execute(
            &statement,
            &[&now, &InvitationStatus::Expired, &InvitationStatus::Active],
        )
        .await?;

    Ok(expired)
}
