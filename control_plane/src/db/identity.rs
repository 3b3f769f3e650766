use chrono::{DateTime, Utc};
use primitives::{organization::NewOrganization, Organization, OrganizationId, Profile};
use uuid::Uuid;

use super::{lock_clause, GenericClient, PoolError};

static ORGANIZATION_COLUMNS: &str =
    "organization_id, name, type, description, created_at, updated_at";

static PROFILE_COLUMNS: &str =
    "id, organization_id, role_name, email, first_name, last_name, created_at, updated_at";

/// ```text
/// INSERT INTO organizations (name, type, description, created_at, updated_at)
/// VALUES ($1, $2, $3, $4, $4) RETURNING organization_id, name, type, description, created_at, updated_at
/// ```
pub async fn insert_organization(
    client: &impl GenericClient,
    new: &NewOrganization,
    now: DateTime<Utc>,
) -> Result<Organization, PoolError> {
    let statement = client
        .prepare_cached(&format!(
            "INSERT INTO organizations (name, type, description, created_at, updated_at) VALUES ($1, $2, $3, $4, $4) RETURNING {ORGANIZATION_COLUMNS}"
        ))
        .await?;

    let row = client
        .query_one(&statement, &[&new.name, &new.kind, &new.description, &now])
        .await?;

    Ok(Organization::from(&row))
}

/// ```text
/// SELECT organization_id, name, type, description, created_at, updated_at FROM organizations
/// WHERE organization_id = $1
/// ```
pub async fn fetch_organization(
    client: &impl GenericClient,
    id: OrganizationId,
    for_update: bool,
) -> Result<Option<Organization>, PoolError> {
    let statement = client
        .prepare_cached(&format!(
            "SELECT {ORGANIZATION_COLUMNS} FROM organizations WHERE organization_id = $1{}",
            lock_clause(for_update)
        ))
        .await?;

    let row = client.query_opt(&statement, &[&id]).await?;

    Ok(row.as_ref().map(Organization::from))
}

pub async fn list_organizations(
    client: &impl GenericClient,
    limit: i64,
    offset: i64,
) -> Result<Vec<Organization>, PoolError> {
    let statement = client
        .prepare_cached(&format!(
            "SELECT {ORGANIZATION_COLUMNS} FROM organizations ORDER BY organization_id LIMIT $1 OFFSET $2"
        ))
        .await?;

    let rows = client.query(&statement, &[&limit, &offset]).await?;

    Ok(rows.iter().map(Organization::from).collect())
}

pub async fn update_organization(
    client: &impl GenericClient,
    organization: &Organization,
) -> Result<(), PoolError> {
    let statement = client
        .prepare_cached(
            "UPDATE organizations SET name = $2, description = $3, updated_at = $4 WHERE organization_id = $1",
        )
        .await?;

    client
        .execute(
            &statement,
            &[
                &organization.id,
                &organization.name,
                &organization.description,
                &organization.updated_at,
            ],
        )
        .await?;

    Ok(())
}

/// Everything the organization owns is removed by the `ON DELETE CASCADE`
/// constraints, its profiles are detached by `ON DELETE SET NULL`.
///
/// Returns whether the organization existed.
pub async fn delete_organization(
    client: &impl GenericClient,
    id: OrganizationId,
) -> Result<bool, PoolError> {
    let statement = client
        .prepare_cached("DELETE FROM organizations WHERE organization_id = $1")
        .await?;

    let deleted = client.execute(&statement, &[&id]).await?;

    Ok(deleted == 1)
}

/// ```text
/// SELECT id, organization_id, role_name, email, first_name, last_name, created_at, updated_at FROM profiles
/// WHERE id = $1
/// ```
pub async fn fetch_profile(
    client: &impl GenericClient,
    id: Uuid,
    for_update: bool,
) -> Result<Option<Profile>, PoolError> {
    let statement = client
        .prepare_cached(&format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = $1{}",
            lock_clause(for_update)
        ))
        .await?;

    let row = client.query_opt(&statement, &[&id]).await?;

    Ok(row.as_ref().map(Profile::from))
}

/// Returns `false` if a profile with the same id already exists.
pub async fn insert_profile(
    client: &impl GenericClient,
    profile: &Profile,
) -> Result<bool, PoolError> {
    let statement = client
        .prepare_cached(&format!(
            "INSERT INTO profiles ({PROFILE_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8) ON CONFLICT (id) DO NOTHING"
        ))
        .await?;

    let inserted = client
        .execute(
            &statement,
            &[
                &profile.id,
                &profile.organization_id,
                &profile.role,
                &profile.email,
                &profile.first_name,
                &profile.last_name,
                &profile.created_at,
                &profile.updated_at,
            ],
        )
        .await?;

    Ok(inserted == 1)
}

pub async fn update_profile(client: &impl GenericClient, profile: &Profile) -> Result<(), PoolError> {
    let statement = client
        .prepare_cached(
            "UPDATE profiles SET organization_id = $2, role_name = $3, email = $4, first_name = $5, last_name = $6, updated_at = $7 WHERE id = $1",
        )
        .await?;

    client
        .execute(
            &statement,
            &[
                &profile.id,
                &profile.organization_id,
                &profile.role,
                &profile.email,
                &profile.first_name,
                &profile.last_name,
                &profile.updated_at,
            ],
        )
        .await?;

    Ok(())
}

pub async fn delete_profile(client: &impl GenericClient, id: Uuid) -> Result<bool, PoolError> {
    let statement = client
        .prepare_cached("DELETE FROM profiles WHERE id = $1")
        .await?;

    Ok(client.execute(&statement, &[&id]).await? == 1)
}
