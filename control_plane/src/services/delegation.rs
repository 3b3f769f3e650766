//! Agency delegations: an advertiser grants an agency a set of permissions
//! to act on its behalf.
//!
//! The advertiser side creates a delegation and edits its permissions and
//! expiration, the agency side accepts or rejects it and both sides may
//! suspend, reactivate or revoke it. Admins and the platform owner act from
//! either side.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use primitives::{
    delegation::{
        DelegationAction, NewDelegation, PermissionCheck, Side, UpdateExpiration,
        UpdatePermissions,
    },
    Delegation, DelegationId, DelegationStatus, OrganizationId, Permission,
};

use crate::{
    error::Error,
    services::authz,
    store::{DelegationFilter, Store},
    Actor,
};

/// `?agency_org_id=&advertiser_org_id=&status=`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct DelegationQuery {
    #[serde(default)]
    pub agency_org_id: Option<OrganizationId>,
    #[serde(default)]
    pub advertiser_org_id: Option<OrganizationId>,
    #[serde(default)]
    pub status: Option<DelegationStatus>,
}

/// The side the actor acts from, `None` for overseers.
fn side(actor: &Actor, delegation: &Delegation) -> Result<Option<Side>, Error> {
    if authz::oversees_delegations(actor) {
        return Ok(None);
    }

    actor
        .organization_id
        .and_then(|organization| delegation.side_of(organization))
        .map(Some)
        .ok_or_else(|| Error::not_found("Delegation"))
}

async fn visible(
    store: &dyn Store,
    actor: &Actor,
    id: DelegationId,
) -> Result<(Delegation, Option<Side>), Error> {
    let delegation = store
        .delegation(id)
        .await?
        .ok_or_else(|| Error::not_found("Delegation"))?;
    let side = side(actor, &delegation)?;

    Ok((delegation, side))
}

pub async fn create(
    store: &dyn Store,
    actor: &Actor,
    new: NewDelegation,
    now: DateTime<Utc>,
) -> Result<Delegation, Error> {
    if !authz::oversees_delegations(actor) && !actor.belongs_to(new.advertiser_org_id) {
        return Err(Error::Forbidden(
            "Only the advertiser organization can delegate its permissions".into(),
        ));
    }

    let agency = store
        .organization(new.agency_org_id)
        .await?
        .ok_or_else(|| Error::not_found("Agency organization"))?;
    let advertiser = store
        .organization(new.advertiser_org_id)
        .await?
        .ok_or_else(|| Error::not_found("Advertiser organization"))?;
    new.validate(&agency, &advertiser, now)?;

    store.create_delegation(new, actor.user_id, now).await
}

pub async fn get(store: &dyn Store, actor: &Actor, id: DelegationId) -> Result<Delegation, Error> {
    visible(store, actor, id).await.map(|(delegation, _)| delegation)
}

/// Overseers list every delegation, everybody else those their organization
/// takes part in.
pub async fn list(
    store: &dyn Store,
    actor: &Actor,
    query: DelegationQuery,
) -> Result<Vec<Delegation>, Error> {
    let organization_id = if authz::oversees_delegations(actor) {
        None
    } else {
        Some(actor.organization()?)
    };

    store
        .delegations(DelegationFilter {
            agency_org_id: query.agency_org_id,
            advertiser_org_id: query.advertiser_org_id,
            organization_id,
            status: query.status,
        })
        .await
}

/// accept, reject, suspend, reactivate or revoke
pub async fn transition(
    store: &dyn Store,
    actor: &Actor,
    id: DelegationId,
    action: DelegationAction,
    now: DateTime<Utc>,
) -> Result<Delegation, Error> {
    let (_, side) = visible(store, actor, id).await?;

    if let Some(side) = side {
        if !action.allowed_from(side) {
            return Err(Error::Forbidden(format!(
                "Only the agency organization can {action} a delegation"
            )));
        }
    }

    let user = actor.user_id;
    store
        .update_delegation(
            id,
            Box::new(move |delegation| Ok(delegation.transition(action, user, now)?)),
        )
        .await
}

fn require_advertiser_side(side: Option<Side>) -> Result<(), Error> {
    match side {
        Some(Side::Agency) => Err(Error::Forbidden(
            "Only the advertiser organization can change a delegation".into(),
        )),
        _ => Ok(()),
    }
}

pub async fn update_permissions(
    store: &dyn Store,
    actor: &Actor,
    id: DelegationId,
    update: UpdatePermissions,
    now: DateTime<Utc>,
) -> Result<Delegation, Error> {
    let (_, side) = visible(store, actor, id).await?;
    require_advertiser_side(side)?;

    store
        .update_delegation(
            id,
            Box::new(move |delegation| {
                Ok(delegation.update_permissions(update.permissions, now)?)
            }),
        )
        .await
}

pub async fn update_expiration(
    store: &dyn Store,
    actor: &Actor,
    id: DelegationId,
    update: UpdateExpiration,
    now: DateTime<Utc>,
) -> Result<Delegation, Error> {
    let (_, side) = visible(store, actor, id).await?;
    require_advertiser_side(side)?;

    store
        .update_delegation(
            id,
            Box::new(move |delegation| {
                Ok(delegation.update_expiration(update.expires_at, now)?)
            }),
        )
        .await
}

/// Answers for any pair the actor takes part in. Without a delegation
/// every permission is denied.
pub async fn check_permissions(
    store: &dyn Store,
    actor: &Actor,
    agency: OrganizationId,
    advertiser: OrganizationId,
    permissions: &[Permission],
    now: DateTime<Utc>,
) -> Result<PermissionCheck, Error> {
    let party = actor.belongs_to(agency) || actor.belongs_to(advertiser);
    if !party && !authz::oversees_delegations(actor) {
        return Err(Error::not_found("Delegation"));
    }

    Ok(match store.delegation_by_pair(agency, advertiser).await? {
        Some(delegation) => delegation.check_permissions(permissions, now),
        None => PermissionCheck::no_delegation(permissions),
    })
}

async fn effective(
    store: &dyn Store,
    filter: DelegationFilter,
    now: DateTime<Utc>,
) -> Result<Vec<Delegation>, Error> {
    let delegations = store
        .delegations(DelegationFilter {
            status: Some(DelegationStatus::Active),
            ..filter
        })
        .await?;

    Ok(delegations
        .into_iter()
        .filter(|delegation| delegation.is_effective(now))
        .collect())
}

/// Effective delegations the agency holds.
pub async fn active_for_agency(
    store: &dyn Store,
    actor: &Actor,
    agency: OrganizationId,
    now: DateTime<Utc>,
) -> Result<Vec<Delegation>, Error> {
    if !authz::oversees_delegations(actor) && !actor.belongs_to(agency) {
        return Err(Error::not_found("Organization"));
    }

    effective(
        store,
        DelegationFilter {
            agency_org_id: Some(agency),
            ..DelegationFilter::default()
        },
        now,
    )
    .await
}

/// Effective delegations the advertiser granted.
pub async fn active_for_advertiser(
    store: &dyn Store,
    actor: &Actor,
    advertiser: OrganizationId,
    now: DateTime<Utc>,
) -> Result<Vec<Delegation>, Error> {
    if !authz::oversees_delegations(actor) && !actor.belongs_to(advertiser) {
        return Err(Error::not_found("Organization"));
    }

    effective(
        store,
        DelegationFilter {
            advertiser_org_id: Some(advertiser),
            ..DelegationFilter::default()
        },
        now,
    )
    .await
}

/// Revokes the delegations past their expiration.
pub async fn expire(store: &dyn Store, now: DateTime<Utc>) -> Result<u64, Error> {
    store.expire_delegations(now).await
}

pub fn permissions() -> Vec<Permission> {
    Permission::ALL.to_vec()
}
