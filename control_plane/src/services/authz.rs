//! Who may act for an organization.
//!
//! Access is granted, in this order, to:
//! 1. admins
//! 2. members of the organization
//! 3. members of an agency holding an effective delegation of the
//!    organization with the required permission
//!
//! Mutations answer `forbidden`, reads answer `not found` so that nothing
//! outside the caller's reach is revealed.

use chrono::{DateTime, Utc};

use primitives::{OrganizationId, Permission, Role};

use crate::{error::Error, store::Store, Actor};

pub async fn may_act_for(
    store: &dyn Store,
    actor: &Actor,
    organization: OrganizationId,
    permission: Option<Permission>,
    now: DateTime<Utc>,
) -> Result<bool, Error> {
    if actor.is_admin() || actor.belongs_to(organization) {
        return Ok(true);
    }

    let (permission, agency) = match (permission, actor.organization_id) {
        (Some(permission), Some(agency)) => (permission, agency),
        _ => return Ok(false),
    };

    let delegation = store.delegation_by_pair(agency, organization).await?;

    Ok(delegation.map_or(false, |delegation| {
        delegation.is_effective(now) && delegation.permissions.contains(&permission)
    }))
}

/// Fails with `forbidden` unless [`may_act_for`].
pub async fn authorize(
    store: &dyn Store,
    actor: &Actor,
    organization: OrganizationId,
    permission: Option<Permission>,
    now: DateTime<Utc>,
) -> Result<(), Error> {
    if may_act_for(store, actor, organization, permission, now).await? {
        Ok(())
    } else {
        Err(Error::forbidden())
    }
}

/// Fails with `not found` for `what` unless [`may_act_for`].
pub async fn authorize_read(
    store: &dyn Store,
    actor: &Actor,
    organization: OrganizationId,
    permission: Option<Permission>,
    what: &str,
    now: DateTime<Utc>,
) -> Result<(), Error> {
    if may_act_for(store, actor, organization, permission, now).await? {
        Ok(())
    } else {
        Err(Error::not_found(what))
    }
}

/// Admins and the platform owner oversee every delegation.
pub fn oversees_delegations(actor: &Actor) -> bool {
    matches!(actor.role, Role::Admin | Role::PlatformOwner)
}
