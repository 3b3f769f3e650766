//! The advertiser to affiliate association graph.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use primitives::{
    association::{AssociationAction, NewAssociation, UpdateVisibility},
    Association, AssociationId, AssociationStatus, CreationPath, OrganizationId, Permission,
};

use crate::{
    error::Error,
    services::authz,
    store::{AssociationFilter, Store},
    Actor,
};

/// `?advertiser_org_id=&affiliate_org_id=&status=`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct AssociationQuery {
    #[serde(default)]
    pub advertiser_org_id: Option<OrganizationId>,
    #[serde(default)]
    pub affiliate_org_id: Option<OrganizationId>,
    #[serde(default)]
    pub status: Option<AssociationStatus>,
}

/// Whether the actor may act for the advertiser or the affiliate side.
async fn acts_for_side(
    store: &dyn Store,
    actor: &Actor,
    side: OrganizationId,
    association: &Association,
    permission: Permission,
    now: DateTime<Utc>,
) -> Result<bool, Error> {
    // agencies only ever act for advertisers
    let permission = (side == association.advertiser_org_id).then_some(permission);

    authz::may_act_for(store, actor, side, permission, now).await
}

async fn acts_for_either_side(
    store: &dyn Store,
    actor: &Actor,
    association: &Association,
    permission: Permission,
    now: DateTime<Utc>,
) -> Result<bool, Error> {
    Ok(acts_for_side(store, actor, association.advertiser_org_id, association, permission, now).await?
        || acts_for_side(store, actor, association.affiliate_org_id, association, permission, now)
            .await?)
}

/// Loads the association when the actor may see it.
async fn visible(
    store: &dyn Store,
    actor: &Actor,
    id: AssociationId,
    now: DateTime<Utc>,
) -> Result<Association, Error> {
    let association = store
        .association(id)
        .await?
        .ok_or_else(|| Error::not_found("Association"))?;

    if acts_for_either_side(store, actor, &association, Permission::AssociationView, now).await? {
        Ok(association)
    } else {
        Err(Error::not_found("Association"))
    }
}

/// Creates a pending association.
///
/// Through [`CreationPath::Invitation`] the advertiser side invites, through
/// [`CreationPath::Request`] the affiliate side asks. A second association
/// for the same pair is refused whatever the status of the first.
pub async fn create(
    store: &dyn Store,
    actor: &Actor,
    new: NewAssociation,
    path: CreationPath,
    now: DateTime<Utc>,
) -> Result<Association, Error> {
    let advertiser = store
        .organization(new.advertiser_org_id)
        .await?
        .ok_or_else(|| Error::not_found("Advertiser organization"))?;
    let affiliate = store
        .organization(new.affiliate_org_id)
        .await?
        .ok_or_else(|| Error::not_found("Affiliate organization"))?;
    new.validate(&advertiser, &affiliate)?;

    match path {
        CreationPath::Invitation => {
            authz::authorize(
                store,
                actor,
                advertiser.id,
                Some(Permission::AssociationInvite),
                now,
            )
            .await?
        }
        CreationPath::Request => authz::authorize(store, actor, affiliate.id, None, now).await?,
    }

    store
        .create_association(new, path, Some(actor.user_id), now)
        .await
}

/// Approve and reject are answered by the responder of the association,
/// suspend and reactivate by either side.
pub async fn transition(
    store: &dyn Store,
    actor: &Actor,
    id: AssociationId,
    action: AssociationAction,
    now: DateTime<Utc>,
) -> Result<Association, Error> {
    let association = visible(store, actor, id, now).await?;
    check_action(store, actor, &association, action, now).await?;

    let user = actor.user_id;
    store
        .update_association(
            id,
            Box::new(move |association| Ok(association.transition(action, user, now)?)),
        )
        .await
}

async fn check_action(
    store: &dyn Store,
    actor: &Actor,
    association: &Association,
    action: AssociationAction,
    now: DateTime<Utc>,
) -> Result<(), Error> {
    let allowed = match action {
        AssociationAction::Approve | AssociationAction::Reject => {
            acts_for_side(
                store,
                actor,
                association.responder(),
                association,
                Permission::AssociationManage,
                now,
            )
            .await?
        }
        AssociationAction::Suspend | AssociationAction::Reactivate => {
            acts_for_either_side(store, actor, association, Permission::AssociationManage, now)
                .await?
        }
    };

    if allowed {
        Ok(())
    } else {
        Err(Error::Forbidden(format!(
            "Your organization cannot {action} this association"
        )))
    }
}

/// Replaces the visibility sets and flags; a status change in the same
/// call follows the same rules as [`transition`].
pub async fn update_visibility(
    store: &dyn Store,
    actor: &Actor,
    id: AssociationId,
    update: UpdateVisibility,
    now: DateTime<Utc>,
) -> Result<Association, Error> {
    let association = visible(store, actor, id, now).await?;

    match update.status.filter(|status| *status != association.status) {
        Some(status) => {
            let action = association.status.action_towards(status)?;
            check_action(store, actor, &association, action, now).await?;
        }
        None => {
            if !acts_for_either_side(store, actor, &association, Permission::AssociationManage, now)
                .await?
            {
                return Err(Error::forbidden());
            }
        }
    }

    let user = actor.user_id;
    store
        .update_association(
            id,
            Box::new(move |association| Ok(update.apply(association, user, now)?)),
        )
        .await
}

pub async fn get(
    store: &dyn Store,
    actor: &Actor,
    id: AssociationId,
    now: DateTime<Utc>,
) -> Result<Association, Error> {
    visible(store, actor, id, now).await
}

pub async fn by_pair(
    store: &dyn Store,
    actor: &Actor,
    advertiser: OrganizationId,
    affiliate: OrganizationId,
    now: DateTime<Utc>,
) -> Result<Association, Error> {
    let association = store
        .association_by_pair(advertiser, affiliate)
        .await?
        .ok_or_else(|| Error::not_found("Association"))?;

    visible(store, actor, association.id, now).await
}

/// Admins see every association, everybody else the ones of their
/// organization.
pub async fn list(
    store: &dyn Store,
    actor: &Actor,
    query: AssociationQuery,
) -> Result<Vec<Association>, Error> {
    let organization_id = if actor.is_admin() {
        None
    } else {
        Some(actor.organization()?)
    };

    store
        .associations(AssociationFilter {
            advertiser_org_id: query.advertiser_org_id,
            affiliate_org_id: query.affiliate_org_id,
            organization_id,
            status: query.status,
        })
        .await
}

/// `GET /organizations/:id/associations`
pub async fn list_for_organization(
    store: &dyn Store,
    actor: &Actor,
    organization: OrganizationId,
    status: Option<AssociationStatus>,
    now: DateTime<Utc>,
) -> Result<Vec<Association>, Error> {
    authz::authorize_read(
        store,
        actor,
        organization,
        Some(Permission::AssociationView),
        "Organization",
        now,
    )
    .await?;

    store
        .associations(AssociationFilter {
            organization_id: Some(organization),
            status,
            ..AssociationFilter::default()
        })
        .await
}
