//! Invitation links issued by advertisers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use primitives::{
    invitation::{
        NewInvitation, UpdateInvitation, UsageLogEntry, UseAttempt, UseInvitation,
        UseInvitationResponse, UseOutcome, UseRejection,
    },
    Invitation, InvitationId, InvitationToken, OrganizationId, OrganizationKind, Permission,
};

use crate::{
    error::Error,
    services::authz,
    store::Store,
    Actor, RequestOrigin,
};

/// Attempts at finding a free token before giving up.
const TOKEN_ATTEMPTS: usize = 3;

/// What anybody holding the token may see, `GET /public/invitations/:token`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicInvitation {
    pub invitation_id: InvitationId,
    pub name: String,
    pub description: Option<String>,
    pub message: Option<String>,
    pub advertiser_org_id: OrganizationId,
    pub advertiser_name: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_usable: bool,
}

/// `?advertiser_org_id=`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct InvitationQuery {
    #[serde(default)]
    pub advertiser_org_id: Option<OrganizationId>,
}

async fn managed(
    store: &dyn Store,
    actor: &Actor,
    id: InvitationId,
    permission: Permission,
    now: DateTime<Utc>,
) -> Result<Invitation, Error> {
    let invitation = store
        .invitation(id)
        .await?
        .ok_or_else(|| Error::not_found("Invitation"))?;

    authz::authorize_read(
        store,
        actor,
        invitation.advertiser_org_id,
        Some(permission),
        "Invitation",
        now,
    )
    .await?;

    Ok(invitation)
}

pub async fn create(
    store: &dyn Store,
    actor: &Actor,
    new: NewInvitation,
    now: DateTime<Utc>,
) -> Result<Invitation, Error> {
    authz::authorize(
        store,
        actor,
        new.advertiser_org_id,
        Some(Permission::InvitationCreate),
        now,
    )
    .await?;

    let advertiser = store
        .organization(new.advertiser_org_id)
        .await?
        .ok_or_else(|| Error::not_found("Advertiser organization"))?;
    if !advertiser.is(OrganizationKind::Advertiser) {
        return Err(Error::InvalidInput(format!(
            "Organization {} is not an advertiser organization",
            advertiser.id
        )));
    }
    new.validate(now)?;

    let mut attempt = 1;
    loop {
        match store
            .create_invitation(new.clone(), InvitationToken::generate(), actor.user_id, now)
            .await
        {
            Err(Error::Conflict(_)) if attempt < TOKEN_ATTEMPTS => attempt += 1,
            result => return result,
        }
    }
}

pub async fn get(
    store: &dyn Store,
    actor: &Actor,
    id: InvitationId,
    now: DateTime<Utc>,
) -> Result<Invitation, Error> {
    managed(store, actor, id, Permission::InvitationView, now).await
}

/// Admins list any advertiser's invitations, everybody else those of their
/// own organization.
pub async fn list(
    store: &dyn Store,
    actor: &Actor,
    query: InvitationQuery,
    now: DateTime<Utc>,
) -> Result<Vec<Invitation>, Error> {
    match query.advertiser_org_id {
        None if actor.is_admin() => store.invitations(None).await,
        None => store.invitations(Some(actor.organization()?)).await,
        Some(advertiser) => {
            authz::authorize_read(
                store,
                actor,
                advertiser,
                Some(Permission::InvitationView),
                "Organization",
                now,
            )
            .await?;

            store.invitations(Some(advertiser)).await
        }
    }
}

pub async fn update(
    store: &dyn Store,
    actor: &Actor,
    id: InvitationId,
    update: UpdateInvitation,
    now: DateTime<Utc>,
) -> Result<Invitation, Error> {
    managed(store, actor, id, Permission::InvitationManage, now).await?;

    store
        .update_invitation(
            id,
            Box::new(move |invitation| Ok(update.apply(invitation, now)?)),
        )
        .await
}

pub async fn delete(
    store: &dyn Store,
    actor: &Actor,
    id: InvitationId,
    now: DateTime<Utc>,
) -> Result<(), Error> {
    managed(store, actor, id, Permission::InvitationManage, now).await?;

    store.delete_invitation(id).await
}

pub async fn usage_history(
    store: &dyn Store,
    actor: &Actor,
    id: InvitationId,
    now: DateTime<Utc>,
) -> Result<Vec<UsageLogEntry>, Error> {
    managed(store, actor, id, Permission::InvitationView, now).await?;

    store.invitation_usage(id).await
}

/// The public link of the invitation under `base`.
pub async fn link(
    store: &dyn Store,
    actor: &Actor,
    id: InvitationId,
    base: &Url,
    now: DateTime<Utc>,
) -> Result<Url, Error> {
    let invitation = managed(store, actor, id, Permission::InvitationView, now).await?;

    invitation
        .link(base)
        .map_err(|error| Error::Internal(format!("Invitation link: {error}")))
}

/// Uses the invitation for the affiliate organization of the body, or of
/// the caller when absent.
///
/// An already existing association is not an error: the response carries
/// it with `success: false`. Every other refusal fails with the kind of
/// the [`UseRejection`].
pub async fn use_invitation(
    store: &dyn Store,
    actor: &Actor,
    origin: &RequestOrigin,
    body: UseInvitation,
    now: DateTime<Utc>,
) -> Result<UseInvitationResponse, Error> {
    let affiliate_org_id = match body.affiliate_org_id {
        Some(affiliate) => affiliate,
        None => actor.organization()?,
    };
    if !actor.is_admin() && !actor.belongs_to(affiliate_org_id) {
        return Err(Error::Forbidden(
            "You can only use invitations for your own organization".into(),
        ));
    }

    let attempt = UseAttempt {
        token: body.token,
        affiliate_org_id,
        used_by: actor.user_id,
        message: body.message,
        ip_address: origin.ip_address.clone(),
        user_agent: origin.user_agent.clone(),
    };

    match store.use_invitation(&attempt, now).await? {
        UseOutcome::Created {
            association,
            invitation,
        } => Ok(UseInvitationResponse {
            success: true,
            association: Some(association),
            invitation: Some(invitation),
            error_message: None,
        }),
        UseOutcome::Existing {
            association,
            invitation,
        } => Ok(UseInvitationResponse {
            success: false,
            association: Some(association),
            invitation: Some(invitation),
            error_message: Some(UseRejection::AssociationExists.to_string()),
        }),
        UseOutcome::Rejected { rejection, .. } => Err(rejection.into()),
    }
}

/// Unauthenticated lookup by token.
pub async fn public(
    store: &dyn Store,
    token: &InvitationToken,
    now: DateTime<Utc>,
) -> Result<PublicInvitation, Error> {
    let invitation = store
        .invitation_by_token(token)
        .await?
        .ok_or_else(|| Error::not_found("Invitation"))?;
    let advertiser = store
        .organization(invitation.advertiser_org_id)
        .await?
        .ok_or_else(|| Error::not_found("Advertiser organization"))?;

    let is_usable = !invitation.is_expired(now)
        && !invitation.is_usage_limit_reached()
        && invitation.status == primitives::InvitationStatus::Active;

    Ok(PublicInvitation {
        invitation_id: invitation.id,
        name: invitation.name,
        description: invitation.description,
        message: invitation.message,
        advertiser_org_id: advertiser.id,
        advertiser_name: advertiser.name,
        expires_at: invitation.expires_at,
        is_usable,
    })
}

/// Marks the active invitations past their expiration as expired.
pub async fn expire(store: &dyn Store, now: DateTime<Utc>) -> Result<u64, Error> {
    store.expire_invitations(now).await
}

#[cfg(test)]
mod test {
    use chrono::Duration;
    use futures::future::join_all;
    use pretty_assertions::assert_eq;

    use primitives::{
        test_util::{dummy_association, dummy_invitation, dummy_organization, DUMMY_CREATED_AT},
        AssociationStatus, CreationPath, InvitationStatus, Role,
    };

    use crate::{
        store::{AssociationStore, MemoryStore},
        test_util::dummy_actor,
    };

    use super::*;

    fn new_invitation(advertiser: OrganizationId) -> NewInvitation {
        NewInvitation {
            advertiser_org_id: advertiser,
            name: "Spring partners".into(),
            description: None,
            allowed_affiliate_org_ids: None,
            max_uses: None,
            expires_at: None,
            default_all_affiliates_visible: None,
            default_all_campaigns_visible: None,
            default_visible_affiliate_ids: None,
            default_visible_campaign_ids: None,
            message: Some("Join us".into()),
        }
    }

    fn use_body(token: &InvitationToken) -> UseInvitation {
        UseInvitation {
            token: token.clone(),
            affiliate_org_id: None,
            message: None,
        }
    }

    #[tokio::test]
    async fn the_usage_cap_holds_under_concurrent_uses() {
        let store = MemoryStore::new();
        let now = *DUMMY_CREATED_AT;
        let advertiser_org = OrganizationId(1);
        store
            .insert_organization(dummy_organization(advertiser_org, OrganizationKind::Advertiser))
            .expect("Should insert");
        let affiliates = [OrganizationId(101), OrganizationId(102), OrganizationId(103)];
        for affiliate in affiliates {
            store
                .insert_organization(dummy_organization(affiliate, OrganizationKind::Affiliate))
                .expect("Should insert");
        }

        let advertiser = dummy_actor(Role::AdvertiserManager, Some(advertiser_org));
        let invitation = create(
            &store,
            &advertiser,
            NewInvitation {
                max_uses: Some(2),
                ..new_invitation(advertiser_org)
            },
            now,
        )
        .await
        .expect("Should create");
        assert_eq!(64, invitation.token.as_str().len());

        let actors = affiliates.map(|affiliate| dummy_actor(Role::AffiliateManager, Some(affiliate)));
        let origin = RequestOrigin::default();
        let results = join_all(actors.iter().map(|actor| {
            use_invitation(&store, actor, &origin, use_body(&invitation.token), now)
        }))
        .await;

        let successes = results
            .iter()
            .filter(|result| matches!(result, Ok(response) if response.success))
            .count();
        assert_eq!(2, successes);

        let failures: Vec<&Error> = results.iter().filter_map(|result| result.as_ref().err()).collect();
        assert_eq!(
            vec![&Error::Conflict("Invitation usage limit has been reached".into())],
            failures
        );

        let stored = get(&store, &advertiser, invitation.id, now)
            .await
            .expect("Should get");
        assert_eq!(2, stored.current_uses);
        assert_eq!(InvitationStatus::Active, stored.status);

        let history = usage_history(&store, &advertiser, invitation.id, now)
            .await
            .expect("Should list");
        assert_eq!(3, history.len());
        assert_eq!(2, history.iter().filter(|entry| entry.success).count());
        assert_eq!(
            Some("Invitation usage limit has been reached"),
            history
                .iter()
                .find(|entry| !entry.success)
                .and_then(|entry| entry.error_message.as_deref())
        );

        let associations = store
            .associations(Default::default())
            .await
            .expect("Should list");
        assert_eq!(2, associations.len());
        assert!(associations
            .iter()
            .all(|association| association.creation_path == CreationPath::Request
                && association.status == AssociationStatus::Pending));
    }

    #[tokio::test]
    async fn using_with_an_existing_association_changes_nothing() {
        let store = MemoryStore::new();
        let now = *DUMMY_CREATED_AT;
        let advertiser_org = OrganizationId(5);
        let affiliate_org = OrganizationId(200);
        store
            .insert_organization(dummy_organization(advertiser_org, OrganizationKind::Advertiser))
            .expect("Should insert");
        store
            .insert_organization(dummy_organization(affiliate_org, OrganizationKind::Affiliate))
            .expect("Should insert");
        let existing = dummy_association(advertiser_org, affiliate_org);
        store
            .insert_association(existing.clone())
            .expect("Should insert");
        let invitation = dummy_invitation(advertiser_org);
        store
            .insert_invitation(invitation.clone())
            .expect("Should insert");

        let affiliate = dummy_actor(Role::AffiliateManager, Some(affiliate_org));
        let response = use_invitation(
            &store,
            &affiliate,
            &RequestOrigin {
                ip_address: Some("203.0.113.7".into()),
                user_agent: Some("tests".into()),
            },
            use_body(&invitation.token),
            now,
        )
        .await
        .expect("Should answer");

        assert!(!response.success);
        assert_eq!(Some(existing), response.association);
        assert_eq!(Some("Association already exists".to_string()), response.error_message);

        let admin = dummy_actor(Role::Admin, None);
        let stored = get(&store, &admin, invitation.id, now)
            .await
            .expect("Should get");
        assert_eq!(0, stored.current_uses);

        let history = usage_history(&store, &admin, invitation.id, now)
            .await
            .expect("Should list");
        assert_eq!(1, history.len());
        assert!(!history[0].success);
        assert_eq!(Some("203.0.113.7".to_string()), history[0].ip_address);
    }

    #[tokio::test]
    async fn invitations_are_issued_by_advertisers_only() {
        let store = MemoryStore::new();
        let now = *DUMMY_CREATED_AT;
        let affiliate_org = OrganizationId(2);
        store
            .insert_organization(dummy_organization(affiliate_org, OrganizationKind::Affiliate))
            .expect("Should insert");
        let affiliate = dummy_actor(Role::AffiliateManager, Some(affiliate_org));

        let error = create(&store, &affiliate, new_invitation(affiliate_org), now)
            .await
            .expect_err("Should refuse");
        assert_eq!("invalid_input", error.kind());

        let stranger = dummy_actor(Role::AdvertiserManager, Some(OrganizationId(9)));
        let error = create(&store, &stranger, new_invitation(affiliate_org), now)
            .await
            .expect_err("Should be forbidden");
        assert_eq!("forbidden", error.kind());
    }

    #[tokio::test]
    async fn public_lookup_link_and_expiry() {
        let store = MemoryStore::new();
        let now = *DUMMY_CREATED_AT;
        let advertiser_org = OrganizationId(1);
        store
            .insert_organization(dummy_organization(advertiser_org, OrganizationKind::Advertiser))
            .expect("Should insert");
        let advertiser = dummy_actor(Role::AdvertiserManager, Some(advertiser_org));

        let invitation = create(
            &store,
            &advertiser,
            NewInvitation {
                expires_at: Some(now + Duration::days(1)),
                ..new_invitation(advertiser_org)
            },
            now,
        )
        .await
        .expect("Should create");

        let base = Url::parse("https://app.affiliate.test/").expect("Valid url");
        let link = link(&store, &advertiser, invitation.id, &base, now)
            .await
            .expect("Should link");
        assert_eq!(
            format!("https://app.affiliate.test/invitations/{}", invitation.token),
            link.to_string()
        );

        let public_view = public(&store, &invitation.token, now)
            .await
            .expect("Should find");
        assert!(public_view.is_usable);
        assert_eq!("advertiser organization 1", public_view.advertiser_name);

        let later = now + Duration::days(2);
        assert_eq!(1, expire(&store, later).await.expect("Should expire"));
        assert_eq!(0, expire(&store, later).await.expect("Should expire"));
        assert!(!public(&store, &invitation.token, later)
            .await
            .expect("Should find")
            .is_usable);

        let error = public(&store, &InvitationToken::generate(), now)
            .await
            .expect_err("Should not find");
        assert_eq!("not_found", error.kind());
    }

    #[tokio::test]
    async fn strangers_do_not_find_invitations() {
        let store = MemoryStore::new();
        let now = *DUMMY_CREATED_AT;
        let invitation = dummy_invitation(OrganizationId(1));
        store
            .insert_invitation(invitation.clone())
            .expect("Should insert");
        let stranger = dummy_actor(Role::AdvertiserManager, Some(OrganizationId(2)));

        let error = get(&store, &stranger, invitation.id, now)
            .await
            .expect_err("Should be hidden");
        assert_eq!(Error::NotFound("Invitation not found".into()), error);

        let error = update(
            &store,
            &stranger,
            invitation.id,
            UpdateInvitation::default(),
            now,
        )
        .await
        .expect_err("Should be hidden");
        assert_eq!("not_found", error.kind());

        assert!(list(&store, &stranger, InvitationQuery::default(), now)
            .await
            .expect("Should list")
            .is_empty());
    }
}
