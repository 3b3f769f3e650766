//! Organizations, profiles and roles.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use primitives::{
    api::Pagination,
    organization::{NewOrganization, UpdateOrganization},
    profile::{RoleInfo, UpdateProfile, UpsertProfile},
    Organization, OrganizationId, OrganizationKind, Permission, Profile, Role,
};

use crate::{
    error::Error,
    services::authz,
    store::{AssociationFilter, Store},
    Actor,
};

/// The role given to the creator of an organization of `kind`.
pub fn manager_role(kind: OrganizationKind) -> Role {
    match kind {
        OrganizationKind::Advertiser => Role::AdvertiserManager,
        OrganizationKind::Affiliate => Role::AffiliateManager,
        OrganizationKind::Agency => Role::AgencyManager,
        OrganizationKind::PlatformOwner => Role::PlatformOwner,
    }
}

/// Creates an organization.
///
/// A caller who is not an admin must not belong to an organization yet; the
/// caller is attached to the new organization as its manager. Only admins
/// create the platform owner.
pub async fn create_organization(
    store: &dyn Store,
    actor: &Actor,
    new: NewOrganization,
    now: DateTime<Utc>,
) -> Result<Organization, Error> {
    new.validate()?;

    if actor.is_admin() {
        return store.create_organization(new, now).await;
    }

    if new.kind == OrganizationKind::PlatformOwner {
        return Err(Error::Forbidden(
            "Only an admin may create the platform owner organization".into(),
        ));
    }
    if actor.organization_id.is_some() {
        return Err(Error::PreconditionFailed(
            "User already belongs to an organization".into(),
        ));
    }

    let organization = store.create_organization(new, now).await?;
    let role = manager_role(organization.kind);

    match store.profile(actor.user_id).await? {
        Some(_) => {
            let organization_id = organization.id;
            store
                .update_profile(
                    actor.user_id,
                    Box::new(move |profile| {
                        UpdateProfile {
                            organization_id: Some(organization_id),
                            role: Some(role),
                            ..UpdateProfile::default()
                        }
                        .apply(profile, now);
                        Ok(())
                    }),
                )
                .await?;
        }
        None => {
            let upsert = UpsertProfile {
                id: actor.user_id,
                email: actor.email.clone().unwrap_or_default(),
                organization_id: Some(organization.id),
                role: Some(role),
                first_name: None,
                last_name: None,
            };
            store.create_profile(upsert.into_new(now)).await?;
        }
    }

    Ok(organization)
}

/// Members, delegated agencies and organizations associated with it may see
/// an organization.
pub async fn organization(
    store: &dyn Store,
    actor: &Actor,
    id: OrganizationId,
    now: DateTime<Utc>,
) -> Result<Organization, Error> {
    let organization = store
        .organization(id)
        .await?
        .ok_or_else(|| Error::not_found("Organization"))?;

    if authz::may_act_for(store, actor, id, Some(Permission::OrganizationView), now).await? {
        return Ok(organization);
    }

    if let Some(viewer) = actor.organization_id {
        let associated = store
            .associations(AssociationFilter {
                organization_id: Some(viewer),
                ..AssociationFilter::default()
            })
            .await?
            .iter()
            .any(|association| association.involves(id));

        if associated {
            return Ok(organization);
        }
    }

    Err(Error::not_found("Organization"))
}

/// Every organization for admins, otherwise the caller's own.
pub async fn organizations(
    store: &dyn Store,
    actor: &Actor,
    pagination: Pagination,
) -> Result<Vec<Organization>, Error> {
    if actor.is_admin() {
        return store.organizations(pagination).await;
    }

    let own = match actor.organization_id {
        Some(id) => store.organization(id).await?.into_iter().collect(),
        None => vec![],
    };

    Ok(pagination.paginate(own))
}

pub async fn update_organization(
    store: &dyn Store,
    actor: &Actor,
    id: OrganizationId,
    update: UpdateOrganization,
    now: DateTime<Utc>,
) -> Result<Organization, Error> {
    authz::authorize(store, actor, id, Some(Permission::OrganizationManage), now).await?;

    store
        .update_organization(id, Box::new(move |organization| Ok(update.apply(organization, now)?)))
        .await
}

pub async fn delete_organization(
    store: &dyn Store,
    actor: &Actor,
    id: OrganizationId,
) -> Result<(), Error> {
    if !actor.is_admin() {
        return Err(Error::forbidden());
    }

    store.delete_organization(id).await
}

/// The caller's stored profile.
pub async fn me(store: &dyn Store, actor: &Actor) -> Result<Profile, Error> {
    store
        .profile(actor.user_id)
        .await?
        .ok_or_else(|| Error::not_found("Profile"))
}

pub fn role(actor: &Actor) -> RoleInfo {
    RoleInfo::from(actor.role)
}

/// Only admins manage other profiles, set roles or move profiles between
/// organizations.
async fn check_profile_write(
    store: &dyn Store,
    actor: &Actor,
    id: Uuid,
    privileged: bool,
    organization: Option<OrganizationId>,
) -> Result<(), Error> {
    if !actor.is_admin() {
        if actor.user_id != id {
            return Err(Error::forbidden());
        }
        if privileged {
            return Err(Error::Forbidden(
                "Only an admin may change the role or the organization of a profile".into(),
            ));
        }
    }

    if let Some(organization) = organization {
        store
            .organization(organization)
            .await?
            .ok_or_else(|| Error::not_found("Organization"))?;
    }

    Ok(())
}

fn validate_email(email: &str) -> Result<(), Error> {
    if email.trim().is_empty() || !email.contains('@') {
        return Err(Error::InvalidInput("A valid email is required".into()));
    }

    Ok(())
}

pub async fn create_profile(
    store: &dyn Store,
    actor: &Actor,
    new: UpsertProfile,
    now: DateTime<Utc>,
) -> Result<Profile, Error> {
    validate_email(&new.email)?;
    let privileged = new.role.is_some() || new.organization_id.is_some();
    check_profile_write(store, actor, new.id, privileged, new.organization_id).await?;

    store.create_profile(new.into_new(now)).await
}

/// Creates the profile of the auth subject or merges the given attributes
/// into it. Repeating the same upsert changes nothing.
pub async fn upsert_profile(
    store: &dyn Store,
    actor: &Actor,
    upsert: UpsertProfile,
    now: DateTime<Utc>,
) -> Result<Profile, Error> {
    validate_email(&upsert.email)?;

    // a caller may repeat the role and organization it already has
    let unchanged = store.profile(upsert.id).await?.map_or(false, |profile| {
        upsert.role.map_or(true, |role| role == profile.role)
            && upsert
                .organization_id
                .map_or(true, |organization| profile.belongs_to(organization))
    });
    let privileged = (upsert.role.is_some() || upsert.organization_id.is_some()) && !unchanged;
    check_profile_write(store, actor, upsert.id, privileged, upsert.organization_id).await?;

    store.upsert_profile(upsert, now).await
}

pub async fn update_profile(
    store: &dyn Store,
    actor: &Actor,
    id: Uuid,
    update: UpdateProfile,
    now: DateTime<Utc>,
) -> Result<Profile, Error> {
    if let Some(email) = &update.email {
        validate_email(email)?;
    }
    check_profile_write(store, actor, id, update.is_privileged(), update.organization_id).await?;

    store
        .update_profile(
            id,
            Box::new(move |profile| {
                update.apply(profile, now);
                Ok(())
            }),
        )
        .await
}

pub async fn delete_profile(store: &dyn Store, actor: &Actor, id: Uuid) -> Result<(), Error> {
    if !actor.is_admin() && actor.user_id != id {
        return Err(Error::forbidden());
    }

    store.delete_profile(id).await
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use primitives::test_util::{dummy_association, dummy_organization, DUMMY_CREATED_AT};

    use crate::{store::MemoryStore, test_util::dummy_actor};

    use super::*;

    fn new_organization(kind: OrganizationKind) -> NewOrganization {
        NewOrganization {
            name: format!("New {kind}"),
            kind,
            description: None,
        }
    }

    #[tokio::test]
    async fn creator_is_attached_as_manager() {
        let store = MemoryStore::new();
        let now = *DUMMY_CREATED_AT;
        let mut actor = dummy_actor(Role::Affiliate, None);
        actor.email = Some("founder@advertiser.test".into());

        let organization =
            create_organization(&store, &actor, new_organization(OrganizationKind::Advertiser), now)
                .await
                .expect("Should create");

        let profile = me(&store, &actor).await.expect("Should have a profile");
        assert_eq!(Some(organization.id), profile.organization_id);
        assert_eq!(Role::AdvertiserManager, profile.role);
        assert_eq!("founder@advertiser.test", profile.email);

        // now a member, a second organization is refused
        actor.organization_id = profile.organization_id;
        let error =
            create_organization(&store, &actor, new_organization(OrganizationKind::Affiliate), now)
                .await
                .expect_err("Should be refused");
        assert_eq!("precondition_failed", error.kind());
    }

    #[tokio::test]
    async fn only_one_platform_owner_and_only_by_admins() {
        let store = MemoryStore::new();
        let now = *DUMMY_CREATED_AT;

        let user = dummy_actor(Role::Affiliate, None);
        let error = create_organization(
            &store,
            &user,
            new_organization(OrganizationKind::PlatformOwner),
            now,
        )
        .await
        .expect_err("Should be forbidden");
        assert_eq!("forbidden", error.kind());

        let admin = dummy_actor(Role::Admin, None);
        create_organization(
            &store,
            &admin,
            new_organization(OrganizationKind::PlatformOwner),
            now,
        )
        .await
        .expect("Should create");

        let error = create_organization(
            &store,
            &admin,
            new_organization(OrganizationKind::PlatformOwner),
            now,
        )
        .await
        .expect_err("Should conflict");
        assert_eq!(
            Error::Conflict("Platform owner organization already exists".into()),
            error
        );
    }

    #[tokio::test]
    async fn organizations_are_hidden_from_strangers() {
        let store = MemoryStore::new();
        let now = *DUMMY_CREATED_AT;
        for (id, kind) in [
            (1, OrganizationKind::Advertiser),
            (2, OrganizationKind::Affiliate),
            (3, OrganizationKind::Affiliate),
        ] {
            store
                .insert_organization(dummy_organization(OrganizationId(id), kind))
                .expect("Should insert");
        }
        store
            .insert_association(dummy_association(OrganizationId(1), OrganizationId(2)))
            .expect("Should insert");

        let associated = dummy_actor(Role::AffiliateManager, Some(OrganizationId(2)));
        let stranger = dummy_actor(Role::AffiliateManager, Some(OrganizationId(3)));

        let found = organization(&store, &associated, OrganizationId(1), now)
            .await
            .expect("Should be visible");
        assert_eq!(OrganizationId(1), found.id);

        let error = organization(&store, &stranger, OrganizationId(1), now)
            .await
            .expect_err("Should be hidden");
        assert_eq!(Error::NotFound("Organization not found".into()), error);
    }

    #[tokio::test]
    async fn upsert_is_idempotent_and_roles_are_admin_only() {
        let store = MemoryStore::new();
        let now = *DUMMY_CREATED_AT;
        let actor = dummy_actor(Role::Affiliate, None);

        let upsert = UpsertProfile {
            id: actor.user_id,
            email: "someone@affiliate.test".into(),
            organization_id: None,
            role: None,
            first_name: Some("Some".into()),
            last_name: None,
        };

        let first = upsert_profile(&store, &actor, upsert.clone(), now)
            .await
            .expect("Should create");
        let second = upsert_profile(&store, &actor, upsert.clone(), now + chrono::Duration::hours(1))
            .await
            .expect("Should merge");
        assert_eq!(first, second);

        let escalation = UpsertProfile {
            role: Some(Role::Admin),
            ..upsert
        };
        let error = upsert_profile(&store, &actor, escalation.clone(), now)
            .await
            .expect_err("Should be forbidden");
        assert_eq!("forbidden", error.kind());

        let admin = dummy_actor(Role::Admin, None);
        let promoted = upsert_profile(&store, &admin, escalation, now)
            .await
            .expect("Admins may set roles");
        assert_eq!(Role::Admin, promoted.role);
    }

    #[tokio::test]
    async fn profiles_of_others_are_admin_only() {
        let store = MemoryStore::new();
        let now = *DUMMY_CREATED_AT;
        let owner = dummy_actor(Role::Affiliate, None);
        let other = dummy_actor(Role::Affiliate, None);

        create_profile(
            &store,
            &owner,
            UpsertProfile {
                id: owner.user_id,
                email: "owner@affiliate.test".into(),
                organization_id: None,
                role: None,
                first_name: None,
                last_name: None,
            },
            now,
        )
        .await
        .expect("Should create");

        let rename = UpdateProfile {
            first_name: Some("Mallory".into()),
            ..UpdateProfile::default()
        };
        let error = update_profile(&store, &other, owner.user_id, rename.clone(), now)
            .await
            .expect_err("Should be forbidden");
        assert_eq!("forbidden", error.kind());

        let renamed = update_profile(&store, &owner, owner.user_id, rename, now)
            .await
            .expect("Should update");
        assert_eq!(Some("Mallory".to_string()), renamed.first_name);

        delete_profile(&store, &owner, owner.user_id)
            .await
            .expect("Should delete");
        assert_eq!("not_found", me(&store, &owner).await.expect_err("Gone").kind());
    }
}
