//! Campaigns of advertisers and affiliates of affiliate organizations.
//!
//! Reads outside the caller's own organization go through the visibility
//! graph: an affiliate organization sees the campaigns its active
//! associations expose and the other way round.

use chrono::{DateTime, Utc};

use primitives::{
    affiliate::{NewAffiliate, UpdateAffiliate},
    campaign::{NewCampaign, UpdateCampaign},
    Affiliate, AffiliateId, Campaign, CampaignId, Organization, OrganizationId, OrganizationKind,
    Permission,
};

use crate::{
    error::Error,
    services::{authz, visibility},
    store::Store,
    Actor,
};

async fn organization_of_kind(
    store: &dyn Store,
    id: OrganizationId,
    kind: OrganizationKind,
) -> Result<Organization, Error> {
    let organization = store
        .organization(id)
        .await?
        .ok_or_else(|| Error::not_found("Organization"))?;

    if organization.is(kind) {
        Ok(organization)
    } else {
        Err(Error::InvalidInput(format!(
            "Organization {id} is not an {kind} organization"
        )))
    }
}

pub async fn create_campaign(
    store: &dyn Store,
    actor: &Actor,
    new: NewCampaign,
    now: DateTime<Utc>,
) -> Result<Campaign, Error> {
    new.validate()?;
    authz::authorize(
        store,
        actor,
        new.organization_id,
        Some(Permission::CampaignCreate),
        now,
    )
    .await?;
    organization_of_kind(store, new.organization_id, OrganizationKind::Advertiser).await?;

    store.create_campaign(new, now).await
}

/// Readable by whoever acts for the advertiser and by the affiliate
/// organizations it is visible to.
pub async fn campaign(
    store: &dyn Store,
    actor: &Actor,
    id: CampaignId,
    now: DateTime<Utc>,
) -> Result<Campaign, Error> {
    let campaign = store
        .campaign(id)
        .await?
        .ok_or_else(|| Error::not_found("Campaign"))?;

    if authz::may_act_for(
        store,
        actor,
        campaign.organization_id,
        Some(Permission::CampaignView),
        now,
    )
    .await?
    {
        return Ok(campaign);
    }

    if let Some(viewer) = actor.organization_id {
        let visible =
            visibility::campaigns_visible_to(store, viewer, Some(campaign.organization_id)).await?;
        if visible.iter().any(|visible| visible.id == id) {
            return Ok(campaign);
        }
    }

    Err(Error::not_found("Campaign"))
}

/// `GET /campaigns`: the caller's own campaigns, every campaign for admins.
pub async fn campaigns(store: &dyn Store, actor: &Actor) -> Result<Vec<Campaign>, Error> {
    let organization = if actor.is_admin() {
        None
    } else {
        Some(actor.organization()?)
    };

    store.campaigns(organization).await
}

/// `GET /organizations/:id/campaigns`
pub async fn organization_campaigns(
    store: &dyn Store,
    actor: &Actor,
    organization: OrganizationId,
    now: DateTime<Utc>,
) -> Result<Vec<Campaign>, Error> {
    authz::authorize_read(
        store,
        actor,
        organization,
        Some(Permission::CampaignView),
        "Organization",
        now,
    )
    .await?;

    store.campaigns(Some(organization)).await
}

pub async fn update_campaign(
    store: &dyn Store,
    actor: &Actor,
    id: CampaignId,
    update: UpdateCampaign,
    now: DateTime<Utc>,
) -> Result<Campaign, Error> {
    let campaign = campaign(store, actor, id, now).await?;
    authz::authorize(
        store,
        actor,
        campaign.organization_id,
        Some(Permission::CampaignManage),
        now,
    )
    .await?;

    store
        .update_campaign(id, Box::new(move |campaign| Ok(update.apply(campaign, now)?)))
        .await
}

pub async fn delete_campaign(
    store: &dyn Store,
    actor: &Actor,
    id: CampaignId,
    now: DateTime<Utc>,
) -> Result<(), Error> {
    let campaign = campaign(store, actor, id, now).await?;
    authz::authorize(
        store,
        actor,
        campaign.organization_id,
        Some(Permission::CampaignDelete),
        now,
    )
    .await?;

    store.delete_campaign(id).await
}

/// Affiliates are managed by the members of their organization only.
pub async fn create_affiliate(
    store: &dyn Store,
    actor: &Actor,
    new: NewAffiliate,
    now: DateTime<Utc>,
) -> Result<Affiliate, Error> {
    new.validate()?;
    authz::authorize(store, actor, new.organization_id, None, now).await?;
    organization_of_kind(store, new.organization_id, OrganizationKind::Affiliate).await?;

    store.create_affiliate(new, now).await
}

pub async fn affiliate(
    store: &dyn Store,
    actor: &Actor,
    id: AffiliateId,
    now: DateTime<Utc>,
) -> Result<Affiliate, Error> {
    let affiliate = store
        .affiliate(id)
        .await?
        .ok_or_else(|| Error::not_found("Affiliate"))?;

    if authz::may_act_for(store, actor, affiliate.organization_id, None, now).await? {
        return Ok(affiliate);
    }

    if let Some(viewer) = actor.organization_id {
        let visible =
            visibility::affiliates_visible_to(store, viewer, Some(affiliate.organization_id))
                .await?;
        if visible.iter().any(|visible| visible.id == id) {
            return Ok(affiliate);
        }
    }

    Err(Error::not_found("Affiliate"))
}

/// `GET /affiliates`: the caller's own affiliates, every affiliate for admins.
pub async fn affiliates(store: &dyn Store, actor: &Actor) -> Result<Vec<Affiliate>, Error> {
    let organization = if actor.is_admin() {
        None
    } else {
        Some(actor.organization()?)
    };

    store.affiliates(organization).await
}

/// `GET /organizations/:id/affiliates`
pub async fn organization_affiliates(
    store: &dyn Store,
    actor: &Actor,
    organization: OrganizationId,
    now: DateTime<Utc>,
) -> Result<Vec<Affiliate>, Error> {
    authz::authorize_read(store, actor, organization, None, "Organization", now).await?;

    store.affiliates(Some(organization)).await
}

pub async fn update_affiliate(
    store: &dyn Store,
    actor: &Actor,
    id: AffiliateId,
    update: UpdateAffiliate,
    now: DateTime<Utc>,
) -> Result<Affiliate, Error> {
    let affiliate = affiliate(store, actor, id, now).await?;
    authz::authorize(store, actor, affiliate.organization_id, None, now).await?;

    store
        .update_affiliate(id, Box::new(move |affiliate| Ok(update.apply(affiliate, now)?)))
        .await
}

pub async fn delete_affiliate(
    store: &dyn Store,
    actor: &Actor,
    id: AffiliateId,
    now: DateTime<Utc>,
) -> Result<(), Error> {
    let affiliate = affiliate(store, actor, id, now).await?;
    authz::authorize(store, actor, affiliate.organization_id, None, now).await?;

    store.delete_affiliate(id).await
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;

    use primitives::{
        association::IdSet,
        test_util::{
            dummy_affiliate, dummy_association, dummy_campaign, dummy_delegation,
            dummy_organization, DUMMY_CREATED_AT,
        },
        CampaignPricing, CampaignStatus, Role,
    };

    use crate::{store::MemoryStore, test_util::dummy_actor};

    use super::*;

    const ADVERTISER: OrganizationId = OrganizationId(1);
    const AFFILIATE: OrganizationId = OrganizationId(2);
    const AGENCY: OrganizationId = OrganizationId(3);

    fn setup() -> MemoryStore {
        let store = MemoryStore::new();
        for (id, kind) in [
            (ADVERTISER, OrganizationKind::Advertiser),
            (AFFILIATE, OrganizationKind::Affiliate),
            (AGENCY, OrganizationKind::Agency),
        ] {
            store
                .insert_organization(dummy_organization(id, kind))
                .expect("Should insert");
        }

        store
    }

    fn new_campaign(organization: OrganizationId) -> NewCampaign {
        NewCampaign {
            organization_id: organization,
            name: "Spring sale".into(),
            description: None,
            status: CampaignStatus::Active,
            pricing: CampaignPricing {
                fixed_click_amount: Some(Decimal::new(25, 2)),
                ..CampaignPricing::default()
            },
        }
    }

    #[tokio::test]
    async fn campaigns_belong_to_advertisers() {
        let store = setup();
        let now = *DUMMY_CREATED_AT;
        let advertiser = dummy_actor(Role::AdvertiserManager, Some(ADVERTISER));
        let affiliate = dummy_actor(Role::AffiliateManager, Some(AFFILIATE));

        let created = create_campaign(&store, &advertiser, new_campaign(ADVERTISER), now)
            .await
            .expect("Should create");
        assert_eq!(ADVERTISER, created.organization_id);

        let error = create_campaign(&store, &affiliate, new_campaign(AFFILIATE), now)
            .await
            .expect_err("Should refuse");
        assert_eq!("invalid_input", error.kind());

        let error = create_campaign(&store, &affiliate, new_campaign(ADVERTISER), now)
            .await
            .expect_err("Should be forbidden");
        assert_eq!("forbidden", error.kind());
    }

    #[tokio::test]
    async fn campaigns_are_read_through_the_visibility_graph() {
        let store = setup();
        let now = *DUMMY_CREATED_AT;
        for id in [7, 8] {
            store
                .insert_campaign(dummy_campaign(CampaignId(id), ADVERTISER))
                .expect("Should insert");
        }
        let mut association = dummy_association(ADVERTISER, AFFILIATE);
        association.all_campaigns_visible = false;
        association.visible_campaign_ids = Some(IdSet::from_iter([CampaignId(7)]));
        store.insert_association(association).expect("Should insert");

        let affiliate = dummy_actor(Role::AffiliateManager, Some(AFFILIATE));

        let visible = campaign(&store, &affiliate, CampaignId(7), now)
            .await
            .expect("Should be visible");
        assert_eq!(CampaignId(7), visible.id);

        let error = campaign(&store, &affiliate, CampaignId(8), now)
            .await
            .expect_err("Should be hidden");
        assert_eq!(Error::NotFound("Campaign not found".into()), error);

        // seeing is not managing
        let error = update_campaign(
            &store,
            &affiliate,
            CampaignId(7),
            UpdateCampaign {
                name: Some("Renamed".into()),
                ..UpdateCampaign::default()
            },
            now,
        )
        .await
        .expect_err("Should be forbidden");
        assert_eq!("forbidden", error.kind());
    }

    #[tokio::test]
    async fn agencies_manage_campaigns_with_the_delegated_permissions() {
        let store = setup();
        let now = *DUMMY_CREATED_AT;
        store
            .insert_campaign(dummy_campaign(CampaignId(1), ADVERTISER))
            .expect("Should insert");
        let mut delegation = dummy_delegation(AGENCY, ADVERTISER);
        delegation
            .permissions
            .extend([Permission::CampaignManage, Permission::CampaignCreate]);
        store.insert_delegation(delegation).expect("Should insert");

        let agency = dummy_actor(Role::AgencyManager, Some(AGENCY));

        let updated = update_campaign(
            &store,
            &agency,
            CampaignId(1),
            UpdateCampaign {
                status: Some(CampaignStatus::Paused),
                ..UpdateCampaign::default()
            },
            now,
        )
        .await
        .expect("Should update");
        assert_eq!(CampaignStatus::Paused, updated.status);

        let listed = organization_campaigns(&store, &agency, ADVERTISER, now)
            .await
            .expect("Should list");
        assert_eq!(vec![updated], listed);

        let error = delete_campaign(&store, &agency, CampaignId(1), now)
            .await
            .expect_err("Should be forbidden");
        assert_eq!("forbidden", error.kind());
    }

    #[tokio::test]
    async fn affiliates_are_managed_by_their_organization() {
        let store = setup();
        let now = *DUMMY_CREATED_AT;
        let affiliate_manager = dummy_actor(Role::AffiliateManager, Some(AFFILIATE));
        let advertiser = dummy_actor(Role::AdvertiserManager, Some(ADVERTISER));

        let created = create_affiliate(
            &store,
            &affiliate_manager,
            NewAffiliate {
                organization_id: AFFILIATE,
                name: "Coupon site".into(),
                contact_email: Some("partners@coupons.test".into()),
                status: Default::default(),
            },
            now,
        )
        .await
        .expect("Should create");

        // not associated yet
        let error = affiliate(&store, &advertiser, created.id, now)
            .await
            .expect_err("Should be hidden");
        assert_eq!("not_found", error.kind());

        store
            .insert_association(dummy_association(ADVERTISER, AFFILIATE))
            .expect("Should insert");
        let found = affiliate(&store, &advertiser, created.id, now)
            .await
            .expect("Should be visible");
        assert_eq!(created, found);

        let error = delete_affiliate(&store, &advertiser, created.id, now)
            .await
            .expect_err("Should be forbidden");
        assert_eq!("forbidden", error.kind());

        delete_affiliate(&store, &affiliate_manager, created.id, now)
            .await
            .expect("Should delete");
        assert!(affiliates(&store, &affiliate_manager)
            .await
            .expect("Should list")
            .is_empty());

        store
            .insert_affiliate(dummy_affiliate(AffiliateId(9), AFFILIATE))
            .expect("Should insert");
        assert_eq!(
            1,
            organization_affiliates(&store, &affiliate_manager, AFFILIATE, now)
                .await
                .expect("Should list")
                .len()
        );
    }
}
