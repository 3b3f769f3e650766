use chrono::{DateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use slog::{o, Discard, Logger};
use uuid::Uuid;

use crate::{
    affiliate::AffiliateStatus,
    association::CreationPath,
    billing::BillingAccount,
    delegation::Permissions,
    Affiliate, AffiliateId, Association, AssociationId, AssociationStatus, BillingAccountId,
    Campaign, CampaignId, CampaignPricing, CampaignStatus, Delegation, DelegationId,
    DelegationStatus, Invitation, InvitationId, InvitationStatus, InvitationToken, Organization,
    OrganizationId, OrganizationKind, Permission, Profile, Role,
};

/// Creation time of every dummy entity.
pub static DUMMY_CREATED_AT: Lazy<DateTime<Utc>> =
    Lazy::new(|| Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());

pub static DUMMY_ADMIN_ID: Lazy<Uuid> = Lazy::new(|| {
    Uuid::parse_str("8f5d2c3e-7f63-4c0a-9a38-0b6d6b1f3a01").expect("valid uuid")
});

pub fn discard_logger() -> Logger {
    Logger::root(Discard, o!())
}

pub fn dummy_organization(id: OrganizationId, kind: OrganizationKind) -> Organization {
    Organization {
        id,
        name: format!("{kind} organization {id}"),
        kind,
        description: None,
        created_at: *DUMMY_CREATED_AT,
        updated_at: *DUMMY_CREATED_AT,
    }
}

pub fn dummy_profile(organization: Option<OrganizationId>, role: Role) -> Profile {
    let id = Uuid::new_v4();

    Profile {
        id,
        organization_id: organization,
        role,
        email: format!("{}@dummy.test", id.simple()),
        first_name: None,
        last_name: None,
        created_at: *DUMMY_CREATED_AT,
        updated_at: *DUMMY_CREATED_AT,
    }
}

/// An active campaign with no pricing.
pub fn dummy_campaign(id: CampaignId, organization: OrganizationId) -> Campaign {
    Campaign {
        id,
        organization_id: organization,
        name: format!("Campaign {id}"),
        description: None,
        status: CampaignStatus::Active,
        pricing: CampaignPricing::default(),
        created_at: *DUMMY_CREATED_AT,
        updated_at: *DUMMY_CREATED_AT,
    }
}

pub fn dummy_affiliate(id: AffiliateId, organization: OrganizationId) -> Affiliate {
    Affiliate {
        id,
        organization_id: organization,
        name: format!("Affiliate {id}"),
        contact_email: None,
        status: AffiliateStatus::Active,
        created_at: *DUMMY_CREATED_AT,
        updated_at: *DUMMY_CREATED_AT,
    }
}

/// An active association through which everything is visible.
pub fn dummy_association(advertiser: OrganizationId, affiliate: OrganizationId) -> Association {
    Association {
        id: AssociationId(1),
        advertiser_org_id: advertiser,
        affiliate_org_id: affiliate,
        status: AssociationStatus::Active,
        creation_path: CreationPath::Request,
        visible_affiliate_ids: None,
        visible_campaign_ids: None,
        all_affiliates_visible: true,
        all_campaigns_visible: true,
        requested_by: Some(*DUMMY_ADMIN_ID),
        approved_by: Some(*DUMMY_ADMIN_ID),
        approved_at: Some(*DUMMY_CREATED_AT),
        message: None,
        created_at: *DUMMY_CREATED_AT,
        updated_at: *DUMMY_CREATED_AT,
    }
}

/// An active invitation without cap, expiry or allow-list.
pub fn dummy_invitation(advertiser: OrganizationId) -> Invitation {
    Invitation {
        id: InvitationId(1),
        advertiser_org_id: advertiser,
        token: InvitationToken::generate(),
        name: "Dummy invitation".into(),
        description: None,
        allowed_affiliate_org_ids: None,
        max_uses: None,
        current_uses: 0,
        expires_at: None,
        status: InvitationStatus::Active,
        default_all_affiliates_visible: true,
        default_all_campaigns_visible: true,
        default_visible_affiliate_ids: None,
        default_visible_campaign_ids: None,
        message: None,
        created_by: *DUMMY_ADMIN_ID,
        created_at: *DUMMY_CREATED_AT,
        updated_at: *DUMMY_CREATED_AT,
    }
}

/// An active, non-expiring delegation granting `campaign_view`.
pub fn dummy_delegation(agency: OrganizationId, advertiser: OrganizationId) -> Delegation {
    Delegation {
        id: DelegationId(1),
        agency_org_id: agency,
        advertiser_org_id: advertiser,
        status: DelegationStatus::Active,
        permissions: Permissions::from([Permission::CampaignView]),
        delegated_by: *DUMMY_ADMIN_ID,
        accepted_by: Some(*DUMMY_ADMIN_ID),
        accepted_at: Some(*DUMMY_CREATED_AT),
        message: None,
        expires_at: None,
        created_at: *DUMMY_CREATED_AT,
        updated_at: *DUMMY_CREATED_AT,
    }
}

pub fn dummy_billing_account(organization: OrganizationId) -> BillingAccount {
    BillingAccount::new(
        BillingAccountId(organization.as_i64()),
        organization,
        Some(format!("cus_dummy_{organization}")),
        None,
        *DUMMY_CREATED_AT,
    )
}
