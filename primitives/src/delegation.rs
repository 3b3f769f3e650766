//! Agency-on-behalf-of-advertiser permission grants.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use parse_display::{Display, FromStr};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{DelegationId, Organization, OrganizationId, OrganizationKind};

/// The closed vocabulary of permissions an advertiser may delegate.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, FromStr,
)]
#[serde(rename_all = "snake_case")]
#[display(style = "snake_case")]
pub enum Permission {
    CampaignCreate,
    CampaignManage,
    CampaignView,
    CampaignDelete,
    AssociationInvite,
    AssociationManage,
    AssociationView,
    InvitationCreate,
    InvitationManage,
    InvitationView,
    AnalyticsView,
    AnalyticsExport,
    BillingView,
    BillingManage,
    OrganizationView,
    OrganizationManage,
}

impl Permission {
    pub const ALL: [Permission; 16] = [
        Permission::CampaignCreate,
        Permission::CampaignManage,
        Permission::CampaignView,
        Permission::CampaignDelete,
        Permission::AssociationInvite,
        Permission::AssociationManage,
        Permission::AssociationView,
        Permission::InvitationCreate,
        Permission::InvitationManage,
        Permission::InvitationView,
        Permission::AnalyticsView,
        Permission::AnalyticsExport,
        Permission::BillingView,
        Permission::BillingManage,
        Permission::OrganizationView,
        Permission::OrganizationManage,
    ];
}

pub type Permissions = BTreeSet<Permission>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, FromStr)]
#[serde(rename_all = "snake_case")]
#[display(style = "snake_case")]
pub enum DelegationStatus {
    Pending,
    Active,
    Suspended,
    Revoked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, FromStr)]
#[serde(rename_all = "snake_case")]
#[display(style = "snake_case")]
pub enum DelegationAction {
    Accept,
    Reject,
    Suspend,
    Reactivate,
    Revoke,
}

/// The side of a delegation an actor acts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[display(style = "snake_case")]
pub enum Side {
    Agency,
    Advertiser,
}

impl DelegationAction {
    /// Whether an actor from `side` may perform the action.
    pub fn allowed_from(&self, side: Side) -> bool {
        match self {
            DelegationAction::Accept | DelegationAction::Reject => side == Side::Agency,
            DelegationAction::Suspend | DelegationAction::Reactivate | DelegationAction::Revoke => {
                true
            }
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("Cannot {action} a delegation that is {from}")]
    InvalidTransition {
        action: DelegationAction,
        from: DelegationStatus,
    },
    #[error("Cannot {0} an expired delegation")]
    Expired(DelegationAction),
    #[error("Agency and advertiser organizations cannot be the same")]
    SameOrganization,
    #[error("Organization {0} is not an agency organization")]
    NotAgency(OrganizationId),
    #[error("Organization {0} is not an advertiser organization")]
    NotAdvertiser(OrganizationId),
    #[error("At least one permission is required")]
    NoPermissions,
    #[error("Expiration date must be in the future")]
    ExpiresInThePast,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegation {
    #[serde(rename = "delegation_id")]
    pub id: DelegationId,
    pub agency_org_id: OrganizationId,
    pub advertiser_org_id: OrganizationId,
    pub status: DelegationStatus,
    pub permissions: Permissions,
    #[serde(rename = "delegated_by_user_id")]
    pub delegated_by: Uuid,
    #[serde(default, rename = "accepted_by_user_id")]
    pub accepted_by: Option<Uuid>,
    #[serde(default)]
    pub accepted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Delegation {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |expires_at| expires_at < now)
    }

    /// Active and not past its expiration.
    pub fn is_effective(&self, now: DateTime<Utc>) -> bool {
        self.status == DelegationStatus::Active && !self.is_expired(now)
    }

    /// The side `organization` is on, if it is a party to the delegation.
    pub fn side_of(&self, organization: OrganizationId) -> Option<Side> {
        if organization == self.agency_org_id {
            Some(Side::Agency)
        } else if organization == self.advertiser_org_id {
            Some(Side::Advertiser)
        } else {
            None
        }
    }

    /// Applies a lifecycle action:
    ///
    /// ```text
    /// pending   -- accept     --> active
    /// pending   -- reject     --> revoked
    /// active    -- suspend    --> suspended
    /// suspended -- reactivate --> active
    /// pending | active | suspended -- revoke --> revoked
    /// ```
    ///
    /// Accepting or reactivating an expired delegation is refused.
    pub fn transition(
        &mut self,
        action: DelegationAction,
        actor: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), Error> {
        use DelegationAction::*;
        use DelegationStatus::*;

        let next = match (action, self.status) {
            (Accept, Pending) => Active,
            (Reject, Pending) => Revoked,
            (Suspend, Active) => Suspended,
            (Reactivate, Suspended) => Active,
            (Revoke, Pending | Active | Suspended) => Revoked,
            (action, from) => return Err(Error::InvalidTransition { action, from }),
        };

        if matches!(action, Accept | Reactivate) && self.is_expired(now) {
            return Err(Error::Expired(action));
        }

        if action == Accept {
            self.accepted_by = Some(actor);
            self.accepted_at = Some(now);
        }
        self.status = next;
        self.updated_at = now;

        Ok(())
    }

    pub fn update_permissions(
        &mut self,
        permissions: Permissions,
        now: DateTime<Utc>,
    ) -> Result<(), Error> {
        if permissions.is_empty() {
            return Err(Error::NoPermissions);
        }
        self.permissions = permissions;
        self.updated_at = now;

        Ok(())
    }

    /// `None` removes the expiration.
    pub fn update_expiration(
        &mut self,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<(), Error> {
        if matches!(expires_at, Some(expires_at) if expires_at <= now) {
            return Err(Error::ExpiresInThePast);
        }
        self.expires_at = expires_at;
        self.updated_at = now;

        Ok(())
    }

    pub fn check_permissions(&self, requested: &[Permission], now: DateTime<Utc>) -> PermissionCheck {
        let is_expired = self.is_expired(now);
        let effective = self.status == DelegationStatus::Active && !is_expired;

        let permission_results: BTreeMap<Permission, bool> = requested
            .iter()
            .map(|permission| (*permission, effective && self.permissions.contains(permission)))
            .collect();

        PermissionCheck {
            has_permissions: !requested.is_empty() && permission_results.values().all(|granted| *granted),
            permission_results,
            delegation_status: self.status,
            is_expired,
        }
    }
}

/// Answer to "may this agency do these things for this advertiser?".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionCheck {
    pub has_permissions: bool,
    pub permission_results: BTreeMap<Permission, bool>,
    pub delegation_status: DelegationStatus,
    pub is_expired: bool,
}

impl PermissionCheck {
    /// The answer when no delegation exists between the two organizations.
    pub fn no_delegation(requested: &[Permission]) -> Self {
        Self {
            has_permissions: false,
            permission_results: requested.iter().map(|permission| (*permission, false)).collect(),
            delegation_status: DelegationStatus::Revoked,
            is_expired: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDelegation {
    pub agency_org_id: OrganizationId,
    pub advertiser_org_id: OrganizationId,
    pub permissions: Permissions,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewDelegation {
    pub fn validate(
        &self,
        agency: &Organization,
        advertiser: &Organization,
        now: DateTime<Utc>,
    ) -> Result<(), Error> {
        if self.agency_org_id == self.advertiser_org_id {
            return Err(Error::SameOrganization);
        }
        if self.permissions.is_empty() {
            return Err(Error::NoPermissions);
        }
        if matches!(self.expires_at, Some(expires_at) if expires_at <= now) {
            return Err(Error::ExpiresInThePast);
        }
        if !agency.is(OrganizationKind::Agency) {
            return Err(Error::NotAgency(agency.id));
        }
        if !advertiser.is(OrganizationKind::Advertiser) {
            return Err(Error::NotAdvertiser(advertiser.id));
        }

        Ok(())
    }

    pub fn into_pending(self, id: DelegationId, delegated_by: Uuid, now: DateTime<Utc>) -> Delegation {
        Delegation {
            id,
            agency_org_id: self.agency_org_id,
            advertiser_org_id: self.advertiser_org_id,
            status: DelegationStatus::Pending,
            permissions: self.permissions,
            delegated_by,
            accepted_by: None,
            accepted_at: None,
            message: self.message,
            expires_at: self.expires_at,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckPermissions {
    pub agency_org_id: OrganizationId,
    pub advertiser_org_id: OrganizationId,
    pub permissions: Vec<Permission>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePermissions {
    pub permissions: Permissions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateExpiration {
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

#[cfg(feature = "postgres")]
mod postgres {
    use postgres_types::Json;
    use tokio_postgres::Row;

    use super::{Delegation, DelegationStatus, Permissions};
    use crate::util::postgres::impl_text_sql;

    impl_text_sql!(DelegationStatus);

    impl From<&Row> for Delegation {
        fn from(row: &Row) -> Self {
            Self {
                id: row.get("delegation_id"),
                agency_org_id: row.get("agency_org_id"),
                advertiser_org_id: row.get("advertiser_org_id"),
                status: row.get("status"),
                permissions: row.get::<_, Json<Permissions>>("permissions").0,
                delegated_by: row.get("delegated_by_user_id"),
                accepted_by: row.get("accepted_by_user_id"),
                accepted_at: row.get("accepted_at"),
                message: row.get("message"),
                expires_at: row.get("expires_at"),
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
            }
        }
    }
}

#[cfg(test)]
mod test {
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::test_util::{dummy_delegation, dummy_organization};

    #[test]
    fn vocabulary_is_closed() {
        assert_eq!(16, Permission::ALL.len());
        assert_eq!(
            Permission::CampaignManage,
            "campaign_manage".parse().expect("Should parse")
        );
        assert!("campaign_launch".parse::<Permission>().is_err());
        assert!(serde_json::from_str::<Permission>("\"root\"").is_err());
    }

    #[test]
    fn lifecycle() {
        let now = Utc::now();
        let actor = Uuid::new_v4();
        let mut delegation = dummy_delegation(OrganizationId(20), OrganizationId(30));
        delegation.status = DelegationStatus::Pending;

        delegation
            .transition(DelegationAction::Accept, actor, now)
            .expect("Should accept");
        assert_eq!(DelegationStatus::Active, delegation.status);
        assert_eq!(Some(actor), delegation.accepted_by);

        delegation
            .transition(DelegationAction::Suspend, actor, now)
            .expect("Should suspend");
        delegation
            .transition(DelegationAction::Reactivate, actor, now)
            .expect("Should reactivate");
        delegation
            .transition(DelegationAction::Revoke, actor, now)
            .expect("Should revoke");

        assert_eq!(
            Err(Error::InvalidTransition {
                action: DelegationAction::Reactivate,
                from: DelegationStatus::Revoked
            }),
            delegation.transition(DelegationAction::Reactivate, actor, now)
        );
    }

    #[test]
    fn reject_revokes_a_pending_delegation() {
        let mut delegation = dummy_delegation(OrganizationId(20), OrganizationId(30));
        delegation.status = DelegationStatus::Pending;

        delegation
            .transition(DelegationAction::Reject, Uuid::new_v4(), Utc::now())
            .expect("Should reject");

        assert_eq!(DelegationStatus::Revoked, delegation.status);
    }

    #[test]
    fn expired_delegation_cannot_be_accepted() {
        let now = Utc::now();
        let mut delegation = dummy_delegation(OrganizationId(20), OrganizationId(30));
        delegation.status = DelegationStatus::Pending;
        delegation.expires_at = Some(now - Duration::seconds(1));

        assert_eq!(
            Err(Error::Expired(DelegationAction::Accept)),
            delegation.transition(DelegationAction::Accept, Uuid::new_v4(), now)
        );
        assert_eq!(DelegationStatus::Pending, delegation.status);
    }

    #[test]
    fn only_the_agency_accepts_or_rejects() {
        assert!(DelegationAction::Accept.allowed_from(Side::Agency));
        assert!(!DelegationAction::Accept.allowed_from(Side::Advertiser));
        assert!(!DelegationAction::Reject.allowed_from(Side::Advertiser));
        assert!(DelegationAction::Revoke.allowed_from(Side::Advertiser));
        assert!(DelegationAction::Suspend.allowed_from(Side::Agency));
    }

    #[test]
    fn expired_delegation_grants_nothing() {
        let now = Utc::now();
        let mut delegation = dummy_delegation(OrganizationId(20), OrganizationId(30));
        delegation.permissions = [Permission::CampaignManage].into_iter().collect();
        delegation.expires_at = Some(now - Duration::seconds(1));

        let check = delegation.check_permissions(&[Permission::CampaignManage], now);

        assert!(!check.has_permissions);
        assert!(check.is_expired);
        assert_eq!(DelegationStatus::Active, check.delegation_status);
        assert_eq!(Some(&false), check.permission_results.get(&Permission::CampaignManage));
    }

    #[test]
    fn check_reports_each_permission() {
        let now = Utc::now();
        let mut delegation = dummy_delegation(OrganizationId(20), OrganizationId(30));
        delegation.permissions = [Permission::CampaignView, Permission::BillingView]
            .into_iter()
            .collect();

        let check = delegation.check_permissions(
            &[Permission::CampaignView, Permission::BillingManage],
            now,
        );
        assert!(!check.has_permissions);
        assert_eq!(Some(&true), check.permission_results.get(&Permission::CampaignView));
        assert_eq!(Some(&false), check.permission_results.get(&Permission::BillingManage));

        let check = delegation.check_permissions(&[Permission::CampaignView], now);
        assert!(check.has_permissions);

        delegation.status = DelegationStatus::Suspended;
        let check = delegation.check_permissions(&[Permission::CampaignView], now);
        assert!(!check.has_permissions);
    }

    #[test]
    fn creation_rules() {
        let now = Utc::now();
        let agency = dummy_organization(OrganizationId(20), OrganizationKind::Agency);
        let advertiser = dummy_organization(OrganizationId(30), OrganizationKind::Advertiser);
        let new = NewDelegation {
            agency_org_id: agency.id,
            advertiser_org_id: advertiser.id,
            permissions: Permissions::new(),
            message: None,
            expires_at: None,
        };
        assert_eq!(Err(Error::NoPermissions), new.validate(&agency, &advertiser, now));

        let new = NewDelegation {
            permissions: [Permission::CampaignView].into_iter().collect(),
            ..new
        };
        assert_eq!(Ok(()), new.validate(&agency, &advertiser, now));

        let other_advertiser = dummy_organization(OrganizationId(31), OrganizationKind::Advertiser);
        assert_eq!(
            Err(Error::NotAgency(other_advertiser.id)),
            new.validate(&other_advertiser, &advertiser, now)
        );

        let past = NewDelegation {
            expires_at: Some(now - Duration::minutes(1)),
            ..new
        };
        assert_eq!(Err(Error::ExpiresInThePast), past.validate(&agency, &advertiser, now));
    }

    #[test]
    fn expiration_must_be_in_the_future() {
        let now = Utc::now();
        let mut delegation = dummy_delegation(OrganizationId(20), OrganizationId(30));

        assert_eq!(
            Err(Error::ExpiresInThePast),
            delegation.update_expiration(Some(now - Duration::days(1)), now)
        );
        delegation
            .update_expiration(Some(now + Duration::days(1)), now)
            .expect("Should update");
        delegation
            .update_expiration(None, now)
            .expect("Should clear the expiration");
        assert_eq!(None, delegation.expires_at);
    }
}
