//! The bipartite graph between advertiser and affiliate organizations.
//!
//! An [`Association`] carries the lifecycle of the relationship and the
//! visibility subsets each side grants the other. Only `active` associations
//! make anything visible.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use parse_display::{Display, FromStr};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    organization::{Organization, OrganizationKind},
    Affiliate, AffiliateId, AssociationId, Campaign, CampaignId, OrganizationId,
};

pub use id_set::IdSet;

mod id_set {
    use std::collections::{btree_set, BTreeSet};

    use serde::{Deserialize, Serialize};

    /// An explicit set of ids, persisted as a JSON array.
    ///
    /// The empty set means "none explicit", which is different from an
    /// absent set only in that it replaces a prior set on update.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct IdSet<T: Ord>(BTreeSet<T>);

    impl<T: Ord> IdSet<T> {
        pub fn new() -> Self {
            Self(BTreeSet::new())
        }

        pub fn contains(&self, id: &T) -> bool {
            self.0.contains(id)
        }

        pub fn is_empty(&self) -> bool {
            self.0.is_empty()
        }

        pub fn len(&self) -> usize {
            self.0.len()
        }

        pub fn iter(&self) -> btree_set::Iter<'_, T> {
            self.0.iter()
        }
    }

    impl<T: Ord> Default for IdSet<T> {
        fn default() -> Self {
            Self::new()
        }
    }

    impl<T: Ord> FromIterator<T> for IdSet<T> {
        fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
            Self(iter.into_iter().collect())
        }
    }

    impl<T: Ord> IntoIterator for IdSet<T> {
        type Item = T;
        type IntoIter = btree_set::IntoIter<T>;

        fn into_iter(self) -> Self::IntoIter {
            self.0.into_iter()
        }
    }

    impl<T: Ord> From<BTreeSet<T>> for IdSet<T> {
        fn from(set: BTreeSet<T>) -> Self {
            Self(set)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, FromStr)]
#[serde(rename_all = "snake_case")]
#[display(style = "snake_case")]
pub enum AssociationStatus {
    Pending,
    Active,
    Suspended,
    Rejected,
}

/// Which side initiated the association.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, FromStr)]
#[serde(rename_all = "snake_case")]
#[display(style = "snake_case")]
pub enum CreationPath {
    /// The advertiser invited the affiliate.
    Invitation,
    /// The affiliate asked the advertiser, directly or by using an invitation link.
    Request,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[display(style = "snake_case")]
pub enum AssociationAction {
    Approve,
    Reject,
    Suspend,
    Reactivate,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Cannot {action} an association which is {from}")]
    InvalidAction {
        action: AssociationAction,
        from: AssociationStatus,
    },
    #[error("Cannot move an association from {from} to {to}")]
    InvalidTarget {
        from: AssociationStatus,
        to: AssociationStatus,
    },
}

impl AssociationStatus {
    /// The state machine shared by both creation paths:
    ///
    /// ```text
    /// pending --approve--> active --suspend--> suspended --reactivate--> active
    /// pending --reject---> rejected
    /// ```
    pub fn apply(self, action: AssociationAction) -> Result<Self, TransitionError> {
        use AssociationAction::*;
        use AssociationStatus::*;

        match (self, action) {
            (Pending, Approve) => Ok(Active),
            (Pending, Reject) => Ok(Rejected),
            (Active, Suspend) => Ok(Suspended),
            (Suspended, Reactivate) => Ok(Active),
            (from, action) => Err(TransitionError::InvalidAction { action, from }),
        }
    }

    /// Finds the action leading from `self` to `to`.
    pub fn action_towards(self, to: Self) -> Result<AssociationAction, TransitionError> {
        [
            AssociationAction::Approve,
            AssociationAction::Reject,
            AssociationAction::Suspend,
            AssociationAction::Reactivate,
        ]
        .into_iter()
        .find(|action| self.apply(*action) == Ok(to))
        .ok_or(TransitionError::InvalidTarget { from: self, to })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Association {
    #[serde(rename = "association_id")]
    pub id: AssociationId,
    pub advertiser_org_id: OrganizationId,
    pub affiliate_org_id: OrganizationId,
    pub status: AssociationStatus,
    #[serde(rename = "association_type")]
    pub creation_path: CreationPath,
    #[serde(default)]
    pub visible_affiliate_ids: Option<IdSet<AffiliateId>>,
    #[serde(default)]
    pub visible_campaign_ids: Option<IdSet<CampaignId>>,
    pub all_affiliates_visible: bool,
    pub all_campaigns_visible: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_by: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Association {
    pub fn involves(&self, organization: OrganizationId) -> bool {
        self.advertiser_org_id == organization || self.affiliate_org_id == organization
    }

    /// The organization expected to answer a pending association: the
    /// affiliate for an invitation, the advertiser for a request.
    pub fn responder(&self) -> OrganizationId {
        match self.creation_path {
            CreationPath::Invitation => self.affiliate_org_id,
            CreationPath::Request => self.advertiser_org_id,
        }
    }

    /// Moves the association through `action`, recording the approver when
    /// it becomes active for the first time.
    pub fn transition(
        &mut self,
        action: AssociationAction,
        actor: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        let next = self.status.apply(action)?;

        if action == AssociationAction::Approve {
            self.approved_by = Some(actor);
            self.approved_at = Some(now);
        }
        self.status = next;
        self.updated_at = now;

        Ok(())
    }

    /// Affiliates of `affiliate_org_id` the advertiser side may see.
    ///
    /// - not active: nothing
    /// - `all_affiliates_visible`: every affiliate of the affiliate organization
    /// - otherwise: the explicit ids, restricted to the affiliate organization
    pub fn visible_affiliates<'a>(&self, affiliates: &'a [Affiliate]) -> Vec<&'a Affiliate> {
        if self.status != AssociationStatus::Active {
            return vec![];
        }

        affiliates
            .iter()
            .filter(|affiliate| affiliate.organization_id == self.affiliate_org_id)
            .filter(|affiliate| {
                self.all_affiliates_visible
                    || self
                        .visible_affiliate_ids
                        .as_ref()
                        .map_or(false, |ids| ids.contains(&affiliate.id))
            })
            .collect()
    }

    /// Campaigns of `advertiser_org_id` the affiliate side may see, with the
    /// same rules as [`Association::visible_affiliates`].
    pub fn visible_campaigns<'a>(&self, campaigns: &'a [Campaign]) -> Vec<&'a Campaign> {
        if self.status != AssociationStatus::Active {
            return vec![];
        }

        campaigns
            .iter()
            .filter(|campaign| campaign.organization_id == self.advertiser_org_id)
            .filter(|campaign| {
                self.all_campaigns_visible
                    || self
                        .visible_campaign_ids
                        .as_ref()
                        .map_or(false, |ids| ids.contains(&campaign.id))
            })
            .collect()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("Advertiser and affiliate organizations must be different")]
    SameOrganization,
    #[error("Organization {0} is not an advertiser organization")]
    NotAdvertiser(OrganizationId),
    #[error("Organization {0} is not an affiliate organization")]
    NotAffiliate(OrganizationId),
}

/// Body of both creation paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAssociation {
    pub advertiser_org_id: OrganizationId,
    pub affiliate_org_id: OrganizationId,
    #[serde(default)]
    pub visible_affiliate_ids: Option<IdSet<AffiliateId>>,
    #[serde(default)]
    pub visible_campaign_ids: Option<IdSet<CampaignId>>,
    #[serde(default)]
    pub all_affiliates_visible: Option<bool>,
    #[serde(default)]
    pub all_campaigns_visible: Option<bool>,
    #[serde(default)]
    pub message: Option<String>,
}

impl NewAssociation {
    /// Checks the pair against the organizations it names.
    pub fn validate(
        &self,
        advertiser: &Organization,
        affiliate: &Organization,
    ) -> Result<(), Error> {
        if self.advertiser_org_id == self.affiliate_org_id {
            return Err(Error::SameOrganization);
        }
        if advertiser.kind != OrganizationKind::Advertiser {
            return Err(Error::NotAdvertiser(advertiser.id));
        }
        if affiliate.kind != OrganizationKind::Affiliate {
            return Err(Error::NotAffiliate(affiliate.id));
        }

        Ok(())
    }

    /// A pending association; the visibility flags default to `true`.
    pub fn into_pending(
        self,
        id: AssociationId,
        path: CreationPath,
        requested_by: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Association {
        Association {
            id,
            advertiser_org_id: self.advertiser_org_id,
            affiliate_org_id: self.affiliate_org_id,
            status: AssociationStatus::Pending,
            creation_path: path,
            visible_affiliate_ids: self.visible_affiliate_ids,
            visible_campaign_ids: self.visible_campaign_ids,
            all_affiliates_visible: self.all_affiliates_visible.unwrap_or(true),
            all_campaigns_visible: self.all_campaigns_visible.unwrap_or(true),
            requested_by,
            approved_by: None,
            approved_at: None,
            message: self.message,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Body of `updateVisibility`. A present set replaces the prior one, the
/// empty set included; an absent field is left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateVisibility {
    #[serde(default)]
    pub visible_affiliate_ids: Option<IdSet<AffiliateId>>,
    #[serde(default)]
    pub visible_campaign_ids: Option<IdSet<CampaignId>>,
    #[serde(default)]
    pub all_affiliates_visible: Option<bool>,
    #[serde(default)]
    pub all_campaigns_visible: Option<bool>,
    #[serde(default)]
    pub status: Option<AssociationStatus>,
}

impl UpdateVisibility {
    /// Applies the update; a status change must follow the state machine
    /// and nothing is modified when it does not.
    pub fn apply(
        self,
        association: &mut Association,
        actor: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if let Some(status) = self.status.filter(|status| *status != association.status) {
            let action = association.status.action_towards(status)?;
            association.transition(action, actor, now)?;
        }

        if let Some(ids) = self.visible_affiliate_ids {
            association.visible_affiliate_ids = Some(ids);
        }
        if let Some(ids) = self.visible_campaign_ids {
            association.visible_campaign_ids = Some(ids);
        }
        if let Some(all) = self.all_affiliates_visible {
            association.all_affiliates_visible = all;
        }
        if let Some(all) = self.all_campaigns_visible {
            association.all_campaigns_visible = all;
        }
        association.updated_at = now;

        Ok(())
    }
}

/// Union of the affiliates visible to `viewer` through every association.
pub fn resolve_visible_affiliates<'a>(
    associations: &[Association],
    affiliates: &'a [Affiliate],
) -> Vec<&'a Affiliate> {
    let visible = associations
        .iter()
        .flat_map(|association| association.visible_affiliates(affiliates))
        .map(|affiliate| affiliate.id)
        .collect::<BTreeSet<_>>();

    affiliates
        .iter()
        .filter(|affiliate| visible.contains(&affiliate.id))
        .collect()
}

/// Union of the campaigns visible through every association.
pub fn resolve_visible_campaigns<'a>(
    associations: &[Association],
    campaigns: &'a [Campaign],
) -> Vec<&'a Campaign> {
    let visible = associations
        .iter()
        .flat_map(|association| association.visible_campaigns(campaigns))
        .map(|campaign| campaign.id)
        .collect::<BTreeSet<_>>();

    campaigns
        .iter()
        .filter(|campaign| visible.contains(&campaign.id))
        .collect()
}

#[cfg(feature = "postgres")]
mod postgres {
    use tokio_postgres::Row;

    use super::{Association, AssociationStatus, CreationPath, IdSet};
    use crate::{
        util::postgres::{impl_json_sql, impl_text_sql},
        AffiliateId, CampaignId, OrganizationId,
    };

    impl_text_sql!(AssociationStatus, CreationPath);
    impl_json_sql!(IdSet<AffiliateId>, IdSet<CampaignId>, IdSet<OrganizationId>);

    impl From<&Row> for Association {
        fn from(row: &Row) -> Self {
            Self {
                id: row.get("association_id"),
                advertiser_org_id: row.get("advertiser_org_id"),
                affiliate_org_id: row.get("affiliate_org_id"),
                status: row.get("status"),
                creation_path: row.get("association_type"),
                visible_affiliate_ids: row.get("visible_affiliate_ids"),
                visible_campaign_ids: row.get("visible_campaign_ids"),
                all_affiliates_visible: row.get("all_affiliates_visible"),
                all_campaigns_visible: row.get("all_campaigns_visible"),
                requested_by: row.get("requested_by"),
                approved_by: row.get("approved_by"),
                approved_at: row.get("approved_at"),
                message: row.get("message"),
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
            }
        }
    }
}
