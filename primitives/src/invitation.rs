//! Token-bearing invitation links issued by advertisers.
//!
//! An affiliate organization that uses a usable invitation gets a pending
//! association (request path) seeded with the invitation's default
//! visibility settings.

use std::fmt;

use chrono::{DateTime, Utc};
use parse_display::{Display, FromStr};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    association::{IdSet, NewAssociation},
    AffiliateId, Association, AssociationId, CampaignId, InvitationId, OrganizationId,
};

/// Number of random bytes in a token, hex-encoded into 64 characters.
pub const TOKEN_BYTES: usize = 32;

#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvitationToken(String);

impl InvitationToken {
    /// 256 bits from the operating system's CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0_u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);

        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for InvitationToken {
    fn from(token: String) -> Self {
        Self(token)
    }
}

impl fmt::Display for InvitationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Only a prefix of the token ends up in logs and debug output.
impl fmt::Debug for InvitationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = self.0.get(..8).unwrap_or(&self.0);

        write!(f, "InvitationToken({prefix}...)")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, FromStr)]
#[serde(rename_all = "snake_case")]
#[display(style = "snake_case")]
pub enum InvitationStatus {
    Active,
    Disabled,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invitation {
    #[serde(rename = "invitation_id")]
    pub id: InvitationId,
    pub advertiser_org_id: OrganizationId,
    #[serde(rename = "invitation_token")]
    pub token: InvitationToken,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// When absent or empty every affiliate organization may use the invitation.
    #[serde(default)]
    pub allowed_affiliate_org_ids: Option<IdSet<OrganizationId>>,
    #[serde(default)]
    pub max_uses: Option<i32>,
    pub current_uses: i32,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub status: InvitationStatus,
    pub default_all_affiliates_visible: bool,
    pub default_all_campaigns_visible: bool,
    #[serde(default)]
    pub default_visible_affiliate_ids: Option<IdSet<AffiliateId>>,
    #[serde(default)]
    pub default_visible_campaign_ids: Option<IdSet<CampaignId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Why an attempt to use an invitation did not create an association.
///
/// The `Display` text is the message returned to the caller and stored in
/// the usage log.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum UseRejection {
    #[error("Invitation not found")]
    NotFound,
    #[error("Invitation has expired")]
    Expired,
    #[error("Invitation usage limit has been reached")]
    UsageLimitReached,
    #[error("Invitation is not active")]
    NotActive,
    #[error("Your organization is not allowed to use this invitation")]
    NotAllowed,
    #[error("Affiliate organization not found")]
    AffiliateOrganizationNotFound,
    #[error("Organization is not an affiliate organization")]
    NotAffiliateOrganization,
    #[error("Association already exists")]
    AssociationExists,
}

impl Invitation {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == InvitationStatus::Expired
            || self.expires_at.map_or(false, |expires_at| expires_at < now)
    }

    pub fn is_usage_limit_reached(&self) -> bool {
        self.max_uses
            .map_or(false, |max_uses| self.current_uses >= max_uses)
    }

    pub fn allows(&self, affiliate_org: OrganizationId) -> bool {
        match &self.allowed_affiliate_org_ids {
            Some(allowed) if !allowed.is_empty() => allowed.contains(&affiliate_org),
            _ => true,
        }
    }

    /// `canBeUsed`: active, not expired, under the cap and allowed for
    /// `affiliate_org`. The first failing condition is reported.
    pub fn check_usable(
        &self,
        affiliate_org: OrganizationId,
        now: DateTime<Utc>,
    ) -> Result<(), UseRejection> {
        if self.is_expired(now) {
            Err(UseRejection::Expired)
        } else if self.is_usage_limit_reached() {
            Err(UseRejection::UsageLimitReached)
        } else if self.status != InvitationStatus::Active {
            Err(UseRejection::NotActive)
        } else if !self.allows(affiliate_org) {
            Err(UseRejection::NotAllowed)
        } else {
            Ok(())
        }
    }

    /// The association request created on a successful use.
    pub fn association_request(
        &self,
        affiliate_org: OrganizationId,
        message: Option<String>,
    ) -> NewAssociation {
        NewAssociation {
            advertiser_org_id: self.advertiser_org_id,
            affiliate_org_id: affiliate_org,
            visible_affiliate_ids: self.default_visible_affiliate_ids.clone(),
            visible_campaign_ids: self.default_visible_campaign_ids.clone(),
            all_affiliates_visible: Some(self.default_all_affiliates_visible),
            all_campaigns_visible: Some(self.default_all_campaigns_visible),
            message,
        }
    }

    /// The public link an affiliate opens to use the invitation.
    pub fn link(&self, base: &url::Url) -> Result<url::Url, url::ParseError> {
        base.join(&format!("invitations/{}", self.token))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("Invitation name is required")]
    EmptyName,
    #[error("Max uses must be at least 1")]
    InvalidMaxUses,
    #[error("Max uses cannot be lower than the current number of uses ({0})")]
    MaxUsesBelowCurrent(i32),
    #[error("Expiration date must be in the future")]
    ExpiresInThePast,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewInvitation {
    pub advertiser_org_id: OrganizationId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub allowed_affiliate_org_ids: Option<IdSet<OrganizationId>>,
    #[serde(default)]
    pub max_uses: Option<i32>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub default_all_affiliates_visible: Option<bool>,
    #[serde(default)]
    pub default_all_campaigns_visible: Option<bool>,
    #[serde(default)]
    pub default_visible_affiliate_ids: Option<IdSet<AffiliateId>>,
    #[serde(default)]
    pub default_visible_campaign_ids: Option<IdSet<CampaignId>>,
    #[serde(default)]
    pub message: Option<String>,
}

impl NewInvitation {
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), Error> {
        if self.name.trim().is_empty() {
            return Err(Error::EmptyName);
        }
        if matches!(self.max_uses, Some(max_uses) if max_uses < 1) {
            return Err(Error::InvalidMaxUses);
        }
        if matches!(self.expires_at, Some(expires_at) if expires_at <= now) {
            return Err(Error::ExpiresInThePast);
        }

        Ok(())
    }

    pub fn into_invitation(
        self,
        id: InvitationId,
        token: InvitationToken,
        created_by: Uuid,
        now: DateTime<Utc>,
    ) -> Invitation {
        Invitation {
            id,
            advertiser_org_id: self.advertiser_org_id,
            token,
            name: self.name,
            description: self.description,
            allowed_affiliate_org_ids: self.allowed_affiliate_org_ids,
            max_uses: self.max_uses,
            current_uses: 0,
            expires_at: self.expires_at,
            status: InvitationStatus::Active,
            default_all_affiliates_visible: self.default_all_affiliates_visible.unwrap_or(true),
            default_all_campaigns_visible: self.default_all_campaigns_visible.unwrap_or(true),
            default_visible_affiliate_ids: self.default_visible_affiliate_ids,
            default_visible_campaign_ids: self.default_visible_campaign_ids,
            message: self.message,
            created_by,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateInvitation {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub allowed_affiliate_org_ids: Option<IdSet<OrganizationId>>,
    /// `null` lifts the cap, an absent field keeps it.
    #[serde(
        default,
        with = "::serde_with::rust::double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_uses: Option<Option<i32>>,
    /// `null` removes the expiry, an absent field keeps it.
    #[serde(
        default,
        with = "::serde_with::rust::double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub expires_at: Option<Option<DateTime<Utc>>>,
    #[serde(default)]
    pub status: Option<InvitationStatus>,
    #[serde(default)]
    pub default_all_affiliates_visible: Option<bool>,
    #[serde(default)]
    pub default_all_campaigns_visible: Option<bool>,
    #[serde(default)]
    pub default_visible_affiliate_ids: Option<IdSet<AffiliateId>>,
    #[serde(default)]
    pub default_visible_campaign_ids: Option<IdSet<CampaignId>>,
    #[serde(default)]
    pub message: Option<String>,
}

impl UpdateInvitation {
    pub fn apply(self, invitation: &mut Invitation, now: DateTime<Utc>) -> Result<(), Error> {
        if matches!(&self.name, Some(name) if name.trim().is_empty()) {
            return Err(Error::EmptyName);
        }
        if let Some(Some(max_uses)) = self.max_uses {
            if max_uses < 1 {
                return Err(Error::InvalidMaxUses);
            }
            if max_uses < invitation.current_uses {
                return Err(Error::MaxUsesBelowCurrent(invitation.current_uses));
            }
        }
        if matches!(self.expires_at, Some(Some(expires_at)) if expires_at <= now) {
            return Err(Error::ExpiresInThePast);
        }

        if let Some(name) = self.name {
            invitation.name = name;
        }
        if let Some(description) = self.description {
            invitation.description = Some(description);
        }
        if let Some(allowed) = self.allowed_affiliate_org_ids {
            invitation.allowed_affiliate_org_ids = Some(allowed);
        }
        if let Some(max_uses) = self.max_uses {
            invitation.max_uses = max_uses;
        }
        if let Some(expires_at) = self.expires_at {
            invitation.expires_at = expires_at;
        }
        if let Some(status) = self.status {
            invitation.status = status;
        }
        if let Some(all) = self.default_all_affiliates_visible {
            invitation.default_all_affiliates_visible = all;
        }
        if let Some(all) = self.default_all_campaigns_visible {
            invitation.default_all_campaigns_visible = all;
        }
        if let Some(ids) = self.default_visible_affiliate_ids {
            invitation.default_visible_affiliate_ids = Some(ids);
        }
        if let Some(ids) = self.default_visible_campaign_ids {
            invitation.default_visible_campaign_ids = Some(ids);
        }
        if let Some(message) = self.message {
            invitation.message = Some(message);
        }
        invitation.updated_at = now;

        Ok(())
    }
}

/// Body of `POST /advertiser-association-invitations/use`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UseInvitation {
    #[serde(rename = "invitation_token")]
    pub token: InvitationToken,
    /// Defaults to the caller's organization.
    #[serde(default)]
    pub affiliate_org_id: Option<OrganizationId>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Who is using an invitation and from where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UseAttempt {
    pub token: InvitationToken,
    pub affiliate_org_id: OrganizationId,
    pub used_by: Uuid,
    pub message: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UseInvitationResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub association: Option<Association>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invitation: Option<Invitation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Append-only record of every use attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageLogEntry {
    pub usage_id: i64,
    /// Absent when the token matched no invitation.
    pub invitation_id: Option<InvitationId>,
    pub affiliate_org_id: OrganizationId,
    pub used_by: Option<Uuid>,
    pub association_id: Option<AssociationId>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub success: bool,
    pub error_message: Option<String>,
    pub used_at: DateTime<Utc>,
}

/// A [`UsageLogEntry`] before it is given an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUsageLogEntry {
    pub invitation_id: Option<InvitationId>,
    pub affiliate_org_id: OrganizationId,
    pub used_by: Option<Uuid>,
    pub association_id: Option<AssociationId>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub success: bool,
    pub error_message: Option<String>,
    pub used_at: DateTime<Utc>,
}

impl NewUsageLogEntry {
    pub fn for_attempt(
        attempt: &UseAttempt,
        invitation_id: Option<InvitationId>,
        association_id: Option<AssociationId>,
        rejection: Option<UseRejection>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            invitation_id,
            affiliate_org_id: attempt.affiliate_org_id,
            used_by: Some(attempt.used_by),
            association_id,
            ip_address: attempt.ip_address.clone(),
            user_agent: attempt.user_agent.clone(),
            success: rejection.is_none(),
            error_message: rejection.map(|rejection| rejection.to_string()),
            used_at: now,
        }
    }

    pub fn with_id(self, usage_id: i64) -> UsageLogEntry {
        UsageLogEntry {
            usage_id,
            invitation_id: self.invitation_id,
            affiliate_org_id: self.affiliate_org_id,
            used_by: self.used_by,
            association_id: self.association_id,
            ip_address: self.ip_address,
            user_agent: self.user_agent,
            success: self.success,
            error_message: self.error_message,
            used_at: self.used_at,
        }
    }
}

/// The result of an atomic use attempt, as decided under the invitation lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UseOutcome {
    /// A new association was created and the usage counter incremented.
    Created {
        association: Association,
        invitation: Invitation,
    },
    /// An association already existed; the counter is unchanged.
    Existing {
        association: Association,
        invitation: Invitation,
    },
    Rejected {
        rejection: UseRejection,
        invitation: Option<Invitation>,
    },
}

#[cfg(feature = "postgres")]
mod postgres {
    use tokio_postgres::Row;

    use super::{Invitation, InvitationStatus, InvitationToken, UsageLogEntry};
    use crate::util::postgres::impl_text_sql;

    impl_text_sql!(InvitationStatus);

    impl From<&Row> for Invitation {
        fn from(row: &Row) -> Self {
            Self {
                id: row.get("invitation_id"),
                advertiser_org_id: row.get("advertiser_org_id"),
                token: InvitationToken::from(row.get::<_, String>("invitation_token")),
                name: row.get("name"),
                description: row.get("description"),
                allowed_affiliate_org_ids: row.get("allowed_affiliate_org_ids"),
                max_uses: row.get("max_uses"),
                current_uses: row.get("current_uses"),
                expires_at: row.get("expires_at"),
                status: row.get("status"),
                default_all_affiliates_visible: row.get("default_all_affiliates_visible"),
                default_all_campaigns_visible: row.get("default_all_campaigns_visible"),
                default_visible_affiliate_ids: row.get("default_visible_affiliate_ids"),
                default_visible_campaign_ids: row.get("default_visible_campaign_ids"),
                message: row.get("message"),
                created_by: row.get("created_by"),
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
            }
        }
    }

    impl From<&Row> for UsageLogEntry {
        fn from(row: &Row) -> Self {
            Self {
                usage_id: row.get("usage_id"),
                invitation_id: row.get("invitation_id"),
                affiliate_org_id: row.get("affiliate_org_id"),
                used_by: row.get("used_by"),
                association_id: row.get("association_id"),
                ip_address: row.get("ip_address"),
                user_agent: row.get("user_agent"),
                success: row.get("success"),
                error_message: row.get("error_message"),
                used_at: row.get("used_at"),
            }
        }
    }
}

#[cfg(test)]
mod test {
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::test_util::dummy_invitation;

    const ADVERTISER: OrganizationId = OrganizationId(1);

    #[test]
    fn tokens_are_256_bit_hex() {
        let token = InvitationToken::generate();

        assert_eq!(64, token.as_str().len());
        assert!(token.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, InvitationToken::generate());
        assert!(!format!("{:?}", token).contains(token.as_str()));
    }

    #[test]
    fn usable_invitation() {
        let invitation = dummy_invitation(ADVERTISER);

        assert_eq!(Ok(()), invitation.check_usable(OrganizationId(101), Utc::now()));
    }

    #[test]
    fn reports_the_first_failing_condition() {
        let now = Utc::now();

        let mut expired = dummy_invitation(ADVERTISER);
        expired.expires_at = Some(now - Duration::seconds(1));
        expired.max_uses = Some(1);
        expired.current_uses = 1;
        assert_eq!(
            Err(UseRejection::Expired),
            expired.check_usable(OrganizationId(101), now)
        );

        let mut capped = dummy_invitation(ADVERTISER);
        capped.max_uses = Some(2);
        capped.current_uses = 2;
        assert_eq!(
            Err(UseRejection::UsageLimitReached),
            capped.check_usable(OrganizationId(101), now)
        );

        let mut disabled = dummy_invitation(ADVERTISER);
        disabled.status = InvitationStatus::Disabled;
        assert_eq!(
            Err(UseRejection::NotActive),
            disabled.check_usable(OrganizationId(101), now)
        );

        let mut restricted = dummy_invitation(ADVERTISER);
        restricted.allowed_affiliate_org_ids = Some([OrganizationId(102)].into_iter().collect());
        assert_eq!(
            Err(UseRejection::NotAllowed),
            restricted.check_usable(OrganizationId(101), now)
        );
        assert_eq!(Ok(()), restricted.check_usable(OrganizationId(102), now));

        restricted.allowed_affiliate_org_ids = Some(IdSet::new());
        assert_eq!(Ok(()), restricted.check_usable(OrganizationId(101), now));
    }

    #[test]
    fn rejection_messages() {
        assert_eq!(
            "Invitation usage limit has been reached",
            UseRejection::UsageLimitReached.to_string()
        );
        assert_eq!(
            "Association already exists",
            UseRejection::AssociationExists.to_string()
        );
    }

    #[test]
    fn association_request_carries_the_defaults() {
        let mut invitation = dummy_invitation(ADVERTISER);
        invitation.default_all_campaigns_visible = false;
        invitation.default_visible_campaign_ids = Some([CampaignId(7)].into_iter().collect());

        let request = invitation.association_request(OrganizationId(101), Some("hi".into()));

        assert_eq!(ADVERTISER, request.advertiser_org_id);
        assert_eq!(OrganizationId(101), request.affiliate_org_id);
        assert_eq!(Some(false), request.all_campaigns_visible);
        assert_eq!(Some(true), request.all_affiliates_visible);
        assert_eq!(invitation.default_visible_campaign_ids, request.visible_campaign_ids);
    }

    #[test]
    fn new_invitation_validation() {
        let now = Utc::now();
        let new = NewInvitation {
            advertiser_org_id: ADVERTISER,
            name: "Spring partners".into(),
            description: None,
            allowed_affiliate_org_ids: None,
            max_uses: Some(0),
            expires_at: None,
            default_all_affiliates_visible: None,
            default_all_campaigns_visible: None,
            default_visible_affiliate_ids: None,
            default_visible_campaign_ids: None,
            message: None,
        };
        assert_eq!(Err(Error::InvalidMaxUses), new.validate(now));

        let past = NewInvitation {
            max_uses: None,
            expires_at: Some(now - Duration::hours(1)),
            ..new.clone()
        };
        assert_eq!(Err(Error::ExpiresInThePast), past.validate(now));

        let valid = NewInvitation {
            max_uses: Some(2),
            ..new
        };
        let invitation = valid.into_invitation(
            InvitationId(1),
            InvitationToken::generate(),
            Uuid::new_v4(),
            now,
        );
        assert!(invitation.default_all_affiliates_visible);
        assert!(invitation.default_all_campaigns_visible);
        assert_eq!(InvitationStatus::Active, invitation.status);
        assert_eq!(0, invitation.current_uses);
    }

    #[test]
    fn update_cannot_drop_cap_below_current_uses() {
        let mut invitation = dummy_invitation(ADVERTISER);
        invitation.current_uses = 3;

        let update = UpdateInvitation {
            max_uses: Some(Some(2)),
            ..Default::default()
        };

        assert_eq!(
            Err(Error::MaxUsesBelowCurrent(3)),
            update.apply(&mut invitation, Utc::now())
        );
    }

    #[test]
    fn null_clears_the_cap_and_expiry() {
        let now = Utc::now();
        let mut invitation = dummy_invitation(ADVERTISER);
        invitation.max_uses = Some(5);
        invitation.expires_at = Some(now + chrono::Duration::days(1));

        let keep: UpdateInvitation =
            serde_json::from_value(serde_json::json!({ "name": "Renamed" }))
                .expect("Should deserialize");
        keep.apply(&mut invitation, now).expect("Should apply");
        assert_eq!(Some(5), invitation.max_uses);
        assert!(invitation.expires_at.is_some());

        let clear: UpdateInvitation =
            serde_json::from_value(serde_json::json!({ "max_uses": null, "expires_at": null }))
                .expect("Should deserialize");
        assert_eq!(Some(None), clear.max_uses);
        clear.apply(&mut invitation, now).expect("Should apply");
        assert_eq!(None, invitation.max_uses);
        assert_eq!(None, invitation.expires_at);
        assert_eq!("Renamed", invitation.name);

        let set: UpdateInvitation = serde_json::from_value(serde_json::json!({ "max_uses": 3 }))
            .expect("Should deserialize");
        set.apply(&mut invitation, now).expect("Should apply");
        assert_eq!(Some(3), invitation.max_uses);
    }

    #[test]
    fn link_is_built_from_the_base_url() {
        let invitation = dummy_invitation(ADVERTISER);
        let base = url::Url::parse("https://app.example.com/").expect("valid url");

        let link = invitation.link(&base).expect("Should join");

        assert_eq!(
            format!("https://app.example.com/invitations/{}", invitation.token),
            link.to_string()
        );
    }
}
