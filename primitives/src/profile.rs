use chrono::{DateTime, Utc};
use parse_display::{Display, FromStr};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::OrganizationId;

/// The role of a [`Profile`], as carried in the bearer token and stored on
/// the profile row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, FromStr)]
pub enum Role {
    Admin,
    AdvertiserManager,
    AffiliateManager,
    AgencyManager,
    PlatformOwner,
    Affiliate,
}

impl Role {
    pub const ALL: [Role; 6] = [
        Role::Admin,
        Role::AdvertiserManager,
        Role::AffiliateManager,
        Role::AgencyManager,
        Role::PlatformOwner,
        Role::Affiliate,
    ];

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }

    pub fn description(&self) -> &'static str {
        match self {
            Role::Admin => "Full access to every organization and operation",
            Role::AdvertiserManager => "Manages an advertiser organization and its campaigns",
            Role::AffiliateManager => "Manages an affiliate organization and its affiliates",
            Role::AgencyManager => "Acts on behalf of advertisers through delegations",
            Role::PlatformOwner => "Operates the platform",
            Role::Affiliate => "Member of an affiliate organization",
        }
    }
}

/// Name and description of a [`Role`], returned by the role lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleInfo {
    pub name: Role,
    pub description: String,
}

impl From<Role> for RoleInfo {
    fn from(role: Role) -> Self {
        Self {
            name: role,
            description: role.description().to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// The subject (`sub`) of the external authentication provider.
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<OrganizationId>,
    #[serde(rename = "role_name")]
    pub role: Role,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    pub fn belongs_to(&self, organization: OrganizationId) -> bool {
        self.organization_id == Some(organization)
    }
}

/// Creates a profile, or on an existing subject id, overwrites the provided
/// attributes. Applying the same upsert twice leaves the row unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertProfile {
    pub id: Uuid,
    pub email: String,
    #[serde(default)]
    pub organization_id: Option<OrganizationId>,
    #[serde(default, rename = "role_name")]
    pub role: Option<Role>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

/// Role given to a profile created through an upsert that names none.
pub const DEFAULT_ROLE: Role = Role::Affiliate;

impl UpsertProfile {
    pub fn into_new(self, now: DateTime<Utc>) -> Profile {
        Profile {
            id: self.id,
            organization_id: self.organization_id,
            role: self.role.unwrap_or(DEFAULT_ROLE),
            email: self.email,
            first_name: self.first_name,
            last_name: self.last_name,
            created_at: now,
            updated_at: now,
        }
    }

    /// Merges into an existing profile. Returns `false` when nothing changed,
    /// in which case `updated_at` is left untouched too.
    pub fn merge_into(self, profile: &mut Profile, now: DateTime<Utc>) -> bool {
        let before = profile.clone();

        profile.email = self.email;
        if let Some(organization_id) = self.organization_id {
            profile.organization_id = Some(organization_id);
        }
        if let Some(role) = self.role {
            profile.role = role;
        }
        if let Some(first_name) = self.first_name {
            profile.first_name = Some(first_name);
        }
        if let Some(last_name) = self.last_name {
            profile.last_name = Some(last_name);
        }

        let changed = *profile != before;
        if changed {
            profile.updated_at = now;
        }

        changed
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateProfile {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub organization_id: Option<OrganizationId>,
    #[serde(default, rename = "role_name")]
    pub role: Option<Role>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

impl UpdateProfile {
    /// Whether the update touches the role or the organization, which only
    /// an admin may change.
    pub fn is_privileged(&self) -> bool {
        self.role.is_some() || self.organization_id.is_some()
    }

    pub fn apply(self, profile: &mut Profile, now: DateTime<Utc>) {
        if let Some(email) = self.email {
            profile.email = email;
        }
        if let Some(organization_id) = self.organization_id {
            profile.organization_id = Some(organization_id);
        }
        if let Some(role) = self.role {
            profile.role = role;
        }
        if let Some(first_name) = self.first_name {
            profile.first_name = Some(first_name);
        }
        if let Some(last_name) = self.last_name {
            profile.last_name = Some(last_name);
        }
        profile.updated_at = now;
    }
}

#[cfg(feature = "postgres")]
mod postgres {
    use tokio_postgres::Row;

    use super::{Profile, Role};
    use crate::util::postgres::impl_text_sql;

    impl_text_sql!(Role);

    impl From<&Row> for Profile {
        fn from(row: &Row) -> Self {
            Self {
                id: row.get("id"),
                organization_id: row.get("organization_id"),
                role: row.get("role_name"),
                email: row.get("email"),
                first_name: row.get("first_name"),
                last_name: row.get("last_name"),
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
            }
        }
    }
}
