use chrono::{DateTime, Utc};
use parse_display::{Display, FromStr};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::OrganizationId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, FromStr)]
#[serde(rename_all = "snake_case")]
#[display(style = "snake_case")]
pub enum OrganizationKind {
    Advertiser,
    Affiliate,
    PlatformOwner,
    Agency,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    #[serde(rename = "organization_id")]
    pub id: OrganizationId,
    pub name: String,
    /// Set once on creation.
    #[serde(rename = "type")]
    pub kind: OrganizationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Organization {
    pub fn is(&self, kind: OrganizationKind) -> bool {
        self.kind == kind
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("Organization name is required")]
    EmptyName,
    #[error("Organization type cannot be changed after creation")]
    KindIsImmutable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrganization {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: OrganizationKind,
    #[serde(default)]
    pub description: Option<String>,
}

impl NewOrganization {
    pub fn validate(&self) -> Result<(), Error> {
        if self.name.trim().is_empty() {
            return Err(Error::EmptyName);
        }

        Ok(())
    }

    pub fn into_organization(self, id: OrganizationId, now: DateTime<Utc>) -> Organization {
        Organization {
            id,
            name: self.name,
            kind: self.kind,
            description: self.description,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateOrganization {
    #[serde(default)]
    pub name: Option<String>,
    /// Accepted only when equal to the current kind.
    #[serde(default, rename = "type")]
    pub kind: Option<OrganizationKind>,
    #[serde(default)]
    pub description: Option<String>,
}

impl UpdateOrganization {
    /// Applies the update onto `organization`, refusing a change of kind.
    pub fn apply(self, organization: &mut Organization, now: DateTime<Utc>) -> Result<(), Error> {
        if matches!(self.kind, Some(kind) if kind != organization.kind) {
            return Err(Error::KindIsImmutable);
        }

        if let Some(name) = self.name {
            if name.trim().is_empty() {
                return Err(Error::EmptyName);
            }
            organization.name = name;
        }

        if let Some(description) = self.description {
            organization.description = Some(description);
        }

        organization.updated_at = now;

        Ok(())
    }
}

#[cfg(feature = "postgres")]
mod postgres {
    use tokio_postgres::Row;

    use super::{Organization, OrganizationKind};
    use crate::util::postgres::impl_text_sql;

    impl_text_sql!(OrganizationKind);

    impl From<&Row> for Organization {
        fn from(row: &Row) -> Self {
            Self {
                id: row.get("organization_id"),
                name: row.get("name"),
                kind: row.get("type"),
                description: row.get("description"),
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
            }
        }
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn advertiser() -> Organization {
        Organization {
            id: OrganizationId(1),
            name: "Acme Ads".into(),
            kind: OrganizationKind::Advertiser,
            description: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn kind_parses_from_snake_case() {
        assert_eq!(
            OrganizationKind::PlatformOwner,
            "platform_owner".parse().expect("Should parse")
        );
        assert!("publisher".parse::<OrganizationKind>().is_err());

        let new: NewOrganization = serde_json::from_value(json!({
            "name": "Traffic Co",
            "type": "affiliate"
        }))
        .expect("Should deserialize");
        assert_eq!(OrganizationKind::Affiliate, new.kind);
        assert!(serde_json::from_value::<NewOrganization>(json!({
            "name": "Traffic Co",
            "type": "publisher"
        }))
        .is_err());
    }

    #[test]
    fn update_cannot_change_kind() {
        let mut organization = advertiser();

        let same_kind = UpdateOrganization {
            name: Some("Acme".into()),
            kind: Some(OrganizationKind::Advertiser),
            description: None,
        };
        same_kind
            .apply(&mut organization, Utc::now())
            .expect("Same kind is allowed");
        assert_eq!("Acme", organization.name);

        let other_kind = UpdateOrganization {
            kind: Some(OrganizationKind::Agency),
            ..Default::default()
        };
        assert_eq!(
            Err(Error::KindIsImmutable),
            other_kind.apply(&mut organization, Utc::now())
        );
        assert_eq!(OrganizationKind::Advertiser, organization.kind);
    }

    #[test]
    fn empty_name_is_rejected() {
        let new = NewOrganization {
            name: "  ".into(),
            kind: OrganizationKind::Agency,
            description: None,
        };

        assert_eq!(Err(Error::EmptyName), new.validate());
    }
}
