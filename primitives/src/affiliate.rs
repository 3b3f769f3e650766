use chrono::{DateTime, Utc};
use parse_display::{Display, FromStr};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{AffiliateId, OrganizationId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, FromStr)]
#[serde(rename_all = "snake_case")]
#[display(style = "snake_case")]
pub enum AffiliateStatus {
    Active,
    Pending,
    Rejected,
    Inactive,
}

impl Default for AffiliateStatus {
    fn default() -> Self {
        Self::Pending
    }
}

/// A traffic source belonging to an affiliate organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Affiliate {
    #[serde(rename = "affiliate_id")]
    pub id: AffiliateId,
    pub organization_id: OrganizationId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_email: Option<String>,
    pub status: AffiliateStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("Affiliate name is required")]
    EmptyName,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAffiliate {
    pub organization_id: OrganizationId,
    pub name: String,
    #[serde(default)]
    pub contact_email: Option<String>,
    #[serde(default)]
    pub status: AffiliateStatus,
}

impl NewAffiliate {
    pub fn validate(&self) -> Result<(), Error> {
        if self.name.trim().is_empty() {
            return Err(Error::EmptyName);
        }

        Ok(())
    }

    pub fn into_affiliate(self, id: AffiliateId, now: DateTime<Utc>) -> Affiliate {
        Affiliate {
            id,
            organization_id: self.organization_id,
            name: self.name,
            contact_email: self.contact_email,
            status: self.status,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateAffiliate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub contact_email: Option<String>,
    #[serde(default)]
    pub status: Option<AffiliateStatus>,
}

impl UpdateAffiliate {
    pub fn apply(self, affiliate: &mut Affiliate, now: DateTime<Utc>) -> Result<(), Error> {
        if let Some(name) = self.name {
            if name.trim().is_empty() {
                return Err(Error::EmptyName);
            }
            affiliate.name = name;
        }
        if let Some(contact_email) = self.contact_email {
            affiliate.contact_email = Some(contact_email);
        }
        if let Some(status) = self.status {
            affiliate.status = status;
        }
        affiliate.updated_at = now;

        Ok(())
    }
}

#[cfg(feature = "postgres")]
mod postgres {
    use tokio_postgres::Row;

    use super::{Affiliate, AffiliateStatus};
    use crate::util::postgres::impl_text_sql;

    impl_text_sql!(AffiliateStatus);

    impl From<&Row> for Affiliate {
        fn from(row: &Row) -> Self {
            Self {
                id: row.get("affiliate_id"),
                organization_id: row.get("organization_id"),
                name: row.get("name"),
                contact_email: row.get("contact_email"),
                status: row.get("status"),
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
            }
        }
    }
}
