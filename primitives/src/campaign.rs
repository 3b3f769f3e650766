use chrono::{DateTime, Utc};
use parse_display::{Display, FromStr};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{CampaignId, OrganizationId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, FromStr)]
#[serde(rename_all = "snake_case")]
#[display(style = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Active,
    Paused,
    Archived,
}

impl Default for CampaignStatus {
    fn default() -> Self {
        Self::Draft
    }
}

/// The per-unit amounts a campaign charges the advertiser.
///
/// Every component is optional; an absent component contributes zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignPricing {
    /// Flat amount charged per billing day regardless of traffic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_revenue: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_click_amount: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_conversion_amount: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentage_conversion_amount: Option<Decimal>,
}

fn per_unit(amount: Option<Decimal>, units: i64) -> Option<Decimal> {
    amount.unwrap_or_default().checked_mul(Decimal::from(units))
}

/// The priced traffic does not fit a [`Decimal`].
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("Pricing {clicks} clicks and {conversions} conversions overflowed")]
pub struct PricingOverflow {
    pub clicks: i64,
    pub conversions: i64,
}

impl CampaignPricing {
    /// What the advertiser pays for `clicks` and `conversions`:
    ///
    /// ```text
    /// fixed_revenue + fixed_click_amount * clicks
    ///   + fixed_conversion_amount * conversions
    ///   + percentage_conversion_amount * conversions
    /// ```
    pub fn spend(&self, clicks: i64, conversions: i64) -> Result<Decimal, PricingOverflow> {
        let payout = self.payout(clicks, conversions)?;

        per_unit(self.percentage_conversion_amount, conversions)
            .and_then(|percentage| payout.checked_add(percentage))
            .and_then(|spend| spend.checked_add(self.fixed_revenue.unwrap_or_default()))
            .ok_or(PricingOverflow {
                clicks,
                conversions,
            })
    }

    /// The part of [`CampaignPricing::spend`] passed through to affiliates:
    /// the per-click and per-conversion components.
    pub fn payout(&self, clicks: i64, conversions: i64) -> Result<Decimal, PricingOverflow> {
        per_unit(self.fixed_click_amount, clicks)
            .zip(per_unit(self.fixed_conversion_amount, conversions))
            .and_then(|(per_click, per_conversion)| per_click.checked_add(per_conversion))
            .ok_or(PricingOverflow {
                clicks,
                conversions,
            })
    }

    pub fn validate(&self) -> Result<(), Error> {
        let components = [
            self.fixed_revenue,
            self.fixed_click_amount,
            self.fixed_conversion_amount,
            self.percentage_conversion_amount,
        ];

        if components
            .iter()
            .flatten()
            .any(|amount| amount.is_sign_negative() && !amount.is_zero())
        {
            return Err(Error::NegativePricing);
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Campaign {
    #[serde(rename = "campaign_id")]
    pub id: CampaignId,
    /// The advertiser organization owning the campaign.
    pub organization_id: OrganizationId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: CampaignStatus,
    #[serde(flatten)]
    pub pricing: CampaignPricing,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    pub fn is_active(&self) -> bool {
        self.status == CampaignStatus::Active
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("Campaign name is required")]
    EmptyName,
    #[error("Campaign pricing amounts cannot be negative")]
    NegativePricing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCampaign {
    pub organization_id: OrganizationId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: CampaignStatus,
    #[serde(flatten)]
    pub pricing: CampaignPricing,
}

impl NewCampaign {
    pub fn validate(&self) -> Result<(), Error> {
        if self.name.trim().is_empty() {
            return Err(Error::EmptyName);
        }

        self.pricing.validate()
    }

    pub fn into_campaign(self, id: CampaignId, now: DateTime<Utc>) -> Campaign {
        Campaign {
            id,
            organization_id: self.organization_id,
            name: self.name,
            description: self.description,
            status: self.status,
            pricing: self.pricing,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateCampaign {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<CampaignStatus>,
    #[serde(default)]
    pub pricing: Option<CampaignPricing>,
}

impl UpdateCampaign {
    pub fn apply(self, campaign: &mut Campaign, now: DateTime<Utc>) -> Result<(), Error> {
        if let Some(name) = self.name {
            if name.trim().is_empty() {
                return Err(Error::EmptyName);
            }
            campaign.name = name;
        }
        if let Some(pricing) = self.pricing {
            pricing.validate()?;
            campaign.pricing = pricing;
        }
        if let Some(description) = self.description {
            campaign.description = Some(description);
        }
        if let Some(status) = self.status {
            campaign.status = status;
        }
        campaign.updated_at = now;

        Ok(())
    }
}

#[cfg(feature = "postgres")]
mod postgres {
    use tokio_postgres::Row;

    use super::{Campaign, CampaignPricing, CampaignStatus};
    use crate::util::postgres::impl_text_sql;

    impl_text_sql!(CampaignStatus);

    impl From<&Row> for Campaign {
        fn from(row: &Row) -> Self {
            Self {
                id: row.get("campaign_id"),
                organization_id: row.get("organization_id"),
                name: row.get("name"),
                description: row.get("description"),
                status: row.get("status"),
                pricing: CampaignPricing {
                    fixed_revenue: row.get("fixed_revenue"),
                    fixed_click_amount: row.get("fixed_click_amount"),
                    fixed_conversion_amount: row.get("fixed_conversion_amount"),
                    percentage_conversion_amount: row.get("percentage_conversion_amount"),
                },
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn amount(value: &str) -> Decimal {
        value.parse().expect("valid decimal")
    }

    #[test]
    fn spend_adds_every_component() {
        let pricing = CampaignPricing {
            fixed_revenue: Some(amount("5")),
            fixed_click_amount: Some(amount("0.10")),
            fixed_conversion_amount: Some(amount("2")),
            percentage_conversion_amount: Some(amount("0.5")),
        };

        // 5 + 0.10 * 100 + 2 * 3 + 0.5 * 3
        assert_eq!(Ok(amount("22.5")), pricing.spend(100, 3));
        // 0.10 * 100 + 2 * 3
        assert_eq!(Ok(amount("16")), pricing.payout(100, 3));
    }

    #[test]
    fn absent_components_are_zero() {
        let pricing = CampaignPricing {
            fixed_click_amount: Some(amount("0.25")),
            ..Default::default()
        };

        assert_eq!(Ok(amount("2.5")), pricing.spend(10, 4));
        assert_eq!(Ok(amount("2.5")), pricing.payout(10, 4));
        assert_eq!(Ok(Decimal::ZERO), CampaignPricing::default().spend(1_000, 1_000));
    }

    #[test]
    fn huge_traffic_overflows_instead_of_panicking() {
        let pricing = CampaignPricing {
            fixed_click_amount: Some(Decimal::MAX),
            ..Default::default()
        };
        let overflow = PricingOverflow {
            clicks: i64::MAX,
            conversions: 0,
        };

        assert_eq!(Err(overflow), pricing.payout(i64::MAX, 0));
        assert_eq!(Err(overflow), pricing.spend(i64::MAX, 0));

        let pricing = CampaignPricing {
            fixed_revenue: Some(Decimal::MAX),
            fixed_click_amount: Some(amount("1")),
            ..Default::default()
        };
        assert!(pricing.spend(1, 0).is_err());
    }

    #[test]
    fn negative_pricing_is_rejected() {
        let pricing = CampaignPricing {
            fixed_revenue: Some(amount("-1")),
            ..Default::default()
        };

        assert_eq!(Err(Error::NegativePricing), pricing.validate());
    }
}
