//! The daily usage rollup: what an advertiser organization spent on a UTC
//! calendar day and how it was billed.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use parse_display::{Display, FromStr};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    money::{self, Money},
    campaign::PricingOverflow,
    AffiliateId, BillingAccount, BillingAccountId, Campaign, CampaignId, OrganizationId,
    UsageRecordId,
};

/// Lifecycle of a [`UsageRecord`]:
///
/// ```text
/// pending -> calculated -> billed -> paid
///    \            \
///     `-> failed <-'   (failed -> calculated on retry)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, FromStr)]
#[serde(rename_all = "snake_case")]
#[display(style = "snake_case")]
pub enum UsageStatus {
    Pending,
    Calculated,
    Billed,
    Paid,
    Failed,
}

impl UsageStatus {
    pub fn can_advance_to(&self, next: UsageStatus) -> bool {
        use UsageStatus::*;

        matches!(
            (self, next),
            (Pending, Calculated)
                | (Pending, Failed)
                | (Calculated, Billed)
                | (Calculated, Failed)
                | (Failed, Calculated)
                | (Billed, Paid)
        )
    }

    /// Billed and paid records are never computed again.
    pub fn is_settled(&self) -> bool {
        matches!(self, UsageStatus::Billed | UsageStatus::Paid)
    }
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("Usage record cannot move from {from} to {to}")]
pub struct StatusError {
    pub from: UsageStatus,
    pub to: UsageStatus,
}

/// Raw traffic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageMetrics {
    pub clicks: i64,
    pub conversions: i64,
    pub impressions: i64,
}

impl std::ops::AddAssign for UsageMetrics {
    fn add_assign(&mut self, other: Self) {
        self.clicks = self.clicks.saturating_add(other.clicks);
        self.conversions = self.conversions.saturating_add(other.conversions);
        self.impressions = self.impressions.saturating_add(other.impressions);
    }
}

/// Traffic of one campaign on one day, as reported by the tracking source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignUsage {
    pub campaign_id: CampaignId,
    #[serde(flatten)]
    pub metrics: UsageMetrics,
}

/// Traffic attributed to one affiliate on one campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffiliateUsage {
    pub affiliate_id: AffiliateId,
    pub campaign_id: CampaignId,
    #[serde(flatten)]
    pub metrics: UsageMetrics,
}

/// Everything the tracking source knows about an organization's day.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageReport {
    pub campaigns: Vec<CampaignUsage>,
    /// May be empty when the source does not attribute traffic.
    pub affiliates: Vec<AffiliateUsage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignBreakdown {
    pub campaign_id: CampaignId,
    pub name: String,
    #[serde(flatten)]
    pub metrics: UsageMetrics,
    pub spend: Money,
    pub payout: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffiliateBreakdown {
    pub affiliate_id: AffiliateId,
    #[serde(flatten)]
    pub metrics: UsageMetrics,
    pub payout: Money,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinancialMetrics {
    pub metrics: UsageMetrics,
    pub advertiser_spend: Money,
    pub affiliate_payout: Money,
    pub platform_revenue: Money,
    pub campaign_breakdown: Vec<CampaignBreakdown>,
    pub affiliate_breakdown: Vec<AffiliateBreakdown>,
}

impl FinancialMetrics {
    /// Prices the day's traffic against every active campaign in `campaigns`.
    ///
    /// Campaigns without reported traffic still contribute their fixed
    /// revenue. Amounts keep full precision here and are rounded when the
    /// record is built.
    pub fn compute(campaigns: &[Campaign], report: &UsageReport) -> Result<Self, PricingOverflow> {
        let traffic: BTreeMap<CampaignId, UsageMetrics> =
            report
                .campaigns
                .iter()
                .fold(BTreeMap::new(), |mut traffic, usage| {
                    *traffic.entry(usage.campaign_id).or_default() += usage.metrics;
                    traffic
                });

        let mut computed = Self::default();

        for campaign in campaigns.iter().filter(|campaign| campaign.is_active()) {
            let metrics = traffic.get(&campaign.id).copied().unwrap_or_default();
            let overflow = PricingOverflow {
                clicks: metrics.clicks,
                conversions: metrics.conversions,
            };
            let spend = campaign.pricing.spend(metrics.clicks, metrics.conversions)?;
            let payout = campaign.pricing.payout(metrics.clicks, metrics.conversions)?;

            computed.metrics += metrics;
            computed.advertiser_spend = computed
                .advertiser_spend
                .checked_add(spend)
                .ok_or(overflow)?;
            computed.affiliate_payout = computed
                .affiliate_payout
                .checked_add(payout)
                .ok_or(overflow)?;
            computed.campaign_breakdown.push(CampaignBreakdown {
                campaign_id: campaign.id,
                name: campaign.name.clone(),
                metrics,
                spend,
                payout,
            });
        }

        let mut affiliates: BTreeMap<AffiliateId, AffiliateBreakdown> = BTreeMap::new();
        for usage in &report.affiliates {
            let campaign = match campaigns
                .iter()
                .find(|campaign| campaign.id == usage.campaign_id && campaign.is_active())
            {
                Some(campaign) => campaign,
                None => continue,
            };
            let payout = campaign
                .pricing
                .payout(usage.metrics.clicks, usage.metrics.conversions)?;
            let entry = affiliates
                .entry(usage.affiliate_id)
                .or_insert_with(|| AffiliateBreakdown {
                    affiliate_id: usage.affiliate_id,
                    metrics: UsageMetrics::default(),
                    payout: Money::ZERO,
                });
            entry.metrics += usage.metrics;
            entry.payout = entry.payout.checked_add(payout).ok_or(PricingOverflow {
                clicks: entry.metrics.clicks,
                conversions: entry.metrics.conversions,
            })?;
        }
        computed.affiliate_breakdown = affiliates.into_values().collect();

        computed.platform_revenue = computed.advertiser_spend - computed.affiliate_payout;

        Ok(computed)
    }

    fn rounded(mut self) -> Self {
        self.advertiser_spend = money::round(self.advertiser_spend);
        self.affiliate_payout = money::round(self.affiliate_payout);
        self.platform_revenue = self.advertiser_spend - self.affiliate_payout;
        for entry in &mut self.campaign_breakdown {
            entry.spend = money::round(entry.spend);
            entry.payout = money::round(entry.payout);
        }
        for entry in &mut self.affiliate_breakdown {
            entry.payout = money::round(entry.payout);
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    #[serde(rename = "usage_record_id")]
    pub id: UsageRecordId,
    pub organization_id: OrganizationId,
    pub billing_account_id: BillingAccountId,
    pub usage_date: NaiveDate,
    pub clicks: i64,
    pub conversions: i64,
    pub impressions: i64,
    pub advertiser_spend: Money,
    pub affiliate_payout: Money,
    /// `advertiser_spend - affiliate_payout`
    pub platform_revenue: Money,
    pub currency: String,
    pub status: UsageStatus,
    #[serde(default)]
    pub allocated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub billed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error_message: Option<String>,
    pub campaign_breakdown: Vec<CampaignBreakdown>,
    pub affiliate_breakdown: Vec<AffiliateBreakdown>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A freshly calculated rollup, before it is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalculatedUsage {
    pub organization_id: OrganizationId,
    pub billing_account_id: BillingAccountId,
    pub usage_date: NaiveDate,
    pub currency: String,
    pub financials: FinancialMetrics,
}

impl CalculatedUsage {
    pub fn new(account: &BillingAccount, usage_date: NaiveDate, financials: FinancialMetrics) -> Self {
        Self {
            organization_id: account.organization_id,
            billing_account_id: account.id,
            usage_date,
            currency: account.currency.clone(),
            financials: financials.rounded(),
        }
    }

    pub fn into_record(self, id: UsageRecordId, now: DateTime<Utc>) -> UsageRecord {
        let financials = self.financials;

        UsageRecord {
            id,
            organization_id: self.organization_id,
            billing_account_id: self.billing_account_id,
            usage_date: self.usage_date,
            clicks: financials.metrics.clicks,
            conversions: financials.metrics.conversions,
            impressions: financials.metrics.impressions,
            advertiser_spend: financials.advertiser_spend,
            affiliate_payout: financials.affiliate_payout,
            platform_revenue: financials.platform_revenue,
            currency: self.currency,
            status: UsageStatus::Calculated,
            allocated_at: None,
            billed_at: None,
            error_message: None,
            campaign_breakdown: financials.campaign_breakdown,
            affiliate_breakdown: financials.affiliate_breakdown,
            created_at: now,
            updated_at: now,
        }
    }

    /// Overwrites an unsettled record with the new figures and marks it
    /// calculated. The id and creation time are kept.
    pub fn recalculate(self, record: &mut UsageRecord, now: DateTime<Utc>) -> Result<(), StatusError> {
        if record.status.is_settled() {
            return Err(StatusError {
                from: record.status,
                to: UsageStatus::Calculated,
            });
        }

        let id = record.id;
        let created_at = record.created_at;
        *record = self.into_record(id, now);
        record.created_at = created_at;

        Ok(())
    }
}

impl UsageRecord {
    pub fn advance(&mut self, to: UsageStatus, now: DateTime<Utc>) -> Result<(), StatusError> {
        if !self.status.can_advance_to(to) {
            return Err(StatusError {
                from: self.status,
                to,
            });
        }

        match to {
            UsageStatus::Billed => self.billed_at = Some(now),
            UsageStatus::Paid => self.allocated_at = Some(now),
            _ => {}
        }
        self.status = to;
        self.updated_at = now;

        Ok(())
    }

    pub fn fail(&mut self, message: String, now: DateTime<Utc>) -> Result<(), StatusError> {
        self.advance(UsageStatus::Failed, now)?;
        self.error_message = Some(message);

        Ok(())
    }
}

/// Body of `POST /billing/usage/run`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunUsage {
    pub date: NaiveDate,
    /// Restricts the run to one organization.
    #[serde(default)]
    pub organization_id: Option<OrganizationId>,
}

/// What a usage run did, per outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRunReport {
    pub date: Option<NaiveDate>,
    pub billed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub errors: u64,
}

#[cfg(feature = "postgres")]
mod postgres {
    use postgres_types::Json;
    use tokio_postgres::Row;

    use super::{AffiliateBreakdown, CampaignBreakdown, UsageRecord, UsageStatus};
    use crate::util::postgres::impl_text_sql;

    impl_text_sql!(UsageStatus);

    impl From<&Row> for UsageRecord {
        fn from(row: &Row) -> Self {
            Self {
                id: row.get("usage_record_id"),
                organization_id: row.get("organization_id"),
                billing_account_id: row.get("billing_account_id"),
                usage_date: row.get("usage_date"),
                clicks: row.get("clicks"),
                conversions: row.get("conversions"),
                impressions: row.get("impressions"),
                advertiser_spend: row.get("advertiser_spend"),
                affiliate_payout: row.get("affiliate_payout"),
                platform_revenue: row.get("platform_revenue"),
                currency: row.get("currency"),
                status: row.get("status"),
                allocated_at: row.get("allocated_at"),
                billed_at: row.get("billed_at"),
                error_message: row.get("error_message"),
                campaign_breakdown: row
                    .get::<_, Json<Vec<CampaignBreakdown>>>("campaign_breakdown")
                    .0,
                affiliate_breakdown: row
                    .get::<_, Json<Vec<AffiliateBreakdown>>>("affiliate_breakdown")
                    .0,
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
            }
        }
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        test_util::{dummy_billing_account, dummy_campaign},
        CampaignPricing, CampaignStatus,
    };

    fn amount(value: &str) -> Money {
        value.parse().expect("valid decimal")
    }

    fn usage(campaign: i64, clicks: i64, conversions: i64) -> CampaignUsage {
        CampaignUsage {
            campaign_id: CampaignId(campaign),
            metrics: UsageMetrics {
                clicks,
                conversions,
                impressions: clicks.saturating_mul(10),
            },
        }
    }

    #[test]
    fn status_order() {
        use UsageStatus::*;

        assert!(Pending.can_advance_to(Calculated));
        assert!(Calculated.can_advance_to(Billed));
        assert!(Billed.can_advance_to(Paid));
        assert!(Calculated.can_advance_to(Failed));
        assert!(Failed.can_advance_to(Calculated));

        assert!(!Billed.can_advance_to(Calculated));
        assert!(!Paid.can_advance_to(Billed));
        assert!(!Billed.can_advance_to(Failed));
        assert!(!Failed.can_advance_to(Billed));
        assert!(!Calculated.can_advance_to(Calculated));

        // only a billed record is paid out
        assert!(!Pending.can_advance_to(Paid));
        assert!(!Calculated.can_advance_to(Paid));
        assert!(!Failed.can_advance_to(Paid));
        assert!(!Paid.can_advance_to(Paid));
    }

    #[test]
    fn prices_active_campaigns_only() {
        let organization = OrganizationId(5);
        let mut per_click = dummy_campaign(CampaignId(1), organization);
        per_click.pricing = CampaignPricing {
            fixed_click_amount: Some(amount("0.10")),
            ..Default::default()
        };
        let mut per_conversion = dummy_campaign(CampaignId(2), organization);
        per_conversion.pricing = CampaignPricing {
            fixed_revenue: Some(amount("1")),
            fixed_conversion_amount: Some(amount("2")),
            percentage_conversion_amount: Some(amount("0.5")),
            ..Default::default()
        };
        let mut paused = dummy_campaign(CampaignId(3), organization);
        paused.status = CampaignStatus::Paused;
        paused.pricing.fixed_revenue = Some(amount("100"));

        let report = UsageReport {
            campaigns: vec![usage(1, 100, 0), usage(2, 50, 4), usage(3, 1_000, 1_000)],
            affiliates: vec![],
        };

        let financials = FinancialMetrics::compute(&[per_click, per_conversion, paused], &report)
            .expect("Should price");

        // 0.10 * 100 + (1 + 2 * 4 + 0.5 * 4)
        assert_eq!(amount("21"), financials.advertiser_spend);
        // 0.10 * 100 + 2 * 4
        assert_eq!(amount("18"), financials.affiliate_payout);
        assert_eq!(amount("3"), financials.platform_revenue);
        assert_eq!(150, financials.metrics.clicks);
        assert_eq!(2, financials.campaign_breakdown.len());
    }

    #[test]
    fn overflowing_traffic_is_an_error() {
        let organization = OrganizationId(5);
        let mut campaign = dummy_campaign(CampaignId(1), organization);
        campaign.pricing.fixed_click_amount = Some(Money::MAX);

        // two reports of the same campaign saturate instead of wrapping
        let report = UsageReport {
            campaigns: vec![usage(1, i64::MAX, 0), usage(1, 1, 0)],
            affiliates: vec![],
        };

        assert_eq!(
            Err(PricingOverflow {
                clicks: i64::MAX,
                conversions: 0,
            }),
            FinancialMetrics::compute(&[campaign], &report)
        );
    }

    #[test]
    fn attributes_payouts_to_affiliates() {
        let organization = OrganizationId(5);
        let mut campaign = dummy_campaign(CampaignId(1), organization);
        campaign.pricing = CampaignPricing {
            fixed_click_amount: Some(amount("0.5")),
            ..Default::default()
        };
        let attributed = |affiliate: i64, clicks: i64| AffiliateUsage {
            affiliate_id: AffiliateId(affiliate),
            campaign_id: CampaignId(1),
            metrics: UsageMetrics {
                clicks,
                ..Default::default()
            },
        };

        let report = UsageReport {
            campaigns: vec![usage(1, 30, 0)],
            affiliates: vec![attributed(7, 10), attributed(8, 15), attributed(7, 5)],
        };
        let financials = FinancialMetrics::compute(&[campaign], &report).expect("Should price");

        assert_eq!(
            vec![(AffiliateId(7), amount("7.5")), (AffiliateId(8), amount("7.5"))],
            financials
                .affiliate_breakdown
                .iter()
                .map(|entry| (entry.affiliate_id, entry.payout))
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn amounts_are_rounded_when_the_record_is_built() {
        let organization = OrganizationId(5);
        let account = dummy_billing_account(organization);
        let mut campaign = dummy_campaign(CampaignId(1), organization);
        campaign.pricing.fixed_click_amount = Some(amount("0.0000005"));

        let report = UsageReport {
            campaigns: vec![usage(1, 3, 0)],
            affiliates: vec![],
        };
        let financials = FinancialMetrics::compute(&[campaign], &report).expect("Should price");
        let date = NaiveDate::from_ymd_opt(2025, 1, 10).expect("valid date");

        let record = CalculatedUsage::new(&account, date, financials)
            .into_record(UsageRecordId(1), Utc::now());

        // 0.0000015 rounds half to even
        assert_eq!(amount("0.000002"), record.advertiser_spend);
        assert_eq!(UsageStatus::Calculated, record.status);
        assert_eq!(
            record.platform_revenue,
            record.advertiser_spend - record.affiliate_payout
        );
    }

    #[test]
    fn failed_record_is_recalculated_on_retry() {
        let organization = OrganizationId(5);
        let account = dummy_billing_account(organization);
        let date = NaiveDate::from_ymd_opt(2025, 1, 10).expect("valid date");
        let now = Utc::now();

        let mut record = CalculatedUsage::new(&account, date, FinancialMetrics::default())
            .into_record(UsageRecordId(1), now);
        record
            .fail("Insufficient funds".into(), now)
            .expect("Should fail a calculated record");

        CalculatedUsage::new(&account, date, FinancialMetrics::default())
            .recalculate(&mut record, now)
            .expect("Should recalculate");
        assert_eq!(UsageStatus::Calculated, record.status);
        assert_eq!(None, record.error_message);

        record.advance(UsageStatus::Billed, now).expect("Should bill");
        assert!(record.billed_at.is_some());
        assert_eq!(
            Err(StatusError {
                from: UsageStatus::Billed,
                to: UsageStatus::Calculated
            }),
            CalculatedUsage::new(&account, date, FinancialMetrics::default())
                .recalculate(&mut record, now)
        );
    }
}
