//! The daily usage rollup.
//!
//! For every billing account the engine prices the day's traffic against the
//! active campaigns of the organization, stores the [`UsageRecord`] and bills
//! it: a prepaid account is debited through the [`Ledger`], a postpaid one
//! accrues until its next invoice.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use slog::{error, info, Logger};
use tokio::sync::Mutex;

use adapter::PaymentsGateway;
use primitives::{
    api::Pagination,
    usage::{CalculatedUsage, FinancialMetrics, UsageReport, UsageRunReport},
    BillingAccount, BillingMode, Money, OrganizationId, UsageRecord, UsageRecordId, UsageStatus,
};

use crate::{error::Error, services::ledger::Ledger, store::Store};

/// `reference_type` of the debits of usage records.
pub const USAGE_RECORD_REFERENCE: &str = "usage_record";

/// Where the tracked traffic of a day comes from.
#[async_trait]
pub trait UsageSource: Send + Sync {
    async fn report(
        &self,
        organization: OrganizationId,
        date: NaiveDate,
    ) -> Result<UsageReport, Error>;
}

/// A source without any tracked traffic. Only fixed campaign revenue is
/// billed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTraffic;

#[async_trait]
impl UsageSource for NoTraffic {
    async fn report(
        &self,
        _organization: OrganizationId,
        _date: NaiveDate,
    ) -> Result<UsageReport, Error> {
        Ok(UsageReport::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Billed,
    Failed,
    Skipped,
}

pub struct UsageEngine<G: PaymentsGateway> {
    store: Arc<dyn Store>,
    ledger: Ledger<G>,
    source: Arc<dyn UsageSource>,
    logger: Logger,
    run_timeout: Duration,
    /// Held for the duration of a run.
    running: Arc<Mutex<()>>,
}

impl<G: PaymentsGateway> Clone for UsageEngine<G> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            ledger: self.ledger.clone(),
            source: self.source.clone(),
            logger: self.logger.clone(),
            run_timeout: self.run_timeout,
            running: self.running.clone(),
        }
    }
}

impl<G: PaymentsGateway> UsageEngine<G> {
    pub fn new(
        store: Arc<dyn Store>,
        ledger: Ledger<G>,
        source: Arc<dyn UsageSource>,
        logger: Logger,
        run_timeout: Duration,
    ) -> Self {
        Self {
            store,
            ledger,
            source,
            logger,
            run_timeout,
            running: Arc::new(Mutex::new(())),
        }
    }

    /// Rolls up `date` for every billing account, or only for the account of
    /// `organization`.
    ///
    /// Only one run may be in progress per process. Billed and paid records
    /// are left alone, so running a day again only retries what failed.
    pub async fn run(
        &self,
        date: NaiveDate,
        organization: Option<OrganizationId>,
        now: DateTime<Utc>,
    ) -> Result<UsageRunReport, Error> {
        let _running = self
            .running
            .try_lock()
            .map_err(|_| Error::Conflict("A usage run is already in progress".into()))?;

        let report = tokio::time::timeout(self.run_timeout, self.run_accounts(date, organization, now))
            .await
            .map_err(|_| Error::Internal(format!("Usage run for {date} timed out")))??;

        info!(&self.logger, "Usage run finished"; "date" => %date, "billed" => report.billed, "failed" => report.failed, "skipped" => report.skipped, "errors" => report.errors);

        Ok(report)
    }

    async fn run_accounts(
        &self,
        date: NaiveDate,
        organization: Option<OrganizationId>,
        now: DateTime<Utc>,
    ) -> Result<UsageRunReport, Error> {
        let accounts = self
            .store
            .billing_accounts()
            .await?
            .into_iter()
            .filter(|account| organization.map_or(true, |org| account.organization_id == org));

        let mut report = UsageRunReport {
            date: Some(date),
            ..UsageRunReport::default()
        };

        for account in accounts {
            match self.process(&account, date, now).await {
                Ok(Outcome::Billed) => report.billed += 1,
                Ok(Outcome::Failed) => report.failed += 1,
                Ok(Outcome::Skipped) => report.skipped += 1,
                Err(err) => {
                    report.errors += 1;
                    error!(&self.logger, "Usage rollup failed"; "organization" => %account.organization_id, "date" => %date, "error" => ?err);
                }
            }
        }

        Ok(report)
    }

    async fn process(
        &self,
        account: &BillingAccount,
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Outcome, Error> {
        let organization = account.organization_id;
        if !account.is_active() {
            return Ok(Outcome::Skipped);
        }

        if let Some(record) = self.store.usage_record(organization, date).await? {
            if record.status.is_settled() {
                return Ok(Outcome::Skipped);
            }
        }

        let campaigns = self.store.campaigns(Some(organization)).await?;
        if !campaigns.iter().any(|campaign| campaign.is_active()) {
            return Ok(Outcome::Skipped);
        }

        let traffic = self.source.report(organization, date).await?;
        let financials = FinancialMetrics::compute(&campaigns, &traffic)?;

        let record = match self
            .store
            .save_calculated_usage(CalculatedUsage::new(account, date, financials), now)
            .await?
        {
            Some(record) => record,
            None => return Ok(Outcome::Skipped),
        };

        if account.mode == BillingMode::Prepaid && record.advertiser_spend > Money::ZERO {
            if let Err(err) = self.debit(&record, now).await {
                let message = err.to_string();
                self.store
                    .update_usage_record(
                        record.id,
                        Box::new(move |record| Ok(record.fail(message, now)?)),
                    )
                    .await?;
                info!(&self.logger, "Usage record failed"; "organization" => %organization, "date" => %date, "usage_record" => %record.id, "error" => %err);

                return Ok(Outcome::Failed);
            }
        }

        self.store
            .update_usage_record(
                record.id,
                Box::new(move |record| Ok(record.advance(UsageStatus::Billed, now)?)),
            )
            .await?;

        Ok(Outcome::Billed)
    }

    /// Debits the spend of the record once.
    async fn debit(&self, record: &UsageRecord, now: DateTime<Utc>) -> Result<(), Error> {
        let reference = record.id.to_string();
        if self
            .store
            .transaction_by_reference(USAGE_RECORD_REFERENCE, &reference)
            .await?
            .is_some()
        {
            return Ok(());
        }

        self.ledger
            .debit(
                record.organization_id,
                record.advertiser_spend,
                &format!("Usage for {}", record.usage_date),
                Some((USAGE_RECORD_REFERENCE, reference)),
                now,
            )
            .await?;

        Ok(())
    }

    /// Marks the affiliate payout of a billed record as processed.
    pub async fn process_affiliate_payout(
        &self,
        organization: OrganizationId,
        id: UsageRecordId,
        now: DateTime<Utc>,
    ) -> Result<UsageRecord, Error> {
        self.store
            .usage_record_by_id(id)
            .await?
            .filter(|record| record.organization_id == organization)
            .ok_or_else(|| Error::not_found("Usage record"))?;

        self.store
            .update_usage_record(
                id,
                Box::new(move |record| Ok(record.advance(UsageStatus::Paid, now)?)),
            )
            .await
    }

    pub async fn records(
        &self,
        organization: OrganizationId,
        pagination: Pagination,
    ) -> Result<Vec<UsageRecord>, Error> {
        self.store.usage_records(organization, pagination).await
    }
}
