//! The daily usage worker.
//!
//! Shortly after every roll-up boundary (midnight at
//! [`Config::rollup_utc_offset_hours`](crate::application::Config)) the
//! worker rolls up the previous day and expires the invitations and
//! delegations that ran out.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, NaiveDate, Offset, Utc};
use slog::{error, info, warn};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use adapter::PaymentsGateway;

use crate::{
    services::{delegation, invitation},
    Application,
};

/// Delay after the boundary before the previous day is rolled up.
const ROLLUP_DELAY_MINUTES: i64 = 5;

pub struct Worker<G: PaymentsGateway> {
    pub app: Arc<Application<G>>,
}

impl<G: PaymentsGateway> Worker<G> {
    pub fn new(app: Arc<Application<G>>) -> Self {
        Self { app }
    }

    fn offset(&self) -> FixedOffset {
        let hours = self.app.config.rollup_utc_offset_hours.clamp(-23, 23);

        FixedOffset::east_opt(hours * 3600).unwrap_or_else(|| Utc.fix())
    }

    /// Ticks once per day until `shutdown` is cancelled.
    pub async fn infinite(&self, shutdown: CancellationToken) {
        loop {
            let now = Utc::now();
            let next = next_tick(now, self.offset());
            let wait = (next - now).to_std().unwrap_or_default();

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(wait) => {}
            }

            if !self.tick_until(Utc::now(), &shutdown).await {
                break;
            }
        }

        info!(&self.app.logger, "Usage worker stopped");
    }

    /// Runs [`Worker::tick`] unless `shutdown` is cancelled first, in which
    /// case the tick is dropped and `false` is returned.
    ///
    /// A dropped run leaves unsettled usage records behind; they are
    /// recalculated by the next run of the same day.
    pub async fn tick_until(&self, now: DateTime<Utc>, shutdown: &CancellationToken) -> bool {
        tokio::select! {
            _ = shutdown.cancelled() => {
                warn!(&self.app.logger, "Shutdown interrupted the daily tick"; "date" => %rollup_date(now, self.offset()), "main" => "tick_until");
                false
            }
            _ = self.tick(now) => true,
        }
    }

    /// Rolls up the day before `now` and runs the expiry batches.
    pub async fn tick(&self, now: DateTime<Utc>) {
        let logger = &self.app.logger;
        let store = self.app.store.as_ref();

        match invitation::expire(store, now).await {
            Ok(expired) => info!(logger, "Expired invitations"; "count" => expired),
            Err(err) => {
                error!(logger, "Expiring invitations failed"; "error" => ?err, "main" => "tick")
            }
        }

        match delegation::expire(store, now).await {
            Ok(expired) => info!(logger, "Expired delegations"; "count" => expired),
            Err(err) => {
                error!(logger, "Expiring delegations failed"; "error" => ?err, "main" => "tick")
            }
        }

        let date = rollup_date(now, self.offset());
        if let Err(err) = self.app.usage.run(date, None, now).await {
            error!(logger, "Usage run failed"; "date" => %date, "error" => ?err, "main" => "tick");
        }
    }
}

/// The day a tick at `now` rolls up: the previous local day.
pub fn rollup_date(now: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    let today = now.with_timezone(&offset).date_naive();

    today.pred_opt().unwrap_or(today)
}

/// The next local midnight after `now`, plus the roll-up delay.
pub fn next_tick(now: DateTime<Utc>, offset: FixedOffset) -> DateTime<Utc> {
    let local = now.with_timezone(&offset);
    let delay = ChronoDuration::minutes(ROLLUP_DELAY_MINUTES);

    let today = local
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .and_then(|midnight| midnight.and_local_timezone(offset).single())
        .map(|midnight| midnight.with_timezone(&Utc) + delay);

    match today {
        Some(tick) if tick > now => tick,
        Some(tick) => tick + ChronoDuration::days(1),
        None => now + ChronoDuration::days(1),
    }
}
