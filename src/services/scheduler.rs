use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate, NaiveTime};
use tracing::info;

use crate::error::StoreError;
use crate::services::orchestrator::Reconciler;

pub const POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Fires once per day at a fixed local time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailySchedule {
    at: NaiveTime,
    last_fired: Option<NaiveDate>,
}

impl DailySchedule {
    /// Starting after today's slot means the first scheduled run is tomorrow.
    pub fn starting(at: NaiveTime, now: DateTime<Local>) -> Self {
        let last_fired = (now.time() >= at).then(|| now.date_naive());
        Self { at, last_fired }
    }

    pub fn at(&self) -> NaiveTime {
        self.at
    }

    /// True at most once per calendar day, on the first poll at or after the slot.
    pub fn take_due(&mut self, now: DateTime<Local>) -> bool {
        let today = now.date_naive();
        if now.time() < self.at || self.last_fired == Some(today) {
            return false;
        }
        self.last_fired = Some(today);
        true
    }
}

/// Run once immediately, then every day at the scheduled time. Never returns unless the
/// store cannot be written.
pub async fn run_daily(reconciler: &mut Reconciler, at: NaiveTime) -> Result<(), StoreError> {
    let summary = reconciler.run().await?;
    println!("{}", summary);

    let mut schedule = DailySchedule::starting(at, Local::now());
    info!(at = %schedule.at().format("%H:%M"), "waiting for the next daily run");
    loop {
        tokio::time::sleep(POLL_INTERVAL).await;
        if schedule.take_due(Local::now()) {
            let summary = reconciler.run().await?;
            println!("{}", summary);
            info!(at = %schedule.at().format("%H:%M"), "waiting for the next daily run");
        }
    }
}
