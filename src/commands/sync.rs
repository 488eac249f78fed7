use anyhow::Result;
use tracing::info;

use crate::config::Settings;
use crate::models::RunSummary;
use crate::services::orchestrator::Reconciler;
use crate::services::scheduler;

pub async fn run_once(settings: &Settings) -> Result<RunSummary> {
    let mut reconciler = Reconciler::from_settings(settings);
    info!(
        state = %settings.state_path.display(),
        known_keys = reconciler.store().len(),
        "state loaded"
    );
    let summary = reconciler.run().await?;
    println!("{}", summary);
    Ok(summary)
}

pub async fn schedule(settings: &Settings) -> Result<()> {
    let mut reconciler = Reconciler::from_settings(settings);
    scheduler::run_daily(&mut reconciler, settings.schedule_at).await?;
    Ok(())
}
