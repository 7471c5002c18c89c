use chrono::NaiveDate;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::db::BankStore;
use crate::error::Result;
use crate::services::today;

#[derive(Debug)]
pub struct SweepStats {
    pub run_date: NaiveDate,
    pub expired_cards: u64,
}

/// Background job that persists the EXPIRED transition
///
/// Lookups already treat a card past its expiry date as EXPIRED; this sweep
/// writes that status for every such card that has not been touched since,
/// so listings and reports agree with it.
pub async fn sweep_expired_cards(store: &dyn BankStore, run_date: NaiveDate) -> Result<SweepStats> {
    tracing::info!(%run_date, "Starting expiry sweep");

    let expired_cards = store.expire_cards(run_date).await?;

    let stats = SweepStats {
        run_date,
        expired_cards,
    };

    tracing::info!(?stats, "Expiry sweep completed");

    Ok(stats)
}

/// Registers the sweep on `schedule` (six-field cron, seconds first) and
/// starts the scheduler.
pub async fn start(store: Arc<dyn BankStore>, schedule: &str) -> anyhow::Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    let job = Job::new_async(schedule, move |_id, _scheduler| {
        let store = Arc::clone(&store);
        Box::pin(async move {
            if let Err(e) = sweep_expired_cards(store.as_ref(), today()).await {
                tracing::error!(error = %e, "Expiry sweep failed");
            }
        })
    })?;

    scheduler.add(job).await?;
    scheduler.start().await?;

    tracing::info!(schedule, "Expiry sweeper scheduled");

    Ok(scheduler)
}
