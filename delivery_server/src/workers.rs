//! Background settlement passes.
//!
//! Each pass runs on its own task and timer. A failed pass is logged and the worker carries on to the next tick.
use std::sync::Arc;

use chrono::Utc;
use delivery_engine::{SettlementJobs, SqliteDatabase};
use log::*;
use tokio::{
    task::JoinHandle,
    time::{interval, sleep, Duration},
};

use crate::config::WorkerConfig;

const ROLLUP_SCHEDULE_RETRY: Duration = Duration::from_secs(60);

pub struct SettlementWorkers {
    pub expiry: JoinHandle<()>,
    pub rollup: JoinHandle<()>,
    pub housekeeping: JoinHandle<()>,
}

impl SettlementWorkers {
    pub fn abort(&self) {
        self.expiry.abort();
        self.rollup.abort();
        self.housekeeping.abort();
    }
}

/// Starts the settlement workers. Do not await the returned handles, as they run indefinitely.
pub fn start_settlement_workers(jobs: SettlementJobs<SqliteDatabase>, config: WorkerConfig) -> SettlementWorkers {
    let jobs = Arc::new(jobs);
    SettlementWorkers {
        expiry: start_expiry_worker(jobs.clone(), config),
        rollup: start_rollup_worker(jobs.clone(), config),
        housekeeping: start_housekeeping_worker(jobs, config),
    }
}

/// Cancels orders that no restaurant accepted in time.
fn start_expiry_worker(jobs: Arc<SettlementJobs<SqliteDatabase>>, config: WorkerConfig) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = interval(config.expiry_interval);
        info!("🕰️ Unaccepted order expiry worker started");
        loop {
            timer.tick().await;
            match jobs.expire_unaccepted_orders(Utc::now()).await {
                Ok(summary) if summary.processed > 0 || !summary.is_clean() => info!("🕰️ {summary}"),
                Ok(summary) => trace!("🕰️ {summary}"),
                Err(e) => error!("🕰️ Error expiring unaccepted orders. {e}"),
            }
        }
    })
}

/// The schedule is kept in the store, so restarts do not push the rollup back. A rollup that is overdue, or has never
/// run, runs straight away.
fn start_rollup_worker(jobs: Arc<SettlementJobs<SqliteDatabase>>, config: WorkerConfig) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = config.rollup_interval;
        let chrono_period = chrono::Duration::from_std(period).unwrap_or_else(|_| chrono::Duration::weeks(1));
        info!("🕰️ Payout rollup worker started. Rollups run every {}h", period.as_secs() / 3600);
        loop {
            let wait = match jobs.rollup_due_in(chrono_period, Utc::now()).await {
                Ok(due) => due.to_std().unwrap_or_default(),
                Err(e) => {
                    error!("🕰️ Could not read the rollup schedule. Trying again in {ROLLUP_SCHEDULE_RETRY:?}. {e}");
                    sleep(ROLLUP_SCHEDULE_RETRY).await;
                    continue;
                },
            };
            if !wait.is_zero() {
                debug!("🕰️ Next payout rollup in {}m", wait.as_secs() / 60);
                sleep(wait).await;
            }
            match jobs.weekly_payout_rollup().await {
                Ok(summary) => info!("🕰️ {summary}"),
                Err(e) => {
                    error!("🕰️ Payout rollup failed. {e}");
                    sleep(ROLLUP_SCHEDULE_RETRY).await;
                },
            }
        }
    })
}

fn start_housekeeping_worker(jobs: Arc<SettlementJobs<SqliteDatabase>>, config: WorkerConfig) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = interval(config.housekeeping_interval);
        info!("🕰️ Housekeeping worker started");
        loop {
            timer.tick().await;
            match jobs.expire_promo_codes(Utc::now()).await {
                Ok(summary) => debug!("🕰️ {summary}"),
                Err(e) => error!("🕰️ Error expiring promo codes. {e}"),
            }
            match jobs.reconcile_payouts().await {
                Ok(summary) if summary.processed > 0 => warn!("🕰️ {summary}"),
                Ok(summary) => debug!("🕰️ {summary}"),
                Err(e) => error!("🕰️ Payout reconciliation failed. {e}"),
            }
        }
    })
}
