use std::sync::Arc;

use chrono::Utc;
use log::*;
use tokio::{task::JoinHandle, time::MissedTickBehavior};

use crate::{config::AutoReleaseConfig, server::ServerFlowApi};

/// Starts the auto-release worker. Do not await the returned JoinHandle, as it will run indefinitely.
///
/// Every `config.interval`, the worker releases up to `config.batch_size` escrows whose hold period has ended. The
/// worker shares `api` with the request handlers, so a sweep and a manual release of the same escrow never both pay.
pub fn start_auto_release_worker(api: Arc<ServerFlowApi>, config: AutoReleaseConfig) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(config.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("🕰️ Auto-release worker started. Sweeping every {}s", config.interval.as_secs());
        loop {
            timer.tick().await;
            debug!("🕰️ Running auto-release job");
            match api.release_due_escrows(Utc::now(), config.batch_size).await {
                Ok(report) if report.processed == 0 => trace!("🕰️ No escrows are due for release"),
                Ok(report) => {
                    info!("🕰️ {} of {} due escrows released", report.successful, report.processed);
                    for failure in &report.failures {
                        debug!("🕰️ Escrow {} will be retried on the next run: {}", failure.escrow_id, failure.error);
                    }
                },
                Err(e) => {
                    error!("🕰️ Error running auto-release job: {e}");
                },
            }
        }
    })
}
