use anyhow::Result;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{Duration, interval};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use crate::config::SchedulerConfig;
use crate::services::ScanError;
use crate::state::SharedState;

pub struct Scheduler {
    state: Arc<SharedState>,
    config: SchedulerConfig,
    running: Arc<RwLock<bool>>,
}

impl Scheduler {
    pub fn new(state: Arc<SharedState>, config: SchedulerConfig) -> Self {
        Self {
            state,
            config,
            running: Arc::new(RwLock::new(false)),
        }
    }

    pub async fn start(&self) -> Result<()> {
        if !self.config.enabled {
            info!("Scheduler is disabled in config");
            return Ok(());
        }

        *self.running.write().await = true;
        info!("Starting background scheduler");

        if let Some(cron_expr) = &self.config.cron_expression {
            self.run_with_cron(cron_expr).await
        } else {
            self.run_with_interval().await
        }
    }

    pub async fn stop(&self) {
        *self.running.write().await = false;
    }

    async fn run_with_cron(&self, cron_expr: &str) -> Result<()> {
        let mut sched = JobScheduler::new().await?;

        let state = Arc::clone(&self.state);
        let running = Arc::clone(&self.running);
        let sync_subscribers = self.config.sync_subscribers;

        let job = Job::new_async(cron_expr, move |_uuid, _lock| {
            let state = Arc::clone(&state);
            let running = Arc::clone(&running);
            Box::pin(async move {
                if !*running.read().await {
                    return;
                }
                spawn_tick(state, sync_subscribers);
            })
        })?;

        sched.add(job).await?;
        sched.start().await?;

        info!("Scheduler running with cron: {}", cron_expr);

        loop {
            if !*self.running.read().await {
                break;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        sched.shutdown().await?;
        Ok(())
    }

    async fn run_with_interval(&self) -> Result<()> {
        let interval_mins = self.config.scan_interval_minutes.max(1);
        info!("Scheduler running: scan every {}m", interval_mins);

        let mut scan_interval = interval(Duration::from_secs(u64::from(interval_mins) * 60));

        loop {
            scan_interval.tick().await;
            if !*self.running.read().await {
                break;
            }
            spawn_tick(Arc::clone(&self.state), self.config.sync_subscribers);
        }

        Ok(())
    }
}

/// Runs one scan pass, then the subscriber sync, in its own task so a failing
/// or slow tick never takes the scheduler down with it.
fn spawn_tick(state: Arc<SharedState>, sync_subscribers: bool) {
    tokio::spawn(async move {
        run_tick(&state, sync_subscribers).await;
    });
}

pub async fn run_tick(state: &SharedState, sync_subscribers: bool) {
    let start = std::time::Instant::now();
    info!(event = "job_started", job_name = "scan_pass", "Starting scheduled scan pass");

    match state.scanner.run_scan_pass().await {
        Ok(report) => {
            info!(
                event = "job_finished",
                job_name = "scan_pass",
                groups_applied = report.groups_applied,
                notifications = report.notifications,
                duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
                "Scheduled scan pass finished"
            );
        }
        Err(ScanError::AlreadyRunning) => {
            info!(event = "job_skipped", job_name = "scan_pass", "Previous scan pass still running");
            return;
        }
        Err(e) => {
            error!(event = "job_failed", job_name = "scan_pass", error = %e, "Scheduled scan pass failed");
        }
    }

    if !sync_subscribers {
        return;
    }

    let start = std::time::Instant::now();
    match state.subscriptions.sync_pending().await {
        Ok(report) => info!(
            event = "job_finished",
            job_name = "sync_subscribers",
            imported = report.imported,
            duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Subscriber sync finished"
        ),
        Err(e) => {
            error!(event = "job_failed", job_name = "sync_subscribers", error = %e, "Subscriber sync failed");
        }
    }
}
