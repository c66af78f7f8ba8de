//! Background sweeps.
//!
//! The sweep bodies are plain async functions over the durable store
//! (`task_expiry`, `review_sweep`), so they stay unit-testable without
//! any scheduler machinery. `WorkerManager` wires them to cron jobs
//! that run out-of-band from live request handling; a failing
//! iteration logs and retries on the next interval.

pub mod review_sweep;
pub mod task_expiry;

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, Mutex};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use crate::config::CoreConfig;
use crate::db::Database;

const DEFAULT_SWEEP_SCHEDULE: &str = "0 */15 * * * *";

pub struct WorkerManager {
    scheduler: Mutex<JobScheduler>,
    shutdown_tx: broadcast::Sender<()>,
    db: Arc<Database>,
    config: Arc<CoreConfig>,
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("scheduler error: {0}")]
    Scheduler(#[from] tokio_cron_scheduler::JobSchedulerError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl WorkerManager {
    pub async fn new(db: Arc<Database>, config: Arc<CoreConfig>) -> Result<Self, WorkerError> {
        let scheduler = JobScheduler::new().await.map_err(WorkerError::Scheduler)?;
        let (shutdown_tx, _) = broadcast::channel(1);
        Ok(Self {
            scheduler: Mutex::new(scheduler),
            shutdown_tx,
            db,
            config,
        })
    }

    pub async fn start(&self) -> Result<(), WorkerError> {
        let enable_expiry = env_flag("MENTOR_ENABLE_EXPIRY_WORKER", true);
        let enable_review = env_flag("MENTOR_ENABLE_REVIEW_WORKER", true);

        let scheduler = self.scheduler.lock().await;

        if enable_expiry {
            let schedule = std::env::var("MENTOR_EXPIRY_SCHEDULE")
                .unwrap_or_else(|_| DEFAULT_SWEEP_SCHEDULE.to_string());
            let db = Arc::clone(&self.db);
            let config = Arc::clone(&self.config);
            let shutdown_rx = self.shutdown_tx.subscribe();
            let job = Job::new_async(&schedule, move |_uuid, _lock| {
                let db = Arc::clone(&db);
                let config = Arc::clone(&config);
                let mut rx = shutdown_rx.resubscribe();
                Box::pin(async move {
                    tokio::select! {
                        _ = rx.recv() => {},
                        result = task_expiry::run_expiry_sweep(&db, &config, Utc::now()) => {
                            if let Err(e) = result {
                                error!(error = %e, "expiry sweep error");
                            }
                        }
                    }
                })
            })
            .map_err(WorkerError::Scheduler)?;
            scheduler.add(job).await.map_err(WorkerError::Scheduler)?;
            info!(schedule = %schedule, "expiry sweep scheduled");
        }

        if enable_review {
            let schedule = std::env::var("MENTOR_REVIEW_SCHEDULE")
                .unwrap_or_else(|_| DEFAULT_SWEEP_SCHEDULE.to_string());
            let db = Arc::clone(&self.db);
            let config = Arc::clone(&self.config);
            let shutdown_rx = self.shutdown_tx.subscribe();
            let job = Job::new_async(&schedule, move |_uuid, _lock| {
                let db = Arc::clone(&db);
                let config = Arc::clone(&config);
                let mut rx = shutdown_rx.resubscribe();
                Box::pin(async move {
                    tokio::select! {
                        _ = rx.recv() => {},
                        result = review_sweep::run_review_sweep(&db, &config, Utc::now()) => {
                            if let Err(e) = result {
                                error!(error = %e, "review sweep error");
                            }
                        }
                    }
                })
            })
            .map_err(WorkerError::Scheduler)?;
            scheduler.add(job).await.map_err(WorkerError::Scheduler)?;
            info!(schedule = %schedule, "review sweep scheduled");
        }

        scheduler.start().await.map_err(WorkerError::Scheduler)?;
        info!("background sweeps started");
        Ok(())
    }

    pub async fn stop(&self) {
        info!("stopping background sweeps");
        let _ = self.shutdown_tx.send(());

        let mut scheduler = self.scheduler.lock().await;
        if let Err(e) = scheduler.shutdown().await {
            warn!(error = %e, "error shutting down scheduler");
        }
    }
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v != "false" && v != "0")
        .unwrap_or(default)
}
