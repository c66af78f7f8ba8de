//! Expiry sweep: scheduled tasks whose grace window has elapsed without
//! a start are transitioned to expired.

use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use crate::config::CoreConfig;
use crate::db::{self, Database};
use crate::error::{CoreError, CoreResult};
use crate::services::lifecycle;

/// One sweep iteration. Per-task failures are logged and skipped so a
/// single bad row never stalls the sweep; the transition itself is
/// idempotent, so overlapping runs are safe.
pub async fn run_expiry_sweep(
    db: &Database,
    config: &CoreConfig,
    now: DateTime<Utc>,
) -> CoreResult<u64> {
    let cutoff = db::to_ms(now - config.expiry_grace);
    let rows = sqlx::query(
        "SELECT id FROM study_tasks \
         WHERE status = 'scheduled' AND started_at_ms IS NULL AND scheduled_at_ms < ?",
    )
    .bind(cutoff)
    .fetch_all(db.pool())
    .await?;

    let mut expired = 0u64;
    for row in rows {
        let id_raw: String = row.try_get("id").unwrap_or_default();
        let Ok(task_id) = Uuid::parse_str(&id_raw) else {
            tracing::warn!(task_id = %id_raw, "skipping malformed task id in expiry sweep");
            continue;
        };

        match lifecycle::expire(db.pool(), task_id, config.expiry_grace, now).await {
            Ok(_) => expired += 1,
            // A concurrent writer moved the task on; the next sweep
            // will see its final state.
            Err(CoreError::ConcurrencyConflict { .. }) => {}
            Err(err) => {
                tracing::warn!(task_id = %task_id, error = %err, "failed to expire task");
            }
        }
    }

    if expired > 0 {
        tracing::info!(expired, "expiry sweep completed");
    }
    Ok(expired)
}
