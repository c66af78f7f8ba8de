//! Review sweep: surfaces due review items into free-practice paths as
//! freshly scheduled tasks, and prunes long-graduated items.

use chrono::{DateTime, Utc};

use crate::config::CoreConfig;
use crate::db::Database;
use crate::error::CoreResult;
use crate::services::{lifecycle, paths, review};
use crate::types::{NextItem, SelectionReason};

/// One sweep iteration. Each path is handled in its own transaction;
/// a failing path is logged and the sweep moves on.
pub async fn run_review_sweep(
    db: &Database,
    config: &CoreConfig,
    now: DateTime<Utc>,
) -> CoreResult<u64> {
    let free_paths = paths::list_free_practice(db.pool()).await?;

    let mut injected_total = 0u64;
    for path in &free_paths {
        match inject_into_path(db, config, path, now).await {
            Ok(count) => injected_total += count,
            Err(err) => {
                tracing::warn!(path_id = %path.id, error = %err, "review injection failed for path");
            }
        }
    }

    let mut conn = db.pool().acquire().await?;
    let pruned = review::prune_graduated(&mut conn, config, now).await?;
    drop(conn);

    if injected_total > 0 || pruned > 0 {
        tracing::info!(injected = injected_total, pruned, "review sweep completed");
    }
    Ok(injected_total)
}

async fn inject_into_path(
    db: &Database,
    config: &CoreConfig,
    path: &paths::StudyPath,
    now: DateTime<Utc>,
) -> CoreResult<u64> {
    let mut tx = db.pool().begin().await?;

    let problem_ids = review::inject(&mut *tx, path, config.max_review_items, now).await?;
    if problem_ids.is_empty() {
        tx.commit().await?;
        return Ok(0);
    }

    let selection: Vec<NextItem> = problem_ids
        .into_iter()
        .map(|problem_id| NextItem {
            problem_id,
            reason: SelectionReason::Review,
        })
        .collect();

    // schedule_selection skips problems that already have an open task,
    // so re-running the sweep cannot double-schedule a review.
    let created = lifecycle::schedule_selection(&mut *tx, path, &selection, &[], now).await?;
    tx.commit().await?;

    Ok(created.len() as u64)
}
