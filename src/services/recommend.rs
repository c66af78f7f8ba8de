//! Next-item recommendation.
//!
//! Due review items are served first, unconditionally. Remaining slots
//! are filled from the catalog-supplied candidate pool by weighted
//! scoring, subject to two hard guardrails: a capped difficulty jump
//! and a consecutive-failure exclusion.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::config::CoreConfig;
use crate::error::CoreResult;
use crate::services::{mastery, review};
use crate::subjects::Subject;
use crate::types::{NextItem, ProblemMetadata, SelectionReason, SubmissionStatus};

/// Default difficulty assumed for topics the learner has never passed.
const BASELINE_FLOOR: i64 = 1;

/// One completed attempt, most recent first in `LearnerHistory::recent`.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub problem_id: String,
    pub topics: Vec<String>,
    pub difficulty: i64,
    pub passed: bool,
}

/// Signals about a learner derived from completed tasks.
#[derive(Debug, Clone, Default)]
pub struct LearnerHistory {
    /// Most recent completed attempts, newest first.
    pub recent: Vec<AttemptRecord>,
    /// Completed attempt count per problem, over the full history.
    pub attempts_by_problem: HashMap<String, i64>,
    /// Problems with an open (scheduled or in-progress) task.
    pub open_problems: HashSet<String>,
}

impl LearnerHistory {
    /// Highest difficulty the learner has passed on any of the given
    /// topics; `BASELINE_FLOOR` when none.
    pub fn difficulty_baseline(&self, topics: &[String]) -> i64 {
        self.recent
            .iter()
            .filter(|attempt| attempt.passed)
            .filter(|attempt| attempt.topics.iter().any(|t| topics.contains(t)))
            .map(|attempt| attempt.difficulty)
            .max()
            .unwrap_or(BASELINE_FLOOR)
    }

    /// Current consecutive-failure streak on a topic: the run of most
    /// recent attempts touching it that all failed. Returns the run
    /// length and the lowest difficulty seen inside the run.
    pub fn failure_streak(&self, topic: &str) -> (usize, i64) {
        let mut run = 0usize;
        let mut min_difficulty = i64::MAX;
        for attempt in &self.recent {
            if !attempt.topics.iter().any(|t| t == topic) {
                continue;
            }
            if attempt.passed {
                break;
            }
            run += 1;
            min_difficulty = min_difficulty.min(attempt.difficulty);
        }
        if run == 0 {
            min_difficulty = i64::MAX;
        }
        (run, min_difficulty)
    }

    pub fn recent_topics(&self) -> HashSet<&str> {
        self.recent
            .iter()
            .flat_map(|attempt| attempt.topics.iter().map(String::as_str))
            .collect()
    }
}

/// Returns the learner's next items, review first. A missing candidate
/// pool (catalog outage) degrades to review-only output.
pub async fn select_next(
    pool: &SqlitePool,
    config: &CoreConfig,
    learner_id: &str,
    subject: Subject,
    candidate_pool: Option<&[ProblemMetadata]>,
    max_review_items: usize,
    now: DateTime<Utc>,
) -> CoreResult<Vec<NextItem>> {
    let due = review::get_due(pool, learner_id, Some(subject), max_review_items, now).await?;
    let mut selection: Vec<NextItem> = due
        .iter()
        .map(|item| NextItem {
            problem_id: item.problem_id.clone(),
            reason: SelectionReason::Review,
        })
        .collect();

    let Some(candidates) = candidate_pool else {
        tracing::warn!(
            learner_id,
            subject = subject.as_str(),
            "candidate pool unavailable, serving review items only"
        );
        return Ok(selection);
    };

    let slots = config.selection_size.saturating_sub(selection.len());
    if slots == 0 || candidates.is_empty() {
        return Ok(selection);
    }

    let history = load_history(pool, learner_id, config.recent_history_limit).await?;

    let mut topic_keys: Vec<String> = candidates
        .iter()
        .flat_map(|meta| meta.topics.iter().cloned())
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    topic_keys.sort();
    let mastery_scores = mastery::get_topic_scores(pool, learner_id, &topic_keys).await?;

    let already: HashSet<&str> = selection
        .iter()
        .map(|item| item.problem_id.as_str())
        .collect();

    let mut scored: Vec<(f64, &str)> = Vec::new();
    for meta in candidates {
        if meta.subject != subject
            || already.contains(meta.problem_id.as_str())
            || history.open_problems.contains(&meta.problem_id)
        {
            continue;
        }
        if let Some(score) = score_candidate(config, meta, &history, &mastery_scores) {
            scored.push((score, meta.problem_id.as_str()));
        }
    }

    // Descending score; candidate id breaks ties for determinism.
    scored.sort_by(|a, b| match b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal) {
        Ordering::Equal => a.1.cmp(b.1),
        other => other,
    });

    selection.extend(scored.into_iter().take(slots).map(|(_, id)| NextItem {
        problem_id: id.to_string(),
        reason: SelectionReason::Recommended,
    }));

    Ok(selection)
}

/// Weighted score for one candidate, or None when a guardrail excludes
/// it outright.
pub fn score_candidate(
    config: &CoreConfig,
    meta: &ProblemMetadata,
    history: &LearnerHistory,
    mastery_scores: &HashMap<String, f64>,
) -> Option<f64> {
    let baseline = history.difficulty_baseline(&meta.topics);

    // Guardrail: no candidate more than one step above the baseline.
    if meta.difficulty > baseline + config.max_difficulty_jump {
        return None;
    }

    // Guardrail: repeated recent failures on a topic exclude it at
    // that difficulty and above.
    for topic in &meta.topics {
        let (run, run_difficulty) = history.failure_streak(topic);
        if run >= config.max_consecutive_failures && meta.difficulty >= run_difficulty {
            return None;
        }
    }

    let weights = &config.weights;
    let weakness = weakness_signal(config, &meta.topics, mastery_scores);
    let novelty = novelty_signal(
        history
            .attempts_by_problem
            .get(&meta.problem_id)
            .copied()
            .unwrap_or(0),
    );
    let pacing = pacing_signal(meta.difficulty - baseline);
    let recency = recency_signal(&meta.topics, &history.recent_topics());

    Some(
        weights.weakness * weakness
            + weights.novelty * novelty
            + weights.pacing * pacing
            + weights.recency * recency,
    )
}

/// Mean inverse mastery over the candidate's topics, in [0, 1]. Topics
/// without a record use the configured neutral default rather than
/// counting as weak.
fn weakness_signal(
    config: &CoreConfig,
    topics: &[String],
    mastery_scores: &HashMap<String, f64>,
) -> f64 {
    if topics.is_empty() {
        return 0.5;
    }
    let total: f64 = topics
        .iter()
        .map(|topic| {
            let score = mastery_scores
                .get(topic)
                .copied()
                .unwrap_or(config.unknown_mastery_neutral);
            (100.0 - score) / 100.0
        })
        .sum();
    (total / topics.len() as f64).clamp(0.0, 1.0)
}

/// 1.0 for a never-attempted problem, decaying with attempt count.
fn novelty_signal(attempts: i64) -> f64 {
    if attempts <= 0 {
        1.0
    } else {
        1.0 / (1.0 + attempts as f64)
    }
}

/// Rewards a one-step stretch above the baseline; at-level work scores
/// slightly lower and review-level work lower still.
fn pacing_signal(gap: i64) -> f64 {
    match gap {
        1 => 1.0,
        0 => 0.75,
        _ if gap < 0 => (0.5 + 0.1 * gap as f64).clamp(0.1, 0.5),
        _ => 0.0,
    }
}

/// Share of the candidate's topics absent from the recent window.
fn recency_signal(topics: &[String], recent_topics: &HashSet<&str>) -> f64 {
    if topics.is_empty() {
        return 0.5;
    }
    let fresh = topics
        .iter()
        .filter(|topic| !recent_topics.contains(topic.as_str()))
        .count();
    fresh as f64 / topics.len() as f64
}

/// Loads completion history for one learner: recent evaluated attempts
/// (newest first), per-problem attempt counts, and open tasks.
pub async fn load_history(
    pool: &SqlitePool,
    learner_id: &str,
    recent_limit: usize,
) -> CoreResult<LearnerHistory> {
    let mut history = LearnerHistory::default();

    let rows = sqlx::query(
        "SELECT e.payload, t.problem_id, t.topic_tags, t.difficulty \
         FROM task_events e \
         JOIN study_tasks t ON t.id = e.task_id \
         JOIN study_paths p ON p.id = t.path_id \
         WHERE p.learner_id = ? AND e.event_type = 'evaluated' \
         ORDER BY e.id DESC LIMIT ?",
    )
    .bind(learner_id)
    .bind(recent_limit as i64)
    .fetch_all(pool)
    .await?;

    for row in rows {
        let payload_raw: String = row.try_get("payload").unwrap_or_else(|_| "{}".to_string());
        let payload: serde_json::Value = serde_json::from_str(&payload_raw)?;
        let passed = payload
            .get("status")
            .and_then(|v| v.as_str())
            .map(|s| s == SubmissionStatus::Passed.as_str())
            .unwrap_or(false);
        let tags_raw: String = row.try_get("topic_tags").unwrap_or_else(|_| "[]".to_string());

        history.recent.push(AttemptRecord {
            problem_id: row.try_get("problem_id").unwrap_or_default(),
            topics: serde_json::from_str(&tags_raw)?,
            difficulty: row.try_get("difficulty").unwrap_or(1),
            passed,
        });
    }

    let counts = sqlx::query(
        "SELECT t.problem_id, COUNT(*) AS attempts \
         FROM study_tasks t JOIN study_paths p ON p.id = t.path_id \
         WHERE p.learner_id = ? AND t.status = 'completed' \
         GROUP BY t.problem_id",
    )
    .bind(learner_id)
    .fetch_all(pool)
    .await?;
    for row in counts {
        let problem_id: String = row.try_get("problem_id").unwrap_or_default();
        let attempts: i64 = row.try_get("attempts").unwrap_or(0);
        history.attempts_by_problem.insert(problem_id, attempts);
    }

    let open = sqlx::query(
        "SELECT DISTINCT t.problem_id \
         FROM study_tasks t JOIN study_paths p ON p.id = t.path_id \
         WHERE p.learner_id = ? AND t.status IN ('scheduled', 'in_progress')",
    )
    .bind(learner_id)
    .fetch_all(pool)
    .await?;
    for row in open {
        if let Ok(problem_id) = row.try_get::<String, _>("problem_id") {
            history.open_problems.insert(problem_id);
        }
    }

    Ok(history)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(problem_id: &str, topics: &[&str], difficulty: i64) -> ProblemMetadata {
        ProblemMetadata {
            problem_id: problem_id.to_string(),
            subject: Subject::Coding,
            topics: topics.iter().map(|t| t.to_string()).collect(),
            outcomes: Vec::new(),
            difficulty,
            target_complexity: None,
            target_time_seconds: 600,
        }
    }

    fn attempt(problem_id: &str, topics: &[&str], difficulty: i64, passed: bool) -> AttemptRecord {
        AttemptRecord {
            problem_id: problem_id.to_string(),
            topics: topics.iter().map(|t| t.to_string()).collect(),
            difficulty,
            passed,
        }
    }

    #[test]
    fn test_difficulty_guardrail_excludes_big_jumps() {
        let config = CoreConfig::default();
        let mut history = LearnerHistory::default();
        history.recent.push(attempt("p1", &["graphs"], 2, true));

        let stretch = meta("p2", &["graphs"], 3);
        let leap = meta("p3", &["graphs"], 4);

        assert!(score_candidate(&config, &stretch, &history, &HashMap::new()).is_some());
        assert!(score_candidate(&config, &leap, &history, &HashMap::new()).is_none());
    }

    #[test]
    fn test_unseen_topic_baseline_is_floor() {
        let config = CoreConfig::default();
        let history = LearnerHistory::default();

        assert!(score_candidate(&config, &meta("p1", &["dp"], 2), &history, &HashMap::new()).is_some());
        assert!(score_candidate(&config, &meta("p2", &["dp"], 3), &history, &HashMap::new()).is_none());
    }

    #[test]
    fn test_failure_streak_excludes_topic_at_difficulty_and_above() {
        let config = CoreConfig::default();
        let mut history = LearnerHistory::default();
        // Newest first: two consecutive failures on "graphs" at difficulty 2,
        // preceded by an old pass at 3 (keeps the baseline permissive).
        history.recent.push(attempt("p9", &["graphs"], 2, false));
        history.recent.push(attempt("p8", &["graphs"], 2, false));
        history.recent.push(attempt("p7", &["graphs"], 3, true));

        assert!(score_candidate(&config, &meta("c1", &["graphs"], 2), &history, &HashMap::new()).is_none());
        assert!(score_candidate(&config, &meta("c2", &["graphs"], 3), &history, &HashMap::new()).is_none());
        assert!(score_candidate(&config, &meta("c3", &["graphs"], 1), &history, &HashMap::new()).is_some());
    }

    #[test]
    fn test_pass_resets_failure_streak() {
        let mut history = LearnerHistory::default();
        history.recent.push(attempt("p3", &["graphs"], 2, true));
        history.recent.push(attempt("p2", &["graphs"], 2, false));
        history.recent.push(attempt("p1", &["graphs"], 2, false));

        assert_eq!(history.failure_streak("graphs").0, 0);
    }

    #[test]
    fn test_unknown_mastery_reads_neutral_not_weak() {
        let config = CoreConfig::default();
        let unknown = weakness_signal(&config, &[String::from("dp")], &HashMap::new());
        assert!((unknown - 0.5).abs() < 1e-9);

        let mut scores = HashMap::new();
        scores.insert(String::from("dp"), 10.0);
        let weak = weakness_signal(&config, &[String::from("dp")], &scores);
        assert!(weak > unknown);
    }

    #[test]
    fn test_novelty_decays_with_attempts() {
        assert_eq!(novelty_signal(0), 1.0);
        assert!(novelty_signal(1) < 1.0);
        assert!(novelty_signal(5) < novelty_signal(1));
    }
}
