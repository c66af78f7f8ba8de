mod common;

use chrono::Duration;

use mentor_core::config::CoreConfig;
use mentor_core::services::paths::PathMode;
use mentor_core::services::recommend;
use mentor_core::subjects::Subject;
use mentor_core::types::{ProblemMetadata, SelectionReason, SubmissionStatus};

use common::{attempt, problem, t0};

fn pool(problems: &[ProblemMetadata]) -> Vec<ProblemMetadata> {
    problems.to_vec()
}

#[tokio::test]
async fn due_reviews_come_first_unconditionally() {
    let db = common::test_db().await;
    let config = CoreConfig::default();
    let path = common::create_path(&db, "learner-1", PathMode::FreePractice).await;

    // A failure puts p-review into the queue, due immediately.
    attempt(
        &db,
        &config,
        &path,
        &problem("p-review", &["graphs"], 2),
        SubmissionStatus::Failed,
        t0(),
    )
    .await;

    let candidates = pool(&[
        problem("a-fresh", &["two-pointers"], 1),
        problem("b-fresh", &["strings"], 1),
    ]);
    let selection = recommend::select_next(
        db.pool(),
        &config,
        "learner-1",
        Subject::Coding,
        Some(&candidates),
        config.max_review_items,
        t0() + Duration::hours(1),
    )
    .await
    .unwrap();

    assert_eq!(selection[0].problem_id, "p-review");
    assert_eq!(selection[0].reason, SelectionReason::Review);
    assert!(selection[1..]
        .iter()
        .all(|item| item.reason == SelectionReason::Recommended));
}

#[tokio::test]
async fn catalog_outage_degrades_to_review_only() {
    let db = common::test_db().await;
    let config = CoreConfig::default();
    let path = common::create_path(&db, "learner-1", PathMode::FreePractice).await;

    attempt(
        &db,
        &config,
        &path,
        &problem("p-review", &["graphs"], 2),
        SubmissionStatus::Failed,
        t0(),
    )
    .await;

    let selection = recommend::select_next(
        db.pool(),
        &config,
        "learner-1",
        Subject::Coding,
        None,
        config.max_review_items,
        t0() + Duration::hours(1),
    )
    .await
    .unwrap();

    assert_eq!(selection.len(), 1);
    assert_eq!(selection[0].problem_id, "p-review");
    assert_eq!(selection[0].reason, SelectionReason::Review);
}

#[tokio::test]
async fn difficulty_jump_guardrail_holds_end_to_end() {
    let db = common::test_db().await;
    let config = CoreConfig::default();
    let path = common::create_path(&db, "learner-1", PathMode::FreePractice).await;

    // Baseline on "graphs" becomes 2 after one pass.
    attempt(
        &db,
        &config,
        &path,
        &problem("warmup", &["graphs"], 2),
        SubmissionStatus::Passed,
        t0(),
    )
    .await;

    let candidates = pool(&[
        problem("stretch", &["graphs"], 3),
        problem("leap", &["graphs"], 4),
    ]);
    let selection = recommend::select_next(
        db.pool(),
        &config,
        "learner-1",
        Subject::Coding,
        Some(&candidates),
        0,
        t0() + Duration::hours(1),
    )
    .await
    .unwrap();

    let ids: Vec<&str> = selection.iter().map(|i| i.problem_id.as_str()).collect();
    assert!(ids.contains(&"stretch"));
    assert!(!ids.contains(&"leap"), "difficulty baseline + 1 is a hard cap");
}

#[tokio::test]
async fn consecutive_failures_exclude_the_topic_at_that_difficulty() {
    let db = common::test_db().await;
    let config = CoreConfig::default();
    let path = common::create_path(&db, "learner-1", PathMode::FreePractice).await;

    // Establish a permissive baseline first, then fail twice in a row
    // on "graphs" at difficulty 2.
    attempt(
        &db,
        &config,
        &path,
        &problem("base", &["graphs"], 2),
        SubmissionStatus::Passed,
        t0(),
    )
    .await;
    attempt(
        &db,
        &config,
        &path,
        &problem("fail-1", &["graphs"], 2),
        SubmissionStatus::Failed,
        t0() + Duration::hours(1),
    )
    .await;
    attempt(
        &db,
        &config,
        &path,
        &problem("fail-2", &["graphs"], 2),
        SubmissionStatus::Failed,
        t0() + Duration::hours(2),
    )
    .await;

    let candidates = pool(&[
        problem("graphs-same", &["graphs"], 2),
        problem("graphs-higher", &["graphs"], 3),
        problem("graphs-easier", &["graphs"], 1),
        problem("other-topic", &["strings"], 1),
    ]);
    let selection = recommend::select_next(
        db.pool(),
        &config,
        "learner-1",
        Subject::Coding,
        Some(&candidates),
        0,
        t0() + Duration::hours(3),
    )
    .await
    .unwrap();

    let recommended: Vec<&str> = selection
        .iter()
        .filter(|i| i.reason == SelectionReason::Recommended)
        .map(|i| i.problem_id.as_str())
        .collect();
    assert!(!recommended.contains(&"graphs-same"));
    assert!(!recommended.contains(&"graphs-higher"));
    assert!(recommended.contains(&"graphs-easier"));
    assert!(recommended.contains(&"other-topic"));
}

#[tokio::test]
async fn ties_break_by_ascending_problem_id() {
    let db = common::test_db().await;
    let config = CoreConfig::default();
    common::create_path(&db, "learner-1", PathMode::FreePractice).await;

    // Identical candidates differ only by id.
    let candidates = pool(&[
        problem("zeta", &["graphs"], 1),
        problem("alpha", &["graphs"], 1),
        problem("mid", &["graphs"], 1),
    ]);
    let selection = recommend::select_next(
        db.pool(),
        &config,
        "learner-1",
        Subject::Coding,
        Some(&candidates),
        0,
        t0(),
    )
    .await
    .unwrap();

    let ids: Vec<&str> = selection.iter().map(|i| i.problem_id.as_str()).collect();
    assert_eq!(ids, vec!["alpha", "mid", "zeta"]);
}

#[tokio::test]
async fn weak_topics_outrank_strong_ones() {
    let db = common::test_db().await;
    let config = CoreConfig::default();
    let path = common::create_path(&db, "learner-1", PathMode::FreePractice).await;

    // Build contrast: repeated clean passes on "strings", repeated
    // failures on "graphs" (interleaved with a pass so the failure
    // guardrail does not trip).
    let mut now = t0();
    for _ in 0..3 {
        attempt(
            &db,
            &config,
            &path,
            &problem("s-drill", &["strings"], 1),
            SubmissionStatus::Passed,
            now,
        )
        .await;
        now += Duration::hours(1);
    }
    attempt(
        &db,
        &config,
        &path,
        &problem("g-drill", &["graphs"], 1),
        SubmissionStatus::Failed,
        now,
    )
    .await;
    now += Duration::hours(1);
    attempt(
        &db,
        &config,
        &path,
        &problem("g-pass", &["graphs"], 1),
        SubmissionStatus::Passed,
        now,
    )
    .await;
    now += Duration::hours(1);

    let candidates = pool(&[
        problem("strings-next", &["strings"], 1),
        problem("graphs-next", &["graphs"], 1),
    ]);
    let selection = recommend::select_next(
        db.pool(),
        &config,
        "learner-1",
        Subject::Coding,
        Some(&candidates),
        0,
        now,
    )
    .await
    .unwrap();

    let recommended: Vec<&str> = selection
        .iter()
        .filter(|i| i.reason == SelectionReason::Recommended)
        .map(|i| i.problem_id.as_str())
        .collect();
    assert_eq!(recommended.first(), Some(&"graphs-next"));
}

#[tokio::test]
async fn open_tasks_and_other_subjects_are_filtered_out() {
    let db = common::test_db().await;
    let config = CoreConfig::default();
    let path = common::create_path(&db, "learner-1", PathMode::FreePractice).await;

    // p-open has a scheduled task already.
    common::create_task(&db, &path, &problem("p-open", &["graphs"], 1), t0()).await;

    let mut math_candidate = problem("m1", &["algebra"], 1);
    math_candidate.subject = Subject::Math;

    let candidates = pool(&[
        problem("p-open", &["graphs"], 1),
        problem("p-free", &["graphs"], 1),
        math_candidate,
    ]);
    let selection = recommend::select_next(
        db.pool(),
        &config,
        "learner-1",
        Subject::Coding,
        Some(&candidates),
        0,
        t0(),
    )
    .await
    .unwrap();

    let ids: Vec<&str> = selection.iter().map(|i| i.problem_id.as_str()).collect();
    assert_eq!(ids, vec!["p-free"]);
}
