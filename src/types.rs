//! Data structures exchanged with external collaborators.
//!
//! Evaluation results and catalog metadata arrive as already-resolved
//! values; the core never calls out to another service.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;
use crate::subjects::Subject;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Passed,
    Failed,
    Timeout,
    Error,
}

impl SubmissionStatus {
    pub fn is_pass(self) -> bool {
        matches!(self, Self::Passed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TestBatch {
    pub passed: i64,
    pub total: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HiddenTestBatch {
    pub passed: i64,
    pub total: i64,
    #[serde(default)]
    pub categories: Vec<String>,
}

/// One evaluated submission, produced by the external evaluator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionResult {
    pub submission_id: Uuid,
    pub task_id: Uuid,
    pub status: SubmissionStatus,
    pub visible: TestBatch,
    pub hidden: HiddenTestBatch,
    pub exec_ms: Option<i64>,
}

impl SubmissionResult {
    pub fn total_tests(&self) -> i64 {
        self.visible.total + self.hidden.total
    }

    pub fn passed_tests(&self) -> i64 {
        self.visible.passed + self.hidden.passed
    }

    /// Fraction of tests passed, 0.0 when the result carries no tests.
    pub fn test_score(&self) -> f64 {
        let total = self.total_tests();
        if total <= 0 {
            return 0.0;
        }
        self.passed_tests() as f64 / total as f64
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.visible.passed > self.visible.total || self.hidden.passed > self.hidden.total {
            return Err(CoreError::validation("passed test count exceeds total"));
        }
        if self.visible.passed < 0 || self.hidden.passed < 0 {
            return Err(CoreError::validation("negative test count"));
        }
        Ok(())
    }
}

/// Catalog-supplied description of one problem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemMetadata {
    pub problem_id: String,
    pub subject: Subject,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub outcomes: Vec<String>,
    pub difficulty: i64,
    #[serde(default)]
    pub target_complexity: Option<String>,
    pub target_time_seconds: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionReason {
    Review,
    Recommended,
}

/// One entry of a `NextTaskSelection`, in serving order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NextItem {
    pub problem_id: String,
    pub reason: SelectionReason,
}
