//! Closed subject registry.
//!
//! Subjects are a fixed set of variants with a static capability table
//! registered at compile time; adding a subject means adding a variant
//! and a profile entry here.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subject {
    Coding,
    Math,
}

impl Subject {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Coding => "coding",
            Self::Math => "math",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "coding" => Some(Self::Coding),
            "math" => Some(Self::Math),
            _ => None,
        }
    }

    pub fn profile(self) -> &'static SubjectProfile {
        match self {
            Self::Coding => &CODING,
            Self::Math => &MATH,
        }
    }
}

impl std::fmt::Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-subject knobs for scoring and signal interpretation.
#[derive(Debug, Clone)]
pub struct SubjectProfile {
    pub subject: Subject,
    /// Mastery credit removed per hint level used on a pass.
    pub hint_penalty_per_level: f64,
    /// Fraction of overrun tolerated before time credit starts decaying.
    pub time_overrun_grace: f64,
    /// Module slug used for injected review tasks.
    pub review_module: &'static str,
}

static CODING: SubjectProfile = SubjectProfile {
    subject: Subject::Coding,
    hint_penalty_per_level: 0.2,
    time_overrun_grace: 1.0,
    review_module: "coding-review",
};

static MATH: SubjectProfile = SubjectProfile {
    subject: Subject::Math,
    hint_penalty_per_level: 0.2,
    time_overrun_grace: 1.25,
    review_module: "math-review",
};

pub fn all() -> &'static [Subject] {
    &[Subject::Coding, Subject::Math]
}
