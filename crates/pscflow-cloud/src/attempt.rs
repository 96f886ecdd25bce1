//! Apply attempt history

use crate::classify::ErrorCategory;
use crate::phase::Phase;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One apply invocation, recorded once it has finished
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyAttempt {
    /// 1-based attempt number within its phase
    pub attempt_number: u32,

    pub phase: Phase,

    /// Category of the failure, `None` when the apply succeeded
    pub category: Option<ErrorCategory>,

    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub exit_succeeded: bool,
}

impl ApplyAttempt {
    pub fn duration_ms(&self) -> i64 {
        self.ended_at
            .signed_duration_since(self.started_at)
            .num_milliseconds()
    }
}

/// Append-only attempt log
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptHistory {
    attempts: Vec<ApplyAttempt>,
}

impl AttemptHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, attempt: ApplyAttempt) {
        self.attempts.push(attempt);
    }

    pub fn iter(&self) -> impl Iterator<Item = &ApplyAttempt> {
        self.attempts.iter()
    }

    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    pub fn last(&self) -> Option<&ApplyAttempt> {
        self.attempts.last()
    }

    /// Attempts made in `phase`
    pub fn in_phase(&self, phase: Phase) -> Vec<&ApplyAttempt> {
        self.attempts.iter().filter(|a| a.phase == phase).collect()
    }

    pub fn into_vec(self) -> Vec<ApplyAttempt> {
        self.attempts
    }
}
