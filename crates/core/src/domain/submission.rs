use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{DomainError, Language, ProblemId, SubmissionId, SubmissionStatus, UserId, Verdict};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseReport {
    pub index: usize,
    pub verdict: Verdict,
    pub wall_time_ms: u64,
    pub memory_kb: u64,
    pub exit_code: Option<i32>,
    /// Leading part of what the program printed.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stdout: String,
    /// Trailing part of the program's stderr, where tracebacks end.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stderr: String,
}

/// Explanation stored next to the final verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JudgeReport {
    pub verdict: Verdict,
    pub passed_cases: usize,
    pub total_cases: usize,
    #[serde(default)]
    pub cases: Vec<CaseReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compiler_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl JudgeReport {
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::InternalError,
            passed_cases: 0,
            total_cases: 0,
            cases: Vec::new(),
            compiler_output: None,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub id: SubmissionId,
    pub user_id: UserId,
    pub problem_id: ProblemId,
    pub language: Language,
    pub source_code: String,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: SubmissionStatus,
    pub verdict: Option<Verdict>,
    pub attempts: u32,
    pub report: Option<JudgeReport>,
}

impl Submission {
    pub fn new(
        user_id: UserId,
        problem_id: ProblemId,
        language: Language,
        source_code: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: SubmissionId::new(),
            user_id,
            problem_id,
            language,
            source_code: source_code.into(),
            submitted_at: now,
            updated_at: now,
            status: SubmissionStatus::Queued,
            verdict: None,
            attempts: 0,
            report: None,
        }
    }

    /// Returns the record that results from `update`, leaving `self` untouched.
    pub fn apply(&self, update: &StatusUpdate) -> Result<Submission, DomainError> {
        if self.status != update.expected {
            return Err(DomainError::StatusConflict {
                id: self.id,
                expected: update.expected,
                actual: self.status,
            });
        }
        self.status.ensure_transition(update.next)?;
        if self.verdict.is_some() && update.verdict.is_some() {
            return Err(DomainError::VerdictAlreadySet(self.id));
        }

        let mut next = self.clone();
        next.status = update.next;
        if update.verdict.is_some() {
            next.verdict = update.verdict;
        }
        if update.report.is_some() {
            next.report = update.report.clone();
        }
        if update.increment_attempts {
            next.attempts += 1;
        }
        next.updated_at = update.at;
        Ok(next)
    }
}

/// A compare-and-set on a submission's status, applied atomically by a result store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub expected: SubmissionStatus,
    pub next: SubmissionStatus,
    pub verdict: Option<Verdict>,
    pub report: Option<JudgeReport>,
    pub increment_attempts: bool,
    pub at: DateTime<Utc>,
}

impl StatusUpdate {
    fn new(expected: SubmissionStatus, next: SubmissionStatus) -> Self {
        Self {
            expected,
            next,
            verdict: None,
            report: None,
            increment_attempts: false,
            at: Utc::now(),
        }
    }

    pub fn start() -> Self {
        Self {
            increment_attempts: true,
            ..Self::new(SubmissionStatus::Queued, SubmissionStatus::Running)
        }
    }

    pub fn requeue() -> Self {
        Self::new(SubmissionStatus::Running, SubmissionStatus::Queued)
    }

    pub fn graded(report: JudgeReport) -> Self {
        Self {
            verdict: Some(report.verdict),
            report: Some(report),
            ..Self::new(SubmissionStatus::Running, SubmissionStatus::Graded)
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            verdict: Some(Verdict::InternalError),
            report: Some(JudgeReport::internal_error(message)),
            ..Self::new(SubmissionStatus::Running, SubmissionStatus::Failed)
        }
    }
}
