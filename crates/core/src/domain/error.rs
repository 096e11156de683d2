use thiserror::Error;

use super::{ProblemId, SubmissionId, SubmissionStatus};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid problem id '{0}': expected 1-32 characters of [A-Za-z0-9_-]")]
    InvalidProblemId(String),
    #[error("unknown language: {0}")]
    UnknownLanguage(String),
    #[error("invalid {kind} code: {code}")]
    InvalidCode { kind: &'static str, code: i16 },
    #[error("problem {0} has no test cases")]
    EmptyProblem(ProblemId),
    #[error("problem {problem}: {field} must be greater than zero")]
    InvalidLimit {
        problem: ProblemId,
        field: &'static str,
    },
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: SubmissionStatus,
        to: SubmissionStatus,
    },
    #[error("submission {id} is {actual}, expected {expected}")]
    StatusConflict {
        id: SubmissionId,
        expected: SubmissionStatus,
        actual: SubmissionStatus,
    },
    #[error("submission {0} already has a verdict")]
    VerdictAlreadySet(SubmissionId),
}
