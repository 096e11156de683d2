mod error;
mod execution;
mod ids;
mod language;
mod problem;
mod submission;
mod submission_status;
mod verdict;

pub use error::DomainError;
pub use execution::{ExecutionResult, ExitStatus, Termination};
pub use ids::{ProblemId, SubmissionId, UserId};
pub use language::Language;
pub use problem::{Comparator, Problem, TestCase};
pub use submission::{CaseReport, JudgeReport, StatusUpdate, Submission};
pub use submission_status::SubmissionStatus;
pub use verdict::Verdict;
