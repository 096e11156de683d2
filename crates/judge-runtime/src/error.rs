use openjudge_core::domain::{DomainError, ProblemId, SubmissionId};
use thiserror::Error;

/// 结果存储层错误。
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("submission not found: {0}")]
    NotFound(SubmissionId),

    #[error("submission already stored: {0}")]
    Duplicate(SubmissionId),

    /// 状态比较失败或裁决重复写入。
    #[error(transparent)]
    Transition(#[from] DomainError),

    #[error("storage backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Transition(_))
    }
}

/// 提交队列错误。
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("submission queue is full ({capacity} outstanding)")]
    Capacity { capacity: usize },

    #[error("submission queue is closed")]
    Closed,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// 执行器内部错误，统一映射为 InternalError 路径。
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("problem {0} is not in the catalog")]
    ProblemMissing(ProblemId),

    #[error("no toolchain configured for {0}")]
    ToolchainMissing(String),

    #[error("failed to prepare workspace: {0}")]
    Workspace(#[source] std::io::Error),

    #[error("failed to spawn sandboxed process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("process supervision failed: {0}")]
    Supervise(String),

    #[error("evaluation task crashed: {0}")]
    Crashed(String),
}

impl ExecutorError {
    /// 仅瞬时故障值得重试；缺少题目或工具链时重试没有意义。
    pub fn is_transient(&self) -> bool {
        !matches!(
            self,
            ExecutorError::ProblemMissing(_) | ExecutorError::ToolchainMissing(_)
        )
    }
}

/// 提交前校验失败，直接返回给调用方，不会重试。
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("problem_id is required")]
    MissingProblemId,

    #[error("{0}")]
    InvalidProblemId(String),

    #[error("problem {0} does not exist")]
    UnknownProblem(ProblemId),

    #[error("code must not be empty")]
    EmptyCode,

    #[error("code is too long ({len} bytes, at most {max})")]
    CodeTooLong { len: usize, max: usize },

    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("code contains a forbidden construct: {0}")]
    UnsafeCode(String),
}

impl ValidationError {
    /// Stable machine-readable code for API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::MissingProblemId => "missing_problem_id",
            ValidationError::InvalidProblemId(_) => "invalid_problem_id",
            ValidationError::UnknownProblem(_) => "unknown_problem",
            ValidationError::EmptyCode => "empty_code",
            ValidationError::CodeTooLong { .. } => "code_too_long",
            ValidationError::UnsupportedLanguage(_) => "unsupported_language",
            ValidationError::UnsafeCode(_) => "unsafe_code",
        }
    }
}

#[derive(Debug, Error)]
pub enum JudgeError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("judge is at capacity ({capacity} outstanding submissions)")]
    Capacity { capacity: usize },

    #[error("submission not found: {0}")]
    NotFound(SubmissionId),

    #[error("judge service is shutting down")]
    Unavailable,

    #[error("配置错误: {0}")]
    Config(String),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for JudgeError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => JudgeError::NotFound(id),
            other => JudgeError::Store(other),
        }
    }
}

impl From<QueueError> for JudgeError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Capacity { capacity } => JudgeError::Capacity { capacity },
            QueueError::Closed => JudgeError::Unavailable,
            QueueError::Store(err) => err.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, JudgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_errors_keep_their_limit() {
        let err: JudgeError = QueueError::Capacity { capacity: 8 }.into();
        assert!(matches!(err, JudgeError::Capacity { capacity: 8 }));
    }

    #[test]
    fn missing_records_surface_as_not_found() {
        let id = SubmissionId::new();
        let err: JudgeError = QueueError::Store(StoreError::NotFound(id)).into();
        assert!(matches!(err, JudgeError::NotFound(found) if found == id));
    }

    #[test]
    fn configuration_problems_are_not_retried() {
        let problem = ProblemId::new("1").expect("valid id");
        assert!(!ExecutorError::ProblemMissing(problem).is_transient());
        assert!(ExecutorError::Supervise("wait4 failed".to_string()).is_transient());
    }
}
