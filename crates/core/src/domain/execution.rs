use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::SubmissionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ExitStatus {
    Exited(i32),
    Signaled(i32),
}

impl ExitStatus {
    pub fn success(self) -> bool {
        self == ExitStatus::Exited(0)
    }

    pub fn code(self) -> Option<i32> {
        match self {
            ExitStatus::Exited(code) => Some(code),
            ExitStatus::Signaled(_) => None,
        }
    }
}

/// Why the supervisor stopped the process, if it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    #[default]
    Normal,
    WallTimeLimit,
    CpuTimeLimit,
    MemoryLimit,
}

/// Outcome of running one test case. Produced by a runner, consumed once by the grader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub submission_id: SubmissionId,
    pub stdout: String,
    pub stderr: String,
    pub exit_status: ExitStatus,
    pub wall_time: Duration,
    pub cpu_time: Duration,
    pub memory_used_kb: u64,
    pub termination: Termination,
    pub output_truncated: bool,
}

impl ExecutionResult {
    pub fn exited(submission_id: SubmissionId, code: i32, stdout: impl Into<String>) -> Self {
        Self {
            submission_id,
            stdout: stdout.into(),
            stderr: String::new(),
            exit_status: ExitStatus::Exited(code),
            wall_time: Duration::ZERO,
            cpu_time: Duration::ZERO,
            memory_used_kb: 0,
            termination: Termination::Normal,
            output_truncated: false,
        }
    }

    pub fn with_termination(mut self, termination: Termination) -> Self {
        self.termination = termination;
        self
    }

    pub fn with_usage(mut self, wall_time: Duration, memory_used_kb: u64) -> Self {
        self.wall_time = wall_time;
        self.memory_used_kb = memory_used_kb;
        self
    }

    pub fn with_stderr(mut self, stderr: impl Into<String>) -> Self {
        self.stderr = stderr.into();
        self
    }
}
