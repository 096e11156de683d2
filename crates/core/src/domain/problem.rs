use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{DomainError, ProblemId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub input: String,
    pub expected_output: String,
}

impl TestCase {
    pub fn new(input: impl Into<String>, expected_output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            expected_output: expected_output.into(),
        }
    }
}

/// How a test case's actual output is compared with the expected one.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Comparator {
    /// Normalized text must match exactly.
    #[default]
    Exact,
    /// Tokens are compared as numbers when both parse, within either tolerance.
    FloatTolerance {
        #[serde(default = "default_absolute_tolerance")]
        absolute: f64,
        #[serde(default = "default_relative_tolerance")]
        relative: f64,
    },
    /// Output lines are compared as a multiset.
    UnorderedLines,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    pub id: ProblemId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_time_limit_ms")]
    pub time_limit_ms: u64,
    #[serde(default = "default_memory_limit_mb")]
    pub memory_limit_mb: u64,
    #[serde(default)]
    pub comparator: Comparator,
    pub test_cases: Vec<TestCase>,
}

impl Problem {
    pub fn new(id: ProblemId, title: impl Into<String>, test_cases: Vec<TestCase>) -> Self {
        Self {
            id,
            title: title.into(),
            description: String::new(),
            time_limit_ms: default_time_limit_ms(),
            memory_limit_mb: default_memory_limit_mb(),
            comparator: Comparator::default(),
            test_cases,
        }
    }

    pub fn with_limits(mut self, time_limit_ms: u64, memory_limit_mb: u64) -> Self {
        self.time_limit_ms = time_limit_ms;
        self.memory_limit_mb = memory_limit_mb;
        self
    }

    pub fn with_comparator(mut self, comparator: Comparator) -> Self {
        self.comparator = comparator;
        self
    }

    pub fn time_limit(&self) -> Duration {
        Duration::from_millis(self.time_limit_ms)
    }

    pub fn memory_limit_kb(&self) -> u64 {
        self.memory_limit_mb.saturating_mul(1024)
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.test_cases.is_empty() {
            return Err(DomainError::EmptyProblem(self.id.clone()));
        }
        if self.time_limit_ms == 0 {
            return Err(DomainError::InvalidLimit {
                problem: self.id.clone(),
                field: "time_limit_ms",
            });
        }
        if self.memory_limit_mb == 0 {
            return Err(DomainError::InvalidLimit {
                problem: self.id.clone(),
                field: "memory_limit_mb",
            });
        }
        Ok(())
    }
}

fn default_time_limit_ms() -> u64 {
    2_000
}

fn default_memory_limit_mb() -> u64 {
    256
}

fn default_absolute_tolerance() -> f64 {
    1e-6
}

fn default_relative_tolerance() -> f64 {
    1e-6
}
