use std::fmt;

use serde::{Deserialize, Serialize};

use super::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Queued,
    Running,
    Graded,
    Failed,
}

impl SubmissionStatus {
    pub const ALL: [SubmissionStatus; 4] = [
        SubmissionStatus::Queued,
        SubmissionStatus::Running,
        SubmissionStatus::Graded,
        SubmissionStatus::Failed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SubmissionStatus::Queued => "queued",
            SubmissionStatus::Running => "running",
            SubmissionStatus::Graded => "graded",
            SubmissionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SubmissionStatus::Graded | SubmissionStatus::Failed)
    }

    /// Running -> Queued is only taken by the single internal-error retry.
    pub fn can_transition_to(self, next: SubmissionStatus) -> bool {
        matches!(
            (self, next),
            (SubmissionStatus::Queued, SubmissionStatus::Running)
                | (SubmissionStatus::Running, SubmissionStatus::Graded)
                | (SubmissionStatus::Running, SubmissionStatus::Failed)
                | (SubmissionStatus::Running, SubmissionStatus::Queued)
        )
    }

    pub fn ensure_transition(self, next: SubmissionStatus) -> Result<(), DomainError> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(DomainError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }

    pub fn code(self) -> i16 {
        match self {
            SubmissionStatus::Queued => 0,
            SubmissionStatus::Running => 1,
            SubmissionStatus::Graded => 2,
            SubmissionStatus::Failed => 3,
        }
    }

    pub fn from_code(code: i16) -> Result<Self, DomainError> {
        Self::ALL
            .into_iter()
            .find(|status| status.code() == code)
            .ok_or(DomainError::InvalidCode {
                kind: "submission status",
                code,
            })
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::SubmissionStatus::{self, *};

    #[test]
    fn forward_path_is_allowed() {
        assert!(Queued.can_transition_to(Running));
        assert!(Running.can_transition_to(Graded));
        assert!(Running.can_transition_to(Failed));
    }

    #[test]
    fn terminal_states_never_move() {
        for next in SubmissionStatus::ALL {
            assert!(!Graded.can_transition_to(next));
            assert!(!Failed.can_transition_to(next));
        }
    }

    #[test]
    fn queued_cannot_skip_running() {
        let err = Queued
            .ensure_transition(Graded)
            .expect_err("queued submissions must run first");
        assert_eq!(err.to_string(), "invalid status transition: queued -> graded");
    }
}
