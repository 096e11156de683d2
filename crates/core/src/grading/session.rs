use crate::domain::{CaseReport, JudgeReport, Verdict};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Pending,
    Running { passed: usize },
    Accepted,
    Rejected {
        verdict: Verdict,
        case_index: Option<usize>,
    },
}

impl SessionState {
    pub fn is_finished(self) -> bool {
        matches!(self, SessionState::Accepted | SessionState::Rejected { .. })
    }
}

/// Whether the caller should evaluate another test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    Stop,
}

/// Ordered, fail-fast evaluation of one submission's test cases.
///
/// `Pending -> Running -> Accepted | Rejected`. The first rejected case ends the
/// session; later cases are never recorded.
#[derive(Debug, Clone)]
pub struct GradingSession {
    total_cases: usize,
    state: SessionState,
    cases: Vec<CaseReport>,
    compiler_output: Option<String>,
}

impl GradingSession {
    pub fn new(total_cases: usize) -> Self {
        Self {
            total_cases,
            state: SessionState::Pending,
            cases: Vec::with_capacity(total_cases),
            compiler_output: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn total_cases(&self) -> usize {
        self.total_cases
    }

    pub fn start(&mut self) -> Step {
        if self.state != SessionState::Pending {
            return self.step();
        }

        self.state = if self.total_cases == 0 {
            SessionState::Rejected {
                verdict: Verdict::InternalError,
                case_index: None,
            }
        } else {
            SessionState::Running { passed: 0 }
        };
        self.step()
    }

    pub fn compile_failed(&mut self, output: impl Into<String>) {
        if self.state.is_finished() {
            return;
        }
        self.compiler_output = Some(output.into());
        self.state = SessionState::Rejected {
            verdict: Verdict::CompileError,
            case_index: None,
        };
    }

    /// Keeps compiler diagnostics (warnings) of a successful compilation for the report.
    pub fn compiled_with(&mut self, output: impl Into<String>) {
        let output = output.into();
        if !output.trim().is_empty() {
            self.compiler_output = Some(output);
        }
    }

    pub fn record(&mut self, case: CaseReport) -> Step {
        let SessionState::Running { passed } = self.state else {
            return Step::Stop;
        };

        let index = case.index;
        let verdict = case.verdict;
        self.cases.push(case);

        self.state = if verdict.is_accepted() {
            let passed = passed + 1;
            if passed >= self.total_cases {
                SessionState::Accepted
            } else {
                SessionState::Running { passed }
            }
        } else {
            SessionState::Rejected {
                verdict,
                case_index: Some(index),
            }
        };
        self.step()
    }

    pub fn verdict(&self) -> Option<Verdict> {
        match self.state {
            SessionState::Accepted => Some(Verdict::Accepted),
            SessionState::Rejected { verdict, .. } => Some(verdict),
            SessionState::Pending | SessionState::Running { .. } => None,
        }
    }

    pub fn into_report(self) -> JudgeReport {
        let passed_cases = self
            .cases
            .iter()
            .filter(|case| case.verdict.is_accepted())
            .count();

        let (verdict, message) = match self.state {
            SessionState::Accepted => (Verdict::Accepted, None),
            SessionState::Rejected {
                verdict,
                case_index: Some(index),
            } => (verdict, Some(format!("test case {} failed", index + 1))),
            SessionState::Rejected {
                verdict: Verdict::InternalError,
                case_index: None,
            } => (
                Verdict::InternalError,
                Some("problem has no test cases".to_string()),
            ),
            SessionState::Rejected { verdict, .. } => (verdict, None),
            SessionState::Pending | SessionState::Running { .. } => (
                Verdict::InternalError,
                Some("grading ended before every test case was evaluated".to_string()),
            ),
        };

        JudgeReport {
            verdict,
            passed_cases,
            total_cases: self.total_cases,
            cases: self.cases,
            compiler_output: self.compiler_output,
            message,
        }
    }

    fn step(&self) -> Step {
        if self.state.is_finished() {
            Step::Stop
        } else {
            Step::Continue
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn case(index: usize, verdict: Verdict) -> CaseReport {
        CaseReport {
            index,
            verdict,
            wall_time_ms: 5,
            memory_kb: 1024,
            exit_code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    #[test]
    fn all_cases_passing_is_accepted() {
        let mut session = GradingSession::new(2);
        assert_eq!(session.start(), Step::Continue);
        assert_eq!(session.record(case(0, Verdict::Accepted)), Step::Continue);
        assert_eq!(session.record(case(1, Verdict::Accepted)), Step::Stop);

        let report = session.into_report();
        assert_eq!(report.verdict, Verdict::Accepted);
        assert_eq!(report.passed_cases, 2);
        assert_eq!(report.message, None);
    }

    #[test]
    fn first_failure_stops_the_session() {
        let mut session = GradingSession::new(5);
        session.start();
        session.record(case(0, Verdict::Accepted));
        assert_eq!(session.record(case(1, Verdict::WrongAnswer)), Step::Stop);
        assert_eq!(session.record(case(2, Verdict::Accepted)), Step::Stop);

        assert_eq!(
            session.state(),
            SessionState::Rejected {
                verdict: Verdict::WrongAnswer,
                case_index: Some(1)
            }
        );
        let report = session.into_report();
        assert_eq!(report.cases.len(), 2);
        assert_eq!(report.message.as_deref(), Some("test case 2 failed"));
    }

    #[test]
    fn compile_failure_skips_every_case() {
        let mut session = GradingSession::new(3);
        session.compile_failed("SyntaxError: '(' was never closed");
        assert_eq!(session.start(), Step::Stop);
        assert_eq!(session.verdict(), Some(Verdict::CompileError));

        let report = session.into_report();
        assert!(report.cases.is_empty());
        assert_eq!(
            report.compiler_output.as_deref(),
            Some("SyntaxError: '(' was never closed")
        );
    }

    #[test]
    fn unfinished_session_reports_internal_error() {
        let mut session = GradingSession::new(3);
        session.start();
        session.record(case(0, Verdict::Accepted));

        let report = session.into_report();
        assert_eq!(report.verdict, Verdict::InternalError);
        assert_eq!(report.passed_cases, 1);
    }

    #[test]
    fn recording_before_start_is_ignored() {
        let mut session = GradingSession::new(1);
        assert_eq!(session.record(case(0, Verdict::Accepted)), Step::Stop);
        assert_eq!(session.state(), SessionState::Pending);
    }
}
