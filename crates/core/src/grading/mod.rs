//! Grading engine: turns execution results into verdicts.
//!
//! Per test case the classification order is time limit, memory limit, abnormal
//! exit, then output comparison. Cases are evaluated in order and the first
//! failing case decides the verdict.

mod comparator;
mod normalize;
mod session;

pub use normalize::normalize_output;
pub use session::{GradingSession, SessionState, Step};

use crate::domain::{CaseReport, ExecutionResult, Problem, Termination, TestCase, Verdict};

/// Bytes of stdout and of stderr kept per test case in a report.
pub const CASE_OUTPUT_EXCERPT_BYTES: usize = 4096;

pub fn classify(problem: &Problem, case: &TestCase, result: &ExecutionResult) -> Verdict {
    match result.termination {
        Termination::WallTimeLimit | Termination::CpuTimeLimit => {
            return Verdict::TimeLimitExceeded;
        }
        Termination::MemoryLimit => return Verdict::MemoryLimitExceeded,
        Termination::Normal => {}
    }

    if result.wall_time > problem.time_limit() {
        return Verdict::TimeLimitExceeded;
    }
    if result.memory_used_kb > problem.memory_limit_kb() {
        return Verdict::MemoryLimitExceeded;
    }
    if !result.exit_status.success() {
        return Verdict::RuntimeError;
    }

    if problem.comparator.matches(&result.stdout, &case.expected_output) {
        Verdict::Accepted
    } else {
        Verdict::WrongAnswer
    }
}

/// Grades the execution of test case `index` of `problem`.
///
/// An index outside the problem's test cases is graded as an internal error.
pub fn grade_case(problem: &Problem, index: usize, result: &ExecutionResult) -> CaseReport {
    let verdict = match problem.test_cases.get(index) {
        Some(case) => classify(problem, case, result),
        None => Verdict::InternalError,
    };

    CaseReport {
        index,
        verdict,
        wall_time_ms: u64::try_from(result.wall_time.as_millis()).unwrap_or(u64::MAX),
        memory_kb: result.memory_used_kb,
        exit_code: result.exit_status.code(),
        stdout: head_excerpt(&result.stdout, CASE_OUTPUT_EXCERPT_BYTES),
        stderr: tail_excerpt(&result.stderr, CASE_OUTPUT_EXCERPT_BYTES),
    }
}

fn head_excerpt(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

fn tail_excerpt(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut start = text.len() - limit;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &text[start..])
}

/// Grades results produced for the leading test cases of `problem`, in order.
pub fn grade(problem: &Problem, results: &[ExecutionResult]) -> Verdict {
    let mut session = GradingSession::new(problem.test_cases.len());
    if session.start() == Step::Continue {
        for (index, result) in results.iter().enumerate() {
            if session.record(grade_case(problem, index, result)) == Step::Stop {
                break;
            }
        }
    }
    session.into_report().verdict
}
