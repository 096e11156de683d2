#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use judge_runtime::{
    CompileOutcome, ExecutorError, JudgeConfig, JudgeService, ProblemCatalog, RunLimits, Runner,
    SubmissionDraft, Toolchain, Workspace,
};
use openjudge_core::domain::{
    ExecutionResult, Language, Problem, ProblemId, Submission, SubmissionId, TestCase, UserId,
};

/// What the scripted runner does for every submission.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Prints each test case's input, which is also its expected output.
    Echo,
    /// Echoes, except for the case whose input equals the marker.
    WrongOn(String),
    CompileError(String),
    /// Every run fails with a runner error.
    AlwaysFail,
    /// The first `n` runs fail with a runner error, later ones echo.
    FailFirst(usize),
    /// Compilation panics.
    Panic,
}

pub struct ScriptedRunner {
    behavior: Behavior,
    delay: Duration,
    prepares: AtomicUsize,
    compiles: AtomicUsize,
    runs: AtomicUsize,
}

impl ScriptedRunner {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            delay: Duration::ZERO,
            prepares: AtomicUsize::new(0),
            compiles: AtomicUsize::new(0),
            runs: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn prepares(&self) -> usize {
        self.prepares.load(Ordering::SeqCst)
    }

    pub fn compiles(&self) -> usize {
        self.compiles.load(Ordering::SeqCst)
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Runner for ScriptedRunner {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn prepare(
        &self,
        submission: &Submission,
        toolchain: &Toolchain,
    ) -> Result<Workspace, ExecutorError> {
        self.prepares.fetch_add(1, Ordering::SeqCst);
        Workspace::create(None, submission, toolchain).map_err(ExecutorError::Workspace)
    }

    async fn compile(
        &self,
        _workspace: &Workspace,
        _toolchain: &Toolchain,
    ) -> Result<CompileOutcome, ExecutorError> {
        self.compiles.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            Behavior::CompileError(output) => Ok(CompileOutcome::Failed {
                output: output.clone(),
            }),
            Behavior::Panic => panic!("scripted runner panic"),
            _ => Ok(CompileOutcome::Ready {
                diagnostics: String::new(),
            }),
        }
    }

    async fn run(
        &self,
        workspace: &Workspace,
        _toolchain: &Toolchain,
        input: &str,
        _limits: RunLimits,
    ) -> Result<ExecutionResult, ExecutorError> {
        let run = self.runs.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let stdout = match &self.behavior {
            Behavior::AlwaysFail => {
                return Err(ExecutorError::Supervise("scripted failure".to_string()));
            }
            Behavior::FailFirst(n) if run < *n => {
                return Err(ExecutorError::Supervise("scripted failure".to_string()));
            }
            Behavior::WrongOn(marker) if marker == input => "wrong".to_string(),
            _ => input.to_string(),
        };
        Ok(ExecutionResult::exited(workspace.submission_id(), 0, stdout))
    }
}

pub const ECHO_PROBLEM: &str = "echo";

/// A problem whose test case `n` has input and expected output `case-n`.
pub fn echo_catalog(cases: usize) -> ProblemCatalog {
    let test_cases = (1..=cases)
        .map(|n| TestCase::new(format!("case-{n}"), format!("case-{n}")))
        .collect();
    let problem = Problem::new(
        ProblemId::new(ECHO_PROBLEM).expect("valid problem id"),
        "Echo",
        test_cases,
    );
    ProblemCatalog::new(vec![problem]).expect("catalog should be valid")
}

pub fn config(workers: usize, capacity: usize) -> JudgeConfig {
    let mut config = JudgeConfig::default();
    config.pool.workers = workers;
    config.queue.capacity = capacity;
    config
}

pub fn draft(user_id: UserId, code: &str) -> SubmissionDraft {
    SubmissionDraft {
        user_id,
        problem_id: Some(ECHO_PROBLEM.to_string()),
        language: Some(Language::Python.to_string()),
        source_code: Some(code.to_string()),
    }
}

/// Polls until the submission reaches a terminal status.
pub async fn wait_for_terminal(service: &JudgeService, id: SubmissionId) -> Submission {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let submission = service.get(id).await.expect("submission should exist");
            if submission.status.is_terminal() {
                return submission;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("submission should reach a terminal status")
}

pub fn scripted_service(
    behavior: Behavior,
    cases: usize,
    config: JudgeConfig,
) -> (Arc<JudgeService>, Arc<ScriptedRunner>) {
    let runner = Arc::new(ScriptedRunner::new(behavior));
    let service = JudgeService::new(
        config,
        echo_catalog(cases),
        Arc::new(judge_runtime::MemoryResultStore::new()),
        runner.clone(),
    )
    .expect("service should initialize");
    (Arc::new(service), runner)
}
