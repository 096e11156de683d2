//! 固定大小的评测工作池。
//!
//! 每个 worker 从队列取出一条提交，先做 Queued -> Running 的比较并交换，
//! 再在独立任务中评测，因此评测中的 panic 只会变成一次内部错误。

use std::sync::Arc;
use std::time::Duration;

use openjudge_core::domain::{JudgeReport, StatusUpdate, Submission};
use openjudge_core::grading::{GradingSession, Step, grade_case};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, warn};

use crate::catalog::ProblemCatalog;
use crate::config::JudgeConfig;
use crate::error::{ExecutorError, StoreError};
use crate::events::{EventBroadcaster, JudgeEvent};
use crate::queue::SubmissionQueue;
use crate::sandbox::{CompileOutcome, RunLimits, Runner};
use crate::store::ResultStore;

const STORE_RETRY_DELAY: Duration = Duration::from_millis(500);

/// worker 共享的依赖。
pub struct PoolContext {
    pub config: Arc<JudgeConfig>,
    pub catalog: Arc<ProblemCatalog>,
    pub queue: Arc<SubmissionQueue>,
    pub store: Arc<dyn ResultStore>,
    pub runner: Arc<dyn Runner>,
    pub events: Arc<EventBroadcaster>,
}

pub struct ExecutorPool {
    workers: Vec<JoinHandle<()>>,
    shutdown: CancellationToken,
}

impl ExecutorPool {
    pub fn spawn(size: usize, context: Arc<PoolContext>) -> Self {
        let shutdown = CancellationToken::new();
        let workers = (0..size)
            .map(|worker_id| {
                tokio::spawn(worker_loop(worker_id, context.clone(), shutdown.clone()))
            })
            .collect();

        info!(workers = size, runner = context.runner.name(), "executor pool started");
        Self { workers, shutdown }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// 停止领取新任务，等待正在评测的提交完成。
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for worker in self.workers {
            if let Err(err) = worker.await {
                error!(error = %err, "executor worker terminated abnormally");
            }
        }
        info!("executor pool stopped");
    }
}

async fn worker_loop(worker_id: usize, context: Arc<PoolContext>, shutdown: CancellationToken) {
    debug!(worker_id, "executor worker started");
    loop {
        let submission = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = context.queue.dequeue() => match next {
                Some(submission) => submission,
                None => break,
            },
        };
        process_submission(&context, worker_id, submission).await;
    }
    debug!(worker_id, "executor worker stopped");
}

struct Failure {
    transient: bool,
    reason: String,
}

#[tracing::instrument(skip(context, submission), fields(submission_id = %submission.id))]
async fn process_submission(context: &Arc<PoolContext>, worker_id: usize, submission: Submission) {
    let id = submission.id;
    let running = match context.store.transition(id, StatusUpdate::start()).await {
        Ok(running) => running,
        Err(StoreError::Backend(err)) => {
            error!(error = %err, "failed to mark submission running, retrying later");
            tokio::time::sleep(STORE_RETRY_DELAY).await;
            context.queue.requeue(submission);
            return;
        }
        Err(err) => {
            warn!(error = %err, "skipping submission that can no longer be started");
            context.queue.complete(id);
            return;
        }
    };

    context.events.emit(JudgeEvent::EvaluationStarted {
        submission_id: id,
        worker_id,
        attempt: running.attempts,
    });

    let task_context = context.clone();
    let task_submission = running.clone();
    let outcome = tokio::spawn(
        async move { evaluate(&task_context, &task_submission).await }.in_current_span(),
    )
    .await;

    let failure = match outcome {
        Ok(Ok(report)) => {
            finish_graded(context, &running, report).await;
            return;
        }
        Ok(Err(err)) => Failure {
            transient: err.is_transient(),
            reason: err.to_string(),
        },
        Err(join_err) => Failure {
            transient: true,
            reason: ExecutorError::Crashed(join_err.to_string()).to_string(),
        },
    };
    handle_failure(context, running, failure).await;
}

async fn evaluate(context: &PoolContext, submission: &Submission) -> Result<JudgeReport, ExecutorError> {
    let problem = context
        .catalog
        .get(&submission.problem_id)
        .ok_or_else(|| ExecutorError::ProblemMissing(submission.problem_id.clone()))?;
    let toolchain = context
        .config
        .toolchain(submission.language)
        .ok_or_else(|| ExecutorError::ToolchainMissing(submission.language.to_string()))?;

    let workspace = context.runner.prepare(submission, toolchain).await?;
    let mut session = GradingSession::new(problem.test_cases.len());

    match context.runner.compile(&workspace, toolchain).await? {
        CompileOutcome::Failed { output } => {
            session.compile_failed(output);
            return Ok(session.into_report());
        }
        CompileOutcome::Ready { diagnostics } => session.compiled_with(diagnostics),
    }

    if session.start() == Step::Stop {
        return Ok(session.into_report());
    }

    let limits = RunLimits::for_problem(problem);
    for (index, case) in problem.test_cases.iter().enumerate() {
        let result = context
            .runner
            .run(&workspace, toolchain, &case.input, limits)
            .await?;
        let case_report = grade_case(problem, index, &result);
        debug!(
            case = index + 1,
            verdict = %case_report.verdict,
            wall_ms = case_report.wall_time_ms,
            memory_kb = case_report.memory_kb,
            "test case evaluated"
        );
        if session.record(case_report) == Step::Stop {
            break;
        }
    }

    Ok(session.into_report())
}

async fn finish_graded(context: &PoolContext, running: &Submission, report: JudgeReport) {
    let verdict = report.verdict;
    let passed_cases = report.passed_cases;
    let total_cases = report.total_cases;

    match context
        .store
        .transition(running.id, StatusUpdate::graded(report))
        .await
    {
        Ok(_) => {
            info!(%verdict, passed_cases, total_cases, "submission graded");
            context.events.emit(JudgeEvent::SubmissionGraded {
                submission_id: running.id,
                verdict,
                passed_cases,
                total_cases,
            });
        }
        Err(err) => {
            error!(error = %err, "failed to record verdict");
            mark_failed(context, running, format!("failed to record verdict: {err}")).await;
        }
    }
    context.queue.complete(running.id);
}

async fn handle_failure(context: &PoolContext, running: Submission, failure: Failure) {
    let retry = failure.transient && running.attempts < context.config.pool.max_attempts;
    if retry {
        match context
            .store
            .transition(running.id, StatusUpdate::requeue())
            .await
        {
            Ok(requeued) => {
                warn!(
                    attempt = running.attempts,
                    reason = %failure.reason,
                    "evaluation failed, requeueing submission"
                );
                context.events.emit(JudgeEvent::SubmissionRequeued {
                    submission_id: running.id,
                    attempt: running.attempts,
                    reason: failure.reason,
                });
                context.queue.requeue(requeued);
                return;
            }
            Err(err) => error!(error = %err, "failed to requeue submission"),
        }
    }

    error!(
        attempt = running.attempts,
        reason = %failure.reason,
        "evaluation failed, giving up"
    );
    mark_failed(context, &running, failure.reason).await;
    context.queue.complete(running.id);
}

async fn mark_failed(context: &PoolContext, running: &Submission, reason: String) {
    match context
        .store
        .transition(running.id, StatusUpdate::failed(reason.clone()))
        .await
    {
        Ok(_) => context.events.emit(JudgeEvent::SubmissionFailed {
            submission_id: running.id,
            error: reason,
        }),
        Err(err) => error!(error = %err, "failed to mark submission failed"),
    }
}
