use async_trait::async_trait;
use openjudge_core::domain::{ExecutionResult, Submission, Termination};
use tracing::debug;

use super::supervisor::{self, ProcessSpec};
use super::{CompileOutcome, RunLimits, Runner, Workspace};
use crate::config::{SandboxConfig, Toolchain};
use crate::error::ExecutorError;

/// 基于本机进程的运行器：rlimit + 独立进程组 + 轮询监督。
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    config: SandboxConfig,
}

impl ProcessRunner {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    async fn supervise(&self, spec: ProcessSpec) -> Result<ExecutionResult, ExecutorError> {
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || supervisor::run(&spec, &config))
            .await
            .map_err(|err| ExecutorError::Crashed(err.to_string()))?
    }
}

#[async_trait]
impl Runner for ProcessRunner {
    fn name(&self) -> &str {
        "process"
    }

    async fn prepare(
        &self,
        submission: &Submission,
        toolchain: &Toolchain,
    ) -> Result<Workspace, ExecutorError> {
        let scratch_root = self.config.scratch_root.clone();
        let submission = submission.clone();
        let toolchain = toolchain.clone();
        tokio::task::spawn_blocking(move || {
            Workspace::create(scratch_root.as_deref(), &submission, &toolchain)
        })
        .await
        .map_err(|err| ExecutorError::Crashed(err.to_string()))?
        .map_err(ExecutorError::Workspace)
    }

    async fn compile(
        &self,
        workspace: &Workspace,
        toolchain: &Toolchain,
    ) -> Result<CompileOutcome, ExecutorError> {
        if !toolchain.needs_compile() {
            return Ok(CompileOutcome::Ready {
                diagnostics: String::new(),
            });
        }

        let result = self
            .supervise(ProcessSpec {
                submission_id: workspace.submission_id(),
                command: toolchain.compile.clone(),
                cwd: workspace.path().to_path_buf(),
                stdin: String::new(),
                time_limit: self.config.compile_time_limit(),
                memory_limit_kb: self.config.compile_memory_limit_mb.saturating_mul(1024),
            })
            .await?;

        debug!(
            submission_id = %workspace.submission_id(),
            status = ?result.exit_status,
            termination = ?result.termination,
            "compilation finished"
        );

        if result.termination == Termination::Normal && result.exit_status.success() {
            return Ok(CompileOutcome::Ready {
                diagnostics: result.stderr,
            });
        }

        let output = match result.termination {
            Termination::Normal => compiler_output(&result),
            Termination::WallTimeLimit | Termination::CpuTimeLimit => {
                "compilation exceeded the time limit".to_string()
            }
            Termination::MemoryLimit => "compilation exceeded the memory limit".to_string(),
        };
        Ok(CompileOutcome::Failed { output })
    }

    async fn run(
        &self,
        workspace: &Workspace,
        toolchain: &Toolchain,
        input: &str,
        limits: RunLimits,
    ) -> Result<ExecutionResult, ExecutorError> {
        self.supervise(ProcessSpec {
            submission_id: workspace.submission_id(),
            command: toolchain.run.clone(),
            cwd: workspace.path().to_path_buf(),
            stdin: input.to_string(),
            time_limit: limits.time_limit,
            memory_limit_kb: limits.memory_limit_kb,
        })
        .await
    }
}

fn compiler_output(result: &ExecutionResult) -> String {
    let mut output = result.stderr.trim_end().to_string();
    let stdout = result.stdout.trim_end();
    if !stdout.is_empty() {
        if !output.is_empty() {
            output.push('\n');
        }
        output.push_str(stdout);
    }
    if output.is_empty() {
        output = format!("compiler exited with {:?}", result.exit_status);
    }
    output
}
