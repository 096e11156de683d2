//! 沙箱执行层。
//!
//! `Runner` 是执行器池与真实进程之间的接缝：生产环境使用 [`ProcessRunner`]，
//! 测试可以替换为脚本化实现。

mod isolation;
mod limits;
mod process;
mod supervisor;

pub use isolation::namespaces_available;
pub use process::ProcessRunner;

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use openjudge_core::domain::{ExecutionResult, Problem, Submission, SubmissionId};
use tempfile::TempDir;

use crate::config::Toolchain;
use crate::error::ExecutorError;

/// 一次提交独占的临时工作目录，离开作用域时删除。
#[derive(Debug)]
pub struct Workspace {
    submission_id: SubmissionId,
    source_path: PathBuf,
    dir: TempDir,
}

impl Workspace {
    /// 在 `scratch_root`（缺省为系统临时目录）下创建目录并写入源文件。
    pub fn create(
        scratch_root: Option<&Path>,
        submission: &Submission,
        toolchain: &Toolchain,
    ) -> io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("openjudge-");
        let dir = match scratch_root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };

        let source_path = dir.path().join(&toolchain.source_file);
        std::fs::write(&source_path, submission.source_code.as_bytes())?;

        Ok(Self {
            submission_id: submission.id,
            source_path,
            dir,
        })
    }

    pub fn submission_id(&self) -> SubmissionId {
        self.submission_id
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileOutcome {
    /// 编译成功，附带编译器的警告输出（可能为空）。
    Ready { diagnostics: String },
    /// 编译失败，不再运行任何测试用例。
    Failed { output: String },
}

/// 单个测试用例的资源限制。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunLimits {
    pub time_limit: Duration,
    pub memory_limit_kb: u64,
}

impl RunLimits {
    pub fn for_problem(problem: &Problem) -> Self {
        Self {
            time_limit: problem.time_limit(),
            memory_limit_kb: problem.memory_limit_kb(),
        }
    }
}

#[async_trait]
pub trait Runner: Send + Sync {
    fn name(&self) -> &str;

    async fn prepare(
        &self,
        submission: &Submission,
        toolchain: &Toolchain,
    ) -> Result<Workspace, ExecutorError>;

    async fn compile(
        &self,
        workspace: &Workspace,
        toolchain: &Toolchain,
    ) -> Result<CompileOutcome, ExecutorError>;

    async fn run(
        &self,
        workspace: &Workspace,
        toolchain: &Toolchain,
        input: &str,
        limits: RunLimits,
    ) -> Result<ExecutionResult, ExecutorError>;
}
