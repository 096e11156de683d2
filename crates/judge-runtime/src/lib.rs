pub mod catalog;
pub mod config;
pub mod error;
pub mod events;
pub mod pool;
pub mod queue;
pub mod sandbox;
pub mod service;
pub mod store;

pub use catalog::ProblemCatalog;
pub use config::{JudgeConfig, PoolConfig, QueueConfig, SandboxConfig, SubmissionLimits, Toolchain};
pub use error::{ExecutorError, JudgeError, QueueError, Result, StoreError, ValidationError};
pub use events::{EventBroadcaster, EventStream, JudgeEvent};
pub use pool::{ExecutorPool, PoolContext};
pub use queue::{QueueStats, RecoveryReport, SubmissionQueue};
pub use sandbox::{
    CompileOutcome, ProcessRunner, RunLimits, Runner, Workspace, namespaces_available,
};
pub use service::{JudgeService, SubmissionDraft};
pub use store::{MemoryResultStore, Page, PageRequest, ResultStore, StoreResult};
