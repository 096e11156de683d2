use std::sync::Arc;

use openjudge_core::domain::{Language, ProblemId, Submission, SubmissionId, UserId};
use tokio::sync::Mutex;
use tracing::info;

use crate::catalog::ProblemCatalog;
use crate::config::JudgeConfig;
use crate::error::{JudgeError, Result, ValidationError};
use crate::events::{EventBroadcaster, EventStream, JudgeEvent};
use crate::pool::{ExecutorPool, PoolContext};
use crate::queue::{QueueStats, RecoveryReport, SubmissionQueue};
use crate::sandbox::Runner;
use crate::store::{Page, PageRequest, ResultStore};

/// 未经校验的提交请求。
#[derive(Debug, Clone, Default)]
pub struct SubmissionDraft {
    pub user_id: UserId,
    pub problem_id: Option<String>,
    pub language: Option<String>,
    pub source_code: Option<String>,
}

/// 评测系统对外的唯一入口：校验、入队、查询与生命周期管理。
pub struct JudgeService {
    context: Arc<PoolContext>,
    pool: Mutex<Option<ExecutorPool>>,
}

impl JudgeService {
    pub fn new(
        config: JudgeConfig,
        catalog: ProblemCatalog,
        store: Arc<dyn ResultStore>,
        runner: Arc<dyn Runner>,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|err| JudgeError::Config(format!("{err:#}")))?;

        info!(
            workers = config.pool.workers,
            capacity = config.queue.capacity,
            max_attempts = config.pool.max_attempts,
            problems = catalog.len(),
            runner = runner.name(),
            "initializing judge service"
        );

        let events = Arc::new(EventBroadcaster::new(config.event_buffer_size));
        let queue = Arc::new(SubmissionQueue::new(store.clone(), config.queue.capacity));

        Ok(Self {
            context: Arc::new(PoolContext {
                config: Arc::new(config),
                catalog: Arc::new(catalog),
                queue,
                store,
                runner,
                events,
            }),
            pool: Mutex::new(None),
        })
    }

    /// 恢复未完成的提交并启动工作池；重复调用不会再次启动。
    #[tracing::instrument(skip(self))]
    pub async fn start(&self) -> Result<RecoveryReport> {
        let mut pool = self.pool.lock().await;
        if pool.is_some() {
            return Ok(RecoveryReport::default());
        }
        if self.context.queue.is_closed() {
            return Err(JudgeError::Unavailable);
        }

        let report = self
            .context
            .queue
            .recover(self.context.config.pool.max_attempts)
            .await?;
        *pool = Some(ExecutorPool::spawn(
            self.context.config.pool.workers,
            self.context.clone(),
        ));
        Ok(report)
    }

    /// 校验并接纳一条提交，立即返回排队中的记录。
    #[tracing::instrument(skip(self, draft), fields(user_id = %draft.user_id))]
    pub async fn submit(&self, draft: SubmissionDraft) -> Result<Submission> {
        let submission = self.validate(draft)?;
        self.context.queue.enqueue(submission.clone()).await?;

        info!(
            submission_id = %submission.id,
            problem_id = %submission.problem_id,
            language = %submission.language,
            "submission accepted"
        );
        self.context.events.emit(JudgeEvent::SubmissionQueued {
            submission_id: submission.id,
            user_id: submission.user_id,
            problem_id: submission.problem_id.clone(),
        });
        Ok(submission)
    }

    pub fn validate(&self, draft: SubmissionDraft) -> std::result::Result<Submission, ValidationError> {
        let config = &self.context.config;

        let raw_problem = draft
            .problem_id
            .filter(|value| !value.trim().is_empty())
            .ok_or(ValidationError::MissingProblemId)?;
        let problem_id = ProblemId::new(raw_problem)
            .map_err(|err| ValidationError::InvalidProblemId(err.to_string()))?;
        if !self.context.catalog.contains(&problem_id) {
            return Err(ValidationError::UnknownProblem(problem_id));
        }

        let source_code = draft.source_code.unwrap_or_default();
        if source_code.trim().is_empty() {
            return Err(ValidationError::EmptyCode);
        }
        if source_code.len() > config.limits.max_source_bytes {
            return Err(ValidationError::CodeTooLong {
                len: source_code.len(),
                max: config.limits.max_source_bytes,
            });
        }

        let language = match draft.language.as_deref().map(str::trim) {
            None | Some("") => config.limits.default_language,
            Some(raw) => raw
                .parse::<Language>()
                .map_err(|_| ValidationError::UnsupportedLanguage(raw.to_string()))?,
        };
        if config.toolchain(language).is_none() {
            return Err(ValidationError::UnsupportedLanguage(language.to_string()));
        }

        // 不区分大小写
        let lowered = source_code.to_lowercase();
        if let Some(pattern) = config
            .limits
            .rejected_patterns
            .iter()
            .find(|pattern| lowered.contains(&pattern.to_lowercase()))
        {
            return Err(ValidationError::UnsafeCode(pattern.clone()));
        }

        Ok(Submission::new(
            draft.user_id,
            problem_id,
            language,
            source_code,
        ))
    }

    pub async fn get(&self, id: SubmissionId) -> Result<Submission> {
        Ok(self.context.store.get(id).await?)
    }

    pub async fn list_by_user(&self, user_id: UserId, page: PageRequest) -> Result<Page<Submission>> {
        Ok(self.context.store.list_by_user(user_id, page).await?)
    }

    pub fn problems(&self) -> &ProblemCatalog {
        &self.context.catalog
    }

    pub fn config(&self) -> &JudgeConfig {
        &self.context.config
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.context.queue.stats()
    }

    pub fn subscribe_events(&self) -> EventStream {
        self.context.events.subscribe()
    }

    /// 关闭队列，等待正在评测的提交写入裁决后返回。
    ///
    /// 仍在排队的提交保持 Queued 状态，下次 `start` 时恢复。
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) {
        self.context.queue.close();
        let pool = self.pool.lock().await.take();
        if let Some(pool) = pool {
            info!(workers = pool.size(), "waiting for in-flight submissions");
            pool.shutdown().await;
        }
    }
}
