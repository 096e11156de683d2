use crate::entity::submission;
use anyhow::{Context, anyhow};
use async_trait::async_trait;
use judge_runtime::{Page, PageRequest, ResultStore, StoreError, StoreResult};
use openjudge_core::domain::{
    DomainError, JudgeReport, Language, ProblemId, StatusUpdate, Submission, SubmissionId,
    SubmissionStatus, UserId, Verdict,
};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, DbErr, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, SqlErr, sea_query::Expr,
};
use std::str::FromStr;

/// SeaORM 实现的结果存储。状态迁移是一条带状态与尝试次数条件的 UPDATE，
/// 受影响行数为 0 即视为并发冲突。
#[derive(Clone)]
pub struct SeaOrmSubmissionRepository {
    db: DatabaseConnection,
}

impl SeaOrmSubmissionRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    fn map_model(model: submission::Model) -> anyhow::Result<Submission> {
        let id = SubmissionId::from_str(&model.id)
            .map_err(|e| anyhow!("invalid submission.id '{}' from database: {e}", model.id))?;
        let user_id = UserId::from_str(&model.user_id).map_err(|e| {
            anyhow!(
                "invalid submission.user_id '{}' from database: {e}",
                model.user_id
            )
        })?;
        let problem_id = ProblemId::from_str(&model.problem_id).map_err(|e| {
            anyhow!(
                "invalid submission.problem_id '{}' from database: {e}",
                model.problem_id
            )
        })?;
        let attempts = u32::try_from(model.attempts).map_err(|_| {
            anyhow!(
                "invalid submission.attempts from database: {} (must be non-negative)",
                model.attempts
            )
        })?;
        let report = model
            .report
            .as_deref()
            .map(serde_json::from_str::<JudgeReport>)
            .transpose()
            .with_context(|| format!("invalid submission.report for {id} from database"))?;

        Ok(Submission {
            id,
            user_id,
            problem_id,
            language: Language::from_code(model.language)?,
            source_code: model.source_code,
            submitted_at: model.created_at.and_utc(),
            updated_at: model.updated_at.and_utc(),
            status: SubmissionStatus::from_code(model.status)?,
            verdict: model.verdict.map(Verdict::from_code).transpose()?,
            attempts,
            report,
        })
    }

    fn encode_report(report: Option<&JudgeReport>) -> StoreResult<Option<String>> {
        report
            .map(serde_json::to_string)
            .transpose()
            .map_err(|err| StoreError::Backend(anyhow!("failed to encode judge report: {err}")))
    }

    fn encode_attempts(attempts: u32) -> StoreResult<i32> {
        i32::try_from(attempts)
            .map_err(|_| StoreError::Backend(anyhow!("attempt count out of range: {attempts}")))
    }

    async fn find(&self, id: SubmissionId) -> StoreResult<Submission> {
        let model = submission::Entity::find_by_id(id.to_string())
            .one(&self.db)
            .await
            .map_err(backend)?
            .ok_or(StoreError::NotFound(id))?;
        Ok(Self::map_model(model)?)
    }
}

fn backend(err: DbErr) -> StoreError {
    StoreError::Backend(err.into())
}

#[async_trait]
impl ResultStore for SeaOrmSubmissionRepository {
    async fn save(&self, record: &Submission) -> StoreResult<()> {
        let active_model = submission::ActiveModel {
            id: Set(record.id.to_string()),
            user_id: Set(record.user_id.to_string()),
            problem_id: Set(record.problem_id.to_string()),
            language: Set(record.language.code()),
            status: Set(record.status.code()),
            verdict: Set(record.verdict.map(Verdict::code)),
            attempts: Set(Self::encode_attempts(record.attempts)?),
            source_code: Set(record.source_code.clone()),
            report: Set(Self::encode_report(record.report.as_ref())?),
            created_at: Set(record.submitted_at.naive_utc()),
            updated_at: Set(record.updated_at.naive_utc()),
        };

        active_model.insert(&self.db).await.map_err(|err| {
            if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
                StoreError::Duplicate(record.id)
            } else {
                backend(err)
            }
        })?;
        Ok(())
    }

    async fn get(&self, id: SubmissionId) -> StoreResult<Submission> {
        self.find(id).await
    }

    async fn list_by_user(
        &self,
        user_id: UserId,
        page: PageRequest,
    ) -> StoreResult<Page<Submission>> {
        let query = submission::Entity::find()
            .filter(submission::Column::UserId.eq(user_id.to_string()))
            .order_by_desc(submission::Column::CreatedAt)
            .order_by_desc(submission::Column::Id);

        let total = query.clone().count(&self.db).await.map_err(backend)?;
        let models = query
            .offset(page.offset())
            .limit(page.per_page())
            .all(&self.db)
            .await
            .map_err(backend)?;

        let items = models
            .into_iter()
            .map(Self::map_model)
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Page {
            items,
            total,
            page: page.page(),
            per_page: page.per_page(),
        })
    }

    async fn transition(&self, id: SubmissionId, update: StatusUpdate) -> StoreResult<Submission> {
        let current = self.find(id).await?;
        let next = current.apply(&update)?;

        let result = submission::Entity::update_many()
            .col_expr(submission::Column::Status, Expr::value(next.status.code()))
            .col_expr(
                submission::Column::Verdict,
                Expr::value(next.verdict.map(Verdict::code)),
            )
            .col_expr(
                submission::Column::Attempts,
                Expr::value(Self::encode_attempts(next.attempts)?),
            )
            .col_expr(
                submission::Column::Report,
                Expr::value(Self::encode_report(next.report.as_ref())?),
            )
            .col_expr(
                submission::Column::UpdatedAt,
                Expr::value(next.updated_at.naive_utc()),
            )
            .filter(submission::Column::Id.eq(id.to_string()))
            .filter(submission::Column::Status.eq(update.expected.code()))
            .filter(submission::Column::Attempts.eq(Self::encode_attempts(current.attempts)?))
            .exec(&self.db)
            .await
            .map_err(backend)?;

        if result.rows_affected == 0 {
            let actual = self.find(id).await?.status;
            return Err(StoreError::Transition(DomainError::StatusConflict {
                id,
                expected: update.expected,
                actual,
            }));
        }

        Ok(next)
    }

    async fn list_unfinished(&self) -> StoreResult<Vec<Submission>> {
        let models = submission::Entity::find()
            .filter(submission::Column::Status.is_in([
                SubmissionStatus::Queued.code(),
                SubmissionStatus::Running.code(),
            ]))
            .order_by_asc(submission::Column::CreatedAt)
            .order_by_asc(submission::Column::Id)
            .all(&self.db)
            .await
            .map_err(backend)?;

        Ok(models
            .into_iter()
            .map(Self::map_model)
            .collect::<anyhow::Result<Vec<_>>>()?)
    }
}
