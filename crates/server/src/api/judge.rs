//! 提交与查询接口。所有路由都要求登录。

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use judge_runtime::{PageRequest, SubmissionDraft};
use openjudge_api_types::{
    CaseView, ProblemRef, ReportView, SubmissionDetail, SubmissionListResponse, SubmissionSummary,
    SubmitRequest, SubmitResponse,
};
use openjudge_core::domain::{JudgeReport, Submission, SubmissionId};
use serde::Deserialize;

use super::error::ApiError;
use super::extract::CurrentUser;
use super::state::AppState;
use super::timestamp;

pub fn create_judge_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/v1/judge", get(get_submission).post(submit))
        .route("/api/v1/judge/list", get(list_submissions))
}

/// 提交代码，立即返回排队中的记录。
async fn submit(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    payload: Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = payload?;

    let submission = state
        .judge
        .submit(SubmissionDraft {
            user_id: user.id,
            problem_id: request.problem_id.map(ProblemRef::into_string),
            language: request.language,
            source_code: request.code,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(SubmitResponse {
            submission_id: submission.id.to_string(),
            user_id: submission.user_id.to_string(),
            problem_id: submission.problem_id.to_string(),
            language: submission.language.to_string(),
            status: submission.status.to_string(),
            created_at: timestamp(submission.submitted_at),
        }),
    ))
}

#[derive(Debug, Deserialize)]
struct DetailQuery {
    submission_id: Option<String>,
}

/// 查看自己的一条提交，包含代码与评测报告。
async fn get_submission(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    query: Result<Query<DetailQuery>, QueryRejection>,
) -> Result<Json<SubmissionDetail>, ApiError> {
    let Query(query) = query?;
    let id = query
        .submission_id
        .as_deref()
        .map(str::trim)
        .filter(|raw| !raw.is_empty())
        .ok_or_else(|| ApiError::bad_request("invalid_submission_id", "submission_id is required"))?
        .parse::<SubmissionId>()
        .map_err(|_| ApiError::bad_request("invalid_submission_id", "submission_id is not a valid id"))?;

    let submission = state.judge.get(id).await?;
    if submission.user_id != user.id {
        return Err(ApiError::forbidden("submission belongs to another user"));
    }

    Ok(Json(detail(submission)))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    page: Option<u64>,
    per_page: Option<u64>,
}

/// 按提交时间倒序分页列出自己的提交。
async fn list_submissions(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<SubmissionListResponse>, ApiError> {
    let Query(query) = query?;
    let request = PageRequest::new(
        query.page.unwrap_or(1),
        query.per_page.unwrap_or(PageRequest::DEFAULT_PER_PAGE),
    );

    let page = state.judge.list_by_user(user.id, request).await?;
    let pages = page.pages();
    let page = page.map(|submission| summary(&submission));

    Ok(Json(SubmissionListResponse {
        submissions: page.items,
        total: page.total,
        page: page.page,
        per_page: page.per_page,
        pages,
    }))
}

fn summary(submission: &Submission) -> SubmissionSummary {
    SubmissionSummary {
        submission_id: submission.id.to_string(),
        user_id: submission.user_id.to_string(),
        problem_id: submission.problem_id.to_string(),
        language: submission.language.to_string(),
        status: submission.status.to_string(),
        verdict: submission.verdict.map(|verdict| verdict.to_string()),
        attempts: submission.attempts,
        created_at: timestamp(submission.submitted_at),
        updated_at: timestamp(submission.updated_at),
    }
}

fn detail(submission: Submission) -> SubmissionDetail {
    SubmissionDetail {
        summary: summary(&submission),
        report: submission.report.map(report_view),
        code: submission.source_code,
    }
}

fn report_view(report: JudgeReport) -> ReportView {
    ReportView {
        verdict: report.verdict.to_string(),
        passed_cases: report.passed_cases,
        total_cases: report.total_cases,
        cases: report
            .cases
            .into_iter()
            .map(|case| CaseView {
                index: case.index,
                verdict: case.verdict.to_string(),
                wall_time_ms: case.wall_time_ms,
                memory_kb: case.memory_kb,
                exit_code: case.exit_code,
                stdout: case.stdout,
                stderr: case.stderr,
            })
            .collect(),
        compiler_output: report.compiler_output,
        message: report.message,
    }
}
