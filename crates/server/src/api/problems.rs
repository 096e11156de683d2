//! 题目列表与健康检查。

use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::get};
use openjudge_api_types::{HealthCheckResponse, ProblemSummary};

use super::state::AppState;

pub fn create_public_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(health))
        .route("/api/v1/health", get(health))
        .route("/api/v1/problems", get(list_problems))
}

async fn health() -> Json<HealthCheckResponse> {
    Json(HealthCheckResponse::ok())
}

/// 题目概要，第一个测试用例作为样例公开。
async fn list_problems(State(state): State<Arc<AppState>>) -> Json<Vec<ProblemSummary>> {
    let problems = state
        .judge
        .problems()
        .iter()
        .map(|problem| {
            let sample = problem.test_cases.first();
            ProblemSummary {
                id: problem.id.to_string(),
                title: problem.title.clone(),
                description: problem.description.clone(),
                sample_input: sample.map(|case| case.input.clone()),
                sample_output: sample.map(|case| case.expected_output.clone()),
                time_limit_ms: problem.time_limit_ms,
                memory_limit_mb: problem.memory_limit_mb,
                test_case_count: problem.test_cases.len(),
            }
        })
        .collect();
    Json(problems)
}
