#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{HeaderMap, Method, Request, StatusCode, header},
};
use judge_runtime::{
    CompileOutcome, ExecutorError, JudgeConfig, JudgeService, ProblemCatalog, RunLimits, Runner,
    Toolchain, Workspace,
};
use openjudge_core::domain::{ExecutionResult, Submission};
use openjudge_server::{
    api::{AppState, create_router},
    auth::{PasswordHasher, TokenService},
    db::init_pool_and_migrate,
    repository::{SeaOrmSubmissionRepository, SeaOrmUserRepository},
};
use sea_orm::DatabaseConnection;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

pub const CATALOG: &str = r#"
[[problems]]
id = "1"
title = "Echo"
description = "Print the input back."

[[problems.test_cases]]
input = "hello"
expected_output = "hello"

[[problems.test_cases]]
input = "world"
expected_output = "world"
"#;

pub const DIVISION_TRACEBACK: &str = "Traceback (most recent call last):\n  File \"main.py\", line 1, in <module>\nZeroDivisionError: division by zero\n";

/// Prints every test case's input back, which is also its expected output.
/// Sources dividing by zero crash with a Python traceback instead.
pub struct EchoRunner;

#[async_trait]
impl Runner for EchoRunner {
    fn name(&self) -> &str {
        "echo"
    }

    async fn prepare(
        &self,
        submission: &Submission,
        toolchain: &Toolchain,
    ) -> Result<Workspace, ExecutorError> {
        Workspace::create(None, submission, toolchain).map_err(ExecutorError::Workspace)
    }

    async fn compile(
        &self,
        _workspace: &Workspace,
        _toolchain: &Toolchain,
    ) -> Result<CompileOutcome, ExecutorError> {
        Ok(CompileOutcome::Ready {
            diagnostics: String::new(),
        })
    }

    async fn run(
        &self,
        workspace: &Workspace,
        _toolchain: &Toolchain,
        input: &str,
        _limits: RunLimits,
    ) -> Result<ExecutionResult, ExecutorError> {
        let source =
            std::fs::read_to_string(workspace.source_path()).map_err(ExecutorError::Workspace)?;
        if source.contains("1 / 0") {
            return Ok(ExecutionResult::exited(workspace.submission_id(), 1, "")
                .with_stderr(DIVISION_TRACEBACK));
        }
        Ok(ExecutionResult::exited(workspace.submission_id(), 0, input))
    }
}

pub struct TestApp {
    pub app: Router,
    pub judge: Arc<JudgeService>,
    pub db: DatabaseConnection,
    _dir: TempDir,
}

pub async fn database() -> (DatabaseConnection, TempDir) {
    let dir = tempfile::tempdir().expect("temp dir");
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("openjudge.db").display());
    let db = init_pool_and_migrate(&url)
        .await
        .expect("database should migrate");
    (db, dir)
}

/// Builds the full router over a fresh SQLite file. Workers are only spawned when `start` is set.
pub async fn spawn_app(capacity: usize, start: bool) -> TestApp {
    let (db, dir) = database().await;

    let mut config = JudgeConfig::default();
    config.pool.workers = 2;
    config.queue.capacity = capacity;

    let judge = Arc::new(
        JudgeService::new(
            config,
            ProblemCatalog::from_str(CATALOG).expect("catalog"),
            Arc::new(SeaOrmSubmissionRepository::new(db.clone())),
            Arc::new(EchoRunner),
        )
        .expect("judge service"),
    );
    if start {
        judge.start().await.expect("judge should start");
    }

    let state = Arc::new(AppState::new(
        judge.clone(),
        Arc::new(SeaOrmUserRepository::new(db.clone())),
        TokenService::new("test-secret"),
        // Lowest cost bcrypt allows, tests register many users.
        PasswordHasher::new(4),
    ));

    TestApp {
        app: create_router(state, &[]),
        judge,
        db,
        _dir: dir,
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestResponse {
    /// `name=value` part of the session cookie.
    pub fn cookie(&self) -> String {
        let raw = self
            .headers
            .get(header::SET_COOKIE)
            .expect("response should set a cookie")
            .to_str()
            .expect("cookie should be ascii");
        raw.split(';').next().unwrap_or_default().to_string()
    }
}

impl TestApp {
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        cookie: Option<&str>,
        body: Option<Body>,
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(body),
            None => builder.body(Body::empty()),
        }
        .expect("request should build");

        let response = self
            .app
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body should be readable");
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("body should be json")
        };

        TestResponse {
            status,
            headers,
            body,
        }
    }

    pub async fn get(&self, uri: &str, cookie: Option<&str>) -> TestResponse {
        self.request(Method::GET, uri, cookie, None).await
    }

    pub async fn post(&self, uri: &str, cookie: Option<&str>, body: Value) -> TestResponse {
        self.request(Method::POST, uri, cookie, Some(Body::from(body.to_string())))
            .await
    }

    /// Registers and logs in, returning the session cookie.
    pub async fn login_as(&self, username: &str) -> String {
        let credentials = serde_json::json!({"username": username, "password": "secret123"});
        let registered = self.post("/api/v1/register", None, credentials.clone()).await;
        assert_eq!(registered.status, StatusCode::CREATED, "{:?}", registered.body);

        let login = self.post("/api/v1/login", None, credentials).await;
        assert_eq!(login.status, StatusCode::OK, "{:?}", login.body);
        login.cookie()
    }

    /// Polls the detail endpoint until the submission has a terminal status.
    pub async fn wait_for_terminal(&self, cookie: &str, submission_id: &str) -> Value {
        let uri = format!("/api/v1/judge?submission_id={submission_id}");
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let response = self.get(&uri, Some(cookie)).await;
                assert_eq!(response.status, StatusCode::OK, "{:?}", response.body);
                let status = response.body["status"].as_str().unwrap_or_default();
                if status == "graded" || status == "failed" {
                    return response.body;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("submission should finish")
    }
}
