//! End-to-end evaluation through the real process runner. Needs `python3`;
//! runs jailed when unprivileged user namespaces are available.

mod common;

use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;

use common::wait_for_terminal;
use judge_runtime::{
    JudgeConfig, JudgeService, MemoryResultStore, ProblemCatalog, ProcessRunner, SandboxConfig,
    SubmissionDraft, namespaces_available,
};
use openjudge_core::domain::{Submission, SubmissionStatus, UserId, Verdict};

const CATALOG: &str = r#"
[[problems]]
id = "1"
title = "Odd or Even"
time_limit_ms = 1000
memory_limit_mb = 64

[[problems.test_cases]]
input = "3"
expected_output = "odd"

[[problems.test_cases]]
input = "8"
expected_output = "even"

[[problems.test_cases]]
input = "0"
expected_output = "even"
"#;

const EVEN_ODD: &str = "n = int(input())\nprint('even' if n % 2 == 0 else 'odd')\n";

fn python_available() -> bool {
    Command::new("python3")
        .arg("--version")
        .output()
        .is_ok_and(|output| output.status.success())
}

/// Installation prefix of the host's python3, so the jail can see it.
fn python_prefix() -> Option<PathBuf> {
    let output = Command::new("python3")
        .args(["-c", "import sys; print(sys.base_prefix)"])
        .output()
        .ok()?;
    let prefix = String::from_utf8(output.stdout).ok()?;
    Some(PathBuf::from(prefix.trim()))
}

/// Jailed when the host allows it, bare process groups otherwise.
fn sandbox_config() -> SandboxConfig {
    let mut sandbox = SandboxConfig::default();
    if let Ok(path) = std::env::var("PATH") {
        sandbox.path = path;
    }
    if namespaces_available() {
        if let Some(prefix) = python_prefix() {
            let covered = sandbox.readonly_paths.iter().any(|path| prefix.starts_with(path));
            if !covered && prefix.parent().is_some() {
                sandbox.readonly_paths.push(prefix);
            }
        }
    } else {
        eprintln!("unprivileged user namespaces unavailable, running without isolation");
        sandbox.deny_network = false;
        sandbox.isolate_filesystem = false;
    }
    sandbox
}

async fn judge(code: &str) -> Option<Submission> {
    judge_with(code, sandbox_config()).await
}

async fn judge_with(code: &str, sandbox: SandboxConfig) -> Option<Submission> {
    if !python_available() {
        eprintln!("python3 not found, skipping");
        return None;
    }

    let mut config = JudgeConfig::default();
    config.pool.workers = 2;
    config.sandbox = sandbox;
    let scratch = tempfile::tempdir().expect("scratch root");
    config.sandbox.scratch_root = Some(scratch.path().to_path_buf());

    let service = JudgeService::new(
        config.clone(),
        ProblemCatalog::from_str(CATALOG).expect("catalog"),
        Arc::new(MemoryResultStore::new()),
        Arc::new(ProcessRunner::new(config.sandbox.clone())),
    )
    .expect("service should initialize");
    service.start().await.expect("service should start");

    let submission = service
        .submit(SubmissionDraft {
            user_id: UserId::new(),
            problem_id: Some("1".to_string()),
            language: Some("python".to_string()),
            source_code: Some(code.to_string()),
        })
        .await
        .expect("submission accepted");
    let done = wait_for_terminal(&service, submission.id).await;
    service.shutdown().await;

    let leftovers = std::fs::read_dir(scratch.path())
        .expect("scratch root readable")
        .count();
    assert_eq!(leftovers, 0, "workspaces are removed after evaluation");
    Some(done)
}

#[tokio::test]
async fn test_even_odd_solution_is_accepted() {
    let Some(done) = judge(EVEN_ODD).await else {
        return;
    };
    assert_eq!(done.status, SubmissionStatus::Graded);
    assert_eq!(done.verdict, Some(Verdict::Accepted));
    let report = done.report.expect("report");
    assert_eq!(report.passed_cases, 3);
}

#[tokio::test]
async fn test_unmatched_parenthesis_is_a_compile_error() {
    let Some(done) = judge("n = int(input()\nprint('odd')\n").await else {
        return;
    };
    assert_eq!(done.verdict, Some(Verdict::CompileError));
    let report = done.report.expect("report");
    assert!(report.cases.is_empty(), "no test case may run");
    assert!(report.compiler_output.is_some_and(|output| !output.is_empty()));
}

#[tokio::test]
async fn test_wrong_output_is_a_wrong_answer() {
    let Some(done) = judge("input()\nprint('odd')\n").await else {
        return;
    };
    assert_eq!(done.verdict, Some(Verdict::WrongAnswer));
    let report = done.report.expect("report");
    assert_eq!(report.passed_cases, 1);
    assert_eq!(report.message.as_deref(), Some("test case 2 failed"));
}

#[tokio::test]
async fn test_infinite_loop_is_time_limit_exceeded() {
    let Some(done) = judge("while True:\n    pass\n").await else {
        return;
    };
    assert_eq!(done.verdict, Some(Verdict::TimeLimitExceeded));
    assert_eq!(done.report.expect("report").cases.len(), 1);
}

#[tokio::test]
async fn test_non_zero_exit_is_a_runtime_error() {
    let Some(done) = judge("import sys\nsys.exit(1)\n").await else {
        return;
    };
    assert_eq!(done.verdict, Some(Verdict::RuntimeError));
    assert_eq!(done.report.expect("report").cases[0].exit_code, Some(1));
}

#[tokio::test]
async fn test_uncaught_exception_is_a_runtime_error() {
    let Some(done) = judge("raise ValueError('boom')\n").await else {
        return;
    };
    assert_eq!(done.verdict, Some(Verdict::RuntimeError));
}

#[tokio::test]
async fn test_runtime_error_report_keeps_the_traceback() {
    let Some(done) = judge("n = int(input())\nprint('partial')\nprint(n / 0)\n").await else {
        return;
    };
    assert_eq!(done.verdict, Some(Verdict::RuntimeError));
    let report = done.report.expect("report");
    let case = &report.cases[0];
    assert_eq!(case.stdout, "partial\n");
    assert!(case.stderr.contains("Traceback"), "stderr: {}", case.stderr);
    assert!(
        case.stderr.contains("ZeroDivisionError: division by zero"),
        "stderr: {}",
        case.stderr
    );
}

#[tokio::test]
async fn test_host_files_are_outside_the_jail() {
    if !namespaces_available() {
        eprintln!("unprivileged user namespaces unavailable, skipping");
        return;
    }
    let code = "import pathlib\ninput()\nprint(pathlib.Path('/etc/passwd').read_text())\n";
    let Some(done) = judge(code).await else {
        return;
    };
    assert_eq!(done.verdict, Some(Verdict::RuntimeError));
    let report = done.report.expect("report");
    assert!(report.cases[0].stderr.contains("FileNotFoundError"), "stderr: {}", report.cases[0].stderr);
    assert!(!report.cases[0].stdout.contains("root:"));
}

#[tokio::test]
async fn test_network_is_unreachable() {
    if !namespaces_available() {
        eprintln!("unprivileged user namespaces unavailable, skipping");
        return;
    }
    let code = "import socket\ninput()\nsocket.create_connection(('1.1.1.1', 53), timeout=1)\nprint('odd')\n";
    let Some(done) = judge(code).await else {
        return;
    };
    assert_eq!(done.verdict, Some(Verdict::RuntimeError));
    let report = done.report.expect("report");
    assert!(report.cases[0].stderr.contains("Error"), "stderr: {}", report.cases[0].stderr);
}

#[tokio::test]
async fn test_daemonized_child_cannot_stall_the_verdict() {
    // A new session leaves the process group but keeps stdout open.
    let code = "import os, time\nif os.fork() == 0:\n    os.setsid()\n    time.sleep(30)\nelse:\n    time.sleep(30)\n";
    let started = std::time::Instant::now();
    let Some(done) = judge(code).await else {
        return;
    };
    assert_eq!(done.verdict, Some(Verdict::TimeLimitExceeded));
    assert!(
        started.elapsed() < std::time::Duration::from_secs(10),
        "verdict took {:?}",
        started.elapsed()
    );
}

#[tokio::test]
async fn test_memory_hog_is_memory_limit_exceeded() {
    let Some(done) = judge("data = b'x' * (256 * 1024 * 1024)\nprint(len(data))\n").await else {
        return;
    };
    assert_eq!(done.verdict, Some(Verdict::MemoryLimitExceeded));
}
