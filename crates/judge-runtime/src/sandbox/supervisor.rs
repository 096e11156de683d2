use std::io::{self, Read, Write};
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use openjudge_core::domain::{ExecutionResult, ExitStatus, SubmissionId, Termination};
use tempfile::TempDir;
use tracing::{debug, warn};

use super::isolation::{Isolation, JAIL_WORKDIR};
use super::limits::{self, ProcessLimits};
use crate::config::SandboxConfig;
use crate::error::ExecutorError;

/// How long the output readers may lag behind the reaped process. A reader
/// still blocked after that means something outside our control holds the pipe.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Upper bound on processes visited when summing a tree's memory.
const MAX_TRACKED_PROCESSES: usize = 256;

/// One sandboxed process invocation.
#[derive(Debug, Clone)]
pub(crate) struct ProcessSpec {
    pub submission_id: SubmissionId,
    pub command: Vec<String>,
    pub cwd: PathBuf,
    pub stdin: String,
    pub time_limit: Duration,
    pub memory_limit_kb: u64,
}

#[derive(Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: bool,
}

/// A pipe drained on its own thread into a shared buffer.
struct Capture {
    buffer: Arc<Mutex<Captured>>,
    finished: mpsc::Receiver<io::Result<()>>,
}

struct Output {
    text: String,
    truncated: bool,
}

struct Reaped {
    status: ExitStatus,
    termination: Termination,
    wall_time: Duration,
    cpu_time: Duration,
    peak_kb: u64,
}

/// Runs `spec` to completion. Blocks the calling thread.
pub(crate) fn run(spec: &ProcessSpec, config: &SandboxConfig) -> Result<ExecutionResult, ExecutorError> {
    let (program, args) = spec
        .command
        .split_first()
        .ok_or_else(|| ExecutorError::Supervise("empty command".to_string()))?;

    let process_limits = ProcessLimits::new(spec.time_limit, config.file_size_limit_mb)
        .with_address_space_mb(config.address_space_limit_mb);

    // Mount point for the jail's tmpfs; the host only ever sees an empty directory.
    let jail_root = if config.isolate_filesystem {
        let dir = tempfile::Builder::new()
            .prefix("openjudge-root-")
            .tempdir()
            .map_err(ExecutorError::Workspace)?;
        Some(dir)
    } else {
        None
    };
    let isolation = Isolation::plan(config, &spec.cwd, jail_root.as_ref().map(TempDir::path))
        .map_err(ExecutorError::Workspace)?;
    let (home, tmp) = match &jail_root {
        Some(_) => (PathBuf::from(JAIL_WORKDIR), PathBuf::from("/tmp")),
        None => (spec.cwd.clone(), spec.cwd.clone()),
    };

    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(&spec.cwd)
        .env_clear()
        .env("PATH", &config.path)
        .env("HOME", &home)
        .env("TMPDIR", &tmp)
        .env("LANG", "C.UTF-8")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0);
    limits::install(&mut command, process_limits, isolation);

    let started = Instant::now();
    let mut child = command.spawn().map_err(ExecutorError::Spawn)?;
    let pid = child.id() as libc::pid_t;

    // Detached: a writer stuck on a full pipe must not hold up the verdict.
    if let Some(mut stdin) = child.stdin.take() {
        let input = spec.stdin.clone();
        let submission_id = spec.submission_id;
        thread::spawn(move || match stdin.write_all(input.as_bytes()) {
            Ok(()) => {}
            // The program may exit without reading its input.
            Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {}
            Err(err) => warn!(%submission_id, error = %err, "failed to write program input"),
        });
    }
    let stdout_capture = child
        .stdout
        .take()
        .map(|stdout| Capture::spawn(stdout, config.max_output_bytes));
    let stderr_capture = child
        .stderr
        .take()
        .map(|stderr| Capture::spawn(stderr, config.max_output_bytes));

    let reaped = watch(pid, started, spec, process_limits.cpu_limit(), config.poll_interval());
    // Sweeps the rest of the group. Inside a PID namespace everything else
    // already died with its init.
    kill_group(pid);

    let drain_deadline = Instant::now() + OUTPUT_DRAIN_GRACE;
    let stdout = Capture::collect(stdout_capture, drain_deadline, spec.submission_id)?;
    let stderr = Capture::collect(stderr_capture, drain_deadline, spec.submission_id)?;
    let reaped = reaped?;
    drop(jail_root);

    debug!(
        submission_id = %spec.submission_id,
        program = %program,
        status = ?reaped.status,
        termination = ?reaped.termination,
        wall_ms = reaped.wall_time.as_millis() as u64,
        peak_kb = reaped.peak_kb,
        "sandboxed process finished"
    );

    Ok(ExecutionResult {
        submission_id: spec.submission_id,
        stdout: stdout.text,
        stderr: stderr.text,
        exit_status: reaped.status,
        wall_time: reaped.wall_time,
        cpu_time: reaped.cpu_time,
        memory_used_kb: reaped.peak_kb,
        termination: reaped.termination,
        output_truncated: stdout.truncated || stderr.truncated,
    })
}

fn watch(
    pid: libc::pid_t,
    started: Instant,
    spec: &ProcessSpec,
    cpu_limit: Duration,
    poll_interval: Duration,
) -> Result<Reaped, ExecutorError> {
    let mut termination = Termination::Normal;
    let mut peak_kb = 0u64;

    loop {
        let mut raw_status: libc::c_int = 0;
        // SAFETY: zeroed rusage is a valid value for an out-parameter.
        let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::wait4(pid, &mut raw_status, libc::WNOHANG, &mut usage) };

        if rc == pid {
            let wall_time = started.elapsed();
            let cpu_time = timeval(usage.ru_utime) + timeval(usage.ru_stime);
            let status = decode_status(raw_status);
            peak_kb = peak_kb.max(u64::try_from(usage.ru_maxrss).unwrap_or(0));

            if termination == Termination::Normal {
                termination = match status {
                    ExitStatus::Signaled(libc::SIGXCPU) => Termination::CpuTimeLimit,
                    ExitStatus::Signaled(libc::SIGKILL) if cpu_time >= cpu_limit => {
                        Termination::CpuTimeLimit
                    }
                    _ => Termination::Normal,
                };
            }

            return Ok(Reaped {
                status,
                termination,
                wall_time,
                cpu_time,
                peak_kb,
            });
        }

        if rc == -1 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            kill_group(pid);
            return Err(ExecutorError::Supervise(format!("wait4({pid}) failed: {err}")));
        }

        if termination == Termination::Normal {
            if started.elapsed() >= spec.time_limit {
                termination = Termination::WallTimeLimit;
                kill_group(pid);
            } else if let Some(resident) = tree_resident_kb(pid) {
                peak_kb = peak_kb.max(resident);
                if resident > spec.memory_limit_kb {
                    termination = Termination::MemoryLimit;
                    kill_group(pid);
                }
            }
        }

        thread::sleep(poll_interval);
    }
}

impl Capture {
    fn spawn<R: Read + Send + 'static>(mut reader: R, limit: usize) -> Self {
        let buffer = Arc::new(Mutex::new(Captured::default()));
        let (done, finished) = mpsc::sync_channel(1);
        let shared = Arc::clone(&buffer);
        thread::spawn(move || {
            let mut chunk = [0u8; 8192];
            let result = loop {
                let read = match reader.read(&mut chunk) {
                    Ok(0) => break Ok(()),
                    Ok(read) => read,
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                    Err(err) => break Err(err),
                };
                // Keep draining past the cap so the child never blocks on a full pipe.
                let mut captured = shared.lock().unwrap_or_else(PoisonError::into_inner);
                let room = limit.saturating_sub(captured.bytes.len());
                if read > room {
                    captured.truncated = true;
                }
                captured.bytes.extend_from_slice(&chunk[..read.min(room)]);
            };
            let _ = done.send(result);
        });
        Self { buffer, finished }
    }

    /// Waits for the reader until `deadline`, then settles for what it has.
    fn collect(
        capture: Option<Self>,
        deadline: Instant,
        submission_id: SubmissionId,
    ) -> Result<Output, ExecutorError> {
        let Some(capture) = capture else {
            return Ok(Output {
                text: String::new(),
                truncated: false,
            });
        };

        let timeout = deadline.saturating_duration_since(Instant::now());
        match capture.finished.recv_timeout(timeout) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                return Err(ExecutorError::Supervise(format!(
                    "failed to read process output: {err}"
                )));
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(%submission_id, "output pipe still open after the process exited, abandoning reader");
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(ExecutorError::Supervise("output reader panicked".to_string()));
            }
        }

        let mut captured = capture.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(Output {
            text: String::from_utf8_lossy(&captured.bytes).into_owned(),
            truncated: std::mem::take(&mut captured.truncated),
        })
    }
}

fn kill_group(pid: libc::pid_t) {
    let rc = unsafe { libc::kill(-pid, libc::SIGKILL) };
    if rc != 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            warn!(pid, error = %err, "failed to kill process group");
        }
    }
}

fn decode_status(raw: libc::c_int) -> ExitStatus {
    if libc::WIFSIGNALED(raw) {
        ExitStatus::Signaled(libc::WTERMSIG(raw))
    } else {
        ExitStatus::Exited(libc::WEXITSTATUS(raw))
    }
}

fn timeval(value: libc::timeval) -> Duration {
    let secs = u64::try_from(value.tv_sec).unwrap_or(0);
    let micros = u64::try_from(value.tv_usec).unwrap_or(0);
    Duration::from_secs(secs) + Duration::from_micros(micros)
}

/// Resident set size of `pid` and its descendants in KiB.
///
/// Descendants are found through `/proc/<pid>/task/<pid>/children`, which also
/// reaches the init of a PID namespace forked by the jail.
fn tree_resident_kb(pid: libc::pid_t) -> Option<u64> {
    let mut pending = vec![pid];
    let mut visited = 0;
    let mut total = None;
    while let Some(current) = pending.pop() {
        if let Some(kb) = resident_kb(current) {
            total = Some(total.unwrap_or(0) + kb);
        }
        if let Ok(children) = std::fs::read_to_string(format!("/proc/{current}/task/{current}/children")) {
            pending.extend(children.split_whitespace().filter_map(|child| child.parse::<libc::pid_t>().ok()));
        }
        visited += 1;
        if visited >= MAX_TRACKED_PROCESSES {
            break;
        }
    }
    total
}

/// Current resident set size of `pid` in KiB, from `/proc/<pid>/statm`.
fn resident_kb(pid: libc::pid_t) -> Option<u64> {
    let statm = std::fs::read_to_string(format!("/proc/{pid}/statm")).ok()?;
    let pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    let page_size = u64::try_from(page_size).ok().filter(|size| *size > 0)?;
    Some(pages * page_size / 1024)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::sandbox::namespaces_available;

    fn spec(command: &[&str], cwd: PathBuf) -> ProcessSpec {
        ProcessSpec {
            submission_id: SubmissionId::new(),
            command: command.iter().map(|part| part.to_string()).collect(),
            cwd,
            stdin: String::new(),
            time_limit: Duration::from_secs(2),
            memory_limit_kb: 256 * 1024,
        }
    }

    /// Bare process group and rlimits, runs anywhere.
    fn plain() -> SandboxConfig {
        SandboxConfig {
            deny_network: false,
            isolate_filesystem: false,
            ..SandboxConfig::default()
        }
    }

    fn isolated() -> Option<SandboxConfig> {
        if namespaces_available() {
            Some(SandboxConfig::default())
        } else {
            eprintln!("unprivileged user namespaces unavailable, skipping");
            None
        }
    }

    fn python_available() -> bool {
        Command::new("python3")
            .arg("--version")
            .output()
            .is_ok_and(|output| output.status.success())
    }

    #[test]
    fn captures_stdout_and_exit_code() {
        let dir = tempfile::tempdir().expect("scratch dir");
        let mut spec = spec(&["sh", "-c", "read line; echo \"got $line\"; exit 3"], dir.path().to_path_buf());
        spec.stdin = "hello\n".to_string();

        let result = run(&spec, &plain()).expect("process runs");
        assert_eq!(result.stdout, "got hello\n");
        assert_eq!(result.exit_status, ExitStatus::Exited(3));
        assert_eq!(result.termination, Termination::Normal);
        assert!(!result.output_truncated);
    }

    #[test]
    fn environment_is_cleared() {
        let dir = tempfile::tempdir().expect("scratch dir");
        let spec = spec(&["sh", "-c", "echo \"[$CARGO]\""], dir.path().to_path_buf());

        let result = run(&spec, &plain()).expect("process runs");
        assert_eq!(result.stdout.trim(), "[]");
    }

    #[test]
    fn unread_input_is_not_an_error() {
        let dir = tempfile::tempdir().expect("scratch dir");
        let mut spec = spec(&["true"], dir.path().to_path_buf());
        spec.stdin = "x".repeat(1 << 20);

        let result = run(&spec, &plain()).expect("process runs");
        assert_eq!(result.exit_status, ExitStatus::Exited(0));
    }

    #[test]
    fn wall_clock_deadline_kills_the_process_group() {
        let dir = tempfile::tempdir().expect("scratch dir");
        let mut spec = spec(&["sh", "-c", "sleep 30 & sleep 30"], dir.path().to_path_buf());
        spec.time_limit = Duration::from_millis(200);

        let started = Instant::now();
        let result = run(&spec, &plain()).expect("process runs");
        assert_eq!(result.termination, Termination::WallTimeLimit);
        assert_eq!(result.exit_status, ExitStatus::Signaled(libc::SIGKILL));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn deadline_holds_when_a_descendant_leaves_the_process_group() {
        let dir = tempfile::tempdir().expect("scratch dir");
        // The new session keeps stdout open after the group is killed.
        let mut spec = spec(&["sh", "-c", "setsid sleep 6 & echo hi; sleep 30"], dir.path().to_path_buf());
        spec.time_limit = Duration::from_millis(200);

        let started = Instant::now();
        let result = run(&spec, &plain()).expect("process runs");
        let elapsed = started.elapsed();
        assert_eq!(result.termination, Termination::WallTimeLimit);
        assert!(elapsed < Duration::from_secs(2), "run blocked for {elapsed:?}");
    }

    #[test]
    fn escaped_descendants_die_with_the_pid_namespace() {
        let Some(config) = isolated() else {
            return;
        };
        let dir = tempfile::tempdir().expect("scratch dir");
        let mut spec = spec(
            &["sh", "-c", "setsid sh -c 'sleep 1; echo escaped > marker' & echo hi; sleep 30"],
            dir.path().to_path_buf(),
        );
        spec.time_limit = Duration::from_millis(200);

        let started = Instant::now();
        let result = run(&spec, &config).expect("process runs");
        assert_eq!(result.termination, Termination::WallTimeLimit);
        assert_eq!(result.stdout, "hi\n");
        assert!(started.elapsed() < Duration::from_secs(2));

        thread::sleep(Duration::from_millis(1500));
        assert!(!dir.path().join("marker").exists(), "daemon outlived the run");
    }

    #[test]
    fn jail_exposes_only_the_workspace_and_tool_paths() {
        let Some(config) = isolated() else {
            return;
        };
        let dir = tempfile::tempdir().expect("scratch dir");
        std::fs::write(dir.path().join("input.txt"), "from host\n").expect("seed file");
        let spec = spec(
            &["sh", "-c", "pwd; cat input.txt; echo out > output.txt; cat /etc/passwd"],
            dir.path().to_path_buf(),
        );

        let result = run(&spec, &config).expect("process runs");
        assert_eq!(result.stdout, "/box\nfrom host\n");
        assert_ne!(result.exit_status, ExitStatus::Exited(0), "host /etc/passwd was readable");
        assert_eq!(
            std::fs::read_to_string(dir.path().join("output.txt")).expect("written through the bind"),
            "out\n"
        );
    }

    #[test]
    fn tool_paths_are_read_only_inside_the_jail() {
        let Some(config) = isolated() else {
            return;
        };
        let dir = tempfile::tempdir().expect("scratch dir");
        let spec = spec(&["sh", "-c", "touch /usr/openjudge-write-test"], dir.path().to_path_buf());

        let result = run(&spec, &config).expect("process runs");
        assert_ne!(result.exit_status, ExitStatus::Exited(0));
        assert!(!Path::new("/usr/openjudge-write-test").exists());
    }

    #[test]
    fn network_is_unreachable_when_denied() {
        if !python_available() {
            eprintln!("python3 not found, skipping");
            return;
        }
        if !namespaces_available() {
            eprintln!("unprivileged user namespaces unavailable, skipping");
            return;
        }
        let config = SandboxConfig {
            deny_network: true,
            isolate_filesystem: false,
            path: std::env::var("PATH").unwrap_or_else(|_| SandboxConfig::default().path),
            ..SandboxConfig::default()
        };
        let dir = tempfile::tempdir().expect("scratch dir");
        let spec = spec(
            &[
                "python3",
                "-c",
                "import socket; socket.create_connection(('1.1.1.1', 53), timeout=1); print('connected')",
            ],
            dir.path().to_path_buf(),
        );

        let result = run(&spec, &config).expect("process runs");
        assert_ne!(result.exit_status, ExitStatus::Exited(0));
        assert!(!result.stdout.contains("connected"));
        assert!(result.stderr.contains("Error"), "stderr: {}", result.stderr);
    }

    #[test]
    fn output_beyond_the_cap_is_truncated() {
        let dir = tempfile::tempdir().expect("scratch dir");
        let spec = spec(
            &["sh", "-c", "i=0; while [ $i -lt 200 ]; do echo 0123456789; i=$((i+1)); done"],
            dir.path().to_path_buf(),
        );
        let config = SandboxConfig {
            max_output_bytes: 64,
            ..plain()
        };

        let result = run(&spec, &config).expect("process runs");
        assert_eq!(result.stdout.len(), 64);
        assert!(result.output_truncated);
        assert_eq!(result.exit_status, ExitStatus::Exited(0));
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let dir = tempfile::tempdir().expect("scratch dir");
        let spec = spec(&["definitely-not-a-real-binary"], dir.path().to_path_buf());

        let err = run(&spec, &plain()).expect_err("spawn must fail");
        assert!(matches!(err, ExecutorError::Spawn(_)));
    }
}
