use std::io;
use std::os::unix::process::CommandExt;
use std::process::Command;
use std::time::Duration;

use super::isolation::Isolation;

/// Limits applied inside the child between `fork` and `exec`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ProcessLimits {
    pub cpu_seconds: u64,
    pub file_size_bytes: u64,
    pub address_space_bytes: Option<u64>,
}

impl ProcessLimits {
    /// CPU limit is the wall limit rounded up plus one second; the wall-clock
    /// deadline normally fires first.
    pub fn new(time_limit: Duration, file_size_mb: u64) -> Self {
        let whole = time_limit.as_secs();
        let rounded = if time_limit.subsec_nanos() > 0 {
            whole + 1
        } else {
            whole
        };
        Self {
            cpu_seconds: rounded.max(1) + 1,
            file_size_bytes: file_size_mb.saturating_mul(1024 * 1024),
            address_space_bytes: None,
        }
    }

    pub fn with_address_space_mb(mut self, limit_mb: Option<u64>) -> Self {
        self.address_space_bytes = limit_mb.map(|mb| mb.saturating_mul(1024 * 1024));
        self
    }

    pub fn cpu_limit(&self) -> Duration {
        Duration::from_secs(self.cpu_seconds)
    }
}

/// Rlimits first, so they are inherited by the namespace init `isolation` forks.
pub(crate) fn install(command: &mut Command, limits: ProcessLimits, isolation: Option<Isolation>) {
    // SAFETY: the hook only calls async-signal-safe libc functions and touches
    // no shared state; `isolation` was fully built by the parent.
    unsafe {
        command.pre_exec(move || {
            apply(&limits)?;
            match &isolation {
                Some(isolation) => isolation.enter(),
                None => Ok(()),
            }
        });
    }
}

fn apply(limits: &ProcessLimits) -> io::Result<()> {
    // SIGXCPU at the soft limit, SIGKILL one second later.
    set_rlimit(libc::RLIMIT_CPU, limits.cpu_seconds, limits.cpu_seconds + 1)?;
    set_rlimit(
        libc::RLIMIT_FSIZE,
        limits.file_size_bytes,
        limits.file_size_bytes,
    )?;
    set_rlimit(libc::RLIMIT_CORE, 0, 0)?;
    if let Some(bytes) = limits.address_space_bytes {
        set_rlimit(libc::RLIMIT_AS, bytes, bytes)?;
    }
    Ok(())
}

fn set_rlimit(resource: libc::__rlimit_resource_t, soft: u64, hard: u64) -> io::Result<()> {
    let limit = libc::rlimit {
        rlim_cur: soft as libc::rlim_t,
        rlim_max: hard as libc::rlim_t,
    };
    let rc = unsafe { libc::setrlimit(resource, &limit) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_limit_rounds_up_with_headroom() {
        assert_eq!(ProcessLimits::new(Duration::from_millis(2_000), 16).cpu_seconds, 3);
        assert_eq!(ProcessLimits::new(Duration::from_millis(1_500), 16).cpu_seconds, 3);
        assert_eq!(ProcessLimits::new(Duration::from_millis(10), 16).cpu_seconds, 2);
    }

    #[test]
    fn sizes_are_converted_to_bytes() {
        let limits = ProcessLimits::new(Duration::from_secs(1), 16).with_address_space_mb(Some(512));
        assert_eq!(limits.file_size_bytes, 16 * 1024 * 1024);
        assert_eq!(limits.address_space_bytes, Some(512 * 1024 * 1024));
    }
}
