//! Namespace jail entered between `fork` and `exec`.
//!
//! Everything the child touches is prepared by the parent in [`Isolation::plan`],
//! so [`Isolation::enter`] only issues syscalls and never allocates.

use std::ffi::{CStr, CString};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Component, Path, PathBuf};
use std::ptr;

use crate::config::SandboxConfig;

/// Working directory of the sandboxed program inside the jail.
pub(crate) const JAIL_WORKDIR: &str = "/box";

const JAIL_DEVICES: &[&str] = &["/dev/null", "/dev/zero", "/dev/random", "/dev/urandom"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BindKind {
    ReadOnly,
    Writable,
    Device,
}

#[derive(Debug)]
struct Bind {
    source: CString,
    target: CString,
    kind: BindKind,
}

#[derive(Debug)]
struct Jail {
    root: CString,
    directories: Vec<CString>,
    files: Vec<CString>,
    binds: Vec<Bind>,
    workdir: CString,
}

#[derive(Debug)]
pub(crate) struct Isolation {
    flags: libc::c_int,
    uid_map: Vec<u8>,
    gid_map: Vec<u8>,
    jail: Option<Jail>,
}

impl Isolation {
    /// Returns `None` when the config asks for no namespaces at all.
    ///
    /// With `jail_root` the program also gets a private filesystem. It must be
    /// an empty directory that outlives the child; the jail's tmpfs is mounted
    /// over it inside the child's mount namespace only.
    pub(crate) fn plan(
        config: &SandboxConfig,
        workspace: &Path,
        jail_root: Option<&Path>,
    ) -> io::Result<Option<Self>> {
        if !config.uses_namespaces() {
            return Ok(None);
        }

        let mut flags = libc::CLONE_NEWUSER | libc::CLONE_NEWPID;
        if config.deny_network {
            flags |= libc::CLONE_NEWNET;
        }

        let jail = match jail_root {
            Some(root) => {
                flags |= libc::CLONE_NEWNS;
                Some(Jail::plan(config, workspace, root)?)
            }
            None => None,
        };

        // SAFETY: getters without side effects.
        let (uid, gid) = unsafe { (libc::geteuid(), libc::getegid()) };
        Ok(Some(Self {
            flags,
            uid_map: format!("{uid} {uid} 1\n").into_bytes(),
            gid_map: format!("{gid} {gid} 1\n").into_bytes(),
            jail,
        }))
    }

    /// Runs in the forked child. On success the caller is PID 1 of a fresh
    /// PID namespace; the process that called `enter` never returns and
    /// mirrors that PID 1's exit status instead.
    pub(crate) fn enter(&self) -> io::Result<()> {
        check(unsafe { libc::unshare(self.flags) })?;

        match write_file(c"/proc/self/setgroups", b"deny") {
            Err(err) if err.raw_os_error() == Some(libc::ENOENT) => {}
            other => other?,
        }
        write_file(c"/proc/self/uid_map", &self.uid_map)?;
        write_file(c"/proc/self/gid_map", &self.gid_map)?;

        if let Some(jail) = &self.jail {
            jail.build()?;
        }
        fork_namespace_init()
    }
}

impl Jail {
    fn plan(config: &SandboxConfig, workspace: &Path, root: &Path) -> io::Result<Self> {
        let mut directories = Vec::new();
        let mut files = Vec::new();
        let mut binds = Vec::new();

        for dir in ["/tmp", "/dev"] {
            push_directory(&mut directories, root, Path::new(dir))?;
        }

        let workdir = Path::new(JAIL_WORKDIR);
        push_directory(&mut directories, root, workdir)?;
        binds.push(Bind {
            source: c_path(workspace)?,
            target: c_path(&inside(root, workdir))?,
            kind: BindKind::Writable,
        });

        for path in &config.readonly_paths {
            // Follows symlinks such as /bin -> usr/bin, like the bind mount will.
            let Ok(metadata) = std::fs::metadata(path) else {
                continue;
            };
            let target = inside(root, path);
            if metadata.is_dir() {
                push_directory(&mut directories, root, path)?;
            } else {
                if let Some(parent) = path.parent() {
                    push_directory(&mut directories, root, parent)?;
                }
                files.push(c_path(&target)?);
            }
            binds.push(Bind {
                source: c_path(path)?,
                target: c_path(&target)?,
                kind: BindKind::ReadOnly,
            });
        }

        for device in JAIL_DEVICES {
            let device = Path::new(device);
            if !device.exists() {
                continue;
            }
            let target = inside(root, device);
            files.push(c_path(&target)?);
            binds.push(Bind {
                source: c_path(device)?,
                target: c_path(&target)?,
                kind: BindKind::Device,
            });
        }

        Ok(Self {
            root: c_path(root)?,
            directories,
            files,
            binds,
            workdir: c_path(workdir)?,
        })
    }

    fn build(&self) -> io::Result<()> {
        // Keep our mounts out of the host's mount table.
        mount(None, c"/", None, libc::MS_REC | libc::MS_PRIVATE, None)?;
        mount(
            Some(c"tmpfs"),
            &self.root,
            Some(c"tmpfs"),
            libc::MS_NOSUID | libc::MS_NODEV,
            Some(c"size=16m,mode=0755"),
        )?;

        for dir in &self.directories {
            let rc = unsafe { libc::mkdir(dir.as_ptr(), 0o755) };
            if rc != 0 {
                let err = io::Error::last_os_error();
                if err.raw_os_error() != Some(libc::EEXIST) {
                    return Err(err);
                }
            }
        }
        for file in &self.files {
            let fd = unsafe { libc::open(file.as_ptr(), libc::O_WRONLY | libc::O_CREAT | libc::O_CLOEXEC, 0o644 as libc::c_uint) };
            check(fd)?;
            unsafe { libc::close(fd) };
        }
        for bind in &self.binds {
            bind.apply()?;
        }

        check(unsafe { libc::chdir(self.root.as_ptr()) })?;
        check(unsafe { libc::syscall(libc::SYS_pivot_root, c".".as_ptr(), c".".as_ptr()) } as libc::c_int)?;
        check(unsafe { libc::umount2(c".".as_ptr(), libc::MNT_DETACH) })?;
        check(unsafe { libc::chdir(self.workdir.as_ptr()) })
    }
}

impl Bind {
    fn apply(&self) -> io::Result<()> {
        mount(Some(&self.source), &self.target, None, libc::MS_BIND | libc::MS_REC, None)?;
        if self.kind == BindKind::Device {
            return Ok(());
        }

        // A remount inside a user namespace must keep the flags the host locked.
        let mut flags = libc::MS_BIND | libc::MS_REMOUNT | libc::MS_NOSUID | libc::MS_NODEV | locked_flags(&self.target)?;
        if self.kind == BindKind::ReadOnly {
            flags |= libc::MS_RDONLY;
        }
        mount(None, &self.target, None, flags, None)
    }
}

/// Cheap check that unprivileged user, mount, PID and network namespaces work here.
pub fn namespaces_available() -> bool {
    // SAFETY: the child only issues raw syscalls before `_exit`.
    let pid = unsafe { libc::fork() };
    if pid < 0 {
        return false;
    }
    if pid == 0 {
        let flags = libc::CLONE_NEWUSER | libc::CLONE_NEWNS | libc::CLONE_NEWPID | libc::CLONE_NEWNET;
        let ok = unsafe { libc::unshare(flags) } == 0
            && mount(None, c"/", None, libc::MS_REC | libc::MS_PRIVATE, None).is_ok();
        unsafe { libc::_exit(if ok { 0 } else { 1 }) };
    }

    let mut status: libc::c_int = 0;
    loop {
        let rc = unsafe { libc::waitpid(pid, &mut status, 0) };
        if rc == pid {
            return libc::WIFEXITED(status) && libc::WEXITSTATUS(status) == 0;
        }
        if io::Error::last_os_error().kind() != io::ErrorKind::Interrupted {
            return false;
        }
    }
}

fn fork_namespace_init() -> io::Result<()> {
    let child = unsafe { libc::fork() };
    if child < 0 {
        return Err(io::Error::last_os_error());
    }
    if child == 0 {
        // If the forwarding parent is killed, PID 1 and with it the whole
        // namespace go down too.
        check(unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL) })?;
        return Ok(());
    }
    forward_exit(child)
}

fn forward_exit(child: libc::pid_t) -> ! {
    // Drop our copies of the stdio pipes and of the spawn error pipe, otherwise
    // the supervisor waits on us instead of on the program.
    let closed = unsafe { libc::syscall(libc::SYS_close_range, 0u32, u32::MAX, 0u32) };
    if closed != 0 {
        for fd in 0..1024 {
            unsafe { libc::close(fd) };
        }
    }

    let mut status: libc::c_int = 0;
    loop {
        let rc = unsafe { libc::waitpid(child, &mut status, 0) };
        if rc == child {
            break;
        }
        if io::Error::last_os_error().kind() != io::ErrorKind::Interrupted {
            unsafe { libc::_exit(127) };
        }
    }

    unsafe {
        if libc::WIFSIGNALED(status) {
            let signal = libc::WTERMSIG(status);
            libc::signal(signal, libc::SIG_DFL);
            libc::kill(libc::getpid(), signal);
            libc::_exit(128 + signal);
        }
        libc::_exit(libc::WEXITSTATUS(status))
    }
}

fn locked_flags(target: &CStr) -> io::Result<libc::c_ulong> {
    // SAFETY: zeroed statvfs is a valid out-parameter.
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    check(unsafe { libc::statvfs(target.as_ptr(), &mut stat) })?;

    let mut flags = 0;
    for (st, ms) in [
        (libc::ST_NOSUID, libc::MS_NOSUID),
        (libc::ST_NODEV, libc::MS_NODEV),
        (libc::ST_NOEXEC, libc::MS_NOEXEC),
        (libc::ST_RDONLY, libc::MS_RDONLY),
        (libc::ST_NOATIME, libc::MS_NOATIME),
        (libc::ST_NODIRATIME, libc::MS_NODIRATIME),
        (libc::ST_RELATIME, libc::MS_RELATIME),
    ] {
        if stat.f_flag & st != 0 {
            flags |= ms;
        }
    }
    Ok(flags)
}

fn mount(
    source: Option<&CStr>,
    target: &CStr,
    fstype: Option<&CStr>,
    flags: libc::c_ulong,
    data: Option<&CStr>,
) -> io::Result<()> {
    let rc = unsafe {
        libc::mount(
            source.map_or(ptr::null(), CStr::as_ptr),
            target.as_ptr(),
            fstype.map_or(ptr::null(), CStr::as_ptr),
            flags,
            data.map_or(ptr::null(), |data| data.as_ptr().cast()),
        )
    };
    check(rc)
}

fn write_file(path: &CStr, content: &[u8]) -> io::Result<()> {
    let fd = unsafe { libc::open(path.as_ptr(), libc::O_WRONLY | libc::O_CLOEXEC) };
    check(fd)?;
    let written = unsafe { libc::write(fd, content.as_ptr().cast(), content.len()) };
    let result = if written < 0 {
        Err(io::Error::last_os_error())
    } else if written as usize != content.len() {
        Err(io::Error::from(io::ErrorKind::WriteZero))
    } else {
        Ok(())
    };
    unsafe { libc::close(fd) };
    result
}

fn check(rc: libc::c_int) -> io::Result<()> {
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// `path` re-rooted under `root`.
fn inside(root: &Path, path: &Path) -> PathBuf {
    let relative: PathBuf = path
        .components()
        .filter(|component| matches!(component, Component::Normal(_)))
        .collect();
    root.join(relative)
}

/// Queues `path` and each of its ancestors, parents first.
fn push_directory(directories: &mut Vec<CString>, root: &Path, path: &Path) -> io::Result<()> {
    let mut current = PathBuf::new();
    for component in path.components() {
        if let Component::Normal(name) = component {
            current.push(name);
            let dir = c_path(&root.join(&current))?;
            if !directories.contains(&dir) {
                directories.push(dir);
            }
        }
    }
    Ok(())
}

fn c_path(path: &Path) -> io::Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, format!("path contains NUL: {}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_rerooted_under_the_jail() {
        let root = Path::new("/tmp/jail");
        assert_eq!(inside(root, Path::new("/usr/lib")), PathBuf::from("/tmp/jail/usr/lib"));
        assert_eq!(inside(root, Path::new("/../etc")), PathBuf::from("/tmp/jail/etc"));
    }

    #[test]
    fn directories_are_queued_parents_first_without_duplicates() {
        let root = Path::new("/j");
        let mut dirs = Vec::new();
        push_directory(&mut dirs, root, Path::new("/usr/lib")).expect("plain path");
        push_directory(&mut dirs, root, Path::new("/usr/share")).expect("plain path");

        let dirs: Vec<_> = dirs.iter().map(|dir| dir.to_str().expect("utf-8")).collect();
        assert_eq!(dirs, vec!["/j/usr", "/j/usr/lib", "/j/usr/share"]);
    }

    #[test]
    fn no_namespaces_means_no_plan() {
        let config = SandboxConfig {
            deny_network: false,
            isolate_filesystem: false,
            ..SandboxConfig::default()
        };
        let plan = Isolation::plan(&config, Path::new("/tmp/ws"), None).expect("plan");
        assert!(plan.is_none());
    }

    #[test]
    fn plan_binds_the_workspace_writable_and_tool_paths_read_only() {
        let config = SandboxConfig {
            readonly_paths: vec![PathBuf::from("/usr"), PathBuf::from("/definitely/missing")],
            ..SandboxConfig::default()
        };
        let plan = Isolation::plan(&config, Path::new("/tmp/ws"), Some(Path::new("/tmp/root")))
            .expect("plan")
            .expect("namespaces requested");
        assert_ne!(plan.flags & libc::CLONE_NEWNET, 0);
        assert_ne!(plan.flags & libc::CLONE_NEWNS, 0);

        let jail = plan.jail.expect("filesystem jail");
        let workspace = &jail.binds[0];
        assert_eq!(workspace.kind, BindKind::Writable);
        assert_eq!(workspace.target.to_str(), Ok("/tmp/root/box"));
        assert!(jail.binds.iter().any(|bind| {
            bind.kind == BindKind::ReadOnly && bind.target.to_str() == Ok("/tmp/root/usr")
        }));
        // Missing paths are skipped.
        assert!(jail.binds.iter().all(|bind| bind.source.to_str() != Ok("/definitely/missing")));
    }
}
