//! Execution driver: turns a container's configuration into a running,
//! namespaced, cgrouped process.
//!
//! Single entry point, [`ExecutionDriver::run`]: `Run(container, pipes,
//! startCallback) -> exitCode`. Internally this builds a
//! `std::process::Command` with a `pre_exec` hook that enters namespaces,
//! applies cgroups, and pivots root before the child execs.

mod cgroups;
mod namespaces;
mod pty;

pub use cgroups::CgroupHandle;
pub use pty::{dup_fd, Pty, PtyHandle};

use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use keel_shared::errors::{EngineError, EngineResult};

use crate::container::types::{Container, Resources};

/// A bind mount into the container's mount namespace.
#[derive(Debug, Clone)]
pub struct BindMount {
    pub host_path: PathBuf,
    pub container_path: PathBuf,
    pub read_only: bool,
}

/// Fully-resolved specification for one container init process, built by
/// the caller from [`Container`] + the mounted rootfs path.
pub struct ExecSpec {
    pub container_id: String,
    pub rootfs: PathBuf,
    pub argv: Vec<String>,
    pub env: Vec<String>,
    pub working_dir: Option<String>,
    pub uid: u32,
    pub gid: u32,
    pub capabilities: Vec<String>,
    pub resources: Resources,
    pub binds: Vec<BindMount>,
    pub tty: bool,
}

impl ExecSpec {
    pub fn from_container(container: &Container, rootfs: PathBuf, binds: Vec<BindMount>) -> Self {
        let mut argv = container.config.entrypoint.clone();
        argv.extend(container.config.cmd.clone());
        if argv.is_empty() {
            argv.push("/bin/sh".to_string());
        }
        Self {
            container_id: container.id.clone(),
            rootfs,
            argv,
            env: container.config.env.clone(),
            working_dir: container.config.working_dir.clone(),
            uid: 0,
            gid: 0,
            capabilities: Vec::new(),
            resources: container.config.resources.clone(),
            binds,
            tty: container.config.tty,
        }
    }
}

/// The three stdio endpoints to wire into the new process, supplied by the
/// caller. Plain fds so the caller may pass either
/// pipe ends or a pty slave.
pub struct StdioPipes {
    pub stdin: OwnedFd,
    pub stdout: OwnedFd,
    pub stderr: OwnedFd,
}

/// Specification for one `Exec` process: joins an
/// already-running container's namespaces rather than allocating new ones,
/// so there is no rootfs, resource limits, or bind mounts to carry — those
/// belong to the container the process is entering.
pub struct ExecProcessSpec {
    pub argv: Vec<String>,
    pub env: Vec<String>,
    pub working_dir: Option<String>,
    pub uid: u32,
    pub gid: u32,
}

/// Outcome of a finished container process.
pub struct ExitStatus {
    pub exit_code: i32,
}

/// Translate a raw waitpid status into the conventional exit-code rule:
/// killed-by-signal maps to `128 + signal`.
pub fn exit_code_from_wait_status(status: nix::sys::wait::WaitStatus) -> i32 {
    use nix::sys::wait::WaitStatus::*;
    match status {
        Exited(_, code) => code,
        Signaled(_, signal, _) => 128 + signal as i32,
        _ => 255,
    }
}

#[cfg(test)]
mod exit_code_tests {
    use super::exit_code_from_wait_status;
    use nix::sys::signal::Signal;
    use nix::sys::wait::WaitStatus;
    use nix::unistd::Pid;

    #[test]
    fn exited_preserves_the_raw_code() {
        let status = WaitStatus::Exited(Pid::from_raw(1234), 42);
        assert_eq!(exit_code_from_wait_status(status), 42);
    }

    #[test]
    fn exited_zero_is_success() {
        let status = WaitStatus::Exited(Pid::from_raw(1234), 0);
        assert_eq!(exit_code_from_wait_status(status), 0);
    }

    #[test]
    fn signaled_adds_128() {
        let status = WaitStatus::Signaled(Pid::from_raw(1234), Signal::SIGKILL, false);
        assert_eq!(exit_code_from_wait_status(status), 128 + Signal::SIGKILL as i32);
    }

    #[test]
    fn signaled_sigterm() {
        let status = WaitStatus::Signaled(Pid::from_raw(1234), Signal::SIGTERM, false);
        assert_eq!(exit_code_from_wait_status(status), 128 + Signal::SIGTERM as i32);
    }

    #[test]
    fn anything_else_falls_back_to_255() {
        let status = WaitStatus::Stopped(Pid::from_raw(1234), Signal::SIGSTOP);
        assert_eq!(exit_code_from_wait_status(status), 255);
    }
}

pub trait ExecutionDriver: Send + Sync {
    /// Fork, enter namespaces, then block the child on a sync pipe and
    /// invoke `on_namespaces_ready` in the parent with the child's pid —
    /// this is the caller's chance to open `/proc/<pid>/ns/net` and attach
    /// networking before the child pivots root and execs. Once
    /// `on_namespaces_ready` returns, the child is released to finish
    /// setup and exec, and this call blocks until it exits.
    fn run(
        &self,
        spec: &ExecSpec,
        stdio: StdioPipes,
        on_namespaces_ready: Box<dyn FnOnce(u32) -> EngineResult<()> + Send>,
    ) -> EngineResult<ExitStatus>;

    /// Join `target_pid`'s namespaces and run one more process inside them
    ///. Blocks until that process exits.
    fn exec(&self, target_pid: u32, spec: &ExecProcessSpec, stdio: StdioPipes) -> EngineResult<ExitStatus>;
}

#[derive(Default)]
pub struct LinuxExecutionDriver;

impl ExecutionDriver for LinuxExecutionDriver {
    fn run(
        &self,
        spec: &ExecSpec,
        stdio: StdioPipes,
        on_namespaces_ready: Box<dyn FnOnce(u32) -> EngineResult<()> + Send>,
    ) -> EngineResult<ExitStatus> {
        let cgroup = CgroupHandle::create(&spec.container_id, &spec.resources)?;
        namespaces::apply_capability_whitelist(&spec.capabilities)?;

        let binary = spec
            .argv
            .first()
            .cloned()
            .ok_or_else(|| EngineError::StartFailed("empty argv".into()))?;
        let args = &spec.argv[1..];

        // `binary` is resolved after pivot_root has already run in the
        // child's pre_exec hook, so it must be container-rooted (e.g.
        // "/bin/sh"), not joined against the host-side rootfs path.
        let mut cmd = Command::new(&binary);
        cmd.args(args);
        cmd.env_clear();
        for kv in &spec.env {
            if let Some((key, value)) = kv.split_once('=') {
                cmd.env(key, value);
            }
        }
        if let Some(dir) = &spec.working_dir {
            cmd.current_dir(dir);
        }

        cmd.stdin(Stdio::from(stdio.stdin));
        cmd.stdout(Stdio::from(stdio.stdout));
        cmd.stderr(Stdio::from(stdio.stderr));

        let uid = spec.uid;
        let gid = spec.gid;
        let rootfs = spec.rootfs.clone();
        let cgroup_dir = cgroup.dir().to_path_buf();
        let binds = spec.binds.clone();

        // Two pipes form a two-phase rendezvous: the child signals
        // "namespaces entered" on `ready`, then blocks on `go` until the
        // parent has attached networking and tells it to proceed. Both
        // ends used inside `pre_exec` are plain fds, read/write only —
        // async-signal-safe.
        let (ready_r, ready_w) =
            nix::unistd::pipe().map_err(|e| EngineError::StartFailed(format!("pipe failed: {e}")))?;
        let (go_r, go_w) =
            nix::unistd::pipe().map_err(|e| EngineError::StartFailed(format!("pipe failed: {e}")))?;

        let ready_w_raw = ready_w.as_raw_fd();
        let go_r_raw = go_r.as_raw_fd();

        // SAFETY: the hook below only performs async-signal-safe syscalls
        // (unshare, read/write on already-open fds, mount, chdir,
        // pivot_root, setuid/setgid) — no allocation, no locking, no
        // logging.
        unsafe {
            cmd.pre_exec(move || {
                namespaces::enter_namespaces(namespaces::CONTAINER_NAMESPACES)?;

                nix::unistd::write(unsafe { std::os::fd::BorrowedFd::borrow_raw(ready_w_raw) }, &[1u8])
                    .map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;
                let mut buf = [0u8; 1];
                nix::unistd::read(go_r_raw, &mut buf)
                    .map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;

                let pid = std::process::id();
                let _ = std::fs::write(cgroup_dir.join("cgroup.procs"), pid.to_string());

                // Bind mounts land under the still-host-rooted rootfs path,
                // before `pivot_root` makes that the process's own `/` —
                // the mount table entries ride along across the pivot.
                for bind in &binds {
                    let relative = bind
                        .container_path
                        .strip_prefix("/")
                        .unwrap_or(&bind.container_path);
                    let target = rootfs.join(relative);
                    std::fs::create_dir_all(&target)?;
                    namespaces::bind_mount(&bind.host_path, &target, bind.read_only)?;
                }

                let put_old = rootfs.join(".old_root");
                let _ = std::fs::create_dir_all(&put_old);
                namespaces::pivot_root(&rootfs, &put_old)?;

                namespaces::drop_privileges(uid, gid)?;
                Ok(())
            });
        }

        // The parent only needs the read end of `ready` and the write end
        // of `go`; drop the ends it inherited that belong to the child.
        drop(ready_w);
        drop(go_r);

        let mut child = cmd
            .spawn()
            .map_err(|e| EngineError::StartFailed(format!("exec failed: {e}")))?;

        let mut ack = [0u8; 1];
        nix::unistd::read(ready_r.as_raw_fd(), &mut ack)
            .map_err(|e| EngineError::StartFailed(format!("namespace rendezvous failed: {e}")))?;

        let callback_result = on_namespaces_ready(child.id());
        nix::unistd::write(&go_w, &[1u8])
            .map_err(|e| EngineError::StartFailed(format!("namespace rendezvous failed: {e}")))?;
        callback_result?;

        let status = child
            .wait()
            .map_err(|e| EngineError::StartFailed(format!("waitpid failed: {e}")))?;

        let _ = cgroup.remove();

        let exit_code = match status.code() {
            Some(code) => code,
            None => {
                use std::os::unix::process::ExitStatusExt;
                128 + status.signal().unwrap_or(0)
            }
        };
        Ok(ExitStatus { exit_code })
    }

    /// The `nsenter` double-fork: the outer fork opens the target's
    /// namespace files and joins everything but the pid namespace directly;
    /// `setns(CLONE_NEWPID)` only affects *that process's own future
    /// children* (`man setns(2)`), so a second fork is what actually lands
    /// inside the container's pid namespace to exec the requested command.
    /// The outer child is a plain reaper: it waits for the inner one and
    /// exits with its status, so the real parent's single `waitpid` sees
    /// the command's own exit code.
    fn exec(&self, target_pid: u32, spec: &ExecProcessSpec, stdio: StdioPipes) -> EngineResult<ExitStatus> {
        use std::ffi::CString;
        use nix::sys::wait::waitpid;
        use nix::unistd::{fork, ForkResult};

        let ns = namespaces::open_target_namespaces(target_pid)?;

        let binary = spec
            .argv
            .first()
            .cloned()
            .ok_or_else(|| EngineError::StartFailed("empty argv".into()))?;
        let argv: Vec<CString> = spec
            .argv
            .iter()
            .map(|a| CString::new(a.as_str()).map_err(|e| EngineError::InvalidArgument(e.to_string())))
            .collect::<EngineResult<_>>()?;
        let binary = CString::new(binary).map_err(|e| EngineError::InvalidArgument(e.to_string()))?;
        let env: Vec<CString> = spec
            .env
            .iter()
            .filter_map(|kv| CString::new(kv.as_str()).ok())
            .collect();
        let working_dir = spec.working_dir.clone();
        let uid = spec.uid;
        let gid = spec.gid;

        // SAFETY: this process is the keel daemon's own execdriver worker
        // thread (run via `spawn_blocking`); forking it here only ever
        // leads to an `exec` or an immediate `process::exit` in the child,
        // never a return into multi-threaded Rust code.
        match unsafe { fork() }.map_err(|e| EngineError::StartFailed(format!("fork failed: {e}")))? {
            ForkResult::Parent { child } => {
                let status = waitpid(child, None)
                    .map_err(|e| EngineError::StartFailed(format!("waitpid failed: {e}")))?;
                Ok(ExitStatus {
                    exit_code: exit_code_from_wait_status(status),
                })
            }
            ForkResult::Child => {
                if namespaces::enter_target_namespaces(&ns).is_err() {
                    std::process::exit(126);
                }
                match unsafe { fork() } {
                    Ok(ForkResult::Parent { child: inner }) => {
                        let status = waitpid(inner, None)
                            .unwrap_or(nix::sys::wait::WaitStatus::Exited(inner, 255));
                        std::process::exit(exit_code_from_wait_status(status));
                    }
                    Ok(ForkResult::Child) => {
                        unsafe {
                            libc::dup2(stdio.stdin.as_raw_fd(), 0);
                            libc::dup2(stdio.stdout.as_raw_fd(), 1);
                            libc::dup2(stdio.stderr.as_raw_fd(), 2);
                        }
                        if let Some(dir) = &working_dir {
                            let _ = nix::unistd::chdir(dir.as_str());
                        }
                        let _ = namespaces::drop_privileges(uid, gid);
                        let _ = nix::unistd::execvpe(&binary, &argv, &env);
                        std::process::exit(127);
                    }
                    Err(_) => std::process::exit(126),
                }
            }
        }
    }
}

pub(crate) fn raw_fd_is_tty(fd: &OwnedFd) -> bool {
    unsafe { libc::isatty(fd.as_raw_fd()) == 1 }
}
