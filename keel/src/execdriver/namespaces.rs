//! Namespace and user/group/capability setup, applied from a `pre_exec`
//! hook: runs after `fork()`, before `execve()`, restricted to
//! async-signal-safe operations.

use keel_shared::errors::{EngineError, EngineResult};
use nix::sched::{unshare, CloneFlags};
use nix::unistd::{setgid, setuid, Gid, Uid};

/// Namespaces requested for a container's init process.
/// User namespace is intentionally excluded from the default set; it is
/// optional and orthogonal to the other four.
pub const CONTAINER_NAMESPACES: CloneFlags = CloneFlags::from_bits_truncate(
    CloneFlags::CLONE_NEWPID.bits()
        | CloneFlags::CLONE_NEWNS.bits()
        | CloneFlags::CLONE_NEWNET.bits()
        | CloneFlags::CLONE_NEWIPC.bits()
        | CloneFlags::CLONE_NEWUTS.bits(),
);

/// Called from the child's pre_exec hook. Only async-signal-safe calls
/// belong here: no allocation, no logging, no locking.
pub fn enter_namespaces(flags: CloneFlags) -> std::io::Result<()> {
    unshare(flags).map_err(|e| std::io::Error::from_raw_os_error(e as i32))
}

pub fn drop_privileges(uid: u32, gid: u32) -> std::io::Result<()> {
    setgid(Gid::from_raw(gid)).map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;
    setuid(Uid::from_raw(uid)).map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;
    Ok(())
}

/// Translate a whitelist of capability names (e.g. `"CAP_NET_BIND_SERVICE"`)
/// into the dropped-except-these set applied via the `caps` crate, kept
/// outside the pre_exec hook since `caps::set` allocates internally and is
/// not async-signal-safe — it must run before `fork`, on the parent side,
/// then be re-applied to the child's effective set immediately after the
/// unshare calls via `caps::clear`/`caps::raise` which only touch simple
/// syscalls.
#[cfg(target_os = "linux")]
pub fn apply_capability_whitelist(whitelist: &[String]) -> EngineResult<()> {
    use caps::{CapSet, Capability};

    let wanted: Vec<Capability> = whitelist
        .iter()
        .filter_map(|name| name.parse::<Capability>().ok())
        .collect();

    caps::clear(None, CapSet::Bounding)
        .map_err(|e| EngineError::StartFailed(format!("failed to clear capability set: {e}")))?;
    for cap in &wanted {
        caps::raise(None, CapSet::Bounding, *cap)
            .map_err(|e| EngineError::StartFailed(format!("failed to raise {cap:?}: {e}")))?;
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn apply_capability_whitelist(_whitelist: &[String]) -> EngineResult<()> {
    Ok(())
}

/// Bind-mount `host_path` onto `target_path`, remounting read-only as a
/// second pass when requested — the kernel refuses `MS_BIND|MS_RDONLY` in
/// one call, the remount is mandatory for a read-only bind.
pub fn bind_mount(
    host_path: &std::path::Path,
    target_path: &std::path::Path,
    read_only: bool,
) -> std::io::Result<()> {
    use nix::mount::{mount, MsFlags};

    mount(Some(host_path), target_path, None::<&str>, MsFlags::MS_BIND, None::<&str>)
        .map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;
    if read_only {
        mount(
            None::<&str>,
            target_path,
            None::<&str>,
            MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY,
            None::<&str>,
        )
        .map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;
    }
    Ok(())
}

pub fn pivot_root(new_root: &std::path::Path, put_old: &std::path::Path) -> std::io::Result<()> {
    use nix::unistd::{chdir, pivot_root as nix_pivot_root};

    nix_pivot_root(new_root, put_old)
        .map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;
    chdir("/").map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;
    Ok(())
}

/// The namespace files of an already-running container's init process,
/// opened ahead of `fork()`.
pub struct TargetNamespaces {
    ipc: std::fs::File,
    uts: std::fs::File,
    net: std::fs::File,
    pid: std::fs::File,
    mnt: std::fs::File,
}

pub fn open_target_namespaces(pid: u32) -> EngineResult<TargetNamespaces> {
    let open = |kind: &str| -> EngineResult<std::fs::File> {
        let path = format!("/proc/{pid}/ns/{kind}");
        std::fs::File::open(&path)
            .map_err(|e| EngineError::StartFailed(format!("failed to open {path}: {e}")))
    };
    Ok(TargetNamespaces {
        ipc: open("ipc")?,
        uts: open("uts")?,
        net: open("net")?,
        pid: open("pid")?,
        mnt: open("mnt")?,
    })
}

/// Join the namespaces opened by [`open_target_namespaces`]. Must run in a
/// freshly forked, still single-threaded child: `setns` on a PID namespace
/// only takes effect for descendants the caller forks *after* the call, not
/// the caller itself (`man setns(2)`), so joining the container's pid
/// namespace for real requires forking once more after this returns — the
/// same double-fork `nsenter` uses, which `execdriver::LinuxExecutionDriver::exec`
/// performs around this call. `mnt` is entered last, matching `nsenter`'s
/// own ordering, since switching mount namespaces earlier would strand any
/// later `/proc` lookups against the wrong root.
pub fn enter_target_namespaces(ns: &TargetNamespaces) -> std::io::Result<()> {
    use nix::sched::{setns, CloneFlags};

    let to_io = |e: nix::Error| std::io::Error::from_raw_os_error(e as i32);
    setns(&ns.ipc, CloneFlags::CLONE_NEWIPC).map_err(to_io)?;
    setns(&ns.uts, CloneFlags::CLONE_NEWUTS).map_err(to_io)?;
    setns(&ns.net, CloneFlags::CLONE_NEWNET).map_err(to_io)?;
    setns(&ns.pid, CloneFlags::CLONE_NEWPID).map_err(to_io)?;
    setns(&ns.mnt, CloneFlags::CLONE_NEWNS).map_err(to_io)?;
    Ok(())
}
