//! Crash recovery: reconcile persisted container state against the live
//! kernel state on daemon boot.

use keel_shared::errors::EngineResult;

use super::runtime::ContainerRuntime;
use super::types::ContainerState;

/// For every persisted container left `running` or `restarting` from a
/// prior daemon instance: reattach its monitor if the pid is still alive
/// under keel's cgroup, otherwise mark it `exited` with code 255 and apply
/// its restart policy.
pub async fn recover(runtime: &ContainerRuntime) -> EngineResult<()> {
    let candidates: Vec<_> = runtime
        .store()
        .list()
        .into_iter()
        .filter(|c| matches!(c.state, ContainerState::Running | ContainerState::Restarting))
        .collect();

    for container in candidates {
        if pid_is_ours(container.pid, &container.id) {
            tracing::info!(container = %container.id, pid = container.pid, "reattaching monitor after restart");
            runtime.reattach_monitor(&container.id).await?;
        } else {
            tracing::warn!(container = %container.id, pid = container.pid, "process gone, marking exited");
            runtime.finalize_crashed(&container.id, 255).await?;
        }
    }
    Ok(())
}

/// Check whether `pid`'s `/proc/<pid>/cgroup` still lists keel's cgroup
/// for `container_id` — the signal that this is genuinely our process and
/// not a pid the kernel has since recycled for something unrelated.
fn pid_is_ours(pid: u32, container_id: &str) -> bool {
    if pid == 0 {
        return false;
    }
    let Ok(contents) = std::fs::read_to_string(format!("/proc/{pid}/cgroup")) else {
        return false;
    };
    contents.contains(&format!("/keel/{container_id}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pid_zero_is_never_ours() {
        assert!(!pid_is_ours(0, "anything"));
    }

    #[test]
    fn nonexistent_pid_is_not_ours() {
        assert!(!pid_is_ours(u32::MAX, "anything"));
    }
}
