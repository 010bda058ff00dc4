//! Pseudoterminal allocation for TTY-enabled containers, via
//! `nix::pty::openpty`.

use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

use keel_shared::errors::{EngineError, EngineResult};
use nix::pty::{openpty, Winsize};

pub struct Pty {
    pub master: OwnedFd,
    pub slave: OwnedFd,
}

impl Pty {
    pub fn allocate() -> EngineResult<Self> {
        let result = openpty(None, None)
            .map_err(|e| EngineError::StartFailed(format!("openpty failed: {e}")))?;
        Ok(Self {
            master: result.master,
            slave: result.slave,
        })
    }

    pub fn resize(&self, rows: u16, cols: u16) -> EngineResult<()> {
        resize_fd(self.master.as_raw_fd(), rows, cols)
    }
}

/// Duplicate `fd` onto a fresh descriptor, e.g. to hand the pty master to
/// more than one owner (a reader thread, a writer, a resize handle) without
/// any of them racing the others' `Drop`.
pub fn dup_fd(fd: &OwnedFd) -> EngineResult<OwnedFd> {
    let raw = nix::unistd::dup(fd.as_raw_fd())
        .map_err(|e| EngineError::Io(std::io::Error::from_raw_os_error(e as i32)))?;
    Ok(unsafe { OwnedFd::from_raw_fd(raw) })
}

fn resize_fd(fd: std::os::fd::RawFd, rows: u16, cols: u16) -> EngineResult<()> {
    let winsize = Winsize {
        ws_row: rows,
        ws_col: cols,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    // SAFETY: `fd` is a valid, open pty descriptor for the lifetime of this
    // call; TIOCSWINSZ does not retain the pointer afterwards.
    let ret = unsafe { libc::ioctl(fd, libc::TIOCSWINSZ, &winsize as *const Winsize) };
    if ret != 0 {
        return Err(EngineError::DriverError(format!(
            "ioctl TIOCSWINSZ failed: {}",
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}

/// A standalone handle onto a pty master fd, kept by the container runtime
/// after the slave end has been handed to the child, for `Resize` and for
/// reading/writing the live session outside the execution driver.
pub struct PtyHandle(pub OwnedFd);

impl PtyHandle {
    pub fn resize(&self, rows: u16, cols: u16) -> EngineResult<()> {
        resize_fd(self.0.as_raw_fd(), rows, cols)
    }
}
