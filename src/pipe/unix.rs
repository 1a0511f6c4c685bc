//! POSIX pipe allocation and descriptor flags

use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

use super::PipePair;

pub(crate) type PipeEnd = OwnedFd;

/// Allocate one pipe. Both ends are owned immediately so an early return
/// anywhere in the launch releases them.
///
/// Where `pipe2` exists the ends are close-on-exec from the start, so a
/// fork on another thread cannot inherit them before [`seal`] runs.
pub(crate) fn pipe_pair() -> io::Result<PipePair> {
    let mut fds = [0 as libc::c_int; 2];
    #[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
    let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) };
    #[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
    let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
    if rc == -1 {
        return Err(io::Error::last_os_error());
    }

    let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    Ok(PipePair { read, write })
}

/// Mark `fd` close-on-exec, moving it above the standard slots if needed.
///
/// A pipe end sitting on 0, 1 or 2 (possible when the parent runs with a
/// closed standard stream) would be clobbered while the child rebinds its
/// stdio, so such ends are duplicated to the lowest free descriptor >= 3.
pub(crate) fn seal(fd: OwnedFd) -> nix::Result<OwnedFd> {
    if fd.as_raw_fd() > 2 {
        fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
        return Ok(fd);
    }

    let raised = fcntl(fd.as_raw_fd(), FcntlArg::F_DUPFD_CLOEXEC(3))?;
    Ok(unsafe { OwnedFd::from_raw_fd(raised) })
}
