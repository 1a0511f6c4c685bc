//! POSIX launcher and controller
//!
//! The launch follows the classic pipe/fork/dup2/exec sequence. All six
//! pipe ends are close-on-exec and live above descriptor 2 before the
//! fork, so the only descriptors of the channel set that survive into
//! the new program image are the child's own stdin/stdout/stderr.
//!
//! The program is resolved on `PATH` in the parent and started with
//! `execv`, not `execvp`: an executable without an interpreter line is
//! not retried through `/bin/sh` and ends as `Exited(127)`.

use super::{check_argv, ExitOutcome, Lifecycle, ProcessHandle, EXEC_FAILURE_STATUS};
use crate::diagnostic;
use crate::error::{ControlError, LaunchError};
use crate::pipe::{self, PipeEnd, PipeReader, PipeWriter, StdioChannelSet, StdioRole};
use nix::errno::Errno;
use nix::sys::signal::{self, sigprocmask, SigHandler, SigSet, SigmaskHow, Signal};
use nix::unistd::{access, close, dup2, fork, write, AccessFlags, ForkResult};
use std::ffi::{CStr, CString};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use tracing::{debug, error, trace};

/// Search path used when `PATH` is unset
const DEFAULT_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// fork/exec/signal implementation of [`Lifecycle`]
pub struct Posix;

impl Lifecycle for Posix {
    fn run<S: AsRef<str>>(argv: &[S]) -> Result<(ProcessHandle, StdioChannelSet), LaunchError> {
        let argv = check_argv(argv)?;
        let args = argv
            .iter()
            .map(|arg| CString::new(*arg))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| LaunchError::InvalidArguments(e.to_string()))?;

        // Every pipe end is an OwnedFd from here on; any early return
        // closes whatever has been allocated so far.
        let allocate = |role: StdioRole| {
            pipe::pipe_pair().map_err(|e| {
                LaunchError::ResourceExhausted(format!(
                    "{:?} pipe: {}",
                    role,
                    diagnostic::describe_io(&e)
                ))
            })
        };
        let stdin = allocate(StdioRole::Stdin)?;
        let stdout = allocate(StdioRole::Stdout)?;
        let stderr = allocate(StdioRole::Stderr)?;

        let (stdin_parent, stdin_child) = stdin.split(StdioRole::Stdin);
        let (stdout_parent, stdout_child) = stdout.split(StdioRole::Stdout);
        let (stderr_parent, stderr_child) = stderr.split(StdioRole::Stderr);

        let seal = |fd: PipeEnd| {
            pipe::seal(fd).map_err(|e| LaunchError::SetupFailed(diagnostic::describe(e as i32)))
        };
        let parent_ends = [seal(stdin_parent)?, seal(stdout_parent)?, seal(stderr_parent)?];
        let child_ends = [seal(stdin_child)?, seal(stdout_child)?, seal(stderr_child)?];

        let program = resolve_program(argv[0]).map_err(|errno| {
            LaunchError::SpawnFailed(format!("{}: {}", argv[0], diagnostic::describe(errno as i32)))
        })?;
        let program = CString::new(program.as_os_str().as_bytes())
            .map_err(|e| LaunchError::InvalidArguments(e.to_string()))?;

        // Nothing may be allocated in the child between fork and exec, so
        // everything it needs is prepared here.
        let failure_note = format!("procpipe: failed to execute {}: ", argv[0]).into_bytes();
        let exec_argv = exec_pointers(&args);
        let parent_raw = raw_fds(&parent_ends);
        let child_raw = raw_fds(&child_ends);

        match unsafe { fork() } {
            Ok(ForkResult::Parent { child }) => {
                drop(child_ends);

                let [stdin, stdout, stderr] = parent_ends;
                let handle = ProcessHandle::from_pid(child);
                debug!(pid = handle.id(), program = argv[0], "spawned child process");

                Ok((
                    handle,
                    StdioChannelSet {
                        stdin: PipeWriter::new(stdin),
                        stdout: PipeReader::new(stdout),
                        stderr: PipeReader::new(stderr),
                    },
                ))
            }
            Ok(ForkResult::Child) => exec_child(&parent_raw, &child_raw, &program, &exec_argv, &failure_note),
            Err(e) => {
                error!(program = argv[0], "fork failed: {}", e);
                Err(LaunchError::SpawnFailed(format!(
                    "fork: {}",
                    diagnostic::describe(e as i32)
                )))
            }
        }
    }

    fn kill(handle: &ProcessHandle) -> Result<(), ControlError> {
        send(handle, Signal::SIGKILL)
    }

    fn quit(handle: &ProcessHandle) -> Result<(), ControlError> {
        send(handle, Signal::SIGINT)
    }

    fn wait(handle: ProcessHandle) -> ExitOutcome {
        let pid = handle.pid().as_raw();
        let mut status: libc::c_int = 0;

        loop {
            let reaped = unsafe { libc::waitpid(pid, &mut status, libc::WUNTRACED) };

            if reaped == pid {
                match decode(status) {
                    Some(outcome) => {
                        debug!(pid = handle.id(), %outcome, "child changed state");
                        return outcome;
                    }
                    // resumed by SIGCONT, still running
                    None => continue,
                }
            }

            let errno = Errno::last();
            if reaped == -1 && errno == Errno::EINTR {
                trace!(pid = handle.id(), "waitpid interrupted, retrying");
                continue;
            }

            // ECHILD and friends mean the handle was never ours or was
            // already reaped; there is no outcome left to report.
            panic!(
                "waitpid({}) returned {}: {}",
                pid,
                reaped,
                diagnostic::describe(errno as i32)
            );
        }
    }
}

/// NULL-terminated `argv` for `execv`, borrowing from `args`
fn exec_pointers(args: &[CString]) -> Vec<*const libc::c_char> {
    args.iter()
        .map(|arg| arg.as_ptr())
        .chain(std::iter::once(std::ptr::null()))
        .collect()
}

fn raw_fds(ends: &[PipeEnd; 3]) -> [RawFd; 3] {
    [ends[0].as_raw_fd(), ends[1].as_raw_fd(), ends[2].as_raw_fd()]
}

/// Decode a raw wait status. Exit beats stop beats termination.
fn decode(status: libc::c_int) -> Option<ExitOutcome> {
    if libc::WIFEXITED(status) {
        Some(ExitOutcome::Exited(libc::WEXITSTATUS(status)))
    } else if libc::WIFSTOPPED(status) {
        Some(ExitOutcome::Stopped(libc::WSTOPSIG(status)))
    } else if libc::WIFSIGNALED(status) {
        Some(ExitOutcome::Signaled(libc::WTERMSIG(status)))
    } else {
        None
    }
}

fn send(handle: &ProcessHandle, sig: Signal) -> Result<(), ControlError> {
    match signal::kill(handle.pid(), sig) {
        Ok(()) => {
            debug!(pid = handle.id(), signal = sig.as_str(), "signal sent");
            Ok(())
        }
        Err(Errno::ESRCH) => {
            debug!(
                pid = handle.id(),
                signal = sig.as_str(),
                "process already exited"
            );
            Err(ControlError::NotFound(handle.id()))
        }
        Err(e) => {
            error!(pid = handle.id(), signal = sig.as_str(), "failed to signal: {}", e);
            Err(ControlError::PlatformFailure(format!(
                "{} to pid {}: {}",
                sig.as_str(),
                handle.id(),
                diagnostic::describe(e as i32)
            )))
        }
    }
}

/// Find the executable `execvp` would run for `name`
fn resolve_program(name: &str) -> Result<PathBuf, Errno> {
    if name.contains('/') {
        let path = PathBuf::from(name);
        return executable(&path).map(|()| path);
    }

    let search = std::env::var_os("PATH").unwrap_or_else(|| DEFAULT_PATH.into());
    let mut denied = false;
    for dir in std::env::split_paths(&search) {
        let dir = if dir.as_os_str().is_empty() {
            PathBuf::from(".")
        } else {
            dir
        };
        let candidate = dir.join(name);
        match executable(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(Errno::EACCES) => denied = true,
            Err(_) => {}
        }
    }

    Err(if denied { Errno::EACCES } else { Errno::ENOENT })
}

fn executable(path: &Path) -> Result<(), Errno> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| Errno::from_i32(e.raw_os_error().unwrap_or(libc::ENOENT)))?;
    if !metadata.is_file() {
        return Err(Errno::EACCES);
    }
    access(path, AccessFlags::X_OK)
}

/// Child half of the launch. Only async-signal-safe calls are made here.
fn exec_child(
    parent_ends: &[RawFd; 3],
    child_ends: &[RawFd; 3],
    program: &CStr,
    argv: &[*const libc::c_char],
    failure_note: &[u8],
) -> ! {
    // Start the new image with a clean signal state; SIGPIPE in
    // particular is ignored by the Rust runtime and would be inherited.
    let _ = sigprocmask(SigmaskHow::SIG_SETMASK, Some(&SigSet::empty()), None);
    for sig in [Signal::SIGINT, Signal::SIGTERM, Signal::SIGPIPE] {
        let _ = unsafe { signal::signal(sig, SigHandler::SigDfl) };
    }

    for fd in parent_ends {
        if close(*fd).is_err() {
            abort_child();
        }
    }
    for (slot, fd) in child_ends.iter().enumerate() {
        if dup2(*fd, slot as RawFd).is_err() {
            abort_child();
        }
    }
    for fd in child_ends {
        if close(*fd).is_err() {
            abort_child();
        }
    }

    // only returns on failure
    unsafe { libc::execv(program.as_ptr(), argv.as_ptr()) };
    let errno = Errno::last();

    // stderr is already the pipe the parent reads
    let _ = write(2, failure_note);
    let _ = write(2, errno.desc().as_bytes());
    let _ = write(2, b"\n");
    abort_child()
}

fn abort_child() -> ! {
    unsafe { libc::_exit(EXEC_FAILURE_STATUS) }
}
