//! Process lifecycle platform abstraction
//!
//! [`run`] launches a child with all three standard streams redirected
//! through pipes; [`kill`], [`quit`] and [`wait`] control it afterwards.
//! Unix goes through fork/exec and signals, Windows through CreateProcess
//! with an explicit inherited-handle list. The implementation is fixed at
//! build time through the [`Native`] alias.
//!
//! ```no_run
//! use std::io::{Read, Write};
//!
//! let (child, mut stdio) = procpipe::process::run(&["cat"])?;
//! stdio.stdin.write_all(b"abc")?;
//! stdio.stdin.close();
//!
//! let mut echoed = String::new();
//! stdio.stdout.read_to_string(&mut echoed)?;
//! assert_eq!(echoed, "abc");
//! assert!(procpipe::process::wait(child).success());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::error::{ControlError, LaunchError};
use crate::pipe::StdioChannelSet;
use std::fmt;

#[cfg(any(windows, test))]
mod cmdline;

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub use unix::Posix;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use windows::Win32;

/// The lifecycle implementation for the target platform
#[cfg(unix)]
pub type Native = Posix;
#[cfg(windows)]
pub type Native = Win32;

/// Exit status a child reports when replacing its program image failed
pub const EXEC_FAILURE_STATUS: i32 = 127;

/// Identity of a launched child
///
/// The handle is `Copy` so that another thread can `kill` a child while
/// its owner is blocked in [`wait`]. Once `wait` has returned, the
/// identity may be recycled by the OS and must not be waited on again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessHandle {
    id: u32,
    #[cfg(windows)]
    key: u64,
}

impl ProcessHandle {
    /// Numeric process id
    pub fn id(&self) -> u32 {
        self.id
    }

    #[cfg(unix)]
    pub(crate) fn from_pid(pid: nix::unistd::Pid) -> Self {
        Self {
            id: pid.as_raw() as u32,
        }
    }

    #[cfg(unix)]
    pub(crate) fn pid(&self) -> nix::unistd::Pid {
        nix::unistd::Pid::from_raw(self.id as i32)
    }

    /// `key` names the launch in the Windows child registry and is never
    /// reused, unlike process ids and handle values
    #[cfg(windows)]
    pub(crate) fn from_key(id: u32, key: u64) -> Self {
        Self { id, key }
    }

    #[cfg(windows)]
    pub(crate) fn key(&self) -> u64 {
        self.key
    }
}

impl fmt::Display for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid {}", self.id)
    }
}

/// Why a child is no longer running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Returned from `main` or called `exit` with this status
    Exited(i32),
    /// Terminated by this signal
    Signaled(i32),
    /// Suspended by this signal
    Stopped(i32),
}

impl ExitOutcome {
    pub fn success(&self) -> bool {
        matches!(self, ExitOutcome::Exited(0))
    }

    /// Exit status, if the child exited normally
    pub fn code(&self) -> Option<i32> {
        match self {
            ExitOutcome::Exited(code) => Some(*code),
            _ => None,
        }
    }

    /// Signal number that terminated or stopped the child
    pub fn signal(&self) -> Option<i32> {
        match self {
            ExitOutcome::Signaled(sig) | ExitOutcome::Stopped(sig) => Some(*sig),
            ExitOutcome::Exited(_) => None,
        }
    }

    /// Shell-style status: the exit code, or 128 plus the signal number
    pub fn as_exit_code(&self) -> i32 {
        match self {
            ExitOutcome::Exited(code) => *code,
            ExitOutcome::Signaled(sig) | ExitOutcome::Stopped(sig) => 128 + sig,
        }
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitOutcome::Exited(code) => write!(f, "exited with status {}", code),
            ExitOutcome::Signaled(sig) => write!(f, "terminated by signal {}", sig),
            ExitOutcome::Stopped(sig) => write!(f, "stopped by signal {}", sig),
        }
    }
}

/// Launch and control interface implemented once per platform
pub trait Lifecycle {
    /// Start `argv[0]` with `argv` as its arguments and piped stdio
    fn run<S: AsRef<str>>(argv: &[S]) -> Result<(ProcessHandle, StdioChannelSet), LaunchError>;

    /// Terminate the child unconditionally without waiting for it
    fn kill(handle: &ProcessHandle) -> Result<(), ControlError>;

    /// Ask the child to shut down through its own interrupt path
    fn quit(handle: &ProcessHandle) -> Result<(), ControlError>;

    /// Block until the child exits, is killed or is stopped
    ///
    /// Panics if `handle` does not name a child this process can still
    /// wait on, such as one that was already waited for.
    fn wait(handle: ProcessHandle) -> ExitOutcome;
}

pub fn run<S: AsRef<str>>(argv: &[S]) -> Result<(ProcessHandle, StdioChannelSet), LaunchError> {
    Native::run(argv)
}

pub fn kill(handle: &ProcessHandle) -> Result<(), ControlError> {
    Native::kill(handle)
}

pub fn quit(handle: &ProcessHandle) -> Result<(), ControlError> {
    Native::quit(handle)
}

pub fn wait(handle: ProcessHandle) -> ExitOutcome {
    Native::wait(handle)
}

/// Reject command vectors no platform can launch
pub(crate) fn check_argv<S: AsRef<str>>(argv: &[S]) -> Result<Vec<&str>, LaunchError> {
    if argv.is_empty() {
        return Err(LaunchError::InvalidArguments(
            "No command specified".to_string(),
        ));
    }

    let args: Vec<&str> = argv.iter().map(|s| s.as_ref()).collect();
    if args[0].is_empty() {
        return Err(LaunchError::InvalidArguments(
            "Program name is empty".to_string(),
        ));
    }
    if let Some(bad) = args.iter().find(|arg| arg.contains('\0')) {
        return Err(LaunchError::InvalidArguments(format!(
            "Argument {:?} contains a NUL byte",
            bad
        )));
    }
    Ok(args)
}
