use thiserror::Error;

/// Exit codes used by the `procpipe` runner for its own failures
///
/// A child that ran to completion hands its own status through instead.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnCode {
    NoError = 0,
    InvalidArguments = 1,
    LaunchFailed = 2,
    RuntimeError = 3,
    TimedOut = 124,
}

impl ReturnCode {
    pub fn as_exit_code(self) -> i32 {
        self as i32
    }
}

/// Failures of [`crate::process::run`]
///
/// Every variant is returned only after all pipe ends allocated for the
/// launch have been released.
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("Invalid command: {0}")]
    InvalidArguments(String),

    #[error("Failed to allocate pipes: {0}")]
    ResourceExhausted(String),

    #[error("Failed to configure pipe inheritance: {0}")]
    SetupFailed(String),

    #[error("Failed to start process: {0}")]
    SpawnFailed(String),
}

/// Failures of [`crate::process::kill`] and [`crate::process::quit`]
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ControlError {
    /// The target already exited (or was reaped) before the request arrived
    #[error("Process {0} no longer exists")]
    NotFound(u32),

    #[error("Platform failure: {0}")]
    PlatformFailure(String),
}

impl ControlError {
    /// Whether this is the expected race with a child exiting on its own
    pub fn is_benign(&self) -> bool {
        matches!(self, ControlError::NotFound(_))
    }
}

/// Errors surfaced by the runner binary
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Invalid command line arguments: {0}")]
    InvalidArguments(String),

    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error(transparent)]
    Control(#[from] ControlError),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Runtime error: {0}")]
    RuntimeError(String),

    #[error("Command timed out after {0:?}")]
    TimedOut(std::time::Duration),
}

impl RunnerError {
    /// Convert error to the appropriate return code
    pub fn to_return_code(&self) -> ReturnCode {
        match self {
            RunnerError::InvalidArguments(_) => ReturnCode::InvalidArguments,
            RunnerError::Launch(LaunchError::InvalidArguments(_)) => ReturnCode::InvalidArguments,
            RunnerError::Launch(_) => ReturnCode::LaunchFailed,
            RunnerError::Control(_) => ReturnCode::RuntimeError,
            RunnerError::IoError(_) => ReturnCode::RuntimeError,
            RunnerError::RuntimeError(_) => ReturnCode::RuntimeError,
            RunnerError::TimedOut(_) => ReturnCode::TimedOut,
        }
    }

    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        self.to_return_code().as_exit_code()
    }
}

/// Result type alias for runner operations
pub type Result<T> = std::result::Result<T, RunnerError>;

impl From<RunnerError> for i32 {
    fn from(error: RunnerError) -> Self {
        error.exit_code()
    }
}
