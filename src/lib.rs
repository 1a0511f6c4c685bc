// Platform-specific compilation guard
#[cfg(not(any(unix, windows)))]
compile_error!("procpipe supports Unix-like operating systems and Windows only.");

pub mod cli;
pub mod diagnostic;
pub mod error;
pub mod pipe;
pub mod process;
pub mod relay;
pub mod signal;
pub mod watchdog;

pub use error::{ControlError, LaunchError};
pub use pipe::{PipeReader, PipeWriter, StdioChannelSet};
pub use process::{kill, quit, run, wait, ExitOutcome, ProcessHandle};
