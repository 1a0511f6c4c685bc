//! Signal/Console Event 平台抽象層
//!
//! 送給 runner 的終止請求先記錄在原子旗標中，再由主迴圈轉送給子行程：
//! 中斷 (SIGINT / Ctrl+C) 轉為合作式的 `quit`，其餘轉為 `kill`。

use crate::error::ControlError;
use crate::process::{self, ProcessHandle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Signal flags shared between the handlers and the main loop
#[derive(Clone)]
pub struct SignalFlags {
    pub sigint_received: Arc<AtomicBool>,
    pub sigterm_received: Arc<AtomicBool>,
    pub sighup_received: Arc<AtomicBool>,
}

/// What the runner should ask of its child
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    Quit,
    Kill,
}

impl SignalFlags {
    pub fn new() -> Self {
        Self {
            sigint_received: Arc::new(AtomicBool::new(false)),
            sigterm_received: Arc::new(AtomicBool::new(false)),
            sighup_received: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Take the most severe pending request, clearing the flags it covers
    pub fn take_request(&self) -> Option<Request> {
        let term = self.sigterm_received.swap(false, Ordering::SeqCst);
        let hup = self.sighup_received.swap(false, Ordering::SeqCst);
        if term || hup {
            return Some(Request::Kill);
        }
        if self.sigint_received.swap(false, Ordering::SeqCst) {
            return Some(Request::Quit);
        }
        None
    }
}

impl Default for SignalFlags {
    fn default() -> Self {
        Self::new()
    }
}

/// Relay a request to the child. A child that already exited is not an error.
///
/// A quit the child cannot receive (on Windows, a console program with no
/// message queue) is turned into a kill so the child never outlives the
/// request.
pub fn forward_to_child(request: Request, child: &ProcessHandle) -> Result<(), ControlError> {
    info!(pid = child.id(), ?request, "forwarding termination request");
    let sent = match request {
        Request::Quit => process::quit(child),
        Request::Kill => process::kill(child),
    };
    match sent {
        Err(err) if err.is_benign() => {
            debug!(pid = child.id(), "child exited before the request arrived");
            Ok(())
        }
        Err(err) if request == Request::Quit => {
            warn!(pid = child.id(), "quit request failed ({}), killing instead", err);
            forward_to_child(Request::Kill, child)
        }
        other => other,
    }
}

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub use unix::setup_signal_handlers;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use windows::setup_signal_handlers;
