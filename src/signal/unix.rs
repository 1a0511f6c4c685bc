//! Unix 信號處理實作
//!
//! 使用 signal-hook 註冊 SIGINT、SIGTERM、SIGHUP 旗標

use super::SignalFlags;
use crate::error::{Result, RunnerError};
use std::sync::Arc;

/// Set up signal handlers for the runner
///
/// Each handler only sets its flag; the main loop decides what to do
/// with the child.
pub fn setup_signal_handlers() -> Result<SignalFlags> {
    use signal_hook::consts::signal::*;
    use signal_hook::flag;

    let flags = SignalFlags::new();

    for (signal, name, target) in [
        (SIGINT, "SIGINT", &flags.sigint_received),
        (SIGTERM, "SIGTERM", &flags.sigterm_received),
        (SIGHUP, "SIGHUP", &flags.sighup_received),
    ] {
        flag::register(signal, Arc::clone(target)).map_err(|e| {
            RunnerError::RuntimeError(format!("Failed to register {} handler: {}", name, e))
        })?;
    }

    Ok(flags)
}
