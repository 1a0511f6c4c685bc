//! Windows 主控台控制事件處理
//!
//! Ctrl+C 對應中斷旗標，Ctrl+Break 對應終止，關閉主控台視窗對應 hangup。

use super::SignalFlags;
use crate::error::{Result, RunnerError};
use std::sync::atomic::Ordering;
use std::sync::OnceLock;
use windows::Win32::Foundation::BOOL;
use windows::Win32::System::Console::{
    SetConsoleCtrlHandler, CTRL_BREAK_EVENT, CTRL_CLOSE_EVENT, CTRL_C_EVENT,
};

static SIGNAL_STATE: OnceLock<SignalFlags> = OnceLock::new();

/// Register the console handler and return the shared flags
pub fn setup_signal_handlers() -> Result<SignalFlags> {
    if let Some(flags) = SIGNAL_STATE.get() {
        return Ok(flags.clone());
    }

    let flags = SignalFlags::new();
    SIGNAL_STATE
        .set(flags.clone())
        .map_err(|_| RunnerError::RuntimeError("Signal handler already registered".into()))?;

    unsafe {
        SetConsoleCtrlHandler(Some(console_handler), BOOL(1)).map_err(|err| {
            RunnerError::RuntimeError(format!(
                "Failed to register console control handler: {}",
                err
            ))
        })?;
    }

    Ok(flags)
}

unsafe extern "system" fn console_handler(ctrl_type: u32) -> BOOL {
    if let Some(flags) = SIGNAL_STATE.get() {
        let target = match ctrl_type {
            CTRL_C_EVENT => &flags.sigint_received,
            CTRL_BREAK_EVENT => &flags.sigterm_received,
            CTRL_CLOSE_EVENT => &flags.sighup_received,
            _ => return BOOL(0),
        };
        target.store(true, Ordering::SeqCst);
        return BOOL(1);
    }
    BOOL(0)
}
