//! OS error code to message translation
//!
//! Each call formats into a buffer it owns and returns a fresh `String`,
//! so concurrent callers never share formatting state.

/// Describe an OS error code (`errno` on Unix, `GetLastError` on Windows)
pub fn describe(code: i32) -> String {
    format!("{} (os error {})", message(code), code)
}

/// Describe an I/O error, preferring its raw OS code when it has one
pub fn describe_io(error: &std::io::Error) -> String {
    match error.raw_os_error() {
        Some(code) => describe(code),
        None => error.to_string(),
    }
}

/// Recover the Win32 error code wrapped in a `windows` crate error
#[cfg(windows)]
pub(crate) fn win32_code(error: &windows::core::Error) -> i32 {
    let hr = error.code().0 as u32;
    if hr & 0xFFFF_0000 == 0x8007_0000 {
        (hr & 0xFFFF) as i32
    } else {
        hr as i32
    }
}

#[cfg(windows)]
pub(crate) fn describe_windows(error: &windows::core::Error) -> String {
    describe(win32_code(error))
}

#[cfg(unix)]
fn message(code: i32) -> String {
    nix::errno::Errno::from_i32(code).desc().to_string()
}

#[cfg(windows)]
fn message(code: i32) -> String {
    use windows::core::PWSTR;
    use windows::Win32::System::Diagnostics::Debug::{
        FormatMessageW, FORMAT_MESSAGE_FROM_SYSTEM, FORMAT_MESSAGE_IGNORE_INSERTS,
    };

    let mut buffer = vec![0u16; 512];
    let len = unsafe {
        FormatMessageW(
            FORMAT_MESSAGE_FROM_SYSTEM | FORMAT_MESSAGE_IGNORE_INSERTS,
            None,
            code as u32,
            0,
            PWSTR(buffer.as_mut_ptr()),
            buffer.len() as u32,
            None,
        )
    };

    if len == 0 {
        return "Unknown error".to_string();
    }

    String::from_utf16_lossy(&buffer[..len as usize])
        .trim_end()
        .to_string()
}
