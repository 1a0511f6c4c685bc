//! Anonymous pipes on Windows
//!
//! Pipes are created inheritable; the parent-side end of each pair is
//! then stripped of `HANDLE_FLAG_INHERIT` before any process is created.

use std::os::windows::io::{AsRawHandle, FromRawHandle, OwnedHandle, RawHandle};
use windows::Win32::Foundation::{SetHandleInformation, HANDLE, HANDLE_FLAGS, HANDLE_FLAG_INHERIT, TRUE};
use windows::Win32::Security::SECURITY_ATTRIBUTES;
use windows::Win32::System::Pipes::CreatePipe;

use super::PipePair;

pub(crate) type PipeEnd = OwnedHandle;

/// Borrow an owned handle as the `windows` crate's `HANDLE`
pub(crate) fn raw_handle(handle: &impl AsRawHandle) -> HANDLE {
    HANDLE(handle.as_raw_handle() as isize)
}

pub(crate) fn pipe_pair() -> windows::core::Result<PipePair> {
    let attributes = SECURITY_ATTRIBUTES {
        nLength: std::mem::size_of::<SECURITY_ATTRIBUTES>() as u32,
        lpSecurityDescriptor: std::ptr::null_mut(),
        bInheritHandle: TRUE,
    };

    let mut read = HANDLE::default();
    let mut write = HANDLE::default();
    unsafe {
        CreatePipe(&mut read, &mut write, Some(&attributes as *const _), 0)?;
    }

    let (read, write) = unsafe {
        (
            OwnedHandle::from_raw_handle(read.0 as RawHandle),
            OwnedHandle::from_raw_handle(write.0 as RawHandle),
        )
    };
    Ok(PipePair { read, write })
}

/// Keep `handle` out of every future child's inherited handle table
pub(crate) fn disable_inherit(handle: &OwnedHandle) -> windows::core::Result<()> {
    unsafe { SetHandleInformation(raw_handle(handle), HANDLE_FLAG_INHERIT.0, HANDLE_FLAGS(0)) }
}
