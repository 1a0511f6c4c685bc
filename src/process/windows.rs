//! Windows launcher and controller
//!
//! The child is created detached with its stdio bound at creation time.
//! Inheritance is narrowed to the three child-side pipe handles through
//! `PROC_THREAD_ATTRIBUTE_HANDLE_LIST`, and the parent-side handles are
//! made non-inheritable beforehand.
//!
//! Windows has no signals. `kill` maps to `TerminateProcess` with a
//! reserved exit code that `wait` reports as `Signaled(9)`; `quit` posts
//! `WM_QUIT` to every thread of the child, the closest cooperative
//! request a detached process can observe.
//!
//! The process handle itself stays in a registry keyed by launch, not in
//! the `Copy` identity. It is closed only after `wait` has removed it and
//! any concurrent `kill` or `quit` has let go, so a stale identity can
//! never reach a handle value the OS has since handed to another object.

use super::{check_argv, cmdline, ExitOutcome, Lifecycle, ProcessHandle};
use crate::diagnostic;
use crate::error::{ControlError, LaunchError};
use crate::pipe::{self, PipeReader, PipeWriter, StdioChannelSet, StdioRole};
use std::collections::BTreeMap;
use std::ffi::c_void;
use std::marker::PhantomData;
use std::os::windows::io::{FromRawHandle, OwnedHandle, RawHandle};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, trace};
use windows::core::{PCWSTR, PWSTR};
use windows::Win32::Foundation::{
    HANDLE, LPARAM, STILL_ACTIVE, TRUE, WAIT_FAILED, WAIT_OBJECT_0, WPARAM,
};
use windows::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, Thread32First, Thread32Next, TH32CS_SNAPTHREAD, THREADENTRY32,
};
use windows::Win32::System::Threading::{
    CreateProcessW, DeleteProcThreadAttributeList, CREATE_UNICODE_ENVIRONMENT, GetExitCodeProcess,
    InitializeProcThreadAttributeList, TerminateProcess, UpdateProcThreadAttribute,
    WaitForSingleObject, DETACHED_PROCESS, EXTENDED_STARTUPINFO_PRESENT, INFINITE,
    LPPROC_THREAD_ATTRIBUTE_LIST, PROCESS_INFORMATION, PROC_THREAD_ATTRIBUTE_HANDLE_LIST,
    STARTF_USESTDHANDLES, STARTUPINFOEXW,
};
use windows::Win32::UI::WindowsAndMessaging::{PostThreadMessageW, WM_QUIT};

/// Exit code `kill` forces on the child
pub(crate) const FORCED_EXIT_CODE: u32 = 0xDEAD;

/// Reported by processes ended through a console Ctrl+C
const STATUS_CONTROL_C_EXIT: u32 = 0xC000_013A;

const SIGINT: i32 = 2;
const SIGKILL: i32 = 9;

/// Process handles of launched children that were not waited for yet
static CHILDREN: Mutex<BTreeMap<u64, Arc<OwnedHandle>>> = Mutex::new(BTreeMap::new());
static NEXT_KEY: AtomicU64 = AtomicU64::new(1);

/// CreateProcess/TerminateProcess implementation of [`Lifecycle`]
pub struct Win32;

impl Lifecycle for Win32 {
    fn run<S: AsRef<str>>(argv: &[S]) -> Result<(ProcessHandle, StdioChannelSet), LaunchError> {
        let argv = check_argv(argv)?;

        let allocate = |role: StdioRole| {
            pipe::pipe_pair().map_err(|e| {
                LaunchError::ResourceExhausted(format!(
                    "{:?} pipe: {}",
                    role,
                    diagnostic::describe_windows(&e)
                ))
            })
        };
        let stdin = allocate(StdioRole::Stdin)?;
        let stdout = allocate(StdioRole::Stdout)?;
        let stderr = allocate(StdioRole::Stderr)?;

        let (stdin_parent, stdin_child) = stdin.split(StdioRole::Stdin);
        let (stdout_parent, stdout_child) = stdout.split(StdioRole::Stdout);
        let (stderr_parent, stderr_child) = stderr.split(StdioRole::Stderr);

        for end in [&stdin_parent, &stdout_parent, &stderr_parent] {
            pipe::disable_inherit(end)
                .map_err(|e| LaunchError::SetupFailed(diagnostic::describe_windows(&e)))?;
        }

        let inherited = [
            pipe::raw_handle(&stdin_child),
            pipe::raw_handle(&stdout_child),
            pipe::raw_handle(&stderr_child),
        ];
        let attributes = HandleList::new(&inherited)
            .map_err(|e| LaunchError::SetupFailed(diagnostic::describe_windows(&e)))?;

        let mut startup = STARTUPINFOEXW::default();
        startup.StartupInfo.cb = std::mem::size_of::<STARTUPINFOEXW>() as u32;
        startup.StartupInfo.dwFlags = STARTF_USESTDHANDLES;
        startup.StartupInfo.hStdInput = inherited[0];
        startup.StartupInfo.hStdOutput = inherited[1];
        startup.StartupInfo.hStdError = inherited[2];
        startup.lpAttributeList = attributes.as_raw();

        let mut command_line = cmdline::to_wide(&argv);
        let mut info = PROCESS_INFORMATION::default();

        let created = unsafe {
            CreateProcessW(
                PCWSTR::null(),
                PWSTR(command_line.as_mut_ptr()),
                None,
                None,
                TRUE,
                DETACHED_PROCESS | CREATE_UNICODE_ENVIRONMENT | EXTENDED_STARTUPINFO_PRESENT,
                None,
                PCWSTR::null(),
                &startup.StartupInfo,
                &mut info,
            )
        };
        drop(attributes);

        if let Err(e) = created {
            error!(program = argv[0], "CreateProcessW failed: {}", e);
            return Err(LaunchError::SpawnFailed(format!(
                "{}: {}",
                argv[0],
                diagnostic::describe_windows(&e)
            )));
        }

        // the primary thread handle is never used
        drop(unsafe { OwnedHandle::from_raw_handle(info.hThread.0 as RawHandle) });
        drop(stdin_child);
        drop(stdout_child);
        drop(stderr_child);

        let process = unsafe { OwnedHandle::from_raw_handle(info.hProcess.0 as RawHandle) };
        let handle = ProcessHandle::from_key(info.dwProcessId, register(process));
        debug!(pid = handle.id(), program = argv[0], "spawned child process");

        Ok((
            handle,
            StdioChannelSet {
                stdin: PipeWriter::new(stdin_parent),
                stdout: PipeReader::new(stdout_parent),
                stderr: PipeReader::new(stderr_parent),
            },
        ))
    }

    fn kill(handle: &ProcessHandle) -> Result<(), ControlError> {
        let process = lookup(handle)?;
        match unsafe { TerminateProcess(pipe::raw_handle(&*process), FORCED_EXIT_CODE) } {
            Ok(()) => {
                debug!(pid = handle.id(), "process terminated");
                Ok(())
            }
            // terminating an exited process fails with access denied
            Err(_) if !still_active(&process) => {
                debug!(pid = handle.id(), "process already exited");
                Err(ControlError::NotFound(handle.id()))
            }
            Err(e) => {
                error!(pid = handle.id(), "TerminateProcess failed: {}", e);
                Err(ControlError::PlatformFailure(format!(
                    "TerminateProcess on pid {}: {}",
                    handle.id(),
                    diagnostic::describe_windows(&e)
                )))
            }
        }
    }

    fn quit(handle: &ProcessHandle) -> Result<(), ControlError> {
        let pid = handle.id();
        // holding the process handle keeps the pid from being recycled
        // while the thread snapshot is scanned
        let process = lookup(handle)?;
        let platform = |e: windows::core::Error| {
            ControlError::PlatformFailure(format!(
                "thread snapshot for pid {}: {}",
                pid,
                diagnostic::describe_windows(&e)
            ))
        };

        let snapshot = unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPTHREAD, 0) }.map_err(platform)?;
        let snapshot = unsafe { OwnedHandle::from_raw_handle(snapshot.0 as RawHandle) };
        let snapshot_raw = pipe::raw_handle(&snapshot);

        let mut entry = THREADENTRY32 {
            dwSize: std::mem::size_of::<THREADENTRY32>() as u32,
            ..Default::default()
        };

        let mut owned_threads = 0usize;
        let mut posted = 0usize;
        let mut more = unsafe { Thread32First(snapshot_raw, &mut entry) }.is_ok();
        while more {
            if entry.th32OwnerProcessID == pid {
                owned_threads += 1;
                let sent = unsafe {
                    PostThreadMessageW(entry.th32ThreadID, WM_QUIT, WPARAM(0), LPARAM(0))
                };
                if sent.is_ok() {
                    posted += 1;
                }
            }
            more = unsafe { Thread32Next(snapshot_raw, &mut entry) }.is_ok();
        }

        if owned_threads == 0 || !still_active(&process) {
            debug!(pid, "process already exited");
            return Err(ControlError::NotFound(pid));
        }
        if posted == 0 {
            return Err(ControlError::PlatformFailure(format!(
                "none of the {} threads of pid {} has a message queue",
                owned_threads, pid
            )));
        }

        debug!(pid, threads = posted, "posted WM_QUIT");
        Ok(())
    }

    fn wait(handle: ProcessHandle) -> ExitOutcome {
        let process = match lookup(&handle) {
            Ok(process) => process,
            Err(_) => panic!("pid {} is not a child awaiting wait", handle.id()),
        };
        let raw = pipe::raw_handle(&*process);

        loop {
            let event = unsafe { WaitForSingleObject(raw, INFINITE) };
            if event == WAIT_OBJECT_0 {
                break;
            }
            if event == WAIT_FAILED {
                panic!(
                    "WaitForSingleObject on pid {} failed: {}",
                    handle.id(),
                    diagnostic::describe_windows(&windows::core::Error::from_win32())
                );
            }
            trace!(pid = handle.id(), "spurious wake, waiting again");
        }

        let mut code = 0u32;
        if let Err(e) = unsafe { GetExitCodeProcess(raw, &mut code) } {
            panic!(
                "GetExitCodeProcess on pid {} failed: {}",
                handle.id(),
                diagnostic::describe_windows(&e)
            );
        }
        // From here on the identity is NotFound; the OS handle closes when
        // the last concurrent kill or quit drops its reference.
        children().remove(&handle.key());
        drop(process);

        let outcome = decode(code);
        debug!(pid = handle.id(), %outcome, "child exited");
        outcome
    }
}

fn decode(code: u32) -> ExitOutcome {
    match code {
        FORCED_EXIT_CODE => ExitOutcome::Signaled(SIGKILL),
        STATUS_CONTROL_C_EXIT => ExitOutcome::Signaled(SIGINT),
        other => ExitOutcome::Exited(other as i32),
    }
}

fn children() -> MutexGuard<'static, BTreeMap<u64, Arc<OwnedHandle>>> {
    CHILDREN.lock().unwrap_or_else(PoisonError::into_inner)
}

fn register(process: OwnedHandle) -> u64 {
    let key = NEXT_KEY.fetch_add(1, Ordering::Relaxed);
    children().insert(key, Arc::new(process));
    key
}

/// Process handle of a child that was not waited for yet
fn lookup(handle: &ProcessHandle) -> Result<Arc<OwnedHandle>, ControlError> {
    children().get(&handle.key()).cloned().ok_or_else(|| {
        debug!(pid = handle.id(), "process already reaped");
        ControlError::NotFound(handle.id())
    })
}

fn still_active(process: &OwnedHandle) -> bool {
    let mut code = 0u32;
    unsafe { GetExitCodeProcess(pipe::raw_handle(process), &mut code) }.is_ok()
        && code == STILL_ACTIVE.0 as u32
}

/// Attribute list restricting inheritance to the borrowed handles
struct HandleList<'a> {
    buffer: Vec<usize>,
    _handles: PhantomData<&'a [HANDLE]>,
}

impl<'a> HandleList<'a> {
    fn new(handles: &'a [HANDLE]) -> windows::core::Result<Self> {
        let mut size = 0usize;
        // sizing call, expected to fail with ERROR_INSUFFICIENT_BUFFER
        let _ = unsafe {
            InitializeProcThreadAttributeList(LPPROC_THREAD_ATTRIBUTE_LIST::default(), 1, 0, &mut size)
        };

        let words = size / std::mem::size_of::<usize>() + 1;
        let mut buffer = vec![0usize; words];
        let list = LPPROC_THREAD_ATTRIBUTE_LIST(buffer.as_mut_ptr() as *mut c_void);
        unsafe { InitializeProcThreadAttributeList(list, 1, 0, &mut size)? };

        let this = Self {
            buffer,
            _handles: PhantomData,
        };
        unsafe {
            UpdateProcThreadAttribute(
                this.as_raw(),
                0,
                PROC_THREAD_ATTRIBUTE_HANDLE_LIST as usize,
                Some(handles.as_ptr() as *const c_void),
                std::mem::size_of_val(handles),
                None,
                None,
            )?;
        }
        Ok(this)
    }

    fn as_raw(&self) -> LPPROC_THREAD_ATTRIBUTE_LIST {
        LPPROC_THREAD_ATTRIBUTE_LIST(self.buffer.as_ptr() as *mut c_void)
    }
}

impl Drop for HandleList<'_> {
    fn drop(&mut self) {
        unsafe { DeleteProcThreadAttributeList(self.as_raw()) };
    }
}
