//! Pipe endpoints handed back to the caller of [`crate::process::run`]
//!
//! The parent keeps the write end of the stdin pipe and the read ends of
//! the stdout/stderr pipes; the complementary ends belong to the child.
//! On Unix the ends are `OwnedFd`s, on Windows `OwnedHandle`s. Either
//! way they are wrapped in a `File` once they reach the caller.

use std::fs::File;
use std::io::{self, Read, Write};

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub(crate) use unix::{pipe_pair, seal, PipeEnd};

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub(crate) use windows::{disable_inherit, pipe_pair, raw_handle, PipeEnd};

/// Which standard stream a pipe is wired to in the child
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdioRole {
    Stdin,
    Stdout,
    Stderr,
}

impl StdioRole {
    pub const ALL: [StdioRole; 3] = [StdioRole::Stdin, StdioRole::Stdout, StdioRole::Stderr];

    /// Descriptor number of the slot in the child
    pub fn slot(self) -> i32 {
        match self {
            StdioRole::Stdin => 0,
            StdioRole::Stdout => 1,
            StdioRole::Stderr => 2,
        }
    }

    /// The parent writes into stdin and reads from the other two
    pub fn parent_writes(self) -> bool {
        self == StdioRole::Stdin
    }
}

/// Both ends of one freshly created OS pipe
pub(crate) struct PipePair {
    pub read: PipeEnd,
    pub write: PipeEnd,
}

impl PipePair {
    /// Split into `(parent_end, child_end)` for the given role
    pub fn split(self, role: StdioRole) -> (PipeEnd, PipeEnd) {
        if role.parent_writes() {
            (self.write, self.read)
        } else {
            (self.read, self.write)
        }
    }
}

fn closed_endpoint() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "pipe endpoint is closed")
}

/// Readable end of a pipe connected to the child's stdout or stderr
#[derive(Debug)]
pub struct PipeReader {
    file: Option<File>,
}

impl PipeReader {
    pub(crate) fn new(end: PipeEnd) -> Self {
        Self {
            file: Some(File::from(end)),
        }
    }

    /// Close the endpoint. Closing twice is a no-op.
    pub fn close(&mut self) {
        self.file.take();
    }

    pub fn is_closed(&self) -> bool {
        self.file.is_none()
    }

    /// Take the underlying file, leaving the endpoint closed
    pub fn take_file(&mut self) -> Option<File> {
        self.file.take()
    }
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.file.as_mut() {
            Some(file) => file.read(buf),
            None => Err(closed_endpoint()),
        }
    }
}

/// Writable end of the pipe connected to the child's stdin
#[derive(Debug)]
pub struct PipeWriter {
    file: Option<File>,
}

impl PipeWriter {
    pub(crate) fn new(end: PipeEnd) -> Self {
        Self {
            file: Some(File::from(end)),
        }
    }

    /// Close the endpoint so the child sees EOF. Closing twice is a no-op.
    pub fn close(&mut self) {
        self.file.take();
    }

    pub fn is_closed(&self) -> bool {
        self.file.is_none()
    }

    pub fn take_file(&mut self) -> Option<File> {
        self.file.take()
    }
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.file.as_mut() {
            Some(file) => file.write(buf),
            None => Err(closed_endpoint()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Err(closed_endpoint()),
        }
    }
}

/// Parent-side ends of the three redirected standard streams
#[derive(Debug)]
pub struct StdioChannelSet {
    pub stdin: PipeWriter,
    pub stdout: PipeReader,
    pub stderr: PipeReader,
}

impl StdioChannelSet {
    pub fn close_all(&mut self) {
        self.stdin.close();
        self.stdout.close();
        self.stderr.close();
    }

    pub fn into_parts(self) -> (PipeWriter, PipeReader, PipeReader) {
        (self.stdin, self.stdout, self.stderr)
    }
}
