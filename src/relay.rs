//! Stream relay between the runner's stdio and the child's pipes
//!
//! Each stream is copied on its own thread so a child that fills one pipe
//! while the runner drains another can never deadlock.

use std::io::{self, Read, Write};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Completion notice of one relayed stream
pub struct Finished {
    pub stream: &'static str,
    pub result: io::Result<()>,
}

/// Set of relay threads whose completion the runner waits for
pub struct Relay {
    sender: Sender<Finished>,
    receiver: Receiver<Finished>,
    running: usize,
}

impl Relay {
    pub fn new() -> Self {
        let (sender, receiver) = channel();
        Self {
            sender,
            receiver,
            running: 0,
        }
    }

    /// Copy `reader` into `writer` on a new thread and track its completion
    pub fn spawn<R, W>(&mut self, stream: &'static str, reader: R, writer: W) -> io::Result<()>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let sender = self.sender.clone();
        thread::Builder::new()
            .name(format!("relay-{}", stream))
            .spawn(move || {
                let result = copy_stream(reader, writer);
                let _ = sender.send(Finished { stream, result });
            })?;
        self.running += 1;
        Ok(())
    }

    /// Copy on a thread nobody waits for
    ///
    /// Used for the runner's own stdin, whose read may block for as long as
    /// the terminal stays open.
    pub fn spawn_detached<R, W>(stream: &'static str, reader: R, writer: W) -> io::Result<()>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        thread::Builder::new()
            .name(format!("relay-{}", stream))
            .spawn(move || {
                if let Err(e) = copy_stream(reader, writer) {
                    debug!(stream, "relay stopped: {}", e);
                }
            })?;
        Ok(())
    }

    pub fn running(&self) -> usize {
        self.running
    }

    /// Wait for the tracked relays, at most `limit` if given
    ///
    /// Returns how many are still running, which is non-zero only when
    /// something (typically a grandchild) keeps a pipe open past the limit.
    pub fn drain(&mut self, limit: Option<Duration>) -> usize {
        let deadline = limit.map(|limit| Instant::now() + limit);

        while self.running > 0 {
            let finished = match deadline {
                None => match self.receiver.recv() {
                    Ok(finished) => finished,
                    Err(_) => break,
                },
                Some(deadline) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    match self.receiver.recv_timeout(left) {
                        Ok(finished) => finished,
                        Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                            break
                        }
                    }
                }
            };

            self.running -= 1;
            if let Err(e) = finished.result {
                warn!(stream = finished.stream, "relay failed: {}", e);
            }
        }
        self.running
    }
}

impl Default for Relay {
    fn default() -> Self {
        Self::new()
    }
}

/// Copy until EOF. A peer that went away ends the stream quietly.
fn copy_stream<R: Read, W: Write>(mut reader: R, mut writer: W) -> io::Result<()> {
    let copied = io::copy(&mut reader, &mut writer).and_then(|_| writer.flush());
    match copied {
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        other => other,
    }
}
