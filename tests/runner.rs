//! End-to-end tests of the `procpipe` binary
//!
//! Each test runs the built binary with `sh` children and checks its
//! exit status and relayed output.

#![cfg(unix)]

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

fn procpipe() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_procpipe"));
    cmd.env_remove("PROCPIPE_TIMEOUT")
        .env_remove("PROCPIPE_GRACE")
        .env_remove("RUST_LOG");
    cmd
}

/// Wait for the runner, killing it and failing the test past `limit`
fn wait_bounded(child: &mut Child, limit: Duration) -> ExitStatus {
    let started = Instant::now();
    loop {
        if let Some(status) = child.try_wait().expect("poll procpipe") {
            return status;
        }
        if started.elapsed() > limit {
            let _ = child.kill();
            let _ = child.wait();
            panic!("procpipe still running after {:?}", limit);
        }
        thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn test_child_exit_status_is_passed_through() {
    let status = procpipe()
        .args(["--no-stdin", "sh", "-c", "exit 3"])
        .status()
        .expect("run procpipe");
    assert_eq!(status.code(), Some(3));
}

#[test]
fn test_streams_are_relayed_separately() {
    let output = procpipe()
        .args(["--no-stdin", "sh", "-c", "echo out; echo err >&2"])
        .output()
        .expect("run procpipe");
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(String::from_utf8_lossy(&output.stdout), "out\n");
    assert_eq!(String::from_utf8_lossy(&output.stderr), "err\n");
}

#[test]
fn test_stdin_is_relayed_to_child() {
    let mut runner = procpipe()
        .arg("cat")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .expect("spawn procpipe");

    let mut stdin = runner.stdin.take().unwrap();
    stdin.write_all(b"through the relay\n").unwrap();
    drop(stdin);

    let output = runner.wait_with_output().unwrap();
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(String::from_utf8_lossy(&output.stdout), "through the relay\n");
}

#[test]
fn test_no_stdin_gives_child_immediate_eof() {
    let mut runner = procpipe()
        .args(["--no-stdin", "cat"])
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .spawn()
        .expect("spawn procpipe");

    // our end of procpipe's stdin stays open the whole time
    let _held = runner.stdin.take();
    let status = wait_bounded(&mut runner, Duration::from_secs(10));
    assert_eq!(status.code(), Some(0));
}

#[test]
fn test_missing_program_exits_with_launch_failure() {
    let output = procpipe()
        .args(["--no-stdin", "procpipe-test-no-such-program"])
        .output()
        .expect("run procpipe");
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("procpipe-test-no-such-program"));
}

#[test]
fn test_invalid_timeout_is_rejected() {
    let output = procpipe()
        .args(["--timeout", "0", "true"])
        .output()
        .expect("run procpipe");
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_timeout_escalates_to_kill() {
    // the child ignores the interrupt, so only the kill ends it
    let mut runner = procpipe()
        .args(["-t", "0.2", "-g", "0.2", "--no-stdin"])
        .args(["sh", "-c", "trap '' INT; sleep 30"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn procpipe");

    let started = Instant::now();
    let status = wait_bounded(&mut runner, Duration::from_secs(10));
    assert_eq!(status.code(), Some(124));
    assert!(started.elapsed() >= Duration::from_millis(400));
}

#[test]
fn test_timeout_quit_is_cooperative() {
    let output = procpipe()
        .args(["-t", "0.2", "--no-stdin"])
        .args(["sh", "-c", "trap 'echo cleaned up; exit 0' INT; while :; do sleep 0.05; done"])
        .output()
        .expect("run procpipe");
    assert_eq!(output.status.code(), Some(124));
    assert_eq!(String::from_utf8_lossy(&output.stdout), "cleaned up\n");
}

#[test]
fn test_sigterm_is_forwarded_as_kill() {
    let mut runner = procpipe()
        .args(["--no-stdin", "sh", "-c", "echo ready; exec sleep 30"])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn procpipe");

    // handlers are installed before the launch, so seeing output means
    // procpipe is ready to forward
    let mut stdout = BufReader::new(runner.stdout.take().unwrap());
    let mut line = String::new();
    stdout.read_line(&mut line).unwrap();
    assert_eq!(line, "ready\n");

    unsafe { libc::kill(runner.id() as i32, libc::SIGTERM) };
    let status = wait_bounded(&mut runner, Duration::from_secs(10));
    assert_eq!(status.code(), Some(128 + libc::SIGKILL));
}
