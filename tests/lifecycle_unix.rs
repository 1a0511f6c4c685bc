//! Integration tests for the Unix process lifecycle
//!
//! These drive real children (`cat`, `sh`, `sleep`) through run, quit,
//! kill and wait and check what the parent observes.

#![cfg(unix)]

use procpipe::{kill, quit, run, wait, ControlError, ExitOutcome, LaunchError};
use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::thread;
use std::time::{Duration, Instant};

fn read_all(mut reader: impl Read) -> String {
    let mut text = String::new();
    reader.read_to_string(&mut text).expect("read from child");
    text
}

#[test]
fn test_cat_echoes_stdin() {
    let (child, mut stdio) = run(&["cat"]).expect("Failed to spawn cat");

    stdio.stdin.write_all(b"hello\nworld\n").unwrap();
    stdio.stdin.close();

    assert_eq!(read_all(&mut stdio.stdout), "hello\nworld\n");
    assert_eq!(read_all(&mut stdio.stderr), "");
    assert_eq!(wait(child), ExitOutcome::Exited(0));
}

#[test]
fn test_closed_stdin_reaches_child_as_eof() {
    let (child, mut stdio) = run(&["cat"]).expect("Failed to spawn cat");
    stdio.stdin.close();

    assert_eq!(read_all(&mut stdio.stdout), "");
    assert_eq!(wait(child), ExitOutcome::Exited(0));
}

#[test]
fn test_every_exit_status_is_reported() {
    for code in 0..=255 {
        let script = format!("exit {}", code);
        let (child, mut stdio) = run(&["sh", "-c", &script]).expect("Failed to spawn sh");
        stdio.close_all();
        assert_eq!(wait(child), ExitOutcome::Exited(code), "exit {}", code);
    }
}

#[test]
fn test_arguments_are_passed_verbatim() {
    let (child, mut stdio) = run(&["sh", "-c", "printf '%s|' \"$@\"", "sh", "a b", "", "*"])
        .expect("Failed to spawn sh");
    stdio.stdin.close();

    assert_eq!(read_all(&mut stdio.stdout), "a b||*|");
    assert!(wait(child).success());
}

#[test]
fn test_kill_then_wait_is_bounded() {
    let (child, _stdio) = run(&["sleep", "30"]).expect("Failed to spawn sleep");
    let started = Instant::now();

    kill(&child).expect("kill a running child");
    assert_eq!(wait(child), ExitOutcome::Signaled(libc::SIGKILL));
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[test]
fn test_quit_lets_the_child_clean_up() {
    let script = "trap 'echo bye; exit 7' INT; echo ready; while :; do sleep 0.05; done";
    let (child, mut stdio) = run(&["sh", "-c", script]).expect("Failed to spawn sh");

    let mut stdout = BufReader::new(&mut stdio.stdout);
    let mut line = String::new();
    stdout.read_line(&mut line).unwrap();
    assert_eq!(line, "ready\n");

    quit(&child).expect("quit a running child");
    assert_eq!(wait(child), ExitOutcome::Exited(7));

    line.clear();
    stdout.read_line(&mut line).unwrap();
    assert_eq!(line, "bye\n");
}

#[test]
fn test_quit_without_handler_terminates_by_interrupt() {
    let (child, _stdio) = run(&["sleep", "30"]).expect("Failed to spawn sleep");
    quit(&child).expect("quit a running child");
    assert_eq!(wait(child), ExitOutcome::Signaled(libc::SIGINT));
}

#[test]
fn test_control_after_reap_is_not_found() {
    let (child, mut stdio) = run(&["true"]).expect("Failed to spawn true");
    stdio.close_all();
    assert!(wait(child).success());

    assert_eq!(kill(&child), Err(ControlError::NotFound(child.id())));
    assert_eq!(quit(&child), Err(ControlError::NotFound(child.id())));
}

#[test]
fn test_stopped_child_is_reported_then_killed() {
    let (child, _stdio) = run(&["sleep", "30"]).expect("Failed to spawn sleep");

    unsafe { libc::kill(child.id() as i32, libc::SIGSTOP) };
    assert_eq!(wait(child), ExitOutcome::Stopped(libc::SIGSTOP));

    // still ours to reap
    kill(&child).expect("kill a stopped child");
    assert_eq!(wait(child), ExitOutcome::Signaled(libc::SIGKILL));
}

#[test]
fn test_kill_from_another_thread_unblocks_wait() {
    let (child, _stdio) = run(&["sleep", "30"]).expect("Failed to spawn sleep");

    let killer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        kill(&child)
    });

    assert_eq!(wait(child), ExitOutcome::Signaled(libc::SIGKILL));
    assert_eq!(killer.join().unwrap(), Ok(()));
}

#[test]
fn test_large_output_on_both_streams_does_not_deadlock() {
    let script = "head -c 1000000 /dev/zero; head -c 1000000 /dev/zero >&2";
    let (child, stdio) = run(&["sh", "-c", script]).expect("Failed to spawn sh");
    let (mut stdin, stdout, stderr) = stdio.into_parts();
    stdin.close();

    let err_reader = thread::spawn(move || {
        let mut buf = Vec::new();
        let mut stderr = stderr;
        stderr.read_to_end(&mut buf).map(|_| buf.len())
    });

    let mut out = Vec::new();
    let mut stdout = stdout;
    stdout.read_to_end(&mut out).unwrap();

    assert_eq!(out.len(), 1_000_000);
    assert_eq!(err_reader.join().unwrap().unwrap(), 1_000_000);
    assert!(wait(child).success());
}

#[test]
fn test_endpoint_close_is_idempotent() {
    let (child, mut stdio) = run(&["cat"]).expect("Failed to spawn cat");

    stdio.stdin.close();
    stdio.stdin.close();
    assert!(stdio.stdin.is_closed());
    let err = stdio.stdin.write(b"late").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BrokenPipe);

    stdio.stdout.close();
    stdio.stdout.close();
    let mut buf = [0u8; 4];
    assert!(stdio.stdout.read(&mut buf).is_err());

    stdio.close_all();
    assert!(wait(child).success());
}

#[test]
fn test_writing_to_exited_child_is_broken_pipe() {
    let (child, mut stdio) = run(&["true"]).expect("Failed to spawn true");
    assert!(wait(child).success());

    // the child's end is gone, so the write fails instead of raising SIGPIPE
    let err = stdio.stdin.write_all(&[0u8; 65536 * 2]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BrokenPipe);
}

#[test]
fn test_missing_program_fails_to_launch() {
    match run(&["procpipe-test-no-such-program"]) {
        Err(LaunchError::SpawnFailed(message)) => {
            assert!(message.contains("procpipe-test-no-such-program"));
        }
        other => panic!("expected SpawnFailed, got {:?}", other.map(|(h, _)| h)),
    }
}

#[test]
fn test_late_exec_failure_exits_127_with_message() {
    use std::os::unix::fs::PermissionsExt;

    // executable bit set, but no interpreter line and not a binary
    let path = std::env::temp_dir().join(format!("procpipe-not-exec-{}", std::process::id()));
    std::fs::write(&path, "this is not a program\n").unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

    let program = path.to_str().unwrap().to_string();
    let (child, mut stdio) = run(&[program.as_str()]).expect("launch succeeds until exec");
    stdio.stdin.close();

    let message = read_all(&mut stdio.stderr);
    assert_eq!(wait(child), ExitOutcome::Exited(procpipe::process::EXEC_FAILURE_STATUS));
    assert!(message.contains("failed to execute"), "stderr was {:?}", message);

    let _ = std::fs::remove_file(&path);
}
