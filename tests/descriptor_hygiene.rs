//! Descriptor accounting across many launches
//!
//! Counting open descriptors is only meaningful while no other test in
//! this binary is launching children, so every test holds `SERIAL`.

#![cfg(unix)]

use procpipe::{run, wait, ExitOutcome, LaunchError};
use std::io::Read;
use std::sync::Mutex;

static SERIAL: Mutex<()> = Mutex::new(());

fn open_descriptors() -> usize {
    let dir = if std::path::Path::new("/proc/self/fd").is_dir() {
        "/proc/self/fd"
    } else {
        "/dev/fd"
    };
    // the directory handle itself shows up in the listing
    std::fs::read_dir(dir)
        .expect("list open descriptors")
        .count()
        - 1
}

#[test]
fn test_repeated_launches_do_not_leak() {
    let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let before = open_descriptors();

    for round in 0..128 {
        let (child, mut stdio) = run(&["cat"]).expect("Failed to spawn cat");
        stdio.stdin.close();
        let mut out = String::new();
        stdio.stdout.read_to_string(&mut out).unwrap();
        assert_eq!(wait(child), ExitOutcome::Exited(0), "round {}", round);
    }

    assert_eq!(open_descriptors(), before);
}

#[test]
fn test_dropped_channels_release_their_ends() {
    let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let before = open_descriptors();

    let (child, stdio) = run(&["true"]).expect("Failed to spawn true");
    // exactly the three parent ends stay with us
    assert_eq!(open_descriptors(), before + 3);

    drop(stdio);
    assert_eq!(open_descriptors(), before);
    assert!(wait(child).success());
}

#[test]
fn test_failed_launch_releases_everything() {
    let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());
    let before = open_descriptors();

    for _ in 0..32 {
        let result = run(&["procpipe-test-no-such-program"]);
        assert!(matches!(result, Err(LaunchError::SpawnFailed(_))));
    }

    assert_eq!(open_descriptors(), before);
}

#[test]
fn test_child_inherits_only_standard_streams() {
    let _guard = SERIAL.lock().unwrap_or_else(|e| e.into_inner());

    // a second launch in flight must not leak its parent ends into the first
    let (other, _other_stdio) = run(&["sleep", "5"]).expect("Failed to spawn sleep");

    let listing = if std::path::Path::new("/proc/self/fd").is_dir() {
        "ls /proc/self/fd"
    } else {
        "ls /dev/fd"
    };
    let (child, mut stdio) = run(&["sh", "-c", listing]).expect("Failed to spawn sh");
    stdio.stdin.close();
    let mut out = String::new();
    stdio.stdout.read_to_string(&mut out).unwrap();
    assert!(wait(child).success());

    // ls itself opens one descriptor for the directory it lists
    let fds: Vec<&str> = out.split_whitespace().collect();
    assert!(fds.len() <= 4, "child saw descriptors {:?}", fds);
    for slot in ["0", "1", "2"] {
        assert!(fds.contains(&slot), "missing {} in {:?}", slot, fds);
    }

    let _ = procpipe::kill(&other);
    let _ = wait(other);
}
