use std::process::{Command as StdCommand, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use assert_cmd::Command;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use predicates::prelude::*;

use shm_random::SharedMemory;

fn unique_name(tag: &str) -> String {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    format!(
        "/shm_random_cli_{}_{}_{}",
        tag,
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::SeqCst)
    )
}

#[allow(deprecated)]
fn cmd() -> Command {
    Command::cargo_bin("shm-random").unwrap()
}

#[test]
fn help_succeeds() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("shared memory"));
}

#[test]
fn missing_name_is_usage_error() {
    cmd().assert().code(64);
}

#[test]
fn repeated_name_is_usage_error() {
    cmd().args(["-n", "a", "-n", "b"]).assert().code(64);
}

#[test]
fn invalid_alignment_is_usage_error() {
    cmd()
        .args(["-n", "seg", "--alignment", "3"])
        .assert()
        .code(64)
        .stderr(predicate::str::contains("alignment"));
}

#[test]
fn invalid_mask_is_usage_error() {
    cmd()
        .args(["-n", "seg", "--mask", "xyz"])
        .assert()
        .code(64)
        .stderr(predicate::str::contains("mask"));
}

#[test]
fn create_without_size_is_usage_error() {
    cmd().args(["-n", "seg", "--create"]).assert().code(64);
}

#[test]
fn missing_segment_is_os_error() {
    cmd()
        .args(["-n", &unique_name("missing"), "-i", "0"])
        .assert()
        .code(71)
        .stderr(predicate::str::contains("failed to open shared memory"));
}

#[test]
fn too_small_segment_is_data_error() {
    cmd()
        .args(["-n", &unique_name("small"), "-c", "-s", "4", "-a", "8", "-i", "0"])
        .assert()
        .code(65);
}

#[test]
fn create_once_and_keep() {
    let name = unique_name("keep");
    cmd()
        .args(["-n", &name, "-c", "-s", "32", "-m", "0f", "-i", "0", "--keep"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Size: 32 bytes"));

    let shm = SharedMemory::open(&name).unwrap();
    assert_eq!(shm.len(), 32);
    assert!(shm.iter().all(|&b| b <= 0x0f));
    drop(shm);
    nix::sys::mman::shm_unlink(name.as_str()).unwrap();
}

#[test]
fn limit_exits_cleanly() {
    cmd()
        .args(["-n", &unique_name("limit"), "-c", "-s", "64", "-i", "5", "-l", "3"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Stopped after 3 intervals"));
}

#[test]
fn sigterm_stops_unbounded_run() {
    let mut child = StdCommand::new(env!("CARGO_BIN_EXE_shm-random"))
        .args(["-n", &unique_name("sigterm"), "-c", "-s", "64", "-i", "10"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();
    thread::sleep(Duration::from_millis(200));
    kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM).unwrap();

    let start = Instant::now();
    let status = loop {
        if let Some(status) = child.try_wait().unwrap() {
            break status;
        }
        assert!(
            start.elapsed() < Duration::from_secs(5),
            "process ignored SIGTERM"
        );
        thread::sleep(Duration::from_millis(10));
    };
    assert!(status.success());
}
