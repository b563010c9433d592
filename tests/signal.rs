//! End-to-end tests of the signal backend.
//!
//! Each test re-runs itself as a child process that installs the handler
//! and then faults for real; the parent checks the exit status, what the
//! child printed and the report it left behind.

#![cfg(target_os = "linux")]

use std::{
    path::PathBuf,
    process::{Command, Output},
};

use tempfile::TempDir;

const CHILD_MARKER: &str = "FAULTWARD_TEST_CRASH_CHILD";

struct Crash {
    output: Output,
    reports: Vec<PathBuf>,
    _dir: TempDir,
}

impl Crash {
    fn stderr(&self) -> String {
        String::from_utf8_lossy(&self.output.stderr).into_owned()
    }

    /// Asserts a fatal exit with one written report and returns its text.
    fn report(&self) -> String {
        let stderr = self.stderr();
        assert_eq!(self.output.status.code(), Some(faultward::FATAL_EXIT_CODE), "{stderr}");
        assert!(stderr.contains("The application has crashed"), "{stderr}");
        assert_eq!(self.reports.len(), 1, "{stderr}");
        assert!(stderr.contains(&*self.reports[0].to_string_lossy()), "{stderr}");

        let text = std::fs::read_to_string(&self.reports[0]).unwrap();
        assert!(text.contains("--- Stack Trace"), "{text}");
        text
    }
}

/// In the child, installs the handler and runs `fault`; in the parent,
/// runs the child for `test` and collects what it left behind.
fn crash_in_child(test: &str, fault: impl FnOnce()) -> Crash {
    if std::env::var(CHILD_MARKER).as_deref() == Ok(test) {
        faultward::initialize().unwrap();
        fault();
        unreachable!("the crash handler should have terminated the process");
    }

    let dir = tempfile::tempdir().unwrap();
    let output = Command::new(std::env::current_exe().unwrap())
        .args(["--exact", test, "--nocapture", "--test-threads=1"])
        .env(CHILD_MARKER, test)
        .env("FAULTWARD_REPORT_DIR", dir.path())
        .env_remove("FAULTWARD_ACKNOWLEDGE")
        .output()
        .unwrap();

    let reports = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    Crash {
        output,
        reports,
        _dir: dir,
    }
}

#[inline(never)]
fn read_through(pointer: *const u64) -> u64 {
    // SAFETY: deliberately unsound, the handler terminates the process.
    unsafe { core::ptr::read_volatile(pointer) }
}

#[inline(never)]
#[allow(unconditional_recursion)]
fn recurse(depth: u64) -> u64 {
    let frame = core::hint::black_box([depth; 32]);
    recurse(depth + 1).wrapping_add(frame[0])
}

#[test]
fn test_raised_segfault_writes_report_and_exits() {
    let crash = crash_in_child("test_raised_segfault_writes_report_and_exits", || {
        // SAFETY: raising a signal has no memory-safety preconditions; the
        // installed handler terminates the process.
        unsafe {
            libc::raise(libc::SIGSEGV);
        }
    });

    let text = crash.report();
    assert!(text.contains("Access Violation"), "{text}");
}

#[test]
fn test_null_read_writes_report_and_exits() {
    let crash = crash_in_child("test_null_read_writes_report_and_exits", || {
        read_through(core::hint::black_box(core::ptr::null()));
    });

    let text = crash.report();
    assert!(text.contains("Access Violation"), "{text}");
    assert!(!crash.stderr().contains(faultward::notify::MINIMAL_NOTICE));
}

#[test]
fn test_fault_on_spawned_thread_is_reported() {
    let crash = crash_in_child("test_fault_on_spawned_thread_is_reported", || {
        let worker = std::thread::spawn(|| read_through(core::hint::black_box(core::ptr::null())));
        let _ = worker.join();
    });

    let text = crash.report();
    assert!(text.contains("Access Violation"), "{text}");
    assert!(!crash.stderr().contains("panicked"), "{}", crash.stderr());
}

#[test]
fn test_stack_overflow_is_reported() {
    let crash = crash_in_child("test_stack_overflow_is_reported", || {
        let worker = std::thread::Builder::new()
            .stack_size(256 * 1024)
            .spawn(|| recurse(0))
            .unwrap();
        let _ = worker.join();
    });

    let text = crash.report();
    assert!(text.contains("Stack Overflow"), "{text}");
}
