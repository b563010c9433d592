//! Integration tests for installing and removing the process-wide hook.
//!
//! The hook is global state, so every test takes `SERIAL` and starts from a
//! clean slate.

#![cfg(target_os = "linux")]

use std::sync::{Mutex, MutexGuard};

use faultward::{CrashConfig, CrashGuard};

static SERIAL: Mutex<()> = Mutex::new(());

fn serial() -> MutexGuard<'static, ()> {
    let guard = SERIAL.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    CrashGuard::cleanup_all();
    guard
}

fn guard() -> CrashGuard {
    CrashGuard::with_config(CrashConfig::DEFAULT.report_dir(std::env::temp_dir()))
}

#[test]
fn test_initialize_and_cleanup() {
    let _serial = serial();

    assert!(!CrashGuard::is_initialized());
    let registration = guard().initialize().unwrap();
    assert_ne!(registration.id(), 0);
    assert!(CrashGuard::is_initialized());

    CrashGuard::cleanup();
    assert!(!CrashGuard::is_initialized());
}

#[test]
fn test_second_initialize_stacks() {
    let _serial = serial();

    let first = guard().initialize().unwrap();
    let second = faultward::initialize().unwrap();
    assert_ne!(first, second);
    assert_eq!(CrashGuard::active_registrations(), 2);

    faultward::cleanup();
    assert_eq!(CrashGuard::active_registrations(), 1);
    assert!(!CrashGuard::uninstall(second));
    assert!(CrashGuard::uninstall(first));
    assert!(!CrashGuard::is_initialized());
}

#[test]
fn test_cleanup_without_initialize_is_noop() {
    let _serial = serial();

    CrashGuard::cleanup();
    faultward::cleanup();
    CrashGuard::cleanup_all();
    assert!(!CrashGuard::is_initialized());
}

#[test]
fn test_double_cleanup_is_noop() {
    let _serial = serial();

    let registration = guard().initialize().unwrap();
    CrashGuard::cleanup();
    CrashGuard::cleanup();
    assert!(!CrashGuard::uninstall(registration));
    assert!(!CrashGuard::is_initialized());
}

#[test]
fn test_reinitialize_after_cleanup() {
    let _serial = serial();

    let first = guard().initialize().unwrap();
    CrashGuard::cleanup();
    let second = guard().initialize().unwrap();
    assert!(second.id() > first.id());
    assert_eq!(CrashGuard::active_registrations(), 1);
    CrashGuard::cleanup_all();
}
