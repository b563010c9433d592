//! Crashes on purpose to show the full fatal path.
//!
//! Run with `cargo run --example access_violation [kind]`, where `kind` is
//! one of `null` (default), `divide` or `illegal`. The report lands in
//! `FAULTWARD_REPORT_DIR`, or the working directory.
//!
//! This example demonstrates:
//! 1. Routing the crate's logs through `tracing-subscriber`
//! 2. Installing the handler with a custom configuration
//! 3. What the user sees when the process goes down

use faultward::{CrashConfig, CrashGuard, notify::ConsoleNotifier};
use rootcause::prelude::*;

#[inline(never)]
fn read_through(pointer: *const u64) -> u64 {
    // SAFETY: deliberately unsound, the handler takes over.
    unsafe { core::ptr::read_volatile(pointer) }
}

#[inline(never)]
fn update_world(kind: &str) -> u64 {
    match kind {
        #[cfg(target_arch = "x86_64")]
        "divide" => {
            let quotient: u64;
            // SAFETY: deliberately divides by zero in hardware, the handler
            // takes over.
            unsafe {
                core::arch::asm!(
                    "div {divisor}",
                    divisor = in(reg) core::hint::black_box(0u64),
                    inout("rax") 7u64 => quotient,
                    inout("rdx") 0u64 => _,
                );
            }
            quotient
        }
        #[cfg(target_arch = "x86_64")]
        "illegal" => {
            // SAFETY: deliberately executes ud2, the handler takes over.
            unsafe { core::arch::asm!("ud2") };
            0
        }
        _ => read_through(core::hint::black_box(core::ptr::null())),
    }
}

fn main() -> Result<(), Report> {
    tracing_subscriber::fmt().with_target(false).init();

    let config = CrashConfig::new_from_env().acknowledge(true);
    let registration = CrashGuard::with_config(config)
        .notifier(ConsoleNotifier::new().acknowledge(true))
        .initialize()
        .context("Failed to install the crash handler")?;
    tracing::info!(id = registration.id(), "crash handler ready");

    let kind = std::env::args().nth(1).unwrap_or_else(|| "null".to_owned());
    let value = update_world(&kind);

    println!("survived with {value}");
    CrashGuard::uninstall(registration);
    Ok(())
}
