#![deny(
    missing_docs,
    clippy::missing_safety_doc,
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    clippy::as_ptr_cast_mut,
    clippy::ptr_as_ptr,
    rustdoc::invalid_rust_codeblocks,
    rustdoc::broken_intra_doc_links,
    missing_copy_implementations,
    unused_doc_comments
)]
// Make docs.rs generate better docs
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Process-wide fault interception with classified, symbolized crash
//! reports.
//!
//! ## Overview
//!
//! faultward installs a single hook at the front of the process's fault
//! delivery chain. Every hardware fault or raised exception passes through
//! it, and each one gets exactly one of two outcomes:
//!
//! - **Suppressed**: benign or expected codes (debugger output, breakpoints,
//!   guard pages, known-noisy system components) are handed back so the
//!   process, or the next handler in the chain, can carry on.
//! - **Fatal**: memory-safety violations, arithmetic faults, illegal
//!   instructions and the like are captured, written to a crash report,
//!   shown to the user and end the process with exit code
//!   [`FATAL_EXIT_CODE`].
//!
//! Which codes are fatal is decided in one place, [`classify()`], and an
//! unrecognized code is never fatal.
//!
//! ## Quick Example
//!
//! ```no_run
//! fn main() {
//!     let _ = faultward::initialize();
//!
//!     // ... run the application ...
//!
//!     faultward::cleanup();
//! }
//! ```
//!
//! [`CrashGuard`] gives full control over where reports go, how they are
//! laid out, how frames are symbolized and how the user is told.
//!
//! ## What a report contains
//!
//! A [`CrashReport`] holds the fault code and its description, the faulting
//! address, thread and process ids, the register context when the platform
//! supplied one, up to 32 stack frames with module and symbol information,
//! an optional environment snapshot and up to 1024 loaded modules. It is
//! written to `crash_report_YYYYMMDD_HHMMSS.txt` in the configured
//! directory.
//!
//! Everything on the fatal path degrades instead of failing: a frame that
//! cannot be symbolized is reported as a raw address, a report that cannot
//! be written still produces a notice, and a notice that cannot be shown
//! falls back to a fixed minimal message. The process still terminates.
//!
//! ## Platforms
//!
//! Fault delivery is implemented for Linux through POSIX signals. The
//! signal handler only records the fault and wakes a handler thread started
//! by [`initialize`]; the report is built there, on a stack large enough for
//! symbolization, while the faulting thread waits. On other
//! targets [`initialize`] returns [`InitializeError::Unsupported`]; the
//! classification, capture and reporting pipeline is still available and
//! can be driven through [`CrashHandler::handle`].
//!
//! ## Logging
//!
//! Installation, removal, suppression decisions and report writes are
//! logged through [`tracing`]. Nothing is logged from inside the fault
//! callback before classification has decided the fault is fatal.

pub mod capture;
pub mod classify;
pub mod code;
pub mod config;
pub mod fault;
pub mod handler;
pub mod hooks;
pub mod noise;
pub mod notify;
mod platform;
pub mod prelude;
pub mod registers;
pub mod report;
pub mod telemetry;

#[cfg(target_os = "linux")]
pub use self::platform::LiveProcess;
pub use self::{
    classify::{Classification, classify},
    code::ExceptionCode,
    config::CrashConfig,
    fault::FaultEvent,
    handler::{CrashHandler, Disposition, FATAL_EXIT_CODE},
    hooks::{CrashGuard, HandlerRegistration, InitializeError},
    report::CrashReport,
};

/// Installs a crash handler configured from the environment.
///
/// Shorthand for `CrashGuard::new().initialize()`.
pub fn initialize() -> Result<HandlerRegistration, rootcause::Report<InitializeError>> {
    CrashGuard::new().initialize()
}

/// Removes the most recent crash handler. No-op when none is installed.
pub fn cleanup() {
    CrashGuard::cleanup();
}
