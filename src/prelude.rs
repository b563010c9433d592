//! Commonly used items for convenient importing.
//!
//! # Usage
//!
//! ```no_run
//! use faultward::prelude::*;
//!
//! let registration = CrashGuard::with_config(CrashConfig::DEFAULT.report_dir("crashes"))
//!     .notifier(ConsoleNotifier::new())
//!     .initialize();
//! # let _ = registration;
//! ```

pub use crate::{
    CrashConfig, CrashGuard, CrashHandler, CrashReport, Disposition, ExceptionCode, FaultEvent,
    HandlerRegistration,
    capture::{ProcessView, StackUnwinder, SymbolResolver},
    notify::{ConsoleNotifier, Notice, Notifier},
    report::ReportFormatter,
    telemetry::EnvironmentProbe,
};
