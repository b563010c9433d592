//! The crash report: what is known about a fatal fault, and how it is
//! rendered and persisted.

mod formatter;
mod writer;

use core::fmt;
use std::path::PathBuf;

pub use self::{
    formatter::{PlainTextFormatter, ReportFormatter},
    writer::{ReportWriteError, ReportWriter},
};
use crate::{
    capture::{Capture, ModuleMap, StackFrame},
    fault::FaultEvent,
    telemetry::EnvironmentEntry,
};

/// Everything collected for one fatal fault.
#[derive(Clone, Debug)]
pub struct CrashReport {
    /// The fault delivery.
    pub event: FaultEvent,
    /// Human-readable description of the fault code.
    pub description: String,
    /// Stack trace, innermost first.
    pub frames: Vec<StackFrame>,
    /// Loaded modules.
    pub modules: ModuleMap,
    /// Optional environment context.
    pub environment: Vec<EnvironmentEntry>,
    /// Where the report was written, once it has been.
    pub report_path: Option<PathBuf>,
}

impl CrashReport {
    /// Assembles a report from a fault and its capture.
    pub fn new(event: FaultEvent, capture: Capture, environment: Vec<EnvironmentEntry>) -> Self {
        Self {
            description: event.code.to_string(),
            event,
            frames: capture.frames,
            modules: capture.modules,
            environment,
            report_path: None,
        }
    }

    /// Paths of the loaded modules, in enumeration order.
    pub fn module_paths(&self) -> impl Iterator<Item = &str> {
        self.modules.modules().iter().map(|module| module.path.as_str())
    }

    /// Renders the report with `formatter`.
    ///
    /// ```
    /// use faultward::{
    ///     ExceptionCode, FaultEvent,
    ///     capture::Capture,
    ///     report::{CrashReport, PlainTextFormatter},
    /// };
    ///
    /// let event = FaultEvent::now(ExceptionCode::ACCESS_VIOLATION, 0x10, 1);
    /// let report = CrashReport::new(event, Capture::default(), Vec::new());
    /// let text = report.format_with(&PlainTextFormatter::DEFAULT).to_string();
    /// assert!(text.contains("Access Violation"));
    /// ```
    pub fn format_with<'a>(&'a self, formatter: &'a dyn ReportFormatter) -> impl fmt::Display + 'a {
        FormattedReport {
            report: self,
            formatter,
        }
    }
}

impl fmt::Display for CrashReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        PlainTextFormatter::DEFAULT.format_report(self, f)
    }
}

struct FormattedReport<'a> {
    report: &'a CrashReport,
    formatter: &'a dyn ReportFormatter,
}

impl fmt::Display for FormattedReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.formatter.format_report(self.report, f)
    }
}
