//! The user-facing crash notice.

use core::fmt;
use std::{
    io::{self, BufRead, IsTerminal, Write},
    path::PathBuf,
};

use rootcause::{Report, prelude::ResultExt};

use crate::report::{CrashReport, PlainTextFormatter, ReportFormatter};

/// The fixed message shown when the full notice cannot be produced.
pub const MINIMAL_NOTICE: &str =
    "The application encountered a fatal error and must close. No further details are available.";

/// Failure to present a notice.
#[derive(Copy, Clone, Debug)]
pub struct NotifyError;

impl fmt::Display for NotifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Could not present the crash notice")
    }
}

impl core::error::Error for NotifyError {}

/// What the user is told about a fatal fault.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notice {
    /// The fault in human terms, e.g. `Access Violation (..., 0xC0000005)`.
    pub fault: String,
    /// The faulting address, formatted.
    pub address: String,
    /// Function of the faulting frame, when it was resolved.
    pub function: Option<String>,
    /// Instruction, stack and frame pointer, when known.
    pub registers: Option<String>,
    /// Where the report was written, if it was.
    pub report_path: Option<PathBuf>,
    /// The full rendered report, when it could not be written. Shown in
    /// place of the file so the stack trace and modules are not lost.
    pub report_text: Option<String>,
}

impl Notice {
    /// Builds the notice for a report, rendering an unsaved report with
    /// [`PlainTextFormatter::DEFAULT`].
    pub fn from_report(report: &CrashReport) -> Self {
        Self::with_formatter(report, &PlainTextFormatter::DEFAULT)
    }

    /// Builds the notice for a report, rendering an unsaved report with
    /// `formatter`.
    pub fn with_formatter(report: &CrashReport, formatter: &dyn ReportFormatter) -> Self {
        let function = report
            .frames
            .first()
            .and_then(|frame| frame.symbol.as_ref())
            .map(|symbol| short_function_name(&symbol.name).to_owned());

        Self {
            fault: report.description.clone(),
            address: format!("0x{:X}", report.event.address),
            function,
            registers: report
                .event
                .registers
                .as_ref()
                .map(|registers| registers.condensed().to_string()),
            report_path: report.report_path.clone(),
            report_text: report
                .report_path
                .is_none()
                .then(|| report.format_with(formatter).to_string()),
        }
    }
}

/// The last segment of a demangled path, for the one-line notice.
///
/// Separators inside `<...>` (trait impls, generic arguments) do not count,
/// a trailing turbofish stays attached to its function, and a closure keeps
/// the name of the function it was defined in.
///
/// ```
/// use faultward::notify::short_function_name;
///
/// assert_eq!(short_function_name("game::world::update"), "update");
/// assert_eq!(
///     short_function_name("<game::Tick as core::ops::FnOnce<()>>::call_once"),
///     "call_once"
/// );
/// assert_eq!(short_function_name("game::run::{{closure}}"), "run::{{closure}}");
/// ```
pub fn short_function_name(path: &str) -> &str {
    let mut depth = 0usize;
    let mut previous = 0;
    let mut last = 0;
    let mut after_dash = false;

    for (i, c) in path.char_indices() {
        match c {
            '<' => depth += 1,
            // `->` in a function pointer type is not a closing bracket.
            '>' if !after_dash => depth = depth.saturating_sub(1),
            ':' if depth == 0 && path[i + 1..].starts_with(':') && !path[i + 2..].starts_with('<') => {
                previous = last;
                last = i + 2;
            }
            _ => {}
        }
        after_dash = c == '-';
    }

    if path[last..].starts_with("{{") {
        &path[previous..]
    } else {
        &path[last..]
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "The application has crashed and must close.")?;
        writeln!(f)?;
        writeln!(f, "  {}", self.fault)?;
        match &self.function {
            Some(function) => writeln!(f, "  at {} in {function}", self.address)?,
            None => writeln!(f, "  at {}", self.address)?,
        }
        if let Some(registers) = &self.registers {
            writeln!(f, "  {registers}")?;
        }
        writeln!(f)?;
        match &self.report_path {
            Some(path) => {
                writeln!(f, "A crash report was saved to:")?;
                writeln!(f, "  {}", path.display())?;
                writeln!(f, "Please send this file to the developers.")
            }
            None => {
                writeln!(f, "The crash report could not be saved.")?;
                match &self.report_text {
                    Some(text) => write!(f, "\n{text}"),
                    None => Ok(()),
                }
            }
        }
    }
}

/// Presents crash notices to the user.
///
/// Called right before termination while the faulting thread is suspended,
/// so implementations must not wait on other application threads.
pub trait Notifier: 'static + Send + Sync + fmt::Debug {
    /// Shows the full notice and returns once the user has acknowledged it,
    /// or immediately when no interactive surface is available.
    fn notify(&self, notice: &Notice) -> Result<(), Report<NotifyError>>;

    /// Shows [`MINIMAL_NOTICE`]. Must not fail.
    fn notify_minimal(&self) {
        let _ = writeln!(io::stderr(), "{MINIMAL_NOTICE}");
    }
}

/// Writes notices to standard error.
///
/// With `acknowledge` set and an interactive standard input, waits for the
/// user to press Enter before returning.
#[derive(Copy, Clone, Debug, Default)]
pub struct ConsoleNotifier {
    /// Wait for Enter after printing.
    pub acknowledge: bool,
}

impl ConsoleNotifier {
    /// A notifier that prints and returns.
    pub const fn new() -> Self {
        Self { acknowledge: false }
    }

    /// Sets whether to wait for the user.
    #[must_use]
    pub const fn acknowledge(mut self, acknowledge: bool) -> Self {
        self.acknowledge = acknowledge;
        self
    }
}

impl Notifier for ConsoleNotifier {
    fn notify(&self, notice: &Notice) -> Result<(), Report<NotifyError>> {
        let mut stderr = io::stderr().lock();
        write!(stderr, "\n{notice}")
            .and_then(|()| stderr.flush())
            .context(NotifyError)?;

        let stdin = io::stdin();
        if self.acknowledge && stdin.is_terminal() {
            write!(stderr, "Press Enter to exit.")
                .and_then(|()| stderr.flush())
                .context(NotifyError)?;
            let mut line = String::new();
            stdin.lock().read_line(&mut line).context(NotifyError)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ExceptionCode, FaultEvent,
        capture::{Capture, FrameSymbol, StackFrame},
        registers::{Arch64Registers, RegisterSet},
    };

    static_assertions::assert_impl_all!(ConsoleNotifier: Send, Sync);
    static_assertions::assert_impl_all!(Notice: Send, Sync);

    fn report(path: Option<&str>) -> CrashReport {
        let event = FaultEvent::now(ExceptionCode::ACCESS_VIOLATION, 0xBAD, 3).with_registers(
            RegisterSet::Arch64(Arch64Registers {
                rip: 0x1000,
                rsp: 0x2000,
                rbp: 0x3000,
                ..Default::default()
            }),
        );
        let capture = Capture {
            frames: vec![StackFrame {
                index: 0,
                address: 0x1000,
                module: "game".into(),
                symbol: Some(FrameSymbol {
                    name: "game::world::update".into(),
                    offset: Some(4),
                }),
                source: None,
            }],
            ..Capture::default()
        };
        let mut report = CrashReport::new(event, capture, Vec::new());
        report.report_path = path.map(PathBuf::from);
        report
    }

    #[test]
    fn notice_names_fault_and_report() {
        let notice = Notice::from_report(&report(Some("/tmp/crash_report_20240101_000000.txt")));
        assert_eq!(notice.function.as_deref(), Some("update"));
        let text = notice.to_string();
        assert!(text.contains("Access Violation"));
        assert!(text.contains("at 0xBAD in update"));
        assert!(text.contains("RIP=0x0000000000001000"));
        assert!(text.contains("/tmp/crash_report_20240101_000000.txt"));
        assert!(text.contains("Please send this file"));
    }

    #[test]
    fn notice_without_report_says_so() {
        let notice = Notice::from_report(&report(None));
        let text = notice.to_string();
        assert!(text.contains("could not be saved"));
        assert!(text.contains("game::world::update+0x4"), "{text}");
        assert!(notice.report_text.is_some_and(|report| report.contains("--- Stack Trace")));
    }

    #[test]
    fn saved_report_is_not_repeated() {
        let notice = Notice::from_report(&report(Some("/tmp/crash_report_20240101_000000.txt")));
        assert!(notice.report_text.is_none());
        assert!(!notice.to_string().contains("--- Stack Trace"));
    }

    #[test]
    fn function_names_ignore_generics() {
        assert_eq!(short_function_name("main"), "main");
        assert_eq!(short_function_name("game::Pool<T>::spawn"), "spawn");
        assert_eq!(short_function_name("game::spawn::<u32>"), "spawn::<u32>");
        assert_eq!(short_function_name("<fn() -> u8 as game::Job>::run"), "run");
        assert_eq!(
            short_function_name("game::main::{{closure}}::{{closure}}"),
            "{{closure}}::{{closure}}"
        );
    }

    #[test]
    fn console_notifier_without_acknowledge_returns() {
        let notice = Notice::from_report(&report(None));
        ConsoleNotifier::new().notify(&notice).unwrap();
    }
}
