//! The fault-handling pipeline, independent of how faults are delivered.
//!
//! A backend turns an OS delivery into a [`FaultEvent`] and a
//! [`ProcessView`], calls [`CrashHandler::handle`], and acts on the
//! returned [`Disposition`]. Everything in between runs on whichever thread
//! the backend calls from; the Linux backend uses a dedicated handler
//! thread while the faulting thread waits.

use core::{
    fmt,
    sync::atomic::{AtomicBool, Ordering},
};
use std::{
    io::Write,
    panic::{AssertUnwindSafe, catch_unwind},
    path::PathBuf,
};

use crate::{
    capture::{DiagnosticCapture, ProcessView, StackUnwinder, SymbolResolver},
    classify::{Classification, classify},
    config::CrashConfig,
    fault::FaultEvent,
    noise::{NoiseFilter, NoiseVerdict},
    notify::{ConsoleNotifier, MINIMAL_NOTICE, Notice, Notifier},
    report::{CrashReport, PlainTextFormatter, ReportFormatter, ReportWriter},
    telemetry::EnvironmentProbe,
};

/// Exit status of every fatal-path termination.
pub const FATAL_EXIT_CODE: i32 = 1;

/// What the backend should do with a delivery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// Not ours: resume, or pass the fault to the next handler.
    ContinueSearch,
    /// Handled: terminate the process with `exit_code`.
    ExecuteHandler {
        /// Always [`FATAL_EXIT_CODE`].
        exit_code: i32,
        /// Where the report was written, if it was.
        report_path: Option<PathBuf>,
    },
}

impl Disposition {
    fn fatal(report_path: Option<PathBuf>) -> Self {
        Self::ExecuteHandler {
            exit_code: FATAL_EXIT_CODE,
            report_path,
        }
    }

    /// The exit status to terminate with, if any.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::ContinueSearch => None,
            Self::ExecuteHandler { exit_code, .. } => Some(*exit_code),
        }
    }
}

/// Decides on, and reports, fault deliveries.
pub struct CrashHandler {
    config: CrashConfig,
    writer: ReportWriter,
    filter: spin::Mutex<NoiseFilter>,
    handling: AtomicBool,
    notifier: Box<dyn Notifier>,
    symbolizer: Option<Box<dyn SymbolResolver>>,
    unwinder: Option<Box<dyn StackUnwinder>>,
    formatter: Box<dyn ReportFormatter>,
    probe: Option<Box<dyn EnvironmentProbe>>,
}

impl CrashHandler {
    /// A handler with the default collaborators for `config`.
    ///
    /// Defaults: [`ConsoleNotifier`], [`PlainTextFormatter::DEFAULT`], and,
    /// with the `backtrace` feature, the `backtrace`-based symbolizer and
    /// fallback unwinder. On Linux the environment section comes from
    /// [`ProcStatusProbe`](crate::telemetry::ProcStatusProbe).
    pub fn new(config: CrashConfig) -> Self {
        #[cfg(feature = "backtrace")]
        let (symbolizer, unwinder): (Option<Box<dyn SymbolResolver>>, Option<Box<dyn StackUnwinder>>) = (
            Some(Box::new(crate::capture::backtrace::BacktraceSymbolizer::new_from_env())),
            Some(Box::new(crate::capture::backtrace::BacktraceUnwinder)),
        );
        #[cfg(not(feature = "backtrace"))]
        let (symbolizer, unwinder) = (None, None);

        #[cfg(target_os = "linux")]
        let probe: Option<Box<dyn EnvironmentProbe>> = Some(Box::new(crate::telemetry::ProcStatusProbe));
        #[cfg(not(target_os = "linux"))]
        let probe = None;

        Self {
            writer: config.writer(),
            filter: spin::Mutex::new(NoiseFilter::new(config.denylist())),
            handling: AtomicBool::new(false),
            notifier: Box::new(ConsoleNotifier::new().acknowledge(config.acknowledge)),
            symbolizer,
            unwinder,
            formatter: Box::new(PlainTextFormatter::DEFAULT),
            probe,
            config,
        }
    }

    /// Replaces the notifier.
    #[must_use]
    pub fn notifier(mut self, notifier: impl Notifier) -> Self {
        self.notifier = Box::new(notifier);
        self
    }

    /// Replaces the symbol resolver.
    #[must_use]
    pub fn symbolizer(mut self, symbolizer: impl SymbolResolver) -> Self {
        self.symbolizer = Some(Box::new(symbolizer));
        self
    }

    /// Reports raw addresses only.
    #[must_use]
    pub fn without_symbolizer(mut self) -> Self {
        self.symbolizer = None;
        self
    }

    /// Replaces the fallback unwinder.
    #[must_use]
    pub fn unwinder(mut self, unwinder: impl StackUnwinder) -> Self {
        self.unwinder = Some(Box::new(unwinder));
        self
    }

    /// Relies on the frame-pointer walk alone.
    #[must_use]
    pub fn without_unwinder(mut self) -> Self {
        self.unwinder = None;
        self
    }

    /// Replaces the report layout.
    #[must_use]
    pub fn formatter(mut self, formatter: impl ReportFormatter) -> Self {
        self.formatter = Box::new(formatter);
        self
    }

    /// Replaces the environment probe.
    #[must_use]
    pub fn probe(mut self, probe: impl EnvironmentProbe) -> Self {
        self.probe = Some(Box::new(probe));
        self
    }

    /// Omits the environment section.
    #[must_use]
    pub fn without_probe(mut self) -> Self {
        self.probe = None;
        self
    }

    /// The configuration the handler was built from.
    pub fn config(&self) -> &CrashConfig {
        &self.config
    }

    /// Whether a fatal fault is being, or has been, handled.
    pub fn is_handling(&self) -> bool {
        self.handling.load(Ordering::Acquire)
    }

    /// Handles one fault delivery.
    ///
    /// Suppressed deliveries return [`Disposition::ContinueSearch`] without
    /// side effects beyond the debounce state. Fatal ones are captured,
    /// written and shown to the user, and always return
    /// [`Disposition::ExecuteHandler`]. A delivery that arrives while
    /// another is being handled skips straight to the minimal notice.
    pub fn handle(&self, event: &FaultEvent, view: &dyn ProcessView) -> Disposition {
        if self
            .handling
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.notify_minimal();
            return Disposition::fatal(None);
        }

        if self.is_noise(event, view) {
            self.handling.store(false, Ordering::Release);
            return Disposition::ContinueSearch;
        }

        match classify(event.code) {
            Classification::Suppress => {
                tracing::debug!(code = ?event.code, "fault code is not fatal");
                self.handling.store(false, Ordering::Release);
                Disposition::ContinueSearch
            }
            Classification::Fatal => self.handle_fatal(event, view),
        }
    }

    fn is_noise(&self, event: &FaultEvent, view: &dyn ProcessView) -> bool {
        let Some(mut filter) = self.filter.try_lock() else {
            return false;
        };
        let origin = event.instruction_pointer().unwrap_or(event.address);
        let verdict = filter.evaluate(event.code, event.monotonic, || {
            catch_unwind(AssertUnwindSafe(|| view.module_at(origin))).unwrap_or(None)
        });
        match &verdict {
            NoiseVerdict::Debounced { elapsed } => {
                tracing::debug!(code = ?event.code, ?elapsed, "fault suppressed inside debounce window");
            }
            NoiseVerdict::SystemModule { module } => {
                tracing::debug!(code = ?event.code, %module, "fault suppressed in system module");
            }
            NoiseVerdict::PassThrough => {}
        }
        verdict.is_suppressed()
    }

    fn handle_fatal(&self, event: &FaultEvent, view: &dyn ProcessView) -> Disposition {
        tracing::error!(
            code = ?event.code,
            address = format_args!("0x{:X}", event.address),
            thread = event.thread_id,
            "fatal fault"
        );

        let report = match catch_unwind(AssertUnwindSafe(|| self.build_report(event, view))) {
            Ok(report) => report,
            Err(_) => {
                self.notify_minimal();
                return Disposition::fatal(None);
            }
        };

        let shown = catch_unwind(AssertUnwindSafe(|| {
            self.notifier
                .notify(&Notice::with_formatter(&report, &*self.formatter))
        }));
        match shown {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                tracing::error!(%error, "crash notice failed");
                self.notify_minimal();
            }
            Err(_) => self.notify_minimal(),
        }

        Disposition::fatal(report.report_path)
    }

    fn build_report(&self, event: &FaultEvent, view: &dyn ProcessView) -> CrashReport {
        let capture = DiagnosticCapture::new()
            .symbolizer(self.symbolizer.as_deref())
            .unwinder(self.unwinder.as_deref())
            .capture(event, view);

        let environment = self
            .probe
            .as_ref()
            .and_then(|probe| catch_unwind(AssertUnwindSafe(|| probe.probe())).ok())
            .unwrap_or_default();

        let mut report = CrashReport::new(*event, capture, environment);
        if let Err(error) = self.writer.write(&mut report, &*self.formatter) {
            tracing::error!(%error, "crash report was not written");
        }
        report
    }

    fn notify_minimal(&self) {
        if catch_unwind(AssertUnwindSafe(|| self.notifier.notify_minimal())).is_err() {
            let _ = writeln!(std::io::stderr(), "{MINIMAL_NOTICE}");
        }
    }
}

impl fmt::Debug for CrashHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrashHandler")
            .field("config", &self.config)
            .field("handling", &self.is_handling())
            .field("notifier", &self.notifier)
            .field("symbolizer", &self.symbolizer)
            .field("unwinder", &self.unwinder)
            .field("formatter", &self.formatter)
            .field("probe", &self.probe)
            .finish_non_exhaustive()
    }
}
