//! Installation and removal of the process-wide fault hook.
//!
//! The active [`CrashHandler`]s live in a single process-wide slot. The OS
//! hook is installed with the first registration and removed with the
//! last; in between, the most recent registration handles every delivery.
//!
//! # Examples
//!
//! ```no_run
//! use faultward::{CrashConfig, CrashGuard, notify::ConsoleNotifier};
//!
//! let registration = CrashGuard::with_config(CrashConfig::DEFAULT.report_dir("/var/crash"))
//!     .notifier(ConsoleNotifier::new().acknowledge(true))
//!     .initialize()
//!     .expect("failed to install the crash handler");
//!
//! // ... run the application ...
//!
//! CrashGuard::uninstall(registration);
//! ```

mod hook_lock;

use core::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use rootcause::Report;

use self::hook_lock::HookLock;
use crate::{
    capture::{StackUnwinder, SymbolResolver},
    config::CrashConfig,
    handler::CrashHandler,
    notify::Notifier,
    platform,
    report::ReportFormatter,
    telemetry::EnvironmentProbe,
};

static ACTIVE: HookLock<Registry> = HookLock::new();
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Default)]
struct Registry {
    entries: Vec<(HandlerRegistration, CrashHandler)>,
}

/// Token for one successful [`CrashGuard::initialize`].
///
/// Pass it to [`CrashGuard::uninstall`] to remove exactly this
/// registration. Removing it twice is a no-op.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct HandlerRegistration {
    id: u64,
}

impl HandlerRegistration {
    /// Process-unique, never zero.
    pub fn id(self) -> u64 {
        self.id
    }
}

/// Failure to install the fault hook.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InitializeError {
    /// No fault-delivery backend exists for this target.
    Unsupported,
    /// The OS refused the handler for a signal.
    InstallSignalHandler {
        /// Name of the signal.
        signal: &'static str,
    },
    /// The alternate signal stack could not be installed.
    AlternateStack,
    /// The thread that runs the handler pipeline could not be started.
    HandlerThread,
}

impl fmt::Display for InitializeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsupported => write!(f, "crash handling is not supported on this platform"),
            Self::InstallSignalHandler { signal } => {
                write!(f, "could not install the crash handler for {signal}")
            }
            Self::AlternateStack => write!(f, "could not install the alternate signal stack"),
            Self::HandlerThread => write!(f, "could not start the crash handler thread"),
        }
    }
}

impl core::error::Error for InitializeError {}

/// Builder for, and owner of, the process-wide crash handler.
#[derive(Debug)]
pub struct CrashGuard {
    handler: CrashHandler,
}

impl CrashGuard {
    /// A guard configured from the environment, see
    /// [`CrashConfig::new_from_env`].
    pub fn new() -> Self {
        Self::with_config(CrashConfig::new_from_env())
    }

    /// A guard with an explicit configuration.
    pub fn with_config(config: CrashConfig) -> Self {
        Self {
            handler: CrashHandler::new(config),
        }
    }

    /// Replaces the notifier.
    #[must_use]
    pub fn notifier(self, notifier: impl Notifier) -> Self {
        Self {
            handler: self.handler.notifier(notifier),
        }
    }

    /// Replaces the symbol resolver.
    #[must_use]
    pub fn symbolizer(self, symbolizer: impl SymbolResolver) -> Self {
        Self {
            handler: self.handler.symbolizer(symbolizer),
        }
    }

    /// Reports raw addresses only.
    #[must_use]
    pub fn without_symbolizer(self) -> Self {
        Self {
            handler: self.handler.without_symbolizer(),
        }
    }

    /// Replaces the fallback unwinder.
    #[must_use]
    pub fn unwinder(self, unwinder: impl StackUnwinder) -> Self {
        Self {
            handler: self.handler.unwinder(unwinder),
        }
    }

    /// Replaces the report layout.
    #[must_use]
    pub fn formatter(self, formatter: impl ReportFormatter) -> Self {
        Self {
            handler: self.handler.formatter(formatter),
        }
    }

    /// Replaces the environment probe.
    #[must_use]
    pub fn probe(self, probe: impl EnvironmentProbe) -> Self {
        Self {
            handler: self.handler.probe(probe),
        }
    }

    /// Omits the environment section.
    #[must_use]
    pub fn without_probe(self) -> Self {
        Self {
            handler: self.handler.without_probe(),
        }
    }

    /// Installs the handler at the front of the fault-delivery chain.
    ///
    /// Calling this again without a matching cleanup leaves two active
    /// registrations; the newer one handles faults. This is logged as a
    /// warning, not rejected.
    pub fn initialize(self) -> Result<HandlerRegistration, Report<InitializeError>> {
        let mut slot = ACTIVE.write();
        let registry = slot.get().get_or_insert_with(Registry::default);

        if registry.entries.is_empty() {
            platform::install()?;
        } else {
            tracing::warn!(
                active = registry.entries.len(),
                "crash handler initialized again without cleanup"
            );
        }

        let registration = HandlerRegistration {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
        };
        registry.entries.push((registration, self.handler));
        tracing::info!(id = registration.id, "crash handler installed");
        Ok(registration)
    }

    /// Removes the most recent registration. No-op when there is none.
    pub fn cleanup() {
        let last = ACTIVE
            .read()
            .get()
            .and_then(|registry| registry.entries.last())
            .map(|(registration, _)| *registration);
        if let Some(registration) = last {
            Self::uninstall(registration);
        }
    }

    /// Removes `registration`. Returns whether it was active.
    pub fn uninstall(registration: HandlerRegistration) -> bool {
        let mut slot = ACTIVE.write();
        let Some(registry) = slot.get().as_mut() else {
            return false;
        };
        let Some(position) = registry
            .entries
            .iter()
            .position(|(active, _)| *active == registration)
        else {
            return false;
        };

        registry.entries.remove(position);
        if registry.entries.is_empty() {
            platform::uninstall();
        }
        tracing::info!(id = registration.id, "crash handler removed");
        true
    }

    /// Removes every registration and the OS hook.
    pub fn cleanup_all() {
        let mut slot = ACTIVE.write();
        if let Some(registry) = slot.get().take()
            && !registry.entries.is_empty()
        {
            platform::uninstall();
            tracing::info!(count = registry.entries.len(), "all crash handlers removed");
        }
    }

    /// Whether any registration is active.
    pub fn is_initialized() -> bool {
        Self::active_registrations() > 0
    }

    /// Number of active registrations.
    pub fn active_registrations() -> usize {
        ACTIVE
            .read()
            .get()
            .map_or(0, |registry| registry.entries.len())
    }
}

impl Default for CrashGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs `f` with the handler of the most recent registration.
///
/// Returns `None` when nothing is registered or the slot is being written,
/// in which case the delivery must be passed on.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
pub(crate) fn with_active_handler<R>(f: impl FnOnce(&CrashHandler) -> R) -> Option<R> {
    let guard = ACTIVE.try_read()?;
    let (_, handler) = guard.get()?.entries.last()?;
    Some(f(handler))
}
