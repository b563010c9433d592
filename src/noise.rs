//! Heuristic suppression of fault deliveries that are not real crashes.
//!
//! Privilege-elevation prompts and similar OS-mediated flows can surface as
//! access-violation, guard-page or breakpoint deliveries raised from inside
//! core loader or kernel modules. The filter runs before [`classify`]:
//!
//! 1. Within [`DEBOUNCE_WINDOW`] of the last denylist match, every delivery
//!    is suppressed.
//! 2. Otherwise, for the three codes above, the module owning the fault
//!    address is compared (case-insensitively) against a
//!    [`SystemModuleDenylist`]. A match suppresses the delivery and anchors a
//!    new debounce window.
//! 3. Everything else falls through to ordinary classification.
//!
//! # Known limitations
//!
//! This is a heuristic. A genuine fault inside a denylisted module is
//! suppressed (false positive), and prompt noise whose address resolves
//! outside the denylist is classified normally (false negative). Both are
//! accepted trade-offs.
//!
//! [`classify`]: crate::classify::classify

use std::{borrow::Cow, time::Duration, time::Instant};

use crate::code::ExceptionCode;

/// Length of the window during which all deliveries are suppressed after a
/// denylist match.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(3000);

/// The fault codes that elevation-prompt noise is known to masquerade as.
pub const NOISE_CANDIDATE_CODES: &[ExceptionCode] = &[
    ExceptionCode::ACCESS_VIOLATION,
    ExceptionCode::GUARD_PAGE,
    ExceptionCode::BREAKPOINT,
];

/// Ordered list of module path substrings treated as core system modules.
///
/// Matching is a case-insensitive substring test against the full module
/// path, so entries may name a file (`ntdll.dll`) or a directory
/// (`\windows\system32\`).
///
/// # Examples
///
/// ```
/// use faultward::noise::SystemModuleDenylist;
///
/// let denylist = SystemModuleDenylist::default().with_entry("libsteam_api.so");
/// assert!(denylist.matches(r"C:\Windows\System32\NTDLL.DLL"));
/// assert!(denylist.matches("/usr/lib/x86_64-linux-gnu/ld-linux-x86-64.so.2"));
/// assert!(denylist.matches("/opt/game/libsteam_api.so"));
/// assert!(!denylist.matches("/opt/game/libgame.so"));
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SystemModuleDenylist {
    entries: Vec<Cow<'static, str>>,
}

impl SystemModuleDenylist {
    /// Loader and kernel modules recognized out of the box.
    pub const DEFAULT_ENTRIES: &'static [&'static str] = &[
        "ntdll.dll",
        "kernel32.dll",
        "kernelbase.dll",
        "\\windows\\system32\\",
        "\\windows\\syswow64\\",
        "/ld-linux",
        "/ld-musl",
        "linux-vdso.so",
        "linux-gate.so",
        "[vdso]",
    ];

    /// An empty denylist; nothing is ever matched.
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Appends an entry after the existing ones.
    #[must_use]
    pub fn with_entry(mut self, entry: impl Into<Cow<'static, str>>) -> Self {
        let entry = entry.into();
        if !entry.is_empty() {
            self.entries.push(Cow::Owned(entry.to_ascii_lowercase()));
        }
        self
    }

    /// The entries in match order.
    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| &**entry)
    }

    /// Returns the first entry contained in `module_path`, if any.
    pub fn find_match(&self, module_path: &str) -> Option<&str> {
        let path = module_path.to_ascii_lowercase();
        self.entries()
            .find(|entry| path.contains(entry))
    }

    /// Whether `module_path` names a denylisted module.
    pub fn matches(&self, module_path: &str) -> bool {
        self.find_match(module_path).is_some()
    }
}

impl Default for SystemModuleDenylist {
    fn default() -> Self {
        Self {
            entries: Self::DEFAULT_ENTRIES
                .iter()
                .map(|&entry| Cow::Borrowed(entry))
                .collect(),
        }
    }
}

/// Why a delivery was suppressed by the filter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NoiseVerdict {
    /// Inside the debounce window of an earlier match.
    Debounced {
        /// Time since the debounce anchor.
        elapsed: Duration,
    },
    /// The fault address belongs to a denylisted module.
    SystemModule {
        /// Path of the owning module.
        module: String,
    },
    /// The filter has no opinion; classify normally.
    PassThrough,
}

impl NoiseVerdict {
    /// Whether the delivery must be suppressed.
    pub fn is_suppressed(&self) -> bool {
        !matches!(self, Self::PassThrough)
    }
}

/// Debounce state of the filter; one per installed handler.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoiseFilterState {
    last_suppressed: Option<Instant>,
}

impl NoiseFilterState {
    /// Monotonic time of the last denylist match.
    pub fn last_suppressed(&self) -> Option<Instant> {
        self.last_suppressed
    }
}

/// The elevation-prompt noise filter.
#[derive(Clone, Debug, Default)]
pub struct NoiseFilter {
    denylist: SystemModuleDenylist,
    state: NoiseFilterState,
}

impl NoiseFilter {
    /// Creates a filter with the given denylist and no debounce anchor.
    pub fn new(denylist: SystemModuleDenylist) -> Self {
        Self {
            denylist,
            state: NoiseFilterState::default(),
        }
    }

    /// The denylist in use.
    pub fn denylist(&self) -> &SystemModuleDenylist {
        &self.denylist
    }

    /// The debounce state.
    pub fn state(&self) -> &NoiseFilterState {
        &self.state
    }

    /// Evaluates one delivery.
    ///
    /// `owning_module` is only called for the candidate codes, so callers
    /// can pass an expensive address-to-module lookup.
    pub fn evaluate<F>(&mut self, code: ExceptionCode, now: Instant, owning_module: F) -> NoiseVerdict
    where
        F: FnOnce() -> Option<String>,
    {
        if let Some(anchor) = self.state.last_suppressed {
            let elapsed = now.saturating_duration_since(anchor);
            if elapsed < DEBOUNCE_WINDOW {
                return NoiseVerdict::Debounced { elapsed };
            }
        }

        if !NOISE_CANDIDATE_CODES.contains(&code) {
            return NoiseVerdict::PassThrough;
        }

        match owning_module() {
            Some(module) if self.denylist.matches(&module) => {
                self.state.last_suppressed = Some(now);
                NoiseVerdict::SystemModule { module }
            }
            _ => NoiseVerdict::PassThrough,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NTDLL: &str = r"C:\Windows\System32\ntdll.dll";

    #[test]
    fn denylisted_faults_debounce_across_repeats() {
        let mut filter = NoiseFilter::default();
        let t0 = Instant::now();

        let first = filter.evaluate(ExceptionCode::ACCESS_VIOLATION, t0, || Some(NTDLL.into()));
        assert_eq!(
            first,
            NoiseVerdict::SystemModule {
                module: NTDLL.into()
            }
        );

        let second = filter.evaluate(
            ExceptionCode::ACCESS_VIOLATION,
            t0 + Duration::from_millis(2999),
            || Some(NTDLL.into()),
        );
        assert!(second.is_suppressed());
        assert!(matches!(second, NoiseVerdict::Debounced { .. }));
    }

    #[test]
    fn debounce_suppresses_any_code_without_lookup() {
        let mut filter = NoiseFilter::default();
        let t0 = Instant::now();
        filter.evaluate(ExceptionCode::BREAKPOINT, t0, || Some(NTDLL.into()));

        let verdict = filter.evaluate(
            ExceptionCode::INT_DIVIDE_BY_ZERO,
            t0 + Duration::from_millis(10),
            || panic!("module lookup must not run inside the window"),
        );
        assert_eq!(
            verdict,
            NoiseVerdict::Debounced {
                elapsed: Duration::from_millis(10)
            }
        );
    }

    #[test]
    fn debounce_does_not_move_the_anchor() {
        let mut filter = NoiseFilter::default();
        let t0 = Instant::now();
        filter.evaluate(ExceptionCode::GUARD_PAGE, t0, || Some(NTDLL.into()));
        filter.evaluate(
            ExceptionCode::ACCESS_VIOLATION,
            t0 + Duration::from_millis(2000),
            || None,
        );
        assert_eq!(filter.state().last_suppressed(), Some(t0));

        let after = filter.evaluate(
            ExceptionCode::ACCESS_VIOLATION,
            t0 + Duration::from_millis(3000),
            || Some("/opt/game/libgame.so".into()),
        );
        assert_eq!(after, NoiseVerdict::PassThrough);
    }

    #[test]
    fn foreign_module_passes_through() {
        let mut filter = NoiseFilter::default();
        let verdict = filter.evaluate(ExceptionCode::ACCESS_VIOLATION, Instant::now(), || {
            Some("/opt/game/bin/game".into())
        });
        assert_eq!(verdict, NoiseVerdict::PassThrough);
        assert_eq!(filter.state().last_suppressed(), None);
    }

    #[test]
    fn non_candidate_codes_skip_module_lookup() {
        let mut filter = NoiseFilter::default();
        let verdict = filter.evaluate(ExceptionCode::STACK_OVERFLOW, Instant::now(), || {
            panic!("lookup is only for candidate codes")
        });
        assert_eq!(verdict, NoiseVerdict::PassThrough);
    }

    #[test]
    fn unknown_module_passes_through() {
        let mut filter = NoiseFilter::default();
        let verdict = filter.evaluate(ExceptionCode::BREAKPOINT, Instant::now(), || None);
        assert_eq!(verdict, NoiseVerdict::PassThrough);
    }

    #[test]
    fn denylist_is_case_insensitive_and_ordered() {
        let denylist = SystemModuleDenylist::empty()
            .with_entry("KernelBase.dll")
            .with_entry("\\windows\\");
        assert_eq!(
            denylist.find_match(r"C:\WINDOWS\System32\KERNELBASE.dll"),
            Some("kernelbase.dll")
        );
        assert_eq!(denylist.find_match(r"C:\Windows\explorer.exe"), Some("\\windows\\"));
        assert!(!SystemModuleDenylist::empty().matches(NTDLL));
    }
}
