//! Handler configuration.
//!
//! # Environment Variables
//!
//! Read once per process by [`CrashConfig::new_from_env`]:
//!
//! - `FAULTWARD_REPORT_DIR` - Directory for crash reports (default: the
//!   working directory)
//! - `FAULTWARD_ACKNOWLEDGE` - `1` or `true` to wait for the user to
//!   acknowledge the notice before exiting
//! - `FAULTWARD_SYSTEM_MODULES` - Comma-separated module path substrings
//!   appended to the default [`SystemModuleDenylist`]

use std::{path::PathBuf, sync::OnceLock};

use crate::{noise::SystemModuleDenylist, report::ReportWriter};

/// Settings of an installed crash handler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CrashConfig {
    /// Where reports are written; `None` means the working directory.
    pub report_dir: Option<PathBuf>,
    /// Whether the notifier waits for the user before the process exits.
    pub acknowledge: bool,
    /// Extra denylist entries, matched after the defaults.
    pub extra_system_modules: Vec<String>,
}

impl CrashConfig {
    /// Reports in the working directory, no acknowledgement, default
    /// denylist.
    pub const DEFAULT: Self = Self {
        report_dir: None,
        acknowledge: false,
        extra_system_modules: Vec::new(),
    };

    /// Configuration from the `FAULTWARD_*` environment variables.
    pub fn new_from_env() -> Self {
        static FROM_ENV: OnceLock<CrashConfig> = OnceLock::new();
        FROM_ENV
            .get_or_init(|| Self::from_vars(|name| std::env::var(name).ok()))
            .clone()
    }

    /// Configuration from an arbitrary variable lookup.
    ///
    /// ```
    /// use faultward::CrashConfig;
    ///
    /// let config = CrashConfig::from_vars(|name| match name {
    ///     "FAULTWARD_ACKNOWLEDGE" => Some("true".into()),
    ///     "FAULTWARD_SYSTEM_MODULES" => Some("libsteam_api.so, ,overlay.dll".into()),
    ///     _ => None,
    /// });
    /// assert!(config.acknowledge);
    /// assert_eq!(config.report_dir, None);
    /// assert_eq!(config.extra_system_modules, ["libsteam_api.so", "overlay.dll"]);
    /// ```
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let report_dir = var("FAULTWARD_REPORT_DIR")
            .filter(|dir| !dir.trim().is_empty())
            .map(PathBuf::from);
        let acknowledge = var("FAULTWARD_ACKNOWLEDGE").is_some_and(|value| {
            let value = value.trim();
            value == "1" || value.eq_ignore_ascii_case("true")
        });
        let extra_system_modules = var("FAULTWARD_SYSTEM_MODULES")
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|entry| !entry.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            report_dir,
            acknowledge,
            extra_system_modules,
        }
    }

    /// Sets the report directory.
    #[must_use]
    pub fn report_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.report_dir = Some(dir.into());
        self
    }

    /// Sets whether to wait for the user.
    #[must_use]
    pub fn acknowledge(mut self, acknowledge: bool) -> Self {
        self.acknowledge = acknowledge;
        self
    }

    /// Appends a denylist entry.
    #[must_use]
    pub fn system_module(mut self, entry: impl Into<String>) -> Self {
        self.extra_system_modules.push(entry.into());
        self
    }

    /// The denylist: defaults followed by the extra entries.
    pub fn denylist(&self) -> SystemModuleDenylist {
        self.extra_system_modules
            .iter()
            .fold(SystemModuleDenylist::default(), |denylist, entry| {
                denylist.with_entry(entry.clone())
            })
    }

    /// The report writer for the configured directory.
    pub fn writer(&self) -> ReportWriter {
        self.report_dir
            .as_ref()
            .map_or_else(ReportWriter::default, ReportWriter::new)
    }
}

impl Default for CrashConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nothing_set_is_default() {
        assert_eq!(CrashConfig::from_vars(|_| None), CrashConfig::DEFAULT);
    }

    #[test]
    fn acknowledge_values() {
        for (value, expected) in [("1", true), ("TRUE", true), ("yes", false), ("0", false)] {
            let config = CrashConfig::from_vars(|name| {
                (name == "FAULTWARD_ACKNOWLEDGE").then(|| value.to_owned())
            });
            assert_eq!(config.acknowledge, expected, "{value}");
        }
    }

    #[test]
    fn extra_modules_extend_defaults() {
        let config = CrashConfig::DEFAULT.system_module("Overlay64.dll");
        let denylist = config.denylist();
        assert!(denylist.matches(r"C:\Games\overlay64.dll"));
        assert!(denylist.matches(r"C:\Windows\System32\ntdll.dll"));
        assert_eq!(
            denylist.entries().count(),
            SystemModuleDenylist::DEFAULT_ENTRIES.len() + 1
        );
    }

    #[test]
    fn writer_uses_report_dir() {
        let config = CrashConfig::DEFAULT.report_dir("/var/crash");
        assert_eq!(config.writer().directory(), std::path::Path::new("/var/crash"));
        assert_eq!(CrashConfig::DEFAULT.writer().directory(), std::path::Path::new("."));
    }
}
