//! Optional process telemetry for the environment section of a report.
//!
//! Nothing in the fault path depends on a probe: a missing probe, a probe
//! that returns nothing, and a probe that panics all just leave the
//! section out.

use core::fmt;
use std::borrow::Cow;

/// One key/value line of the environment section.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnvironmentEntry {
    /// Short label, e.g. `"Threads"`.
    pub key: Cow<'static, str>,
    /// Human-readable value.
    pub value: String,
}

impl EnvironmentEntry {
    /// Creates an entry.
    pub fn new(key: impl Into<Cow<'static, str>>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for EnvironmentEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.key, self.value)
    }
}

/// A source of environment context for crash reports.
pub trait EnvironmentProbe: 'static + Send + Sync + fmt::Debug {
    /// Collects the current entries. An empty result omits the section.
    fn probe(&self) -> Vec<EnvironmentEntry>;
}

/// Thread count and memory figures from `/proc/self/status`.
#[derive(Copy, Clone, Debug, Default)]
pub struct ProcStatusProbe;

impl ProcStatusProbe {
    const FIELDS: &'static [(&'static str, &'static str)] = &[
        ("Threads", "Threads"),
        ("VmRSS", "Resident memory"),
        ("VmHWM", "Peak resident memory"),
        ("VmSize", "Virtual memory"),
    ];

    /// Extracts the known fields from the text of a `status` file.
    ///
    /// ```
    /// use faultward::telemetry::ProcStatusProbe;
    ///
    /// let entries = ProcStatusProbe::parse("Name:\tgame\nThreads:\t12\nVmRSS:\t  20480 kB\n");
    /// assert_eq!(entries[0].to_string(), "Threads: 12");
    /// assert_eq!(entries[1].to_string(), "Resident memory: 20480 kB");
    /// ```
    pub fn parse(status: &str) -> Vec<EnvironmentEntry> {
        Self::FIELDS
            .iter()
            .filter_map(|&(field, label)| {
                let value = status.lines().find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    (name == field).then(|| value.trim())
                })?;
                Some(EnvironmentEntry::new(label, value))
            })
            .collect()
    }
}

impl EnvironmentProbe for ProcStatusProbe {
    fn probe(&self) -> Vec<EnvironmentEntry> {
        match std::fs::read_to_string("/proc/self/status") {
            Ok(status) => Self::parse(&status),
            Err(error) => {
                tracing::debug!(%error, "process status unavailable");
                Vec::new()
            }
        }
    }
}
