use core::fmt;
use std::{
    fs::{File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Local};
use rootcause::{Report, prelude::ResultExt};

use super::{CrashReport, ReportFormatter};

/// Failure to persist a crash report.
#[derive(Debug)]
pub enum ReportWriteError {
    /// The report file could not be created.
    Create {
        /// Path of the file.
        path: PathBuf,
    },
    /// The report file was created but writing it failed.
    Write {
        /// Path of the file.
        path: PathBuf,
    },
}

impl fmt::Display for ReportWriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create { path } => write!(f, "Could not create crash report {}", path.display()),
            Self::Write { path } => write!(f, "Could not write crash report {}", path.display()),
        }
    }
}

impl core::error::Error for ReportWriteError {}

/// Persists crash reports as text files.
///
/// Reports are named `crash_report_<YYYYMMDD_HHMMSS>.txt` after the fault
/// timestamp. An existing file is never overwritten: the process id is
/// appended instead (`crash_report_<YYYYMMDD_HHMMSS>_<pid>.txt`).
#[derive(Clone, Debug)]
pub struct ReportWriter {
    directory: PathBuf,
}

impl ReportWriter {
    /// A writer that places reports in `directory`.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// The target directory.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// File name for a report captured at `timestamp`.
    ///
    /// ```
    /// use chrono::{Local, TimeZone};
    /// use faultward::report::ReportWriter;
    ///
    /// let timestamp = Local.with_ymd_and_hms(2024, 3, 9, 17, 4, 5).unwrap();
    /// assert_eq!(ReportWriter::file_name(&timestamp, None), "crash_report_20240309_170405.txt");
    /// assert_eq!(
    ///     ReportWriter::file_name(&timestamp, Some(4242)),
    ///     "crash_report_20240309_170405_4242.txt"
    /// );
    /// ```
    pub fn file_name(timestamp: &DateTime<Local>, process_id: Option<u32>) -> String {
        let stamp = timestamp.format("%Y%m%d_%H%M%S");
        match process_id {
            Some(pid) => format!("crash_report_{stamp}_{pid}.txt"),
            None => format!("crash_report_{stamp}.txt"),
        }
    }

    /// Writes `report` and records the file path in it.
    ///
    /// On failure `report.report_path` is left empty and the error is
    /// returned; the caller is expected to log it and carry on.
    pub fn write(
        &self,
        report: &mut CrashReport,
        formatter: &dyn ReportFormatter,
    ) -> Result<PathBuf, Report<ReportWriteError>> {
        let (path, mut file) = self.create(report)?;

        report.report_path = Some(path.clone());
        let text = report.format_with(formatter).to_string();
        let written = file
            .write_all(text.as_bytes())
            .and_then(|()| file.sync_all())
            .context(ReportWriteError::Write { path: path.clone() });

        match written {
            Ok(()) => {
                tracing::info!(path = %path.display(), "crash report written");
                Ok(path)
            }
            Err(error) => {
                report.report_path = None;
                Err(error)
            }
        }
    }

    fn create(&self, report: &CrashReport) -> Result<(PathBuf, File), Report<ReportWriteError>> {
        let timestamp = &report.event.timestamp;
        let primary = self.directory.join(Self::file_name(timestamp, None));

        match create_new(&primary) {
            Ok(file) => Ok((primary, file)),
            Err(error) if error.kind() == io::ErrorKind::AlreadyExists => {
                let fallback = self
                    .directory
                    .join(Self::file_name(timestamp, Some(report.event.process_id)));
                let file = create_new(&fallback).context(ReportWriteError::Create {
                    path: fallback.clone(),
                })?;
                Ok((fallback, file))
            }
            Err(error) => Err(error).context(ReportWriteError::Create { path: primary }),
        }
    }
}

impl Default for ReportWriter {
    /// Writes into the working directory.
    fn default() -> Self {
        Self::new(".")
    }
}

fn create_new(path: &Path) -> io::Result<File> {
    OpenOptions::new().write(true).create_new(true).open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ExceptionCode, FaultEvent, capture::Capture, report::PlainTextFormatter};

    fn report() -> CrashReport {
        CrashReport::new(
            FaultEvent::now(ExceptionCode::ACCESS_VIOLATION, 0x10, 1),
            Capture::default(),
            Vec::new(),
        )
    }

    fn is_report_name(name: &str) -> bool {
        let Some(stamp) = name
            .strip_prefix("crash_report_")
            .and_then(|rest| rest.strip_suffix(".txt"))
        else {
            return false;
        };
        let bytes = stamp.as_bytes();
        bytes.len() == 15
            && bytes[8] == b'_'
            && bytes
                .iter()
                .enumerate()
                .all(|(i, b)| i == 8 || b.is_ascii_digit())
    }

    #[test]
    fn writes_timestamped_file() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ReportWriter::new(dir.path());
        let mut report = report();

        let path = writer.write(&mut report, &PlainTextFormatter::DEFAULT).unwrap();
        assert_eq!(report.report_path.as_deref(), Some(path.as_path()));
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(is_report_name(name), "{name}");

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("Access Violation"));
        assert!(text.contains(&format!("Report:    {}", path.display())));
    }

    #[test]
    fn existing_file_gets_pid_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ReportWriter::new(dir.path());
        let mut report = report();
        let taken = dir
            .path()
            .join(ReportWriter::file_name(&report.event.timestamp, None));
        std::fs::write(&taken, "earlier crash").unwrap();

        let path = writer.write(&mut report, &PlainTextFormatter::DEFAULT).unwrap();
        assert_ne!(path, taken);
        assert!(
            path.to_str()
                .unwrap()
                .ends_with(&format!("_{}.txt", std::process::id()))
        );
        assert_eq!(std::fs::read_to_string(&taken).unwrap(), "earlier crash");
    }

    #[test]
    fn unwritable_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ReportWriter::new(dir.path().join("missing").join("nested"));
        let mut report = report();

        let error = writer
            .write(&mut report, &PlainTextFormatter::DEFAULT)
            .unwrap_err();
        assert!(matches!(error.current_context(), ReportWriteError::Create { .. }));
        assert!(error.to_string().contains("Could not create crash report"));
        assert!(report.report_path.is_none());
    }
}
