use core::fmt;

use super::CrashReport;
use crate::registers::PointerWidth;

/// Renders a [`CrashReport`] as text.
///
/// The default is [`PlainTextFormatter::DEFAULT`]. Implement this trait to
/// change the artifact layout; the result must stay readable without
/// tooling.
pub trait ReportFormatter: 'static + Send + Sync + fmt::Debug {
    /// Writes the whole report.
    fn format_report(&self, report: &CrashReport, f: &mut fmt::Formatter<'_>) -> fmt::Result;
}

/// The plain-text report layout.
///
/// Sections, in order: header, fault summary, registers, stack trace,
/// environment (when present), loaded modules.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PlainTextFormatter {
    /// First line of the report.
    pub header: &'static str,
    /// Text before each section title.
    pub section_prefix: &'static str,
    /// Text after each section title.
    pub section_suffix: &'static str,
    /// `strftime` format of the header timestamp.
    pub timestamp_format: &'static str,
}

impl PlainTextFormatter {
    /// The default layout.
    pub const DEFAULT: Self = Self {
        header: "==================== CRASH REPORT ====================",
        section_prefix: "--- ",
        section_suffix: " ---",
        timestamp_format: "%Y-%m-%d %H:%M:%S%.3f %:z",
    };

    fn section(&self, f: &mut fmt::Formatter<'_>, title: fmt::Arguments<'_>) -> fmt::Result {
        writeln!(f)?;
        writeln!(f, "{}{title}{}", self.section_prefix, self.section_suffix)
    }
}

impl Default for PlainTextFormatter {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl ReportFormatter for PlainTextFormatter {
    fn format_report(&self, report: &CrashReport, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let event = &report.event;
        let digits = event
            .registers
            .as_ref()
            .map_or(PointerWidth::native(), |registers| registers.pointer_width())
            .hex_digits();

        writeln!(f, "{}", self.header)?;
        writeln!(f, "Time:      {}", event.timestamp.format(self.timestamp_format))?;
        writeln!(f, "Fault:     {}", report.description)?;
        writeln!(f, "Address:   0x{:0digits$X}", event.address)?;
        writeln!(f, "Thread:    {}", event.thread_id)?;
        writeln!(f, "Process:   {}", event.process_id)?;
        if let Some(path) = &report.report_path {
            writeln!(f, "Report:    {}", path.display())?;
        }

        match &event.registers {
            Some(registers) => {
                self.section(f, format_args!("Registers ({})", registers.arch_name()))?;
                write!(f, "{}", registers.dump())?;
            }
            None => {
                self.section(f, format_args!("Registers"))?;
                writeln!(f, "register context unavailable")?;
            }
        }

        self.section(f, format_args!("Stack Trace ({} frames)", report.frames.len()))?;
        if report.frames.is_empty() {
            writeln!(f, "no frames captured")?;
        }
        for frame in &report.frames {
            writeln!(f, "{frame}")?;
        }

        if !report.environment.is_empty() {
            self.section(f, format_args!("Environment"))?;
            for entry in &report.environment {
                writeln!(f, "{entry}")?;
            }
        }

        self.section(f, format_args!("Loaded Modules ({})", report.modules.len()))?;
        if report.modules.is_empty() {
            writeln!(f, "module list unavailable")?;
        }
        for module in report.modules.modules() {
            writeln!(f, "{module}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ExceptionCode, FaultEvent,
        capture::{Capture, FrameSymbol, LoadedModule, ModuleMap, StackFrame},
        registers::{Arch64Registers, RegisterSet},
        telemetry::EnvironmentEntry,
    };

    fn sample() -> CrashReport {
        let event = FaultEvent::now(ExceptionCode::INT_DIVIDE_BY_ZERO, 0x40_1000, 42).with_registers(
            RegisterSet::Arch64(Arch64Registers {
                rip: 0x40_1000,
                rsp: 0x7ff0,
                rbp: 0x8000,
                ..Default::default()
            }),
        );
        let capture = Capture {
            frames: vec![StackFrame {
                index: 0,
                address: 0x40_1000,
                module: "/opt/game/bin/game".into(),
                symbol: Some(FrameSymbol {
                    name: "game::divide".into(),
                    offset: Some(0x10),
                }),
                source: None,
            }],
            modules: ModuleMap::new(vec![LoadedModule::new("/opt/game/bin/game", 0x40_0000, 0x1_0000)]),
        };
        CrashReport::new(event, capture, vec![EnvironmentEntry::new("Threads", "4")])
    }

    #[test]
    fn sections_appear_in_order() {
        let text = sample().to_string();
        let positions: Vec<_> = [
            "CRASH REPORT",
            "Fault:     Integer Divide by Zero (EXCEPTION_INT_DIVIDE_BY_ZERO, 0xC0000094)",
            "Address:   0x0000000000401000",
            "Thread:    42",
            "--- Registers (x86-64) ---",
            "RIP    = 0x0000000000401000",
            "--- Stack Trace (1 frames) ---",
            "game::divide+0x10",
            "--- Environment ---",
            "Threads: 4",
            "--- Loaded Modules (1) ---",
            "0x0000000000400000-0x0000000000410000  /opt/game/bin/game",
        ]
        .iter()
        .map(|needle| text.find(needle).unwrap_or_else(|| panic!("missing {needle:?} in\n{text}")))
        .collect();
        assert!(positions.is_sorted(), "{text}");
    }

    #[test]
    fn degraded_report_is_still_complete() {
        let event = FaultEvent::now(ExceptionCode(0xDEAD_0001), 0, 1);
        let text = CrashReport::new(event, Capture::default(), Vec::new()).to_string();
        assert!(text.contains("Unknown Exception (UNKNOWN_EXCEPTION, 0xDEAD0001)"));
        assert!(text.contains("register context unavailable"));
        assert!(text.contains("no frames captured"));
        assert!(text.contains("module list unavailable"));
        assert!(!text.contains("Environment"));
    }
}
