//! The snapshot of a single fault delivery.

use std::time::{Instant, SystemTime};

use chrono::{DateTime, Local};

use crate::{code::ExceptionCode, registers::RegisterSet};

/// Snapshot of a single fault delivery.
///
/// Built once by the backend when the OS delivers a fault and owned by the
/// handling call for its whole duration. Nothing in it outlives the report.
#[derive(Copy, Clone, Debug)]
pub struct FaultEvent {
    /// The (translated) fault code.
    pub code: ExceptionCode,
    /// Address the fault refers to: the inaccessible address for memory
    /// faults, the faulting instruction otherwise.
    pub address: u64,
    /// Register state, when the delivery carried a usable machine context.
    pub registers: Option<RegisterSet>,
    /// OS thread id of the faulting thread.
    pub thread_id: u64,
    /// Process id.
    pub process_id: u32,
    /// Wall-clock time of the delivery.
    pub timestamp: DateTime<Local>,
    /// Monotonic time of the delivery, used for debouncing.
    pub monotonic: Instant,
}

impl FaultEvent {
    /// Creates an event stamped with the current time and process id.
    ///
    /// ```
    /// use faultward::{ExceptionCode, FaultEvent};
    ///
    /// let event = FaultEvent::now(ExceptionCode::ACCESS_VIOLATION, 0, 7);
    /// assert_eq!(event.process_id, std::process::id());
    /// assert!(event.registers.is_none());
    /// ```
    pub fn now(code: ExceptionCode, address: u64, thread_id: u64) -> Self {
        Self::at(code, address, thread_id, SystemTime::now(), Instant::now())
    }

    /// Creates an event for a delivery observed at `wall` and `monotonic`.
    ///
    /// Backends read both clocks inside the signal handler, where only raw
    /// clock reads are safe, and build the event later.
    ///
    /// ```
    /// use std::time::{Instant, SystemTime};
    ///
    /// use faultward::{ExceptionCode, FaultEvent};
    ///
    /// let wall = SystemTime::UNIX_EPOCH;
    /// let event = FaultEvent::at(ExceptionCode::BREAKPOINT, 0x10, 7, wall, Instant::now());
    /// assert_eq!(event.timestamp.timestamp(), 0);
    /// ```
    pub fn at(code: ExceptionCode, address: u64, thread_id: u64, wall: SystemTime, monotonic: Instant) -> Self {
        Self {
            code,
            address,
            registers: None,
            thread_id,
            process_id: std::process::id(),
            timestamp: DateTime::<Local>::from(wall),
            monotonic,
        }
    }

    /// Attaches captured register state.
    #[must_use]
    pub fn with_registers(mut self, registers: RegisterSet) -> Self {
        self.registers = Some(registers);
        self
    }

    /// Address of the faulting instruction, if known.
    ///
    /// Falls back to the fault address when no register context is
    /// available and the fault is not a data-access fault.
    pub fn instruction_pointer(&self) -> Option<u64> {
        match &self.registers {
            Some(registers) => Some(registers.instruction_pointer()),
            None if self.code != ExceptionCode::ACCESS_VIOLATION
                && self.code != ExceptionCode::IN_PAGE_ERROR
                && self.code != ExceptionCode::GUARD_PAGE
                && self.code != ExceptionCode::STACK_OVERFLOW =>
            {
                Some(self.address)
            }
            None => None,
        }
    }
}
