//! Exception classification.
//!
//! [`classify`] is the single source of truth for which fault codes end the
//! process. Both lists below are explicit; a code that appears in neither is
//! suppressed, so an unrecognized but benign code can never terminate the
//! process.

use crate::code::ExceptionCode;

/// Disposition of a single fault delivery.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Classification {
    /// Return to the faulting context, or pass to the next handler in the chain.
    Suppress,
    /// Capture, report and terminate.
    Fatal,
}

/// Codes that always classify as [`Classification::Fatal`].
///
/// Memory-safety violations, arithmetic faults, illegal or privileged
/// instructions, alignment faults, bounds violations and invalid handles.
pub const FATAL_CODES: &[ExceptionCode] = &[
    ExceptionCode::ACCESS_VIOLATION,
    ExceptionCode::STACK_OVERFLOW,
    ExceptionCode::IN_PAGE_ERROR,
    ExceptionCode::INT_DIVIDE_BY_ZERO,
    ExceptionCode::INT_OVERFLOW,
    ExceptionCode::FLT_DIVIDE_BY_ZERO,
    ExceptionCode::FLT_OVERFLOW,
    ExceptionCode::FLT_UNDERFLOW,
    ExceptionCode::FLT_DENORMAL_OPERAND,
    ExceptionCode::FLT_INEXACT_RESULT,
    ExceptionCode::FLT_INVALID_OPERATION,
    ExceptionCode::FLT_STACK_CHECK,
    ExceptionCode::ILLEGAL_INSTRUCTION,
    ExceptionCode::PRIV_INSTRUCTION,
    ExceptionCode::DATATYPE_MISALIGNMENT,
    ExceptionCode::ARRAY_BOUNDS_EXCEEDED,
    ExceptionCode::INVALID_HANDLE,
];

/// Codes that are known to be benign and always classify as
/// [`Classification::Suppress`].
///
/// Debugger events, script-host diagnostics, guard-page touches and
/// language-level unwinding.
pub const SUPPRESSED_CODES: &[ExceptionCode] = &[
    ExceptionCode::SINGLE_STEP,
    ExceptionCode::BREAKPOINT,
    ExceptionCode::GUARD_PAGE,
    ExceptionCode::DBG_PRINTEXCEPTION,
    ExceptionCode::DBG_PRINTEXCEPTION_WIDE,
    ExceptionCode::DBG_CONTROL_C,
    ExceptionCode::SET_THREAD_NAME,
    ExceptionCode::LONG_RUNNING_SCRIPT,
    ExceptionCode::CPP_EXCEPTION,
    ExceptionCode::CLR_EXCEPTION,
    ExceptionCode::UNWIND,
    ExceptionCode::UNWIND_CONSOLIDATE,
];

/// Classifies a raw fault code.
///
/// # Examples
///
/// ```
/// use faultward::{Classification, ExceptionCode, classify};
///
/// assert_eq!(classify(ExceptionCode::ACCESS_VIOLATION), Classification::Fatal);
/// assert_eq!(classify(ExceptionCode::BREAKPOINT), Classification::Suppress);
/// assert_eq!(classify(ExceptionCode(0xDEAD_BEEF)), Classification::Suppress);
/// ```
pub fn classify(code: ExceptionCode) -> Classification {
    if FATAL_CODES.contains(&code) {
        Classification::Fatal
    } else {
        // Both SUPPRESSED_CODES and unknown codes land here.
        Classification::Suppress
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_set_is_fatal() {
        for &code in FATAL_CODES {
            assert_eq!(classify(code), Classification::Fatal, "{code:?}");
        }
    }

    #[test]
    fn suppress_set_is_suppressed() {
        for &code in SUPPRESSED_CODES {
            assert_eq!(classify(code), Classification::Suppress, "{code:?}");
        }
    }

    #[test]
    fn unlisted_codes_are_suppressed() {
        for raw in [0u32, 1, 0xC000_0001, 0xC000_0025, 0xE000_0000, u32::MAX] {
            let code = ExceptionCode(raw);
            assert!(!FATAL_CODES.contains(&code));
            assert_eq!(classify(code), Classification::Suppress, "{code:?}");
        }
    }

    #[test]
    fn tables_are_disjoint_and_named() {
        for code in FATAL_CODES {
            assert!(!SUPPRESSED_CODES.contains(code), "{code:?} in both tables");
            assert!(code.is_named());
        }
        for code in SUPPRESSED_CODES {
            assert!(code.is_named());
        }
    }

    #[test]
    fn every_named_code_is_listed() {
        for code in ExceptionCode::NAMED {
            assert!(
                FATAL_CODES.contains(code) || SUPPRESSED_CODES.contains(code),
                "{code:?} is named but not classified explicitly"
            );
        }
    }
}
