//! Platform-neutral exception codes.
//!
//! Every backend translates its native fault delivery into an
//! [`ExceptionCode`]. The namespace is the 32-bit NTSTATUS-style exception
//! code space: it is the richest widely used fault taxonomy, and keeping one
//! namespace means the classification table does not change per platform.

use core::fmt;

/// A raw 32-bit fault code as delivered by (or translated from) the OS.
///
/// The value is opaque: anything can arrive here, including codes that are
/// not named below. Unnamed codes format as `UNKNOWN_EXCEPTION` and are
/// never treated as fatal.
///
/// # Examples
///
/// ```
/// use faultward::ExceptionCode;
///
/// let code = ExceptionCode::ACCESS_VIOLATION;
/// assert_eq!(code.raw(), 0xC000_0005);
/// assert_eq!(code.label(), "Access Violation");
/// assert_eq!(code.to_string(), "Access Violation (EXCEPTION_ACCESS_VIOLATION, 0xC0000005)");
/// ```
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExceptionCode(pub u32);

macro_rules! exception_codes {
    ($($(#[$meta:meta])* $name:ident = $value:literal, $symbol:literal, $label:literal;)*) => {
        impl ExceptionCode {
            $(
                $(#[$meta])*
                pub const $name: Self = Self($value);
            )*

            /// All named codes, in declaration order.
            pub const NAMED: &'static [Self] = &[$(Self::$name),*];

            fn names(self) -> Option<(&'static str, &'static str)> {
                match self {
                    $(Self::$name => Some(($symbol, $label)),)*
                    _ => None,
                }
            }
        }
    };
}

exception_codes! {
    /// Read, write or execute of an address the process may not access.
    ACCESS_VIOLATION = 0xC000_0005, "EXCEPTION_ACCESS_VIOLATION", "Access Violation";
    /// The backing page of a mapped address could not be brought in.
    IN_PAGE_ERROR = 0xC000_0006, "EXCEPTION_IN_PAGE_ERROR", "In-Page Error";
    /// Operation on an invalid handle or descriptor.
    INVALID_HANDLE = 0xC000_0008, "EXCEPTION_INVALID_HANDLE", "Invalid Handle";
    /// The thread exhausted its stack.
    STACK_OVERFLOW = 0xC000_00FD, "EXCEPTION_STACK_OVERFLOW", "Stack Overflow";
    /// Undefined opcode.
    ILLEGAL_INSTRUCTION = 0xC000_001D, "EXCEPTION_ILLEGAL_INSTRUCTION", "Illegal Instruction";
    /// Instruction not allowed at the current privilege level.
    PRIV_INSTRUCTION = 0xC000_0096, "EXCEPTION_PRIV_INSTRUCTION", "Privileged Instruction";
    /// Misaligned data access on hardware that enforces alignment.
    DATATYPE_MISALIGNMENT = 0x8000_0002, "EXCEPTION_DATATYPE_MISALIGNMENT", "Datatype Misalignment";
    /// Bounds-checked array access out of range.
    ARRAY_BOUNDS_EXCEEDED = 0xC000_008C, "EXCEPTION_ARRAY_BOUNDS_EXCEEDED", "Array Bounds Exceeded";
    /// Integer division by zero.
    INT_DIVIDE_BY_ZERO = 0xC000_0094, "EXCEPTION_INT_DIVIDE_BY_ZERO", "Integer Divide by Zero";
    /// Integer overflow trap.
    INT_OVERFLOW = 0xC000_0095, "EXCEPTION_INT_OVERFLOW", "Integer Overflow";
    /// Floating-point operand too small to represent normally.
    FLT_DENORMAL_OPERAND = 0xC000_008D, "EXCEPTION_FLT_DENORMAL_OPERAND", "Floating-Point Denormal Operand";
    /// Floating-point division by zero.
    FLT_DIVIDE_BY_ZERO = 0xC000_008E, "EXCEPTION_FLT_DIVIDE_BY_ZERO", "Floating-Point Divide by Zero";
    /// Floating-point result not exactly representable.
    FLT_INEXACT_RESULT = 0xC000_008F, "EXCEPTION_FLT_INEXACT_RESULT", "Floating-Point Inexact Result";
    /// Floating-point invalid operation.
    FLT_INVALID_OPERATION = 0xC000_0090, "EXCEPTION_FLT_INVALID_OPERATION", "Floating-Point Invalid Operation";
    /// Floating-point overflow.
    FLT_OVERFLOW = 0xC000_0091, "EXCEPTION_FLT_OVERFLOW", "Floating-Point Overflow";
    /// x87 register stack overflow or underflow.
    FLT_STACK_CHECK = 0xC000_0092, "EXCEPTION_FLT_STACK_CHECK", "Floating-Point Stack Check";
    /// Floating-point underflow.
    FLT_UNDERFLOW = 0xC000_0093, "EXCEPTION_FLT_UNDERFLOW", "Floating-Point Underflow";
    /// Touch of a guard page (stack growth, memory probing).
    GUARD_PAGE = 0x8000_0001, "EXCEPTION_GUARD_PAGE", "Guard Page";
    /// Breakpoint instruction.
    BREAKPOINT = 0x8000_0003, "EXCEPTION_BREAKPOINT", "Breakpoint";
    /// Trace trap after a single instruction.
    SINGLE_STEP = 0x8000_0004, "EXCEPTION_SINGLE_STEP", "Single Step";
    /// Debugger output event (narrow string).
    DBG_PRINTEXCEPTION = 0x4001_0006, "DBG_PRINTEXCEPTION_C", "Debugger Print";
    /// Debugger output event (wide string).
    DBG_PRINTEXCEPTION_WIDE = 0x4001_000A, "DBG_PRINTEXCEPTION_WIDE_C", "Debugger Print (Wide)";
    /// Console interrupt forwarded to an attached debugger.
    DBG_CONTROL_C = 0x4001_0005, "DBG_CONTROL_C", "Debugger Control-C";
    /// Thread-naming notification for debuggers.
    SET_THREAD_NAME = 0x406D_1388, "MS_VC_EXCEPTION", "Thread Name Notification";
    /// Diagnostic raised by the script host watchdog when a script runs too long.
    LONG_RUNNING_SCRIPT = 0xE000_5C01, "SCRIPT_LONG_RUNNING", "Long-Running Script";
    /// Language-level exception unwinding (C++ `throw`, Rust panics under SEH).
    CPP_EXCEPTION = 0xE06D_7363, "CPP_EH_EXCEPTION", "Language Exception";
    /// Managed runtime exception unwinding.
    CLR_EXCEPTION = 0xE043_4352, "CLR_EXCEPTION", "Managed Runtime Exception";
    /// Unwind in progress.
    UNWIND = 0xC000_0027, "STATUS_UNWIND", "Unwind";
    /// Unwind consolidation frame.
    UNWIND_CONSOLIDATE = 0x8000_0029, "STATUS_UNWIND_CONSOLIDATE", "Unwind Consolidate";
}

impl ExceptionCode {
    /// Returns the raw 32-bit value.
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Returns the symbolic constant name, e.g. `EXCEPTION_ACCESS_VIOLATION`.
    pub fn symbol(self) -> &'static str {
        self.names().map_or("UNKNOWN_EXCEPTION", |(symbol, _)| symbol)
    }

    /// Returns a short human-readable label, e.g. `Access Violation`.
    pub fn label(self) -> &'static str {
        self.names().map_or("Unknown Exception", |(_, label)| label)
    }

    /// Whether this code has a name in the table above.
    pub fn is_named(self) -> bool {
        self.names().is_some()
    }
}

impl From<u32> for ExceptionCode {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, 0x{:08X})", self.label(), self.symbol(), self.0)
    }
}

impl fmt::Debug for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(0x{:08X})", self.symbol(), self.0)
    }
}
