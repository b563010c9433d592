//! Integer register state captured at fault time.
//!
//! The layout is chosen once, when the backend extracts the machine context,
//! and travels through capture and reporting as a tagged [`RegisterSet`].

use core::fmt;

/// Width of a pointer in the faulting process.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PointerWidth {
    /// 4-byte pointers.
    Bits32,
    /// 8-byte pointers.
    Bits64,
}

impl PointerWidth {
    /// Number of bytes in a pointer.
    pub const fn bytes(self) -> usize {
        match self {
            Self::Bits32 => 4,
            Self::Bits64 => 8,
        }
    }

    /// Number of hex digits needed to print a full pointer.
    pub const fn hex_digits(self) -> usize {
        self.bytes() * 2
    }

    /// Width of the running process.
    pub const fn native() -> Self {
        if cfg!(target_pointer_width = "64") {
            Self::Bits64
        } else {
            Self::Bits32
        }
    }
}

/// i386 integer register file.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct Arch32Registers {
    pub eax: u32,
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
    pub esi: u32,
    pub edi: u32,
    pub ebp: u32,
    pub esp: u32,
    pub eip: u32,
    pub eflags: u32,
}

/// x86-64 integer register file.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct Arch64Registers {
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rbp: u64,
    pub rsp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rip: u64,
    pub rflags: u64,
}

/// Register state of the faulting thread.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RegisterSet {
    /// 32-bit layout.
    Arch32(Arch32Registers),
    /// 64-bit layout.
    Arch64(Arch64Registers),
}

impl RegisterSet {
    /// Name of the layout, as shown in reports.
    pub fn arch_name(&self) -> &'static str {
        match self {
            Self::Arch32(_) => "x86",
            Self::Arch64(_) => "x86-64",
        }
    }

    /// Pointer width implied by the layout.
    pub fn pointer_width(&self) -> PointerWidth {
        match self {
            Self::Arch32(_) => PointerWidth::Bits32,
            Self::Arch64(_) => PointerWidth::Bits64,
        }
    }

    /// Address of the faulting instruction.
    pub fn instruction_pointer(&self) -> u64 {
        match self {
            Self::Arch32(r) => u64::from(r.eip),
            Self::Arch64(r) => r.rip,
        }
    }

    /// Stack pointer at the fault.
    pub fn stack_pointer(&self) -> u64 {
        match self {
            Self::Arch32(r) => u64::from(r.esp),
            Self::Arch64(r) => r.rsp,
        }
    }

    /// Frame pointer at the fault.
    pub fn frame_pointer(&self) -> u64 {
        match self {
            Self::Arch32(r) => u64::from(r.ebp),
            Self::Arch64(r) => r.rbp,
        }
    }

    /// Every register as `(name, value)`, in dump order.
    pub fn entries(&self) -> Vec<(&'static str, u64)> {
        match *self {
            Self::Arch32(r) => [
                ("EAX", r.eax),
                ("EBX", r.ebx),
                ("ECX", r.ecx),
                ("EDX", r.edx),
                ("ESI", r.esi),
                ("EDI", r.edi),
                ("EBP", r.ebp),
                ("ESP", r.esp),
                ("EIP", r.eip),
                ("EFLAGS", r.eflags),
            ]
            .into_iter()
            .map(|(name, value)| (name, u64::from(value)))
            .collect(),
            Self::Arch64(r) => vec![
                ("RAX", r.rax),
                ("RBX", r.rbx),
                ("RCX", r.rcx),
                ("RDX", r.rdx),
                ("RSI", r.rsi),
                ("RDI", r.rdi),
                ("RBP", r.rbp),
                ("RSP", r.rsp),
                ("R8", r.r8),
                ("R9", r.r9),
                ("R10", r.r10),
                ("R11", r.r11),
                ("R12", r.r12),
                ("R13", r.r13),
                ("R14", r.r14),
                ("R15", r.r15),
                ("RIP", r.rip),
                ("RFLAGS", r.rflags),
            ],
        }
    }

    /// Full dump, a few registers per line.
    ///
    /// ```
    /// use faultward::registers::{Arch32Registers, RegisterSet};
    ///
    /// let regs = RegisterSet::Arch32(Arch32Registers { eax: 0x10, eip: 0x401000, ..Default::default() });
    /// let dump = regs.dump().to_string();
    /// assert!(dump.starts_with("EAX    = 0x00000010"));
    /// assert!(dump.contains("EIP    = 0x00401000"));
    /// ```
    pub fn dump(&self) -> RegisterDump<'_> {
        RegisterDump {
            registers: self,
            condensed: false,
        }
    }

    /// Instruction, stack and frame pointer only, on one line.
    pub fn condensed(&self) -> RegisterDump<'_> {
        RegisterDump {
            registers: self,
            condensed: true,
        }
    }
}

/// Display adapter returned by [`RegisterSet::dump`] and
/// [`RegisterSet::condensed`].
#[derive(Copy, Clone, Debug)]
pub struct RegisterDump<'a> {
    registers: &'a RegisterSet,
    condensed: bool,
}

impl fmt::Display for RegisterDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const PER_LINE: usize = 3;
        let digits = self.registers.pointer_width().hex_digits();

        if self.condensed {
            let (ip, sp, fp) = match self.registers {
                RegisterSet::Arch32(_) => ("EIP", "ESP", "EBP"),
                RegisterSet::Arch64(_) => ("RIP", "RSP", "RBP"),
            };
            return write!(
                f,
                "{ip}=0x{:0digits$X} {sp}=0x{:0digits$X} {fp}=0x{:0digits$X}",
                self.registers.instruction_pointer(),
                self.registers.stack_pointer(),
                self.registers.frame_pointer(),
            );
        }

        for (i, (name, value)) in self.registers.entries().into_iter().enumerate() {
            if i > 0 {
                if i % PER_LINE == 0 {
                    writeln!(f)?;
                } else {
                    write!(f, "  ")?;
                }
            }
            write!(f, "{name:<6} = 0x{value:0digits$X}")?;
        }
        writeln!(f)
    }
}
