//! Diagnostic capture: stack trace and loaded modules for a fault.
//!
//! Capture runs inside the fault callback, so every step degrades on its
//! own. A step that fails, or panics, contributes an empty result and the
//! report is built from whatever the other steps produced.

#[cfg(feature = "backtrace")]
pub mod backtrace;
mod modules;
mod stack;
mod symbols;

use std::panic::{AssertUnwindSafe, catch_unwind};

pub use self::{
    modules::{LoadedModule, MAX_MODULES, ModuleMap, UNKNOWN_MODULE},
    stack::{FrameSymbol, MAX_FRAMES, StackFrame, StackUnwinder, symbolize, walk_frame_pointers},
    symbols::{ResolvedSymbol, SourceLocation, SymbolResolver, SymbolScope},
};
use crate::{fault::FaultEvent, registers::PointerWidth};

/// Read-only view of the faulting process.
///
/// The live backend reads its own address space through a path that
/// reports bad addresses instead of faulting; tests provide synthetic
/// views.
pub trait ProcessView {
    /// Reads one pointer-sized word. `None` when the address is unreadable.
    fn read_pointer(&self, address: u64, width: PointerWidth) -> Option<u64>;

    /// Enumerates up to `limit` loaded modules.
    fn loaded_modules(&self, limit: usize) -> Vec<LoadedModule>;

    /// Path of the module that owns `address`.
    ///
    /// The default enumerates the modules; backends with a direct lookup
    /// should override it.
    fn module_at(&self, address: u64) -> Option<String> {
        ModuleMap::new(self.loaded_modules(MAX_MODULES))
            .module_for(address)
            .map(|module| module.path.clone())
    }
}

/// Everything captured about the process for one report.
#[derive(Clone, Debug, Default)]
pub struct Capture {
    /// Symbolized stack trace, innermost first.
    pub frames: Vec<StackFrame>,
    /// Loaded modules at the time of the fault.
    pub modules: ModuleMap,
}

/// Builds a [`Capture`] from a fault event.
#[derive(Copy, Clone, Debug, Default)]
pub struct DiagnosticCapture<'a> {
    symbolizer: Option<&'a dyn SymbolResolver>,
    unwinder: Option<&'a dyn StackUnwinder>,
}

impl<'a> DiagnosticCapture<'a> {
    /// A capture without symbols or fallback unwinding.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves frame symbols through `symbolizer`.
    #[must_use]
    pub fn symbolizer(mut self, symbolizer: Option<&'a dyn SymbolResolver>) -> Self {
        self.symbolizer = symbolizer;
        self
    }

    /// Falls back to `unwinder` when the frame-pointer walk finds nothing.
    #[must_use]
    pub fn unwinder(mut self, unwinder: Option<&'a dyn StackUnwinder>) -> Self {
        self.unwinder = unwinder;
        self
    }

    /// Captures modules and the stack trace of `event`.
    pub fn capture(&self, event: &FaultEvent, view: &dyn ProcessView) -> Capture {
        let modules = degrade("module enumeration", || {
            ModuleMap::new(view.loaded_modules(MAX_MODULES))
        });

        let mut addresses = match &event.registers {
            Some(registers) => degrade("frame-pointer walk", || {
                walk_frame_pointers(registers, view, MAX_FRAMES)
            }),
            None => event.instruction_pointer().into_iter().collect(),
        };

        if addresses.len() <= 1
            && let Some(unwinder) = self.unwinder
        {
            let start = event.instruction_pointer();
            let unwound = degrade("fallback unwind", || unwinder.unwind(start, MAX_FRAMES));
            if unwound.len() > addresses.len() {
                addresses = unwound;
            }
        }
        addresses.truncate(MAX_FRAMES);

        let frames = match catch_unwind(AssertUnwindSafe(|| {
            symbolize(&addresses, &modules, self.symbolizer)
        })) {
            Ok(frames) => frames,
            Err(_) => {
                tracing::warn!("symbol resolution panicked; reporting raw addresses");
                symbolize(&addresses, &modules, None)
            }
        };

        Capture { frames, modules }
    }
}

fn degrade<T: Default>(step: &'static str, f: impl FnOnce() -> T) -> T {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(_) => {
            tracing::warn!(step, "capture step panicked; continuing without it");
            T::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::{
        code::ExceptionCode,
        registers::{Arch64Registers, RegisterSet},
    };

    struct View {
        memory: HashMap<u64, u64>,
        modules: Vec<LoadedModule>,
        panic_on_modules: bool,
    }

    impl ProcessView for View {
        fn read_pointer(&self, address: u64, _width: PointerWidth) -> Option<u64> {
            self.memory.get(&address).copied()
        }

        fn loaded_modules(&self, limit: usize) -> Vec<LoadedModule> {
            assert!(!self.panic_on_modules, "module list unavailable");
            self.modules.iter().take(limit).cloned().collect()
        }
    }

    #[derive(Debug)]
    struct Unwinder(Vec<u64>);

    impl StackUnwinder for Unwinder {
        fn unwind(&self, _start: Option<u64>, limit: usize) -> Vec<u64> {
            self.0.iter().copied().take(limit).collect()
        }
    }

    #[derive(Debug)]
    struct Exploding;

    impl SymbolResolver for Exploding {
        fn resolve(&self, _address: u64) -> Option<ResolvedSymbol> {
            panic!("corrupt debug info");
        }
    }

    fn event(rip: u64, rbp: u64) -> FaultEvent {
        FaultEvent::now(ExceptionCode::ACCESS_VIOLATION, 0, 1).with_registers(
            RegisterSet::Arch64(Arch64Registers {
                rip,
                rbp,
                ..Default::default()
            }),
        )
    }

    #[test]
    fn module_enumeration_failure_degrades() {
        let view = View {
            memory: HashMap::from([(0x7000, 0), (0x7008, 0x2000)]),
            modules: Vec::new(),
            panic_on_modules: true,
        };
        let capture = DiagnosticCapture::new().capture(&event(0x1000, 0x7000), &view);
        assert!(capture.modules.is_empty());
        assert_eq!(capture.frames.len(), 2);
        assert!(capture.frames.iter().all(|f| f.module == UNKNOWN_MODULE));
    }

    #[test]
    fn unwinder_replaces_shallow_walk() {
        let view = View {
            memory: HashMap::new(),
            modules: vec![LoadedModule::new("/opt/game/bin/game", 0x1000, 0x1000)],
            panic_on_modules: false,
        };
        let unwinder = Unwinder(vec![0x1000, 0x1100, 0x1200]);
        let capture = DiagnosticCapture::new()
            .unwinder(Some(&unwinder))
            .capture(&event(0x1000, 0), &view);
        let addresses: Vec<_> = capture.frames.iter().map(|f| f.address).collect();
        assert_eq!(addresses, [0x1000, 0x1100, 0x1200]);
    }

    #[test]
    fn panicking_symbolizer_degrades_to_addresses() {
        let view = View {
            memory: HashMap::new(),
            modules: Vec::new(),
            panic_on_modules: false,
        };
        let capture = DiagnosticCapture::new()
            .symbolizer(Some(&Exploding))
            .capture(&event(0x1000, 0), &view);
        assert_eq!(capture.frames.len(), 1);
        assert!(capture.frames[0].symbol.is_none());
    }

    #[test]
    fn missing_context_uses_instruction_address() {
        let view = View {
            memory: HashMap::new(),
            modules: Vec::new(),
            panic_on_modules: false,
        };
        let event = FaultEvent::now(ExceptionCode::ILLEGAL_INSTRUCTION, 0x4242, 1);
        let capture = DiagnosticCapture::new().capture(&event, &view);
        assert_eq!(capture.frames.len(), 1);
        assert_eq!(capture.frames[0].address, 0x4242);

        let event = FaultEvent::now(ExceptionCode::ACCESS_VIOLATION, 0x10, 1);
        assert!(DiagnosticCapture::new().capture(&event, &view).frames.is_empty());
    }
}
