use core::fmt;

use super::{
    ProcessView,
    modules::ModuleMap,
    symbols::{SourceLocation, SymbolResolver, SymbolScope},
};
use crate::registers::RegisterSet;

/// Upper bound on the frames of any stack trace.
pub const MAX_FRAMES: usize = 32;

/// One frame of a captured stack trace.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StackFrame {
    /// Position in the trace; 0 is the faulting frame.
    pub index: usize,
    /// Instruction address (frame 0) or return address (callers).
    pub address: u64,
    /// Path of the owning module, or `"unknown"`.
    pub module: String,
    /// Resolved symbol, if debug information was available.
    pub symbol: Option<FrameSymbol>,
    /// Source location, if debug information was available.
    pub source: Option<SourceLocation>,
}

/// Symbol name and displacement of a frame address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameSymbol {
    /// Demangled name.
    pub name: String,
    /// Byte offset of the frame address from the start of the symbol.
    pub offset: Option<u64>,
}

impl fmt::Display for FrameSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.offset {
            Some(offset) => write!(f, "{}+0x{offset:X}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

impl StackFrame {
    /// Final path component of the owning module.
    pub fn module_file_name(&self) -> &str {
        self.module
            .rsplit(['/', '\\'])
            .next()
            .filter(|name| !name.is_empty())
            .unwrap_or(self.module.as_str())
    }
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{:02}  {:<24}  0x{:016X}",
            self.index,
            self.module_file_name(),
            self.address
        )?;
        match &self.symbol {
            Some(symbol) => write!(f, "  {symbol}")?,
            None => write!(f, "  0x{:X}", self.address)?,
        }
        if let Some(source) = &self.source {
            write!(f, "  ({source})")?;
        }
        Ok(())
    }
}

/// An unwinder that reconstructs return addresses without frame pointers.
///
/// Used as a fallback when the frame-pointer walk yields at most the
/// faulting frame. Implementations must stop after `limit` addresses.
pub trait StackUnwinder: 'static + Send + Sync + fmt::Debug {
    /// Returns return addresses, innermost first.
    ///
    /// When `start` is given, frames preceding the one at `start` (the
    /// handler's own frames) are dropped.
    fn unwind(&self, start: Option<u64>, limit: usize) -> Vec<u64>;
}

/// Walks the frame-pointer chain starting at the captured registers.
///
/// Frame 0 is the instruction pointer. Every following frame reads the
/// saved frame pointer at `[fp]` and the return address at `[fp + width]`.
/// The walk stops after `limit` (at most [`MAX_FRAMES`]) addresses, on an
/// unreadable or null return address, on a misaligned frame pointer, and on
/// a frame pointer that does not strictly increase, so corrupted and cyclic
/// chains always terminate.
pub fn walk_frame_pointers(registers: &RegisterSet, view: &dyn ProcessView, limit: usize) -> Vec<u64> {
    let limit = limit.min(MAX_FRAMES);
    let width = registers.pointer_width();
    let word = width.bytes() as u64;
    let mut addresses = Vec::with_capacity(limit);

    if limit == 0 {
        return addresses;
    }
    addresses.push(registers.instruction_pointer());

    let mut frame_pointer = registers.frame_pointer();
    while addresses.len() < limit {
        if frame_pointer == 0 || frame_pointer % word != 0 {
            break;
        }
        let Some(return_slot) = frame_pointer.checked_add(word) else {
            break;
        };
        let Some(return_address) = view.read_pointer(return_slot, width) else {
            break;
        };
        if return_address == 0 {
            break;
        }
        addresses.push(return_address);

        match view.read_pointer(frame_pointer, width) {
            Some(next) if next > frame_pointer => frame_pointer = next,
            _ => break,
        }
    }

    addresses
}

/// Turns raw addresses into frames, resolving modules and symbols.
///
/// Caller frames are looked up at `address - 1` so that the lookup lands
/// inside the call instruction rather than at the start of the next
/// statement; displacements are still reported from the frame address.
pub fn symbolize(
    addresses: &[u64],
    modules: &ModuleMap,
    resolver: Option<&dyn SymbolResolver>,
) -> Vec<StackFrame> {
    let scope = resolver.map(SymbolScope::enter);

    addresses
        .iter()
        .take(MAX_FRAMES)
        .enumerate()
        .map(|(index, &address)| {
            let lookup = if index == 0 {
                address
            } else {
                address.saturating_sub(1)
            };
            let resolved = scope.as_ref().and_then(|scope| scope.resolve(lookup));
            let (symbol, source) = match resolved {
                Some(resolved) => (
                    Some(FrameSymbol {
                        name: resolved.name,
                        offset: resolved
                            .start
                            .filter(|&start| start <= address)
                            .map(|start| address - start),
                    }),
                    resolved.source,
                ),
                None => (None, None),
            };
            StackFrame {
                index,
                address,
                module: modules.module_name_for(address).to_owned(),
                symbol,
                source,
            }
        })
        .collect()
}
