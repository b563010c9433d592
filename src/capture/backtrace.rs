//! Symbol resolution and unwinding through the `backtrace` crate.
//!
//! Enabled by the `backtrace` feature (on by default). Provides the
//! default [`SymbolResolver`] and the fallback [`StackUnwinder`] used when
//! the frame-pointer walk comes up empty, for example in binaries built
//! without frame pointers.

use std::{ffi::c_void, sync::OnceLock};

use super::{ResolvedSymbol, SourceLocation, StackUnwinder, SymbolResolver};

/// Resolves addresses with the debug information of the running binary.
///
/// Source paths are shortened for the standard library (`RUST_SRC/...`)
/// and the cargo registry (`CARGO/...`) unless `full_paths` is set, or
/// `RUST_BACKTRACE=full` is in the environment when using
/// [`new_from_env`](Self::new_from_env).
#[derive(Copy, Clone, Debug, Default)]
pub struct BacktraceSymbolizer {
    /// Keep source paths exactly as recorded in the debug information.
    pub full_paths: bool,
}

impl BacktraceSymbolizer {
    /// A symbolizer with shortened source paths.
    pub const fn new() -> Self {
        Self { full_paths: false }
    }

    /// A symbolizer configured from `RUST_BACKTRACE`.
    pub fn new_from_env() -> Self {
        static FULL: OnceLock<bool> = OnceLock::new();
        let full_paths = *FULL.get_or_init(|| {
            std::env::var("RUST_BACKTRACE").is_ok_and(|value| value == "full")
        });
        Self { full_paths }
    }
}

impl SymbolResolver for BacktraceSymbolizer {
    fn resolve(&self, address: u64) -> Option<ResolvedSymbol> {
        let mut resolved = None;
        backtrace::resolve(address as usize as *mut c_void, |symbol| {
            // Inlined frames come first; keep the innermost one.
            if resolved.is_some() {
                return;
            }
            let Some(name) = symbol.name() else {
                return;
            };
            let source = symbol.filename().map(|path| {
                let path = path.to_string_lossy();
                SourceLocation {
                    path: if self.full_paths {
                        path.into_owned()
                    } else {
                        shorten_source_path(&path)
                    },
                    line: symbol.lineno(),
                }
            });
            resolved = Some(ResolvedSymbol {
                name: format!("{name:#}"),
                start: symbol.addr().map(|start| start as usize as u64),
                source,
            });
        });
        resolved
    }

    fn cleanup(&self) {
        backtrace::clear_symbol_cache();
    }
}

/// Unwinds the current thread with the platform unwinder.
///
/// Only useful when the fault is handled on the thread that raised it. The
/// frames preceding `start` (the handler's own) are dropped, and when
/// `start` is not on the current stack at all the result is empty, so the
/// Linux backend, which handles faults on a separate thread, falls back to
/// the frame-pointer walk alone.
#[derive(Copy, Clone, Debug, Default)]
pub struct BacktraceUnwinder;

impl StackUnwinder for BacktraceUnwinder {
    fn unwind(&self, start: Option<u64>, limit: usize) -> Vec<u64> {
        let mut addresses = Vec::new();
        backtrace::trace(|frame| {
            addresses.push(frame.ip() as usize as u64);
            addresses.len() < 256
        });

        if let Some(start) = start {
            let Some(position) = addresses
                .iter()
                .position(|&ip| ip == start || ip == start.wrapping_add(1))
            else {
                return Vec::new();
            };
            addresses.drain(..position);
            addresses[0] = start;
        }
        addresses.truncate(limit);
        addresses
    }
}

/// Shortens standard library and cargo registry source paths.
///
/// ```
/// use faultward::capture::backtrace::shorten_source_path;
///
/// assert_eq!(
///     shorten_source_path("/rustc/17067e9ac6d7e98f18d4a3bd8f6ea2b7e7aa0ed1/library/std/src/panicking.rs"),
///     "RUST_SRC/std/src/panicking.rs",
/// );
/// assert_eq!(shorten_source_path("/build/src/main.rs"), "/build/src/main.rs");
/// ```
pub fn shorten_source_path(path: &str) -> String {
    static PATTERNS: OnceLock<Vec<(&'static str, regex::Regex)>> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        [
            (
                "RUST_SRC",
                r"(?:/lib/rustlib/src/rust|^/rustc/[0-9a-f]{40})/library/((?:std|core|alloc)/src/.*)$",
            ),
            (
                "CARGO",
                r"/\.cargo/registry/src/[^/]+-[0-9a-f]{16}/([^./]+-[0-9]+\.[^/]*/src/.*)$",
            ),
        ]
        .into_iter()
        .filter_map(|(kind, pattern)| Some((kind, regex::Regex::new(pattern).ok()?)))
        .collect()
    });

    let normalized = path.replace('\\', "/");
    patterns
        .iter()
        .find_map(|(kind, regex)| {
            let suffix = regex.captures(&normalized)?.get(1)?;
            Some(format!("{kind}/{}", suffix.as_str()))
        })
        .unwrap_or_else(|| path.to_owned())
}
