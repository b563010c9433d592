use core::fmt;

/// A symbol covering a code address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedSymbol {
    /// Demangled symbol name.
    pub name: String,
    /// Start address of the symbol, when the debug information provides it.
    pub start: Option<u64>,
    /// Source location of the address, when available.
    pub source: Option<SourceLocation>,
}

impl ResolvedSymbol {
    /// A symbol with a known start address and no source location.
    pub fn new(name: impl Into<String>, start: u64) -> Self {
        Self {
            name: name.into(),
            start: Some(start),
            source: None,
        }
    }
}

/// File and line of a code address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceLocation {
    /// Path as shown in reports (possibly shortened).
    pub path: String,
    /// Line number, when known.
    pub line: Option<u32>,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "{}:{line}", self.path),
            None => f.write_str(&self.path),
        }
    }
}

/// Maps code addresses back to symbol names.
///
/// Resolution must never fail loudly: anything it cannot resolve is simply
/// `None`, and the report shows the raw address instead.
///
/// [`initialize`](Self::initialize) and [`cleanup`](Self::cleanup) bracket
/// every batch of lookups; use [`SymbolScope`] rather than calling them
/// directly.
pub trait SymbolResolver: 'static + Send + Sync + fmt::Debug {
    /// Prepares the symbol service. Called once before a batch of lookups.
    fn initialize(&self) {}

    /// Resolves a single code address.
    fn resolve(&self, address: u64) -> Option<ResolvedSymbol>;

    /// Releases whatever [`initialize`](Self::initialize) and the lookups
    /// acquired.
    fn cleanup(&self) {}
}

/// Scoped use of a [`SymbolResolver`]: initialized on entry, cleaned up on
/// drop, on every exit path.
///
/// ```
/// use faultward::capture::{ResolvedSymbol, SymbolResolver, SymbolScope};
///
/// #[derive(Debug)]
/// struct Fixed;
///
/// impl SymbolResolver for Fixed {
///     fn resolve(&self, address: u64) -> Option<ResolvedSymbol> {
///         (address >= 0x1000).then(|| ResolvedSymbol::new("game::tick", 0x1000))
///     }
/// }
///
/// let scope = SymbolScope::enter(&Fixed);
/// assert_eq!(scope.resolve(0x1010).unwrap().name, "game::tick");
/// assert!(scope.resolve(0x10).is_none());
/// ```
pub struct SymbolScope<'a> {
    resolver: &'a dyn SymbolResolver,
}

impl<'a> SymbolScope<'a> {
    /// Initializes `resolver` and returns the guard.
    pub fn enter(resolver: &'a dyn SymbolResolver) -> Self {
        resolver.initialize();
        Self { resolver }
    }

    /// Resolves an address through the scoped resolver.
    pub fn resolve(&self, address: u64) -> Option<ResolvedSymbol> {
        self.resolver.resolve(address)
    }
}

impl Drop for SymbolScope<'_> {
    fn drop(&mut self) {
        self.resolver.cleanup();
    }
}

impl fmt::Debug for SymbolScope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymbolScope")
            .field("resolver", &self.resolver)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use core::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Debug, Default)]
    struct Counting {
        initialized: AtomicUsize,
        cleaned: AtomicUsize,
    }

    impl SymbolResolver for Counting {
        fn initialize(&self) {
            self.initialized.fetch_add(1, Ordering::Relaxed);
        }

        fn resolve(&self, _address: u64) -> Option<ResolvedSymbol> {
            None
        }

        fn cleanup(&self) {
            self.cleaned.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn scope_brackets_usage() {
        let resolver = Counting::default();
        {
            let scope = SymbolScope::enter(&resolver);
            assert_eq!(resolver.initialized.load(Ordering::Relaxed), 1);
            assert_eq!(resolver.cleaned.load(Ordering::Relaxed), 0);
            assert!(scope.resolve(0x1234).is_none());
        }
        assert_eq!(resolver.cleaned.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn scope_cleans_up_on_panic() {
        let resolver = Counting::default();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _scope = SymbolScope::enter(&resolver);
            panic!("lookup blew up");
        }));
        assert!(result.is_err());
        assert_eq!(resolver.cleaned.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn source_location_display() {
        let with_line = SourceLocation {
            path: "src/main.rs".into(),
            line: Some(12),
        };
        let without = SourceLocation {
            path: "src/main.rs".into(),
            line: None,
        };
        assert_eq!(with_line.to_string(), "src/main.rs:12");
        assert_eq!(without.to_string(), "src/main.rs");
    }
}
