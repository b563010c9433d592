use core::fmt;

/// Maximum number of modules enumerated for one report.
pub const MAX_MODULES: usize = 1024;

/// Placeholder used wherever an address has no owning module.
pub const UNKNOWN_MODULE: &str = "unknown";

/// A module (executable or shared object) mapped into the process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadedModule {
    /// Filesystem path, or a pseudo name such as `[vdso]`.
    pub path: String,
    /// Lowest mapped address.
    pub base: u64,
    /// Size of the mapped address range in bytes.
    pub size: u64,
}

impl LoadedModule {
    /// Creates a module entry.
    pub fn new(path: impl Into<String>, base: u64, size: u64) -> Self {
        Self {
            path: path.into(),
            base,
            size,
        }
    }

    /// Whether `address` lies inside the module.
    pub fn contains(&self, address: u64) -> bool {
        address >= self.base && address - self.base < self.size
    }

    /// Final path component, for compact stack traces.
    pub fn file_name(&self) -> &str {
        self.path
            .rsplit(['/', '\\'])
            .next()
            .filter(|name| !name.is_empty())
            .unwrap_or(self.path.as_str())
    }
}

impl fmt::Display for LoadedModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "0x{:016X}-0x{:016X}  {}",
            self.base,
            self.base.saturating_add(self.size),
            self.path
        )
    }
}

/// Snapshot of the loaded modules, used for address-to-module lookups.
#[derive(Clone, Debug, Default)]
pub struct ModuleMap {
    modules: Vec<LoadedModule>,
}

impl ModuleMap {
    /// Builds a map from an enumeration, keeping at most [`MAX_MODULES`]
    /// entries.
    pub fn new(mut modules: Vec<LoadedModule>) -> Self {
        modules.truncate(MAX_MODULES);
        Self { modules }
    }

    /// The modules, in enumeration order.
    pub fn modules(&self) -> &[LoadedModule] {
        &self.modules
    }

    /// Number of modules in the snapshot.
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Whether the snapshot is empty.
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// The module that contains `address`.
    ///
    /// ```
    /// use faultward::capture::{LoadedModule, ModuleMap};
    ///
    /// let map = ModuleMap::new(vec![
    ///     LoadedModule::new("/opt/game/bin/game", 0x40_0000, 0x1_0000),
    ///     LoadedModule::new("/usr/lib/libc.so.6", 0x7f00_0000_0000, 0x20_0000),
    /// ]);
    /// assert_eq!(map.module_for(0x40_1234).map(|m| m.file_name()), Some("game"));
    /// assert!(map.module_for(0x10).is_none());
    /// ```
    pub fn module_for(&self, address: u64) -> Option<&LoadedModule> {
        self.modules.iter().find(|module| module.contains(address))
    }

    /// Owning module path for `address`, or [`UNKNOWN_MODULE`].
    pub fn module_name_for(&self, address: u64) -> &str {
        self.module_for(address)
            .map_or(UNKNOWN_MODULE, |module| module.path.as_str())
    }
}
