//! Standard library selection.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the interpreter's standard libraries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StdLib {
    /// Basic functions (`print`, `pairs`, `pcall`, ...)
    Base,
    /// `package` / `require`
    Package,
    /// `coroutine`
    Coroutine,
    /// `table`
    Table,
    /// `io`
    Io,
    /// `os`
    Os,
    /// `string`
    String,
    /// `math`
    Math,
    /// `utf8`
    Utf8,
    /// `debug`
    Debug,
}

impl StdLib {
    /// Every library, in load order.
    pub const ALL: [StdLib; 10] = [
        StdLib::Base,
        StdLib::Package,
        StdLib::Coroutine,
        StdLib::Table,
        StdLib::Io,
        StdLib::Os,
        StdLib::String,
        StdLib::Math,
        StdLib::Utf8,
        StdLib::Debug,
    ];

    /// Stable library id, also its bit position in a [`StdLibSet`].
    pub fn id(self) -> u32 {
        self as u32
    }

    /// Name the library registers itself under (`_G` for the base library).
    pub fn module_name(self) -> &'static str {
        match self {
            StdLib::Base => "_G",
            StdLib::Package => "package",
            StdLib::Coroutine => "coroutine",
            StdLib::Table => "table",
            StdLib::Io => "io",
            StdLib::Os => "os",
            StdLib::String => "string",
            StdLib::Math => "math",
            StdLib::Utf8 => "utf8",
            StdLib::Debug => "debug",
        }
    }

    fn cli_name(self) -> &'static str {
        match self {
            StdLib::Base => "base",
            other => other.module_name(),
        }
    }
}

impl fmt::Display for StdLib {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.cli_name())
    }
}

impl FromStr for StdLib {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StdLib::ALL
            .iter()
            .copied()
            .find(|lib| lib.cli_name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown standard library: {}", s))
    }
}

/// A set of standard libraries, stored as a bitmask over [`StdLib::id`].
///
/// # Examples
///
/// ```
/// use core_types::{StdLib, StdLibSet};
///
/// let set = StdLibSet::default_set();
/// assert!(set.contains(StdLib::Base));
/// assert!(!set.contains(StdLib::Io));
///
/// let parsed: StdLibSet = "base,math".parse().unwrap();
/// assert_eq!(parsed.iter().collect::<Vec<_>>(), vec![StdLib::Base, StdLib::Math]);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "Vec<StdLib>", into = "Vec<StdLib>")]
pub struct StdLibSet(u32);

impl StdLibSet {
    /// No libraries.
    pub const fn empty() -> Self {
        StdLibSet(0)
    }

    /// Every library, including `io`, `os` and `debug`.
    pub fn all() -> Self {
        StdLib::ALL.iter().copied().collect()
    }

    /// The sandbox-friendly default: base, coroutine, table, string, math
    /// and utf8.
    pub fn default_set() -> Self {
        [
            StdLib::Base,
            StdLib::Coroutine,
            StdLib::Table,
            StdLib::String,
            StdLib::Math,
            StdLib::Utf8,
        ]
        .into_iter()
        .collect()
    }

    /// Returns a copy with `lib` added.
    pub fn with(mut self, lib: StdLib) -> Self {
        self.insert(lib);
        self
    }

    /// Adds a library.
    pub fn insert(&mut self, lib: StdLib) {
        self.0 |= 1 << lib.id();
    }

    /// Returns whether `lib` is in the set.
    pub fn contains(self, lib: StdLib) -> bool {
        self.0 & (1 << lib.id()) != 0
    }

    /// Returns whether the set is empty.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Raw bitmask.
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Iterates the members in load order.
    pub fn iter(self) -> impl Iterator<Item = StdLib> {
        StdLib::ALL.into_iter().filter(move |lib| self.contains(*lib))
    }
}

impl FromIterator<StdLib> for StdLibSet {
    fn from_iter<I: IntoIterator<Item = StdLib>>(iter: I) -> Self {
        let mut set = StdLibSet::empty();
        for lib in iter {
            set.insert(lib);
        }
        set
    }
}

impl From<Vec<StdLib>> for StdLibSet {
    fn from(libs: Vec<StdLib>) -> Self {
        libs.into_iter().collect()
    }
}

impl From<StdLibSet> for Vec<StdLib> {
    fn from(set: StdLibSet) -> Self {
        set.iter().collect()
    }
}

/// Parses a comma-separated list; `default` and `all` are accepted as names.
impl FromStr for StdLibSet {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut set = StdLibSet::empty();
        for name in s.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            match name {
                "default" => set.0 |= StdLibSet::default_set().0,
                "all" => set.0 |= StdLibSet::all().0,
                other => set.insert(other.parse()?),
            }
        }
        Ok(set)
    }
}
