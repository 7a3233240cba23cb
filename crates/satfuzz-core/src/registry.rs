//! Mode-to-generator table.
//!
//! A [`GeneratorMode`] selects one external CNF generator together with the
//! way it expects its seed. The registry is assembled once (built-in entries
//! plus whatever the configuration file adds) and is read-only afterwards.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FuzzError;

/// Default generator mode when a campaign does not pick one.
pub const DEFAULT_MODE: GeneratorMode = GeneratorMode(1);

/// Fuzzing mode identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GeneratorMode(u32);

impl GeneratorMode {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u32 {
        self.0
    }
}

impl Default for GeneratorMode {
    fn default() -> Self {
        DEFAULT_MODE
    }
}

impl fmt::Display for GeneratorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for GeneratorMode {
    type Err = std::num::ParseIntError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        raw.trim().parse().map(GeneratorMode)
    }
}

/// How a generator expects to receive its seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SeedStyle {
    /// `<program> [args...] <seed>`
    Positional,
    /// `<program> [args...] -s <seed>`
    ShortFlag,
    /// `<program> [args...] --seed=<seed>`
    LongFlag,
}

impl SeedStyle {
    /// Render the seed into the trailing argument(s) for this convention.
    pub fn seed_args(&self, seed: u64) -> Vec<String> {
        match self {
            SeedStyle::Positional => vec![seed.to_string()],
            SeedStyle::ShortFlag => vec!["-s".to_string(), seed.to_string()],
            SeedStyle::LongFlag => vec![format!("--seed={seed}")],
        }
    }
}

/// Invocation template for one external generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorSpec {
    pub name: String,
    pub program: PathBuf,
    /// Fixed arguments placed before the seed.
    pub args: Vec<String>,
    pub seed_style: SeedStyle,
}

impl GeneratorSpec {
    pub fn new(name: impl Into<String>, program: impl Into<PathBuf>, seed_style: SeedStyle) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            seed_style,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Full argument vector for `seed` (program not included).
    pub fn arguments(&self, seed: u64) -> Vec<OsString> {
        self.args
            .iter()
            .cloned()
            .chain(self.seed_style.seed_args(seed))
            .map(OsString::from)
            .collect()
    }

    /// Resolve a relative program against the generator directory. Absolute
    /// paths are kept as-is.
    fn resolved_in(mut self, generator_dir: &Path) -> Self {
        if self.program.is_relative() {
            self.program = generator_dir.join(&self.program);
        }
        self
    }
}

/// Read-only mapping from mode to generator.
#[derive(Debug, Clone, Default)]
pub struct GeneratorRegistry {
    entries: BTreeMap<GeneratorMode, GeneratorSpec>,
}

impl GeneratorRegistry {
    /// Empty registry; mostly useful in tests.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The six built-in generators, with programs resolved under `generator_dir`.
    pub fn builtin(generator_dir: &Path) -> Self {
        let table = [
            (1, GeneratorSpec::new("brummayer", "cnf-fuzz-brummayer.py", SeedStyle::ShortFlag)),
            (2, GeneratorSpec::new("biere", "cnf-fuzz-biere", SeedStyle::Positional)),
            (3, GeneratorSpec::new("xor", "cnf-fuzz-xor.py", SeedStyle::LongFlag)),
            (4, GeneratorSpec::new("multipart", "multipart.py", SeedStyle::LongFlag)),
            (
                5,
                GeneratorSpec::new("sgen4-sat", "sgen4", SeedStyle::ShortFlag)
                    .with_args(["-sat", "-n", "50"]),
            ),
            (
                6,
                GeneratorSpec::new("sgen4-unsat", "sgen4", SeedStyle::ShortFlag)
                    .with_args(["-unsat", "-n", "50"]),
            ),
        ];

        table
            .into_iter()
            .fold(Self::empty(), |registry, (id, spec)| {
                registry.with_entry(GeneratorMode::new(id), spec.resolved_in(generator_dir))
            })
    }

    /// Register (or replace) the generator for `mode`. Consumes the registry
    /// so that entries can only be added while it is being assembled.
    pub fn with_entry(mut self, mode: GeneratorMode, spec: GeneratorSpec) -> Self {
        self.entries.insert(mode, spec);
        self
    }

    /// Same as [`with_entry`](Self::with_entry), resolving a relative program
    /// under `generator_dir`.
    pub fn with_entry_in(self, mode: GeneratorMode, spec: GeneratorSpec, generator_dir: &Path) -> Self {
        self.with_entry(mode, spec.resolved_in(generator_dir))
    }

    pub fn lookup(&self, mode: GeneratorMode) -> Result<&GeneratorSpec, FuzzError> {
        self.entries
            .get(&mode)
            .ok_or(FuzzError::UnknownMode { mode })
    }

    pub fn modes(&self) -> impl Iterator<Item = GeneratorMode> + '_ {
        self.entries.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
