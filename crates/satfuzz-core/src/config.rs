//! Campaign configuration file.
//!
//! Every field has a default matching the reference harness layout, so an
//! empty JSON object (or no file at all) is a valid configuration. Command
//! line flags are applied on top by the CLI.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::campaign::CampaignSettings;
use crate::registry::{GeneratorMode, GeneratorRegistry, GeneratorSpec, SeedStyle, DEFAULT_MODE};
use crate::verifier::{Toolchain, DEFAULT_CHECK_FLAG};

pub const DEFAULT_SEEDS: u64 = 1000;
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config file '{}' is not valid JSON: {source}", .path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// Extra (or overriding) generator registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeneratorEntry {
    pub mode: GeneratorMode,
    pub name: String,
    /// Resolved under `generator_dir` when relative.
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    pub seed_style: SeedStyle,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FuzzConfig {
    pub mode: GeneratorMode,
    pub solver: PathBuf,
    pub check_flag: String,
    pub reference_solver: PathBuf,
    pub generator_dir: PathBuf,
    pub artifact_dir: PathBuf,
    pub seeds: u64,
    pub start_seed: u64,
    pub jobs: usize,
    /// Per-invocation limit; 0 disables it.
    pub timeout_secs: u64,
    pub keep_artifacts: bool,
    pub check_determinism: bool,
    pub generators: Vec<GeneratorEntry>,
}

impl Default for FuzzConfig {
    fn default() -> Self {
        Self {
            mode: DEFAULT_MODE,
            solver: PathBuf::from("bin/sat"),
            check_flag: DEFAULT_CHECK_FLAG.to_string(),
            reference_solver: PathBuf::from("./cryptominisat"),
            generator_dir: PathBuf::from("../cnf-utils"),
            artifact_dir: PathBuf::from("fuzz-artifacts"),
            seeds: DEFAULT_SEEDS,
            start_seed: 0,
            jobs: 1,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            keep_artifacts: false,
            check_determinism: false,
            generators: Vec::new(),
        }
    }
}

impl FuzzConfig {
    pub fn from_json_str(raw: &str, origin: &Path) -> Result<Self, ConfigError> {
        serde_json::from_str(raw).map_err(|source| ConfigError::Decode {
            path: origin.to_path_buf(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw, path)
    }

    /// Collect every problem instead of stopping at the first one.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        if self.seeds == 0 {
            errors.push("seeds must be at least 1".to_string());
        }
        if self.start_seed.checked_add(self.seeds).is_none() {
            errors.push(format!(
                "start_seed {} + seeds {} overflows the seed range",
                self.start_seed, self.seeds
            ));
        }
        if self.jobs == 0 {
            errors.push("jobs must be at least 1".to_string());
        }
        if self.solver.as_os_str().is_empty() {
            errors.push("solver must be non-empty".to_string());
        }
        if self.reference_solver.as_os_str().is_empty() {
            errors.push("reference_solver must be non-empty".to_string());
        }
        let mut seen = HashSet::new();
        for (i, entry) in self.generators.iter().enumerate() {
            if !seen.insert(entry.mode) {
                errors.push(format!("generators[{i}]: duplicate mode {}", entry.mode));
            }
            if entry.name.trim().is_empty() {
                errors.push(format!("generators[{i}]: name must be non-empty"));
            }
            if entry.program.as_os_str().is_empty() {
                errors.push(format!("generators[{i}]: program must be non-empty"));
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        if self.timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.timeout_secs))
        }
    }

    /// Built-in generators plus the configured entries, which win on conflict.
    pub fn registry(&self) -> GeneratorRegistry {
        self.generators
            .iter()
            .fold(GeneratorRegistry::builtin(&self.generator_dir), |registry, entry| {
                let spec = GeneratorSpec::new(&entry.name, &entry.program, entry.seed_style)
                    .with_args(entry.args.iter().cloned());
                registry.with_entry_in(entry.mode, spec, &self.generator_dir)
            })
    }

    pub fn toolchain(&self) -> Toolchain {
        Toolchain::new(&self.solver, &self.reference_solver).with_check_flag(&self.check_flag)
    }

    pub fn settings(&self) -> CampaignSettings {
        CampaignSettings {
            mode: self.mode,
            start_seed: self.start_seed,
            seeds: self.seeds,
            jobs: self.jobs,
            timeout: self.timeout(),
            artifact_dir: self.artifact_dir.clone(),
            keep_artifacts: self.keep_artifacts,
            check_determinism: self.check_determinism,
        }
    }
}
