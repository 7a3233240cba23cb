//! Differential fuzzing harness for SAT solvers.
//!
//! For each seed a random CNF instance is produced by an external generator,
//! handed to the solver-under-test, and the solver's claim is cross-checked:
//! satisfiable answers through the solver's own certificate mode,
//! unsatisfiable answers against a trusted reference solver. The first
//! disagreement halts the campaign and keeps the seed's artifacts.

pub mod artifacts;
pub mod campaign;
pub mod config;
pub mod error;
pub mod producer;
pub mod registry;
pub mod report;
pub mod runner;
pub mod supervisor;
pub mod verdict;
pub mod verifier;

pub use campaign::{Campaign, CampaignHalt, CampaignSettings, IterationRecord};
pub use config::{ConfigError, FuzzConfig};
pub use error::{FailureKind, FuzzError, Stage};
pub use registry::{GeneratorMode, GeneratorRegistry, GeneratorSpec, SeedStyle};
pub use report::{write_report, CampaignReport, FailureReport};
pub use supervisor::{CancelToken, ProcessSupervisor, Termination};
pub use verdict::Verdict;
pub use verifier::Toolchain;

#[cfg(all(test, unix))]
pub(crate) mod test_support {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    /// Write an executable `/bin/sh` script into `dir`.
    pub(crate) fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }
}
