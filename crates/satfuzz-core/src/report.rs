use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{FailureKind, FuzzError, Stage};
use crate::registry::GeneratorMode;

pub const REPORT_SCHEMA_VERSION: u32 = 1;

/// Postmortem record for the iteration that halted a campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    pub kind: FailureKind,
    pub seed: Option<u64>,
    pub mode: GeneratorMode,
    pub stage: Option<Stage>,
    pub message: String,
    pub artifact_dir: Option<String>,
    pub instance_sha256: Option<String>,
}

impl FailureReport {
    pub fn from_error(err: &FuzzError) -> Self {
        Self {
            kind: err.kind(),
            seed: err.seed(),
            mode: err.mode(),
            stage: err.stage(),
            message: err.to_string(),
            artifact_dir: None,
            instance_sha256: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignReport {
    pub schema_version: u32,
    pub mode: GeneratorMode,
    pub generator: String,
    pub start_seed: u64,
    pub requested_seeds: u64,
    pub jobs: usize,
    pub confirmed: u64,
    pub sat_confirmed: u64,
    pub unsat_confirmed: u64,
    pub elapsed_ms: u64,
    pub overall: String,
    pub failure: Option<FailureReport>,
}

impl CampaignReport {
    pub fn passed(&self) -> bool {
        self.failure.is_none()
    }

    /// One-line human summary.
    pub fn summary_line(&self) -> String {
        match &self.failure {
            None => format!(
                "Campaign PASSED: mode {} ({}), {} seeds confirmed ({} sat, {} unsat) in {} ms",
                self.mode,
                self.generator,
                self.confirmed,
                self.sat_confirmed,
                self.unsat_confirmed,
                self.elapsed_ms
            ),
            Some(failure) => {
                let seed = failure
                    .seed
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "-".into());
                let artifacts = failure
                    .artifact_dir
                    .as_deref()
                    .map(|dir| format!(", artifacts kept in {dir}"))
                    .unwrap_or_default();
                format!(
                    "Campaign FAILED: {} at seed {} (mode {}) after {} confirmed seeds{}",
                    failure.kind, seed, failure.mode, self.confirmed, artifacts
                )
            }
        }
    }
}

/// Write `report` as pretty JSON, creating parent directories as needed.
pub fn write_report(path: &Path, report: &CampaignReport) -> std::io::Result<PathBuf> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(report)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
    fs::write(path, json)?;
    Ok(path.to_path_buf())
}
