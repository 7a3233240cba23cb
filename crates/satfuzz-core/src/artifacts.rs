//! Per-seed artifact directories.
//!
//! Each iteration gets `<root>/mode-<m>/seed-<s>/`. A confirmed iteration
//! releases its directory; a failed one keeps it for postmortem inspection,
//! together with a `failure.json` record.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{FuzzError, Stage};
use crate::registry::GeneratorMode;

pub const INSTANCE_FILE: &str = "instance.cnf";
pub const REPLAY_INSTANCE_FILE: &str = "instance.replay.cnf";
pub const SOLUTION_FILE: &str = "solution.sol";
pub const GENERATOR_LOG: &str = "generator.log";
pub const SOLVER_LOG: &str = "solver.log";
pub const VERIFY_LOG: &str = "verify.log";
pub const FAILURE_RECORD: &str = "failure.json";

/// Directory of one seed's artifacts.
#[derive(Debug)]
pub struct SeedWorkspace {
    seed: u64,
    mode: GeneratorMode,
    dir: PathBuf,
}

impl SeedWorkspace {
    pub fn dir_for(root: &Path, seed: u64, mode: GeneratorMode) -> PathBuf {
        root.join(format!("mode-{mode}")).join(format!("seed-{seed}"))
    }

    /// Create a fresh workspace, clearing anything a previous run left behind
    /// for the same seed and mode. A directory holding an earlier failure
    /// record is moved aside to `seed-<s>.prev` (or `.prev-<n>`) instead.
    pub fn create(root: &Path, seed: u64, mode: GeneratorMode) -> Result<Self, FuzzError> {
        let dir = Self::dir_for(root, seed, mode);
        let artifact_err = |source: io::Error| FuzzError::Artifact {
            seed,
            mode,
            stage: Stage::Generate,
            path: dir.clone(),
            source,
        };
        if dir.join(FAILURE_RECORD).is_file() {
            let aside = Self::free_aside_path(&dir);
            fs::rename(&dir, &aside).map_err(artifact_err)?;
            warn!(
                seed,
                %mode,
                moved_to = %aside.display(),
                "kept earlier failure artifacts for this seed"
            );
        }
        match fs::remove_dir_all(&dir) {
            Ok(()) => debug!(dir = %dir.display(), "cleared stale seed workspace"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(artifact_err(err)),
        }
        fs::create_dir_all(&dir).map_err(artifact_err)?;
        Ok(Self { seed, mode, dir })
    }

    fn free_aside_path(dir: &Path) -> PathBuf {
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let first = dir.with_file_name(format!("{name}.prev"));
        if !first.exists() {
            return first;
        }
        (1u64..)
            .map(|n| dir.with_file_name(format!("{name}.prev-{n}")))
            .find(|candidate| !candidate.exists())
            .unwrap_or(first)
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn mode(&self) -> GeneratorMode {
        self.mode
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn instance_path(&self) -> PathBuf {
        self.dir.join(INSTANCE_FILE)
    }

    pub fn replay_instance_path(&self) -> PathBuf {
        self.dir.join(REPLAY_INSTANCE_FILE)
    }

    pub fn solution_path(&self) -> PathBuf {
        self.dir.join(SOLUTION_FILE)
    }

    pub fn generator_log(&self) -> PathBuf {
        self.dir.join(GENERATOR_LOG)
    }

    pub fn solver_log(&self) -> PathBuf {
        self.dir.join(SOLVER_LOG)
    }

    pub fn verify_log(&self) -> PathBuf {
        self.dir.join(VERIFY_LOG)
    }

    /// Write `record` as `failure.json` and keep the directory on disk.
    /// Returns the preserved directory.
    pub fn preserve<T: Serialize>(self, record: &T) -> io::Result<PathBuf> {
        let json = serde_json::to_string_pretty(record)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        fs::write(self.dir.join(FAILURE_RECORD), json)?;
        Ok(self.dir)
    }

    /// Delete the directory after a confirmed iteration.
    pub fn release(self) -> io::Result<()> {
        fs::remove_dir_all(&self.dir)
    }

    /// Remove the per-mode directory if no seed workspace is left in it.
    /// Only safe once no worker can still be creating workspaces under it.
    pub fn prune(root: &Path, mode: GeneratorMode) {
        let _ = fs::remove_dir(root.join(format!("mode-{mode}")));
    }
}
