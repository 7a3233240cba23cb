use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::registry::GeneratorMode;
use crate::supervisor::{SuperviseError, Termination};

/// Step of an iteration in which an external tool (or artifact access) failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Generate,
    Solve,
    CertificateCheck,
    ReferenceSolve,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Generate => "generate",
            Stage::Solve => "solve",
            Stage::CertificateCheck => "certificate_check",
            Stage::ReferenceSolve => "reference_solve",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable, serializable failure taxonomy. One per [`FuzzError`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    UnknownMode,
    GeneratorFailure,
    ProtocolViolation,
    InvalidSolution,
    InvalidUnsat,
    Timeout,
    Spawn,
    Artifact,
    NondeterministicGenerator,
    Cancelled,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::UnknownMode => "unknown_mode",
            FailureKind::GeneratorFailure => "generator_failure",
            FailureKind::ProtocolViolation => "protocol_violation",
            FailureKind::InvalidSolution => "invalid_solution",
            FailureKind::InvalidUnsat => "invalid_unsat",
            FailureKind::Timeout => "timeout",
            FailureKind::Spawn => "spawn",
            FailureKind::Artifact => "artifact",
            FailureKind::NondeterministicGenerator => "nondeterministic_generator",
            FailureKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every way a fuzzing iteration (or campaign setup) can fail.
///
/// Every variant halts the campaign and nothing is retried.
/// [`FuzzError::Cancelled`] is only surfaced when no other failure caused it.
#[derive(Debug, Error, Diagnostic)]
pub enum FuzzError {
    #[error("unknown generator mode {mode}")]
    #[diagnostic(
        code(satfuzz::unknown_mode),
        help("built-in modes are 1..6; register more under `generators` in the config file")
    )]
    UnknownMode { mode: GeneratorMode },

    #[error("generator for mode {mode} failed on seed {seed} ({status})")]
    #[diagnostic(code(satfuzz::generator_failure))]
    GeneratorFailure {
        seed: u64,
        mode: GeneratorMode,
        status: Termination,
    },

    #[error("solver violated its exit-code protocol on seed {seed} (mode {mode}): {status}, expected exit 10 or 20")]
    #[diagnostic(code(satfuzz::protocol_violation))]
    ProtocolViolation {
        seed: u64,
        mode: GeneratorMode,
        status: Termination,
    },

    #[error("INVALID SOLUTION on seed {seed} (mode {mode}): {detail}")]
    #[diagnostic(
        code(satfuzz::invalid_solution),
        help("the instance and solution are preserved in the seed's artifact directory")
    )]
    InvalidSolution {
        seed: u64,
        mode: GeneratorMode,
        detail: String,
    },

    #[error("INVALID UNSAT on seed {seed} (mode {mode}): reference solver {status}, expected exit 20")]
    #[diagnostic(
        code(satfuzz::invalid_unsat),
        help("the reference solver is an oracle, not a proof; inspect verify.log before blaming either engine")
    )]
    InvalidUnsat {
        seed: u64,
        mode: GeneratorMode,
        status: Termination,
    },

    #[error("{stage} step on seed {seed} (mode {mode}) exceeded the {}s timeout", .limit.as_secs())]
    #[diagnostic(code(satfuzz::timeout), help("raise --timeout or pass --timeout 0 to disable it"))]
    Timeout {
        seed: u64,
        mode: GeneratorMode,
        stage: Stage,
        limit: Duration,
    },

    #[error("failed to execute '{}' for {stage} step on seed {seed} (mode {mode})", .program.display())]
    #[diagnostic(code(satfuzz::spawn))]
    Spawn {
        seed: u64,
        mode: GeneratorMode,
        stage: Stage,
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("artifact I/O failed at '{}' during {stage} step on seed {seed} (mode {mode})", .path.display())]
    #[diagnostic(code(satfuzz::artifact))]
    Artifact {
        seed: u64,
        mode: GeneratorMode,
        stage: Stage,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("generator for mode {mode} is not deterministic on seed {seed}: {first} != {second}")]
    #[diagnostic(code(satfuzz::nondeterministic_generator))]
    NondeterministicGenerator {
        seed: u64,
        mode: GeneratorMode,
        first: String,
        second: String,
    },

    #[error("{stage} step on seed {seed} (mode {mode}) was cancelled")]
    #[diagnostic(code(satfuzz::cancelled))]
    Cancelled {
        seed: u64,
        mode: GeneratorMode,
        stage: Stage,
    },
}

impl FuzzError {
    pub fn kind(&self) -> FailureKind {
        match self {
            FuzzError::UnknownMode { .. } => FailureKind::UnknownMode,
            FuzzError::GeneratorFailure { .. } => FailureKind::GeneratorFailure,
            FuzzError::ProtocolViolation { .. } => FailureKind::ProtocolViolation,
            FuzzError::InvalidSolution { .. } => FailureKind::InvalidSolution,
            FuzzError::InvalidUnsat { .. } => FailureKind::InvalidUnsat,
            FuzzError::Timeout { .. } => FailureKind::Timeout,
            FuzzError::Spawn { .. } => FailureKind::Spawn,
            FuzzError::Artifact { .. } => FailureKind::Artifact,
            FuzzError::NondeterministicGenerator { .. } => FailureKind::NondeterministicGenerator,
            FuzzError::Cancelled { .. } => FailureKind::Cancelled,
        }
    }

    /// Seed of the failing iteration. `None` only for campaign setup errors.
    pub fn seed(&self) -> Option<u64> {
        match self {
            FuzzError::UnknownMode { .. } => None,
            FuzzError::GeneratorFailure { seed, .. }
            | FuzzError::ProtocolViolation { seed, .. }
            | FuzzError::InvalidSolution { seed, .. }
            | FuzzError::InvalidUnsat { seed, .. }
            | FuzzError::Timeout { seed, .. }
            | FuzzError::Spawn { seed, .. }
            | FuzzError::Artifact { seed, .. }
            | FuzzError::NondeterministicGenerator { seed, .. }
            | FuzzError::Cancelled { seed, .. } => Some(*seed),
        }
    }

    pub fn mode(&self) -> GeneratorMode {
        match self {
            FuzzError::UnknownMode { mode }
            | FuzzError::GeneratorFailure { mode, .. }
            | FuzzError::ProtocolViolation { mode, .. }
            | FuzzError::InvalidSolution { mode, .. }
            | FuzzError::InvalidUnsat { mode, .. }
            | FuzzError::Timeout { mode, .. }
            | FuzzError::Spawn { mode, .. }
            | FuzzError::Artifact { mode, .. }
            | FuzzError::NondeterministicGenerator { mode, .. }
            | FuzzError::Cancelled { mode, .. } => *mode,
        }
    }

    /// Iteration step the failure belongs to, where one applies.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            FuzzError::UnknownMode { .. } => None,
            FuzzError::GeneratorFailure { .. } | FuzzError::NondeterministicGenerator { .. } => {
                Some(Stage::Generate)
            }
            FuzzError::ProtocolViolation { .. } => Some(Stage::Solve),
            FuzzError::InvalidSolution { .. } => Some(Stage::CertificateCheck),
            FuzzError::InvalidUnsat { .. } => Some(Stage::ReferenceSolve),
            FuzzError::Timeout { stage, .. }
            | FuzzError::Spawn { stage, .. }
            | FuzzError::Artifact { stage, .. }
            | FuzzError::Cancelled { stage, .. } => Some(*stage),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, FuzzError::Cancelled { .. })
    }

    /// Attach iteration context to a supervision failure of `program`.
    pub(crate) fn from_supervise(
        err: SuperviseError,
        seed: u64,
        mode: GeneratorMode,
        stage: Stage,
        program: &Path,
    ) -> Self {
        match err {
            SuperviseError::Spawn(source) | SuperviseError::Wait(source) => FuzzError::Spawn {
                seed,
                mode,
                stage,
                program: program.to_path_buf(),
                source,
            },
            SuperviseError::Redirect { path, source } => FuzzError::Artifact {
                seed,
                mode,
                stage,
                path,
                source,
            },
            SuperviseError::TimedOut(limit) => FuzzError::Timeout {
                seed,
                mode,
                stage,
                limit,
            },
            SuperviseError::Cancelled => FuzzError::Cancelled { seed, mode, stage },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_kind_serializes_snake_case() {
        let json = serde_json::to_string(&FailureKind::InvalidUnsat).unwrap();
        assert_eq!(json, "\"invalid_unsat\"");
        assert_eq!(FailureKind::InvalidUnsat.as_str(), "invalid_unsat");
    }

    #[test]
    fn accessors_expose_seed_mode_and_stage() {
        let err = FuzzError::InvalidSolution {
            seed: 7,
            mode: GeneratorMode::new(5),
            detail: "checker exited with status 1".into(),
        };
        assert_eq!(err.kind(), FailureKind::InvalidSolution);
        assert_eq!(err.seed(), Some(7));
        assert_eq!(err.mode(), GeneratorMode::new(5));
        assert_eq!(err.stage(), Some(Stage::CertificateCheck));
        assert!(err.to_string().contains("INVALID SOLUTION on seed 7"));
    }

    #[test]
    fn unknown_mode_has_no_seed() {
        let err = FuzzError::UnknownMode {
            mode: GeneratorMode::new(42),
        };
        assert_eq!(err.seed(), None);
        assert_eq!(err.stage(), None);
        assert_eq!(err.to_string(), "unknown generator mode 42");
    }

    #[test]
    fn protocol_violation_reports_exit_status() {
        let err = FuzzError::ProtocolViolation {
            seed: 3,
            mode: GeneratorMode::new(1),
            status: Termination::Exited(7),
        };
        let msg = err.to_string();
        assert!(msg.contains("exit status 7"), "{msg}");
        assert_eq!(err.stage(), Some(Stage::Solve));
        assert!(!err.is_cancelled());
    }

    #[test]
    fn timeout_message_names_stage() {
        let err = FuzzError::Timeout {
            seed: 0,
            mode: GeneratorMode::new(2),
            stage: Stage::ReferenceSolve,
            limit: Duration::from_secs(5),
        };
        assert_eq!(
            err.to_string(),
            "reference_solve step on seed 0 (mode 2) exceeded the 5s timeout"
        );
    }

    #[test]
    fn supervise_errors_gain_iteration_context() {
        let mode = GeneratorMode::new(1);
        let err = FuzzError::from_supervise(
            SuperviseError::TimedOut(Duration::from_secs(3)),
            11,
            mode,
            Stage::Solve,
            Path::new("bin/sat"),
        );
        assert_eq!(err.kind(), FailureKind::Timeout);
        assert_eq!(err.stage(), Some(Stage::Solve));

        let err = FuzzError::from_supervise(
            SuperviseError::Cancelled,
            11,
            mode,
            Stage::Generate,
            Path::new("gen"),
        );
        assert!(err.is_cancelled());

        let err = FuzzError::from_supervise(
            SuperviseError::Spawn(std::io::Error::from(std::io::ErrorKind::NotFound)),
            11,
            mode,
            Stage::ReferenceSolve,
            Path::new("./cryptominisat"),
        );
        assert_eq!(err.kind(), FailureKind::Spawn);
        assert!(err.to_string().contains("./cryptominisat"));
    }
}
