//! Seed loop: Produce → Solve → Classify → Verify, halting on the first
//! failure.

use std::fs;
use std::ops::Range;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{error, info, warn};

use crate::artifacts::SeedWorkspace;
use crate::config::FuzzConfig;
use crate::error::FuzzError;
use crate::producer::{sha256_hex_bytes, InstanceProducer};
use crate::registry::{GeneratorMode, GeneratorRegistry};
use crate::report::{CampaignReport, FailureReport, REPORT_SCHEMA_VERSION};
use crate::runner::SolverRunner;
use crate::supervisor::{CancelToken, ProcessSupervisor};
use crate::verdict::Verdict;
use crate::verifier::{Toolchain, VerifierDispatcher};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CampaignSettings {
    pub mode: GeneratorMode,
    pub start_seed: u64,
    pub seeds: u64,
    /// Number of seeds in flight at once; 1 keeps the strictly sequential schedule.
    pub jobs: usize,
    /// Per external invocation.
    pub timeout: Option<Duration>,
    pub artifact_dir: PathBuf,
    /// Keep workspaces of confirmed seeds too.
    pub keep_artifacts: bool,
    pub check_determinism: bool,
}

impl Default for CampaignSettings {
    fn default() -> Self {
        FuzzConfig::default().settings()
    }
}

/// What a confirmed iteration leaves behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationRecord {
    pub seed: u64,
    pub verdict: Verdict,
    pub instance_sha256: String,
}

/// A campaign that stopped before confirming every seed.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct CampaignHalt {
    pub report: CampaignReport,
    pub error: FuzzError,
}

enum SeedResult {
    Confirmed(IterationRecord),
    Cancelled(FuzzError),
    Failed {
        error: FuzzError,
        report: FailureReport,
    },
}

#[derive(Default)]
struct Tally {
    confirmed: u64,
    sat: u64,
    unsat: u64,
    failure: Option<(FuzzError, FailureReport)>,
    cancelled: Option<FuzzError>,
}

impl Tally {
    fn absorb(&mut self, result: SeedResult) {
        match result {
            SeedResult::Confirmed(record) => {
                self.confirmed += 1;
                match record.verdict {
                    Verdict::Satisfiable => self.sat += 1,
                    Verdict::Unsatisfiable => self.unsat += 1,
                    Verdict::ProtocolViolation => {}
                }
            }
            SeedResult::Cancelled(err) => {
                if self.cancelled.is_none() {
                    self.cancelled = Some(err);
                }
            }
            SeedResult::Failed { error, report } => {
                let lower = match &self.failure {
                    Some((current, _)) => error.seed() < current.seed(),
                    None => true,
                };
                if lower {
                    self.failure = Some((error, report));
                }
            }
        }
    }

    /// A real failure wins; a bare cancellation only counts when nothing
    /// else went wrong (the campaign was interrupted from outside).
    fn into_failure(self) -> Option<(FuzzError, FailureReport)> {
        self.failure.or_else(|| {
            self.cancelled.map(|err| {
                let report = FailureReport::from_error(&err);
                (err, report)
            })
        })
    }
}

#[derive(Debug)]
pub struct Campaign {
    settings: CampaignSettings,
    registry: GeneratorRegistry,
    toolchain: Toolchain,
    generator_name: String,
    supervisor: ProcessSupervisor,
}

impl Campaign {
    /// Fails with `UnknownMode` before any seed runs if the mode is not registered.
    pub fn new(
        settings: CampaignSettings,
        registry: GeneratorRegistry,
        toolchain: Toolchain,
    ) -> Result<Self, FuzzError> {
        let generator_name = registry.lookup(settings.mode)?.name.clone();
        let supervisor = ProcessSupervisor::new(settings.timeout, CancelToken::new());
        Ok(Self {
            settings,
            registry,
            toolchain,
            generator_name,
            supervisor,
        })
    }

    pub fn from_config(config: &FuzzConfig) -> Result<Self, FuzzError> {
        Self::new(config.settings(), config.registry(), config.toolchain())
    }

    /// Share an externally owned token, e.g. one tripped by a signal handler.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.supervisor = ProcessSupervisor::new(self.settings.timeout, cancel);
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.supervisor.cancel_token().clone()
    }

    pub fn settings(&self) -> &CampaignSettings {
        &self.settings
    }

    pub fn generator_name(&self) -> &str {
        &self.generator_name
    }

    fn seed_range(&self) -> Range<u64> {
        let start = self.settings.start_seed;
        start..start.saturating_add(self.settings.seeds)
    }

    /// Run every seed. `Ok` means all of them were confirmed.
    pub fn run(&self) -> Result<CampaignReport, Box<CampaignHalt>> {
        let started = Instant::now();
        let range = self.seed_range();
        info!(
            mode = %self.settings.mode,
            generator = %self.generator_name,
            start_seed = range.start,
            seeds = self.settings.seeds,
            jobs = self.settings.jobs,
            "starting fuzz campaign"
        );

        let tally = if self.settings.jobs <= 1 {
            self.run_sequential(range)
        } else {
            self.run_parallel(range)
        };
        SeedWorkspace::prune(&self.settings.artifact_dir, self.settings.mode);

        let mut report = CampaignReport {
            schema_version: REPORT_SCHEMA_VERSION,
            mode: self.settings.mode,
            generator: self.generator_name.clone(),
            start_seed: self.settings.start_seed,
            requested_seeds: self.settings.seeds,
            jobs: self.settings.jobs,
            confirmed: tally.confirmed,
            sat_confirmed: tally.sat,
            unsat_confirmed: tally.unsat,
            elapsed_ms: started.elapsed().as_millis() as u64,
            overall: "pass".into(),
            failure: None,
        };

        match tally.into_failure() {
            None => {
                info!(
                    confirmed = report.confirmed,
                    sat = report.sat_confirmed,
                    unsat = report.unsat_confirmed,
                    "campaign confirmed every seed"
                );
                Ok(report)
            }
            Some((err, failure)) => {
                error!(
                    kind = %failure.kind,
                    seed = ?failure.seed,
                    mode = %failure.mode,
                    "campaign halted: {err}"
                );
                report.overall = "fail".into();
                report.failure = Some(failure);
                Err(Box::new(CampaignHalt { report, error: err }))
            }
        }
    }

    fn run_sequential(&self, range: Range<u64>) -> Tally {
        let mut tally = Tally::default();
        for seed in range {
            let result = self.execute_seed(seed);
            let stop = !matches!(result, SeedResult::Confirmed(_));
            tally.absorb(result);
            if stop {
                break;
            }
        }
        tally
    }

    /// Bounded worker pool over the seed range. The first failure cancels
    /// the shared token, which stops workers from claiming new seeds and
    /// kills whatever they have in flight.
    fn run_parallel(&self, range: Range<u64>) -> Tally {
        let end = range.end;
        let next = AtomicU64::new(range.start);
        let workers = (self.settings.jobs as u64).min(end - range.start).max(1);
        let cancel = self.supervisor.cancel_token();
        let (tx, rx) = mpsc::channel();

        thread::scope(|scope| {
            for _ in 0..workers {
                let tx = tx.clone();
                let next = &next;
                scope.spawn(move || loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let claimed =
                        next.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |seed| {
                            (seed < end).then(|| seed + 1)
                        });
                    let Ok(seed) = claimed else {
                        break;
                    };
                    let result = self.execute_seed(seed);
                    if !matches!(result, SeedResult::Confirmed(_)) {
                        cancel.cancel();
                    }
                    if tx.send(result).is_err() {
                        break;
                    }
                });
            }
            drop(tx);

            let mut tally = Tally::default();
            for result in rx {
                tally.absorb(result);
            }
            tally
        })
    }

    /// Run a single seed, e.g. to reproduce a reported failure.
    pub fn run_seed(&self, seed: u64) -> Result<IterationRecord, FuzzError> {
        match self.execute_seed(seed) {
            SeedResult::Confirmed(record) => Ok(record),
            SeedResult::Cancelled(err) | SeedResult::Failed { error: err, .. } => Err(err),
        }
    }

    fn execute_seed(&self, seed: u64) -> SeedResult {
        let mode = self.settings.mode;
        let workspace = match SeedWorkspace::create(&self.settings.artifact_dir, seed, mode) {
            Ok(workspace) => workspace,
            Err(err) => {
                let report = FailureReport::from_error(&err);
                return SeedResult::Failed { error: err, report };
            }
        };

        match self.iterate(seed, &workspace) {
            Ok(record) => {
                if !self.settings.keep_artifacts {
                    if let Err(err) = workspace.release() {
                        warn!(seed, "failed to release seed workspace: {err}");
                    }
                }
                SeedResult::Confirmed(record)
            }
            Err(err) if err.is_cancelled() => {
                // Partial output of an interrupted iteration is not evidence.
                let _ = workspace.release();
                SeedResult::Cancelled(err)
            }
            Err(err) => {
                let mut report = FailureReport::from_error(&err);
                report.instance_sha256 = fs::read(workspace.instance_path())
                    .ok()
                    .map(|bytes| sha256_hex_bytes(&bytes));
                report.artifact_dir = Some(workspace.dir().display().to_string());
                if let Err(io_err) = workspace.preserve(&report) {
                    warn!(seed, "failed to write failure record: {io_err}");
                    report.artifact_dir = None;
                }
                SeedResult::Failed { error: err, report }
            }
        }
    }

    fn iterate(&self, seed: u64, workspace: &SeedWorkspace) -> Result<IterationRecord, FuzzError> {
        let mode = self.settings.mode;
        info!(seed, %mode, "fuzzing seed");

        let instance = InstanceProducer::new(&self.registry, &self.supervisor)
            .with_determinism_check(self.settings.check_determinism)
            .produce(seed, mode, workspace)?;

        let run = SolverRunner::new(&self.toolchain.solver, &self.supervisor)
            .solve(&instance, workspace)?;

        let verdict = Verdict::classify(run.termination);
        if verdict == Verdict::ProtocolViolation {
            return Err(FuzzError::ProtocolViolation {
                seed,
                mode,
                status: run.termination,
            });
        }
        info!(seed, %verdict, "solver answered");

        VerifierDispatcher::new(&self.toolchain, &self.supervisor)
            .verify(verdict, &instance, &run, workspace)?;
        info!(seed, %verdict, "checked");

        Ok(IterationRecord {
            seed,
            verdict,
            instance_sha256: instance.sha256,
        })
    }
}
