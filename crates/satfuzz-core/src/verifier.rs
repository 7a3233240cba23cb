//! Verdict-directed cross-checking.
//!
//! A satisfiable claim is checked directly: the solver's own certificate mode
//! replays the witness against the instance in polynomial time. An
//! unsatisfiable claim has no witness, so it is put to an independent
//! reference solver instead. That second path is an oracle, not a proof: a bug
//! shared by both engines goes unnoticed.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::artifacts::SeedWorkspace;
use crate::error::{FuzzError, Stage};
use crate::producer::Instance;
use crate::runner::SolveRun;
use crate::supervisor::{Invocation, ProcessSupervisor, Redirect, Termination};
use crate::verdict::{Verdict, EXIT_UNSATISFIABLE};

/// Default flag that switches the solver-under-test into certificate mode.
pub const DEFAULT_CHECK_FLAG: &str = "-c";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationOutcome {
    Confirmed,
    Refuted,
}

impl fmt::Display for VerificationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerificationOutcome::Confirmed => f.write_str("confirmed"),
            VerificationOutcome::Refuted => f.write_str("refuted"),
        }
    }
}

/// The two verification tools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    /// Solver-under-test; also used in certificate-check mode.
    pub solver: PathBuf,
    pub check_flag: String,
    pub reference_solver: PathBuf,
}

impl Toolchain {
    pub fn new(solver: impl Into<PathBuf>, reference_solver: impl Into<PathBuf>) -> Self {
        Self {
            solver: solver.into(),
            check_flag: DEFAULT_CHECK_FLAG.to_string(),
            reference_solver: reference_solver.into(),
        }
    }

    pub fn with_check_flag(mut self, flag: impl Into<String>) -> Self {
        self.check_flag = flag.into();
        self
    }
}

#[derive(Debug)]
pub struct VerifierDispatcher<'a> {
    toolchain: &'a Toolchain,
    supervisor: &'a ProcessSupervisor,
}

impl<'a> VerifierDispatcher<'a> {
    pub fn new(toolchain: &'a Toolchain, supervisor: &'a ProcessSupervisor) -> Self {
        Self {
            toolchain,
            supervisor,
        }
    }

    /// Cross-check `verdict`. `Ok` always carries
    /// [`VerificationOutcome::Confirmed`]; a refutation comes back as the
    /// matching fatal error.
    pub fn verify(
        &self,
        verdict: Verdict,
        instance: &Instance,
        run: &SolveRun,
        workspace: &SeedWorkspace,
    ) -> Result<VerificationOutcome, FuzzError> {
        let (seed, mode) = (instance.seed, instance.mode);
        match verdict {
            Verdict::Satisfiable => {
                let Some(solution) = run.solution.as_deref() else {
                    return Err(FuzzError::InvalidSolution {
                        seed,
                        mode,
                        detail: "solver reported SAT but wrote no solution file".into(),
                    });
                };
                let status = self.check_certificate(instance, solution, workspace)?;
                match outcome_of_certificate_check(status) {
                    VerificationOutcome::Confirmed => Ok(VerificationOutcome::Confirmed),
                    VerificationOutcome::Refuted => Err(FuzzError::InvalidSolution {
                        seed,
                        mode,
                        detail: format!("certificate check rejected the solution ({status})"),
                    }),
                }
            }
            Verdict::Unsatisfiable => {
                let status = self.run_reference(instance, workspace)?;
                match outcome_of_reference_run(status) {
                    VerificationOutcome::Confirmed => Ok(VerificationOutcome::Confirmed),
                    VerificationOutcome::Refuted => {
                        Err(FuzzError::InvalidUnsat { seed, mode, status })
                    }
                }
            }
            // Already fatal at classification time; nothing to dispatch.
            Verdict::ProtocolViolation => Err(FuzzError::ProtocolViolation {
                seed,
                mode,
                status: run.termination,
            }),
        }
    }

    fn check_certificate(
        &self,
        instance: &Instance,
        solution: &Path,
        workspace: &SeedWorkspace,
    ) -> Result<Termination, FuzzError> {
        let invocation = Invocation::new(&self.toolchain.solver)
            .arg(&self.toolchain.check_flag)
            .arg(&instance.path)
            .arg(solution)
            .stdout(Redirect::Append(workspace.verify_log()))
            .stderr(Redirect::Append(workspace.verify_log()));
        debug!(seed = instance.seed, "checking certificate");
        self.supervisor.run(&invocation).map_err(|err| {
            FuzzError::from_supervise(
                err,
                instance.seed,
                instance.mode,
                Stage::CertificateCheck,
                &self.toolchain.solver,
            )
        })
    }

    fn run_reference(
        &self,
        instance: &Instance,
        workspace: &SeedWorkspace,
    ) -> Result<Termination, FuzzError> {
        let invocation = Invocation::new(&self.toolchain.reference_solver)
            .arg(&instance.path)
            .stdout(Redirect::Append(workspace.verify_log()))
            .stderr(Redirect::Append(workspace.verify_log()));
        debug!(seed = instance.seed, "confirming unsat with reference solver");
        self.supervisor.run(&invocation).map_err(|err| {
            FuzzError::from_supervise(
                err,
                instance.seed,
                instance.mode,
                Stage::ReferenceSolve,
                &self.toolchain.reference_solver,
            )
        })
    }
}

/// Certificate mode must exit 0.
pub fn outcome_of_certificate_check(status: Termination) -> VerificationOutcome {
    if status.success() {
        VerificationOutcome::Confirmed
    } else {
        VerificationOutcome::Refuted
    }
}

/// The reference solver must itself answer UNSAT (exit 20).
pub fn outcome_of_reference_run(status: Termination) -> VerificationOutcome {
    if status == Termination::Exited(EXIT_UNSATISFIABLE) {
        VerificationOutcome::Confirmed
    } else {
        VerificationOutcome::Refuted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn certificate_outcome_requires_exit_zero() {
        assert_eq!(
            outcome_of_certificate_check(Termination::Exited(0)),
            VerificationOutcome::Confirmed
        );
        for status in [
            Termination::Exited(1),
            Termination::Exited(10),
            Termination::Signaled(Some(6)),
        ] {
            assert_eq!(outcome_of_certificate_check(status), VerificationOutcome::Refuted);
        }
    }

    #[test]
    fn reference_outcome_requires_exit_twenty() {
        assert_eq!(
            outcome_of_reference_run(Termination::Exited(20)),
            VerificationOutcome::Confirmed
        );
        for status in [Termination::Exited(0), Termination::Exited(10), Termination::Exited(1)] {
            assert_eq!(outcome_of_reference_run(status), VerificationOutcome::Refuted);
        }
    }

    #[test]
    fn toolchain_defaults_to_dash_c() {
        let tools = Toolchain::new("bin/sat", "./cryptominisat");
        assert_eq!(tools.check_flag, "-c");
        assert_eq!(tools.with_check_flag("--check").check_flag, "--check");
    }

    #[cfg(unix)]
    mod process {
        use super::super::*;
        use crate::error::FailureKind;
        use crate::registry::GeneratorMode;
        use crate::supervisor::CancelToken;
        use crate::test_support::write_script;
        use std::fs;

        struct Fixture {
            _dir: tempfile::TempDir,
            ws: SeedWorkspace,
            instance: Instance,
            tools: Toolchain,
            supervisor: ProcessSupervisor,
            calls: PathBuf,
        }

        /// `checker_exit` is the certificate-mode exit code of the fake
        /// solver; `reference_exit` that of the fake reference solver. Both
        /// record their invocations in `calls`.
        fn fixture(checker_exit: i32, reference_exit: i32) -> Fixture {
            let dir = tempfile::tempdir().unwrap();
            let calls = dir.path().join("calls.log");
            let solver = write_script(
                dir.path(),
                "sat.sh",
                &format!(
                    "echo \"solver $*\" >> {calls}\nexit {checker_exit}\n",
                    calls = calls.display()
                ),
            );
            let reference = write_script(
                dir.path(),
                "ref.sh",
                &format!(
                    "echo \"reference $*\" >> {calls}\necho \"s UNSATISFIABLE\"\nexit {reference_exit}\n",
                    calls = calls.display()
                ),
            );
            let ws = SeedWorkspace::create(&dir.path().join("a"), 7, GeneratorMode::new(6)).unwrap();
            fs::write(ws.instance_path(), "p cnf 1 2\n1 0\n-1 0\n").unwrap();
            let instance = Instance {
                seed: 7,
                mode: GeneratorMode::new(6),
                path: ws.instance_path(),
                sha256: String::new(),
                size_bytes: 0,
            };
            Fixture {
                _dir: dir,
                ws,
                instance,
                tools: Toolchain::new(solver, reference),
                supervisor: ProcessSupervisor::new(None, CancelToken::new()),
                calls,
            }
        }

        fn run(termination: Termination, solution: Option<PathBuf>) -> SolveRun {
            SolveRun {
                termination,
                solution,
            }
        }

        fn calls(f: &Fixture) -> String {
            fs::read_to_string(&f.calls).unwrap_or_default()
        }

        #[test]
        fn sat_is_confirmed_by_certificate_mode() {
            let f = fixture(0, 20);
            fs::write(f.ws.solution_path(), "v 1 0\n").unwrap();
            let solved = run(Termination::Exited(10), Some(f.ws.solution_path()));
            let outcome = VerifierDispatcher::new(&f.tools, &f.supervisor)
                .verify(Verdict::Satisfiable, &f.instance, &solved, &f.ws)
                .unwrap();
            assert_eq!(outcome, VerificationOutcome::Confirmed);
            let calls = calls(&f);
            assert!(calls.starts_with("solver -c "), "{calls}");
            assert!(calls.contains("solution.sol"));
            assert!(!calls.contains("reference"));
        }

        #[test]
        fn rejected_certificate_is_invalid_solution() {
            let f = fixture(1, 20);
            fs::write(f.ws.solution_path(), "v -1 0\n").unwrap();
            let solved = run(Termination::Exited(10), Some(f.ws.solution_path()));
            let err = VerifierDispatcher::new(&f.tools, &f.supervisor)
                .verify(Verdict::Satisfiable, &f.instance, &solved, &f.ws)
                .unwrap_err();
            assert_eq!(err.kind(), FailureKind::InvalidSolution);
            assert_eq!(err.seed(), Some(7));
        }

        #[test]
        fn missing_solution_is_invalid_without_running_checker() {
            let f = fixture(0, 20);
            let err = VerifierDispatcher::new(&f.tools, &f.supervisor)
                .verify(Verdict::Satisfiable, &f.instance, &run(Termination::Exited(10), None), &f.ws)
                .unwrap_err();
            assert_eq!(err.kind(), FailureKind::InvalidSolution);
            assert!(calls(&f).is_empty());
        }

        #[test]
        fn unsat_is_confirmed_by_reference_solver_on_instance_alone() {
            let f = fixture(0, 20);
            let outcome = VerifierDispatcher::new(&f.tools, &f.supervisor)
                .verify(Verdict::Unsatisfiable, &f.instance, &run(Termination::Exited(20), None), &f.ws)
                .unwrap();
            assert_eq!(outcome, VerificationOutcome::Confirmed);
            let calls = calls(&f);
            assert_eq!(calls.trim(), format!("reference {}", f.instance.path.display()));
            assert_eq!(
                fs::read_to_string(f.ws.verify_log()).unwrap(),
                "s UNSATISFIABLE\n"
            );
        }

        #[test]
        fn disagreeing_reference_is_invalid_unsat() {
            let f = fixture(0, 10);
            let err = VerifierDispatcher::new(&f.tools, &f.supervisor)
                .verify(Verdict::Unsatisfiable, &f.instance, &run(Termination::Exited(20), None), &f.ws)
                .unwrap_err();
            match err {
                FuzzError::InvalidUnsat { seed, status, .. } => {
                    assert_eq!(seed, 7);
                    assert_eq!(status, Termination::Exited(10));
                }
                other => panic!("unexpected error: {other}"),
            }
        }

        #[test]
        fn protocol_violation_dispatches_nothing() {
            let f = fixture(0, 20);
            let err = VerifierDispatcher::new(&f.tools, &f.supervisor)
                .verify(Verdict::ProtocolViolation, &f.instance, &run(Termination::Exited(7), None), &f.ws)
                .unwrap_err();
            assert_eq!(err.kind(), FailureKind::ProtocolViolation);
            assert!(err.to_string().contains("exit status 7"));
            assert!(calls(&f).is_empty());
        }
    }
}
