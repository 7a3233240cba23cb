use std::path::{Path, PathBuf};

use crate::artifacts::SeedWorkspace;
use crate::error::{FuzzError, Stage};
use crate::producer::Instance;
use crate::supervisor::{Invocation, ProcessSupervisor, Redirect, Termination};

/// Result of one solve-mode invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolveRun {
    pub termination: Termination,
    /// Present only if the solver actually wrote a solution file.
    pub solution: Option<PathBuf>,
}

/// Invokes the solver-under-test as `<solver> <instance> <solution>`.
#[derive(Debug)]
pub struct SolverRunner<'a> {
    solver: &'a Path,
    supervisor: &'a ProcessSupervisor,
}

impl<'a> SolverRunner<'a> {
    pub fn new(solver: &'a Path, supervisor: &'a ProcessSupervisor) -> Self {
        Self { solver, supervisor }
    }

    pub fn solve(&self, instance: &Instance, workspace: &SeedWorkspace) -> Result<SolveRun, FuzzError> {
        let solution_path = workspace.solution_path();
        let solver_log = workspace.solver_log();
        let invocation = Invocation::new(self.solver)
            .arg(&instance.path)
            .arg(&solution_path)
            .stdout(Redirect::Append(solver_log.clone()))
            .stderr(Redirect::Append(solver_log));

        let termination = self.supervisor.run(&invocation).map_err(|err| {
            FuzzError::from_supervise(err, instance.seed, instance.mode, Stage::Solve, self.solver)
        })?;
        let solution = solution_path.is_file().then_some(solution_path);
        Ok(SolveRun {
            termination,
            solution,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::registry::GeneratorMode;
    use crate::supervisor::CancelToken;
    use crate::test_support::write_script;
    use std::fs;

    fn instance_in(ws: &SeedWorkspace) -> Instance {
        fs::write(ws.instance_path(), "p cnf 1 1\n1 0\n").unwrap();
        Instance {
            seed: ws.seed(),
            mode: ws.mode(),
            path: ws.instance_path(),
            sha256: String::new(),
            size_bytes: 14,
        }
    }

    #[test]
    fn passes_instance_and_solution_paths() {
        let dir = tempfile::tempdir().unwrap();
        let solver = write_script(
            dir.path(),
            "solver.sh",
            "test -f \"$1\" || exit 99\necho \"v 1 0\" > \"$2\"\necho \"s SATISFIABLE\"\nexit 10\n",
        );
        let ws = SeedWorkspace::create(&dir.path().join("a"), 42, GeneratorMode::new(5)).unwrap();
        let instance = instance_in(&ws);
        let supervisor = ProcessSupervisor::new(None, CancelToken::new());

        let run = SolverRunner::new(&solver, &supervisor)
            .solve(&instance, &ws)
            .unwrap();
        assert_eq!(run.termination, Termination::Exited(10));
        assert_eq!(run.solution.as_deref(), Some(ws.solution_path().as_path()));
        assert_eq!(fs::read_to_string(ws.solver_log()).unwrap(), "s SATISFIABLE\n");
    }

    #[test]
    fn solver_log_keeps_both_streams() {
        let dir = tempfile::tempdir().unwrap();
        let solver = write_script(
            dir.path(),
            "solver.sh",
            "echo \"c parse warning on stderr\" >&2\necho \"s SATISFIABLE\"\necho \"v 1 0\" > \"$2\"\nexit 10\n",
        );
        let ws = SeedWorkspace::create(&dir.path().join("a"), 3, GeneratorMode::new(1)).unwrap();
        let instance = instance_in(&ws);
        let supervisor = ProcessSupervisor::new(None, CancelToken::new());

        SolverRunner::new(&solver, &supervisor)
            .solve(&instance, &ws)
            .unwrap();
        let log = fs::read_to_string(ws.solver_log()).unwrap();
        assert_eq!(log, "c parse warning on stderr\ns SATISFIABLE\n");
    }

    #[test]
    fn solution_absent_when_solver_writes_none() {
        let dir = tempfile::tempdir().unwrap();
        let solver = write_script(dir.path(), "solver.sh", "exit 20\n");
        let ws = SeedWorkspace::create(&dir.path().join("a"), 7, GeneratorMode::new(6)).unwrap();
        let instance = instance_in(&ws);
        let supervisor = ProcessSupervisor::new(None, CancelToken::new());

        let run = SolverRunner::new(&solver, &supervisor)
            .solve(&instance, &ws)
            .unwrap();
        assert_eq!(run.termination, Termination::Exited(20));
        assert!(run.solution.is_none());
    }
}
