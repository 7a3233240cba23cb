use std::path::PathBuf;

use clap::Parser;
use miette::{Context, IntoDiagnostic};
use satfuzz_core::{
    write_report, Campaign, CampaignHalt, CampaignReport, FuzzConfig, GeneratorMode,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "satfuzz",
    version,
    about = "Differential fuzzing harness for SAT solvers"
)]
struct Cli {
    /// Generator mode (1-6 built in, more via --config).
    mode: Option<u32>,

    /// Number of seeds to run.
    #[arg(long)]
    seeds: Option<u64>,

    /// First seed of the range.
    #[arg(long)]
    start_seed: Option<u64>,

    /// Seeds in flight at once.
    #[arg(long)]
    jobs: Option<usize>,

    /// Per-invocation timeout in seconds (0 disables).
    #[arg(long = "timeout")]
    timeout_secs: Option<u64>,

    /// Solver under test.
    #[arg(long)]
    solver: Option<PathBuf>,

    /// Flag that puts the solver into certificate-check mode.
    #[arg(long, allow_hyphen_values = true)]
    check_flag: Option<String>,

    /// Trusted solver used to confirm UNSAT answers.
    #[arg(long)]
    reference_solver: Option<PathBuf>,

    /// Directory holding the CNF generators.
    #[arg(long)]
    generator_dir: Option<PathBuf>,

    /// Where per-seed workspaces are created.
    #[arg(long)]
    artifact_dir: Option<PathBuf>,

    /// Keep workspaces of confirmed seeds too.
    #[arg(long)]
    keep_artifacts: bool,

    /// Run the generator twice per seed and compare the output.
    #[arg(long)]
    check_determinism: bool,

    /// JSON configuration file; flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Optional JSON report output path.
    #[arg(long)]
    json_report: Option<PathBuf>,
}

impl Cli {
    fn resolve_config(&self) -> miette::Result<FuzzConfig> {
        let mut config = match &self.config {
            Some(path) => FuzzConfig::load(path)
                .into_diagnostic()
                .wrap_err("failed to load campaign configuration")?,
            None => FuzzConfig::default(),
        };
        self.apply_overrides(&mut config);
        config.validate().into_diagnostic()?;
        Ok(config)
    }

    fn apply_overrides(&self, config: &mut FuzzConfig) {
        if let Some(mode) = self.mode {
            config.mode = GeneratorMode::new(mode);
        }
        if let Some(seeds) = self.seeds {
            config.seeds = seeds;
        }
        if let Some(start_seed) = self.start_seed {
            config.start_seed = start_seed;
        }
        if let Some(jobs) = self.jobs {
            config.jobs = jobs;
        }
        if let Some(timeout_secs) = self.timeout_secs {
            config.timeout_secs = timeout_secs;
        }
        if let Some(solver) = &self.solver {
            config.solver = solver.clone();
        }
        if let Some(flag) = &self.check_flag {
            config.check_flag = flag.clone();
        }
        if let Some(reference) = &self.reference_solver {
            config.reference_solver = reference.clone();
        }
        if let Some(dir) = &self.generator_dir {
            config.generator_dir = dir.clone();
        }
        if let Some(dir) = &self.artifact_dir {
            config.artifact_dir = dir.clone();
        }
        config.keep_artifacts |= self.keep_artifacts;
        config.check_determinism |= self.check_determinism;
    }
}

fn emit_report(cli: &Cli, report: &CampaignReport) -> miette::Result<()> {
    if let Some(path) = &cli.json_report {
        write_report(path, report)
            .into_diagnostic()
            .wrap_err_with(|| format!("failed to write report {}", path.display()))?;
        println!("JSON report written to {}", path.display());
    }
    println!("{}", report.summary_line());
    Ok(())
}

fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = cli.resolve_config()?;
    tracing::debug!(?config, "resolved campaign configuration");
    let campaign = Campaign::from_config(&config)?;

    match campaign.run() {
        Ok(report) => emit_report(&cli, &report),
        Err(halt) => {
            let CampaignHalt { report, error } = *halt;
            emit_report(&cli, &report)?;
            Err(miette::Report::new(error))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("satfuzz").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn bare_invocation_keeps_reference_defaults() {
        let cli = parse(&[]);
        let config = cli.resolve_config().unwrap();
        assert_eq!(config, FuzzConfig::default());
    }

    #[test]
    fn positional_mode_and_flags_override_defaults() {
        let cli = parse(&[
            "5",
            "--seeds",
            "20",
            "--start-seed",
            "100",
            "--jobs",
            "4",
            "--timeout",
            "0",
            "--check-flag",
            "--certify",
            "--keep-artifacts",
        ]);
        let config = cli.resolve_config().unwrap();
        assert_eq!(config.mode, GeneratorMode::new(5));
        assert_eq!(config.seeds, 20);
        assert_eq!(config.start_seed, 100);
        assert_eq!(config.jobs, 4);
        assert_eq!(config.timeout(), None);
        assert_eq!(config.check_flag, "--certify");
        assert!(config.keep_artifacts);
        assert!(!config.check_determinism);
    }

    #[test]
    fn flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("satfuzz.json");
        std::fs::write(&path, r#"{"mode": 3, "seeds": 7, "jobs": 2}"#).unwrap();
        let cli = parse(&["--config", path.to_str().unwrap(), "--seeds", "9"]);
        let config = cli.resolve_config().unwrap();
        assert_eq!(config.mode, GeneratorMode::new(3));
        assert_eq!(config.seeds, 9);
        assert_eq!(config.jobs, 2);
    }

    #[test]
    fn invalid_overrides_are_rejected() {
        let cli = parse(&["--jobs", "0"]);
        let err = cli.resolve_config().unwrap_err();
        assert!(format!("{err}").contains("jobs must be at least 1"), "{err}");
    }
}
