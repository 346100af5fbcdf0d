use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use log::info;

use hydrorun::batch::CommandScheduler;
use hydrorun::config::SimulationConfig;
use hydrorun::db::open_db;
use hydrorun::flavour::SchedulerFlavour;
use hydrorun::job::request::load_job_requests;
use hydrorun::job::snapshot::{get_snapshot_paths, resumable_snapshots};
use hydrorun::job::Job;
use hydrorun::params::ParameterRegistry;
use hydrorun::schedule::{BatchReport, ScheduleOptions, Scheduler, ThreadSleep};

#[derive(Parser, Debug)]
#[command(author, version, about = "Stage, parameterise and submit batches of WRF-Hydro simulations")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every job of a job list
    Run {
        /// Simulation configuration (YAML)
        #[arg(short, long)]
        config: PathBuf,
        /// Ordered mapping of job id to event and parameters (YAML)
        #[arg(short, long)]
        jobs: PathBuf,
        #[command(flatten)]
        overrides: Overrides,
    },
    /// Run jobs again from saved snapshots
    Resume {
        /// Simulation configuration (YAML)
        #[arg(short, long)]
        config: PathBuf,
        /// Snapshot file, may be repeated
        #[arg(long)]
        snapshot: Vec<PathBuf>,
        /// Directory of snapshot files
        #[arg(long)]
        snapshot_dir: Option<PathBuf>,
        #[command(flatten)]
        overrides: Overrides,
    },
}

#[derive(Args, Debug)]
struct Overrides {
    /// Maximum number of jobs handed to the batch scheduler at once
    #[arg(long)]
    max_concurrent: Option<usize>,
    /// Batch scheduler driving the cluster
    #[arg(long, value_enum)]
    flavour: Option<SchedulerFlavour>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    info!("hydrorun starting up");
    let cli = Cli::parse();

    match cli.command {
        Command::Run { config, jobs, overrides } => {
            let config = load_config(&config, &overrides)?;
            let requests = load_job_requests(&jobs)?;
            let layout = config.layout();
            let batch = requests
                .into_iter()
                .map(|(job_id, request)| Job::new(&job_id, request, &layout, &config.job))
                .collect();
            run_batch(&config, batch)
        }
        Command::Resume { config, snapshot, snapshot_dir, overrides } => {
            let config = load_config(&config, &overrides)?;
            let mut paths = snapshot;
            if let Some(dir) = snapshot_dir {
                let found = get_snapshot_paths(&dir)
                    .with_context(|| format!("Can't list snapshots in {}", dir.display()))?;
                paths.extend(found);
            }
            if paths.is_empty() {
                bail!("No snapshots to resume, pass --snapshot or --snapshot-dir");
            }
            let jobs: Vec<Job> = resumable_snapshots(&paths)?
                .into_iter()
                .map(|snapshot| Job::restore(snapshot, &config.job))
                .collect();
            info!("Resuming {} jobs from {} snapshots", jobs.len(), paths.len());
            run_batch(&config, jobs)
        }
    }
}

fn load_config(path: &Path, overrides: &Overrides) -> Result<SimulationConfig> {
    let mut config = SimulationConfig::load(path)?;
    if let Some(max_concurrent) = overrides.max_concurrent {
        config.scheduler.max_concurrent = max_concurrent;
    }
    if let Some(flavour) = overrides.flavour {
        config.scheduler.flavour = flavour;
    }
    config.validate()?;
    Ok(config)
}

fn run_batch(config: &SimulationConfig, mut jobs: Vec<Job>) -> Result<()> {
    config.create_work_dirs()?;
    let registry = ParameterRegistry::load(&config.registry_path())?;
    info!("Parameter registry holds {} parameters", registry.len());

    let backend = CommandScheduler::new(config.scheduler.flavour).with_templates(
        config.scheduler.submit_template.as_deref(),
        config.scheduler.query_template.as_deref(),
    );
    let ledger = match config.ledger_path() {
        Some(path) => Some(open_db(&path).with_context(|| format!("Can't open ledger {}", path.display()))?),
        None => None,
    };

    let mut scheduler = Scheduler::new(&registry, &backend, ThreadSleep, ScheduleOptions::from(&config.scheduler))?;
    if let Some(conn) = &ledger {
        scheduler = scheduler.with_ledger(conn);
    }
    let report = scheduler.schedule_batch(&mut jobs)?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &BatchReport) {
    println!("finished: {}", report.finished_count());
    println!("completed: {}", report.completed_count());
    println!("failed: {}", report.failed_count());
    println!("errored: {}", report.errored_count());
    if !report.errored.is_empty() {
        println!("errored jobs: {}", report.errored.join(", "));
    }
}
