//! `sweeprun`: inspect and tidy a file-backend job tree from the shell.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use sweeprun_core::entities::ItemKind;
use sweeprun_core::orchestration::{wait_on_experiment, ProgressCallback, WaitOptions};
use sweeprun_core::platform::Platform;
use sweeprun_platform_file::{layout, report, FileOptions, FilePlatform};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sweeprun", version, about = "Campaign job tree inspection")]
struct Cli {
    /// Root of the job tree.
    #[arg(long, short = 'd', default_value = ".", global = true)]
    job_directory: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Per-simulation statuses of an experiment (latest when omitted).
    Status {
        #[arg(long, short = 'e')]
        experiment: Option<String>,
        /// Poll until the experiment is terminal, printing one line per tick.
        #[arg(long)]
        wait: bool,
    },
    /// On-disk directory of an entity.
    GetPath {
        id: String,
        #[arg(long, value_enum, default_value_t = KindArg::Experiment)]
        kind: KindArg,
    },
    /// Current status of one entity.
    GetStatus {
        id: String,
        #[arg(long, value_enum, default_value_t = KindArg::Experiment)]
        kind: KindArg,
    },
    /// Id of the newest experiment in the job tree.
    GetLatest,
    /// Full status report, also written to status.txt in the experiment
    /// directory.
    StatusReport {
        #[arg(long, short = 'e')]
        experiment: Option<String>,
    },
    /// Delete produced outputs, keeping metadata, scripts and asset links.
    ClearFiles {
        #[arg(long, short = 'e')]
        experiment: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum KindArg {
    Suite,
    Experiment,
    Simulation,
}

impl From<KindArg> for ItemKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Suite => ItemKind::Suite,
            KindArg::Experiment => ItemKind::Experiment,
            KindArg::Simulation => ItemKind::Simulation,
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();
    let cli = Cli::parse();
    let backend = FilePlatform::new(&cli.job_directory, FileOptions::default());
    run(&cli.command, backend)
}

fn run(command: &Command, backend: Arc<FilePlatform>) -> anyhow::Result<()> {
    let platform = Platform::from_backend(backend.clone());
    match command {
        Command::Status { experiment, wait } => {
            let id = resolve_experiment(&backend, experiment.as_deref())?;
            if *wait {
                let mut experiment = platform.get_experiment_with_simulations(&id)?;
                let progress: ProgressCallback =
                    Arc::new(|id, status| println!("{id}  {status}"));
                let options = WaitOptions {
                    progress: Some(progress),
                    ..WaitOptions::default()
                };
                wait_on_experiment(&platform, &mut experiment, &options, None)?;
            }
            let report = report::experiment_report(backend.layout(), &id)?;
            for (sim_id, status) in &report.simulations {
                println!("{sim_id}  {status}");
            }
        }
        Command::GetPath { id, kind } => {
            let dir = platform.get_directory((*kind).into(), id)?;
            println!("{}", dir.display());
        }
        Command::GetStatus { id, kind } => {
            let item = platform.get_item((*kind).into(), id)?;
            println!("{}", item.status());
        }
        Command::GetLatest => {
            println!("{}", report::latest_experiment(backend.layout())?);
        }
        Command::StatusReport { experiment } => {
            let id = resolve_experiment(&backend, experiment.as_deref())?;
            let report = report::experiment_report(backend.layout(), &id)?;
            let rendered = report.to_string();
            let dir = platform.get_directory(ItemKind::Experiment, &id)?;
            let status_path = dir.join("status.txt");
            fs::write(&status_path, &rendered)
                .with_context(|| format!("writing {}", status_path.display()))?;
            print!("{rendered}");
        }
        Command::ClearFiles { experiment } => {
            let id = resolve_experiment(&backend, experiment.as_deref())?;
            let removed = report::clear_experiment_outputs(backend.layout(), &id)?;
            println!("Removed {removed} outputs from {id}");
        }
    }
    Ok(())
}

fn resolve_experiment(
    backend: &FilePlatform,
    requested: Option<&str>,
) -> anyhow::Result<String> {
    match requested {
        Some(id) => Ok(id.to_owned()),
        None => report::latest_experiment(backend.layout())
            .context("no experiment id given and none found in the job tree"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use sweeprun_platform_file::layout::{write_job_status, JobStatus};

    fn seed_experiment(root: &Path, id: &str, status: JobStatus) {
        let exp = root.join(id);
        let sim = exp.join("Simulation0000");
        fs::create_dir_all(&sim).unwrap();
        fs::write(
            exp.join(layout::METADATA_FILE),
            format!(r#"{{"id":"{id}","name":"{id}","simulation_ids":["Simulation0000"]}}"#),
        )
        .unwrap();
        fs::write(
            sim.join(layout::SIMULATION_METADATA_FILE),
            r#"{"id":"Simulation0000","task":{"command":{"executable":"true"}}}"#,
        )
        .unwrap();
        write_job_status(&sim, status).unwrap();
    }

    #[test]
    fn status_report_writes_status_txt() {
        let dir = tempfile::tempdir().unwrap();
        seed_experiment(dir.path(), "Experiment0000", JobStatus::Succeeded);
        let backend = FilePlatform::new(dir.path(), FileOptions::default());
        run(
            &Command::StatusReport { experiment: None },
            backend,
        )
        .unwrap();
        let rendered =
            fs::read_to_string(dir.path().join("Experiment0000/status.txt")).unwrap();
        assert!(rendered.contains("SUCCEEDED: 1"));
    }

    #[test]
    fn status_wait_returns_once_the_experiment_is_terminal() {
        let dir = tempfile::tempdir().unwrap();
        seed_experiment(dir.path(), "Experiment0000", JobStatus::Succeeded);
        let backend = FilePlatform::new(dir.path(), FileOptions::default());
        run(
            &Command::Status {
                experiment: None,
                wait: true,
            },
            backend,
        )
        .unwrap();
    }

    #[test]
    fn latest_experiment_resolves_when_omitted() {
        let dir = tempfile::tempdir().unwrap();
        seed_experiment(dir.path(), "Experiment0000", JobStatus::Failed);
        let backend = FilePlatform::new(dir.path(), FileOptions::default());
        assert_eq!(
            resolve_experiment(&backend, None).unwrap(),
            "Experiment0000"
        );
        assert_eq!(
            resolve_experiment(&backend, Some("other")).unwrap(),
            "other"
        );
    }

    #[test]
    fn missing_tree_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilePlatform::new(dir.path(), FileOptions::default());
        assert!(resolve_experiment(&backend, None).is_err());
    }
}
