//! Local job execution.
//!
//! Commissioning detaches a submission thread that drives a rayon pool; each
//! job runs as a child process inside its simulation directory with stdout
//! and stderr captured to files. Job state travels exclusively through
//! `job_status.txt`, so refreshes never need to talk to the runner.

use crate::error::FilePlatformError;
use crate::layout::{
    read_job_status, write_job_status, JobStatus, CANCEL_FILE, STDERR_FILE, STDOUT_FILE,
};
use parking_lot::Mutex;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use std::fs::File;
use std::path::PathBuf;
use std::process::Command;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use sweeprun_core::task::CommandLine;
use tracing::{debug, error, info, warn};
use wait_timeout::ChildExt;

/// One job handed to the runner: where to run and what to run.
#[derive(Clone, Debug)]
pub struct JobSpec {
    pub simulation_id: String,
    pub dir: PathBuf,
    pub command: CommandLine,
}

#[derive(Clone, Debug)]
pub struct RunnerOptions {
    pub max_workers: usize,
    /// Times a failed job is re-run before its failure sticks.
    pub retries: u32,
    /// Wall-clock limit per job attempt; exceeding it kills the process.
    pub timeout: Option<Duration>,
}

/// Owns the detached submission threads so shutdown can drain them.
#[derive(Default)]
pub struct Runner {
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Runner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Launch the jobs in the background and return immediately. Progress is
    /// observed through each job's status file.
    pub fn commission(&self, jobs: Vec<JobSpec>, options: RunnerOptions) {
        if jobs.is_empty() {
            return;
        }
        info!(jobs = jobs.len(), workers = options.max_workers, "Commissioning jobs");
        let handle = thread::spawn(move || {
            let pool = match ThreadPoolBuilder::new()
                .num_threads(options.max_workers.max(1))
                .build()
            {
                Ok(pool) => pool,
                Err(e) => {
                    error!(error = ?e, "Failed to build the job worker pool");
                    for job in &jobs {
                        let _ = write_job_status(&job.dir, JobStatus::Failed);
                    }
                    return;
                }
            };
            pool.install(|| {
                jobs.par_iter().for_each(|job| run_job(job, &options));
            });
        });
        self.handles.lock().push(handle);
    }

    /// Block until every commissioned batch has finished.
    pub fn drain(&self) {
        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
    }
}

impl Drop for Runner {
    fn drop(&mut self) {
        self.drain();
    }
}

enum AttemptOutcome {
    Succeeded,
    Failed,
    Canceled,
}

fn run_job(job: &JobSpec, options: &RunnerOptions) {
    for attempt in 0..=options.retries {
        if job.dir.join(CANCEL_FILE).is_file() {
            debug!(simulation = job.simulation_id.as_str(), "Job canceled before start");
            let _ = write_job_status(&job.dir, JobStatus::Failed);
            return;
        }
        // a success marker from an earlier commissioning short-circuits
        if matches!(read_job_status(&job.dir), Ok(JobStatus::Succeeded)) {
            return;
        }
        match run_attempt(job, options) {
            Ok(AttemptOutcome::Succeeded) => {
                let _ = write_job_status(&job.dir, JobStatus::Succeeded);
                return;
            }
            Ok(AttemptOutcome::Canceled) => {
                debug!(simulation = job.simulation_id.as_str(), "Job canceled while running");
                let _ = write_job_status(&job.dir, JobStatus::Failed);
                return;
            }
            Ok(AttemptOutcome::Failed) => {
                warn!(
                    simulation = job.simulation_id.as_str(),
                    attempt,
                    "Job attempt failed"
                );
            }
            Err(e) => {
                warn!(
                    simulation = job.simulation_id.as_str(),
                    attempt,
                    error = ?e,
                    "Job attempt could not be run"
                );
            }
        }
    }
    let _ = write_job_status(&job.dir, JobStatus::Failed);
}

/// How often a running child is checked for the cancel marker.
const CANCEL_POLL: Duration = Duration::from_millis(100);

/// Run one attempt. The child is waited on in short slices so a cancel
/// marker kills it promptly instead of after the process finishes.
fn run_attempt(job: &JobSpec, options: &RunnerOptions) -> Result<AttemptOutcome, FilePlatformError> {
    write_job_status(&job.dir, JobStatus::Running)?;
    let stdout_path = job.dir.join(STDOUT_FILE);
    let stderr_path = job.dir.join(STDERR_FILE);
    let stdout = File::create(&stdout_path).map_err(|e| FilePlatformError::io(&stdout_path, e))?;
    let stderr = File::create(&stderr_path).map_err(|e| FilePlatformError::io(&stderr_path, e))?;

    let mut child = Command::new(&job.command.executable)
        .args(&job.command.arguments)
        .current_dir(&job.dir)
        .stdout(stdout)
        .stderr(stderr)
        .spawn()
        .map_err(|e| FilePlatformError::io(&job.dir, e))?;

    let deadline = options.timeout.map(|timeout| Instant::now() + timeout);
    let status = loop {
        if job.dir.join(CANCEL_FILE).is_file() {
            debug!(simulation = job.simulation_id.as_str(), "Cancel marker seen, killing the job");
            let _ = child.kill();
            let _ = child.wait();
            return Ok(AttemptOutcome::Canceled);
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            warn!(
                simulation = job.simulation_id.as_str(),
                timeout = ?options.timeout,
                "Job exceeded its time limit, killing it"
            );
            let _ = child.kill();
            break child.wait().map_err(|e| FilePlatformError::io(&job.dir, e))?;
        }
        if let Some(status) = child
            .wait_timeout(CANCEL_POLL)
            .map_err(|e| FilePlatformError::io(&job.dir, e))?
        {
            break status;
        }
    };
    debug!(
        simulation = job.simulation_id.as_str(),
        code = status.code().unwrap_or(-1),
        "Job attempt finished"
    );
    // a cancel racing the exit still wins over a zero exit code
    if job.dir.join(CANCEL_FILE).is_file() {
        return Ok(AttemptOutcome::Canceled);
    }
    Ok(if status.success() {
        AttemptOutcome::Succeeded
    } else {
        AttemptOutcome::Failed
    })
}
