//! The orchestration engine: submission pipeline, polling wait, retry
//! wrapper and cancellation.
//!
//! Infra retries here are for transient backend failures only and never
//! re-submit a job; job-level restarts are the backend's business, driven by
//! its own `num_retries`.

use crate::entities::{Experiment, Item, Simulation, Suite};
use crate::error::{OrchestrationError, PlatformError};
use crate::platform::Platform;
use crate::status::EntityStatus;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Tuning knobs of the submission pipeline.
#[derive(Clone, Debug)]
pub struct RunConfig {
    /// Simulations created per backend batch call.
    pub batch_size: usize,
    /// Worker threads submitting batches in parallel.
    pub max_workers: usize,
    /// Infra retry attempts for transient backend failures.
    pub retry_attempts: u32,
    /// Constant delay between infra retries.
    pub retry_backoff: Duration,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_workers: 16,
            retry_attempts: 5,
            retry_backoff: Duration::from_millis(1500),
        }
    }
}

/// Called after every successful refresh with the id and the freshly
/// observed status.
pub type ProgressCallback = Arc<dyn Fn(&str, EntityStatus) + Send + Sync>;

/// Tuning knobs of [`wait_till_done`].
#[derive(Clone)]
pub struct WaitOptions {
    pub timeout: Option<Duration>,
    /// Delay between refresh polls; doubles after a transient refresh
    /// failure, up to `backoff_cap`, and resets on the next success.
    pub refresh_interval: Duration,
    pub backoff_cap: Duration,
    /// Per-tick progress signal, e.g. for a CLI progress line.
    pub progress: Option<ProgressCallback>,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            refresh_interval: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(32),
            progress: None,
        }
    }
}

/// Cooperative cancellation handle for a wait loop, shareable across
/// threads.
#[derive(Clone, Default)]
pub struct WaitHandle {
    canceled: Arc<AtomicBool>,
}

impl WaitHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }
}

/// Run `operation`, retrying transient failures up to `attempts` times with
/// a constant backoff. Permanent failures return immediately.
pub fn with_retries<T>(
    name: &str,
    attempts: u32,
    backoff: Duration,
    mut operation: impl FnMut() -> Result<T, PlatformError>,
) -> Result<T, PlatformError> {
    let mut remaining = attempts;
    loop {
        match operation() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && remaining > 0 => {
                remaining -= 1;
                warn!(
                    operation = name,
                    remaining,
                    error = ?err,
                    "Transient backend failure, retrying"
                );
                thread::sleep(backoff);
            }
            Err(err) => return Err(err),
        }
    }
}

fn submission_error(id: &str, source: PlatformError) -> OrchestrationError {
    OrchestrationError::Submission {
        id: id.to_owned(),
        source,
    }
}

/// Create one batch of simulations and stage their per-job assets.
fn submit_batch(
    platform: &Platform,
    batch: &mut [Simulation],
    config: &RunConfig,
) -> Result<(), PlatformError> {
    let ops = platform.backend().simulations();
    // batch_create keeps already-created children, so a retry after a
    // partial failure only fills in the missing ones
    with_retries(
        "batch_create",
        config.retry_attempts,
        config.retry_backoff,
        || ops.batch_create(batch).map(|_| ()),
    )?;
    for simulation in batch.iter_mut() {
        with_retries(
            "send_assets",
            config.retry_attempts,
            config.retry_backoff,
            || ops.send_assets(simulation),
        )?;
    }
    Ok(())
}

/// Submit an experiment: create it, stage common assets, create the children
/// in parallel batches and commission everything.
///
/// A batch failure cancels the simulations already created before the error
/// is returned, so a half-submitted experiment never keeps running.
pub fn submit_experiment(
    platform: &Platform,
    experiment: &mut Experiment,
    config: &RunConfig,
) -> Result<String, OrchestrationError> {
    let id = platform.create_experiment(experiment)?;
    info!(
        experiment = id.as_str(),
        simulations = experiment.simulations().len(),
        "Submitting experiment"
    );

    with_retries(
        "send_assets",
        config.retry_attempts,
        config.retry_backoff,
        || platform.backend().experiments().send_assets(experiment),
    )
    .map_err(|e| submission_error(&id, e))?;

    let pool = ThreadPoolBuilder::new()
        .num_threads(config.max_workers)
        .build()
        .map_err(|e| OrchestrationError::WorkerPool(e.to_string()))?;

    let batch_size = config.batch_size.max(1);
    let batch_result: Result<(), PlatformError> = pool.install(|| {
        experiment
            .simulations_mut()
            .par_chunks_mut(batch_size)
            .map(|batch| submit_batch(platform, batch, config))
            .collect()
    });

    if let Err(source) = batch_result {
        error!(
            experiment = id.as_str(),
            error = ?source,
            "Batch creation failed, canceling partial submission"
        );
        if let Err(cancel_err) = platform.backend().experiments().cancel(experiment) {
            warn!(
                experiment = id.as_str(),
                error = ?cancel_err,
                "Cleanup cancel failed"
            );
        }
        return Err(submission_error(&id, source));
    }

    with_retries(
        "run_item",
        config.retry_attempts,
        config.retry_backoff,
        || platform.backend().experiments().run_item(experiment),
    )
    .map_err(|e| submission_error(&id, e))?;

    debug!(experiment = id.as_str(), "Experiment commissioned");
    Ok(id)
}

/// Submit a suite: create the shell, then submit each child experiment.
pub fn submit_suite(
    platform: &Platform,
    suite: &mut Suite,
    config: &RunConfig,
) -> Result<String, OrchestrationError> {
    let mut item = Item::Suite(std::mem::take(suite));
    let created = platform.create(&mut item);
    let Item::Suite(shell) = item else {
        unreachable!("create does not change the item kind");
    };
    *suite = shell;
    let id = created?;
    for experiment in suite.experiments.iter_mut() {
        submit_experiment(platform, experiment, config)?;
    }
    Ok(id)
}

fn wait_loop(
    id: &str,
    options: &WaitOptions,
    handle: Option<&WaitHandle>,
    mut refresh: impl FnMut() -> Result<EntityStatus, PlatformError>,
) -> Result<EntityStatus, OrchestrationError> {
    let started = Instant::now();
    let mut interval = options.refresh_interval;
    loop {
        if handle.is_some_and(WaitHandle::is_canceled) {
            return Err(OrchestrationError::WaitCanceled { id: id.to_owned() });
        }
        match refresh() {
            Ok(status) => {
                if let Some(progress) = &options.progress {
                    progress(id, status);
                }
                if status.is_terminal() {
                    return Ok(status);
                }
                interval = options.refresh_interval;
            }
            Err(err) if err.is_transient() => {
                warn!(id, error = ?err, "Transient refresh failure, backing off");
                interval = (interval * 2).min(options.backoff_cap);
            }
            Err(err) => return Err(err.into()),
        }
        if let Some(timeout) = options.timeout {
            if started.elapsed() >= timeout {
                return Err(OrchestrationError::Timeout {
                    id: id.to_owned(),
                    elapsed: started.elapsed(),
                });
            }
        }
        thread::sleep(interval);
    }
}

/// Poll until the item reaches a terminal status, the timeout expires or
/// the handle is canceled. Canceling the handle stops the wait; it does not
/// cancel the jobs.
pub fn wait_till_done(
    platform: &Platform,
    item: &mut Item,
    options: &WaitOptions,
    handle: Option<&WaitHandle>,
) -> Result<EntityStatus, OrchestrationError> {
    let id = item.id().unwrap_or("?").to_owned();
    wait_loop(&id, options, handle, || {
        platform.refresh(item)?;
        Ok(item.status())
    })
}

/// [`wait_till_done`] for an experiment held outside an [`Item`].
pub fn wait_on_experiment(
    platform: &Platform,
    experiment: &mut Experiment,
    options: &WaitOptions,
    handle: Option<&WaitHandle>,
) -> Result<EntityStatus, OrchestrationError> {
    let id = experiment.id.clone().unwrap_or_else(|| "?".to_owned());
    let ops = platform.backend().experiments();
    wait_loop(&id, options, handle, || {
        ops.refresh_status(experiment)?;
        Ok(experiment.status())
    })
}

/// Submit an experiment and block until it finishes.
pub fn run_experiment_and_wait(
    platform: &Platform,
    experiment: &mut Experiment,
    config: &RunConfig,
    options: &WaitOptions,
) -> Result<EntityStatus, OrchestrationError> {
    submit_experiment(platform, experiment, config)?;
    wait_on_experiment(platform, experiment, options, None)
}

/// Request cancellation of every item. Idempotent; already terminal items
/// are skipped by the backend.
pub fn cancel_items(platform: &Platform, items: &mut [Item]) -> Result<(), OrchestrationError> {
    for item in items.iter_mut() {
        platform.cancel(item)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::{set_parameter_sweep, SimulationBuilder};
    use crate::mock::{MockBackend, MockBehavior};
    use crate::tags::TagValue;
    use crate::task::Task;
    use crate::template::TemplatedSimulations;

    fn fast_config() -> RunConfig {
        RunConfig {
            batch_size: 2,
            max_workers: 4,
            retry_attempts: 5,
            retry_backoff: Duration::from_millis(1),
        }
    }

    fn fast_wait() -> WaitOptions {
        WaitOptions {
            timeout: Some(Duration::from_secs(5)),
            refresh_interval: Duration::from_millis(1),
            backoff_cap: Duration::from_millis(8),
            ..WaitOptions::default()
        }
    }

    fn sweep_experiment(values: std::ops::Range<i64>) -> Experiment {
        let mut builder = SimulationBuilder::new();
        builder.add_sweep_definition(set_parameter_sweep("Run_Number"), values);
        let template = TemplatedSimulations::from_task(Task::from_command("run_model"), builder);
        Experiment::from_template("sweep", template)
    }

    #[test]
    fn submit_and_wait_reaches_succeeded() {
        let backend = MockBackend::new(MockBehavior {
            ticks_to_complete: 3,
            ..MockBehavior::default()
        });
        let platform = Platform::from_backend(backend);
        let mut experiment = sweep_experiment(0..6);

        let status =
            run_experiment_and_wait(&platform, &mut experiment, &fast_config(), &fast_wait())
                .unwrap();
        assert_eq!(status, EntityStatus::Succeeded);
        assert_eq!(experiment.simulations().len(), 6);
        assert!(experiment
            .simulations()
            .iter()
            .all(|s| s.status == EntityStatus::Succeeded && s.id.is_some()));
    }

    #[test]
    fn failed_children_fail_the_experiment() {
        let backend = MockBackend::new(MockBehavior {
            fail_tag: Some(("Run_Number".to_owned(), TagValue::Int(1))),
            ..MockBehavior::default()
        });
        let platform = Platform::from_backend(backend);
        let mut experiment = sweep_experiment(0..4);

        let status =
            run_experiment_and_wait(&platform, &mut experiment, &fast_config(), &fast_wait())
                .unwrap();
        assert_eq!(status, EntityStatus::Failed);
        let failed = experiment
            .simulations()
            .iter()
            .filter(|s| s.status == EntityStatus::Failed)
            .count();
        assert_eq!(failed, 1);
    }

    #[test]
    fn transient_failures_are_retried_away() {
        let backend = MockBackend::new(MockBehavior::default());
        backend.inject_transient_failures(3);
        let platform = Platform::from_backend(backend);
        let mut experiment = sweep_experiment(0..4);

        let status =
            run_experiment_and_wait(&platform, &mut experiment, &fast_config(), &fast_wait())
                .unwrap();
        assert_eq!(status, EntityStatus::Succeeded);
    }

    #[test]
    fn submission_routes_through_batch_create() {
        let backend = MockBackend::new(MockBehavior::default());
        let platform = Platform::from_backend(backend.clone());
        let mut experiment = sweep_experiment(0..5);
        // batch_size 2 over 5 children
        submit_experiment(&platform, &mut experiment, &fast_config()).unwrap();

        let mut sizes = backend.batch_sizes();
        sizes.sort_unstable();
        assert_eq!(sizes, vec![1, 2, 2]);
    }

    #[test]
    fn retried_batches_do_not_recreate_existing_simulations() {
        let backend = MockBackend::new(MockBehavior::default());
        // the first failure lands on the experiment's asset staging, the
        // second inside a child batch
        backend.inject_transient_failures(2);
        let platform = Platform::from_backend(backend.clone());
        let mut experiment = sweep_experiment(0..4);
        submit_experiment(&platform, &mut experiment, &fast_config()).unwrap();

        assert!(experiment.simulations().iter().all(|s| s.id.is_some()));
        assert_eq!(backend.simulation_count(), 4);
    }

    #[test]
    fn repeated_asset_staging_uploads_once() {
        use crate::assets::Asset;

        let backend = MockBackend::new(MockBehavior::default());
        let platform = Platform::from_backend(backend.clone());
        let mut experiment = sweep_experiment(0..2);
        experiment
            .add_common_asset(Asset::from_bytes("", "model.txt", b"weights".to_vec()))
            .unwrap();
        submit_experiment(&platform, &mut experiment, &fast_config()).unwrap();

        let fingerprint = experiment.assets.fingerprint().unwrap();
        assert_eq!(backend.upload_count(&fingerprint), 1);
        platform
            .backend()
            .experiments()
            .send_assets(&mut experiment)
            .unwrap();
        assert_eq!(backend.upload_count(&fingerprint), 1);
    }

    #[test]
    fn wait_reports_progress_every_tick() {
        use std::sync::atomic::AtomicU32;

        let backend = MockBackend::new(MockBehavior {
            ticks_to_complete: 3,
            ..MockBehavior::default()
        });
        let platform = Platform::from_backend(backend);
        let mut experiment = sweep_experiment(0..2);
        submit_experiment(&platform, &mut experiment, &fast_config()).unwrap();

        let ticks = Arc::new(AtomicU32::new(0));
        let seen = ticks.clone();
        let options = WaitOptions {
            progress: Some(Arc::new(move |_, _| {
                seen.fetch_add(1, Ordering::SeqCst);
            })),
            ..fast_wait()
        };
        let status = wait_on_experiment(&platform, &mut experiment, &options, None).unwrap();
        assert_eq!(status, EntityStatus::Succeeded);
        assert!(ticks.load(Ordering::SeqCst) >= 3);
    }

    #[test]
    fn wait_times_out_on_stuck_jobs() {
        let backend = MockBackend::new(MockBehavior {
            ticks_to_complete: u32::MAX,
            ..MockBehavior::default()
        });
        let platform = Platform::from_backend(backend);
        let mut experiment = sweep_experiment(0..2);
        submit_experiment(&platform, &mut experiment, &fast_config()).unwrap();

        let options = WaitOptions {
            timeout: Some(Duration::from_millis(20)),
            ..fast_wait()
        };
        let err = wait_on_experiment(&platform, &mut experiment, &options, None).unwrap_err();
        assert!(matches!(err, OrchestrationError::Timeout { .. }));
    }

    #[test]
    fn canceled_handle_stops_the_wait() {
        let backend = MockBackend::new(MockBehavior {
            ticks_to_complete: u32::MAX,
            ..MockBehavior::default()
        });
        let platform = Platform::from_backend(backend);
        let mut experiment = sweep_experiment(0..2);
        submit_experiment(&platform, &mut experiment, &fast_config()).unwrap();

        let handle = WaitHandle::new();
        handle.cancel();
        let err =
            wait_on_experiment(&platform, &mut experiment, &fast_wait(), Some(&handle))
                .unwrap_err();
        assert!(matches!(err, OrchestrationError::WaitCanceled { .. }));
    }

    #[test]
    fn canceled_experiments_settle_as_canceled() {
        let backend = MockBackend::new(MockBehavior {
            ticks_to_complete: u32::MAX,
            ..MockBehavior::default()
        });
        let platform = Platform::from_backend(backend.clone());
        let mut experiment = sweep_experiment(0..3);
        submit_experiment(&platform, &mut experiment, &fast_config()).unwrap();

        platform
            .backend()
            .experiments()
            .cancel(&mut experiment)
            .unwrap();
        let status =
            wait_on_experiment(&platform, &mut experiment, &fast_wait(), None).unwrap();
        assert_eq!(status, EntityStatus::Canceled);
        // the backend itself reports the canceled job as FAILED
        let sim_id = experiment.simulations()[0].id.clone().unwrap();
        assert_eq!(backend.stored_status(&sim_id), Some(EntityStatus::Failed));
    }

    #[test]
    fn retry_wrapper_gives_up_on_permanent_errors() {
        let mut calls = 0;
        let result: Result<(), PlatformError> =
            with_retries("op", 5, Duration::from_millis(1), || {
                calls += 1;
                Err(PlatformError::Permanent {
                    operation: "op".to_owned(),
                    id: "x".to_owned(),
                    reason: "no".to_owned(),
                })
            });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
