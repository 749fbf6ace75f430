//! End-to-end campaigns on the file backend: real directories, real child
//! processes, observed purely through the public facade.

use std::sync::Arc;
use std::time::Duration;
use sweeprun_core::builders::{SimulationBuilder, SweepValue};
use sweeprun_core::entities::{Experiment, ItemKind, Simulation, Suite};
use sweeprun_core::error::OrchestrationError;
use sweeprun_core::filter::{filter_simulations, FilterSpec};
use sweeprun_core::orchestration::{
    run_experiment_and_wait, submit_experiment, wait_on_experiment, RunConfig, WaitOptions,
};
use sweeprun_core::platform::{Platform, RetrievedFiles};
use sweeprun_core::status::EntityStatus;
use sweeprun_core::tags::tag;
use sweeprun_core::task::Task;
use sweeprun_core::template::TemplatedSimulations;
use sweeprun_core::Asset;
use sweeprun_platform_file::{layout, report, FileOptions, FilePlatform};

fn file_platform(dir: &std::path::Path, options: FileOptions) -> (Arc<FilePlatform>, Platform) {
    let backend = FilePlatform::new(dir, options);
    let platform = Platform::from_backend(backend.clone());
    (backend, platform)
}

fn fast_config() -> RunConfig {
    RunConfig {
        batch_size: 3,
        max_workers: 4,
        retry_attempts: 2,
        retry_backoff: Duration::from_millis(5),
    }
}

fn fast_wait(timeout: Duration) -> WaitOptions {
    WaitOptions {
        timeout: Some(timeout),
        refresh_interval: Duration::from_millis(10),
        backoff_cap: Duration::from_millis(100),
        ..WaitOptions::default()
    }
}

/// Sweep callback that both records the parameter and appends it as a
/// positional shell argument, so jobs can compute on the swept values.
fn sweep_arg(name: &'static str) -> impl Fn(&mut Simulation, &SweepValue) -> Result<sweeprun_core::Tags, sweeprun_core::ValidationError> + Send + Sync {
    move |simulation, value| {
        let n = value.as_i64().unwrap_or_default();
        simulation.task.command.add_argument(n.to_string());
        simulation.task.set_parameter(name, n);
        Ok(tag(name, n))
    }
}

fn sum_experiment() -> Experiment {
    // $0 and $1 are the swept values appended after the script
    let mut task = Task::new(sweeprun_core::CommandLine::new("sh"));
    task.command.add_argument("-c");
    task.command
        .add_argument(r#"mkdir -p output && echo "result:$(($0 + $1))" > output/result.txt"#);
    let mut builder = SimulationBuilder::new();
    builder.add_sweep_definition(sweep_arg("a"), [1i64, 2, 3]);
    builder.add_sweep_definition(sweep_arg("b"), [10i64, 20]);
    Experiment::from_template("sum-sweep", TemplatedSimulations::from_task(task, builder))
}

#[test]
fn cross_sweep_runs_and_outputs_are_retrievable() {
    let dir = tempfile::tempdir().unwrap();
    let (_backend, platform) = file_platform(dir.path(), FileOptions::default());
    let mut experiment = sum_experiment();

    let status = run_experiment_and_wait(
        &platform,
        &mut experiment,
        &fast_config(),
        &fast_wait(Duration::from_secs(30)),
    )
    .unwrap();
    assert_eq!(status, EntityStatus::Succeeded);
    assert_eq!(experiment.simulations().len(), 6);

    let id = experiment.id.clone().unwrap();
    let files = platform
        .get_files(
            ItemKind::Experiment,
            &id,
            &["output/result.txt".to_owned()],
        )
        .unwrap();
    let RetrievedFiles::BySimulation(by_simulation) = files else {
        panic!("experiment retrieval must group by simulation");
    };
    assert_eq!(by_simulation.len(), 6);

    for simulation in experiment.simulations() {
        let sim_id = simulation.id.as_deref().unwrap();
        let a = simulation.tags["a"].as_i64().unwrap();
        let b = simulation.tags["b"].as_i64().unwrap();
        let content = String::from_utf8(by_simulation[sim_id]["output/result.txt"].clone()).unwrap();
        assert_eq!(content.trim(), format!("result:{}", a + b));
    }
}

#[test]
fn failing_jobs_fail_their_simulations_and_the_experiment() {
    let dir = tempfile::tempdir().unwrap();
    let (_backend, platform) = file_platform(dir.path(), FileOptions::default());

    let mut task = Task::new(sweeprun_core::CommandLine::new("sh"));
    task.command.add_argument("-c");
    task.command
        .add_argument(r#"if [ "$0" -eq 1 ]; then exit 127; fi"#);
    let mut builder = SimulationBuilder::new();
    builder.add_sweep_definition(sweep_arg("a"), [1i64, 2, 3]);
    builder.add_sweep_definition(sweep_arg("b"), [10i64, 20]);
    let mut experiment =
        Experiment::from_template("partial-failure", TemplatedSimulations::from_task(task, builder));

    let status = run_experiment_and_wait(
        &platform,
        &mut experiment,
        &fast_config(),
        &fast_wait(Duration::from_secs(30)),
    )
    .unwrap();
    assert_eq!(status, EntityStatus::Failed);

    let id = experiment.id.clone().unwrap();
    let failed = filter_simulations(
        &platform,
        ItemKind::Experiment,
        &id,
        &FilterSpec::new().with_status(EntityStatus::Failed),
    )
    .unwrap();
    assert_eq!(failed.len(), 2);
    assert!(failed.iter().all(|sim| sim.tags["a"].as_i64() == Some(1)));

    let succeeded = filter_simulations(
        &platform,
        ItemKind::Experiment,
        &id,
        &FilterSpec::new().with_status(EntityStatus::Succeeded),
    )
    .unwrap();
    assert_eq!(succeeded.len(), 4);
}

#[test]
fn wait_timeout_then_cancel_settles_the_experiment() {
    let dir = tempfile::tempdir().unwrap();
    let (_backend, platform) = file_platform(
        dir.path(),
        FileOptions {
            max_workers: 1,
            ..FileOptions::default()
        },
    );

    let task = Task::from_command("sleep 2");
    let mut builder = SimulationBuilder::new();
    builder.add_sweep_definition(sweep_arg("n"), [0i64, 1, 2]);
    let mut experiment =
        Experiment::from_template("slow", TemplatedSimulations::from_task(task, builder));
    submit_experiment(&platform, &mut experiment, &fast_config()).unwrap();

    let err = wait_on_experiment(
        &platform,
        &mut experiment,
        &fast_wait(Duration::from_millis(200)),
        None,
    )
    .unwrap_err();
    assert!(matches!(err, OrchestrationError::Timeout { .. }));

    platform
        .backend()
        .experiments()
        .cancel(&mut experiment)
        .unwrap();
    let status = wait_on_experiment(
        &platform,
        &mut experiment,
        &fast_wait(Duration::from_secs(30)),
        None,
    )
    .unwrap();
    // the in-flight job is killed on the marker, so every child cancels
    assert_eq!(status, EntityStatus::Canceled);
    assert!(experiment
        .simulations()
        .iter()
        .all(|sim| sim.status == EntityStatus::Canceled));
}

#[test]
fn canceling_a_running_job_kills_it() {
    let dir = tempfile::tempdir().unwrap();
    let (_backend, platform) = file_platform(dir.path(), FileOptions::default());

    let task = Task::from_command("sleep 30");
    let mut builder = SimulationBuilder::new();
    builder.add_sweep_definition(sweep_arg("n"), [0i64]);
    let mut experiment =
        Experiment::from_template("long", TemplatedSimulations::from_task(task, builder));
    submit_experiment(&platform, &mut experiment, &fast_config()).unwrap();

    let ops = platform.backend().experiments();
    let started = std::time::Instant::now();
    loop {
        ops.refresh_status(&mut experiment).unwrap();
        if experiment.status() == EntityStatus::Running {
            break;
        }
        assert!(started.elapsed() < Duration::from_secs(10), "job never started");
        std::thread::sleep(Duration::from_millis(10));
    }

    ops.cancel(&mut experiment).unwrap();
    let status = wait_on_experiment(
        &platform,
        &mut experiment,
        &fast_wait(Duration::from_secs(10)),
        None,
    )
    .unwrap();
    assert_eq!(status, EntityStatus::Canceled);
}

#[test]
fn tag_predicate_filters_the_job_tree() {
    let dir = tempfile::tempdir().unwrap();
    let (_backend, platform) = file_platform(dir.path(), FileOptions::default());

    let task = Task::from_command("true");
    let mut builder = SimulationBuilder::new();
    builder.add_sweep_definition(sweep_arg("Run_Number"), 0..5i64);
    let mut experiment =
        Experiment::from_template("runs", TemplatedSimulations::from_task(task, builder));
    run_experiment_and_wait(
        &platform,
        &mut experiment,
        &fast_config(),
        &fast_wait(Duration::from_secs(30)),
    )
    .unwrap();

    let id = experiment.id.clone().unwrap();
    let spec = FilterSpec::new().with_tag_predicate("Run_Number", |value| {
        value.as_i64().is_some_and(|n| (1..3).contains(&n))
    });
    let selected = filter_simulations(&platform, ItemKind::Experiment, &id, &spec).unwrap();
    assert_eq!(selected.len(), 2);
}

#[test]
fn job_tree_carries_scripts_assets_and_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let (backend, platform) = file_platform(dir.path(), FileOptions::default());

    let mut experiment = sum_experiment();
    experiment
        .add_common_asset(Asset::from_bytes("", "model.txt", b"weights".to_vec()))
        .unwrap();
    run_experiment_and_wait(
        &platform,
        &mut experiment,
        &fast_config(),
        &fast_wait(Duration::from_secs(30)),
    )
    .unwrap();

    let id = experiment.id.clone().unwrap();
    let experiment_dir = platform.get_directory(ItemKind::Experiment, &id).unwrap();
    assert!(experiment_dir.join(layout::METADATA_FILE).is_file());
    assert!(experiment_dir
        .join(layout::ASSETS_DIR)
        .join("model.txt")
        .is_file());

    assert!(experiment_dir.join(layout::BATCH_SCRIPT).is_file());

    let sim_id = experiment.simulations()[0].id.as_deref().unwrap();
    let sim_dir = platform.get_directory(ItemKind::Simulation, sim_id).unwrap();
    assert!(sim_dir.join(layout::RUN_SCRIPT).is_file());
    assert!(sim_dir.join(layout::SIMULATION_METADATA_FILE).is_file());
    assert!(sim_dir.join("config.json").is_file());
    // the shared assets are visible from inside the job directory
    assert!(sim_dir.join(layout::ASSETS_DIR).join("model.txt").exists());

    let report = report::experiment_report(backend.layout(), &id).unwrap();
    assert_eq!(report.counts["SUCCEEDED"], 6);
}

#[test]
fn reloaded_experiments_carry_live_status_and_children() {
    let dir = tempfile::tempdir().unwrap();
    let (_backend, platform) = file_platform(dir.path(), FileOptions::default());
    let mut experiment = sum_experiment();
    run_experiment_and_wait(
        &platform,
        &mut experiment,
        &fast_config(),
        &fast_wait(Duration::from_secs(30)),
    )
    .unwrap();
    let id = experiment.id.clone().unwrap();

    let reloaded = platform.get_experiment_with_simulations(&id).unwrap();
    assert!(reloaded.is_frozen());
    assert_eq!(reloaded.simulations().len(), 6);
    assert_eq!(reloaded.status(), EntityStatus::Succeeded);
    assert!(reloaded
        .simulations()
        .iter()
        .all(|sim| sim.tags.contains_key("a")));
}

#[test]
fn suites_group_experiments_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let (_backend, platform) = file_platform(dir.path(), FileOptions::default());

    let mut suite = Suite::new("campaign");
    let mut suite_item = sweeprun_core::Item::Suite(suite.clone());
    let suite_id = platform.create(&mut suite_item).unwrap();
    let sweeprun_core::Item::Suite(created) = suite_item else {
        panic!("kind changed");
    };
    suite = created;

    let mut experiment = sum_experiment();
    experiment.suite_id = suite.id.clone();
    run_experiment_and_wait(
        &platform,
        &mut experiment,
        &fast_config(),
        &fast_wait(Duration::from_secs(30)),
    )
    .unwrap();
    let experiment_id = experiment.id.clone().unwrap();

    let experiment_dir = platform
        .get_directory(ItemKind::Experiment, &experiment_id)
        .unwrap();
    assert!(experiment_dir.starts_with(
        platform.get_directory(ItemKind::Suite, &suite_id).unwrap()
    ));

    let leaves = platform.flatten_item(ItemKind::Suite, &suite_id).unwrap();
    assert_eq!(leaves.len(), 6);

    let loaded = platform.get_suite_with_experiments(&suite_id).unwrap();
    assert_eq!(loaded.experiments.len(), 1);
    assert_eq!(loaded.status(), EntityStatus::Succeeded);
}

#[test]
fn archive_packs_the_whole_experiment() {
    let dir = tempfile::tempdir().unwrap();
    let (backend, platform) = file_platform(dir.path(), FileOptions::default());
    let mut experiment = sum_experiment();
    run_experiment_and_wait(
        &platform,
        &mut experiment,
        &fast_config(),
        &fast_wait(Duration::from_secs(30)),
    )
    .unwrap();
    let id = experiment.id.clone().unwrap();

    let archive =
        sweeprun_platform_file::archive_experiment_by_id(backend.layout(), &id).unwrap();
    assert!(archive.is_file());
    assert_eq!(archive.file_name().unwrap(), layout::ARCHIVE_FILE);
}

#[test]
fn backend_builds_from_a_configuration_block() {
    let dir = tempfile::tempdir().unwrap();
    sweeprun_platform_file::register();

    let raw = format!(
        "local:\n  type: file\n  job_directory: {}\n  max_workers: 2\n  write_scripts: false\n",
        dir.path().display()
    );
    let config = sweeprun_core::config::ConfigFile::from_str(&raw).unwrap();
    let platform = Platform::from_config_file(&config, "local").unwrap();
    assert_eq!(platform.plugin_name(), "file");

    let mut experiment = sum_experiment();
    let status = run_experiment_and_wait(
        &platform,
        &mut experiment,
        &fast_config(),
        &fast_wait(Duration::from_secs(30)),
    )
    .unwrap();
    assert_eq!(status, EntityStatus::Succeeded);
    let sim_id = experiment.simulations()[0].id.as_deref().unwrap();
    let sim_dir = platform.get_directory(ItemKind::Simulation, sim_id).unwrap();
    assert!(!sim_dir.join(layout::RUN_SCRIPT).exists());
}
