//! The file backend's operation tables: every core operation mapped onto
//! directories, metadata snapshots and `job_status.txt`.

use crate::archive;
use crate::error::{platform_err, FilePlatformError};
use crate::layout::{
    self, FileLayout, JobStatus, ASSETS_DIR, CANCEL_FILE, METADATA_FILE, SIMULATION_METADATA_FILE,
};
use crate::metadata;
use crate::runner::{JobSpec, Runner, RunnerOptions};
use crate::scripts;
use crate::store::{AssetStager, CollectionManifest, ManifestEntry};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use sweeprun_core::assets::{sha256_bytes, Asset, AssetCollection};
use sweeprun_core::entities::{
    Experiment, ExperimentSnapshot, ItemKind, Simulation, Suite, SuiteSnapshot, WorkItem,
};
use sweeprun_core::error::{PlatformError, ValidationError};
use sweeprun_core::ids;
use sweeprun_core::ops::{
    AssetCollectionOperations, ExperimentOperations, FileBytes, RawItem, SimulationOperations,
    SuiteOperations, WorkItemOperations,
};
use sweeprun_core::status::EntityStatus;
use tracing::debug;

/// Behavior knobs of the file backend, filled from its configuration block.
#[derive(Clone, Debug)]
pub struct FileOptions {
    pub max_workers: usize,
    /// Link staged assets instead of copying them.
    pub sym_link: bool,
    /// Generate a `run.sh` wrapper per simulation.
    pub write_scripts: bool,
    /// Times the runner re-runs a failed job before the failure sticks.
    pub retries: u32,
    /// Wall-clock limit per job attempt.
    pub timeout: Option<Duration>,
}

impl Default for FileOptions {
    fn default() -> Self {
        Self {
            max_workers: num_cpus::get(),
            sym_link: true,
            write_scripts: true,
            retries: 0,
            timeout: None,
        }
    }
}

pub(crate) struct Inner {
    pub layout: FileLayout,
    pub options: FileOptions,
    pub stager: AssetStager,
    pub runner: Runner,
}

impl Inner {
    pub fn new(job_directory: impl Into<PathBuf>, options: FileOptions) -> Self {
        let layout = FileLayout::new(job_directory);
        let stager = AssetStager::new(layout.clone(), options.sym_link);
        Self {
            layout,
            options,
            stager,
            runner: Runner::new(),
        }
    }

    fn generate_id(&self, kind: ItemKind) -> Result<String, PlatformError> {
        ids::generate(kind).map_err(|error| PlatformError::Permanent {
            operation: "generate_id".to_owned(),
            id: kind.item_name().to_owned(),
            reason: error.to_string(),
        })
    }

    fn runner_options(&self) -> RunnerOptions {
        RunnerOptions {
            max_workers: self.options.max_workers,
            retries: self.options.retries,
            timeout: self.options.timeout,
        }
    }

    fn directory(&self, kind: ItemKind, id: &str) -> Result<PathBuf, PlatformError> {
        self.layout.find_directory(id).map_err(|err| match err {
            FilePlatformError::DirectoryNotFound(_) => PlatformError::NotFound {
                kind,
                id: id.to_owned(),
            },
            other => platform_err("find_directory", id, other),
        })
    }

    fn require_id<'a>(entity_id: &'a Option<String>) -> Result<&'a str, PlatformError> {
        entity_id
            .as_deref()
            .ok_or_else(|| ValidationError::MissingId.into())
    }

    /// Read every child's status file into the experiment and refresh the
    /// persisted snapshot.
    fn refresh_experiment(&self, experiment: &mut Experiment) -> Result<(), PlatformError> {
        let id = Self::require_id(&experiment.id)?.to_owned();
        let experiment_dir = self.directory(ItemKind::Experiment, &id)?;
        for simulation in experiment.simulations_mut() {
            let Some(sim_id) = simulation.id.as_deref() else {
                continue;
            };
            let status = layout::read_job_status(&experiment_dir.join(sim_id))
                .map_err(|e| platform_err("refresh_status", sim_id, e))?;
            simulation.absorb_backend_status(status.to_entity_status());
        }
        metadata::write_experiment(&experiment_dir, &experiment.snapshot())
            .map_err(|e| platform_err("refresh_status", &id, e))
    }

    fn run_experiment(&self, experiment: &mut Experiment) -> Result<(), PlatformError> {
        let id = Self::require_id(&experiment.id)?.to_owned();
        let experiment_dir = self.directory(ItemKind::Experiment, &id)?;
        let mut jobs = Vec::new();
        for simulation in experiment.simulations_mut() {
            let Some(sim_id) = simulation.id.as_deref() else {
                continue;
            };
            jobs.push(JobSpec {
                simulation_id: sim_id.to_owned(),
                dir: experiment_dir.join(sim_id),
                command: simulation.task.command.clone(),
            });
            simulation.absorb_backend_status(EntityStatus::Commissioning);
        }
        metadata::write_experiment(&experiment_dir, &experiment.snapshot())
            .map_err(|e| platform_err("run_item", &id, e))?;
        if self.options.write_scripts {
            let simulation_ids: Vec<String> =
                jobs.iter().map(|job| job.simulation_id.clone()).collect();
            scripts::write_batch_script(&experiment_dir, &simulation_ids)
                .map_err(|e| platform_err("run_item", &id, e))?;
        }
        self.runner.commission(jobs, self.runner_options());
        Ok(())
    }

    fn cancel_experiment(&self, experiment: &mut Experiment) -> Result<(), PlatformError> {
        let id = Self::require_id(&experiment.id)?.to_owned();
        let experiment_dir = self.directory(ItemKind::Experiment, &id)?;
        for simulation in experiment.simulations_mut() {
            simulation.cancel_requested = true;
            if let Some(sim_id) = simulation.id.as_deref() {
                cancel_job_dir(&experiment_dir.join(sim_id))
                    .map_err(|e| platform_err("cancel", sim_id, e))?;
            }
        }
        Ok(())
    }

    /// Raw simulation view: the persisted metadata with the live status
    /// patched in from the status file.
    fn raw_simulation(&self, simulation_dir: &Path) -> Result<RawItem, PlatformError> {
        let sim_id = simulation_dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut simulation = metadata::read_simulation(simulation_dir)
            .map_err(|e| platform_err("get", &sim_id, e))?;
        let status = layout::read_job_status(simulation_dir)
            .map_err(|e| platform_err("get", &sim_id, e))?;
        simulation.absorb_backend_status(status.to_entity_status());
        serde_json::to_value(&simulation).map_err(|e| PlatformError::Permanent {
            operation: "get".to_owned(),
            id: sim_id,
            reason: e.to_string(),
        })
    }
}

/// Mark a job directory canceled. Jobs that never started fail immediately;
/// the runner kills a running process as soon as it sees the marker.
fn cancel_job_dir(simulation_dir: &Path) -> Result<(), FilePlatformError> {
    if !simulation_dir.is_dir() {
        return Ok(());
    }
    let marker = simulation_dir.join(CANCEL_FILE);
    fs::write(&marker, "").map_err(|e| FilePlatformError::io(&marker, e))?;
    if layout::read_job_status(simulation_dir)? == JobStatus::Pending {
        layout::write_job_status(simulation_dir, JobStatus::Failed)?;
    }
    Ok(())
}

fn snapshot_to_experiment(snapshot: ExperimentSnapshot) -> Experiment {
    let mut experiment = Experiment::new(snapshot.name);
    experiment.id = snapshot.id;
    experiment.tags = snapshot.tags;
    experiment.suite_id = snapshot.suite_id;
    experiment.assets = snapshot.assets;
    experiment.freeze();
    experiment
}

macro_rules! ops_struct {
    ($name:ident) => {
        #[derive(Clone)]
        pub(crate) struct $name {
            pub inner: Arc<Inner>,
        }
    };
}

ops_struct!(FileSuiteOps);
ops_struct!(FileExperimentOps);
ops_struct!(FileSimulationOps);
ops_struct!(FileAssetCollectionOps);

impl SuiteOperations for FileSuiteOps {
    fn get(&self, id: &str) -> Result<RawItem, PlatformError> {
        let dir = self.inner.directory(ItemKind::Suite, id)?;
        metadata::read_raw(&metadata::suite_metadata_path(&dir))
            .map_err(|e| platform_err("get", id, e))
    }

    fn platform_create(&self, suite: &mut Suite) -> Result<String, PlatformError> {
        let id = self.inner.generate_id(ItemKind::Suite)?;
        let dir = self.inner.layout.suite_dir(&id);
        fs::create_dir_all(&dir).map_err(|e| PlatformError::io("platform_create", &id, e))?;
        suite.id = Some(id.clone());
        for experiment in suite.experiments.iter_mut() {
            experiment.suite_id = Some(id.clone());
        }
        metadata::write_suite(&dir, &suite.snapshot())
            .map_err(|e| platform_err("platform_create", &id, e))?;
        debug!(suite = id.as_str(), dir = ?dir, "Created suite directory");
        Ok(id)
    }

    fn run_item(&self, suite: &mut Suite) -> Result<(), PlatformError> {
        for experiment in suite.experiments.iter_mut() {
            self.inner.run_experiment(experiment)?;
        }
        Ok(())
    }

    fn refresh_status(&self, suite: &mut Suite) -> Result<(), PlatformError> {
        for experiment in suite.experiments.iter_mut() {
            self.inner.refresh_experiment(experiment)?;
        }
        Ok(())
    }

    fn get_children(&self, id: &str) -> Result<Vec<RawItem>, PlatformError> {
        let dir = self.inner.directory(ItemKind::Suite, id)?;
        let mut children = Vec::new();
        for child in self
            .inner
            .layout
            .children_with(&dir, METADATA_FILE)
            .map_err(|e| platform_err("get_children", id, e))?
        {
            children.push(
                metadata::read_raw(&metadata::experiment_metadata_path(&child))
                    .map_err(|e| platform_err("get_children", id, e))?,
            );
        }
        Ok(children)
    }

    fn cancel(&self, suite: &mut Suite) -> Result<(), PlatformError> {
        for experiment in suite.experiments.iter_mut() {
            self.inner.cancel_experiment(experiment)?;
        }
        Ok(())
    }

    fn to_entity(&self, raw: &RawItem) -> Result<Suite, PlatformError> {
        let snapshot: SuiteSnapshot =
            serde_json::from_value(raw.clone()).map_err(|e| PlatformError::Permanent {
                operation: "to_entity".to_owned(),
                id: String::new(),
                reason: e.to_string(),
            })?;
        let mut suite = Suite::new(snapshot.name);
        suite.id = snapshot.id;
        suite.tags = snapshot.tags;
        Ok(suite)
    }
}

impl ExperimentOperations for FileExperimentOps {
    fn get(&self, id: &str) -> Result<RawItem, PlatformError> {
        let dir = self.inner.directory(ItemKind::Experiment, id)?;
        metadata::read_raw(&metadata::experiment_metadata_path(&dir))
            .map_err(|e| platform_err("get", id, e))
    }

    fn platform_create(&self, experiment: &mut Experiment) -> Result<String, PlatformError> {
        let id = self.inner.generate_id(ItemKind::Experiment)?;
        let dir = self
            .inner
            .layout
            .experiment_dir(experiment.suite_id.as_deref(), &id);
        fs::create_dir_all(dir.join(ASSETS_DIR))
            .map_err(|e| PlatformError::io("platform_create", &id, e))?;
        experiment.id = Some(id.clone());
        metadata::write_experiment(&dir, &experiment.snapshot())
            .map_err(|e| platform_err("platform_create", &id, e))?;
        debug!(experiment = id.as_str(), dir = ?dir, "Created experiment directory");
        Ok(id)
    }

    fn run_item(&self, experiment: &mut Experiment) -> Result<(), PlatformError> {
        self.inner.run_experiment(experiment)
    }

    fn refresh_status(&self, experiment: &mut Experiment) -> Result<(), PlatformError> {
        self.inner.refresh_experiment(experiment)
    }

    fn send_assets(&self, experiment: &mut Experiment) -> Result<(), PlatformError> {
        if experiment.assets.is_empty() {
            return Ok(());
        }
        let id = Inner::require_id(&experiment.id)?.to_owned();
        let dir = self.inner.directory(ItemKind::Experiment, &id)?;
        let mut assets = experiment.assets.clone();
        self.inner
            .stager
            .stage_collection(&mut assets, &dir.join(ASSETS_DIR))
            .map_err(|e| platform_err("send_assets", &id, e))?;
        experiment.assets = assets;
        Ok(())
    }

    fn get_parent(&self, id: &str) -> Result<Option<RawItem>, PlatformError> {
        let dir = self.inner.directory(ItemKind::Experiment, id)?;
        let Some(parent) = dir.parent() else {
            return Ok(None);
        };
        if parent == self.inner.layout.root() {
            return Ok(None);
        }
        Ok(Some(
            metadata::read_raw(&metadata::suite_metadata_path(parent))
                .map_err(|e| platform_err("get_parent", id, e))?,
        ))
    }

    fn get_children(&self, id: &str) -> Result<Vec<RawItem>, PlatformError> {
        let dir = self.inner.directory(ItemKind::Experiment, id)?;
        let mut children = Vec::new();
        for child in self
            .inner
            .layout
            .children_with(&dir, SIMULATION_METADATA_FILE)
            .map_err(|e| platform_err("get_children", id, e))?
        {
            children.push(self.inner.raw_simulation(&child)?);
        }
        Ok(children)
    }

    fn cancel(&self, experiment: &mut Experiment) -> Result<(), PlatformError> {
        self.inner.cancel_experiment(experiment)
    }

    fn to_entity(&self, raw: &RawItem) -> Result<Experiment, PlatformError> {
        let snapshot: ExperimentSnapshot =
            serde_json::from_value(raw.clone()).map_err(|e| PlatformError::Permanent {
                operation: "to_entity".to_owned(),
                id: String::new(),
                reason: e.to_string(),
            })?;
        Ok(snapshot_to_experiment(snapshot))
    }
}

impl SimulationOperations for FileSimulationOps {
    fn get(&self, id: &str) -> Result<RawItem, PlatformError> {
        let dir = self.inner.directory(ItemKind::Simulation, id)?;
        self.inner.raw_simulation(&dir)
    }

    fn platform_create(&self, simulation: &mut Simulation) -> Result<String, PlatformError> {
        let experiment_id = simulation
            .experiment_id
            .as_deref()
            .ok_or(ValidationError::MissingParent)?
            .to_owned();
        let experiment_dir = self.inner.directory(ItemKind::Experiment, &experiment_id)?;
        let id = self.inner.generate_id(ItemKind::Simulation)?;
        let dir = experiment_dir.join(&id);
        fs::create_dir_all(&dir).map_err(|e| PlatformError::io("platform_create", &id, e))?;
        simulation.id = Some(id.clone());
        metadata::write_simulation(&dir, simulation)
            .map_err(|e| platform_err("platform_create", &id, e))?;
        simulation.absorb_backend_status(EntityStatus::Created);
        Ok(id)
    }

    fn run_item(&self, simulation: &mut Simulation) -> Result<(), PlatformError> {
        let id = Inner::require_id(&simulation.id)?.to_owned();
        let dir = self.inner.directory(ItemKind::Simulation, &id)?;
        self.inner.runner.commission(
            vec![JobSpec {
                simulation_id: id,
                dir,
                command: simulation.task.command.clone(),
            }],
            self.inner.runner_options(),
        );
        simulation.absorb_backend_status(EntityStatus::Commissioning);
        Ok(())
    }

    fn refresh_status(&self, simulation: &mut Simulation) -> Result<(), PlatformError> {
        let id = Inner::require_id(&simulation.id)?.to_owned();
        let dir = self.inner.directory(ItemKind::Simulation, &id)?;
        let status =
            layout::read_job_status(&dir).map_err(|e| platform_err("refresh_status", &id, e))?;
        simulation.absorb_backend_status(status.to_entity_status());
        Ok(())
    }

    /// Stage the per-job files: the rendered config and other transient
    /// assets as real files, the shared `Assets` directory as a link, and
    /// the run script when scripts are on.
    fn send_assets(&self, simulation: &mut Simulation) -> Result<(), PlatformError> {
        let id = Inner::require_id(&simulation.id)?.to_owned();
        let dir = self.inner.directory(ItemKind::Simulation, &id)?;
        simulation
            .task
            .gather_transient_assets()
            .map_err(|e| PlatformError::Permanent {
                operation: "send_assets".to_owned(),
                id: id.clone(),
                reason: e.to_string(),
            })?;
        for asset in simulation.task.transient_assets.iter() {
            let dest = dir.join(asset.key());
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent).map_err(|e| PlatformError::io("send_assets", &id, e))?;
            }
            let bytes = asset
                .bytes()
                .map_err(|e| PlatformError::io("send_assets", &id, e))?;
            fs::write(&dest, bytes).map_err(|e| PlatformError::io("send_assets", &id, e))?;
        }
        if let Some(experiment_dir) = dir.parent() {
            self.inner
                .stager
                .link_common_assets(experiment_dir, &dir)
                .map_err(|e| platform_err("send_assets", &id, e))?;
        }
        if self.inner.options.write_scripts {
            scripts::write_run_script(&dir, &simulation.task.command)
                .map_err(|e| platform_err("send_assets", &id, e))?;
        }
        metadata::write_simulation(&dir, simulation)
            .map_err(|e| platform_err("send_assets", &id, e))?;
        Ok(())
    }

    fn get_parent(&self, id: &str) -> Result<Option<RawItem>, PlatformError> {
        let dir = self.inner.directory(ItemKind::Simulation, id)?;
        let Some(parent) = dir.parent() else {
            return Ok(None);
        };
        Ok(Some(
            metadata::read_raw(&metadata::experiment_metadata_path(parent))
                .map_err(|e| platform_err("get_parent", id, e))?,
        ))
    }

    fn get_assets(&self, id: &str, files: &[String]) -> Result<FileBytes, PlatformError> {
        let dir = self.inner.directory(ItemKind::Simulation, id)?;
        let mut out = FileBytes::new();
        for (relative, path) in layout::match_output_files(&dir, files)
            .map_err(|e| platform_err("get_assets", id, e))?
        {
            let bytes = fs::read(&path).map_err(|e| PlatformError::io("get_assets", id, e))?;
            out.insert(relative, bytes);
        }
        Ok(out)
    }

    fn list_assets(&self, id: &str) -> Result<Vec<String>, PlatformError> {
        let dir = self.inner.directory(ItemKind::Simulation, id)?;
        layout::list_files(&dir).map_err(|e| platform_err("list_assets", id, e))
    }

    fn cancel(&self, simulation: &mut Simulation) -> Result<(), PlatformError> {
        simulation.cancel_requested = true;
        if let Some(id) = simulation.id.as_deref() {
            let dir = self.inner.directory(ItemKind::Simulation, id)?;
            cancel_job_dir(&dir).map_err(|e| platform_err("cancel", id, e))?;
        }
        Ok(())
    }

    fn to_entity(&self, raw: &RawItem) -> Result<Simulation, PlatformError> {
        serde_json::from_value(raw.clone()).map_err(|e| PlatformError::Permanent {
            operation: "to_entity".to_owned(),
            id: String::new(),
            reason: e.to_string(),
        })
    }
}

/// Work items have no on-disk representation; every operation refuses.
#[derive(Clone)]
pub(crate) struct FileWorkItemOps;

impl WorkItemOperations for FileWorkItemOps {
    fn get(&self, _id: &str) -> Result<RawItem, PlatformError> {
        Err(unsupported("get"))
    }

    fn platform_create(&self, _workitem: &mut WorkItem) -> Result<String, PlatformError> {
        Err(unsupported("platform_create"))
    }

    fn run_item(&self, _workitem: &mut WorkItem) -> Result<(), PlatformError> {
        Err(unsupported("run_item"))
    }

    fn refresh_status(&self, _workitem: &mut WorkItem) -> Result<(), PlatformError> {
        Err(unsupported("refresh_status"))
    }

    fn send_assets(&self, _workitem: &mut WorkItem) -> Result<(), PlatformError> {
        Err(unsupported("send_assets"))
    }

    fn get_assets(&self, _id: &str, _files: &[String]) -> Result<FileBytes, PlatformError> {
        Err(unsupported("get_assets"))
    }

    fn to_entity(&self, _raw: &RawItem) -> Result<WorkItem, PlatformError> {
        Err(unsupported("to_entity"))
    }
}

fn unsupported(operation: &'static str) -> PlatformError {
    PlatformError::Unsupported {
        operation,
        kind: ItemKind::WorkItem,
    }
}

impl FileAssetCollectionOps {
    fn manifest(&self, id: &str) -> Result<CollectionManifest, PlatformError> {
        let path = self.inner.layout.collection_manifest(id);
        if !path.is_file() {
            return Err(PlatformError::NotFound {
                kind: ItemKind::AssetCollection,
                id: id.to_owned(),
            });
        }
        metadata::read_json(&path).map_err(|e| platform_err("get", id, e))
    }
}

impl AssetCollectionOperations for FileAssetCollectionOps {
    fn get(&self, id: &str) -> Result<RawItem, PlatformError> {
        let manifest = self.manifest(id)?;
        serde_json::to_value(&manifest).map_err(|e| PlatformError::Permanent {
            operation: "get".to_owned(),
            id: id.to_owned(),
            reason: e.to_string(),
        })
    }

    fn platform_create(&self, collection: &mut AssetCollection) -> Result<String, PlatformError> {
        let fingerprint = collection
            .fingerprint()
            .map_err(|e| PlatformError::io("platform_create", "assets", e))?;
        // content-derived id: identical collections collapse to one manifest
        let joined: String = fingerprint.iter().cloned().collect();
        let id = format!("AC{}", &sha256_bytes(joined.as_bytes())[..16]);
        collection.id = Some(id.clone());

        let manifest_path = self.inner.layout.collection_manifest(&id);
        if manifest_path.is_file() {
            debug!(collection = id.as_str(), "Collection already stored");
            return Ok(id);
        }
        let mut entries = Vec::new();
        for asset in collection.assets.iter_mut() {
            let checksum = self
                .inner
                .stager
                .stage(asset)
                .map_err(|e| platform_err("platform_create", &id, e))?;
            entries.push(ManifestEntry {
                key: asset.key(),
                checksum,
            });
        }
        let manifest = CollectionManifest {
            id: id.clone(),
            tags: collection.tags.clone(),
            assets: entries,
        };
        let collections_dir = self.inner.layout.collections_dir();
        fs::create_dir_all(&collections_dir)
            .map_err(|e| PlatformError::io("platform_create", &id, e))?;
        metadata::write_json(&manifest_path, &manifest)
            .map_err(|e| platform_err("platform_create", &id, e))?;
        Ok(id)
    }

    fn get_assets(&self, id: &str, files: &[String]) -> Result<FileBytes, PlatformError> {
        let manifest = self.manifest(id)?;
        let mut out = FileBytes::new();
        for entry in &manifest.assets {
            if !files.iter().any(|wanted| *wanted == entry.key) {
                continue;
            }
            let stored = self.inner.layout.store_path(&entry.checksum);
            let bytes = fs::read(&stored).map_err(|e| PlatformError::io("get_assets", id, e))?;
            out.insert(entry.key.clone(), bytes);
        }
        Ok(out)
    }

    fn list_assets(&self, id: &str) -> Result<Vec<String>, PlatformError> {
        Ok(self
            .manifest(id)?
            .assets
            .into_iter()
            .map(|entry| entry.key)
            .collect())
    }

    fn to_entity(&self, raw: &RawItem) -> Result<AssetCollection, PlatformError> {
        let manifest: CollectionManifest =
            serde_json::from_value(raw.clone()).map_err(|e| PlatformError::Permanent {
                operation: "to_entity".to_owned(),
                id: String::new(),
                reason: e.to_string(),
            })?;
        let mut collection = AssetCollection::new();
        collection.id = Some(manifest.id);
        collection.tags = manifest.tags;
        for entry in manifest.assets {
            let (relative_path, filename) = match entry.key.rsplit_once('/') {
                Some((dir, name)) => (dir.to_owned(), name.to_owned()),
                None => (String::new(), entry.key.clone()),
            };
            let mut asset = Asset::from_file(self.inner.layout.store_path(&entry.checksum))
                .with_relative_path(relative_path);
            asset.filename = filename;
            collection.put_asset(asset);
        }
        Ok(collection)
    }
}

/// Archive every simulation of an experiment into `simulations.zip`.
pub fn archive_experiment_by_id(
    layout: &FileLayout,
    experiment_id: &str,
) -> Result<PathBuf, PlatformError> {
    let dir = layout
        .find_directory(experiment_id)
        .map_err(|e| platform_err("archive", experiment_id, e))?;
    archive::archive_experiment(&dir).map_err(|e| platform_err("archive", experiment_id, e))
}
