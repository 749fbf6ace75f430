//! In-memory scripted backend.
//!
//! Jobs "complete" after a configurable number of refresh ticks, failures
//! can be injected by tag, and a transient-error budget exercises the infra
//! retry path. Canceled jobs are deliberately reported as `FAILED`, the way
//! some real backends do, so the core's cancel-flag translation is always
//! exercised.

use crate::assets::AssetCollection;
use crate::config::{ConfigField, FieldType, FieldValue};
use crate::entities::{Experiment, ItemKind, Simulation, Suite, WorkItem};
use crate::error::{ConfigError, PlatformError};
use crate::ids;
use crate::ops::{
    AssetCollectionOperations, ExperimentOperations, FileBytes, PlatformBackend, RawItem,
    SimulationOperations, SuiteOperations, WorkItemOperations,
};
use crate::registry::PlatformPlugin;
use crate::status::EntityStatus;
use crate::tags::{TagValue, Tags};
use crate::task::Task;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

pub const PLUGIN_NAME: &str = "mock";

const SUPPORTED: &[ItemKind] = &[
    ItemKind::Suite,
    ItemKind::Experiment,
    ItemKind::Simulation,
    ItemKind::WorkItem,
    ItemKind::AssetCollection,
];

/// Scripted behavior of the mock backend.
#[derive(Clone, Debug)]
pub struct MockBehavior {
    /// Refresh ticks until a running job turns terminal.
    pub ticks_to_complete: u32,
    /// Jobs carrying this tag finish `FAILED` instead of `SUCCEEDED`.
    pub fail_tag: Option<(String, TagValue)>,
    /// Output files every finished job exposes through `get_assets`.
    pub output_files: BTreeMap<String, Vec<u8>>,
    /// Job restarts the backend performs on its own.
    pub num_retries: u32,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            ticks_to_complete: 1,
            fail_tag: None,
            output_files: BTreeMap::new(),
            num_retries: 0,
        }
    }
}

#[derive(Clone, Debug)]
struct StoredSim {
    id: String,
    experiment_id: Option<String>,
    tags: Tags,
    status: EntityStatus,
    ticks_seen: u32,
    canceled: bool,
}

#[derive(Clone, Debug)]
struct StoredExperiment {
    id: String,
    name: String,
    suite_id: Option<String>,
    frozen_at_create: bool,
}

#[derive(Clone, Debug)]
struct StoredSuite {
    id: String,
    name: String,
}

#[derive(Clone, Debug)]
struct StoredWorkItem {
    id: String,
    name: String,
    status: EntityStatus,
    ticks_seen: u32,
    canceled: bool,
}

struct MockState {
    behavior: MockBehavior,
    suites: Mutex<BTreeMap<String, StoredSuite>>,
    experiments: Mutex<BTreeMap<String, StoredExperiment>>,
    sims: Mutex<BTreeMap<String, StoredSim>>,
    workitems: Mutex<BTreeMap<String, StoredWorkItem>>,
    collections: Mutex<BTreeMap<String, AssetCollection>>,
    /// content fingerprints the backend already holds
    held: Mutex<BTreeSet<BTreeSet<String>>>,
    /// fingerprint -> physical upload count, for dedup assertions
    uploads: Mutex<BTreeMap<BTreeSet<String>, u32>>,
    /// sizes handed to `batch_create`, in call order
    batch_sizes: Mutex<Vec<usize>>,
    transient_budget: AtomicU32,
}

impl MockState {
    fn maybe_inject_transient(&self, operation: &str) -> Result<(), PlatformError> {
        let budget = self.transient_budget.load(Ordering::SeqCst);
        if budget > 0
            && self
                .transient_budget
                .compare_exchange(budget, budget - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            return Err(PlatformError::transient(
                operation,
                io::Error::new(io::ErrorKind::ConnectionReset, "injected transient failure"),
            ));
        }
        Ok(())
    }

    fn generate_id(&self, kind: ItemKind) -> Result<String, PlatformError> {
        ids::generate(kind).map_err(|error| PlatformError::Permanent {
            operation: "generate_id".to_owned(),
            id: kind.item_name().to_owned(),
            reason: error.to_string(),
        })
    }

    /// Count a physical upload unless the backend already holds the content.
    fn record_upload(&self, fingerprint: BTreeSet<String>) {
        if self.held.lock().insert(fingerprint.clone()) {
            *self.uploads.lock().entry(fingerprint).or_insert(0) += 1;
        }
    }

    /// Record one logical staging of a collection; only the first staging of
    /// a given fingerprint counts as a physical upload.
    fn stage_assets(&self, collection: &mut AssetCollection) -> Result<(), PlatformError> {
        if collection.is_empty() {
            return Ok(());
        }
        let fingerprint = collection
            .fingerprint()
            .map_err(|e| PlatformError::io("send_assets", "assets", e))?;
        self.record_upload(fingerprint);
        Ok(())
    }

    /// Advance one stored job by a tick and report its visible status.
    /// Canceled jobs are reported as `FAILED` on purpose.
    fn tick_sim(&self, id: &str) -> Result<EntityStatus, PlatformError> {
        let mut sims = self.sims.lock();
        let stored = sims.get_mut(id).ok_or_else(|| PlatformError::NotFound {
            kind: ItemKind::Simulation,
            id: id.to_owned(),
        })?;
        if stored.canceled {
            stored.status = EntityStatus::Failed;
            return Ok(EntityStatus::Failed);
        }
        if stored.status == EntityStatus::Running {
            stored.ticks_seen += 1;
            if stored.ticks_seen >= self.behavior.ticks_to_complete {
                let failed = self.behavior.fail_tag.as_ref().is_some_and(|(key, value)| {
                    stored.tags.get(key).is_some_and(|tag| tag.matches(value))
                });
                stored.status = if failed {
                    EntityStatus::Failed
                } else {
                    EntityStatus::Succeeded
                };
            }
        }
        Ok(stored.status)
    }

    fn refresh_experiment(&self, experiment: &mut Experiment) -> Result<(), PlatformError> {
        let sim_ids: Vec<String> = experiment
            .simulations()
            .iter()
            .filter_map(|s| s.id.clone())
            .collect();
        let mut reported = BTreeMap::new();
        for id in sim_ids {
            reported.insert(id.clone(), self.tick_sim(&id)?);
        }
        for simulation in experiment.simulations_mut() {
            if let Some(id) = simulation.id.as_deref() {
                if let Some(status) = reported.get(id) {
                    simulation.absorb_backend_status(*status);
                }
            }
        }
        Ok(())
    }

    fn raw_sim(stored: &StoredSim) -> RawItem {
        json!({
            "id": stored.id,
            "experiment_id": stored.experiment_id,
            "tags": stored.tags,
            "status": stored.status,
        })
    }

    fn raw_experiment(stored: &StoredExperiment) -> RawItem {
        json!({
            "id": stored.id,
            "name": stored.name,
            "suite_id": stored.suite_id,
        })
    }
}

macro_rules! ops_struct {
    ($name:ident) => {
        #[derive(Clone)]
        struct $name {
            state: Arc<MockState>,
        }
    };
}

ops_struct!(MockSuiteOps);
ops_struct!(MockExperimentOps);
ops_struct!(MockSimulationOps);
ops_struct!(MockWorkItemOps);
ops_struct!(MockAssetCollectionOps);

impl SuiteOperations for MockSuiteOps {
    fn get(&self, id: &str) -> Result<RawItem, PlatformError> {
        let suites = self.state.suites.lock();
        let stored = suites.get(id).ok_or_else(|| PlatformError::NotFound {
            kind: ItemKind::Suite,
            id: id.to_owned(),
        })?;
        Ok(json!({ "id": stored.id, "name": stored.name }))
    }

    fn platform_create(&self, suite: &mut Suite) -> Result<String, PlatformError> {
        let id = self.state.generate_id(ItemKind::Suite)?;
        self.state.suites.lock().insert(
            id.clone(),
            StoredSuite {
                id: id.clone(),
                name: suite.name.clone(),
            },
        );
        suite.id = Some(id.clone());
        for experiment in suite.experiments.iter_mut() {
            experiment.suite_id = Some(id.clone());
        }
        Ok(id)
    }

    fn run_item(&self, suite: &mut Suite) -> Result<(), PlatformError> {
        for experiment in suite.experiments.iter_mut() {
            self.state.run_experiment(experiment)?;
        }
        Ok(())
    }

    fn refresh_status(&self, suite: &mut Suite) -> Result<(), PlatformError> {
        self.state.maybe_inject_transient("refresh_status")?;
        for experiment in suite.experiments.iter_mut() {
            self.state.refresh_experiment(experiment)?;
        }
        Ok(())
    }

    fn get_children(&self, id: &str) -> Result<Vec<RawItem>, PlatformError> {
        let experiments = self.state.experiments.lock();
        Ok(experiments
            .values()
            .filter(|stored| stored.suite_id.as_deref() == Some(id))
            .map(MockState::raw_experiment)
            .collect())
    }

    fn cancel(&self, suite: &mut Suite) -> Result<(), PlatformError> {
        for experiment in suite.experiments.iter_mut() {
            self.state.cancel_experiment(experiment)?;
        }
        Ok(())
    }

    fn to_entity(&self, raw: &RawItem) -> Result<Suite, PlatformError> {
        let mut suite = Suite::new(raw["name"].as_str().unwrap_or_default());
        suite.id = raw["id"].as_str().map(str::to_owned);
        Ok(suite)
    }
}

impl MockState {
    fn run_experiment(&self, experiment: &mut Experiment) -> Result<(), PlatformError> {
        let mut sims = self.sims.lock();
        for simulation in experiment.simulations_mut() {
            if let Some(id) = simulation.id.as_deref() {
                if let Some(stored) = sims.get_mut(id) {
                    if stored.status == EntityStatus::Created {
                        stored.status = EntityStatus::Running;
                    }
                }
                simulation.absorb_backend_status(EntityStatus::Running);
            }
        }
        Ok(())
    }

    fn cancel_experiment(&self, experiment: &mut Experiment) -> Result<(), PlatformError> {
        let mut sims = self.sims.lock();
        for simulation in experiment.simulations_mut() {
            simulation.cancel_requested = true;
            if let Some(id) = simulation.id.as_deref() {
                if let Some(stored) = sims.get_mut(id) {
                    stored.canceled = true;
                }
            }
        }
        Ok(())
    }
}

impl ExperimentOperations for MockExperimentOps {
    fn get(&self, id: &str) -> Result<RawItem, PlatformError> {
        let experiments = self.state.experiments.lock();
        let stored = experiments.get(id).ok_or_else(|| PlatformError::NotFound {
            kind: ItemKind::Experiment,
            id: id.to_owned(),
        })?;
        Ok(MockState::raw_experiment(stored))
    }

    fn platform_create(&self, experiment: &mut Experiment) -> Result<String, PlatformError> {
        let id = self.state.generate_id(ItemKind::Experiment)?;
        self.state.experiments.lock().insert(
            id.clone(),
            StoredExperiment {
                id: id.clone(),
                name: experiment.name.clone(),
                suite_id: experiment.suite_id.clone(),
                frozen_at_create: experiment.is_frozen(),
            },
        );
        experiment.id = Some(id.clone());
        Ok(id)
    }

    fn run_item(&self, experiment: &mut Experiment) -> Result<(), PlatformError> {
        self.state.run_experiment(experiment)
    }

    fn refresh_status(&self, experiment: &mut Experiment) -> Result<(), PlatformError> {
        self.state.maybe_inject_transient("refresh_status")?;
        self.state.refresh_experiment(experiment)
    }

    fn send_assets(&self, experiment: &mut Experiment) -> Result<(), PlatformError> {
        self.state.maybe_inject_transient("send_assets")?;
        self.state.stage_assets(&mut experiment.assets)
    }

    fn get_parent(&self, id: &str) -> Result<Option<RawItem>, PlatformError> {
        let suite_id = {
            let experiments = self.state.experiments.lock();
            experiments.get(id).and_then(|stored| stored.suite_id.clone())
        };
        match suite_id {
            Some(suite_id) => {
                let suites = self.state.suites.lock();
                Ok(suites
                    .get(&suite_id)
                    .map(|stored| json!({ "id": stored.id, "name": stored.name })))
            }
            None => Ok(None),
        }
    }

    fn get_children(&self, id: &str) -> Result<Vec<RawItem>, PlatformError> {
        let sims = self.state.sims.lock();
        Ok(sims
            .values()
            .filter(|stored| stored.experiment_id.as_deref() == Some(id))
            .map(MockState::raw_sim)
            .collect())
    }

    fn cancel(&self, experiment: &mut Experiment) -> Result<(), PlatformError> {
        self.state.cancel_experiment(experiment)
    }

    fn to_entity(&self, raw: &RawItem) -> Result<Experiment, PlatformError> {
        let mut experiment = Experiment::new(raw["name"].as_str().unwrap_or_default());
        experiment.id = raw["id"].as_str().map(str::to_owned);
        experiment.suite_id = raw["suite_id"].as_str().map(str::to_owned);
        Ok(experiment)
    }
}

impl SimulationOperations for MockSimulationOps {
    fn get(&self, id: &str) -> Result<RawItem, PlatformError> {
        let sims = self.state.sims.lock();
        let stored = sims.get(id).ok_or_else(|| PlatformError::NotFound {
            kind: ItemKind::Simulation,
            id: id.to_owned(),
        })?;
        Ok(MockState::raw_sim(stored))
    }

    fn platform_create(&self, simulation: &mut Simulation) -> Result<String, PlatformError> {
        self.state.maybe_inject_transient("platform_create")?;
        let id = self.state.generate_id(ItemKind::Simulation)?;
        self.state.sims.lock().insert(
            id.clone(),
            StoredSim {
                id: id.clone(),
                experiment_id: simulation.experiment_id.clone(),
                tags: simulation.tags.clone(),
                status: EntityStatus::Created,
                ticks_seen: 0,
                canceled: false,
            },
        );
        simulation.id = Some(id.clone());
        simulation.absorb_backend_status(EntityStatus::Created);
        Ok(id)
    }

    fn batch_create(&self, simulations: &mut [Simulation]) -> Result<Vec<String>, PlatformError> {
        self.state.batch_sizes.lock().push(simulations.len());
        let mut ids = Vec::with_capacity(simulations.len());
        for simulation in simulations.iter_mut() {
            let id = match &simulation.id {
                Some(id) => id.clone(),
                None => self.platform_create(simulation)?,
            };
            ids.push(id);
        }
        Ok(ids)
    }

    fn run_item(&self, simulation: &mut Simulation) -> Result<(), PlatformError> {
        if let Some(id) = simulation.id.as_deref() {
            let mut sims = self.state.sims.lock();
            if let Some(stored) = sims.get_mut(id) {
                if stored.status == EntityStatus::Created {
                    stored.status = EntityStatus::Running;
                }
            }
        }
        simulation.absorb_backend_status(EntityStatus::Running);
        Ok(())
    }

    fn refresh_status(&self, simulation: &mut Simulation) -> Result<(), PlatformError> {
        self.state.maybe_inject_transient("refresh_status")?;
        let id = simulation
            .id
            .clone()
            .ok_or(crate::error::ValidationError::MissingId)?;
        let reported = self.state.tick_sim(&id)?;
        simulation.absorb_backend_status(reported);
        Ok(())
    }

    fn send_assets(&self, simulation: &mut Simulation) -> Result<(), PlatformError> {
        simulation
            .task
            .gather_transient_assets()
            .map_err(|e| PlatformError::Permanent {
                operation: "send_assets".to_owned(),
                id: simulation.id.clone().unwrap_or_default(),
                reason: e.to_string(),
            })?;
        self.state.stage_assets(&mut simulation.task.transient_assets)
    }

    fn get_parent(&self, id: &str) -> Result<Option<RawItem>, PlatformError> {
        let experiment_id = {
            let sims = self.state.sims.lock();
            sims.get(id).and_then(|stored| stored.experiment_id.clone())
        };
        match experiment_id {
            Some(experiment_id) => {
                let experiments = self.state.experiments.lock();
                Ok(experiments.get(&experiment_id).map(MockState::raw_experiment))
            }
            None => Ok(None),
        }
    }

    fn get_assets(&self, id: &str, files: &[String]) -> Result<FileBytes, PlatformError> {
        let sims = self.state.sims.lock();
        let stored = sims.get(id).ok_or_else(|| PlatformError::NotFound {
            kind: ItemKind::Simulation,
            id: id.to_owned(),
        })?;
        if !stored.status.is_terminal() {
            return Ok(FileBytes::new());
        }
        Ok(self
            .state
            .behavior
            .output_files
            .iter()
            .filter(|(path, _)| files.iter().any(|wanted| wanted == *path))
            .map(|(path, bytes)| (path.clone(), bytes.clone()))
            .collect())
    }

    fn list_assets(&self, _id: &str) -> Result<Vec<String>, PlatformError> {
        Ok(self.state.behavior.output_files.keys().cloned().collect())
    }

    fn cancel(&self, simulation: &mut Simulation) -> Result<(), PlatformError> {
        simulation.cancel_requested = true;
        if let Some(id) = simulation.id.as_deref() {
            let mut sims = self.state.sims.lock();
            if let Some(stored) = sims.get_mut(id) {
                stored.canceled = true;
            }
        }
        Ok(())
    }

    fn to_entity(&self, raw: &RawItem) -> Result<Simulation, PlatformError> {
        let mut simulation = Simulation::new(Task::default());
        simulation.id = raw["id"].as_str().map(str::to_owned);
        simulation.experiment_id = raw["experiment_id"].as_str().map(str::to_owned);
        if let Ok(tags) = serde_json::from_value::<Tags>(raw["tags"].clone()) {
            simulation.tags = tags;
        }
        if let Ok(status) = serde_json::from_value::<EntityStatus>(raw["status"].clone()) {
            simulation.status = status;
        }
        Ok(simulation)
    }
}

impl WorkItemOperations for MockWorkItemOps {
    fn get(&self, id: &str) -> Result<RawItem, PlatformError> {
        let workitems = self.state.workitems.lock();
        let stored = workitems.get(id).ok_or_else(|| PlatformError::NotFound {
            kind: ItemKind::WorkItem,
            id: id.to_owned(),
        })?;
        Ok(json!({ "id": stored.id, "name": stored.name, "status": stored.status }))
    }

    fn platform_create(&self, workitem: &mut WorkItem) -> Result<String, PlatformError> {
        let id = self.state.generate_id(ItemKind::WorkItem)?;
        self.state.workitems.lock().insert(
            id.clone(),
            StoredWorkItem {
                id: id.clone(),
                name: workitem.name.clone(),
                status: EntityStatus::Created,
                ticks_seen: 0,
                canceled: false,
            },
        );
        workitem.id = Some(id.clone());
        workitem.absorb_backend_status(EntityStatus::Created);
        Ok(id)
    }

    fn run_item(&self, workitem: &mut WorkItem) -> Result<(), PlatformError> {
        if let Some(id) = workitem.id.as_deref() {
            let mut workitems = self.state.workitems.lock();
            if let Some(stored) = workitems.get_mut(id) {
                if stored.status == EntityStatus::Created {
                    stored.status = EntityStatus::Running;
                }
            }
        }
        workitem.absorb_backend_status(EntityStatus::Running);
        Ok(())
    }

    fn refresh_status(&self, workitem: &mut WorkItem) -> Result<(), PlatformError> {
        self.state.maybe_inject_transient("refresh_status")?;
        let id = workitem
            .id
            .clone()
            .ok_or(crate::error::ValidationError::MissingId)?;
        let mut workitems = self.state.workitems.lock();
        let stored = workitems.get_mut(&id).ok_or_else(|| PlatformError::NotFound {
            kind: ItemKind::WorkItem,
            id: id.clone(),
        })?;
        if stored.canceled {
            stored.status = EntityStatus::Failed;
        } else if stored.status == EntityStatus::Running {
            stored.ticks_seen += 1;
            if stored.ticks_seen >= self.state.behavior.ticks_to_complete {
                stored.status = EntityStatus::Succeeded;
            }
        }
        let reported = stored.status;
        drop(workitems);
        workitem.absorb_backend_status(reported);
        Ok(())
    }

    fn send_assets(&self, workitem: &mut WorkItem) -> Result<(), PlatformError> {
        self.state.stage_assets(&mut workitem.inputs)
    }

    fn get_assets(&self, _id: &str, files: &[String]) -> Result<FileBytes, PlatformError> {
        Ok(self
            .state
            .behavior
            .output_files
            .iter()
            .filter(|(path, _)| files.iter().any(|wanted| wanted == *path))
            .map(|(path, bytes)| (path.clone(), bytes.clone()))
            .collect())
    }

    fn cancel(&self, workitem: &mut WorkItem) -> Result<(), PlatformError> {
        workitem.cancel_requested = true;
        if let Some(id) = workitem.id.as_deref() {
            let mut workitems = self.state.workitems.lock();
            if let Some(stored) = workitems.get_mut(id) {
                stored.canceled = true;
            }
        }
        Ok(())
    }

    fn to_entity(&self, raw: &RawItem) -> Result<WorkItem, PlatformError> {
        let mut workitem = WorkItem::new(
            raw["name"].as_str().unwrap_or_default(),
            crate::task::CommandLine::default(),
        );
        workitem.id = raw["id"].as_str().map(str::to_owned);
        Ok(workitem)
    }
}

impl AssetCollectionOperations for MockAssetCollectionOps {
    fn get(&self, id: &str) -> Result<RawItem, PlatformError> {
        let collections = self.state.collections.lock();
        let collection = collections.get(id).ok_or_else(|| PlatformError::NotFound {
            kind: ItemKind::AssetCollection,
            id: id.to_owned(),
        })?;
        Ok(json!({ "id": id, "files": collection.len() }))
    }

    fn platform_create(&self, collection: &mut AssetCollection) -> Result<String, PlatformError> {
        let fingerprint = collection
            .fingerprint()
            .map_err(|e| PlatformError::io("platform_create", "assets", e))?;
        // dedup by content: identical fingerprints share one id
        {
            let collections = self.state.collections.lock();
            for (existing_id, existing) in collections.iter() {
                let mut existing = existing.clone();
                if existing.fingerprint().ok() == Some(fingerprint.clone()) {
                    collection.id = Some(existing_id.clone());
                    return Ok(existing_id.clone());
                }
            }
        }
        let id = self.state.generate_id(ItemKind::AssetCollection)?;
        self.state
            .collections
            .lock()
            .insert(id.clone(), collection.clone());
        self.state.record_upload(fingerprint);
        collection.id = Some(id.clone());
        Ok(id)
    }

    fn get_assets(&self, id: &str, files: &[String]) -> Result<FileBytes, PlatformError> {
        let collections = self.state.collections.lock();
        let collection = collections.get(id).ok_or_else(|| PlatformError::NotFound {
            kind: ItemKind::AssetCollection,
            id: id.to_owned(),
        })?;
        let mut out = FileBytes::new();
        for asset in collection.iter() {
            if files.iter().any(|wanted| *wanted == asset.key()) {
                let bytes = asset
                    .bytes()
                    .map_err(|e| PlatformError::io("get_assets", id, e))?;
                out.insert(asset.key(), bytes);
            }
        }
        Ok(out)
    }

    fn list_assets(&self, id: &str) -> Result<Vec<String>, PlatformError> {
        let collections = self.state.collections.lock();
        let collection = collections.get(id).ok_or_else(|| PlatformError::NotFound {
            kind: ItemKind::AssetCollection,
            id: id.to_owned(),
        })?;
        Ok(collection.iter().map(|asset| asset.key()).collect())
    }

    fn to_entity(&self, raw: &RawItem) -> Result<AssetCollection, PlatformError> {
        let id = raw["id"].as_str().unwrap_or_default();
        let collections = self.state.collections.lock();
        collections
            .get(id)
            .cloned()
            .ok_or_else(|| PlatformError::NotFound {
                kind: ItemKind::AssetCollection,
                id: id.to_owned(),
            })
    }
}

/// The assembled mock backend.
pub struct MockBackend {
    state: Arc<MockState>,
    suite_ops: MockSuiteOps,
    experiment_ops: MockExperimentOps,
    simulation_ops: MockSimulationOps,
    workitem_ops: MockWorkItemOps,
    asset_ops: MockAssetCollectionOps,
}

impl MockBackend {
    pub fn new(behavior: MockBehavior) -> Arc<Self> {
        let state = Arc::new(MockState {
            behavior,
            suites: Mutex::new(BTreeMap::new()),
            experiments: Mutex::new(BTreeMap::new()),
            sims: Mutex::new(BTreeMap::new()),
            workitems: Mutex::new(BTreeMap::new()),
            collections: Mutex::new(BTreeMap::new()),
            held: Mutex::new(BTreeSet::new()),
            uploads: Mutex::new(BTreeMap::new()),
            batch_sizes: Mutex::new(Vec::new()),
            transient_budget: AtomicU32::new(0),
        });
        Arc::new(Self {
            suite_ops: MockSuiteOps { state: state.clone() },
            experiment_ops: MockExperimentOps { state: state.clone() },
            simulation_ops: MockSimulationOps { state: state.clone() },
            workitem_ops: MockWorkItemOps { state: state.clone() },
            asset_ops: MockAssetCollectionOps { state: state.clone() },
            state,
        })
    }

    /// Arrange for the next `n` refresh/create calls to fail transiently.
    pub fn inject_transient_failures(&self, n: u32) {
        self.state.transient_budget.store(n, Ordering::SeqCst);
    }

    /// Physical uploads recorded for a content fingerprint.
    pub fn upload_count(&self, fingerprint: &BTreeSet<String>) -> u32 {
        *self.state.uploads.lock().get(fingerprint).unwrap_or(&0)
    }

    pub fn stored_status(&self, id: &str) -> Option<EntityStatus> {
        self.state.sims.lock().get(id).map(|stored| stored.status)
    }

    /// Simulations the backend has created, dedup included.
    pub fn simulation_count(&self) -> usize {
        self.state.sims.lock().len()
    }

    /// Batch sizes handed to `batch_create`, in call order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.state.batch_sizes.lock().clone()
    }

    /// Whether the experiment was already frozen when the backend saw it.
    pub fn experiment_frozen_at_create(&self, id: &str) -> Option<bool> {
        self.state
            .experiments
            .lock()
            .get(id)
            .map(|stored| stored.frozen_at_create)
    }
}

impl PlatformBackend for MockBackend {
    fn plugin_name(&self) -> &'static str {
        PLUGIN_NAME
    }

    fn suites(&self) -> &dyn SuiteOperations {
        &self.suite_ops
    }

    fn experiments(&self) -> &dyn ExperimentOperations {
        &self.experiment_ops
    }

    fn simulations(&self) -> &dyn SimulationOperations {
        &self.simulation_ops
    }

    fn workitems(&self) -> &dyn WorkItemOperations {
        &self.workitem_ops
    }

    fn asset_collections(&self) -> &dyn AssetCollectionOperations {
        &self.asset_ops
    }

    fn supported_kinds(&self) -> &[ItemKind] {
        SUPPORTED
    }

    fn num_retries(&self) -> u32 {
        self.state.behavior.num_retries
    }
}

fn schema() -> Vec<ConfigField> {
    vec![
        ConfigField::new(
            "ticks_to_complete",
            FieldType::Integer,
            "Refresh ticks until a job turns terminal",
        )
        .with_default("1"),
        ConfigField::new(
            "num_retries",
            FieldType::Integer,
            "Job restarts the backend performs on its own",
        )
        .with_default("0"),
    ]
}

fn factory(
    fields: &BTreeMap<String, FieldValue>,
) -> Result<Arc<dyn PlatformBackend>, ConfigError> {
    let behavior = MockBehavior {
        ticks_to_complete: fields
            .get("ticks_to_complete")
            .and_then(FieldValue::as_i64)
            .unwrap_or(1) as u32,
        num_retries: fields
            .get("num_retries")
            .and_then(FieldValue::as_i64)
            .unwrap_or(0) as u32,
        ..MockBehavior::default()
    };
    Ok(MockBackend::new(behavior))
}

pub fn plugin() -> PlatformPlugin {
    PlatformPlugin {
        name: PLUGIN_NAME,
        description: "In-memory scripted backend for tests",
        schema,
        factory,
    }
}
