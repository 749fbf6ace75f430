use crate::assets::{Asset, AssetCollection};
use crate::builders::BuilderSnapshot;
use crate::error::ValidationError;
use crate::status::{reduce_status, EntityStatus};
use crate::tags::{TagValue, Tags};
use crate::task::Task;
use crate::template::TemplatedSimulations;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// The entity kinds a backend can operate on.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ItemKind {
    Suite,
    Experiment,
    Simulation,
    WorkItem,
    AssetCollection,
}

impl ItemKind {
    /// Name used by the sequence id generator's format template.
    pub fn item_name(&self) -> &'static str {
        match self {
            Self::Suite => "Suite",
            Self::Experiment => "Experiment",
            Self::Simulation => "Simulation",
            Self::WorkItem => "WorkItem",
            Self::AssetCollection => "AssetCollection",
        }
    }
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.item_name())
    }
}

/// One concrete job produced by template expansion.
///
/// Ids are assigned only when the backend creates the simulation, so a
/// template can be enumerated any number of times beforehand.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct Simulation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub tags: Tags,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment_id: Option<String>,
    pub task: Task,
    #[serde(default)]
    pub status: EntityStatus,
    /// Opaque handle the backend uses to re-find the job (queue id, path).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_handle: Option<String>,
    #[serde(default)]
    pub cancel_requested: bool,
}

impl Simulation {
    pub fn new(task: Task) -> Self {
        Self {
            id: None,
            name: None,
            tags: Tags::new(),
            experiment_id: None,
            task,
            status: EntityStatus::Unstarted,
            platform_handle: None,
            cancel_requested: false,
        }
    }

    pub fn set_tag(&mut self, key: impl Into<String>, value: impl Into<TagValue>) {
        self.tags.insert(key.into(), value.into());
    }

    /// Apply a status reported by the backend, enforcing monotonicity and
    /// translating `FAILED` into `CANCELED` when we asked for the cancel
    /// ourselves (some backends do not distinguish the two).
    pub fn absorb_backend_status(&mut self, reported: EntityStatus) {
        let translated = if self.cancel_requested && reported == EntityStatus::Failed {
            EntityStatus::Canceled
        } else {
            reported
        };
        if self.status.is_terminal() {
            if translated != self.status {
                debug!(
                    simulation = self.id.as_deref().unwrap_or("?"),
                    current = %self.status,
                    reported = %translated,
                    "Ignoring status change after terminal state"
                );
            }
            return;
        }
        if translated.rank() < self.status.rank() {
            debug!(
                simulation = self.id.as_deref().unwrap_or("?"),
                current = %self.status,
                reported = %translated,
                "Refusing status regression"
            );
            return;
        }
        self.status = translated;
    }
}

/// Where an experiment's simulations come from: a lazy template that expands
/// on submission, or the realized list once jobs exist on a backend.
#[derive(Clone, Debug, Default)]
pub enum SimulationSource {
    #[default]
    Empty,
    Template(TemplatedSimulations),
    Realized(Vec<Simulation>),
}

/// A group of simulations sharing a task template and common assets.
///
/// Experiments freeze when their first simulation reaches a backend; tags,
/// command and assets are immutable from then on.
#[derive(Clone, Debug, Default)]
pub struct Experiment {
    pub id: Option<String>,
    pub name: String,
    pub tags: Tags,
    pub suite_id: Option<String>,
    /// Common assets shared by every simulation in the experiment.
    pub assets: AssetCollection,
    pub simulations: SimulationSource,
    frozen: bool,
}

impl Experiment {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn from_template(name: impl Into<String>, template: TemplatedSimulations) -> Self {
        let mut experiment = Self::new(name);
        experiment.simulations = SimulationSource::Template(template);
        experiment
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Seal the experiment. Called by the platform facade right before the
    /// first simulation is created; idempotent.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn set_tag(
        &mut self,
        key: impl Into<String>,
        value: impl Into<TagValue>,
    ) -> Result<(), ValidationError> {
        self.ensure_mutable()?;
        self.tags.insert(key.into(), value.into());
        Ok(())
    }

    pub fn add_common_asset(&mut self, asset: Asset) -> Result<(), ValidationError> {
        self.ensure_mutable()?;
        self.assets.add_asset(asset)
    }

    fn ensure_mutable(&self) -> Result<(), ValidationError> {
        if self.frozen {
            Err(ValidationError::Frozen(self.name.clone()))
        } else {
            Ok(())
        }
    }

    /// Realized simulations, empty while the experiment is still a template.
    pub fn simulations(&self) -> &[Simulation] {
        match &self.simulations {
            SimulationSource::Realized(simulations) => simulations,
            _ => &[],
        }
    }

    pub fn simulations_mut(&mut self) -> &mut [Simulation] {
        match &mut self.simulations {
            SimulationSource::Realized(simulations) => simulations,
            _ => &mut [],
        }
    }

    pub fn add_simulation(&mut self, mut simulation: Simulation) {
        simulation.experiment_id = self.id.clone();
        match &mut self.simulations {
            SimulationSource::Realized(simulations) => simulations.push(simulation),
            other => *other = SimulationSource::Realized(vec![simulation]),
        }
    }

    /// Parent status as a pure function of the children's statuses.
    pub fn status(&self) -> EntityStatus {
        reduce_status(self.simulations().iter().map(|s| s.status))
    }

    pub fn snapshot(&self) -> ExperimentSnapshot {
        let sweep_definitions = match &self.simulations {
            SimulationSource::Template(template) => template.builder_snapshots(),
            _ => Vec::new(),
        };
        ExperimentSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            tags: self.tags.clone(),
            suite_id: self.suite_id.clone(),
            assets: self.assets.clone(),
            simulation_ids: self
                .simulations()
                .iter()
                .filter_map(|s| s.id.clone())
                .collect(),
            status: self.status(),
            sweep_definitions,
        }
    }
}

/// Serializable experiment state, persisted as `metadata.json` by file-like
/// backends. Sweep callbacks cannot cross a serialization boundary; the
/// snapshot keeps the declared axis values instead.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct ExperimentSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub tags: Tags,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suite_id: Option<String>,
    #[serde(default)]
    pub assets: AssetCollection,
    #[serde(default)]
    pub simulation_ids: Vec<String>,
    #[serde(default)]
    pub status: EntityStatus,
    #[serde(default)]
    pub sweep_definitions: Vec<BuilderSnapshot>,
}

/// Top-level grouping of experiments.
#[derive(Clone, Debug, Default)]
pub struct Suite {
    pub id: Option<String>,
    pub name: String,
    pub tags: Tags,
    pub experiments: Vec<Experiment>,
}

impl Suite {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn add_experiment(&mut self, mut experiment: Experiment) {
        experiment.suite_id = self.id.clone();
        self.experiments.push(experiment);
    }

    pub fn status(&self) -> EntityStatus {
        reduce_status(self.experiments.iter().map(|e| e.status()))
    }

    pub fn snapshot(&self) -> SuiteSnapshot {
        SuiteSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            tags: self.tags.clone(),
            experiment_ids: self
                .experiments
                .iter()
                .filter_map(|e| e.id.clone())
                .collect(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct SuiteSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub tags: Tags,
    #[serde(default)]
    pub experiment_ids: Vec<String>,
}

/// A one-shot, top-level job with no children, typically server-side
/// post-processing over other entities' outputs.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct WorkItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub tags: Tags,
    pub command: crate::task::CommandLine,
    #[serde(default)]
    pub inputs: AssetCollection,
    /// Output paths the work item is expected to produce.
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub status: EntityStatus,
    #[serde(default)]
    pub cancel_requested: bool,
}

impl WorkItem {
    pub fn new(name: impl Into<String>, command: crate::task::CommandLine) -> Self {
        Self {
            id: None,
            name: name.into(),
            tags: Tags::new(),
            command,
            inputs: AssetCollection::new(),
            outputs: Vec::new(),
            status: EntityStatus::Unstarted,
            cancel_requested: false,
        }
    }

    pub fn absorb_backend_status(&mut self, reported: EntityStatus) {
        let translated = if self.cancel_requested && reported == EntityStatus::Failed {
            EntityStatus::Canceled
        } else {
            reported
        };
        if self.status.is_terminal() || translated.rank() < self.status.rank() {
            return;
        }
        self.status = translated;
    }
}

/// Uniform entity wrapper the platform facade dispatches on.
#[derive(Clone, Debug)]
pub enum Item {
    Suite(Suite),
    Experiment(Experiment),
    Simulation(Simulation),
    WorkItem(WorkItem),
    AssetCollection(AssetCollection),
}

impl Item {
    pub fn kind(&self) -> ItemKind {
        match self {
            Self::Suite(_) => ItemKind::Suite,
            Self::Experiment(_) => ItemKind::Experiment,
            Self::Simulation(_) => ItemKind::Simulation,
            Self::WorkItem(_) => ItemKind::WorkItem,
            Self::AssetCollection(_) => ItemKind::AssetCollection,
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Suite(suite) => suite.id.as_deref(),
            Self::Experiment(experiment) => experiment.id.as_deref(),
            Self::Simulation(simulation) => simulation.id.as_deref(),
            Self::WorkItem(workitem) => workitem.id.as_deref(),
            Self::AssetCollection(collection) => collection.id.as_deref(),
        }
    }

    pub fn status(&self) -> EntityStatus {
        match self {
            Self::Suite(suite) => suite.status(),
            Self::Experiment(experiment) => experiment.status(),
            Self::Simulation(simulation) => simulation.status,
            Self::WorkItem(workitem) => workitem.status,
            Self::AssetCollection(_) => EntityStatus::Succeeded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::EntityStatus::*;

    fn simulation() -> Simulation {
        Simulation::new(Task::from_command("true"))
    }

    #[test]
    fn frozen_experiment_refuses_mutation() {
        let mut experiment = Experiment::new("exp");
        experiment.set_tag("a", 1).unwrap();
        experiment.freeze();
        assert!(matches!(
            experiment.set_tag("b", 2),
            Err(ValidationError::Frozen(_))
        ));
        assert!(matches!(
            experiment.add_common_asset(Asset::from_bytes("", "x", b"x".to_vec())),
            Err(ValidationError::Frozen(_))
        ));
    }

    #[test]
    fn statuses_never_regress() {
        let mut sim = simulation();
        sim.absorb_backend_status(Created);
        sim.absorb_backend_status(Running);
        sim.absorb_backend_status(Created);
        assert_eq!(sim.status, Running);
        sim.absorb_backend_status(Succeeded);
        sim.absorb_backend_status(Running);
        assert_eq!(sim.status, Succeeded);
    }

    #[test]
    fn canceled_jobs_reported_failed_are_translated() {
        let mut sim = simulation();
        sim.absorb_backend_status(Running);
        sim.cancel_requested = true;
        sim.absorb_backend_status(Failed);
        assert_eq!(sim.status, Canceled);
    }

    #[test]
    fn uncanceled_failures_stay_failed() {
        let mut sim = simulation();
        sim.absorb_backend_status(Failed);
        assert_eq!(sim.status, Failed);
    }

    #[test]
    fn experiment_status_reduces_over_children() {
        let mut experiment = Experiment::new("exp");
        experiment.id = Some("e1".into());
        for status in [Succeeded, Failed] {
            let mut sim = simulation();
            sim.status = status;
            experiment.add_simulation(sim);
        }
        assert_eq!(experiment.status(), Failed);
        assert_eq!(experiment.simulations()[0].experiment_id.as_deref(), Some("e1"));
    }

    #[test]
    fn empty_experiment_is_vacuously_succeeded() {
        let experiment = Experiment::new("empty");
        assert_eq!(experiment.status(), Succeeded);
    }

    #[test]
    fn snapshot_round_trips() {
        let mut experiment = Experiment::new("exp");
        experiment.id = Some("Experiment0000".into());
        experiment.set_tag("disease", "generic").unwrap();
        experiment
            .add_common_asset(Asset::from_bytes("", "model.py", b"print".to_vec()))
            .unwrap();
        let mut sim = simulation();
        sim.id = Some("Simulation0000".into());
        experiment.add_simulation(sim);

        let snapshot = experiment.snapshot();
        let encoded = serde_json::to_string(&snapshot).unwrap();
        let decoded: ExperimentSnapshot = serde_json::from_str(&encoded).unwrap();
        assert_eq!(snapshot, decoded);
        assert_eq!(decoded.simulation_ids, vec!["Simulation0000".to_string()]);
    }
}
