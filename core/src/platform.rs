//! The platform facade: one typed entry point over a backend's operation
//! tables, plus the scoped "current platform" used by code that creates
//! entities without threading a handle through every call.

use crate::config::{validate_block, ConfigFile};
use crate::entities::{Experiment, Item, ItemKind, SimulationSource, Suite};
use crate::error::{ConfigError, PlatformError, ValidationError};
use crate::ops::{FileBytes, PlatformBackend, RawItem};
use crate::registry;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Files fetched through [`Platform::get_files`], shaped by the kind of the
/// requested entity.
#[derive(Debug)]
pub enum RetrievedFiles {
    /// A single job's files.
    Files(FileBytes),
    /// Per-simulation files of one experiment, keyed by simulation id.
    BySimulation(BTreeMap<String, FileBytes>),
    /// Per-experiment maps of a suite, keyed by experiment id.
    ByExperiment(BTreeMap<String, BTreeMap<String, FileBytes>>),
}

/// A handle to one configured backend. Cheap to clone; all clones share the
/// backend instance.
#[derive(Clone)]
pub struct Platform {
    backend: Arc<dyn PlatformBackend>,
    block_name: String,
}

thread_local! {
    static CURRENT: RefCell<Vec<Platform>> = const { RefCell::new(Vec::new()) };
}

/// Pops the pushed platform when dropped.
pub struct CurrentPlatformGuard {
    _private: (),
}

impl Drop for CurrentPlatformGuard {
    fn drop(&mut self) {
        CURRENT.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

impl Platform {
    /// Wrap an already constructed backend, e.g. the mock in tests.
    pub fn from_backend(backend: Arc<dyn PlatformBackend>) -> Self {
        let block_name = backend.plugin_name().to_owned();
        Self {
            backend,
            block_name,
        }
    }

    /// Build the platform named by `block_name` in the loaded configuration:
    /// resolve the block's `type` to a registered plugin, validate the
    /// block's fields against the plugin schema, and run the factory. Also
    /// installs the configured id strategy.
    pub fn from_config(block_name: &str) -> Result<Self, ConfigError> {
        let config = ConfigFile::load()?;
        Self::from_config_file(&config, block_name)
    }

    pub fn from_config_file(config: &ConfigFile, block_name: &str) -> Result<Self, ConfigError> {
        let block = config.block(block_name)?;
        let plugin = registry::platform_plugin(&block.platform_type)?;
        let values = validate_block(plugin.name, &(plugin.schema)(), &block.fields)?;
        registry::install_id_strategy(&config.common)?;
        let backend = (plugin.factory)(&values)?;
        info!(block = block_name, plugin = plugin.name, "Platform ready");
        Ok(Self {
            backend,
            block_name: block_name.to_owned(),
        })
    }

    /// Push this platform as the innermost current platform. The returned
    /// guard pops it again; scopes nest.
    pub fn make_current(&self) -> CurrentPlatformGuard {
        CURRENT.with(|stack| stack.borrow_mut().push(self.clone()));
        CurrentPlatformGuard { _private: () }
    }

    /// The innermost platform pushed by [`Platform::make_current`].
    pub fn current() -> Option<Platform> {
        CURRENT.with(|stack| stack.borrow().last().cloned())
    }

    pub fn block_name(&self) -> &str {
        &self.block_name
    }

    pub fn plugin_name(&self) -> &'static str {
        self.backend.plugin_name()
    }

    pub fn backend(&self) -> &Arc<dyn PlatformBackend> {
        &self.backend
    }

    pub fn supports(&self, kind: ItemKind) -> bool {
        self.backend.supported_kinds().contains(&kind)
    }

    fn ensure_supported(
        &self,
        operation: &'static str,
        kind: ItemKind,
    ) -> Result<(), PlatformError> {
        if self.supports(kind) {
            Ok(())
        } else {
            Err(PlatformError::Unsupported { operation, kind })
        }
    }

    fn ensure_uncreated(id: &Option<String>, name: &str) -> Result<(), ValidationError> {
        match id {
            Some(_) => Err(ValidationError::AlreadyCreated(name.to_owned())),
            None => Ok(()),
        }
    }

    /// Create an entity on the backend. Entities that already carry an id
    /// are refused; re-submission must go through a fresh entity.
    ///
    /// Creating an experiment freezes it and realizes its template, so the
    /// children are ready for batch creation. Child simulations are NOT
    /// created here; that is the orchestration engine's job.
    pub fn create(&self, item: &mut Item) -> Result<String, PlatformError> {
        self.ensure_supported("create", item.kind())?;
        match item {
            Item::Suite(suite) => {
                Self::ensure_uncreated(&suite.id, &suite.name)?;
                self.backend.suites().platform_create(suite)
            }
            Item::Experiment(experiment) => self.create_experiment(experiment),
            Item::Simulation(simulation) => {
                Self::ensure_uncreated(
                    &simulation.id,
                    simulation.name.as_deref().unwrap_or("simulation"),
                )?;
                self.backend.simulations().platform_create(simulation)
            }
            Item::WorkItem(workitem) => {
                Self::ensure_uncreated(&workitem.id, &workitem.name)?;
                self.backend.workitems().platform_create(workitem)
            }
            Item::AssetCollection(collection) => {
                self.backend.asset_collections().platform_create(collection)
            }
        }
    }

    /// Create an experiment: freeze it, realize its template and stamp the
    /// children with the new id. Children are not created here.
    ///
    /// The freeze happens before the backend sees the experiment, so the
    /// persisted snapshot is already immutable.
    pub fn create_experiment(&self, experiment: &mut Experiment) -> Result<String, PlatformError> {
        self.ensure_supported("create", ItemKind::Experiment)?;
        Self::ensure_uncreated(&experiment.id, &experiment.name)?;
        experiment.freeze();
        let id = self.backend.experiments().platform_create(experiment)?;
        if let SimulationSource::Template(template) = &experiment.simulations {
            let simulations = template.realize()?;
            debug!(
                experiment = id.as_str(),
                count = simulations.len(),
                "Realized simulation template"
            );
            experiment.simulations = SimulationSource::Realized(simulations);
        }
        for simulation in experiment.simulations_mut() {
            simulation.experiment_id = Some(id.clone());
        }
        Ok(id)
    }

    pub fn run(&self, item: &mut Item) -> Result<(), PlatformError> {
        self.ensure_supported("run", item.kind())?;
        match item {
            Item::Suite(suite) => self.backend.suites().run_item(suite),
            Item::Experiment(experiment) => self.backend.experiments().run_item(experiment),
            Item::Simulation(simulation) => self.backend.simulations().run_item(simulation),
            Item::WorkItem(workitem) => self.backend.workitems().run_item(workitem),
            Item::AssetCollection(_) => Ok(()),
        }
    }

    pub fn refresh(&self, item: &mut Item) -> Result<(), PlatformError> {
        match item {
            Item::Suite(suite) => self.backend.suites().refresh_status(suite),
            Item::Experiment(experiment) => self.backend.experiments().refresh_status(experiment),
            Item::Simulation(simulation) => self.backend.simulations().refresh_status(simulation),
            Item::WorkItem(workitem) => self.backend.workitems().refresh_status(workitem),
            Item::AssetCollection(_) => Ok(()),
        }
    }

    /// Request cancellation. Idempotent; canceling a terminal entity is a
    /// no-op.
    pub fn cancel(&self, item: &mut Item) -> Result<(), PlatformError> {
        match item {
            Item::Suite(suite) => self.backend.suites().cancel(suite),
            Item::Experiment(experiment) => self.backend.experiments().cancel(experiment),
            Item::Simulation(simulation) => self.backend.simulations().cancel(simulation),
            Item::WorkItem(workitem) => self.backend.workitems().cancel(workitem),
            Item::AssetCollection(_) => Ok(()),
        }
    }

    /// Fetch an entity by id in core-model shape.
    pub fn get_item(&self, kind: ItemKind, id: &str) -> Result<Item, PlatformError> {
        Ok(match kind {
            ItemKind::Suite => {
                let raw = self.backend.suites().get(id)?;
                Item::Suite(self.backend.suites().to_entity(&raw)?)
            }
            ItemKind::Experiment => {
                let raw = self.backend.experiments().get(id)?;
                Item::Experiment(self.backend.experiments().to_entity(&raw)?)
            }
            ItemKind::Simulation => {
                let raw = self.backend.simulations().get(id)?;
                Item::Simulation(self.backend.simulations().to_entity(&raw)?)
            }
            ItemKind::WorkItem => {
                let raw = self.backend.workitems().get(id)?;
                Item::WorkItem(self.backend.workitems().to_entity(&raw)?)
            }
            ItemKind::AssetCollection => {
                let raw = self.backend.asset_collections().get(id)?;
                Item::AssetCollection(self.backend.asset_collections().to_entity(&raw)?)
            }
        })
    }

    /// Fetch an experiment together with its realized children.
    pub fn get_experiment_with_simulations(&self, id: &str) -> Result<Experiment, PlatformError> {
        let raw = self.backend.experiments().get(id)?;
        let mut experiment = self.backend.experiments().to_entity(&raw)?;
        for raw_sim in self.backend.experiments().get_children(id)? {
            let simulation = self.backend.simulations().to_entity(&raw_sim)?;
            experiment.add_simulation(simulation);
        }
        Ok(experiment)
    }

    /// Fetch a suite together with its experiments and their children.
    pub fn get_suite_with_experiments(&self, id: &str) -> Result<Suite, PlatformError> {
        let raw = self.backend.suites().get(id)?;
        let mut suite = self.backend.suites().to_entity(&raw)?;
        for raw_exp in self.backend.suites().get_children(id)? {
            let exp_id = raw_id(&raw_exp).ok_or_else(|| PlatformError::Permanent {
                operation: "get_children".to_owned(),
                id: id.to_owned(),
                reason: "child experiment without an id".to_owned(),
            })?;
            suite
                .experiments
                .push(self.get_experiment_with_simulations(&exp_id)?);
        }
        Ok(suite)
    }

    /// The leaf job ids under an entity: a suite flattens through its
    /// experiments to simulations, a leaf flattens to itself.
    pub fn flatten_item(&self, kind: ItemKind, id: &str) -> Result<Vec<String>, PlatformError> {
        match kind {
            ItemKind::Suite => {
                let mut out = Vec::new();
                for raw_exp in self.backend.suites().get_children(id)? {
                    if let Some(exp_id) = raw_id(&raw_exp) {
                        out.extend(self.flatten_item(ItemKind::Experiment, &exp_id)?);
                    }
                }
                Ok(out)
            }
            ItemKind::Experiment => Ok(flatten_raw(
                &self.backend.experiments().get_children(id)?,
            )),
            ItemKind::Simulation | ItemKind::WorkItem | ItemKind::AssetCollection => {
                Ok(vec![id.to_owned()])
            }
        }
    }

    /// Fetch named output files, shaped by entity kind: a simulation yields
    /// its own files, an experiment a per-simulation map, a suite a
    /// per-experiment map of those.
    pub fn get_files(
        &self,
        kind: ItemKind,
        id: &str,
        files: &[String],
    ) -> Result<RetrievedFiles, PlatformError> {
        match kind {
            ItemKind::Simulation => Ok(RetrievedFiles::Files(
                self.backend.simulations().get_assets(id, files)?,
            )),
            ItemKind::WorkItem => Ok(RetrievedFiles::Files(
                self.backend.workitems().get_assets(id, files)?,
            )),
            ItemKind::AssetCollection => Ok(RetrievedFiles::Files(
                self.backend.asset_collections().get_assets(id, files)?,
            )),
            ItemKind::Experiment => {
                let mut by_simulation = BTreeMap::new();
                for sim_id in self.flatten_item(kind, id)? {
                    by_simulation.insert(
                        sim_id.clone(),
                        self.backend.simulations().get_assets(&sim_id, files)?,
                    );
                }
                Ok(RetrievedFiles::BySimulation(by_simulation))
            }
            ItemKind::Suite => {
                let mut by_experiment = BTreeMap::new();
                for raw_exp in self.backend.suites().get_children(id)? {
                    let Some(exp_id) = raw_id(&raw_exp) else {
                        continue;
                    };
                    let mut by_simulation = BTreeMap::new();
                    for sim_id in self.flatten_item(ItemKind::Experiment, &exp_id)? {
                        by_simulation.insert(
                            sim_id.clone(),
                            self.backend.simulations().get_assets(&sim_id, files)?,
                        );
                    }
                    by_experiment.insert(exp_id, by_simulation);
                }
                Ok(RetrievedFiles::ByExperiment(by_experiment))
            }
        }
    }

    /// On-disk location of an entity, for backends that have one.
    pub fn get_directory(&self, kind: ItemKind, id: &str) -> Result<PathBuf, PlatformError> {
        self.backend.directory_of(kind, id)
    }
}

pub(crate) fn raw_id(raw: &RawItem) -> Option<String> {
    raw.get("id").and_then(|v| v.as_str()).map(str::to_owned)
}

/// Extract ids out of backend-shaped raw items, dropping any without one.
pub fn flatten_raw(raws: &[RawItem]) -> Vec<String> {
    raws.iter().filter_map(raw_id).collect()
}
