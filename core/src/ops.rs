//! The contract every backend implements: one operations table per entity
//! kind. A concrete platform provides the five implementations; the facade
//! and the orchestration engine only ever talk through these traits.
//!
//! `platform_create` assigns the backend id on the `&mut` entity and returns
//! it; `get` returns the backend's raw representation and `to_entity`
//! projects it back into the core model.

use crate::assets::AssetCollection;
use crate::entities::{Experiment, ItemKind, Simulation, Suite, WorkItem};
use crate::error::PlatformError;
use std::collections::BTreeMap;

/// Raw, backend-shaped representation of an entity.
pub type RawItem = serde_json::Value;

/// Named file contents fetched from a backend.
pub type FileBytes = BTreeMap<String, Vec<u8>>;

fn unsupported(operation: &'static str, kind: ItemKind) -> PlatformError {
    PlatformError::Unsupported { operation, kind }
}

pub trait SuiteOperations: Send + Sync {
    fn get(&self, id: &str) -> Result<RawItem, PlatformError>;
    fn platform_create(&self, suite: &mut Suite) -> Result<String, PlatformError>;
    fn run_item(&self, suite: &mut Suite) -> Result<(), PlatformError>;
    fn refresh_status(&self, suite: &mut Suite) -> Result<(), PlatformError>;
    fn send_assets(&self, _suite: &Suite) -> Result<(), PlatformError> {
        Ok(())
    }
    fn get_parent(&self, _id: &str) -> Result<Option<RawItem>, PlatformError> {
        Ok(None)
    }
    fn get_children(&self, id: &str) -> Result<Vec<RawItem>, PlatformError>;
    fn get_assets(&self, _id: &str, _files: &[String]) -> Result<FileBytes, PlatformError> {
        Err(unsupported("get_assets", ItemKind::Suite))
    }
    fn list_assets(&self, _id: &str) -> Result<Vec<String>, PlatformError> {
        Ok(Vec::new())
    }
    fn cancel(&self, _suite: &mut Suite) -> Result<(), PlatformError> {
        Ok(())
    }
    fn to_entity(&self, raw: &RawItem) -> Result<Suite, PlatformError>;
}

pub trait ExperimentOperations: Send + Sync {
    fn get(&self, id: &str) -> Result<RawItem, PlatformError>;
    fn platform_create(&self, experiment: &mut Experiment) -> Result<String, PlatformError>;
    /// Commission the experiment: transition every created child simulation
    /// toward running.
    fn run_item(&self, experiment: &mut Experiment) -> Result<(), PlatformError>;
    /// Update the experiment's children in place.
    fn refresh_status(&self, experiment: &mut Experiment) -> Result<(), PlatformError>;
    /// Stage the experiment's common assets. Must be a no-op for content the
    /// backend already holds.
    fn send_assets(&self, experiment: &mut Experiment) -> Result<(), PlatformError>;
    fn get_parent(&self, _id: &str) -> Result<Option<RawItem>, PlatformError> {
        Ok(None)
    }
    fn get_children(&self, id: &str) -> Result<Vec<RawItem>, PlatformError>;
    fn get_assets(&self, _id: &str, _files: &[String]) -> Result<FileBytes, PlatformError> {
        Err(unsupported("get_assets", ItemKind::Experiment))
    }
    fn list_assets(&self, _id: &str) -> Result<Vec<String>, PlatformError> {
        Ok(Vec::new())
    }
    fn cancel(&self, _experiment: &mut Experiment) -> Result<(), PlatformError> {
        Ok(())
    }
    fn to_entity(&self, raw: &RawItem) -> Result<Experiment, PlatformError>;
}

pub trait SimulationOperations: Send + Sync {
    fn get(&self, id: &str) -> Result<RawItem, PlatformError>;
    fn platform_create(&self, simulation: &mut Simulation) -> Result<String, PlatformError>;
    /// Create a batch of simulations. The default iterates
    /// [`SimulationOperations::platform_create`]; backends with a native
    /// batch call override this. Simulations already carrying an id are
    /// kept as-is, so a retried batch only creates the missing ones.
    fn batch_create(&self, simulations: &mut [Simulation]) -> Result<Vec<String>, PlatformError> {
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
    fn run_item(&self, simulation: &mut Simulation) -> Result<(), PlatformError>;
    fn refresh_status(&self, simulation: &mut Simulation) -> Result<(), PlatformError>;
    fn send_assets(&self, simulation: &mut Simulation) -> Result<(), PlatformError>;
    fn get_parent(&self, _id: &str) -> Result<Option<RawItem>, PlatformError> {
        Ok(None)
    }
    fn get_children(&self, _id: &str) -> Result<Vec<RawItem>, PlatformError> {
        Ok(Vec::new())
    }
    fn get_assets(&self, id: &str, files: &[String]) -> Result<FileBytes, PlatformError>;
    fn list_assets(&self, _id: &str) -> Result<Vec<String>, PlatformError> {
        Ok(Vec::new())
    }
    fn cancel(&self, _simulation: &mut Simulation) -> Result<(), PlatformError> {
        Ok(())
    }
    fn to_entity(&self, raw: &RawItem) -> Result<Simulation, PlatformError>;
}

pub trait WorkItemOperations: Send + Sync {
    fn get(&self, id: &str) -> Result<RawItem, PlatformError>;
    fn platform_create(&self, workitem: &mut WorkItem) -> Result<String, PlatformError>;
    fn run_item(&self, workitem: &mut WorkItem) -> Result<(), PlatformError>;
    fn refresh_status(&self, workitem: &mut WorkItem) -> Result<(), PlatformError>;
    fn send_assets(&self, workitem: &mut WorkItem) -> Result<(), PlatformError>;
    fn get_parent(&self, _id: &str) -> Result<Option<RawItem>, PlatformError> {
        Ok(None)
    }
    fn get_children(&self, _id: &str) -> Result<Vec<RawItem>, PlatformError> {
        Ok(Vec::new())
    }
    fn get_assets(&self, id: &str, files: &[String]) -> Result<FileBytes, PlatformError>;
    fn list_assets(&self, _id: &str) -> Result<Vec<String>, PlatformError> {
        Ok(Vec::new())
    }
    fn cancel(&self, _workitem: &mut WorkItem) -> Result<(), PlatformError> {
        Ok(())
    }
    fn to_entity(&self, raw: &RawItem) -> Result<WorkItem, PlatformError>;
}

pub trait AssetCollectionOperations: Send + Sync {
    fn get(&self, id: &str) -> Result<RawItem, PlatformError>;
    /// Create or deduplicate: a collection whose checksum set already exists
    /// on the backend returns the existing id without a second upload.
    fn platform_create(&self, collection: &mut AssetCollection) -> Result<String, PlatformError>;
    fn get_assets(&self, id: &str, files: &[String]) -> Result<FileBytes, PlatformError>;
    fn list_assets(&self, id: &str) -> Result<Vec<String>, PlatformError>;
    fn to_entity(&self, raw: &RawItem) -> Result<AssetCollection, PlatformError>;
}

/// A concrete execution backend: the five operation tables plus the few
/// platform-wide facts the facade needs.
pub trait PlatformBackend: Send + Sync {
    /// Registered plugin name this backend was constructed from.
    fn plugin_name(&self) -> &'static str;
    fn suites(&self) -> &dyn SuiteOperations;
    fn experiments(&self) -> &dyn ExperimentOperations;
    fn simulations(&self) -> &dyn SimulationOperations;
    fn workitems(&self) -> &dyn WorkItemOperations;
    fn asset_collections(&self) -> &dyn AssetCollectionOperations;
    fn supported_kinds(&self) -> &[ItemKind];
    /// How many times the backend restarts failed jobs on its own. The
    /// engine never re-submits; it only forwards this to the backend.
    fn num_retries(&self) -> u32 {
        0
    }
    /// On-disk location of an entity, for backends that have one.
    fn directory_of(&self, kind: ItemKind, _id: &str) -> Result<std::path::PathBuf, PlatformError> {
        Err(unsupported("get_directory", kind))
    }
}
