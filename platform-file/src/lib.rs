//! File backend: runs campaigns as a directory tree on a shared filesystem.
//!
//! Every entity is a directory, every state transition a file write, so a
//! job tree survives process restarts and can be inspected (or driven) with
//! nothing but a shell. Work items are not supported.

pub mod archive;
pub mod error;
pub mod layout;
pub mod metadata;
mod ops;
pub mod report;
pub mod runner;
pub mod scripts;
pub mod store;

pub use layout::FileLayout;
pub use ops::{archive_experiment_by_id, FileOptions};

use ops::{
    FileAssetCollectionOps, FileExperimentOps, FileSimulationOps, FileSuiteOps, FileWorkItemOps,
    Inner,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use sweeprun_core::config::{ConfigField, FieldType, FieldValue};
use sweeprun_core::entities::ItemKind;
use sweeprun_core::error::{ConfigError, PlatformError};
use sweeprun_core::ops::{
    AssetCollectionOperations, ExperimentOperations, PlatformBackend, SimulationOperations,
    SuiteOperations, WorkItemOperations,
};
use sweeprun_core::registry::{self, PlatformPlugin};

pub const PLUGIN_NAME: &str = "file";

const SUPPORTED: &[ItemKind] = &[
    ItemKind::Suite,
    ItemKind::Experiment,
    ItemKind::Simulation,
    ItemKind::AssetCollection,
];

pub struct FilePlatform {
    inner: Arc<Inner>,
    suite_ops: FileSuiteOps,
    experiment_ops: FileExperimentOps,
    simulation_ops: FileSimulationOps,
    workitem_ops: FileWorkItemOps,
    asset_ops: FileAssetCollectionOps,
}

impl FilePlatform {
    pub fn new(job_directory: impl Into<PathBuf>, options: FileOptions) -> Arc<Self> {
        let inner = Arc::new(Inner::new(job_directory, options));
        Arc::new(Self {
            suite_ops: FileSuiteOps { inner: inner.clone() },
            experiment_ops: FileExperimentOps { inner: inner.clone() },
            simulation_ops: FileSimulationOps { inner: inner.clone() },
            workitem_ops: FileWorkItemOps,
            asset_ops: FileAssetCollectionOps { inner: inner.clone() },
            inner,
        })
    }

    pub fn layout(&self) -> &FileLayout {
        &self.inner.layout
    }

    pub fn job_directory(&self) -> &Path {
        self.inner.layout.root()
    }

    /// Block until every commissioned job batch has finished. Tests and
    /// orderly shutdown use this; normal polling does not need it.
    pub fn drain(&self) {
        self.inner.runner.drain();
    }
}

impl PlatformBackend for FilePlatform {
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
        self.inner.options.retries
    }

    fn directory_of(&self, kind: ItemKind, id: &str) -> Result<PathBuf, PlatformError> {
        self.inner
            .layout
            .find_directory(id)
            .map_err(|_| PlatformError::NotFound {
                kind,
                id: id.to_owned(),
            })
    }
}

fn schema() -> Vec<ConfigField> {
    vec![
        ConfigField::new(
            "job_directory",
            FieldType::Path,
            "Root directory of the job tree",
        )
        .required(),
        ConfigField::new(
            "max_workers",
            FieldType::Integer,
            "Worker threads running jobs; 0 means one per CPU",
        )
        .with_default("0"),
        ConfigField::new(
            "sym_link",
            FieldType::Boolean,
            "Link staged assets instead of copying them",
        )
        .with_default("true"),
        ConfigField::new(
            "write_scripts",
            FieldType::Boolean,
            "Generate a run.sh wrapper per simulation",
        )
        .with_default("true"),
        ConfigField::new(
            "retries",
            FieldType::Integer,
            "Times a failed job is re-run before its failure sticks",
        )
        .with_default("0"),
        ConfigField::new(
            "timeout_seconds",
            FieldType::Integer,
            "Wall-clock limit per job attempt; 0 means no limit",
        )
        .with_default("0"),
    ]
}

fn factory(
    fields: &BTreeMap<String, FieldValue>,
) -> Result<Arc<dyn PlatformBackend>, ConfigError> {
    let job_directory = fields
        .get("job_directory")
        .and_then(FieldValue::as_path)
        .ok_or_else(|| ConfigError::MissingField {
            plugin: PLUGIN_NAME.to_owned(),
            field: "job_directory".to_owned(),
        })?
        .to_owned();
    let max_workers = fields
        .get("max_workers")
        .and_then(FieldValue::as_i64)
        .unwrap_or(0);
    let timeout_seconds = fields
        .get("timeout_seconds")
        .and_then(FieldValue::as_i64)
        .unwrap_or(0);
    let options = FileOptions {
        max_workers: if max_workers > 0 {
            max_workers as usize
        } else {
            num_cpus::get()
        },
        sym_link: fields
            .get("sym_link")
            .and_then(FieldValue::as_bool)
            .unwrap_or(true),
        write_scripts: fields
            .get("write_scripts")
            .and_then(FieldValue::as_bool)
            .unwrap_or(true),
        retries: fields
            .get("retries")
            .and_then(FieldValue::as_i64)
            .unwrap_or(0) as u32,
        timeout: if timeout_seconds > 0 {
            Some(Duration::from_secs(timeout_seconds as u64))
        } else {
            None
        },
    };
    Ok(FilePlatform::new(job_directory, options))
}

pub fn plugin() -> PlatformPlugin {
    PlatformPlugin {
        name: PLUGIN_NAME,
        description: "Directory-tree backend on a local or shared filesystem",
        schema,
        factory,
    }
}

/// Register the `file` plugin with the core registry. Idempotent apart from
/// a replacement warning.
pub fn register() {
    registry::register_platform(plugin());
}
