//! Reading and writing the JSON metadata snapshots the job tree carries:
//! `metadata.json` for suites and experiments, `simulation_metadata.json`
//! for simulations.

use crate::error::FilePlatformError;
use crate::layout::{METADATA_FILE, SIMULATION_METADATA_FILE};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use sweeprun_core::entities::{ExperimentSnapshot, Simulation, SuiteSnapshot};

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), FilePlatformError> {
    let rendered =
        serde_json::to_vec_pretty(value).map_err(|e| FilePlatformError::metadata(path, e))?;
    fs::write(path, rendered).map_err(|e| FilePlatformError::io(path, e))
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, FilePlatformError> {
    let raw = fs::read(path).map_err(|e| FilePlatformError::io(path, e))?;
    serde_json::from_slice(&raw).map_err(|e| FilePlatformError::metadata(path, e))
}

pub fn read_raw(path: &Path) -> Result<serde_json::Value, FilePlatformError> {
    read_json(path)
}

pub fn suite_metadata_path(suite_dir: &Path) -> PathBuf {
    suite_dir.join(METADATA_FILE)
}

pub fn experiment_metadata_path(experiment_dir: &Path) -> PathBuf {
    experiment_dir.join(METADATA_FILE)
}

pub fn simulation_metadata_path(simulation_dir: &Path) -> PathBuf {
    simulation_dir.join(SIMULATION_METADATA_FILE)
}

pub fn write_suite(suite_dir: &Path, snapshot: &SuiteSnapshot) -> Result<(), FilePlatformError> {
    write_json(&suite_metadata_path(suite_dir), snapshot)
}

pub fn write_experiment(
    experiment_dir: &Path,
    snapshot: &ExperimentSnapshot,
) -> Result<(), FilePlatformError> {
    write_json(&experiment_metadata_path(experiment_dir), snapshot)
}

pub fn read_experiment(experiment_dir: &Path) -> Result<ExperimentSnapshot, FilePlatformError> {
    read_json(&experiment_metadata_path(experiment_dir))
}

pub fn write_simulation(
    simulation_dir: &Path,
    simulation: &Simulation,
) -> Result<(), FilePlatformError> {
    write_json(&simulation_metadata_path(simulation_dir), simulation)
}

pub fn read_simulation(simulation_dir: &Path) -> Result<Simulation, FilePlatformError> {
    read_json(&simulation_metadata_path(simulation_dir))
}
