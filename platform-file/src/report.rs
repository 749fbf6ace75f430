//! Read-only reporting over a job tree: per-experiment status summaries,
//! newest-experiment lookup and output cleanup. Everything here works off
//! the files alone; no backend instance is needed.

use crate::error::FilePlatformError;
use crate::layout::{
    self, FileLayout, ASSETS_DIR, METADATA_FILE, RUN_SCRIPT, SIMULATION_METADATA_FILE,
};
use ignore::WalkBuilder;
use itertools::Itertools;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use sweeprun_core::status::EntityStatus;
use tracing::info;

/// Status summary of one experiment's jobs.
#[derive(Clone, Debug)]
pub struct StatusReport {
    pub experiment_id: String,
    pub counts: BTreeMap<String, usize>,
    pub simulations: Vec<(String, EntityStatus)>,
}

impl std::fmt::Display for StatusReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Experiment {}", self.experiment_id)?;
        for (status, count) in &self.counts {
            writeln!(f, "  {status}: {count}")?;
        }
        for (id, status) in &self.simulations {
            writeln!(f, "  {id}  {status}")?;
        }
        Ok(())
    }
}

pub fn experiment_report(
    layout: &FileLayout,
    experiment_id: &str,
) -> Result<StatusReport, FilePlatformError> {
    let experiment_dir = layout.find_directory(experiment_id)?;
    let mut simulations = Vec::new();
    for simulation_dir in layout.children_with(&experiment_dir, SIMULATION_METADATA_FILE)? {
        let id = simulation_dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let status = layout::read_job_status(&simulation_dir)?.to_entity_status();
        simulations.push((id, status));
    }
    let counts = simulations
        .iter()
        .map(|(_, status)| status.to_string())
        .counts()
        .into_iter()
        .collect();
    Ok(StatusReport {
        experiment_id: experiment_id.to_owned(),
        counts,
        simulations,
    })
}

/// The most recently written experiment in the tree, by metadata mtime.
pub fn latest_experiment(layout: &FileLayout) -> Result<String, FilePlatformError> {
    let mut newest: Option<(SystemTime, String)> = None;
    let mut walker = WalkBuilder::new(layout.root());
    walker.max_depth(Some(2)).standard_filters(false);
    for entry in walker.build().flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let metadata_path = path.join(METADATA_FILE);
        if !metadata_path.is_file() || !is_experiment_metadata(&metadata_path) {
            continue;
        }
        let modified = fs::metadata(&metadata_path)
            .and_then(|m| m.modified())
            .map_err(|e| FilePlatformError::io(&metadata_path, e))?;
        let id = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        if newest.as_ref().map_or(true, |(when, _)| modified > *when) {
            newest = Some((modified, id));
        }
    }
    newest
        .map(|(_, id)| id)
        .ok_or_else(|| FilePlatformError::DirectoryNotFound("latest experiment".to_owned()))
}

fn is_experiment_metadata(path: &Path) -> bool {
    crate::metadata::read_raw(path)
        .ok()
        .is_some_and(|raw| raw.get("simulation_ids").is_some())
}

/// Delete a simulation's outputs, keeping its metadata, its run script and
/// its asset links. Returns the removed paths.
pub fn clear_simulation_outputs(
    simulation_dir: &Path,
) -> Result<Vec<PathBuf>, FilePlatformError> {
    const KEEP: &[&str] = &[SIMULATION_METADATA_FILE, RUN_SCRIPT, ASSETS_DIR];
    let mut removed = Vec::new();
    let entries =
        fs::read_dir(simulation_dir).map_err(|e| FilePlatformError::io(simulation_dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| FilePlatformError::io(simulation_dir, e))?;
        let name = entry.file_name();
        if KEEP.iter().any(|keep| name == *keep) {
            continue;
        }
        let path = entry.path();
        let result = if path.is_dir() && !fs::symlink_metadata(&path)
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false)
        {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        result.map_err(|e| FilePlatformError::io(&path, e))?;
        removed.push(path);
    }
    info!(simulation = ?simulation_dir, removed = removed.len(), "Cleared outputs");
    Ok(removed)
}

/// Clear the outputs of every simulation under an experiment.
pub fn clear_experiment_outputs(
    layout: &FileLayout,
    experiment_id: &str,
) -> Result<usize, FilePlatformError> {
    let experiment_dir = layout.find_directory(experiment_id)?;
    let mut total = 0;
    for simulation_dir in layout.children_with(&experiment_dir, SIMULATION_METADATA_FILE)? {
        total += clear_simulation_outputs(&simulation_dir)?.len();
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{write_job_status, JobStatus, STATUS_FILE};

    fn seed_experiment(root: &Path, id: &str, statuses: &[JobStatus]) {
        let exp = root.join(id);
        fs::create_dir_all(&exp).unwrap();
        fs::write(
            exp.join(METADATA_FILE),
            format!(r#"{{"name":"{id}","simulation_ids":[]}}"#),
        )
        .unwrap();
        for (index, status) in statuses.iter().enumerate() {
            let sim = exp.join(format!("Simulation{index:04}"));
            fs::create_dir_all(&sim).unwrap();
            fs::write(sim.join(SIMULATION_METADATA_FILE), "{}").unwrap();
            if *status != JobStatus::Pending {
                write_job_status(&sim, *status).unwrap();
            }
        }
    }

    #[test]
    fn report_counts_by_status() {
        let dir = tempfile::tempdir().unwrap();
        let layout = FileLayout::new(dir.path());
        seed_experiment(
            dir.path(),
            "Experiment0000",
            &[
                JobStatus::Succeeded,
                JobStatus::Succeeded,
                JobStatus::Failed,
                JobStatus::Pending,
            ],
        );
        let report = experiment_report(&layout, "Experiment0000").unwrap();
        assert_eq!(report.counts["SUCCEEDED"], 2);
        assert_eq!(report.counts["FAILED"], 1);
        assert_eq!(report.counts["CREATED"], 1);
        assert_eq!(report.simulations.len(), 4);
        let rendered = report.to_string();
        assert!(rendered.contains("SUCCEEDED: 2"));
    }

    #[test]
    fn latest_experiment_is_the_most_recent() {
        let dir = tempfile::tempdir().unwrap();
        let layout = FileLayout::new(dir.path());
        seed_experiment(dir.path(), "Experiment0000", &[]);
        std::thread::sleep(std::time::Duration::from_millis(20));
        seed_experiment(dir.path(), "Experiment0001", &[]);
        assert_eq!(latest_experiment(&layout).unwrap(), "Experiment0001");
    }

    #[test]
    fn clearing_keeps_metadata_and_script() {
        let dir = tempfile::tempdir().unwrap();
        let layout = FileLayout::new(dir.path());
        seed_experiment(dir.path(), "Experiment0000", &[JobStatus::Succeeded]);
        let sim = dir.path().join("Experiment0000/Simulation0000");
        fs::create_dir_all(sim.join("output")).unwrap();
        fs::write(sim.join("output/result.txt"), b"r").unwrap();
        fs::write(sim.join(RUN_SCRIPT), b"#!/bin/sh").unwrap();

        let cleared = clear_experiment_outputs(&layout, "Experiment0000").unwrap();
        assert!(cleared >= 2);
        assert!(sim.join(SIMULATION_METADATA_FILE).is_file());
        assert!(sim.join(RUN_SCRIPT).is_file());
        assert!(!sim.join("output").exists());
        assert!(!sim.join(STATUS_FILE).exists());
    }
}
