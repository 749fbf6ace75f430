//! On-disk layout of the job tree and the `job_status.txt` contract.
//!
//! ```text
//! job_directory/
//!   <suite_id>/<experiment_id>/<simulation_id>/   (suite-less experiments
//!   <experiment_id>/<simulation_id>/               sit at the top level)
//!   _assets/<checksum[..2]>/<checksum>             content-addressed store
//!   _collections/<id>.json                         collection manifests
//! ```

use crate::error::FilePlatformError;
use globset::{Glob, GlobSetBuilder};
use ignore::WalkBuilder;
use sweeprun_core::status::EntityStatus;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const STATUS_FILE: &str = "job_status.txt";
pub const CANCEL_FILE: &str = "job_cancel.txt";
pub const METADATA_FILE: &str = "metadata.json";
pub const SIMULATION_METADATA_FILE: &str = "simulation_metadata.json";
pub const ASSETS_DIR: &str = "Assets";
pub const STDOUT_FILE: &str = "StdOut.txt";
pub const STDERR_FILE: &str = "StdErr.txt";
pub const RUN_SCRIPT: &str = "run.sh";
pub const BATCH_SCRIPT: &str = "batch.sh";
pub const ARCHIVE_FILE: &str = "simulations.zip";

const STORE_DIR: &str = "_assets";
const COLLECTIONS_DIR: &str = "_collections";

/// Job state as recorded in `job_status.txt`: `0` succeeded, `-1` failed,
/// `100` running, no file means the job has not started.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    fn marker(&self) -> &'static str {
        match self {
            Self::Pending => "",
            Self::Running => "100",
            Self::Succeeded => "0",
            Self::Failed => "-1",
        }
    }

    pub fn to_entity_status(self) -> EntityStatus {
        match self {
            Self::Pending => EntityStatus::Created,
            Self::Running => EntityStatus::Running,
            Self::Succeeded => EntityStatus::Succeeded,
            Self::Failed => EntityStatus::Failed,
        }
    }
}

pub fn read_job_status(simulation_dir: &Path) -> Result<JobStatus, FilePlatformError> {
    let path = simulation_dir.join(STATUS_FILE);
    if !path.is_file() {
        return Ok(JobStatus::Pending);
    }
    let raw = fs::read_to_string(&path).map_err(|e| FilePlatformError::io(&path, e))?;
    Ok(match raw.trim() {
        "0" => JobStatus::Succeeded,
        "100" => JobStatus::Running,
        // any other exit marker is a failure
        _ => JobStatus::Failed,
    })
}

pub fn write_job_status(
    simulation_dir: &Path,
    status: JobStatus,
) -> Result<(), FilePlatformError> {
    let path = simulation_dir.join(STATUS_FILE);
    fs::write(&path, status.marker()).map_err(|e| FilePlatformError::io(&path, e))
}

/// Path arithmetic over the job tree. Holds no handles; every method works
/// off the root directory.
#[derive(Clone, Debug)]
pub struct FileLayout {
    root: PathBuf,
}

impl FileLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store_dir(&self) -> PathBuf {
        self.root.join(STORE_DIR)
    }

    pub fn collections_dir(&self) -> PathBuf {
        self.root.join(COLLECTIONS_DIR)
    }

    pub fn collection_manifest(&self, id: &str) -> PathBuf {
        self.collections_dir().join(format!("{id}.json"))
    }

    pub fn suite_dir(&self, suite_id: &str) -> PathBuf {
        self.root.join(suite_id)
    }

    pub fn experiment_dir(&self, suite_id: Option<&str>, experiment_id: &str) -> PathBuf {
        match suite_id {
            Some(suite_id) => self.root.join(suite_id).join(experiment_id),
            None => self.root.join(experiment_id),
        }
    }

    /// Content-addressed location of one asset's bytes.
    pub fn store_path(&self, checksum: &str) -> PathBuf {
        let prefix = checksum.get(..2).unwrap_or("00");
        self.store_dir().join(prefix).join(checksum)
    }

    /// Find the directory of an entity by id alone, searching the fixed
    /// depths of the tree. Bookkeeping directories are skipped.
    pub fn find_directory(&self, id: &str) -> Result<PathBuf, FilePlatformError> {
        if !self.root.is_dir() {
            return Err(FilePlatformError::DirectoryNotFound(id.to_owned()));
        }
        let mut walker = WalkBuilder::new(&self.root);
        walker
            .max_depth(Some(3))
            .standard_filters(false)
            .hidden(true);
        for entry in walker.build().flatten() {
            let path = entry.path();
            if !path.is_dir() || path == self.root {
                continue;
            }
            if path.strip_prefix(&self.root).ok().is_some_and(|relative| {
                relative
                    .components()
                    .next()
                    .is_some_and(|top| top.as_os_str() == STORE_DIR || top.as_os_str() == COLLECTIONS_DIR)
            }) {
                continue;
            }
            if path.file_name().is_some_and(|name| name == id) {
                debug!(id, path = ?path, "Resolved entity directory");
                return Ok(path.to_owned());
            }
        }
        Err(FilePlatformError::DirectoryNotFound(id.to_owned()))
    }

    /// Child directories of `dir` that carry the given metadata file.
    pub fn children_with(
        &self,
        dir: &Path,
        metadata_file: &str,
    ) -> Result<Vec<PathBuf>, FilePlatformError> {
        let mut out = Vec::new();
        let entries = fs::read_dir(dir).map_err(|e| FilePlatformError::io(dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| FilePlatformError::io(dir, e))?;
            let path = entry.path();
            if path.is_dir() && path.join(metadata_file).is_file() {
                out.push(path);
            }
        }
        out.sort();
        Ok(out)
    }
}

/// Files under `dir` whose relative path matches any of the glob patterns.
/// Exact file names are globs too, so plain lookups fall out for free.
pub fn match_output_files(
    dir: &Path,
    patterns: &[String],
) -> Result<Vec<(String, PathBuf)>, FilePlatformError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(
            Glob::new(pattern)
                .map_err(|e| FilePlatformError::BadPattern(pattern.clone(), e.to_string()))?,
        );
    }
    let set = builder
        .build()
        .map_err(|e| FilePlatformError::BadPattern(String::new(), e.to_string()))?;

    let mut matched = Vec::new();
    for relative in list_files(dir)? {
        if set.is_match(&relative) {
            matched.push((relative.clone(), dir.join(&relative)));
        }
    }
    Ok(matched)
}

/// All regular files under `dir`, as sorted relative slash paths.
pub fn list_files(dir: &Path) -> Result<Vec<String>, FilePlatformError> {
    let mut out = Vec::new();
    let mut walker = WalkBuilder::new(dir);
    walker.standard_filters(false).follow_links(true);
    for entry in walker.build().flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if let Ok(relative) = path.strip_prefix(dir) {
            out.push(relative.to_string_lossy().replace('\\', "/"));
        }
    }
    out.sort();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_status_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(read_job_status(dir.path()).unwrap(), JobStatus::Pending);
        for status in [JobStatus::Running, JobStatus::Succeeded, JobStatus::Failed] {
            write_job_status(dir.path(), status).unwrap();
            assert_eq!(read_job_status(dir.path()).unwrap(), status);
        }
    }

    #[test]
    fn unknown_status_marker_reads_as_failed() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(STATUS_FILE), "137").unwrap();
        assert_eq!(read_job_status(dir.path()).unwrap(), JobStatus::Failed);
    }

    #[test]
    fn find_directory_searches_all_depths() {
        let dir = tempfile::tempdir().unwrap();
        let layout = FileLayout::new(dir.path());
        let sim = dir.path().join("Suite0000/Experiment0000/Simulation0003");
        fs::create_dir_all(&sim).unwrap();
        fs::create_dir_all(dir.path().join("_assets/ab")).unwrap();

        assert_eq!(layout.find_directory("Suite0000").unwrap(), dir.path().join("Suite0000"));
        assert_eq!(
            layout.find_directory("Experiment0000").unwrap(),
            dir.path().join("Suite0000/Experiment0000")
        );
        assert_eq!(layout.find_directory("Simulation0003").unwrap(), sim);
        assert!(layout.find_directory("Simulation9999").is_err());
        assert!(layout.find_directory("ab").is_err());
    }

    #[test]
    fn glob_patterns_match_outputs() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("output")).unwrap();
        fs::write(dir.path().join("output/result.txt"), b"r").unwrap();
        fs::write(dir.path().join("output/extra.csv"), b"c").unwrap();
        fs::write(dir.path().join("StdOut.txt"), b"s").unwrap();

        let exact = match_output_files(dir.path(), &["output/result.txt".to_owned()]).unwrap();
        assert_eq!(exact.len(), 1);
        assert_eq!(exact[0].0, "output/result.txt");

        let glob = match_output_files(dir.path(), &["output/*".to_owned()]).unwrap();
        assert_eq!(glob.len(), 2);
    }
}
