//! Content-addressed asset staging.
//!
//! Every staged byte stream lands in the store exactly once, keyed by its
//! sha256. Entity directories receive symlinks into the store, or copies
//! when `sym_link` is off.

use crate::error::FilePlatformError;
use crate::layout::{FileLayout, ASSETS_DIR};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use sweeprun_core::assets::{Asset, AssetCollection};
use sweeprun_core::tags::Tags;
use tracing::debug;

/// Persisted record of one named collection: keys and checksums, never the
/// bytes themselves.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct CollectionManifest {
    pub id: String,
    #[serde(default)]
    pub tags: Tags,
    pub assets: Vec<ManifestEntry>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct ManifestEntry {
    /// Staged location relative to the asset root.
    pub key: String,
    pub checksum: String,
}

#[derive(Clone, Debug)]
pub struct AssetStager {
    layout: FileLayout,
    sym_link: bool,
}

impl AssetStager {
    pub fn new(layout: FileLayout, sym_link: bool) -> Self {
        Self { layout, sym_link }
    }

    /// Put one asset's bytes into the store, returning its checksum. A
    /// checksum already present is not written again.
    pub fn stage(&self, asset: &mut Asset) -> Result<String, FilePlatformError> {
        let source_hint = asset.key();
        let checksum = asset
            .checksum()
            .map_err(|e| FilePlatformError::io(Path::new(&source_hint), e))?
            .to_owned();
        let target = self.layout.store_path(&checksum);
        if target.is_file() {
            return Ok(checksum);
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| FilePlatformError::io(parent, e))?;
        }
        let bytes = asset
            .bytes()
            .map_err(|e| FilePlatformError::io(Path::new(&source_hint), e))?;
        fs::write(&target, bytes).map_err(|e| FilePlatformError::io(&target, e))?;
        debug!(checksum = checksum.as_str(), "Stored asset content");
        Ok(checksum)
    }

    /// Stage a whole collection into `dest_dir`, laid out by asset key.
    /// Already materialized keys are left alone, so re-staging is free.
    pub fn stage_collection(
        &self,
        collection: &mut AssetCollection,
        dest_dir: &Path,
    ) -> Result<(), FilePlatformError> {
        fs::create_dir_all(dest_dir).map_err(|e| FilePlatformError::io(dest_dir, e))?;
        for asset in collection.assets.iter_mut() {
            let checksum = self.stage(asset)?;
            let dest = dest_dir.join(asset.key());
            if dest.exists() {
                continue;
            }
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent).map_err(|e| FilePlatformError::io(parent, e))?;
            }
            self.materialize(&self.layout.store_path(&checksum), &dest)?;
        }
        Ok(())
    }

    /// Make the shared experiment `Assets` directory visible inside a
    /// simulation directory.
    pub fn link_common_assets(
        &self,
        experiment_dir: &Path,
        simulation_dir: &Path,
    ) -> Result<(), FilePlatformError> {
        let source = experiment_dir.join(ASSETS_DIR);
        if !source.is_dir() {
            return Ok(());
        }
        let dest = simulation_dir.join(ASSETS_DIR);
        if dest.exists() {
            return Ok(());
        }
        if self.sym_link {
            symlink_dir(&source, &dest)
        } else {
            copy_tree(&source, &dest)
        }
    }

    fn materialize(&self, stored: &Path, dest: &Path) -> Result<(), FilePlatformError> {
        if self.sym_link {
            symlink_file(stored, dest)
        } else {
            fs::copy(stored, dest)
                .map(|_| ())
                .map_err(|e| FilePlatformError::io(dest, e))
        }
    }
}

#[cfg(unix)]
fn symlink_file(source: &Path, dest: &Path) -> Result<(), FilePlatformError> {
    std::os::unix::fs::symlink(source, dest).map_err(|e| FilePlatformError::io(dest, e))
}

#[cfg(unix)]
fn symlink_dir(source: &Path, dest: &Path) -> Result<(), FilePlatformError> {
    std::os::unix::fs::symlink(source, dest).map_err(|e| FilePlatformError::io(dest, e))
}

#[cfg(not(unix))]
fn symlink_file(source: &Path, dest: &Path) -> Result<(), FilePlatformError> {
    fs::copy(source, dest)
        .map(|_| ())
        .map_err(|e| FilePlatformError::io(dest, e))
}

#[cfg(not(unix))]
fn symlink_dir(source: &Path, dest: &Path) -> Result<(), FilePlatformError> {
    copy_tree(source, dest)
}

fn copy_tree(source: &Path, dest: &Path) -> Result<(), FilePlatformError> {
    fs::create_dir_all(dest).map_err(|e| FilePlatformError::io(dest, e))?;
    let entries = fs::read_dir(source).map_err(|e| FilePlatformError::io(source, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| FilePlatformError::io(source, e))?;
        let from = entry.path();
        let to = dest.join(entry.file_name());
        if from.is_dir() {
            copy_tree(&from, &to)?;
        } else {
            fs::copy(&from, &to).map_err(|e| FilePlatformError::io(&to, e))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_content_is_stored_once() {
        let dir = tempfile::tempdir().unwrap();
        let layout = FileLayout::new(dir.path());
        let stager = AssetStager::new(layout.clone(), true);

        let mut first = Asset::from_bytes("", "a.txt", b"same".to_vec());
        let mut second = Asset::from_bytes("sub", "b.txt", b"same".to_vec());
        let checksum_a = stager.stage(&mut first).unwrap();
        let checksum_b = stager.stage(&mut second).unwrap();
        assert_eq!(checksum_a, checksum_b);
        assert!(layout.store_path(&checksum_a).is_file());
    }

    #[test]
    fn staging_a_collection_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let stager = AssetStager::new(FileLayout::new(dir.path().join("jobs")), true);
        let dest = dir.path().join("jobs/exp/Assets");

        let mut collection = AssetCollection::new();
        collection.put_asset(Asset::from_bytes("", "model.py", b"print()".to_vec()));
        collection.put_asset(Asset::from_bytes("data", "input.csv", b"1,2".to_vec()));

        stager.stage_collection(&mut collection, &dest).unwrap();
        stager.stage_collection(&mut collection, &dest).unwrap();
        assert!(dest.join("model.py").exists());
        assert!(dest.join("data/input.csv").exists());
        assert_eq!(fs::read(dest.join("data/input.csv")).unwrap(), b"1,2");
    }

    #[test]
    fn copy_mode_materializes_real_files() {
        let dir = tempfile::tempdir().unwrap();
        let stager = AssetStager::new(FileLayout::new(dir.path().join("jobs")), false);
        let dest = dir.path().join("jobs/exp/Assets");

        let mut collection = AssetCollection::new();
        collection.put_asset(Asset::from_bytes("", "model.py", b"print()".to_vec()));
        stager.stage_collection(&mut collection, &dest).unwrap();

        let staged = dest.join("model.py");
        assert!(staged.is_file());
        assert!(!fs::symlink_metadata(&staged).unwrap().file_type().is_symlink());
    }
}
