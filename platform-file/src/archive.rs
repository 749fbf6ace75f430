//! Experiment archiving: pack a whole experiment directory into a single
//! `simulations.zip` next to its metadata, preserving the relative layout.

use crate::error::FilePlatformError;
use crate::layout::{self, ARCHIVE_FILE};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;
use zip::write::FileOptions;
use zip::ZipWriter;

/// Zip everything under `experiment_dir` into `simulations.zip`, returning
/// the archive path. An existing archive is replaced, never nested.
pub fn archive_experiment(experiment_dir: &Path) -> Result<PathBuf, FilePlatformError> {
    let archive_path = experiment_dir.join(ARCHIVE_FILE);
    let file = File::create(&archive_path).map_err(|e| FilePlatformError::io(&archive_path, e))?;
    let mut writer = ZipWriter::new(file);
    let options = FileOptions::default();

    let mut packed = 0usize;
    for relative in layout::list_files(experiment_dir)? {
        if relative == ARCHIVE_FILE {
            continue;
        }
        let source = experiment_dir.join(&relative);
        let bytes = fs::read(&source).map_err(|e| FilePlatformError::io(&source, e))?;
        writer
            .start_file(&relative, options)
            .map_err(|e| zip_err(&archive_path, e))?;
        writer
            .write_all(&bytes)
            .map_err(|e| FilePlatformError::io(&archive_path, e))?;
        packed += 1;
    }
    writer.finish().map_err(|e| zip_err(&archive_path, e))?;
    info!(archive = ?archive_path, files = packed, "Archived experiment");
    Ok(archive_path)
}

fn zip_err(path: &Path, err: zip::result::ZipError) -> FilePlatformError {
    FilePlatformError::io(
        path,
        std::io::Error::new(std::io::ErrorKind::Other, err.to_string()),
    )
}
