use crate::error::ValidationError;
use crate::tags::Tags;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Where an asset's bytes come from.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub enum AssetContent {
    /// Bytes held in memory, e.g. a rendered parameter config.
    Bytes(Vec<u8>),
    /// A file on the submitting host, read when the asset is staged.
    SourceFile(PathBuf),
}

/// An immutable file reference: a relative layout position plus content.
///
/// The checksum is computed lazily and cached; once an asset is part of a
/// persisted collection neither path nor content may change.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct Asset {
    /// Directory part of the staged location, relative to the asset root.
    /// Empty for top-level files.
    pub relative_path: String,
    pub filename: String,
    pub content: AssetContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    checksum: Option<String>,
}

impl Asset {
    pub fn from_bytes(
        relative_path: impl Into<String>,
        filename: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            relative_path: relative_path.into(),
            filename: filename.into(),
            content: AssetContent::Bytes(bytes.into()),
            checksum: None,
        }
    }

    /// Reference a file on disk. The filename is taken from the path.
    pub fn from_file(source: impl Into<PathBuf>) -> Self {
        let source = source.into();
        let filename = source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            relative_path: String::new(),
            filename,
            content: AssetContent::SourceFile(source),
            checksum: None,
        }
    }

    pub fn with_relative_path(mut self, relative_path: impl Into<String>) -> Self {
        self.relative_path = relative_path.into();
        self
    }

    /// Staged location relative to the asset root.
    pub fn key(&self) -> String {
        if self.relative_path.is_empty() {
            self.filename.clone()
        } else {
            format!("{}/{}", self.relative_path.trim_end_matches('/'), self.filename)
        }
    }

    /// Read the asset bytes, from memory or from the source file.
    pub fn bytes(&self) -> io::Result<Vec<u8>> {
        match &self.content {
            AssetContent::Bytes(bytes) => Ok(bytes.clone()),
            AssetContent::SourceFile(path) => fs::read(path),
        }
    }

    /// sha256 of the content, cached after the first computation.
    pub fn checksum(&mut self) -> io::Result<&str> {
        if self.checksum.is_none() {
            let digest = match &self.content {
                AssetContent::Bytes(bytes) => sha256_bytes(bytes),
                AssetContent::SourceFile(path) => sha256_file(path)?,
            };
            self.checksum = Some(digest);
        }
        Ok(self.checksum.as_deref().unwrap_or_default())
    }

    /// Checksum if it has already been computed or persisted.
    pub fn known_checksum(&self) -> Option<&str> {
        self.checksum.as_deref()
    }
}

pub fn sha256_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut file = fs::File::open(path)?;
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// A shared, content-addressed bag of files.
///
/// Collections compare by checksum set so backends can deduplicate uploads:
/// two collections with identical content fingerprints stage at most one
/// physical copy per backend session.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct AssetCollection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Tags::is_empty")]
    pub tags: Tags,
    #[serde(default)]
    pub assets: Vec<Asset>,
}

impl AssetCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Asset> {
        self.assets.iter()
    }

    /// Add an asset, refusing duplicates of the same staged location.
    pub fn add_asset(&mut self, asset: Asset) -> Result<(), ValidationError> {
        let key = asset.key();
        if self.assets.iter().any(|existing| existing.key() == key) {
            return Err(ValidationError::DuplicateAsset(key));
        }
        self.assets.push(asset);
        Ok(())
    }

    /// Add or replace the asset at the same staged location.
    pub fn put_asset(&mut self, asset: Asset) {
        let key = asset.key();
        self.assets.retain(|existing| existing.key() != key);
        self.assets.push(asset);
    }

    pub fn find(&self, key: &str) -> Option<&Asset> {
        self.assets.iter().find(|asset| asset.key() == key)
    }

    /// Add every file directly under `directory` (non-recursive) as an asset.
    pub fn add_directory(&mut self, directory: &Path) -> Result<(), ValidationError> {
        let entries = fs::read_dir(directory)
            .map_err(|e| ValidationError::Invalid(format!("cannot read {directory:?}: {e}")))?;
        for entry in entries {
            let entry =
                entry.map_err(|e| ValidationError::Invalid(format!("cannot read entry: {e}")))?;
            if entry.path().is_file() {
                self.add_asset(Asset::from_file(entry.path()))?;
            }
        }
        Ok(())
    }

    /// The ordered checksum set identifying this collection's content.
    pub fn fingerprint(&mut self) -> io::Result<BTreeSet<String>> {
        let mut set = BTreeSet::new();
        for asset in self.assets.iter_mut() {
            set.insert(asset.checksum()?.to_owned());
        }
        Ok(set)
    }

    /// Merge another collection in, ignoring entries already present.
    pub fn extend(&mut self, other: &AssetCollection) {
        for asset in other.iter() {
            if self.find(&asset.key()).is_none() {
                self.assets.push(asset.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_joins_relative_path() {
        let asset = Asset::from_bytes("output", "result.txt", b"x".to_vec());
        assert_eq!(asset.key(), "output/result.txt");
        let top = Asset::from_bytes("", "config.json", b"{}".to_vec());
        assert_eq!(top.key(), "config.json");
    }

    #[test]
    fn checksum_is_cached_and_stable() {
        let mut a = Asset::from_bytes("", "a.txt", b"hello".to_vec());
        let mut b = Asset::from_bytes("other", "b.txt", b"hello".to_vec());
        let first = a.checksum().unwrap().to_owned();
        assert_eq!(first, b.checksum().unwrap());
        assert_eq!(a.known_checksum(), Some(first.as_str()));
    }

    #[test]
    fn duplicate_assets_are_refused() {
        let mut collection = AssetCollection::new();
        collection
            .add_asset(Asset::from_bytes("", "a.txt", b"1".to_vec()))
            .unwrap();
        let err = collection
            .add_asset(Asset::from_bytes("", "a.txt", b"2".to_vec()))
            .unwrap_err();
        assert!(matches!(err, ValidationError::DuplicateAsset(_)));
    }

    #[test]
    fn identical_content_has_identical_fingerprint() {
        let mut left = AssetCollection::new();
        left.put_asset(Asset::from_bytes("", "a.txt", b"same".to_vec()));
        let mut right = AssetCollection::new();
        right.put_asset(Asset::from_bytes("sub", "b.txt", b"same".to_vec()));
        assert_eq!(left.fingerprint().unwrap(), right.fingerprint().unwrap());
    }

    #[test]
    fn file_assets_hash_their_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.bin");
        fs::write(&path, b"weights").unwrap();
        let mut from_file = Asset::from_file(&path);
        let mut from_bytes = Asset::from_bytes("", "model.bin", b"weights".to_vec());
        assert_eq!(
            from_file.checksum().unwrap(),
            from_bytes.checksum().unwrap()
        );
        assert_eq!(from_file.filename, "model.bin");
    }
}
