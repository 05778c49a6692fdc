//! Shared, validated runtime state for every upload
//!
//! Built once from a [`BucketConfig`] and shared between workers through an
//! `Arc`. The checksum cache inside is the only mutable state it holds.

use crate::error::{AppError, Result};
use crate::infrastructure::config::BucketConfig;
use crate::models::replica::ReplicaTemplate;
use crate::storage::{
    probe_capacity, ChecksumAlgorithm, ChecksumCache, ChecksumEngine, ContentStore, DiskCapacity,
};
use crate::utils::path::{join_uri, relative_path};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Debug)]
pub struct BucketContext {
    archive_dir: PathBuf,
    algorithm: ChecksumAlgorithm,
    block_size: usize,
    archive_uri: Option<String>,
    staging_root: PathBuf,
    blobs: ContentStore,
    dirs: ContentStore,
    replicas: ContentStore,
    templates: Vec<ReplicaTemplate>,
    checksums: ChecksumEngine,
}

impl BucketContext {
    /// Validate the configuration and create the store roots
    pub fn from_config(config: &BucketConfig) -> Result<Self> {
        Self::with_cache(config, Arc::new(ChecksumCache::new()))
    }

    /// Like [`from_config`](Self::from_config) but sharing an existing cache
    pub fn with_cache(config: &BucketConfig, cache: Arc<ChecksumCache>) -> Result<Self> {
        config.validate_all()?;

        let algorithm: ChecksumAlgorithm = config.checksum_type.parse()?;
        let templates = config
            .replicates
            .iter()
            .map(|t| ReplicaTemplate::parse(t))
            .collect::<Result<Vec<_>>>()?;

        if config.archive_dir.exists() && !config.archive_dir.is_dir() {
            return Err(AppError::config_error(format!(
                "Archive directory '{}' exists but is not a directory",
                config.archive_dir.display()
            )));
        }
        create_root(&config.archive_dir)?;
        let archive_dir = config.archive_dir.canonicalize().map_err(|e| {
            AppError::io_error(
                format!("Failed to resolve archive directory: {}", e),
                Some(config.archive_dir.clone()),
            )
        })?;

        let staging_root = archive_dir.join("staging");
        let blob_root = archive_dir.join("blob");
        let explode_root = archive_dir.join("explode");
        let replica_root = archive_dir.join("replica");
        for root in [&staging_root, &blob_root, &explode_root, &replica_root] {
            create_root(root)?;
        }

        info!(
            archive_dir = %archive_dir.display(),
            algorithm = %algorithm,
            templates = templates.len(),
            "Bucket context initialized"
        );

        Ok(Self {
            archive_dir,
            algorithm,
            block_size: config.block_size,
            archive_uri: config.archive_uri.clone(),
            staging_root,
            blobs: ContentStore::blob(blob_root),
            dirs: ContentStore::dir(explode_root),
            replicas: ContentStore::replica(replica_root),
            templates,
            checksums: ChecksumEngine::new(cache),
        })
    }

    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }

    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn staging_root(&self) -> &Path {
        &self.staging_root
    }

    pub fn blobs(&self) -> &ContentStore {
        &self.blobs
    }

    pub fn dirs(&self) -> &ContentStore {
        &self.dirs
    }

    pub fn replicas(&self) -> &ContentStore {
        &self.replicas
    }

    pub fn templates(&self) -> &[ReplicaTemplate] {
        &self.templates
    }

    pub fn checksums(&self) -> &ChecksumEngine {
        &self.checksums
    }

    /// Available space and inodes on the archive filesystem
    pub fn capacity(&self) -> Result<DiskCapacity> {
        probe_capacity(&self.archive_dir)
    }

    /// Path relative to the archive directory
    pub fn relative_path(&self, path: &Path) -> Option<String> {
        relative_path(&self.archive_dir, path)
    }

    /// URI when a public base URI is configured, else the relative path
    pub fn public_path(&self, path: &Path) -> Option<String> {
        let relative = self.relative_path(path)?;
        Some(match &self.archive_uri {
            Some(base) => join_uri(base, &relative),
            None => relative,
        })
    }
}

fn create_root(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|e| {
        AppError::io_error(
            format!("Failed to create store root: {}", e),
            Some(path.to_path_buf()),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    #[test]
    fn test_from_config_creates_roots() {
        let temp_dir = TempDir::new().unwrap();
        let config = BucketConfig::new(temp_dir.path().join("bucket"));

        let ctx = BucketContext::from_config(&config).unwrap();

        for name in ["staging", "blob", "explode", "replica"] {
            assert!(ctx.archive_dir().join(name).is_dir(), "{} missing", name);
        }
        assert_eq!(ctx.algorithm(), ChecksumAlgorithm::Blake3);
        assert!(ctx.capacity().unwrap().available_bytes > 0);
    }

    #[test]
    fn test_rejects_unknown_algorithm() {
        let temp_dir = TempDir::new().unwrap();
        let config = BucketConfig::new(temp_dir.path()).with_checksum_type("crc32");

        let err = BucketContext::from_config(&config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedAlgorithm);
    }

    #[test]
    fn test_rejects_invalid_template() {
        let temp_dir = TempDir::new().unwrap();
        let config = BucketConfig::new(temp_dir.path()).with_replicate("no/tokens/here");

        let err = BucketContext::from_config(&config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_rejects_file_as_archive_dir() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("file");
        fs::write(&file, b"x").unwrap();

        let err = BucketContext::from_config(&BucketConfig::new(&file)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_public_path() {
        let temp_dir = TempDir::new().unwrap();
        let plain = BucketContext::from_config(&BucketConfig::new(temp_dir.path())).unwrap();
        let blob = plain.archive_dir().join("blob/ab/cd/abcdef01");
        assert_eq!(plain.public_path(&blob).as_deref(), Some("blob/ab/cd/abcdef01"));

        let with_uri = BucketContext::from_config(
            &BucketConfig::new(temp_dir.path()).with_archive_uri("https://files.example.com/"),
        )
        .unwrap();
        assert_eq!(
            with_uri.public_path(&blob).as_deref(),
            Some("https://files.example.com/blob/ab/cd/abcdef01")
        );
        assert_eq!(with_uri.public_path(Path::new("/elsewhere")), None);
    }
}
