//! Archive explosion stage
//!
//! Extracts a tar or zip archive into staging, fingerprints every member and
//! mirrors the tree into the directory store. Each file in the mirrored tree
//! is a hardlink to its blob, so exploded content shares storage with plain
//! uploads of the same bytes.

use super::lifecycle::{Lifecycle, StageCore};
use super::StageKind;
use crate::archive::{mime, ArchiveFormat};
use crate::error::{AppError, Result};
use crate::pipeline::context::BucketContext;
use crate::storage::{StoreKey, TreeFingerprints};
use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

#[derive(Debug)]
pub struct ArchiveStage {
    core: StageCore,
    source: PathBuf,
    tree: TreeFingerprints,
}

impl ArchiveStage {
    pub fn new(ctx: Arc<BucketContext>, source: impl Into<PathBuf>, name: &str) -> Result<Self> {
        let core = StageCore::new(ctx, StageKind::Archive, name.to_string())?;
        Ok(Self {
            core,
            source: source.into(),
            tree: TreeFingerprints::default(),
        })
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Member fingerprints collected during inspection
    pub fn tree(&self) -> &TreeFingerprints {
        &self.tree
    }

    fn archive_key(&self) -> Result<StoreKey> {
        self.core
            .fingerprint
            .as_ref()
            .map(StoreKey::from)
            .ok_or_else(|| AppError::invalid_argument("Archive has not been fingerprinted"))
    }

    /// Recreate the staged directory layout below `destination`
    fn mirror_directories(&mut self, destination: &Path) -> Result<()> {
        let staging = self.core.staging.path().to_path_buf();
        for entry in WalkDir::new(&staging).follow_links(false).min_depth(1) {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf);
                AppError::io_error(format!("Failed to walk staging tree: {}", e), path)
            })?;
            let relative = entry.path().strip_prefix(&staging).map_err(|_| {
                AppError::io_error("Walked outside of staging", Some(entry.path().to_path_buf()))
            })?;

            if entry.file_type().is_dir() {
                let mirrored = destination.join(relative);
                fs::create_dir_all(&mirrored).map_err(|e| {
                    AppError::io_error(
                        format!("Failed to create exploded directory: {}", e),
                        Some(mirrored.clone()),
                    )
                })?;
                continue;
            }

            let key = relative.to_string_lossy().replace('\\', "/");
            if !self.tree.entries.contains_key(&key) {
                self.core
                    .log
                    .warning(format!("No checksum for '{}', not retained", key));
            }
        }
        Ok(())
    }

    /// Link one member into the blob store and from there into the tree
    fn retain_member(&mut self, destination: &Path, relative: &str) -> Result<()> {
        let Some(fingerprint) = self.tree.entries.get(relative).cloned() else {
            return Ok(());
        };
        let staged = self.core.staging.join(relative);
        let (blob, _) = self
            .core
            .ctx
            .blobs()
            .retain_hardlink(&staged, &StoreKey::from(&fingerprint))?;

        if !link_into_tree(&blob, &destination.join(relative))? {
            self.core
                .log
                .debug(format!("'{}' already present in exploded tree", relative));
        }
        Ok(())
    }
}

/// Hardlink a blob into the mirrored tree, returning `false` when a
/// concurrent explosion of the same archive already placed it
fn link_into_tree(blob: &Path, mirrored: &Path) -> Result<bool> {
    match fs::hard_link(blob, mirrored) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == IoErrorKind::AlreadyExists && mirrored.is_file() => Ok(false),
        Err(e) => Err(AppError::io_error(
            format!("Failed to link blob into exploded tree: {}", e),
            Some(mirrored.to_path_buf()),
        )),
    }
}

impl Lifecycle for ArchiveStage {
    fn core(&self) -> &StageCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StageCore {
        &mut self.core
    }

    fn failure_context(&self) -> &'static str {
        "Failed to explode archive"
    }

    fn setup(&mut self) -> Result<()> {
        let ctx = Arc::clone(&self.core.ctx);
        let fingerprint =
            ctx.checksums()
                .fingerprint(&self.source, ctx.algorithm(), ctx.block_size())?;
        let detected = mime::sniff(&self.source)?;
        if let Some(format) = ArchiveFormat::from_mime(&detected) {
            self.core.name = format.exploded_name(&self.core.name);
        }
        self.core.log.info(format!(
            "Archive '{}': {} {} ({})",
            self.source.display(),
            ctx.algorithm(),
            fingerprint,
            detected
        ));

        let key = StoreKey::from(&fingerprint);
        self.core.fingerprint = Some(fingerprint);
        self.core.mime = Some(detected);

        if ctx.dirs().exists(&key)? {
            let destination = ctx.dirs().destination(&key)?;
            self.core.log.info(format!(
                "Archive already exploded at '{}'",
                destination.display()
            ));
            self.core.path = Some(destination);
            self.core.short_circuit = true;
        }
        Ok(())
    }

    fn unpack(&mut self) -> Result<()> {
        let detected = self.core.mime.clone().unwrap_or_default();
        let format =
            ArchiveFormat::from_mime(&detected).ok_or_else(|| AppError::UnsupportedContentType {
                mime: detected.clone(),
                path: self.source.clone(),
            })?;

        let handler = format.handler();
        let summary = handler.extract(&self.source, self.core.staging.path())?;
        self.core.log.info(format!(
            "Extracted {} file(s), {} dir(s), {} link(s) with {} handler ({} bytes)",
            summary.files_extracted,
            summary.directories,
            summary.links,
            handler.name(),
            summary.total_size
        ));
        Ok(())
    }

    fn inspect(&mut self) -> Result<()> {
        let ctx = Arc::clone(&self.core.ctx);
        let tree = ctx.checksums().fingerprint_tree(
            self.core.staging.path(),
            ctx.algorithm(),
            ctx.block_size(),
        )?;

        self.core.log.info(format!(
            "Fingerprinted {} member(s), {} non-regular",
            tree.entries.len(),
            tree.omitted.len()
        ));
        self.tree = tree;
        Ok(())
    }

    fn store(&mut self) -> Result<()> {
        let key = self.archive_key()?;
        let destination = self.core.ctx.dirs().ensure_writeable(&key)?;

        self.mirror_directories(&destination)?;

        let members: BTreeSet<String> = self.tree.entries.keys().cloned().collect();
        for relative in &members {
            self.retain_member(&destination, relative)?;
        }

        self.core.log.info(format!(
            "Exploded {} member(s) into '{}'",
            members.len(),
            destination.display()
        ));
        self.core.path = Some(destination);
        Ok(())
    }

    fn cleanup(&mut self) -> Result<()> {
        self.core.staging.remove_all()?;
        self.core.log.debug("Staging tree removed");
        Ok(())
    }
}
