//! Content-addressed stores
//!
//! Three stores share one layout rule: a key is turned into a list of path
//! segments which are joined under the store root.
//!
//! ## Storage Layout
//!
//! Blob and exploded-directory keys are fingerprints, sharded by their first
//! two and next two characters:
//! ```text
//! blob/
//!   a3/
//!     f2/
//!       a3f2e1d4c5b6a7... (full fingerprint as file name)
//! explode/
//!   b7/
//!     e1/
//!       b7e145a3b2c9d8.../ (mirrored archive tree)
//! ```
//!
//! Replica keys are already-resolved path segments taken from a replica
//! template, so the replica namespace stays human-navigable.
//!
//! Dedup relies on hardlinks, so every store root must live on the same
//! filesystem as the staging area.

use crate::error::{AppError, Result};
use crate::storage::fingerprint::Fingerprint;
use crate::utils::path::link_count;
use serde::Serialize;
use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Which namespace a [`ContentStore`] serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Blob,
    Dir,
    Replica,
}

/// Lookup key for a store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreKey {
    Fingerprint(Fingerprint),
    Segments(Vec<String>),
}

impl From<Fingerprint> for StoreKey {
    fn from(value: Fingerprint) -> Self {
        StoreKey::Fingerprint(value)
    }
}

impl From<&Fingerprint> for StoreKey {
    fn from(value: &Fingerprint) -> Self {
        StoreKey::Fingerprint(value.clone())
    }
}

impl From<Vec<String>> for StoreKey {
    fn from(value: Vec<String>) -> Self {
        StoreKey::Segments(value)
    }
}

impl TryFrom<&str> for StoreKey {
    type Error = AppError;

    fn try_from(value: &str) -> Result<Self> {
        Fingerprint::parse(value).map(StoreKey::Fingerprint)
    }
}

/// Outcome of linking content into the blob store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retention {
    /// A new link was created at the destination
    Created,
    /// The destination already held this content; `links` is its link count
    Existing { links: u64 },
}

/// A sharded store rooted at one directory
#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
    kind: StoreKind,
}

impl ContentStore {
    pub fn new(root: impl Into<PathBuf>, kind: StoreKind) -> Self {
        Self {
            root: root.into(),
            kind,
        }
    }

    pub fn blob(root: impl Into<PathBuf>) -> Self {
        Self::new(root, StoreKind::Blob)
    }

    pub fn dir(root: impl Into<PathBuf>) -> Self {
        Self::new(root, StoreKind::Dir)
    }

    pub fn replica(root: impl Into<PathBuf>) -> Self {
        Self::new(root, StoreKind::Replica)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn kind(&self) -> StoreKind {
        self.kind
    }

    /// Path segments for a key
    ///
    /// Blob/Dir: `[f[0:2], f[2:4], f]`. Replica: the segments themselves,
    /// each of which must be a single, non-empty, non-dot path component.
    pub fn route(&self, key: &StoreKey) -> Result<Vec<String>> {
        match (self.kind, key) {
            (StoreKind::Blob | StoreKind::Dir, StoreKey::Fingerprint(fp)) => {
                Ok(fp.shards().iter().map(|s| s.to_string()).collect())
            }
            (StoreKind::Blob | StoreKind::Dir, StoreKey::Segments(_)) => Err(
                AppError::invalid_argument(format!("{:?} store keys must be fingerprints", self.kind)),
            ),
            (StoreKind::Replica, StoreKey::Segments(segments)) => {
                if segments.is_empty() {
                    return Err(AppError::invalid_argument("Replica key has no segments"));
                }
                for segment in segments {
                    validate_segment(segment)?;
                }
                Ok(segments.clone())
            }
            (StoreKind::Replica, StoreKey::Fingerprint(_)) => Err(AppError::invalid_argument(
                "Replica store keys must be path segments",
            )),
        }
    }

    pub fn destination(&self, key: &StoreKey) -> Result<PathBuf> {
        let mut path = self.root.clone();
        path.extend(self.route(key)?);
        Ok(path)
    }

    /// Create every directory leading to the destination
    ///
    /// For the blob store that is the parent of the blob file, for the
    /// directory stores the destination directory itself. Safe to call
    /// concurrently for the same key.
    pub fn ensure_writeable(&self, key: &StoreKey) -> Result<PathBuf> {
        let destination = self.destination(key)?;
        let directory = match self.kind {
            StoreKind::Blob => destination.parent().unwrap_or(&self.root).to_path_buf(),
            StoreKind::Dir | StoreKind::Replica => destination.clone(),
        };
        fs::create_dir_all(&directory).map_err(|e| {
            AppError::io_error(
                format!("Failed to create store directory: {}", e),
                Some(directory.clone()),
            )
        })?;
        Ok(destination)
    }

    /// Blob: the destination file exists. Dir/Replica: the destination is a
    /// non-empty directory.
    pub fn exists(&self, key: &StoreKey) -> Result<bool> {
        let destination = self.destination(key)?;
        match self.kind {
            StoreKind::Blob => Ok(destination.is_file()),
            StoreKind::Dir | StoreKind::Replica if !destination.is_dir() => Ok(false),
            StoreKind::Dir | StoreKind::Replica => match fs::read_dir(&destination) {
                Ok(mut entries) => Ok(entries.next().is_some()),
                Err(e) if e.kind() == IoErrorKind::NotFound => Ok(false),
                Err(e) => Err(AppError::io_error(
                    format!("Failed to inspect store directory: {}", e),
                    Some(destination),
                )),
            },
        }
    }

    /// Hardlink `source` into the store at `key` unless the content is
    /// already present
    ///
    /// A link that fails because a concurrent upload created the destination
    /// first counts as success.
    pub fn retain_hardlink(&self, source: &Path, key: &StoreKey) -> Result<(PathBuf, Retention)> {
        let destination = self.destination(key)?;
        if destination.exists() {
            let links = link_count(&destination)?;
            return Ok((destination, Retention::Existing { links }));
        }

        self.ensure_writeable(key)?;
        let retention = self.link_into(source, &destination)?;
        Ok((destination, retention))
    }

    /// Link `source` to `destination` with no existence pre-check
    ///
    /// `AlreadyExists` with a destination in place means another upload won
    /// the race and resolves to [`Retention::Existing`].
    fn link_into(&self, source: &Path, destination: &Path) -> Result<Retention> {
        match fs::hard_link(source, destination) {
            Ok(()) => {
                debug!(
                    source = %source.display(),
                    destination = %destination.display(),
                    "Linked content into store"
                );
                Ok(Retention::Created)
            }
            Err(e) if e.kind() == IoErrorKind::AlreadyExists && destination.exists() => {
                debug!(
                    destination = %destination.display(),
                    "Lost hardlink race, content already stored"
                );
                let links = link_count(destination)?;
                Ok(Retention::Existing { links })
            }
            Err(e) => Err(AppError::io_error(
                format!("Failed to link into {:?} store: {}", self.kind, e),
                Some(destination.to_path_buf()),
            )),
        }
    }
}

fn validate_segment(segment: &str) -> Result<()> {
    let unsafe_segment = segment.is_empty()
        || segment == "."
        || segment == ".."
        || segment.contains('/')
        || segment.contains('\\')
        || segment.contains('\0');
    if unsafe_segment {
        return Err(AppError::invalid_argument(format!(
            "'{}' is not a valid replica path segment",
            segment
        )));
    }
    Ok(())
}
