//! Checksum engine with an mtime-validated fingerprint cache
//!
//! Files are hashed block-wise with the configured algorithm. Results are
//! cached per file identity (`device:inode` on unix, the canonical path
//! elsewhere) and are only reused while the file's modification time and
//! size are unchanged. The cache is an optimization: a miss always falls
//! back to reading the file.

use crate::error::{AppError, Result};
use crate::storage::fingerprint::Fingerprint;
use dashmap::DashMap;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File, Metadata};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Default read block size (64 KiB)
pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

/// Supported digest algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    #[default]
    Blake3,
    Md5,
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl ChecksumAlgorithm {
    pub const ALL: [ChecksumAlgorithm; 7] = [
        ChecksumAlgorithm::Blake3,
        ChecksumAlgorithm::Md5,
        ChecksumAlgorithm::Sha1,
        ChecksumAlgorithm::Sha224,
        ChecksumAlgorithm::Sha256,
        ChecksumAlgorithm::Sha384,
        ChecksumAlgorithm::Sha512,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ChecksumAlgorithm::Blake3 => "blake3",
            ChecksumAlgorithm::Md5 => "md5",
            ChecksumAlgorithm::Sha1 => "sha1",
            ChecksumAlgorithm::Sha224 => "sha224",
            ChecksumAlgorithm::Sha256 => "sha256",
            ChecksumAlgorithm::Sha384 => "sha384",
            ChecksumAlgorithm::Sha512 => "sha512",
        }
    }

    fn hasher(&self) -> Hasher {
        match self {
            ChecksumAlgorithm::Blake3 => Hasher::Blake3(Box::new(blake3::Hasher::new())),
            ChecksumAlgorithm::Md5 => Hasher::Md5(Md5::new()),
            ChecksumAlgorithm::Sha1 => Hasher::Sha1(Sha1::new()),
            ChecksumAlgorithm::Sha224 => Hasher::Sha224(Sha224::new()),
            ChecksumAlgorithm::Sha256 => Hasher::Sha256(Sha256::new()),
            ChecksumAlgorithm::Sha384 => Hasher::Sha384(Sha384::new()),
            ChecksumAlgorithm::Sha512 => Hasher::Sha512(Sha512::new()),
        }
    }

    /// Digest an in-memory buffer
    ///
    /// Produces the same value [`ChecksumEngine::fingerprint`] would produce
    /// for a file with this content.
    pub fn digest(&self, content: &[u8]) -> Fingerprint {
        let mut hasher = self.hasher();
        hasher.update(content);
        hasher.finalize()
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim();
        if name.is_empty() {
            return Err(AppError::invalid_argument("Checksum algorithm name is empty"));
        }
        Self::ALL
            .into_iter()
            .find(|alg| alg.name().eq_ignore_ascii_case(name))
            .ok_or_else(|| AppError::UnsupportedAlgorithm(name.to_string()))
    }
}

enum Hasher {
    Blake3(Box<blake3::Hasher>),
    Md5(Md5),
    Sha1(Sha1),
    Sha224(Sha224),
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

impl Hasher {
    fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Blake3(h) => {
                h.update(data);
            }
            Hasher::Md5(h) => h.update(data),
            Hasher::Sha1(h) => h.update(data),
            Hasher::Sha224(h) => h.update(data),
            Hasher::Sha256(h) => h.update(data),
            Hasher::Sha384(h) => h.update(data),
            Hasher::Sha512(h) => h.update(data),
        }
    }

    fn finalize(self) -> Fingerprint {
        let hex = match self {
            Hasher::Blake3(h) => h.finalize().to_hex().to_string(),
            Hasher::Md5(h) => format!("{:x}", h.finalize()),
            Hasher::Sha1(h) => format!("{:x}", h.finalize()),
            Hasher::Sha224(h) => format!("{:x}", h.finalize()),
            Hasher::Sha256(h) => format!("{:x}", h.finalize()),
            Hasher::Sha384(h) => format!("{:x}", h.finalize()),
            Hasher::Sha512(h) => format!("{:x}", h.finalize()),
        };
        Fingerprint::from_digest(hex)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum FileIdentity {
    #[cfg_attr(not(unix), allow(dead_code))]
    Inode { dev: u64, ino: u64 },
    #[cfg_attr(unix, allow(dead_code))]
    Path(PathBuf),
}

impl FileIdentity {
    #[cfg(unix)]
    fn of(_path: &Path, metadata: &Metadata) -> Result<Self> {
        use std::os::unix::fs::MetadataExt;
        Ok(FileIdentity::Inode {
            dev: metadata.dev(),
            ino: metadata.ino(),
        })
    }

    #[cfg(not(unix))]
    fn of(path: &Path, _metadata: &Metadata) -> Result<Self> {
        let canonical = path.canonicalize().map_err(|e| {
            AppError::io_error(
                format!("Failed to resolve path: {}", e),
                Some(path.to_path_buf()),
            )
        })?;
        Ok(FileIdentity::Path(canonical))
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    modified: SystemTime,
    len: u64,
    fingerprint: Fingerprint,
}

/// Process-wide fingerprint cache
///
/// Shared between uploads through an `Arc`; DashMap shards keep concurrent
/// lookups from different workers cheap. Only the most recent mtime is kept
/// per identity.
#[derive(Debug, Default)]
pub struct ChecksumCache {
    entries: DashMap<(ChecksumAlgorithm, FileIdentity), CacheEntry>,
}

impl ChecksumCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lookup(
        &self,
        algorithm: ChecksumAlgorithm,
        identity: &FileIdentity,
        modified: SystemTime,
        len: u64,
    ) -> Option<Fingerprint> {
        let entry = self.entries.get(&(algorithm, identity.clone()))?;
        if entry.modified == modified && entry.len == len {
            Some(entry.fingerprint.clone())
        } else {
            None
        }
    }

    fn insert(&self, algorithm: ChecksumAlgorithm, identity: FileIdentity, entry: CacheEntry) {
        self.entries.insert((algorithm, identity), entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

/// Result of hashing a directory tree
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeFingerprints {
    /// Forward-slash relative path -> fingerprint, regular files only
    pub entries: BTreeMap<String, Fingerprint>,
    /// Relative paths that were skipped (symlinks, special files, non UTF-8 names)
    pub omitted: Vec<String>,
}

/// Computes fingerprints for files and directory trees
#[derive(Debug)]
pub struct ChecksumEngine {
    cache: Arc<ChecksumCache>,
    computations: AtomicU64,
}

impl ChecksumEngine {
    pub fn new(cache: Arc<ChecksumCache>) -> Self {
        Self {
            cache,
            computations: AtomicU64::new(0),
        }
    }

    pub fn cache(&self) -> &Arc<ChecksumCache> {
        &self.cache
    }

    /// Number of files actually read and hashed (cache misses)
    pub fn computations(&self) -> u64 {
        self.computations.load(Ordering::Relaxed)
    }

    /// Fingerprint a single regular file
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for an empty path, a zero block size or a path
    ///   that is not a regular file
    /// - `IOError` when the file cannot be read
    pub fn fingerprint(
        &self,
        path: &Path,
        algorithm: ChecksumAlgorithm,
        block_size: usize,
    ) -> Result<Fingerprint> {
        if path.as_os_str().is_empty() {
            return Err(AppError::invalid_argument("Cannot fingerprint an empty path"));
        }
        if block_size == 0 {
            return Err(AppError::invalid_argument("Block size must be greater than zero"));
        }

        let metadata = fs::metadata(path).map_err(|e| {
            AppError::io_error(
                format!("Failed to stat file for hashing: {}", e),
                Some(path.to_path_buf()),
            )
        })?;
        if !metadata.is_file() {
            return Err(AppError::invalid_argument(format!(
                "'{}' is not a regular file",
                path.display()
            )));
        }

        let modified = metadata.modified()?;
        let identity = FileIdentity::of(path, &metadata)?;

        if let Some(fingerprint) = self.cache.lookup(algorithm, &identity, modified, metadata.len()) {
            debug!(
                path = %path.display(),
                fingerprint = %fingerprint,
                "Checksum cache hit"
            );
            return Ok(fingerprint);
        }

        let fingerprint = self.hash_file(path, algorithm, block_size)?;
        self.cache.insert(
            algorithm,
            identity,
            CacheEntry {
                modified,
                len: metadata.len(),
                fingerprint: fingerprint.clone(),
            },
        );

        Ok(fingerprint)
    }

    fn hash_file(
        &self,
        path: &Path,
        algorithm: ChecksumAlgorithm,
        block_size: usize,
    ) -> Result<Fingerprint> {
        let mut file = File::open(path).map_err(|e| {
            AppError::io_error(
                format!("Failed to open file for hashing: {}", e),
                Some(path.to_path_buf()),
            )
        })?;

        let mut hasher = algorithm.hasher();
        let mut buffer = vec![0u8; block_size];
        loop {
            let bytes_read = file.read(&mut buffer).map_err(|e| {
                AppError::io_error(
                    format!("Failed to read file for hashing: {}", e),
                    Some(path.to_path_buf()),
                )
            })?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }

        self.computations.fetch_add(1, Ordering::Relaxed);
        let fingerprint = hasher.finalize();
        debug!(
            path = %path.display(),
            algorithm = %algorithm,
            fingerprint = %fingerprint,
            "Computed file fingerprint"
        );
        Ok(fingerprint)
    }

    /// Fingerprint every regular file below `root`
    ///
    /// Directory symlinks are never followed. Anything that is not a regular
    /// file or a directory is reported in [`TreeFingerprints::omitted`].
    /// Files are hashed on the rayon pool.
    pub fn fingerprint_tree(
        &self,
        root: &Path,
        algorithm: ChecksumAlgorithm,
        block_size: usize,
    ) -> Result<TreeFingerprints> {
        if !root.is_dir() {
            return Err(AppError::invalid_argument(format!(
                "'{}' is not a directory",
                root.display()
            )));
        }

        let mut files = Vec::new();
        let mut omitted = Vec::new();

        for entry in WalkDir::new(root).follow_links(false).min_depth(1) {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf);
                AppError::io_error(format!("Failed to walk directory tree: {}", e), path)
            })?;
            let file_type = entry.file_type();
            if file_type.is_dir() {
                continue;
            }

            let relative = entry.path().strip_prefix(root).map_err(|_| {
                AppError::io_error(
                    "Walked outside of the tree root",
                    Some(entry.path().to_path_buf()),
                )
            })?;

            match relative_key(relative) {
                Some(key) if file_type.is_file() => files.push((key, entry.into_path())),
                Some(key) => {
                    warn!(path = %entry.path().display(), "Omitting non-regular file from tree fingerprint");
                    omitted.push(key);
                }
                None => {
                    warn!(path = %entry.path().display(), "Omitting non UTF-8 path from tree fingerprint");
                    omitted.push(relative.to_string_lossy().into_owned());
                }
            }
        }

        let hashed: Vec<(String, Fingerprint)> = files
            .into_par_iter()
            .map(|(key, path)| {
                self.fingerprint(&path, algorithm, block_size)
                    .map(|fingerprint| (key, fingerprint))
            })
            .collect::<Result<_>>()?;

        Ok(TreeFingerprints {
            entries: hashed.into_iter().collect(),
            omitted,
        })
    }
}

/// Forward-slash key for a relative path, `None` when a component is not UTF-8
fn relative_key(relative: &Path) -> Option<String> {
    let parts: Option<Vec<&str>> = relative.components().map(|c| c.as_os_str().to_str()).collect();
    parts.map(|parts| parts.join("/"))
}
