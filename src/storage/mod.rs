//! Content-Addressable Storage Module
//!
//! - Fingerprints and the mtime-validated checksum cache
//! - Blob, exploded-directory and replica stores
//! - Staging directories and the disk capacity probe
//!
//! ## Architecture
//!
//! ```text
//! archive_dir/
//! ├── staging/             # one directory per running stage
//! ├── blob/                # file content, sharded by fingerprint
//! │   └── a3/
//! │       └── f2/
//! │           └── a3f2e1d4c5...
//! ├── explode/             # mirrored archive trees, hardlinked to blobs
//! └── replica/             # header-driven human-readable links
//! ```

pub mod cas;
pub mod checksum;
pub mod disk;
pub mod fingerprint;
pub mod staging;

pub use cas::{ContentStore, Retention, StoreKey, StoreKind};
pub use checksum::{
    ChecksumAlgorithm, ChecksumCache, ChecksumEngine, TreeFingerprints, DEFAULT_BLOCK_SIZE,
};
pub use disk::{probe_capacity, DiskCapacity, DEFAULT_REQUIRED_INODES, DEFAULT_REQUIRED_SPACE};
pub use fingerprint::Fingerprint;
pub use staging::StagingArea;
