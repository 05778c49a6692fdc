//! Content-addressed storage for uploaded files and archives
//!
//! An [`Upload`] reserves a staging path, the caller writes the raw bytes
//! there and calls [`Upload::process`]. The content is fingerprinted and
//! hardlinked into the blob store; supported compressed files are
//! decompressed, supported archives are exploded into the directory store,
//! and request headers matching a configured template produce replica
//! links.
//!
//! ```no_run
//! use bucket_store::{BucketConfig, BucketContext, Upload};
//! use std::sync::Arc;
//!
//! let ctx = Arc::new(BucketContext::from_config(&BucketConfig::new("/srv/bucket"))?);
//! let mut upload = Upload::new(ctx, Some("notes.txt.gz"), [("Project", "alpha")])?;
//! std::fs::write(upload.upload_destination(), b"...")?;
//! upload.process()?;
//! let response = upload.response(true);
//! println!("{}", serde_json::to_string_pretty(&response).unwrap_or_default());
//! # Ok::<(), bucket_store::AppError>(())
//! ```

pub mod archive;
pub mod error;
pub mod infrastructure;
pub mod models;
pub mod monitoring;
pub mod pipeline;
pub mod storage;
pub mod utils;

pub use archive::{ARCHIVE_MIME_TYPES, COMPRESSED_MIME_TYPES};
pub use error::{AppError, ErrorKind, Result};
pub use infrastructure::config::BucketConfig;
pub use models::response::{UploadResponse, UploadStatus};
pub use pipeline::{Artifact, BucketContext, Stage, StageKind, StageState, Upload};
pub use storage::{
    probe_capacity, ChecksumAlgorithm, ChecksumCache, ChecksumEngine, ContentStore, DiskCapacity,
    Fingerprint,
};
