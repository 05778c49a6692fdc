//! Disk capacity probe
//!
//! Reports what is available; whether that is enough is the caller's call.

use crate::error::{AppError, Result};
use serde::Serialize;
use std::path::Path;

/// Suggested minimum free space before accepting uploads (1 GiB)
pub const DEFAULT_REQUIRED_SPACE: u64 = 1024 * 1024 * 1024;
/// Suggested minimum free inodes before accepting uploads
pub const DEFAULT_REQUIRED_INODES: u64 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DiskCapacity {
    /// Bytes available to unprivileged users
    pub available_bytes: u64,
    /// Inodes available to unprivileged users
    pub available_inodes: u64,
}

impl DiskCapacity {
    pub fn satisfies(&self, min_bytes: u64, min_inodes: u64) -> bool {
        self.available_bytes >= min_bytes && self.available_inodes >= min_inodes
    }
}

/// Probe the filesystem holding `root`
pub fn probe_capacity(root: &Path) -> Result<DiskCapacity> {
    let stats = rustix::fs::statvfs(root).map_err(|errno| {
        AppError::io_error(
            format!("Failed to query filesystem capacity: {}", std::io::Error::from(errno)),
            Some(root.to_path_buf()),
        )
    })?;

    Ok(DiskCapacity {
        available_bytes: stats.f_frsize.saturating_mul(stats.f_bavail),
        available_inodes: stats.f_favail,
    })
}
