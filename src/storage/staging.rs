//! Per-stage staging directories
//!
//! Every pipeline stage works inside its own directory under the staging
//! root. The directory name is a short random token; a collision with an
//! existing directory is reported as an error instead of being shared.
//!
//! A staging directory is never removed implicitly. Stages remove it on
//! success and leave it behind on failure so the partial state can be
//! inspected.

use crate::error::{AppError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// Length of the random staging token
pub const TOKEN_LEN: usize = 8;

#[derive(Debug, Clone)]
pub struct StagingArea {
    token: String,
    path: PathBuf,
}

impl StagingArea {
    /// Create a fresh staging directory below `root`
    ///
    /// The directory is created with mode `0o777` (subject to the umask).
    /// `root` itself must already exist.
    pub fn create(root: &Path) -> Result<Self> {
        let token = Uuid::new_v4().simple().to_string()[..TOKEN_LEN].to_string();
        Self::create_with_token(root, token)
    }

    pub(crate) fn create_with_token(root: &Path, token: String) -> Result<Self> {
        let path = root.join(&token);

        let mut builder = fs::DirBuilder::new();
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o777);
        }
        builder.create(&path).map_err(|e| {
            AppError::io_error(
                format!("Failed to create staging directory: {}", e),
                Some(path.clone()),
            )
        })?;

        debug!(token = %token, path = %path.display(), "Created staging directory");
        Ok(Self { token, path })
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn join(&self, name: impl AsRef<Path>) -> PathBuf {
        self.path.join(name)
    }

    /// Remove the one known file, then the (now empty) directory
    ///
    /// Fails when anything else is left in the directory.
    pub fn remove_file_then_dir(&self, name: impl AsRef<Path>) -> Result<()> {
        let file = self.join(name);
        fs::remove_file(&file).map_err(|e| {
            AppError::io_error(
                format!("Failed to remove staged file: {}", e),
                Some(file.clone()),
            )
        })?;
        self.remove_empty_dir()
    }

    /// Remove the staging directory, which must be empty
    pub fn remove_empty_dir(&self) -> Result<()> {
        fs::remove_dir(&self.path).map_err(|e| {
            AppError::io_error(
                format!("Failed to remove staging directory: {}", e),
                Some(self.path.clone()),
            )
        })?;
        debug!(token = %self.token, "Removed staging directory");
        Ok(())
    }

    /// Remove the staging directory and everything below it
    pub fn remove_all(&self) -> Result<()> {
        fs::remove_dir_all(&self.path).map_err(|e| {
            AppError::io_error(
                format!("Failed to remove staging tree: {}", e),
                Some(self.path.clone()),
            )
        })?;
        debug!(token = %self.token, "Removed staging tree");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    #[test]
    fn test_create_unique_directories() {
        let temp_dir = TempDir::new().unwrap();
        let a = StagingArea::create(temp_dir.path()).unwrap();
        let b = StagingArea::create(temp_dir.path()).unwrap();

        assert_ne!(a.path(), b.path());
        assert_eq!(a.token().len(), TOKEN_LEN);
        assert!(a.token().chars().all(|c| c.is_ascii_hexdigit()));
        assert!(a.path().is_dir());
    }

    #[test]
    fn test_token_collision_fails_loudly() {
        let temp_dir = TempDir::new().unwrap();
        StagingArea::create_with_token(temp_dir.path(), "deadbeef".into()).unwrap();

        let err = StagingArea::create_with_token(temp_dir.path(), "deadbeef".into()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IoError);
    }

    #[test]
    fn test_remove_file_then_dir_rejects_leftovers() {
        let temp_dir = TempDir::new().unwrap();
        let staging = StagingArea::create(temp_dir.path()).unwrap();
        fs::write(staging.join("blob"), b"data").unwrap();
        fs::write(staging.join("unexpected"), b"data").unwrap();

        assert!(staging.remove_file_then_dir("blob").is_err());
        assert!(staging.path().is_dir());
        assert!(staging.join("unexpected").exists());
    }

    #[test]
    fn test_remove_file_then_dir() {
        let temp_dir = TempDir::new().unwrap();
        let staging = StagingArea::create(temp_dir.path()).unwrap();
        fs::write(staging.join("blob"), b"data").unwrap();

        staging.remove_file_then_dir("blob").unwrap();
        assert!(!staging.path().exists());
    }

    #[test]
    fn test_remove_all() {
        let temp_dir = TempDir::new().unwrap();
        let staging = StagingArea::create(temp_dir.path()).unwrap();
        fs::create_dir_all(staging.join("a/b")).unwrap();
        fs::write(staging.join("a/b/c.txt"), b"data").unwrap();

        staging.remove_all().unwrap();
        assert!(!staging.path().exists());
    }
}
