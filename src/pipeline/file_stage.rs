//! Plain file stage
//!
//! Reserves a staging path for the raw upload, then fingerprints it and
//! hardlinks it into the blob store.

use super::lifecycle::{Lifecycle, StageCore};
use super::{StageKind, DEFAULT_FILENAME};
use crate::error::Result;
use crate::pipeline::context::BucketContext;
use crate::utils::path::secure_filename;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug)]
pub struct FileStage {
    core: StageCore,
    filename: String,
}

impl FileStage {
    /// Create the staging directory and reserve the upload path
    ///
    /// The filename is sanitized; `blob` is used when nothing usable is left.
    pub fn new(ctx: Arc<BucketContext>, requested: Option<&str>) -> Result<Self> {
        let secured = requested.map(secure_filename).unwrap_or_default();
        let filename = if secured.is_empty() {
            DEFAULT_FILENAME.to_string()
        } else {
            secured
        };

        let mut core = StageCore::new(ctx, StageKind::File, filename.clone())?;
        if let Some(original) = requested.filter(|original| *original != filename) {
            core.log.info(format!("Filename '{}' secured to '{}'", original, filename));
        }
        Ok(Self { core, filename })
    }

    /// Where the caller must write the raw upload before processing
    pub fn upload_path(&self) -> PathBuf {
        self.core.staging.join(&self.filename)
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }
}

impl Lifecycle for FileStage {
    fn core(&self) -> &StageCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StageCore {
        &mut self.core
    }

    fn failure_context(&self) -> &'static str {
        "Failed to process file"
    }

    fn inspect(&mut self) -> Result<()> {
        let staged = self.upload_path();
        self.core.inspect_file(&staged)
    }

    fn store(&mut self) -> Result<()> {
        let staged = self.upload_path();
        self.core.retain_blob(&staged)
    }

    fn cleanup(&mut self) -> Result<()> {
        self.core.staging.remove_file_then_dir(&self.filename)?;
        self.core.log.debug("Staging directory removed");
        Ok(())
    }
}
