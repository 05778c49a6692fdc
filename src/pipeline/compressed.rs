//! Single-file decompression stage
//!
//! Decompresses a blob produced by an earlier stage into its own staging
//! directory and retains the decompressed output in the blob store.

use super::lifecycle::{Lifecycle, StageCore};
use super::{StageKind, DEFAULT_FILENAME};
use crate::archive::{decompress, mime, Compression};
use crate::error::{AppError, Result};
use crate::pipeline::context::BucketContext;
use crate::utils::path::secure_filename;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug)]
pub struct CompressedFileStage {
    core: StageCore,
    source: PathBuf,
    output_name: String,
}

impl CompressedFileStage {
    /// `source` is the compressed file, `name` the client-facing name it
    /// was uploaded under
    pub fn new(ctx: Arc<BucketContext>, source: impl Into<PathBuf>, name: &str) -> Result<Self> {
        let core = StageCore::new(ctx, StageKind::CompressedFile, name.to_string())?;
        Ok(Self {
            core,
            source: source.into(),
            output_name: DEFAULT_FILENAME.to_string(),
        })
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    fn output_path(&self) -> PathBuf {
        self.core.staging.join(&self.output_name)
    }
}

impl Lifecycle for CompressedFileStage {
    fn core(&self) -> &StageCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StageCore {
        &mut self.core
    }

    fn failure_context(&self) -> &'static str {
        "Failed to process compressed file"
    }

    fn unpack(&mut self) -> Result<()> {
        let detected = mime::sniff(&self.source)?;
        let compression =
            Compression::from_mime(&detected).ok_or_else(|| AppError::UnsupportedContentType {
                mime: detected.clone(),
                path: self.source.clone(),
            })?;

        let decompressed_name = compression.decompressed_name(&self.core.name);
        let secured = secure_filename(&decompressed_name);
        if !secured.is_empty() {
            self.output_name = secured;
        }
        self.core.name = decompressed_name;

        let output = self.output_path();
        let written = decompress(compression, &self.source, &output)?;
        self.core.log.info(format!(
            "Decompressed {} '{}' into '{}' ({} bytes)",
            detected,
            self.source.display(),
            output.display(),
            written
        ));
        Ok(())
    }

    fn inspect(&mut self) -> Result<()> {
        let output = self.output_path();
        self.core.inspect_file(&output)
    }

    fn store(&mut self) -> Result<()> {
        let output = self.output_path();
        self.core.retain_blob(&output)
    }

    fn cleanup(&mut self) -> Result<()> {
        self.core.staging.remove_file_then_dir(&self.output_name)?;
        self.core.log.debug("Staging directory removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::infrastructure::config::BucketConfig;
    use crate::pipeline::{Stage, StageState};
    use crate::storage::ChecksumAlgorithm;
    use flate2::write::GzEncoder;
    use std::fs;
    use std::io::Write;
    use tempfile::TempDir;

    fn context(dir: &TempDir) -> Arc<BucketContext> {
        Arc::new(BucketContext::from_config(&BucketConfig::new(dir.path().join("bucket"))).unwrap())
    }

    fn write_gzip(path: &Path, content: &[u8]) {
        let mut encoder = GzEncoder::new(fs::File::create(path).unwrap(), flate2::Compression::default());
        encoder.write_all(content).unwrap();
        encoder.finish().unwrap();
    }

    #[test]
    fn test_gzip_is_decompressed_and_retained() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = context(&temp_dir);
        let source = temp_dir.path().join("notes.txt.gz");
        write_gzip(&source, b"compressed notes");

        let mut stage = CompressedFileStage::new(ctx, &source, "notes.txt.gz").unwrap();
        assert!(stage.process().unwrap());

        let artifact = stage.artifact();
        assert_eq!(artifact.state, StageState::Done);
        assert_eq!(artifact.name, "notes.txt");
        assert_eq!(
            artifact.fingerprint,
            Some(ChecksumAlgorithm::Blake3.digest(b"compressed notes"))
        );
        assert_eq!(fs::read(artifact.path.unwrap()).unwrap(), b"compressed notes");
        assert!(!artifact.staging_path.exists());
    }

    #[test]
    fn test_tgz_name_becomes_tar() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("upload");
        write_gzip(&source, b"not really a tarball");

        let mut stage = CompressedFileStage::new(context(&temp_dir), &source, "build.tgz").unwrap();
        assert!(stage.process().unwrap());
        assert_eq!(stage.artifact().name, "build.tar");
    }

    #[test]
    fn test_plain_file_is_unsupported() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("plain.txt");
        fs::write(&source, b"just text").unwrap();

        let mut stage = CompressedFileStage::new(context(&temp_dir), &source, "plain.txt").unwrap();
        assert!(!stage.process().unwrap());

        let error = stage.artifact().error.unwrap();
        assert_eq!(error.kind, ErrorKind::UnsupportedContentType);
        assert_eq!(error.state, StageState::Unpack);
        assert!(error.message.starts_with("Failed to process compressed file"));
        assert!(stage.staging_path().is_dir());
    }
}
