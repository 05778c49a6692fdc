//! Upload orchestration
//!
//! Chains File -> CompressedFile -> Archive -> Replica based on the content
//! type each stage detects. A stage only runs when the previous one
//! succeeded; failures are reported through [`Upload::response`], never
//! returned to the caller.

use super::{
    Artifact, ArchiveStage, CompressedFileStage, FileStage, LogRecord, ReplicaStage, Stage,
    StageLog,
};
use crate::archive::{ArchiveFormat, Compression};
use crate::error::{AppError, Result};
use crate::models::response::{ChecksumSummary, PathSummary, UploadResponse};
use crate::pipeline::context::BucketContext;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One client upload and the stages it triggered
#[derive(Debug)]
pub struct Upload {
    ctx: Arc<BucketContext>,
    headers: Vec<(String, String)>,
    log: StageLog,
    file: FileStage,
    compressed: Option<CompressedFileStage>,
    archive: Option<ArchiveStage>,
    replica: Option<ReplicaStage>,
    errors: Vec<String>,
    result: Option<bool>,
}

impl Upload {
    /// Reserve a staging path for `filename` (sanitized, `blob` when empty)
    pub fn new<K, V>(
        ctx: Arc<BucketContext>,
        filename: Option<&str>,
        headers: impl IntoIterator<Item = (K, V)>,
    ) -> Result<Self>
    where
        K: Into<String>,
        V: Into<String>,
    {
        let file = FileStage::new(Arc::clone(&ctx), filename)?;
        let token = file
            .staging_path()
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Self {
            ctx,
            headers: headers
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            log: StageLog::new(format!("Upload.{}", token)),
            file,
            compressed: None,
            archive: None,
            replica: None,
            errors: Vec::new(),
            result: None,
        })
    }

    /// Where the raw upload must be written before [`process`](Self::process)
    pub fn upload_destination(&self) -> PathBuf {
        self.file.upload_path()
    }

    /// `None` until processed
    pub fn result(&self) -> Option<bool> {
        self.result
    }

    /// Snapshots of every stage that was created, in pipeline order
    pub fn artifacts(&self) -> Vec<Artifact> {
        let mut artifacts = vec![self.file.artifact()];
        artifacts.extend(self.compressed.as_ref().map(Stage::artifact));
        artifacts.extend(self.archive.as_ref().map(Stage::artifact));
        artifacts.extend(self.replica.as_ref().map(Stage::artifact));
        artifacts
    }

    /// Run the stage chain
    ///
    /// Returns whether every stage that ran succeeded. Fails only with
    /// `AlreadyProcessed` on a second call.
    pub fn process(&mut self) -> Result<bool> {
        if self.result.is_some() {
            return Err(AppError::AlreadyProcessed(format!(
                "Upload '{}' has already been processed",
                self.log.source()
            )));
        }

        let upload = self.upload_destination();
        self.log
            .info(format!("Processing upload: '{}'", upload.display()));

        let result = self.run_chain();
        if !result {
            self.log
                .warning("Upload processing unsuccessful. See prior error");
        }
        self.result = Some(result);
        Ok(result)
    }

    fn run_chain(&mut self) -> bool {
        let mut current = match self.run_file() {
            Some(artifact) => artifact,
            None => return false,
        };

        if let Some(compression) = current.mime.as_deref().and_then(Compression::from_mime) {
            self.log.info(format!(
                "Compressed file of type '{:?}' recognized: '{}'",
                compression,
                display_path(current.path.as_deref())
            ));
            current = match self.run_compressed(&current) {
                Some(artifact) => artifact,
                None => return false,
            };
        }

        if let Some(format) = current.mime.as_deref().and_then(ArchiveFormat::from_mime) {
            self.log.info(format!(
                "Directory archive of type '{:?}' recognized: '{}'",
                format,
                display_path(current.path.as_deref())
            ));
            current = match self.run_archive(&current) {
                Some(artifact) => artifact,
                None => return false,
            };
        }

        if !self.headers.is_empty() && !self.ctx.templates().is_empty() {
            self.log
                .info("Checking if replication was requested via headers");
            return self.run_replica(&current);
        }
        true
    }

    fn run_file(&mut self) -> Option<Artifact> {
        match self.file.process() {
            Ok(true) => Some(self.file.artifact()),
            Ok(false) => None,
            Err(e) => {
                self.record_error("Failed to process file", e);
                None
            }
        }
    }

    fn run_compressed(&mut self, previous: &Artifact) -> Option<Artifact> {
        let source = self.retained(previous)?;
        let stage = CompressedFileStage::new(Arc::clone(&self.ctx), source, &previous.name);
        let stage = self.accept(stage, "Failed to process compressed file")?;
        let stage = self.compressed.insert(stage);
        finish(stage)
    }

    fn run_archive(&mut self, previous: &Artifact) -> Option<Artifact> {
        let source = self.retained(previous)?;
        let stage = ArchiveStage::new(Arc::clone(&self.ctx), source, &previous.name);
        let stage = self.accept(stage, "Failed to explode archive")?;
        let stage = self.archive.insert(stage);
        finish(stage)
    }

    fn run_replica(&mut self, previous: &Artifact) -> bool {
        let Some(source) = self.retained(previous) else {
            return false;
        };
        let stage = ReplicaStage::new(
            Arc::clone(&self.ctx),
            source,
            &previous.name,
            previous.fingerprint.clone(),
            self.headers.clone(),
        );
        let Some(stage) = self.accept(stage, "Failed to create replicas") else {
            return false;
        };
        let stage = self.replica.insert(stage);
        finish(stage).is_some()
    }

    fn retained(&mut self, previous: &Artifact) -> Option<PathBuf> {
        if previous.path.is_none() {
            self.errors.push(format!(
                "{} stage reported success without a retained path",
                previous.kind
            ));
        }
        previous.path.clone()
    }

    fn accept<T>(&mut self, stage: Result<T>, context: &str) -> Option<T> {
        match stage {
            Ok(stage) => Some(stage),
            Err(e) => {
                self.record_error(context, e);
                None
            }
        }
    }

    fn record_error(&mut self, context: &str, err: AppError) {
        let message = format!("{}: {}", context, err);
        self.log.error(message.clone());
        self.errors.push(message);
    }

    /// Build the client-facing summary
    pub fn response(&self, include_log: bool) -> UploadResponse {
        let file = self.file.artifact();
        let compressed = self.compressed.as_ref().map(Stage::artifact);
        let archive = self.archive.as_ref().map(Stage::artifact);
        let replica = self.replica.as_ref().map(Stage::artifact);

        let checksum = ChecksumSummary {
            blob: file.fingerprint.clone(),
            decompressed: compressed.as_ref().and_then(|a| a.fingerprint.clone()),
            archive: archive.as_ref().and_then(|a| a.fingerprint.clone()),
        };
        let path = PathSummary {
            blob: self.public_path(&file),
            decompressed: compressed.as_ref().and_then(|a| self.public_path(a)),
            archive: archive.as_ref().and_then(|a| self.public_path(a)),
            replicas: replica.as_ref().map(|a| {
                a.replicas
                    .iter()
                    .filter_map(|p| self.ctx.public_path(p))
                    .collect()
            }),
        };

        let stages: Vec<&Artifact> = [Some(&file), compressed.as_ref(), archive.as_ref(), replica.as_ref()]
            .into_iter()
            .flatten()
            .collect();
        let mut errors: Vec<String> = stages
            .iter()
            .filter_map(|a| a.error.as_ref().map(|e| e.message.clone()))
            .collect();
        errors.extend(self.errors.iter().cloned());

        let response =
            UploadResponse::new(checksum, path, self.result == Some(true), errors);
        if !include_log {
            return response;
        }

        let mut records: Vec<LogRecord> = stages
            .iter()
            .flat_map(|a| a.log.iter().cloned())
            .collect();
        records.extend(self.log.records().iter().cloned());
        response.with_log(records)
    }

    fn public_path(&self, artifact: &Artifact) -> Option<String> {
        artifact
            .path
            .as_deref()
            .and_then(|p| self.ctx.public_path(p))
    }
}

fn finish<S: Stage>(stage: &mut S) -> Option<Artifact> {
    // Err only on re-entry
    match stage.process() {
        Ok(true) => Some(stage.artifact()),
        _ => None,
    }
}

fn display_path(path: Option<&Path>) -> String {
    path.map(|p| p.display().to_string()).unwrap_or_default()
}
