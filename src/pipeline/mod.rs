//! Staged processing pipeline
//!
//! Every artifact type is a small state machine driven by [`Stage::process`]:
//!
//! ```text
//! NEW -> SETUP -> UNPACK -> INSPECT -> STORE -> CLEANUP -> DONE
//!          \________\_________\_________\________\-----> FAILED
//! ```
//!
//! A stage runs exactly once. Failures are captured on the stage (the
//! staging directory is kept for inspection) instead of being returned to
//! the caller; `process` only errors when it is invoked a second time.

pub mod archive_stage;
pub mod compressed;
pub mod context;
pub mod file_stage;
mod lifecycle;
pub mod log;
pub mod replica;
pub mod upload;

pub use archive_stage::ArchiveStage;
pub use compressed::CompressedFileStage;
pub use context::BucketContext;
pub use file_stage::FileStage;
pub use log::{LogRecord, Severity, StageLog};
pub use replica::ReplicaStage;
pub use upload::Upload;

use crate::error::{ErrorKind, Result};
use crate::storage::Fingerprint;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// Staging file name used when the client supplies no usable name
pub const DEFAULT_FILENAME: &str = "blob";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StageState {
    New,
    Setup,
    Unpack,
    Inspect,
    Store,
    Cleanup,
    Done,
    Failed,
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StageState::New => "NEW",
            StageState::Setup => "SETUP",
            StageState::Unpack => "UNPACK",
            StageState::Inspect => "INSPECT",
            StageState::Store => "STORE",
            StageState::Cleanup => "CLEANUP",
            StageState::Done => "DONE",
            StageState::Failed => "FAILED",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StageKind {
    File,
    CompressedFile,
    Archive,
    Replica,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StageKind::File => "File",
            StageKind::CompressedFile => "CompressedFile",
            StageKind::Archive => "Archive",
            StageKind::Replica => "Replica",
        };
        f.write_str(label)
    }
}

/// Failure captured at a stage boundary
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageError {
    pub kind: ErrorKind,
    pub message: String,
    /// State the stage was in when it failed
    pub state: StageState,
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (during {})", self.message, self.state)
    }
}

/// Snapshot of one stage's result
#[derive(Debug, Clone, Serialize)]
pub struct Artifact {
    pub kind: StageKind,
    pub state: StageState,
    pub fingerprint: Option<Fingerprint>,
    pub mime: Option<String>,
    /// Absolute retained path (blob file or exploded directory)
    pub path: Option<PathBuf>,
    /// Name carried forward to the next stage
    pub name: String,
    pub staging_path: PathBuf,
    pub short_circuit: bool,
    pub replicas: Vec<PathBuf>,
    pub log: Vec<LogRecord>,
    pub error: Option<StageError>,
}

impl Artifact {
    pub fn succeeded(&self) -> bool {
        self.state == StageState::Done
    }
}

/// A single pipeline stage
///
/// Implemented for every stage type through the crate-internal lifecycle
/// hooks; the trait is object safe so the orchestrator can hold
/// `Box<dyn Stage>`.
pub trait Stage: Send {
    fn kind(&self) -> StageKind;

    fn state(&self) -> StageState;

    fn staging_path(&self) -> &Path;

    /// Run the stage to completion
    ///
    /// Returns `Ok(true)` on success and `Ok(false)` when the stage failed
    /// (see [`Artifact::error`]). Fails with `AlreadyProcessed` when called
    /// more than once.
    fn process(&mut self) -> Result<bool>;

    fn artifact(&self) -> Artifact;
}
