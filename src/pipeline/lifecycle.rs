//! Stage lifecycle hooks and the shared state machine driver
//!
//! `Lifecycle` lives in a private module so only this crate can implement
//! [`Stage`]; the blanket impl below owns the state transitions.

use super::{Artifact, Stage, StageError, StageKind, StageLog, StageState};
use crate::archive::mime;
use crate::error::{AppError, Result};
use crate::pipeline::context::BucketContext;
use crate::storage::{Fingerprint, Retention, StagingArea, StoreKey};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// State shared by every stage type
#[derive(Debug)]
pub struct StageCore {
    pub ctx: Arc<BucketContext>,
    pub kind: StageKind,
    pub state: StageState,
    pub staging: StagingArea,
    pub log: StageLog,
    pub fingerprint: Option<Fingerprint>,
    pub mime: Option<String>,
    pub path: Option<PathBuf>,
    pub name: String,
    pub short_circuit: bool,
    pub replicas: Vec<PathBuf>,
    pub error: Option<StageError>,
}

impl StageCore {
    /// Reserve a fresh staging directory for a new stage
    pub fn new(ctx: Arc<BucketContext>, kind: StageKind, name: String) -> Result<Self> {
        let staging = StagingArea::create(ctx.staging_root())?;
        let mut log = StageLog::new(format!("{}.{}", kind, staging.token()));
        log.debug(format!(
            "Staging directory created: '{}'",
            staging.path().display()
        ));

        Ok(Self {
            ctx,
            kind,
            state: StageState::New,
            staging,
            log,
            fingerprint: None,
            mime: None,
            path: None,
            name,
            short_circuit: false,
            replicas: Vec::new(),
            error: None,
        })
    }

    fn enter(&mut self, state: StageState) {
        self.state = state;
        self.log.debug(format!("Entering {}", state));
    }

    fn fail(&mut self, context: &str, err: AppError) {
        let message = format!("{}: {}", context, err);
        self.log.error(message.clone());
        self.log.warning(format!(
            "Staging directory retained for inspection: '{}'",
            self.staging.path().display()
        ));
        self.error = Some(StageError {
            kind: err.kind(),
            message,
            state: self.state,
        });
        self.state = StageState::Failed;
    }

    /// Fingerprint and sniff a staged file
    pub fn inspect_file(&mut self, staged: &Path) -> Result<()> {
        let fingerprint =
            self.ctx
                .checksums()
                .fingerprint(staged, self.ctx.algorithm(), self.ctx.block_size())?;
        let mime = mime::sniff(staged)?;

        self.log.info(format!(
            "Inspected '{}': {} {} ({})",
            staged.display(),
            self.ctx.algorithm(),
            fingerprint,
            mime
        ));
        self.fingerprint = Some(fingerprint);
        self.mime = Some(mime);
        Ok(())
    }

    /// Hardlink a staged file into the blob store unless already retained
    pub fn retain_blob(&mut self, staged: &Path) -> Result<()> {
        let fingerprint = self
            .fingerprint
            .clone()
            .ok_or_else(|| AppError::invalid_argument("Cannot store content before inspection"))?;

        let (destination, retention) = self
            .ctx
            .blobs()
            .retain_hardlink(staged, &StoreKey::from(&fingerprint))?;

        match retention {
            Retention::Created => self.log.info(format!(
                "Blob retained: '{}' -> '{}'",
                staged.display(),
                destination.display()
            )),
            Retention::Existing { links } => self.log.info(format!(
                "Blob {} already stored in {} location(s)",
                fingerprint, links
            )),
        }
        self.path = Some(destination);
        Ok(())
    }

    pub fn artifact(&self) -> Artifact {
        Artifact {
            kind: self.kind,
            state: self.state,
            fingerprint: self.fingerprint.clone(),
            mime: self.mime.clone(),
            path: self.path.clone(),
            name: self.name.clone(),
            staging_path: self.staging.path().to_path_buf(),
            short_circuit: self.short_circuit,
            replicas: self.replicas.clone(),
            log: self.log.records().to_vec(),
            error: self.error.clone(),
        }
    }
}

/// Per-stage hooks, run in order by [`Stage::process`]
pub trait Lifecycle {
    fn core(&self) -> &StageCore;

    fn core_mut(&mut self) -> &mut StageCore;

    /// Prefix for the captured error message
    fn failure_context(&self) -> &'static str;

    fn setup(&mut self) -> Result<()> {
        Ok(())
    }

    fn unpack(&mut self) -> Result<()> {
        Ok(())
    }

    fn inspect(&mut self) -> Result<()>;

    fn store(&mut self) -> Result<()>;

    fn cleanup(&mut self) -> Result<()>;
}

fn run_phases<T: Lifecycle + ?Sized>(stage: &mut T) -> Result<()> {
    stage.core_mut().enter(StageState::Setup);
    stage.setup()?;

    if stage.core().short_circuit {
        stage
            .core_mut()
            .log
            .info("Content already retained; skipping unpack, inspect and store");
    } else {
        stage.core_mut().enter(StageState::Unpack);
        stage.unpack()?;
        stage.core_mut().enter(StageState::Inspect);
        stage.inspect()?;
        stage.core_mut().enter(StageState::Store);
        stage.store()?;
    }

    stage.core_mut().enter(StageState::Cleanup);
    stage.cleanup()
}

impl<T: Lifecycle + Send> Stage for T {
    fn kind(&self) -> StageKind {
        self.core().kind
    }

    fn state(&self) -> StageState {
        self.core().state
    }

    fn staging_path(&self) -> &Path {
        self.core().staging.path()
    }

    fn process(&mut self) -> Result<bool> {
        let core = self.core();
        if core.state != StageState::New {
            return Err(AppError::AlreadyProcessed(format!(
                "{} stage '{}' has already been processed",
                core.kind,
                core.staging.token()
            )));
        }

        match run_phases(self) {
            Ok(()) => {
                let core = self.core_mut();
                core.state = StageState::Done;
                core.log.info(format!("{} stage complete", core.kind));
                Ok(true)
            }
            Err(err) => {
                let context = self.failure_context();
                self.core_mut().fail(context, err);
                Ok(false)
            }
        }
    }

    fn artifact(&self) -> Artifact {
        self.core().artifact()
    }
}
