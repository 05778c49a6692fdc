//! Header-driven replica links
//!
//! For every configured template the request headers fully cover, a new
//! timestamped slot is created in the replica store (a hardlink for a file,
//! a relative symlink for an exploded directory) and `name.latest[.ext]` is
//! repointed at it.

use super::lifecycle::{Lifecycle, StageCore};
use super::{StageKind, DEFAULT_FILENAME};
use crate::error::{AppError, Result};
use crate::models::replica::TemplateMatch;
use crate::pipeline::context::BucketContext;
use crate::storage::{Fingerprint, StoreKey};
use crate::utils::path::{create_symlink, relative_link_target, secure_filename};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Slots probed per name and minute before giving up
pub const REPLICA_LIMIT: usize = 100;

const TIMESTAMP_FORMAT: &str = "%Y%m%d.%H%M";

#[derive(Debug)]
pub struct ReplicaStage {
    core: StageCore,
    source: PathBuf,
    source_is_dir: bool,
    headers: HashMap<String, String>,
    matches: Vec<Vec<String>>,
    timestamp: DateTime<Utc>,
}

impl ReplicaStage {
    /// `headers` may use any case; names are normalized to uppercase
    pub fn new<K, V>(
        ctx: Arc<BucketContext>,
        source: impl Into<PathBuf>,
        name: &str,
        fingerprint: Option<Fingerprint>,
        headers: impl IntoIterator<Item = (K, V)>,
    ) -> Result<Self>
    where
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut core = StageCore::new(ctx, StageKind::Replica, name.to_string())?;
        core.fingerprint = fingerprint;
        let headers = headers
            .into_iter()
            .map(|(k, v)| (k.as_ref().to_ascii_uppercase(), v.into()))
            .collect();

        Ok(Self {
            core,
            source: source.into(),
            source_is_dir: false,
            headers,
            matches: Vec::new(),
            timestamp: Utc::now(),
        })
    }

    /// Use a fixed time for slot names instead of the creation time
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Resolved replica directories, as path segments
    pub fn matches(&self) -> &[Vec<String>] {
        &self.matches
    }

    fn replica_name(&self) -> (String, String) {
        let secured = secure_filename(&self.core.name);
        let name = if secured.is_empty() {
            DEFAULT_FILENAME.to_string()
        } else {
            secured
        };
        if self.source_is_dir {
            return (name, String::new());
        }
        let (stem, ext) = split_extension(&name);
        (stem.to_string(), ext.to_string())
    }

    /// Link the source into the first free `stem.timestamp.index.ext` slot
    fn claim_slot(&self, directory: &Path, stem: &str, ext: &str) -> Result<PathBuf> {
        let timestamp = self.timestamp.format(TIMESTAMP_FORMAT);
        let link_target = if self.source_is_dir {
            Some(relative_link_target(directory, &self.source)?)
        } else {
            None
        };

        for index in 0..REPLICA_LIMIT {
            let slot = directory.join(format!("{}.{}.{}{}", stem, timestamp, index, ext));
            let linked = match &link_target {
                Some(target) => create_symlink(target, &slot),
                None => fs::hard_link(&self.source, &slot),
            };
            match linked {
                Ok(()) => return Ok(slot),
                Err(e) if e.kind() == IoErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(AppError::io_error(
                        format!("Failed to create replica: {}", e),
                        Some(slot),
                    ))
                }
            }
        }

        Err(AppError::ReplicaLimitExceeded {
            limit: REPLICA_LIMIT,
            dir: directory.to_path_buf(),
        })
    }

    /// Atomically repoint `latest` at `slot` (both inside `directory`)
    fn point_latest(&mut self, directory: &Path, latest: &str, slot: &Path) -> Result<()> {
        let slot_name = slot
            .file_name()
            .ok_or_else(|| AppError::io_error("Replica slot has no file name", Some(slot.to_path_buf())))?;
        let temporary = self.core.staging.join(latest);
        create_symlink(Path::new(slot_name), &temporary).map_err(|e| {
            AppError::io_error(
                format!("Failed to create latest link: {}", e),
                Some(temporary.clone()),
            )
        })?;

        let destination = directory.join(latest);
        fs::rename(&temporary, &destination).map_err(|e| {
            AppError::io_error(
                format!("Failed to move latest link into place: {}", e),
                Some(destination.clone()),
            )
        })?;
        self.core.log.debug(format!(
            "'{}' now points at '{}'",
            destination.display(),
            slot_name.to_string_lossy()
        ));
        Ok(())
    }
}

impl Lifecycle for ReplicaStage {
    fn core(&self) -> &StageCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StageCore {
        &mut self.core
    }

    fn failure_context(&self) -> &'static str {
        "Failed to create replicas"
    }

    fn setup(&mut self) -> Result<()> {
        let metadata = fs::metadata(&self.source).map_err(|e| {
            AppError::io_error(
                format!("Replica source is not accessible: {}", e),
                Some(self.source.clone()),
            )
        })?;
        self.source_is_dir = metadata.is_dir();
        Ok(())
    }

    fn inspect(&mut self) -> Result<()> {
        let ctx = Arc::clone(&self.core.ctx);
        for template in ctx.templates() {
            match template.resolve(&self.headers) {
                TemplateMatch::Matched { segments, renamed } => {
                    for (header, original, secured) in renamed {
                        self.core.log.info(format!(
                            "Header {} value '{}' secured to '{}'",
                            header, original, secured
                        ));
                    }
                    self.core.log.debug(format!(
                        "Template '{}' matched: {}",
                        template,
                        segments.join("/")
                    ));
                    self.matches.push(segments);
                }
                TemplateMatch::Partial { missing } => {
                    self.core.log.info(format!(
                        "Template '{}' skipped, missing header(s): {}",
                        template,
                        missing.join(", ")
                    ));
                }
            }
        }

        if self.matches.is_empty() {
            self.core.log.info("No replica template matched the request headers");
        }
        Ok(())
    }

    fn store(&mut self) -> Result<()> {
        let (stem, ext) = self.replica_name();
        let latest = format!("{}.latest{}", stem, ext);
        let matches = self.matches.clone();

        for segments in matches {
            let directory = self
                .core
                .ctx
                .replicas()
                .ensure_writeable(&StoreKey::from(segments))?;
            let slot = self.claim_slot(&directory, &stem, &ext)?;
            self.core
                .log
                .info(format!("Replica created: '{}'", slot.display()));
            self.point_latest(&directory, &latest, &slot)?;
            self.core.replicas.push(slot);
        }
        Ok(())
    }

    fn cleanup(&mut self) -> Result<()> {
        self.core.staging.remove_empty_dir()?;
        self.core.log.debug("Staging directory removed");
        Ok(())
    }
}

/// Split `name` into stem and extension; leading dots never start an
/// extension (`.bashrc` has none)
fn split_extension(name: &str) -> (&str, &str) {
    let leading = name.len() - name.trim_start_matches('.').len();
    match name.rfind('.') {
        Some(dot) if dot > leading => name.split_at(dot),
        _ => (name, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::infrastructure::config::BucketConfig;
    use crate::pipeline::{Stage, StageState};
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn context(dir: &TempDir, templates: &[&str]) -> Arc<BucketContext> {
        let mut config = BucketConfig::new(dir.path().join("bucket"));
        for template in templates {
            config = config.with_replicate(*template);
        }
        Arc::new(BucketContext::from_config(&config).unwrap())
    }

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_split_extension() {
        assert_eq!(split_extension("notes.txt"), ("notes", ".txt"));
        assert_eq!(split_extension("build.tar.gz"), ("build.tar", ".gz"));
        assert_eq!(split_extension(".bashrc"), (".bashrc", ""));
        assert_eq!(split_extension("..hidden.cfg"), ("..hidden", ".cfg"));
        assert_eq!(split_extension("plain"), ("plain", ""));
    }

    #[test]
    fn test_file_replica_and_latest_link() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = context(&temp_dir, &["projects/${Project}"]);
        let source = temp_dir.path().join("report.txt");
        fs::write(&source, b"report").unwrap();

        let mut stage = ReplicaStage::new(ctx.clone(), &source, "report.txt", None, [("project", "alpha")])
            .unwrap()
            .at(noon());
        assert!(stage.process().unwrap());

        let replica_dir = ctx.replicas().root().join("projects/alpha");
        let slot = replica_dir.join("report.20240301.1200.0.txt");
        assert_eq!(stage.artifact().replicas, vec![slot.clone()]);
        assert_eq!(fs::read(&slot).unwrap(), b"report");

        let latest = replica_dir.join("report.latest.txt");
        assert_eq!(
            fs::read_link(&latest).unwrap(),
            PathBuf::from("report.20240301.1200.0.txt")
        );
        assert!(!stage.artifact().staging_path.exists());
    }

    #[test]
    fn test_second_replica_takes_next_slot() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = context(&temp_dir, &["${Project}"]);
        let source = temp_dir.path().join("report.txt");
        fs::write(&source, b"report").unwrap();

        for _ in 0..2 {
            let mut stage = ReplicaStage::new(ctx.clone(), &source, "report.txt", None, [("PROJECT", "alpha")])
                .unwrap()
                .at(noon());
            assert!(stage.process().unwrap());
        }

        let latest = ctx.replicas().root().join("alpha/report.latest.txt");
        assert_eq!(
            fs::read_link(latest).unwrap(),
            PathBuf::from("report.20240301.1200.1.txt")
        );
    }

    #[test]
    fn test_partial_match_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = context(&temp_dir, &["${Project}/${Branch}"]);
        let source = temp_dir.path().join("report.txt");
        fs::write(&source, b"report").unwrap();

        let mut stage =
            ReplicaStage::new(ctx.clone(), &source, "report.txt", None, [("Project", "alpha")]).unwrap();
        assert!(stage.process().unwrap());

        let artifact = stage.artifact();
        assert_eq!(artifact.state, StageState::Done);
        assert!(artifact.replicas.is_empty());
        assert!(artifact
            .log
            .iter()
            .any(|r| r.message.contains("missing header(s): BRANCH")));
        assert_eq!(fs::read_dir(ctx.replicas().root()).unwrap().count(), 0);
    }

    #[test]
    fn test_directory_replica_is_relative_symlink() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = context(&temp_dir, &["${Project}"]);
        let exploded = ctx.dirs().root().join("ab/cd/abcdef0123");
        fs::create_dir_all(&exploded).unwrap();
        fs::write(exploded.join("a.txt"), b"X").unwrap();

        let mut stage = ReplicaStage::new(ctx.clone(), &exploded, "build", None, [("Project", "alpha")])
            .unwrap()
            .at(noon());
        assert!(stage.process().unwrap());

        let slot = ctx.replicas().root().join("alpha/build.20240301.1200.0");
        let target = fs::read_link(&slot).unwrap();
        assert!(target.is_relative());
        assert_eq!(fs::read(slot.join("a.txt")).unwrap(), b"X");
        assert!(ctx.replicas().root().join("alpha/build.latest").join("a.txt").is_file());
    }

    #[test]
    fn test_limit_exceeded() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = context(&temp_dir, &["${Project}"]);
        let source = temp_dir.path().join("report.txt");
        fs::write(&source, b"report").unwrap();

        let replica_dir = ctx.replicas().root().join("alpha");
        fs::create_dir_all(&replica_dir).unwrap();
        for index in 0..REPLICA_LIMIT {
            fs::write(replica_dir.join(format!("report.20240301.1200.{}.txt", index)), b"").unwrap();
        }

        let mut stage = ReplicaStage::new(ctx, &source, "report.txt", None, [("Project", "alpha")])
            .unwrap()
            .at(noon());
        assert!(!stage.process().unwrap());

        let error = stage.artifact().error.unwrap();
        assert_eq!(error.kind, ErrorKind::ReplicaLimitExceeded);
        assert_eq!(error.state, StageState::Store);
    }

    #[test]
    fn test_missing_source_fails_in_setup() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = context(&temp_dir, &["${Project}"]);

        let mut stage = ReplicaStage::new(
            ctx,
            temp_dir.path().join("gone"),
            "gone",
            None,
            [("Project", "alpha")],
        )
        .unwrap();
        assert!(!stage.process().unwrap());
        assert_eq!(stage.artifact().error.unwrap().state, StageState::Setup);
    }
}
