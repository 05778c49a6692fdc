use crate::archive::archive_handler::{ArchiveHandler, ExtractionSummary};
use crate::archive::path_validator::{normalize_member, resolve_link_target, traverses_symlink};
use crate::error::{AppError, Result};
use std::collections::HashSet;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tar::{Archive, EntryType};
use tracing::{debug, info, warn};

/**
 * TAR 文件处理器
 *
 * 两遍处理：第一遍只读取头部并验证全部成员，第二遍才写入磁盘。
 * 只处理未压缩的 tar；压缩层由单文件解压阶段先行剥离。
 */
pub struct TarHandler;

/// 第一遍验证得到的提取计划
#[derive(Debug, Clone, PartialEq, Eq)]
enum PlannedEntry {
    Skip,
    Directory(PathBuf),
    File(PathBuf),
    Symlink(PathBuf),
    HardLink { path: PathBuf, source: PathBuf },
}

/// 头部信息（第一遍收集）
struct MemberHeader {
    name: String,
    path: PathBuf,
    entry_type: EntryType,
    link_name: Option<String>,
}

impl ArchiveHandler for TarHandler {
    fn extract(&self, source: &Path, target_dir: &Path) -> Result<ExtractionSummary> {
        info!(
            source = %source.display(),
            target = %target_dir.display(),
            "Extracting tar archive"
        );

        let base = target_dir.canonicalize().map_err(|e| {
            AppError::io_error(
                format!("Failed to resolve extraction directory: {}", e),
                Some(target_dir.to_path_buf()),
            )
        })?;

        let plan = Self::validate(source)?;
        let summary = Self::unpack(source, &base, &plan)?;

        debug!(
            files = summary.files_extracted,
            directories = summary.directories,
            links = summary.links,
            total_size = summary.total_size,
            "Tar extraction complete"
        );
        Ok(summary)
    }

    fn name(&self) -> &'static str {
        "tar"
    }
}

impl TarHandler {
    fn open(source: &Path) -> Result<Archive<File>> {
        let file = File::open(source).map_err(|e| {
            AppError::io_error(
                format!("Failed to open tar archive: {}", e),
                Some(source.to_path_buf()),
            )
        })?;
        Ok(Archive::new(file))
    }

    fn read_headers(source: &Path) -> Result<Vec<MemberHeader>> {
        let mut archive = Self::open(source)?;
        let entries = archive
            .entries()
            .map_err(|e| AppError::archive_error(e.to_string(), Some(source.to_path_buf())))?;

        let mut headers = Vec::new();
        for entry_result in entries {
            let entry = entry_result.map_err(|e| {
                AppError::archive_error(
                    format!("Failed to read tar entry: {}", e),
                    Some(source.to_path_buf()),
                )
            })?;
            let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
            let entry_type = entry.header().entry_type();
            let link_name = entry
                .link_name_bytes()
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned());

            let path = match entry_type {
                EntryType::XGlobalHeader => PathBuf::new(),
                _ => normalize_member(&name)?,
            };

            headers.push(MemberHeader {
                name,
                path,
                entry_type,
                link_name,
            });
        }
        Ok(headers)
    }

    /// 验证全部成员并生成提取计划
    fn validate(source: &Path) -> Result<Vec<PlannedEntry>> {
        let headers = Self::read_headers(source)?;

        let symlinks: HashSet<PathBuf> = headers
            .iter()
            .filter(|h| h.entry_type == EntryType::Symlink)
            .map(|h| h.path.clone())
            .collect();

        headers
            .iter()
            .map(|header| Self::plan_member(header, &symlinks))
            .collect()
    }

    fn plan_member(header: &MemberHeader, symlinks: &HashSet<PathBuf>) -> Result<PlannedEntry> {
        let name = header.name.as_str();

        if header.entry_type == EntryType::XGlobalHeader {
            return Ok(PlannedEntry::Skip);
        }

        if let Some(link) = traverses_symlink(&header.path, symlinks) {
            warn!(member = %name, symlink = %link.display(), "Archive member traverses a symlink");
            return Err(AppError::unsafe_member(
                name,
                format!("path traverses symbolic link '{}'", link.display()),
            ));
        }

        let link_dir = header.path.parent().unwrap_or(Path::new("")).to_path_buf();
        let link_target = || {
            header
                .link_name
                .as_deref()
                .ok_or_else(|| AppError::unsafe_member(name, "link without target"))
        };

        match header.entry_type {
            EntryType::Directory if header.path.as_os_str().is_empty() => Ok(PlannedEntry::Skip),
            EntryType::Directory => Ok(PlannedEntry::Directory(header.path.clone())),
            _ if header.path.as_os_str().is_empty() => {
                Err(AppError::unsafe_member(name, "member resolves to the extraction root"))
            }
            EntryType::Regular | EntryType::Continuous | EntryType::GNUSparse => {
                Ok(PlannedEntry::File(header.path.clone()))
            }
            EntryType::Symlink => {
                let target = link_target()?;
                let resolved = resolve_link_target(name, &link_dir, target, symlinks)?;
                Self::reject_symlink_traversal(name, &resolved, symlinks)?;
                Ok(PlannedEntry::Symlink(header.path.clone()))
            }
            EntryType::Link => {
                let target = link_target()?;
                // tar stores hardlink targets relative to the archive root
                resolve_link_target(name, &link_dir, target, symlinks)?;
                let source = resolve_link_target(name, Path::new(""), target, symlinks)?;
                Self::reject_symlink_traversal(name, &source, symlinks)?;
                if symlinks.contains(&source) {
                    return Err(AppError::unsafe_member(name, "hard link to a symbolic link"));
                }
                Ok(PlannedEntry::HardLink {
                    path: header.path.clone(),
                    source,
                })
            }
            EntryType::Char | EntryType::Block | EntryType::Fifo => {
                Err(AppError::unsafe_member(name, "special file"))
            }
            other => {
                warn!(member = %name, entry_type = ?other, "Skipping unsupported tar entry type");
                Ok(PlannedEntry::Skip)
            }
        }
    }

    fn reject_symlink_traversal(
        name: &str,
        resolved: &Path,
        symlinks: &HashSet<PathBuf>,
    ) -> Result<()> {
        if let Some(link) = traverses_symlink(resolved, symlinks) {
            return Err(AppError::unsafe_member(
                name,
                format!("link target traverses symbolic link '{}'", link.display()),
            ));
        }
        Ok(())
    }

    fn unpack(source: &Path, base: &Path, plan: &[PlannedEntry]) -> Result<ExtractionSummary> {
        let mut archive = Self::open(source)?;
        let entries = archive
            .entries()
            .map_err(|e| AppError::archive_error(e.to_string(), Some(source.to_path_buf())))?;

        let mut summary = ExtractionSummary::new();
        let mut planned = plan.iter();

        for entry_result in entries {
            let mut entry = entry_result.map_err(|e| {
                AppError::archive_error(
                    format!("Failed to read tar entry: {}", e),
                    Some(source.to_path_buf()),
                )
            })?;
            let step = planned.next().ok_or_else(|| {
                AppError::archive_error(
                    "Archive changed between validation and extraction",
                    Some(source.to_path_buf()),
                )
            })?;

            match step {
                PlannedEntry::Skip => {}
                PlannedEntry::Directory(path) => {
                    create_dir(&base.join(path))?;
                    summary.directories += 1;
                }
                PlannedEntry::File(path) | PlannedEntry::Symlink(path) => {
                    let destination = base.join(path);
                    if let Some(parent) = destination.parent() {
                        create_dir(parent)?;
                    }
                    entry.unpack(&destination).map_err(|e| {
                        AppError::archive_error(
                            format!("Failed to unpack tar entry: {}", e),
                            Some(destination.clone()),
                        )
                    })?;
                    if matches!(step, PlannedEntry::File(_)) {
                        summary.add_file(entry.header().size().unwrap_or(0));
                    } else {
                        summary.links += 1;
                    }
                }
                PlannedEntry::HardLink { path, source: link_source } => {
                    let destination = base.join(path);
                    if let Some(parent) = destination.parent() {
                        create_dir(parent)?;
                    }
                    fs::hard_link(base.join(link_source), &destination).map_err(|e| {
                        AppError::io_error(
                            format!("Failed to create hard link from archive: {}", e),
                            Some(destination.clone()),
                        )
                    })?;
                    summary.links += 1;
                }
            }
        }

        Ok(summary)
    }
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|e| {
        AppError::io_error(
            format!("Failed to create directory: {}", e),
            Some(path.to_path_buf()),
        )
    })
}
