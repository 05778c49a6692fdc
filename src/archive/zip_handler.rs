use crate::archive::archive_handler::{ArchiveHandler, ExtractionSummary};
use crate::archive::path_validator::normalize_member;
use crate::error::{AppError, Result};
use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zip::ZipArchive;

/**
 * ZIP 文件处理器
 *
 * 先验证全部条目名称，再逐个写出。符号链接条目按普通文件写出（内容为链接目标），
 * 不会在磁盘上创建链接。
 */
pub struct ZipHandler;

impl ArchiveHandler for ZipHandler {
    fn extract(&self, source: &Path, target_dir: &Path) -> Result<ExtractionSummary> {
        info!(
            source = %source.display(),
            target = %target_dir.display(),
            "Extracting zip archive"
        );

        let base = target_dir.canonicalize().map_err(|e| {
            AppError::io_error(
                format!("Failed to resolve extraction directory: {}", e),
                Some(target_dir.to_path_buf()),
            )
        })?;

        let file = File::open(source).map_err(|e| {
            AppError::io_error(
                format!("Failed to open zip archive: {}", e),
                Some(source.to_path_buf()),
            )
        })?;
        let mut archive = ZipArchive::new(file).map_err(|e| {
            AppError::archive_error(
                format!("Failed to read zip archive: {}", e),
                Some(source.to_path_buf()),
            )
        })?;

        let plan = Self::validate(&mut archive, source)?;
        let summary = Self::unpack(&mut archive, source, &base, &plan)?;

        debug!(
            files = summary.files_extracted,
            directories = summary.directories,
            total_size = summary.total_size,
            "Zip extraction complete"
        );
        Ok(summary)
    }

    fn name(&self) -> &'static str {
        "zip"
    }
}

impl ZipHandler {
    /// 验证全部条目，返回 (相对路径, 是否目录)
    fn validate(archive: &mut ZipArchive<File>, source: &Path) -> Result<Vec<(PathBuf, bool)>> {
        let mut plan = Vec::with_capacity(archive.len());
        for index in 0..archive.len() {
            let entry = archive.by_index_raw(index).map_err(|e| {
                AppError::archive_error(
                    format!("Failed to read zip entry {}: {}", index, e),
                    Some(source.to_path_buf()),
                )
            })?;
            let name = entry.name().to_string();
            let path = normalize_member(&name)?;
            let is_dir = entry.is_dir();
            if path.as_os_str().is_empty() && !is_dir {
                return Err(AppError::unsafe_member(
                    name,
                    "member resolves to the extraction root",
                ));
            }
            plan.push((path, is_dir));
        }
        Ok(plan)
    }

    fn unpack(
        archive: &mut ZipArchive<File>,
        source: &Path,
        base: &Path,
        plan: &[(PathBuf, bool)],
    ) -> Result<ExtractionSummary> {
        let mut summary = ExtractionSummary::new();

        for (index, (path, is_dir)) in plan.iter().enumerate() {
            let destination = base.join(path);
            if *is_dir {
                create_dir(&destination)?;
                summary.directories += 1;
                continue;
            }

            if let Some(parent) = destination.parent() {
                create_dir(parent)?;
            }

            let mut entry = archive.by_index(index).map_err(|e| {
                AppError::archive_error(
                    format!("Failed to open zip entry {}: {}", index, e),
                    Some(source.to_path_buf()),
                )
            })?;

            let output = File::create(&destination).map_err(|e| {
                AppError::io_error(
                    format!("Failed to create extracted file: {}", e),
                    Some(destination.clone()),
                )
            })?;
            let mut writer = BufWriter::new(output);
            let written = io::copy(&mut entry, &mut writer).map_err(|e| {
                AppError::archive_error(
                    format!("Failed to extract zip entry: {}", e),
                    Some(destination.clone()),
                )
            })?;
            summary.add_file(written);
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
