//! Content type detection by magic number
//!
//! Only the leading bytes of a file are inspected. The two supported sets
//! are exposed as ordered constants and as closed enums the pipeline matches
//! on.

use crate::error::{AppError, Result};
use serde::Serialize;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::debug;

/// Single-file compression formats the pipeline can decompress, in order
pub const COMPRESSED_MIME_TYPES: [&str; 4] = [
    "application/gzip",
    "application/x-gzip",
    "application/x-xz",
    "application/x-bzip2",
];

/// Archive formats the pipeline can explode, in order
pub const ARCHIVE_MIME_TYPES: [&str; 2] = ["application/x-tar", "application/zip"];

pub const MIME_EMPTY: &str = "inode/x-empty";
pub const MIME_TEXT: &str = "text/plain";
pub const MIME_BINARY: &str = "application/octet-stream";

const SNIFF_LEN: usize = 8 * 1024;
const TAR_MAGIC_OFFSET: usize = 257;

const MAGIC_NUMBERS: &[(&[u8], &str)] = &[
    // 压缩
    (&[0x1F, 0x8B], "application/gzip"),
    (b"BZh", "application/x-bzip2"),
    (&[0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00], "application/x-xz"),
    (&[0x28, 0xB5, 0x2F, 0xFD], "application/zstd"),
    // 归档
    (&[0x50, 0x4B, 0x03, 0x04], "application/zip"),
    (&[0x50, 0x4B, 0x05, 0x06], "application/zip"),
    (&[0x50, 0x4B, 0x07, 0x08], "application/zip"),
    (&[0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C], "application/x-7z-compressed"),
    // 文档与图片
    (b"%PDF-", "application/pdf"),
    (&[0x89, 0x50, 0x4E, 0x47], "image/png"),
    (&[0xFF, 0xD8, 0xFF], "image/jpeg"),
    (b"GIF8", "image/gif"),
    // 可执行文件
    (&[0x7F, 0x45, 0x4C, 0x46], "application/x-executable"),
];

/// Detect the content type of a file from its leading bytes
pub fn sniff(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| {
        AppError::io_error(
            format!("Failed to open file for type detection: {}", e),
            Some(path.to_path_buf()),
        )
    })?;

    let mut buffer = Vec::with_capacity(SNIFF_LEN);
    (&mut file)
        .take(SNIFF_LEN as u64)
        .read_to_end(&mut buffer)
        .map_err(|e| {
            AppError::io_error(
                format!("Failed to read file for type detection: {}", e),
                Some(path.to_path_buf()),
            )
        })?;

    let mime = sniff_bytes(&buffer);
    debug!(path = %path.display(), mime = mime, "Detected content type");
    Ok(mime.to_string())
}

/// Content type of an in-memory prefix
pub fn sniff_bytes(buffer: &[u8]) -> &'static str {
    if buffer.is_empty() {
        return MIME_EMPTY;
    }

    for &(magic, mime) in MAGIC_NUMBERS {
        if buffer.starts_with(magic) {
            return mime;
        }
    }

    if buffer.len() >= TAR_MAGIC_OFFSET + 5 && &buffer[TAR_MAGIC_OFFSET..TAR_MAGIC_OFFSET + 5] == b"ustar" {
        return "application/x-tar";
    }

    if buffer.contains(&0) {
        MIME_BINARY
    } else {
        MIME_TEXT
    }
}

/// Supported single-file compression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    Gzip,
    Bzip2,
    Xz,
}

impl Compression {
    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime {
            "application/gzip" | "application/x-gzip" => Some(Compression::Gzip),
            "application/x-bzip2" => Some(Compression::Bzip2),
            "application/x-xz" => Some(Compression::Xz),
            _ => None,
        }
    }

    /// Name of the decompressed output, e.g. `notes.txt.gz` -> `notes.txt`
    /// and `build.tgz` -> `build.tar`
    pub fn decompressed_name(&self, name: &str) -> String {
        let (plain, tarball): (&[&str], &[&str]) = match self {
            Compression::Gzip => (&[".gz", ".gzip"], &[".tgz"]),
            Compression::Bzip2 => (&[".bz2", ".bzip2"], &[".tbz2", ".tbz"]),
            Compression::Xz => (&[".xz"], &[".txz"]),
        };

        if let Some(stem) = strip_suffix_ignore_case(name, tarball) {
            return format!("{}.tar", stem);
        }
        match strip_suffix_ignore_case(name, plain) {
            Some(stem) => stem.to_string(),
            None => name.to_string(),
        }
    }
}

/// Supported archive formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveFormat {
    Tar,
    Zip,
}

impl ArchiveFormat {
    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime {
            "application/x-tar" => Some(ArchiveFormat::Tar),
            "application/zip" => Some(ArchiveFormat::Zip),
            _ => None,
        }
    }

    /// Name of the exploded tree, e.g. `build.tar` -> `build`
    pub fn exploded_name(&self, name: &str) -> String {
        let suffixes: &[&str] = match self {
            ArchiveFormat::Tar => &[".tar"],
            ArchiveFormat::Zip => &[".zip"],
        };
        match strip_suffix_ignore_case(name, suffixes) {
            Some(stem) => stem.to_string(),
            None => name.to_string(),
        }
    }
}

fn strip_suffix_ignore_case<'a>(name: &'a str, suffixes: &[&str]) -> Option<&'a str> {
    suffixes.iter().find_map(|suffix| {
        let split = name.len().checked_sub(suffix.len())?;
        if split > 0 && name.is_char_boundary(split) && name[split..].eq_ignore_ascii_case(suffix) {
            Some(&name[..split])
        } else {
            None
        }
    })
}
