//! Safe archive extraction and single-file decompression
//!
//! Hostile input is expected: every archive is validated member by member
//! before anything is written, and a single unsafe member aborts the whole
//! extraction with `UnsafeArchiveMember`.

pub mod archive_handler;
pub mod decompress;
pub mod mime;
pub mod path_validator;
pub mod tar_handler;
pub mod zip_handler;

pub use archive_handler::{ArchiveHandler, ExtractionSummary};
pub use decompress::{bunzip2, decompress, gunzip, unxz};
pub use mime::{sniff, ArchiveFormat, Compression, ARCHIVE_MIME_TYPES, COMPRESSED_MIME_TYPES};
pub use tar_handler::TarHandler;
pub use zip_handler::ZipHandler;

use crate::error::Result;
use std::path::Path;

impl ArchiveFormat {
    pub fn handler(&self) -> &'static dyn ArchiveHandler {
        match self {
            ArchiveFormat::Tar => &TarHandler,
            ArchiveFormat::Zip => &ZipHandler,
        }
    }
}

/// Extract an uncompressed tar archive into an existing directory
pub fn extract_tar(source: &Path, target_dir: &Path) -> Result<ExtractionSummary> {
    TarHandler.extract(source, target_dir)
}

/// Extract a zip archive into an existing directory
pub fn extract_zip(source: &Path, target_dir: &Path) -> Result<ExtractionSummary> {
    ZipHandler.extract(source, target_dir)
}
