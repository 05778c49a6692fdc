//! Single-file decompression
//!
//! Streams a compressed file into a caller-chosen destination with fixed
//! size buffered copies. Concatenated members/streams are decoded in full.

use crate::archive::mime::Compression;
use crate::error::{AppError, Result};
use bzip2::read::MultiBzDecoder;
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use tracing::info;
use xz2::read::XzDecoder;

/// Copy buffer size
const COPY_BUFFER_SIZE: usize = 64 * 1024;

pub fn gunzip(source: &Path, destination: &Path) -> Result<u64> {
    decompress(Compression::Gzip, source, destination)
}

pub fn bunzip2(source: &Path, destination: &Path) -> Result<u64> {
    decompress(Compression::Bzip2, source, destination)
}

pub fn unxz(source: &Path, destination: &Path) -> Result<u64> {
    decompress(Compression::Xz, source, destination)
}

/// Decompress `source` into `destination`, returning the bytes written
///
/// The destination file is created or truncated.
pub fn decompress(compression: Compression, source: &Path, destination: &Path) -> Result<u64> {
    info!(
        source = %source.display(),
        destination = %destination.display(),
        compression = ?compression,
        "Decompressing file"
    );

    let input = File::open(source).map_err(|e| {
        AppError::io_error(
            format!("Failed to open compressed file: {}", e),
            Some(source.to_path_buf()),
        )
    })?;

    let mut reader: Box<dyn Read> = match compression {
        Compression::Gzip => Box::new(MultiGzDecoder::new(input)),
        Compression::Bzip2 => Box::new(MultiBzDecoder::new(input)),
        Compression::Xz => Box::new(XzDecoder::new_multi_decoder(input)),
    };

    let output = File::create(destination).map_err(|e| {
        AppError::io_error(
            format!("Failed to create decompressed file: {}", e),
            Some(destination.to_path_buf()),
        )
    })?;
    let mut writer = BufWriter::new(output);

    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let bytes_read = reader.read(&mut buffer).map_err(|e| {
            AppError::archive_error(
                format!("Failed to decompress {:?} stream: {}", compression, e),
                Some(source.to_path_buf()),
            )
        })?;
        if bytes_read == 0 {
            break;
        }
        writer.write_all(&buffer[..bytes_read]).map_err(|e| {
            AppError::io_error(
                format!("Failed to write decompressed data: {}", e),
                Some(destination.to_path_buf()),
            )
        })?;
        total += bytes_read as u64;
    }

    writer.flush().map_err(|e| {
        AppError::io_error(
            format!("Failed to flush decompressed data: {}", e),
            Some(destination.to_path_buf()),
        )
    })?;

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn payload() -> Vec<u8> {
        (0..200_000u32).map(|i| (i % 97) as u8).collect()
    }

    #[test]
    fn test_gunzip() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("in.gz");
        let destination = temp_dir.path().join("out");

        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
        encoder.write_all(&payload()).unwrap();
        fs::write(&source, encoder.finish().unwrap()).unwrap();

        let written = gunzip(&source, &destination).unwrap();
        assert_eq!(written, payload().len() as u64);
        assert_eq!(fs::read(&destination).unwrap(), payload());
    }

    #[test]
    fn test_gunzip_concatenated_members() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("multi.gz");
        let destination = temp_dir.path().join("out");

        let mut data = Vec::new();
        for part in [b"first ".as_slice(), b"second".as_slice()] {
            let mut encoder =
                flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
            encoder.write_all(part).unwrap();
            data.extend(encoder.finish().unwrap());
        }
        fs::write(&source, data).unwrap();

        gunzip(&source, &destination).unwrap();
        assert_eq!(fs::read(&destination).unwrap(), b"first second");
    }

    #[test]
    fn test_bunzip2() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("in.bz2");
        let destination = temp_dir.path().join("out");

        let mut encoder =
            bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::fast());
        encoder.write_all(&payload()).unwrap();
        fs::write(&source, encoder.finish().unwrap()).unwrap();

        bunzip2(&source, &destination).unwrap();
        assert_eq!(fs::read(&destination).unwrap(), payload());
    }

    #[test]
    fn test_unxz() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("in.xz");
        let destination = temp_dir.path().join("out");

        let mut encoder = xz2::write::XzEncoder::new(Vec::new(), 1);
        encoder.write_all(&payload()).unwrap();
        fs::write(&source, encoder.finish().unwrap()).unwrap();

        unxz(&source, &destination).unwrap();
        assert_eq!(fs::read(&destination).unwrap(), payload());
    }

    #[test]
    fn test_corrupt_stream_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("bad.gz");
        fs::write(&source, [0x1F, 0x8B, 0x08, 0x00, 0xFF, 0xFF]).unwrap();

        assert!(gunzip(&source, &temp_dir.path().join("out")).is_err());
    }
}
