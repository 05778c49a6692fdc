//! Shared fixtures for the integration tests
#![allow(dead_code)]

use bucket_store::{BucketConfig, BucketContext, Upload};
use flate2::write::GzEncoder;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tar::{Builder, EntryType, Header};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

pub fn context(dir: &TempDir, templates: &[&str]) -> Arc<BucketContext> {
    let mut config = BucketConfig::new(dir.path().join("bucket"));
    for template in templates {
        config = config.with_replicate(*template);
    }
    Arc::new(BucketContext::from_config(&config).unwrap())
}

/// Create, fill and process an upload
pub fn upload(
    ctx: &Arc<BucketContext>,
    filename: &str,
    content: &[u8],
    headers: &[(&str, &str)],
) -> Upload {
    let mut upload = Upload::new(Arc::clone(ctx), Some(filename), headers.iter().copied()).unwrap();
    fs::write(upload.upload_destination(), content).unwrap();
    upload.process().unwrap();
    upload
}

pub fn tar_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = Builder::new(Vec::new());
    for (name, content) in files {
        let mut header = Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(EntryType::Regular);
        builder.append_data(&mut header, name, *content).unwrap();
    }
    builder.into_inner().unwrap()
}

/// A tar whose single member name is written verbatim into the header,
/// bypassing the path checks of `tar::Builder`
pub fn hostile_tar_bytes(member: &str, content: &[u8]) -> Vec<u8> {
    let mut header = Header::new_gnu();
    {
        let gnu = header.as_gnu_mut().unwrap();
        gnu.name[..member.len()].copy_from_slice(member.as_bytes());
    }
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_entry_type(EntryType::Regular);
    header.set_cksum();

    let mut builder = Builder::new(Vec::new());
    builder.append(&header, content).unwrap();
    builder.into_inner().unwrap()
}

pub fn zip_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (name, content) in files {
        writer.start_file(*name, SimpleFileOptions::default()).unwrap();
        writer.write_all(content).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

pub fn gzip_bytes(content: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(content).unwrap();
    encoder.finish().unwrap()
}

/// Every path below `root`, relative and sorted
pub fn tree(root: &Path) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = walkdir::WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .map(|entry| entry.unwrap().path().strip_prefix(root).unwrap().to_path_buf())
        .collect();
    paths.sort();
    paths
}

pub fn is_empty_dir(path: &Path) -> bool {
    fs::read_dir(path).unwrap().next().is_none()
}
