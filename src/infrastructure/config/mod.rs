//! 配置管理基础设施层
//!
//! `BucketConfig` 可以从 TOML/JSON 文件加载，也可以在代码中构建；
//! 加载后必须通过 `validator` 校验。

use crate::error::{AppError, Result};
use crate::storage::checksum::DEFAULT_BLOCK_SIZE;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use validator::{Validate, ValidationError};

/// 存储配置根结构
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BucketConfig {
    /// 所有存储根目录的父目录（必须位于同一文件系统）
    #[validate(custom(function = "validate_archive_dir"))]
    pub archive_dir: PathBuf,

    /// 校验和算法名称（大小写不敏感）
    #[serde(default = "default_checksum_type")]
    #[validate(length(min = 1, max = 32))]
    pub checksum_type: String,

    /// 哈希读取块大小（字节）
    #[serde(default = "default_block_size")]
    #[validate(range(min = 512, max = 67108864))]
    pub block_size: usize,

    /// 公开访问的基础 URI，配置后响应中的路径以 URI 形式返回
    #[serde(default)]
    #[validate(custom(function = "validate_archive_uri"))]
    pub archive_uri: Option<String>,

    /// 副本模板，例如 `projects/${Project}/builds`
    #[serde(default)]
    pub replicates: Vec<String>,
}

fn default_checksum_type() -> String {
    "blake3".to_string()
}

fn default_block_size() -> usize {
    DEFAULT_BLOCK_SIZE
}

fn validate_archive_dir(path: &Path) -> std::result::Result<(), ValidationError> {
    if path.as_os_str().is_empty() {
        return Err(ValidationError::new("archive_dir_empty"));
    }
    Ok(())
}

fn validate_archive_uri(uri: &str) -> std::result::Result<(), ValidationError> {
    let trimmed = uri.trim();
    let looks_valid = trimmed.starts_with("http://")
        || trimmed.starts_with("https://")
        || trimmed.starts_with('/');
    if trimmed.is_empty() || !looks_valid || trimmed.chars().any(char::is_whitespace) {
        return Err(ValidationError::new("archive_uri_invalid"));
    }
    Ok(())
}

impl BucketConfig {
    /// 使用默认值创建配置
    pub fn new(archive_dir: impl Into<PathBuf>) -> Self {
        Self {
            archive_dir: archive_dir.into(),
            checksum_type: default_checksum_type(),
            block_size: default_block_size(),
            archive_uri: None,
            replicates: Vec::new(),
        }
    }

    pub fn with_checksum_type(mut self, checksum_type: impl Into<String>) -> Self {
        self.checksum_type = checksum_type.into();
        self
    }

    pub fn with_archive_uri(mut self, uri: impl Into<String>) -> Self {
        self.archive_uri = Some(uri.into());
        self
    }

    pub fn with_replicate(mut self, template: impl Into<String>) -> Self {
        self.replicates.push(template.into());
        self
    }

    /// 从配置文件加载（格式由扩展名决定：`.toml` / `.json`）
    pub fn from_file(path: &Path) -> Result<Self> {
        let config: BucketConfig = ::config::Config::builder()
            .add_source(::config::File::from(path))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| {
                AppError::config_error(format!(
                    "Failed to load configuration from '{}': {}",
                    path.display(),
                    e
                ))
            })?;

        config.validate_all()?;
        Ok(config)
    }

    /// 执行字段校验
    pub fn validate_all(&self) -> Result<()> {
        self.validate()
            .map_err(|e| AppError::config_error(format!("Configuration validation failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = BucketConfig::new("/srv/bucket");
        assert_eq!(config.checksum_type, "blake3");
        assert_eq!(config.block_size, DEFAULT_BLOCK_SIZE);
        assert!(config.archive_uri.is_none());
        assert!(config.validate_all().is_ok());
    }

    #[test]
    fn test_validation_failures() {
        let mut config = BucketConfig::new("/srv/bucket");
        config.block_size = 0;
        assert_eq!(config.validate_all().unwrap_err().kind(), ErrorKind::InvalidArgument);

        let config = BucketConfig::new("").with_archive_uri("https://x");
        assert!(config.validate_all().is_err());

        let config = BucketConfig::new("/srv").with_archive_uri("ftp://nope");
        assert!(config.validate_all().is_err());

        let config = BucketConfig::new("/srv").with_checksum_type("");
        assert!(config.validate_all().is_err());
    }

    #[test]
    fn test_from_toml_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bucket.toml");
        std::fs::write(
            &path,
            r#"
archive_dir = "/srv/bucket"
checksum_type = "SHA256"
archive_uri = "https://files.example.com"
replicates = ["projects/${Project}/builds"]
"#,
        )
        .unwrap();

        let config = BucketConfig::from_file(&path).unwrap();
        assert_eq!(config.archive_dir, PathBuf::from("/srv/bucket"));
        assert_eq!(config.checksum_type, "SHA256");
        assert_eq!(config.block_size, DEFAULT_BLOCK_SIZE);
        assert_eq!(config.replicates.len(), 1);
    }

    #[test]
    fn test_from_json_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bucket.json");
        std::fs::write(&path, r#"{"archive_dir": "/srv/bucket", "block_size": 4096}"#).unwrap();

        let config = BucketConfig::from_file(&path).unwrap();
        assert_eq!(config.block_size, 4096);
        assert_eq!(config.checksum_type, "blake3");
    }

    #[test]
    fn test_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let err = BucketConfig::from_file(&temp_dir.path().join("absent.toml")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }
}
