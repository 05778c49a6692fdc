//! 上传响应模型
//!
//! 汇总每个已运行阶段的结果：
//! - 各阶段指纹与保留路径
//! - HTTP 风格状态码与错误消息
//! - 按时间排序的诊断日志（可选）

use crate::pipeline::LogRecord;
use crate::storage::Fingerprint;
use serde::Serialize;

/// 成功状态码
pub const CODE_SUCCESS: u16 = 200;
/// 失败状态码
pub const CODE_FAILURE: u16 = 500;

/// 各阶段的指纹
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChecksumSummary {
    /// 原始上传文件
    pub blob: Option<Fingerprint>,
    /// 解压后的文件
    pub decompressed: Option<Fingerprint>,
    /// 归档文件本身
    pub archive: Option<Fingerprint>,
}

/// 各阶段的保留路径（相对 archive_dir，或拼接到公开 URI）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PathSummary {
    pub blob: Option<String>,
    pub decompressed: Option<String>,
    /// 展开后的目录
    pub archive: Option<String>,
    /// 未运行副本阶段时为 `None`
    pub replicas: Option<Vec<String>>,
}

/// 处理状态：成功，或所有捕获到的错误消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum UploadStatus {
    Success(&'static str),
    Failed(Vec<String>),
}

impl UploadStatus {
    pub fn success() -> Self {
        UploadStatus::Success("Success")
    }

    pub fn is_success(&self) -> bool {
        matches!(self, UploadStatus::Success(_))
    }
}

/// 上传响应
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadResponse {
    pub checksum: ChecksumSummary,
    pub path: PathSummary,
    pub code: u16,
    pub status: UploadStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<Vec<LogRecord>>,
}

impl UploadResponse {
    /// 按错误列表推导状态码与状态
    pub fn new(
        checksum: ChecksumSummary,
        path: PathSummary,
        succeeded: bool,
        errors: Vec<String>,
    ) -> Self {
        let status = if errors.is_empty() {
            UploadStatus::success()
        } else {
            UploadStatus::Failed(errors)
        };
        let code = if succeeded && status.is_success() {
            CODE_SUCCESS
        } else {
            CODE_FAILURE
        };

        Self {
            checksum,
            path,
            code,
            status,
            log: None,
        }
    }

    /// 附加日志，按时间戳稳定排序
    pub fn with_log(mut self, mut records: Vec<LogRecord>) -> Self {
        records.sort_by_key(|record| record.timestamp);
        self.log = Some(records);
        self
    }

    pub fn is_success(&self) -> bool {
        self.code == CODE_SUCCESS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Severity;
    use chrono::{Duration, Utc};

    fn record(offset: i64, message: &str) -> LogRecord {
        LogRecord {
            timestamp: Utc::now() + Duration::seconds(offset),
            level: Severity::Info,
            source: "Upload.00000000".to_string(),
            message: message.to_string(),
        }
    }

    #[test]
    fn test_success_serialization() {
        let response = UploadResponse::new(
            ChecksumSummary::default(),
            PathSummary::default(),
            true,
            Vec::new(),
        );

        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["code"], 200);
        assert_eq!(value["status"], "Success");
        assert!(value.get("log").is_none());
        assert!(value["path"]["replicas"].is_null());
    }

    #[test]
    fn test_failure_lists_errors() {
        let response = UploadResponse::new(
            ChecksumSummary::default(),
            PathSummary::default(),
            false,
            vec!["Failed to explode archive: boom".to_string()],
        );

        assert!(!response.is_success());
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["code"], 500);
        assert_eq!(value["status"][0], "Failed to explode archive: boom");
    }

    #[test]
    fn test_log_sorted_by_timestamp() {
        let response = UploadResponse::new(
            ChecksumSummary::default(),
            PathSummary::default(),
            true,
            Vec::new(),
        )
        .with_log(vec![record(5, "late"), record(0, "early")]);

        let log = response.log.unwrap();
        assert_eq!(log[0].message, "early");
        assert_eq!(log[1].message, "late");
    }
}
