use crate::error::Result;
use std::path::Path;

/**
 * 归档处理器 trait
 *
 * 每个实现必须在写入任何内容之前验证全部成员；
 * 只要有一个成员不安全，整个提取就被中止且目标目录保持不变。
 */
pub trait ArchiveHandler: Send + Sync {
    /**
     * 提取归档内容
     *
     * # 参数
     * * `source` - 归档文件路径
     * * `target_dir` - 已存在的目标目录
     *
     * # 返回
     * * `Ok(ExtractionSummary)` - 提取摘要
     * * `Err(AppError::UnsafeArchiveMember)` - 存在不安全成员，未提取任何内容
     */
    fn extract(&self, source: &Path, target_dir: &Path) -> Result<ExtractionSummary>;

    /**
     * 处理器名称（用于日志）
     */
    fn name(&self) -> &'static str;
}

/**
 * 提取摘要
 */
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionSummary {
    /// 常规文件数量
    pub files_extracted: usize,
    /// 目录数量
    pub directories: usize,
    /// 符号链接与硬链接数量
    pub links: usize,
    /// 常规文件总大小（字节）
    pub total_size: u64,
}

impl ExtractionSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&mut self, size: u64) {
        self.files_extracted += 1;
        self.total_size += size;
    }
}
