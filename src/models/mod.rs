pub mod replica;
pub mod response;

// 重新导出核心类型
pub use replica::{ReplicaTemplate, TemplateMatch, TemplateSegment};
pub use response::{ChecksumSummary, PathSummary, UploadResponse, UploadStatus};
