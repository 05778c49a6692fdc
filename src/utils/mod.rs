//! 通用工具函数模块
//!
//! 提供文件名清理与路径处理等通用工具。

pub mod path;

pub use path::*;
