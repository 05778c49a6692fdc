//! 基础设施层 - 技术实现
//!
//! 配置加载与校验

pub mod config;
