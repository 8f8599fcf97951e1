//! Prism 工具集
//!
//! 提供日志初始化、工作区路径管理、TOML 配置读写等通用工具。
//!
//! # PrismPath
//! 基于工作区根目录的统一路径管理，避免硬编码相对路径。
//!
//! # TOML 配置
//! 任意实现了 serde 的配置结构体都可以通过 [`settings::load_toml`] 读取。

pub mod init_log;
pub mod resource;
pub mod settings;
