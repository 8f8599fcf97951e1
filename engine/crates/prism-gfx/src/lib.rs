//! Prism GFX 边界层
//!
//! 渲染图只依赖这里定义的描述结构与 trait，不直接调用 Vulkan：
//!
//! - [`resources::factory::GfxResourceFactory`]: 创建 image / buffer / sampler / heap
//! - [`pipelines::shader::GfxPipelineCompiler`]: 编译 shader，创建 pipeline
//! - [`commands::recorder::GfxCommandRecorder`]: 录制 GPU 命令
//! - [`sync::fence::GfxFence`]: 查询 GPU 完成进度
//!
//! [`headless`] 模块提供一个不依赖驱动的实现，会记录每一次调用，
//! 用于离线任务和测试。

pub mod basic;
pub mod commands;
pub mod headless;
pub mod pipelines;
pub mod resources;
pub mod sync;
