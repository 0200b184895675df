//! Vulkan RHI (Rendering Hardware Interface) 抽象层
//!
//! 提供对 Vulkan API 的高层封装，核心是多帧并行下的运行时机制：
//! 命令缓冲的有界复用、可增长的描述符分配器、基于 timeline semaphore
//! 的延迟销毁，以及主/次级多线程命令录制。
//!
//! 所有 Vulkan 资源通过显式传入的 [`rhi::Rhi`] 共享状态管理，
//! 不使用全局单例，便于单元测试与多实例场景。

pub mod basic;
pub mod commands;
pub mod deferred_executor;
pub mod descriptors;
pub mod error;
pub mod foundation;
pub mod frames;
pub mod render_context;
pub mod rendering_info;
pub mod rhi;
