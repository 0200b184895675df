use ash::vk;

use crate::commands::command_queue::QueueClass;

/// RHI 层的错误类型
///
/// 错误分为两类：
/// - 初始化阶段的失败（instance/device/pool 创建失败）对调用方而言是致命的，
///   调用方应当中止启动流程
/// - 稳态运行期的失败（submit 被拒绝、描述符池耗尽）是可恢复的，
///   由调用方决定丢帧还是中止
#[derive(Debug, thiserror::Error)]
pub enum RhiError {
    #[error("vulkan call failed: {0}")]
    Vulkan(#[from] vk::Result),

    #[error("failed to load vulkan entry: {0}")]
    EntryLoad(String),

    #[error("no suitable physical device found")]
    NoSuitableGpu,

    #[error("no queue family supports {0:?}")]
    MissingQueueFamily(QueueClass),

    #[error("queue submit rejected: {0}")]
    Submit(vk::Result),

    #[error("descriptor pool exhausted after retry")]
    DescriptorPoolExhausted,

    #[error("timed out waiting for an in-flight command buffer")]
    AcquireTimeout,
}

pub type RhiResult<T> = Result<T, RhiError>;
