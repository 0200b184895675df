use std::sync::Arc;

use ash::vk;
use itertools::Itertools;

use crate::{
    commands::{fence::Fence, submit_info::SubmitInfo},
    error::{RhiError, RhiResult},
    foundation::{debug_messenger::DebugType, device::DeviceFunctions},
};

/// 队列用途分类
///
/// 变体集合在编译期就是固定的，用 enum + match 分发，不用虚表
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum QueueClass {
    Graphics,
    Compute,
    Transfer,
}

impl QueueClass {
    #[inline]
    pub fn queue_flags(self) -> vk::QueueFlags {
        match self {
            QueueClass::Graphics => vk::QueueFlags::GRAPHICS,
            QueueClass::Compute => vk::QueueFlags::COMPUTE,
            QueueClass::Transfer => vk::QueueFlags::TRANSFER,
        }
    }

    #[inline]
    pub fn name(self) -> &'static str {
        match self {
            QueueClass::Graphics => "graphics",
            QueueClass::Compute => "compute",
            QueueClass::Transfer => "transfer",
        }
    }
}

#[derive(Clone, Debug)]
pub struct QueueFamily {
    pub name: String,
    pub queue_family_index: u32,
    pub queue_flags: vk::QueueFlags,
    pub queue_count: u32,
}

/// # destroy
///
/// QueueFamily 在 Device 销毁时会被销毁
pub struct CommandQueue {
    pub(crate) vk_queue: vk::Queue,
    pub(crate) queue_family: QueueFamily,
    pub(crate) device_functions: Arc<DeviceFunctions>,
}
impl DebugType for CommandQueue {
    fn debug_type_name() -> &'static str {
        "RhiQueue"
    }
    fn vk_handle(&self) -> impl vk::Handle {
        self.vk_queue
    }
}

// getter
impl CommandQueue {
    #[inline]
    pub fn queue_family(&self) -> &QueueFamily {
        &self.queue_family
    }

    #[inline]
    pub fn handle(&self) -> vk::Queue {
        self.vk_queue
    }
}

// tools
impl CommandQueue {
    /// 提交一批命令
    ///
    /// submit 被拒绝时返回错误并打 log，不做自动重试，重试策略由调用方决定
    pub fn submit(&self, batches: Vec<SubmitInfo>, fence: Option<&Fence>) -> RhiResult<()> {
        // batches 的存在是有必要的，submit_infos 引用的是 batches 的内存
        let submit_infos = batches.iter().map(|b| b.submit_info()).collect_vec();
        let result = unsafe {
            self.device_functions.queue_submit2(
                self.vk_queue,
                &submit_infos,
                fence.map_or(vk::Fence::null(), |f| f.handle()),
            )
        };
        result.map_err(|e| {
            log::error!("queue submit rejected on {}: {:?}", self.queue_family.name, e);
            RhiError::Submit(e)
        })
    }

    /// 根据 specification，vkQueueWaitIdle 应该和 Fence 效率相同
    pub fn wait_idle(&self) -> RhiResult<()> {
        unsafe {
            self.device_functions.queue_wait_idle(self.vk_queue)?;
        }
        Ok(())
    }
}

// debug 相关命令
impl CommandQueue {
    #[inline]
    pub fn begin_label<S>(&self, label_name: S, label_color: glam::Vec4)
    where
        S: AsRef<str>,
    {
        let name = std::ffi::CString::new(label_name.as_ref()).unwrap();
        unsafe {
            self.device_functions.debug_utils.queue_begin_debug_utils_label(
                self.vk_queue,
                &vk::DebugUtilsLabelEXT::default().label_name(name.as_c_str()).color(label_color.into()),
            );
        }
    }

    #[inline]
    pub fn end_label(&self) {
        unsafe {
            self.device_functions.debug_utils.queue_end_debug_utils_label(self.vk_queue);
        }
    }
}
