use std::sync::Arc;

use ash::vk;
use itertools::Itertools;

use crate::{
    commands::{command_buffer::CommandBuffer, command_queue::QueueFamily},
    error::RhiResult,
    foundation::{debug_messenger::DebugType, device::DeviceFunctions},
};

/// command pool 是和 queue family 绑定的，而不是和 queue 绑定的
pub struct CommandPool {
    handle: vk::CommandPool,
    queue_family: QueueFamily,
    device_functions: Arc<DeviceFunctions>,

    _debug_name: String,
    valid: bool,
}

// init & destroy
impl CommandPool {
    pub fn new(
        device_functions: Arc<DeviceFunctions>,
        queue_family: QueueFamily,
        flags: vk::CommandPoolCreateFlags,
        debug_name: &str,
    ) -> RhiResult<Self> {
        let pool = unsafe {
            device_functions.create_command_pool(
                &vk::CommandPoolCreateInfo::default()
                    .queue_family_index(queue_family.queue_family_index)
                    .flags(flags),
                None,
            )?
        };

        let command_pool = Self {
            handle: pool,
            queue_family,
            device_functions,
            _debug_name: debug_name.to_string(),
            valid: true,
        };
        command_pool.device_functions.set_debug_name(&command_pool, debug_name);
        Ok(command_pool)
    }

    pub fn destroy(mut self) {
        unsafe {
            self.device_functions.destroy_command_pool(self.handle, None);
        }
        self.valid = false;
    }
}

// getters
impl CommandPool {
    /// getter
    #[inline]
    pub fn handle(&self) -> vk::CommandPool {
        self.handle
    }

    #[inline]
    pub fn queue_family(&self) -> &QueueFamily {
        &self.queue_family
    }
}

// tools
impl CommandPool {
    /// 这个调用并不会释放资源，而是将 pool 内的 command buffer 设置到初始状态
    ///
    /// reset 之后，pool 内的 command buffer 又可以重新录制命令
    pub fn reset_all_buffers(&self) -> RhiResult<()> {
        unsafe {
            self.device_functions.reset_command_pool(self.handle, vk::CommandPoolResetFlags::RELEASE_RESOURCES)?;
        }
        Ok(())
    }

    /// 释放 command buffer
    ///
    /// 释放之后，command buffer 不能再被使用
    pub fn free_command_buffers(&self, command_buffers: Vec<CommandBuffer>) {
        let command_buffer_handles = command_buffers.iter().map(|cmd| cmd.vk_handle()).collect_vec();
        unsafe {
            self.device_functions.free_command_buffers(self.handle, &command_buffer_handles);
        }
    }
}

impl DebugType for CommandPool {
    fn debug_type_name() -> &'static str {
        "RhiCommandPool"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        assert!(!self.valid, "CommandPool must be destroyed manually.");
        log::info!("Dropping CommandPool: {}", self._debug_name);
    }
}
