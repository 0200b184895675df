use std::sync::Arc;

use ash::vk;

use crate::commands::command_ring::RingFence;
use crate::error::{RhiError, RhiResult};
use crate::foundation::{debug_messenger::DebugType, device::DeviceFunctions};

/// 等待类操作默认的超时时间：无限等待
pub const WAIT_FOREVER: u64 = u64::MAX;

/// # Destroy
/// 不应该实现 Drop，因为可以 Clone，需要手动 destroy
#[derive(Clone)]
pub struct Fence {
    fence: vk::Fence,
    device_functions: Arc<DeviceFunctions>,
}

impl DebugType for Fence {
    fn debug_type_name() -> &'static str {
        "RhiFence"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.fence
    }
}

/// 创建与销毁
impl Fence {
    /// # param
    /// * signaled - 是否创建时就 signaled
    pub fn new(device_functions: Arc<DeviceFunctions>, signaled: bool, debug_name: &str) -> RhiResult<Self> {
        let fence_flags = if signaled { vk::FenceCreateFlags::SIGNALED } else { vk::FenceCreateFlags::empty() };
        let fence =
            unsafe { device_functions.create_fence(&vk::FenceCreateInfo::default().flags(fence_flags), None)? };

        let fence = Self {
            fence,
            device_functions,
        };
        fence.device_functions.set_debug_name(&fence, debug_name);
        Ok(fence)
    }

    #[inline]
    pub fn destroy(self) {
        unsafe {
            self.device_functions.destroy_fence(self.fence, None);
        }
    }
}

/// getters
impl Fence {
    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }
}

/// tools
impl Fence {
    /// 阻塞等待 fence，超时返回 [`RhiError::AcquireTimeout`]
    pub fn wait(&self, timeout_ns: u64) -> RhiResult<()> {
        let result = unsafe {
            self.device_functions.wait_for_fences(std::slice::from_ref(&self.fence), true, timeout_ns)
        };
        match result {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => Err(RhiError::AcquireTimeout),
            Err(e) => Err(e.into()),
        }
    }

    pub fn reset(&self) -> RhiResult<()> {
        unsafe {
            self.device_functions.reset_fences(std::slice::from_ref(&self.fence))?;
        }
        Ok(())
    }

    /// 查询 fence 是否已经 signaled，不阻塞
    pub fn is_signaled(&self) -> RhiResult<bool> {
        let signaled = unsafe { self.device_functions.get_fence_status(self.fence)? };
        Ok(signaled)
    }
}

impl RingFence for Fence {
    fn is_signaled(&self) -> RhiResult<bool> {
        Fence::is_signaled(self)
    }
    fn wait(&self, timeout_ns: u64) -> RhiResult<()> {
        Fence::wait(self, timeout_ns)
    }
    fn reset(&self) -> RhiResult<()> {
        Fence::reset(self)
    }
}
