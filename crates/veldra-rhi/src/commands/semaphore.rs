use std::sync::Arc;

use ash::vk;

use crate::deferred_executor::TimelineValueSource;
use crate::error::{RhiError, RhiResult};
use crate::foundation::{debug_messenger::DebugType, device::DeviceFunctions};

/// 二值信号量，用于一对 submit 之间的单次 GPU-GPU 同步
///
/// # Destroy
/// 不应该实现 Drop，因为可以 Clone，需要手动 destroy
#[derive(Clone)]
pub struct Semaphore {
    semaphore: vk::Semaphore,
    device_functions: Arc<DeviceFunctions>,
}

// 创建与销毁
impl Semaphore {
    pub fn new(device_functions: Arc<DeviceFunctions>, debug_name: &str) -> RhiResult<Self> {
        let semaphore = unsafe { device_functions.create_semaphore(&vk::SemaphoreCreateInfo::default(), None)? };

        let semaphore = Self {
            semaphore,
            device_functions,
        };
        semaphore.device_functions.set_debug_name(&semaphore, debug_name);
        Ok(semaphore)
    }

    #[inline]
    pub fn destroy(self) {
        unsafe {
            self.device_functions.destroy_semaphore(self.semaphore, None);
        }
    }
}

// getters
impl Semaphore {
    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl DebugType for Semaphore {
    fn debug_type_name() -> &'static str {
        "RhiSemaphore"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.semaphore
    }
}

/// timeline 信号量，带有一个单调递增的 counter
///
/// 同一个对象可以被多个 submit wait/signal；counter 只增不减。
/// 生命周期和 RHI 实例一致，由创建者手动 destroy。
#[derive(Clone)]
pub struct TimelineSemaphore {
    semaphore: vk::Semaphore,
    device_functions: Arc<DeviceFunctions>,
}

// 创建与销毁
impl TimelineSemaphore {
    pub fn new(device_functions: Arc<DeviceFunctions>, initial_value: u64, debug_name: &str) -> RhiResult<Self> {
        let mut timeline_type_ci = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(initial_value);
        let timeline_semaphore_ci = vk::SemaphoreCreateInfo::default().push_next(&mut timeline_type_ci);
        let semaphore = unsafe { device_functions.create_semaphore(&timeline_semaphore_ci, None)? };

        let semaphore = Self {
            semaphore,
            device_functions,
        };
        semaphore.device_functions.set_debug_name(&semaphore, debug_name);
        Ok(semaphore)
    }

    #[inline]
    pub fn destroy(self) {
        unsafe {
            self.device_functions.destroy_semaphore(self.semaphore, None);
        }
    }
}

// getters
impl TimelineSemaphore {
    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

// tools
impl TimelineSemaphore {
    /// 读取 counter 的当前值
    #[inline]
    pub fn current_value(&self) -> RhiResult<u64> {
        let value = unsafe { self.device_functions.get_semaphore_counter_value(self.semaphore)? };
        Ok(value)
    }

    /// CPU 侧阻塞，直到 counter >= timeline_value
    pub fn wait(&self, timeline_value: u64, timeout_ns: u64) -> RhiResult<()> {
        let wait_semaphore = [self.semaphore];
        let wait_info =
            vk::SemaphoreWaitInfo::default().semaphores(&wait_semaphore).values(std::slice::from_ref(&timeline_value));
        let result = unsafe { self.device_functions.wait_semaphores(&wait_info, timeout_ns) };
        match result {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => Err(RhiError::AcquireTimeout),
            Err(e) => Err(e.into()),
        }
    }

    /// CPU 侧直接把 counter 推进到指定值
    pub fn signal(&self, value: u64) -> RhiResult<()> {
        let signal_info = vk::SemaphoreSignalInfo::default().semaphore(self.semaphore).value(value);
        unsafe {
            self.device_functions.signal_semaphore(&signal_info)?;
        }
        Ok(())
    }
}

impl TimelineValueSource for TimelineSemaphore {
    fn timeline_key(&self) -> u64 {
        use vk::Handle;
        self.semaphore.as_raw()
    }

    fn current_value(&self) -> RhiResult<u64> {
        TimelineSemaphore::current_value(self)
    }
}

impl DebugType for TimelineSemaphore {
    fn debug_type_name() -> &'static str {
        "RhiTimelineSemaphore"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.semaphore
    }
}
