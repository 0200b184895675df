use std::sync::Arc;

use ash::vk;

use crate::{
    error::RhiResult,
    foundation::{debug_messenger::DebugType, device::DeviceFunctions},
};

/// 描述符池
///
/// 一个描述符池可以分配多个描述符集。
/// 池内空间耗尽时 allocate 会返回 OUT_OF_POOL_MEMORY 或 FRAGMENTED_POOL，
/// 上层的 allocator 据此切换到新的池。
pub struct DescriptorPool {
    handle: vk::DescriptorPool,
    max_sets: u32,

    device_functions: Arc<DeviceFunctions>,
    name: String,
}

impl DebugType for DescriptorPool {
    fn debug_type_name() -> &'static str {
        "RhiDescriptorPool"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}

// 创建与销毁
impl DescriptorPool {
    pub fn new(
        device_functions: Arc<DeviceFunctions>,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
        name: &str,
    ) -> RhiResult<Self> {
        let create_info = vk::DescriptorPoolCreateInfo::default().max_sets(max_sets).pool_sizes(pool_sizes);
        let pool = unsafe { device_functions.create_descriptor_pool(&create_info, None)? };
        let pool = Self {
            handle: pool,
            max_sets,
            device_functions,
            name: name.to_string(),
        };
        pool.device_functions.set_debug_name(&pool, name);
        Ok(pool)
    }

    pub fn destroy(self) {
        log::info!("Destroying RhiDescriptorPool: {}", self.name);
        unsafe {
            self.device_functions.destroy_descriptor_pool(self.handle, None);
        }
    }
}

// getters
impl DescriptorPool {
    #[inline]
    pub fn handle(&self) -> vk::DescriptorPool {
        self.handle
    }

    #[inline]
    pub fn max_sets(&self) -> u32 {
        self.max_sets
    }
}

// tools
impl DescriptorPool {
    /// 从池中分配一个描述符集
    ///
    /// 返回原始的 vk::Result，由调用方区分"池满"和真正的错误
    pub fn allocate_set(&self, layout: vk::DescriptorSetLayout) -> Result<vk::DescriptorSet, vk::Result> {
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.handle)
            .set_layouts(std::slice::from_ref(&layout));
        let sets = unsafe { self.device_functions.allocate_descriptor_sets(&alloc_info)? };
        Ok(sets[0])
    }

    /// 一次性回收池内所有的描述符集
    pub fn reset(&self) -> RhiResult<()> {
        unsafe {
            self.device_functions.reset_descriptor_pool(self.handle, vk::DescriptorPoolResetFlags::empty())?;
        }
        Ok(())
    }
}
