use std::{
    collections::HashSet,
    ffi::CStr,
    sync::{Arc, Mutex},
};

use ash::vk;
use itertools::Itertools;

use crate::{
    commands::{
        command_buffer::CommandBuffer,
        command_pool::CommandPool,
        command_queue::{CommandQueue, QueueClass, QueueFamily},
        fence::{Fence, WAIT_FOREVER},
        semaphore::TimelineSemaphore,
        submit_info::SubmitInfo,
    },
    deferred_executor::RhiDeferredExecutor,
    descriptors::{
        allocator::{DescriptorAllocator, DescriptorAllocatorCreateInfo},
        layout_cache::{DescriptorLayoutCache, LayoutBinding},
    },
    error::{RhiError, RhiResult},
    foundation::{
        debug_messenger::DebugMsger,
        device::{Device, DeviceFunctions},
        instance::Instance,
        physical_device::PhysicalDevice,
    },
    frames::DEFAULT_FRAMES_IN_FLIGHT,
};

pub struct RhiCreateInfo {
    pub app_name: String,
    /// CPU 允许领先 GPU 的帧数
    pub frames_in_flight: usize,
    pub instance_extra_exts: Vec<&'static CStr>,
    pub descriptor_allocator: DescriptorAllocatorCreateInfo,
}

impl RhiCreateInfo {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            frames_in_flight: DEFAULT_FRAMES_IN_FLIGHT,
            instance_extra_exts: vec![],
            descriptor_allocator: DescriptorAllocatorCreateInfo::default(),
        }
    }
}

/// RHI 的共享状态
///
/// instance、device、queue 以及各类分配器都挂在这里，
/// 各组件的构造函数显式接收 `&Rhi`，不存在全局单例。
pub struct Rhi {
    _vk_entry: ash::Entry,
    instance: Instance,
    debug_msger: DebugMsger,
    physical_device: PhysicalDevice,
    device: Device,

    graphics_queue: CommandQueue,
    compute_queue: CommandQueue,
    transfer_queue: CommandQueue,

    descriptor_allocator: Mutex<DescriptorAllocator>,
    layout_cache: Mutex<DescriptorLayoutCache>,
    deferred_executor: RhiDeferredExecutor<TimelineSemaphore>,

    /// 帧时间轴：每帧提交时 signal 递增的帧编号，
    /// 延迟销毁默认绑定在这条时间轴上
    frame_timeline: TimelineSemaphore,
    frames_in_flight: usize,
}

// 创建与销毁
impl Rhi {
    const ENGINE_NAME: &'static str = "Veldra";

    pub fn new(create_info: RhiCreateInfo) -> RhiResult<Self> {
        let vk_entry = unsafe { ash::Entry::load().map_err(|e| RhiError::EntryLoad(e.to_string()))? };
        let instance = Instance::new(&vk_entry, &create_info.app_name, Self::ENGINE_NAME, create_info.instance_extra_exts)?;
        let debug_msger = DebugMsger::new(&vk_entry, instance.ash_instance())?;
        let physical_device = PhysicalDevice::new_discrete_physical_device(instance.ash_instance())?;

        let queue_families = Self::pick_queue_families(&physical_device)?;

        // 同一个 queue family 只需要创建一次
        let queue_priorities = [1.0_f32];
        let unique_family_indices: HashSet<u32> =
            queue_families.iter().map(|family| family.queue_family_index).collect();
        let queue_create_infos = unique_family_indices
            .iter()
            .map(|index| {
                vk::DeviceQueueCreateInfo::default().queue_family_index(*index).queue_priorities(&queue_priorities)
            })
            .collect_vec();

        let device = Device::new(instance.ash_instance(), physical_device.handle, &queue_create_infos)?;
        let device_functions = device.functions().clone();

        let [graphics_family, compute_family, transfer_family] = queue_families;
        let graphics_queue = Self::fetch_queue(&device_functions, graphics_family);
        let compute_queue = Self::fetch_queue(&device_functions, compute_family);
        let transfer_queue = Self::fetch_queue(&device_functions, transfer_family);

        let descriptor_allocator =
            DescriptorAllocator::new(device_functions.clone(), create_info.descriptor_allocator, "rhi");
        let layout_cache = DescriptorLayoutCache::new(device_functions.clone());
        let frame_timeline = TimelineSemaphore::new(device_functions.clone(), 0, "frame-timeline")?;

        log::info!(
            "rhi initialized: app = {}, frames in flight = {}",
            create_info.app_name,
            create_info.frames_in_flight
        );

        Ok(Self {
            _vk_entry: vk_entry,
            instance,
            debug_msger,
            physical_device,
            device,
            graphics_queue,
            compute_queue,
            transfer_queue,
            descriptor_allocator: Mutex::new(descriptor_allocator),
            layout_cache: Mutex::new(layout_cache),
            deferred_executor: RhiDeferredExecutor::new(),
            frame_timeline,
            frames_in_flight: create_info.frames_in_flight.max(1),
        })
    }

    /// 销毁顺序和创建顺序相反；先等设备 idle，再清空延迟回调
    pub fn destroy(self) -> RhiResult<()> {
        self.wait_idle()?;
        let flushed = self.deferred_executor.flush_all_deferred_callbacks();
        if flushed > 0 {
            log::info!("flushed {} deferred callbacks at shutdown", flushed);
        }

        self.frame_timeline.destroy();
        self.descriptor_allocator.into_inner().unwrap().destroy();
        self.layout_cache.into_inner().unwrap().destroy();
        self.device.destroy();
        self.debug_msger.destroy();
        self.instance.destroy();
        Ok(())
    }
}

// 构造过程辅助函数
impl Rhi {
    /// 为三类用途各找一个 queue family
    fn pick_queue_families(physical_device: &PhysicalDevice) -> RhiResult<[QueueFamily; 3]> {
        let find = |class: QueueClass| {
            physical_device
                .find_queue_family(class.queue_flags(), class.name())
                .ok_or(RhiError::MissingQueueFamily(class))
        };
        Ok([find(QueueClass::Graphics)?, find(QueueClass::Compute)?, find(QueueClass::Transfer)?])
    }

    fn fetch_queue(device_functions: &Arc<DeviceFunctions>, queue_family: QueueFamily) -> CommandQueue {
        let vk_queue = unsafe { device_functions.get_device_queue(queue_family.queue_family_index, 0) };
        let queue = CommandQueue {
            vk_queue,
            queue_family,
            device_functions: device_functions.clone(),
        };
        device_functions.set_debug_name(&queue, &queue.queue_family().name);
        queue
    }
}

// getters
impl Rhi {
    #[inline]
    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    #[inline]
    pub fn physical_device(&self) -> &PhysicalDevice {
        &self.physical_device
    }

    #[inline]
    pub fn device(&self) -> &Device {
        &self.device
    }

    #[inline]
    pub fn device_functions(&self) -> Arc<DeviceFunctions> {
        self.device.functions().clone()
    }

    /// 按用途取 queue
    #[inline]
    pub fn queue(&self, class: QueueClass) -> &CommandQueue {
        match class {
            QueueClass::Graphics => &self.graphics_queue,
            QueueClass::Compute => &self.compute_queue,
            QueueClass::Transfer => &self.transfer_queue,
        }
    }

    #[inline]
    pub fn graphics_queue(&self) -> &CommandQueue {
        &self.graphics_queue
    }

    #[inline]
    pub fn compute_queue(&self) -> &CommandQueue {
        &self.compute_queue
    }

    #[inline]
    pub fn transfer_queue(&self) -> &CommandQueue {
        &self.transfer_queue
    }

    #[inline]
    pub fn deferred_executor(&self) -> &RhiDeferredExecutor<TimelineSemaphore> {
        &self.deferred_executor
    }

    #[inline]
    pub fn frame_timeline(&self) -> &TimelineSemaphore {
        &self.frame_timeline
    }

    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    /// 当 uniform buffer 的 descriptor 在更新时，其 offset 必须是这个值的整数倍
    ///
    /// 注：这个值一定是 power of 2
    #[inline]
    pub fn min_ubo_offset_align(&self) -> vk::DeviceSize {
        self.physical_device.basic_props.limits.min_uniform_buffer_offset_alignment
    }
}

// tools
impl Rhi {
    /// 分配一个描述符集，布局经过 cache 去重
    pub fn allocate_descriptor_set(&self, bindings: Vec<LayoutBinding>) -> RhiResult<vk::DescriptorSet> {
        let layout = self.layout_cache.lock().unwrap().get_or_create(bindings)?;
        self.descriptor_allocator.lock().unwrap().allocate(layout)
    }

    /// 直接分配一个已有布局的描述符集
    pub fn allocate_descriptor_set_with_layout(&self, layout: vk::DescriptorSetLayout) -> RhiResult<vk::DescriptorSet> {
        self.descriptor_allocator.lock().unwrap().allocate(layout)
    }

    /// 回收所有描述符集，调用方需要保证 GPU 不再使用它们
    pub fn clear_descriptor_sets(&self) -> RhiResult<()> {
        self.descriptor_allocator.lock().unwrap().clear()
    }

    /// 执行所有已到期的延迟回调，每帧调用一次
    pub fn process_deferred_callbacks(&self) -> RhiResult<usize> {
        self.deferred_executor.process_deferred_callbacks()
    }

    pub fn wait_idle(&self) -> RhiResult<()> {
        unsafe {
            self.device.functions().device_wait_idle()?;
        }
        Ok(())
    }

    /// 录制并提交一次性的命令，阻塞直到执行完成
    ///
    /// 适合资源上传之类的初始化工作，不要在每帧的热路径上使用
    pub fn one_time_exec(
        &self,
        queue_class: QueueClass,
        record: impl FnOnce(&CommandBuffer),
        name: &str,
    ) -> RhiResult<()> {
        let device_functions = self.device_functions();
        let queue = self.queue(queue_class);

        let pool = CommandPool::new(
            device_functions.clone(),
            queue.queue_family().clone(),
            vk::CommandPoolCreateFlags::TRANSIENT,
            &format!("one-time-{}", name),
        )?;
        let command_buffer = CommandBuffer::new(
            device_functions.clone(),
            &pool,
            vk::CommandBufferLevel::PRIMARY,
            &format!("one-time-{}", name),
        )?;
        let fence = Fence::new(device_functions, false, &format!("one-time-{}", name))?;

        // 出错也要走到 destroy，所以不在函数体里直接用 ?
        let result = (|| -> RhiResult<()> {
            command_buffer.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT, name)?;
            record(&command_buffer);
            command_buffer.end()?;
            queue.submit(vec![SubmitInfo::new(&[&command_buffer])], Some(&fence))?;
            fence.wait(WAIT_FOREVER)
        })();

        fence.destroy();
        pool.destroy();
        result
    }
}
