use std::ffi::CStr;

use ash::vk;
use itertools::Itertools;

use crate::commands::command_queue::QueueFamily;
use crate::error::{RhiError, RhiResult};

/// 表示一张物理显卡
pub struct PhysicalDevice {
    pub handle: vk::PhysicalDevice,

    /// 当前 gpu 的基础属性
    pub basic_props: vk::PhysicalDeviceProperties,

    pub queue_family_properties: Vec<vk::QueueFamilyProperties>,
}

impl PhysicalDevice {
    /// 优先选择独立显卡，如果没有则选择第一个可用的显卡
    pub fn new_discrete_physical_device(instance: &ash::Instance) -> RhiResult<Self> {
        let pdevices = unsafe { instance.enumerate_physical_devices()? };
        pdevices
            .iter()
            .map(|pdevice| PhysicalDevice::new(*pdevice, instance))
            .find_or_first(PhysicalDevice::is_discrete_gpu)
            .ok_or(RhiError::NoSuitableGpu)
    }

    pub fn new(pdevice: vk::PhysicalDevice, instance: &ash::Instance) -> Self {
        unsafe {
            let basic_props = instance.get_physical_device_properties(pdevice);
            let physical_device_name = CStr::from_ptr(basic_props.device_name.as_ptr());
            log::info!("found gpu: {:?}", physical_device_name);

            Self {
                handle: pdevice,
                basic_props,
                queue_family_properties: instance.get_physical_device_queue_family_properties(pdevice),
            }
        }
    }

    /// 当前 gpu 是否是独立显卡
    #[inline]
    pub fn is_discrete_gpu(&self) -> bool {
        self.basic_props.device_type == vk::PhysicalDeviceType::DISCRETE_GPU
    }

    /// 找到满足条件的 queue family 的 index
    ///
    /// 对于 compute/transfer，优先选择不带 GRAPHICS 的专用 family，
    /// 找不到专用的再回退到通用 family
    pub fn find_queue_family(&self, queue_flags: vk::QueueFlags, name: &str) -> Option<QueueFamily> {
        let dedicated = self.queue_family_properties.iter().enumerate().find(|(_, prop)| {
            prop.queue_flags.contains(queue_flags)
                && !queue_flags.contains(vk::QueueFlags::GRAPHICS)
                && !prop.queue_flags.contains(vk::QueueFlags::GRAPHICS)
        });
        let fallback = self
            .queue_family_properties
            .iter()
            .enumerate()
            .find(|(_, prop)| prop.queue_flags.contains(queue_flags));

        dedicated.or(fallback).map(|(index, prop)| QueueFamily {
            name: name.to_string(),
            queue_family_index: index as u32,
            queue_flags: prop.queue_flags,
            queue_count: prop.queue_count,
        })
    }
}
