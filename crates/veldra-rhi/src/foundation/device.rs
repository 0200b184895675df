use std::{
    ffi::{CStr, CString},
    ops::Deref,
    sync::Arc,
};

use ash::vk;
use itertools::Itertools;

use crate::error::RhiResult;
use crate::foundation::debug_messenger::DebugType;

/// Vulkan 设备函数指针的集合
///
/// 包含了核心设备 API 以及各种扩展的函数指针。
/// 这些函数指针在整个应用生命周期中保持不变，可以安全共享。
pub struct DeviceFunctions {
    /// 核心 Vulkan 设备 API
    pub(crate) device: ash::Device,
    /// 动态渲染扩展 API
    pub(crate) dynamic_rendering: ash::khr::dynamic_rendering::Device,
    /// 调试工具扩展 API
    pub(crate) debug_utils: ash::ext::debug_utils::Device,
}

/// getters
impl DeviceFunctions {
    #[inline]
    pub fn dynamic_rendering(&self) -> &ash::khr::dynamic_rendering::Device {
        &self.dynamic_rendering
    }
    #[inline]
    pub fn debug_utils(&self) -> &ash::ext::debug_utils::Device {
        &self.debug_utils
    }
}

/// tools
impl DeviceFunctions {
    #[inline]
    pub fn set_object_debug_name<T: vk::Handle + Copy>(&self, handle: T, name: impl AsRef<str>) {
        let name = CString::new(name.as_ref()).unwrap();
        unsafe {
            // debug name 设置失败不影响渲染，忽略错误
            let _ = self.debug_utils.set_debug_utils_object_name(
                &vk::DebugUtilsObjectNameInfoEXT::default().object_name(name.as_c_str()).object_handle(handle),
            );
        }
    }

    pub fn set_debug_name<T: DebugType>(&self, handle: &T, name: impl AsRef<str>) {
        let debug_name = format!("{}::{}", T::debug_type_name(), name.as_ref());
        let debug_name = CString::new(debug_name.as_str()).unwrap();
        unsafe {
            let _ = self.debug_utils.set_debug_utils_object_name(
                &vk::DebugUtilsObjectNameInfoEXT::default()
                    .object_name(debug_name.as_c_str())
                    .object_handle(handle.vk_handle()),
            );
        }
    }
}

impl Deref for DeviceFunctions {
    type Target = ash::Device;
    fn deref(&self) -> &Self::Target {
        &self.device
    }
}

pub struct Device {
    /// Vulkan 设备函数指针集合
    ///
    /// 使用 Arc 共享：多个组件（queue、command buffer、fence 等）需要相同的
    /// 函数指针，而次级 context 会在 worker 线程上录制命令，因此必须是 Send 的
    pub(crate) functions: Arc<DeviceFunctions>,
}

/// 构造与销毁
impl Device {
    pub fn new(
        instance: &ash::Instance,
        pdevice: vk::PhysicalDevice,
        queue_create_info: &[vk::DeviceQueueCreateInfo],
    ) -> RhiResult<Self> {
        // device 所需的所有 extension
        let device_exts = Self::basic_device_exts().iter().map(|e| e.as_ptr()).collect_vec();
        let mut exts_str = String::new();
        for ext in &device_exts {
            exts_str.push_str(&format!("\n\t{:?}", unsafe { CStr::from_ptr(*ext) }));
        }
        log::info!("device exts: {}", exts_str);

        // device 所需的所有 features
        let mut all_features = vk::PhysicalDeviceFeatures2::default().features(Self::physical_device_basic_features());
        let mut physical_device_ext_features = Self::physical_device_extra_features();
        unsafe {
            physical_device_ext_features.iter_mut().for_each(|f| {
                let ptr = <*mut dyn vk::ExtendsPhysicalDeviceFeatures2>::cast::<vk::BaseOutStructure>(f.as_mut());
                (*ptr).p_next = all_features.p_next as _;
                all_features.p_next = ptr as _;
            });
        }

        let device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(queue_create_info)
            .enabled_extension_names(&device_exts)
            .push_next(&mut all_features);

        let device = unsafe { instance.create_device(pdevice, &device_create_info, None)? };

        let vk_dynamic_render_pf = ash::khr::dynamic_rendering::Device::new(instance, &device);
        let vk_debug_utils_device = ash::ext::debug_utils::Device::new(instance, &device);

        Ok(Self {
            functions: Arc::new(DeviceFunctions {
                device,
                dynamic_rendering: vk_dynamic_render_pf,
                debug_utils: vk_debug_utils_device,
            }),
        })
    }

    pub fn destroy(self) {
        log::info!("destroying device");
        unsafe {
            self.functions.device.destroy_device(None);
        }
    }
}

/// 创建过程的辅助函数
impl Device {
    /// 必要的 physical device core features
    fn physical_device_basic_features() -> vk::PhysicalDeviceFeatures {
        vk::PhysicalDeviceFeatures::default().independent_blend(true)
    }

    /// 必要的 physical device extension features
    fn physical_device_extra_features() -> Vec<Box<dyn vk::ExtendsPhysicalDeviceFeatures2>> {
        vec![
            Box::new(vk::PhysicalDeviceDynamicRenderingFeatures::default().dynamic_rendering(true)),
            Box::new(vk::PhysicalDeviceSynchronization2Features::default().synchronization2(true)),
            Box::new(vk::PhysicalDeviceTimelineSemaphoreFeatures::default().timeline_semaphore(true)),
        ]
    }

    /// 必要的 device extensions
    fn basic_device_exts() -> Vec<&'static CStr> {
        vec![
            ash::khr::depth_stencil_resolve::NAME,
            ash::khr::create_renderpass2::NAME,
            ash::khr::dynamic_rendering::NAME,
        ]
    }
}

/// getter
impl Device {
    #[inline]
    pub fn functions(&self) -> &Arc<DeviceFunctions> {
        &self.functions
    }

    #[inline]
    pub fn ash_handle(&self) -> &ash::Device {
        &self.functions.device
    }

    #[inline]
    pub fn vk_handle(&self) -> vk::Device {
        self.functions.device.handle()
    }
}

impl DebugType for Device {
    fn debug_type_name() -> &'static str {
        "RhiDevice"
    }
    fn vk_handle(&self) -> impl vk::Handle {
        self.functions.device.handle()
    }
}
