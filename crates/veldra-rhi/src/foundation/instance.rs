use std::{
    collections::HashSet,
    ffi::{CStr, CString, c_char},
};

use ash::vk;
use itertools::Itertools;

use crate::error::{RhiError, RhiResult};
use crate::foundation::debug_messenger::DebugMsger;

pub struct Instance {
    /// 仅仅是函数指针，以及一个裸的 handle
    ///
    /// 生命周期由 [`crate::rhi::Rhi`] 手动控制
    pub(crate) ash_instance: ash::Instance,
}

impl Instance {
    /// 设置所需的 layers 和 extensions，创建 vk instance
    pub fn new(
        vk_entry: &ash::Entry,
        app_name: &str,
        engine_name: &str,
        extra_instance_exts: Vec<&'static CStr>,
    ) -> RhiResult<Self> {
        let app_name = CString::new(app_name).unwrap();
        let engine_name = CString::new(engine_name).unwrap();
        let app_info = vk::ApplicationInfo::default()
            // 版本过低时，有些函数无法正确加载
            .api_version(vk::API_VERSION_1_3)
            .application_name(app_name.as_ref())
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(engine_name.as_ref())
            .engine_version(vk::make_api_version(0, 1, 0, 0));

        let enabled_extensions = Self::get_extensions(vk_entry, &extra_instance_exts)?;
        let mut enabled_extensions_str = String::new();
        for ext in &enabled_extensions {
            enabled_extensions_str.push_str(&format!("\n\t{:?}", unsafe { CStr::from_ptr(*ext) }));
        }
        log::info!("instance extensions: {}", enabled_extensions_str);

        let mut instance_ci =
            vk::InstanceCreateInfo::default().application_info(&app_info).enabled_extension_names(&enabled_extensions);

        // 为 instance info 添加 debug messenger
        let mut debug_utils_messenger_ci = DebugMsger::debug_utils_messenger_ci();
        instance_ci = instance_ci.push_next(&mut debug_utils_messenger_ci);

        let handle = unsafe { vk_entry.create_instance(&instance_ci, None)? };

        Ok(Self { ash_instance: handle })
    }

    pub fn destroy(self) {
        log::info!("Destroying Instance");
        unsafe {
            self.ash_instance.destroy_instance(None);
        }
    }
}

/// getter
impl Instance {
    #[inline]
    pub fn ash_instance(&self) -> &ash::Instance {
        &self.ash_instance
    }

    #[inline]
    pub fn vk_instance(&self) -> vk::Instance {
        self.ash_instance.handle()
    }
}

/// 构造过程
impl Instance {
    /// instance 所需的所有 extension
    ///
    /// # return
    /// instance 所需的，且受支持的 extension
    fn get_extensions(
        vk_entry: &ash::Entry,
        extra_instance_exts: &[&'static CStr],
    ) -> RhiResult<Vec<*const c_char>> {
        let all_ext_props = unsafe { vk_entry.enumerate_instance_extension_properties(None)? };
        let mut enabled_extensions: HashSet<&'static CStr> = HashSet::new();

        // 检查某个 instance ext 并启用
        let mut enable_ext = |ext: &'static CStr| -> RhiResult<()> {
            let supported = all_ext_props
                .iter()
                .any(|supported_ext| ext == unsafe { CStr::from_ptr(supported_ext.extension_name.as_ptr()) });
            if supported {
                enabled_extensions.insert(ext);
                Ok(())
            } else {
                log::error!("required instance extension ({:?}) is missing", ext);
                Err(RhiError::Vulkan(vk::Result::ERROR_EXTENSION_NOT_PRESENT))
            }
        };

        // 检查外部传入的 extension 是否支持
        for ext in extra_instance_exts {
            enable_ext(ext)?;
        }

        for ext in Self::basic_instance_exts() {
            enable_ext(ext)?;
        }

        Ok(enabled_extensions.iter().map(|ext| ext.as_ptr()).collect_vec())
    }

    /// 必须要开启的 instance extensions
    fn basic_instance_exts() -> Vec<&'static CStr> {
        vec![
            // 这个 extension 可以单独使用，提供以下功能：
            // 1. debug messenger
            // 2. 为 vulkan object 设置 debug name
            // 3. 使用 label 标记 queue 或者 command buffer 中的一个 section
            vk::EXT_DEBUG_UTILS_NAME,
        ]
    }
}
