use std::{collections::HashMap, sync::Arc};

use ash::vk;
use itertools::Itertools;

use crate::{
    error::RhiResult,
    foundation::device::DeviceFunctions,
};

/// 布局缓存的键的一项，对应一个 binding
///
/// 不使用 vk::DescriptorSetLayoutBinding 做键：它带有裸指针字段，
/// 派生的 Eq/Hash 无法表达结构相等
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct LayoutBinding {
    pub binding: u32,
    pub ty: vk::DescriptorType,
    pub count: u32,
    pub stages: vk::ShaderStageFlags,
}

impl LayoutBinding {
    fn to_vk(&self) -> vk::DescriptorSetLayoutBinding<'static> {
        vk::DescriptorSetLayoutBinding::default()
            .binding(self.binding)
            .descriptor_type(self.ty)
            .descriptor_count(self.count)
            .stage_flags(self.stages)
    }
}

/// 键统一按 binding 序号排序，绑定顺序不同的同一布局会命中同一项
fn normalize_bindings(mut bindings: Vec<LayoutBinding>) -> Vec<LayoutBinding> {
    bindings.sort_by_key(|b| b.binding);
    bindings
}

/// 描述符集布局缓存
///
/// 相同 binding 集合的布局只创建一次，后续请求直接返回缓存的句柄
///
/// # Destroy
/// 需要手动调用 destroy，会销毁所有缓存的布局
pub struct DescriptorLayoutCache {
    device_functions: Arc<DeviceFunctions>,
    cache: HashMap<Vec<LayoutBinding>, vk::DescriptorSetLayout>,
}

// 创建与销毁
impl DescriptorLayoutCache {
    pub fn new(device_functions: Arc<DeviceFunctions>) -> Self {
        Self {
            device_functions,
            cache: HashMap::new(),
        }
    }

    pub fn destroy(mut self) {
        log::info!("Destroying DescriptorLayoutCache with {} layouts", self.cache.len());
        for (_, layout) in self.cache.drain() {
            unsafe {
                self.device_functions.destroy_descriptor_set_layout(layout, None);
            }
        }
    }
}

// tools
impl DescriptorLayoutCache {
    /// 查询或创建布局
    ///
    /// 返回的句柄由缓存持有，调用方不要销毁
    pub fn get_or_create(&mut self, bindings: Vec<LayoutBinding>) -> RhiResult<vk::DescriptorSetLayout> {
        let key = normalize_bindings(bindings);
        if let Some(layout) = self.cache.get(&key) {
            return Ok(*layout);
        }

        let vk_bindings = key.iter().map(LayoutBinding::to_vk).collect_vec();
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&vk_bindings);
        let layout = unsafe { self.device_functions.create_descriptor_set_layout(&create_info, None)? };
        self.cache.insert(key, layout);
        Ok(layout)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(index: u32, ty: vk::DescriptorType) -> LayoutBinding {
        LayoutBinding {
            binding: index,
            ty,
            count: 1,
            stages: vk::ShaderStageFlags::FRAGMENT,
        }
    }

    /// 绑定顺序不同的同一组 binding，规范化之后键相同
    #[test]
    fn key_is_order_insensitive() {
        let a = normalize_bindings(vec![
            binding(0, vk::DescriptorType::UNIFORM_BUFFER),
            binding(1, vk::DescriptorType::COMBINED_IMAGE_SAMPLER),
        ]);
        let b = normalize_bindings(vec![
            binding(1, vk::DescriptorType::COMBINED_IMAGE_SAMPLER),
            binding(0, vk::DescriptorType::UNIFORM_BUFFER),
        ]);
        assert_eq!(a, b);
    }

    /// binding 序号相同但类型不同，是两个不同的布局
    #[test]
    fn different_types_yield_different_keys() {
        let a = normalize_bindings(vec![binding(0, vk::DescriptorType::UNIFORM_BUFFER)]);
        let b = normalize_bindings(vec![binding(0, vk::DescriptorType::STORAGE_BUFFER)]);
        assert_ne!(a, b);
    }

    /// stages 和 count 也参与键的比较
    #[test]
    fn stages_and_count_are_part_of_the_key() {
        let mut a = binding(0, vk::DescriptorType::UNIFORM_BUFFER);
        let mut b = a.clone();
        b.stages = vk::ShaderStageFlags::VERTEX;
        assert_ne!(normalize_bindings(vec![a.clone()]), normalize_bindings(vec![b]));

        let mut c = a.clone();
        c.count = 4;
        a.count = 1;
        assert_ne!(normalize_bindings(vec![a]), normalize_bindings(vec![c]));
    }
}
