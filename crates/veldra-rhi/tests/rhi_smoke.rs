//! 需要真实 Vulkan 驱动的冒烟测试
//!
//! CI 环境没有 GPU，默认 ignore；本地运行：
//! `cargo test -p veldra-rhi -- --ignored`

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use ash::vk;
use veldra_rhi::{
    commands::{command_queue::QueueClass, semaphore::TimelineSemaphore},
    descriptors::layout_cache::LayoutBinding,
    rhi::{Rhi, RhiCreateInfo},
};

#[test]
#[ignore = "requires a vulkan driver"]
fn rhi_full_lifecycle() {
    veldra_crate_tools::init_log::init_log();

    let rhi = Rhi::new(RhiCreateInfo::new("rhi-smoke")).unwrap();

    // 一次性提交：空命令也要能走完 submit + fence wait
    rhi.one_time_exec(QueueClass::Graphics, |_cmd| {}, "noop").unwrap();

    // 描述符分配走 layout cache
    let set = rhi
        .allocate_descriptor_set(vec![LayoutBinding {
            binding: 0,
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            count: 1,
            stages: vk::ShaderStageFlags::VERTEX,
        }])
        .unwrap();
    assert_ne!(set, vk::DescriptorSet::null());

    // CPU 侧 signal 推进 timeline，延迟回调在 process 中执行
    let fired = Arc::new(AtomicBool::new(false));
    let timeline = TimelineSemaphore::new(rhi.device_functions(), 0, "smoke-timeline").unwrap();
    {
        let fired = fired.clone();
        rhi.deferred_executor().defer_execute(Some(&timeline), 1, move || {
            fired.store(true, Ordering::SeqCst);
        });
    }
    assert_eq!(rhi.process_deferred_callbacks().unwrap(), 0);
    timeline.signal(1).unwrap();
    assert_eq!(rhi.process_deferred_callbacks().unwrap(), 1);
    assert!(fired.load(Ordering::SeqCst));

    rhi.deferred_executor().drop_timeline(&timeline);
    timeline.destroy();
    rhi.destroy().unwrap();
}
