use std::sync::Arc;

use ash::vk;
use itertools::Itertools;

use crate::{
    basic::color::LabelColor,
    commands::command_pool::CommandPool,
    error::RhiResult,
    foundation::{debug_messenger::DebugType, device::DeviceFunctions},
    rendering_info::{RenderInheritance, RenderingInfo},
};

/// 命令缓冲封装
///
/// 封装 Vulkan CommandBuffer，提供类型安全的命令录制接口。
/// 支持图形、计算、屏障、调试标签等功能。
///
/// # 使用示例
/// ```ignore
/// let cmd = CommandBuffer::new(device_functions, &pool, vk::CommandBufferLevel::PRIMARY, "my-pass")?;
/// cmd.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT, "my-pass")?;
/// cmd.cmd_bind_pipeline(vk::PipelineBindPoint::GRAPHICS, pipeline);
/// // 绘制命令...
/// cmd.end()?;
/// ```
#[derive(Clone)]
pub struct CommandBuffer {
    vk_handle: vk::CommandBuffer,
    _command_pool_handle: vk::CommandPool,
    device_functions: Arc<DeviceFunctions>,

    #[cfg(debug_assertions)]
    name: String,
}

// new & init
impl CommandBuffer {
    pub fn new(
        device_functions: Arc<DeviceFunctions>,
        command_pool: &CommandPool,
        level: vk::CommandBufferLevel,
        debug_name: &str,
    ) -> RhiResult<Self> {
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(command_pool.handle())
            .level(level)
            .command_buffer_count(1);

        let command_buffer = unsafe { device_functions.allocate_command_buffers(&info)?[0] };
        let cmd_buffer = Self {
            vk_handle: command_buffer,
            _command_pool_handle: command_pool.handle(),
            device_functions,

            #[cfg(debug_assertions)]
            name: debug_name.to_string(),
        };
        cmd_buffer.device_functions.set_debug_name(&cmd_buffer, debug_name);
        Ok(cmd_buffer)
    }
}

// Basic 命令
impl CommandBuffer {
    /// 开始录制 command
    ///
    /// 自动设置 debug label
    #[inline]
    pub fn begin(&self, usage_flag: vk::CommandBufferUsageFlags, debug_label_name: &str) -> RhiResult<()> {
        unsafe {
            self.device_functions
                .begin_command_buffer(self.vk_handle, &vk::CommandBufferBeginInfo::default().flags(usage_flag))?;
        }
        self.begin_label(debug_label_name, LabelColor::COLOR_CMD);
        Ok(())
    }

    /// 开始录制 secondary command buffer
    ///
    /// secondary buffer 继承 primary 侧的 dynamic rendering 状态，
    /// 因此必须带上 RENDER_PASS_CONTINUE 和继承信息
    pub fn begin_secondary(&self, inheritance: &RenderInheritance, debug_label_name: &str) -> RhiResult<()> {
        let mut rendering_inheritance = inheritance.inheritance_rendering_info();
        let inheritance_info = vk::CommandBufferInheritanceInfo::default().push_next(&mut rendering_inheritance);
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT | vk::CommandBufferUsageFlags::RENDER_PASS_CONTINUE)
            .inheritance_info(&inheritance_info);
        unsafe {
            self.device_functions.begin_command_buffer(self.vk_handle, &begin_info)?;
        }
        self.begin_label(debug_label_name, LabelColor::COLOR_CMD);
        Ok(())
    }

    /// 结束录制 command
    ///
    /// 结束 debug label
    #[inline]
    pub fn end(&self) -> RhiResult<()> {
        self.end_label();
        unsafe {
            self.device_functions.end_command_buffer(self.vk_handle)?;
        }
        Ok(())
    }

    /// 将单个 command buffer 重置到初始状态
    ///
    /// 要求 pool 带有 RESET_COMMAND_BUFFER；按 pool 批量 reset 的场景
    /// 用 [`crate::commands::command_pool::CommandPool::reset_all_buffers`]
    #[inline]
    pub fn reset(&self) -> RhiResult<()> {
        unsafe {
            self.device_functions.reset_command_buffer(self.vk_handle, vk::CommandBufferResetFlags::empty())?;
        }
        Ok(())
    }
}

// getters
impl CommandBuffer {
    /// getter
    #[inline]
    pub fn vk_handle(&self) -> vk::CommandBuffer {
        self.vk_handle
    }
}

// 数据传输类型
impl CommandBuffer {
    /// - command type: action
    /// - 支持的 queue：transfer，graphics，compute
    #[inline]
    pub fn cmd_copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        unsafe {
            self.device_functions.cmd_copy_buffer(self.vk_handle, src, dst, regions);
        }
    }

    /// - command type: action
    /// - 支持的 queue：graphics
    #[inline]
    pub fn cmd_blit_image(&self, blit_info: &vk::BlitImageInfo2) {
        unsafe { self.device_functions.cmd_blit_image2(self.vk_handle, blit_info) }
    }

    /// - command type: action
    /// - 支持的 queue：transfer，graphics，compute
    #[inline]
    pub fn cmd_copy_buffer_to_image(&self, copy_info: &vk::CopyBufferToImageInfo2) {
        unsafe { self.device_functions.cmd_copy_buffer_to_image2(self.vk_handle, copy_info) }
    }

    /// 将 data 传输到 buffer 中，大小限制：65536Bytes=64KB
    ///
    /// 需要在 render pass 之外进行，注意同步
    ///
    /// - command type: action
    /// - supported queue types: transfer, graphics, compute
    #[inline]
    pub fn cmd_update_buffer(&self, buffer: vk::Buffer, offset: vk::DeviceSize, data: &[u8]) {
        unsafe { self.device_functions.cmd_update_buffer(self.vk_handle, buffer, offset, data) }
    }

    /// - command type: state
    /// - 支持的 queue: graphics, compute
    #[inline]
    pub fn cmd_push_constants(
        &self,
        pipeline_layout: vk::PipelineLayout,
        stage: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        unsafe {
            self.device_functions.cmd_push_constants(self.vk_handle, pipeline_layout, stage, offset, data);
        }
    }
}

// 绘制类型的命令
impl CommandBuffer {
    /// - command type: action, state
    /// - supported queue types: graphics
    #[inline]
    pub fn cmd_begin_rendering(&self, rendering_info: &RenderingInfo) {
        let rendering_info = rendering_info.rendering_info();
        unsafe {
            self.device_functions.dynamic_rendering.cmd_begin_rendering(self.vk_handle, &rendering_info);
        }
    }

    /// - command type: action, state
    /// - supported queue types: graphics
    #[inline]
    pub fn cmd_end_rendering(&self) {
        unsafe {
            self.device_functions.dynamic_rendering.cmd_end_rendering(self.vk_handle);
        }
    }

    /// 在 primary buffer 中执行一批 secondary buffer
    ///
    /// - command type: action
    /// - supported queue types: graphics, compute, transfer
    #[inline]
    pub fn cmd_execute_commands(&self, secondary_buffers: &[&CommandBuffer]) {
        let handles = secondary_buffers.iter().map(|cmd| cmd.vk_handle).collect_vec();
        unsafe {
            self.device_functions.cmd_execute_commands(self.vk_handle, &handles);
        }
    }

    /// - command type: action
    /// - supported queue types: graphics
    #[inline]
    pub fn cmd_draw_indexed(
        &self,
        index_cnt: u32,
        first_index: u32,
        instance_cnt: u32,
        first_instance: u32,
        vertex_offset: i32,
    ) {
        unsafe {
            self.device_functions.cmd_draw_indexed(
                self.vk_handle,
                index_cnt,
                instance_cnt,
                first_index,
                vertex_offset,
                first_instance,
            );
        }
    }

    /// - command type: action
    /// - supported queue types: graphics
    ///
    /// 不使用 index buffer 的绘制
    #[inline]
    pub fn cmd_draw(&self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        unsafe {
            self.device_functions.cmd_draw(
                self.vk_handle,
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            );
        }
    }

    /// - command type: state
    /// - supported queue types: graphics, compute
    #[inline]
    pub fn cmd_bind_descriptor_sets(
        &self,
        bind_point: vk::PipelineBindPoint,
        pipeline_layout: vk::PipelineLayout,
        first_set: u32,
        descriptor_sets: &[vk::DescriptorSet],
        dynamic_offsets: Option<&[u32]>,
    ) {
        unsafe {
            self.device_functions.cmd_bind_descriptor_sets(
                self.vk_handle,
                bind_point,
                pipeline_layout,
                first_set,
                descriptor_sets,
                dynamic_offsets.unwrap_or(&[]),
            );
        }
    }

    /// - command type: state
    /// - supported queue types: graphics, compute
    #[inline]
    pub fn cmd_bind_pipeline(&self, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
        unsafe {
            self.device_functions.cmd_bind_pipeline(self.vk_handle, bind_point, pipeline);
        }
    }

    /// buffers 每个 vertex buffer 以及 offset
    /// - command type: state
    /// - supported queue types: graphics
    #[inline]
    pub fn cmd_bind_vertex_buffers(&self, first_bind: u32, buffers: &[vk::Buffer], offsets: &[vk::DeviceSize]) {
        unsafe {
            self.device_functions.cmd_bind_vertex_buffers(self.vk_handle, first_bind, buffers, offsets);
        }
    }

    /// - command type: state
    /// - supported queue types: graphics
    #[inline]
    pub fn cmd_bind_index_buffer(&self, buffer: vk::Buffer, offset: vk::DeviceSize, index_type: vk::IndexType) {
        unsafe {
            self.device_functions.cmd_bind_index_buffer(self.vk_handle, buffer, offset, index_type);
        }
    }

    /// - command type: state
    /// - supported queue types: graphics
    #[inline]
    pub fn cmd_set_viewport(&self, first_viewport: u32, viewports: &[vk::Viewport]) {
        unsafe {
            self.device_functions.cmd_set_viewport(self.vk_handle, first_viewport, viewports);
        }
    }

    /// - command type: state
    /// - supported queue types: graphics
    #[inline]
    pub fn cmd_set_scissor(&self, first_scissor: u32, scissors: &[vk::Rect2D]) {
        unsafe {
            self.device_functions.cmd_set_scissor(self.vk_handle, first_scissor, scissors);
        }
    }
}

// 计算着色器相关命令
impl CommandBuffer {
    #[inline]
    pub fn cmd_dispatch(&self, group_cnt: glam::UVec3) {
        unsafe {
            self.device_functions.cmd_dispatch(self.vk_handle, group_cnt.x, group_cnt.y, group_cnt.z);
        }
    }
}

// 同步相关命令
impl CommandBuffer {
    /// - command type: synchronize
    /// - supported queue types: graphics, compute, transfer
    #[inline]
    pub fn cmd_memory_barrier(&self, barriers: &[vk::MemoryBarrier2]) {
        let dependency_info = vk::DependencyInfo::default().memory_barriers(barriers);
        unsafe {
            self.device_functions.cmd_pipeline_barrier2(self.vk_handle, &dependency_info);
        }
    }

    /// - command type: synchronize
    /// - supported queue types: graphics, compute, transfer
    #[inline]
    pub fn cmd_image_memory_barrier(
        &self,
        dependency_flags: vk::DependencyFlags,
        barriers: &[vk::ImageMemoryBarrier2],
    ) {
        let dependency_info =
            vk::DependencyInfo::default().image_memory_barriers(barriers).dependency_flags(dependency_flags);
        unsafe {
            self.device_functions.cmd_pipeline_barrier2(self.vk_handle, &dependency_info);
        }
    }

    /// - command type: synchronize
    /// - supported queue types: graphics, compute, transfer
    #[inline]
    pub fn cmd_buffer_memory_barrier(
        &self,
        dependency_flags: vk::DependencyFlags,
        barriers: &[vk::BufferMemoryBarrier2],
    ) {
        let dependency_info =
            vk::DependencyInfo::default().buffer_memory_barriers(barriers).dependency_flags(dependency_flags);
        unsafe {
            self.device_functions.cmd_pipeline_barrier2(self.vk_handle, &dependency_info);
        }
    }
}

// debug 相关命令
impl CommandBuffer {
    /// - command type: state, action
    /// - supported queue type: graphics, compute
    #[inline]
    pub fn begin_label(&self, label_name: &str, label_color: glam::Vec4) {
        let name = std::ffi::CString::new(label_name).unwrap_or_default();
        unsafe {
            self.device_functions.debug_utils.cmd_begin_debug_utils_label(
                self.vk_handle,
                &vk::DebugUtilsLabelEXT::default().label_name(name.as_c_str()).color(label_color.into()),
            );
        }
    }

    /// - command type: state, action
    /// - supported queue type: graphics, compute
    #[inline]
    pub fn end_label(&self) {
        unsafe {
            self.device_functions.debug_utils.cmd_end_debug_utils_label(self.vk_handle);
        }
    }

    /// - command type: action
    /// - supported queue type: graphics, compute
    #[inline]
    pub fn insert_label(&self, label_name: &str, label_color: glam::Vec4) {
        let name = std::ffi::CString::new(label_name).unwrap_or_default();
        unsafe {
            self.device_functions.debug_utils.cmd_insert_debug_utils_label(
                self.vk_handle,
                &vk::DebugUtilsLabelEXT::default().label_name(name.as_c_str()).color(label_color.into()),
            );
        }
    }
}

impl DebugType for CommandBuffer {
    fn debug_type_name() -> &'static str {
        "RhiCommandBuffer"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.vk_handle
    }
}
