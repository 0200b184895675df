use ash::vk;

use crate::{
    commands::{
        command_buffer::CommandBuffer,
        command_pool::CommandPool,
        command_queue::{CommandQueue, QueueClass},
        command_ring::CommandRing,
        fence::WAIT_FOREVER,
        semaphore::{Semaphore, TimelineSemaphore},
        submit_info::SubmitInfo,
    },
    error::RhiResult,
    rendering_info::{RenderAttachments, RenderInheritance, RenderPassDesc, RenderingInfo},
    rhi::Rhi,
};

/// context 的录制级别，创建时固定
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ContextKind {
    /// primary command buffer，可以提交到 queue
    Primary,
    /// secondary command buffer，由 worker 线程录制，
    /// 通过 primary context 的 execute_secondary_contexts 执行
    Secondary,
}

/// 一次提交的同步需求
///
/// 二值信号量和 timeline 信号量可以混用
#[derive(Default)]
pub struct SubmitSync<'a> {
    pub wait_binary: Vec<(&'a Semaphore, vk::PipelineStageFlags2)>,
    pub signal_binary: Vec<(&'a Semaphore, vk::PipelineStageFlags2)>,
    pub wait_timeline: Vec<(&'a TimelineSemaphore, vk::PipelineStageFlags2, u64)>,
    pub signal_timeline: Vec<(&'a TimelineSemaphore, vk::PipelineStageFlags2, u64)>,
}

/// 录制的阶段，约束 begin/end/submit 的调用顺序
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Phase {
    Idle,
    Recording,
    Ended,
}

enum ContextBacking {
    /// primary：command buffer 来自 ring，提交由 fence 跟踪
    Primary {
        ring: CommandRing,
        active_slot: Option<usize>,
    },
    /// secondary：独占一个 pool 和一个 buffer，每次录制前 reset
    ///
    /// secondary 没有自己的 fence，复用安全性由调用方的帧槽位纪律保证：
    /// 同一个 secondary context 只在同一个帧槽位上使用
    Secondary {
        pool: CommandPool,
        buffer: CommandBuffer,
    },
}

/// 单个线程的命令录制入口
///
/// 每个 (帧槽位 x queue 用途) 一个实例。primary context 负责提交；
/// secondary context 在 worker 线程上并行录制，最后由 primary 汇总执行。
pub struct RhiContext {
    queue: CommandQueue,
    kind: ContextKind,
    backing: ContextBacking,

    phase: Phase,
    in_render_pass: bool,
    debug_name: String,
}

// 创建与销毁
impl RhiContext {
    pub fn new(rhi: &Rhi, queue_class: QueueClass, kind: ContextKind, debug_name: &str) -> RhiResult<Self> {
        let device_functions = rhi.device_functions();
        let queue_family = rhi.queue(queue_class).queue_family().clone();
        let queue = CommandQueue {
            vk_queue: rhi.queue(queue_class).handle(),
            queue_family: queue_family.clone(),
            device_functions: device_functions.clone(),
        };

        let backing = match kind {
            ContextKind::Primary => ContextBacking::Primary {
                ring: CommandRing::new(
                    device_functions.clone(),
                    queue_family,
                    rhi.frames_in_flight(),
                    debug_name,
                ),
                active_slot: None,
            },
            ContextKind::Secondary => {
                let pool = CommandPool::new(
                    device_functions.clone(),
                    queue_family,
                    vk::CommandPoolCreateFlags::TRANSIENT,
                    debug_name,
                )?;
                let buffer = CommandBuffer::new(
                    device_functions.clone(),
                    &pool,
                    vk::CommandBufferLevel::SECONDARY,
                    debug_name,
                );
                let buffer = match buffer {
                    Ok(buffer) => buffer,
                    Err(e) => {
                        pool.destroy();
                        return Err(e);
                    }
                };
                ContextBacking::Secondary { pool, buffer }
            }
        };

        Ok(Self {
            queue,
            kind,
            backing,
            phase: Phase::Idle,
            in_render_pass: false,
            debug_name: debug_name.to_string(),
        })
    }

    pub fn destroy(self) -> RhiResult<()> {
        assert!(!self.in_render_pass, "context destroyed inside a render pass");
        match self.backing {
            ContextBacking::Primary { ring, .. } => ring.destroy()?,
            ContextBacking::Secondary { pool, .. } => {
                // buffer 随 pool 一起释放
                pool.destroy();
            }
        }
        Ok(())
    }
}

// getters
impl RhiContext {
    #[inline]
    pub fn kind(&self) -> ContextKind {
        self.kind
    }

    /// 当前正在录制的 command buffer，用于直接下达录制命令
    pub fn cmd(&self) -> &CommandBuffer {
        debug_assert!(self.phase == Phase::Recording, "no command buffer is being recorded");
        self.current_buffer()
    }

    fn current_buffer(&self) -> &CommandBuffer {
        match &self.backing {
            ContextBacking::Primary { ring, active_slot } => {
                let slot = active_slot.expect("primary context has no active slot");
                ring.command_buffer(slot)
            }
            ContextBacking::Secondary { buffer, .. } => buffer,
        }
    }
}

// 录制与提交
impl RhiContext {
    /// 开始录制 primary command buffer
    ///
    /// 帧槽位饱和时会阻塞，直到最早的提交完成
    pub fn begin_cmds(&mut self) -> RhiResult<&CommandBuffer> {
        debug_assert!(self.kind == ContextKind::Primary, "begin_cmds on a secondary context");
        debug_assert!(self.phase == Phase::Idle, "begin_cmds while a recording is active");

        let ContextBacking::Primary { ring, active_slot } = &mut self.backing else {
            unreachable!()
        };
        let slot = ring.acquire(WAIT_FOREVER)?;
        *active_slot = Some(slot);
        ring.command_buffer(slot).begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT, &self.debug_name)?;
        self.phase = Phase::Recording;
        Ok(self.current_buffer())
    }

    /// 开始录制 secondary command buffer，继承 primary 侧的渲染状态
    pub fn begin_secondary_cmds(&mut self, inheritance: &RenderInheritance) -> RhiResult<&CommandBuffer> {
        debug_assert!(self.kind == ContextKind::Secondary, "begin_secondary_cmds on a primary context");
        debug_assert!(self.phase == Phase::Idle, "begin_secondary_cmds while a recording is active");

        let ContextBacking::Secondary { pool, buffer } = &self.backing else {
            unreachable!()
        };
        pool.reset_all_buffers()?;
        buffer.begin_secondary(inheritance, &self.debug_name)?;
        self.phase = Phase::Recording;
        Ok(self.current_buffer())
    }

    /// 结束录制
    pub fn end_cmds(&mut self) -> RhiResult<()> {
        debug_assert!(self.phase == Phase::Recording, "end_cmds without begin_cmds");
        debug_assert!(!self.in_render_pass, "end_cmds inside a render pass");

        self.current_buffer().end()?;
        self.phase = Phase::Ended;
        Ok(())
    }

    /// 提交已结束录制的 command buffer
    ///
    /// 提交被拒绝时槽位会被回收，下一帧可以直接复用
    pub fn submit_cmds(&mut self, sync: SubmitSync<'_>) -> RhiResult<()> {
        debug_assert!(self.kind == ContextKind::Primary, "submit_cmds on a secondary context");
        debug_assert!(self.phase == Phase::Ended, "submit_cmds without end_cmds");

        let ContextBacking::Primary { ring, active_slot } = &mut self.backing else {
            unreachable!()
        };
        let slot = active_slot.take().expect("primary context has no active slot");

        let mut submit_info = SubmitInfo::new(&[ring.command_buffer(slot)]);
        for (semaphore, stage) in sync.wait_binary {
            submit_info = submit_info.wait_binary(semaphore, stage);
        }
        for (semaphore, stage) in sync.signal_binary {
            submit_info = submit_info.signal_binary(semaphore, stage);
        }
        for (semaphore, stage, value) in sync.wait_timeline {
            submit_info = submit_info.wait_timeline(semaphore, stage, value);
        }
        for (semaphore, stage, value) in sync.signal_timeline {
            submit_info = submit_info.signal_timeline(semaphore, stage, value);
        }

        let result = self.queue.submit(vec![submit_info], Some(ring.fence(slot)));
        match result {
            Ok(()) => ring.mark_submitted(slot),
            Err(_) => ring.recycle(slot),
        }
        self.phase = Phase::Idle;
        result
    }
}

// render pass
impl RhiContext {
    /// 开始一个 dynamic rendering 区间
    ///
    /// desc 和附件的匹配关系在这里校验，不匹配视为调用方的 bug
    pub fn begin_render_pass(&mut self, desc: &RenderPassDesc, attachments: &RenderAttachments) {
        debug_assert!(self.kind == ContextKind::Primary, "render pass bracketing belongs to the primary context");
        debug_assert!(self.phase == Phase::Recording, "begin_render_pass without begin_cmds");
        debug_assert!(!self.in_render_pass, "nested render passes are not supported");
        if let Err(msg) = desc.validate(attachments) {
            panic!("invalid render pass on context {}: {}", self.debug_name, msg);
        }

        let rendering_info = RenderingInfo::new(desc, attachments);
        self.current_buffer().cmd_begin_rendering(&rendering_info);
        self.in_render_pass = true;
    }

    pub fn end_render_pass(&mut self) {
        debug_assert!(self.in_render_pass, "end_render_pass without begin_render_pass");
        self.current_buffer().cmd_end_rendering();
        self.in_render_pass = false;
    }

    /// 把一批 secondary context 录制好的命令并入当前的 render pass
    ///
    /// 所有 secondary context 必须已经 end_cmds
    pub fn execute_secondary_contexts(&mut self, contexts: &[&RhiContext]) {
        debug_assert!(self.kind == ContextKind::Primary, "only a primary context can execute secondaries");
        debug_assert!(self.phase == Phase::Recording, "execute_secondary_contexts outside a recording");

        let buffers: Vec<&CommandBuffer> = contexts
            .iter()
            .map(|ctx| {
                debug_assert!(ctx.kind == ContextKind::Secondary, "nested primary contexts are not supported");
                debug_assert!(ctx.phase == Phase::Ended, "secondary context {} has not ended recording", ctx.debug_name);
                ctx.current_buffer()
            })
            .collect();
        self.current_buffer().cmd_execute_commands(&buffers);
    }

    /// secondary context 的命令被执行之后调用，回到可录制状态
    pub fn reset_secondary(&mut self) {
        debug_assert!(self.kind == ContextKind::Secondary);
        debug_assert!(self.phase == Phase::Ended);
        self.phase = Phase::Idle;
    }
}

// debug 相关命令
impl RhiContext {
    #[inline]
    pub fn begin_label(&self, label_name: &str, label_color: glam::Vec4) {
        self.cmd().begin_label(label_name, label_color);
    }

    #[inline]
    pub fn end_label(&self) {
        self.cmd().end_label();
    }
}
