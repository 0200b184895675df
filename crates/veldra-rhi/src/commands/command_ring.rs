use std::sync::Arc;

use ash::vk;

use crate::{
    commands::{
        command_buffer::CommandBuffer,
        command_pool::CommandPool,
        command_queue::QueueFamily,
        fence::{Fence, WAIT_FOREVER},
    },
    error::RhiResult,
    foundation::device::DeviceFunctions,
    frames::FifLabel,
};

/// CommandRing 对 fence 的最小要求
///
/// 单独抽出来是为了让槽位状态机可以脱离 device 做验证
pub trait RingFence {
    fn is_signaled(&self) -> RhiResult<bool>;
    fn wait(&self, timeout_ns: u64) -> RhiResult<()>;
    fn reset(&self) -> RhiResult<()>;
}

/// 槽位的生命周期：Free -> Recording -> Submitted -> Free
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum SlotState {
    /// 未被占用，fence 一定处于 unsignaled 状态，复用时无需检查
    Free,
    /// CPU 正在录制，不可被 acquire
    Recording,
    /// 已提交 GPU，fence signaled 之后才能复用
    Submitted,
}

struct TrackedSlot<F: RingFence> {
    fence: F,
    state: SlotState,
    /// 提交的先后顺序，饱和时用来挑最旧的槽位等待
    submit_serial: u64,
}

/// acquire 的结果：要么拿到了现成的槽位，要么需要调用方新建一个
enum AcquireOutcome {
    Slot(usize),
    NeedsGrow,
}

/// 槽位状态机，与 vulkan 对象解耦
///
/// 只管理 fence 和状态，pool/buffer 由 [`CommandRing`] 以相同下标并行持有
struct SlotTracker<F: RingFence> {
    slots: Vec<TrackedSlot<F>>,
    max_in_flight: usize,
    next_serial: u64,
}

impl<F: RingFence> SlotTracker<F> {
    fn new(max_in_flight: usize) -> Self {
        assert!(max_in_flight > 0, "max_in_flight must be at least 1");
        Self {
            slots: Vec::with_capacity(max_in_flight),
            max_in_flight,
            next_serial: 0,
        }
    }

    /// 找一个可复用的槽位
    ///
    /// 查找顺序：
    /// 1. Free 槽位直接复用，跳过 fence 查询
    /// 2. Submitted 且 fence signaled 的槽位，reset fence 后复用
    /// 3. 还有增长空间就要求新建
    /// 4. 饱和时阻塞等待最早提交的槽位
    fn acquire(&mut self, timeout_ns: u64) -> RhiResult<AcquireOutcome> {
        for (idx, slot) in self.slots.iter().enumerate() {
            if slot.state == SlotState::Free {
                self.slots[idx].state = SlotState::Recording;
                return Ok(AcquireOutcome::Slot(idx));
            }
        }
        for idx in 0..self.slots.len() {
            if self.slots[idx].state == SlotState::Submitted && self.slots[idx].fence.is_signaled()? {
                self.slots[idx].fence.reset()?;
                self.slots[idx].state = SlotState::Recording;
                return Ok(AcquireOutcome::Slot(idx));
            }
        }

        if self.slots.len() < self.max_in_flight {
            return Ok(AcquireOutcome::NeedsGrow);
        }

        // 饱和：CPU 跑得太靠前了，等最旧的一次提交完成
        let oldest = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.state == SlotState::Submitted)
            .min_by_key(|(_, slot)| slot.submit_serial)
            .map(|(idx, _)| idx)
            .expect("saturated ring must contain a submitted slot");
        self.slots[oldest].fence.wait(timeout_ns)?;
        self.slots[oldest].fence.reset()?;
        self.slots[oldest].state = SlotState::Recording;
        Ok(AcquireOutcome::Slot(oldest))
    }

    /// 新建的槽位直接进入 Recording 状态
    fn push_recording(&mut self, fence: F) -> usize {
        debug_assert!(self.slots.len() < self.max_in_flight);
        self.slots.push(TrackedSlot {
            fence,
            state: SlotState::Recording,
            submit_serial: 0,
        });
        self.slots.len() - 1
    }

    fn mark_submitted(&mut self, idx: usize) {
        debug_assert_eq!(self.slots[idx].state, SlotState::Recording);
        self.slots[idx].state = SlotState::Submitted;
        self.slots[idx].submit_serial = self.next_serial;
        self.next_serial += 1;
    }

    /// 提交失败时回收槽位，fence 从未 signaled，无需 reset
    fn recycle(&mut self, idx: usize) {
        self.slots[idx].state = SlotState::Free;
    }

    /// 等待所有在途的提交完成，槽位全部归为 Free
    fn wait_all(&mut self, timeout_ns: u64) -> RhiResult<()> {
        for slot in &mut self.slots {
            if slot.state == SlotState::Submitted {
                slot.fence.wait(timeout_ns)?;
                slot.fence.reset()?;
                slot.state = SlotState::Free;
            }
        }
        Ok(())
    }

    fn fence(&self, idx: usize) -> &F {
        &self.slots[idx].fence
    }

    fn len(&self) -> usize {
        self.slots.len()
    }
}

/// 按需增长的 command buffer 环
///
/// 每个槽位独占一个 command pool、一个 primary command buffer 和一个 fence，
/// 槽位数量上限就是 CPU 允许领先 GPU 的帧数。
/// 饱和之后 acquire 会阻塞，形成天然的反压。
///
/// # Destroy
/// 需要手动调用 destroy，内部会先等待所有在途提交
pub struct CommandRing {
    device_functions: Arc<DeviceFunctions>,
    queue_family: QueueFamily,

    /// 与 tracker 同下标
    pools: Vec<CommandPool>,
    buffers: Vec<CommandBuffer>,
    tracker: SlotTracker<Fence>,

    debug_name: String,
}

// 创建与销毁
impl CommandRing {
    /// 初始不分配任何槽位，第一次 acquire 时才创建
    pub fn new(
        device_functions: Arc<DeviceFunctions>,
        queue_family: QueueFamily,
        max_in_flight: usize,
        debug_name: &str,
    ) -> Self {
        Self {
            device_functions,
            queue_family,
            pools: Vec::with_capacity(max_in_flight),
            buffers: Vec::with_capacity(max_in_flight),
            tracker: SlotTracker::new(max_in_flight),
            debug_name: debug_name.to_string(),
        }
    }

    pub fn destroy(mut self) -> RhiResult<()> {
        self.tracker.wait_all(WAIT_FOREVER)?;
        for slot in self.tracker.slots.drain(..) {
            slot.fence.destroy();
        }
        for pool in self.pools.drain(..) {
            // buffer 随 pool 一起释放
            pool.destroy();
        }
        self.buffers.clear();
        Ok(())
    }
}

// getters
impl CommandRing {
    #[inline]
    pub fn command_buffer(&self, slot: usize) -> &CommandBuffer {
        &self.buffers[slot]
    }

    #[inline]
    pub fn fence(&self, slot: usize) -> &Fence {
        self.tracker.fence(slot)
    }

    #[inline]
    pub fn slot_count(&self) -> usize {
        self.tracker.len()
    }
}

// tools
impl CommandRing {
    /// 取得一个可录制的槽位，并把它的 pool reset 到初始状态
    ///
    /// 饱和时会阻塞，直到最早的一次提交完成；超时返回
    /// [`crate::error::RhiError::AcquireTimeout`]
    pub fn acquire(&mut self, timeout_ns: u64) -> RhiResult<usize> {
        let slot = match self.tracker.acquire(timeout_ns)? {
            AcquireOutcome::Slot(idx) => idx,
            AcquireOutcome::NeedsGrow => self.grow()?,
        };
        self.pools[slot].reset_all_buffers()?;
        Ok(slot)
    }

    /// 提交成功后调用，槽位进入 Submitted 状态
    #[inline]
    pub fn mark_submitted(&mut self, slot: usize) {
        self.tracker.mark_submitted(slot);
    }

    /// 提交失败后调用，槽位回到 Free 状态等待复用
    #[inline]
    pub fn recycle(&mut self, slot: usize) {
        self.tracker.recycle(slot);
    }

    /// 等待所有在途提交完成
    pub fn wait_all(&mut self, timeout_ns: u64) -> RhiResult<()> {
        self.tracker.wait_all(timeout_ns)
    }

    fn grow(&mut self) -> RhiResult<usize> {
        let idx = self.pools.len();
        let label = FifLabel::from_usize(idx, self.tracker.max_in_flight);
        let pool = CommandPool::new(
            self.device_functions.clone(),
            self.queue_family.clone(),
            vk::CommandPoolCreateFlags::TRANSIENT,
            &format!("{}-pool-{}", self.debug_name, label),
        )?;
        let buffer = CommandBuffer::new(
            self.device_functions.clone(),
            &pool,
            vk::CommandBufferLevel::PRIMARY,
            &format!("{}-cmd-{}", self.debug_name, label),
        );
        let buffer = match buffer {
            Ok(buffer) => buffer,
            Err(e) => {
                pool.destroy();
                return Err(e);
            }
        };
        let fence = match Fence::new(self.device_functions.clone(), false, &format!("{}-fence-{}", self.debug_name, label)) {
            Ok(fence) => fence,
            Err(e) => {
                pool.destroy();
                return Err(e);
            }
        };

        self.pools.push(pool);
        self.buffers.push(buffer);
        let tracked_idx = self.tracker.push_recording(fence);
        debug_assert_eq!(tracked_idx, idx);
        log::debug!("command ring {} grows to {} slots", self.debug_name, self.tracker.len());
        Ok(idx)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    /// 模拟 fence：signaled 状态由测试控制，wait 表示"GPU 完成了这次提交"
    #[derive(Clone, Default)]
    struct FakeFence {
        inner: Rc<RefCell<FakeFenceState>>,
    }

    #[derive(Default)]
    struct FakeFenceState {
        signaled: bool,
        query_count: u32,
        wait_count: u32,
    }

    impl RingFence for FakeFence {
        fn is_signaled(&self) -> RhiResult<bool> {
            let mut state = self.inner.borrow_mut();
            state.query_count += 1;
            Ok(state.signaled)
        }
        fn wait(&self, _timeout_ns: u64) -> RhiResult<()> {
            let mut state = self.inner.borrow_mut();
            state.wait_count += 1;
            state.signaled = true;
            Ok(())
        }
        fn reset(&self) -> RhiResult<()> {
            self.inner.borrow_mut().signaled = false;
            Ok(())
        }
    }

    fn grow_one(tracker: &mut SlotTracker<FakeFence>) -> (usize, FakeFence) {
        let fence = FakeFence::default();
        let idx = tracker.push_recording(fence.clone());
        (idx, fence)
    }

    /// 空环第一次 acquire 应当要求新建槽位
    #[test]
    fn empty_ring_needs_grow() {
        let mut tracker = SlotTracker::<FakeFence>::new(3);
        assert!(matches!(tracker.acquire(WAIT_FOREVER).unwrap(), AcquireOutcome::NeedsGrow));
    }

    /// signaled 的 Submitted 槽位会被复用，而不是继续增长
    #[test]
    fn reuse_signaled_slot_before_growing() {
        let mut tracker = SlotTracker::<FakeFence>::new(3);
        let (idx, fence) = grow_one(&mut tracker);
        tracker.mark_submitted(idx);
        fence.inner.borrow_mut().signaled = true;

        match tracker.acquire(WAIT_FOREVER).unwrap() {
            AcquireOutcome::Slot(reused) => assert_eq!(reused, idx),
            AcquireOutcome::NeedsGrow => panic!("should reuse the signaled slot"),
        }
        assert_eq!(tracker.len(), 1);
        // 复用时 fence 必须回到 unsignaled
        assert!(!fence.inner.borrow().signaled);
    }

    /// Free 槽位复用时不应该查询 fence
    #[test]
    fn free_slot_skips_fence_query() {
        let mut tracker = SlotTracker::<FakeFence>::new(3);
        let (idx, fence) = grow_one(&mut tracker);
        tracker.mark_submitted(idx);
        // 提交被拒绝，回收槽位
        tracker.recycle(idx);

        let before = fence.inner.borrow().query_count;
        match tracker.acquire(WAIT_FOREVER).unwrap() {
            AcquireOutcome::Slot(reused) => assert_eq!(reused, idx),
            AcquireOutcome::NeedsGrow => panic!("recycled slot should be reused"),
        }
        assert_eq!(fence.inner.borrow().query_count, before);
    }

    /// 槽位数量不会超过 max_in_flight；饱和时阻塞等待最旧的提交
    #[test]
    fn saturated_ring_waits_for_oldest() {
        let mut tracker = SlotTracker::<FakeFence>::new(2);
        let (idx0, fence0) = grow_one(&mut tracker);
        tracker.mark_submitted(idx0);
        let (idx1, fence1) = grow_one(&mut tracker);
        tracker.mark_submitted(idx1);

        // 两个槽位都在途且未完成，应该等待先提交的 idx0
        match tracker.acquire(WAIT_FOREVER).unwrap() {
            AcquireOutcome::Slot(slot) => assert_eq!(slot, idx0),
            AcquireOutcome::NeedsGrow => panic!("ring is at capacity, must not grow"),
        }
        assert_eq!(fence0.inner.borrow().wait_count, 1);
        assert_eq!(fence1.inner.borrow().wait_count, 0);
        assert_eq!(tracker.len(), 2);
    }

    /// 完整周期：Free -> Recording -> Submitted -> Free
    #[test]
    fn full_lifecycle_roundtrip() {
        let mut tracker = SlotTracker::<FakeFence>::new(1);
        let (idx, fence) = grow_one(&mut tracker);
        tracker.mark_submitted(idx);

        // 饱和，只能等自己
        match tracker.acquire(WAIT_FOREVER).unwrap() {
            AcquireOutcome::Slot(slot) => assert_eq!(slot, idx),
            AcquireOutcome::NeedsGrow => panic!("single-slot ring must not grow"),
        }
        tracker.mark_submitted(idx);
        fence.inner.borrow_mut().signaled = true;
        tracker.wait_all(WAIT_FOREVER).unwrap();
        assert_eq!(tracker.slots[idx].state, SlotState::Free);
    }

    /// 提交序号决定等待顺序，与槽位下标无关
    #[test]
    fn oldest_is_by_submit_order_not_index() {
        let mut tracker = SlotTracker::<FakeFence>::new(2);
        let (idx0, fence0) = grow_one(&mut tracker);
        tracker.mark_submitted(idx0);
        let (idx1, fence1) = grow_one(&mut tracker);
        tracker.mark_submitted(idx1);

        // idx0 先完成并被复用重新提交，此时 idx1 才是最旧的
        fence0.inner.borrow_mut().signaled = true;
        match tracker.acquire(WAIT_FOREVER).unwrap() {
            AcquireOutcome::Slot(slot) => assert_eq!(slot, idx0),
            AcquireOutcome::NeedsGrow => panic!(),
        }
        tracker.mark_submitted(idx0);

        match tracker.acquire(WAIT_FOREVER).unwrap() {
            AcquireOutcome::Slot(slot) => assert_eq!(slot, idx1),
            AcquireOutcome::NeedsGrow => panic!(),
        }
        assert_eq!(fence1.inner.borrow().wait_count, 1);
    }
}
