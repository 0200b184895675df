use std::{collections::HashMap, sync::Mutex};

use crate::error::RhiResult;

/// 回调能够绑定的时间轴
///
/// GPU 侧由 timeline semaphore 实现；抽出 trait 是为了让
/// 执行器的调度逻辑可以脱离 device 做验证
pub trait TimelineValueSource {
    /// 区分不同时间轴的稳定键
    fn timeline_key(&self) -> u64;
    /// 时间轴的当前值，单调递增
    fn current_value(&self) -> RhiResult<u64>;
}

type DeferredCallback = Box<dyn FnOnce() + Send>;

struct TimelineEntry<T> {
    source: T,
    /// (目标值, 回调)，按注册顺序保存
    pending: Vec<(u64, DeferredCallback)>,
}

struct ExecutorState<T> {
    timelines: HashMap<u64, TimelineEntry<T>>,
    /// 不绑定时间轴、只在 flush 时执行的回调
    end_of_session: Vec<DeferredCallback>,
}

/// 延迟执行器
///
/// 资源销毁等操作不能在 GPU 仍在使用时进行。把操作注册到某条时间轴的
/// 目标值上，等时间轴推进过该值之后再执行。
///
/// 回调在锁外执行，回调内可以再注册新的回调，不会死锁。
pub struct RhiDeferredExecutor<T: TimelineValueSource> {
    state: Mutex<ExecutorState<T>>,
}

impl<T: TimelineValueSource + Clone> Default for RhiDeferredExecutor<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimelineValueSource + Clone> RhiDeferredExecutor<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ExecutorState {
                timelines: HashMap::new(),
                end_of_session: Vec::new(),
            }),
        }
    }

    /// 注册一个延迟回调
    ///
    /// - timeline 为 Some：时间轴值达到 target_value 后，在下一次
    ///   [`Self::process_deferred_callbacks`] 中执行
    /// - timeline 为 None：没有需要等待的 GPU 工作，立刻同步执行
    pub fn defer_execute(
        &self,
        timeline: Option<&T>,
        target_value: u64,
        callback: impl FnOnce() + Send + 'static,
    ) {
        let Some(timeline) = timeline else {
            callback();
            return;
        };

        let mut state = self.state.lock().unwrap();
        let entry = state.timelines.entry(timeline.timeline_key()).or_insert_with(|| TimelineEntry {
            source: timeline.clone(),
            pending: Vec::new(),
        });
        entry.pending.push((target_value, Box::new(callback)));
    }

    /// 注册一个只在 [`Self::flush_all_deferred_callbacks`] 时执行的回调
    pub fn defer_execute_end_of_session(&self, callback: impl FnOnce() + Send + 'static) {
        self.state.lock().unwrap().end_of_session.push(Box::new(callback));
    }

    /// 执行所有已到期的回调，返回执行的数量
    ///
    /// 每条时间轴只读取一次当前值；到期的回调先从队列中取出，
    /// 释放锁之后再按注册顺序执行。
    ///
    /// 某条时间轴的值查询失败时，它名下的回调原样保留，等下一次
    /// process 或 flush 再处理；其他时间轴上已到期的回调照常执行，
    /// 执行完之后才返回第一个查询错误
    pub fn process_deferred_callbacks(&self) -> RhiResult<usize> {
        let mut ready: Vec<DeferredCallback> = Vec::new();
        let mut first_error = None;
        {
            let mut state = self.state.lock().unwrap();
            for entry in state.timelines.values_mut() {
                if entry.pending.is_empty() {
                    continue;
                }
                let current = match entry.source.current_value() {
                    Ok(value) => value,
                    Err(e) => {
                        log::error!(
                            "failed to query timeline {}, its {} deferred callbacks stay pending: {}",
                            entry.source.timeline_key(),
                            entry.pending.len(),
                            e
                        );
                        if first_error.is_none() {
                            first_error = Some(e);
                        }
                        continue;
                    }
                };
                let mut remaining = Vec::with_capacity(entry.pending.len());
                for (target, callback) in entry.pending.drain(..) {
                    if target <= current {
                        ready.push(callback);
                    } else {
                        remaining.push((target, callback));
                    }
                }
                entry.pending = remaining;
            }
        }

        let count = ready.len();
        for callback in ready {
            callback();
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(count),
        }
    }

    /// 时间轴即将销毁时调用，它名下剩余的回调立即执行
    ///
    /// 调用方需要保证该时间轴关联的 GPU 工作已经完成；
    /// 还有回调在等待属于调用方的时序错误，会打 warn log
    pub fn drop_timeline(&self, timeline: &T) {
        let entry = self.state.lock().unwrap().timelines.remove(&timeline.timeline_key());
        let Some(entry) = entry else {
            return;
        };
        if !entry.pending.is_empty() {
            log::warn!(
                "timeline {} dropped with {} pending deferred callbacks, executing them now",
                timeline.timeline_key(),
                entry.pending.len()
            );
        }
        for (_, callback) in entry.pending {
            callback();
        }
    }

    /// 无条件执行所有剩余的回调，包括 end-of-session 的
    ///
    /// 只应在设备 idle 之后调用，返回执行的数量
    pub fn flush_all_deferred_callbacks(&self) -> usize {
        let mut ready: Vec<DeferredCallback> = Vec::new();
        {
            let mut state = self.state.lock().unwrap();
            for (_, entry) in state.timelines.drain() {
                for (_, callback) in entry.pending {
                    ready.push(callback);
                }
            }
            ready.append(&mut state.end_of_session);
        }

        let count = ready.len();
        for callback in ready {
            callback();
        }
        count
    }

    /// 还未执行的回调数量
    pub fn pending_count(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.timelines.values().map(|e| e.pending.len()).sum::<usize>() + state.end_of_session.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    };

    use super::*;
    use crate::error::RhiError;

    /// 模拟时间轴：值由测试直接推进，也可以让查询失败
    #[derive(Clone)]
    struct FakeTimeline {
        key: u64,
        value: Arc<AtomicU64>,
        query_fails: Arc<AtomicBool>,
    }

    impl FakeTimeline {
        fn new(key: u64) -> Self {
            Self {
                key,
                value: Arc::new(AtomicU64::new(0)),
                query_fails: Arc::new(AtomicBool::new(false)),
            }
        }

        fn advance_to(&self, value: u64) {
            self.value.store(value, Ordering::SeqCst);
        }

        fn fail_queries(&self) {
            self.query_fails.store(true, Ordering::SeqCst);
        }
    }

    impl TimelineValueSource for FakeTimeline {
        fn timeline_key(&self) -> u64 {
            self.key
        }
        fn current_value(&self) -> RhiResult<u64> {
            if self.query_fails.load(Ordering::SeqCst) {
                return Err(RhiError::Vulkan(ash::vk::Result::ERROR_DEVICE_LOST));
            }
            Ok(self.value.load(Ordering::SeqCst))
        }
    }

    fn recorder() -> (Arc<Mutex<Vec<u64>>>, impl Fn(u64) -> Box<dyn FnOnce() + Send>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log2 = log.clone();
        let make = move |tag: u64| -> Box<dyn FnOnce() + Send> {
            let log = log2.clone();
            Box::new(move || log.lock().unwrap().push(tag))
        };
        (log, make)
    }

    /// 目标值 3/5/7，时间轴推进到 5：3 和 5 到期，7 继续等待
    #[test]
    fn fires_only_reached_targets() {
        let executor = RhiDeferredExecutor::new();
        let timeline = FakeTimeline::new(1);
        let (log, cb) = recorder();

        executor.defer_execute(Some(&timeline), 3, cb(3));
        executor.defer_execute(Some(&timeline), 5, cb(5));
        executor.defer_execute(Some(&timeline), 7, cb(7));

        timeline.advance_to(5);
        assert_eq!(executor.process_deferred_callbacks().unwrap(), 2);
        assert_eq!(*log.lock().unwrap(), vec![3, 5]);
        assert_eq!(executor.pending_count(), 1);

        timeline.advance_to(7);
        assert_eq!(executor.process_deferred_callbacks().unwrap(), 1);
        assert_eq!(*log.lock().unwrap(), vec![3, 5, 7]);
        assert_eq!(executor.pending_count(), 0);
    }

    /// 没有时间轴的回调立刻同步执行
    #[test]
    fn null_timeline_runs_synchronously() {
        let executor = RhiDeferredExecutor::<FakeTimeline>::new();
        let (log, cb) = recorder();

        executor.defer_execute(None, 42, cb(42));
        assert_eq!(*log.lock().unwrap(), vec![42]);
        assert_eq!(executor.pending_count(), 0);
    }

    /// 不同的时间轴互不影响
    #[test]
    fn timelines_are_independent() {
        let executor = RhiDeferredExecutor::new();
        let timeline_a = FakeTimeline::new(1);
        let timeline_b = FakeTimeline::new(2);
        let (log, cb) = recorder();

        executor.defer_execute(Some(&timeline_a), 1, cb(10));
        executor.defer_execute(Some(&timeline_b), 1, cb(20));

        timeline_a.advance_to(1);
        assert_eq!(executor.process_deferred_callbacks().unwrap(), 1);
        assert_eq!(*log.lock().unwrap(), vec![10]);

        timeline_b.advance_to(1);
        assert_eq!(executor.process_deferred_callbacks().unwrap(), 1);
        assert_eq!(*log.lock().unwrap(), vec![10, 20]);
    }

    /// 回调内可以再注册新的回调，不会死锁；新回调在下一次 process 执行
    #[test]
    fn callbacks_may_defer_more_work() {
        let executor = Arc::new(RhiDeferredExecutor::new());
        let timeline = FakeTimeline::new(1);
        let (log, cb) = recorder();

        {
            let executor = executor.clone();
            let timeline2 = timeline.clone();
            let inner = cb(2);
            executor.clone().defer_execute(
                Some(&timeline),
                1,
                move || {
                    executor.defer_execute(Some(&timeline2), 1, inner);
                },
            );
        }

        timeline.advance_to(1);
        assert_eq!(executor.process_deferred_callbacks().unwrap(), 1);
        assert_eq!(executor.pending_count(), 1);
        assert_eq!(executor.process_deferred_callbacks().unwrap(), 1);
        assert_eq!(*log.lock().unwrap(), vec![2]);
    }

    /// 某条时间轴查询失败不能弄丢任何回调：
    /// 健康时间轴上已到期的回调照常执行，坏时间轴上的回调保持 pending，
    /// 之后 flush 还能拿到它们
    #[test]
    fn query_failure_keeps_every_callback() {
        let executor = RhiDeferredExecutor::new();
        let broken = FakeTimeline::new(1);
        let healthy = FakeTimeline::new(2);
        let (log, cb) = recorder();

        let total: usize = 8;
        executor.defer_execute(Some(&broken), 1, cb(100));
        executor.defer_execute(Some(&broken), 2, cb(101));
        for i in 0..total - 2 {
            executor.defer_execute(Some(&healthy), 1, cb(i as u64));
        }

        broken.fail_queries();
        healthy.advance_to(1);
        assert!(executor.process_deferred_callbacks().is_err());

        // 执行过的 + 还在等的 = 注册过的，一个都不能少
        let executed = log.lock().unwrap().len();
        assert_eq!(executed + executor.pending_count(), total);
        assert_eq!(executed, total - 2);
        assert_eq!(executor.pending_count(), 2);

        // 坏时间轴上的回调最终由 flush 兜底
        assert_eq!(executor.flush_all_deferred_callbacks(), 2);
        assert_eq!(log.lock().unwrap().len(), total);
    }

    /// drop_timeline 立即执行该时间轴名下剩余的回调，其他时间轴不受影响
    #[test]
    fn drop_timeline_runs_its_leftovers() {
        let executor = RhiDeferredExecutor::new();
        let timeline_a = FakeTimeline::new(1);
        let timeline_b = FakeTimeline::new(2);
        let (log, cb) = recorder();

        executor.defer_execute(Some(&timeline_a), 10, cb(1));
        executor.defer_execute(Some(&timeline_b), 10, cb(2));

        executor.drop_timeline(&timeline_a);
        assert_eq!(*log.lock().unwrap(), vec![1]);
        assert_eq!(executor.pending_count(), 1);

        // 不存在的时间轴是 no-op
        executor.drop_timeline(&timeline_a);
        assert_eq!(executor.pending_count(), 1);
    }

    /// flush 无条件执行一切，包括 end-of-session 的回调
    #[test]
    fn flush_runs_everything() {
        let executor = RhiDeferredExecutor::new();
        let timeline = FakeTimeline::new(1);
        let (log, cb) = recorder();

        executor.defer_execute(Some(&timeline), 100, cb(1));
        executor.defer_execute_end_of_session({
            let inner = cb(2);
            move || inner()
        });

        // 时间轴还停在 0，process 什么都不做
        assert_eq!(executor.process_deferred_callbacks().unwrap(), 0);
        assert_eq!(executor.flush_all_deferred_callbacks(), 2);
        let mut fired = log.lock().unwrap().clone();
        fired.sort_unstable();
        assert_eq!(fired, vec![1, 2]);
        assert_eq!(executor.pending_count(), 0);
    }
}
