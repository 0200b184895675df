use std::sync::Arc;

use ash::vk;
use itertools::Itertools;

use crate::{
    descriptors::descriptor_pool::DescriptorPool,
    error::{RhiError, RhiResult},
    foundation::device::DeviceFunctions,
};

/// allocator 的配置
///
/// 每个池的容量从 initial_sets 开始，每新建一个池就乘以 growth_factor，
/// 直到 max_sets_per_pool 封顶
pub struct DescriptorAllocatorCreateInfo {
    /// 第一个池的描述符集容量
    pub initial_sets: u32,
    /// 新建池时的容量增长系数
    pub growth_factor: f32,
    /// 单个池的容量上限
    pub max_sets_per_pool: u32,
    /// 每种描述符类型的数量 = 池容量 * 比例
    pub pool_ratios: Vec<(vk::DescriptorType, f32)>,
}

impl Default for DescriptorAllocatorCreateInfo {
    fn default() -> Self {
        Self {
            initial_sets: 64,
            growth_factor: 1.5,
            max_sets_per_pool: 4096,
            pool_ratios: vec![
                (vk::DescriptorType::UNIFORM_BUFFER, 2.0),
                (vk::DescriptorType::STORAGE_BUFFER, 2.0),
                (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 4.0),
                (vk::DescriptorType::STORAGE_IMAGE, 1.0),
            ],
        }
    }
}

/// 单次分配失败的分类
///
/// 池满是正常流程的一部分，换一个池重试即可；其他错误直接向上传播
enum AllocFailure {
    PoolExhausted,
    Fatal(vk::Result),
}

/// 把池的创建和分配抽象出来，让增长、ready/full 迁移的逻辑可以脱离 device 做验证
trait PoolBackend {
    type Pool;

    fn create_pool(&mut self, max_sets: u32, debug_name: &str) -> RhiResult<Self::Pool>;
    fn allocate(&mut self, pool: &Self::Pool, layout: vk::DescriptorSetLayout)
        -> Result<vk::DescriptorSet, AllocFailure>;
    fn reset_pool(&mut self, pool: &Self::Pool) -> RhiResult<()>;
    fn destroy_pool(&mut self, pool: Self::Pool);
}

/// allocator 的核心逻辑，与 vulkan 解耦
///
/// - ready 列表：还有剩余空间的池
/// - full 列表：分配失败过的池，reset 之前不再尝试
struct PoolList<B: PoolBackend> {
    ready_pools: Vec<B::Pool>,
    full_pools: Vec<B::Pool>,

    /// 下一个新池的容量
    next_pool_sets: u32,
    growth_factor: f32,
    max_sets_per_pool: u32,
    pool_index: u32,
    debug_name: String,
}

impl<B: PoolBackend> PoolList<B> {
    fn new(initial_sets: u32, growth_factor: f32, max_sets_per_pool: u32, debug_name: &str) -> Self {
        assert!(initial_sets > 0);
        assert!(growth_factor >= 1.0);
        Self {
            ready_pools: Vec::new(),
            full_pools: Vec::new(),
            next_pool_sets: initial_sets.min(max_sets_per_pool),
            growth_factor,
            max_sets_per_pool,
            pool_index: 0,
            debug_name: debug_name.to_string(),
        }
    }

    /// 取一个 ready 池；没有就新建一个，同时推进下一次的容量
    fn grab_pool(&mut self, backend: &mut B) -> RhiResult<B::Pool> {
        if let Some(pool) = self.ready_pools.pop() {
            return Ok(pool);
        }

        let sets = self.next_pool_sets;
        self.next_pool_sets =
            ((sets as f32 * self.growth_factor) as u32).clamp(sets, self.max_sets_per_pool);
        let pool = backend.create_pool(sets, &format!("{}-pool-{}", self.debug_name, self.pool_index))?;
        self.pool_index += 1;
        log::debug!("descriptor allocator {} creates pool of {} sets", self.debug_name, sets);
        Ok(pool)
    }

    /// 分配一个描述符集
    ///
    /// 当前池满时将它移入 full 列表并换新池重试一次；
    /// 新池上的分配仍然失败说明单个集合超出了池的容量，按错误处理
    fn allocate(&mut self, backend: &mut B, layout: vk::DescriptorSetLayout) -> RhiResult<vk::DescriptorSet> {
        let pool = self.grab_pool(backend)?;
        match backend.allocate(&pool, layout) {
            Ok(set) => {
                self.ready_pools.push(pool);
                return Ok(set);
            }
            Err(AllocFailure::PoolExhausted) => {
                self.full_pools.push(pool);
            }
            Err(AllocFailure::Fatal(e)) => {
                self.ready_pools.push(pool);
                return Err(e.into());
            }
        }

        let pool = self.grab_pool(backend)?;
        match backend.allocate(&pool, layout) {
            Ok(set) => {
                self.ready_pools.push(pool);
                Ok(set)
            }
            Err(AllocFailure::PoolExhausted) => {
                self.full_pools.push(pool);
                log::error!(
                    "descriptor allocator {} failed to allocate even from a fresh pool",
                    self.debug_name
                );
                Err(RhiError::DescriptorPoolExhausted)
            }
            Err(AllocFailure::Fatal(e)) => {
                self.ready_pools.push(pool);
                Err(e.into())
            }
        }
    }

    /// 回收所有池内的描述符集，full 池重新变为 ready
    ///
    /// 容量增长进度保留，不会退回初始值
    fn reset_all(&mut self, backend: &mut B) -> RhiResult<()> {
        for pool in &self.ready_pools {
            backend.reset_pool(pool)?;
        }
        for pool in self.full_pools.drain(..) {
            backend.reset_pool(&pool)?;
            self.ready_pools.push(pool);
        }
        Ok(())
    }

    fn destroy(mut self, backend: &mut B) {
        for pool in self.ready_pools.drain(..).chain(self.full_pools.drain(..)) {
            backend.destroy_pool(pool);
        }
    }

    fn pool_count(&self) -> usize {
        self.ready_pools.len() + self.full_pools.len()
    }
}

/// 基于 vulkan 的池后端
struct VkPoolBackend {
    device_functions: Arc<DeviceFunctions>,
    pool_ratios: Vec<(vk::DescriptorType, f32)>,
}

impl PoolBackend for VkPoolBackend {
    type Pool = DescriptorPool;

    fn create_pool(&mut self, max_sets: u32, debug_name: &str) -> RhiResult<DescriptorPool> {
        let pool_sizes = self
            .pool_ratios
            .iter()
            .map(|(ty, ratio)| vk::DescriptorPoolSize {
                ty: *ty,
                descriptor_count: ((max_sets as f32 * ratio) as u32).max(1),
            })
            .collect_vec();
        DescriptorPool::new(self.device_functions.clone(), max_sets, &pool_sizes, debug_name)
    }

    fn allocate(
        &mut self,
        pool: &DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet, AllocFailure> {
        pool.allocate_set(layout).map_err(|e| match e {
            vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL => AllocFailure::PoolExhausted,
            other => AllocFailure::Fatal(other),
        })
    }

    fn reset_pool(&mut self, pool: &DescriptorPool) -> RhiResult<()> {
        pool.reset()
    }

    fn destroy_pool(&mut self, pool: DescriptorPool) {
        pool.destroy();
    }
}

/// 可增长的描述符集分配器
///
/// 池满时自动新建更大的池，分配出去的描述符集由 reset_all 统一回收。
/// 单个描述符集的生命周期不单独管理。
///
/// # Destroy
/// 需要手动调用 destroy，会销毁所有内部的池
pub struct DescriptorAllocator {
    backend: VkPoolBackend,
    pools: PoolList<VkPoolBackend>,
}

// 创建与销毁
impl DescriptorAllocator {
    pub fn new(
        device_functions: Arc<DeviceFunctions>,
        create_info: DescriptorAllocatorCreateInfo,
        debug_name: &str,
    ) -> Self {
        Self {
            backend: VkPoolBackend {
                device_functions,
                pool_ratios: create_info.pool_ratios,
            },
            pools: PoolList::new(
                create_info.initial_sets,
                create_info.growth_factor,
                create_info.max_sets_per_pool,
                debug_name,
            ),
        }
    }

    pub fn destroy(mut self) {
        self.pools.destroy(&mut self.backend);
    }
}

// tools
impl DescriptorAllocator {
    /// 分配一个指定布局的描述符集
    pub fn allocate(&mut self, layout: vk::DescriptorSetLayout) -> RhiResult<vk::DescriptorSet> {
        self.pools.allocate(&mut self.backend, layout)
    }

    /// 回收所有已分配的描述符集
    ///
    /// 调用方需要保证 GPU 已经不再使用这些描述符集
    pub fn clear(&mut self) -> RhiResult<()> {
        self.pools.reset_all(&mut self.backend)
    }

    #[inline]
    pub fn pool_count(&self) -> usize {
        self.pools.pool_count()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    /// 模拟池后端：每个池有固定容量，分配计数到达容量后返回"池满"
    #[derive(Default)]
    struct FakeBackend {
        /// pool id -> (capacity, allocated)
        pools: HashMap<u32, (u32, u32)>,
        next_id: u32,
        next_set: u64,
        created_capacities: Vec<u32>,
        destroyed: Vec<u32>,
        /// 模拟"单次分配超出任何池的容量"：所有分配都返回池满
        exhaust_all: bool,
    }

    impl PoolBackend for FakeBackend {
        type Pool = u32;

        fn create_pool(&mut self, max_sets: u32, _debug_name: &str) -> RhiResult<u32> {
            let id = self.next_id;
            self.next_id += 1;
            self.pools.insert(id, (max_sets, 0));
            self.created_capacities.push(max_sets);
            Ok(id)
        }

        fn allocate(&mut self, pool: &u32, _layout: vk::DescriptorSetLayout) -> Result<vk::DescriptorSet, AllocFailure> {
            let (capacity, allocated) = self.pools.get_mut(pool).unwrap();
            if self.exhaust_all || *allocated >= *capacity {
                return Err(AllocFailure::PoolExhausted);
            }
            *allocated += 1;
            self.next_set += 1;
            use vk::Handle;
            Ok(vk::DescriptorSet::from_raw(self.next_set))
        }

        fn reset_pool(&mut self, pool: &u32) -> RhiResult<()> {
            self.pools.get_mut(pool).unwrap().1 = 0;
            Ok(())
        }

        fn destroy_pool(&mut self, pool: u32) {
            self.pools.remove(&pool);
            self.destroyed.push(pool);
        }
    }

    fn dummy_layout() -> vk::DescriptorSetLayout {
        use vk::Handle;
        vk::DescriptorSetLayout::from_raw(0xdead)
    }

    /// 第一个池懒创建，容量等于 initial_sets
    #[test]
    fn first_pool_is_lazy() {
        let mut backend = FakeBackend::default();
        let mut pools = PoolList::new(64, 1.5, 4096, "test");
        assert_eq!(pools.pool_count(), 0);

        pools.allocate(&mut backend, dummy_layout()).unwrap();
        assert_eq!(backend.created_capacities, vec![64]);
        assert_eq!(pools.pool_count(), 1);
    }

    /// 池满后新建的池按 1.5 倍增长，并且旧池进入 full 列表
    #[test]
    fn grows_by_factor_when_pool_is_full() {
        let mut backend = FakeBackend::default();
        let mut pools = PoolList::new(4, 1.5, 4096, "test");

        for _ in 0..5 {
            pools.allocate(&mut backend, dummy_layout()).unwrap();
        }
        // 4 = 第一个池的容量，6 = 4 * 1.5
        assert_eq!(backend.created_capacities, vec![4, 6]);
        assert_eq!(pools.full_pools.len(), 1);
        assert_eq!(pools.ready_pools.len(), 1);
    }

    /// 容量增长到 max_sets_per_pool 封顶
    #[test]
    fn pool_size_is_capped() {
        let mut backend = FakeBackend::default();
        let mut pools = PoolList::new(2, 2.0, 7, "test");

        // 容量序列：2, 4, 7, 7, ...
        let mut allocated = 0;
        while backend.created_capacities.len() < 5 {
            pools.allocate(&mut backend, dummy_layout()).unwrap();
            allocated += 1;
        }
        assert_eq!(backend.created_capacities, vec![2, 4, 7, 7, 7]);
        assert!(allocated > 2 + 4 + 7 + 7);
    }

    /// 换新池重试后仍然失败按可恢复错误返回，两个池都进入 full 列表
    #[test]
    fn second_failure_is_reported_not_retried() {
        let mut backend = FakeBackend::default();
        let mut pools = PoolList::new(4, 1.5, 4096, "test");

        backend.exhaust_all = true;
        let result = pools.allocate(&mut backend, dummy_layout());
        assert!(matches!(result, Err(RhiError::DescriptorPoolExhausted)));
        // 只重试一次：恰好创建了两个池，都被标记为 full
        assert_eq!(backend.created_capacities.len(), 2);
        assert_eq!(pools.full_pools.len(), 2);
        assert!(pools.ready_pools.is_empty());
    }

    /// reset 之后所有池回到 ready 列表，且可以重新分配
    #[test]
    fn reset_reclaims_full_pools() {
        let mut backend = FakeBackend::default();
        let mut pools = PoolList::new(2, 1.5, 4096, "test");

        for _ in 0..3 {
            pools.allocate(&mut backend, dummy_layout()).unwrap();
        }
        assert_eq!(pools.full_pools.len(), 1);

        pools.reset_all(&mut backend).unwrap();
        assert!(pools.full_pools.is_empty());
        assert_eq!(pools.ready_pools.len(), 2);

        // reset 不重建池，原有的池直接复用
        let created_before = backend.created_capacities.len();
        pools.allocate(&mut backend, dummy_layout()).unwrap();
        assert_eq!(backend.created_capacities.len(), created_before);
    }

    /// reset 保留容量增长进度
    #[test]
    fn reset_keeps_growth_progress() {
        let mut backend = FakeBackend::default();
        let mut pools = PoolList::new(2, 2.0, 4096, "test");

        for _ in 0..3 {
            pools.allocate(&mut backend, dummy_layout()).unwrap();
        }
        pools.reset_all(&mut backend).unwrap();
        assert_eq!(pools.next_pool_sets, 8);
    }

    /// destroy 时释放所有的池
    #[test]
    fn destroy_releases_every_pool() {
        let mut backend = FakeBackend::default();
        let mut pools = PoolList::new(2, 1.5, 4096, "test");

        for _ in 0..3 {
            pools.allocate(&mut backend, dummy_layout()).unwrap();
        }
        let total = pools.pool_count();
        pools.destroy(&mut backend);
        assert_eq!(backend.destroyed.len(), total);
        assert!(backend.pools.is_empty());
    }
}
