pub mod allocator;
pub mod descriptor_pool;
pub mod layout_cache;
