pub mod command_buffer;
pub mod command_pool;
pub mod command_queue;
pub mod command_ring;
pub mod fence;
pub mod semaphore;
pub mod submit_info;
