//! Sub-allocation of GPU buffers.
//!
//! A [`BufferPool`](pool::BufferPool) owns a handful of large buffers created through a
//! [`BufferBackend`](backend::BufferBackend) and hands out byte ranges of them. Each buffer is
//! managed by a buddy allocator from `ard-alloc`.

pub mod arena;
pub mod backend;
pub mod config;
pub mod pool;
pub mod types;

pub mod prelude {
    pub use crate::arena::*;
    pub use crate::backend::*;
    pub use crate::config::*;
    pub use crate::pool::*;
    pub use crate::types::*;
}
