/// Allocators that hand out ranges instead of memory.
///
/// Nothing in here owns the bytes it manages. The allocators only do the bookkeeping, and the
/// owner (typically a GPU buffer pool) pairs the ranges with whatever actually holds the data.
pub mod buddy;
pub mod stats;

pub mod prelude {
    pub use crate::buddy::*;
    pub use crate::stats::*;
}
