use std::ops::AddAssign;

/// Running totals kept by an allocator. All values are in bytes of whole blocks, except
/// `total_spoilt` which counts the bytes lost to rounding requests up to a block size.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct AllocatorStats {
    /// Bytes currently handed out.
    pub current_allocated: u64,
    /// Bytes handed out over the lifetime of the allocator.
    pub total_allocated: u64,
    /// Highest value `current_allocated` has ever reached.
    pub max_allocated: u64,
    /// Bytes wasted because the requested size was smaller than the block that was returned.
    pub total_spoilt: u64,
    /// Number of allocations that have not been freed.
    pub live_allocations: usize,
}

impl AllocatorStats {
    pub(crate) fn record_allocation(&mut self, requested: u64, block_len: u64) {
        self.current_allocated += block_len;
        self.total_allocated += block_len;
        self.total_spoilt += block_len - requested;
        self.max_allocated = self.max_allocated.max(self.current_allocated);
        self.live_allocations += 1;
    }

    pub(crate) fn record_free(&mut self, block_len: u64) {
        self.current_allocated -= block_len;
        self.live_allocations -= 1;
    }
}

/// Summing stats from several allocators. `max_allocated` becomes the sum of the individual
/// high-water marks, which is an upper bound on the combined one.
impl AddAssign for AllocatorStats {
    fn add_assign(&mut self, rhs: Self) {
        self.current_allocated += rhs.current_allocated;
        self.total_allocated += rhs.total_allocated;
        self.max_allocated += rhs.max_allocated;
        self.total_spoilt += rhs.total_spoilt;
        self.live_allocations += rhs.live_allocations;
    }
}
