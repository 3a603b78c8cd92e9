use std::collections::BTreeSet;

use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::stats::AllocatorStats;

/// A fixed size buddy block allocator.
///
/// This allocator is a sort of "virtual allocator". It doesn't manage any memory itself. Instead,
/// it gives you back byte offsets which you can use to address subregions of memory that you
/// manage yourself (usually a GPU buffer).
///
/// Blocks at level `L` are `min_block_size << L` bytes long, and every block is aligned to its
/// own size. When the allocator is created, the whole range is a single free block at the top
/// level.
#[derive(Debug)]
pub struct BuddyAllocator {
    /// Free block offsets for each level of the allocator. Sorted so that the lowest offset is
    /// always handed out first.
    free_blocks: Vec<BTreeSet<u64>>,
    /// Maps the offset of every live allocation to the level it was allocated at.
    allocations: FxHashMap<u64, usize>,
    /// Size in bytes of a level 0 block.
    min_block_size: u64,
    stats: AllocatorStats,
}

/// A block handed out by a [`BuddyAllocator`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct BuddyBlock {
    offset: u64,
    len: u64,
    level: usize,
}

#[derive(Debug, Error, Copy, Clone, PartialEq, Eq)]
pub enum AllocError {
    #[error("cannot allocate zero bytes")]
    ZeroSize,
    #[error("requested `{size}` bytes but the allocator only holds `{capacity}` bytes")]
    TooLarge { size: u64, capacity: u64 },
    #[error("no free block is large enough to hold `{size}` bytes")]
    Exhausted { size: u64 },
}

impl BuddyAllocator {
    /// Creates a new allocator.
    ///
    /// `level_count` is the number of block sizes the allocator supports, and `min_block_size` is
    /// the size in bytes of the smallest one. The total capacity is
    /// `min_block_size << (level_count - 1)`.
    ///
    /// # Panics
    /// - If `level_count` or `min_block_size` is `0`.
    /// - If the total capacity does not fit in a `u64`.
    pub fn new(level_count: usize, min_block_size: u64) -> Self {
        assert_ne!(level_count, 0, "allocator must have at least one level");
        assert_ne!(min_block_size, 0, "minimum block size cannot be zero");
        assert!(
            level_count <= u64::BITS as usize
                && min_block_size
                    .checked_mul(1 << (level_count - 1))
                    .is_some(),
            "allocator capacity overflows"
        );

        let mut free_blocks = vec![BTreeSet::default(); level_count];
        free_blocks[level_count - 1].insert(0);

        Self {
            free_blocks,
            allocations: FxHashMap::default(),
            min_block_size,
            stats: AllocatorStats::default(),
        }
    }

    #[inline(always)]
    pub fn level_count(&self) -> usize {
        self.free_blocks.len()
    }

    #[inline(always)]
    pub fn min_block_size(&self) -> u64 {
        self.min_block_size
    }

    /// Total number of bytes managed by the allocator.
    #[inline(always)]
    pub fn capacity(&self) -> u64 {
        self.block_size(self.level_count() - 1)
    }

    /// Size in bytes of a block at `level`.
    #[inline(always)]
    pub fn block_size(&self, level: usize) -> u64 {
        self.min_block_size << level
    }

    #[inline(always)]
    pub fn stats(&self) -> AllocatorStats {
        self.stats
    }

    /// Number of bytes in free blocks. Fragmentation is not taken into account, so this is not
    /// the largest allocation that can be made.
    pub fn free_size(&self) -> u64 {
        self.free_blocks
            .iter()
            .enumerate()
            .map(|(level, blocks)| blocks.len() as u64 * self.block_size(level))
            .sum()
    }

    /// `true` if nothing is currently allocated.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.allocations.is_empty()
    }

    /// `true` if `offset` is the start of a live allocation.
    #[inline]
    pub fn is_allocated(&self, offset: u64) -> bool {
        self.allocations.contains_key(&offset)
    }

    /// Offsets of the free blocks at `level`, lowest first.
    ///
    /// # Panics
    /// - If `level` is not a level of this allocator.
    pub fn free_offsets(&self, level: usize) -> impl Iterator<Item = u64> + '_ {
        self.free_blocks[level].iter().copied()
    }

    /// The smallest level whose blocks can hold `size` bytes, or `None` if no level is large
    /// enough.
    pub fn level_for(&self, size: u64) -> Option<usize> {
        let block_count = size.div_ceil(self.min_block_size).max(1);
        let level = block_count.checked_next_power_of_two()?.trailing_zeros() as usize;
        (level < self.level_count()).then_some(level)
    }

    /// Determines if the allocator has a free block able to fit an allocation of `size` bytes.
    ///
    /// # Note
    /// `allocate` is guaranteed to succeed for the given size if this method returns true.
    pub fn has_capacity_for(&self, size: u64) -> bool {
        if size == 0 {
            return false;
        }

        match self.level_for(size) {
            Some(level) => self.free_blocks[level..]
                .iter()
                .any(|blocks| !blocks.is_empty()),
            None => false,
        }
    }

    /// Allocate a block large enough to fit `size` bytes.
    ///
    /// Fails with [`AllocError::Exhausted`] if there is no free block big enough. Nothing is
    /// retried, so the caller decides what to do about it (usually make another allocator).
    pub fn allocate(&mut self, size: u64) -> Result<BuddyBlock, AllocError> {
        if size == 0 {
            return Err(AllocError::ZeroSize);
        }

        let level = match self.level_for(size) {
            Some(level) => level,
            None => {
                return Err(AllocError::TooLarge {
                    size,
                    capacity: self.capacity(),
                })
            }
        };

        // Grab the smallest free block that can hold the allocation
        let (mut upper_level, offset) = self.free_blocks[level..]
            .iter_mut()
            .enumerate()
            .find_map(|(i, blocks)| blocks.pop_first().map(|offset| (level + i, offset)))
            .ok_or(AllocError::Exhausted { size })?;

        // Split it until we're at the desired level, keeping the lower half each time
        while upper_level != level {
            upper_level -= 1;
            let right = offset + self.block_size(upper_level);
            self.free_blocks[upper_level].insert(right);
        }

        let len = self.block_size(level);
        self.allocations.insert(offset, level);
        self.stats.record_allocation(size, len);

        Ok(BuddyBlock { offset, len, level })
    }

    /// Frees the allocation starting at `offset`, merging it with its buddies as far up as
    /// possible. Returns the block that was freed.
    ///
    /// # Panics
    /// - If `offset` is not the start of a live allocation. Either the block was already freed
    /// or it came from another allocator. Both mean the caller has lost track of its memory.
    pub fn free(&mut self, offset: u64) -> BuddyBlock {
        let level = match self.allocations.remove(&offset) {
            Some(level) => level,
            None => panic!(
                "offset `{offset}` is not a live allocation (double free or foreign block)"
            ),
        };

        let block = BuddyBlock {
            offset,
            len: self.block_size(level),
            level,
        };
        self.stats.record_free(block.len);

        // Continue to merge until we've either hit the top level or have no free buddy
        let mut offset = offset;
        let mut level = level;
        while level + 1 < self.level_count() {
            let buddy = self.buddy_of(offset, level);
            if !self.free_blocks[level].remove(&buddy) {
                break;
            }
            offset = offset.min(buddy);
            level += 1;
        }
        self.free_blocks[level].insert(offset);

        block
    }

    /// Offset of the buddy of the block at `offset` on `level`.
    ///
    /// Offsets are only aligned to multiples of `min_block_size`, which doesn't have to be a
    /// power of two, so the buddy is found by flipping the level bit of the block index rather
    /// than of the byte offset.
    #[inline(always)]
    fn buddy_of(&self, offset: u64, level: usize) -> u64 {
        let index = offset / self.min_block_size;
        (index ^ (1 << level)) * self.min_block_size
    }
}

impl BuddyBlock {
    /// Byte offset of the block from the start of the allocator's range.
    #[inline]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Number of bytes in the block. Can be larger than what was requested.
    #[inline]
    pub fn len(&self) -> u64 {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn level(&self) -> usize {
        self.level
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};

    /// No level may hold two free blocks that are buddies of each other, and every free block is
    /// aligned to its own size.
    fn assert_no_free_buddies(alloc: &BuddyAllocator) {
        for level in 0..alloc.level_count() {
            let size = alloc.block_size(level);
            for offset in alloc.free_offsets(level) {
                assert_eq!(offset % size, 0, "free block `{offset}` misaligned at `{level}`");
                if level + 1 == alloc.level_count() {
                    continue;
                }
                let buddy = alloc.buddy_of(offset, level);
                assert!(
                    !alloc.free_blocks[level].contains(&buddy),
                    "blocks `{}` and `{}` at level `{}` should have merged",
                    offset,
                    buddy,
                    level
                );
            }
        }
    }

    fn assert_pristine(alloc: &BuddyAllocator) {
        let top = alloc.level_count() - 1;
        for level in 0..top {
            assert_eq!(alloc.free_offsets(level).count(), 0);
        }
        assert_eq!(alloc.free_offsets(top).collect::<Vec<_>>(), vec![0]);
        assert!(alloc.is_empty());
        assert_eq!(alloc.free_size(), alloc.capacity());
    }

    #[test]
    fn build() {
        let alloc = BuddyAllocator::new(5, 96);
        assert_eq!(alloc.capacity(), 1536);
        assert_eq!(alloc.level_count(), 5);
        assert_pristine(&alloc);
    }

    #[test]
    fn single_level() {
        let mut alloc = BuddyAllocator::new(1, 64);
        assert_eq!(alloc.capacity(), 64);

        let block = alloc.allocate(10).unwrap();
        assert_eq!(block.offset(), 0);
        assert_eq!(block.len(), 64);
        assert_eq!(alloc.allocate(1), Err(AllocError::Exhausted { size: 1 }));

        alloc.free(0);
        assert_pristine(&alloc);
    }

    #[test]
    fn level_rounding() {
        let alloc = BuddyAllocator::new(5, 96);
        assert_eq!(alloc.level_for(1), Some(0));
        assert_eq!(alloc.level_for(96), Some(0));
        assert_eq!(alloc.level_for(97), Some(1));
        assert_eq!(alloc.level_for(100), Some(1));
        assert_eq!(alloc.level_for(300), Some(2));
        assert_eq!(alloc.level_for(1536), Some(4));
        assert_eq!(alloc.level_for(1537), None);
        assert_eq!(alloc.level_for(u64::MAX), None);
    }

    #[test]
    fn split_on_allocate() {
        let mut alloc = BuddyAllocator::new(5, 96);

        let block = alloc.allocate(100).unwrap();
        assert_eq!(block.offset(), 0);
        assert_eq!(block.len(), 192);
        assert_eq!(block.level(), 1);

        assert_eq!(alloc.free_offsets(0).count(), 0);
        assert_eq!(alloc.free_offsets(1).collect::<Vec<_>>(), vec![192]);
        assert_eq!(alloc.free_offsets(2).collect::<Vec<_>>(), vec![384]);
        assert_eq!(alloc.free_offsets(3).collect::<Vec<_>>(), vec![768]);
        assert_eq!(alloc.free_offsets(4).count(), 0);

        // The untouched half is free, but no single block can hold this anymore
        assert!(!alloc.has_capacity_for(1400));
        assert_eq!(
            alloc.allocate(1400),
            Err(AllocError::Exhausted { size: 1400 })
        );
        assert!(alloc.has_capacity_for(768));
    }

    #[test]
    fn merge_on_free() {
        let mut alloc = BuddyAllocator::new(5, 96);

        let a = alloc.allocate(96).unwrap();
        let b = alloc.allocate(96).unwrap();
        assert_eq!(a.offset(), 0);
        assert_eq!(b.offset(), 96);

        // Buddy is still allocated, so nothing merges
        alloc.free(0);
        assert_eq!(alloc.free_offsets(0).collect::<Vec<_>>(), vec![0]);
        assert_no_free_buddies(&alloc);

        // Both halves free, merges all the way back up
        alloc.free(96);
        assert_no_free_buddies(&alloc);
        assert_pristine(&alloc);
    }

    #[test]
    fn buddy_offsets() {
        let alloc = BuddyAllocator::new(5, 96);
        assert_eq!(alloc.buddy_of(0, 0), 96);
        assert_eq!(alloc.buddy_of(96, 0), 0);
        assert_eq!(alloc.buddy_of(192, 0), 288);
        assert_eq!(alloc.buddy_of(288, 0), 192);
        assert_eq!(alloc.buddy_of(384, 1), 576);
        assert_eq!(alloc.buddy_of(768, 3), 0);
    }

    #[test]
    fn fill_and_drain_in_any_order() {
        let mut rng = StdRng::seed_from_u64(0xb10c);

        let mut orders: Vec<Vec<usize>> = vec![
            (0..16).collect(),
            (0..16).rev().collect(),
            (0..16).step_by(2).chain((1..16).step_by(2)).collect(),
        ];
        for _ in 0..16 {
            let mut order = (0..16).collect::<Vec<_>>();
            order.shuffle(&mut rng);
            orders.push(order);
        }

        for order in orders {
            let mut alloc = BuddyAllocator::new(5, 96);
            let offsets = (0..16)
                .map(|_| alloc.allocate(96).unwrap().offset())
                .collect::<Vec<_>>();
            assert_eq!(offsets, (0..16).map(|i| i * 96).collect::<Vec<_>>());
            assert_eq!(alloc.free_size(), 0);

            for i in order {
                alloc.free(offsets[i]);
                assert_no_free_buddies(&alloc);
            }
            assert_pristine(&alloc);

            // The whole range is usable again
            assert_eq!(alloc.allocate(1536).unwrap().offset(), 0);
        }
    }

    #[test]
    fn reuse_smallest_fitting_block() {
        let mut alloc = BuddyAllocator::new(4, 16);
        let a = alloc.allocate(16).unwrap();
        let _b = alloc.allocate(32).unwrap();
        alloc.free(a.offset());

        // The freed level 0 block and its level 0 buddy merged into a level 1 block, which is
        // the smallest fit for another 32 byte allocation
        let c = alloc.allocate(32).unwrap();
        assert_eq!(c.offset(), 0);
    }

    #[test]
    fn rejects_bad_sizes() {
        let mut alloc = BuddyAllocator::new(3, 32);
        assert_eq!(alloc.allocate(0), Err(AllocError::ZeroSize));
        assert_eq!(
            alloc.allocate(129),
            Err(AllocError::TooLarge {
                size: 129,
                capacity: 128
            })
        );
        assert!(!alloc.has_capacity_for(0));
        assert!(!alloc.has_capacity_for(129));
        assert_pristine(&alloc);
    }

    #[test]
    fn exhaustion() {
        let mut alloc = BuddyAllocator::new(3, 32);
        let offsets = (0..4)
            .map(|_| alloc.allocate(32).unwrap().offset())
            .collect::<Vec<_>>();
        assert_eq!(offsets, vec![0, 32, 64, 96]);
        assert!(!alloc.has_capacity_for(1));
        assert_eq!(alloc.free_size(), 0);

        for offset in offsets {
            alloc.free(offset);
        }
        assert_pristine(&alloc);
    }

    #[test]
    #[should_panic]
    fn double_free() {
        let mut alloc = BuddyAllocator::new(3, 32);
        let block = alloc.allocate(32).unwrap();
        alloc.free(block.offset());
        alloc.free(block.offset());
    }

    #[test]
    #[should_panic]
    fn foreign_offset() {
        let mut alloc = BuddyAllocator::new(3, 32);
        let _ = alloc.allocate(64).unwrap();
        alloc.free(32);
    }

    #[test]
    fn stats() {
        let mut alloc = BuddyAllocator::new(5, 96);
        let a = alloc.allocate(100).unwrap();
        let b = alloc.allocate(96).unwrap();

        let stats = alloc.stats();
        assert_eq!(stats.current_allocated, 192 + 96);
        assert_eq!(stats.total_allocated, 192 + 96);
        assert_eq!(stats.max_allocated, 192 + 96);
        assert_eq!(stats.total_spoilt, 92);
        assert_eq!(stats.live_allocations, 2);

        alloc.free(a.offset());
        alloc.free(b.offset());

        let stats = alloc.stats();
        assert_eq!(stats.current_allocated, 0);
        assert_eq!(stats.total_allocated, 192 + 96);
        assert_eq!(stats.max_allocated, 192 + 96);
        assert_eq!(stats.live_allocations, 0);
    }

    #[test]
    fn random_sequences_keep_invariants() {
        let mut rng = StdRng::seed_from_u64(0x5eed);

        let block_sizes = [16, 96, 48, 100, 7];
        for round in 0..40 {
            let min_block_size = block_sizes[round % block_sizes.len()];
            let mut alloc = BuddyAllocator::new(8, min_block_size);
            let mut live: Vec<(BuddyBlock, u64)> = Vec::default();

            for _ in 0..256 {
                if live.is_empty() || rng.gen_bool(0.6) {
                    let size = rng.gen_range(1..=alloc.capacity() / 4);
                    let fits = alloc.has_capacity_for(size);
                    match alloc.allocate(size) {
                        Ok(block) => {
                            assert!(fits);
                            assert!(block.len() >= size);
                            assert_eq!(block.offset() % block.len(), 0);
                            assert!(block.offset() + block.len() <= alloc.capacity());
                            live.push((block, size));
                        }
                        Err(err) => {
                            assert!(!fits);
                            assert_eq!(err, AllocError::Exhausted { size });
                        }
                    }
                } else {
                    let idx = rng.gen_range(0..live.len());
                    let (block, _) = live.swap_remove(idx);
                    assert_eq!(alloc.free(block.offset()), block);
                }
                assert_no_free_buddies(&alloc);

                // Live allocations never overlap
                let mut ranges = live
                    .iter()
                    .map(|(block, size)| (block.offset(), block.offset() + size))
                    .collect::<Vec<_>>();
                ranges.sort_unstable();
                for pair in ranges.windows(2) {
                    assert!(pair[0].1 <= pair[1].0, "{:?} overlaps {:?}", pair[0], pair[1]);
                }
            }

            // Freeing everything in any order returns to a single top level block
            live.shuffle(&mut rng);
            for (block, _) in live.drain(..) {
                alloc.free(block.offset());
                assert_no_free_buddies(&alloc);
            }
            assert_pristine(&alloc);
            assert!(alloc.allocate(alloc.capacity()).is_ok(), "round `{round}`");
        }
    }
}
