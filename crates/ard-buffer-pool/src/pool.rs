use ard_alloc::prelude::*;
use ard_log::{debug, info, trace, warn};
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::{
    arena::{Arena, DedicatedBuffer},
    backend::{BufferBackend, BufferCreateError},
    config::{BufferPoolConfig, ConfigError},
    types::{BufferAllocation, BufferId, BufferUsage, MemoryProperties, PoolKey},
};

/// Hands out ranges of a few large GPU buffers so small allocations don't each need their own.
///
/// Requests are grouped by [`PoolKey`]. Each key owns a list of [`Arena`]s which is searched in
/// order for one with room, and grown when none has any. Arenas are only destroyed by
/// [`cleanup`](BufferPool::cleanup), even when empty, so the pool never churns through device
/// buffers.
///
/// Usages listed in [`BufferPoolConfig::dedicated_usage`] skip the arenas entirely and get a
/// buffer of their own.
///
/// The pool does no locking. If it is shared between threads, wrap the whole pool in a single
/// mutex.
pub struct BufferPool<B: BufferBackend> {
    backend: B,
    config: BufferPoolConfig,
    /// Pooled arenas keyed by usage and memory properties.
    arenas: FxHashMap<PoolKey, Vec<Arena<B>>>,
    /// Buffers that are used whole by a single allocation.
    dedicated: Vec<DedicatedBuffer<B>>,
    next_id: u64,
    cleaned_up: bool,
}

#[derive(Debug, Error)]
pub enum BufferPoolError {
    #[error("allocation failed: {0}")]
    Alloc(#[from] AllocError),
    #[error("`{size}` bytes does not fit in the largest arena of `{max}` bytes")]
    CapacityExceeded { size: u64, max: u64 },
    #[error("unable to create buffer: {0}")]
    Create(#[from] BufferCreateError),
    #[error("invalid pool configuration: {0}")]
    Config(#[from] ConfigError),
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct PoolStats {
    /// Combined stats of every pooled arena.
    pub pooled: AllocatorStats,
    pub arena_count: usize,
    /// Total size of all pooled arenas.
    pub arena_bytes: u64,
    pub dedicated_count: usize,
    /// Total size of all dedicated buffers.
    pub dedicated_bytes: u64,
}

impl<B: BufferBackend> BufferPool<B> {
    pub fn new(backend: B, config: BufferPoolConfig) -> Result<Self, BufferPoolError> {
        config.validate()?;

        Ok(Self {
            backend,
            config,
            arenas: FxHashMap::default(),
            dedicated: Vec::default(),
            next_id: 0,
            cleaned_up: false,
        })
    }

    #[inline(always)]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    #[inline(always)]
    pub fn config(&self) -> &BufferPoolConfig {
        &self.config
    }

    #[inline(always)]
    pub fn is_cleaned_up(&self) -> bool {
        self.cleaned_up
    }

    /// `true` if requests with `usage` get a dedicated buffer instead of a pooled range.
    #[inline]
    pub fn is_dedicated(&self, usage: BufferUsage) -> bool {
        usage.intersects(self.config.dedicated_usage)
    }

    /// Arenas currently serving requests with the given usage and memory properties, in the
    /// order they are searched.
    pub fn arenas(&self, usage: BufferUsage, memory: MemoryProperties) -> &[Arena<B>] {
        self.arenas
            .get(&PoolKey::new(usage, memory))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    #[inline]
    pub fn arena_count(&self, usage: BufferUsage, memory: MemoryProperties) -> usize {
        self.arenas(usage, memory).len()
    }

    #[inline(always)]
    pub fn dedicated_count(&self) -> usize {
        self.dedicated.len()
    }

    /// Looks up the backend buffer behind `id`.
    pub fn buffer(&self, id: BufferId) -> Option<&B::Buffer> {
        self.arenas
            .values()
            .flatten()
            .find(|arena| arena.id() == id)
            .map(Arena::buffer)
            .or_else(|| {
                self.dedicated
                    .iter()
                    .find(|dedicated| dedicated.id() == id)
                    .map(DedicatedBuffer::buffer)
            })
    }

    pub fn stats(&self) -> PoolStats {
        let mut stats = PoolStats::default();

        for arena in self.arenas.values().flatten() {
            stats.pooled += arena.allocator().stats();
            stats.arena_count += 1;
            stats.arena_bytes += arena.capacity();
        }

        stats.dedicated_count = self.dedicated.len();
        stats.dedicated_bytes = self.dedicated.iter().map(DedicatedBuffer::size).sum();

        stats
    }

    /// Allocates `size` bytes of a buffer with the given usage and memory properties.
    ///
    /// Existing arenas are tried first. If none of them has room, a new one is created which is
    /// guaranteed to fit the request.
    ///
    /// # Panics
    /// - If the pool has been cleaned up.
    pub fn get_buffer(
        &mut self,
        usage: BufferUsage,
        size: u64,
        memory: MemoryProperties,
    ) -> Result<BufferAllocation, BufferPoolError> {
        assert!(!self.cleaned_up, "buffer pool used after cleanup");

        if size == 0 {
            return Err(AllocError::ZeroSize.into());
        }

        if self.is_dedicated(usage) {
            return self.get_dedicated(usage, size, memory);
        }

        let max = self.config.max_arena_size();
        if size > max {
            return Err(BufferPoolError::CapacityExceeded { size, max });
        }

        let key = PoolKey::new(usage, memory);
        let arenas = self.arenas.entry(key).or_default();

        // Use the first arena that has room
        if let Some(arena) = arenas.iter_mut().find(|arena| arena.has_capacity_for(size)) {
            let block = arena.allocate(size)?;
            return Ok(BufferAllocation {
                buffer: arena.id(),
                offset: block.offset(),
                size,
                memory,
            });
        }

        // Nothing has room, so grow the collection
        let level = self
            .config
            .arena_level(size, arenas.len())
            .ok_or(BufferPoolError::CapacityExceeded { size, max })?;

        let id = BufferId(self.next_id);
        self.next_id += 1;

        let mut arena = Arena::new(&mut self.backend, id, key, level, &self.config)?;

        if arenas.is_empty() {
            debug!(
                "created arena `{}` of `{}` bytes for pool key `{}`",
                id,
                arena.capacity(),
                key
            );
        } else {
            warn!(
                "buffer pool key `{}` grew to `{}` arenas with a new arena of `{}` bytes. \
                Consider raising the minimum arena level.",
                key,
                arenas.len() + 1,
                arena.capacity()
            );
        }

        let block = arena.allocate(size);
        arenas.push(arena);
        let block = block?;

        Ok(BufferAllocation {
            buffer: id,
            offset: block.offset(),
            size,
            memory,
        })
    }

    /// Returns a range handed out by [`get_buffer`](BufferPool::get_buffer). `usage` and
    /// `memory` must match what the range was requested with.
    ///
    /// # Panics
    /// - If the pool has been cleaned up.
    /// - If the range was not handed out by this pool or was already returned.
    pub fn put_buffer(
        &mut self,
        usage: BufferUsage,
        buffer: BufferId,
        offset: u64,
        memory: MemoryProperties,
    ) {
        assert!(!self.cleaned_up, "buffer pool used after cleanup");

        if self.is_dedicated(usage) {
            self.put_dedicated(buffer, offset);
            return;
        }

        let key = PoolKey::new(usage, memory);
        let arenas = match self.arenas.get_mut(&key) {
            Some(arenas) => arenas,
            None => panic!("buffer pool has no arenas for key `{key}`"),
        };

        let arena = match arenas.iter_mut().find(|arena| arena.id() == buffer) {
            Some(arena) => arena,
            None => panic!("buffer `{buffer}` is not an arena of pool key `{key}`"),
        };

        arena.free(offset);
    }

    /// Returns an allocation. Shorthand for [`put_buffer`](BufferPool::put_buffer).
    #[inline]
    pub fn put_allocation(&mut self, usage: BufferUsage, allocation: BufferAllocation) {
        self.put_buffer(usage, allocation.buffer, allocation.offset, allocation.memory);
    }

    /// Destroys every buffer owned by the pool. All ranges handed out become invalid and the
    /// pool must not be used afterwards. Calling this more than once does nothing.
    pub fn cleanup(&mut self) {
        if self.cleaned_up {
            return;
        }

        let stats = self.stats();
        info!("Buffer pool");
        info!("\tArenas: {} ({} bytes)", stats.arena_count, stats.arena_bytes);
        info!("\tTotal allocations: {} bytes", stats.pooled.total_allocated);
        info!("\tAllocated at most: {} bytes", stats.pooled.max_allocated);
        info!("\tSpoilt memory: {} bytes", stats.pooled.total_spoilt);
        info!("\tLeaked memory: {} bytes", stats.pooled.current_allocated);
        if stats.dedicated_count != 0 {
            warn!(
                "buffer pool cleaned up with `{}` dedicated buffers still alive",
                stats.dedicated_count
            );
        }

        for (_, arenas) in self.arenas.drain() {
            for arena in arenas {
                arena.destroy(&mut self.backend);
            }
        }

        for dedicated in self.dedicated.drain(..) {
            dedicated.destroy(&mut self.backend);
        }

        self.cleaned_up = true;
    }

    fn get_dedicated(
        &mut self,
        usage: BufferUsage,
        size: u64,
        memory: MemoryProperties,
    ) -> Result<BufferAllocation, BufferPoolError> {
        let id = BufferId(self.next_id);
        self.next_id += 1;

        let dedicated =
            DedicatedBuffer::new(&mut self.backend, id, usage, size, memory, &self.config)?;
        trace!("created dedicated buffer `{}` of `{}` bytes", id, size);
        self.dedicated.push(dedicated);

        Ok(BufferAllocation {
            buffer: id,
            offset: 0,
            size,
            memory,
        })
    }

    fn put_dedicated(&mut self, buffer: BufferId, offset: u64) {
        assert_eq!(offset, 0, "dedicated buffers are always used from offset 0");

        let idx = match self.dedicated.iter().position(|d| d.id() == buffer) {
            Some(idx) => idx,
            None => panic!("buffer `{buffer}` is not a dedicated buffer of this pool"),
        };

        let dedicated = self.dedicated.swap_remove(idx);
        trace!("destroying dedicated buffer `{}`", buffer);
        dedicated.destroy(&mut self.backend);
    }
}

impl<B: BufferBackend> Drop for BufferPool<B> {
    fn drop(&mut self) {
        self.cleanup();
    }
}
