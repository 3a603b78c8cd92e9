use ard_alloc::prelude::*;

use crate::{
    backend::{BufferBackend, BufferCreateError, BufferCreateInfo},
    config::BufferPoolConfig,
    types::{BufferId, BufferUsage, MemoryProperties, PoolKey},
};

/// A physical buffer whose bytes are handed out by a buddy block allocator.
pub struct Arena<B: BufferBackend> {
    id: BufferId,
    /// Actual GPU buffer that holds the data.
    buffer: B::Buffer,
    /// The underlying buddy block allocator. Sized to the buffer.
    alloc: BuddyAllocator,
}

/// A physical buffer used whole by a single allocation.
pub struct DedicatedBuffer<B: BufferBackend> {
    id: BufferId,
    buffer: B::Buffer,
    size: u64,
}

impl<B: BufferBackend> Arena<B> {
    /// Creates a buffer of `config.min_block_size << level` bytes for requests matching `key`.
    pub(crate) fn new(
        backend: &mut B,
        id: BufferId,
        key: PoolKey,
        level: u32,
        config: &BufferPoolConfig,
    ) -> Result<Self, BufferCreateError> {
        let alloc = BuddyAllocator::new(level as usize + 1, config.min_block_size);
        let buffer = backend.create_buffer(BufferCreateInfo {
            size: alloc.capacity(),
            buffer_usage: key.usage() | BufferUsage::TRANSFER_DST,
            memory_properties: key.memory(),
            queue_types: config.queue_types,
            sharing_mode: config.sharing_mode,
            debug_name: Some(format!("buffer_pool_arena_{id}")),
        })?;

        Ok(Self { id, buffer, alloc })
    }

    #[inline(always)]
    pub fn id(&self) -> BufferId {
        self.id
    }

    #[inline(always)]
    pub fn buffer(&self) -> &B::Buffer {
        &self.buffer
    }

    #[inline(always)]
    pub fn allocator(&self) -> &BuddyAllocator {
        &self.alloc
    }

    #[inline(always)]
    pub fn capacity(&self) -> u64 {
        self.alloc.capacity()
    }

    #[inline]
    pub fn has_capacity_for(&self, size: u64) -> bool {
        self.alloc.has_capacity_for(size)
    }

    /// Allocate a region of the buffer to fit `size` bytes.
    #[inline]
    pub fn allocate(&mut self, size: u64) -> Result<BuddyBlock, AllocError> {
        self.alloc.allocate(size)
    }

    /// Frees the region starting at `offset`.
    ///
    /// # Panics
    /// - If `offset` was not allocated from this arena, or was already freed.
    #[inline]
    pub fn free(&mut self, offset: u64) -> BuddyBlock {
        self.alloc.free(offset)
    }

    pub(crate) fn destroy(self, backend: &mut B) {
        backend.destroy_buffer(self.buffer);
    }
}

impl<B: BufferBackend> DedicatedBuffer<B> {
    /// Creates a buffer of exactly `size` bytes. Dedicated buffers are always host visible and
    /// can be copied into.
    pub(crate) fn new(
        backend: &mut B,
        id: BufferId,
        usage: BufferUsage,
        size: u64,
        memory: MemoryProperties,
        config: &BufferPoolConfig,
    ) -> Result<Self, BufferCreateError> {
        let buffer = backend.create_buffer(BufferCreateInfo {
            size,
            buffer_usage: usage | BufferUsage::TRANSFER_DST,
            memory_properties: memory | MemoryProperties::HOST_VISIBLE,
            queue_types: config.queue_types,
            sharing_mode: config.sharing_mode,
            debug_name: Some(format!("buffer_pool_dedicated_{id}")),
        })?;

        Ok(Self { id, buffer, size })
    }

    #[inline(always)]
    pub fn id(&self) -> BufferId {
        self.id
    }

    #[inline(always)]
    pub fn buffer(&self) -> &B::Buffer {
        &self.buffer
    }

    #[inline(always)]
    pub fn size(&self) -> u64 {
        self.size
    }

    pub(crate) fn destroy(self, backend: &mut B) {
        backend.destroy_buffer(self.buffer);
    }
}
