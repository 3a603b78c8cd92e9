use std::fmt::Display;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    #[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[serde(transparent)]
    pub struct BufferUsage: u32 {
        const TRANSFER_SRC    = 0b0000001;
        const TRANSFER_DST    = 0b0000010;
        const UNIFORM_BUFFER  = 0b0000100;
        const STORAGE_BUFFER  = 0b0001000;
        const VERTEX_BUFFER   = 0b0010000;
        const INDEX_BUFFER    = 0b0100000;
        const INDIRECT_BUFFER = 0b1000000;
    }
}

bitflags! {
    #[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[serde(transparent)]
    pub struct MemoryProperties: u32 {
        const DEVICE_LOCAL     = 0b00001;
        const HOST_VISIBLE     = 0b00010;
        const HOST_COHERENT    = 0b00100;
        const HOST_CACHED      = 0b01000;
        const LAZILY_ALLOCATED = 0b10000;
    }
}

bitflags! {
    #[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[serde(transparent)]
    pub struct QueueTypes: u32 {
        const MAIN     = 0b0001;
        const TRANSFER = 0b0010;
        const COMPUTE  = 0b0100;
        const PRESENT  = 0b1000;
    }
}

#[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SharingMode {
    /// Only one queue type may access the buffer at a time.
    Exclusive,
    /// All queue types in `queue_types` may access the buffer at the same time.
    Concurrent,
}

/// Selects the arena collection a request is routed into. Usage bits live in the upper 32 bits
/// and memory property bits in the lower 32.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PoolKey(u64);

/// Identifies a physical buffer created by a [`BufferPool`](crate::pool::BufferPool).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BufferId(pub(crate) u64);

/// A range of a physical buffer handed out by a [`BufferPool`](crate::pool::BufferPool).
///
/// The range is only valid while the buffer it comes from is alive, which is until it is put
/// back or the pool is cleaned up.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct BufferAllocation {
    /// The buffer the range lives in.
    pub buffer: BufferId,
    /// Byte offset of the range within the buffer.
    pub offset: u64,
    /// Number of bytes requested. The underlying block may be larger.
    pub size: u64,
    /// Memory properties the allocation was requested with. Needed to put it back.
    pub memory: MemoryProperties,
}

impl PoolKey {
    #[inline]
    pub fn new(usage: BufferUsage, memory: MemoryProperties) -> Self {
        Self(((usage.bits() as u64) << 32) | memory.bits() as u64)
    }

    #[inline]
    pub fn usage(&self) -> BufferUsage {
        BufferUsage::from_bits_retain((self.0 >> 32) as u32)
    }

    #[inline]
    pub fn memory(&self) -> MemoryProperties {
        MemoryProperties::from_bits_retain(self.0 as u32)
    }
}

impl Display for PoolKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

impl Display for BufferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
