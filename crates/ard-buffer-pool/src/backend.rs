use thiserror::Error;

use crate::types::{BufferUsage, MemoryProperties, QueueTypes, SharingMode};

#[derive(Debug, Clone)]
pub struct BufferCreateInfo {
    /// The size in bytes of the buffer to create.
    pub size: u64,
    /// Describes the supported usage types of this buffer.
    pub buffer_usage: BufferUsage,
    /// Memory properties the backing memory must have.
    pub memory_properties: MemoryProperties,
    /// Queue types that will access the buffer.
    pub queue_types: QueueTypes,
    pub sharing_mode: SharingMode,
    /// The backend *should* use the provided debug name for easy identification.
    pub debug_name: Option<String>,
}

#[derive(Debug, Error)]
pub enum BufferCreateError {
    #[error("out of device memory")]
    OutOfMemory,
    #[error("an error has occured: {0}")]
    Other(String),
}

/// The part of a graphics API a [`BufferPool`](crate::pool::BufferPool) needs. Creates and
/// destroys physical buffers, and nothing else. Uploading data is up to whoever holds the
/// buffer.
pub trait BufferBackend {
    type Buffer;

    /// Creates a buffer of exactly `create_info.size` bytes.
    fn create_buffer(
        &mut self,
        create_info: BufferCreateInfo,
    ) -> Result<Self::Buffer, BufferCreateError>;

    /// Destroys a buffer created by this backend.
    fn destroy_buffer(&mut self, buffer: Self::Buffer);
}
