use std::{
    io::{BufReader, BufWriter},
    path::Path,
};

use ron::ser::PrettyConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{BufferUsage, QueueTypes, SharingMode};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BufferPoolConfig {
    /// Size in bytes of the smallest block an arena hands out.
    pub min_block_size: u64,
    /// New arenas are at least `min_block_size << min_level` bytes.
    pub min_level: u32,
    /// No arena is ever larger than `min_block_size << max_level` bytes. Requests that would need
    /// a bigger one fail.
    pub max_level: u32,
    /// When set, every arena added to a collection is anchored one level above the previous
    /// one, up to `max_level`.
    pub geometric_growth: bool,
    /// Requests with any of these usages get a dedicated buffer instead of a pooled range.
    pub dedicated_usage: BufferUsage,
    /// Queue types every created buffer is shared with.
    pub queue_types: QueueTypes,
    pub sharing_mode: SharingMode,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("minimum block size cannot be zero")]
    ZeroBlockSize,
    #[error("minimum level `{min}` is above maximum level `{max}`")]
    InvertedLevels { min: u32, max: u32 },
    #[error("maximum arena size does not fit in a 32-bit byte count")]
    ArenaTooLarge,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unable to parse config: {0}")]
    Parse(#[from] ron::error::SpannedError),
    #[error("unable to serialize config: {0}")]
    Serialize(#[from] ron::Error),
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            min_block_size: 96,
            min_level: 20,
            max_level: 24,
            geometric_growth: true,
            dedicated_usage: BufferUsage::VERTEX_BUFFER | BufferUsage::INDEX_BUFFER,
            queue_types: QueueTypes::MAIN | QueueTypes::TRANSFER,
            sharing_mode: SharingMode::Concurrent,
        }
    }
}

impl BufferPoolConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let file = std::fs::File::open(path)?;
        let reader = BufReader::new(file);
        let config = ron::de::from_reader::<_, BufferPoolConfig>(reader)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let file = std::fs::File::create(path)?;
        let writer = BufWriter::new(file);
        ron::ser::to_writer_pretty(writer, self, PrettyConfig::default())?;
        Ok(())
    }

    pub fn from_ron_str(src: &str) -> Result<Self, ConfigError> {
        let config = ron::from_str::<BufferPoolConfig>(src)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_ron_string(&self) -> Result<String, ConfigError> {
        Ok(ron::ser::to_string_pretty(self, PrettyConfig::default())?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_block_size == 0 {
            return Err(ConfigError::ZeroBlockSize);
        }

        if self.min_level > self.max_level {
            return Err(ConfigError::InvertedLevels {
                min: self.min_level,
                max: self.max_level,
            });
        }

        match self.checked_level_size(self.max_level) {
            Some(size) if size <= u32::MAX as u64 => Ok(()),
            _ => Err(ConfigError::ArenaTooLarge),
        }
    }

    /// Size in bytes of the largest arena the pool will create.
    #[inline]
    pub fn max_arena_size(&self) -> u64 {
        self.min_block_size << self.max_level
    }

    /// Smallest level whose arena can hold `size` bytes in a single block.
    pub fn required_level(&self, size: u64) -> u32 {
        let block_count = size.div_ceil(self.min_block_size).max(1);
        match block_count.checked_next_power_of_two() {
            Some(blocks) => blocks.trailing_zeros(),
            None => u64::BITS,
        }
    }

    /// Level of the next arena to create for a collection that already holds `existing` arenas
    /// and could not fit `size` bytes. `None` if that would go past `max_level`.
    pub fn arena_level(&self, size: u64, existing: usize) -> Option<u32> {
        let required = self.required_level(size);
        if required > self.max_level {
            return None;
        }

        let anchor = if self.geometric_growth {
            let step = u32::try_from(existing).unwrap_or(u32::MAX);
            self.min_level.saturating_add(step).min(self.max_level)
        } else {
            self.min_level
        };

        Some(anchor.max(required))
    }

    fn checked_level_size(&self, level: u32) -> Option<u64> {
        let scale = 1_u64.checked_shl(level)?;
        self.min_block_size.checked_mul(scale)
    }
}
