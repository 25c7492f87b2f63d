use std::mem;

use crate::{align::is_power_of_two, error::AllocError};

/// Granularities and limits of a [`Heap`](crate::Heap).
///
/// ```text
///   one block (page_size multiple, one mapping)
///   ┌────┬────┬────┬────┬────┬────┬────┬────┬─ ─ ─┬────┐
///   │ c0 │ c1 │ c2 │ c3 │ c4 │ c5 │ c6 │ c7 │     │ cN │   chunk_size each
///   └────┴────┴────┴────┴────┴────┴────┴────┴─ ─ ─┴────┘
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeapConfig {
  /// Growth granularity. Every new block maps a multiple of this.
  pub page_size: usize,
  /// Bookkeeping granularity inside a block.
  pub chunk_size: usize,
  /// Size of the block table. Reaching it fails further growth.
  pub max_blocks: usize,
}

/// Alignment every [`PageSource`](crate::PageSource) region is guaranteed to
/// have. Chunks never exceed it, so each chunk is aligned to its size.
pub const MAX_CHUNK_SIZE: usize = 4096;

impl HeapConfig {
  pub const DEFAULT: HeapConfig = HeapConfig {
    page_size: 8192,
    chunk_size: 2 * mem::size_of::<usize>(),
    max_blocks: 1024,
  };

  /// [`HeapConfig::DEFAULT`] with the page size the OS reports.
  pub fn system() -> HeapConfig {
    let page_size = page_size::get().max(Self::DEFAULT.chunk_size);

    HeapConfig {
      page_size,
      ..Self::DEFAULT
    }
  }

  pub fn with_page_size(
    self,
    page_size: usize,
  ) -> Result<HeapConfig, AllocError> {
    HeapConfig { page_size, ..self }.validate()
  }

  pub fn with_chunk_size(
    self,
    chunk_size: usize,
  ) -> Result<HeapConfig, AllocError> {
    HeapConfig { chunk_size, ..self }.validate()
  }

  pub fn with_max_blocks(
    self,
    max_blocks: usize,
  ) -> Result<HeapConfig, AllocError> {
    HeapConfig { max_blocks, ..self }.validate()
  }

  pub fn validate(self) -> Result<HeapConfig, AllocError> {
    if !is_power_of_two(self.page_size) {
      return Err(AllocError::InvalidConfig("page size must be a power of two"));
    }
    if !is_power_of_two(self.chunk_size) {
      return Err(AllocError::InvalidConfig("chunk size must be a power of two"));
    }
    if self.chunk_size < mem::size_of::<usize>() {
      return Err(AllocError::InvalidConfig("chunk size must hold at least a word"));
    }
    if self.chunk_size > MAX_CHUNK_SIZE {
      return Err(AllocError::InvalidConfig("chunk size exceeds 4096 bytes"));
    }
    if self.chunk_size > self.page_size {
      return Err(AllocError::InvalidConfig("chunk size exceeds the page size"));
    }
    if self.max_blocks == 0 {
      return Err(AllocError::InvalidConfig("at least one block is required"));
    }

    Ok(self)
  }
}

impl Default for HeapConfig {
  fn default() -> Self {
    Self::DEFAULT
  }
}
