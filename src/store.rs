use log::{debug, warn};

use crate::{
  align::try_normalize,
  block::MemoryBlock,
  config::HeapConfig,
  error::{AllocError, SysError},
  locate::{self, Placement},
  mapped::MappedArray,
  sys::PageSource,
};

/// Opaque position of a chunk: block index + chunk index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkHandle {
  pub block: usize,
  pub chunk: usize,
}

/// Every block the heap has mapped, in the order they were mapped.
///
/// The table itself lives in a mapping sized for `max_blocks` entries, made
/// on first growth. Blocks are only ever appended.
pub struct BlockStore {
  blocks: MappedArray<MemoryBlock>,
}

impl BlockStore {
  pub const fn new() -> Self {
    Self {
      blocks: MappedArray::new(),
    }
  }

  pub fn len(&self) -> usize {
    self.blocks.len()
  }

  pub fn is_empty(&self) -> bool {
    self.blocks.is_empty()
  }

  pub fn blocks(&self) -> &[MemoryBlock] {
    &self.blocks
  }

  pub fn block(
    &self,
    index: usize,
  ) -> &MemoryBlock {
    &self.blocks[index]
  }

  pub fn block_mut(
    &mut self,
    index: usize,
  ) -> &mut MemoryBlock {
    &mut self.blocks[index]
  }

  pub fn locate(
    &self,
    size: usize,
  ) -> Option<Placement> {
    locate::first_fit(&self.blocks, size)
  }

  pub fn locate_aligned(
    &self,
    size: usize,
    alignment: usize,
  ) -> Option<Placement> {
    locate::first_fit_aligned(&self.blocks, size, alignment)
  }

  /// Maps a new block holding at least `size` bytes and appends it.
  ///
  /// Returns the index of the new block. On error nothing is registered.
  pub fn grow<S: PageSource>(
    &mut self,
    source: &S,
    config: &HeapConfig,
    size: usize,
  ) -> Result<usize, AllocError> {
    let len = try_normalize(size, config.page_size).ok_or(AllocError::SizeOverflow)?;

    if !self.blocks.is_mapped() {
      self.blocks = MappedArray::with_capacity(source, config.max_blocks, config.page_size)?;
      debug!("mapped block table for {} blocks", config.max_blocks);
    }

    if self.blocks.is_full() {
      warn!("block table is full ({} blocks), cannot grow by {len} bytes", config.max_blocks);
      return Err(AllocError::CapacityExhausted {
        max_blocks: config.max_blocks,
      });
    }

    let block = MemoryBlock::map(source, len, config.chunk_size, config.page_size)?;

    debug!(
      "grew heap: block {} at {:p}, {} bytes in {} chunks",
      self.blocks.len(),
      block.base(),
      len,
      block.total_chunks()
    );

    match self.blocks.push(block) {
      Ok(index) => Ok(index),
      Err(mut block) => {
        unsafe { block.release(source)? };
        Err(AllocError::CapacityExhausted {
          max_blocks: config.max_blocks,
        })
      }
    }
  }

  /// The block and chunk whose extent contains `address`.
  pub fn find(
    &self,
    address: usize,
  ) -> Option<ChunkHandle> {
    self.blocks.iter().enumerate().find_map(|(block, memory)| {
      memory
        .chunk_index(address)
        .map(|chunk| ChunkHandle { block, chunk })
    })
  }

  /// Unmaps every block and the table.
  ///
  /// # Safety
  ///
  /// `source` must be the source every block was mapped from, and no pointer
  /// into any block may be used afterwards.
  pub unsafe fn release_all<S: PageSource>(
    &mut self,
    source: &S,
  ) -> Result<(), SysError> {
    for block in self.blocks.iter_mut() {
      unsafe { block.release(source)? };
    }

    unsafe { self.blocks.release(source) }
  }
}

impl Default for BlockStore {
  fn default() -> Self {
    Self::new()
  }
}
