use std::ptr::NonNull;

use log::debug;

use crate::{
  error::{AllocError, SysError},
  mapped::MappedArray,
  sys::PageSource,
};

/// Bookkeeping for the chunk that starts an allocation.
///
/// Only the head chunk of a run records anything; the chunks it covers and
/// every free chunk keep an all-zero slot. A zero-filled table straight from
/// the kernel therefore describes a block with nothing allocated, and an
/// allocation touches one slot however many chunks it spans.
///
/// ```text
///   allocation of 40 bytes, chunk_size = 16
///
///   ┌──────────────┬──────────────┬──────────────┬──────────────┐
///   │ span 3       │ span 0       │ span 0       │ span 0       │
///   │ size 40      │ size 0       │ size 0       │ size 0       │
///   └──────────────┴──────────────┴──────────────┴──────────────┘
///     ▲             └─── covered by the head ───┘  free
///     └── pointer handed out: base + index * chunk_size
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChunkMeta {
  /// Chunks covered by the allocation starting here, 0 when none does.
  pub span: usize,
  /// Bytes requested by the caller.
  pub size: usize,
}

impl ChunkMeta {
  pub const VACANT: Self = Self { span: 0, size: 0 };

  /// Whether a live allocation starts at this chunk.
  pub fn is_head(&self) -> bool {
    self.span != 0
  }
}

/// One kernel mapping, cut into equally sized chunks.
pub struct MemoryBlock {
  base: NonNull<u8>,
  len: usize,
  chunk_size: usize,
  chunks: MappedArray<ChunkMeta>,
}

impl MemoryBlock {
  /// Maps `len` bytes of data plus the chunk table describing them.
  ///
  /// Either both mappings exist afterwards or neither does.
  pub fn map<S: PageSource>(
    source: &S,
    len: usize,
    chunk_size: usize,
    page_size: usize,
  ) -> Result<Self, AllocError> {
    debug_assert_eq!(len % chunk_size, 0);

    let base = source.request_pages(len)?;
    debug_assert_eq!(base.as_ptr() as usize % chunk_size, 0);
    let total_chunks = len / chunk_size;

    // SAFETY: an all-zero `ChunkMeta` is `VACANT`.
    let chunks = match unsafe { MappedArray::zeroed(source, total_chunks, page_size) } {
      Ok(chunks) => chunks,
      Err(err) => {
        // SAFETY: `base` came from `source` a moment ago and was never shared.
        if let Err(release) = unsafe { source.release_pages(base, len) } {
          debug!("could not unmap block data after a failed table mapping: {release}");
        }
        return Err(err);
      }
    };

    Ok(Self {
      base,
      len,
      chunk_size,
      chunks,
    })
  }

  pub fn base(&self) -> NonNull<u8> {
    self.base
  }

  pub fn len(&self) -> usize {
    self.len
  }

  pub fn chunk_size(&self) -> usize {
    self.chunk_size
  }

  pub fn total_chunks(&self) -> usize {
    self.chunks.len()
  }

  pub fn chunks(&self) -> &[ChunkMeta] {
    &self.chunks
  }

  pub fn chunk(
    &self,
    index: usize,
  ) -> &ChunkMeta {
    &self.chunks[index]
  }

  pub fn used_chunks(&self) -> usize {
    self.chunks.iter().map(|chunk| chunk.span).sum()
  }

  /// Whether chunk `index` belongs to a live allocation.
  pub fn is_used(
    &self,
    index: usize,
  ) -> bool {
    let mut cursor = 0;

    while cursor <= index {
      match self.chunks[cursor].span {
        0 => cursor += 1,
        span if index < cursor + span => return true,
        span => cursor += span,
      }
    }

    false
  }

  /// Whether `address` falls inside `[base, base + len)`.
  pub fn contains(
    &self,
    address: usize,
  ) -> bool {
    let base = self.base.as_ptr() as usize;

    address >= base && address - base < self.len
  }

  /// Index of the chunk holding `address`, if this block owns it.
  pub fn chunk_index(
    &self,
    address: usize,
  ) -> Option<usize> {
    if !self.contains(address) {
      return None;
    }

    Some((address - self.base.as_ptr() as usize) / self.chunk_size)
  }

  pub fn address_of(
    &self,
    index: usize,
  ) -> NonNull<u8> {
    debug_assert!(index < self.total_chunks());

    // SAFETY: every chunk lies inside the mapping.
    unsafe { self.base.add(index * self.chunk_size) }
  }

  /// Number of free chunks directly following `index` (inclusive).
  ///
  /// `index` must be a run boundary: a head, or the chunk right after the
  /// last chunk of an allocation.
  pub fn free_run_from(
    &self,
    index: usize,
  ) -> usize {
    self.chunks[index.min(self.total_chunks())..]
      .iter()
      .take_while(|chunk| !chunk.is_head())
      .count()
  }

  /// Marks `span` chunks starting at `head` as one live allocation of `size`
  /// bytes.
  pub fn claim(
    &mut self,
    head: usize,
    span: usize,
    size: usize,
  ) {
    debug_assert!(span > 0);
    debug_assert!(self.chunks[head..head + span].iter().all(|chunk| !chunk.is_head()));

    self.chunks[head] = ChunkMeta { span, size };
  }

  /// Absorbs `extra` free chunks right after the allocation at `head`.
  pub fn extend(
    &mut self,
    head: usize,
    extra: usize,
    size: usize,
  ) {
    let end = head + self.chunks[head].span;
    debug_assert!(self.chunks[end..end + extra].iter().all(|chunk| !chunk.is_head()));

    let first = &mut self.chunks[head];
    first.span += extra;
    first.size = size;
  }

  /// Returns every chunk of the allocation at `head` to the free state.
  pub fn vacate(
    &mut self,
    head: usize,
  ) -> usize {
    let span = self.chunks[head].span;
    self.chunks[head] = ChunkMeta::VACANT;

    span
  }

  /// Unmaps the data and the chunk table.
  ///
  /// # Safety
  ///
  /// `source` must be the source the block was mapped from, and no pointer
  /// into the block may be used afterwards.
  pub unsafe fn release<S: PageSource>(
    &mut self,
    source: &S,
  ) -> Result<(), SysError> {
    unsafe {
      self.chunks.release(source)?;
      source.release_pages(self.base, self.len)
    }
  }

  pub fn info(&self) -> BlockInfo {
    BlockInfo {
      base: self.base.as_ptr() as usize,
      len: self.len,
      chunk_size: self.chunk_size,
      total_chunks: self.total_chunks(),
      used_chunks: self.used_chunks(),
    }
  }
}

/// A snapshot of one block, for inspection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockInfo {
  pub base: usize,
  pub len: usize,
  pub chunk_size: usize,
  pub total_chunks: usize,
  pub used_chunks: usize,
}

impl BlockInfo {
  pub fn contains(
    &self,
    address: usize,
  ) -> bool {
    address >= self.base && address - self.base < self.len
  }
}

#[cfg(test)]
mod tests {
  use std::mem;

  use super::*;
  use crate::{config::HeapConfig, testing::CountingSource};

  #[test]
  fn test_map_starts_vacant() {
    let source = CountingSource::new();
    let mut block = MemoryBlock::map(&source, 8192, 16, 8192).unwrap();
    let base = block.base().as_ptr() as usize;

    assert_eq!(block.total_chunks(), 512);
    assert_eq!(block.used_chunks(), 0);

    for (index, chunk) in block.chunks().iter().enumerate() {
      assert_eq!(*chunk, ChunkMeta::VACANT);
      assert_eq!(block.address_of(index).as_ptr() as usize, base + index * 16);
      assert!(!block.is_used(index));
    }

    // data mapping + chunk table mapping
    assert_eq!(source.requests(), 2);

    unsafe { block.release(&source).unwrap() };
    assert_eq!(source.released(), 2);
  }

  #[test]
  fn test_failed_table_mapping_releases_data() {
    let source = CountingSource::with_limit(1);

    let result = MemoryBlock::map(&source, 8192, 16, 8192);

    assert!(matches!(result, Err(AllocError::OutOfMemory(_))));
    assert_eq!(source.requests(), 1);
    assert_eq!(source.released(), 1);
  }

  #[test]
  fn test_claim_extend_vacate() {
    let source = CountingSource::new();
    let mut block = MemoryBlock::map(&source, 8192, 16, 8192).unwrap();

    block.claim(2, 3, 40);

    assert!(block.chunk(2).is_head());
    assert_eq!(block.chunk(2).span, 3);
    assert_eq!(block.chunk(2).size, 40);
    assert!(block.is_used(3) && !block.chunk(3).is_head());
    assert!(block.is_used(4));
    assert!(!block.is_used(1) && !block.is_used(5));
    assert_eq!(block.used_chunks(), 3);
    assert_eq!(block.free_run_from(5), 507);
    assert_eq!(block.free_run_from(0), 2);

    block.extend(2, 2, 70);
    assert_eq!(block.chunk(2).span, 5);
    assert_eq!(block.chunk(2).size, 70);
    assert_eq!(block.used_chunks(), 5);

    assert_eq!(block.vacate(2), 5);
    assert_eq!(block.used_chunks(), 0);
    assert_eq!(*block.chunk(2), ChunkMeta::VACANT);
    assert!(!block.is_used(3));

    unsafe { block.release(&source).unwrap() };
  }

  #[test]
  fn test_table_is_no_larger_than_data() {
    let source = CountingSource::new();
    let len = 1 << 20;
    let mut block = MemoryBlock::map(&source, len, 16, 8192).unwrap();

    assert!(mem::size_of::<ChunkMeta>() <= HeapConfig::DEFAULT.chunk_size);
    assert_eq!(source.requested_bytes() - len, len / 16 * mem::size_of::<ChunkMeta>());

    // a run spanning the whole block writes a single slot
    block.claim(0, block.total_chunks(), len);
    assert_eq!(block.chunks().iter().filter(|chunk| **chunk != ChunkMeta::VACANT).count(), 1);
    assert_eq!(block.used_chunks(), block.total_chunks());
    assert!(block.is_used(block.total_chunks() - 1));

    unsafe { block.release(&source).unwrap() };
  }

  #[test]
  fn test_address_membership() {
    let source = CountingSource::new();
    let mut block = MemoryBlock::map(&source, 8192, 16, 8192).unwrap();
    let base = block.base().as_ptr() as usize;

    assert_eq!(block.chunk_index(base), Some(0));
    assert_eq!(block.chunk_index(base + 17), Some(1));
    assert_eq!(block.chunk_index(base + 8191), Some(511));
    assert_eq!(block.chunk_index(base + 8192), None);
    assert_eq!(block.chunk_index(base - 1), None);
    assert!(block.info().contains(base + 100));

    unsafe { block.release(&source).unwrap() };
  }
}
