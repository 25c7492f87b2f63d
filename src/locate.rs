//! First-fit search for free space.
//!
//! Blocks are visited in the order they were mapped, chunks in address order.
//! Consecutive free chunks form a run; the first run that reaches the request
//! wins, there is no best-fit comparison.
//!
//! ```text
//!   request: 48 bytes (3 chunks of 16)
//!
//!   block 0  [U][U][ ][ ][U][ ][ ][ ][ ][U]
//!                  └──┘     └─────┘
//!                  run of 2 run reaches 3 ──► Placement { block: 0, chunk: 5 }
//! ```

use crate::block::MemoryBlock;

/// Where a request fits: a run of `span` free chunks starting at `chunk` in
/// block `block`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Placement {
  pub block: usize,
  pub chunk: usize,
  /// Byte offset of the run within the block.
  pub offset: usize,
  pub span: usize,
}

/// First run in `blocks` holding `size` bytes.
///
/// `size` must already be normalized to the chunk size.
pub fn first_fit(
  blocks: &[MemoryBlock],
  size: usize,
) -> Option<Placement> {
  first_fit_aligned(blocks, size, 1)
}

/// Like [`first_fit`], but runs may only start at an address that is a
/// multiple of `alignment`.
pub fn first_fit_aligned(
  blocks: &[MemoryBlock],
  size: usize,
  alignment: usize,
) -> Option<Placement> {
  blocks
    .iter()
    .enumerate()
    .find_map(|(index, block)| first_fit_in(index, block, size, alignment))
}

/// First-fit restricted to the block at `index`.
pub fn first_fit_in(
  index: usize,
  block: &MemoryBlock,
  size: usize,
  alignment: usize,
) -> Option<Placement> {
  let chunk_size = block.chunk_size();
  debug_assert_eq!(size % chunk_size, 0);

  let chunks = block.chunks();
  let base = block.base().as_ptr() as usize;

  let mut accumulated = 0;
  let mut start: Option<usize> = None;
  let mut chunk_index = 0;

  while chunk_index < chunks.len() {
    let chunk = &chunks[chunk_index];

    // A live allocation ends the run; skip every chunk it covers.
    if chunk.is_head() {
      start = None;
      accumulated = 0;
      chunk_index += chunk.span;
      continue;
    }

    if start.is_none() && (base + chunk_index * chunk_size) % alignment != 0 {
      chunk_index += 1;
      continue;
    }

    let first = *start.get_or_insert(chunk_index);
    accumulated += chunk_size;
    chunk_index += 1;

    if accumulated >= size {
      return Some(Placement {
        block: index,
        chunk: first,
        offset: first * chunk_size,
        span: accumulated / chunk_size,
      });
    }
  }

  None
}
