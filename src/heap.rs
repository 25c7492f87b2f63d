use std::ptr::{self, NonNull};

use log::{debug, trace, warn};

use crate::{
  align::{is_power_of_two, try_normalize},
  block::BlockInfo,
  config::HeapConfig,
  error::AllocError,
  locate::{self, Placement},
  store::{BlockStore, ChunkHandle},
  sys::{Mmap, PageSource},
};

/// A heap carved out of page mappings obtained from `S`.
///
/// Not synchronised: wrap it in a [`LockedHeap`](crate::LockedHeap) to share
/// it between threads.
pub struct Heap<S: PageSource = Mmap> {
  source: S,
  config: HeapConfig,
  store: BlockStore,
}

// SAFETY: the heap exclusively owns every mapping its raw pointers refer to.
unsafe impl<S: PageSource + Send> Send for Heap<S> {}

impl<S: PageSource> Heap<S> {
  /// An empty heap with [`HeapConfig::DEFAULT`]. Nothing is mapped until the
  /// first allocation.
  pub const fn new(source: S) -> Self {
    Self {
      source,
      config: HeapConfig::DEFAULT,
      store: BlockStore::new(),
    }
  }

  pub fn with_config(
    source: S,
    config: HeapConfig,
  ) -> Result<Self, AllocError> {
    Ok(Self {
      source,
      config: config.validate()?,
      store: BlockStore::new(),
    })
  }

  pub fn config(&self) -> &HeapConfig {
    &self.config
  }

  pub fn source(&self) -> &S {
    &self.source
  }

  pub fn block_count(&self) -> usize {
    self.store.len()
  }

  pub fn blocks(&self) -> impl Iterator<Item = BlockInfo> + '_ {
    self.store.blocks().iter().map(|block| block.info())
  }

  /// Allocates at least `size` bytes, aligned to the chunk size.
  pub fn alloc(
    &mut self,
    size: usize,
  ) -> Result<NonNull<u8>, AllocError> {
    self.place(size, 1)
  }

  /// Allocates at least `size` bytes at an address that is a multiple of
  /// `alignment`, which must be a power of two.
  pub fn aligned_alloc(
    &mut self,
    alignment: usize,
    size: usize,
  ) -> Result<NonNull<u8>, AllocError> {
    if !is_power_of_two(alignment) {
      return Err(AllocError::InvalidAlignment { alignment });
    }

    self.place(size, alignment)
  }

  /// Allocates `count * size` zeroed bytes.
  pub fn calloc(
    &mut self,
    count: usize,
    size: usize,
  ) -> Result<NonNull<u8>, AllocError> {
    let total = count.checked_mul(size).ok_or(AllocError::SizeOverflow)?;

    let address = self.alloc(total)?;

    // Recycled chunks still hold whatever their previous owner wrote.
    unsafe { address.as_ptr().write_bytes(0, total) };

    Ok(address)
  }

  /// Resizes the allocation at `address` to `new_size` bytes.
  ///
  /// A null `address` behaves like [`Heap::alloc`]. The allocation stays in
  /// place when its chunks already cover `new_size` or when enough free chunks
  /// directly follow it; otherwise it moves and the old chunks are freed. On
  /// error the original allocation is left untouched.
  ///
  /// # Safety
  ///
  /// When the allocation moves, `address` must not be used anymore.
  pub unsafe fn realloc(
    &mut self,
    address: *mut u8,
    new_size: usize,
  ) -> Result<NonNull<u8>, AllocError> {
    let Some(current) = NonNull::new(address) else {
      return self.alloc(new_size);
    };

    if self.resize_in_place(address, new_size)? {
      return Ok(current);
    }

    let handle = self.lookup(address as usize)?;
    let old_size = self.store.block(handle.block).chunk(handle.chunk).size;

    let moved = self.alloc(new_size)?;

    unsafe {
      ptr::copy_nonoverlapping(address, moved.as_ptr(), old_size.min(new_size));
    }
    self.store.block_mut(handle.block).vacate(handle.chunk);

    trace!("realloc {address:p}: moved to {moved:p}");

    Ok(moved)
  }

  /// Resizes the allocation at `address` to `new_size` bytes without moving
  /// it, returning whether that was possible.
  ///
  /// Succeeds when the chunks already cover `new_size` or when enough free
  /// chunks directly follow the allocation. Otherwise nothing changes.
  pub fn resize_in_place(
    &mut self,
    address: *mut u8,
    new_size: usize,
  ) -> Result<bool, AllocError> {
    let handle = self.lookup(address as usize)?;
    let chunk_size = self.config.chunk_size;
    let normalized = try_normalize(new_size, chunk_size).ok_or(AllocError::SizeOverflow)?;

    let block = self.store.block_mut(handle.block);
    let head = *block.chunk(handle.chunk);
    let wanted = normalized / chunk_size;

    if wanted <= head.span {
      trace!("realloc {address:p}: {} -> {new_size} bytes in place", head.size);
      block.extend(handle.chunk, 0, new_size);
      return Ok(true);
    }

    let extra = wanted - head.span;
    if block.free_run_from(handle.chunk + head.span) >= extra {
      trace!("realloc {address:p}: absorbing {extra} chunks");
      block.extend(handle.chunk, extra, new_size);
      return Ok(true);
    }

    Ok(false)
  }

  /// Releases the allocation at `address`. Null is ignored.
  ///
  /// The chunks become reusable; the pages stay mapped.
  ///
  /// # Safety
  ///
  /// The allocation must not be used afterwards.
  pub unsafe fn free(
    &mut self,
    address: *mut u8,
  ) -> Result<(), AllocError> {
    if address.is_null() {
      return Ok(());
    }

    let handle = self.lookup(address as usize)?;
    let span = self.store.block_mut(handle.block).vacate(handle.chunk);

    trace!("free {address:p}: {span} chunks");

    Ok(())
  }

  /// Bytes usable at `address`: every chunk the allocation covers.
  pub fn usable_size(
    &self,
    address: *const u8,
  ) -> Result<usize, AllocError> {
    let handle = self.lookup(address as usize)?;
    let block = self.store.block(handle.block);

    Ok(block.chunk(handle.chunk).span * block.chunk_size())
  }

  /// Bytes requested for the allocation at `address`.
  pub fn allocation_size(
    &self,
    address: *const u8,
  ) -> Result<usize, AllocError> {
    let handle = self.lookup(address as usize)?;

    Ok(self.store.block(handle.block).chunk(handle.chunk).size)
  }

  fn place(
    &mut self,
    size: usize,
    alignment: usize,
  ) -> Result<NonNull<u8>, AllocError> {
    let chunk_size = self.config.chunk_size;
    let normalized = try_normalize(size, chunk_size).ok_or(AllocError::SizeOverflow)?;

    let placement = match self.store.locate_aligned(normalized, alignment) {
      Some(placement) => placement,
      None => self.grow_for(normalized, alignment)?,
    };

    let block = self.store.block_mut(placement.block);
    block.claim(placement.chunk, placement.span, size);
    let address = block.address_of(placement.chunk);

    trace!(
      "alloc {size} bytes (align {alignment}) -> {address:p}, block {} chunk {}",
      placement.block, placement.chunk
    );

    Ok(address)
  }

  fn grow_for(
    &mut self,
    normalized: usize,
    alignment: usize,
  ) -> Result<Placement, AllocError> {
    // Leave room to slide the run up to an aligned chunk.
    let size = if alignment > self.config.chunk_size {
      normalized.checked_add(alignment).ok_or(AllocError::SizeOverflow)?
    } else {
      normalized
    };

    let index = self.store.grow(&self.source, &self.config, size)?;

    // The block was sized for the request, only an alignment the mapping
    // cannot honor leaves it without a fitting run.
    locate::first_fit_in(index, self.store.block(index), normalized, alignment)
      .ok_or(AllocError::InvalidAlignment { alignment })
  }

  /// Resolves `address` to the head chunk of a live allocation.
  fn lookup(
    &self,
    address: usize,
  ) -> Result<ChunkHandle, AllocError> {
    let Some(handle) = self.store.find(address) else {
      warn!("rejected pointer {address:#x}: not inside any block");
      return Err(AllocError::UnknownPointer { address });
    };

    let block = self.store.block(handle.block);

    if !block.chunk(handle.chunk).is_head()
      || block.address_of(handle.chunk).as_ptr() as usize != address
    {
      warn!("rejected pointer {address:#x}: not the start of a live allocation");
      return Err(AllocError::NotAllocated { address });
    }

    Ok(handle)
  }
}

impl<S: PageSource> Drop for Heap<S> {
  fn drop(&mut self) {
    let blocks = self.store.len();

    if let Err(err) = unsafe { self.store.release_all(&self.source) } {
      warn!("failed to unmap heap: {err}");
      return;
    }

    if blocks > 0 {
      debug!("unmapped heap with {blocks} blocks");
    }
  }
}
