use std::{
  alloc::{GlobalAlloc, Layout},
  ptr::{self, NonNull},
};

use spin::{Mutex, MutexGuard};

use crate::{
  config::HeapConfig,
  error::AllocError,
  heap::Heap,
  sys::{Mmap, PageSource},
};

/// A [`Heap`] behind one spin lock, usable as the global allocator.
///
/// Every operation, including the chunk scan, runs with the lock held, so no
/// thread ever sees a half-claimed run.
///
/// ```rust,ignore
/// use mapalloc::{LockedHeap, Mmap};
///
/// #[global_allocator]
/// static HEAP: LockedHeap<Mmap> = LockedHeap::new(Mmap);
/// ```
pub struct LockedHeap<S: PageSource = Mmap>(Mutex<Heap<S>>);

impl<S: PageSource> LockedHeap<S> {
  pub const fn new(source: S) -> Self {
    Self(Mutex::new(Heap::new(source)))
  }

  pub fn with_config(
    source: S,
    config: HeapConfig,
  ) -> Result<Self, AllocError> {
    Ok(Self(Mutex::new(Heap::with_config(source, config)?)))
  }

  pub fn lock(&self) -> MutexGuard<'_, Heap<S>> {
    self.0.lock()
  }
}

fn alloc_layout<S: PageSource>(
  heap: &mut Heap<S>,
  layout: Layout,
) -> Result<NonNull<u8>, AllocError> {
  if layout.align() <= heap.config().chunk_size {
    heap.alloc(layout.size())
  } else {
    heap.aligned_alloc(layout.align(), layout.size())
  }
}

unsafe impl<S: PageSource> GlobalAlloc for LockedHeap<S> {
  unsafe fn alloc(
    &self,
    layout: Layout,
  ) -> *mut u8 {
    alloc_layout(&mut *self.lock(), layout).map_or(ptr::null_mut(), NonNull::as_ptr)
  }

  unsafe fn alloc_zeroed(
    &self,
    layout: Layout,
  ) -> *mut u8 {
    let mut heap = self.lock();

    let result = if layout.align() <= heap.config().chunk_size {
      heap.calloc(1, layout.size())
    } else {
      alloc_layout(&mut *heap, layout).inspect(|address| {
        unsafe { address.as_ptr().write_bytes(0, layout.size()) };
      })
    };

    result.map_or(ptr::null_mut(), NonNull::as_ptr)
  }

  unsafe fn dealloc(
    &self,
    ptr: *mut u8,
    _layout: Layout,
  ) {
    let _ = unsafe { self.lock().free(ptr) };
  }

  unsafe fn realloc(
    &self,
    ptr: *mut u8,
    layout: Layout,
    new_size: usize,
  ) -> *mut u8 {
    let mut heap = self.lock();

    if layout.align() <= heap.config().chunk_size {
      return unsafe { heap.realloc(ptr, new_size) }.map_or(ptr::null_mut(), NonNull::as_ptr);
    }

    // Moving through `Heap::realloc` would drop the alignment.
    match heap.resize_in_place(ptr, new_size) {
      Ok(true) => return ptr,
      Ok(false) => {}
      Err(_) => return ptr::null_mut(),
    }

    let Ok(moved) = heap.aligned_alloc(layout.align(), new_size) else {
      return ptr::null_mut();
    };

    unsafe {
      ptr::copy_nonoverlapping(ptr, moved.as_ptr(), layout.size().min(new_size));
      let _ = heap.free(ptr);
    }

    moved.as_ptr()
  }
}
