//! C entry points over one process-wide heap.
//!
//! Every failure is reported as a null return; the reason only reaches the
//! log.

use std::ptr::{self, NonNull};

use libc::{c_void, size_t};
use log::debug;

use crate::{error::AllocError, locked::LockedHeap, sys::Mmap};

static HEAP: LockedHeap<Mmap> = LockedHeap::new(Mmap);

/// The heap behind the C entry points.
pub fn global() -> &'static LockedHeap<Mmap> {
  &HEAP
}

fn into_raw(
  op: &str,
  result: Result<NonNull<u8>, AllocError>,
) -> *mut c_void {
  match result {
    Ok(address) => address.as_ptr().cast(),
    Err(err) => {
      debug!("{op} failed: {err}");
      ptr::null_mut()
    }
  }
}

#[unsafe(no_mangle)]
pub extern "C" fn mapalloc_malloc(size: size_t) -> *mut c_void {
  into_raw("malloc", HEAP.lock().alloc(size))
}

#[unsafe(no_mangle)]
pub extern "C" fn mapalloc_aligned_alloc(
  alignment: size_t,
  size: size_t,
) -> *mut c_void {
  into_raw("aligned_alloc", HEAP.lock().aligned_alloc(alignment, size))
}

#[unsafe(no_mangle)]
pub extern "C" fn mapalloc_calloc(
  count: size_t,
  size: size_t,
) -> *mut c_void {
  into_raw("calloc", HEAP.lock().calloc(count, size))
}

/// # Safety
///
/// `address` must be null or a live pointer from this heap; if the result is
/// non-null and differs, `address` must not be used anymore.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn mapalloc_realloc(
  address: *mut c_void,
  size: size_t,
) -> *mut c_void {
  into_raw("realloc", unsafe { HEAP.lock().realloc(address.cast(), size) })
}

/// # Safety
///
/// `address` must be null or a live pointer from this heap, and must not be
/// used afterwards.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn mapalloc_free(address: *mut c_void) {
  if let Err(err) = unsafe { HEAP.lock().free(address.cast()) } {
    debug!("free failed: {err}");
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_malloc_free() {
    let address = mapalloc_malloc(100) as *mut u8;
    assert!(!address.is_null());

    unsafe {
      address.write_bytes(0xAA, 100);
      mapalloc_free(address.cast());
    }

    assert!(global().lock().block_count() >= 1);
  }

  #[test]
  fn test_calloc_overflow_is_null() {
    assert!(mapalloc_calloc(usize::MAX / 2 + 1, 4).is_null());
  }

  #[test]
  fn test_calloc_is_zeroed() {
    let address = mapalloc_calloc(10, 10) as *const u8;

    unsafe {
      assert!(std::slice::from_raw_parts(address, 100).iter().all(|b| *b == 0));
      mapalloc_free(address as *mut c_void);
    }
  }

  #[test]
  fn test_aligned_alloc() {
    let address = mapalloc_aligned_alloc(1024, 10);

    assert_eq!(address as usize % 1024, 0);
    assert!(mapalloc_aligned_alloc(3, 10).is_null());

    unsafe { mapalloc_free(address) };
  }

  #[test]
  fn test_realloc_keeps_contents() {
    unsafe {
      let address = mapalloc_realloc(ptr::null_mut(), 8) as *mut u8;
      address.write_bytes(0x11, 8);

      let grown = mapalloc_realloc(address.cast(), 10_000) as *mut u8;
      assert!(std::slice::from_raw_parts(grown, 8).iter().all(|b| *b == 0x11));

      mapalloc_free(grown.cast());
    }
  }

  #[test]
  fn test_free_null_and_foreign() {
    let mut local = 0u32;

    unsafe {
      mapalloc_free(ptr::null_mut());
      mapalloc_free(&mut local as *mut u32 as *mut c_void);
    }

    assert_eq!(local, 0);
  }
}
