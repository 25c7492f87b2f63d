//! Test doubles shared by the unit tests.

use std::{
  ptr::NonNull,
  sync::atomic::{AtomicUsize, Ordering},
};

use crate::{
  error::SysError,
  sys::{Mmap, PageSource},
};

pub fn init_logger() {
  let _ = env_logger::builder().is_test(true).try_init();
}

/// [`Mmap`] with bookkeeping, optionally refusing requests past a limit.
pub struct CountingSource {
  requests: AtomicUsize,
  released: AtomicUsize,
  requested_bytes: AtomicUsize,
  limit: usize,
}

impl CountingSource {
  pub fn new() -> Self {
    Self::with_limit(usize::MAX)
  }

  /// Only the first `limit` requests succeed, the rest fail with `ENOMEM`.
  pub fn with_limit(limit: usize) -> Self {
    Self {
      requests: AtomicUsize::new(0),
      released: AtomicUsize::new(0),
      requested_bytes: AtomicUsize::new(0),
      limit,
    }
  }

  /// Successful `request_pages` calls so far.
  pub fn requests(&self) -> usize {
    self.requests.load(Ordering::SeqCst)
  }

  pub fn released(&self) -> usize {
    self.released.load(Ordering::SeqCst)
  }

  pub fn requested_bytes(&self) -> usize {
    self.requested_bytes.load(Ordering::SeqCst)
  }
}

unsafe impl PageSource for CountingSource {
  fn request_pages(
    &self,
    length: usize,
  ) -> Result<NonNull<u8>, SysError> {
    if self.requests() >= self.limit {
      return Err(SysError {
        op: "mmap",
        errno: libc::ENOMEM,
      });
    }

    let address = Mmap.request_pages(length)?;

    self.requests.fetch_add(1, Ordering::SeqCst);
    self.requested_bytes.fetch_add(length, Ordering::SeqCst);

    Ok(address)
  }

  unsafe fn release_pages(
    &self,
    address: NonNull<u8>,
    length: usize,
  ) -> Result<(), SysError> {
    self.released.fetch_add(1, Ordering::SeqCst);

    unsafe { Mmap.release_pages(address, length) }
  }
}
