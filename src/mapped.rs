use std::{
  mem,
  ops::{Deref, DerefMut},
  ptr::{self, NonNull},
  slice,
};

use crate::{
  align::try_normalize,
  error::{AllocError, SysError},
  sys::PageSource,
};

/// A fixed-capacity array stored in its own page mapping.
///
/// The heap keeps all of its bookkeeping in these, so it never needs another
/// allocator to describe the memory it hands out. The mapping is not released
/// on drop: it has to go back to the [`PageSource`] it came from, see
/// [`MappedArray::release`].
pub struct MappedArray<T> {
  ptr: NonNull<T>,
  len: usize,
  capacity: usize,
  mapped: usize,
}

impl<T> MappedArray<T> {
  /// An array with no storage. Nothing is mapped until
  /// [`MappedArray::with_capacity`].
  pub const fn new() -> Self {
    Self {
      ptr: NonNull::dangling(),
      len: 0,
      capacity: 0,
      mapped: 0,
    }
  }

  pub fn with_capacity<S: PageSource>(
    source: &S,
    capacity: usize,
    page_size: usize,
  ) -> Result<Self, AllocError> {
    debug_assert!(mem::size_of::<T>() > 0);

    let bytes = capacity
      .checked_mul(mem::size_of::<T>())
      .and_then(|bytes| try_normalize(bytes, page_size))
      .ok_or(AllocError::SizeOverflow)?;

    let base = source.request_pages(bytes)?;
    debug_assert_eq!(base.as_ptr() as usize % mem::align_of::<T>(), 0);

    Ok(Self {
      ptr: base.cast::<T>(),
      len: 0,
      capacity,
      mapped: bytes,
    })
  }

  /// A full array of `len` elements read straight from a fresh mapping.
  ///
  /// Nothing is written, so the pages only become resident once touched.
  ///
  /// # Safety
  ///
  /// The all-zero bit pattern must be a valid `T`.
  pub unsafe fn zeroed<S: PageSource>(
    source: &S,
    len: usize,
    page_size: usize,
  ) -> Result<Self, AllocError> {
    let mut array = Self::with_capacity(source, len, page_size)?;
    // `PageSource` mappings are zero-filled.
    array.len = len;

    Ok(array)
  }

  pub fn is_mapped(&self) -> bool {
    self.mapped != 0
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  pub fn is_full(&self) -> bool {
    self.len == self.capacity
  }

  /// Bytes held by the backing mapping.
  pub fn mapped_len(&self) -> usize {
    self.mapped
  }

  /// Appends `value`, returning its index, or hands it back when full.
  pub fn push(
    &mut self,
    value: T,
  ) -> Result<usize, T> {
    if self.is_full() {
      return Err(value);
    }

    let index = self.len;

    // SAFETY: `index < capacity`, and the mapping holds `capacity` slots.
    unsafe { self.ptr.as_ptr().add(index).write(value) };
    self.len += 1;

    Ok(index)
  }

  /// Drops the elements and gives the mapping back to `source`.
  ///
  /// # Safety
  ///
  /// `source` must be the source the array was mapped from, and no pointer
  /// into the array may be used afterwards.
  pub unsafe fn release<S: PageSource>(
    &mut self,
    source: &S,
  ) -> Result<(), SysError> {
    if !self.is_mapped() {
      return Ok(());
    }

    let len = self.len;
    let mapped = self.mapped;
    let base = self.ptr.cast::<u8>();
    *self = Self::new();

    unsafe {
      ptr::drop_in_place(ptr::slice_from_raw_parts_mut(base.as_ptr().cast::<T>(), len));
      source.release_pages(base, mapped)
    }
  }
}

impl<T> Default for MappedArray<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T> Deref for MappedArray<T> {
  type Target = [T];

  fn deref(&self) -> &[T] {
    // SAFETY: the first `len` slots were initialized by `push` or `zeroed`.
    unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
  }
}

impl<T> DerefMut for MappedArray<T> {
  fn deref_mut(&mut self) -> &mut [T] {
    // SAFETY: as for `deref`, and `&mut self` makes the access unique.
    unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::sys::Mmap;
  use crate::testing::CountingSource;

  #[test]
  fn test_push_until_full() {
    let mut array = MappedArray::<u64>::with_capacity(&Mmap, 3, 4096).unwrap();

    assert_eq!(array.push(10), Ok(0));
    assert_eq!(array.push(20), Ok(1));
    assert_eq!(array.push(30), Ok(2));
    assert_eq!(array.push(40), Err(40));

    assert!(array.is_full());
    assert_eq!(&array[..], &[10, 20, 30]);

    array[1] = 21;
    assert_eq!(array[1], 21);

    unsafe { array.release(&Mmap).unwrap() };
    assert!(!array.is_mapped());
    assert!(array.is_empty());
  }

  #[test]
  fn test_mapping_is_page_rounded() {
    let source = CountingSource::new();

    let mut array = MappedArray::<[u8; 24]>::with_capacity(&source, 1000, 8192).unwrap();

    assert_eq!(array.mapped_len(), 24576);
    assert_eq!(source.requested_bytes(), 24576);

    unsafe { array.release(&source).unwrap() };
    assert_eq!(source.released(), 1);
  }

  #[test]
  fn test_zeroed_is_full_of_zeros() {
    let source = CountingSource::new();

    let mut array = unsafe { MappedArray::<u64>::zeroed(&source, 5000, 8192).unwrap() };

    assert_eq!(array.len(), 5000);
    assert!(array.is_full());
    assert!(array.iter().all(|value| *value == 0));
    assert_eq!(array.push(1), Err(1));

    unsafe { array.release(&source).unwrap() };
  }

  #[test]
  fn test_unmapped_array_is_empty() {
    let source = CountingSource::new();
    let mut array = MappedArray::<u32>::new();

    assert!(array.is_empty());
    assert!(array.is_full());
    assert_eq!(array.push(1), Err(1));

    unsafe { array.release(&source).unwrap() };
    assert_eq!(source.released(), 0);
  }

  #[test]
  fn test_capacity_overflow() {
    let result = MappedArray::<u64>::with_capacity(&Mmap, usize::MAX / 2, 4096);

    assert_eq!(result.err(), Some(AllocError::SizeOverflow));
  }
}
