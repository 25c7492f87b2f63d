/// Rounds `value` up to the next multiple of `granularity`.
///
/// `granularity` must be a power of two, the rounding is done with a mask.
///
/// # Examples
///
/// ```rust
/// use mapalloc::align_to;
///
/// assert_eq!(align_to!(13, 16), 16);
/// assert_eq!(align_to!(8193, 8192), 16384);
/// assert_eq!(align_to!(32, 16), 32);
/// ```
#[macro_export]
macro_rules! align_to {
  ($value:expr, $granularity:expr) => {
    ($value + ($granularity - 1)) & !($granularity - 1)
  };
}

pub const fn is_power_of_two(value: usize) -> bool {
  value != 0 && value & (value - 1) == 0
}

/// Normalizes a requested byte count to a multiple of `granularity`.
///
/// Requests smaller than the granularity become exactly one granule, so
/// nothing below the granularity ever reaches the bookkeeping.
///
/// `size` must leave room for the rounding, see [`try_normalize`] for
/// untrusted input.
pub const fn normalize(
  size: usize,
  granularity: usize,
) -> usize {
  debug_assert!(is_power_of_two(granularity));

  if size < granularity {
    return granularity;
  }

  align_to!(size, granularity)
}

/// Like [`normalize`], but returns `None` when rounding up would overflow.
pub const fn try_normalize(
  size: usize,
  granularity: usize,
) -> Option<usize> {
  if size > usize::MAX - (granularity - 1) {
    return None;
  }

  Some(normalize(size, granularity))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_align_to() {
    let granularity = 16;

    let mut alignments = Vec::new();

    for i in 0..10 {
      let sizes = (granularity * i + 1)..=(granularity * (i + 1));

      let expected_alignment = granularity * (i + 1);

      alignments.push((sizes, expected_alignment));
    }

    for (sizes, expected) in alignments {
      for size in sizes {
        assert_eq!(expected, align_to!(size, granularity));
      }
    }
  }

  #[test]
  fn test_normalize_small_requests() {
    assert_eq!(normalize(0, 16), 16);
    assert_eq!(normalize(1, 16), 16);
    assert_eq!(normalize(15, 16), 16);
    assert_eq!(normalize(100, 8192), 8192);
  }

  #[test]
  fn test_normalize_rounds_up() {
    assert_eq!(normalize(16, 16), 16);
    assert_eq!(normalize(17, 16), 32);
    assert_eq!(normalize(8192, 8192), 8192);
    assert_eq!(normalize(8193, 8192), 16384);
  }

  #[test]
  fn test_try_normalize_overflow() {
    assert_eq!(try_normalize(usize::MAX, 16), None);
    assert_eq!(try_normalize(usize::MAX - 14, 16), None);
    assert_eq!(try_normalize(usize::MAX - 15, 16), Some(usize::MAX - 15));
    assert_eq!(try_normalize(40, 16), Some(48));
  }

  #[test]
  fn test_is_power_of_two() {
    assert!(is_power_of_two(1));
    assert!(is_power_of_two(4096));
    assert!(!is_power_of_two(0));
    assert!(!is_power_of_two(24));
  }
}
