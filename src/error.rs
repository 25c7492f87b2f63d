use std::io;

use thiserror::Error;

/// A raw kernel request that came back with the failure sentinel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("{op}() failed: {}", io::Error::from_raw_os_error(*errno))]
pub struct SysError {
  pub op: &'static str,
  pub errno: i32,
}

impl SysError {
  /// Captures the calling thread's errno for a failed `op`.
  pub fn last(op: &'static str) -> Self {
    Self {
      op,
      errno: io::Error::last_os_error().raw_os_error().unwrap_or(0),
    }
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum AllocError {
  #[error("out of memory: {0}")]
  OutOfMemory(SysError),
  #[error("block table is full ({max_blocks} blocks)")]
  CapacityExhausted { max_blocks: usize },
  #[error("pointer {address:#x} is not owned by this heap")]
  UnknownPointer { address: usize },
  #[error("pointer {address:#x} is not the start of a live allocation")]
  NotAllocated { address: usize },
  #[error("requested size overflows the address space")]
  SizeOverflow,
  #[error("alignment {alignment} is not a power of two")]
  InvalidAlignment { alignment: usize },
  #[error("invalid heap configuration: {0}")]
  InvalidConfig(&'static str),
}

impl From<SysError> for AllocError {
  fn from(err: SysError) -> Self {
    AllocError::OutOfMemory(err)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_sys_error_message() {
    let err = SysError {
      op: "mmap",
      errno: libc::ENOMEM,
    };

    let message = err.to_string();

    assert!(message.starts_with("mmap() failed: "));
    assert!(message.contains(&io::Error::from_raw_os_error(libc::ENOMEM).to_string()));
    assert_eq!(AllocError::from(err), AllocError::OutOfMemory(err));
  }

  #[test]
  fn test_pointer_errors_show_address() {
    let err = AllocError::UnknownPointer { address: 0xdead0 };

    assert_eq!(err.to_string(), "pointer 0xdead0 is not owned by this heap");
  }
}
