//! Raw page requests.
//!
//! Everything that talks to the kernel lives here. The rest of the crate only
//! sees [`PageSource`]: ask for `length` bytes, give them back later.
//!
//! On Linux the requests are issued straight through `syscall(2)`, bypassing
//! the C runtime's `mmap` wrapper. The way the six `mmap` arguments reach the
//! kernel depends on the architecture:
//!
//! ```text
//!   Registers (x86_64, aarch64)        ArgStruct (i386 old_mmap)
//!
//!   ┌──────────┐                       ┌──────────┐
//!   │ arg0     │ address               │ arg0     │ ──► ┌──────────────┐
//!   │ arg1     │ length                └──────────┘     │ address      │
//!   │ arg2     │ protection                             │ length       │
//!   │ arg3     │ flags                                  │ protection   │
//!   │ arg4     │ fd                                     │ flags        │
//!   │ arg5     │ offset                                 │ fd           │
//!   └──────────┘                                        │ offset       │
//!                                                       └──────────────┘
//! ```

use std::ptr::NonNull;

use libc::{c_int, c_long, c_ulong, c_void};

use crate::error::SysError;

/// Supplier of raw, page-granular memory.
///
/// # Safety
///
/// A region returned by `request_pages` must be readable and writable for
/// `length` bytes, zero-filled, aligned to at least 4096 bytes, and not
/// handed out again until it is passed back to `release_pages`.
pub unsafe trait PageSource {
  fn request_pages(
    &self,
    length: usize,
  ) -> Result<NonNull<u8>, SysError>;

  /// # Safety
  ///
  /// `address` and `length` must describe exactly one region previously
  /// returned by `request_pages` on this source, and nothing may touch it
  /// afterwards.
  unsafe fn release_pages(
    &self,
    address: NonNull<u8>,
    length: usize,
  ) -> Result<(), SysError>;
}

unsafe impl<T: PageSource + ?Sized> PageSource for &T {
  fn request_pages(
    &self,
    length: usize,
  ) -> Result<NonNull<u8>, SysError> {
    (**self).request_pages(length)
  }

  unsafe fn release_pages(
    &self,
    address: NonNull<u8>,
    length: usize,
  ) -> Result<(), SysError> {
    unsafe { (**self).release_pages(address, length) }
  }
}

/// Private, anonymous, read/write mappings straight from the kernel.
#[derive(Clone, Copy, Debug, Default)]
pub struct Mmap;

unsafe impl PageSource for Mmap {
  fn request_pages(
    &self,
    length: usize,
  ) -> Result<NonNull<u8>, SysError> {
    let request = MmapRequest::anonymous(length);

    let address = unsafe { raw_mmap(&request) };

    if address == libc::MAP_FAILED {
      return Err(SysError::last("mmap"));
    }

    NonNull::new(address.cast::<u8>()).ok_or(SysError {
      op: "mmap",
      errno: libc::EFAULT,
    })
  }

  unsafe fn release_pages(
    &self,
    address: NonNull<u8>,
    length: usize,
  ) -> Result<(), SysError> {
    let status = unsafe { raw_munmap(address.as_ptr().cast(), length) };

    if status < 0 {
      return Err(SysError::last("munmap"));
    }

    Ok(())
  }
}

/// How `mmap` arguments are marshalled for the kernel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallConvention {
  /// One argument per register.
  Registers,
  /// A pointer to a block holding all six arguments.
  ArgStruct,
}

impl CallConvention {
  pub const NATIVE: CallConvention = if cfg!(target_arch = "x86") {
    CallConvention::ArgStruct
  } else {
    CallConvention::Registers
  };
}

/// Argument block of the i386 `old_mmap` entry point.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct MmapArgStruct {
  pub address: c_ulong,
  pub length: c_ulong,
  pub protection: c_ulong,
  pub flags: c_ulong,
  pub fd: c_ulong,
  pub offset: c_ulong,
}

/// An `mmap` request, already laid out for one calling convention.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MmapCall {
  Registers([c_long; 6]),
  ArgStruct(MmapArgStruct),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MmapRequest {
  pub address: usize,
  pub length: usize,
  pub protection: c_int,
  pub flags: c_int,
  pub fd: c_int,
  pub offset: usize,
}

impl MmapRequest {
  /// A private, anonymous, read/write mapping at a kernel-chosen address.
  pub const fn anonymous(length: usize) -> Self {
    Self {
      address: 0,
      length,
      protection: libc::PROT_READ | libc::PROT_WRITE,
      flags: libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
      fd: -1,
      offset: 0,
    }
  }

  pub fn encode(
    &self,
    convention: CallConvention,
  ) -> MmapCall {
    match convention {
      CallConvention::Registers => MmapCall::Registers([
        self.address as c_long,
        self.length as c_long,
        self.protection as c_long,
        self.flags as c_long,
        self.fd as c_long,
        self.offset as c_long,
      ]),
      CallConvention::ArgStruct => MmapCall::ArgStruct(MmapArgStruct {
        address: self.address as c_ulong,
        length: self.length as c_ulong,
        protection: self.protection as c_ulong,
        flags: self.flags as c_ulong,
        // Sign-extended: the kernel reads the low bits back as -1.
        fd: self.fd as c_long as c_ulong,
        offset: self.offset as c_ulong,
      }),
    }
  }
}

#[cfg(all(
  target_os = "linux",
  any(target_arch = "x86_64", target_arch = "aarch64", target_arch = "x86")
))]
unsafe fn raw_mmap(request: &MmapRequest) -> *mut c_void {
  let result = match request.encode(CallConvention::NATIVE) {
    MmapCall::Registers([a0, a1, a2, a3, a4, a5]) => unsafe {
      libc::syscall(libc::SYS_mmap, a0, a1, a2, a3, a4, a5)
    },
    MmapCall::ArgStruct(args) => unsafe {
      libc::syscall(libc::SYS_mmap, &args as *const MmapArgStruct)
    },
  };

  result as usize as *mut c_void
}

#[cfg(all(
  target_os = "linux",
  any(target_arch = "x86_64", target_arch = "aarch64", target_arch = "x86")
))]
unsafe fn raw_munmap(
  address: *mut c_void,
  length: usize,
) -> c_long {
  unsafe { libc::syscall(libc::SYS_munmap, address as c_long, length as c_long) }
}

#[cfg(not(all(
  target_os = "linux",
  any(target_arch = "x86_64", target_arch = "aarch64", target_arch = "x86")
)))]
unsafe fn raw_mmap(request: &MmapRequest) -> *mut c_void {
  unsafe {
    libc::mmap(
      request.address as *mut c_void,
      request.length,
      request.protection,
      request.flags,
      request.fd,
      request.offset as libc::off_t,
    )
  }
}

#[cfg(not(all(
  target_os = "linux",
  any(target_arch = "x86_64", target_arch = "aarch64", target_arch = "x86")
)))]
unsafe fn raw_munmap(
  address: *mut c_void,
  length: usize,
) -> c_long {
  unsafe { libc::munmap(address, length) as c_long }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_register_encoding() {
    let call = MmapRequest::anonymous(8192).encode(CallConvention::Registers);

    let MmapCall::Registers(registers) = call else {
      panic!("expected register encoding, got {call:?}");
    };

    assert_eq!(registers[0], 0);
    assert_eq!(registers[1], 8192);
    assert_eq!(registers[2], (libc::PROT_READ | libc::PROT_WRITE) as c_long);
    assert_eq!(registers[3], (libc::MAP_PRIVATE | libc::MAP_ANONYMOUS) as c_long);
    assert_eq!(registers[4], -1);
    assert_eq!(registers[5], 0);
  }

  #[test]
  fn test_arg_struct_encoding() {
    let call = MmapRequest::anonymous(16384).encode(CallConvention::ArgStruct);

    let MmapCall::ArgStruct(args) = call else {
      panic!("expected argument block, got {call:?}");
    };

    assert_eq!(args.address, 0);
    assert_eq!(args.length, 16384);
    assert_eq!(args.protection, (libc::PROT_READ | libc::PROT_WRITE) as c_ulong);
    assert_eq!(args.flags, (libc::MAP_PRIVATE | libc::MAP_ANONYMOUS) as c_ulong);
    assert_eq!(args.fd, c_ulong::MAX);
    assert_eq!(args.offset, 0);
  }

  #[test]
  fn test_native_convention() {
    if cfg!(target_arch = "x86") {
      assert_eq!(CallConvention::NATIVE, CallConvention::ArgStruct);
    } else {
      assert_eq!(CallConvention::NATIVE, CallConvention::Registers);
    }
  }

  #[test]
  fn test_mmap_round_trip() {
    let length = 8192;

    let address = Mmap.request_pages(length).unwrap();

    assert_eq!(address.as_ptr() as usize % 4096, 0);

    unsafe {
      let bytes = std::slice::from_raw_parts_mut(address.as_ptr(), length);
      assert!(bytes.iter().all(|b| *b == 0));

      bytes[0] = 0xAB;
      bytes[length - 1] = 0xCD;
      assert_eq!(bytes[0], 0xAB);
      assert_eq!(bytes[length - 1], 0xCD);

      Mmap.release_pages(address, length).unwrap();
    }
  }

  #[test]
  fn test_mmap_failure_reports_errno() {
    let err = Mmap.request_pages(usize::MAX - 4095).unwrap_err();

    assert_eq!(err.op, "mmap");
    assert_eq!(err.errno, libc::ENOMEM);
  }
}
