//! OS-backed [`MemoryBackend`], grounded on `win32_memory_interface.h`'s
//! reserve-then-commit discipline but implemented against POSIX
//! `mmap`/`mprotect`/`munmap`, targeting userspace Unix rather than Windows.

use std::io;
use std::ptr;

use super::{MemoryBackend, Reservation};
use crate::align::align_up;
use crate::error::BackendError;

/// Reserves address space with `mmap(PROT_NONE)` and commits pages by
/// flipping them to `PROT_READ|PROT_WRITE` with `mprotect`.
///
/// Per §5/§1 Non-goals, committed pages are never decommitted mid-lifetime
/// by the core itself; `decommit`/`release` exist for the destructor path.
pub struct MmapBackend {
  page_size: usize,
}

impl MmapBackend {
  pub fn new() -> Self {
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    debug_assert!(page_size > 0);
    Self {
      page_size: page_size as usize,
    }
  }
}

impl Default for MmapBackend {
  fn default() -> Self {
    Self::new()
  }
}

unsafe impl MemoryBackend for MmapBackend {
  fn reserve(&mut self, requested_bytes: usize) -> Result<Reservation, BackendError> {
    let actual_bytes = align_up(requested_bytes, self.page_size);

    let base = unsafe {
      libc::mmap(
        ptr::null_mut(),
        actual_bytes,
        libc::PROT_NONE,
        libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
        -1,
        0,
      )
    };

    if base == libc::MAP_FAILED {
      return Err(BackendError::Reserve {
        requested: requested_bytes,
        source: io::Error::last_os_error(),
      });
    }

    log::debug!("reserved {actual_bytes} bytes at {base:p}");

    Ok(Reservation {
      base: base as *mut u8,
      actual_bytes,
    })
  }

  unsafe fn commit(&mut self, addr: *mut u8, requested_bytes: usize) -> Result<usize, BackendError> {
    let actual = align_up(requested_bytes, self.page_size);

    let result = unsafe { libc::mprotect(addr as *mut libc::c_void, actual, libc::PROT_READ | libc::PROT_WRITE) };

    if result != 0 {
      return Err(BackendError::Commit {
        addr: addr as usize,
        requested: requested_bytes,
        source: io::Error::last_os_error(),
      });
    }

    log::trace!("committed {actual} bytes at {addr:p}");
    Ok(actual)
  }

  unsafe fn decommit(&mut self, addr: *mut u8, bytes: usize) {
    let actual = align_up(bytes, self.page_size);
    let result = unsafe { libc::mprotect(addr as *mut libc::c_void, actual, libc::PROT_NONE) };
    debug_assert_eq!(result, 0, "mprotect(PROT_NONE) failed during decommit");
  }

  unsafe fn release(&mut self, base: *mut u8, bytes: usize) {
    let result = unsafe { libc::munmap(base as *mut libc::c_void, bytes) };
    debug_assert_eq!(result, 0, "munmap failed during release");
  }

  fn page_size(&self) -> usize {
    self.page_size
  }
}
