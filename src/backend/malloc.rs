//! Backend that wraps an existing general-purpose allocator, per §6
//! ("a backend that wraps an existing general-purpose allocator ... [is] a
//! valid [backend]"). Grounded on `mallocator.h`, which does the analogous
//! thing for the C++ source (forwarding `Alloc`/`Free`/`ReAlloc` straight to
//! `_aligned_malloc`/`_aligned_free`/`realloc`).
//!
//! Unlike `MmapBackend`, there is no separate reserve/commit distinction
//! here: the whole reservation is backed by real memory from the moment it
//! is requested, since `std::alloc::System` has no notion of "reserved but
//! not committed". `commit` is therefore a no-op that reports the full
//! range as already available, and `decommit` is a no-op too. This backend
//! exists for tests that want a backend with no OS-specific syscalls, not
//! for production use (it defeats the point of lazy commit).

use std::alloc::{self, Layout};

use super::{MemoryBackend, Reservation};
use crate::error::BackendError;

/// Fake "page size" reported to the core so the arena-extension math in
/// `core.rs` still has a sensible granularity to round to.
const FAKE_PAGE_SIZE: usize = 4096;

pub struct MallocBackend {
  layout: Option<Layout>,
}

impl MallocBackend {
  pub fn new() -> Self {
    Self { layout: None }
  }
}

impl Default for MallocBackend {
  fn default() -> Self {
    Self::new()
  }
}

unsafe impl MemoryBackend for MallocBackend {
  fn reserve(&mut self, requested_bytes: usize) -> Result<Reservation, BackendError> {
    let actual_bytes =
      crate::align::align_up(requested_bytes.max(1), FAKE_PAGE_SIZE);

    let layout = Layout::from_size_align(actual_bytes, FAKE_PAGE_SIZE).expect("layout overflow");

    let base = unsafe { alloc::alloc(layout) };
    if base.is_null() {
      return Err(BackendError::Reserve {
        requested: requested_bytes,
        source: std::io::Error::from(std::io::ErrorKind::OutOfMemory),
      });
    }

    self.layout = Some(layout);

    Ok(Reservation { base, actual_bytes })
  }

  unsafe fn commit(&mut self, _addr: *mut u8, requested_bytes: usize) -> Result<usize, BackendError> {
    // Already backed by real memory from `reserve`; just report the
    // rounded-up size the caller asked for.
    Ok(crate::align::align_up(requested_bytes, FAKE_PAGE_SIZE))
  }

  unsafe fn decommit(&mut self, _addr: *mut u8, _bytes: usize) {}

  unsafe fn release(&mut self, base: *mut u8, _bytes: usize) {
    if let Some(layout) = self.layout.take() {
      unsafe { alloc::dealloc(base, layout) };
    }
  }

  fn page_size(&self) -> usize {
    FAKE_PAGE_SIZE
  }
}
