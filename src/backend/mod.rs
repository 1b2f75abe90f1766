//! Page-memory backends (§6).
//!
//! The core never talks to the OS directly; it goes through this trait, the
//! Rust equivalent of `memory_interface.h`'s
//! `DECLARE_MEMORY_INTERFACE_METHODS` macro (`Reserve`/`Commit`/`DeCommit`/
//! `Release`/`GetPageSize`).

mod malloc;
mod mmap;

pub use malloc::MallocBackend;
pub use mmap::MmapBackend;

use crate::error::BackendError;

/// The address range and actual byte count returned by [`MemoryBackend::reserve`].
#[derive(Debug, Clone, Copy)]
pub struct Reservation {
  pub base: *mut u8,
  pub actual_bytes: usize,
}

/// A source of virtual address space for [`crate::core::BestFitAllocator`].
///
/// # Safety
///
/// Implementors must uphold the contract in §6: `reserve` returns an
/// address range that is valid to `commit` into but not yet readable or
/// writable; `commit` must make `[addr, addr+actual)` readable and
/// writable without faulting; `decommit`/`release` must not be called on
/// addresses outside a prior `reserve`/`commit` call.
pub unsafe trait MemoryBackend {
  /// Reserves at least `requested_bytes` of address space. The actual size
  /// is rounded up to the backend's commit granularity.
  fn reserve(&mut self, requested_bytes: usize) -> Result<Reservation, BackendError>;

  /// Commits `requested_bytes` starting at `addr`, which must lie within a
  /// prior reservation. Returns the actual number of bytes committed
  /// (rounded up to a page multiple).
  ///
  /// # Safety
  ///
  /// `addr` must be within the reservation returned by `reserve`.
  unsafe fn commit(&mut self, addr: *mut u8, requested_bytes: usize) -> Result<usize, BackendError>;

  /// Reverses a prior `commit`. The address range remains reserved.
  ///
  /// # Safety
  ///
  /// `[addr, addr+bytes)` must have been committed by this backend and must
  /// not be read or written again until re-committed.
  unsafe fn decommit(&mut self, addr: *mut u8, bytes: usize);

  /// Returns the entire reservation starting at `base` to the OS.
  ///
  /// # Safety
  ///
  /// `base` must be the address returned by `reserve`, and no block within
  /// the reservation may be referenced afterwards.
  unsafe fn release(&mut self, base: *mut u8, bytes: usize);

  /// The commit granularity; guaranteed `>= size_of::<crate::block::Header>()`.
  fn page_size(&self) -> usize;
}
