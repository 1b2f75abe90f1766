//! Thread-safety wrapper (§5, §6): a CAS spin lock around any allocator,
//! not built into the core so a single-threaded embedder pays nothing for
//! it.
//!
//! Grounded on `allocator_spinlock.h`'s `Lock`/`Unlock` (CAS acquire, plain
//! store release) for the locking discipline; on `utils/locked.rs`'s
//! `Locked<A>` for putting the guarded value behind an `UnsafeCell` rather
//! than fabricating a `&mut` from a `&self` field directly; and on
//! `examples/other_examples/a0752d31_shmigatron-volki_..-free_list.rs.rs`'s
//! `SizeClass::acquire`/`release` for the idiomatic Rust atomics
//! (`AtomicBool` + `compare_exchange_weak` + `core::hint::spin_loop`)
//! replacing the source's `InterlockedCompareExchange`.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::backend::MemoryBackend;
use crate::core::{AllocSource, BestFitAllocator};
use crate::error::BackendError;

/// Wraps a `BestFitAllocator` with a spin lock so it can be shared across
/// threads. The core itself stays single-threaded (§5); this is the only
/// layer that knows about concurrency.
pub struct Locked<B: MemoryBackend> {
  inner: UnsafeCell<BestFitAllocator<B>>,
  locked: AtomicBool,
}

// SAFETY: `locked` serializes every access to `inner`; only one thread
// ever observes `inner` at a time.
unsafe impl<B: MemoryBackend + Send> Sync for Locked<B> {}

impl<B: MemoryBackend> Locked<B> {
  pub fn new(inner: BestFitAllocator<B>) -> Self {
    Self {
      inner: UnsafeCell::new(inner),
      locked: AtomicBool::new(false),
    }
  }

  fn lock(&self) -> SpinGuard<'_, B> {
    while self
      .locked
      .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
      .is_err()
    {
      core::hint::spin_loop();
    }
    SpinGuard { owner: self }
  }

  pub fn allocate(&self, size: usize, alignment: usize, source: AllocSource) -> Result<*mut u8, BackendError> {
    let mut guard = self.lock();
    guard.allocator_mut().allocate(size, alignment, source)
  }

  pub fn free(&self, ptr: *mut u8, source: AllocSource) {
    let mut guard = self.lock();
    guard.allocator_mut().free(ptr, source);
  }

  pub fn reallocate(&self, ptr: *mut u8, new_size: usize, source: AllocSource) -> Option<*mut u8> {
    let mut guard = self.lock();
    guard.allocator_mut().reallocate(ptr, new_size, source)
  }
}

/// RAII unlock: releases the spin lock on every exit path from a guarded
/// operation, including panics, the idiomatic-Rust answer to §5's
/// "the wrapping mutex guarantees lock release on all operation exit
/// paths" (the C++ source relies on manual `Lock()`/`Unlock()` pairing).
struct SpinGuard<'a, B: MemoryBackend> {
  owner: &'a Locked<B>,
}

impl<'a, B: MemoryBackend> SpinGuard<'a, B> {
  fn allocator_mut(&mut self) -> &mut BestFitAllocator<B> {
    // SAFETY: holding a `SpinGuard` proves `locked` is held by us, so no
    // other guard can alias the value behind `inner`'s `UnsafeCell`.
    unsafe { &mut *self.owner.inner.get() }
  }
}

impl<'a, B: MemoryBackend> Drop for SpinGuard<'a, B> {
  fn drop(&mut self) {
    self.owner.locked.store(false, Ordering::Release);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::backend::MallocBackend;

  fn src() -> AllocSource {
    AllocSource::UNKNOWN
  }

  #[test]
  fn allocate_and_free_through_the_lock() {
    let arena = BestFitAllocator::new(MallocBackend::new(), 1 << 20, 16).unwrap();
    let locked = Locked::new(arena);

    let p = locked.allocate(100, 8, src()).unwrap();
    assert!(!p.is_null());
    locked.free(p, src());
  }

  #[test]
  fn lock_is_released_after_each_operation() {
    let arena = BestFitAllocator::new(MallocBackend::new(), 1 << 20, 16).unwrap();
    let locked = Locked::new(arena);

    let p = locked.allocate(100, 8, src()).unwrap();
    // If the prior call leaked the lock, this would spin forever.
    let q = locked.allocate(100, 8, src()).unwrap();

    locked.free(p, src());
    locked.free(q, src());
  }
}
