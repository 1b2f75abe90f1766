//! Leak-tracking decorator (§6): wraps any [`Allocator`] with a
//! pointer-keyed ledger of live allocations, plus pre/post callbacks for
//! each operation.
//!
//! Grounded on `checked_fixed_allocator.h`'s `alloc_block` list and its
//! leak-check-on-drop (`BM_LEAK_CHECK`), and on `test.cpp`'s `OnAlloc`/
//! `OnFree`/`OnReAlloc` hooks. The source's list is intrusive because C++
//! needs somewhere to stash the bookkeeping without a second allocation;
//! a `HashMap<usize, LiveAllocation>` gets the same pointer -> record
//! lookup without reaching for unsafe intrusive links for a decorator
//! that's already paying for a `HashMap`'s worth of overhead per live
//! allocation. `Tracked::leaks` replaces the source's print-and-abort with
//! a value a test can assert against directly.

use std::collections::HashMap;

use crate::core::{AllocSource, Allocator};
use crate::error::BackendError;

/// Everything recorded about one still-live allocation.
#[derive(Debug, Clone, Copy)]
struct LiveAllocation {
  size: usize,
  alignment: usize,
  source: AllocSource,
}

/// Decorates `A` with a pointer-keyed live-allocation ledger. Callbacks
/// mirror the source's `OnAlloc`/`OnFree`/`OnReAlloc`: `pre_*` runs before
/// delegating to `A`, `post_*` after, both given whatever is known at that
/// point (the pointer isn't known pre-alloc, so `pre_alloc` only sees the
/// request).
pub struct Tracked<A: Allocator> {
  inner: A,
  live: HashMap<usize, LiveAllocation>,
  pub pre_alloc: Option<Box<dyn FnMut(usize, usize, AllocSource)>>,
  pub post_alloc: Option<Box<dyn FnMut(*mut u8, usize, usize, AllocSource)>>,
  pub pre_free: Option<Box<dyn FnMut(*mut u8, AllocSource)>>,
  pub post_free: Option<Box<dyn FnMut(*mut u8, AllocSource)>>,
  pub pre_realloc: Option<Box<dyn FnMut(*mut u8, usize, AllocSource)>>,
  pub post_realloc: Option<Box<dyn FnMut(*mut u8, Option<*mut u8>, AllocSource)>>,
}

impl<A: Allocator> Tracked<A> {
  pub fn new(inner: A) -> Self {
    Self {
      inner,
      live: HashMap::new(),
      pre_alloc: None,
      post_alloc: None,
      pre_free: None,
      post_free: None,
      pre_realloc: None,
      post_realloc: None,
    }
  }

  pub fn allocate(&mut self, size: usize, alignment: usize, source: AllocSource) -> Result<*mut u8, BackendError> {
    if let Some(cb) = self.pre_alloc.as_mut() {
      cb(size, alignment, source);
    }

    let ptr = self.inner.allocate(size, alignment, source)?;
    self.live.insert(ptr as usize, LiveAllocation { size, alignment, source });

    if let Some(cb) = self.post_alloc.as_mut() {
      cb(ptr, size, alignment, source);
    }

    Ok(ptr)
  }

  pub fn free(&mut self, ptr: *mut u8, source: AllocSource) {
    if let Some(cb) = self.pre_free.as_mut() {
      cb(ptr, source);
    }

    self.inner.free(ptr, source);
    self
      .live
      .remove(&(ptr as usize))
      .expect("Tracked::free on a pointer the tracker never recorded (or a double free)");

    if let Some(cb) = self.post_free.as_mut() {
      cb(ptr, source);
    }
  }

  pub fn reallocate(&mut self, ptr: *mut u8, new_size: usize, source: AllocSource) -> Option<*mut u8> {
    if let Some(cb) = self.pre_realloc.as_mut() {
      cb(ptr, new_size, source);
    }

    let result = self.inner.reallocate(ptr, new_size, source);

    if let Some(new_ptr) = result {
      let entry = self
        .live
        .remove(&(ptr as usize))
        .expect("Tracked::reallocate on a pointer the tracker never recorded");
      self.live.insert(
        new_ptr as usize,
        LiveAllocation {
          size: new_size,
          alignment: entry.alignment,
          source,
        },
      );
    }

    if let Some(cb) = self.post_realloc.as_mut() {
      cb(ptr, result, source);
    }

    result
  }

  /// The call sites of every allocation that is still live. An empty
  /// result means no leaks.
  pub fn leaks(&self) -> Vec<AllocSource> {
    self.live.values().map(|entry| entry.source).collect()
  }

  pub fn live_count(&self) -> usize {
    self.live.len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::backend::MallocBackend;
  use crate::core::BestFitAllocator;

  fn src() -> AllocSource {
    AllocSource::UNKNOWN
  }

  #[test]
  fn no_leaks_after_matched_free() {
    let arena = BestFitAllocator::new(MallocBackend::new(), 1 << 20, 16).unwrap();
    let mut tracked = Tracked::new(arena);

    let p = tracked.allocate(100, 8, src()).unwrap();
    assert_eq!(tracked.live_count(), 1);
    tracked.free(p, src());
    assert!(tracked.leaks().is_empty());
  }

  #[test]
  fn unmatched_allocation_is_reported_as_a_leak() {
    let arena = BestFitAllocator::new(MallocBackend::new(), 1 << 20, 16).unwrap();
    let mut tracked = Tracked::new(arena);

    let _p = tracked.allocate(100, 8, AllocSource { file: "leaky.rs", line: 42 }).unwrap();

    let leaks = tracked.leaks();
    assert_eq!(leaks.len(), 1);
    assert_eq!(leaks[0].file, "leaky.rs");
    assert_eq!(leaks[0].line, 42);
  }

  #[test]
  fn reallocate_moves_the_ledger_entry_to_the_new_pointer() {
    let arena = BestFitAllocator::new(MallocBackend::new(), 1 << 20, 16).unwrap();
    let mut tracked = Tracked::new(arena);

    let p = tracked.allocate(500, 8, src()).unwrap();
    let q = tracked.reallocate(p, 2000, src()).unwrap();
    assert_eq!(tracked.live_count(), 1);
    tracked.free(q, src());
    assert!(tracked.leaks().is_empty());
  }
}
