//! Fixed-size slab allocator (§6), external to the core: carves bulk
//! allocations obtained from any [`Allocator`] into equal-size chunks
//! tracked by a singly-linked intrusive free list.
//!
//! Grounded on `fixed_size_allocator.h`'s `fixed_size_allocator<T>`: one
//! bulk request per slab, chunks linked through their own (otherwise
//! unused, while free) first pointer-sized field.

use std::ptr::NonNull;

use crate::core::{AllocSource, Allocator};
use crate::error::BackendError;

#[repr(C)]
struct FreeChunk {
  next: Option<NonNull<FreeChunk>>,
}

/// A fixed-size-chunk allocator backed by `A`. Every `allocate` call
/// returns a chunk of exactly `chunk_size` bytes regardless of the
/// requested size/alignment, per §6.
pub struct SlabAllocator<A: Allocator> {
  inner: A,
  chunk_size: usize,
  chunks_per_slab: usize,
  free_list: Option<NonNull<FreeChunk>>,
  slab_bases: Vec<*mut u8>,
}

impl<A: Allocator> SlabAllocator<A> {
  /// `chunk_size` must be at least `size_of::<*mut u8>()` so a free chunk
  /// can hold its own free-list link.
  pub fn new(inner: A, chunk_size: usize, chunks_per_slab: usize) -> Self {
    assert!(chunk_size >= std::mem::size_of::<usize>(), "slab chunk_size too small to hold a free-list link");
    assert!(chunks_per_slab > 0);

    Self {
      inner,
      chunk_size,
      chunks_per_slab,
      free_list: None,
      slab_bases: Vec::new(),
    }
  }

  pub fn chunk_size(&self) -> usize {
    self.chunk_size
  }

  fn grow(&mut self, source: AllocSource) -> Result<(), BackendError> {
    let slab_bytes = self.chunk_size * self.chunks_per_slab;
    let base = self.inner.allocate(slab_bytes, std::mem::align_of::<usize>(), source)?;
    self.slab_bases.push(base);

    for i in 0..self.chunks_per_slab {
      let chunk_ptr = unsafe { base.add(i * self.chunk_size) } as *mut FreeChunk;
      let chunk = NonNull::new(chunk_ptr).expect("slab chunk address must not be null");
      unsafe { (*chunk.as_ptr()).next = self.free_list };
      self.free_list = Some(chunk);
    }

    Ok(())
  }

  pub fn allocate(&mut self, source: AllocSource) -> Result<*mut u8, BackendError> {
    if self.free_list.is_none() {
      self.grow(source)?;
    }

    let chunk = self.free_list.expect("grow() must populate the free list");
    self.free_list = unsafe { (*chunk.as_ptr()).next };
    Ok(chunk.as_ptr() as *mut u8)
  }

  pub fn free(&mut self, ptr: *mut u8) {
    let chunk = NonNull::new(ptr as *mut FreeChunk).expect("freed pointer must not be null");
    unsafe { (*chunk.as_ptr()).next = self.free_list };
    self.free_list = Some(chunk);
  }
}

impl<A: Allocator> Drop for SlabAllocator<A> {
  fn drop(&mut self) {
    for &base in &self.slab_bases {
      self.inner.free(base, AllocSource::UNKNOWN);
    }
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
  fn chunks_are_reused_after_free() {
    let arena = BestFitAllocator::new(MallocBackend::new(), 1 << 20, 16).unwrap();
    let mut slab = SlabAllocator::new(arena, 64, 8);

    let a = slab.allocate(src()).unwrap();
    slab.free(a);
    let b = slab.allocate(src()).unwrap();

    assert_eq!(a, b);
  }

  #[test]
  fn exhausting_a_slab_requests_another() {
    let arena = BestFitAllocator::new(MallocBackend::new(), 1 << 20, 16).unwrap();
    let mut slab = SlabAllocator::new(arena, 64, 4);

    let chunks: Vec<_> = (0..5).map(|_| slab.allocate(src()).unwrap()).collect();
    let unique: std::collections::HashSet<_> = chunks.iter().collect();
    assert_eq!(unique.len(), 5);
  }
}
