//! The allocator core (§4.4): `allocate`/`free`/`reallocate`, arena
//! extension, and split/coalesce orchestration over the list and tree.
//!
//! Grounded on `best_fit_allocator.h`'s `AllocInternal`/`FreeInternal`/
//! `ReAllocInternal`; the general "compute size, extend the backing store
//! if needed, update bookkeeping, hand back a payload pointer" shape comes
//! from `BumpAllocator::allocate`/`deallocate`.
//!
//! A block's `Header::size` (§3/§9: this crate stores it explicitly) is its
//! *payload* capacity; a block's full extent on the address list is
//! `chunk_size + header.size`.

use std::ptr::NonNull;

use crate::align::align_up;
use crate::backend::MemoryBackend;
use crate::block::{self, FreeBlock, Header, chunk_size, min_free_block};
use crate::error::BackendError;
use crate::list::BlockList;
use crate::tree::FreeTree;

/// Diagnostic call-site fields threaded through unused by the core (§6);
/// consumed by the tracking wrapper.
#[derive(Debug, Clone, Copy)]
pub struct AllocSource {
  pub file: &'static str,
  pub line: u32,
}

impl AllocSource {
  pub const UNKNOWN: AllocSource = AllocSource { file: "<unknown>", line: 0 };
}

/// Captures `file!()`/`line!()` at the call site, the idiomatic-Rust
/// counterpart of `allocator_interface.h`'s `ALLOC` macro.
#[macro_export]
macro_rules! alloc_at {
  ($allocator:expr, $size:expr, $alignment:expr) => {
    $allocator.allocate($size, $alignment, $crate::core::AllocSource { file: file!(), line: line!() })
  };
}

/// Counterpart of `allocator_interface.h`'s `FREE` macro.
#[macro_export]
macro_rules! free_at {
  ($allocator:expr, $ptr:expr) => {
    $allocator.free($ptr, $crate::core::AllocSource { file: file!(), line: line!() })
  };
}

/// Counterpart of `allocator_interface.h`'s `REALLOC` macro.
#[macro_export]
macro_rules! realloc_at {
  ($allocator:expr, $ptr:expr, $new_size:expr) => {
    $allocator.reallocate($ptr, $new_size, $crate::core::AllocSource { file: file!(), line: line!() })
  };
}

/// Read-only arena introspection (§2 component 5): instead of printing a
/// debug line, hands back a struct the caller may log, assert against, or
/// print itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaStats {
  pub reserved: usize,
  pub committed: usize,
  pub largest_free: usize,
}

/// The allocator interface (§6) in trait form, so the decorator wrappers
/// (`Tracked<A>`, `SlabAllocator<A>`) can stack over any allocator rather
/// than being hard-wired to `BestFitAllocator<B>`.
pub trait Allocator {
  fn allocate(&mut self, size: usize, alignment: usize, source: AllocSource) -> Result<*mut u8, BackendError>;
  fn free(&mut self, ptr: *mut u8, source: AllocSource);
  fn reallocate(&mut self, ptr: *mut u8, new_size: usize, source: AllocSource) -> Option<*mut u8>;
}

/// A best-fit coalescing heap allocator over one contiguous reservation
/// from `B`. Not thread-safe on its own — wrap with [`crate::mutex::Locked`]
/// for concurrent use (§5).
pub struct BestFitAllocator<B: MemoryBackend> {
  backend: B,
  base: *mut u8,
  reserved: usize,
  committed: usize,
  max_alignment: usize,
  list: BlockList,
  tree: FreeTree,
}

// SAFETY: all state is owned in-line; no thread-local or global aliasing.
// A `BestFitAllocator` may be handed to another thread (e.g. inside
// `Locked<A>`) as long as only one thread touches it at a time, which the
// wrapping mutex guarantees.
unsafe impl<B: MemoryBackend + Send> Send for BestFitAllocator<B> {}

impl<B: MemoryBackend> BestFitAllocator<B> {
  /// Reserves `reservation` bytes from `backend` and commits an initial
  /// page, seeding the arena with one free block spanning it.
  pub fn new(mut backend: B, reservation: usize, max_alignment: usize) -> Result<Self, BackendError> {
    assert!(
      max_alignment.is_power_of_two() && max_alignment >= 2,
      "max_alignment must be a power of two >= 2, got {max_alignment}"
    );

    let reservation_info = backend.reserve(reservation)?;

    let mut allocator = Self {
      backend,
      base: reservation_info.base,
      reserved: reservation_info.actual_bytes,
      committed: 0,
      max_alignment,
      list: BlockList::new(),
      tree: FreeTree::new(),
    };

    let chunk = chunk_size(max_alignment);
    let initial_request = allocator.backend.page_size().max(chunk + min_free_block(max_alignment));
    let committed = allocator.grow_committed(initial_request)?;

    let header = NonNull::new(allocator.base as *mut Header).expect("reservation base must not be null");
    unsafe {
      (*header.as_ptr()).size = committed - chunk;
      (*header.as_ptr()).next = None;
      (*header.as_ptr()).set_prev_and_free(None, true);
      allocator.list.init_single(header);
      allocator.tree.insert(FreeBlock::from_header(header));
    }

    log::debug!(
      "allocator constructed: reserved={} committed={} max_alignment={max_alignment}",
      allocator.reserved,
      allocator.committed
    );

    Ok(allocator)
  }

  pub fn stats(&self) -> ArenaStats {
    let largest_free = self
      .tree
      .largest()
      .map(|b| unsafe { (*FreeBlock::as_header(b).as_ptr()).size })
      .unwrap_or(0);

    ArenaStats {
      reserved: self.reserved,
      committed: self.committed,
      largest_free,
    }
  }

  pub(crate) fn list(&self) -> &BlockList {
    &self.list
  }

  pub(crate) fn tree(&self) -> &FreeTree {
    &self.tree
  }

  pub(crate) fn committed(&self) -> usize {
    self.committed
  }

  pub(crate) fn max_alignment(&self) -> usize {
    self.max_alignment
  }

  /// §4.4 `allocate`. Asserts on programmer error (`size == 0`,
  /// `alignment > max_alignment`, or a commit that would exceed the
  /// reservation); propagates real backend failures through the `Result`.
  pub fn allocate(&mut self, size: usize, alignment: usize, source: AllocSource) -> Result<*mut u8, BackendError> {
    assert!(size > 0, "allocate: size must be positive ({}:{})", source.file, source.line);
    assert!(
      alignment <= self.max_alignment,
      "allocate: alignment {alignment} exceeds max_alignment {} ({}:{})",
      self.max_alignment,
      source.file,
      source.line
    );

    let chunk = chunk_size(self.max_alignment);
    let min_free = min_free_block(self.max_alignment);
    let required = align_up(size, chunk).max(min_free);

    let candidate = match self.tree.best_fit(required) {
      Some(candidate) => candidate,
      None => self.extend_for(required, chunk)?,
    };

    unsafe {
      self.tree.remove(candidate);
      let header = FreeBlock::as_header(candidate);
      (*header.as_ptr()).set_free(false);

      let candidate_size = (*header.as_ptr()).size;
      let leftover = candidate_size - required;

      if leftover >= min_free {
        self.split(header, required, leftover, chunk);
      } else {
        (*header.as_ptr()).size = candidate_size;
      }

      log::trace!("allocate: {required} bytes at {header:p} ({}:{})", source.file, source.line);
      Ok(block::payload_ptr(header, chunk))
    }
  }

  /// §4.4 `free`. Asserts on double-free.
  pub fn free(&mut self, ptr: *mut u8, source: AllocSource) {
    let chunk = chunk_size(self.max_alignment);

    unsafe {
      let header = block::header_from_payload(ptr, chunk);
      assert!(
        !(*header.as_ptr()).is_free(),
        "free: double free at {header:p} ({}:{})",
        source.file,
        source.line
      );

      let prev = (*header.as_ptr()).prev();
      let next = (*header.as_ptr()).next;
      let prev_free = prev.is_some_and(|p| (*p.as_ptr()).is_free());
      let next_free = next.is_some_and(|n| (*n.as_ptr()).is_free());

      (*header.as_ptr()).set_free(true);

      match (prev_free, next_free) {
        (true, true) => {
          let prev = prev.unwrap();
          let next = next.unwrap();
          let prev_free = FreeBlock::from_header(prev);
          self.tree.remove(FreeBlock::from_header(next));

          let merged = (*prev.as_ptr()).size + chunk + (*header.as_ptr()).size + chunk + (*next.as_ptr()).size;

          if self.tree.can_change_size_in_place(prev_free, merged) {
            (*prev.as_ptr()).size = merged;
          } else {
            self.tree.remove(prev_free);
            (*prev.as_ptr()).size = merged;
            self.tree.insert(prev_free);
          }

          self.list.unlink(header);
          self.list.unlink(next);
        }
        (true, false) => {
          let prev = prev.unwrap();
          let prev_free = FreeBlock::from_header(prev);

          let merged = (*prev.as_ptr()).size + chunk + (*header.as_ptr()).size;

          if self.tree.can_change_size_in_place(prev_free, merged) {
            (*prev.as_ptr()).size = merged;
          } else {
            self.tree.remove(prev_free);
            (*prev.as_ptr()).size = merged;
            self.tree.insert(prev_free);
          }

          self.list.unlink(header);
        }
        (false, true) => {
          let next = next.unwrap();
          let next_free = FreeBlock::from_header(next);
          let header_free = FreeBlock::from_header(header);

          let merged = (*header.as_ptr()).size + chunk + (*next.as_ptr()).size;
          (*header.as_ptr()).size = merged;

          // Mirrors `CanSwapNodes`/`SwapNodes`: the newly-freed `header`
          // takes over `next`'s tree slot in place when size order allows.
          if self.tree.can_swap(next_free, header_free) {
            self.tree.swap(next_free, header_free);
          } else {
            self.tree.remove(next_free);
            self.tree.insert(header_free);
          }

          self.list.unlink(next);
        }
        (false, false) => {
          self.tree.insert(FreeBlock::from_header(header));
        }
      }

      log::trace!("free: block at {header:p} ({}:{})", source.file, source.line);
    }
  }

  /// §4.4 `reallocate`: shrink is a same-pointer no-op; grow is strictly
  /// in-place by forward coalescing. Returns `None` (`ReallocNoSpace`) if
  /// the forward walk hits a busy block or the list end before covering
  /// the shortfall, leaving the original allocation untouched.
  pub fn reallocate(&mut self, ptr: *mut u8, new_size: usize, source: AllocSource) -> Option<*mut u8> {
    let chunk = chunk_size(self.max_alignment);
    let min_free = min_free_block(self.max_alignment);

    unsafe {
      let header = block::header_from_payload(ptr, chunk);
      let current_size = (*header.as_ptr()).size;
      let required = align_up(new_size, chunk).max(min_free);

      if required <= current_size {
        log::trace!("reallocate: {ptr:p} shrinks or is unchanged ({}:{})", source.file, source.line);
        return Some(ptr);
      }

      let shortfall = required - current_size;
      let mut accumulated = 0usize;
      let mut walker = (*header.as_ptr()).next;
      let mut consumed: Vec<NonNull<Header>> = Vec::new();

      while accumulated < shortfall {
        let next = walker?;
        if !(*next.as_ptr()).is_free() {
          log::trace!("reallocate: {ptr:p} blocked by a busy neighbor ({}:{})", source.file, source.line);
          return None;
        }

        accumulated += chunk + (*next.as_ptr()).size;
        walker = (*next.as_ptr()).next;
        consumed.push(next);
      }

      for &block in &consumed {
        self.tree.remove(FreeBlock::from_header(block));
      }

      let last_consumed = *consumed.last().expect("shortfall > 0 implies at least one consumed block");
      let tail_next = (*last_consumed.as_ptr()).next;
      let total_available = current_size + accumulated;
      let remainder = total_available - required;

      if remainder >= min_free {
        let fragment = NonNull::new(block::payload_ptr(header, chunk + required) as *mut Header)
          .expect("fragment address must not be null");

        (*fragment.as_ptr()).size = remainder - chunk;
        (*fragment.as_ptr()).next = tail_next;
        (*fragment.as_ptr()).set_prev_and_free(Some(header), true);

        match tail_next {
          Some(next) => (*next.as_ptr()).set_prev(Some(fragment)),
          None => self.list.set_last(Some(fragment)),
        }

        (*header.as_ptr()).next = Some(fragment);
        (*header.as_ptr()).size = required;

        self.tree.insert(FreeBlock::from_header(fragment));
      } else {
        (*header.as_ptr()).next = tail_next;
        match tail_next {
          Some(next) => (*next.as_ptr()).set_prev(Some(header)),
          None => self.list.set_last(Some(header)),
        }
        (*header.as_ptr()).size = total_available;
      }

      log::trace!("reallocate: {ptr:p} grew to {required} bytes in place ({}:{})", source.file, source.line);
      Some(ptr)
    }
  }

  /// Extends the arena tail to produce a free block of at least `required`
  /// bytes of payload, per §4.4 step 2. Returns it still indexed in the
  /// tree, matching the invariant that `allocate`'s caller always removes
  /// `candidate` from the tree exactly once regardless of how it arrived.
  fn extend_for(&mut self, required: usize, chunk: usize) -> Result<NonNull<FreeBlock>, BackendError> {
    let last = self.list.last();
    let last_is_free = last.is_some_and(|l| unsafe { (*l.as_ptr()).is_free() });

    if last_is_free {
      let last = last.unwrap();
      let last_size = unsafe { (*last.as_ptr()).size };
      let shortfall = required - last_size;
      let committed_added = self.grow_committed(shortfall)?;

      let last_free = unsafe { FreeBlock::from_header(last) };
      let new_size = last_size + committed_added;
      unsafe {
        if self.tree.can_change_size_in_place(last_free, new_size) {
          (*last.as_ptr()).size = new_size;
        } else {
          self.tree.remove(last_free);
          (*last.as_ptr()).size = new_size;
          self.tree.insert(last_free);
        }
      }

      log::debug!("extended tail free block to {new_size} bytes");
      Ok(last_free)
    } else {
      let commit_needed = required + chunk;
      let old_committed = self.committed;
      let committed_added = self.grow_committed(commit_needed)?;
      let new_size = committed_added - chunk;

      let header = NonNull::new(unsafe { self.base.add(old_committed) } as *mut Header)
        .expect("new block address must not be null");

      unsafe {
        (*header.as_ptr()).size = new_size;
        (*header.as_ptr()).next = None;
        (*header.as_ptr()).set_prev_and_free(None, true);

        match last {
          Some(prev) => self.list.push_back(Some(prev), header),
          None => self.list.init_single(header),
        }

        let free_block = FreeBlock::from_header(header);
        self.tree.insert(free_block);
        log::debug!("appended new tail block of {new_size} bytes");
        Ok(free_block)
      }
    }
  }

  /// Splits a just-allocated `candidate` header (already marked busy, with
  /// `leftover >= min_free_block` bytes spare) into the busy front and a
  /// free fragment, merging with a free successor first if one exists
  /// (§4.4 step 4).
  fn split(&mut self, header: NonNull<Header>, required: usize, leftover: usize, chunk: usize) {
    unsafe {
      let successor = (*header.as_ptr()).next;
      let successor_is_free = successor.is_some_and(|s| (*s.as_ptr()).is_free());

      (*header.as_ptr()).size = required;

      let fragment =
        NonNull::new(block::payload_ptr(header, chunk + required) as *mut Header).expect("fragment address must not be null");
      let fragment_free = FreeBlock::from_header(fragment);

      if successor_is_free {
        let successor = successor.unwrap();
        let successor_size = (*successor.as_ptr()).size;
        let successor_free = FreeBlock::from_header(successor);

        self.list.unlink(successor);
        (*fragment.as_ptr()).size = leftover + successor_size;
        (*fragment.as_ptr()).set_prev_and_free(None, true);
        self.list.insert_after(header, fragment);

        // Mirrors `CanSwapNodes`/`SwapNodes`: the consumed successor's tree
        // slot is reused for the combined fragment in place when it still
        // respects BST order, instead of a remove-then-insert pair.
        if self.tree.can_swap(successor_free, fragment_free) {
          self.tree.swap(successor_free, fragment_free);
        } else {
          self.tree.remove(successor_free);
          self.tree.insert(fragment_free);
        }
      } else {
        (*fragment.as_ptr()).size = leftover - chunk;
        (*fragment.as_ptr()).set_prev_and_free(None, true);
        self.list.insert_after(header, fragment);
        self.tree.insert(fragment_free);
      }
    }
  }

  /// Commits `additional_bytes` more of the reservation, asserting
  /// `OutOfReserved` (§7) if that would exceed `reserved`. Returns the
  /// actual bytes committed, which may exceed the request by the
  /// backend's page-rounding.
  fn grow_committed(&mut self, additional_bytes: usize) -> Result<usize, BackendError> {
    assert!(
      self.committed + additional_bytes <= self.reserved,
      "allocate: commit of {additional_bytes} bytes would exceed the {}-byte reservation (OutOfReserved)",
      self.reserved
    );

    let addr = unsafe { self.base.add(self.committed) };
    let actual = unsafe { self.backend.commit(addr, additional_bytes)? };
    let clamped = actual.min(self.reserved - self.committed);

    self.committed += clamped;
    debug_assert!(self.committed <= self.reserved);

    Ok(clamped)
  }
}

/// §5: decommits and releases the whole reservation on every exit path,
/// including unwinding, so a dropped arena never leaks address space.
impl<B: MemoryBackend> Drop for BestFitAllocator<B> {
  fn drop(&mut self) {
    unsafe {
      if self.committed > 0 {
        self.backend.decommit(self.base, self.committed);
      }
      self.backend.release(self.base, self.reserved);
    }
  }
}

impl<B: MemoryBackend> Allocator for BestFitAllocator<B> {
  fn allocate(&mut self, size: usize, alignment: usize, source: AllocSource) -> Result<*mut u8, BackendError> {
    BestFitAllocator::allocate(self, size, alignment, source)
  }

  fn free(&mut self, ptr: *mut u8, source: AllocSource) {
    BestFitAllocator::free(self, ptr, source)
  }

  fn reallocate(&mut self, ptr: *mut u8, new_size: usize, source: AllocSource) -> Option<*mut u8> {
    BestFitAllocator::reallocate(self, ptr, new_size, source)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::backend::MallocBackend;
  use crate::checker;

  const ALIGN: usize = 16;

  fn new_allocator(reservation: usize) -> BestFitAllocator<MallocBackend> {
    BestFitAllocator::new(MallocBackend::new(), reservation, ALIGN).unwrap()
  }

  fn src() -> AllocSource {
    AllocSource::UNKNOWN
  }

  #[test]
  fn allocate_then_free_restores_single_free_block() {
    let mut arena = new_allocator(1 << 20);
    let before = arena.stats();

    let p = arena.allocate(1000, 8, src()).unwrap();
    assert_eq!(p as usize % ALIGN, 0);
    checker::check(&arena).unwrap();

    arena.free(p, src());
    checker::check(&arena).unwrap();

    assert_eq!(arena.stats(), before);
  }

  #[test]
  fn allocate_grows_arena_past_initial_commit() {
    let mut arena = new_allocator(1 << 20);
    let p = arena.allocate(8192, 8, src()).unwrap();
    checker::check(&arena).unwrap();
    assert!(arena.stats().committed > 4096);
    arena.free(p, src());
    checker::check(&arena).unwrap();
  }

  #[test]
  fn freeing_middle_of_three_coalesces_into_one_block() {
    let mut arena = new_allocator(1 << 20);
    let a = arena.allocate(100, 8, src()).unwrap();
    let b = arena.allocate(100, 8, src()).unwrap();
    let c = arena.allocate(100, 8, src()).unwrap();

    arena.free(a, src());
    arena.free(c, src());
    let before_middle_free = arena.stats();
    assert!(before_middle_free.largest_free < before_middle_free.committed);

    arena.free(b, src());
    checker::check(&arena).unwrap();

    let after = arena.stats();
    assert_eq!(after.largest_free, after.committed - chunk_size(ALIGN));
  }

  #[test]
  fn reallocate_shrink_is_a_no_op() {
    let mut arena = new_allocator(1 << 20);
    let p = arena.allocate(4000, 8, src()).unwrap();
    let q = arena.reallocate(p, 10, src()).unwrap();
    assert_eq!(p, q);
    checker::check(&arena).unwrap();
    arena.free(p, src());
  }

  #[test]
  fn reallocate_grows_in_place_over_a_free_successor() {
    let mut arena = new_allocator(1 << 20);
    let p = arena.allocate(500, 8, src()).unwrap();
    let q = arena.allocate(500, 8, src()).unwrap();
    arena.free(q, src());

    let grown = arena.reallocate(p, 3000, src()).unwrap();
    assert_eq!(grown, p);
    checker::check(&arena).unwrap();
  }

  #[test]
  fn reallocate_fails_past_a_busy_neighbor() {
    let mut arena = new_allocator(1 << 20);
    let p = arena.allocate(500, 8, src()).unwrap();
    let _q = arena.allocate(500, 8, src()).unwrap();

    assert!(arena.reallocate(p, 100_000, src()).is_none());
    checker::check(&arena).unwrap();
  }

  #[test]
  #[should_panic(expected = "double free")]
  fn double_free_panics() {
    let mut arena = new_allocator(1 << 20);
    let p = arena.allocate(100, 8, src()).unwrap();
    arena.free(p, src());
    arena.free(p, src());
  }

  #[test]
  #[should_panic(expected = "OutOfReserved")]
  fn allocation_exceeding_reservation_panics() {
    let mut arena = new_allocator(4096);
    arena.allocate(1 << 30, 8, src()).unwrap();
  }

  #[test]
  fn reverse_order_frees_merge_back_to_one_block() {
    let mut arena = new_allocator(1 << 20);
    let before = arena.stats();

    let handles: Vec<_> = (0..8).map(|_| arena.allocate(200, 8, src()).unwrap()).collect();
    for p in handles.into_iter().rev() {
      arena.free(p, src());
    }

    checker::check(&arena).unwrap();
    assert_eq!(arena.stats(), before);
  }
}
