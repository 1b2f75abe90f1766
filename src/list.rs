//! Address-ordered block list (§4.2).
//!
//! The ground truth for physical adjacency — coalescing decisions consult
//! this list, never the size tree. Grounded on the inline list maintenance
//! in `best_fit_allocator.h`'s `AllocInternal`/`FreeInternal`/
//! `ReAllocInternal`, generalized from a singly-linked `Block.next` chain
//! to doubly-linked, since coalescing needs O(1) access to a block's
//! predecessor.

use std::ptr::NonNull;

use crate::block::Header;

pub(crate) struct BlockList {
  first: Option<NonNull<Header>>,
  last: Option<NonNull<Header>>,
}

impl BlockList {
  pub fn new() -> Self {
    Self { first: None, last: None }
  }

  pub fn first(&self) -> Option<NonNull<Header>> {
    self.first
  }

  pub fn last(&self) -> Option<NonNull<Header>> {
    self.last
  }

  pub fn set_last(&mut self, block: Option<NonNull<Header>>) {
    self.last = block;
  }

  /// Seeds the list with the arena's first (and, at construction, only)
  /// block.
  pub unsafe fn init_single(&mut self, block: NonNull<Header>) {
    unsafe {
      (*block.as_ptr()).next = None;
      (*block.as_ptr()).set_prev(None);
    }
    self.first = Some(block);
    self.last = Some(block);
  }

  /// Links `new` in immediately after `existing`, which must currently be
  /// part of the list.
  ///
  /// # Safety
  /// `existing` must be a live block header in this list.
  pub unsafe fn insert_after(&mut self, existing: NonNull<Header>, new: NonNull<Header>) {
    unsafe {
      let existing_next = (*existing.as_ptr()).next;

      (*new.as_ptr()).next = existing_next;
      (*new.as_ptr()).set_prev(Some(existing));

      match existing_next {
        Some(next) => (*next.as_ptr()).set_prev(Some(new)),
        None => self.last = Some(new),
      }

      (*existing.as_ptr()).next = Some(new);
    }
  }

  /// Appends `new` as the new last block, given the current last block (or
  /// `None` if the list is empty).
  ///
  /// # Safety
  /// `current_last` must equal `self.last()`.
  pub unsafe fn push_back(&mut self, current_last: Option<NonNull<Header>>, new: NonNull<Header>) {
    unsafe {
      (*new.as_ptr()).next = None;
      (*new.as_ptr()).set_prev(current_last);
    }

    match current_last {
      Some(last) => unsafe { (*last.as_ptr()).next = Some(new) },
      None => self.first = Some(new),
    }
    self.last = Some(new);
  }

  /// Removes `block` from the list, relinking its neighbors.
  ///
  /// # Safety
  /// `block` must be a live member of this list.
  pub unsafe fn unlink(&mut self, block: NonNull<Header>) {
    let (prev, next) = unsafe { ((*block.as_ptr()).prev(), (*block.as_ptr()).next) };

    match prev {
      Some(p) => unsafe { (*p.as_ptr()).next = next },
      None => self.first = next,
    }

    match next {
      Some(n) => unsafe { (*n.as_ptr()).set_prev(prev) },
      None => self.last = prev,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::alloc::{Layout, alloc, dealloc};

  unsafe fn new_header() -> NonNull<Header> {
    let layout = Layout::new::<Header>();
    let ptr = unsafe { alloc(layout) } as *mut Header;
    unsafe {
      (*ptr).next = None;
      (*ptr).set_prev_and_free(None, false);
      (*ptr).size = 0;
    }
    NonNull::new(ptr).unwrap()
  }

  unsafe fn free_header(ptr: NonNull<Header>) {
    unsafe { dealloc(ptr.as_ptr() as *mut u8, Layout::new::<Header>()) };
  }

  #[test]
  fn single_block_is_both_first_and_last() {
    unsafe {
      let mut list = BlockList::new();
      let a = new_header();
      list.init_single(a);

      assert_eq!(list.first(), Some(a));
      assert_eq!(list.last(), Some(a));
      assert_eq!((*a.as_ptr()).next, None);
      assert_eq!((*a.as_ptr()).prev(), None);

      free_header(a);
    }
  }

  #[test]
  fn insert_after_splices_into_the_middle() {
    unsafe {
      let mut list = BlockList::new();
      let a = new_header();
      let c = new_header();
      list.init_single(a);
      list.push_back(Some(a), c);

      let b = new_header();
      list.insert_after(a, b);

      assert_eq!((*a.as_ptr()).next, Some(b));
      assert_eq!((*b.as_ptr()).prev(), Some(a));
      assert_eq!((*b.as_ptr()).next, Some(c));
      assert_eq!((*c.as_ptr()).prev(), Some(b));
      assert_eq!(list.last(), Some(c));

      free_header(a);
      free_header(b);
      free_header(c);
    }
  }

  #[test]
  fn unlink_middle_block_reconnects_neighbors() {
    unsafe {
      let mut list = BlockList::new();
      let a = new_header();
      let b = new_header();
      let c = new_header();
      list.init_single(a);
      list.push_back(Some(a), b);
      list.push_back(Some(b), c);

      list.unlink(b);

      assert_eq!((*a.as_ptr()).next, Some(c));
      assert_eq!((*c.as_ptr()).prev(), Some(a));
      assert_eq!(list.first(), Some(a));
      assert_eq!(list.last(), Some(c));

      free_header(a);
      free_header(b);
      free_header(c);
    }
  }

  #[test]
  fn unlink_last_block_updates_last_pointer() {
    unsafe {
      let mut list = BlockList::new();
      let a = new_header();
      let b = new_header();
      list.init_single(a);
      list.push_back(Some(a), b);

      list.unlink(b);

      assert_eq!(list.last(), Some(a));
      assert_eq!((*a.as_ptr()).next, None);

      free_header(a);
      free_header(b);
    }
  }
}
