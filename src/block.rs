//! In-band block records (§3, §4.1).
//!
//! Every block starts with a [`Header`]; free blocks additionally carry the
//! red-black tree links, overlaid on the block's own payload space (never
//! allocated separately — the arena owns every byte of its committed
//! prefix). Grounded on `best_fit_allocator.h`'s `block_header`/`free_block`
//! structs: `prev` and the tree's `parent` pointer each steal a low-order
//! bit (`free`, `color`) because every header address is chunk-aligned and
//! therefore has spare zero bits at the bottom.

use std::mem;
use std::ptr::NonNull;

use crate::align::align_up;

const FREE_FLAG: usize = 1;
const RED_FLAG: usize = 1;

/// Common prefix of every block, busy or free.
///
/// `size` is stored explicitly rather than derived from `next`/the arena's
/// committed end on every query — see the design decision recorded in
/// `DESIGN.md` under `block.rs`. This matches what `best_fit_allocator.h`'s
/// `block_header` actually does (it has a `size_t size` member).
#[repr(C)]
pub(crate) struct Header {
  prev_and_free: usize,
  pub next: Option<NonNull<Header>>,
  pub size: usize,
}

impl Header {
  pub fn prev(&self) -> Option<NonNull<Header>> {
    NonNull::new((self.prev_and_free & !FREE_FLAG) as *mut Header)
  }

  pub fn is_free(&self) -> bool {
    self.prev_and_free & FREE_FLAG != 0
  }

  pub fn set_prev(&mut self, prev: Option<NonNull<Header>>) {
    let free = self.is_free();
    self.set_prev_and_free(prev, free);
  }

  pub fn set_free(&mut self, free: bool) {
    let prev = self.prev();
    self.set_prev_and_free(prev, free);
  }

  pub fn set_prev_and_free(&mut self, prev: Option<NonNull<Header>>, free: bool) {
    let ptr = prev.map_or(0, |p| p.as_ptr() as usize);
    debug_assert_eq!(ptr & FREE_FLAG, 0, "header address must be at least 2-byte aligned");
    self.prev_and_free = ptr | if free { FREE_FLAG } else { 0 };
  }
}

/// Tree-link extension present only while a block is free, overlaid on the
/// block's payload starting at `chunk_size` bytes past its `Header`.
/// Grounded on `best_fit_allocator.h`'s `free_block` struct.
#[repr(C)]
pub(crate) struct FreeBlock {
  pub header: Header,
  pub left: Option<NonNull<FreeBlock>>,
  pub right: Option<NonNull<FreeBlock>>,
  parent_and_color: usize,
}

impl FreeBlock {
  pub fn parent(&self) -> Option<NonNull<FreeBlock>> {
    NonNull::new((self.parent_and_color & !RED_FLAG) as *mut FreeBlock)
  }

  pub fn is_red(&self) -> bool {
    self.parent_and_color & RED_FLAG != 0
  }

  pub fn is_black(&self) -> bool {
    !self.is_red()
  }

  pub fn set_parent(&mut self, parent: Option<NonNull<FreeBlock>>) {
    let red = self.is_red();
    self.set_parent_and_color(parent, red);
  }

  pub fn set_color_red(&mut self, red: bool) {
    let parent = self.parent();
    self.set_parent_and_color(parent, red);
  }

  pub fn set_parent_and_color(&mut self, parent: Option<NonNull<FreeBlock>>, red: bool) {
    let ptr = parent.map_or(0, |p| p.as_ptr() as usize);
    debug_assert_eq!(ptr & RED_FLAG, 0, "free block address must be at least 2-byte aligned");
    self.parent_and_color = ptr | if red { RED_FLAG } else { 0 };
  }

  /// # Safety
  /// `header` must point at a block currently marked free.
  pub unsafe fn from_header(header: NonNull<Header>) -> NonNull<FreeBlock> {
    header.cast()
  }

  pub fn as_header(this: NonNull<FreeBlock>) -> NonNull<Header> {
    this.cast()
  }
}

/// Size (in bytes) of the fixed quantum every block's header occupies.
/// `max_alignment` must be a power of two `>= 2` (so the free flag/color
/// bit has somewhere to live); every payload pointer is then naturally
/// aligned to `max_alignment`.
pub const fn chunk_size(max_alignment: usize) -> usize {
  align_up(mem::size_of::<Header>(), max_alignment)
}

/// Payload pointer for a block, `chunk` bytes past its header.
pub fn payload_ptr(header: NonNull<Header>, chunk: usize) -> *mut u8 {
  unsafe { (header.as_ptr() as *mut u8).add(chunk) }
}

/// Recovers a block's header from a payload pointer previously produced by
/// [`payload_ptr`] with the same `chunk`.
///
/// # Safety
/// `ptr` must have been returned by `payload_ptr(header, chunk)` for some
/// live `header`.
pub unsafe fn header_from_payload(ptr: *mut u8, chunk: usize) -> NonNull<Header> {
  let raw = unsafe { ptr.sub(chunk) } as *mut Header;
  NonNull::new(raw).expect("payload pointer must not be null")
}

/// The smallest size a free block may have (invariant 7): enough room for
/// the tree-link extension, and at least two chunks so a split never
/// produces a fragment too small to hold its own header plus a non-empty
/// payload.
pub const fn min_free_block(max_alignment: usize) -> usize {
  let chunk = chunk_size(max_alignment);
  let free_block_overhead = crate::align::snap_up_to_increment(mem::size_of::<FreeBlock>(), chunk);
  if free_block_overhead > 2 * chunk {
    free_block_overhead
  } else {
    2 * chunk
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn free_block_extension_fits_within_two_chunks() {
    // Sanity bound used throughout the module: a FreeBlock's extra fields
    // (left/right/parent) must never need more room than two header
    // chunks, or `min_free_block` would have to grow a class of
    // implementations don't expect.
    assert!(mem::size_of::<FreeBlock>() <= 2 * chunk_size(16));
  }

  #[test]
  fn chunk_size_is_multiple_of_max_alignment() {
    for &align in &[2usize, 8, 16, 32, 64] {
      assert_eq!(chunk_size(align) % align, 0);
      assert!(chunk_size(align) >= mem::size_of::<Header>());
    }
  }

  #[test]
  fn min_free_block_is_at_least_two_chunks() {
    for &align in &[8usize, 16, 32] {
      assert!(min_free_block(align) >= 2 * chunk_size(align));
    }
  }
}
