//! Read-only structural validator (§4.5, §8). Exposed for tests and for
//! debug-build self-checks; never invoked on a production success path.
//!
//! Grounded on `best_fit_allocator.h`'s `DetectCorruption` and its
//! `Validate*` family (`ValidateFreeListLinks`, `ValidateFreeListSize`,
//! `ValidateBST`, `ValidateRedBlackProperties`, `ValidateBSTNodeLinks`,
//! `ValidateFreeNodesInTree`, `ValidateBSTUniqueness`), each folded into one
//! of the checks below.

use std::collections::HashSet;

use crate::align::alignment_of;
use crate::backend::MemoryBackend;
use crate::block::{FreeBlock, chunk_size};
use crate::core::BestFitAllocator;
use crate::error::CorruptionError;

/// Runs every structural check in §4.5 against `arena`, short-circuiting
/// on the first violation found.
pub fn check<B: MemoryBackend>(arena: &BestFitAllocator<B>) -> Result<(), CorruptionError> {
  check_list_links(arena)?;
  check_byte_conservation(arena)?;
  check_block_alignment(arena)?;
  check_bst_order(arena)?;
  check_red_black_properties(arena)?;
  check_tree_links(arena)?;
  check_tree_list_agreement(arena)?;
  Ok(())
}

/// `assert!`s on the first violation instead of returning one; the
/// optional debug-build self-check §4.5 mentions.
pub fn debug_check<B: MemoryBackend>(arena: &BestFitAllocator<B>) {
  if let Err(e) = check(arena) {
    panic!("allocator corruption detected: {e}");
  }
}

fn check_list_links<B: MemoryBackend>(arena: &BestFitAllocator<B>) -> Result<(), CorruptionError> {
  let list = arena.list();

  if let Some(first) = list.first() {
    if unsafe { (*first.as_ptr()).prev() }.is_some() {
      return Err(CorruptionError::ListLinkMismatch("first block has a predecessor"));
    }
  }
  if let Some(last) = list.last() {
    if unsafe { (*last.as_ptr()).next }.is_some() {
      return Err(CorruptionError::ListLinkMismatch("last block has a successor"));
    }
  }

  let mut current = list.first();
  while let Some(block) = current {
    let next = unsafe { (*block.as_ptr()).next };
    if let Some(n) = next {
      if unsafe { (*n.as_ptr()).prev() } != Some(block) {
        return Err(CorruptionError::ListLinkMismatch("next.prev != self"));
      }
    }
    current = next;
  }

  Ok(())
}

fn check_byte_conservation<B: MemoryBackend>(arena: &BestFitAllocator<B>) -> Result<(), CorruptionError> {
  let chunk = chunk_size(arena.max_alignment());
  let mut accounted = 0usize;
  let mut current = arena.list().first();

  while let Some(block) = current {
    accounted += chunk + unsafe { (*block.as_ptr()).size };
    current = unsafe { (*block.as_ptr()).next };
  }

  if accounted != arena.committed() {
    return Err(CorruptionError::ByteConservation {
      committed: arena.committed(),
      accounted,
    });
  }

  Ok(())
}

/// Every header address steals its low bit for the free flag (and, once
/// free, its `FreeBlock` extension steals another for the red/black color)
/// — see `block.rs`'s `set_prev_and_free`/`set_parent_and_color`. Confirms
/// the arena never committed a block at an address too poorly aligned for
/// that tagging to be safe.
fn check_block_alignment<B: MemoryBackend>(arena: &BestFitAllocator<B>) -> Result<(), CorruptionError> {
  let mut current = arena.list().first();
  while let Some(block) = current {
    let addr = block.as_ptr() as usize;
    if alignment_of(addr) < 2 {
      return Err(CorruptionError::MisalignedBlock { addr });
    }
    current = unsafe { (*block.as_ptr()).next };
  }
  Ok(())
}

fn check_bst_order<B: MemoryBackend>(arena: &BestFitAllocator<B>) -> Result<(), CorruptionError> {
  fn visit(node: Option<std::ptr::NonNull<FreeBlock>>, lower: usize, upper: usize) -> Result<(), CorruptionError> {
    let Some(node) = node else { return Ok(()) };
    let size = unsafe { (*node.as_ptr()).header.size };

    if size < lower || size > upper {
      return Err(CorruptionError::BstOrder { node_size: size });
    }

    visit(unsafe { (*node.as_ptr()).left }, lower, size)?;
    visit(unsafe { (*node.as_ptr()).right }, size, upper)
  }

  visit(arena.tree().root(), 0, usize::MAX)
}

fn check_red_black_properties<B: MemoryBackend>(arena: &BestFitAllocator<B>) -> Result<(), CorruptionError> {
  let root = arena.tree().root();

  if let Some(root) = root {
    if unsafe { (*root.as_ptr()).is_red() } {
      return Err(CorruptionError::RootNotBlack);
    }
  }

  fn black_height(node: Option<std::ptr::NonNull<FreeBlock>>) -> Result<usize, CorruptionError> {
    let Some(node) = node else { return Ok(1) };

    if unsafe { (*node.as_ptr()).is_red() } {
      let left_red = unsafe { (*node.as_ptr()).left }.is_some_and(|l| unsafe { (*l.as_ptr()).is_red() });
      let right_red = unsafe { (*node.as_ptr()).right }.is_some_and(|r| unsafe { (*r.as_ptr()).is_red() });
      if left_red || right_red {
        return Err(CorruptionError::RedRedViolation);
      }
    }

    let left = black_height(unsafe { (*node.as_ptr()).left })?;
    let right = black_height(unsafe { (*node.as_ptr()).right })?;
    if left != right {
      return Err(CorruptionError::BlackHeightMismatch);
    }

    Ok(left + if unsafe { (*node.as_ptr()).is_black() } { 1 } else { 0 })
  }

  black_height(root).map(|_| ())
}

fn check_tree_links<B: MemoryBackend>(arena: &BestFitAllocator<B>) -> Result<(), CorruptionError> {
  fn visit(node: Option<std::ptr::NonNull<FreeBlock>>) -> Result<(), CorruptionError> {
    let Some(node) = node else { return Ok(()) };

    if let Some(left) = unsafe { (*node.as_ptr()).left } {
      if unsafe { (*left.as_ptr()).parent() } != Some(node) {
        return Err(CorruptionError::TreeLinkMismatch);
      }
    }
    if let Some(right) = unsafe { (*node.as_ptr()).right } {
      if unsafe { (*right.as_ptr()).parent() } != Some(node) {
        return Err(CorruptionError::TreeLinkMismatch);
      }
    }

    visit(unsafe { (*node.as_ptr()).left })?;
    visit(unsafe { (*node.as_ptr()).right })
  }

  visit(arena.tree().root())
}

fn check_tree_list_agreement<B: MemoryBackend>(arena: &BestFitAllocator<B>) -> Result<(), CorruptionError> {
  let mut tree_nodes = HashSet::new();

  fn collect(node: Option<std::ptr::NonNull<FreeBlock>>, out: &mut HashSet<usize>) -> Result<(), CorruptionError> {
    let Some(node) = node else { return Ok(()) };
    if !out.insert(node.as_ptr() as usize) {
      return Err(CorruptionError::DuplicateTreeNode);
    }
    collect(unsafe { (*node.as_ptr()).left }, out)?;
    collect(unsafe { (*node.as_ptr()).right }, out)
  }

  collect(arena.tree().root(), &mut tree_nodes)?;

  let mut list_free_blocks = HashSet::new();
  let mut current = arena.list().first();
  while let Some(block) = current {
    if unsafe { (*block.as_ptr()).is_free() } {
      list_free_blocks.insert(block.as_ptr() as usize);
    }
    current = unsafe { (*block.as_ptr()).next };
  }

  if tree_nodes != list_free_blocks {
    return Err(CorruptionError::TreeListMismatch);
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::backend::MallocBackend;
  use crate::core::{AllocSource, BestFitAllocator};

  const ALIGN: usize = 16;

  fn new_allocator(reservation: usize) -> BestFitAllocator<MallocBackend> {
    BestFitAllocator::new(MallocBackend::new(), reservation, ALIGN).unwrap()
  }

  fn src() -> AllocSource {
    AllocSource::UNKNOWN
  }

  #[test]
  fn fresh_arena_passes_every_check() {
    let arena = new_allocator(1 << 16);
    check(&arena).unwrap();
  }

  #[test]
  fn arena_after_mixed_alloc_free_traffic_passes_every_check() {
    let mut arena = new_allocator(1 << 16);
    let a = arena.allocate(64, 8, src()).unwrap();
    let b = arena.allocate(128, 8, src()).unwrap();
    let c = arena.allocate(32, 8, src()).unwrap();
    arena.free(b, src());
    let _d = arena.allocate(96, 8, src()).unwrap();
    arena.free(a, src());
    arena.free(c, src());
    check(&arena).unwrap();
  }

  /// Frees two differently-sized, non-adjacent blocks so the tree ends up
  /// with a root and at least one child node to corrupt.
  fn two_free_blocks_of_different_size() -> BestFitAllocator<MallocBackend> {
    let mut arena = new_allocator(1 << 16);
    let a = arena.allocate(64, 8, src()).unwrap();
    let _b = arena.allocate(128, 8, src()).unwrap();
    let c = arena.allocate(256, 8, src()).unwrap();
    arena.free(a, src());
    arena.free(c, src());
    arena
  }

  #[test]
  fn corrupted_tree_link_is_detected() {
    let arena = two_free_blocks_of_different_size();

    let root = arena.tree().root().expect("two free blocks after the frees above");
    let child = unsafe { (*root.as_ptr()).left.or((*root.as_ptr()).right) }.expect("root has one child");
    unsafe {
      (*child.as_ptr()).set_parent(None);
    }

    let err = check(&arena).unwrap_err();
    assert!(matches!(err, CorruptionError::TreeLinkMismatch));
  }

  #[test]
  #[should_panic(expected = "allocator corruption detected")]
  fn debug_check_panics_on_corruption() {
    let arena = two_free_blocks_of_different_size();

    let root = arena.tree().root().unwrap();
    let child = unsafe { (*root.as_ptr()).left.or((*root.as_ptr()).right) }.expect("root has one child");
    unsafe {
      (*child.as_ptr()).set_parent(None);
    }

    debug_check(&arena);
  }
}
