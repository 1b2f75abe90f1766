//! Size-indexed red-black tree of free blocks (§4.3).
//!
//! Keyed on block size with duplicates placed in the right subtree (a
//! standard "≥" BST descent). Ported structurally from
//! `best_fit_allocator.h`'s `AddNode`/`RemoveNode`/`FindBestFit`/
//! `LeftRotate`/`RightRotate`/`CanChangeNodeSize`/`SwapNodes`.
//!
//! Two notes on the deletion fix-up's relationship to the C++ source,
//! recorded here and in `DESIGN.md`:
//! - §9 Open Question 3: the case 5 → case 6 `goto` is replaced with a
//!   `fixup_case6` helper called from both sites.
//! - The source re-reads `sibling = dbParent->right` after *both* the
//!   left-rotate and right-rotate branches of case 4, which looks like a
//!   mirroring slip (the right-rotate side would want `dbParent->left`).
//!   It's harmless either way: nothing downstream of that assignment in
//!   the same iteration uses `sibling` before the loop's `goto`/`continue`
//!   re-enters the top and recomputes it from `dbParent`/`isLeft`. This
//!   port's loop recomputes `sibling` fresh each iteration from `parent`/
//!   `is_left` (neither of which case 4 changes), so it never carries a
//!   stale `sibling` across the retry and the question doesn't arise.
//!
//! The source's `doubleBlack` pointer is initialized to `nullptr` and is
//! only ever reassigned inside case 3's upward promotion — so the check
//! immediately after the case-1 return (`if (doubleBlack && ...) { ...
//! return; }`) always sees a null `doubleBlack` and can never fire. This
//! port omits translating that dead check; see `double_black`'s init below.
//!
//! The source's `dbSibling` bookkeeping variable is write-only (assigned,
//! never read) throughout `RemoveNode`; this port doesn't carry it.

use std::ptr::NonNull;

use crate::block::FreeBlock;

pub(crate) struct FreeTree {
  root: Option<NonNull<FreeBlock>>,
}

impl FreeTree {
  pub fn new() -> Self {
    Self { root: None }
  }

  pub fn root(&self) -> Option<NonNull<FreeBlock>> {
    self.root
  }

  /// Smallest free block with `size >= size`, or `None`. Grounded on
  /// `FindBestFit`: descend right while the current node is too small,
  /// otherwise record it as a candidate and descend left.
  pub fn best_fit(&self, size: usize) -> Option<NonNull<FreeBlock>> {
    let mut current = self.root;
    let mut best = None;

    while let Some(node) = current {
      let node_size = unsafe { (*node.as_ptr()).header.size };
      if node_size < size {
        current = unsafe { (*node.as_ptr()).right };
      } else {
        best = Some(node);
        current = unsafe { (*node.as_ptr()).left };
      }
    }

    best
  }

  /// The largest free block in the tree, or `None` if it's empty.
  pub fn largest(&self) -> Option<NonNull<FreeBlock>> {
    let mut current = self.root?;
    while let Some(right) = unsafe { (*current.as_ptr()).right } {
      current = right;
    }
    Some(current)
  }

  /// # Safety
  /// `block` must not already be present in this (or any) tree.
  pub unsafe fn insert(&mut self, block: NonNull<FreeBlock>) {
    unsafe {
      (*block.as_ptr()).left = None;
      (*block.as_ptr()).right = None;

      let Some(root) = self.root else {
        (*block.as_ptr()).set_parent_and_color(None, false);
        self.root = Some(block);
        return;
      };

      let size = (*block.as_ptr()).header.size;
      let mut current = root;
      loop {
        let cur = current.as_ptr();
        if size >= (*cur).header.size {
          match (*cur).right {
            Some(right) => current = right,
            None => {
              (*cur).right = Some(block);
              (*block.as_ptr()).set_parent(Some(current));
              break;
            }
          }
        } else {
          match (*cur).left {
            Some(left) => current = left,
            None => {
              (*cur).left = Some(block);
              (*block.as_ptr()).set_parent(Some(current));
              break;
            }
          }
        }
      }

      (*block.as_ptr()).set_color_red(true);
      self.fixup_insert(block);
    }
  }

  unsafe fn fixup_insert(&mut self, mut current: NonNull<FreeBlock>) {
    unsafe {
      loop {
        let Some(parent) = (*current.as_ptr()).parent() else {
          break;
        };
        if (*parent.as_ptr()).is_black() {
          break;
        }

        let grandparent = match (*parent.as_ptr()).parent() {
          Some(gp) => gp,
          None => return,
        };

        let parent_is_left = (*grandparent.as_ptr()).left == Some(parent);
        let uncle = if parent_is_left {
          (*grandparent.as_ptr()).right
        } else {
          (*grandparent.as_ptr()).left
        };

        if let Some(u) = uncle {
          if (*u.as_ptr()).is_red() {
            (*parent.as_ptr()).set_color_red(false);
            (*u.as_ptr()).set_color_red(false);
            if self.root != Some(grandparent) {
              (*grandparent.as_ptr()).set_color_red(true);
            }
            current = grandparent;
            continue;
          }
        }

        let new_is_left = (*parent.as_ptr()).left == Some(current);
        current = parent;
        if parent_is_left {
          if !new_is_left {
            self.left_rotate(current);
            current = (*current.as_ptr()).parent().unwrap();
          }
          self.right_rotate((*current.as_ptr()).parent().unwrap());
        } else {
          if new_is_left {
            self.right_rotate(current);
            current = (*current.as_ptr()).parent().unwrap();
          }
          self.left_rotate((*current.as_ptr()).parent().unwrap());
        }

        if let Some(l) = (*current.as_ptr()).left {
          (*l.as_ptr()).set_color_red(true);
        }
        if let Some(r) = (*current.as_ptr()).right {
          (*r.as_ptr()).set_color_red(true);
        }
        (*current.as_ptr()).set_color_red(false);
        return;
      }
    }
  }

  unsafe fn left_rotate(&mut self, node: NonNull<FreeBlock>) {
    unsafe {
      let rotator = (*node.as_ptr()).right.expect("left_rotate requires a right child");
      (*node.as_ptr()).right = (*rotator.as_ptr()).left;
      if let Some(l) = (*rotator.as_ptr()).left {
        (*l.as_ptr()).set_parent(Some(node));
      }
      (*rotator.as_ptr()).set_parent((*node.as_ptr()).parent());

      if self.root == Some(node) {
        self.root = Some(rotator);
      } else {
        let parent = (*node.as_ptr()).parent().unwrap();
        if (*parent.as_ptr()).left == Some(node) {
          (*parent.as_ptr()).left = Some(rotator);
        } else {
          (*parent.as_ptr()).right = Some(rotator);
        }
      }

      (*rotator.as_ptr()).left = Some(node);
      (*node.as_ptr()).set_parent(Some(rotator));
    }
  }

  unsafe fn right_rotate(&mut self, node: NonNull<FreeBlock>) {
    unsafe {
      let rotator = (*node.as_ptr()).left.expect("right_rotate requires a left child");
      (*node.as_ptr()).left = (*rotator.as_ptr()).right;
      if let Some(r) = (*rotator.as_ptr()).right {
        (*r.as_ptr()).set_parent(Some(node));
      }
      (*rotator.as_ptr()).set_parent((*node.as_ptr()).parent());

      if self.root == Some(node) {
        self.root = Some(rotator);
      } else {
        let parent = (*node.as_ptr()).parent().unwrap();
        if (*parent.as_ptr()).right == Some(node) {
          (*parent.as_ptr()).right = Some(rotator);
        } else {
          (*parent.as_ptr()).left = Some(rotator);
        }
      }

      (*rotator.as_ptr()).right = Some(node);
      (*node.as_ptr()).set_parent(Some(rotator));
    }
  }

  /// Returns whether `node` could keep occupying its current tree slot if
  /// its size changed to `new_size`, without a remove-then-insert. Mirrors
  /// `CanChangeNodeSize`: only ever true for a childless node whose new
  /// size still respects the BST ordering against its parent and
  /// grandparent.
  pub fn can_change_size_in_place(&self, node: NonNull<FreeBlock>, new_size: usize) -> bool {
    unsafe {
      let n = node.as_ptr();
      if (*n).left.is_some() || (*n).right.is_some() {
        return false;
      }

      let Some(parent) = (*n).parent() else {
        return true;
      };
      let p = parent.as_ptr();
      let is_left = (*p).left == Some(node);

      if is_left {
        if new_size > (*p).header.size {
          return false;
        }
      } else if new_size <= (*p).header.size {
        return false;
      }

      let Some(grandparent) = (*p).parent() else {
        return true;
      };
      let g = grandparent.as_ptr();

      if is_left {
        (*g).left == Some(parent) && new_size > (*g).header.size
      } else {
        (*g).right == Some(parent) && new_size < (*g).header.size
      }
    }
  }

  /// Whether `new` (not yet in the tree) could take over `old`'s tree slot
  /// in place, i.e. whether `old`'s slot tolerates `new`'s size.
  pub fn can_swap(&self, old: NonNull<FreeBlock>, new: NonNull<FreeBlock>) -> bool {
    let new_size = unsafe { (*new.as_ptr()).header.size };
    self.can_change_size_in_place(old, new_size)
  }

  /// Replaces `old` with `new` in the tree structure. `old` must be a leaf
  /// (no children) — callers check this via `can_swap`/
  /// `can_change_size_in_place` first.
  ///
  /// # Safety
  /// `old` must be in this tree and have no children; `new` must not be.
  pub unsafe fn swap(&mut self, old: NonNull<FreeBlock>, new: NonNull<FreeBlock>) {
    unsafe {
      debug_assert!((*old.as_ptr()).left.is_none() && (*old.as_ptr()).right.is_none());

      if let Some(parent) = (*old.as_ptr()).parent() {
        if (*parent.as_ptr()).left == Some(old) {
          (*parent.as_ptr()).left = Some(new);
        } else {
          (*parent.as_ptr()).right = Some(new);
        }
      }

      if self.root == Some(old) {
        self.root = Some(new);
      }

      let red = (*old.as_ptr()).is_red();
      (*new.as_ptr()).set_parent_and_color((*old.as_ptr()).parent(), red);
      (*new.as_ptr()).left = None;
      (*new.as_ptr()).right = None;
    }
  }

  /// # Safety
  /// `block` must currently be present in this tree.
  pub unsafe fn remove(&mut self, block: NonNull<FreeBlock>) {
    unsafe {
      let mut db_parent: Option<NonNull<FreeBlock>> = None;
      let mut db_is_left = false;
      let mut to_replace_was_leaf = false;

      let to_replace: Option<NonNull<FreeBlock>>;

      match ((*block.as_ptr()).left, (*block.as_ptr()).right) {
        (Some(left), Some(_right)) => {
          // Find the in-order predecessor: rightmost node of the left subtree.
          let mut candidate = left;
          if let Some(mut r) = (*candidate.as_ptr()).right {
            loop {
              candidate = r;
              match (*candidate.as_ptr()).right {
                Some(next) => r = next,
                None => break,
              }
            }

            to_replace_was_leaf = (*candidate.as_ptr()).left.is_none() && (*candidate.as_ptr()).right.is_none();

            let candidate_parent = (*candidate.as_ptr()).parent().unwrap();
            db_parent = Some(candidate_parent);
            db_is_left = false;

            (*candidate_parent.as_ptr()).right = (*candidate.as_ptr()).left;
            if let Some(cl) = (*candidate.as_ptr()).left {
              (*cl.as_ptr()).set_parent(Some(candidate_parent));
            }

            (*candidate.as_ptr()).set_parent((*block.as_ptr()).parent());
            (*candidate.as_ptr()).right = (*block.as_ptr()).right;
            (*(*block.as_ptr()).right.unwrap().as_ptr()).set_parent(Some(candidate));
            (*candidate.as_ptr()).left = Some(left);
            (*left.as_ptr()).set_parent(Some(candidate));
          } else {
            to_replace_was_leaf = (*candidate.as_ptr()).left.is_none() && (*candidate.as_ptr()).right.is_none();

            db_parent = Some(candidate);
            db_is_left = true;

            (*candidate.as_ptr()).right = (*block.as_ptr()).right;
            (*(*block.as_ptr()).right.unwrap().as_ptr()).set_parent(Some(candidate));
            (*candidate.as_ptr()).set_parent((*block.as_ptr()).parent());
          }
          to_replace = Some(candidate);
        }
        (Some(left), None) => {
          db_parent = (*block.as_ptr()).parent();
          db_is_left = true;
          to_replace_was_leaf = (*left.as_ptr()).left.is_none() && (*left.as_ptr()).right.is_none();
          (*left.as_ptr()).set_parent((*block.as_ptr()).parent());
          to_replace = Some(left);
        }
        (None, Some(right)) => {
          db_parent = (*block.as_ptr()).parent();
          db_is_left = false;
          to_replace_was_leaf = (*right.as_ptr()).left.is_none() && (*right.as_ptr()).right.is_none();
          (*right.as_ptr()).set_parent((*block.as_ptr()).parent());
          to_replace = Some(right);
        }
        (None, None) => {
          let parent = (*block.as_ptr()).parent();
          db_parent = parent;
          db_is_left = parent.is_some_and(|p| (*p.as_ptr()).left == Some(block));
          to_replace = None;
        }
      }

      if self.root == Some(block) {
        self.root = to_replace;
      } else {
        let parent = (*block.as_ptr()).parent().unwrap();
        if (*parent.as_ptr()).left == Some(block) {
          (*parent.as_ptr()).left = to_replace;
        } else {
          (*parent.as_ptr()).right = to_replace;
        }
      }

      let block_was_red = (*block.as_ptr()).is_red();

      // Case 1: removing a red leaf (or promoting a red-leaf replacement)
      // needs no fix-up.
      if (to_replace.is_none() && block_was_red)
        || (to_replace.is_some_and(|r| (*r.as_ptr()).is_red()) && to_replace_was_leaf)
      {
        if !block_was_red {
          (*to_replace.unwrap().as_ptr()).set_color_red(false);
        }
        return;
      }

      if let Some(r) = to_replace {
        (*r.as_ptr()).set_color_red(block_was_red);
      }

      // `double_black` tracks a *promoted ancestor* carrying the extra
      // unit of black height, not the structural replacement node — it
      // starts at `None` even when `to_replace` is a real (non-leaf)
      // node, and only becomes `Some` via the case-3 promotion below.
      // `db_parent`/`db_is_left` already describe the deficient slot
      // (`to_replace`'s position, or a phantom nil if `to_replace` is
      // `None`), so the fix-up loop works identically either way.
      let mut double_black: Option<NonNull<FreeBlock>> = None;

      loop {
        if double_black == self.root {
          if let Some(db) = double_black {
            (*db.as_ptr()).set_color_red(false);
          }
          break;
        }

        let is_left = match double_black {
          Some(db) => (*db_parent.unwrap().as_ptr()).left == Some(db),
          None => db_is_left,
        };

        let parent = db_parent.unwrap();
        let sibling = if is_left { (*parent.as_ptr()).right } else { (*parent.as_ptr()).left };

        let sibling_is_black_with_black_children = match sibling {
          None => true,
          Some(s) => {
            (*s.as_ptr()).is_black()
              && (*s.as_ptr()).left.is_none_or(|l| (*l.as_ptr()).is_black())
              && (*s.as_ptr()).right.is_none_or(|r| (*r.as_ptr()).is_black())
          }
        };

        if sibling_is_black_with_black_children {
          // Case 3: recolor the sibling red and push the double-black up.
          if let Some(s) = sibling {
            (*s.as_ptr()).set_color_red(true);
          }

          if (*parent.as_ptr()).is_black() {
            double_black = Some(parent);
            db_parent = (*parent.as_ptr()).parent();
            if let Some(new_parent) = db_parent {
              db_is_left = (*new_parent.as_ptr()).left == Some(parent);
            }
            continue;
          } else {
            (*parent.as_ptr()).set_color_red(false);
            break;
          }
        }

        let sibling = sibling.unwrap();

        if (*sibling.as_ptr()).is_red() {
          // Case 4: red sibling — rotate it into the parent's place and
          // recolor, then re-derive the (now black) sibling and retry.
          let sibling_color_was_red = true;
          let parent_was_red = (*parent.as_ptr()).is_red();
          (*sibling.as_ptr()).set_color_red(parent_was_red);
          (*parent.as_ptr()).set_color_red(sibling_color_was_red);

          if is_left {
            self.left_rotate(parent);
          } else {
            self.right_rotate(parent);
          }
          continue;
        }

        let (far_niece, near_niece) = if is_left {
          ((*sibling.as_ptr()).right, (*sibling.as_ptr()).left)
        } else {
          ((*sibling.as_ptr()).left, (*sibling.as_ptr()).right)
        };

        if (*sibling.as_ptr()).is_black()
          && far_niece.is_none_or(|f| (*f.as_ptr()).is_black())
          && near_niece.is_some_and(|n| (*n.as_ptr()).is_red())
        {
          // Case 5: black sibling, red near niece, black (or absent) far
          // niece — rotate the niece into the sibling's place so case 6
          // applies.
          let near_niece = near_niece.unwrap();
          (*near_niece.as_ptr()).set_color_red(false);
          (*sibling.as_ptr()).set_color_red(true);

          if is_left {
            self.right_rotate(sibling);
          } else {
            self.left_rotate(sibling);
          }

          let new_sibling = if is_left {
            (*parent.as_ptr()).right.unwrap()
          } else {
            (*parent.as_ptr()).left.unwrap()
          };
          let new_far_niece = if is_left {
            (*new_sibling.as_ptr()).right
          } else {
            (*new_sibling.as_ptr()).left
          };

          self.fixup_case6(is_left, parent, new_sibling, new_far_niece, double_black);
          break;
        }

        // Case 6: black sibling, red far niece.
        debug_assert!((*sibling.as_ptr()).is_black() && far_niece.is_some_and(|f| (*f.as_ptr()).is_red()));
        self.fixup_case6(is_left, parent, sibling, far_niece, double_black);
        break;
      }
    }
  }

  /// Shared tail of RB-deletion cases 5 and 6: swap sibling/parent colors,
  /// rotate the parent, and blacken the double-black node and far niece.
  /// Replaces the source's `goto case6` (§9 Open Question 3).
  unsafe fn fixup_case6(
    &mut self,
    is_left: bool,
    parent: NonNull<FreeBlock>,
    sibling: NonNull<FreeBlock>,
    far_niece: Option<NonNull<FreeBlock>>,
    double_black: Option<NonNull<FreeBlock>>,
  ) {
    unsafe {
      let sibling_was_red = (*sibling.as_ptr()).is_red();
      let parent_was_red = (*parent.as_ptr()).is_red();
      (*sibling.as_ptr()).set_color_red(parent_was_red);
      (*parent.as_ptr()).set_color_red(sibling_was_red);

      if is_left {
        self.left_rotate(parent);
      } else {
        self.right_rotate(parent);
      }

      if let Some(db) = double_black {
        (*db.as_ptr()).set_color_red(false);
      }
      if let Some(f) = far_niece {
        (*f.as_ptr()).set_color_red(false);
      }
    }
  }
}
