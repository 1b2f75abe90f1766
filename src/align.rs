//! Alignment arithmetic shared by every other module.
//!
//! `max_alignment` is a runtime configuration value chosen at construction
//! rather than a fixed compile-time quantum, so the rounding helpers below
//! are plain `const fn`s parameterized on it.

/// Rounds `value` up to the next multiple of `increment`, which must be a
/// power of two.
///
/// # Examples
///
/// ```
/// use bestfit::align::align_up;
///
/// assert_eq!(align_up(13, 16), 16);
/// assert_eq!(align_up(16, 16), 16);
/// assert_eq!(align_up(17, 16), 32);
/// ```
pub const fn align_up(value: usize, increment: usize) -> usize {
  debug_assert!(increment.is_power_of_two());
  (value + increment - 1) & !(increment - 1)
}

/// Rounds `value` up to the next multiple of `increment`, which need not be
/// a power of two. Used for sizing `free_block_overhead`, which is derived
/// from `chunk_size` and therefore already a power of two in practice, but
/// the source (`best_fit_allocator.h`'s `SnapUpToIncrement`) keeps the two
/// rounding helpers distinct, so this crate does too.
pub const fn snap_up_to_increment(value: usize, increment: usize) -> usize {
  increment * (value / increment + if value % increment == 0 { 0 } else { 1 })
}

/// Returns the alignment implied by `addr`'s trailing zero bits, i.e. the
/// largest power of two that divides it. Mirrors `GetAlignment` in
/// `best_fit_allocator.h`, used only by debug assertions and the corruption
/// checker.
pub fn alignment_of(addr: usize) -> usize {
  if addr == 0 {
    return usize::MAX;
  }
  1usize << addr.trailing_zeros()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn align_up_rounds_to_next_multiple() {
    for i in 0..10usize {
      let expected = 16 * (i + 1);
      for size in (16 * i + 1)..=(16 * (i + 1)) {
        assert_eq!(align_up(size, 16), expected);
      }
    }
  }

  #[test]
  fn align_up_is_identity_on_multiples() {
    for i in 0..8usize {
      assert_eq!(align_up(i * 32, 32), i * 32);
    }
  }

  #[test]
  fn snap_up_to_increment_rounds_partial_chunks() {
    assert_eq!(snap_up_to_increment(1, 32), 32);
    assert_eq!(snap_up_to_increment(32, 32), 32);
    assert_eq!(snap_up_to_increment(33, 32), 64);
  }

  #[test]
  fn alignment_of_reports_trailing_zero_bits() {
    assert_eq!(alignment_of(16), 16);
    assert_eq!(alignment_of(48), 16);
    assert_eq!(alignment_of(8), 8);
    assert_eq!(alignment_of(0), usize::MAX);
  }
}
