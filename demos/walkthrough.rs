//! Reproduces an end-to-end allocate/free/reallocate scenario, narrated
//! step by step through `log`. Run with `RUST_LOG=trace` to see every
//! split/coalesce/commit decision underneath the summary lines this prints.
//!
//! Same "step 1 / step 2 / ..." narrative shape as a plain demo binary
//! pausing on stdin for external `pmap` inspection would use, but driving
//! a real program instead — this allocator's state is meant to be read
//! back from `stats()`/the checker, not poked at from outside the process.

use bestfit::backend::MmapBackend;
use bestfit::core::{AllocSource, BestFitAllocator};
use bestfit::{checker, error};

fn here(line: u32) -> AllocSource {
  AllocSource { file: "walkthrough", line }
}

fn main() -> Result<(), error::BackendError> {
  env_logger::init();

  let mut arena = BestFitAllocator::new(MmapBackend::new(), 1 << 20, 16)?;
  log::info!("step 0: fresh arena, {:?}", arena.stats());

  let p1 = arena.allocate(1000, 8, here(line!()))?;
  log::info!("step 1: allocate(1000, 8) -> {p1:p}, {:?}", arena.stats());
  checker::debug_check(&arena);

  let p2 = arena.allocate(2000, 8, here(line!()))?;
  log::info!("step 2: allocate(2000, 8) -> {p2:p}, {:?}", arena.stats());
  checker::debug_check(&arena);

  arena.free(p1, here(line!()));
  log::info!("step 3: free(p1), {:?}", arena.stats());
  checker::debug_check(&arena);

  let p1b = arena.allocate(500, 8, here(line!()))?;
  log::info!("step 4: allocate(500, 8) -> {p1b:p} (best fit reuses freed region), {:?}", arena.stats());
  checker::debug_check(&arena);

  arena.free(p2, here(line!()));
  log::info!("step 5: free(p2), coalesces into one free block, {:?}", arena.stats());
  checker::debug_check(&arena);

  match arena.reallocate(p1b, 3000, here(line!())) {
    Some(grown) => log::info!("step 6: reallocate(p1b, 3000) grew in place -> {grown:p}, {:?}", arena.stats()),
    None => log::warn!("step 6: reallocate(p1b, 3000) had no room to grow in place"),
  }
  checker::debug_check(&arena);

  log::info!("step 7: requesting far more than the reservation panics with OutOfReserved");
  let huge = 2usize * 1024 * 1024 * 1024;
  let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| arena.allocate(huge, 8, here(line!()))));
  assert!(result.is_err(), "expected the oversized request to assert OutOfReserved");
  log::info!("confirmed: oversized allocation asserted as expected");

  Ok(())
}
