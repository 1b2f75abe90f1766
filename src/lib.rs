//! # bestfit — a best-fit coalescing heap allocator
//!
//! A general-purpose heap allocator over a single contiguous virtual-address
//! reservation, built from the two structures a best-fit strategy needs:
//!
//! ```text
//!   Address-ordered list (physical adjacency, for coalescing):
//!
//!   ┌─────────┬─────────┬──────────┬─────────┬──────────────────┐
//!   │ busy A  │ free B  │  busy C  │ free D  │   ... reserved    │
//!   └─────────┴─────────┴──────────┴─────────┴──────────────────┘
//!   first                                    last         committed
//!
//!   Size-keyed red-black tree (best fit, over the free blocks only):
//!
//!                 (D)
//!                /   \
//!             (B)     ...
//! ```
//!
//! Every block carries a tagged header: the *free* flag and, for free
//! blocks, the tree's red/black *color* bit are stolen from the low-order
//! bit of a pointer field, which works because every header address is
//! `chunk_size`-aligned and therefore has spare zero bits at the bottom.
//!
//! ## Crate structure
//!
//! ```text
//!   bestfit
//!   ├── align      - alignment/rounding arithmetic
//!   ├── block      - tagged Header/FreeBlock records, chunk sizing
//!   ├── list       - address-ordered doubly-linked block list
//!   ├── tree       - size-indexed red-black tree of free blocks
//!   ├── backend    - MemoryBackend trait, MmapBackend, MallocBackend
//!   ├── core       - BestFitAllocator: allocate/free/reallocate
//!   ├── checker    - structural invariant validator
//!   ├── mutex      - Locked<B>: CAS spin lock wrapper
//!   ├── tracking   - Tracked<A>: leak-tracking wrapper
//!   ├── slab       - SlabAllocator<A>: fixed-chunk allocator
//!   └── error      - BackendError, CorruptionError
//! ```
//!
//! ## Quick start
//!
//! ```
//! use bestfit::backend::MallocBackend;
//! use bestfit::core::{AllocSource, BestFitAllocator};
//!
//! let mut arena = BestFitAllocator::new(MallocBackend::new(), 1 << 20, 16).unwrap();
//! let source = AllocSource { file: file!(), line: line!() };
//!
//! let ptr = arena.allocate(1000, 8, source).unwrap();
//! unsafe { *ptr = 42 };
//!
//! arena.free(ptr, source);
//! ```
//!
//! ## Safety
//!
//! This crate manages raw memory directly: allocate/free/reallocate return
//! and consume raw pointers, and misuse (double-free, use-after-free,
//! writing past an allocation's rounded size) is undefined behavior, same
//! as any allocator. The core is single-threaded; share it across threads
//! through [`mutex::Locked`].

pub mod align;
pub(crate) mod block;
pub(crate) mod list;
pub(crate) mod tree;

pub mod backend;
pub mod checker;
pub mod core;
pub mod error;
pub mod mutex;
pub mod slab;
pub mod tracking;

pub use core::{AllocSource, Allocator, ArenaStats, BestFitAllocator};
pub use error::{BackendError, CorruptionError};
pub use mutex::Locked;
pub use slab::SlabAllocator;
pub use tracking::Tracked;
