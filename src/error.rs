//! Typed errors for the two recoverable failure paths in §7: backend
//! failures at construction/extension time, and corruption detected by the
//! checker. Every other condition in the error table (`InvalidArgument`,
//! `DoubleFree`, `OutOfReserved`) is a programmer error and asserts instead
//! of returning a `Result` — see `core.rs`.

use std::io;

/// Failure reported by a [`crate::backend::MemoryBackend`].
///
/// Per §7, backend failures are fatal: the allocator constructor and
/// extension path propagate this with `?` rather than asserting, so the
/// embedding application decides how to die (log and `std::process::abort`,
/// `eprintln!` and exit, etc.) instead of the crate deciding for it.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
  #[error("failed to reserve {requested} bytes of address space: {source}")]
  Reserve { requested: usize, source: io::Error },

  #[error("failed to commit {requested} bytes at {addr:#x}: {source}")]
  Commit {
    addr: usize,
    requested: usize,
    source: io::Error,
  },
}

/// A structural invariant violated by [`crate::checker::check`].
///
/// Never returned on a success path; §7 treats corruption as an assertion
/// failure, but giving it a named enum lets tests report *which* invariant
/// broke instead of a bare `panic!` message.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CorruptionError {
  #[error("list link reciprocity broken: {0}")]
  ListLinkMismatch(&'static str),

  #[error("byte conservation violated: committed={committed} accounted={accounted}")]
  ByteConservation { committed: usize, accounted: usize },

  #[error("BST ordering violated at node with size {node_size}")]
  BstOrder { node_size: usize },

  #[error("red-black root is not black")]
  RootNotBlack,

  #[error("red node has a red child")]
  RedRedViolation,

  #[error("black-height differs across root-to-null paths")]
  BlackHeightMismatch,

  #[error("tree node/parent link mismatch")]
  TreeLinkMismatch,

  #[error("tree and list disagree on the free-block set")]
  TreeListMismatch,

  #[error("duplicate node found in the tree")]
  DuplicateTreeNode,

  #[error("block at {addr:#x} is not tag-bit safe: trailing-zero alignment < 2")]
  MisalignedBlock { addr: usize },
}
