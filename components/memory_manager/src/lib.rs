//! Memory Manager - budgeted allocation for embedded interpreters
//!
//! This component provides:
//! - [`BoundedAllocator`], a byte budget in front of the global allocator
//! - [`lua_alloc`], the interpreter's single allocation entry point
//! - [`MemoryStats`], a snapshot of an allocator's accounting
//!
//! Every interpreter instance owns exactly one allocator. The interpreter is
//! single threaded, so accounting uses plain cells and the allocator is
//! neither `Send` nor `Sync`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod allocator;
pub mod stats;

pub use allocator::{lua_alloc, BoundedAllocator, ALIGNMENT};
pub use stats::MemoryStats;
