//! The bounded allocator and the interpreter's allocation entry point.
//!
//! The interpreter routes every allocation, resize and free through a single
//! `realloc`-style function. [`BoundedAllocator::reallocate`] implements that
//! contract against a fixed byte budget:
//!
//! | request                    | effect                                        |
//! |----------------------------|-----------------------------------------------|
//! | `new_size == 0`            | free; refunds `old_size`; never fails         |
//! | `ptr` null, `new_size > 0` | fresh block; refused if larger than budget    |
//! | `ptr` non-null             | resize; growth refused if it exceeds budget   |
//!
//! A refused request returns null and leaves the budget untouched. Null is
//! the only failure signal; nothing here panics or unwinds.

use crate::stats::MemoryStats;
use std::alloc::{self, Layout};
use std::cell::Cell;
use std::ffi::c_void;
use std::ptr;

/// Alignment of every block handed to the interpreter.
///
/// Matches what the platform `malloc` guarantees on 64-bit targets, which is
/// what the interpreter assumes.
pub const ALIGNMENT: usize = 16;

/// A byte budget in front of the global allocator.
///
/// # Examples
///
/// ```
/// use memory_manager::BoundedAllocator;
///
/// let allocator = BoundedAllocator::new(1024);
/// unsafe {
///     let p = allocator.reallocate(std::ptr::null_mut(), 0, 100);
///     assert!(!p.is_null());
///     assert_eq!(allocator.remaining(), 924);
///
///     // Over budget: refused, nothing changes.
///     assert!(allocator.reallocate(std::ptr::null_mut(), 0, 2048).is_null());
///     assert_eq!(allocator.remaining(), 924);
///
///     allocator.reallocate(p, 100, 0);
///     assert_eq!(allocator.remaining(), 1024);
/// }
/// ```
#[derive(Debug)]
pub struct BoundedAllocator {
    limit: usize,
    remaining: Cell<usize>,
    peak: Cell<usize>,
    refused: Cell<u64>,
}

impl BoundedAllocator {
    /// Creates an allocator with a budget of `limit` bytes.
    pub fn new(limit: usize) -> Self {
        BoundedAllocator {
            limit,
            remaining: Cell::new(limit),
            peak: Cell::new(0),
            refused: Cell::new(0),
        }
    }

    /// Configured budget in bytes.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Bytes still available.
    pub fn remaining(&self) -> usize {
        self.remaining.get()
    }

    /// Bytes currently handed out.
    pub fn in_use(&self) -> usize {
        self.limit - self.remaining.get()
    }

    /// Highest [`in_use`](Self::in_use) seen so far.
    pub fn peak(&self) -> usize {
        self.peak.get()
    }

    /// Number of requests refused for exceeding the budget.
    pub fn refused(&self) -> u64 {
        self.refused.get()
    }

    /// Snapshot of all counters.
    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            limit: self.limit,
            in_use: self.in_use(),
            remaining: self.remaining(),
            peak: self.peak(),
            refused: self.refused(),
        }
    }

    /// Allocates, resizes or frees a block.
    ///
    /// Returns null when the request is refused or the underlying allocator
    /// fails, and always after a free.
    ///
    /// # Safety
    ///
    /// A non-null `ptr` must have been returned by this allocator with a
    /// current size of `old_size` and not freed since. When `ptr` is null,
    /// `old_size` is ignored (the interpreter passes a type tag there).
    pub unsafe fn reallocate(&self, ptr: *mut u8, old_size: usize, new_size: usize) -> *mut u8 {
        if new_size == 0 {
            if !ptr.is_null() {
                self.free(ptr, old_size);
            }
            return ptr::null_mut();
        }

        if ptr.is_null() {
            return self.allocate(new_size);
        }

        self.resize(ptr, old_size, new_size)
    }

    unsafe fn free(&self, ptr: *mut u8, size: usize) {
        if let Ok(layout) = Layout::from_size_align(size, ALIGNMENT) {
            alloc::dealloc(ptr, layout);
        }
        self.credit(size);
    }

    unsafe fn allocate(&self, size: usize) -> *mut u8 {
        if size > self.remaining.get() {
            return self.refuse(0, size);
        }
        let Ok(layout) = Layout::from_size_align(size, ALIGNMENT) else {
            return self.refuse(0, size);
        };

        let block = alloc::alloc(layout);
        if !block.is_null() {
            self.debit(size);
        }
        block
    }

    unsafe fn resize(&self, ptr: *mut u8, old_size: usize, new_size: usize) -> *mut u8 {
        if new_size == old_size {
            return ptr;
        }
        if new_size > old_size && new_size - old_size > self.remaining.get() {
            return self.refuse(old_size, new_size);
        }
        let (Ok(old_layout), Ok(_)) = (
            Layout::from_size_align(old_size, ALIGNMENT),
            Layout::from_size_align(new_size, ALIGNMENT),
        ) else {
            return self.refuse(old_size, new_size);
        };

        let block = alloc::realloc(ptr, old_layout, new_size);
        if !block.is_null() {
            if new_size > old_size {
                self.debit(new_size - old_size);
            } else {
                self.credit(old_size - new_size);
            }
        }
        block
    }

    fn debit(&self, bytes: usize) {
        let remaining = self.remaining.get() - bytes;
        self.remaining.set(remaining);
        let in_use = self.limit - remaining;
        if in_use > self.peak.get() {
            self.peak.set(in_use);
        }
    }

    fn credit(&self, bytes: usize) {
        let remaining = self.remaining.get().saturating_add(bytes).min(self.limit);
        self.remaining.set(remaining);
    }

    fn refuse(&self, old_size: usize, new_size: usize) -> *mut u8 {
        self.refused.set(self.refused.get() + 1);
        tracing::trace!(
            old_size,
            new_size,
            remaining = self.remaining.get(),
            "allocation refused"
        );
        ptr::null_mut()
    }
}

/// The interpreter's allocation function.
///
/// `ud` is the [`BoundedAllocator`] registered when the interpreter was
/// created. Pass this function and that pointer to the interpreter's
/// state constructor.
///
/// # Safety
///
/// `ud` must point to a live `BoundedAllocator` that outlives the
/// interpreter, and the remaining arguments must follow the interpreter's
/// allocator contract (see [`BoundedAllocator::reallocate`]).
pub unsafe extern "C-unwind" fn lua_alloc(
    ud: *mut c_void,
    ptr: *mut c_void,
    osize: usize,
    nsize: usize,
) -> *mut c_void {
    let Some(allocator) = (ud as *const BoundedAllocator).as_ref() else {
        return ptr::null_mut();
    };
    allocator.reallocate(ptr.cast(), osize, nsize).cast()
}
