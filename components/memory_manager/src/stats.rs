//! Allocator statistics.

use serde::Serialize;
use std::fmt;

/// Snapshot of a [`BoundedAllocator`](crate::BoundedAllocator)'s accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MemoryStats {
    /// Configured budget in bytes
    pub limit: usize,
    /// Bytes currently handed out
    pub in_use: usize,
    /// Bytes still available
    pub remaining: usize,
    /// Highest `in_use` seen so far
    pub peak: usize,
    /// Number of requests refused for exceeding the budget
    pub refused: u64,
}

impl fmt::Display for MemoryStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} / {} bytes in use (peak {}, {} refused)",
            self.in_use, self.limit, self.peak, self.refused
        )
    }
}
