//! Allocation statistics.

use std::ops::AddAssign;

use crate::util::size::format_bytes;

/// Usage of one pool of backing heaps (a multi-heap allocator or the pixel allocator).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Backing heaps or committed resources currently held.
    pub heap_count: usize,

    /// Bytes of device memory reserved.
    pub reserved_bytes: u64,

    /// Bytes handed out, including blocks waiting for release.
    pub allocated_bytes: u64,

    /// Bytes freed but not yet retired by the GPU.
    pub pending_release_bytes: u64,

    /// Live allocations.
    pub live_allocations: usize,
}

impl AddAssign for PoolStats {
    fn add_assign(&mut self, other: Self) {
        self.heap_count += other.heap_count;
        self.reserved_bytes += other.reserved_bytes;
        self.allocated_bytes += other.allocated_bytes;
        self.pending_release_bytes += other.pending_release_bytes;
        self.live_allocations += other.live_allocations;
    }
}

/// Aggregated statistics of a [`GpuMemory`](crate::GpuMemory) context.
#[derive(Debug, Clone, Default)]
pub struct MemoryStats {
    /// Backing heaps across all buddy pools.
    pub heap_count: usize,

    /// Bytes of device memory reserved by heaps and committed resources.
    pub reserved_bytes: u64,

    /// Bytes currently allocated, including pending release.
    pub allocated_bytes: u64,

    /// Peak bytes allocated (high water mark).
    pub peak_allocated: u64,

    /// Bytes freed but waiting for their frame to retire.
    pub pending_release_bytes: u64,

    /// Committed render-target/depth resources.
    pub committed_resources: usize,

    /// Total number of allocations performed.
    pub allocation_count: u64,

    /// Total number of deallocations performed.
    pub deallocation_count: u64,

    /// Descriptor slots currently handed out, all kinds.
    pub descriptor_slots_in_use: usize,
}

impl MemoryStats {
    /// Create empty stats.
    pub fn new() -> Self {
        Self::default()
    }

    /// Calculate active allocations.
    pub fn active_allocations(&self) -> u64 {
        self.allocation_count.saturating_sub(self.deallocation_count)
    }

    /// Fraction of reserved memory currently allocated.
    pub fn utilization(&self) -> f64 {
        if self.reserved_bytes == 0 {
            return 0.0;
        }
        self.allocated_bytes as f64 / self.reserved_bytes as f64
    }

    pub(crate) fn add_pool(&mut self, pool: PoolStats) {
        self.heap_count += pool.heap_count;
        self.reserved_bytes += pool.reserved_bytes;
        self.allocated_bytes += pool.allocated_bytes;
        self.pending_release_bytes += pool.pending_release_bytes;
    }
}

impl std::fmt::Display for MemoryStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "GPU Memory Statistics:")?;
        writeln!(f, "  Backing heaps:    {}", self.heap_count)?;
        writeln!(f, "  Reserved:         {}", format_bytes(self.reserved_bytes))?;
        writeln!(f, "  Allocated:        {}", format_bytes(self.allocated_bytes))?;
        writeln!(f, "  Peak allocated:   {}", format_bytes(self.peak_allocated))?;
        writeln!(f, "  Pending release:  {}", format_bytes(self.pending_release_bytes))?;
        writeln!(f, "  Committed:        {}", self.committed_resources)?;
        writeln!(f, "  Allocations:      {}", self.allocation_count)?;
        writeln!(f, "  Deallocations:    {}", self.deallocation_count)?;
        writeln!(f, "  Active:           {}", self.active_allocations())?;
        writeln!(f, "  Descriptor slots: {}", self.descriptor_slots_in_use)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_stats_accumulate() {
        let mut total = PoolStats::default();
        total += PoolStats { heap_count: 1, reserved_bytes: 4096, allocated_bytes: 512, pending_release_bytes: 256, live_allocations: 1 };
        total += PoolStats { heap_count: 2, reserved_bytes: 8192, allocated_bytes: 0, pending_release_bytes: 0, live_allocations: 0 };
        assert_eq!(total.heap_count, 3);
        assert_eq!(total.reserved_bytes, 12288);

        let mut stats = MemoryStats::new();
        stats.add_pool(total);
        assert_eq!(stats.allocated_bytes, 512);
        assert!((stats.utilization() - 512.0 / 12288.0).abs() < 1e-9);
    }

    #[test]
    fn test_display_mentions_counts() {
        let stats = MemoryStats { allocation_count: 5, deallocation_count: 2, ..MemoryStats::default() };
        let text = stats.to_string();
        assert!(text.contains("Active:           3"));
    }
}
