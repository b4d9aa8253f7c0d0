//! Splits the top-N port space into contiguous per-worker slices.

use serde_derive::Serialize;

/// A half-open index range `[start, end)` into the port catalog, assigned
/// to exactly one scan worker.
///
/// Partitions produced for one target are disjoint and collectively cover
/// `[0, top_ports)` exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PortPartition {
    /// First catalog index covered by this partition.
    pub start: usize,
    /// One past the last catalog index covered.
    pub end: usize,
}

impl PortPartition {
    /// Number of catalog entries the partition covers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Whether the partition covers no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Splits `[0, top_ports)` into at most `worker_count` contiguous slices.
///
/// Each slice is `top_ports / worker_count` entries wide, except the last,
/// which extends to `top_ports` and absorbs the remainder of the integer
/// division. When `worker_count` exceeds `top_ports` the leading slices
/// would be empty; those are dropped so no worker is spawned with nothing
/// to scan.
#[must_use]
pub fn partition(top_ports: usize, worker_count: usize) -> Vec<PortPartition> {
    debug_assert!(top_ports >= 1);
    debug_assert!(worker_count >= 1);

    let slice_size = top_ports / worker_count;
    (0..worker_count)
        .map(|index| {
            let start = index * slice_size;
            let end = if index == worker_count - 1 {
                top_ports
            } else {
                (index + 1) * slice_size
            };
            PortPartition { start, end }
        })
        .filter(|partition| !partition.is_empty())
        .collect()
}
