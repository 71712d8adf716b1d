//! Namespace-to-partition hashing and partition range allocation.
//!
//! Namespaces map to partitions by `crc32_ieee(name) mod 256`. Clients may
//! rely on this mapping being stable; it is part of the external contract.
//! Partitions are range-assigned to proxies as equal-sized contiguous
//! ranges over `[0, 255]`, the last proxy absorbing any remainder.

use serde::{Deserialize, Serialize};

/// Total number of partitions.
pub const PARTITION_COUNT: i32 = 256;

/// Partition for a namespace name: `crc32_ieee(name) mod 256`.
pub fn partition_for(name: &str) -> i32 {
    (crc32fast::hash(name.as_bytes()) % PARTITION_COUNT as u32) as i32
}

/// An inclusive range of partition ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionRange {
    /// First partition in the range.
    pub start: i32,
    /// Last partition in the range (inclusive).
    pub end: i32,
}

impl PartitionRange {
    /// Create a range. `start` must not exceed `end`.
    pub fn new(start: i32, end: i32) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    /// Whether the range contains the partition.
    pub fn contains(&self, partition: i32) -> bool {
        partition >= self.start && partition <= self.end
    }

    /// Number of partitions in the range.
    pub fn len(&self) -> usize {
        (self.end - self.start + 1) as usize
    }

    /// Whether the range is empty (never true for constructed ranges).
    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }
}

impl std::fmt::Display for PartitionRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}..{}]", self.start, self.end)
    }
}

/// Divide `[0, 255]` into `proxy_count` contiguous ranges.
///
/// Every range gets `256 / proxy_count` partitions; the last range absorbs
/// the remainder. Returns an empty vector when `proxy_count` is zero.
pub fn allocate_ranges(proxy_count: usize) -> Vec<PartitionRange> {
    if proxy_count == 0 {
        return Vec::new();
    }
    let count = proxy_count.min(PARTITION_COUNT as usize);
    let size = PARTITION_COUNT / count as i32;
    let mut ranges = Vec::with_capacity(count);
    for i in 0..count as i32 {
        let start = i * size;
        let end = if i == count as i32 - 1 {
            PARTITION_COUNT - 1
        } else {
            start + size - 1
        };
        ranges.push(PartitionRange::new(start, end));
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_is_stable_and_bounded() {
        let p = partition_for("orders");
        assert_eq!(p, partition_for("orders"));
        assert!((0..PARTITION_COUNT).contains(&p));
        // Different names land on different partitions often enough that the
        // hash is clearly not constant.
        let distinct: std::collections::BTreeSet<i32> =
            (0..64).map(|i| partition_for(&format!("ns-{}", i))).collect();
        assert!(distinct.len() > 16);
    }

    #[test]
    fn test_single_proxy_owns_everything() {
        let ranges = allocate_ranges(1);
        assert_eq!(ranges, vec![PartitionRange::new(0, 255)]);
    }

    #[test]
    fn test_even_split() {
        let ranges = allocate_ranges(4);
        assert_eq!(ranges.len(), 4);
        assert_eq!(ranges[0], PartitionRange::new(0, 63));
        assert_eq!(ranges[3], PartitionRange::new(192, 255));
        let total: usize = ranges.iter().map(PartitionRange::len).sum();
        assert_eq!(total, 256);
    }

    #[test]
    fn test_last_range_absorbs_remainder() {
        let ranges = allocate_ranges(3);
        assert_eq!(ranges[0], PartitionRange::new(0, 84));
        assert_eq!(ranges[1], PartitionRange::new(85, 169));
        assert_eq!(ranges[2], PartitionRange::new(170, 255));
        assert_eq!(ranges[2].len(), 86);
    }

    #[test]
    fn test_ranges_cover_without_overlap() {
        for count in [1usize, 2, 3, 5, 7, 16, 255, 256] {
            let ranges = allocate_ranges(count);
            let mut covered = vec![false; 256];
            for range in &ranges {
                for p in range.start..=range.end {
                    assert!(!covered[p as usize], "overlap at {} for count {}", p, count);
                    covered[p as usize] = true;
                }
            }
            assert!(covered.iter().all(|&c| c), "gap for count {}", count);
        }
    }

    #[test]
    fn test_contains() {
        let range = PartitionRange::new(10, 20);
        assert!(range.contains(10));
        assert!(range.contains(20));
        assert!(!range.contains(9));
        assert!(!range.contains(21));
    }
}
