//! Work partitioning.
//!
//! Splits a workload of `N` rows into `W` contiguous, ordered slices whose
//! sizes differ by at most one. The first `N mod W` slices receive the extra
//! row, so the layout is fully deterministic for a given `(N, W)`.

use std::num::NonZeroUsize;
use std::ops::Range;

/// Number of progress messages a worker aims to send over its slice.
const PROGRESS_REPORTS_PER_SLICE: usize = 50;

/// A contiguous sub-range of the workload assigned to exactly one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slice {
    /// Position of this slice in the partition (0-based).
    pub index: usize,
    /// First row index covered by the slice.
    pub start: usize,
    /// One past the last row index covered by the slice.
    pub end: usize,
}

impl Slice {
    /// Number of rows in the slice.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Returns true when the slice covers no rows.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Row index range covered by the slice.
    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    /// Rows a worker processes between two progress messages for this slice.
    pub fn progress_step(&self) -> usize {
        progress_step(self.len())
    }
}

/// Partitions `total` rows into `workers` ordered slices.
///
/// Slice `i` has `total / workers` rows, plus one if `i < total % workers`.
/// When `total` is zero every slice is empty.
pub fn partition(total: usize, workers: NonZeroUsize) -> Vec<Slice> {
    let workers = workers.get();
    let base = total / workers;
    let remainder = total % workers;

    (0..workers)
        .map(|index| {
            let start = index * base + index.min(remainder);
            let size = base + usize::from(index < remainder);
            Slice {
                index,
                start,
                end: start + size,
            }
        })
        .collect()
}

/// Rows between progress messages for a slice of `len` rows: `ceil(len / 50)`,
/// never less than one.
pub fn progress_step(len: usize) -> usize {
    len.div_ceil(PROGRESS_REPORTS_PER_SLICE).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workers(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).expect("non-zero worker count")
    }

    #[test]
    fn test_partition_seventeen_over_six() {
        let slices = partition(17, workers(6));

        let sizes: Vec<usize> = slices.iter().map(Slice::len).collect();
        assert_eq!(sizes, vec![3, 3, 3, 3, 3, 2]);

        let ranges: Vec<Range<usize>> = slices.iter().map(Slice::range).collect();
        assert_eq!(ranges, vec![0..3, 3..6, 6..9, 9..12, 12..15, 15..17]);
    }

    #[test]
    fn test_partition_empty_workload() {
        let slices = partition(0, workers(4));

        assert_eq!(slices.len(), 4);
        assert!(slices.iter().all(Slice::is_empty));
        assert!(slices.iter().all(|s| s.start == 0 && s.end == 0));
    }

    #[test]
    fn test_partition_fewer_rows_than_workers() {
        let slices = partition(2, workers(5));

        let sizes: Vec<usize> = slices.iter().map(Slice::len).collect();
        assert_eq!(sizes, vec![1, 1, 0, 0, 0]);
        assert_eq!(slices[4].range(), 2..2);
    }

    #[test]
    fn test_partition_single_worker() {
        let slices = partition(10, workers(1));
        assert_eq!(slices, vec![Slice { index: 0, start: 0, end: 10 }]);
    }

    #[test]
    fn test_slice_indices_are_positional() {
        let slices = partition(100, workers(7));
        for (i, slice) in slices.iter().enumerate() {
            assert_eq!(slice.index, i);
        }
    }

    #[test]
    fn test_progress_step() {
        assert_eq!(progress_step(0), 1);
        assert_eq!(progress_step(1), 1);
        assert_eq!(progress_step(50), 1);
        assert_eq!(progress_step(51), 2);
        assert_eq!(progress_step(100), 2);
        assert_eq!(progress_step(101), 3);
        assert_eq!(progress_step(5_000), 100);
    }
}
