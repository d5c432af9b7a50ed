//! Part planning
//!
//! Pure arithmetic over object sizes: how big each part is, how many
//! parts there are, and which bytes each part covers.

use hafiz_core::types::ByteRange;
use hafiz_core::{MAX_PART_SIZE, MIN_PART_SIZE};

/// Part size that spreads `source_size` over `concurrency` workers,
/// kept within the service's part size bounds.
pub fn optimal_part_size(source_size: u64, concurrency: usize) -> u64 {
    let concurrency = concurrency.max(1) as u64;
    (source_size / concurrency).clamp(MIN_PART_SIZE, MAX_PART_SIZE)
}

/// Number of parts needed to cover `source_size` bytes.
pub fn part_count(source_size: u64, part_size: u64) -> u64 {
    if part_size == 0 {
        return 0;
    }
    source_size.div_ceil(part_size)
}

/// Bytes covered by 1-based part `part_number`. Only the last part may be
/// shorter than `part_size`.
pub fn byte_range(total_size: u64, part_size: u64, part_number: u64) -> Option<ByteRange> {
    if part_number == 0 || part_size == 0 {
        return None;
    }
    let start = (part_number - 1).checked_mul(part_size)?;
    if start >= total_size {
        return None;
    }
    let len = (total_size - start).min(part_size);
    Some(ByteRange::new(start, start + len - 1))
}

/// Grow `part_size` so that `total_size` fits in at most `max_parts` parts.
pub fn fit_part_size(total_size: u64, part_size: u64, max_parts: u64) -> u64 {
    if max_parts == 0 || part_count(total_size, part_size) <= max_parts {
        return part_size;
    }
    total_size.div_ceil(max_parts)
}

/// Lifecycle of one part inside a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartState {
    Pending,
    InFlight,
    Completed,
    Failed,
}

/// One independently transferable piece of an object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    /// 1-based part number
    pub number: u64,
    pub range: ByteRange,
    pub state: PartState,
}

impl Part {
    pub fn new(number: u64, range: ByteRange) -> Self {
        Self {
            number,
            range,
            state: PartState::Pending,
        }
    }

    /// Part number as the multipart API expects it.
    pub fn wire_number(&self) -> Option<i32> {
        i32::try_from(self.number).ok()
    }
}

/// How an object of a known size is split into parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferPlan {
    pub total_size: u64,
    pub part_size: u64,
    pub part_count: u64,
}

impl TransferPlan {
    pub fn new(total_size: u64, part_size: u64) -> Self {
        let part_size = part_size.max(1);
        Self {
            total_size,
            part_size,
            part_count: part_count(total_size, part_size),
        }
    }

    pub fn range(&self, part_number: u64) -> Option<ByteRange> {
        byte_range(self.total_size, self.part_size, part_number)
    }

    pub fn part(&self, part_number: u64) -> Option<Part> {
        self.range(part_number).map(|r| Part::new(part_number, r))
    }

    pub fn parts(&self) -> impl Iterator<Item = Part> + '_ {
        (1..=self.part_count).filter_map(move |n| self.part(n))
    }

    pub fn is_single_part(&self) -> bool {
        self.part_count <= 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hafiz_core::MAX_PARTS;

    const MIB: u64 = 1024 * 1024;

    #[test]
    fn test_optimal_part_size() {
        assert_eq!(optimal_part_size(2 * MIN_PART_SIZE + 2, 2), MIN_PART_SIZE + 1);
        assert_eq!(optimal_part_size(1, 2), MIN_PART_SIZE);
        assert_eq!(optimal_part_size(100 * MIB, 0), 100 * MIB);
        assert_eq!(optimal_part_size(u64::MAX, 1), MAX_PART_SIZE);
    }

    #[test]
    fn test_part_count() {
        assert_eq!(part_count(0, 10), 0);
        assert_eq!(part_count(21, 10), 3);
        assert_eq!(part_count(20, 10), 2);
        assert_eq!(part_count(12 * MIB, 5 * MIB), 3);
        assert_eq!(part_count(5, 0), 0);
    }

    #[test]
    fn test_copy_ranges_for_small_object() {
        let ranges: Vec<String> = (1..=3)
            .map(|n| byte_range(21, 10, n).unwrap().to_header())
            .collect();
        assert_eq!(ranges, vec!["bytes=0-9", "bytes=10-19", "bytes=20-20"]);
        assert_eq!(byte_range(21, 10, 4), None);
        assert_eq!(byte_range(21, 10, 0), None);
    }

    #[test]
    fn test_ranges_cover_object_exactly() {
        for total in [0u64, 1, 9, 10, 11, 99, 100, 101, 1000, 4097] {
            for part_size in [1u64, 2, 3, 7, 10, 64, 100, 5000] {
                let plan = TransferPlan::new(total, part_size);
                assert_eq!(plan.part_count, total.div_ceil(part_size));

                let mut next = 0;
                for part in plan.parts() {
                    assert_eq!(part.range.start, next, "gap or overlap at {}", next);
                    assert!(part.range.size() <= part_size);
                    if part.number < plan.part_count {
                        assert_eq!(part.range.size(), part_size);
                    }
                    next = part.range.end + 1;
                }
                assert_eq!(next, total);
                assert_eq!(plan.parts().count() as u64, plan.part_count);
            }
        }
    }

    #[test]
    fn test_twelve_mib_in_five_mib_parts() {
        let plan = TransferPlan::new(12 * MIB, 5 * MIB);
        let sizes: Vec<u64> = plan.parts().map(|p| p.range.size()).collect();
        assert_eq!(sizes, vec![5 * MIB, 5 * MIB, 2 * MIB]);
        assert!(plan.parts().all(|p| p.state == PartState::Pending));
    }

    #[test]
    fn test_fit_part_size_respects_max_parts() {
        assert_eq!(fit_part_size(100, 10, 20), 10);
        assert_eq!(fit_part_size(100, 10, 5), 20);
        assert_eq!(fit_part_size(101, 10, 5), 21);

        let total = 100_000 * MIN_PART_SIZE;
        let size = fit_part_size(total, MIN_PART_SIZE, MAX_PARTS);
        assert!(part_count(total, size) <= MAX_PARTS);
    }

    #[test]
    fn test_wire_number() {
        let part = Part::new(10_000, ByteRange::new(0, 0));
        assert_eq!(part.wire_number(), Some(10_000));
        let part = Part::new(u64::MAX, ByteRange::new(0, 0));
        assert_eq!(part.wire_number(), None);
    }
}
