//! Space allocation inside modded containers.
//!
//! Records in modded containers start on 256-byte boundaries and occupy a
//! multiple of 256 bytes. When a replacement is removed or rewritten
//! elsewhere, its old range becomes a gap; the allocator hands out the
//! first gap big enough for a new record before falling back to appending.
//! Occupied ranges always come from a [`ModLedger`]; containers are never
//! scanned for them.

use sqpack_formats::FIRST_RECORD_OFFSET;
use tracing::debug;

use crate::ledger::{ModLedger, OccupiedRange};
use crate::storage::ContainerManager;
use crate::{DataCategory, Result, WRITE_ALIGNMENT};

/// Where in a container a record goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Reuse a gap starting here
    Slot(u64),
    /// Extend the file, starting here
    Append(u64),
}

impl Placement {
    /// Byte position the record starts at.
    pub const fn position(self) -> u64 {
        match self {
            Self::Slot(position) | Self::Append(position) => position,
        }
    }
}

/// Container and position chosen for a write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteTarget {
    /// Container number
    pub container: u8,
    /// Position inside the container
    pub placement: Placement,
}

/// `size` rounded up to the write alignment.
pub const fn aligned_size(size: u64) -> u64 {
    size.div_ceil(WRITE_ALIGNMENT) * WRITE_ALIGNMENT
}

/// First gap of at least `required_size` bytes between occupied ranges.
///
/// `required_size` is rounded up to 256 and each range's end is rounded up
/// the same way. Only gaps between the header reservation and the last
/// range are considered; the space after the last range is append
/// territory. `occupied` need not be sorted.
pub fn find_reusable_slot(required_size: u64, occupied: &[OccupiedRange]) -> Option<u64> {
    let required = aligned_size(required_size.max(1));

    let mut ranges = occupied.to_vec();
    ranges.sort_unstable();

    let mut cursor = FIRST_RECORD_OFFSET;
    for range in ranges {
        if range.start >= cursor && range.start - cursor >= required {
            return Some(cursor);
        }
        cursor = cursor.max(aligned_size(range.end()));
    }
    None
}

impl ContainerManager {
    /// Pick the container and position for a record of `required_size` bytes.
    ///
    /// Modded containers are tried in ascending order, reusing a gap when
    /// one fits and appending when the container stays within the size
    /// ceiling. When none qualifies a new container is created and the
    /// record appended to it, whatever its size.
    pub fn select_write_target<L: ModLedger + ?Sized>(
        &self,
        category: DataCategory,
        required_size: u64,
        ledger: &L,
    ) -> Result<WriteTarget> {
        let required = aligned_size(required_size);

        for container in self.modded_containers(category)? {
            let occupied = ledger.occupied_ranges(category, container);
            if let Some(position) = find_reusable_slot(required, &occupied) {
                debug!(
                    "Reusing {} bytes at {} in {}",
                    required,
                    position,
                    category.container_file_name(container)
                );
                return Ok(WriteTarget {
                    container,
                    placement: Placement::Slot(position),
                });
            }

            let end = aligned_size(self.container_size(category, container)?);
            if end + required <= self.max_container_size() {
                return Ok(WriteTarget {
                    container,
                    placement: Placement::Append(end),
                });
            }
            debug!(
                "{} is full ({} + {} > {})",
                category.container_file_name(container),
                end,
                required,
                self.max_container_size()
            );
        }

        let container = self.create_container(category)?;
        Ok(WriteTarget {
            container,
            placement: Placement::Append(FIRST_RECORD_OFFSET),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::StorageError;
    use crate::config::DatConfig;
    use crate::ledger::{EmptyLedger, ModList};
    use sqpack_formats::DatOffset;
    use tempfile::{TempDir, tempdir};

    fn ranges(pairs: &[(u64, u64)]) -> Vec<OccupiedRange> {
        pairs
            .iter()
            .map(|&(start, size)| OccupiedRange::new(start, size))
            .collect()
    }

    fn overlaps(position: u64, size: u64, occupied: &[OccupiedRange]) -> bool {
        occupied
            .iter()
            .any(|range| position < range.end() && range.start < position + size)
    }

    fn manager(max: u64) -> (TempDir, ContainerManager) {
        let dir = tempdir().expect("Failed to create temp dir");
        let config = DatConfig::new(dir.path()).with_max_container_size(max);
        let manager = ContainerManager::new(&config).expect("manager");
        (dir, manager)
    }

    #[test]
    fn test_aligned_size() {
        assert_eq!(aligned_size(0), 0);
        assert_eq!(aligned_size(1), 256);
        assert_eq!(aligned_size(256), 256);
        assert_eq!(aligned_size(300), 512);
    }

    #[test]
    fn test_adjacent_ranges_leave_no_gap() {
        // 2048 + 300 rounds to 2560, where the next record starts
        let occupied = ranges(&[(2048, 300), (2560, 1000)]);
        let slot = find_reusable_slot(200, &occupied);
        if let Some(position) = slot {
            assert!(!overlaps(position, 256, &occupied));
        }
        assert_eq!(slot, None);
    }

    #[test]
    fn test_first_fit() {
        let occupied = ranges(&[(2048, 256), (3072, 256), (8192, 256)]);
        // Gap 2304..3072 holds 768 bytes, gap 3328..8192 holds 4864
        assert_eq!(find_reusable_slot(200, &occupied), Some(2304));
        assert_eq!(find_reusable_slot(768, &occupied), Some(2304));
        assert_eq!(find_reusable_slot(769, &occupied), Some(3328));
        assert_eq!(find_reusable_slot(5000, &occupied), None);
    }

    #[test]
    fn test_gap_before_first_range() {
        let occupied = ranges(&[(4096, 256)]);
        assert_eq!(find_reusable_slot(2048, &occupied), Some(2048));
        assert_eq!(find_reusable_slot(2049, &occupied), None);
    }

    #[test]
    fn test_unsorted_and_empty_input() {
        let occupied = ranges(&[(8192, 256), (2048, 256)]);
        let position = find_reusable_slot(1000, &occupied).unwrap();
        assert_eq!(position, 2304);
        assert!(!overlaps(position, 1024, &occupied));
        assert_eq!(find_reusable_slot(100, &[]), None);
    }

    #[test]
    fn test_appends_to_existing_modded_container() {
        let (_dir, manager) = manager(1 << 20);
        manager.create_container(DataCategory::Exd).unwrap();
        let target = manager
            .select_write_target(DataCategory::Exd, 300, &EmptyLedger)
            .unwrap();
        assert_eq!(target, WriteTarget {
            container: 0,
            placement: Placement::Append(2048),
        });
    }

    #[test]
    fn test_prefers_slot_over_append() {
        let (_dir, manager) = manager(1 << 20);
        manager.create_container(DataCategory::Exd).unwrap();
        manager
            .write_at(DataCategory::Exd, 0, 2048, &vec![0; 4096])
            .unwrap();

        let mut ledger = ModList::new();
        ledger.record_write(
            "exd/a",
            DataCategory::Exd,
            DatOffset::pack(0, 2048).unwrap(),
            256,
            DatOffset::ABSENT,
        );
        ledger.record_write(
            "exd/b",
            DataCategory::Exd,
            DatOffset::pack(0, 5888).unwrap(),
            256,
            DatOffset::ABSENT,
        );

        let target = manager
            .select_write_target(DataCategory::Exd, 1000, &ledger)
            .unwrap();
        assert_eq!(target.placement, Placement::Slot(2304));
    }

    #[test]
    fn test_overflow_creates_next_container_until_exhausted() {
        let (_dir, manager) = manager(1024);

        // Headers alone exceed the ceiling, so every write opens a new container
        for expected in 0..=7u8 {
            let target = manager
                .select_write_target(DataCategory::Cut, 256, &EmptyLedger)
                .unwrap();
            assert_eq!(target.container, expected);
            assert_eq!(target.placement, Placement::Append(2048));
        }

        assert!(matches!(
            manager.select_write_target(DataCategory::Cut, 256, &EmptyLedger),
            Err(StorageError::ContainerExhausted { .. })
        ));
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        /// Records laid out from 2048 with arbitrary gaps between them
        fn layout() -> impl Strategy<Value = Vec<OccupiedRange>> {
            prop::collection::vec((0u64..8, 1u64..4096), 0..24).prop_map(|pairs| {
                let mut cursor = FIRST_RECORD_OFFSET;
                pairs
                    .into_iter()
                    .map(|(gap_units, size)| {
                        let start = cursor + gap_units * WRITE_ALIGNMENT;
                        cursor = aligned_size(start + size);
                        OccupiedRange::new(start, size)
                    })
                    .collect()
            })
        }

        proptest! {
            /// A reused slot is aligned, inside the record area and free
            #[test]
            fn slot_never_overlaps(occupied in layout(), required in 1u64..8192) {
                if let Some(position) = find_reusable_slot(required, &occupied) {
                    let size = aligned_size(required);
                    let last_end = occupied.iter().map(OccupiedRange::end).max().unwrap_or(0);

                    prop_assert_eq!(position % WRITE_ALIGNMENT, 0);
                    prop_assert!(position >= FIRST_RECORD_OFFSET);
                    prop_assert!(position + size <= last_end);
                    prop_assert!(!overlaps(position, size, &occupied));
                }
            }

            /// Shuffling the ledger does not change the answer
            #[test]
            fn slot_ignores_input_order(occupied in layout(), required in 1u64..8192) {
                let mut reversed = occupied.clone();
                reversed.reverse();
                prop_assert_eq!(
                    find_reusable_slot(required, &occupied),
                    find_reusable_slot(required, &reversed)
                );
            }
        }
    }
}
