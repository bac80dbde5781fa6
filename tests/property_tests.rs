//! Property-based tests for archstrap
//!
//! These tests verify:
//! - Alignment arithmetic
//! - Byte/sector conversions
//! - Sequential partition placement never overlaps
//! - Partition type token parsing

use proptest::prelude::*;

use archstrap::engine::layout::{self, ALIGNMENT_SECTORS, SectorRange};
use archstrap::engine::listing::{PartitionEntry, Sectors};
use archstrap::engine::{DiskInfo, compute_offsets};
use archstrap::error::ProvisionError;
use archstrap::types::PartitionType;

// =============================================================================
// Alignment
// =============================================================================

proptest! {
    /// align_to: result is the smallest multiple >= x
    #[test]
    fn align_to_is_smallest_multiple(x in 0u64..1 << 40, m in 1u64..1 << 20) {
        let aligned = layout::align_to(x, m);
        prop_assert!(aligned >= x);
        prop_assert_eq!(aligned % m, 0);
        prop_assert!(aligned - x < m);
    }

    /// align_to: aligning twice changes nothing
    #[test]
    fn align_to_is_idempotent(x in 0u64..1 << 40, m in 1u64..1 << 20) {
        let once = layout::align_to(x, m);
        prop_assert_eq!(layout::align_to(once, m), once);
    }

    /// sectors → bytes → sectors is exact
    #[test]
    fn sectors_survive_byte_conversion(
        sectors in 0u64..1 << 40,
        sector_size in prop_oneof![Just(512u64), Just(4096u64)],
    ) {
        let bytes = layout::sectors_to_bytes(sectors, sector_size);
        prop_assert_eq!(layout::bytes_to_sectors(bytes, sector_size), sectors);
    }

    /// bytes → sectors → bytes never loses space
    #[test]
    fn sector_conversion_covers_bytes(
        bytes in 0u64..1 << 40,
        sector_size in prop_oneof![Just(512u64), Just(4096u64)],
    ) {
        let sectors = layout::bytes_to_sectors(bytes, sector_size);
        let back = layout::sectors_to_bytes(sectors, sector_size);
        prop_assert!(back >= bytes);
        prop_assert!(back - bytes < sector_size);
    }
}

// =============================================================================
// Placement
// =============================================================================

fn blank_disk(total: u64) -> DiskInfo {
    DiskInfo {
        size: Some(Sectors(total)),
        logical_sector_size: Some(512),
        label: Some("gpt".to_string()),
        ..DiskInfo::default()
    }
}

fn push(info: &mut DiskInfo, range: SectorRange) {
    let number = info.partitions.len() as u32 + 1;
    info.partitions.push(PartitionEntry {
        number,
        start: Sectors(range.start),
        end: Sectors(range.end),
        size: Sectors(range.len()),
        entry_type: None,
        name: None,
        filesystem: None,
        flags: Vec::new(),
    });
}

proptest! {
    /// Sequential placements are disjoint, increasing and end on a boundary
    ///
    /// Sizes start at two sectors: one sector placed on a boundary cannot be
    /// aligned.
    #[test]
    fn sequential_offsets_do_not_overlap(sizes in prop::collection::vec(1024u64..64 << 20, 1..12)) {
        let total = 1u64 << 24;
        let mut info = blank_disk(total);
        let mut placed: Vec<SectorRange> = Vec::new();

        for size in sizes {
            let range = match compute_offsets(&info, size) {
                Ok(range) => range,
                Err(ProvisionError::CapacityExceeded { end, total: t }) => {
                    prop_assert!(end >= t);
                    break;
                }
                Err(e) => return Err(TestCaseError::fail(e.to_string())),
            };

            prop_assert!(range.end < total);
            prop_assert_eq!((range.end + 1) % ALIGNMENT_SECTORS, 0);
            let raw_end = range.start + layout::bytes_to_sectors(size, 512) - 1;
            prop_assert_eq!(range.end, layout::align_to(raw_end, ALIGNMENT_SECTORS) - 1);
            // at most the boundary sector itself is given up
            prop_assert!((range.len() + 1) * 512 >= size);
            if let Some(previous) = placed.last() {
                prop_assert_eq!(range.start, previous.end + 1);
            } else {
                prop_assert_eq!(range.start, ALIGNMENT_SECTORS);
            }
            prop_assert!(placed.iter().all(|p| !p.overlaps(&range)));

            push(&mut info, range);
            placed.push(range);
        }
    }

    /// The remaining space always fits behind the existing partitions
    #[test]
    fn remaining_space_fits(first in 1024u64..256 << 20) {
        let total = 1u64 << 21;
        let mut info = blank_disk(total);
        let range = compute_offsets(&info, first).unwrap();
        push(&mut info, range);

        let bytes = layout::remaining_bytes(&info).unwrap();
        let rest = compute_offsets(&info, bytes).unwrap();
        prop_assert_eq!(rest.start, range.end + 1);
        prop_assert!(rest.end < total - layout::GPT_BACKUP_SECTORS);
    }
}

// =============================================================================
// Partition type tokens
// =============================================================================

fn partition_type_strategy() -> impl Strategy<Value = PartitionType> {
    prop_oneof![
        Just(PartitionType::Ext4),
        Just(PartitionType::Fat32),
        Just(PartitionType::Swap),
    ]
}

proptest! {
    /// Both the mkpart and the listing token parse back to the same type
    #[test]
    fn partition_type_tokens_parse_back(kind in partition_type_strategy()) {
        prop_assert_eq!(PartitionType::from_tool(kind.mkpart_token()).unwrap(), kind);
        prop_assert_eq!(PartitionType::from_tool(kind.listing_token()).unwrap(), kind);
        prop_assert_eq!(PartitionType::from_tool(&kind.to_string().to_uppercase()).unwrap(), kind);
    }

    /// Anything outside the known tokens is rejected with the valid list
    #[test]
    fn unknown_tokens_are_rejected(token in "[a-z]{2,8}") {
        prop_assume!(!PartitionType::TOKENS.contains(&token.as_str()));
        match PartitionType::from_tool(&token) {
            Err(ProvisionError::UnknownPartitionType { value, valid }) => {
                prop_assert_eq!(value, token);
                prop_assert_eq!(valid.len(), PartitionType::TOKENS.len());
            }
            other => return Err(TestCaseError::fail(format!("unexpected: {other:?}"))),
        }
    }
}
