//! Sector arithmetic and partition placement.
//!
//! Pure functions over a [`DiskInfo`] snapshot; no I/O.
//!
//! # Placement rule
//!
//! ```text
//! start = 2048                       (empty table)
//! start = last.end + 1               (otherwise)
//! end   = start + ceil(bytes / sector_size) - 1
//! end   = align_to(end, 2048) - 1
//! ```
//!
//! with `align_to(x, m) = m * ceil(x / m)`. Every end lands one sector before
//! a 2048-sector boundary. A raw end that already sits on a boundary is
//! pulled back by one sector, so such a partition gets one sector less than
//! asked. A range that would end before its start is rejected.

use std::fmt;

use crate::engine::listing::DiskInfo;
use crate::error::{ProvisionError, Result};

/// Partition boundaries snap to multiples of this many sectors (1 MiB at 512 B).
pub const ALIGNMENT_SECTORS: u64 = 2048;

/// Sectors at the end of the device holding the backup GPT header and entries.
pub const GPT_BACKUP_SECTORS: u64 = 33;

/// Smallest multiple of `multiple` that is `>= x`. `multiple` must be non-zero.
pub fn align_to(x: u64, multiple: u64) -> u64 {
    x.div_ceil(multiple) * multiple
}

pub fn bytes_to_sectors(bytes: u64, sector_size: u64) -> u64 {
    bytes.div_ceil(sector_size)
}

pub fn sectors_to_bytes(sectors: u64, sector_size: u64) -> u64 {
    sectors * sector_size
}

/// Inclusive range of sectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SectorRange {
    pub start: u64,
    pub end: u64,
}

impl SectorRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end + 1 - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    pub fn overlaps(&self, other: &SectorRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

impl fmt::Display for SectorRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s-{}s", self.start, self.end)
    }
}

/// First sector available for the next partition.
pub fn next_start(info: &DiskInfo) -> u64 {
    info.last_partition()
        .map(|last| last.end.0 + 1)
        .unwrap_or(ALIGNMENT_SECTORS)
}

/// Sector range for a new partition of `size_bytes` after the existing ones.
pub fn compute_offsets(info: &DiskInfo, size_bytes: u64) -> Result<SectorRange> {
    if size_bytes == 0 {
        return Err(ProvisionError::validation("partition size must be greater than zero"));
    }

    let sector_size = info.sector_size()?;
    let start = next_start(info);
    let raw_end = start + bytes_to_sectors(size_bytes, sector_size) - 1;
    let end = align_to(raw_end, ALIGNMENT_SECTORS) - 1;
    if end < start {
        return Err(ProvisionError::validation(format!(
            "{} bytes cannot be aligned after sector {}",
            size_bytes, start
        )));
    }

    let total = info.total_sectors()?;
    if end >= total {
        return Err(ProvisionError::CapacityExceeded { end, total });
    }

    Ok(SectorRange::new(start, end))
}

/// Bytes a partition can take from the next free sector up to the last
/// alignment boundary that leaves room for the backup GPT.
pub fn remaining_bytes(info: &DiskInfo) -> Result<u64> {
    let sector_size = info.sector_size()?;
    let total = info.total_sectors()?;
    let start = next_start(info);

    let usable = total.saturating_sub(GPT_BACKUP_SECTORS);
    let boundary = usable / ALIGNMENT_SECTORS * ALIGNMENT_SECTORS;
    if boundary <= start {
        return Err(ProvisionError::CapacityExceeded { end: start, total });
    }

    Ok(sectors_to_bytes(boundary - start, sector_size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::listing::{PartitionEntry, Sectors};

    fn blank(total: u64) -> DiskInfo {
        DiskInfo {
            size: Some(Sectors(total)),
            logical_sector_size: Some(512),
            label: Some("gpt".to_string()),
            ..DiskInfo::default()
        }
    }

    fn with_partition(mut info: DiskInfo, number: u32, range: SectorRange) -> DiskInfo {
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
        info
    }

    #[test]
    fn test_align_to() {
        assert_eq!(align_to(0, 2048), 0);
        assert_eq!(align_to(1, 2048), 2048);
        assert_eq!(align_to(2048, 2048), 2048);
        assert_eq!(align_to(2049, 2048), 4096);
    }

    #[test]
    fn test_sector_conversion_rounds_up() {
        assert_eq!(bytes_to_sectors(512, 512), 1);
        assert_eq!(bytes_to_sectors(513, 512), 2);
        assert_eq!(bytes_to_sectors(524_288_000, 512), 1_024_000);
        assert_eq!(sectors_to_bytes(1_024_000, 512), 524_288_000);
    }

    #[test]
    fn test_first_partition_starts_after_head_gap() {
        let range = compute_offsets(&blank(266_338_304), 524_288_000).unwrap();
        assert_eq!(range, SectorRange::new(2048, 1_026_047));
    }

    #[test]
    fn test_next_partition_follows_last_end() {
        let info = with_partition(blank(266_338_304), 1, SectorRange::new(2048, 1_026_047));
        // 2 GiB swap
        let range = compute_offsets(&info, 2 * 1024 * 1024 * 1024).unwrap();
        assert_eq!(range, SectorRange::new(1_026_048, 5_220_351));
    }

    #[test]
    fn test_end_is_rounded_up_to_boundary() {
        let range = compute_offsets(&blank(1_000_000), 2050 * 512).unwrap();
        assert_eq!(range, SectorRange::new(2048, 6143));
        assert_eq!((range.end + 1) % ALIGNMENT_SECTORS, 0);
    }

    #[test]
    fn test_raw_end_on_boundary_is_pulled_back() {
        // raw end 2048 + 2049 - 1 = 4096 is itself a boundary
        let range = compute_offsets(&blank(1_000_000), 2049 * 512).unwrap();
        assert_eq!(range, SectorRange::new(2048, 4095));
        assert_eq!(range.len(), 2048);
    }

    #[test]
    fn test_single_sector_on_boundary_is_rejected() {
        // raw end 2048 aligns to 2047, before the start
        assert!(matches!(
            compute_offsets(&blank(1_000_000), 512),
            Err(ProvisionError::Validation(_))
        ));
    }

    #[test]
    fn test_capacity_exceeded() {
        let err = compute_offsets(&blank(4096), 512 * 4096).unwrap_err();
        assert!(matches!(err, ProvisionError::CapacityExceeded { total: 4096, .. }));
    }

    #[test]
    fn test_zero_size_rejected() {
        assert!(matches!(
            compute_offsets(&blank(1_000_000), 0),
            Err(ProvisionError::Validation(_))
        ));
    }

    #[test]
    fn test_missing_sector_size_propagates() {
        let mut info = blank(1_000_000);
        info.logical_sector_size = None;
        assert!(matches!(
            compute_offsets(&info, 1024),
            Err(ProvisionError::MissingField { field: "logical-sector-size" })
        ));
    }

    #[test]
    fn test_remaining_bytes_fills_to_last_boundary() {
        let info = with_partition(blank(266_338_304), 1, SectorRange::new(2048, 1_026_047));
        let bytes = remaining_bytes(&info).unwrap();
        let range = compute_offsets(&info, bytes).unwrap();
        assert_eq!(range.start, 1_026_048);
        assert_eq!((range.end + 1) % ALIGNMENT_SECTORS, 0);
        assert!(range.end < 266_338_304 - GPT_BACKUP_SECTORS);
        assert!(range.end + ALIGNMENT_SECTORS >= 266_338_304 - GPT_BACKUP_SECTORS);
    }

    #[test]
    fn test_remaining_bytes_on_full_disk() {
        let info = with_partition(blank(8192), 1, SectorRange::new(2048, 6143));
        assert!(matches!(
            remaining_bytes(&info),
            Err(ProvisionError::CapacityExceeded { .. })
        ));
    }

    #[test]
    fn test_range_overlap() {
        let a = SectorRange::new(2048, 4095);
        assert!(a.overlaps(&SectorRange::new(4095, 8191)));
        assert!(!a.overlaps(&SectorRange::new(4096, 8191)));
        assert_eq!(a.len(), 2048);
        assert_eq!(a.to_string(), "2048s-4095s");
    }
}
