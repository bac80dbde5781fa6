//! In-session model of a disk for simulation mode.
//!
//! In simulation mode the tools never run, so every query would see the same
//! placeholder output. The model stands in for the device instead: each
//! mutating disk operation applies its effect here right after the simulated
//! command, and queries read it back.

use crate::engine::layout::SectorRange;
use crate::engine::listing::{DiskInfo, PartitionEntry, Sectors, UNKNOWN_LABEL};
use crate::types::PartitionType;

/// Sector count of the default simulated device (127 GiB at 512 B).
pub const SIMULATED_SECTORS: u64 = 266_338_304;
pub const SIMULATED_SECTOR_SIZE: u64 = 512;

/// Mount target findmnt reports for an active swap device.
pub const SWAP_TARGET: &str = "[SWAP]";

#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedDisk {
    info: DiskInfo,
    /// (source node, target), in mount order
    mounts: Vec<(String, String)>,
}

impl SimulatedDisk {
    /// An unpartitioned device without a label.
    pub fn blank(device: &str) -> Self {
        Self::from_info(DiskInfo {
            path: Some(device.to_string()),
            size: Some(Sectors(SIMULATED_SECTORS)),
            model: Some("Simulated Disk".to_string()),
            transport: Some("unknown".to_string()),
            logical_sector_size: Some(SIMULATED_SECTOR_SIZE),
            physical_sector_size: Some(4096),
            label: Some(UNKNOWN_LABEL.to_string()),
            max_partitions: None,
            partitions: Vec::new(),
        })
    }

    /// Start from a recorded parted listing.
    pub fn from_info(info: DiskInfo) -> Self {
        Self {
            info,
            mounts: Vec::new(),
        }
    }

    pub fn info(&self) -> &DiskInfo {
        &self.info
    }

    pub fn set_label(&mut self, label: &str) {
        self.info.label = Some(label.to_string());
        if label == "gpt" {
            self.info.max_partitions = Some(128);
        }
    }

    /// Record a new partition; returns the number the tool would assign.
    pub fn add_partition(&mut self, name: &str, kind: PartitionType, range: SectorRange) -> u32 {
        let number = self
            .info
            .partitions
            .iter()
            .map(|p| p.number)
            .max()
            .unwrap_or(0)
            + 1;
        self.info.partitions.push(PartitionEntry {
            number,
            start: Sectors(range.start),
            end: Sectors(range.end),
            size: Sectors(range.len()),
            entry_type: Some("primary".to_string()),
            name: Some(name.to_string()),
            filesystem: Some(kind.listing_token().to_string()),
            flags: Vec::new(),
        });
        self.info.partitions.sort_by_key(|p| p.number);
        number
    }

    pub fn set_flag(&mut self, number: u32, flag: &str) {
        if let Some(entry) = self.info.partitions.iter_mut().find(|p| p.number == number) {
            if !entry.flags.iter().any(|f| f == flag) {
                entry.flags.push(flag.to_string());
            }
        }
    }

    /// Signatures erased: no label, no partitions, nothing mounted.
    pub fn wipe(&mut self) {
        self.info.label = Some(UNKNOWN_LABEL.to_string());
        self.info.partitions.clear();
        self.mounts.clear();
    }

    pub fn mount(&mut self, source: &str, target: &str) {
        self.mounts.push((source.to_string(), target.to_string()));
    }

    pub fn unmount_all(&mut self, source: &str) {
        self.mounts.retain(|(s, _)| s != source);
    }

    pub fn mountpoints(&self, source: &str) -> Vec<String> {
        self.mounts
            .iter()
            .filter(|(s, _)| s == source)
            .map(|(_, t)| t.clone())
            .collect()
    }
}
