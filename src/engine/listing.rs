//! Structured listings produced by the partitioning and mount tools.
//!
//! - `parted --json <dev> -s unit s print` → [`DiskInfo`]
//! - `findmnt --json --list -S <node> -o SOURCE,TARGET` → [`MountListing`]
//!
//! Fields the engine needs are kept optional here so that a missing field
//! surfaces as `MissingField` from the accessor that needs it, not as an
//! opaque deserialization failure.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ProvisionError, Result};

/// Label parted reports for a device without a partition table.
pub const UNKNOWN_LABEL: &str = "unknown";

/// A sector count written by parted as `"<N>s"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Sectors(pub u64);

impl std::str::FromStr for Sectors {
    type Err = ProvisionError;

    fn from_str(s: &str) -> Result<Self> {
        let digits = s.trim().strip_suffix('s').unwrap_or(s.trim());
        digits
            .parse()
            .map(Sectors)
            .map_err(|_| ProvisionError::parse(format!("invalid sector value '{}'", s)))
    }
}

impl TryFrom<String> for Sectors {
    type Error = ProvisionError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Sectors> for String {
    fn from(value: Sectors) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Sectors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.0)
    }
}

/// The `disk` object of a parted JSON listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DiskInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Total size in sectors
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<Sectors>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logical_sector_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical_sector_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_partitions: Option<u32>,
    /// parted omits the array on an empty table
    #[serde(default)]
    pub partitions: Vec<PartitionEntry>,
}

/// One entry of `disk.partitions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PartitionEntry {
    pub number: u32,
    pub start: Sectors,
    pub end: Sectors,
    pub size: Sectors,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub entry_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Absent until a filesystem signature is found on the partition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesystem: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PartedListing {
    disk: Option<DiskInfo>,
}

/// Parse parted JSON output. `Ok(None)` when there is no `disk` object.
pub fn parse_disk_listing(json: &str) -> Result<Option<DiskInfo>> {
    if json.trim().is_empty() {
        return Ok(None);
    }
    let listing: PartedListing = serde_json::from_str(json)?;
    Ok(listing.disk)
}

impl DiskInfo {
    /// Logical sector size in bytes.
    pub fn sector_size(&self) -> Result<u64> {
        match self.logical_sector_size {
            Some(0) => Err(ProvisionError::parse("logical-sector-size is zero")),
            Some(size) => Ok(size),
            None => Err(ProvisionError::MissingField {
                field: "logical-sector-size",
            }),
        }
    }

    /// Total number of sectors on the device.
    pub fn total_sectors(&self) -> Result<u64> {
        self.size
            .map(|s| s.0)
            .ok_or(ProvisionError::MissingField { field: "size" })
    }

    /// A label is present and is not parted's `unknown` sentinel.
    pub fn has_label(&self) -> bool {
        self.label.as_deref().is_some_and(|label| label != UNKNOWN_LABEL)
    }

    pub fn partition(&self, number: u32) -> Option<&PartitionEntry> {
        self.partitions.iter().find(|p| p.number == number)
    }

    /// The partition ending furthest into the disk.
    pub fn last_partition(&self) -> Option<&PartitionEntry> {
        self.partitions.iter().max_by_key(|p| p.end)
    }
}

/// `findmnt --json` output.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MountListing {
    #[serde(default)]
    pub filesystems: Vec<MountEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MountEntry {
    pub source: String,
    pub target: String,
    /// Only present in tree output
    #[serde(default)]
    pub children: Vec<MountEntry>,
}

impl MountListing {
    pub fn parse(json: &str) -> Result<Self> {
        if json.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(json)?)
    }

    /// Mount targets in the order findmnt reported them.
    pub fn targets(&self) -> Vec<String> {
        fn walk(entries: &[MountEntry], out: &mut Vec<String>) {
            for entry in entries {
                out.push(entry.target.clone());
                walk(&entry.children, out);
            }
        }
        let mut out = Vec::new();
        walk(&self.filesystems, &mut out);
        out
    }
}
