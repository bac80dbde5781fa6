//! Provisioning configuration files.
//!
//! A JSON document describing the target device, the partition layout and
//! the bootstrap steps to run on the new system.
//!
//! ```json
//! {
//!   "device": "/dev/sda",
//!   "keymap": "fr-latin1",
//!   "partitions": [
//!     { "name": "EFI System", "kind": "fat32", "size": { "mib": 500 }, "mount": "/boot" },
//!     { "name": "swap", "kind": "swap", "size": { "mib": 2000 } },
//!     { "name": "root", "kind": "ext4", "size": "remainder", "mount": "/" }
//!   ],
//!   "root_password": "root"
//! }
//! ```

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::types::PartitionType;

/// GPT partition names hold at most 36 UTF-16 code units.
pub const MAX_PARTITION_NAME: usize = 36;

const MIB: u64 = 1024 * 1024;

/// Requested size of a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionSize {
    Bytes(u64),
    Mib(u64),
    /// All remaining aligned space; only valid for the last partition
    Remainder,
}

impl PartitionSize {
    /// Size in bytes, `None` for `Remainder`.
    pub fn bytes(self) -> Option<u64> {
        match self {
            Self::Bytes(bytes) => Some(bytes),
            Self::Mib(mib) => mib.checked_mul(MIB),
            Self::Remainder => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionSpec {
    pub name: String,
    pub kind: PartitionType,
    pub size: PartitionSize,
    /// Mount path inside the new system (`/`, `/boot`); ignored for swap
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootloaderConfig {
    /// ESP mount path inside the new system
    #[serde(default = "default_efi_directory")]
    pub efi_directory: String,
    #[serde(default = "default_bootloader_id")]
    pub bootloader_id: String,
}

impl Default for BootloaderConfig {
    fn default() -> Self {
        Self {
            efi_directory: default_efi_directory(),
            bootloader_id: default_bootloader_id(),
        }
    }
}

/// Complete provisioning configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionConfig {
    /// Target block device, e.g. `/dev/sda`
    pub device: String,
    /// Console keymap loaded before anything else
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keymap: Option<String>,
    /// Erase the device before partitioning
    #[serde(default = "default_true")]
    pub wipe: bool,
    /// Where the new system's root gets mounted
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,
    pub partitions: Vec<PartitionSpec>,
    #[serde(default = "default_packages")]
    pub packages: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(default = "default_services")]
    pub services: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootloader: Option<BootloaderConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_password: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_root_dir() -> PathBuf {
    PathBuf::from("/mnt")
}

fn default_packages() -> Vec<String> {
    ["base", "linux", "linux-firmware"].map(String::from).to_vec()
}

fn default_services() -> Vec<String> {
    vec!["NetworkManager".to_string()]
}

fn default_efi_directory() -> String {
    "/boot".to_string()
}

fn default_bootloader_id() -> String {
    "GRUB".to_string()
}

impl Default for ProvisionConfig {
    /// EFI + swap + root layout on `/dev/sda`.
    fn default() -> Self {
        Self {
            device: "/dev/sda".to_string(),
            keymap: None,
            wipe: true,
            root_dir: default_root_dir(),
            partitions: vec![
                PartitionSpec {
                    name: "EFI System".to_string(),
                    kind: PartitionType::Fat32,
                    size: PartitionSize::Mib(500),
                    mount: Some("/boot".to_string()),
                },
                PartitionSpec {
                    name: "swap".to_string(),
                    kind: PartitionType::Swap,
                    size: PartitionSize::Mib(2000),
                    mount: None,
                },
                PartitionSpec {
                    name: "root".to_string(),
                    kind: PartitionType::Ext4,
                    size: PartitionSize::Remainder,
                    mount: Some("/".to_string()),
                },
            ],
            packages: default_packages(),
            locale: None,
            services: default_services(),
            bootloader: None,
            root_password: None,
        }
    }
}

impl ProvisionConfig {
    /// Save configuration to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize configuration to JSON")?;
        fs::write(&path, json)
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;
        Ok(())
    }

    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read configuration from {:?}", path.as_ref()))?;
        let config: Self =
            serde_json::from_str(&content).context("Failed to parse configuration JSON")?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !self.device.starts_with("/dev/") {
            bail!("Invalid device path '{}', must start with /dev/", self.device);
        }
        if !self.root_dir.is_absolute() {
            bail!("Root directory {:?} must be an absolute path", self.root_dir);
        }
        if self.partitions.is_empty() {
            bail!("At least one partition must be specified");
        }

        let last = self.partitions.len() - 1;
        for (i, part) in self.partitions.iter().enumerate() {
            let name = part.name.trim();
            if name.is_empty() {
                bail!("Partition {} has an empty name", i + 1);
            }
            if part.name.encode_utf16().count() > MAX_PARTITION_NAME {
                bail!(
                    "Partition name '{}' is longer than {} characters",
                    part.name,
                    MAX_PARTITION_NAME
                );
            }
            if part.name.contains(['\'', '"']) {
                bail!("Partition name '{}' cannot contain quotes", part.name);
            }
            match part.size {
                PartitionSize::Remainder if i != last => {
                    bail!("Only the last partition can use the remaining space ('{}')", part.name)
                }
                PartitionSize::Remainder => {}
                size => match size.bytes() {
                    Some(0) | None => bail!("Partition '{}' has an invalid size", part.name),
                    Some(_) => {}
                },
            }
            if let Some(mount) = &part.mount {
                if part.kind.is_swap() {
                    bail!("Swap partition '{}' cannot have a mount path", part.name);
                }
                if !mount.starts_with('/') {
                    bail!("Mount path '{}' must be absolute", mount);
                }
            }
        }

        let mounts: Vec<&str> = self
            .partitions
            .iter()
            .filter_map(|p| p.mount.as_deref())
            .collect();
        if !mounts.contains(&"/") {
            bail!("One partition must be mounted at /");
        }
        for (i, mount) in mounts.iter().enumerate() {
            if mounts[..i].contains(mount) {
                bail!("Mount path '{}' is used twice", mount);
            }
        }

        if self.packages.is_empty() {
            bail!("At least one package must be bootstrapped");
        }
        if let Some(locale) = &self.locale {
            if locale.trim().is_empty() || locale.contains(char::is_whitespace) {
                bail!("Locale '{}' is not valid", locale);
            }
        }
        if let Some(password) = &self.root_password {
            if password.is_empty() || password.contains(['\n', ':']) {
                bail!("Root password cannot be empty or contain ':' or newlines");
            }
        }
        if let Some(bootloader) = &self.bootloader {
            if !mounts.contains(&bootloader.efi_directory.as_str()) {
                bail!(
                    "EFI directory '{}' is not the mount path of any partition",
                    bootloader.efi_directory
                );
            }
        }

        Ok(())
    }
}
