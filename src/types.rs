//! Type-safe partition types
//!
//! Replaces the string tokens exchanged with parted and the format tools
//! with a closed enum, so every dispatch on the partition type is an
//! exhaustive `match`.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use crate::error::{ProvisionError, Result};

/// Filesystem type of a partition
///
/// `Display` yields the token passed to `parted mkpart`. Parsing accepts the
/// mkpart tokens, the tokens parted reports back in its listing, and the
/// short `swap` alias used in config files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(try_from = "String", into = "String")]
#[strum(ascii_case_insensitive)]
pub enum PartitionType {
    #[strum(to_string = "ext4")]
    Ext4,
    #[strum(to_string = "fat32")]
    Fat32,
    #[strum(to_string = "linux-swap", serialize = "linux-swap(v1)", serialize = "swap")]
    Swap,
}

/// Program and leading arguments used to write a filesystem.
///
/// The partition device node is appended as the last argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Formatter {
    pub program: &'static str,
    pub args: &'static [&'static str],
}

impl PartitionType {
    /// Every token accepted by [`PartitionType::from_tool`].
    pub const TOKENS: [&'static str; 5] = ["ext4", "fat32", "linux-swap", "linux-swap(v1)", "swap"];

    /// Parse a token reported by parted (or written in a config file).
    pub fn from_tool(token: &str) -> Result<Self> {
        token
            .trim()
            .parse()
            .map_err(|_| ProvisionError::UnknownPartitionType {
                value: token.to_string(),
                valid: Self::TOKENS.to_vec(),
            })
    }

    /// Filesystem token for `parted mkpart`.
    pub fn mkpart_token(self) -> &'static str {
        match self {
            Self::Ext4 => "ext4",
            Self::Fat32 => "fat32",
            Self::Swap => "linux-swap",
        }
    }

    /// Filesystem token as parted lists it once the partition is formatted.
    pub fn listing_token(self) -> &'static str {
        match self {
            Self::Ext4 => "ext4",
            Self::Fat32 => "fat32",
            Self::Swap => "linux-swap(v1)",
        }
    }

    pub fn formatter(self) -> Formatter {
        match self {
            Self::Ext4 => Formatter { program: "mkfs.ext4", args: &[] },
            Self::Fat32 => Formatter { program: "mkfs.fat", args: &["-F", "32"] },
            Self::Swap => Formatter { program: "mkswap", args: &[] },
        }
    }

    /// Whether creating this type also sets the ESP/boot flag pair.
    pub fn sets_esp_flag(self) -> bool {
        matches!(self, Self::Swap)
    }

    pub fn is_swap(self) -> bool {
        matches!(self, Self::Swap)
    }
}

impl TryFrom<String> for PartitionType {
    type Error = ProvisionError;

    fn try_from(value: String) -> Result<Self> {
        Self::from_tool(&value)
    }
}

impl From<PartitionType> for String {
    fn from(value: PartitionType) -> Self {
        value.to_string()
    }
}
