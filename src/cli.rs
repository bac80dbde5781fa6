use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// archstrap - partition a disk and bootstrap Arch Linux onto it
#[derive(Parser, Debug)]
#[command(name = "archstrap")]
#[command(about = "Provision a block device and bootstrap Arch Linux onto it")]
#[command(version)]
pub struct Cli {
    /// Dry-run mode: print every command instead of running it.
    ///
    /// Nothing is spawned and no file is written. The disk is modelled in
    /// memory so later steps see the partitions earlier steps created.
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// parted JSON listing used as the starting disk state in dry-run mode
    #[arg(long, global = true, requires = "dry_run")]
    pub fixture: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a full provisioning from a configuration file
    Provision {
        /// Path to the JSON configuration file
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Validate a configuration file
    Validate {
        /// Path to the JSON configuration file
        config: PathBuf,
    },
    /// Print the partition table of a device as JSON
    Inspect {
        /// Disk device (e.g., /dev/sda)
        #[arg(short, long)]
        device: String,
    },
    /// Unmount all partitions of a device and erase its signatures
    Wipe {
        /// Disk device to wipe (e.g., /dev/sda)
        #[arg(short, long)]
        device: String,
        /// Confirm destructive operation
        #[arg(long)]
        confirm: bool,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
