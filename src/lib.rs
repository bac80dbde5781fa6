//! archstrap library
//!
//! Command execution, disk layout and provisioning steps for bootstrapping
//! Arch Linux onto a block device.

pub mod cli;
pub mod config_file;
pub mod engine;
pub mod error;
pub mod exec;
pub mod process_guard;
pub mod provision;
pub mod types;

// Re-export main types for convenience
pub use config_file::{PartitionSize, PartitionSpec, ProvisionConfig};
pub use engine::{Disk, DiskInfo, Partition, SectorRange};
pub use error::ProvisionError;
pub use exec::{
    CommandNode, ExecContext, ExecMode, Input, Outcome, Output, Streams, pipe, redirect,
};
pub use process_guard::{ChildRegistry, CommandProcessGroup};
pub use provision::Provisioner;
pub use types::PartitionType;
