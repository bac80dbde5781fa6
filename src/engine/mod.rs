//! Disk layout engine: the model of a disk, its partitions, and where new
//! partitions go.
//!
//! All state is read back from the partitioning tool's JSON output; the
//! engine only keeps an in-memory model when running simulated.

pub mod disk;
pub mod layout;
pub mod listing;
pub mod partition;
pub mod simulation;

pub use disk::{DEFAULT_LABEL, Disk};
pub use layout::{ALIGNMENT_SECTORS, SectorRange, align_to, compute_offsets};
pub use listing::{DiskInfo, MountListing, PartitionEntry, Sectors};
pub use partition::Partition;
pub use simulation::SimulatedDisk;
