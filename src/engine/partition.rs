//! A partition on a [`Disk`].
//!
//! Lifecycle: created by [`Disk::create_partition`] → [`Partition::format`]
//! → [`Partition::mount`] ⇄ [`Partition::unmount`]. Partitions are never
//! deleted one by one; [`Disk::wipe`] resets the whole device.

use std::path::Path;

use tracing::{debug, info};

use crate::engine::disk::Disk;
use crate::engine::layout::SectorRange;
use crate::engine::listing::MountListing;
use crate::engine::simulation::SWAP_TARGET;
use crate::error::Result;
use crate::exec::{CommandNode, Streams};
use crate::types::PartitionType;

#[derive(Debug)]
pub struct Partition<'d> {
    disk: &'d Disk,
    number: u32,
    name: String,
    kind: PartitionType,
    range: SectorRange,
}

impl<'d> Partition<'d> {
    pub(crate) fn new(
        disk: &'d Disk,
        number: u32,
        name: String,
        kind: PartitionType,
        range: SectorRange,
    ) -> Self {
        Self {
            disk,
            number,
            name,
            kind,
            range,
        }
    }

    pub fn disk(&self) -> &'d Disk {
        self.disk
    }

    /// Number assigned by the partitioning tool.
    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> PartitionType {
        self.kind
    }

    /// Inclusive sector range as placed on the device.
    pub fn range(&self) -> SectorRange {
        self.range
    }

    pub fn size_bytes(&self) -> Result<u64> {
        self.disk.sectors_to_bytes(self.range.len())
    }

    /// Device node, e.g. `/dev/sda1`.
    pub fn node(&self) -> String {
        self.disk.partition_node(self.number)
    }

    /// Write the filesystem matching the partition type.
    pub fn format(&self) -> Result<()> {
        let node = self.node();
        let formatter = self.kind.formatter();
        info!(node = %node, program = formatter.program, "formatting partition");

        let args = formatter
            .args
            .iter()
            .map(|a| a.to_string())
            .chain(std::iter::once(node));
        let cmd = CommandNode::new(formatter.program, args);
        self.disk.context().raise_run(&cmd, Streams::captured())?;
        Ok(())
    }

    /// Mount at `target` (created if missing), or activate swap.
    pub fn mount(&self, target: impl AsRef<Path>) -> Result<()> {
        let node = self.node();
        let (cmd, target) = if self.kind.is_swap() {
            (CommandNode::new("swapon", [node.as_str()]), SWAP_TARGET.to_string())
        } else {
            let target = target.as_ref().display().to_string();
            (
                CommandNode::new("mount", ["--mkdir", node.as_str(), target.as_str()]),
                target,
            )
        };
        info!(node = %node, target = %target, "mounting partition");

        self.disk.context().raise_run(&cmd, Streams::captured())?;
        if let Some(sim) = self.disk.simulation() {
            sim.borrow_mut().mount(&node, &target);
        }
        Ok(())
    }

    /// Unmount every mountpoint of this partition, or deactivate swap.
    pub fn unmount(&self) -> Result<()> {
        release(self.disk, &self.node(), self.kind.is_swap())
    }

    /// Current mount targets, in the order findmnt reports them.
    pub fn mountpoints(&self) -> Result<Vec<String>> {
        mountpoints(self.disk, &self.node())
    }
}

pub(crate) fn mountpoints(disk: &Disk, node: &str) -> Result<Vec<String>> {
    let cmd = CommandNode::new(
        "findmnt",
        ["--json", "--list", "-S", node, "-o", "SOURCE,TARGET"],
    );
    let outcome = disk.context().run(&cmd, Streams::captured())?;

    if let Some(sim) = disk.simulation() {
        return Ok(sim.borrow().mountpoints(node));
    }
    // findmnt exits 1 when nothing matches
    if !outcome.success() {
        return Ok(Vec::new());
    }
    Ok(MountListing::parse(&outcome.stdout)?.targets())
}

/// Unmount `node` everywhere (one recursive `umount` call), or `swapoff` it.
///
/// A failing `swapoff` is tolerated: the swap area is most likely inactive.
pub(crate) fn release(disk: &Disk, node: &str, swap: bool) -> Result<()> {
    let ctx = disk.context();

    if swap {
        let outcome = ctx.run(&CommandNode::new("swapoff", [node]), Streams::captured())?;
        if !outcome.success() {
            debug!(node, stderr = %outcome.stderr.trim(), "swapoff failed, treating swap as inactive");
        }
    } else {
        let targets = mountpoints(disk, node)?;
        if targets.is_empty() {
            debug!(node, "not mounted");
            return Ok(());
        }
        info!(node, ?targets, "unmounting partition");
        let args = std::iter::once("-R".to_string()).chain(targets);
        ctx.raise_run(&CommandNode::new("umount", args), Streams::captured())?;
    }

    if let Some(sim) = disk.simulation() {
        sim.borrow_mut().unmount_all(node);
    }
    Ok(())
}
