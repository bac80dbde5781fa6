//! A block device and its partition table.
//!
//! Every query goes through [`Disk::inspect`], which runs parted fresh each
//! time. Nothing is cached between calls, so results always reflect the
//! tool's current view of the device.

use std::cell::RefCell;
use std::collections::HashSet;

use tracing::{debug, info, warn};

use crate::engine::layout::{self, SectorRange};
use crate::engine::listing::{self, DiskInfo, PartitionEntry};
use crate::engine::partition::{self, Partition};
use crate::engine::simulation::SimulatedDisk;
use crate::error::{ProvisionError, Result};
use crate::exec::{CommandNode, ExecContext, Outcome, Streams};
use crate::types::PartitionType;

/// Partition table created when a device has none.
pub const DEFAULT_LABEL: &str = "gpt";

#[derive(Debug)]
pub struct Disk {
    device: String,
    ctx: ExecContext,
    /// Present iff the context is simulated
    sim: Option<RefCell<SimulatedDisk>>,
}

impl Disk {
    /// Open `device`, creating a GPT label if it has none.
    ///
    /// In simulation mode the device starts as a blank unlabeled disk.
    pub fn open(device: impl Into<String>, ctx: ExecContext) -> Result<Self> {
        let disk = Self::open_read_only(device, ctx, None);
        disk.ensure_label()?;
        Ok(disk)
    }

    /// Open `device` in simulation mode starting from a recorded listing.
    ///
    /// Outside simulation mode the fixture is ignored.
    pub fn open_with_fixture(
        device: impl Into<String>,
        ctx: ExecContext,
        fixture: DiskInfo,
    ) -> Result<Self> {
        let disk = Self::open_read_only(device, ctx, Some(fixture));
        disk.ensure_label()?;
        Ok(disk)
    }

    /// Handle for queries only: nothing runs until a method is called and
    /// no label is created.
    pub fn open_read_only(
        device: impl Into<String>,
        ctx: ExecContext,
        fixture: Option<DiskInfo>,
    ) -> Self {
        let device = device.into();
        let sim = ctx.is_simulated().then(|| match fixture {
            Some(info) => SimulatedDisk::from_info(info),
            None => SimulatedDisk::blank(&device),
        });
        Self {
            device,
            ctx,
            sim: sim.map(RefCell::new),
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn context(&self) -> &ExecContext {
        &self.ctx
    }

    pub(crate) fn simulation(&self) -> Option<&RefCell<SimulatedDisk>> {
        self.sim.as_ref()
    }

    /// `parted --json <device> -s <args...>`
    fn parted(&self, args: &[&str]) -> CommandNode {
        CommandNode::new(
            "parted",
            ["--json", self.device.as_str(), "-s"].into_iter().chain(args.iter().copied()),
        )
    }

    /// Current partition table as reported by parted, in sector units.
    pub fn inspect(&self) -> Result<DiskInfo> {
        let node = self.parted(&["unit", "s", "print"]);
        let outcome = self.ctx.run(&node, Streams::captured())?;
        self.read_listing(&outcome)
    }

    /// Listing carried by a `print` outcome, or the simulated model's.
    fn read_listing(&self, outcome: &Outcome) -> Result<DiskInfo> {
        if let Some(info) = listing::parse_disk_listing(&outcome.stdout)? {
            return Ok(info);
        }
        if let Some(sim) = &self.sim {
            return Ok(sim.borrow().info().clone());
        }
        Err(ProvisionError::parse(format!(
            "parted listing for {} has no 'disk' field (exit code {:?}): {}",
            self.device,
            outcome.exit_code,
            outcome.stderr.trim()
        )))
    }

    pub fn has_label(&self) -> Result<bool> {
        Ok(self.inspect()?.has_label())
    }

    /// Write a new, empty partition table of type `kind`.
    pub fn init_label(&self, kind: &str) -> Result<()> {
        info!(device = %self.device, label = kind, "creating partition table");
        self.ctx
            .raise_run(&self.parted(&["mklabel", kind]), Streams::captured())?;
        if let Some(sim) = &self.sim {
            sim.borrow_mut().set_label(kind);
        }
        Ok(())
    }

    /// Create the default label unless one is already present.
    pub fn ensure_label(&self) -> Result<()> {
        if self.has_label()? {
            debug!(device = %self.device, "partition table already present");
            return Ok(());
        }
        self.init_label(DEFAULT_LABEL)
    }

    pub fn sector_size(&self) -> Result<u64> {
        self.inspect()?.sector_size()
    }

    pub fn total_sectors(&self) -> Result<u64> {
        self.inspect()?.total_sectors()
    }

    pub fn bytes_to_sectors(&self, bytes: u64) -> Result<u64> {
        Ok(layout::bytes_to_sectors(bytes, self.sector_size()?))
    }

    pub fn sectors_to_bytes(&self, sectors: u64) -> Result<u64> {
        Ok(layout::sectors_to_bytes(sectors, self.sector_size()?))
    }

    /// Raw partition entries, ordered by number.
    pub fn partitions(&self) -> Result<Vec<PartitionEntry>> {
        let mut entries = self.inspect()?.partitions;
        entries.sort_by_key(|p| p.number);
        Ok(entries)
    }

    /// Device node of partition `number` (`/dev/sda2`, `/dev/nvme0n1p2`).
    pub fn partition_node(&self, number: u32) -> String {
        if self.device.ends_with(|c: char| c.is_ascii_digit()) {
            format!("{}p{}", self.device, number)
        } else {
            format!("{}{}", self.device, number)
        }
    }

    /// Unmount every partition, then erase all signatures on the device.
    ///
    /// Leaves the device without a label; call [`Disk::ensure_label`] before
    /// creating partitions again.
    pub fn wipe(&self) -> Result<()> {
        warn!(device = %self.device, "wiping all signatures");
        for entry in self.partitions()? {
            let node = self.partition_node(entry.number);
            let swap = entry
                .filesystem
                .as_deref()
                .and_then(|fs| PartitionType::from_tool(fs).ok())
                .is_some_and(PartitionType::is_swap);
            partition::release(self, &node, swap)?;
        }

        let node = CommandNode::new("wipefs", ["-a", self.device.as_str()]);
        self.ctx.raise_run(&node, Streams::captured())?;
        if let Some(sim) = &self.sim {
            sim.borrow_mut().wipe();
        }
        Ok(())
    }

    /// Create a partition of at least `size_bytes` after the existing ones.
    pub fn create_partition(
        &self,
        name: &str,
        kind: PartitionType,
        size_bytes: u64,
    ) -> Result<Partition<'_>> {
        let (before, range) = self.plan(|info| layout::compute_offsets(info, size_bytes))?;
        self.make_partition(&before, name, kind, range)
    }

    /// Create a partition spanning the rest of the aligned free space.
    pub fn create_partition_remaining(
        &self,
        name: &str,
        kind: PartitionType,
    ) -> Result<Partition<'_>> {
        let (before, range) = self.plan(|info| {
            layout::compute_offsets(info, layout::remaining_bytes(info)?)
        })?;
        self.make_partition(&before, name, kind, range)
    }

    /// Look up an existing partition by number.
    pub fn partition(&self, number: u32) -> Result<Partition<'_>> {
        let info = self.inspect()?;
        let entry = info
            .partition(number)
            .ok_or_else(|| ProvisionError::PartitionNotFound {
                number,
                device: self.device.clone(),
            })?;
        let filesystem = entry
            .filesystem
            .as_deref()
            .ok_or(ProvisionError::MissingField { field: "filesystem" })?;
        let kind = PartitionType::from_tool(filesystem)?;

        Ok(Partition::new(
            self,
            number,
            entry.name.clone().unwrap_or_default(),
            kind,
            SectorRange::new(entry.start.0, entry.end.0),
        ))
    }

    /// Place a new partition on a labelled listing.
    ///
    /// The range is computed before the label is created, so a layout that
    /// does not fit fails without touching the device.
    fn plan(
        &self,
        place: impl Fn(&DiskInfo) -> Result<SectorRange>,
    ) -> Result<(DiskInfo, SectorRange)> {
        let info = self.inspect()?;
        let range = place(&info)?;
        if info.has_label() {
            return Ok((info, range));
        }
        self.init_label(DEFAULT_LABEL)?;
        let info = self.inspect()?;
        let range = place(&info)?;
        Ok((info, range))
    }

    fn make_partition(
        &self,
        before: &DiskInfo,
        name: &str,
        kind: PartitionType,
        range: SectorRange,
    ) -> Result<Partition<'_>> {
        info!(device = %self.device, name, %kind, %range, "creating partition");

        let start = format!("{}s", range.start);
        let end = format!("{}s", range.end);
        let mkpart = self.parted(&["mkpart", name, kind.mkpart_token(), &start, &end]);
        self.ctx.raise_run(&mkpart, Streams::captured())?;
        if let Some(sim) = &self.sim {
            sim.borrow_mut().add_partition(name, kind, range);
        }

        let after = self.inspect()?;
        let entry = identify_new_partition(before, &after, range).ok_or_else(|| {
            ProvisionError::parse(format!(
                "no partitions listed on {} after creating '{}'",
                self.device, name
            ))
        })?;
        let number = entry.number;
        let placed = SectorRange::new(entry.start.0, entry.end.0);

        if kind.sets_esp_flag() {
            let set = self.parted(&["set", &number.to_string(), "esp", "on"]);
            self.ctx.raise_run(&set, Streams::captured())?;
            if let Some(sim) = &self.sim {
                let mut sim = sim.borrow_mut();
                sim.set_flag(number, "boot");
                sim.set_flag(number, "esp");
            }
        }

        Ok(Partition::new(self, number, name.to_string(), kind, placed))
    }
}

/// Pick the entry created between two listings.
///
/// The entry whose number is new in `after` wins. If that is ambiguous the
/// highest number is taken, matching parted's sequential numbering.
fn identify_new_partition<'a>(
    before: &DiskInfo,
    after: &'a DiskInfo,
    requested: SectorRange,
) -> Option<&'a PartitionEntry> {
    let known: HashSet<u32> = before.partitions.iter().map(|p| p.number).collect();
    let fresh: Vec<&PartitionEntry> = after
        .partitions
        .iter()
        .filter(|p| !known.contains(&p.number))
        .collect();

    let entry = match fresh.as_slice() {
        [only] => *only,
        _ => {
            warn!(
                new_entries = fresh.len(),
                "cannot tell the new partition apart, assuming the highest number"
            );
            after.partitions.iter().max_by_key(|p| p.number)?
        }
    };

    if entry.start.0 != requested.start || entry.end.0 != requested.end {
        warn!(
            number = entry.number,
            placed = %SectorRange::new(entry.start.0, entry.end.0),
            %requested,
            "partition placed differently than requested"
        );
    }
    Some(entry)
}
