//! Disk orchestration: table creation, partition add/expand, formatting and device lookup.
//!
//! A [`Disk`] caches what the partition-table tool last reported (sector size, last
//! sector, label, partitions). Mutating operations load that cache on first use and
//! reload it after every successful flush.

mod resize;

pub use resize::grow_filesystem;

use crate::config::DiskConfig;
use crate::mkfs::MkfsCall;
use crate::partitioner::{mib_to_sectors, Backend, Partition, Partitioner};
use partkit_error::{LayoutError, LayoutResult};
use partkit_hal::path::partition_path;
use partkit_hal::{FsOps, LayoutHal, LinuxHal, ProcessOps, SystemOps};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Attempts made while waiting for a partition device node to show up.
pub const PARTITION_TRIES: u32 = 10;
pub const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Warning parted prints when the GPT backup header is not at the end of the disk.
const PARTED_UNALLOCATED_WARNING: &str = "Not all of the space available";

pub struct Disk {
    device: String,
    sector_s: u64,
    last_s: u64,
    parts: Vec<Partition>,
    label: String,
    hal: Arc<dyn LayoutHal>,
    backend: Backend,
    partition_tries: u32,
    retry_delay: Duration,
}

impl Disk {
    pub fn new(device: impl Into<String>, hal: Arc<dyn LayoutHal>) -> Self {
        Self {
            device: device.into(),
            sector_s: 0,
            last_s: 0,
            parts: Vec::new(),
            label: String::new(),
            hal,
            backend: Backend::default(),
            partition_tries: PARTITION_TRIES,
            retry_delay: RETRY_DELAY,
        }
    }

    /// Disk backed by the real system.
    pub fn open(device: impl Into<String>) -> Self {
        Self::new(device, Arc::new(LinuxHal::new()))
    }

    pub fn from_config(config: &DiskConfig, hal: Arc<dyn LayoutHal>) -> Self {
        Self::new(config.device.clone(), hal)
            .with_backend(config.backend)
            .with_partition_tries(config.partition_tries)
            .with_retry_delay(config.retry_delay())
    }

    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_partition_tries(mut self, tries: u32) -> Self {
        self.partition_tries = tries.max(1);
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn sector_size(&self) -> u64 {
        self.sector_s
    }

    pub fn last_sector(&self) -> u64 {
        self.last_s
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn partitions(&self) -> &[Partition] {
        &self.parts
    }

    fn partitioner(&self) -> Box<dyn Partitioner> {
        self.backend.partitioner(&self.device, Arc::clone(&self.hal))
    }

    /// Check the device path exists, following a symlinked path once.
    ///
    /// A symlinked path (e.g. `/dev/disk/by-id/...`) is replaced by its resolved target.
    pub fn exists(&mut self) -> bool {
        let path = PathBuf::from(&self.device);
        if !self.hal.path_exists(&path) {
            return false;
        }
        match self.hal.read_symlink(&path) {
            Ok(Some(target)) => {
                let base = path.parent().unwrap_or_else(|| Path::new("/"));
                let resolved = normalize(&base.join(target));
                log::debug!("{} resolves to {}", self.device, resolved.display());
                self.device = resolved.to_string_lossy().into_owned();
                true
            }
            Ok(None) => true,
            Err(err) => {
                log::debug!("cannot inspect {}: {}", self.device, err);
                false
            }
        }
    }

    /// Re-read sector size, last sector, table label and partitions from the device.
    pub fn reload(&mut self) -> LayoutResult<()> {
        let pc = self.partitioner();
        let mut print_out = pc.print()?;

        // Headers of a grown disk still point at the old end; sgdisk relocates them.
        if print_out.contains(PARTED_UNALLOCATED_WARNING) {
            log::info!("Relocating GPT backup header to the end of {}", self.device);
            self.hal.run("sgdisk", &["-e", &self.device])?;
            print_out = pc.print()?;
        }

        let sector_s = pc.get_sector_size(&print_out)?;
        let last_s = pc.get_last_sector(&print_out)?;
        let label = pc.get_partition_table_label(&print_out)?;
        let parts = pc.get_partitions(&print_out)?;

        self.sector_s = sector_s;
        self.last_s = last_s;
        self.label = label;
        self.parts = parts;
        Ok(())
    }

    fn ensure_loaded(&mut self) -> LayoutResult<()> {
        if self.sector_s != 0 {
            return Ok(());
        }
        self.reload().inspect_err(|err| {
            log::error!("Failed analyzing disk {}: {}", self.device, err);
        })
    }

    fn one_mib_sectors(&self) -> u64 {
        mib_to_sectors(1, self.sector_s)
    }

    fn free_after(&self, part: Option<&Partition>) -> u64 {
        match part {
            Some(part) => self.last_s.saturating_sub(part.end_s()),
            // First partition is aligned at 1MiB.
            None => self
                .last_s
                .saturating_sub(self.one_mib_sectors().saturating_sub(1)),
        }
    }

    fn compute_free_space(&self) -> u64 {
        self.free_after(self.parts.last())
    }

    /// Free sectors if the last partition did not exist.
    fn compute_free_space_without_last(&self) -> u64 {
        let before_last = self.parts.len().checked_sub(2).map(|i| &self.parts[i]);
        self.free_after(before_last)
    }

    /// Unallocated sectors after the last partition.
    pub fn get_free_space(&mut self) -> LayoutResult<u64> {
        self.ensure_loaded()?;
        Ok(self.compute_free_space())
    }

    /// Whether at least `min_space` MiB are unallocated. Load failures count as "no".
    pub fn check_disk_free_space_mib(&mut self, min_space: u64) -> bool {
        match self.get_free_space() {
            Ok(free_s) => free_s >= mib_to_sectors(min_space, self.sector_s),
            Err(_) => {
                log::warn!("Could not calculate disk free space");
                false
            }
        }
    }

    /// Wipe the device and write an empty table of type `label`.
    pub fn new_partition_table(&mut self, label: &str) -> LayoutResult<String> {
        let mut pc = self.partitioner();
        pc.set_partition_table_label(label)?;
        pc.wipe_table(true);

        log::info!("Creating {} partition table on {}", label, self.device);
        let out = pc.write_changes()?;
        self.reload().inspect_err(|err| {
            log::error!("Failed analyzing disk {}: {}", self.device, err);
        })?;
        Ok(out)
    }

    /// Append a partition of `size_mib` MiB (0 for the rest of the disk) and return its number.
    pub fn add_partition(
        &mut self,
        size_mib: u64,
        filesystem: &str,
        plabel: &str,
        flags: &[&str],
    ) -> LayoutResult<u32> {
        self.ensure_loaded()?;
        if self.label.is_empty() {
            return Err(LayoutError::MissingTableLabel);
        }
        let mut pc = self.partitioner();
        pc.set_partition_table_label(&self.label)?;

        let (number, start_s) = match self.parts.last() {
            Some(last) => (last.number + 1, last.start_s + last.size_s),
            None => (1, self.one_mib_sectors()),
        };

        let size_s = mib_to_sectors(size_mib, self.sector_s);
        let free_s = self.compute_free_space();
        if size_s > free_s {
            return Err(LayoutError::NotEnoughSpace {
                required: size_s,
                available: free_s,
            });
        }

        pc.create_partition(Partition {
            number,
            start_s,
            size_s,
            plabel: plabel.to_string(),
            filesystem: filesystem.to_string(),
        });
        for flag in flags {
            pc.set_partition_flag(number, flag, true);
        }

        log::info!(
            "Adding partition {} ({} sectors at {}) to {}",
            number,
            size_s,
            start_s,
            self.device
        );
        let out = pc.write_changes().inspect_err(|err| {
            log::error!("Failed creating partition {}: {}", number, err);
        })?;
        log::debug!("partitioner output: {}", out.trim());

        self.reload().inspect_err(|err| {
            log::error!("Failed analyzing disk {}: {}", self.device, err);
        })?;
        Ok(number)
    }

    /// Grow the last partition to `size_mib` MiB (0 for the rest of the disk) and its
    /// filesystem with it.
    pub fn expand_last_partition(&mut self, size_mib: u64) -> LayoutResult<String> {
        self.ensure_loaded()?;
        let mut pc = self.partitioner();
        pc.set_partition_table_label(&self.label)?;

        let mut part = self.parts.last().cloned().ok_or(LayoutError::NoPartitions)?;

        let mut size_s = 0;
        if size_mib > 0 {
            size_s = mib_to_sectors(size_mib, self.sector_s);
            if size_s < part.size_s {
                return Err(LayoutError::ShrinkNotAllowed {
                    current: part.size_s,
                    requested: size_s,
                });
            }
            let free_s = self.compute_free_space_without_last();
            if size_s > free_s {
                return Err(LayoutError::NotEnoughSpace {
                    required: size_s,
                    available: free_s,
                });
            }
        }
        part.size_s = size_s;

        log::info!("Expanding partition {} of {}", part.number, self.device);
        pc.delete_partition(part.number);
        pc.create_partition(part.clone());
        pc.write_changes()?;

        self.reload()?;
        let part_dev = self.find_partition_device(part.number)?;
        grow_filesystem(self.hal.as_ref(), &part_dev)
    }

    /// Create a filesystem on partition `num`.
    pub fn format_partition(&self, num: u32, filesystem: &str, label: &str) -> LayoutResult<String> {
        let part_dev = self.find_partition_device(num)?;
        MkfsCall::new(&part_dev, filesystem, label, self.hal.as_ref()).apply()
    }

    /// Erase filesystem signatures from `device`.
    pub fn wipe_fs_on_partition(&self, device: &str) -> LayoutResult<()> {
        log::info!("Wiping filesystem signatures on {}", device);
        self.hal.run("wipefs", &["--all", device])?;
        Ok(())
    }

    /// Wait for the device node of partition `num` to appear and return its path.
    pub fn find_partition_device(&self, num: u32) -> LayoutResult<String> {
        let device = partition_path(&self.device, num);
        let path = Path::new(&device);

        for attempt in 1..=self.partition_tries {
            log::debug!(
                "Trying to find the partition device {} of device {} (try number {})",
                num,
                self.device,
                attempt
            );
            // Best effort; the existence check below is what counts.
            let _ = self.hal.run("udevadm", &["settle"]);
            if self.hal.path_exists(path) {
                return Ok(device);
            }
            if attempt < self.partition_tries {
                self.hal.sleep(self.retry_delay);
            }
        }
        Err(LayoutError::PartitionDeviceNotFound {
            device,
            number: num,
        })
    }

    /// Ask the kernel to re-read the partition table, retrying while the device is busy.
    pub fn reload_partition_table(&self) -> LayoutResult<()> {
        let mut attempt = 1;
        loop {
            let _ = self.hal.run("udevadm", &["settle"]);
            match self.hal.run("partprobe", &[&self.device]) {
                Ok(_) => return Ok(()),
                Err(err) if attempt >= self.partition_tries => return Err(err.into()),
                Err(err) => log::debug!(
                    "partprobe {} failed (try number {}): {}",
                    self.device,
                    attempt,
                    err
                ),
            }
            self.hal.sleep(self.retry_delay);
            attempt += 1;
        }
    }
}

impl fmt::Display for Disk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.device)
    }
}

impl fmt::Debug for Disk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disk")
            .field("device", &self.device)
            .field("backend", &self.backend)
            .field("sector_s", &self.sector_s)
            .field("last_s", &self.last_s)
            .field("label", &self.label)
            .field("parts", &self.parts)
            .finish()
    }
}

/// Resolve `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
