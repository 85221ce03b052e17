//! Partition-table backends.
//!
//! A [`Partitioner`] buffers intent (wipe, create, delete, set-flag) and commits it as a
//! single external tool call in [`Partitioner::write_changes`]. The same handle parses the
//! tool's own table report back into sector size, last sector, table label and partitions.
//! Sizes and offsets are always logical sectors of the disk being partitioned.

pub mod gdisk;
pub mod parted;

pub use gdisk::GdiskCall;
pub use parted::PartedCall;

use partkit_error::{LayoutError, LayoutResult};
use partkit_hal::ProcessOps;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub const GPT: &str = "gpt";
pub const MSDOS: &str = "msdos";

const MIB: u64 = 1024 * 1024;

/// Convert a MiB figure to sectors of `sector_size` bytes (integer division).
///
/// Sizes beyond what a `u64` sector count can hold saturate to `u64::MAX`, which no disk
/// can satisfy.
pub fn mib_to_sectors(size: u64, sector_size: u64) -> u64 {
    let sectors = (u128::from(size) * u128::from(MIB))
        .checked_div(u128::from(sector_size))
        .unwrap_or(0);
    u64::try_from(sectors).unwrap_or(u64::MAX)
}

/// A pending or discovered partition.
///
/// `size_s == 0` asks the backend for all remaining space; reload the disk to learn the
/// resolved size.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    pub number: u32,
    /// First sector.
    pub start_s: u64,
    /// Length in sectors.
    pub size_s: u64,
    /// Partition name as stored in the table (GPT only).
    pub plabel: String,
    /// Filesystem hint used to pick a partition type at creation time.
    pub filesystem: String,
}

impl Partition {
    /// Last sector covered by the partition.
    pub fn end_s(&self) -> u64 {
        (self.start_s + self.size_s).saturating_sub(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingOp {
    Wipe,
    Create(Partition),
    Delete(u32),
    SetFlag {
        number: u32,
        flag: String,
        active: bool,
    },
}

/// Ordered buffer of operations awaiting the next flush.
#[derive(Debug, Clone, Default)]
pub struct PendingOps {
    ops: Vec<PendingOp>,
}

impl PendingOps {
    pub fn push(&mut self, op: PendingOp) {
        self.ops.push(op);
    }

    pub fn set_wipe(&mut self, wipe: bool) {
        self.ops.retain(|op| *op != PendingOp::Wipe);
        if wipe {
            self.ops.insert(0, PendingOp::Wipe);
        }
    }

    pub fn wipe(&self) -> bool {
        self.ops.contains(&PendingOp::Wipe)
    }

    pub fn deletions(&self) -> impl Iterator<Item = u32> + '_ {
        self.ops.iter().filter_map(|op| match op {
            PendingOp::Delete(num) => Some(*num),
            _ => None,
        })
    }

    pub fn creations(&self) -> impl Iterator<Item = &Partition> + '_ {
        self.ops.iter().filter_map(|op| match op {
            PendingOp::Create(part) => Some(part),
            _ => None,
        })
    }

    pub fn flags(&self) -> impl Iterator<Item = (u32, &str, bool)> + '_ {
        self.ops.iter().filter_map(|op| match op {
            PendingOp::SetFlag {
                number,
                flag,
                active,
            } => Some((*number, flag.as_str(), *active)),
            _ => None,
        })
    }

    pub fn ops(&self) -> &[PendingOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn clear(&mut self) {
        self.ops.clear();
    }
}

/// Common contract of the partition-table backends.
pub trait Partitioner {
    /// Commit the buffered operations with one tool invocation and clear the buffer.
    ///
    /// An empty buffer is a successful no-op. Tool output is returned on success and carried
    /// by the error on failure.
    fn write_changes(&mut self) -> LayoutResult<String>;

    /// Select the table type used when wiping; rejects labels the backend cannot write.
    fn set_partition_table_label(&mut self, label: &str) -> LayoutResult<()>;

    fn create_partition(&mut self, part: Partition);

    fn delete_partition(&mut self, num: u32);

    fn set_partition_flag(&mut self, num: u32, flag: &str, active: bool);

    fn wipe_table(&mut self, wipe: bool);

    /// Dump the current on-disk table. Does not touch the buffer.
    fn print(&self) -> LayoutResult<String>;

    fn get_sector_size(&self, print_out: &str) -> LayoutResult<u64>;

    fn get_last_sector(&self, print_out: &str) -> LayoutResult<u64>;

    fn get_partition_table_label(&self, print_out: &str) -> LayoutResult<String>;

    fn get_partitions(&self, print_out: &str) -> LayoutResult<Vec<Partition>>;

    /// Operations buffered since the last flush.
    fn pending(&self) -> &PendingOps;
}

/// Partition-table tool driving a [`crate::Disk`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Parted,
    Gdisk,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Parted => "parted",
            Backend::Gdisk => "gdisk",
        }
    }

    /// Build a fresh backend handle with an empty buffer for `dev`.
    pub fn partitioner<R>(self, dev: &str, runner: Arc<R>) -> Box<dyn Partitioner>
    where
        R: ProcessOps + ?Sized + 'static,
    {
        match self {
            Backend::Parted => Box::new(PartedCall::new(dev, runner)),
            Backend::Gdisk => Box::new(GdiskCall::new(dev, runner)),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = LayoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "parted" => Ok(Backend::Parted),
            "gdisk" => Ok(Backend::Gdisk),
            other => Err(LayoutError::Config(format!(
                "unknown partitioner backend '{}' (expected parted or gdisk)",
                other
            ))),
        }
    }
}

pub(crate) fn parse_sectors(field: &str, what: &str) -> LayoutResult<u64> {
    field
        .parse::<u64>()
        .map_err(|err| LayoutError::Parse(format!("invalid {} '{}': {}", what, field, err)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use partkit_hal::FakeHal;

    #[test]
    fn mib_to_sectors_uses_integer_division() {
        assert_eq!(mib_to_sectors(1, 512), 2048);
        assert_eq!(mib_to_sectors(128, 512), 262144);
        assert_eq!(mib_to_sectors(1, 4096), 256);
        assert_eq!(mib_to_sectors(3, 3000), 3 * 1048576 / 3000);
        assert_eq!(mib_to_sectors(0, 512), 0);
    }

    #[test]
    fn mib_to_sectors_saturates_instead_of_overflowing() {
        assert_eq!(mib_to_sectors(u64::MAX, 512), u64::MAX);
        assert_eq!(mib_to_sectors(u64::MAX / 1024, 512), u64::MAX);
        // 2^50 MiB is 2^61 sectors of 512 bytes, still representable.
        assert_eq!(mib_to_sectors(1 << 50, 512), 1 << 61);
        assert_eq!(mib_to_sectors(u64::MAX, 0), 0);
    }

    #[test]
    fn wipe_flag_toggles_without_duplicates() {
        let mut pending = PendingOps::default();
        pending.set_wipe(true);
        pending.set_wipe(true);
        assert_eq!(pending.ops(), &[PendingOp::Wipe]);
        pending.set_wipe(false);
        assert!(pending.is_empty());
    }

    #[test]
    fn pending_ops_are_grouped_by_kind() {
        let mut pending = PendingOps::default();
        pending.push(PendingOp::SetFlag {
            number: 1,
            flag: "boot".to_string(),
            active: true,
        });
        pending.push(PendingOp::Delete(2));
        pending.push(PendingOp::Create(Partition {
            number: 2,
            ..Default::default()
        }));
        pending.push(PendingOp::Delete(3));

        assert_eq!(pending.deletions().collect::<Vec<_>>(), vec![2, 3]);
        assert_eq!(pending.creations().count(), 1);
        assert_eq!(pending.flags().collect::<Vec<_>>(), vec![(1, "boot", true)]);
        assert!(!pending.wipe());
    }

    #[test]
    fn partition_end_sector() {
        let part = Partition {
            start_s: 2048,
            size_s: 204800,
            ..Default::default()
        };
        assert_eq!(part.end_s(), 206847);
    }

    #[test]
    fn backend_names_round_trip() {
        assert_eq!("parted".parse::<Backend>().unwrap(), Backend::Parted);
        assert_eq!("gdisk".parse::<Backend>().unwrap(), Backend::Gdisk);
        assert_eq!(Backend::Gdisk.to_string(), "gdisk");
        assert!(matches!(
            "fdisk".parse::<Backend>(),
            Err(LayoutError::Config(_))
        ));
        assert_eq!(Backend::default(), Backend::Parted);
    }

    #[test]
    fn backend_selects_tool() {
        let hal = FakeHal::new();
        let runner = Arc::new(hal.clone());

        Backend::Parted.partitioner("/dev/sda", runner.clone()).print().unwrap();
        Backend::Gdisk.partitioner("/dev/sda", runner).print().unwrap();

        let programs: Vec<String> = hal.commands().into_iter().map(|c| c[0].clone()).collect();
        assert_eq!(programs, vec!["parted", "sgdisk"]);
    }
}
