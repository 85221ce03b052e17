//! GPT fdisk (`sgdisk`) backend.
//!
//! Every flush runs the same argument list twice: first with `-P` (pretend), and only when
//! that dry run is accepted, for real. Only GPT tables can be written.

use super::{parse_sectors, Partition, Partitioner, PendingOp, PendingOps, GPT, MSDOS};
use once_cell::sync::Lazy;
use partkit_error::{LayoutError, LayoutResult};
use partkit_hal::ProcessOps;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;

const SGDISK_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const PARTPROBE_TIMEOUT: Duration = Duration::from_secs(60);

const EFI_TYPE: &str = "EF00";
const BIOS_TYPE: &str = "EF02";
const LINUX_TYPE: &str = "8300";

static FAT_RE: Lazy<Regex> = Lazy::new(|| Regex::new("fat|vfat").expect("valid regex"));
static LAST_SECTOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"last usable sector is (\d+)").expect("valid regex"));
static SECTOR_SIZE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)sector size[^:\n]*:\s*(\d+)(?:/\d+)? bytes").expect("valid regex"));
static LISTING_HEADER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^Number\s+Start \(sector\)").expect("valid regex"));
static PARTITION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d+)\s+(\d+)\s+(\d+).*(EF02|EF00|8300)\s*(.*)$").expect("valid regex")
});

const GUID_MARKER: &str = "Disk identifier (GUID)";
const MBR_MARKER: &str = "converting MBR to GPT";

/// GPT attribute bit for a flag name, as understood by `sgdisk -A`.
fn attribute_bit(flag: &str) -> Option<u8> {
    match flag {
        "required" => Some(0),
        "no_block_io" => Some(1),
        "legacy_boot" => Some(2),
        _ => None,
    }
}

pub struct GdiskCall<R: ProcessOps + ?Sized> {
    dev: String,
    pending: PendingOps,
    expand: bool,
    runner: Arc<R>,
}

impl<R: ProcessOps + ?Sized> GdiskCall<R> {
    pub fn new(dev: &str, runner: Arc<R>) -> Self {
        Self {
            dev: dev.to_string(),
            pending: PendingOps::default(),
            expand: false,
            runner,
        }
    }

    /// Move the backup GPT header to the end of the disk on the next flush.
    pub fn expand_table(&mut self) {
        self.expand = true;
    }

    /// Run `sgdisk --verify` against the device.
    pub fn verify(&self) -> LayoutResult<String> {
        Ok(self
            .runner
            .command_output("sgdisk", &["--verify", &self.dev], SGDISK_TIMEOUT)?)
    }

    /// Full sgdisk argument list for the buffered operations, `None` when there is nothing to do.
    pub fn build_options(&self, pretend: bool) -> Option<Vec<String>> {
        let mut opts: Vec<String> = Vec::new();

        if self.pending.wipe() {
            opts.push("--zap-all".to_string());
        }
        if self.expand {
            opts.push("-e".to_string());
        }

        for num in self.pending.deletions() {
            opts.push(format!("-d={num}"));
        }

        for part in self.pending.creations() {
            opts.push(format!("-n={}:{}:+{}", part.number, part.start_s, part.size_s));
            if !part.plabel.is_empty() {
                opts.push(format!("-c={}:{}", part.number, part.plabel));
            }
            if FAT_RE.is_match(&part.filesystem) {
                opts.push(format!("-t={}:{}", part.number, EFI_TYPE));
            } else if !part.filesystem.is_empty() {
                opts.push(format!("-t={}:{}", part.number, LINUX_TYPE));
            }
        }

        for (num, flag, active) in self.pending.flags() {
            if let Some(bit) = attribute_bit(flag) {
                let action = if active { "set" } else { "clear" };
                opts.push(format!("-A={num}:{action}:{bit}"));
                continue;
            }
            match (flag, active) {
                ("bios_grub", true) => opts.push(format!("-t={num}:{BIOS_TYPE}")),
                ("esp" | "boot", true) => opts.push(format!("-t={num}:{EFI_TYPE}")),
                _ => log::warn!(
                    "sgdisk cannot {} flag '{}' on partition {}; ignoring",
                    if active { "set" } else { "clear" },
                    flag,
                    num
                ),
            }
        }

        if opts.is_empty() {
            return None;
        }

        if pretend {
            opts.insert(0, "-P".to_string());
        }
        opts.push(self.dev.clone());
        Some(opts)
    }

    fn sgdisk(&self, opts: &[String]) -> LayoutResult<String> {
        let args: Vec<&str> = opts.iter().map(String::as_str).collect();
        Ok(self.runner.command_output("sgdisk", &args, SGDISK_TIMEOUT)?)
    }

    fn flush(&self) -> LayoutResult<String> {
        let (Some(pretend), Some(real)) = (self.build_options(true), self.build_options(false))
        else {
            return Ok(String::new());
        };

        // A rejected dry run must leave the disk untouched.
        self.sgdisk(&pretend)?;
        let out = self.sgdisk(&real)?;

        if let Err(err) = self
            .runner
            .command_output("partprobe", &[&self.dev], PARTPROBE_TIMEOUT)
        {
            log::warn!("partprobe {} failed: {}", self.dev, err);
        }
        Ok(out)
    }
}

impl<R: ProcessOps + ?Sized> Partitioner for GdiskCall<R> {
    fn write_changes(&mut self) -> LayoutResult<String> {
        let result = self.flush();
        self.pending.clear();
        self.expand = false;
        result
    }

    fn set_partition_table_label(&mut self, label: &str) -> LayoutResult<()> {
        if label != GPT {
            return Err(LayoutError::UnsupportedTableLabel {
                backend: "sgdisk".to_string(),
                label: label.to_string(),
                supported: GPT.to_string(),
            });
        }
        Ok(())
    }

    fn create_partition(&mut self, part: Partition) {
        self.pending.push(PendingOp::Create(part));
    }

    fn delete_partition(&mut self, num: u32) {
        self.pending.push(PendingOp::Delete(num));
    }

    fn set_partition_flag(&mut self, num: u32, flag: &str, active: bool) {
        self.pending.push(PendingOp::SetFlag {
            number: num,
            flag: flag.to_string(),
            active,
        });
    }

    fn wipe_table(&mut self, wipe: bool) {
        self.pending.set_wipe(wipe);
    }

    fn print(&self) -> LayoutResult<String> {
        Ok(self
            .runner
            .command_output("sgdisk", &["-p", &self.dev], SGDISK_TIMEOUT)?)
    }

    fn get_sector_size(&self, print_out: &str) -> LayoutResult<u64> {
        let caps = SECTOR_SIZE_RE
            .captures(print_out)
            .ok_or_else(|| LayoutError::Parse("could not determine sector size".to_string()))?;
        parse_sectors(&caps[1], "sector size")
    }

    fn get_last_sector(&self, print_out: &str) -> LayoutResult<u64> {
        let caps = LAST_SECTOR_RE.captures(print_out).ok_or_else(|| {
            LayoutError::Parse("could not determine last usable sector".to_string())
        })?;
        parse_sectors(&caps[1], "last sector")
    }

    fn get_partition_table_label(&self, print_out: &str) -> LayoutResult<String> {
        if print_out.contains(MBR_MARKER) {
            return Ok(MSDOS.to_string());
        }
        if print_out.contains(GUID_MARKER) {
            return Ok(GPT.to_string());
        }
        Err(LayoutError::Parse(
            "could not determine partition table type".to_string(),
        ))
    }

    fn get_partitions(&self, print_out: &str) -> LayoutResult<Vec<Partition>> {
        if !LISTING_HEADER_RE.is_match(print_out) {
            return Err(LayoutError::Parse(
                "sgdisk partition listing not found".to_string(),
            ));
        }

        let mut partitions = Vec::new();
        for line in print_out.trim().lines() {
            let Some(caps) = PARTITION_RE.captures(line.trim()) else {
                continue;
            };
            let number = caps[1]
                .parse::<u32>()
                .map_err(|err| LayoutError::Parse(format!("invalid partition number: {err}")))?;
            let start = parse_sectors(&caps[2], "start sector")?;
            let end = parse_sectors(&caps[3], "end sector")?;
            if end < start {
                return Err(LayoutError::Parse(format!(
                    "partition {number} ends ({end}) before it starts ({start})"
                )));
            }
            partitions.push(Partition {
                number,
                start_s: start,
                size_s: end - start + 1,
                plabel: caps[5].trim().to_string(),
                filesystem: String::new(),
            });
        }
        Ok(partitions)
    }

    fn pending(&self) -> &PendingOps {
        &self.pending
    }
}
