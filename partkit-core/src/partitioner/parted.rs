//! GNU parted backend.
//!
//! Changes are committed as one `parted --script --machine -- <dev> unit s <ops...>` call.
//! Table state is read from parted's machine format:
//!
//! ```text
//! BYT;
//! <dev>:<last sector>s:<transport>:<logical size>:<physical size>:<label>:<model>:<flags>;
//! <num>:<start>s:<end>s:<size>s:<fs>:<name>:<flags>;
//! ```

use super::{parse_sectors, Partition, Partitioner, PendingOp, PendingOps, GPT, MSDOS};
use once_cell::sync::Lazy;
use partkit_error::{LayoutError, LayoutResult};
use partkit_hal::ProcessOps;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;

const PARTED_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const PARTX_TIMEOUT: Duration = Duration::from_secs(60);

const SUPPORTED_LABELS: [&str; 2] = [MSDOS, GPT];

static HEADER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(.*):(\d+)s:(.*):(\d+):(\d+):(.*):(.*):(.*);$").expect("valid regex")
});
static PARTITION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d+):(\d+)s:(\d+)s:(\d+)s:([^:]*):(.*):([^:]*);$").expect("valid regex")
});
static FAT_RE: Lazy<Regex> = Lazy::new(|| Regex::new("fat|vfat").expect("valid regex"));

// Capture groups of HEADER_RE.
const HEADER_LAST_SECTOR: usize = 2;
const HEADER_SECTOR_SIZE: usize = 4;
const HEADER_LABEL: usize = 6;

pub struct PartedCall<R: ProcessOps + ?Sized> {
    dev: String,
    label: String,
    pending: PendingOps,
    runner: Arc<R>,
}

impl<R: ProcessOps + ?Sized> PartedCall<R> {
    pub fn new(dev: &str, runner: Arc<R>) -> Self {
        Self {
            dev: dev.to_string(),
            label: String::new(),
            pending: PendingOps::default(),
            runner,
        }
    }

    /// Full parted argument list for the buffered operations, `None` when there is nothing to do.
    pub fn options_builder(&self) -> Option<Vec<String>> {
        let mut opts: Vec<String> = Vec::new();

        // Empty or unknown labels fall back to gpt.
        let label = if SUPPORTED_LABELS.contains(&self.label.as_str()) {
            self.label.as_str()
        } else {
            GPT
        };

        if self.pending.wipe() {
            opts.extend(["mklabel".to_string(), label.to_string()]);
        }

        for num in self.pending.deletions() {
            opts.extend(["rm".to_string(), num.to_string()]);
        }

        for part in self.pending.creations() {
            let name = if label == GPT && !part.plabel.is_empty() {
                part.plabel.clone()
            } else if label == GPT {
                format!("part{}", part.number)
            } else {
                "primary".to_string()
            };
            opts.extend(["mkpart".to_string(), name]);

            if FAT_RE.is_match(&part.filesystem) {
                opts.push("fat32".to_string());
            } else if !part.filesystem.is_empty() {
                opts.push(part.filesystem.clone());
            }

            opts.push(part.start_s.to_string());
            if part.size_s == 0 {
                opts.push("100%".to_string());
            } else {
                opts.push(part.end_s().to_string());
            }
        }

        for (num, flag, active) in self.pending.flags() {
            opts.extend([
                "set".to_string(),
                num.to_string(),
                flag.to_string(),
                if active { "on" } else { "off" }.to_string(),
            ]);
        }

        if opts.is_empty() {
            return None;
        }

        let mut args: Vec<String> = ["--script", "--machine", "--", &self.dev, "unit", "s"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        args.extend(opts);
        Some(args)
    }

    fn header_field(&self, print_out: &str, field: usize) -> LayoutResult<String> {
        print_out
            .trim()
            .lines()
            .find_map(|line| {
                HEADER_RE
                    .captures(line.trim())
                    .map(|caps| caps[field].to_string())
            })
            .ok_or_else(|| LayoutError::Parse("failed parsing parted header data".to_string()))
    }
}

impl<R: ProcessOps + ?Sized> Partitioner for PartedCall<R> {
    fn write_changes(&mut self) -> LayoutResult<String> {
        let Some(opts) = self.options_builder() else {
            return Ok(String::new());
        };
        let args: Vec<&str> = opts.iter().map(String::as_str).collect();
        let result = self.runner.command_output("parted", &args, PARTED_TIMEOUT);

        // Notify the kernel of partition table changes; best effort only.
        if let Err(err) = self
            .runner
            .command_output("partx", &["-u", &self.dev], PARTX_TIMEOUT)
        {
            log::warn!("partx -u {} failed: {}", self.dev, err);
        }

        // Cleared even when parted failed.
        self.pending.clear();
        Ok(result?)
    }

    fn set_partition_table_label(&mut self, label: &str) -> LayoutResult<()> {
        if !SUPPORTED_LABELS.contains(&label) {
            return Err(LayoutError::UnsupportedTableLabel {
                backend: "parted".to_string(),
                label: label.to_string(),
                supported: SUPPORTED_LABELS.join(", "),
            });
        }
        self.label = label.to_string();
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
        Ok(self.runner.command_output(
            "parted",
            &["--script", "--machine", "--", &self.dev, "unit", "s", "print"],
            PARTED_TIMEOUT,
        )?)
    }

    fn get_sector_size(&self, print_out: &str) -> LayoutResult<u64> {
        let field = self
            .header_field(print_out, HEADER_SECTOR_SIZE)
            .map_err(|_| LayoutError::Parse("failed parsing sector size".to_string()))?;
        parse_sectors(&field, "sector size")
    }

    fn get_last_sector(&self, print_out: &str) -> LayoutResult<u64> {
        let field = self
            .header_field(print_out, HEADER_LAST_SECTOR)
            .map_err(|_| LayoutError::Parse("failed parsing last sector".to_string()))?;
        parse_sectors(&field, "last sector")
    }

    fn get_partition_table_label(&self, print_out: &str) -> LayoutResult<String> {
        self.header_field(print_out, HEADER_LABEL)
    }

    fn get_partitions(&self, print_out: &str) -> LayoutResult<Vec<Partition>> {
        // A report without the device line is not a parted table dump at all.
        self.header_field(print_out, HEADER_LABEL)?;

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
                plabel: caps[6].to_string(),
                filesystem: String::new(),
            });
        }
        Ok(partitions)
    }

    fn pending(&self) -> &PendingOps {
        &self.pending
    }
}
