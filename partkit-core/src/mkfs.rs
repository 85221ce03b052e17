//! Filesystem creation through `mkfs.<fs>`.

use once_cell::sync::Lazy;
use partkit_error::{LayoutError, LayoutResult};
use partkit_hal::ProcessOps;
use regex::Regex;
use std::time::Duration;

const MKFS_TIMEOUT: Duration = Duration::from_secs(10 * 60);

static LINUX_FS_RE: Lazy<Regex> = Lazy::new(|| Regex::new("ext[2-4]|xfs").expect("valid regex"));
static FAT_FS_RE: Lazy<Regex> = Lazy::new(|| Regex::new("fat|vfat").expect("valid regex"));

/// A single `mkfs.<fs>` invocation against one device.
#[derive(Debug)]
pub struct MkfsCall<'a, R: ProcessOps + ?Sized> {
    dev: String,
    filesystem: String,
    label: String,
    custom_opts: Vec<String>,
    runner: &'a R,
}

impl<'a, R: ProcessOps + ?Sized> MkfsCall<'a, R> {
    pub fn new(dev: &str, filesystem: &str, label: &str, runner: &'a R) -> Self {
        Self {
            dev: dev.to_string(),
            filesystem: filesystem.to_string(),
            label: label.to_string(),
            custom_opts: Vec::new(),
            runner,
        }
    }

    /// Extra arguments placed after the label flag and before the device.
    pub fn with_custom_opts<I, S>(mut self, opts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.custom_opts.extend(opts.into_iter().map(Into::into));
        self
    }

    pub fn build_options(&self) -> LayoutResult<Vec<String>> {
        let label_flag = if LINUX_FS_RE.is_match(&self.filesystem) {
            "-L"
        } else if FAT_FS_RE.is_match(&self.filesystem) {
            "-n"
        } else {
            return Err(LayoutError::UnsupportedFilesystem(self.filesystem.clone()));
        };

        let mut opts = Vec::new();
        if !self.label.is_empty() {
            opts.push(label_flag.to_string());
            opts.push(self.label.clone());
        }
        opts.extend(self.custom_opts.iter().cloned());
        opts.push(self.dev.clone());
        Ok(opts)
    }

    /// Create the filesystem and return the tool output.
    pub fn apply(&self) -> LayoutResult<String> {
        let opts = self.build_options()?;
        let tool = format!("mkfs.{}", self.filesystem);
        log::info!("Formatting {} as {}", self.dev, self.filesystem);
        let args: Vec<&str> = opts.iter().map(String::as_str).collect();
        let out = self.runner.command_output(&tool, &args, MKFS_TIMEOUT)?;
        log::debug!("{} output: {}", tool, out.trim());
        Ok(out)
    }
}

/// Format an existing block device without going through a [`crate::Disk`].
pub fn format_device<R: ProcessOps + ?Sized>(
    runner: &R,
    device: &str,
    filesystem: &str,
    label: &str,
    opts: &[&str],
) -> LayoutResult<()> {
    MkfsCall::new(device, filesystem, label, runner)
        .with_custom_opts(opts.iter().copied())
        .apply()?;
    Ok(())
}
