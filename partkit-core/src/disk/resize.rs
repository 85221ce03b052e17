//! Growing a filesystem to fill its (already enlarged) partition.

use partkit_error::{LayoutError, LayoutResult};
use partkit_hal::{FsOps, LayoutHal, MountGuard, ProcessOps};
use std::path::Path;
use std::time::Duration;

const RESIZE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Filesystem type of `device` as reported by blkid.
fn detect_filesystem(hal: &dyn LayoutHal, device: &str) -> LayoutResult<String> {
    let out = hal.run("blkid", &[device, "-s", "TYPE", "-o", "value"])?;
    Ok(out.trim().to_string())
}

/// Grow the filesystem on `device` to the size of its partition.
///
/// ext2/3/4 are checked and resized offline. xfs and btrfs can only grow while mounted, so
/// they are mounted on a scratch directory for the duration of the resize.
pub fn grow_filesystem(hal: &dyn LayoutHal, device: &str) -> LayoutResult<String> {
    let fstype = detect_filesystem(hal, device)?;
    log::info!("Growing {} filesystem on {}", fstype, device);

    match fstype.as_str() {
        "ext2" | "ext3" | "ext4" => {
            hal.command_output("e2fsck", &["-fy", device], RESIZE_TIMEOUT)?;
            Ok(hal.command_output("resize2fs", &[device], RESIZE_TIMEOUT)?)
        }
        "xfs" | "btrfs" => {
            let tmp = hal.temp_dir("partitioner")?;
            let guard = MountGuard::mount(hal, Path::new(device), tmp.path(), Some("auto"))?;
            let mountpoint = guard.target().to_string_lossy().into_owned();

            let resized = if fstype == "xfs" {
                hal.command_output("xfs_growfs", &[&mountpoint], RESIZE_TIMEOUT)
            } else {
                hal.command_output(
                    "btrfs",
                    &["filesystem", "resize", "max", &mountpoint],
                    RESIZE_TIMEOUT,
                )
            };

            // Unmount regardless; a resize failure takes precedence over an unmount failure.
            let unmounted = guard.unmount();
            let out = resized?;
            unmounted?;
            Ok(out)
        }
        _ => Err(LayoutError::ResizeUnsupported {
            device: device.to_string(),
            fstype,
        }),
    }
}
