//! Mount operations trait.

use crate::HalResult;
use std::path::Path;

/// Mounting used by filesystems that only grow while mounted (xfs, btrfs).
pub trait MountOps {
    /// Mount `device` on `target`; `fstype` is passed as `-t` (e.g. `"auto"`).
    fn mount_device(&self, device: &Path, target: &Path, fstype: Option<&str>) -> HalResult<()>;

    fn unmount(&self, target: &Path) -> HalResult<()>;
}
