use crate::{HalResult, MountOps};
use std::path::{Path, PathBuf};

/// RAII guard that unmounts a target path when dropped.
///
/// Call [`MountGuard::unmount`] to observe the unmount result; the drop path can only log it.
#[derive(Debug)]
pub struct MountGuard<'a, H: MountOps + ?Sized> {
    hal: &'a H,
    target: PathBuf,
    active: bool,
}

impl<'a, H: MountOps + ?Sized> MountGuard<'a, H> {
    /// Guard an existing mount at `target`.
    pub fn new(hal: &'a H, target: impl Into<PathBuf>) -> Self {
        Self {
            hal,
            target: target.into(),
            active: true,
        }
    }

    /// Mount `device` on `target` and guard the new mount.
    pub fn mount(
        hal: &'a H,
        device: &Path,
        target: impl Into<PathBuf>,
        fstype: Option<&str>,
    ) -> HalResult<Self> {
        let target = target.into();
        hal.mount_device(device, &target, fstype)?;
        Ok(Self::new(hal, target))
    }

    /// Prevent automatic unmounting and return the target path.
    pub fn release(mut self) -> PathBuf {
        self.active = false;
        self.target.clone()
    }

    /// Unmount now and report the result.
    pub fn unmount(mut self) -> HalResult<()> {
        self.active = false;
        self.hal.unmount(&self.target)
    }

    pub fn target(&self) -> &Path {
        &self.target
    }
}

impl<'a, H: MountOps + ?Sized> Drop for MountGuard<'a, H> {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        if let Err(err) = self.hal.unmount(&self.target) {
            log::warn!(
                "mount guard failed to unmount {}: {}",
                self.target.display(),
                err
            );
        }
    }
}
