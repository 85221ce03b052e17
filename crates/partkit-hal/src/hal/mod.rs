//! HAL trait definitions and implementations.
//!
//! This module defines the core traits for system operations and provides
//! both real (LinuxHal) and fake (FakeHal) implementations.

pub mod fake_hal;
pub mod fs_ops;
pub mod guards;
pub mod linux_hal;
pub mod mount_ops;
pub mod process_ops;
pub mod system_ops;

pub use fake_hal::{FakeHal, Operation};
pub use fs_ops::FsOps;
pub use guards::MountGuard;
pub use linux_hal::LinuxHal;
pub use mount_ops::MountOps;
pub use process_ops::ProcessOps;
pub use system_ops::SystemOps;

/// Complete HAL combining all capabilities the layout engine consumes.
pub trait LayoutHal: ProcessOps + MountOps + FsOps + SystemOps + Send + Sync {}

/// Automatically implement LayoutHal for any type implementing all required traits.
impl<T> LayoutHal for T where T: ProcessOps + MountOps + FsOps + SystemOps + Send + Sync {}
