//! Disk layout engine.
//!
//! Partition tables are edited through `parted` or `sgdisk`, filesystems created with
//! `mkfs.<fs>`, grown with the filesystem's own tools and optionally encrypted with
//! `cryptsetup`. Every external effect goes through the [`partkit_hal`] traits so layouts
//! can be exercised against a fake system.

pub mod config;
pub mod crypt;
pub mod disk;
pub mod logging;
pub mod mkfs;
pub mod partitioner;

pub use config::DiskConfig;
pub use crypt::{encrypt_device, KeyAuth, KeySlot};
pub use disk::{grow_filesystem, Disk};
pub use mkfs::{format_device, MkfsCall};
pub use partitioner::{
    mib_to_sectors, Backend, GdiskCall, PartedCall, Partition, Partitioner, PendingOp, PendingOps,
};
pub use partkit_error::{HalError, LayoutError, LayoutResult};
