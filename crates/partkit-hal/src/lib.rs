//! partkit hardware abstraction layer (HAL).
//!
//! Everything "world-touching" the layout engine needs (spawning tools, mounting,
//! stat'ing device nodes, sleeping between udev polls) goes through these traits so
//! layout logic can be exercised against [`FakeHal`] without root or real disks.

pub mod hal;
pub mod path;

pub use hal::*;
pub use partkit_error::{HalError, HalResult};
