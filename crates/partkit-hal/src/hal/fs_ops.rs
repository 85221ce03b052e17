//! Filesystem access used for device-node discovery and scratch mount points.

use crate::HalResult;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub trait FsOps {
    fn path_exists(&self, path: &Path) -> bool;

    /// Return the link target if `path` is a symlink, `None` for any other file type.
    ///
    /// Fails if `path` does not exist.
    fn read_symlink(&self, path: &Path) -> HalResult<Option<PathBuf>>;

    /// Create a scratch directory that is removed when the returned handle drops.
    fn temp_dir(&self, prefix: &str) -> HalResult<TempDir>;
}
