//! The surface volume drivers program against.

use crate::config::types::{PathInfo, Result};
use std::fmt;
use std::time::Duration;

/// Keeps track of active mounts for a volume driver.
///
/// `Display` renders the table for diagnostics.
pub trait Manager: Send + Sync + fmt::Display {
    /// Rebuild the entry for `device` from the live OS mount table.
    fn reload(&self, device: &str) -> Result<()>;

    /// Rebuild the whole table from the live OS mount table, keeping only
    /// sources that match `identifiers` (the variant's defaults when empty).
    fn load(&self, identifiers: &[String]) -> Result<()>;

    /// Mountpoints of `device`, or `None` if the device is unknown.
    fn inspect(&self, device: &str) -> Option<Vec<PathInfo>>;

    /// Mount paths of `device`; empty when unknown.
    fn mounts(&self, device: &str) -> Vec<String>;

    /// Number of mount paths of `device`.
    fn has_mounts(&self, device: &str) -> usize;

    /// Device mounted at `path`, if any.
    fn has_target(&self, path: &str) -> Option<String>;

    /// Whether `device` is mounted at `path`.
    /// [`MountError::NotMounted`](crate::MountError::NotMounted) if the device is unknown.
    fn exists(&self, device: &str, path: &str) -> Result<bool>;

    /// Device mounted at `mount_path`, or `NotMounted`.
    fn get_source_path(&self, mount_path: &str) -> Result<String>;

    /// Every device currently in the table.
    fn get_source_paths(&self) -> Vec<String>;

    /// Mount `device` at `path`. Idempotent for an identical device/path/fs.
    #[allow(clippy::too_many_arguments)]
    fn mount(
        &self,
        minor: i32,
        device: &str,
        path: &str,
        fs: &str,
        flags: u64,
        data: &str,
        timeout: Duration,
    ) -> Result<()>;

    /// Unmount `device` from `path` and drop it from the table.
    ///
    /// Unknown devices fail with `NotMounted`. A known device that is not
    /// mounted at `path` succeeds without doing anything.
    fn unmount(
        &self,
        device: &str,
        path: &str,
        flags: i32,
        timeout: Duration,
        remove_path: bool,
    ) -> Result<()>;

    /// Clear the mountpoint's immutable attribute and remove it after a delay.
    fn remove_mount_path(&self, path: &str) -> Result<()>;
}
