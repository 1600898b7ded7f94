//! mounttab: mount bookkeeping for storage volume drivers
//!
//! Tracks which device is mounted on which paths, serializes concurrent
//! mount and unmount requests, and reclaims mountpoint directories some time
//! after they are unmounted.
//!
//! # Architecture
//!
//! ## Mount Table ([`table`])
//! - [`table::mount_table`]: The table, its locking and the mount/unmount protocol
//! - [`table::manager`]: The [`Manager`] surface drivers program against
//! - [`table::reclaim`]: Delayed mountpoint removal
//! - [`table::variant`]: Device / NFS / custom variants and [`new_mounter`]
//!
//! ## Kernel Primitives ([`kernel`])
//! - [`kernel::mount::backend`]: `mount(2)` / `umount2(2)` with a deadline
//! - [`kernel::mount::attributes`]: Immutable inode flag on mountpoints
//! - [`kernel::mount::mountinfo`]: `/proc/self/mountinfo` reader
//!
//! ## Safety ([`safety`])
//! - [`safety::lock_manager`]: Per-path mutual exclusion
//! - [`safety::scheduler`]: Delayed task execution
//!
//! ## Configuration ([`config`])
//! - [`config::types`]: Errors and shared value types
//! - [`config::loader`]: JSON mounter configuration
//!
//! ## Testing Infrastructure ([`testing`])
//! - Recording backend and attributes, manual scheduler
//!
//! # Lock order
//!
//! Device lock, then path lock, then the table lock. The table lock is a
//! leaf and is never held across I/O.

pub mod cli;
pub mod config;
pub mod kernel;
pub mod safety;
pub mod table;
pub mod testing;

pub use config::types::{
    DeviceSnapshot, MountError, MountType, PathInfo, Result, TableSnapshot,
    MOUNT_PATH_REMOVE_DELAY,
};
pub use config::MounterConfig;
pub use kernel::mount::{InodeFlagAttributes, MountBackend, MountpathAttributes, SyscallBackend};
pub use table::{new_mounter, CustomLoader, Manager, MountTable, MountTableBuilder, MountVariant};
