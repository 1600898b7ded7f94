//! Mount syscalls, mountpoint attributes and the live OS mount table
//!
//! Everything here talks to the kernel; the bookkeeping lives in [`crate::table`].

pub mod attributes;
pub mod backend;
pub mod mountinfo;

// Re-export commonly used items
pub use attributes::{InodeFlagAttributes, MountpathAttributes};
pub use backend::{MountBackend, SyscallBackend};
pub use mountinfo::{read_mountinfo_from, MountRecord};
