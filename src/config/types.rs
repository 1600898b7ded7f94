/// Core types and errors for the mount table
use crate::safety::KeyLockMetrics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Delay before an unmounted mountpoint directory is removed.
pub const MOUNT_PATH_REMOVE_DELAY: Duration = Duration::from_secs(30);

/// Errors surfaced by the mount table and its collaborators
#[derive(Error, Debug)]
pub enum MountError {
    /// The path is already claimed by a different device.
    #[error("Mountpath {path} already exists (mounted by {device})")]
    Exists { path: String, device: String },

    #[error("Mountpath is not mounted")]
    NotMounted,

    /// Fields for an entry do not match the existing entry.
    #[error("Invalid arguments for mount entry: {0}")]
    InvalidArgument(String),

    #[error("Not supported")]
    Unsupported,

    #[error("Mountpath {path} is not allowed")]
    NotAllowed { path: String },

    #[error("Failed to change attributes of mountpath {path}: {source}")]
    Attribute {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{op} failed: {errno}")]
    Backend {
        op: &'static str,
        errno: nix::errno::Errno,
    },

    #[error("{op} of {target} did not complete within {waited:?}")]
    Timeout {
        op: &'static str,
        target: String,
        waited: Duration,
    },

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<nix::errno::Errno> for MountError {
    fn from(errno: nix::errno::Errno) -> Self {
        MountError::Backend {
            op: "syscall",
            errno,
        }
    }
}

/// Result type alias for mount table operations
pub type Result<T> = std::result::Result<T, MountError>;

/// Mount variant selector.
///
/// The discriminants are the bit values used on the wire by volume drivers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountType {
    /// Local block device sources
    Device = 1,
    /// NFS exports from a single server
    Nfs = 2,
    /// Caller-defined sources with their own discovery
    Custom = 4,
}

impl TryFrom<u32> for MountType {
    type Error = MountError;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            1 => Ok(MountType::Device),
            2 => Ok(MountType::Nfs),
            4 => Ok(MountType::Custom),
            _ => Err(MountError::Unsupported),
        }
    }
}

impl fmt::Display for MountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MountType::Device => write!(f, "device"),
            MountType::Nfs => write!(f, "nfs"),
            MountType::Custom => write!(f, "custom"),
        }
    }
}

/// One path a device is mounted at.
///
/// Carries no occurrence count: mounting the same device on the same path
/// twice leaves a single `PathInfo`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathInfo {
    pub path: String,
}

impl PathInfo {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

/// Read-only view of one device entry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub device: String,
    pub minor: i32,
    pub fs: String,
    pub paths: Vec<String>,
}

/// Serializable dump of the whole table
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TableSnapshot {
    pub mount_type: MountType,
    pub taken_at: DateTime<Utc>,
    pub allowed_dirs: Vec<String>,
    pub devices: Vec<DeviceSnapshot>,
    pub device_locks: KeyLockMetrics,
    pub path_locks: KeyLockMetrics,
}

/// Strip one trailing slash, leaving the root path alone
pub fn normalize_mount_path(path: &str) -> &str {
    if path.len() > 1 {
        if let Some(stripped) = path.strip_suffix('/') {
            return stripped;
        }
    }
    path
}
