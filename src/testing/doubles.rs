/// Recording stand-ins for the mount backend and mountpoint attributes
///
/// Both record every call and can be told to fail, so table behavior can be
/// checked without root or real block devices.
use crate::config::types::{MountError, Result};
use crate::kernel::mount::{MountBackend, MountpathAttributes};
use nix::errno::Errno;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

fn locked<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One call observed by [`RecordingBackend`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendCall {
    Mount {
        source: String,
        target: String,
        fstype: String,
    },
    Unmount {
        target: String,
    },
}

#[derive(Default)]
struct BackendFaults {
    next_mount: Option<Errno>,
    unmount: Option<Errno>,
}

/// Backend that only records calls
#[derive(Default)]
pub struct RecordingBackend {
    calls: Mutex<Vec<BackendCall>>,
    faults: Mutex<BackendFaults>,
    mount_delay: Mutex<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next mount with `errno`
    pub fn fail_next_mount(&self, errno: Errno) {
        locked(&self.faults).next_mount = Some(errno);
    }

    /// Fail every unmount with `errno` until cleared with `None`
    pub fn fail_unmount(&self, errno: Option<Errno>) {
        locked(&self.faults).unmount = errno;
    }

    /// Sleep inside each mount call, to widen race windows
    pub fn set_mount_delay(&self, delay: Duration) {
        *locked(&self.mount_delay) = delay;
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        locked(&self.calls).clone()
    }

    pub fn mount_calls(&self) -> usize {
        locked(&self.calls)
            .iter()
            .filter(|c| matches!(c, BackendCall::Mount { .. }))
            .count()
    }

    pub fn unmount_calls(&self) -> usize {
        locked(&self.calls)
            .iter()
            .filter(|c| matches!(c, BackendCall::Unmount { .. }))
            .count()
    }

    /// Mount calls currently inside the backend
    pub fn mounts_in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of mount calls that were running at the same time
    pub fn max_concurrent_mounts(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl MountBackend for RecordingBackend {
    fn mount(
        &self,
        source: &str,
        target: &str,
        fstype: &str,
        _flags: u64,
        _data: &str,
        _timeout: Duration,
    ) -> Result<()> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        let delay = *locked(&self.mount_delay);
        if !delay.is_zero() {
            thread::sleep(delay);
        }

        locked(&self.calls).push(BackendCall::Mount {
            source: source.to_string(),
            target: target.to_string(),
            fstype: fstype.to_string(),
        });
        let fault = locked(&self.faults).next_mount.take();
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match fault {
            Some(errno) => Err(MountError::Backend { op: "mount", errno }),
            None => Ok(()),
        }
    }

    fn unmount(&self, target: &str, _flags: i32, _timeout: Duration) -> Result<()> {
        locked(&self.calls).push(BackendCall::Unmount {
            target: target.to_string(),
        });
        match locked(&self.faults).unmount {
            Some(errno) => Err(MountError::Backend { op: "umount", errno }),
            None => Ok(()),
        }
    }
}

/// Attribute toggler that records paths instead of touching inode flags
#[derive(Default)]
pub struct RecordingAttributes {
    set: Mutex<Vec<PathBuf>>,
    cleared: Mutex<Vec<PathBuf>>,
    fail_set: AtomicBool,
    fail_clear: AtomicBool,
}

impl RecordingAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_set(&self, fail: bool) {
        self.fail_set.store(fail, Ordering::SeqCst);
    }

    pub fn fail_clear(&self, fail: bool) {
        self.fail_clear.store(fail, Ordering::SeqCst);
    }

    /// Paths made immutable, in call order
    pub fn set(&self) -> Vec<PathBuf> {
        locked(&self.set).clone()
    }

    pub fn cleared(&self) -> Vec<PathBuf> {
        locked(&self.cleared).clone()
    }
}

impl MountpathAttributes for RecordingAttributes {
    fn set_immutable(&self, path: &Path) -> io::Result<()> {
        if self.fail_set.load(Ordering::SeqCst) {
            return Err(io::Error::from_raw_os_error(libc::EPERM));
        }
        locked(&self.set).push(path.to_path_buf());
        Ok(())
    }

    fn clear_immutable(&self, path: &Path) -> io::Result<()> {
        if self.fail_clear.load(Ordering::SeqCst) {
            return Err(io::Error::from_raw_os_error(libc::EPERM));
        }
        locked(&self.cleared).push(path.to_path_buf());
        Ok(())
    }
}
