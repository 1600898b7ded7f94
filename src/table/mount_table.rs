/// Mount table: tracks which device is mounted where and mediates every
/// mount/unmount a volume driver performs.
///
/// Lock order is device lock, then path lock, then the table lock. The table
/// lock is a leaf: it is only ever held for map lookups and updates, never
/// across a backend call, filesystem access or another lock acquisition.
use crate::config::types::{
    normalize_mount_path, DeviceSnapshot, MountError, PathInfo, Result, TableSnapshot,
    MOUNT_PATH_REMOVE_DELAY,
};
use crate::kernel::mount::mountinfo::{MountRecord, MOUNTINFO_PATH};
use crate::kernel::mount::{InodeFlagAttributes, MountBackend, MountpathAttributes, SyscallBackend};
use crate::safety::{DelayScheduler, KeyLock, TaskId, TimerScheduler};
use crate::table::manager::Manager;
use crate::table::reclaim;
use crate::table::variant::MountVariant;
use chrono::Utc;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Bookkeeping for one device
#[derive(Debug)]
struct MountEntry {
    minor: i32,
    /// Fixed by the first mount; later mounts must match it
    fs: String,
    targets: Vec<PathInfo>,
}

impl MountEntry {
    fn new(minor: i32, fs: &str) -> Self {
        Self {
            minor,
            fs: fs.to_string(),
            targets: Vec::new(),
        }
    }

    fn has_target(&self, path: &str) -> bool {
        self.targets.iter().any(|t| t.path == path)
    }
}

/// Forward map plus reverse index. A path is in `paths` iff it is in some
/// entry's targets.
#[derive(Debug, Default)]
struct TableMaps {
    mounts: HashMap<String, MountEntry>,
    paths: HashMap<String, String>,
}

impl TableMaps {
    fn find_device_by_path(&self, path: &str) -> Option<String> {
        self.mounts
            .iter()
            .find(|(_, entry)| entry.has_target(path))
            .map(|(device, _)| device.clone())
    }

    /// Add a record from the live mount table; first claim on a path wins
    fn insert_record(&mut self, record: &MountRecord) {
        let path = normalize_mount_path(&record.mountpoint).to_string();
        if let Some(owner) = self.paths.get(&path) {
            if owner != &record.source {
                warn!(
                    "Skipping {} on {}: path already claimed by {}",
                    record.source, path, owner
                );
            }
            return;
        }

        let entry = self
            .mounts
            .entry(record.source.clone())
            .or_insert_with(|| MountEntry::new(record.minor, &record.fstype));
        if entry.fs != record.fstype {
            warn!(
                "Skipping {} on {}: fs {} does not match recorded fs {}",
                record.source, path, record.fstype, entry.fs
            );
            return;
        }

        entry.targets.push(PathInfo::new(path.clone()));
        self.paths.insert(path, record.source.clone());
    }
}

/// State shared with delayed reclamation tasks
pub(crate) struct TableShared {
    maps: Mutex<TableMaps>,
    /// Serializes mount/unmount of one device across the backend call. Kept
    /// apart from the maps so that load and reload cannot drop a held lock.
    device_locks: KeyLock,
    pub(crate) path_locks: KeyLock,
}

impl TableShared {
    pub(crate) fn new() -> Self {
        Self {
            maps: Mutex::new(TableMaps::default()),
            device_locks: KeyLock::new(),
            path_locks: KeyLock::new(),
        }
    }

    fn maps(&self) -> MutexGuard<'_, TableMaps> {
        // Every critical section leaves the maps consistent before anything
        // that could panic, so a poisoned lock still guards valid state.
        self.maps.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn find_device_by_path(&self, path: &str) -> Option<String> {
        self.maps().find_device_by_path(path)
    }
}

/// The mount table for one driver instance
pub struct MountTable {
    shared: Arc<TableShared>,
    variant: MountVariant,
    backend: Arc<dyn MountBackend>,
    attributes: Arc<dyn MountpathAttributes>,
    scheduler: Arc<dyn DelayScheduler>,
    allowed_dirs: Vec<String>,
    remove_delay: Duration,
    mountinfo_path: PathBuf,
}

/// Builder for [`MountTable`]; unset collaborators get the system defaults
pub struct MountTableBuilder {
    variant: MountVariant,
    backend: Option<Arc<dyn MountBackend>>,
    attributes: Option<Arc<dyn MountpathAttributes>>,
    scheduler: Option<Arc<dyn DelayScheduler>>,
    allowed_dirs: Vec<String>,
    remove_delay: Duration,
    mountinfo_path: PathBuf,
}

impl MountTableBuilder {
    pub fn backend(mut self, backend: Arc<dyn MountBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn attributes(mut self, attributes: Arc<dyn MountpathAttributes>) -> Self {
        self.attributes = Some(attributes);
        self
    }

    pub fn scheduler(mut self, scheduler: Arc<dyn DelayScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn allowed_dirs(mut self, allowed_dirs: Vec<String>) -> Self {
        self.allowed_dirs = allowed_dirs;
        self
    }

    pub fn remove_delay(mut self, delay: Duration) -> Self {
        self.remove_delay = delay;
        self
    }

    pub fn mountinfo_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.mountinfo_path = path.into();
        self
    }

    pub fn build(self) -> Result<MountTable> {
        let scheduler: Arc<dyn DelayScheduler> = match self.scheduler {
            Some(scheduler) => scheduler,
            None => Arc::new(TimerScheduler::new()?),
        };

        Ok(MountTable {
            shared: Arc::new(TableShared::new()),
            variant: self.variant,
            backend: self.backend.unwrap_or_else(|| Arc::new(SyscallBackend::new())),
            attributes: self
                .attributes
                .unwrap_or_else(|| Arc::new(InodeFlagAttributes::new())),
            scheduler,
            allowed_dirs: self.allowed_dirs,
            remove_delay: self.remove_delay,
            mountinfo_path: self.mountinfo_path,
        })
    }
}

impl MountTable {
    pub fn builder(variant: MountVariant) -> MountTableBuilder {
        MountTableBuilder {
            variant,
            backend: None,
            attributes: None,
            scheduler: None,
            allowed_dirs: Vec::new(),
            remove_delay: MOUNT_PATH_REMOVE_DELAY,
            mountinfo_path: PathBuf::from(MOUNTINFO_PATH),
        }
    }

    pub fn variant(&self) -> &MountVariant {
        &self.variant
    }

    pub fn allowed_dirs(&self) -> &[String] {
        &self.allowed_dirs
    }

    fn maps(&self) -> MutexGuard<'_, TableMaps> {
        self.shared.maps()
    }

    /// Substring containment, not prefix matching: `/mnt` admits `/var/mnt/x`
    fn check_allowed(&self, path: &str) -> Result<()> {
        if self.allowed_dirs.is_empty()
            || self
                .allowed_dirs
                .iter()
                .any(|dir| path.contains(dir.as_str()))
        {
            return Ok(());
        }
        warn!("Mountpath {} is not in allowed dirs {:?}", path, self.allowed_dirs);
        Err(MountError::NotAllowed {
            path: path.to_string(),
        })
    }

    /// Runs with the device lock held. The entry is only created once the
    /// backend has mounted the path, so a failed first mount leaves nothing behind.
    #[allow(clippy::too_many_arguments)]
    fn mount_locked(
        &self,
        minor: i32,
        device: &str,
        path: &str,
        fs: &str,
        flags: u64,
        data: &str,
        timeout: Duration,
    ) -> Result<()> {
        if let Some(entry) = self.maps().mounts.get(device) {
            if entry.fs != fs {
                warn!(
                    "{} Existing mountpoint has fs {:?} cannot change to {:?}",
                    device, entry.fs, fs
                );
                return Err(fs_mismatch(device, &entry.fs, fs));
            }
            if entry.has_target(path) {
                debug!("{} already mounted at {}", device, path);
                return Ok(());
            }
        }

        let _path_guard = self.shared.path_locks.acquire(path);

        // Another device may have claimed the path while we waited for its lock
        if let Some(owner) = self.maps().paths.get(path).cloned() {
            if owner != device {
                warn!("cannot mount {:?}, device {:?} is mounted at {:?}", device, owner, path);
                return Err(MountError::Exists {
                    path: path.to_string(),
                    device: owner,
                });
            }
        }

        if Path::new(path).exists() {
            if let Err(source) = self.attributes.set_immutable(Path::new(path)) {
                warn!("Making mountpath {} readonly failed: {}", path, source);
                return Err(MountError::Attribute {
                    path: path.to_string(),
                    source,
                });
            }
        }

        self.backend.mount(device, path, fs, flags, data, timeout)?;

        // A concurrent load may have rebuilt the maps while the backend ran
        let mut guard = self.maps();
        let maps = &mut *guard;
        if let Some(owner) = maps.paths.get(path) {
            if owner != device {
                warn!(
                    "Mounted {} at {} but the table now records {} there",
                    device, path, owner
                );
                return Err(MountError::Exists {
                    path: path.to_string(),
                    device: owner.clone(),
                });
            }
        }
        let entry = maps
            .mounts
            .entry(device.to_string())
            .or_insert_with(|| MountEntry::new(minor, fs));
        if entry.fs != fs {
            warn!(
                "Mounted {} at {} as {} but the table now records fs {}",
                device, path, fs, entry.fs
            );
            return Err(fs_mismatch(device, &entry.fs, fs));
        }
        if !entry.has_target(path) {
            entry.targets.push(PathInfo::new(path));
        }
        maps.paths.insert(path.to_string(), device.to_string());
        info!("Mounted {} at {} ({})", device, path, fs);
        Ok(())
    }

    /// Remove bookkeeping for a path the backend has just unmounted
    fn forget_mount(&self, device: &str, path: &str) {
        let mut maps = self.maps();
        if maps.paths.remove(path).is_none() {
            warn!("Path {:?} for device {:?} does not exist in pathMap", path, device);
        }

        let now_empty = match maps.mounts.get_mut(device) {
            Some(entry) => {
                if let Some(index) = entry.targets.iter().position(|t| t.path == path) {
                    entry.targets.swap_remove(index);
                }
                entry.targets.is_empty()
            }
            None => false,
        };
        if now_empty {
            maps.mounts.remove(device);
            debug!("Removed {} from mount table: no mountpoints left", device);
        }
    }

    /// Read-only snapshot of the whole table
    pub fn snapshot(&self) -> TableSnapshot {
        let maps = self.maps();
        let mut devices: Vec<DeviceSnapshot> = maps
            .mounts
            .iter()
            .map(|(device, entry)| {
                let mut paths: Vec<String> = entry.targets.iter().map(|t| t.path.clone()).collect();
                paths.sort();
                DeviceSnapshot {
                    device: device.clone(),
                    minor: entry.minor,
                    fs: entry.fs.clone(),
                    paths,
                }
            })
            .collect();
        devices.sort_by(|a, b| a.device.cmp(&b.device));

        TableSnapshot {
            mount_type: self.variant.mount_type(),
            taken_at: Utc::now(),
            allowed_dirs: self.allowed_dirs.clone(),
            devices,
            device_locks: self.shared.device_locks.metrics(),
            path_locks: self.shared.path_locks.metrics(),
        }
    }

    /// Schedule removal of `path` and return the task handle, if any was scheduled
    pub fn schedule_path_removal(&self, path: &str) -> Result<Option<TaskId>> {
        reclaim::schedule_path_removal(
            &self.shared,
            &self.attributes,
            self.scheduler.as_ref(),
            normalize_mount_path(path),
            self.remove_delay,
        )
    }

    /// Cancel a pending path removal
    pub fn cancel_path_removal(&self, id: TaskId) -> bool {
        self.scheduler.cancel(id)
    }
}

impl Manager for MountTable {
    fn reload(&self, device: &str) -> Result<()> {
        let records: Vec<MountRecord> = self
            .variant
            .discover(&[], &self.mountinfo_path)?
            .into_iter()
            .filter(|r| r.source == device)
            .collect();

        let mut maps = self.maps();
        maps.mounts.remove(device);
        maps.paths.retain(|_, owner| owner != device);
        for record in &records {
            maps.insert_record(record);
        }
        info!("Reloaded {}: {} mountpoint(s)", device, records.len());
        Ok(())
    }

    fn load(&self, identifiers: &[String]) -> Result<()> {
        let records = self.variant.discover(identifiers, &self.mountinfo_path)?;

        let mut maps = self.maps();
        maps.mounts.clear();
        maps.paths.clear();
        for record in &records {
            maps.insert_record(record);
        }
        info!(
            "Loaded {} device(s) for {} mount table",
            maps.mounts.len(),
            self.variant.mount_type()
        );
        Ok(())
    }

    fn inspect(&self, device: &str) -> Option<Vec<PathInfo>> {
        self.maps().mounts.get(device).map(|e| e.targets.clone())
    }

    fn mounts(&self, device: &str) -> Vec<String> {
        self.maps()
            .mounts
            .get(device)
            .map(|e| e.targets.iter().map(|t| t.path.clone()).collect())
            .unwrap_or_default()
    }

    fn has_mounts(&self, device: &str) -> usize {
        self.maps()
            .mounts
            .get(device)
            .map(|e| e.targets.len())
            .unwrap_or(0)
    }

    fn has_target(&self, path: &str) -> Option<String> {
        self.shared.find_device_by_path(normalize_mount_path(path))
    }

    fn exists(&self, device: &str, path: &str) -> Result<bool> {
        let maps = self.maps();
        let entry = maps.mounts.get(device).ok_or(MountError::NotMounted)?;
        Ok(entry.has_target(normalize_mount_path(path)))
    }

    fn get_source_path(&self, mount_path: &str) -> Result<String> {
        self.shared
            .find_device_by_path(normalize_mount_path(mount_path))
            .ok_or(MountError::NotMounted)
    }

    fn get_source_paths(&self) -> Vec<String> {
        self.maps().mounts.keys().cloned().collect()
    }

    fn mount(
        &self,
        minor: i32,
        device: &str,
        path: &str,
        fs: &str,
        flags: u64,
        data: &str,
        timeout: Duration,
    ) -> Result<()> {
        let path = normalize_mount_path(path);
        self.check_allowed(path)?;

        if let Some(owner) = self.maps().paths.get(path).cloned() {
            if owner != device {
                warn!("cannot mount {:?}, device {:?} is mounted at {:?}", device, owner, path);
                return Err(MountError::Exists {
                    path: path.to_string(),
                    device: owner,
                });
            }
        }

        let _device_guard = self.shared.device_locks.acquire(device);
        self.mount_locked(minor, device, path, fs, flags, data, timeout)
    }

    fn unmount(
        &self,
        device: &str,
        path: &str,
        flags: i32,
        timeout: Duration,
        remove_path: bool,
    ) -> Result<()> {
        let path = normalize_mount_path(path);
        if !self.maps().mounts.contains_key(device) {
            return Err(MountError::NotMounted);
        }

        let mut device_guard = self.shared.device_locks.acquire(device);
        {
            // Garbage collected, or dropped by a load, while we waited
            let maps = self.maps();
            let entry = maps.mounts.get(device).ok_or(MountError::NotMounted)?;
            if !entry.has_target(path) {
                warn!("Device {:?} is not mounted at path {:?}", device, path);
                return Ok(());
            }
        }

        let mut path_guard = self.shared.path_locks.acquire(path);
        self.backend.unmount(path, flags, timeout)?;
        self.forget_mount(device, path);
        info!("Unmounted {} from {}", device, path);
        path_guard.release();
        device_guard.release();

        if remove_path {
            if let Err(e) = self.schedule_path_removal(path) {
                warn!("Unmounted {} but could not schedule removal: {}", path, e);
            }
        }
        Ok(())
    }

    fn remove_mount_path(&self, path: &str) -> Result<()> {
        self.schedule_path_removal(path).map(|_| ())
    }
}

fn fs_mismatch(device: &str, recorded: &str, requested: &str) -> MountError {
    MountError::InvalidArgument(format!(
        "{} is mounted with fs {}, requested {}",
        device, recorded, requested
    ))
}

impl fmt::Display for MountTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.snapshot();
        writeln!(
            f,
            "{} mount table ({} device(s), allowed dirs: {:?})",
            snapshot.mount_type,
            snapshot.devices.len(),
            snapshot.allowed_dirs
        )?;
        for device in &snapshot.devices {
            writeln!(
                f,
                "  {} minor={} fs={} paths=[{}]",
                device.device,
                device.minor,
                device.fs,
                device.paths.join(", ")
            )?;
        }
        Ok(())
    }
}

impl fmt::Debug for MountTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MountTable")
            .field("variant", &self.variant)
            .field("maps", &*self.maps())
            .field("allowed_dirs", &self.allowed_dirs)
            .field("remove_delay", &self.remove_delay)
            .finish()
    }
}
