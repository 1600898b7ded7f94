//! Delayed mountpoint reclamation.
//!
//! After an unmount the mountpoint directory is removed some time later on a
//! scheduler thread. The task takes the path lock, so it never overlaps a
//! mount or unmount of the same path, and leaves the directory alone if a
//! device has been mounted there again in the meantime.

use crate::config::types::{MountError, Result};
use crate::kernel::mount::MountpathAttributes;
use crate::safety::{schedule_once, DelayScheduler, TaskId};
use crate::table::mount_table::TableShared;
use log::{error, info, warn};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// What one reclamation attempt did
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReclaimOutcome {
    Removed,
    /// A device claimed the path again; attribute and directory left untouched
    StillMounted { device: String },
    AttributeFailed,
    RemoveFailed,
}

/// Schedule removal of `path` after `delay`. Nothing is scheduled if the path
/// does not exist.
pub(crate) fn schedule_path_removal(
    shared: &Arc<TableShared>,
    attributes: &Arc<dyn MountpathAttributes>,
    scheduler: &dyn DelayScheduler,
    path: &str,
    delay: Duration,
) -> Result<Option<TaskId>> {
    if !Path::new(path).exists() {
        return Ok(None);
    }

    let task_shared = Arc::clone(shared);
    let task_attributes = Arc::clone(attributes);
    let task_path = path.to_string();
    let task = Box::new(move || {
        reclaim_path(&task_shared, task_attributes.as_ref(), &task_path);
    });

    match schedule_once(scheduler, delay, task) {
        Ok(id) => {
            info!("Scheduled removal of mount path {} in {:?}", path, delay);
            Ok(Some(id))
        }
        Err(e) => {
            error!("Failed to schedule task to remove path:{}. Err: {}", path, e);
            Err(match e {
                MountError::Scheduler(_) => e,
                other => MountError::Scheduler(other.to_string()),
            })
        }
    }
}

/// One reclamation attempt. Failures are logged and not retried.
pub(crate) fn reclaim_path(
    shared: &TableShared,
    attributes: &dyn MountpathAttributes,
    path: &str,
) -> ReclaimOutcome {
    let _guard = shared.path_locks.acquire(path);

    if let Some(device) = shared.find_device_by_path(path) {
        info!(
            "Not removing immutable attribute from {} as {} is mounted on it",
            path, device
        );
        return ReclaimOutcome::StillMounted { device };
    }

    let target = Path::new(path);
    if target.exists() {
        if let Err(e) = attributes.clear_immutable(target) {
            warn!("Failed to make path: {} writeable. Err: {}", path, e);
            return ReclaimOutcome::AttributeFailed;
        }
    }

    info!("Removing mount path directory: {}", path);
    if let Err(e) = fs::remove_dir(target) {
        warn!("Failed to remove path: {} Err: {}", path, e);
        return ReclaimOutcome::RemoveFailed;
    }
    ReclaimOutcome::Removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ManualScheduler, RecordingAttributes};
    use std::path::PathBuf;

    fn temp_mountpoint(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("mounttab_reclaim_{}_{}", name, std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_reclaim_removes_directory() {
        let dir = temp_mountpoint("removes");
        let shared = TableShared::new();
        let attributes = RecordingAttributes::new();

        let outcome = reclaim_path(&shared, &attributes, dir.to_str().unwrap());
        assert_eq!(outcome, ReclaimOutcome::Removed);
        assert!(!dir.exists());
        assert_eq!(attributes.cleared(), vec![dir.clone()]);
        assert!(!shared.path_locks.is_held(dir.to_str().unwrap()));
    }

    #[test]
    fn test_reclaim_waits_for_path_lock() {
        let dir = temp_mountpoint("waits");
        let path = dir.to_str().unwrap().to_string();
        let shared = TableShared::new();
        let attributes = RecordingAttributes::new();
        let finished = std::sync::atomic::AtomicBool::new(false);

        let guard = shared.path_locks.acquire(&path);
        std::thread::scope(|s| {
            let reclaimer = s.spawn(|| {
                let outcome = reclaim_path(&shared, &attributes, &path);
                finished.store(true, std::sync::atomic::Ordering::SeqCst);
                outcome
            });

            std::thread::sleep(Duration::from_millis(100));
            assert!(!finished.load(std::sync::atomic::Ordering::SeqCst));
            assert!(dir.exists());
            assert!(attributes.cleared().is_empty());

            drop(guard);
            assert_eq!(reclaimer.join().unwrap(), ReclaimOutcome::Removed);
        });
        assert!(!dir.exists());
    }

    #[test]
    fn test_reclaim_stops_when_attribute_clear_fails() {
        let dir = temp_mountpoint("attr_fail");
        let shared = TableShared::new();
        let attributes = RecordingAttributes::new();
        attributes.fail_clear(true);

        let outcome = reclaim_path(&shared, &attributes, dir.to_str().unwrap());
        assert_eq!(outcome, ReclaimOutcome::AttributeFailed);
        assert!(dir.exists());

        fs::remove_dir(&dir).unwrap();
    }

    #[test]
    fn test_reclaim_leaves_non_empty_directory() {
        let dir = temp_mountpoint("non_empty");
        fs::write(dir.join("data"), b"payload").unwrap();
        let shared = TableShared::new();
        let attributes = RecordingAttributes::new();

        let outcome = reclaim_path(&shared, &attributes, dir.to_str().unwrap());
        assert_eq!(outcome, ReclaimOutcome::RemoveFailed);
        assert!(dir.join("data").exists());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_missing_path_schedules_nothing() {
        let shared = Arc::new(TableShared::new());
        let attributes: Arc<dyn MountpathAttributes> = Arc::new(RecordingAttributes::new());
        let scheduler = ManualScheduler::new();

        let scheduled = schedule_path_removal(
            &shared,
            &attributes,
            &scheduler,
            "/nonexistent/mounttab-reclaim",
            Duration::from_secs(30),
        )
        .unwrap();
        assert!(scheduled.is_none());
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn test_scheduler_rejection_is_reported() {
        let dir = temp_mountpoint("rejected");
        let shared = Arc::new(TableShared::new());
        let attributes: Arc<dyn MountpathAttributes> = Arc::new(RecordingAttributes::new());
        let scheduler = ManualScheduler::new();
        scheduler.reject(true);

        let result = schedule_path_removal(
            &shared,
            &attributes,
            &scheduler,
            dir.to_str().unwrap(),
            Duration::from_secs(30),
        );
        assert!(matches!(result, Err(MountError::Scheduler(_))));
        assert!(dir.exists());

        fs::remove_dir(&dir).unwrap();
    }
}
