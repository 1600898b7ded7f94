/// Scheduler that holds tasks until the test runs them
use crate::config::types::{MountError, Result};
use crate::safety::{DelayScheduler, Task, TaskId};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

struct Captured {
    id: TaskId,
    delay: Duration,
    task: Task,
}

#[derive(Default)]
pub struct ManualScheduler {
    tasks: Mutex<Vec<Captured>>,
    delays: Mutex<Vec<Duration>>,
    next_id: AtomicU64,
    rejecting: AtomicBool,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn tasks(&self) -> MutexGuard<'_, Vec<Captured>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every later `schedule` call fail
    pub fn reject(&self, reject: bool) {
        self.rejecting.store(reject, Ordering::SeqCst);
    }

    pub fn pending(&self) -> usize {
        self.tasks().len()
    }

    /// Delay requested by each schedule call, measured when it was made
    pub fn delays(&self) -> Vec<Duration> {
        self.delays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Run every captured task on the calling thread. Returns how many ran.
    pub fn run_all(&self) -> usize {
        // Tasks may schedule again; never run them with the list locked
        let due: Vec<Captured> = std::mem::take(&mut *self.tasks());
        let count = due.len();
        for mut captured in due {
            (captured.task)();
        }
        count
    }
}

impl DelayScheduler for ManualScheduler {
    fn schedule(
        &self,
        task: Task,
        _interval: Duration,
        first_run_at: Instant,
        _run_once: bool,
    ) -> Result<TaskId> {
        if self.rejecting.load(Ordering::SeqCst) {
            return Err(MountError::Scheduler("scheduler rejected task".to_string()));
        }
        let delay = first_run_at.saturating_duration_since(Instant::now());
        let id = TaskId::from_raw(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.delays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(delay);
        self.tasks().push(Captured { id, delay, task });
        Ok(id)
    }

    fn cancel(&self, id: TaskId) -> bool {
        let mut tasks = self.tasks();
        let before = tasks.len();
        tasks.retain(|c| c.id != id);
        tasks.len() != before
    }
}

impl std::fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pending: Vec<(TaskId, Duration)> = self.tasks().iter().map(|c| (c.id, c.delay)).collect();
        f.debug_struct("ManualScheduler").field("pending", &pending).finish()
    }
}
