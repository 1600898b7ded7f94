/// Delayed task scheduling
///
/// Callbacks run on their own threads, decoupled from the call that scheduled
/// them. A single worker thread tracks deadlines and wakes on a channel when
/// the task set changes.
use crate::config::types::{MountError, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub type Task = Box<dyn FnMut() + Send + 'static>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) fn from_raw(raw: u64) -> Self {
        TaskId(raw)
    }
}

pub trait DelayScheduler: Send + Sync {
    /// Run `task` at `first_run_at` and then every `interval`, or only once
    /// when `run_once` is set.
    fn schedule(
        &self,
        task: Task,
        interval: Duration,
        first_run_at: Instant,
        run_once: bool,
    ) -> Result<TaskId>;

    /// Drop a pending task. Returns false if it already ran (run-once) or is unknown.
    fn cancel(&self, id: TaskId) -> bool;
}

/// Schedule `task` to run a single time after `delay`
pub fn schedule_once(scheduler: &dyn DelayScheduler, delay: Duration, task: Task) -> Result<TaskId> {
    scheduler.schedule(task, Duration::from_secs(1), Instant::now() + delay, true)
}

struct ScheduledTask {
    task: Arc<Mutex<Task>>,
    next_run: Instant,
    interval: Duration,
    run_once: bool,
}

#[derive(Default)]
struct SchedulerState {
    tasks: HashMap<TaskId, ScheduledTask>,
    deadlines: BinaryHeap<Reverse<(Instant, TaskId)>>,
    /// Tasks taken off the heap whose threads have not finished
    running: usize,
    shut_down: bool,
}

impl SchedulerState {
    fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.peek().map(|Reverse((at, _))| *at)
    }

    /// Pop every task whose deadline has passed, rescheduling periodic ones
    fn take_due(&mut self, now: Instant) -> Vec<(TaskId, Arc<Mutex<Task>>)> {
        let mut due = Vec::new();
        while let Some(Reverse((at, id))) = self.deadlines.peek().copied() {
            if at > now {
                break;
            }
            self.deadlines.pop();

            // Heap entries outlive cancellation; skip anything stale
            let Some(entry) = self.tasks.get_mut(&id) else {
                continue;
            };
            if entry.next_run != at {
                continue;
            }

            due.push((id, Arc::clone(&entry.task)));
            self.running += 1;
            if entry.run_once || entry.interval.is_zero() {
                self.tasks.remove(&id);
            } else {
                entry.next_run = now + entry.interval;
                self.deadlines.push(Reverse((entry.next_run, id)));
            }
        }
        due
    }
}

/// Thread-backed [`DelayScheduler`]
pub struct TimerScheduler {
    state: Arc<Mutex<SchedulerState>>,
    wake: Sender<()>,
    worker: Mutex<Option<JoinHandle<()>>>,
    next_id: AtomicU64,
}

fn lock_state(state: &Mutex<SchedulerState>) -> MutexGuard<'_, SchedulerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl TimerScheduler {
    pub fn new() -> Result<Self> {
        let state = Arc::new(Mutex::new(SchedulerState::default()));
        let (wake, wake_rx) = crossbeam_channel::unbounded();

        let worker_state = Arc::clone(&state);
        let worker = thread::Builder::new()
            .name("mounttab-scheduler".to_string())
            .spawn(move || Self::run_worker(worker_state, wake_rx))
            .map_err(|e| MountError::Scheduler(format!("Failed to start scheduler thread: {}", e)))?;

        Ok(Self {
            state,
            wake,
            worker: Mutex::new(Some(worker)),
            next_id: AtomicU64::new(1),
        })
    }

    fn run_worker(state: Arc<Mutex<SchedulerState>>, wake: Receiver<()>) {
        debug!("Scheduler worker started");
        loop {
            let next = {
                let state = lock_state(&state);
                if state.shut_down {
                    break;
                }
                state.next_deadline()
            };

            let woke = match next {
                Some(at) => wake.recv_timeout(at.saturating_duration_since(Instant::now())),
                None => wake.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            if let Err(RecvTimeoutError::Disconnected) = woke {
                break;
            }

            let due = lock_state(&state).take_due(Instant::now());
            for (id, task) in due {
                let task_state = Arc::clone(&state);
                let spawned = thread::Builder::new()
                    .name(format!("mounttab-task-{}", id.0))
                    .spawn(move || {
                        {
                            let mut guard = task.lock().unwrap_or_else(PoisonError::into_inner);
                            let run: &mut Task = &mut guard;
                            run();
                        }
                        lock_state(&task_state).running -= 1;
                    });
                if let Err(e) = spawned {
                    error!("Failed to start thread for scheduled task {}: {}", id.0, e);
                    lock_state(&state).running -= 1;
                }
            }
        }
        debug!("Scheduler worker exiting");
    }

    /// Number of tasks still waiting to run
    pub fn pending(&self) -> usize {
        lock_state(&self.state).tasks.len()
    }

    /// Block until nothing is pending or running, or `limit` passes.
    /// Returns true if the scheduler went idle.
    pub fn wait_idle(&self, limit: Duration) -> bool {
        let start = Instant::now();
        loop {
            {
                let state = lock_state(&self.state);
                if state.tasks.is_empty() && state.running == 0 {
                    return true;
                }
            }
            if start.elapsed() >= limit {
                return false;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    /// Stop the worker. Pending tasks are discarded and later schedules fail.
    pub fn shutdown(&self) {
        {
            let mut state = lock_state(&self.state);
            if state.shut_down {
                return;
            }
            state.shut_down = true;
            state.tasks.clear();
            state.deadlines.clear();
        }
        let _ = self.wake.send(());

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = worker {
            if handle.join().is_err() {
                error!("Scheduler worker panicked");
            }
        }
        info!("Scheduler shut down");
    }
}

impl DelayScheduler for TimerScheduler {
    fn schedule(
        &self,
        task: Task,
        interval: Duration,
        first_run_at: Instant,
        run_once: bool,
    ) -> Result<TaskId> {
        let id = TaskId::from_raw(self.next_id.fetch_add(1, Ordering::Relaxed));
        {
            let mut state = lock_state(&self.state);
            if state.shut_down {
                return Err(MountError::Scheduler("scheduler is shut down".to_string()));
            }
            state.tasks.insert(
                id,
                ScheduledTask {
                    task: Arc::new(Mutex::new(task)),
                    next_run: first_run_at,
                    interval,
                    run_once,
                },
            );
            state.deadlines.push(Reverse((first_run_at, id)));
        }

        self.wake
            .send(())
            .map_err(|_| MountError::Scheduler("scheduler worker is gone".to_string()))?;
        Ok(id)
    }

    fn cancel(&self, id: TaskId) -> bool {
        lock_state(&self.state).tasks.remove(&id).is_some()
    }
}

impl Drop for TimerScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn wait_for(counter: &AtomicUsize, expected: usize, limit: Duration) -> bool {
        let start = Instant::now();
        while start.elapsed() < limit {
            if counter.load(Ordering::SeqCst) >= expected {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_run_once_fires_once() {
        let scheduler = TimerScheduler::new().unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);

        scheduler
            .schedule(
                Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
                Duration::from_millis(10),
                Instant::now() + Duration::from_millis(20),
                true,
            )
            .unwrap();

        assert!(wait_for(&runs, 1, Duration::from_secs(5)));
        thread::sleep(Duration::from_millis(100));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn test_periodic_task_repeats() {
        let scheduler = TimerScheduler::new().unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);

        let id = scheduler
            .schedule(
                Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
                Duration::from_millis(10),
                Instant::now(),
                false,
            )
            .unwrap();

        assert!(wait_for(&runs, 3, Duration::from_secs(5)));
        assert!(scheduler.cancel(id));
        assert!(!scheduler.cancel(id));
    }

    #[test]
    fn test_cancel_before_deadline() {
        let scheduler = TimerScheduler::new().unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);

        let id = schedule_once(
            &scheduler,
            Duration::from_millis(50),
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();
        assert_eq!(scheduler.pending(), 1);
        assert!(scheduler.cancel(id));

        thread::sleep(Duration::from_millis(150));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_wait_idle_covers_running_task() {
        let scheduler = TimerScheduler::new().unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);

        schedule_once(
            &scheduler,
            Duration::from_millis(10),
            Box::new(move || {
                thread::sleep(Duration::from_millis(50));
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();

        assert!(scheduler.wait_idle(Duration::from_secs(5)));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_schedule_after_shutdown_fails() {
        let scheduler = TimerScheduler::new().unwrap();
        scheduler.shutdown();
        let result = schedule_once(&scheduler, Duration::ZERO, Box::new(|| {}));
        assert!(matches!(result, Err(MountError::Scheduler(_))));
        // Second shutdown is a no-op
        scheduler.shutdown();
    }
}
