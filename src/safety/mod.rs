//! Locking and deferred work
//!
//! The per-path lock provider and the delay scheduler the mount table builds on.

pub mod lock_manager;
pub mod scheduler;

pub use lock_manager::{KeyLock, KeyLockGuard, KeyLockMetrics};
pub use scheduler::{schedule_once, DelayScheduler, Task, TaskId, TimerScheduler};
