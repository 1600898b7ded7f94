//! Testing infrastructure
//!
//! In-process doubles for the mount table's collaborators.

pub mod doubles;
pub mod manual_scheduler;

pub use doubles::{BackendCall, RecordingAttributes, RecordingBackend};
pub use manual_scheduler::ManualScheduler;
