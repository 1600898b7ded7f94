//! Mount bookkeeping
//!
//! The table itself, the delayed mountpoint reclamation it drives, and the
//! variant selector that decides which live mounts belong to a driver.

pub mod manager;
pub mod mount_table;
pub mod reclaim;
pub mod variant;

pub use manager::Manager;
pub use mount_table::{MountTable, MountTableBuilder};
pub use reclaim::ReclaimOutcome;
pub use variant::{new_mounter, CustomLoader, MountVariant};
