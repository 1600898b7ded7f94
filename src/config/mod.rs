//! Configuration and shared types
//!
//! Error and value types used across the crate, plus the JSON mounter config.

pub mod loader;
pub mod types;

pub use loader::MounterConfig;
