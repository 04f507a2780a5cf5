//! Utility modules shared by the orchestrators.

pub mod errors;
pub mod logger;

pub use errors::{BackupError, Result};
