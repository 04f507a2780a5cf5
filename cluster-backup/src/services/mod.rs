pub mod backup;
pub mod catalog;
pub mod restore;
pub mod scope;

pub use backup::{BackupKind, BackupOrchestrator};
pub use catalog::BackupCatalog;
pub use restore::RestoreOrchestrator;
