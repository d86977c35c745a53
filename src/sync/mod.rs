pub mod engine;
pub mod progress;
pub mod service;

pub use engine::{Capabilities, EngineState, SyncEngine, SyncError, SyncNotification, SyncStatus};
pub use progress::{SyncProgress, WriteReason};
pub use service::{SyncHandle, SyncService};
