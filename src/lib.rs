// Synchronized playback of a shared video across independent players

pub mod clock;
pub mod config;
pub mod event_channel;
pub mod player;
pub mod session;
pub mod shared_state;
pub mod snapshot;
pub mod sync;

pub use config::SyncConfig;
pub use snapshot::{MediaId, PlaybackAction, PlaybackCommand, PlaybackSnapshot};
pub use sync::{Capabilities, SyncEngine, SyncHandle, SyncProgress, SyncService, SyncStatus};

// Test support (unit tests, or the test-utils feature)
#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;
