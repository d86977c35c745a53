pub mod handle;

use crate::snapshot::{MediaId, PlaybackAction, PlaybackCommand, PlaybackSnapshot};
use crate::sync::engine::SyncStatus;
pub use handle::SyncProgressHandle;

/// Why a snapshot was written to the shared store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteReason {
    Share,
    Transition,
    Checkpoint,
}

/// Progress updates emitted by the sync engine
#[derive(Debug, Clone)]
pub enum SyncProgress {
    StateChanged {
        status: SyncStatus,
    },
    SnapshotWritten {
        snapshot: PlaybackSnapshot,
        reason: WriteReason,
    },
    CommandBroadcast {
        command: PlaybackCommand,
    },
    /// Local player was driven to the shared position and play state
    PlayerSynced {
        media_id: MediaId,
        position_secs: Option<f64>,
        is_playing: bool,
    },
    DriftCorrected {
        drift_secs: f64,
        position_secs: f64,
    },
    EchoSuppressed {
        action: PlaybackAction,
    },
}
