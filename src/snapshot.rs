use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Opaque identifier of the shared video
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MediaId(String);

impl MediaId {
    pub fn new(id: impl Into<String>) -> Self {
        MediaId(id.into())
    }
}

impl fmt::Display for MediaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Durable, shared record of where playback is.
///
/// `position_seconds` is only valid at `captured_at_millis`; use
/// [`PlaybackSnapshot::position_at`] to get the position at any other time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackSnapshot {
    pub media_id: MediaId,
    pub position_seconds: f64,
    pub captured_at_millis: i64,
    pub is_playing: bool,
}

impl PlaybackSnapshot {
    /// Fresh snapshot for a newly shared media: paused at the start
    pub fn shared(media_id: MediaId, now_millis: i64) -> Self {
        PlaybackSnapshot {
            media_id,
            position_seconds: 0.0,
            captured_at_millis: now_millis,
            is_playing: false,
        }
    }

    /// Reconstruct the playback position at `now_millis`.
    ///
    /// Negative or non-finite positions clamp to zero, and a capture time in
    /// the future counts as zero elapsed time.
    pub fn position_at(&self, now_millis: i64) -> f64 {
        let base = if self.position_seconds.is_finite() {
            self.position_seconds.max(0.0)
        } else {
            0.0
        };

        if !self.is_playing {
            return base;
        }

        let elapsed_millis = now_millis.saturating_sub(self.captured_at_millis).max(0);
        base + elapsed_millis as f64 / 1000.0
    }

    /// Copy with the position clamped into a usable range
    pub fn sanitized(&self) -> Self {
        let mut snapshot = self.clone();
        if !snapshot.position_seconds.is_finite() || snapshot.position_seconds < 0.0 {
            warn!(
                "Clamping inconsistent snapshot position {} for {}",
                snapshot.position_seconds, snapshot.media_id
            );
            snapshot.position_seconds = 0.0;
        }
        snapshot
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode a stored blob. A malformed blob reads as "nothing shared yet".
    pub fn from_json(blob: &str) -> Option<Self> {
        match serde_json::from_str::<PlaybackSnapshot>(blob) {
            Ok(snapshot) => Some(snapshot.sanitized()),
            Err(e) => {
                warn!("Ignoring malformed playback snapshot: {}", e);
                None
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackAction {
    Play,
    Pause,
}

impl PlaybackAction {
    pub fn is_play(self) -> bool {
        matches!(self, PlaybackAction::Play)
    }
}

impl fmt::Display for PlaybackAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaybackAction::Play => f.write_str("play"),
            PlaybackAction::Pause => f.write_str("pause"),
        }
    }
}

/// Transient play/pause signal. Carries no position: receivers take the
/// position from the latest snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackCommand {
    pub action: PlaybackAction,
}

impl PlaybackCommand {
    pub fn play() -> Self {
        PlaybackCommand {
            action: PlaybackAction::Play,
        }
    }

    pub fn pause() -> Self {
        PlaybackCommand {
            action: PlaybackAction::Pause,
        }
    }
}
