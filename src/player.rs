use crate::snapshot::{MediaId, PlaybackAction};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlayerError {
    #[error("Player not ready: {0}")]
    NotReady(String),
    #[error("Load failed: {0}")]
    Load(String),
    #[error("Player command failed: {0}")]
    Command(String),
}

/// Play/pause edge reported by the embedded player
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerEventKind {
    Play,
    Pause,
}

impl PlayerEventKind {
    pub fn is_play(self) -> bool {
        matches!(self, PlayerEventKind::Play)
    }
}

impl From<PlayerEventKind> for PlaybackAction {
    fn from(kind: PlayerEventKind) -> Self {
        match kind {
            PlayerEventKind::Play => PlaybackAction::Play,
            PlayerEventKind::Pause => PlaybackAction::Pause,
        }
    }
}

/// Handle to a ready player instance.
///
/// Handed to the engine with the `ready` notification and owned by it until
/// the next load replaces it.
#[async_trait::async_trait]
pub trait MediaPlayer: Send + Sync {
    async fn play(&mut self) -> Result<(), PlayerError>;
    async fn pause(&mut self) -> Result<(), PlayerError>;
    async fn seek(&mut self, position_secs: f64) -> Result<(), PlayerError>;
    async fn position(&self) -> Result<f64, PlayerError>;
}

/// The player embedding: loads a media and later reports `ready` with a
/// fresh [`MediaPlayer`] handle.
#[async_trait::async_trait]
pub trait MediaLoader: Send + Sync {
    async fn load(&self, media_id: &MediaId) -> Result<(), PlayerError>;
}
