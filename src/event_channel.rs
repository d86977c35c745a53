use crate::snapshot::PlaybackCommand;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Send failed: {0}")]
    Send(String),
}

/// Broadcast channel for transient playback commands.
///
/// Delivery is at-least-once and unordered across senders; the sender may
/// receive its own command back.
#[async_trait::async_trait]
pub trait EventChannel: Send + Sync {
    async fn send(&self, command: PlaybackCommand) -> Result<(), ChannelError>;
}
