use crate::snapshot::PlaybackSnapshot;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Durable single-row store shared by all participants (last writer wins).
///
/// Every successful `put` is delivered to all participants, the writer
/// included, as a snapshot-replaced notification.
#[async_trait::async_trait]
pub trait SharedStateStore: Send + Sync {
    async fn put(&self, snapshot: &PlaybackSnapshot) -> Result<(), StoreError>;

    /// `Ok(None)` means nothing has been shared yet
    async fn get(&self) -> Result<Option<PlaybackSnapshot>, StoreError>;
}
