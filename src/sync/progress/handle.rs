use super::SyncProgress;
use crate::sync::engine::SyncStatus;
use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};
use tokio::sync::mpsc as tokio_mpsc;
use tracing::info;

type SubscriptionId = u64;

#[derive(Default)]
struct Subscribers {
    senders: HashMap<SubscriptionId, tokio_mpsc::UnboundedSender<SyncProgress>>,
    /// Status from the last `StateChanged` fanned out
    current_status: Option<SyncStatus>,
}

/// Handle for subscribing to sync progress updates.
///
/// A new subscriber first receives a `StateChanged` carrying the current
/// status, then every update after it.
#[derive(Clone)]
pub struct SyncProgressHandle {
    subscribers: Arc<Mutex<Subscribers>>,
    next_id: Arc<AtomicU64>,
}

impl SyncProgressHandle {
    /// Create a progress handle and spawn the task fanning updates out
    pub fn new(
        mut progress_rx: tokio_mpsc::UnboundedReceiver<SyncProgress>,
        runtime_handle: tokio::runtime::Handle,
    ) -> Self {
        let subscribers = Arc::new(Mutex::new(Subscribers::default()));
        let fan_out = subscribers.clone();

        runtime_handle.spawn(async move {
            while let Some(progress) = progress_rx.recv().await {
                let Ok(mut subscribers) = fan_out.lock() else {
                    break;
                };

                if let SyncProgress::StateChanged { status } = &progress {
                    subscribers.current_status = Some(status.clone());
                }
                // A failed send means the receiver was dropped
                subscribers
                    .senders
                    .retain(|_, tx| tx.send(progress.clone()).is_ok());
            }
            info!("Sync progress channel closed, exiting");
        });

        Self {
            subscribers,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Subscribe to all sync progress updates.
    /// Subscription is removed when the receiver is dropped.
    pub fn subscribe_all(&self) -> tokio_mpsc::UnboundedReceiver<SyncProgress> {
        let (tx, rx) = tokio_mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        if let Ok(mut subscribers) = self.subscribers.lock() {
            if let Some(status) = subscribers.current_status.clone() {
                let _ = tx.send(SyncProgress::StateChanged { status });
            }
            subscribers.senders.insert(id, tx);
        }
        rx
    }
}
