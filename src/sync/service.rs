use crate::config::SyncConfig;
use crate::player::{MediaPlayer, PlayerEventKind};
use crate::snapshot::{MediaId, PlaybackCommand, PlaybackSnapshot};
use crate::sync::engine::{Capabilities, SyncEngine, SyncNotification, SyncStatus};
use crate::sync::progress::{SyncProgress, SyncProgressHandle};
use tokio::sync::{mpsc as tokio_mpsc, watch};
use tracing::{debug, info, warn};

/// Handle to the sync service for feeding it notifications.
///
/// Every method only enqueues; the service applies notifications one at a
/// time in the order they were sent.
#[derive(Clone)]
pub struct SyncHandle {
    notification_tx: tokio_mpsc::UnboundedSender<SyncNotification>,
    progress_handle: SyncProgressHandle,
    status_rx: watch::Receiver<SyncStatus>,
}

impl SyncHandle {
    /// Local user shared a new, already validated media locator
    pub fn share(&self, media_id: MediaId) {
        self.send(SyncNotification::LocalShare(media_id));
    }

    /// Player instance finished loading and accepts commands
    pub fn adapter_ready(&self, player: Box<dyn MediaPlayer>) {
        self.send(SyncNotification::AdapterReady(player));
    }

    /// Local player reported a play/pause edge
    pub fn player_event(&self, kind: PlayerEventKind, position_secs: f64) {
        self.send(SyncNotification::LocalPlayerEvent {
            kind,
            position_secs,
        });
    }

    pub fn position_changed(&self, position_secs: f64) {
        self.send(SyncNotification::PositionChanged { position_secs });
    }

    /// Command delivered by the event channel
    pub fn remote_command(&self, command: PlaybackCommand) {
        self.send(SyncNotification::RemoteCommand(command));
    }

    /// Snapshot-replaced notification delivered by the shared store
    pub fn remote_snapshot(&self, snapshot: PlaybackSnapshot) {
        self.send(SyncNotification::RemoteSnapshot(snapshot));
    }

    pub fn reload(&self) {
        self.send(SyncNotification::Reload);
    }

    pub fn player_closed(&self) {
        self.send(SyncNotification::PlayerClosed);
    }

    /// Engine status after the most recently completed notification
    pub fn status(&self) -> SyncStatus {
        self.status_rx.borrow().clone()
    }

    pub fn subscribe_progress(&self) -> tokio_mpsc::UnboundedReceiver<SyncProgress> {
        self.progress_handle.subscribe_all()
    }

    fn send(&self, notification: SyncNotification) {
        if self.notification_tx.send(notification).is_err() {
            warn!("Sync service stopped, dropping notification");
        }
    }
}

/// Service task owning one [`SyncEngine`]
pub struct SyncService {
    engine: SyncEngine,
    notification_rx: tokio_mpsc::UnboundedReceiver<SyncNotification>,
    status_tx: watch::Sender<SyncStatus>,
}

impl SyncService {
    /// Spawn the service on `runtime_handle` and join the session
    pub fn start(
        config: SyncConfig,
        caps: Capabilities,
        runtime_handle: tokio::runtime::Handle,
    ) -> SyncHandle {
        let (notification_tx, notification_rx) = tokio_mpsc::unbounded_channel();
        let (progress_tx, progress_rx) = tokio_mpsc::unbounded_channel();

        let (status_tx, status_rx) = watch::channel(SyncStatus::Unattached);

        let progress_handle = SyncProgressHandle::new(progress_rx, runtime_handle.clone());

        let handle = SyncHandle {
            notification_tx,
            progress_handle,
            status_rx,
        };

        // Queued first so nothing the host sends can overtake it
        handle.send(SyncNotification::Join);

        let mut service = SyncService {
            engine: SyncEngine::new(config, caps, progress_tx),
            notification_rx,
            status_tx,
        };

        runtime_handle.spawn(async move {
            service.run().await;
        });

        handle
    }

    async fn run(&mut self) {
        info!("SyncService started");

        // Each notification runs to completion before the next is taken
        while let Some(notification) = self.notification_rx.recv().await {
            debug!("Handling {:?}", notification);
            if let Err(e) = self.engine.handle(notification).await {
                warn!("Sync transition failed: {}", e);
            }
            self.status_tx.send_replace(self.engine.status());
        }

        info!("SyncService stopped");
    }
}
