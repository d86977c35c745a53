// # Sync Engine
//
// Explicit state machine that keeps the local player converged with the
// shared playback snapshot. One transition function per inbound
// notification; the service drives it one notification at a time.
//
// Echo suppression: `local_is_playing` is the only thing that decides
// whether a play/pause edge is new information. A local edge that matches it
// is an echo of a command the engine applied itself, and a remote command
// that matches it is already in effect. Neither is broadcast or applied.

use crate::clock::ClockSource;
use crate::config::SyncConfig;
use crate::event_channel::{ChannelError, EventChannel};
use crate::player::{MediaLoader, MediaPlayer, PlayerError, PlayerEventKind};
use crate::shared_state::{SharedStateStore, StoreError};
use crate::snapshot::{MediaId, PlaybackCommand, PlaybackSnapshot};
use crate::sync::progress::{SyncProgress, WriteReason};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc as tokio_mpsc;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Player error: {0}")]
    Player(#[from] PlayerError),
    #[error("Shared state error: {0}")]
    Store(#[from] StoreError),
    #[error("Event channel error: {0}")]
    Channel(#[from] ChannelError),
}

/// Capabilities supplied by the host application
#[derive(Clone)]
pub struct Capabilities {
    pub clock: Arc<dyn ClockSource>,
    pub loader: Arc<dyn MediaLoader>,
    pub store: Arc<dyn SharedStateStore>,
    pub channel: Arc<dyn EventChannel>,
}

/// Engine state. The player handle lives only in `Attached` and is replaced
/// wholesale on every load.
pub enum EngineState {
    Unattached,
    /// Load requested, waiting for the player to report ready
    Loading {
        media_id: MediaId,
    },
    Attached {
        media_id: MediaId,
        player: Box<dyn MediaPlayer>,
        local_is_playing: bool,
    },
}

impl EngineState {
    pub fn media_id(&self) -> Option<&MediaId> {
        match self {
            EngineState::Unattached => None,
            EngineState::Loading { media_id } | EngineState::Attached { media_id, .. } => {
                Some(media_id)
            }
        }
    }
}

/// Observable summary of [`EngineState`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    Unattached,
    Loading { media_id: MediaId },
    Attached { media_id: MediaId, is_playing: bool },
}

/// Inbound notifications, processed strictly in arrival order
pub enum SyncNotification {
    /// Read the shared store and load whatever is being watched
    Join,
    LocalShare(MediaId),
    AdapterReady(Box<dyn MediaPlayer>),
    LocalPlayerEvent {
        kind: PlayerEventKind,
        position_secs: f64,
    },
    PositionChanged {
        position_secs: f64,
    },
    RemoteCommand(PlaybackCommand),
    RemoteSnapshot(PlaybackSnapshot),
    Reload,
    PlayerClosed,
}

impl fmt::Debug for SyncNotification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncNotification::Join => f.write_str("Join"),
            SyncNotification::LocalShare(media_id) => {
                f.debug_tuple("LocalShare").field(media_id).finish()
            }
            SyncNotification::AdapterReady(_) => f.write_str("AdapterReady"),
            SyncNotification::LocalPlayerEvent {
                kind,
                position_secs,
            } => f
                .debug_struct("LocalPlayerEvent")
                .field("kind", kind)
                .field("position_secs", position_secs)
                .finish(),
            SyncNotification::PositionChanged { position_secs } => f
                .debug_struct("PositionChanged")
                .field("position_secs", position_secs)
                .finish(),
            SyncNotification::RemoteCommand(command) => {
                f.debug_tuple("RemoteCommand").field(command).finish()
            }
            SyncNotification::RemoteSnapshot(snapshot) => {
                f.debug_tuple("RemoteSnapshot").field(snapshot).finish()
            }
            SyncNotification::Reload => f.write_str("Reload"),
            SyncNotification::PlayerClosed => f.write_str("PlayerClosed"),
        }
    }
}

pub struct SyncEngine {
    config: SyncConfig,
    caps: Capabilities,
    progress_tx: tokio_mpsc::UnboundedSender<SyncProgress>,
    state: EngineState,
    /// Last snapshot this engine wrote or accepted
    latest: Option<PlaybackSnapshot>,
    last_checkpoint_millis: Option<i64>,
}

impl SyncEngine {
    pub fn new(
        config: SyncConfig,
        caps: Capabilities,
        progress_tx: tokio_mpsc::UnboundedSender<SyncProgress>,
    ) -> Self {
        SyncEngine {
            config,
            caps,
            progress_tx,
            state: EngineState::Unattached,
            latest: None,
            last_checkpoint_millis: None,
        }
    }

    pub fn status(&self) -> SyncStatus {
        match &self.state {
            EngineState::Unattached => SyncStatus::Unattached,
            EngineState::Loading { media_id } => SyncStatus::Loading {
                media_id: media_id.clone(),
            },
            EngineState::Attached {
                media_id,
                local_is_playing,
                ..
            } => SyncStatus::Attached {
                media_id: media_id.clone(),
                is_playing: *local_is_playing,
            },
        }
    }

    /// Last known local play flag; false unless a ready player is attached
    pub fn local_is_playing(&self) -> bool {
        matches!(
            self.state,
            EngineState::Attached {
                local_is_playing: true,
                ..
            }
        )
    }

    /// Dispatch one notification to its transition
    pub async fn handle(&mut self, notification: SyncNotification) -> Result<(), SyncError> {
        match notification {
            SyncNotification::Join => self.join().await,
            SyncNotification::LocalShare(media_id) => self.on_local_share(media_id).await,
            SyncNotification::AdapterReady(player) => self.on_adapter_ready(player).await,
            SyncNotification::LocalPlayerEvent {
                kind,
                position_secs,
            } => self.on_local_player_event(kind, position_secs).await,
            SyncNotification::PositionChanged { position_secs } => {
                self.on_position_changed(position_secs).await
            }
            SyncNotification::RemoteCommand(command) => self.on_remote_command(command).await,
            SyncNotification::RemoteSnapshot(snapshot) => self.on_remote_snapshot(snapshot).await,
            SyncNotification::Reload => self.reload().await,
            SyncNotification::PlayerClosed => {
                self.player_closed();
                Ok(())
            }
        }
    }

    /// Pick up whatever is already being watched
    pub async fn join(&mut self) -> Result<(), SyncError> {
        match self.caps.store.get().await? {
            Some(snapshot) => {
                let snapshot = snapshot.sanitized();
                info!("Joining session watching {}", snapshot.media_id);
                let media_id = snapshot.media_id.clone();
                self.latest = Some(snapshot);
                self.load(media_id).await
            }
            None => {
                info!("Nothing shared yet, staying unattached");
                Ok(())
            }
        }
    }

    /// Load a media into the player. Not a playback event: nothing is broadcast.
    pub async fn load(&mut self, media_id: MediaId) -> Result<(), SyncError> {
        info!("Loading media {}", media_id);
        self.caps.loader.load(&media_id).await?;

        self.last_checkpoint_millis = None;
        self.set_state(EngineState::Loading { media_id });
        Ok(())
    }

    /// The local user shared a new (already validated) media locator
    pub async fn on_local_share(&mut self, media_id: MediaId) -> Result<(), SyncError> {
        let snapshot = PlaybackSnapshot::shared(media_id.clone(), self.caps.clock.now_millis());
        self.caps.store.put(&snapshot).await?;
        info!("Shared media {}", media_id);

        self.latest = Some(snapshot.clone());
        self.emit(SyncProgress::SnapshotWritten {
            snapshot,
            reason: WriteReason::Share,
        });

        self.load(media_id).await
    }

    /// The player can accept commands: attach it and resynchronize from the
    /// latest snapshot.
    pub async fn on_adapter_ready(
        &mut self,
        player: Box<dyn MediaPlayer>,
    ) -> Result<(), SyncError> {
        let loading = self.state.media_id().cloned();
        let snapshot = self.latest_snapshot().await;

        let (media_id, snapshot) = match (loading, snapshot) {
            (Some(loading), Some(snapshot)) if snapshot.media_id != loading => {
                info!(
                    "Session moved on to {} while {} was loading",
                    snapshot.media_id, loading
                );
                return self.load(snapshot.media_id).await;
            }
            (Some(loading), snapshot) => (loading, snapshot),
            (None, Some(snapshot)) => (snapshot.media_id.clone(), Some(snapshot)),
            (None, None) => {
                warn!("Player ready but nothing is shared, ignoring");
                return Ok(());
            }
        };

        info!("Player ready for {}", media_id);
        self.set_state(EngineState::Attached {
            media_id,
            player,
            local_is_playing: false,
        });

        match snapshot {
            Some(snapshot) => {
                let position = snapshot.position_at(self.caps.clock.now_millis());
                self.drive_player(Some(position), snapshot.is_playing).await
            }
            None => Ok(()),
        }
    }

    /// The local player changed play state, by user action or as an echo of
    /// a command this engine applied.
    pub async fn on_local_player_event(
        &mut self,
        kind: PlayerEventKind,
        position_secs: f64,
    ) -> Result<(), SyncError> {
        let (media_id, local_is_playing) = match &self.state {
            EngineState::Attached {
                media_id,
                local_is_playing,
                ..
            } => (media_id.clone(), *local_is_playing),
            _ => {
                debug!("Dropping local {:?} event, player not attached", kind);
                return Ok(());
            }
        };

        if local_is_playing == kind.is_play() {
            debug!("Suppressing echo of {:?}", kind);
            self.emit(SyncProgress::EchoSuppressed {
                action: kind.into(),
            });
            return Ok(());
        }

        let now = self.caps.clock.now_millis();
        let snapshot = PlaybackSnapshot {
            media_id,
            position_seconds: position_secs,
            captured_at_millis: now,
            is_playing: kind.is_play(),
        }
        .sanitized();

        // Local state stays unchanged until the write lands
        self.caps.store.put(&snapshot).await?;
        self.latest = Some(snapshot.clone());
        self.last_checkpoint_millis = Some(now);
        self.emit(SyncProgress::SnapshotWritten {
            snapshot,
            reason: WriteReason::Transition,
        });
        self.set_local_playing(kind.is_play());

        let command = PlaybackCommand {
            action: kind.into(),
        };
        self.caps.channel.send(command).await?;
        info!("Broadcast {} at {:.2}s", command.action, position_secs);
        self.emit(SyncProgress::CommandBroadcast { command });
        Ok(())
    }

    /// Position report from the player; checkpoints the snapshot while playing
    pub async fn on_position_changed(&mut self, position_secs: f64) -> Result<(), SyncError> {
        let EngineState::Attached {
            media_id,
            local_is_playing: true,
            ..
        } = &self.state
        else {
            return Ok(());
        };

        let now = self.caps.clock.now_millis();
        let interval_millis =
            i64::try_from(self.config.checkpoint_interval.as_millis()).unwrap_or(i64::MAX);
        if let Some(last) = self.last_checkpoint_millis {
            if now.saturating_sub(last) < interval_millis {
                return Ok(());
            }
        }

        let snapshot = PlaybackSnapshot {
            media_id: media_id.clone(),
            position_seconds: position_secs,
            captured_at_millis: now,
            is_playing: true,
        }
        .sanitized();

        self.caps.store.put(&snapshot).await?;
        debug!("Checkpoint at {:.2}s", snapshot.position_seconds);
        self.latest = Some(snapshot.clone());
        self.last_checkpoint_millis = Some(now);
        self.emit(SyncProgress::SnapshotWritten {
            snapshot,
            reason: WriteReason::Checkpoint,
        });
        Ok(())
    }

    /// Play/pause broadcast by a participant, possibly this one
    pub async fn on_remote_command(&mut self, command: PlaybackCommand) -> Result<(), SyncError> {
        let (media_id, local_is_playing) = match &self.state {
            EngineState::Attached {
                media_id,
                local_is_playing,
                ..
            } => (media_id.clone(), *local_is_playing),
            _ => {
                // The ready resync from the snapshot supersedes it
                debug!("Dropping remote {} before player is ready", command.action);
                return Ok(());
            }
        };

        if local_is_playing == command.action.is_play() {
            debug!("Remote {} already in effect", command.action);
            self.emit(SyncProgress::EchoSuppressed {
                action: command.action,
            });
            return Ok(());
        }

        // Position comes from the snapshot, never from the command, so a late
        // command still lands at the currently correct position
        let position = match self.latest_snapshot().await {
            Some(snapshot) if snapshot.media_id != media_id => {
                info!(
                    "Remote {} refers to {}, loading it",
                    command.action, snapshot.media_id
                );
                return self.load(snapshot.media_id).await;
            }
            Some(snapshot) => Some(snapshot.position_at(self.caps.clock.now_millis())),
            None => None,
        };

        info!("Applying remote {}", command.action);
        self.drive_player(position, command.action.is_play()).await
    }

    /// A store write propagated. The notification only says the store
    /// changed; what is stored now wins, since a later write may already
    /// have replaced the one being announced.
    pub async fn on_remote_snapshot(
        &mut self,
        notified: PlaybackSnapshot,
    ) -> Result<(), SyncError> {
        let snapshot = match self.caps.store.get().await {
            Ok(Some(stored)) => stored.sanitized(),
            Ok(None) => notified.sanitized(),
            Err(e) => {
                warn!("Failed to re-read shared snapshot, using notified one: {}", e);
                notified.sanitized()
            }
        };
        if snapshot != notified.sanitized() {
            debug!(
                "Notified snapshot for {} already replaced by {}",
                notified.media_id, snapshot.media_id
            );
        }
        self.latest = Some(snapshot.clone());

        if self.state.media_id() != Some(&snapshot.media_id) {
            info!("Shared media changed to {}", snapshot.media_id);
            return self.load(snapshot.media_id).await;
        }

        // Still loading: the ready resync will adopt this snapshot
        let EngineState::Attached { player, .. } = &mut self.state else {
            return Ok(());
        };

        let target = snapshot.position_at(self.caps.clock.now_millis());
        let local = player.position().await?;
        let drift = target - local;
        if drift.abs() <= self.config.drift_tolerance {
            return Ok(());
        }

        player.seek(target).await?;
        info!("Corrected {:.2}s of drift, now at {:.2}s", drift, target);
        self.emit(SyncProgress::DriftCorrected {
            drift_secs: drift,
            position_secs: target,
        });
        Ok(())
    }

    /// Reload the current media; the next ready resyncs from the snapshot
    pub async fn reload(&mut self) -> Result<(), SyncError> {
        match self.state.media_id().cloned() {
            Some(media_id) => self.load(media_id).await,
            None => {
                debug!("Nothing to reload");
                Ok(())
            }
        }
    }

    /// The player instance was torn down
    pub fn player_closed(&mut self) {
        info!("Player closed, detaching");
        self.set_state(EngineState::Unattached);
    }

    /// Seek and set play state without broadcasting anything
    async fn drive_player(
        &mut self,
        position_secs: Option<f64>,
        playing: bool,
    ) -> Result<(), SyncError> {
        let EngineState::Attached {
            media_id, player, ..
        } = &mut self.state
        else {
            return Ok(());
        };

        if let Some(position) = position_secs {
            player.seek(position).await?;
        }
        if playing {
            player.play().await?;
        } else {
            player.pause().await?;
        }

        let media_id = media_id.clone();
        self.set_local_playing(playing);
        self.emit(SyncProgress::PlayerSynced {
            media_id,
            position_secs,
            is_playing: playing,
        });
        Ok(())
    }

    /// The stored snapshot. The last one written or accepted locally stands
    /// in only when the store can't be read or holds nothing.
    async fn latest_snapshot(&mut self) -> Option<PlaybackSnapshot> {
        match self.caps.store.get().await {
            Ok(Some(stored)) => {
                let stored = stored.sanitized();
                self.latest = Some(stored.clone());
                Some(stored)
            }
            Ok(None) => self.latest.clone(),
            Err(e) => {
                warn!("Failed to read shared snapshot, using last seen: {}", e);
                self.latest.clone()
            }
        }
    }

    fn set_state(&mut self, state: EngineState) {
        self.state = state;
        let status = self.status();
        debug!("Sync state: {:?}", status);
        self.emit(SyncProgress::StateChanged { status });
    }

    fn set_local_playing(&mut self, playing: bool) {
        let EngineState::Attached {
            local_is_playing, ..
        } = &mut self.state
        else {
            return;
        };
        if *local_is_playing == playing {
            return;
        }
        *local_is_playing = playing;

        let status = self.status();
        self.emit(SyncProgress::StateChanged { status });
    }

    fn emit(&self, progress: SyncProgress) {
        let _ = self.progress_tx.send(progress);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::PlaybackAction;
    use crate::test_support::{
        ManualClock, MemoryStore, MockLoader, MockPlayer, PlayerCall, RecordingChannel,
    };
    use std::time::Duration;

    const T0: i64 = 1_700_000_000_000;

    struct Fixture {
        engine: SyncEngine,
        clock: ManualClock,
        loader: MockLoader,
        store: MemoryStore,
        channel: RecordingChannel,
        progress_rx: tokio_mpsc::UnboundedReceiver<SyncProgress>,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_config(SyncConfig::default())
        }

        fn with_config(config: SyncConfig) -> Self {
            let clock = ManualClock::new(T0);
            let loader = MockLoader::new();
            let store = MemoryStore::new();
            let channel = RecordingChannel::new();
            let (progress_tx, progress_rx) = tokio_mpsc::unbounded_channel();

            let caps = Capabilities {
                clock: Arc::new(clock.clone()),
                loader: Arc::new(loader.clone()),
                store: Arc::new(store.clone()),
                channel: Arc::new(channel.clone()),
            };

            Fixture {
                engine: SyncEngine::new(config, caps, progress_tx),
                clock,
                loader,
                store,
                channel,
                progress_rx,
            }
        }

        /// Load `snapshot`'s media and attach a ready player, then forget the
        /// calls made while attaching
        async fn attach(&mut self, snapshot: PlaybackSnapshot) -> MockPlayer {
            self.store.set(snapshot.clone());
            self.engine.load(snapshot.media_id.clone()).await.unwrap();

            let player = MockPlayer::new();
            self.engine
                .on_adapter_ready(Box::new(player.clone()))
                .await
                .unwrap();
            player.clear_calls();
            self.store.clear_puts();
            player
        }

        /// Another participant's write: store it, then notify
        async fn deliver(&mut self, snapshot: PlaybackSnapshot) -> Result<(), SyncError> {
            self.store.set(snapshot.clone());
            self.engine.on_remote_snapshot(snapshot).await
        }

        fn drain_progress(&mut self) -> Vec<SyncProgress> {
            let mut events = Vec::new();
            while let Ok(event) = self.progress_rx.try_recv() {
                events.push(event);
            }
            events
        }
    }

    fn snapshot(media: &str, position: f64, captured: i64, playing: bool) -> PlaybackSnapshot {
        PlaybackSnapshot {
            media_id: MediaId::new(media),
            position_seconds: position,
            captured_at_millis: captured,
            is_playing: playing,
        }
    }

    #[tokio::test]
    async fn test_join_with_nothing_shared_stays_unattached() {
        let mut f = Fixture::new();

        f.engine.join().await.unwrap();

        assert_eq!(f.engine.status(), SyncStatus::Unattached);
        assert!(f.loader.loads().is_empty());
    }

    #[tokio::test]
    async fn test_join_loads_shared_media() {
        let mut f = Fixture::new();
        f.store.set(snapshot("abc", 30.0, T0, true));

        f.engine.join().await.unwrap();

        assert_eq!(f.loader.loads(), vec![MediaId::new("abc")]);
        assert_eq!(
            f.engine.status(),
            SyncStatus::Loading {
                media_id: MediaId::new("abc")
            }
        );
    }

    #[tokio::test]
    async fn test_local_share_writes_fresh_snapshot_and_loads() {
        let mut f = Fixture::new();

        f.engine.on_local_share(MediaId::new("abc")).await.unwrap();

        assert_eq!(f.store.puts(), vec![snapshot("abc", 0.0, T0, false)]);
        assert_eq!(f.loader.loads(), vec![MediaId::new("abc")]);
        assert!(f.channel.sent().is_empty(), "Loading is not a playback event");
    }

    #[tokio::test]
    async fn test_failed_share_write_does_not_load() {
        let mut f = Fixture::new();
        f.store.fail_puts(true);

        let result = f.engine.on_local_share(MediaId::new("abc")).await;

        assert!(matches!(result, Err(SyncError::Store(_))));
        assert!(f.loader.loads().is_empty());
        assert_eq!(f.engine.status(), SyncStatus::Unattached);
    }

    #[tokio::test]
    async fn test_ready_reconstructs_position_of_playing_snapshot() {
        let mut f = Fixture::new();
        f.store.set(snapshot("abc", 10.0, T0, true));
        f.engine.join().await.unwrap();
        f.clock.advance(Duration::from_millis(5000));

        let player = MockPlayer::new();
        f.engine
            .on_adapter_ready(Box::new(player.clone()))
            .await
            .unwrap();

        assert_eq!(player.calls(), vec![PlayerCall::Seek(15.0), PlayerCall::Play]);
        assert!(f.engine.local_is_playing());
        assert!(f.channel.sent().is_empty());
    }

    #[tokio::test]
    async fn test_ready_keeps_paused_snapshot_position() {
        let mut f = Fixture::new();
        f.store.set(snapshot("abc", 10.0, T0, false));
        f.engine.join().await.unwrap();
        f.clock.advance(Duration::from_secs(600));

        let player = MockPlayer::new();
        f.engine
            .on_adapter_ready(Box::new(player.clone()))
            .await
            .unwrap();

        assert_eq!(player.calls(), vec![PlayerCall::Seek(10.0), PlayerCall::Pause]);
        assert!(!f.engine.local_is_playing());
    }

    #[tokio::test]
    async fn test_ready_echo_does_not_broadcast() {
        let mut f = Fixture::new();
        let player = f.attach(snapshot("abc", 10.0, T0, true)).await;
        assert!(player.is_playing());
        f.drain_progress();

        // The player reports the play the engine just issued
        f.engine
            .on_local_player_event(PlayerEventKind::Play, 10.0)
            .await
            .unwrap();

        assert!(f.channel.sent().is_empty());
        assert!(f.store.puts().is_empty());
        assert!(f
            .drain_progress()
            .iter()
            .any(|p| matches!(p, SyncProgress::EchoSuppressed { action: PlaybackAction::Play })));
    }

    #[tokio::test]
    async fn test_remote_play_while_playing_is_noop() {
        let mut f = Fixture::new();
        let player = f.attach(snapshot("abc", 10.0, T0, true)).await;

        f.engine
            .on_remote_command(PlaybackCommand::play())
            .await
            .unwrap();
        f.engine
            .on_remote_command(PlaybackCommand::play())
            .await
            .unwrap();

        assert!(player.calls().is_empty());
        assert!(f.channel.sent().is_empty());
        assert!(f.engine.local_is_playing());
    }

    #[tokio::test]
    async fn test_remote_play_seeks_to_reconstructed_position() {
        let mut f = Fixture::new();
        let player = f.attach(snapshot("abc", 20.0, T0, false)).await;

        // Another participant pressed play at 20s, the command arrives 2.5s later
        f.store.set(snapshot("abc", 20.0, T0 + 1_000, true));
        f.clock.set(T0 + 3_500);
        f.engine
            .on_remote_command(PlaybackCommand::play())
            .await
            .unwrap();

        assert_eq!(player.calls(), vec![PlayerCall::Seek(22.5), PlayerCall::Play]);
        assert!(f.engine.local_is_playing());
        assert!(f.channel.sent().is_empty(), "Remote commands are never re-broadcast");
    }

    #[tokio::test]
    async fn test_remote_pause_then_echo_is_suppressed() {
        let mut f = Fixture::new();
        let player = f.attach(snapshot("abc", 0.0, T0, true)).await;

        f.store.set(snapshot("abc", 42.0, T0 + 42_000, false));
        f.clock.set(T0 + 43_000);
        f.engine
            .on_remote_command(PlaybackCommand::pause())
            .await
            .unwrap();
        assert_eq!(player.calls(), vec![PlayerCall::Seek(42.0), PlayerCall::Pause]);

        f.engine
            .on_local_player_event(PlayerEventKind::Pause, 42.0)
            .await
            .unwrap();
        assert!(f.channel.sent().is_empty());
        assert!(f.store.puts().is_empty());
    }

    #[tokio::test]
    async fn test_local_pause_writes_snapshot_and_broadcasts() {
        let mut f = Fixture::new();
        f.attach(snapshot("abc", 0.0, T0, true)).await;
        f.clock.set(T0 + 61_000);

        f.engine
            .on_local_player_event(PlayerEventKind::Pause, 61.25)
            .await
            .unwrap();

        assert_eq!(f.store.puts(), vec![snapshot("abc", 61.25, T0 + 61_000, false)]);
        assert_eq!(f.channel.sent(), vec![PlaybackCommand::pause()]);
        assert!(!f.engine.local_is_playing());

        // A second pause edge is a duplicate
        f.engine
            .on_local_player_event(PlayerEventKind::Pause, 61.25)
            .await
            .unwrap();
        assert_eq!(f.channel.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_transition_write_keeps_local_state() {
        let mut f = Fixture::new();
        f.attach(snapshot("abc", 0.0, T0, false)).await;
        f.store.fail_puts(true);

        let result = f
            .engine
            .on_local_player_event(PlayerEventKind::Play, 3.0)
            .await;

        assert!(result.is_err());
        assert!(!f.engine.local_is_playing());
        assert!(f.channel.sent().is_empty());

        // The retried edge goes through once the store recovers
        f.store.fail_puts(false);
        f.engine
            .on_local_player_event(PlayerEventKind::Play, 3.0)
            .await
            .unwrap();
        assert!(f.engine.local_is_playing());
        assert_eq!(f.channel.sent(), vec![PlaybackCommand::play()]);
    }

    #[tokio::test]
    async fn test_failed_broadcast_still_flips_local_state() {
        let mut f = Fixture::new();
        f.attach(snapshot("abc", 0.0, T0, false)).await;
        f.channel.fail_sends(true);

        let result = f
            .engine
            .on_local_player_event(PlayerEventKind::Play, 3.0)
            .await;

        assert!(matches!(result, Err(SyncError::Channel(_))));
        assert!(f.engine.local_is_playing());
        assert_eq!(f.store.puts().len(), 1);
    }

    #[tokio::test]
    async fn test_new_media_snapshot_resets_play_state() {
        let mut f = Fixture::new();
        f.attach(snapshot("abc", 0.0, T0, true)).await;
        assert!(f.engine.local_is_playing());

        f.deliver(snapshot("xyz", 0.0, T0 + 1_000, false))
            .await
            .unwrap();

        assert!(!f.engine.local_is_playing());
        assert_eq!(
            f.loader.loads(),
            vec![MediaId::new("abc"), MediaId::new("xyz")]
        );
        assert_eq!(
            f.engine.status(),
            SyncStatus::Loading {
                media_id: MediaId::new("xyz")
            }
        );
    }

    #[tokio::test]
    async fn test_checkpoint_within_tolerance_does_not_seek() {
        let mut f = Fixture::new();
        let player = f.attach(snapshot("abc", 0.0, T0, true)).await;

        f.clock.set(T0 + 30_000);
        player.set_position(29.0);
        f.deliver(snapshot("abc", 30.0, T0 + 30_000, true))
            .await
            .unwrap();

        assert!(player.calls().is_empty());
    }

    #[tokio::test]
    async fn test_checkpoint_beyond_tolerance_seeks_once() {
        let mut f = Fixture::new();
        let player = f.attach(snapshot("abc", 0.0, T0, true)).await;

        f.clock.set(T0 + 32_000);
        player.set_position(25.0);
        f.deliver(snapshot("abc", 30.0, T0 + 30_000, true))
            .await
            .unwrap();

        assert_eq!(player.calls(), vec![PlayerCall::Seek(32.0)]);
    }

    #[tokio::test]
    async fn test_drift_tolerance_is_configurable() {
        let mut f = Fixture::with_config(SyncConfig {
            drift_tolerance: 10.0,
            ..SyncConfig::default()
        });
        let player = f.attach(snapshot("abc", 0.0, T0, true)).await;

        f.clock.set(T0 + 32_000);
        player.set_position(25.0);
        f.deliver(snapshot("abc", 30.0, T0 + 30_000, true))
            .await
            .unwrap();

        assert!(player.calls().is_empty());
    }

    #[tokio::test]
    async fn test_overtaken_notification_defers_to_store() {
        let mut f = Fixture::new();
        let player = f.attach(snapshot("abc", 0.0, T0, true)).await;
        f.clock.set(T0 + 60_000);
        player.set_position(60.0);
        f.deliver(snapshot("abc", 60.0, T0 + 60_000, true))
            .await
            .unwrap();

        // Announces a write that has since been replaced in the store
        f.engine
            .on_remote_snapshot(snapshot("old", 5.0, T0 + 10_000, false))
            .await
            .unwrap();

        assert_eq!(f.loader.loads(), vec![MediaId::new("abc")]);
        assert!(player.calls().is_empty());
    }

    #[tokio::test]
    async fn test_share_from_peer_with_slower_clock_switches_media() {
        let mut f = Fixture::new();
        f.attach(snapshot("abc", 0.0, T0, false)).await;
        f.clock.set(T0 + 10_000);
        f.engine
            .on_local_player_event(PlayerEventKind::Play, 10.0)
            .await
            .unwrap();

        // The sharer's clock is 5s behind ours
        f.deliver(snapshot("xyz", 0.0, T0 + 6_000, false))
            .await
            .unwrap();

        assert_eq!(f.loader.loads().last(), Some(&MediaId::new("xyz")));
        assert_eq!(
            f.engine.status(),
            SyncStatus::Loading {
                media_id: MediaId::new("xyz")
            }
        );
    }

    #[tokio::test]
    async fn test_remote_command_uses_stored_snapshot_despite_clock_skew() {
        let mut f = Fixture::new();
        let player = f.attach(snapshot("abc", 0.0, T0, false)).await;
        f.clock.set(T0 + 10_000);
        f.engine
            .on_local_player_event(PlayerEventKind::Play, 10.0)
            .await
            .unwrap();
        player.clear_calls();

        // A peer whose clock is 5s behind pauses at 12s
        f.store.set(snapshot("abc", 12.0, T0 + 7_000, false));
        f.clock.set(T0 + 12_000);
        f.engine
            .on_remote_command(PlaybackCommand::pause())
            .await
            .unwrap();

        assert_eq!(player.calls(), vec![PlayerCall::Seek(12.0), PlayerCall::Pause]);
        assert!(!f.engine.local_is_playing());
    }

    #[tokio::test]
    async fn test_notification_is_used_when_store_read_fails() {
        let mut f = Fixture::new();
        f.attach(snapshot("abc", 0.0, T0, true)).await;
        f.store.fail_gets(true);

        f.engine
            .on_remote_snapshot(snapshot("xyz", 0.0, T0 + 1_000, false))
            .await
            .unwrap();

        assert_eq!(f.loader.loads().last(), Some(&MediaId::new("xyz")));
    }

    #[tokio::test]
    async fn test_commands_before_ready_are_dropped() {
        let mut f = Fixture::new();
        f.store.set(snapshot("abc", 5.0, T0, false));
        f.engine.join().await.unwrap();

        f.engine
            .on_remote_command(PlaybackCommand::play())
            .await
            .unwrap();
        f.engine
            .on_local_player_event(PlayerEventKind::Play, 5.0)
            .await
            .unwrap();

        assert!(!f.engine.local_is_playing());
        assert!(f.channel.sent().is_empty());
        assert!(f.store.puts().is_empty());
    }

    #[tokio::test]
    async fn test_ready_loads_newer_media_when_session_moved_on() {
        let mut f = Fixture::new();
        f.store.set(snapshot("abc", 0.0, T0, false));
        f.engine.join().await.unwrap();

        f.store.set(snapshot("xyz", 0.0, T0 + 1_000, false));
        let player = MockPlayer::new();
        f.engine
            .on_adapter_ready(Box::new(player.clone()))
            .await
            .unwrap();

        assert!(player.calls().is_empty());
        assert_eq!(
            f.loader.loads(),
            vec![MediaId::new("abc"), MediaId::new("xyz")]
        );
    }

    #[tokio::test]
    async fn test_ready_falls_back_to_last_seen_snapshot() {
        let mut f = Fixture::new();
        f.engine
            .on_remote_snapshot(snapshot("abc", 7.0, T0, false))
            .await
            .unwrap();
        f.store.fail_gets(true);

        let player = MockPlayer::new();
        f.engine
            .on_adapter_ready(Box::new(player.clone()))
            .await
            .unwrap();

        assert_eq!(player.calls(), vec![PlayerCall::Seek(7.0), PlayerCall::Pause]);
    }

    #[tokio::test]
    async fn test_checkpoints_are_throttled() {
        let mut f = Fixture::new();
        f.attach(snapshot("abc", 0.0, T0, true)).await;

        f.clock.set(T0 + 1_000);
        f.engine.on_position_changed(1.0).await.unwrap();
        f.clock.set(T0 + 2_000);
        f.engine.on_position_changed(2.0).await.unwrap();
        f.clock.set(T0 + 7_000);
        f.engine.on_position_changed(7.0).await.unwrap();

        assert_eq!(
            f.store.puts(),
            vec![
                snapshot("abc", 1.0, T0 + 1_000, true),
                snapshot("abc", 7.0, T0 + 7_000, true),
            ]
        );
        assert!(f.channel.sent().is_empty());
    }

    #[tokio::test]
    async fn test_no_checkpoint_while_paused() {
        let mut f = Fixture::new();
        f.attach(snapshot("abc", 0.0, T0, false)).await;

        f.clock.set(T0 + 60_000);
        f.engine.on_position_changed(0.0).await.unwrap();

        assert!(f.store.puts().is_empty());
    }

    #[tokio::test]
    async fn test_reload_reissues_load_without_writing() {
        let mut f = Fixture::new();
        f.attach(snapshot("abc", 3.0, T0, false)).await;

        f.engine.reload().await.unwrap();

        assert_eq!(
            f.loader.loads(),
            vec![MediaId::new("abc"), MediaId::new("abc")]
        );
        assert!(f.store.puts().is_empty());
        assert!(!f.engine.local_is_playing());
    }

    #[tokio::test]
    async fn test_player_closed_detaches() {
        let mut f = Fixture::new();
        f.attach(snapshot("abc", 3.0, T0, true)).await;

        f.engine.handle(SyncNotification::PlayerClosed).await.unwrap();

        assert_eq!(f.engine.status(), SyncStatus::Unattached);
        assert!(!f.engine.local_is_playing());
    }

    #[tokio::test]
    async fn test_failed_load_keeps_previous_state() {
        let mut f = Fixture::new();
        f.loader.fail_loads(true);

        let result = f.engine.on_local_share(MediaId::new("abc")).await;

        assert!(matches!(
            result,
            Err(SyncError::Player(PlayerError::Load(_)))
        ));
        assert_eq!(f.engine.status(), SyncStatus::Unattached);
    }

    #[tokio::test]
    async fn test_failed_player_command_keeps_local_state() {
        let mut f = Fixture::new();
        let player = f.attach(snapshot("abc", 0.0, T0, false)).await;
        player.fail_commands(true);
        f.store.set(snapshot("abc", 0.0, T0, true));

        let result = f.engine.on_remote_command(PlaybackCommand::play()).await;

        assert!(matches!(
            result,
            Err(SyncError::Player(PlayerError::Command(_)))
        ));
        assert!(!f.engine.local_is_playing());
        assert!(f.channel.sent().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_checkpoint_interval_never_elapses() {
        let mut f = Fixture::with_config(SyncConfig {
            checkpoint_interval: Duration::from_millis(u64::MAX),
            ..SyncConfig::default()
        });
        f.attach(snapshot("abc", 0.0, T0, true)).await;

        f.clock.set(T0 + 1_000);
        f.engine.on_position_changed(1.0).await.unwrap();
        f.clock.set(T0 + 3_600_000);
        f.engine.on_position_changed(3_600.0).await.unwrap();

        assert_eq!(f.store.puts(), vec![snapshot("abc", 1.0, T0 + 1_000, true)]);
    }
}
