// Test support utilities for both unit and integration tests

use crate::clock::ClockSource;
use crate::event_channel::{ChannelError, EventChannel};
use crate::player::{MediaLoader, MediaPlayer, PlayerError, PlayerEventKind};
use crate::shared_state::{SharedStateStore, StoreError};
use crate::snapshot::{MediaId, PlaybackCommand, PlaybackSnapshot};
use crate::sync::SyncHandle;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

/// Clock that only moves when told to
#[derive(Clone)]
pub struct ManualClock {
    now_millis: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start_millis: i64) -> Self {
        ManualClock {
            now_millis: Arc::new(AtomicI64::new(start_millis)),
        }
    }

    pub fn set(&self, millis: i64) {
        self.now_millis.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.now_millis
            .fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }
}

impl ClockSource for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now_millis.load(Ordering::SeqCst)
    }
}

/// Call recorded by [`MockPlayer`]
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerCall {
    Play,
    Pause,
    Seek(f64),
}

#[derive(Default)]
struct MockPlayerState {
    calls: Vec<PlayerCall>,
    position: f64,
    playing: bool,
    fail_commands: bool,
}

/// Player that records every command. Clones share state, so a test keeps
/// one clone as a probe and hands another to the engine.
#[derive(Clone, Default)]
pub struct MockPlayer {
    state: Arc<Mutex<MockPlayerState>>,
}

impl MockPlayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<PlayerCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub fn set_position(&self, position_secs: f64) {
        self.state.lock().unwrap().position = position_secs;
    }

    pub fn is_playing(&self) -> bool {
        self.state.lock().unwrap().playing
    }

    /// Make play, pause and seek fail as a torn-down player would
    pub fn fail_commands(&self, fail: bool) {
        self.state.lock().unwrap().fail_commands = fail;
    }
}

fn check_commands(state: &MockPlayerState) -> Result<(), PlayerError> {
    if state.fail_commands {
        return Err(PlayerError::Command("player rejected command".to_string()));
    }
    Ok(())
}

#[async_trait::async_trait]
impl MediaPlayer for MockPlayer {
    async fn play(&mut self) -> Result<(), PlayerError> {
        let mut state = self.state.lock().unwrap();
        check_commands(&state)?;
        state.calls.push(PlayerCall::Play);
        state.playing = true;
        Ok(())
    }

    async fn pause(&mut self) -> Result<(), PlayerError> {
        let mut state = self.state.lock().unwrap();
        check_commands(&state)?;
        state.calls.push(PlayerCall::Pause);
        state.playing = false;
        Ok(())
    }

    async fn seek(&mut self, position_secs: f64) -> Result<(), PlayerError> {
        let mut state = self.state.lock().unwrap();
        check_commands(&state)?;
        state.calls.push(PlayerCall::Seek(position_secs));
        state.position = position_secs;
        Ok(())
    }

    async fn position(&self) -> Result<f64, PlayerError> {
        Ok(self.state.lock().unwrap().position)
    }
}

/// Loader that records requested media
#[derive(Clone, Default)]
pub struct MockLoader {
    loads: Arc<Mutex<Vec<MediaId>>>,
    fail_loads: Arc<AtomicBool>,
}

impl MockLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn loads(&self) -> Vec<MediaId> {
        self.loads.lock().unwrap().clone()
    }

    pub fn fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl MediaLoader for MockLoader {
    async fn load(&self, media_id: &MediaId) -> Result<(), PlayerError> {
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(PlayerError::Load(format!("cannot load {}", media_id)));
        }
        self.loads.lock().unwrap().push(media_id.clone());
        Ok(())
    }
}

/// In-memory shared store with switchable failures
#[derive(Clone, Default)]
pub struct MemoryStore {
    current: Arc<Mutex<Option<PlaybackSnapshot>>>,
    puts: Arc<Mutex<Vec<PlaybackSnapshot>>>,
    fail_puts: Arc<AtomicBool>,
    fail_gets: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored snapshot without recording a put, as if another
    /// participant had written it
    pub fn set(&self, snapshot: PlaybackSnapshot) {
        *self.current.lock().unwrap() = Some(snapshot);
    }

    pub fn puts(&self) -> Vec<PlaybackSnapshot> {
        self.puts.lock().unwrap().clone()
    }

    pub fn clear_puts(&self) {
        self.puts.lock().unwrap().clear();
    }

    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_gets(&self, fail: bool) {
        self.fail_gets.store(fail, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl SharedStateStore for MemoryStore {
    async fn put(&self, snapshot: &PlaybackSnapshot) -> Result<(), StoreError> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("put failed".to_string()));
        }
        *self.current.lock().unwrap() = Some(snapshot.clone());
        self.puts.lock().unwrap().push(snapshot.clone());
        Ok(())
    }

    async fn get(&self) -> Result<Option<PlaybackSnapshot>, StoreError> {
        if self.fail_gets.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("get failed".to_string()));
        }
        Ok(self.current.lock().unwrap().clone())
    }
}

/// Event channel that records broadcasts instead of delivering them
#[derive(Clone, Default)]
pub struct RecordingChannel {
    sent: Arc<Mutex<Vec<PlaybackCommand>>>,
    fail_sends: Arc<AtomicBool>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<PlaybackCommand> {
        self.sent.lock().unwrap().clone()
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl EventChannel for RecordingChannel {
    async fn send(&self, command: PlaybackCommand) -> Result<(), ChannelError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(ChannelError::Send("send failed".to_string()));
        }
        self.sent.lock().unwrap().push(command);
        Ok(())
    }
}

struct SimulatedState {
    playing: bool,
    /// Position at `anchor_millis`
    anchor_position: f64,
    anchor_millis: i64,
}

/// Player that advances with the clock and reports its own play/pause
/// edges back through a [`SyncHandle`], like an embedded player would.
#[derive(Clone)]
pub struct SimulatedPlayer {
    state: Arc<Mutex<SimulatedState>>,
    clock: Arc<dyn ClockSource>,
    handle: SyncHandle,
}

impl SimulatedPlayer {
    fn new(clock: Arc<dyn ClockSource>, handle: SyncHandle) -> Self {
        let now = clock.now_millis();
        SimulatedPlayer {
            state: Arc::new(Mutex::new(SimulatedState {
                playing: false,
                anchor_position: 0.0,
                anchor_millis: now,
            })),
            clock,
            handle,
        }
    }

    pub fn current_position(&self) -> f64 {
        let state = self.state.lock().unwrap();
        Self::position_of(&state, self.clock.now_millis())
    }

    pub fn is_playing(&self) -> bool {
        self.state.lock().unwrap().playing
    }

    /// The user pressed play inside the embedded player
    pub fn user_play(&self) {
        self.transition(true);
    }

    /// The user pressed pause inside the embedded player
    pub fn user_pause(&self) {
        self.transition(false);
    }

    /// Report the current position, as a playing player periodically does
    pub fn tick(&self) {
        self.handle.position_changed(self.current_position());
    }

    fn position_of(state: &SimulatedState, now_millis: i64) -> f64 {
        if state.playing {
            state.anchor_position + (now_millis - state.anchor_millis).max(0) as f64 / 1000.0
        } else {
            state.anchor_position
        }
    }

    fn transition(&self, playing: bool) {
        let now = self.clock.now_millis();
        let position = {
            let mut state = self.state.lock().unwrap();
            if state.playing == playing {
                return;
            }
            state.anchor_position = Self::position_of(&state, now);
            state.anchor_millis = now;
            state.playing = playing;
            state.anchor_position
        };

        let kind = if playing {
            PlayerEventKind::Play
        } else {
            PlayerEventKind::Pause
        };
        self.handle.player_event(kind, position);
    }
}

#[async_trait::async_trait]
impl MediaPlayer for SimulatedPlayer {
    async fn play(&mut self) -> Result<(), PlayerError> {
        self.transition(true);
        Ok(())
    }

    async fn pause(&mut self) -> Result<(), PlayerError> {
        self.transition(false);
        Ok(())
    }

    async fn seek(&mut self, position_secs: f64) -> Result<(), PlayerError> {
        let mut state = self.state.lock().unwrap();
        state.anchor_position = position_secs;
        state.anchor_millis = self.clock.now_millis();
        Ok(())
    }

    async fn position(&self) -> Result<f64, PlayerError> {
        Ok(self.current_position())
    }
}

/// Loader that creates a [`SimulatedPlayer`] per load and reports it ready.
/// Loads wait until the loader is bound to the service handle.
#[derive(Clone)]
pub struct SimulatedLoader {
    clock: Arc<dyn ClockSource>,
    handle_tx: Arc<watch::Sender<Option<SyncHandle>>>,
    current: Arc<Mutex<Option<SimulatedPlayer>>>,
    loads: Arc<Mutex<Vec<MediaId>>>,
}

impl SimulatedLoader {
    pub fn new(clock: Arc<dyn ClockSource>) -> Self {
        SimulatedLoader {
            clock,
            handle_tx: Arc::new(watch::channel(None).0),
            current: Arc::new(Mutex::new(None)),
            loads: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn bind(&self, handle: SyncHandle) {
        self.handle_tx.send_replace(Some(handle));
    }

    /// Player created by the most recent load
    pub fn current_player(&self) -> Option<SimulatedPlayer> {
        self.current.lock().unwrap().clone()
    }

    pub fn loads(&self) -> Vec<MediaId> {
        self.loads.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl MediaLoader for SimulatedLoader {
    async fn load(&self, media_id: &MediaId) -> Result<(), PlayerError> {
        let mut handle_rx = self.handle_tx.subscribe();
        let bound = {
            let bound = handle_rx
                .wait_for(|handle| handle.is_some())
                .await
                .map_err(|_| PlayerError::NotReady("loader dropped".to_string()))?;
            bound.clone()
        };
        let handle =
            bound.ok_or_else(|| PlayerError::NotReady("loader not bound".to_string()))?;

        let player = SimulatedPlayer::new(self.clock.clone(), handle.clone());
        *self.current.lock().unwrap() = Some(player.clone());
        self.loads.lock().unwrap().push(media_id.clone());

        handle.adapter_ready(Box::new(player));
        Ok(())
    }
}
