use cowatch::clock::ClockSource;
use cowatch::session::{LocalSession, SessionEndpoint};
use cowatch::test_support::{ManualClock, SimulatedLoader, SimulatedPlayer};
use cowatch::{Capabilities, MediaId, SyncConfig, SyncHandle, SyncService, SyncStatus};
use std::sync::Arc;

/// One participant: a sync service with a simulated player, connected to a
/// shared in-process session
pub struct TestParticipant {
    pub handle: SyncHandle,
    pub loader: SimulatedLoader,
    pub endpoint: SessionEndpoint,
}

impl TestParticipant {
    pub fn join(session: &LocalSession, clock: &ManualClock) -> Self {
        Self::join_with_config(session, clock, SyncConfig::default())
    }

    pub fn join_with_config(session: &LocalSession, clock: &ManualClock, config: SyncConfig) -> Self {
        let clock: Arc<dyn ClockSource> = Arc::new(clock.clone());
        let endpoint = session.endpoint();
        let loader = SimulatedLoader::new(clock.clone());

        let caps = Capabilities {
            clock,
            loader: Arc::new(loader.clone()),
            store: Arc::new(endpoint.clone()),
            channel: Arc::new(endpoint.clone()),
        };

        let handle = SyncService::start(config, caps, tokio::runtime::Handle::current());
        loader.bind(handle.clone());
        endpoint.attach(handle.clone());

        Self {
            handle,
            loader,
            endpoint,
        }
    }

    pub fn player(&self) -> Option<SimulatedPlayer> {
        self.loader.current_player()
    }

    pub fn is_playing(&self) -> bool {
        self.player().map(|p| p.is_playing()).unwrap_or(false)
    }

    pub fn position(&self) -> Option<f64> {
        self.player().map(|p| p.current_position())
    }

    pub fn is_attached_to(&self, media_id: &MediaId) -> bool {
        matches!(
            self.handle.status(),
            SyncStatus::Attached { media_id: ref attached, .. } if attached == media_id
        )
    }
}
