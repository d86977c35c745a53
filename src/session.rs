// # Local Session
//
// In-process shared store and event channel for several participants in one
// process. The snapshot is kept as the serialized JSON blob a real store
// would hold, and commands travel as JSON.

use crate::event_channel::{ChannelError, EventChannel};
use crate::shared_state::{SharedStateStore, StoreError};
use crate::snapshot::{PlaybackCommand, PlaybackSnapshot};
use crate::sync::SyncHandle;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

pub type ParticipantId = Uuid;

struct SessionInner {
    blob: Option<String>,
    participants: HashMap<ParticipantId, SyncHandle>,
    echo_commands: bool,
    commands_sent: usize,
}

#[derive(Clone)]
pub struct LocalSession {
    inner: Arc<Mutex<SessionInner>>,
}

impl Default for LocalSession {
    fn default() -> Self {
        LocalSession::new(true)
    }
}

impl LocalSession {
    /// `echo_commands` controls whether a command is also delivered back to
    /// its sender
    pub fn new(echo_commands: bool) -> Self {
        LocalSession {
            inner: Arc::new(Mutex::new(SessionInner {
                blob: None,
                participants: HashMap::new(),
                echo_commands,
                commands_sent: 0,
            })),
        }
    }

    /// New participant endpoint; it receives nothing until attached
    pub fn endpoint(&self) -> SessionEndpoint {
        SessionEndpoint {
            id: Uuid::new_v4(),
            session: self.clone(),
        }
    }

    pub fn snapshot(&self) -> Option<PlaybackSnapshot> {
        self.lock()
            .ok()?
            .blob
            .as_deref()
            .and_then(PlaybackSnapshot::from_json)
    }

    /// Number of commands broadcast so far
    pub fn commands_sent(&self) -> usize {
        self.lock().map(|inner| inner.commands_sent).unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, SessionInner>, String> {
        self.inner
            .lock()
            .map_err(|_| "session lock poisoned".to_string())
    }
}

/// One participant's view of a [`LocalSession`]
#[derive(Clone)]
pub struct SessionEndpoint {
    id: ParticipantId,
    session: LocalSession,
}

impl SessionEndpoint {
    /// Start delivering snapshots and commands to `handle`
    pub fn attach(&self, handle: SyncHandle) {
        if let Ok(mut inner) = self.session.lock() {
            inner.participants.insert(self.id, handle);
        }
    }

    pub fn detach(&self) {
        if let Ok(mut inner) = self.session.lock() {
            inner.participants.remove(&self.id);
        }
    }
}

#[async_trait::async_trait]
impl SharedStateStore for SessionEndpoint {
    async fn put(&self, snapshot: &PlaybackSnapshot) -> Result<(), StoreError> {
        let blob = snapshot.to_json()?;
        let mut inner = self.session.lock().map_err(StoreError::Unavailable)?;
        inner.blob = Some(blob);

        debug!(
            "Participant {} replaced snapshot, notifying {} participants",
            self.id,
            inner.participants.len()
        );
        for handle in inner.participants.values() {
            handle.remote_snapshot(snapshot.clone());
        }
        Ok(())
    }

    async fn get(&self) -> Result<Option<PlaybackSnapshot>, StoreError> {
        let inner = self.session.lock().map_err(StoreError::Unavailable)?;
        Ok(inner.blob.as_deref().and_then(PlaybackSnapshot::from_json))
    }
}

#[async_trait::async_trait]
impl EventChannel for SessionEndpoint {
    async fn send(&self, command: PlaybackCommand) -> Result<(), ChannelError> {
        let wire = serde_json::to_string(&command)?;
        let mut inner = self.session.lock().map_err(ChannelError::Send)?;
        inner.commands_sent += 1;

        for (id, handle) in inner.participants.iter() {
            if *id == self.id && !inner.echo_commands {
                continue;
            }
            let received: PlaybackCommand = serde_json::from_str(&wire)?;
            handle.remote_command(received);
        }
        Ok(())
    }
}
