// Scripted multi-participant session over an in-process LocalSession.
// Time is simulated, so the run is deterministic and quick.

use std::env;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use cowatch::clock::ClockSource;
use cowatch::session::LocalSession;
use cowatch::test_support::{ManualClock, SimulatedLoader};
use cowatch::{Capabilities, MediaId, SyncConfig, SyncHandle, SyncService};

const START_MILLIS: i64 = 1_700_000_000_000;

struct Participant {
    name: String,
    handle: SyncHandle,
    loader: SimulatedLoader,
}

impl Participant {
    fn join(
        name: &str,
        session: &LocalSession,
        clock: &ManualClock,
        config: &SyncConfig,
    ) -> Participant {
        let clock: Arc<dyn ClockSource> = Arc::new(clock.clone());
        let endpoint = session.endpoint();
        let loader = SimulatedLoader::new(clock.clone());

        let caps = Capabilities {
            clock,
            loader: Arc::new(loader.clone()),
            store: Arc::new(endpoint.clone()),
            channel: Arc::new(endpoint.clone()),
        };

        let handle = SyncService::start(config.clone(), caps, tokio::runtime::Handle::current());
        loader.bind(handle.clone());
        endpoint.attach(handle.clone());

        Participant {
            name: name.to_string(),
            handle,
            loader,
        }
    }

    fn report(&self) {
        match self.loader.current_player() {
            Some(player) => info!(
                "{:>8}: {} at {:>7.2}s",
                self.name,
                if player.is_playing() { "playing" } else { "paused " },
                player.current_position()
            ),
            None => info!("{:>8}: no media loaded", self.name),
        }
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

fn report_all(participants: &[Participant]) {
    for participant in participants {
        participant.report();
    }
}

fn parse_participants() -> Result<usize, String> {
    let args: Vec<String> = env::args().collect();
    match args.iter().position(|a| a == "--participants") {
        Some(i) => args
            .get(i + 1)
            .ok_or_else(|| "--participants requires a number".to_string())?
            .parse::<usize>()
            .map_err(|e| format!("invalid participant count: {}", e))
            .and_then(|n| {
                if n >= 2 {
                    Ok(n)
                } else {
                    Err("need at least 2 participants".to_string())
                }
            }),
        None => Ok(3),
    }
}

#[tokio::main]
async fn main() {
    // Use RUST_LOG env var if set, otherwise default to info level
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    let count = match parse_participants() {
        Ok(count) => count,
        Err(e) => {
            error!("{}", e);
            eprintln!("Usage: sync_sim [--participants N]");
            std::process::exit(1);
        }
    };

    let config = SyncConfig::load();
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    let session = LocalSession::default();
    let clock = ManualClock::new(START_MILLIS);

    // Everyone but the last participant is there from the start
    let mut participants: Vec<Participant> = (0..count - 1)
        .map(|i| Participant::join(&format!("peer-{}", i), &session, &clock, &config))
        .collect();
    settle().await;

    info!("peer-0 shares a video");
    participants[0].handle.share(MediaId::new("dQw4w9WgXcQ"));
    settle().await;
    report_all(&participants);

    info!("peer-0 presses play");
    if let Some(player) = participants[0].loader.current_player() {
        player.user_play();
    }
    settle().await;

    for _ in 0..6 {
        clock.advance(Duration::from_secs(5));
        for participant in &participants {
            if let Some(player) = participant.loader.current_player() {
                player.tick();
            }
        }
        settle().await;
    }
    report_all(&participants);

    info!("A late participant joins 30s into playback");
    clock.advance(Duration::from_secs(2));
    participants.push(Participant::join(
        &format!("peer-{}", count - 1),
        &session,
        &clock,
        &config,
    ));
    settle().await;
    report_all(&participants);

    info!("peer-1 pauses");
    clock.advance(Duration::from_secs(3));
    if let Some(player) = participants[1].loader.current_player() {
        player.user_pause();
    }
    settle().await;
    report_all(&participants);

    info!(
        "Done: {} commands broadcast, snapshot {:?}",
        session.commands_sent(),
        session.snapshot()
    );
}
