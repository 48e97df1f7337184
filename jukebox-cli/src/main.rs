//! Jukebox - Headless Participant
//!
//! Connects to a coordinator, creates or joins a lobby and follows the shared
//! queue, logging every change.
//!
//! Usage:
//!   jukebox --name Ana                      # create a lobby
//!   jukebox --name Bruno --lobby ABC123     # join one
//!   jukebox --name Ana --track '{"id":"dQw4w9WgXcQ","title":"...","artist":"...","uri":"dQw4w9WgXcQ","duration":212}'

mod backend;

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use jukebox_core::{Lobby, LobbySession, SessionConfig, SessionEvent, Source, Track};

use backend::LoggingBackend;

/// Command line arguments
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Coordinator WebSocket URL
    #[arg(short, long, env = "JUKEBOX_URL", default_value = "ws://127.0.0.1:3001/ws")]
    url: String,

    /// Display name in the lobby
    #[arg(short, long, env = "JUKEBOX_NAME")]
    name: String,

    /// Lobby to join. Creates a new lobby when omitted.
    #[arg(short, long)]
    lobby: Option<String>,

    /// Track (JSON) to add once in the lobby. Repeatable.
    #[arg(short, long = "track", value_name = "JSON")]
    tracks: Vec<String>,

    /// Reconnect attempts before giving up
    #[arg(long, env = "JUKEBOX_RECONNECT_ATTEMPTS", default_value_t = 5)]
    reconnect_attempts: u32,

    /// Base reconnect delay in milliseconds
    #[arg(long, default_value_t = 1000)]
    reconnect_delay_ms: u64,

    /// Enable debug logging
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

fn init_logging(args: &Args) {
    let default = if args.verbose { "jukebox_core=debug,info" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn log_lobby(lobby: &Lobby) {
    let names: Vec<&str> = lobby.participants.iter().map(|p| p.name.as_str()).collect();
    info!("Lobby {}: {} participant(s) [{}]", lobby.id, names.len(), names.join(", "));
    for (position, track) in lobby.queue.iter().enumerate() {
        let marker = if position == 0 { "▶" } else { " " };
        info!("  {} {} - {} ({})", marker, track.artist, track.title, track.source().as_str());
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(&args);

    let mut pending_tracks = Some(
        args.tracks
            .iter()
            .map(|json| serde_json::from_str::<Track>(json))
            .collect::<Result<Vec<_>, _>>()?,
    );

    let config = SessionConfig::default()
        .with_coordinator_url(&args.url)
        .with_reconnect_attempts(args.reconnect_attempts)
        .with_reconnect_delay(Duration::from_millis(args.reconnect_delay_ms));
    let (session, mut events) = LobbySession::start(config);

    for source in Source::ALL {
        session.set_backend(source, Arc::new(LoggingBackend::new(source)))?;
    }

    info!("Connecting to {}", args.url);
    session.connect();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    SessionEvent::Connected => {
                        // Re-join after a reconnect so the coordinator re-sends the snapshot
                        let result = match (session.lobby(), &args.lobby) {
                            (Some(lobby), _) => session.join_lobby(&lobby.id, &args.name),
                            (None, Some(lobby_id)) => session.join_lobby(lobby_id, &args.name),
                            (None, None) => session.create_lobby(&args.name),
                        };
                        if let Err(e) = result {
                            warn!("Could not enter lobby: {}", e);
                        }
                    }
                    SessionEvent::Disconnected { message } => warn!("{}", message),
                    SessionEvent::ConnectionFailed { message } => {
                        error!("Giving up: {}", message);
                        return Err(message.into());
                    }
                    SessionEvent::LobbyChanged(Some(lobby)) => {
                        log_lobby(&lobby);
                        for track in pending_tracks.take().unwrap_or_default() {
                            if let Err(e) = session.add_track(track) {
                                warn!("Could not add track: {}", e);
                            }
                        }
                    }
                    SessionEvent::LobbyChanged(None) => info!("Not in a lobby"),
                    SessionEvent::PlaybackChanged(Some(view)) => {
                        info!("Now playing {} (offset {:?})", view.track_id, view.offset);
                    }
                    SessionEvent::PlaybackChanged(None) => info!("Nothing playing"),
                    SessionEvent::Error(message) => warn!("{}", message),
                }
            }
            _ = &mut ctrl_c => {
                info!("Leaving lobby");
                session.leave().await?;
                break;
            }
        }
    }

    Ok(())
}
