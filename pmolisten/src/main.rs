mod logging;

use pmoconfig::get_config;
use pmosync::{EngineSnapshot, SyncConfig, SyncEngine, SyncQuality, WallClockTransport};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = get_config();
    logging::init_logging(&config);

    let sync_config = SyncConfig::load_from_pmoconfig()?;
    info!(
        api_base = %sync_config.server.api_base,
        authenticated = sync_config.server.session_token.is_some(),
        "📻 Starting pmolisten"
    );

    let client = sync_config.build_client()?;
    let transport = Arc::new(WallClockTransport::new());
    let engine = SyncEngine::builder(sync_config)
        .with_client(client)?
        .transport(transport)
        .start()?;
    engine.play()?;

    let mut cues = engine.subscribe_events();
    let mut songs = engine.on_song_change();
    let mut snapshots = engine.subscribe();
    let mut last = EngineSnapshot::default();

    info!("Press Ctrl+C to stop...");
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,

            cue = cues.recv() => match cue {
                Ok(cue) => info!(
                    song_id = %cue.song_id,
                    index = cue.index,
                    time_ms = cue.event.time_ms,
                    "🥁 {}", cue.event.identifier
                ),
                Err(RecvError::Lagged(missed)) => warn!("Missed {} rhythm cues", missed),
                Err(RecvError::Closed) => break,
            },

            changed = songs.changed() => {
                if changed.is_err() {
                    break;
                }
                if let Some(song) = songs.borrow_and_update().clone() {
                    let length = song
                        .duration_ms
                        .map_or("live".to_string(), |ms| format!("{}s", ms / 1000));
                    info!("🎵 Now playing: {} - {} ({})", song.artist_or_default(), song.title, length);
                }
            }

            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                report_changes(&last, &snapshot);
                last = snapshot;
            }
        }
    }

    info!("Stopping...");
    engine.stop().await?;
    Ok(())
}

fn report_changes(previous: &EngineSnapshot, current: &EngineSnapshot) {
    if previous.is_connected != current.is_connected {
        if current.is_connected {
            info!("✅ Connected to station");
        } else {
            info!("🔄 Reconnecting to station...");
        }
    }

    if previous.sync_quality != current.sync_quality {
        if let (Some(quality), Some(status)) = (current.sync_quality, current.sync_status) {
            let label = match quality {
                SyncQuality::Tight => "tight",
                SyncQuality::Loose => "loose",
                SyncQuality::Drifting => "drifting",
            };
            info!(desync_ms = status.desync_ms, "Sync quality: {}", label);
        }
    }

    if previous.transport_error != current.transport_error {
        if let Some(error) = &current.transport_error {
            warn!("⚠️ Audio stream unavailable: {}", error);
        }
    }
}
