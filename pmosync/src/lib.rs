//! # pmosync - Playback Synchronization & Event Scheduling Engine
//!
//! `pmosync` keeps a listener's local playback aligned with a radio station's
//! authoritative timeline and fires the rhythm cues embedded in each song at
//! the right moment.
//!
//! ## Features
//!
//! - **Push Channel**: Follows song changes over a WebSocket with a fixed-delay reconnect
//! - **Clock Alignment**: Periodic heartbeats map the local position onto the server timeline
//! - **Timeline Projection**: Song progress derived from the latest offset, never negative
//! - **Rhythm Cues**: `base64(zlib(msgpack))` cue tracks decoded and fired exactly once, in order
//! - **Async/Await**: Built on tokio, one engine task owning all mutable state
//!
//! ## Quick Start
//!
//! ```no_run
//! use pmosync::{SyncConfig, SyncEngine, WallClockTransport};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SyncConfig::default();
//!     let client = config.build_client()?;
//!
//!     let transport = Arc::new(WallClockTransport::new());
//!     let engine = SyncEngine::builder(config)
//!         .with_client(client)?
//!         .transport(transport)
//!         .start()?;
//!     engine.play()?;
//!
//!     let mut cues = engine.subscribe_events();
//!     while let Ok(cue) = cues.recv().await {
//!         println!("{} fired at {}ms", cue.event.identifier, cue.event.time_ms);
//!     }
//!
//!     engine.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`rhythm`]: cue payload decoding/compiling and the cursor scheduler
//! - [`alignment`]: heartbeat round trips and the current [`SyncStatus`]
//! - [`session`]: the push connection and its reconnect policy
//! - [`projector`]: `absolute = client_base_pos + local_elapsed`
//! - [`engine`]: the task tying everything together
//! - [`client`]: HTTP access to the station API
//! - [`config`]: typed configuration loaded from pmoconfig
//! - [`error`]: error types and result alias

pub mod alignment;
pub mod client;
pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod models;
pub mod projector;
pub mod rhythm;
pub mod session;
pub mod transport;

// Re-exports for convenience
pub use alignment::{ClockAlignment, HeartbeatChannel};
pub use client::{ClientBuilder, SongSource, SyncClient};
pub use config::SyncConfig;
pub use engine::{EngineHandle, EngineSnapshot, EngineState, SyncEngine};
pub use error::{Error, Result};
pub use models::{
    ConnectionState, CurrentSong, RhythmEvent, SongId, StationEvent, SyncQuality, SyncStatus,
};
pub use projector::{Progress, TimelineProjector};
pub use rhythm::{FiredEvent, RhythmScheduler, RhythmTrack, SchedulerState};
pub use session::{BroadcastSession, PushConnector, SessionEvent, WebSocketConnector};
pub use transport::{AudioTransport, WallClockTransport};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
