//! Default timing parameters for the synchronization engine.
//!
//! Every value here can be overridden through [`SyncConfig`](crate::config::SyncConfig).

// ============================================================================
// Server
// ============================================================================

/// Default API base URL
pub const DEFAULT_API_BASE: &str = "http://localhost:3000/api";

/// Default User-Agent
pub const DEFAULT_USER_AGENT: &str = "pmosync/0.1.0";

/// Path of the push channel, relative to the WebSocket base
pub const WS_PATH: &str = "/ws";

/// Timeout for heartbeat and metadata requests (milliseconds)
///
/// Kept well below a few heartbeat periods so a stuck request never holds
/// the single in-flight slot for long.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;

// ============================================================================
// Timing
// ============================================================================

/// Projector/scheduler tick (milliseconds), roughly 30 Hz
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 33;

/// Heartbeat cadence while the transport is playing (milliseconds)
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 1_000;

/// Fixed delay before a reconnect attempt (milliseconds)
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 3_000;

// ============================================================================
// Channels
// ============================================================================

/// Capacity of the fired-event broadcast channel
pub const DEFAULT_EVENT_BROADCAST_CAPACITY: usize = 256;

/// Capacity of the session → engine queue
pub const SESSION_EVENT_QUEUE: usize = 32;

/// Capacity of the command queues
pub const COMMAND_QUEUE: usize = 8;

// ============================================================================
// Sync quality thresholds
// ============================================================================

/// Below this absolute desync the client is considered tightly aligned
pub const SYNC_TIGHT_THRESHOLD_MS: i64 = 100;

/// Below this absolute desync the client is loosely aligned
pub const SYNC_LOOSE_THRESHOLD_MS: i64 = 500;

// ============================================================================
// Rhythm
// ============================================================================

/// Identifier of the toggle cue
pub const TOGGLE_IDENTIFIER: &str = "whistle";

