//! Clock alignment service.
//!
//! Each heartbeat reports the local transport position and receives the
//! offset that maps it onto the server timeline. Round trips are
//! independent: a failure leaves the previous [`SyncStatus`] in effect and is
//! only logged. A response is applied only if the song it was measured
//! against is still the current one.

use crate::error::Result;
use crate::models::{HeartbeatResponse, SongId, SyncStatus};
use async_trait::async_trait;
use tracing::{debug, warn};

/// Round trip to the authoritative timeline
#[async_trait]
pub trait HeartbeatChannel: Send + Sync {
    async fn heartbeat(&self, client_position_ms: u64) -> Result<HeartbeatResponse>;
}

/// A heartbeat result tagged with the song it was measured against
#[derive(Debug)]
pub struct HeartbeatOutcome {
    pub song_id: Option<SongId>,
    pub client_position_ms: u64,
    pub result: Result<HeartbeatResponse>,
}

/// What happened to a heartbeat outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Updated,
    Failed,
    Stale,
}

#[derive(Debug, Default)]
pub struct ClockAlignment {
    status: Option<SyncStatus>,
    consecutive_failures: u32,
}

impl ClockAlignment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last successful measurement
    pub fn status(&self) -> Option<&SyncStatus> {
        self.status.as_ref()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Forget the offset, e.g. on engine restart
    pub fn clear(&mut self) {
        self.status = None;
        self.consecutive_failures = 0;
    }

    /// Run one heartbeat and return the tagged outcome
    pub async fn measure(
        channel: &dyn HeartbeatChannel,
        song_id: Option<SongId>,
        client_position_ms: u64,
    ) -> HeartbeatOutcome {
        let result = channel.heartbeat(client_position_ms).await;
        HeartbeatOutcome {
            song_id,
            client_position_ms,
            result,
        }
    }

    /// Fold an outcome into the current status
    pub fn apply(&mut self, outcome: HeartbeatOutcome, current_song: Option<&SongId>) -> Applied {
        if outcome.song_id.as_ref() != current_song {
            debug!(
                measured = ?outcome.song_id.as_ref().map(SongId::as_str),
                current = ?current_song.map(SongId::as_str),
                "Discarding heartbeat measured against a previous song"
            );
            return Applied::Stale;
        }

        match outcome.result {
            Ok(response) => {
                let status = SyncStatus::from(response);
                debug!(
                    client_position_ms = outcome.client_position_ms,
                    desync_ms = status.desync_ms,
                    client_base_pos_ms = status.client_base_pos_ms,
                    "Heartbeat applied"
                );
                self.status = Some(status);
                self.consecutive_failures = 0;
                Applied::Updated
            }
            Err(e) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                warn!(
                    failures = self.consecutive_failures,
                    "Heartbeat failed, keeping previous sync status: {}", e
                );
                Applied::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::Mutex;

    struct ScriptedChannel {
        replies: Mutex<Vec<Result<HeartbeatResponse>>>,
    }

    #[async_trait]
    impl HeartbeatChannel for ScriptedChannel {
        async fn heartbeat(&self, _client_position_ms: u64) -> Result<HeartbeatResponse> {
            self.replies.lock().unwrap().remove(0)
        }
    }

    fn response(desync_ms: i64, base: u64) -> HeartbeatResponse {
        HeartbeatResponse {
            desync_ms,
            server_position_ms: base + 1_000,
            client_base_pos_ms: base,
        }
    }

    #[tokio::test]
    async fn test_failure_keeps_previous_status() {
        let channel = ScriptedChannel {
            replies: Mutex::new(vec![
                Ok(response(20, 5_000)),
                Err(Error::heartbeat("timeout")),
                Ok(response(-40, 6_000)),
            ]),
        };
        let song = SongId::from(1);
        let mut alignment = ClockAlignment::new();

        let outcome = ClockAlignment::measure(&channel, Some(song.clone()), 1_000).await;
        assert_eq!(alignment.apply(outcome, Some(&song)), Applied::Updated);
        let before = *alignment.status().unwrap();

        let outcome = ClockAlignment::measure(&channel, Some(song.clone()), 2_000).await;
        assert_eq!(alignment.apply(outcome, Some(&song)), Applied::Failed);
        assert_eq!(alignment.status(), Some(&before));
        assert_eq!(alignment.consecutive_failures(), 1);

        let outcome = ClockAlignment::measure(&channel, Some(song.clone()), 3_000).await;
        assert_eq!(alignment.apply(outcome, Some(&song)), Applied::Updated);
        assert_eq!(alignment.status().unwrap().client_base_pos_ms, 6_000);
        assert_eq!(alignment.consecutive_failures(), 0);
    }

    #[test]
    fn test_stale_outcome_is_discarded() {
        let mut alignment = ClockAlignment::new();
        let outcome = HeartbeatOutcome {
            song_id: Some(SongId::from(1)),
            client_position_ms: 500,
            result: Ok(response(0, 9_000)),
        };
        let current = SongId::from(2);
        assert_eq!(alignment.apply(outcome, Some(&current)), Applied::Stale);
        assert!(alignment.status().is_none());
    }

    #[test]
    fn test_no_song_measurement_applies_without_song() {
        let mut alignment = ClockAlignment::new();
        let outcome = HeartbeatOutcome {
            song_id: None,
            client_position_ms: 0,
            result: Ok(response(0, 100)),
        };
        assert_eq!(alignment.apply(outcome, None), Applied::Updated);
    }
}
