//! Timeline projection.
//!
//! `absolute_position_ms = client_base_pos_ms + local_audio_elapsed_ms`
//!
//! The base offset comes from the last heartbeat and already contains every
//! server-side correction; no smoothing happens here. Before the first
//! heartbeat the base is 0.

use crate::models::{CurrentSong, SyncStatus};
use serde::Serialize;
use std::time::Duration;

/// Song-relative progress as reported to consumers
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Progress {
    /// Progress floored at zero
    pub elapsed_ms: u64,
    /// Unclamped progress; negative while the offset has not caught up
    pub raw_ms: i64,
    /// `None` for live songs
    pub duration_ms: Option<u64>,
    /// `elapsed / duration` capped at 1.0, `None` for live songs
    pub fraction: Option<f64>,
}

impl Progress {
    pub fn is_live(&self) -> bool {
        self.duration_ms.is_none()
    }
}

/// Position on the server timeline
pub fn absolute_position_ms(status: Option<&SyncStatus>, local_elapsed: Duration) -> i64 {
    let base = status.map_or(0, |s| s.client_base_pos_ms);
    let base = i64::try_from(base).unwrap_or(i64::MAX);
    let local = i64::try_from(local_elapsed.as_millis()).unwrap_or(i64::MAX);
    base.saturating_add(local)
}

/// Progress of `song` at the given absolute position
pub fn song_progress(song: &CurrentSong, absolute_ms: i64) -> Progress {
    let started = i64::try_from(song.started_at_ms).unwrap_or(i64::MAX);
    let raw_ms = absolute_ms.saturating_sub(started);
    let elapsed_ms = raw_ms.max(0) as u64;

    let fraction = song
        .duration_ms
        .map(|duration| (elapsed_ms as f64 / duration as f64).min(1.0));

    Progress {
        elapsed_ms,
        raw_ms,
        duration_ms: song.duration_ms,
        fraction,
    }
}

/// Combines the transport position with the latest sync offset
#[derive(Debug, Default, Clone)]
pub struct TimelineProjector {
    status: Option<SyncStatus>,
}

impl TimelineProjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a new offset from now on
    pub fn set_status(&mut self, status: Option<SyncStatus>) {
        self.status = status;
    }

    pub fn status(&self) -> Option<&SyncStatus> {
        self.status.as_ref()
    }

    pub fn absolute_position_ms(&self, local_elapsed: Duration) -> i64 {
        absolute_position_ms(self.status.as_ref(), local_elapsed)
    }

    /// Progress of the current song, `None` when no song is set
    pub fn progress(
        &self,
        song: Option<&CurrentSong>,
        local_elapsed: Duration,
    ) -> Option<Progress> {
        let song = song?;
        Some(song_progress(song, self.absolute_position_ms(local_elapsed)))
    }
}
