//! Rhythm cue tracks: payload decoding, compiling and scheduling.
//!
//! A song may carry an opaque `rhythm_data` payload. It is produced by the
//! station from a JSON cue sheet through the pipeline
//! `records → MessagePack → zlib → base64` and undone here by
//! [`decode_track`]. The resulting [`RhythmTrack`] is walked by the
//! [`RhythmScheduler`] against the corrected playback progress.

pub mod compiler;
pub mod decoder;
pub mod scheduler;

pub use compiler::{compile_json, compile_track};
pub use decoder::{decode_optional, decode_track};
pub use scheduler::{FiredEvent, RhythmScheduler, SchedulerState};

use crate::models::RhythmEvent;

/// Event track sorted by `time_ms`, ties kept in encoding order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RhythmTrack {
    events: Vec<RhythmEvent>,
}

impl RhythmTrack {
    /// Build a track, sorting the events (stable)
    pub fn from_events(mut events: Vec<RhythmEvent>) -> Self {
        events.sort_by_key(|event| event.time_ms);
        Self { events }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[RhythmEvent] {
        &self.events
    }

    pub fn get(&self, index: usize) -> Option<&RhythmEvent> {
        self.events.get(index)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Number of events carrying `identifier`
    pub fn count_of(&self, identifier: &str) -> usize {
        self.events
            .iter()
            .filter(|event| event.identifier == identifier)
            .count()
    }
}

impl From<Vec<RhythmEvent>> for RhythmTrack {
    fn from(events: Vec<RhythmEvent>) -> Self {
        Self::from_events(events)
    }
}
