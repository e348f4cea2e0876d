//! Cursor-based rhythm cue scheduler.
//!
//! The scheduler owns the track of the current song and a single cursor
//! (index of the last fired event). Each tick scans forward from the cursor
//! and fires every event whose time has been reached, one at a time and in
//! track order, stopping at the first event still in the future. A long
//! stall therefore fires all missed events in one catch-up pass, and an
//! event can never fire twice or out of order.
//!
//! Loading a new song always resets the cursor first, so no event of the
//! previous track can fire after a switch has been observed.

use super::RhythmTrack;
use crate::models::{RhythmEvent, SongId};
use serde::Serialize;
use tracing::{debug, trace};

/// Lifecycle of the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    /// No song, or a song without events
    Idle,
    /// Events remain to be fired
    Active,
    /// Every event of the track has fired
    Exhausted,
}

/// A cue that has just been fired
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FiredEvent {
    pub song_id: SongId,
    /// Position of the event in the sorted track
    pub index: usize,
    pub event: RhythmEvent,
}

#[derive(Debug, Default)]
pub struct RhythmScheduler {
    song_id: Option<SongId>,
    track: RhythmTrack,
    /// Index of the last fired event
    cursor: Option<usize>,
}

impl RhythmScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-initialise against a new song's track
    pub fn load(&mut self, song_id: SongId, track: RhythmTrack) {
        self.reset();
        debug!(song_id = %song_id, events = track.len(), "Rhythm track loaded");
        self.song_id = Some(song_id);
        self.track = track;
    }

    /// Drop the track and cursor and go back to idle
    pub fn reset(&mut self) {
        self.song_id = None;
        self.track = RhythmTrack::empty();
        self.cursor = None;
    }

    pub fn state(&self) -> SchedulerState {
        if self.song_id.is_none() || self.track.is_empty() {
            return SchedulerState::Idle;
        }
        if self.fired_count() >= self.track.len() {
            SchedulerState::Exhausted
        } else {
            SchedulerState::Active
        }
    }

    pub fn song_id(&self) -> Option<&SongId> {
        self.song_id.as_ref()
    }

    pub fn track(&self) -> &RhythmTrack {
        &self.track
    }

    /// Number of events fired so far for the current track
    pub fn fired_count(&self) -> usize {
        self.cursor.map_or(0, |cursor| cursor + 1)
    }

    pub fn total_events(&self) -> usize {
        self.track.len()
    }

    /// Next event that will fire, if any
    pub fn next_event(&self) -> Option<&RhythmEvent> {
        self.track.get(self.fired_count())
    }

    /// Whether the event at `index` has already fired
    pub fn has_fired(&self, index: usize) -> bool {
        self.cursor.is_some_and(|cursor| index <= cursor)
    }

    /// Advance the cursor to `progress_ms` and return the events fired
    ///
    /// `progress_ms` is the raw song-relative progress; it may be negative
    /// right after a song change, in which case nothing fires.
    pub fn tick(&mut self, progress_ms: i64) -> Vec<FiredEvent> {
        let mut fired = Vec::new();
        self.advance(progress_ms, |event| fired.push(event));
        fired
    }

    /// Same as [`tick`](Self::tick) but hands each event to `on_fire`
    pub fn advance<F>(&mut self, progress_ms: i64, mut on_fire: F) -> usize
    where
        F: FnMut(FiredEvent),
    {
        let Some(song_id) = self.song_id.as_ref() else {
            return 0;
        };

        let mut count = 0;
        loop {
            let next = self.fired_count();
            let Some(event) = self.track.get(next) else {
                break;
            };
            if progress_ms < 0 || (progress_ms as u64) < event.time_ms {
                break;
            }

            trace!(
                song_id = %song_id,
                index = next,
                time_ms = event.time_ms,
                identifier = %event.identifier,
                "Rhythm event fired"
            );
            self.cursor = Some(next);
            count += 1;
            on_fire(FiredEvent {
                song_id: song_id.clone(),
                index: next,
                event: event.clone(),
            });
        }
        count
    }
}
