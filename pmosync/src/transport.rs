//! Audio transport capability.
//!
//! The engine never decodes or buffers audio. It only needs the local
//! element's free-running position, a play/pause control and a way to learn
//! that the stream failed. [`WallClockTransport`] is a headless
//! implementation that measures elapsed play time with a monotonic clock.

use crate::error::Result;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Local audio element as seen by the engine
pub trait AudioTransport: Send + Sync {
    /// Elapsed playback time since the local stream started
    fn position(&self) -> Duration;

    fn is_playing(&self) -> bool;

    fn play(&self) -> Result<()>;

    fn pause(&self);

    /// Last stream failure, if the transport stopped on an error
    fn last_error(&self) -> Option<String> {
        None
    }
}

#[derive(Debug, Default)]
struct ClockState {
    accumulated: Duration,
    resumed_at: Option<Instant>,
    error: Option<String>,
}

/// Transport whose position is the wall-clock time spent playing
#[derive(Debug, Default)]
pub struct WallClockTransport {
    state: Mutex<ClockState>,
}

impl WallClockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop on a stream failure; the error is reported until the next `play`
    pub fn fail(&self, reason: impl Into<String>) {
        let mut state = self.lock();
        if let Some(resumed_at) = state.resumed_at.take() {
            state.accumulated += resumed_at.elapsed();
        }
        state.error = Some(reason.into());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ClockState> {
        // The state stays consistent even if a holder panicked
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl AudioTransport for WallClockTransport {
    fn position(&self) -> Duration {
        let state = self.lock();
        match state.resumed_at {
            Some(resumed_at) => state.accumulated + resumed_at.elapsed(),
            None => state.accumulated,
        }
    }

    fn is_playing(&self) -> bool {
        self.lock().resumed_at.is_some()
    }

    fn play(&self) -> Result<()> {
        let mut state = self.lock();
        state.error = None;
        if state.resumed_at.is_none() {
            state.resumed_at = Some(Instant::now());
        }
        Ok(())
    }

    fn pause(&self) {
        let mut state = self.lock();
        if let Some(resumed_at) = state.resumed_at.take() {
            state.accumulated += resumed_at.elapsed();
        }
    }

    fn last_error(&self) -> Option<String> {
        self.lock().error.clone()
    }
}
