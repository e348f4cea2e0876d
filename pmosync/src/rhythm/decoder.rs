//! Rhythm payload decoder
//!
//! Three fixed stages, each with its own error variant:
//!
//! 1. base64 text → bytes ([`Error::Decode`])
//! 2. zlib inflate → MessagePack bytes ([`Error::Decompression`])
//! 3. MessagePack → `{time, identifier}` records ([`Error::Deserialization`])
//!
//! Decoding is pure: the same payload always yields the same sorted track.

use super::RhythmTrack;
use crate::error::{Error, Result};
use crate::models::RhythmEvent;
use base64::{engine::general_purpose, Engine as _};
use flate2::read::ZlibDecoder;
use serde::Deserialize;
use std::io::Read;

/// Upper bound on the inflated payload size
const MAX_INFLATED_BYTES: u64 = 16 * 1024 * 1024;

/// One record as written by the cue sheet compiler
#[derive(Debug, Deserialize)]
struct RawEvent {
    time: f64,
    identifier: String,
}

/// Accepted top-level shapes
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawTrack {
    List(Vec<RawEvent>),
    Wrapped { events: Vec<RawEvent> },
}

impl RawTrack {
    fn into_events(self) -> Vec<RawEvent> {
        match self {
            RawTrack::List(events) => events,
            RawTrack::Wrapped { events } => events,
        }
    }
}

/// Decode a base64 rhythm payload into a sorted track
///
/// An empty (or whitespace-only) payload is treated like an absent one and
/// yields an empty track.
pub fn decode_track(payload: &str) -> Result<RhythmTrack> {
    let payload = payload.trim();
    if payload.is_empty() {
        return Ok(RhythmTrack::empty());
    }

    let compressed = general_purpose::STANDARD.decode(payload)?;
    let packed = inflate(&compressed)?;
    let raw: RawTrack =
        rmp_serde::from_slice(&packed).map_err(|e| Error::Deserialization(e.to_string()))?;

    let events = raw
        .into_events()
        .into_iter()
        .enumerate()
        .map(|(index, raw)| to_event(index, raw))
        .collect::<Result<Vec<_>>>()?;

    Ok(RhythmTrack::from_events(events))
}

/// Decode an optional payload; absence means no events
pub fn decode_optional(payload: Option<&str>) -> Result<RhythmTrack> {
    match payload {
        Some(payload) => decode_track(payload),
        None => Ok(RhythmTrack::empty()),
    }
}

fn inflate(compressed: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(compressed).take(MAX_INFLATED_BYTES + 1);
    let mut packed = Vec::new();
    decoder
        .read_to_end(&mut packed)
        .map_err(|e| Error::Decompression(e.to_string()))?;

    if packed.len() as u64 > MAX_INFLATED_BYTES {
        return Err(Error::Decompression(format!(
            "inflated payload exceeds {MAX_INFLATED_BYTES} bytes"
        )));
    }
    Ok(packed)
}

fn to_event(index: usize, raw: RawEvent) -> Result<RhythmEvent> {
    if !raw.time.is_finite() || raw.time < 0.0 {
        return Err(Error::Deserialization(format!(
            "event {index} has invalid time {}",
            raw.time
        )));
    }
    Ok(RhythmEvent::new(raw.time.round() as u64, raw.identifier))
}
