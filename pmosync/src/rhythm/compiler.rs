//! Rhythm payload compiler
//!
//! Inverse of the decoder: `records → MessagePack → zlib → base64`.
//! Stations compile their JSON cue sheets with this before attaching them
//! to a song; tests use it to build payloads.

use crate::error::{Error, Result};
use crate::models::RhythmEvent;
use base64::{engine::general_purpose, Engine as _};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct WireEvent<'a> {
    time: u64,
    identifier: &'a str,
}

/// Compile a list of events into a payload
pub fn compile_track(events: &[RhythmEvent]) -> Result<String> {
    let wire: Vec<WireEvent<'_>> = events
        .iter()
        .map(|event| WireEvent {
            time: event.time_ms,
            identifier: &event.identifier,
        })
        .collect();
    encode(&wire)
}

/// Compile an arbitrary JSON cue sheet into a payload
///
/// The JSON is packed as-is; it is only checked when decoded.
pub fn compile_json(cue_sheet: &serde_json::Value) -> Result<String> {
    encode(cue_sheet)
}

fn encode<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let packed = rmp_serde::to_vec_named(value).map_err(|e| Error::other(e.to_string()))?;

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&packed)
        .and_then(|_| encoder.flush())
        .map_err(|e| Error::other(format!("zlib write failed: {e}")))?;
    let compressed = encoder
        .finish()
        .map_err(|e| Error::other(format!("zlib finish failed: {e}")))?;

    Ok(general_purpose::STANDARD.encode(compressed))
}
