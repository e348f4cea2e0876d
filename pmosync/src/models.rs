//! Data models for the broadcast timeline and the push/heartbeat wire formats

use crate::constants::{SYNC_LOOSE_THRESHOLD_MS, SYNC_TIGHT_THRESHOLD_MS};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Deserialize a string or number into a SongId
fn deserialize_song_id<'de, D>(deserializer: D) -> std::result::Result<SongId, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrNumber {
        String(String),
        Signed(i64),
        Unsigned(u64),
    }

    Ok(match StringOrNumber::deserialize(deserializer)? {
        StringOrNumber::String(s) => SongId(s),
        StringOrNumber::Signed(n) => SongId(n.to_string()),
        StringOrNumber::Unsigned(n) => SongId(n.to_string()),
    })
}

/// Deserialize an optional duration, mapping 0 to "live"
fn deserialize_optional_duration<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt = Option::<u64>::deserialize(deserializer)?;
    Ok(opt.filter(|ms| *ms > 0))
}

/// Opaque song identifier
///
/// The server sends numeric ids; strings are accepted as well so the engine
/// never has to interpret them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SongId(String);

impl SongId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for SongId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserialize_song_id(deserializer)
    }
}

impl fmt::Display for SongId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<i64> for SongId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for SongId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// The song presently authoritative on the broadcast timeline
///
/// Replaced wholesale on every `SongChange` push, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentSong {
    pub id: SongId,
    pub title: String,
    #[serde(default)]
    pub artist_names: Option<String>,
    #[serde(default)]
    pub album_title: Option<String>,
    /// Position of the song start on the server timeline (ms)
    pub started_at_ms: u64,
    /// Wall-clock start, informational only
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// Absent or zero for live/indeterminate length
    #[serde(default, deserialize_with = "deserialize_optional_duration")]
    pub duration_ms: Option<u64>,
    /// base64(zlib(msgpack(events)))
    #[serde(default)]
    pub rhythm_data: Option<String>,
}

impl CurrentSong {
    /// True when the song has no known length
    pub fn is_live(&self) -> bool {
        self.duration_ms.is_none()
    }

    /// Same song at the same place on the timeline
    ///
    /// The server re-sends the current song right after every handshake;
    /// such a replay must not reset the scheduler.
    pub fn is_same_entry(&self, other: &CurrentSong) -> bool {
        self.id == other.id && self.started_at_ms == other.started_at_ms
    }

    pub fn artist_or_default(&self) -> &str {
        self.artist_names.as_deref().unwrap_or("Unknown artist")
    }
}

/// One scheduled cue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RhythmEvent {
    /// Offset from the song start (ms)
    pub time_ms: u64,
    /// Semantic action, e.g. `whistle`
    pub identifier: String,
}

impl RhythmEvent {
    pub fn new(time_ms: u64, identifier: impl Into<String>) -> Self {
        Self {
            time_ms,
            identifier: identifier.into(),
        }
    }
}

/// Heartbeat request body
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub client_position_ms: u64,
}

/// Heartbeat response body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub desync_ms: i64,
    #[serde(default)]
    pub server_position_ms: u64,
    #[serde(default)]
    pub client_base_pos_ms: u64,
}

/// Result of the most recent successful heartbeat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub desync_ms: i64,
    pub server_position_ms: u64,
    pub client_base_pos_ms: u64,
}

impl SyncStatus {
    pub fn quality(&self) -> SyncQuality {
        SyncQuality::from_desync(self.desync_ms)
    }
}

impl From<HeartbeatResponse> for SyncStatus {
    fn from(response: HeartbeatResponse) -> Self {
        Self {
            desync_ms: response.desync_ms,
            server_position_ms: response.server_position_ms,
            client_base_pos_ms: response.client_base_pos_ms,
        }
    }
}

/// Coarse classification of the last measured desync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncQuality {
    Tight,
    Loose,
    Drifting,
}

impl SyncQuality {
    pub fn from_desync(desync_ms: i64) -> Self {
        let gap = desync_ms.saturating_abs();
        if gap < SYNC_TIGHT_THRESHOLD_MS {
            Self::Tight
        } else if gap < SYNC_LOOSE_THRESHOLD_MS {
            Self::Loose
        } else {
            Self::Drifting
        }
    }
}

/// State of the broadcast session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Open,
    #[default]
    Closed,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Open)
    }
}

/// Inbound push message
#[derive(Debug, Clone, PartialEq)]
pub enum StationEvent {
    SongChange(CurrentSong),
    /// Any envelope type this client does not act upon
    Unknown(String),
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

impl StationEvent {
    /// Parse a text frame of the push channel
    ///
    /// Unknown envelope types parse successfully as [`StationEvent::Unknown`];
    /// anything that is not a `{type, data}` envelope, or a `SongChange`
    /// whose payload does not fit [`CurrentSong`], is a
    /// [`Error::MalformedMessage`].
    pub fn parse(text: &str) -> Result<Self> {
        let envelope: Envelope =
            serde_json::from_str(text).map_err(|e| Error::malformed(e.to_string()))?;

        match envelope.kind.as_str() {
            "SongChange" => serde_json::from_value(envelope.data)
                .map(StationEvent::SongChange)
                .map_err(|e| Error::malformed(format!("SongChange payload: {e}"))),
            _ => Ok(StationEvent::Unknown(envelope.kind)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn song_json() -> serde_json::Value {
        json!({
            "id": 42,
            "title": "Blue in Green",
            "artist_names": "Miles Davis",
            "album_title": "Kind of Blue",
            "duration_ms": 337000,
            "started_at": "2026-01-10T12:00:00Z",
            "started_at_ms": 120000,
            "rhythm_data": null
        })
    }

    #[test]
    fn test_parse_song_change() {
        let text = json!({"type": "SongChange", "data": song_json()}).to_string();
        match StationEvent::parse(&text).unwrap() {
            StationEvent::SongChange(song) => {
                assert_eq!(song.id, SongId::from(42));
                assert_eq!(song.title, "Blue in Green");
                assert_eq!(song.started_at_ms, 120000);
                assert_eq!(song.duration_ms, Some(337000));
                assert!(song.rhythm_data.is_none());
                assert!(!song.is_live());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_type_is_ignored() {
        let text = json!({"type": "ListenerJoined", "data": {"user": "bob"}}).to_string();
        assert_eq!(
            StationEvent::parse(&text).unwrap(),
            StationEvent::Unknown("ListenerJoined".to_string())
        );
    }

    #[test]
    fn test_malformed_messages() {
        assert!(matches!(
            StationEvent::parse("not json"),
            Err(Error::MalformedMessage(_))
        ));
        assert!(matches!(
            StationEvent::parse(r#"{"data": {}}"#),
            Err(Error::MalformedMessage(_))
        ));
        let bad_song = json!({"type": "SongChange", "data": {"title": 3}}).to_string();
        assert!(matches!(
            StationEvent::parse(&bad_song),
            Err(Error::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_zero_duration_is_live() {
        let mut value = song_json();
        value["duration_ms"] = json!(0);
        let song: CurrentSong = serde_json::from_value(value).unwrap();
        assert!(song.is_live());

        let mut value = song_json();
        value.as_object_mut().unwrap().remove("duration_ms");
        let song: CurrentSong = serde_json::from_value(value).unwrap();
        assert!(song.is_live());
    }

    #[test]
    fn test_string_song_id() {
        let mut value = song_json();
        value["id"] = json!("abc-1");
        let song: CurrentSong = serde_json::from_value(value).unwrap();
        assert_eq!(song.id.as_str(), "abc-1");
    }

    #[test]
    fn test_same_entry() {
        let a: CurrentSong = serde_json::from_value(song_json()).unwrap();
        let mut b = a.clone();
        assert!(a.is_same_entry(&b));
        b.started_at_ms += 1;
        assert!(!a.is_same_entry(&b));
    }

    #[test]
    fn test_sync_quality() {
        assert_eq!(SyncQuality::from_desync(0), SyncQuality::Tight);
        assert_eq!(SyncQuality::from_desync(-99), SyncQuality::Tight);
        assert_eq!(SyncQuality::from_desync(100), SyncQuality::Loose);
        assert_eq!(SyncQuality::from_desync(-499), SyncQuality::Loose);
        assert_eq!(SyncQuality::from_desync(500), SyncQuality::Drifting);
        assert_eq!(SyncQuality::from_desync(i64::MIN), SyncQuality::Drifting);
    }
}
