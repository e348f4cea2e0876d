//! In-memory collaborators shared by the session and engine tests

#![allow(dead_code)]

use async_trait::async_trait;
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::StreamExt;
use pmosync::models::HeartbeatResponse;
use pmosync::rhythm::compile_track;
use pmosync::session::MessageStream;
use pmosync::{
    AudioTransport, CurrentSong, Error, HeartbeatChannel, PushConnector, Result, RhythmEvent,
    SongId, SongSource,
};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Route engine logs to the test output; safe to call from every test
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("pmosync=debug")
        .with_test_writer()
        .try_init();
}

pub type FrameSender = UnboundedSender<Result<String>>;

enum Handshake {
    Refuse,
    Accept(MessageStream),
}

/// Push connector driven by a script of handshake outcomes
///
/// Once the script is exhausted further handshakes never complete.
#[derive(Default)]
pub struct FakeConnector {
    attempts: AtomicUsize,
    script: Mutex<VecDeque<Handshake>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful handshake and return the server side of its stream
    pub fn accept(&self) -> FrameSender {
        let (tx, rx) = unbounded();
        self.script
            .lock()
            .unwrap()
            .push_back(Handshake::Accept(rx.boxed()));
        tx
    }

    pub fn refuse(&self) {
        self.script.lock().unwrap().push_back(Handshake::Refuse);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PushConnector for FakeConnector {
    async fn connect(&self) -> Result<MessageStream> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Handshake::Accept(stream)) => Ok(stream),
            Some(Handshake::Refuse) => Err(Error::transport("connection refused")),
            None => std::future::pending().await,
        }
    }
}

/// Heartbeat channel replaying scripted replies, then repeating the last one
pub struct ScriptedHeartbeat {
    calls: AtomicUsize,
    replies: Mutex<VecDeque<std::result::Result<HeartbeatResponse, String>>>,
    fallback: HeartbeatResponse,
}

impl ScriptedHeartbeat {
    pub fn constant(client_base_pos_ms: u64) -> Self {
        Self::with_script(Vec::new(), client_base_pos_ms)
    }

    pub fn with_script(
        replies: Vec<std::result::Result<HeartbeatResponse, String>>,
        client_base_pos_ms: u64,
    ) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            replies: Mutex::new(replies.into()),
            fallback: heartbeat_response(client_base_pos_ms),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HeartbeatChannel for ScriptedHeartbeat {
    async fn heartbeat(&self, _client_position_ms: u64) -> Result<HeartbeatResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.replies.lock().unwrap().pop_front();
        match next {
            Some(Ok(response)) => Ok(response),
            Some(Err(reason)) => Err(Error::heartbeat(reason)),
            None => Ok(self.fallback),
        }
    }
}

pub fn heartbeat_response(client_base_pos_ms: u64) -> HeartbeatResponse {
    HeartbeatResponse {
        desync_ms: 15,
        server_position_ms: client_base_pos_ms,
        client_base_pos_ms,
    }
}

/// Song source answering after a delay
pub struct DelayedSongSource {
    pub delay: Duration,
    pub song: Option<CurrentSong>,
}

#[async_trait]
impl SongSource for DelayedSongSource {
    async fn current_song(&self) -> Result<Option<CurrentSong>> {
        tokio::time::sleep(self.delay).await;
        Ok(self.song.clone())
    }
}

/// Transport whose position is set by the test
#[derive(Default)]
pub struct ManualTransport {
    position_ms: AtomicUsize,
    playing: AtomicBool,
}

impl ManualTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_position_ms(&self, position_ms: usize) {
        self.position_ms.store(position_ms, Ordering::SeqCst);
    }
}

impl AudioTransport for ManualTransport {
    fn position(&self) -> Duration {
        Duration::from_millis(self.position_ms.load(Ordering::SeqCst) as u64)
    }

    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    fn play(&self) -> Result<()> {
        self.playing.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn pause(&self) {
        self.playing.store(false, Ordering::SeqCst);
    }
}

pub fn song(id: i64, started_at_ms: u64, events: &[(u64, &str)]) -> CurrentSong {
    let events: Vec<RhythmEvent> = events
        .iter()
        .map(|(time, identifier)| RhythmEvent::new(*time, *identifier))
        .collect();
    CurrentSong {
        id: SongId::from(id),
        title: format!("Song {id}"),
        artist_names: Some("Test Artist".to_string()),
        album_title: None,
        started_at_ms,
        started_at: None,
        duration_ms: Some(240_000),
        rhythm_data: Some(compile_track(&events).unwrap()),
    }
}

/// `SongChange` envelope as sent by the station
pub fn song_change_frame(song: &CurrentSong) -> String {
    json!({"type": "SongChange", "data": song}).to_string()
}
