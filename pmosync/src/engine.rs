//! Synchronization engine.
//!
//! One task owns every piece of mutable state (current song, sync status,
//! scheduler cursor) and reacts, one at a time, to:
//!
//! - commands from the [`EngineHandle`],
//! - session events (song changes, connection state),
//! - completed heartbeats and the initial current-song fetch,
//! - the tick interval, which projects the position and fires cues,
//! - the heartbeat interval, which starts a measurement while playing.
//!
//! Network round trips run in their own tasks; the loop only ever reads the
//! last known values and never waits on them. At most one heartbeat is in
//! flight at a time.
//!
//! Stopping the engine cancels both intervals, aborts outstanding requests
//! and stops the broadcast session, which closes the socket and cancels any
//! pending reconnect.

use crate::alignment::{Applied, ClockAlignment, HeartbeatChannel, HeartbeatOutcome};
use crate::client::{SongSource, SyncClient};
use crate::config::SyncConfig;
use crate::constants::{COMMAND_QUEUE, TOGGLE_IDENTIFIER};
use crate::error::{Error, Result};
use crate::models::{ConnectionState, CurrentSong, SongId, SyncQuality, SyncStatus};
use crate::projector::{Progress, TimelineProjector};
use crate::rhythm::{decode_optional, FiredEvent, RhythmScheduler, RhythmTrack, SchedulerState};
use crate::session::{BroadcastSession, PushConnector, SessionEvent, WebSocketConnector};
use crate::transport::AudioTransport;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

/// Everything a consumer needs to render the engine state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineSnapshot {
    pub current_song: Option<CurrentSong>,
    pub connection: ConnectionState,
    pub is_connected: bool,
    pub sync_status: Option<SyncStatus>,
    pub sync_quality: Option<SyncQuality>,
    /// `None` when no song is set
    pub progress: Option<Progress>,
    pub scheduler_state: SchedulerState,
    pub fired_count: usize,
    pub total_events: usize,
    /// Flipped by every `whistle` cue, reset on song change
    pub toggle_state: bool,
    /// Audio transport failure, the only condition meant for the user
    pub transport_error: Option<String>,
}

impl Default for EngineSnapshot {
    fn default() -> Self {
        Self {
            current_song: None,
            connection: ConnectionState::Closed,
            is_connected: false,
            sync_status: None,
            sync_quality: None,
            progress: None,
            scheduler_state: SchedulerState::Idle,
            fired_count: 0,
            total_events: 0,
            toggle_state: false,
            transport_error: None,
        }
    }
}

/// Engine state, mutated only by the engine task
#[derive(Debug, Default)]
pub struct EngineState {
    song: Option<CurrentSong>,
    connection: ConnectionState,
    alignment: ClockAlignment,
    projector: TimelineProjector,
    scheduler: RhythmScheduler,
    progress: Option<Progress>,
    toggle_state: bool,
}

impl EngineState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_song(&self) -> Option<&CurrentSong> {
        self.song.as_ref()
    }

    pub fn current_song_id(&self) -> Option<SongId> {
        self.song.as_ref().map(|song| song.id.clone())
    }

    pub fn sync_status(&self) -> Option<&SyncStatus> {
        self.alignment.status()
    }

    pub fn scheduler(&self) -> &RhythmScheduler {
        &self.scheduler
    }

    pub fn toggle_state(&self) -> bool {
        self.toggle_state
    }

    /// Make `song` the current song
    ///
    /// Returns `false` for a replay of the live song (same id, same start),
    /// which leaves the scheduler untouched. Otherwise the scheduler, the
    /// derived progress and the toggle are reset before the new track is
    /// loaded. An unusable rhythm payload only disables cues for this song.
    pub fn on_song_change(&mut self, song: CurrentSong) -> bool {
        if let Some(current) = &self.song {
            if current.is_same_entry(&song) {
                debug!(song_id = %song.id, "Duplicate song change ignored");
                return false;
            }
        }

        self.scheduler.reset();
        self.progress = None;
        self.toggle_state = false;

        let track = match decode_optional(song.rhythm_data.as_deref()) {
            Ok(track) => track,
            Err(e) => {
                error!(
                    song_id = %song.id,
                    "Rhythm data unusable, playing without cues: {}", e
                );
                RhythmTrack::empty()
            }
        };

        info!(
            song_id = %song.id,
            title = %song.title,
            artist = %song.artist_or_default(),
            started_at_ms = song.started_at_ms,
            events = track.len(),
            "Now playing"
        );

        self.scheduler.load(song.id.clone(), track);
        self.song = Some(song);
        true
    }

    pub fn on_connection(&mut self, state: ConnectionState) {
        self.connection = state;
    }

    /// Fold a heartbeat outcome into the sync status
    pub fn on_heartbeat(&mut self, outcome: HeartbeatOutcome) -> Applied {
        let current = self.current_song_id();
        let applied = self.alignment.apply(outcome, current.as_ref());
        if applied == Applied::Updated {
            self.projector.set_status(self.alignment.status().copied());
        }
        applied
    }

    /// Project the position and fire every cue that has been reached
    pub fn on_tick<F>(&mut self, local_elapsed: Duration, mut on_fire: F) -> usize
    where
        F: FnMut(FiredEvent),
    {
        let Some(progress) = self.projector.progress(self.song.as_ref(), local_elapsed) else {
            self.progress = None;
            return 0;
        };
        self.progress = Some(progress);

        let toggle_state = &mut self.toggle_state;
        self.scheduler.advance(progress.raw_ms, |fired| {
            if fired.event.identifier == TOGGLE_IDENTIFIER {
                *toggle_state = !*toggle_state;
            }
            on_fire(fired);
        })
    }

    pub fn snapshot(&self, transport_error: Option<String>) -> EngineSnapshot {
        let sync_status = self.alignment.status().copied();
        EngineSnapshot {
            current_song: self.song.clone(),
            connection: self.connection,
            is_connected: self.connection.is_connected(),
            sync_status,
            sync_quality: sync_status.map(|status| status.quality()),
            progress: self.progress,
            scheduler_state: self.scheduler.state(),
            fired_count: self.scheduler.fired_count(),
            total_events: self.scheduler.total_events(),
            toggle_state: self.toggle_state,
            transport_error,
        }
    }
}

#[derive(Debug)]
enum EngineCommand {
    Connect,
    Shutdown,
}

/// Builder wiring the engine to its collaborators
pub struct SyncEngine {
    config: SyncConfig,
    heartbeat: Option<Arc<dyn HeartbeatChannel>>,
    songs: Option<Arc<dyn SongSource>>,
    connector: Option<Arc<dyn PushConnector>>,
    transport: Option<Arc<dyn AudioTransport>>,
}

impl SyncEngine {
    pub fn builder(config: SyncConfig) -> Self {
        Self {
            config,
            heartbeat: None,
            songs: None,
            connector: None,
            transport: None,
        }
    }

    /// Use a station client for heartbeats, the initial fetch and the
    /// WebSocket push channel
    pub fn with_client(self, client: SyncClient) -> Result<Self> {
        let connector = WebSocketConnector::from_client(&client)?;
        let client = Arc::new(client);
        Ok(self
            .heartbeat(client.clone())
            .song_source(client)
            .connector(Arc::new(connector)))
    }

    pub fn heartbeat(mut self, channel: Arc<dyn HeartbeatChannel>) -> Self {
        self.heartbeat = Some(channel);
        self
    }

    /// Optional; without it the engine waits for the first push
    pub fn song_source(mut self, source: Arc<dyn SongSource>) -> Self {
        self.songs = Some(source);
        self
    }

    pub fn connector(mut self, connector: Arc<dyn PushConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn AudioTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Start the engine; its lifetime is the listening context
    pub fn start(self) -> Result<EngineHandle> {
        let heartbeat = self
            .heartbeat
            .ok_or_else(|| Error::other("SyncEngine requires a heartbeat channel"))?;
        let connector = self
            .connector
            .ok_or_else(|| Error::other("SyncEngine requires a push connector"))?;
        let transport = self
            .transport
            .ok_or_else(|| Error::other("SyncEngine requires an audio transport"))?;

        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);
        let (snapshot_tx, snapshot_rx) = watch::channel(EngineSnapshot::default());
        let (song_tx, song_rx) = watch::channel(None);
        let (fired_tx, _) = broadcast::channel(self.config.events.broadcast_capacity.max(1));

        let (session, session_events) =
            BroadcastSession::spawn(connector, self.config.timing.reconnect_delay());

        let task = EngineTask {
            config: self.config,
            heartbeat,
            transport: Arc::clone(&transport),
            state: EngineState::new(),
            snapshots: snapshot_tx,
            songs: song_tx,
            fired: fired_tx.clone(),
        };
        let join_handle = tokio::spawn(task.run(command_rx, session, session_events, self.songs));

        Ok(EngineHandle {
            commands: command_tx,
            snapshots: snapshot_rx,
            songs: song_rx,
            fired: fired_tx,
            transport,
            join_handle,
        })
    }
}

/// Handle to a running engine
pub struct EngineHandle {
    commands: mpsc::Sender<EngineCommand>,
    snapshots: watch::Receiver<EngineSnapshot>,
    songs: watch::Receiver<Option<CurrentSong>>,
    fired: broadcast::Sender<FiredEvent>,
    transport: Arc<dyn AudioTransport>,
    join_handle: JoinHandle<()>,
}

impl EngineHandle {
    /// Latest published snapshot
    pub fn snapshot(&self) -> EngineSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<EngineSnapshot> {
        self.snapshots.clone()
    }

    /// Notified whenever a new song becomes current
    pub fn on_song_change(&self) -> watch::Receiver<Option<CurrentSong>> {
        self.songs.clone()
    }

    /// Fired rhythm cues
    pub fn subscribe_events(&self) -> broadcast::Receiver<FiredEvent> {
        self.fired.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.snapshots.borrow().is_connected
    }

    /// Ask the session to connect now instead of waiting for its timer
    pub async fn reconnect(&self) -> Result<()> {
        self.commands
            .send(EngineCommand::Connect)
            .await
            .map_err(|_| Error::other("Engine is stopped"))
    }

    pub fn play(&self) -> Result<()> {
        self.transport.play()
    }

    pub fn pause(&self) {
        self.transport.pause();
    }

    /// Tear the engine down and wait until every resource is released
    pub async fn stop(self) -> Result<()> {
        let _ = self.commands.send(EngineCommand::Shutdown).await;
        if let Err(err) = self.join_handle.await {
            if err.is_cancelled() {
                warn!("Engine task cancelled: {err}");
                return Ok(());
            }
            return Err(Error::other(format!("Engine join error: {err}")));
        }
        Ok(())
    }
}

struct EngineTask {
    config: SyncConfig,
    heartbeat: Arc<dyn HeartbeatChannel>,
    transport: Arc<dyn AudioTransport>,
    state: EngineState,
    snapshots: watch::Sender<EngineSnapshot>,
    songs: watch::Sender<Option<CurrentSong>>,
    fired: broadcast::Sender<FiredEvent>,
}

impl EngineTask {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<EngineCommand>,
        session: BroadcastSession,
        session_events: mpsc::Receiver<SessionEvent>,
        song_source: Option<Arc<dyn SongSource>>,
    ) {
        info!("Starting synchronization engine");

        let mut session_events = Some(session_events);
        let mut in_flight: Option<JoinHandle<HeartbeatOutcome>> = None;
        let mut initial_fetch = song_source.map(|source| {
            tokio::spawn(async move { source.current_song().await })
        });

        let mut tick = interval(self.config.timing.tick_interval());
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut heartbeat = interval(self.config.timing.heartbeat_interval());
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                cmd = commands.recv() => match cmd {
                    Some(EngineCommand::Connect) => {
                        if let Err(e) = session.connect() {
                            warn!("Reconnect request failed: {}", e);
                        }
                    }
                    Some(EngineCommand::Shutdown) | None => break,
                },

                event = recv_pending(&mut session_events) => match event {
                    Some(event) => self.on_session_event(event),
                    None => {
                        warn!("Broadcast session ended");
                        session_events = None;
                    }
                },

                joined = join_pending(&mut initial_fetch) => {
                    initial_fetch = None;
                    self.on_initial_fetch(joined);
                }

                joined = join_pending(&mut in_flight) => {
                    in_flight = None;
                    match joined {
                        Ok(outcome) => {
                            self.state.on_heartbeat(outcome);
                        }
                        Err(e) => warn!("Heartbeat task failed: {}", e),
                    }
                }

                _ = tick.tick() => {
                    let elapsed = self.transport.position();
                    let fired = &self.fired;
                    self.state.on_tick(elapsed, |event| {
                        // No subscriber is not an error
                        let _ = fired.send(event);
                    });
                }

                _ = heartbeat.tick() => {
                    if !self.transport.is_playing() {
                        trace!("Transport stopped, skipping heartbeat");
                    } else if in_flight.is_some() {
                        trace!("Heartbeat still in flight, skipping");
                    } else {
                        let channel = Arc::clone(&self.heartbeat);
                        let song_id = self.state.current_song_id();
                        let position_ms =
                            u64::try_from(self.transport.position().as_millis()).unwrap_or(u64::MAX);
                        in_flight = Some(tokio::spawn(async move {
                            ClockAlignment::measure(channel.as_ref(), song_id, position_ms).await
                        }));
                    }
                }
            }

            self.publish();
        }

        if let Some(handle) = in_flight.take() {
            handle.abort();
        }
        if let Some(handle) = initial_fetch.take() {
            handle.abort();
        }
        // A worker blocked on a full queue only sees the shutdown once its
        // send fails
        drop(session_events);
        if let Err(e) = session.stop().await {
            warn!("Broadcast session did not stop cleanly: {}", e);
        }
        self.state.on_connection(ConnectionState::Closed);
        self.publish();
        info!("Synchronization engine stopped");
    }

    fn on_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::StateChanged(state) => {
                info!(state = ?state, "Push channel state");
                self.state.on_connection(state);
            }
            SessionEvent::SongChanged(song) => self.apply_song(song),
        }
    }

    fn on_initial_fetch(&mut self, joined: std::result::Result<Result<Option<CurrentSong>>, JoinError>) {
        match joined {
            Ok(Ok(Some(song))) => {
                if self.state.current_song().is_some() {
                    debug!(song_id = %song.id, "Push already delivered a song, discarding fetched one");
                } else {
                    self.apply_song(song);
                }
            }
            Ok(Ok(None)) => debug!("No song currently on the timeline"),
            Ok(Err(e)) => error!("Initial current song fetch failed: {}", e),
            Err(e) => warn!("Initial current song task failed: {}", e),
        }
    }

    fn apply_song(&mut self, song: CurrentSong) {
        if self.state.on_song_change(song) {
            self.songs.send_replace(self.state.current_song().cloned());
        }
    }

    fn publish(&self) {
        self.snapshots
            .send_replace(self.state.snapshot(self.transport.last_error()));
    }
}

/// Await an optional task; pending forever when there is none
async fn join_pending<T>(handle: &mut Option<JoinHandle<T>>) -> std::result::Result<T, JoinError> {
    match handle {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

/// Receive from an optional queue; pending forever once it is gone
async fn recv_pending<T>(queue: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match queue {
        Some(queue) => queue.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HeartbeatResponse, RhythmEvent};
    use crate::rhythm::compile_track;

    fn song(id: i64, started_at_ms: u64, events: &[(u64, &str)]) -> CurrentSong {
        let events: Vec<RhythmEvent> = events
            .iter()
            .map(|(time, id)| RhythmEvent::new(*time, *id))
            .collect();
        CurrentSong {
            id: SongId::from(id),
            title: format!("Song {id}"),
            artist_names: None,
            album_title: None,
            started_at_ms,
            started_at: None,
            duration_ms: Some(180_000),
            rhythm_data: Some(compile_track(&events).unwrap()),
        }
    }

    fn outcome(song_id: Option<i64>, base: u64) -> HeartbeatOutcome {
        HeartbeatOutcome {
            song_id: song_id.map(SongId::from),
            client_position_ms: 0,
            result: Ok(HeartbeatResponse {
                desync_ms: 12,
                server_position_ms: base,
                client_base_pos_ms: base,
            }),
        }
    }

    fn fire_all(state: &mut EngineState, elapsed_ms: u64) -> Vec<FiredEvent> {
        let mut fired = Vec::new();
        state.on_tick(Duration::from_millis(elapsed_ms), |event| fired.push(event));
        fired
    }

    #[test]
    fn test_no_song_no_progress() {
        let mut state = EngineState::new();
        assert!(fire_all(&mut state, 5_000).is_empty());
        let snapshot = state.snapshot(None);
        assert!(snapshot.progress.is_none());
        assert_eq!(snapshot.scheduler_state, SchedulerState::Idle);
    }

    #[test]
    fn test_stall_recovery_in_one_tick() {
        let mut state = EngineState::new();
        state.on_song_change(song(1, 10_000, &[(0, "whistle"), (1000, "whistle"), (2500, "whistle")]));
        assert_eq!(state.on_heartbeat(outcome(Some(1), 10_000)), Applied::Updated);

        let fired = fire_all(&mut state, 3_000);
        assert_eq!(fired.iter().map(|f| f.index).collect::<Vec<_>>(), vec![0, 1, 2]);
        // Three whistles flip the toggle three times
        assert!(state.toggle_state());
        assert_eq!(state.snapshot(None).scheduler_state, SchedulerState::Exhausted);
    }

    #[test]
    fn test_song_change_prevents_leakage() {
        let mut state = EngineState::new();
        state.on_song_change(song(1, 0, &[(0, "a"), (5_000, "a")]));
        assert_eq!(fire_all(&mut state, 100).len(), 1);

        state.on_song_change(song(2, 4_000, &[(8_000, "b")]));
        let snapshot = state.snapshot(None);
        assert_eq!(snapshot.fired_count, 0);
        assert!(snapshot.progress.is_none());

        // Absolute 6000 is past A's 5000 cue but only 2000 into song B
        assert!(fire_all(&mut state, 6_000).is_empty());
        let fired = fire_all(&mut state, 12_000);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].song_id, SongId::from(2));
    }

    #[test]
    fn test_duplicate_song_change_keeps_cursor() {
        let mut state = EngineState::new();
        let first = song(1, 0, &[(0, "whistle"), (5_000, "whistle")]);
        assert!(state.on_song_change(first.clone()));
        assert_eq!(fire_all(&mut state, 10).len(), 1);

        assert!(!state.on_song_change(first.clone()));
        assert_eq!(state.scheduler().fired_count(), 1);
        assert!(state.toggle_state());

        let mut replay = first;
        replay.started_at_ms = 200_000;
        assert!(state.on_song_change(replay));
        assert_eq!(state.scheduler().fired_count(), 0);
        assert!(!state.toggle_state());
    }

    #[test]
    fn test_stale_heartbeat_is_discarded() {
        let mut state = EngineState::new();
        state.on_song_change(song(1, 0, &[]));
        state.on_song_change(song(2, 60_000, &[]));

        assert_eq!(state.on_heartbeat(outcome(Some(1), 999)), Applied::Stale);
        assert!(state.sync_status().is_none());
        assert_eq!(state.on_heartbeat(outcome(Some(2), 60_000)), Applied::Updated);
        assert_eq!(state.sync_status().unwrap().client_base_pos_ms, 60_000);
    }

    #[test]
    fn test_corrupt_rhythm_data_degrades_to_no_events() {
        let mut state = EngineState::new();
        let mut broken = song(3, 0, &[]);
        broken.rhythm_data = Some("!!not base64!!".to_string());
        assert!(state.on_song_change(broken));

        let snapshot = state.snapshot(None);
        assert_eq!(snapshot.current_song.unwrap().id, SongId::from(3));
        assert_eq!(snapshot.scheduler_state, SchedulerState::Idle);
        assert!(fire_all(&mut state, 100_000).is_empty());
    }

    #[test]
    fn test_progress_never_negative() {
        let mut state = EngineState::new();
        state.on_song_change(song(4, 50_000, &[(0, "whistle")]));
        state.on_heartbeat(outcome(Some(4), 49_000));

        assert!(fire_all(&mut state, 500).is_empty());
        let progress = state.snapshot(None).progress.unwrap();
        assert_eq!(progress.raw_ms, -500);
        assert_eq!(progress.elapsed_ms, 0);
    }
}
