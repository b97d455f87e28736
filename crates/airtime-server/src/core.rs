//! StationCore — single-owner event loop for the radio timeline.
//!
//! All timeline mutations funnel through this loop as `StationEvent`
//! messages and are processed to completion in arrival order; no two events
//! ever mutate the timeline concurrently.  Admissions, heartbeats and claims
//! run as independent request/response calls elsewhere — they only touch the
//! timeline by sending events here.
//!
//! Scheduling is clock-driven: a once-per-second tick compares the current
//! play window against the wall clock.  Client "song ended" reports are
//! advisory; the core advances only when its own clock agrees, so one fast
//! client cannot drag every other listener forward.

use rand::Rng;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use airtime_proto::config::Config;
use airtime_proto::model::{HistoryEntry, QueuedSong, Song, VoiceNote};
use airtime_proto::timeline::{now_ms, song_window_elapsed, track_position};

use crate::ledger::RewardLedger;
use crate::state::StateManager;
use crate::BroadcastMessage;

// ── StationEvent ──────────────────────────────────────────────────────────────

/// All inputs into the StationCore loop.
#[derive(Debug)]
pub enum StationEvent {
    /// Once-per-second clock tick.
    TimelineTick,
    /// A client observed the current song ending locally.
    SongEndedReport { token_id: String, started_at_ms: i64 },
    /// Paid priority override: jump to a random queued song.
    SkipToRandom,
    /// The waiting list changed (admission path).
    QueueChanged,
    /// The pending voice note set changed (admission path).
    PendingNotesChanged,
    /// The push socket's subscriber count changed.
    ClientCountChanged(usize),
    /// Shutdown requested.
    #[allow(dead_code)]
    Shutdown,
}

// ── StationCore ───────────────────────────────────────────────────────────────

pub struct StationCore {
    config: Config,
    state: StateManager,
    ledger: RewardLedger,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
    event_tx: mpsc::Sender<StationEvent>,
}

impl StationCore {
    pub fn new(
        config: Config,
        state: StateManager,
        ledger: RewardLedger,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
        event_tx: mpsc::Sender<StationEvent>,
    ) -> Self {
        Self {
            config,
            state,
            ledger,
            broadcast_tx,
            event_tx,
        }
    }

    /// Run the core event loop.  Returns when a `Shutdown` event is received
    /// or the event channel is closed.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<StationEvent>) -> anyhow::Result<()> {
        info!("StationCore: starting event loop");

        // Clock tick — drives natural track transitions.
        let tick_tx = self.event_tx.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
                if tick_tx.send(StationEvent::TimelineTick).await.is_err() {
                    break;
                }
            }
        });

        loop {
            let evt = event_rx.recv().await;
            match evt {
                None => {
                    info!("StationCore: event channel closed, shutting down");
                    break;
                }
                Some(StationEvent::Shutdown) => {
                    info!("StationCore: shutdown requested");
                    break;
                }
                Some(evt) => self.handle_event(evt, now_ms()).await,
            }
        }
        Ok(())
    }

    pub(crate) async fn handle_event(&mut self, evt: StationEvent, now: i64) {
        match evt {
            StationEvent::TimelineTick => self.advance(now).await,

            StationEvent::SongEndedReport {
                token_id,
                started_at_ms,
            } => {
                let radio = self.state.radio_state().await;
                let matches_current = radio
                    .current_song
                    .as_ref()
                    .map(|s| s.token_id == token_id && s.started_at_ms == started_at_ms)
                    .unwrap_or(false);
                if !matches_current {
                    debug!("stale song-ended report for {}@{}", token_id, started_at_ms);
                    return;
                }
                if song_window_elapsed(&radio, now, self.config.sync.end_tolerance_secs) {
                    self.finish_current_song(now).await;
                } else {
                    debug!(
                        "song-ended report for {} ahead of server clock, ignoring",
                        token_id
                    );
                }
            }

            StationEvent::SkipToRandom => self.skip_to_random().await,

            StationEvent::QueueChanged => {
                let radio = self.state.radio_state().await;
                // Idle timeline: newly admitted work goes on air immediately.
                if radio.current_song.is_none() && radio.current_voice_note.is_none() {
                    self.start_next_song().await;
                    let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
                }
                let _ = self.broadcast_tx.send(BroadcastMessage::QueueUpdated);
            }

            StationEvent::PendingNotesChanged => {
                let _ = self.broadcast_tx.send(BroadcastMessage::PendingNotesUpdated);
            }

            StationEvent::ClientCountChanged(count) => {
                self.state.set_listener_count(count).await;
                let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
            }

            StationEvent::Shutdown => {}
        }
    }

    /// Clock-driven transition check.
    async fn advance(&mut self, now: i64) {
        let radio = self.state.radio_state().await;

        if let Some(note) = &radio.current_voice_note {
            let pos = track_position(note.started_at_ms, note.duration_secs, now);
            if pos.elapsed_secs >= note.duration_secs {
                self.state.end_voice_note().await;
                self.start_next_song().await;
                let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
            }
            return;
        }

        if radio.current_song.is_some() {
            if song_window_elapsed(&radio, now, 0.0) {
                self.finish_current_song(now).await;
            }
            return;
        }

        // Idle: put waiting work on air.
        if self.state.queue_len().await > 0 {
            self.start_next_song().await;
            let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
            let _ = self.broadcast_tx.send(BroadcastMessage::QueueUpdated);
        }
    }

    /// The current song's window is over: archive it, then play an
    /// interstitial if one is pending, otherwise the next queued song.
    async fn finish_current_song(&mut self, now: i64) {
        let Some(song) = self.state.end_song().await else {
            return;
        };
        info!("song ended: {} ({})", song.name, song.token_id);
        self.state
            .push_history(HistoryEntry {
                token_id: song.token_id.clone(),
                name: song.name.clone(),
                artist: song.artist.clone(),
                queued_by: song.queued_by.clone(),
                played_at_ms: song.started_at_ms,
            })
            .await;

        if let Some(pending) = self.state.take_next_unplayed_note().await {
            info!(
                "interstitial: voice note {} from {}",
                pending.id, pending.user_address
            );
            self.ledger.note_played(&pending.user_address).await;
            self.state
                .begin_voice_note(VoiceNote {
                    id: pending.id,
                    username: pending.username,
                    audio_url: pending.audio_url,
                    duration_secs: pending.duration_secs,
                    is_ad: pending.is_ad,
                    started_at_ms: 0, // stamped by begin_voice_note
                })
                .await;
            let _ = self.broadcast_tx.send(BroadcastMessage::PendingNotesUpdated);
        } else {
            self.start_next_song().await;
        }
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
    }

    /// Pop the waiting list head onto the air.  Returns true when a song
    /// started.
    async fn start_next_song(&mut self) -> bool {
        match self.state.pop_next_queued().await {
            Some(entry) => {
                info!("on air: {} queued by {}", entry.name, entry.queued_by);
                self.begin_queued(entry).await;
                let _ = self.broadcast_tx.send(BroadcastMessage::QueueUpdated);
                true
            }
            None => false,
        }
    }

    async fn begin_queued(&mut self, entry: QueuedSong) {
        let duration_secs = if entry.duration_secs > 0.0 {
            entry.duration_secs
        } else {
            self.config.sync.default_song_duration_secs
        };
        self.state
            .begin_song(Song {
                token_id: entry.token_id,
                name: entry.name,
                artist: entry.artist,
                audio_url: entry.audio_url,
                image_url: entry.image_url,
                queued_by: entry.queued_by,
                queued_by_fid: entry.queued_by_fid,
                started_at_ms: 0, // stamped by begin_song
                duration_secs,
            })
            .await;
    }

    /// Replace the current song with a random queued one.  Priority
    /// override, not a queue insertion; the displaced song is archived.
    async fn skip_to_random(&mut self) {
        let len = self.state.queue_len().await;
        if len == 0 {
            warn!("skip-to-random with an empty waiting list, nothing to do");
            return;
        }
        let idx = rand::thread_rng().gen_range(0..len);
        let Some(entry) = self.state.remove_queued_at(idx).await else {
            return;
        };
        if let Some(song) = self.state.end_song().await {
            self.state
                .push_history(HistoryEntry {
                    token_id: song.token_id,
                    name: song.name,
                    artist: song.artist,
                    queued_by: song.queued_by,
                    played_at_ms: song.started_at_ms,
                })
                .await;
        }
        info!("skip-to-random: {} now on air", entry.name);
        self.begin_queued(entry).await;
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
        let _ = self.broadcast_tx.send(BroadcastMessage::QueueUpdated);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use airtime_proto::config::RewardsConfig;
    use airtime_proto::model::PendingVoiceNote;

    fn queued(id: &str, duration_secs: f64) -> QueuedSong {
        QueuedSong {
            id: id.into(),
            token_id: id.into(),
            name: format!("song-{}", id),
            artist: "artist".into(),
            audio_url: format!("https://cdn.example/{}.mp3", id),
            image_url: String::new(),
            queued_by: "0xbeef".into(),
            queued_by_fid: None,
            queued_at_ms: 0,
            paid_amount: 1_000,
            duration_secs,
        }
    }

    fn pending_note(id: &str) -> PendingVoiceNote {
        PendingVoiceNote {
            id: id.into(),
            user_address: "0xcafe".into(),
            user_fid: None,
            username: Some("dj".into()),
            audio_url: format!("https://cdn.example/{}.webm", id),
            duration_secs: 10.0,
            message: None,
            created_at_ms: 0,
            played: false,
            is_ad: false,
        }
    }

    fn test_core() -> (StationCore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        let state = StateManager::new(config.server.history_limit);
        let ledger = RewardLedger::load(dir.path().join("ledger.json"), RewardsConfig::default());
        let (broadcast_tx, _) = broadcast::channel(64);
        let (event_tx, _event_rx) = mpsc::channel(64);
        (
            StationCore::new(config, state, ledger, broadcast_tx, event_tx),
            dir,
        )
    }

    #[tokio::test]
    async fn idle_tick_starts_queued_song() {
        let (mut core, _dir) = test_core();
        core.state.push_queued(queued("1", 120.0)).await;
        core.handle_event(StationEvent::TimelineTick, now_ms()).await;

        let radio = core.state.radio_state().await;
        assert_eq!(radio.current_song.as_ref().unwrap().token_id, "1");
        assert!(radio.is_live);
        assert_eq!(core.state.queue_len().await, 0);
    }

    #[tokio::test]
    async fn song_end_plays_interstitial_then_next_song() {
        let (mut core, _dir) = test_core();
        core.state.push_queued(queued("1", 60.0)).await;
        core.state.push_queued(queued("2", 60.0)).await;
        core.state.add_pending_note(pending_note("v1")).await;

        let t0 = now_ms();
        core.handle_event(StationEvent::TimelineTick, t0).await;
        assert_eq!(
            core.state.radio_state().await.current_song.as_ref().unwrap().token_id,
            "1"
        );

        // Song 1's window elapses: the note pre-empts song 2.
        core.handle_event(StationEvent::TimelineTick, t0 + 61_000).await;
        let radio = core.state.radio_state().await;
        assert!(radio.current_song.is_none());
        assert_eq!(radio.current_voice_note.as_ref().unwrap().id, "v1");
        assert!(core.state.pending_notes().await.is_empty());

        // The note's window elapses: song 2 goes on air.
        let note_started = radio.current_voice_note.unwrap().started_at_ms;
        core.handle_event(StationEvent::TimelineTick, note_started + 11_000)
            .await;
        let radio = core.state.radio_state().await;
        assert!(radio.current_voice_note.is_none());
        assert_eq!(radio.current_song.as_ref().unwrap().token_id, "2");

        // The ledger saw the note go on air.
        assert_eq!(core.ledger.stats_for("0xcafe").await.voice_notes_played, 1);
        // History recorded song 1 exactly once.
        let history = core.state.history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].token_id, "1");
    }

    #[tokio::test]
    async fn early_song_ended_report_is_ignored() {
        let (mut core, _dir) = test_core();
        core.state.push_queued(queued("1", 180.0)).await;
        let t0 = now_ms();
        core.handle_event(StationEvent::TimelineTick, t0).await;
        let instance = core
            .state
            .radio_state()
            .await
            .current_song
            .unwrap()
            .play_instance();

        // A client claims the song is over 10 seconds in; the server clock
        // disagrees, so nothing advances.
        core.handle_event(
            StationEvent::SongEndedReport {
                token_id: instance.token_id.clone(),
                started_at_ms: instance.started_at_ms,
            },
            instance.started_at_ms + 10_000,
        )
        .await;
        assert_eq!(
            core.state.radio_state().await.current_song.unwrap().token_id,
            "1"
        );
    }

    #[tokio::test]
    async fn credible_song_ended_report_advances() {
        let (mut core, _dir) = test_core();
        core.state.push_queued(queued("1", 60.0)).await;
        core.state.push_queued(queued("2", 60.0)).await;
        let t0 = now_ms();
        core.handle_event(StationEvent::TimelineTick, t0).await;
        let instance = core
            .state
            .radio_state()
            .await
            .current_song
            .unwrap()
            .play_instance();

        core.handle_event(
            StationEvent::SongEndedReport {
                token_id: instance.token_id.clone(),
                started_at_ms: instance.started_at_ms,
            },
            instance.started_at_ms + 59_500, // inside the 2s tolerance
        )
        .await;
        assert_eq!(
            core.state.radio_state().await.current_song.unwrap().token_id,
            "2"
        );
    }

    #[tokio::test]
    async fn stale_report_for_old_instance_is_dropped() {
        let (mut core, _dir) = test_core();
        core.state.push_queued(queued("1", 60.0)).await;
        let t0 = now_ms();
        core.handle_event(StationEvent::TimelineTick, t0).await;

        core.handle_event(
            StationEvent::SongEndedReport {
                token_id: "1".into(),
                started_at_ms: 123, // some long-gone instance
            },
            t0 + 120_000,
        )
        .await;
        // Mismatched instance: current song untouched.
        assert!(core.state.radio_state().await.current_song.is_some());
    }

    #[tokio::test]
    async fn skip_to_random_replaces_current_song() {
        let (mut core, _dir) = test_core();
        core.state.push_queued(queued("1", 180.0)).await;
        core.state.push_queued(queued("2", 180.0)).await;
        let t0 = now_ms();
        core.handle_event(StationEvent::TimelineTick, t0).await;
        assert_eq!(core.state.queue_len().await, 1);

        core.handle_event(StationEvent::SkipToRandom, t0 + 5_000).await;
        let radio = core.state.radio_state().await;
        assert_eq!(radio.current_song.as_ref().unwrap().token_id, "2");
        assert_eq!(core.state.queue_len().await, 0);
        // Song 1 was archived, not lost.
        assert_eq!(core.state.history().await[0].token_id, "1");
    }

    #[tokio::test]
    async fn skip_with_empty_queue_is_a_noop() {
        let (mut core, _dir) = test_core();
        core.handle_event(StationEvent::SkipToRandom, now_ms()).await;
        assert!(core.state.radio_state().await.current_song.is_none());
    }

    #[tokio::test]
    async fn ended_song_with_empty_queue_goes_off_air() {
        let (mut core, _dir) = test_core();
        core.state.push_queued(queued("1", 60.0)).await;
        let t0 = now_ms();
        core.handle_event(StationEvent::TimelineTick, t0).await;
        core.handle_event(StationEvent::TimelineTick, t0 + 61_000).await;

        let radio = core.state.radio_state().await;
        assert!(radio.current_song.is_none());
        assert!(radio.current_voice_note.is_none());
        assert!(!radio.is_live);
    }
}
