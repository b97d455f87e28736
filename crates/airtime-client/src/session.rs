//! Audio session state machine.
//!
//! Owns the one [`AudioSink`] and decides which of the server's two possible
//! sources (song or interstitial voice note) is audible.  Snapshots are
//! applied synchronously, in arrival order; stale revisions are dropped on
//! the doorstep.  The machine never advances the timeline on its own: a
//! locally observed "ended" either reports upstream (songs) or holds until
//! the server confirms the next state (voice notes).
//!
//! ```text
//!   Idle ──song──▶ PlayingSong ──new note id──▶ PlayingVoiceNote
//!                      ▲                              │ local end
//!                      │ server republished song      ▼
//!                      └──────────────── NoteEndedAwaitingServer
//! ```

use tracing::{debug, info};

use airtime_proto::model::{PlayInstance, RadioState, Song, VoiceNote};
use airtime_proto::timeline::seek_target;

use crate::sink::AudioSink;

/// Which source is currently loaded in the sink.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionPhase {
    Idle,
    PlayingSong(PlayInstance),
    PlayingVoiceNote { id: String },
    /// The note finished locally but the server still shows it on air.  We
    /// hold here rather than racing ahead of the server's track change.
    NoteEndedAwaitingServer { id: String },
}

/// Emitted when the session needs something sent upstream.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Tell the server the current song finished locally, then wait for the
    /// next authoritative snapshot.
    ReportSongEnded { token_id: String, started_at_ms: i64 },
}

pub struct AudioSession<S: AudioSink> {
    sink: S,
    phase: SessionPhase,
    /// Highest snapshot revision applied so far.
    last_rev: u64,
    /// Last interstitial id observed — a differing id pre-empts whatever is
    /// playing.
    last_note_id: Option<String>,
    /// What the server last published (post stale-check mirror).
    server_song: Option<Song>,
    server_note: Option<VoiceNote>,
    /// User-facing play/pause toggle.  Flips false when the host refuses
    /// programmatic playback.
    playback_enabled: bool,
    muted: bool,
}

impl<S: AudioSink> AudioSession<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            phase: SessionPhase::Idle,
            last_rev: 0,
            last_note_id: None,
            server_song: None,
            server_note: None,
            playback_enabled: false,
            muted: false,
        }
    }

    pub fn phase(&self) -> &SessionPhase {
        &self.phase
    }

    pub fn playback_enabled(&self) -> bool {
        self.playback_enabled
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    /// The play instance heartbeats should credit, when one is audible.
    pub fn current_play_instance(&self) -> Option<&PlayInstance> {
        match &self.phase {
            SessionPhase::PlayingSong(instance) => Some(instance),
            _ => None,
        }
    }

    /// True while heartbeats should flow: a song is on air here and the user
    /// has playback enabled.
    pub fn is_actively_listening(&self) -> bool {
        self.playback_enabled && matches!(self.phase, SessionPhase::PlayingSong(_))
    }

    // ── Snapshot application ──────────────────────────────────────────────────

    /// Apply one authoritative snapshot.  Synchronous with respect to the
    /// sink: by the time this returns, the source/seek decisions for this
    /// update are done.  Idempotent under redelivery; drops stale revisions.
    pub fn apply_snapshot(&mut self, state: &RadioState, now_ms: i64) {
        if state.rev < self.last_rev {
            debug!("dropping stale snapshot rev {} < {}", state.rev, self.last_rev);
            return;
        }
        self.last_rev = state.rev;
        self.server_song = state.current_song.clone();
        self.server_note = state.current_voice_note.clone();

        // An interstitial on air wins over everything else.
        if let Some(note) = state.current_voice_note.clone() {
            let is_new = self.last_note_id.as_deref() != Some(note.id.as_str());
            if is_new {
                info!("voice note {} pre-empts playback", note.id);
                self.last_note_id = Some(note.id.clone());
                // Notes always start from the top, whatever the song's
                // remaining time was.
                self.sink.set_source(&note.audio_url);
                self.phase = SessionPhase::PlayingVoiceNote { id: note.id };
                if self.playback_enabled {
                    self.try_play();
                }
            }
            return;
        }

        // No note in the snapshot.
        if matches!(self.phase, SessionPhase::PlayingVoiceNote { .. }) {
            // The server moved on while our note is still audible; let it
            // finish locally — `on_audio_ended` completes the handoff.
            return;
        }

        match state.current_song.clone() {
            Some(song) => {
                let instance = song.play_instance();
                let same_play = matches!(&self.phase, SessionPhase::PlayingSong(cur) if *cur == instance);
                if !same_play {
                    self.start_song(&song, now_ms);
                }
            }
            None => {
                if self.phase != SessionPhase::Idle {
                    debug!("server went off air, stopping");
                    self.sink.pause();
                    self.phase = SessionPhase::Idle;
                }
            }
        }
    }

    /// The sink finished its current source.
    ///
    /// Songs: never advance locally — report upstream and keep waiting for
    /// the next snapshot.  Voice notes: switch back to the song only if the
    /// server has already cleared the note and republished one; otherwise
    /// hold in `NoteEndedAwaitingServer`.
    pub fn on_audio_ended(&mut self, now_ms: i64) -> Option<SessionEvent> {
        match self.phase.clone() {
            SessionPhase::PlayingSong(instance) => {
                debug!("song {} ended locally, deferring to server", instance.token_id);
                Some(SessionEvent::ReportSongEnded {
                    token_id: instance.token_id,
                    started_at_ms: instance.started_at_ms,
                })
            }
            SessionPhase::PlayingVoiceNote { id } => {
                let server_cleared = self
                    .server_note
                    .as_ref()
                    .map(|n| n.id != id)
                    .unwrap_or(true);
                if server_cleared {
                    if let Some(song) = self.server_song.clone() {
                        self.start_song(&song, now_ms);
                        return None;
                    }
                }
                if server_cleared && self.server_song.is_none() {
                    self.phase = SessionPhase::Idle;
                } else {
                    debug!("note {} ended locally, waiting for server", id);
                    self.phase = SessionPhase::NoteEndedAwaitingServer { id };
                }
                None
            }
            SessionPhase::NoteEndedAwaitingServer { .. } | SessionPhase::Idle => None,
        }
    }

    // ── User toggles (orthogonal to source switching) ─────────────────────────

    pub fn set_playback_enabled(&mut self, enabled: bool, now_ms: i64) {
        self.playback_enabled = enabled;
        if enabled {
            // Rejoin the shared timeline at the clock position — the sink has
            // been sitting wherever it was last seeked.
            if let SessionPhase::PlayingSong(_) = self.phase {
                if let Some(song) = self.server_song.clone() {
                    if let Some(position) =
                        seek_target(song.started_at_ms, song.duration_secs, now_ms)
                    {
                        self.sink.seek(position);
                    }
                }
            }
            self.try_play();
        } else {
            self.sink.pause();
        }
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
        self.sink.set_muted(muted);
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    fn start_song(&mut self, song: &Song, now_ms: i64) {
        info!("switching to song {} ({})", song.name, song.token_id);
        self.sink.set_source(&song.audio_url);
        // A boundary position (skew, or stale state past the end) means: no
        // seek — start at 0 and expect the server to move on shortly.
        if let Some(position) = seek_target(song.started_at_ms, song.duration_secs, now_ms) {
            self.sink.seek(position);
        }
        self.phase = SessionPhase::PlayingSong(song.play_instance());
        if self.playback_enabled {
            self.try_play();
        }
    }

    fn try_play(&mut self) {
        if self.sink.play().is_err() {
            // Autoplay policy: stay inert in a paused view; the user's play
            // control retries.
            debug!("host refused playback, staying paused");
            self.playback_enabled = false;
        }
    }
}
