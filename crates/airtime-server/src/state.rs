//! StationState — the single shared mutable resource of the system.
//!
//! Owned by the server process; the `StationCore` event loop is the only
//! writer.  Every mutation of the radio timeline bumps `rev` so clients can
//! drop stale snapshots.  Clients never write here — all their mutations
//! arrive as discrete request/response operations.

use std::sync::Arc;

use tokio::sync::RwLock;

use airtime_proto::model::{
    HistoryEntry, PendingVoiceNote, QueuedSong, RadioState, Song, VoiceNote,
};
use airtime_proto::timeline::now_ms;

#[derive(Debug, Default)]
struct StationState {
    radio: RadioState,
    queue: Vec<QueuedSong>,
    pending_notes: Vec<PendingVoiceNote>,
    history: Vec<HistoryEntry>,
}

#[derive(Clone)]
pub struct StateManager {
    state: Arc<RwLock<StationState>>,
    history_limit: usize,
}

impl StateManager {
    pub fn new(history_limit: usize) -> Self {
        let state = StationState {
            radio: RadioState {
                rev: 1,
                is_live: false,
                current_song: None,
                current_voice_note: None,
                listener_count: 0,
                last_updated_ms: now_ms(),
            },
            ..Default::default()
        };
        Self {
            state: Arc::new(RwLock::new(state)),
            history_limit,
        }
    }

    // ── Snapshots ─────────────────────────────────────────────────────────────

    pub async fn radio_state(&self) -> RadioState {
        self.state.read().await.radio.clone()
    }

    pub async fn queue(&self) -> Vec<QueuedSong> {
        self.state.read().await.queue.clone()
    }

    pub async fn pending_notes(&self) -> Vec<PendingVoiceNote> {
        self.state.read().await.pending_notes.clone()
    }

    pub async fn history(&self) -> Vec<HistoryEntry> {
        self.state.read().await.history.clone()
    }

    // ── Timeline mutations (StationCore only) ─────────────────────────────────

    /// Put a song on air.  Clears any interstitial and stamps a fresh
    /// `started_at_ms` — clients treat this as a new play instance.
    pub async fn begin_song(&self, mut song: Song) {
        let mut state = self.state.write().await;
        song.started_at_ms = now_ms();
        state.radio.current_song = Some(song);
        state.radio.current_voice_note = None;
        state.radio.is_live = true;
        touch(&mut state.radio);
    }

    /// Put a voice note on air.  The song slot is cleared in the same
    /// mutation; clients only ever observe one audible source.
    pub async fn begin_voice_note(&self, mut note: VoiceNote) {
        let mut state = self.state.write().await;
        note.started_at_ms = now_ms();
        state.radio.current_voice_note = Some(note);
        state.radio.current_song = None;
        state.radio.is_live = true;
        touch(&mut state.radio);
    }

    /// Clear the interstitial slot once its window has elapsed.
    pub async fn end_voice_note(&self) -> Option<VoiceNote> {
        let mut state = self.state.write().await;
        let note = state.radio.current_voice_note.take();
        if note.is_some() {
            touch(&mut state.radio);
        }
        note
    }

    /// Take the current song off air (natural end with an empty queue, or a
    /// skip).  Returns the song that was playing.
    pub async fn end_song(&self) -> Option<Song> {
        let mut state = self.state.write().await;
        let song = state.radio.current_song.take();
        if song.is_some() {
            state.radio.is_live = state.radio.current_voice_note.is_some();
            touch(&mut state.radio);
        }
        song
    }

    pub async fn set_listener_count(&self, count: usize) {
        let mut state = self.state.write().await;
        if state.radio.listener_count != count {
            state.radio.listener_count = count;
            touch(&mut state.radio);
        }
    }

    // ── Queue ─────────────────────────────────────────────────────────────────

    /// Append an admitted entry.  FIFO by admission time; no reordering or
    /// cancellation afterwards.
    pub async fn push_queued(&self, entry: QueuedSong) {
        let mut state = self.state.write().await;
        state.queue.push(entry);
    }

    /// Consume the head of the waiting list.  An entry leaves the queue at
    /// most once.
    pub async fn pop_next_queued(&self) -> Option<QueuedSong> {
        let mut state = self.state.write().await;
        if state.queue.is_empty() {
            None
        } else {
            Some(state.queue.remove(0))
        }
    }

    /// Consume the entry at `idx` (the random-skip override path).
    pub async fn remove_queued_at(&self, idx: usize) -> Option<QueuedSong> {
        let mut state = self.state.write().await;
        if idx < state.queue.len() {
            Some(state.queue.remove(idx))
        } else {
            None
        }
    }

    pub async fn queue_len(&self) -> usize {
        self.state.read().await.queue.len()
    }

    // ── Pending voice notes ───────────────────────────────────────────────────

    pub async fn add_pending_note(&self, note: PendingVoiceNote) {
        let mut state = self.state.write().await;
        state.pending_notes.push(note);
    }

    /// Pull the oldest unplayed note for its interstitial slot, flipping
    /// `played` exactly once and removing it from the pending set.
    pub async fn take_next_unplayed_note(&self) -> Option<PendingVoiceNote> {
        let mut state = self.state.write().await;
        let idx = state.pending_notes.iter().position(|n| !n.played)?;
        let mut note = state.pending_notes.remove(idx);
        note.played = true;
        Some(note)
    }

    // ── History ───────────────────────────────────────────────────────────────

    pub async fn push_history(&self, entry: HistoryEntry) {
        let mut state = self.state.write().await;
        state.history.insert(0, entry);
        let limit = self.history_limit;
        state.history.truncate(limit);
    }
}

fn touch(radio: &mut RadioState) {
    radio.rev += 1;
    radio.last_updated_ms = now_ms();
}
