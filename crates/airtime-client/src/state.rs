//! ClientSession — the explicit per-client session object.
//!
//! One instance per connected client, written only by the runtime event
//! loop; the embedding UI reads it.  Initial state is fully disconnected and
//! empty.  Teardown is `Drop`: nothing persists client-side across
//! reconnects except what the next snapshot repopulates.

use airtime_proto::model::{
    ConnectionStatus, HistoryEntry, LeaderboardEntry, ListenerStats, PendingVoiceNote, QueuedSong,
    RadioState,
};

pub struct ClientSession {
    /// Acting listener identity, from the identity context (read-only here).
    pub listener_address: String,
    pub listener_fid: Option<u64>,

    // ── Live snapshots (overwritten wholesale on delivery) ──────────────────
    pub radio: RadioState,
    pub queue: Vec<QueuedSong>,
    pub pending_notes: Vec<PendingVoiceNote>,

    /// Delivery mode of the live channel.  Display-only; playback never
    /// consults it.
    pub connection_status: ConnectionStatus,

    // ── Slow aggregates (tolerate staleness) ────────────────────────────────
    pub stats: ListenerStats,
    pub leaderboard: Vec<LeaderboardEntry>,
    pub history: Vec<HistoryEntry>,

    /// WARN/ERROR lines relayed from the server.
    pub server_logs: Vec<String>,
}

const SERVER_LOG_CAP: usize = 100;

impl ClientSession {
    pub fn new(listener_address: String, listener_fid: Option<u64>) -> Self {
        Self {
            listener_address,
            listener_fid,
            radio: RadioState::default(),
            queue: Vec::new(),
            pending_notes: Vec::new(),
            connection_status: ConnectionStatus::Disconnected,
            stats: ListenerStats::default(),
            leaderboard: Vec::new(),
            history: Vec::new(),
            server_logs: Vec::new(),
        }
    }

    pub fn push_server_log(&mut self, line: String) {
        self.server_logs.push(line);
        if self.server_logs.len() > SERVER_LOG_CAP {
            let drop = self.server_logs.len() - SERVER_LOG_CAP;
            self.server_logs.drain(..drop);
        }
    }

    /// Convenience: name of the song currently on air, if any.
    pub fn current_song_name(&self) -> Option<&str> {
        self.radio.current_song.as_ref().map(|s| s.name.as_str())
    }
}
