//! Shared data model for the live radio timeline.
//!
//! The server process is the only writer of `RadioState`; clients overwrite
//! their local copy wholesale on every delivery.  All types here are plain
//! serde values — no behaviour beyond small accessors, so the wire format and
//! the in-process API stay the same thing.

use serde::{Deserialize, Serialize};

/// Receipt identifier returned by the external payment ledger.  Opaque to the
/// engine; callers hold onto it to retry registration without re-paying.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt(pub String);

impl std::fmt::Display for TxReceipt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of one play of one track.  The same `token_id` can be broadcast
/// again later with a new `started_at_ms`, which makes it a distinct instance
/// for reward accrual and seek computation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlayInstance {
    pub token_id: String,
    pub started_at_ms: i64,
}

/// The song currently on air.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Song {
    pub token_id: String,
    pub name: String,
    pub artist: String,
    pub audio_url: String,
    #[serde(default)]
    pub image_url: String,
    /// Address of the listener who queued it (empty for server-picked songs).
    #[serde(default)]
    pub queued_by: String,
    #[serde(default)]
    pub queued_by_fid: Option<u64>,
    /// Authoritative origin for every client's playback-position computation.
    pub started_at_ms: i64,
    pub duration_secs: f64,
}

impl Song {
    pub fn play_instance(&self) -> PlayInstance {
        PlayInstance {
            token_id: self.token_id.clone(),
            started_at_ms: self.started_at_ms,
        }
    }
}

/// A short paid clip that pre-empts the current song.  Transient — once its
/// playback window ends the id is never referenced again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceNote {
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
    pub audio_url: String,
    pub duration_secs: f64,
    #[serde(default)]
    pub is_ad: bool,
    pub started_at_ms: i64,
}

/// Full snapshot of the server-owned timeline.  `rev` is a monotonically
/// increasing counter incremented on every mutation; clients drop snapshots
/// whose `rev` is older than the last one applied.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RadioState {
    #[serde(default)]
    pub rev: u64,
    pub is_live: bool,
    pub current_song: Option<Song>,
    /// Non-null together with `current_song` only during the brief
    /// server-side interstitial handoff.
    pub current_voice_note: Option<VoiceNote>,
    pub listener_count: usize,
    pub last_updated_ms: i64,
}

/// One admitted entry in the waiting list.  Created on confirmed payment,
/// consumed at most once when it becomes the new `current_song`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedSong {
    pub id: String,
    pub token_id: String,
    pub name: String,
    pub artist: String,
    pub audio_url: String,
    #[serde(default)]
    pub image_url: String,
    pub queued_by: String,
    #[serde(default)]
    pub queued_by_fid: Option<u64>,
    pub queued_at_ms: i64,
    /// Amount confirmed by the payment ledger, in base units.
    pub paid_amount: u64,
    /// Resolved at admission (caller-supplied or probed); advisory for
    /// display, required for scheduling.
    #[serde(default)]
    pub duration_secs: f64,
}

/// A paid voice note waiting for its interstitial slot.  `played` flips true
/// exactly once, after which the entry leaves the pending set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingVoiceNote {
    pub id: String,
    pub user_address: String,
    #[serde(default)]
    pub user_fid: Option<u64>,
    #[serde(default)]
    pub username: Option<String>,
    pub audio_url: String,
    pub duration_secs: f64,
    #[serde(default)]
    pub message: Option<String>,
    pub created_at_ms: i64,
    #[serde(default)]
    pub played: bool,
    #[serde(default)]
    pub is_ad: bool,
}

/// Per-listener engagement statistics, owned by the server-side ledger.
///
/// `pending_rewards` increases only via heartbeat accrual (once per play
/// instance) and decreases only via a confirmed claim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListenerStats {
    pub total_songs_listened: u64,
    pub total_rewards_earned: u64,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub voice_notes_submitted: u64,
    pub voice_notes_played: u64,
    pub pending_rewards: u64,
}

/// Delivery mode of the live state channel.  Purely observational — playback
/// decisions never consult it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionStatus {
    /// Push stream established.
    Connected,
    /// Push stream unavailable; interval polling active.
    Fallback,
    /// Neither transport delivering.
    #[default]
    Disconnected,
}

impl ConnectionStatus {
    /// Short label for badges / status displays.
    pub fn badge_label(&self) -> Option<&'static str> {
        match self {
            ConnectionStatus::Connected => None, // normal — no badge needed
            ConnectionStatus::Fallback => Some("POLL"),
            ConnectionStatus::Disconnected => Some("OFFLN"),
        }
    }

    /// True when delivery accuracy is degraded and the UI should say so.
    pub fn is_degraded(&self) -> bool {
        !matches!(self, ConnectionStatus::Connected)
    }
}

/// Price tier and recording-length tier for a voice note request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceNoteKind {
    Shoutout,
    Ad,
}

impl VoiceNoteKind {
    pub fn label(&self) -> &'static str {
        match self {
            VoiceNoteKind::Shoutout => "shoutout",
            VoiceNoteKind::Ad => "ad",
        }
    }
}

/// Aggregate row for the slow-interval leaderboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub address: String,
    pub total_songs_listened: u64,
    pub total_rewards_earned: u64,
}

/// One completed play, kept for the slow-interval history view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub token_id: String,
    pub name: String,
    pub artist: String,
    #[serde(default)]
    pub queued_by: String,
    pub played_at_ms: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn play_instance_distinguishes_replays() {
        let a = PlayInstance {
            token_id: "5".into(),
            started_at_ms: 1_000,
        };
        let b = PlayInstance {
            token_id: "5".into(),
            started_at_ms: 2_000,
        };
        assert_ne!(a, b);
    }

    #[test]
    fn radio_state_rev_defaults_to_zero() {
        // Old peers may omit `rev`; the field must default rather than fail.
        let json = r#"{"is_live":true,"current_song":null,"current_voice_note":null,"listener_count":3,"last_updated_ms":0}"#;
        let state: RadioState = serde_json::from_str(json).unwrap();
        assert_eq!(state.rev, 0);
        assert_eq!(state.listener_count, 3);
    }

    #[test]
    fn connection_status_badges() {
        assert_eq!(ConnectionStatus::Connected.badge_label(), None);
        assert_eq!(ConnectionStatus::Fallback.badge_label(), Some("POLL"));
        assert!(ConnectionStatus::Fallback.is_degraded());
        assert!(!ConnectionStatus::Connected.is_degraded());
    }
}
