//! Request/response bodies for the HTTP operations API.
//!
//! These are shared verbatim by the server handlers and the client library,
//! so both sides of every discrete request/response operation agree on shape.

use serde::{Deserialize, Serialize};

use crate::model::{TxReceipt, VoiceNoteKind};

/// Body of `POST /api/queue`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSongRequest {
    pub token_id: String,
    pub name: String,
    pub artist: String,
    pub audio_url: String,
    #[serde(default)]
    pub image_url: String,
    pub payer: String,
    #[serde(default)]
    pub payer_fid: Option<u64>,
    /// Optional tip on top of the queue price, base units.
    #[serde(default)]
    pub tip: Option<u64>,
    /// Caller-known duration; when absent the server probes the asset.
    #[serde(default)]
    pub duration_secs: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSongReceipt {
    pub queue_entry_id: String,
    pub receipt: TxReceipt,
}

/// Query parameters of `POST /api/voice-note` (the clip rides in the body).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceNoteParams {
    pub payer: String,
    pub kind: VoiceNoteKind,
    pub duration_secs: f64,
    #[serde(default)]
    pub payer_fid: Option<u64>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceNoteReceipt {
    pub note_id: String,
    pub receipt: TxReceipt,
}

/// Body of `POST /api/skip`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkipRequest {
    pub payer: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkipReceipt {
    pub receipt: TxReceipt,
}

/// Body of `POST /api/heartbeat` — "I am actively listening to this play
/// instance right now".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatReport {
    pub listener: String,
    pub token_id: String,
    pub started_at_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatAck {
    /// True when this beat credited the play instance (first beat only).
    pub accrued: bool,
}

/// Body of `POST /api/claim`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimRequest {
    pub listener: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimOutcome {
    pub receipt: TxReceipt,
    pub amount: u64,
}

/// Body of `POST /api/song-ended`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SongEndedReport {
    pub token_id: String,
    pub started_at_ms: i64,
}

/// Error body returned by the operations API.  `receipt` is present exactly
/// when the payment phase succeeded, so callers can retry registration
/// without paying twice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt: Option<TxReceipt>,
}
