//! HTTP API — polling fallback plus the discrete request/response
//! operations (queue, voice note, skip, heartbeat, claim, song-ended).
//!
//! Error mapping keeps the payment taxonomy visible to callers: 402 means
//! no funds moved, 502 with a receipt body means "paid but not registered"
//! and the caller should retry registration only.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use airtime_proto::api::{
    ClaimOutcome, ClaimRequest, ErrorBody, HeartbeatAck, HeartbeatReport, QueueSongReceipt,
    QueueSongRequest, SkipReceipt, SkipRequest, SongEndedReport, VoiceNoteParams, VoiceNoteReceipt,
};
use airtime_proto::error::RequestError;
use airtime_proto::model::{
    HistoryEntry, LeaderboardEntry, ListenerStats, PendingVoiceNote, QueuedSong, RadioState,
};

use crate::core::StationEvent;
use crate::external::PaymentGateway;
use crate::ledger::RewardLedger;
use crate::queue::AdmissionControl;
use crate::state::StateManager;

const LEADERBOARD_LIMIT: usize = 25;

#[derive(Clone)]
struct HttpState {
    state: StateManager,
    ledger: RewardLedger,
    admission: Arc<AdmissionControl>,
    gateway: Arc<dyn PaymentGateway>,
    event_tx: mpsc::Sender<StationEvent>,
    clips_dir: PathBuf,
}

pub struct HttpDeps {
    pub state: StateManager,
    pub ledger: RewardLedger,
    pub admission: Arc<AdmissionControl>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub event_tx: mpsc::Sender<StationEvent>,
    pub clips_dir: PathBuf,
}

pub fn start_server(bind_address: String, port: u16, deps: HttpDeps) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app_state = HttpState {
            state: deps.state,
            ledger: deps.ledger,
            admission: deps.admission,
            gateway: deps.gateway,
            event_tx: deps.event_tx,
            clips_dir: deps.clips_dir,
        };

        let app = Router::new()
            .route("/api/state", get(get_state))
            .route("/api/queue", get(get_queue).post(post_queue))
            .route("/api/pending-notes", get(get_pending_notes))
            .route("/api/stats/:address", get(get_stats))
            .route("/api/leaderboard", get(get_leaderboard))
            .route("/api/history", get(get_history))
            .route("/api/voice-note", post(post_voice_note))
            .route("/api/skip", post(post_skip))
            .route("/api/heartbeat", post(post_heartbeat))
            .route("/api/claim", post(post_claim))
            .route("/api/song-ended", post(post_song_ended))
            .route("/clips/:name", get(get_clip))
            .layer(CorsLayer::permissive())
            .with_state(app_state);

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API server listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

fn error_response(err: RequestError) -> (StatusCode, Json<ErrorBody>) {
    let status = match &err {
        RequestError::PaymentRequired(_) => StatusCode::PAYMENT_REQUIRED,
        RequestError::RegistrationAfterPaymentFailed { .. } => StatusCode::BAD_GATEWAY,
        RequestError::UploadFailed(_) => StatusCode::BAD_GATEWAY,
        RequestError::ClaimFailed(_) => StatusCode::BAD_GATEWAY,
        RequestError::PermissionDenied => StatusCode::FORBIDDEN,
        RequestError::DeviceUnavailable => StatusCode::NOT_FOUND,
        RequestError::Invalid(_) => StatusCode::BAD_REQUEST,
    };
    let body = ErrorBody {
        receipt: err.receipt().cloned(),
        error: err.to_string(),
    };
    (status, Json(body))
}

// ── Polling fallback + aggregates ─────────────────────────────────────────────

async fn get_state(State(state): State<HttpState>) -> Json<RadioState> {
    Json(state.state.radio_state().await)
}

async fn get_queue(State(state): State<HttpState>) -> Json<Vec<QueuedSong>> {
    Json(state.state.queue().await)
}

async fn get_pending_notes(State(state): State<HttpState>) -> Json<Vec<PendingVoiceNote>> {
    Json(state.state.pending_notes().await)
}

async fn get_stats(
    State(state): State<HttpState>,
    Path(address): Path<String>,
) -> Json<ListenerStats> {
    Json(state.ledger.stats_for(&address).await)
}

async fn get_leaderboard(State(state): State<HttpState>) -> Json<Vec<LeaderboardEntry>> {
    Json(state.ledger.leaderboard(LEADERBOARD_LIMIT).await)
}

async fn get_history(State(state): State<HttpState>) -> Json<Vec<HistoryEntry>> {
    Json(state.state.history().await)
}

// ── Admission operations ──────────────────────────────────────────────────────

async fn post_queue(
    State(state): State<HttpState>,
    Json(req): Json<QueueSongRequest>,
) -> Result<Json<QueueSongReceipt>, (StatusCode, Json<ErrorBody>)> {
    state
        .admission
        .request_queue_song(req)
        .await
        .map(Json)
        .map_err(error_response)
}

async fn post_voice_note(
    State(state): State<HttpState>,
    Query(params): Query<VoiceNoteParams>,
    headers: HeaderMap,
    clip: Bytes,
) -> Result<Json<VoiceNoteReceipt>, (StatusCode, Json<ErrorBody>)> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();
    state
        .admission
        .request_voice_note(params, clip.to_vec(), &content_type)
        .await
        .map(Json)
        .map_err(error_response)
}

async fn post_skip(
    State(state): State<HttpState>,
    Json(req): Json<SkipRequest>,
) -> Result<Json<SkipReceipt>, (StatusCode, Json<ErrorBody>)> {
    state
        .admission
        .skip_to_random(&req.payer)
        .await
        .map(|receipt| Json(SkipReceipt { receipt }))
        .map_err(error_response)
}

// ── Heartbeat / rewards ───────────────────────────────────────────────────────

async fn post_heartbeat(
    State(state): State<HttpState>,
    Json(report): Json<HeartbeatReport>,
) -> Result<Json<HeartbeatAck>, StatusCode> {
    let today = chrono::Utc::now().date_naive();
    match state
        .ledger
        .record_heartbeat(
            &report.listener,
            &report.token_id,
            report.started_at_ms,
            today,
        )
        .await
    {
        Ok(accrued) => Ok(Json(HeartbeatAck { accrued })),
        Err(e) => {
            warn!("heartbeat accrual failed for {}: {}", report.listener, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn post_claim(
    State(state): State<HttpState>,
    Json(req): Json<ClaimRequest>,
) -> Result<Json<ClaimOutcome>, (StatusCode, Json<ErrorBody>)> {
    state
        .ledger
        .claim(&req.listener, state.gateway.as_ref())
        .await
        .map(|(receipt, amount)| Json(ClaimOutcome { receipt, amount }))
        .map_err(error_response)
}

async fn post_song_ended(
    State(state): State<HttpState>,
    Json(report): Json<SongEndedReport>,
) -> StatusCode {
    if state
        .event_tx
        .send(StationEvent::SongEndedReport {
            token_id: report.token_id,
            started_at_ms: report.started_at_ms,
        })
        .await
        .is_err()
    {
        error!("Failed to forward song-ended report");
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    StatusCode::ACCEPTED
}

// ── Clip serving (development clip store) ─────────────────────────────────────

async fn get_clip(State(state): State<HttpState>, Path(name): Path<String>) -> Response {
    // Clip names are flat hashes; anything else is not ours to serve.
    if name.contains('/') || name.contains("..") {
        return StatusCode::NOT_FOUND.into_response();
    }
    match tokio::fs::read(state.clips_dir.join(&name)).await {
        Ok(bytes) => {
            let content_type = match name.rsplit('.').next() {
                Some("webm") => "audio/webm",
                Some("ogg") => "audio/ogg",
                Some("m4a") => "audio/mp4",
                _ => "application/octet-stream",
            };
            ([(header::CONTENT_TYPE, content_type)], bytes).into_response()
        }
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}
