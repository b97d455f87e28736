//! Request queue and admission control.
//!
//! Every paid operation is two-phase: (1) payment confirmation against the
//! external ledger, (2) feature-side registration.  A phase-2 failure after
//! a confirmed payment is surfaced as `RegistrationAfterPaymentFailed`
//! carrying the receipt — the caller retries registration, never the
//! payment.  Nothing here reverses funds.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use airtime_proto::api::{QueueSongReceipt, QueueSongRequest, VoiceNoteParams, VoiceNoteReceipt};
use airtime_proto::config::Config;
use airtime_proto::error::RequestError;
use airtime_proto::model::{PendingVoiceNote, QueuedSong, TxReceipt, VoiceNoteKind};
use airtime_proto::timeline::now_ms;

use crate::core::StationEvent;
use crate::external::{make_receipt_id, ClipStore, PaymentAction, PaymentGateway};
use crate::ledger::RewardLedger;
use crate::state::StateManager;

pub struct AdmissionControl {
    config: Config,
    gateway: Arc<dyn PaymentGateway>,
    clips: Arc<dyn ClipStore>,
    state: StateManager,
    ledger: RewardLedger,
    event_tx: mpsc::Sender<StationEvent>,
    http: reqwest::Client,
}

impl AdmissionControl {
    pub fn new(
        config: Config,
        gateway: Arc<dyn PaymentGateway>,
        clips: Arc<dyn ClipStore>,
        state: StateManager,
        ledger: RewardLedger,
        event_tx: mpsc::Sender<StationEvent>,
    ) -> Self {
        Self {
            config,
            gateway,
            clips,
            state,
            ledger,
            event_tx,
            http: reqwest::Client::new(),
        }
    }

    /// Admit a song into the waiting list.  Payment first; on success the
    /// entry is appended FIFO and visible to all clients within one channel
    /// update.
    pub async fn request_queue_song(
        &self,
        req: QueueSongRequest,
    ) -> Result<QueueSongReceipt, RequestError> {
        let amount = self.config.pricing.queue_song + req.tip.unwrap_or(0);
        let receipt = self
            .gateway
            .confirm(PaymentAction::QueueSong, &req.payer, amount)
            .await
            .map_err(|e| RequestError::PaymentRequired(e.to_string()))?;

        let duration_secs = match req.duration_secs {
            Some(d) if d > 0.0 => d,
            _ => self.resolve_duration(&req.audio_url).await,
        };

        let entry = QueuedSong {
            id: make_receipt_id("queue-entry", &req.payer),
            token_id: req.token_id,
            name: req.name,
            artist: req.artist,
            audio_url: req.audio_url,
            image_url: req.image_url,
            queued_by: req.payer,
            queued_by_fid: req.payer_fid,
            queued_at_ms: now_ms(),
            paid_amount: amount,
            duration_secs,
        };
        let entry_id = entry.id.clone();
        self.state.push_queued(entry).await;

        if self.event_tx.send(StationEvent::QueueChanged).await.is_err() {
            // Paid and appended, but the timeline loop is gone — the entry
            // will never be scheduled.  Funds moved; say so explicitly.
            return Err(RequestError::RegistrationAfterPaymentFailed {
                receipt,
                reason: "timeline loop unavailable".into(),
            });
        }

        info!("queue admission: entry {} paid {}", entry_id, amount);
        Ok(QueueSongReceipt {
            queue_entry_id: entry_id,
            receipt,
        })
    }

    /// Admit a recorded voice note.  Payment, then durable upload — a failed
    /// upload after payment is a real "paid but not queued" state the caller
    /// can retry without paying again.
    pub async fn request_voice_note(
        &self,
        params: VoiceNoteParams,
        clip: Vec<u8>,
        content_type: &str,
    ) -> Result<VoiceNoteReceipt, RequestError> {
        if clip.is_empty() {
            return Err(RequestError::Invalid("empty clip".into()));
        }
        let max_secs = self.config.recording.max_secs(params.kind) as f64;
        if params.duration_secs > max_secs {
            return Err(RequestError::Invalid(format!(
                "clip exceeds {}s cap for {}",
                max_secs,
                params.kind.label()
            )));
        }

        let action = match params.kind {
            VoiceNoteKind::Shoutout => PaymentAction::Shoutout,
            VoiceNoteKind::Ad => PaymentAction::Ad,
        };
        let amount = self.config.pricing.voice_note(params.kind);
        let receipt = self
            .gateway
            .confirm(action, &params.payer, amount)
            .await
            .map_err(|e| RequestError::PaymentRequired(e.to_string()))?;

        let audio_url = match self.clips.store(clip, content_type).await {
            Ok(url) => url,
            Err(e) => {
                warn!("voice note upload failed after payment {}: {}", receipt, e);
                return Err(RequestError::RegistrationAfterPaymentFailed {
                    receipt,
                    reason: format!("clip upload failed: {}", e),
                });
            }
        };

        let note = PendingVoiceNote {
            id: make_receipt_id("voice-note", &params.payer),
            user_address: params.payer.clone(),
            user_fid: params.payer_fid,
            username: params.username,
            audio_url,
            duration_secs: params.duration_secs,
            message: params.message,
            created_at_ms: now_ms(),
            played: false,
            is_ad: params.kind == VoiceNoteKind::Ad,
        };
        let note_id = note.id.clone();
        self.state.add_pending_note(note).await;
        self.ledger.note_submitted(&params.payer).await;

        if self
            .event_tx
            .send(StationEvent::PendingNotesChanged)
            .await
            .is_err()
        {
            return Err(RequestError::RegistrationAfterPaymentFailed {
                receipt,
                reason: "timeline loop unavailable".into(),
            });
        }

        info!("voice note admitted: {} ({})", note_id, params.kind.label());
        Ok(VoiceNoteReceipt { note_id, receipt })
    }

    /// Payment-gated priority override: ask the timeline to jump to a random
    /// queued song.  Not a queue insertion.
    pub async fn skip_to_random(&self, payer: &str) -> Result<TxReceipt, RequestError> {
        let amount = self.config.pricing.skip_to_random;
        let receipt = self
            .gateway
            .confirm(PaymentAction::SkipToRandom, payer, amount)
            .await
            .map_err(|e| RequestError::PaymentRequired(e.to_string()))?;

        if self
            .event_tx
            .send(StationEvent::SkipToRandom)
            .await
            .is_err()
        {
            return Err(RequestError::RegistrationAfterPaymentFailed {
                receipt,
                reason: "timeline loop unavailable".into(),
            });
        }
        Ok(receipt)
    }

    /// Bounded-time probe of an audio asset's duration.  Times out to the
    /// configured default rather than failing the admission.
    async fn resolve_duration(&self, audio_url: &str) -> f64 {
        let timeout = self.config.sync.duration_probe_timeout();
        match tokio::time::timeout(timeout, self.probe_duration(audio_url)).await {
            Ok(Some(secs)) => secs,
            Ok(None) => {
                warn!(
                    "duration probe found no usable metadata for {}, using default",
                    audio_url
                );
                self.config.sync.default_song_duration_secs
            }
            Err(_) => {
                warn!("duration probe timed out for {}, using default", audio_url);
                self.config.sync.default_song_duration_secs
            }
        }
    }

    async fn probe_duration(&self, audio_url: &str) -> Option<f64> {
        let resp = self.http.head(audio_url).send().await.ok()?;
        let headers = resp.headers();
        for name in ["x-audio-duration", "content-duration"] {
            if let Some(value) = headers.get(name) {
                if let Ok(secs) = value.to_str().unwrap_or_default().parse::<f64>() {
                    if secs > 0.0 {
                        return Some(secs);
                    }
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use airtime_proto::config::RewardsConfig;
    use async_trait::async_trait;

    struct DecliningGateway;

    #[async_trait]
    impl PaymentGateway for DecliningGateway {
        async fn confirm(
            &self,
            _action: PaymentAction,
            _payer: &str,
            _amount: u64,
        ) -> anyhow::Result<TxReceipt> {
            anyhow::bail!("insufficient funds")
        }

        async fn transfer_reward(&self, _to: &str, _amount: u64) -> anyhow::Result<TxReceipt> {
            anyhow::bail!("unreachable in these tests")
        }
    }

    struct ApprovingGateway;

    #[async_trait]
    impl PaymentGateway for ApprovingGateway {
        async fn confirm(
            &self,
            action: PaymentAction,
            payer: &str,
            _amount: u64,
        ) -> anyhow::Result<TxReceipt> {
            Ok(TxReceipt(format!("0x{}-{}", action.label(), payer)))
        }

        async fn transfer_reward(&self, _to: &str, _amount: u64) -> anyhow::Result<TxReceipt> {
            Ok(TxReceipt("0xclaim".into()))
        }
    }

    struct MemoryClipStore;

    #[async_trait]
    impl ClipStore for MemoryClipStore {
        async fn store(&self, clip: Vec<u8>, _content_type: &str) -> anyhow::Result<String> {
            Ok(format!("https://clips.example/{}", clip.len()))
        }
    }

    struct BrokenClipStore;

    #[async_trait]
    impl ClipStore for BrokenClipStore {
        async fn store(&self, _clip: Vec<u8>, _content_type: &str) -> anyhow::Result<String> {
            anyhow::bail!("storage unavailable")
        }
    }

    struct Fixture {
        admission: AdmissionControl,
        state: StateManager,
        _event_rx: mpsc::Receiver<StationEvent>,
        _dir: tempfile::TempDir,
    }

    fn fixture(gateway: Arc<dyn PaymentGateway>, clips: Arc<dyn ClipStore>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        let state = StateManager::new(config.server.history_limit);
        let ledger = RewardLedger::load(dir.path().join("ledger.json"), RewardsConfig::default());
        let (event_tx, event_rx) = mpsc::channel(64);
        let admission = AdmissionControl::new(
            config,
            gateway,
            clips,
            state.clone(),
            ledger,
            event_tx,
        );
        Fixture {
            admission,
            state,
            _event_rx: event_rx,
            _dir: dir,
        }
    }

    fn song_request() -> QueueSongRequest {
        QueueSongRequest {
            token_id: "7".into(),
            name: "track".into(),
            artist: "artist".into(),
            audio_url: "https://cdn.example/7.mp3".into(),
            image_url: String::new(),
            payer: "0xbeef".into(),
            payer_fid: Some(42),
            tip: None,
            duration_secs: Some(200.0),
        }
    }

    fn note_params(kind: VoiceNoteKind, duration_secs: f64) -> VoiceNoteParams {
        VoiceNoteParams {
            payer: "0xbeef".into(),
            kind,
            duration_secs,
            payer_fid: None,
            username: Some("dj".into()),
            message: None,
        }
    }

    #[tokio::test]
    async fn unconfirmed_payment_leaves_queue_unchanged() {
        let f = fixture(Arc::new(DecliningGateway), Arc::new(MemoryClipStore));
        let err = f.admission.request_queue_song(song_request()).await.unwrap_err();
        assert!(matches!(err, RequestError::PaymentRequired(_)));
        assert_eq!(f.state.queue_len().await, 0);
    }

    #[tokio::test]
    async fn confirmed_payment_appends_fifo() {
        let f = fixture(Arc::new(ApprovingGateway), Arc::new(MemoryClipStore));
        let first = f.admission.request_queue_song(song_request()).await.unwrap();
        let mut second_req = song_request();
        second_req.token_id = "8".into();
        let second = f.admission.request_queue_song(second_req).await.unwrap();
        assert_ne!(first.queue_entry_id, second.queue_entry_id);

        let queue = f.state.queue().await;
        assert_eq!(queue.len(), 2);
        assert_eq!(queue[0].token_id, "7");
        assert_eq!(queue[1].token_id, "8");
        assert_eq!(queue[0].duration_secs, 200.0);
    }

    #[tokio::test]
    async fn tip_rides_on_top_of_the_queue_price() {
        let f = fixture(Arc::new(ApprovingGateway), Arc::new(MemoryClipStore));
        let mut req = song_request();
        req.tip = Some(250);
        f.admission.request_queue_song(req).await.unwrap();
        let queue = f.state.queue().await;
        assert_eq!(queue[0].paid_amount, Config::default().pricing.queue_song + 250);
    }

    #[tokio::test]
    async fn upload_failure_after_payment_is_surfaced_with_receipt() {
        let f = fixture(Arc::new(ApprovingGateway), Arc::new(BrokenClipStore));
        let err = f
            .admission
            .request_voice_note(
                note_params(VoiceNoteKind::Shoutout, 10.0),
                vec![1, 2, 3],
                "audio/webm",
            )
            .await
            .unwrap_err();
        assert!(err.payment_confirmed());
        assert!(err.receipt().is_some());
        // Nothing was registered.
        assert!(f.state.pending_notes().await.is_empty());
    }

    #[tokio::test]
    async fn voice_note_over_cap_is_rejected_before_payment() {
        let f = fixture(Arc::new(DecliningGateway), Arc::new(MemoryClipStore));
        // Declining gateway would fail payment, but the cap check fires first.
        let err = f
            .admission
            .request_voice_note(
                note_params(VoiceNoteKind::Shoutout, 120.0),
                vec![1],
                "audio/webm",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::Invalid(_)));
    }

    #[tokio::test]
    async fn admitted_voice_note_is_pending_and_counted() {
        let f = fixture(Arc::new(ApprovingGateway), Arc::new(MemoryClipStore));
        let receipt = f
            .admission
            .request_voice_note(
                note_params(VoiceNoteKind::Ad, 45.0),
                vec![0u8; 16],
                "audio/webm",
            )
            .await
            .unwrap();

        let pending = f.state.pending_notes().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, receipt.note_id);
        assert!(pending[0].is_ad);
        assert!(!pending[0].played);
        assert_eq!(
            f.admission.ledger.stats_for("0xbeef").await.voice_notes_submitted,
            1
        );
    }

    #[tokio::test]
    async fn skip_is_gated_on_payment() {
        let f = fixture(Arc::new(DecliningGateway), Arc::new(MemoryClipStore));
        let err = f.admission.skip_to_random("0xbeef").await.unwrap_err();
        assert!(matches!(err, RequestError::PaymentRequired(_)));
    }
}

